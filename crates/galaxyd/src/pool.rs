//! Bounded background task pool.
//!
//! Request handlers hand slow work (spawn, kill, file I/O) to this pool and
//! return immediately. At most `size` tasks run at once; the rest wait for a
//! permit. Submitted tasks have no awaited result, so their failures must be
//! logged inside the task.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, Semaphore};
use tracing::{debug, warn};

#[derive(Clone)]
pub struct TaskPool {
    permits: Arc<Semaphore>,
    size: usize,
    in_flight: Arc<AtomicUsize>,
    idle: Arc<Notify>,
}

impl TaskPool {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
            in_flight: Arc::new(AtomicUsize::new(0)),
            idle: Arc::new(Notify::new()),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Tasks submitted and not yet finished, queued ones included
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Fire-and-forget submission
    pub fn submit<F>(&self, label: &'static str, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let permits = Arc::clone(&self.permits);
        let in_flight = Arc::clone(&self.in_flight);
        let idle = Arc::clone(&self.idle);
        in_flight.fetch_add(1, Ordering::SeqCst);

        tokio::spawn(async move {
            match permits.acquire_owned().await {
                Ok(_permit) => {
                    debug!("[POOL] running {}", label);
                    task.await;
                }
                Err(_) => warn!("[POOL] closed, dropping {}", label),
            }
            if in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
                idle.notify_waiters();
            }
        });
    }

    /// Wait until no task is in flight or `timeout` elapses; true if drained
    pub async fn drain(&self, timeout: Duration) -> bool {
        let wait = async {
            loop {
                let notified = self.idle.notified();
                if self.in_flight() == 0 {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(timeout, wait).await.is_ok()
    }

    /// Stop admitting queued work; running tasks finish normally
    pub fn close(&self) {
        self.permits.close();
    }
}
