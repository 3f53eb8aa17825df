//! Status Cache - freshness-bounded view over the supervisor inventory
//!
//! A snapshot younger than the freshness window is returned as-is (the same
//! `Arc`, so repeated reads serialize identically). An older one is rebuilt
//! from a time-boxed inventory query while holding the cache lock, so
//! concurrent readers of a stale cache trigger a single refresh.

use crate::supervisor::{ProcessSupervisor, SupervisedProcess};
use chrono::Utc;
use galaxy_common::{Slot, SlotStatus, StatusSnapshot, WorkerNaming};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

struct Cached {
    snapshot: Arc<StatusSnapshot>,
    taken: Instant,
}

pub struct StatusCache {
    supervisor: Arc<dyn ProcessSupervisor>,
    naming: WorkerNaming,
    freshness: Duration,
    query_timeout: Duration,
    cached: Mutex<Option<Cached>>,
}

impl StatusCache {
    pub fn new(
        supervisor: Arc<dyn ProcessSupervisor>,
        naming: WorkerNaming,
        freshness: Duration,
        query_timeout: Duration,
    ) -> Self {
        Self {
            supervisor,
            naming,
            freshness,
            query_timeout,
            cached: Mutex::new(None),
        }
    }

    /// Aggregated view of all slots, refreshed when older than the window
    pub async fn aggregated(&self) -> Arc<StatusSnapshot> {
        let mut cached = self.cached.lock().await;
        if let Some(entry) = cached.as_ref() {
            if entry.taken.elapsed() < self.freshness {
                return Arc::clone(&entry.snapshot);
            }
        }

        let snapshot = Arc::new(self.refresh().await);
        *cached = Some(Cached {
            snapshot: Arc::clone(&snapshot),
            taken: Instant::now(),
        });
        snapshot
    }

    async fn refresh(&self) -> StatusSnapshot {
        let now = Utc::now().timestamp_millis();
        match tokio::time::timeout(self.query_timeout, self.supervisor.list()).await {
            Ok(Ok(processes)) => {
                debug!("[STATUS] refreshed from {} inventory entries", processes.len());
                build_snapshot(&self.naming, now, &processes)
            }
            Ok(Err(e)) => {
                warn!("[STATUS] inventory query failed: {}", e);
                StatusSnapshot::unknown(now)
            }
            Err(_) => {
                warn!("[STATUS] inventory query timed out after {:?}", self.query_timeout);
                StatusSnapshot::unknown(now)
            }
        }
    }
}

/// Project a supervisor inventory onto the five slots; foreign entries are
/// ignored and absent slots report "stopped"
pub fn build_snapshot(naming: &WorkerNaming, captured_at: i64, processes: &[SupervisedProcess]) -> StatusSnapshot {
    let slots = Slot::all().map(|slot| {
        let name = naming.process_name(slot);
        let status = processes
            .iter()
            .find(|p| p.name == name)
            .map(|p| SlotStatus {
                running: p.is_online(),
                pid: p.pid,
                status: p.status.clone(),
                cpu: p.cpu,
                memory: p.memory,
            })
            .unwrap_or_else(SlotStatus::stopped);
        (slot, status)
    });
    StatusSnapshot::new(captured_at, slots)
}
