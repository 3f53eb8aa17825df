//! Worker log tailing for `GET /logs/{slot}`.
//!
//! The supervisor appends to one log file per worker. A stream resumes from
//! the last offset read for the slot, polls for growth, and restarts from
//! zero with a marker line when the file shrinks.

use galaxy_common::{Slot, WorkerNaming};
use std::collections::HashMap;
use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

pub const TRUNCATION_MARKER: &str = "--- log truncated, restarting from the beginning ---\n";

/// Consecutive I/O failures tolerated before a stream ends
pub const MAX_IO_RETRIES: u32 = 3;

/// Upper bound on one body chunk
pub const MAX_CHUNK: u64 = 64 * 1024;

pub type LogChunk = Result<Vec<u8>, io::Error>;

pub struct LogTailer {
    dir: PathBuf,
    naming: WorkerNaming,
    poll: Duration,
    offsets: Mutex<HashMap<Slot, u64>>,
    shutdown: watch::Receiver<bool>,
}

impl LogTailer {
    pub fn new(
        dir: impl Into<PathBuf>,
        naming: WorkerNaming,
        poll: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            dir: dir.into(),
            naming,
            poll,
            offsets: Mutex::new(HashMap::new()),
            shutdown,
        }
    }

    pub fn path_for(&self, slot: Slot) -> PathBuf {
        self.dir.join(self.naming.log_file(slot))
    }

    pub fn offset(&self, slot: Slot) -> u64 {
        self.offsets
            .lock()
            .map(|o| o.get(&slot).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    fn set_offset(&self, slot: Slot, offset: u64) {
        if let Ok(mut offsets) = self.offsets.lock() {
            offsets.insert(slot, offset);
        }
    }

    /// Start tailing `slot`; the stream ends on shutdown, when the client
    /// goes away, or with the last error after repeated read failures
    pub fn stream(self: &Arc<Self>, slot: Slot) -> ReceiverStream<LogChunk> {
        let (tx, rx) = mpsc::channel(16);
        let tailer = Arc::clone(self);
        tokio::spawn(async move {
            tailer.pump(slot, tx).await;
        });
        ReceiverStream::new(rx)
    }

    async fn pump(&self, slot: Slot, tx: mpsc::Sender<LogChunk>) {
        let path = self.path_for(slot);
        let mut shutdown = self.shutdown.clone();
        let mut offset = self.offset(slot);
        let mut failures = 0;

        debug!("[LOGS] slot {} streaming {} from offset {}", slot, path.display(), offset);
        loop {
            if *shutdown.borrow() {
                break;
            }

            let mut backlog = false;
            match read_from(&path, offset, MAX_CHUNK).await {
                Ok(read) => {
                    failures = 0;
                    if read.truncated && tx.send(Ok(TRUNCATION_MARKER.as_bytes().to_vec())).await.is_err() {
                        return;
                    }
                    if !read.data.is_empty() && tx.send(Ok(read.data)).await.is_err() {
                        return;
                    }
                    offset = read.next_offset;
                    self.set_offset(slot, offset);
                    backlog = read.remaining > 0;
                }
                Err(e) => {
                    failures += 1;
                    if failures > MAX_IO_RETRIES {
                        warn!("[LOGS] slot {} giving up on {}: {}", slot, path.display(), e);
                        let _ = tx.send(Err(e)).await;
                        return;
                    }
                    debug!("[LOGS] slot {} read failed ({}/{}): {}", slot, failures, MAX_IO_RETRIES, e);
                }
            }

            // Drain a backlog without waiting for the next poll
            if backlog {
                continue;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.poll) => {}
                _ = tx.closed() => return,
                _ = shutdown.changed() => break,
            }
        }
        debug!("[LOGS] slot {} stream closed by shutdown", slot);
    }
}

struct Read {
    data: Vec<u8>,
    next_offset: u64,
    /// Bytes past `next_offset` at the time of the read
    remaining: u64,
    truncated: bool,
}

/// Up to `limit` bytes past `offset`, restarting from zero when the file
/// shrank below it
async fn read_from(path: &Path, offset: u64, limit: u64) -> io::Result<Read> {
    let mut file = tokio::fs::File::open(path).await?;
    let len = file.metadata().await?.len();

    let truncated = len < offset;
    let start = if truncated { 0 } else { offset };
    let want = (len - start).min(limit);
    if want == 0 {
        return Ok(Read {
            data: Vec::new(),
            next_offset: start,
            remaining: 0,
            truncated,
        });
    }

    file.seek(SeekFrom::Start(start)).await?;
    let mut data = Vec::with_capacity(want as usize);
    file.take(want).read_to_end(&mut data).await?;

    let next_offset = start + data.len() as u64;
    Ok(Read {
        next_offset,
        remaining: len.saturating_sub(next_offset),
        data,
        truncated,
    })
}
