//! Config Writer - durable, atomic persistence of worker configs
//!
//! A worker polls its `configN.json`, so a reader must never observe a
//! partially written file. Writes go to a temp file in the same directory,
//! are fsynced, then renamed over the destination. The destination mtime is
//! then pushed strictly forward and the payload carries its own millisecond
//! stamp, so a rewrite with identical bytes is still seen as newer.
//!
//! Writes for one slot are serialized in acceptance order: a caller takes a
//! [`WriteTicket`] when the config is accepted, and a ticket older than the
//! last one written is skipped instead of overwriting a newer config.

use crate::supervisor::ProcessSupervisor;
use anyhow::{Context, Result};
use galaxy_common::{Slot, WorkerConfig, WorkerNaming};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Soft signal asking a worker to re-read its config file
pub const RELOAD_SIGNAL: &str = "SIGUSR2";

/// Position of an accepted config in its slot's write order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteTicket {
    slot: Slot,
    seq: u64,
}

/// Per-slot ordering state
#[derive(Default)]
struct Lane {
    issued: AtomicU64,
    /// Sequence of the last ticket written; held across stamp, write and rename
    written: Mutex<u64>,
}

pub struct ConfigWriter {
    dir: PathBuf,
    naming: WorkerNaming,
    supervisor: Arc<dyn ProcessSupervisor>,
    last_stamp: AtomicI64,
    lanes: BTreeMap<Slot, Lane>,
}

impl ConfigWriter {
    pub fn new(
        dir: impl Into<PathBuf>,
        naming: WorkerNaming,
        supervisor: Arc<dyn ProcessSupervisor>,
    ) -> Self {
        Self {
            dir: dir.into(),
            naming,
            supervisor,
            last_stamp: AtomicI64::new(0),
            lanes: Slot::all().map(|s| (s, Lane::default())).collect(),
        }
    }

    pub fn path_for(&self, slot: Slot) -> PathBuf {
        self.dir.join(self.naming.config_file(slot))
    }

    fn lane(&self, slot: Slot) -> Result<&Lane> {
        self.lanes
            .get(&slot)
            .with_context(|| format!("No write lane for slot {}", slot))
    }

    /// Reserve the next write position for `slot`. Take it when the config
    /// is accepted, not when the write runs.
    pub fn ticket(&self, slot: Slot) -> WriteTicket {
        let seq = self
            .lanes
            .get(&slot)
            .map(|lane| lane.issued.fetch_add(1, Ordering::SeqCst) + 1)
            .unwrap_or(0);
        WriteTicket { slot, seq }
    }

    /// Embed a millisecond stamp strictly greater than any stamp handed out
    /// before, even when the wall clock stalls or steps back
    pub fn stamp(&self, config: WorkerConfig) -> WorkerConfig {
        let now = chrono::Utc::now().timestamp_millis();
        let mut prev = self.last_stamp.load(Ordering::SeqCst);
        loop {
            let next = now.max(prev + 1);
            match self
                .last_stamp
                .compare_exchange(prev, next, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return config.stamped(next),
                Err(actual) => prev = actual,
            }
        }
    }

    /// Stamp and write `config` for the ticket's slot, then optionally signal
    /// the worker to reload. Returns the config as written, or `None` when a
    /// newer ticket for the slot was already written.
    ///
    /// A failed reload signal is logged and does not fail the write.
    pub async fn persist(
        &self,
        ticket: WriteTicket,
        config: &WorkerConfig,
        notify: bool,
    ) -> Result<Option<WorkerConfig>> {
        let slot = ticket.slot;
        let mut written = self.lane(slot)?.written.lock().await;
        if ticket.seq <= *written {
            debug!("[CONFIG] slot {} write #{} superseded by #{}", slot, ticket.seq, *written);
            return Ok(None);
        }

        let stamped = self.stamp(config.clone());
        let bytes = serde_json::to_vec(&stamped).context("Failed to serialize worker config")?;
        let path = self.path_for(slot);

        let target = path.clone();
        tokio::task::spawn_blocking(move || write_atomic(&target, &bytes))
            .await
            .context("Config write task panicked")??;
        *written = ticket.seq;
        drop(written);
        info!("[CONFIG] slot {} written to {}", slot, path.display());

        if notify {
            let name = self.naming.process_name(slot);
            match self.supervisor.signal(&name, RELOAD_SIGNAL).await {
                Ok(()) => debug!("[CONFIG] sent {} to {}", RELOAD_SIGNAL, name),
                Err(e) => warn!("[CONFIG] slot {} reload signal failed: {}", slot, e),
            }
        }

        Ok(Some(stamped))
    }
}

/// Replace `path` with `bytes` so that readers see either the old or the new
/// content, never a mix.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .with_context(|| format!("No file name in {}", path.display()))?
        .to_string_lossy();
    let temp_path = dir.join(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4().simple()));

    let previous_mtime = fs::metadata(path).and_then(|m| m.modified()).ok();

    let file = match write_and_rename(&temp_path, path, bytes) {
        Ok(file) => file,
        Err(e) => {
            let _ = fs::remove_file(&temp_path);
            return Err(e);
        }
    };

    // The handle still points at the renamed inode
    let mtime = bump_mtime(previous_mtime);
    if let Err(e) = file.set_modified(mtime) {
        warn!("[CONFIG] could not advance mtime of {}: {}", path.display(), e);
    }

    // Persist the rename itself
    File::open(dir)
        .and_then(|d| d.sync_all())
        .with_context(|| format!("Failed to sync directory {}", dir.display()))?;

    Ok(())
}

fn write_and_rename(temp_path: &Path, path: &Path, bytes: &[u8]) -> Result<File> {
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(temp_path)
        .with_context(|| format!("Failed to create {}", temp_path.display()))?;
    file.write_all(bytes)
        .with_context(|| format!("Failed to write {}", temp_path.display()))?;
    file.sync_all()
        .with_context(|| format!("Failed to sync {}", temp_path.display()))?;
    fs::rename(temp_path, path)
        .with_context(|| format!("Failed to rename to {}", path.display()))?;
    Ok(file)
}

/// Now, or one millisecond past the previous mtime when the clock has not
/// moved far enough for the filesystem to notice
fn bump_mtime(previous: Option<SystemTime>) -> SystemTime {
    let now = SystemTime::now();
    match previous {
        Some(prev) => now.max(prev + Duration::from_millis(1)),
        None => now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::supervisor::FakeSupervisor;
    use galaxy_common::{Identity, TimingBlock, Toggles};
    use tempfile::TempDir;

    fn config(dual: bool) -> WorkerConfig {
        WorkerConfig::new(
            Identity {
                rc1: "alpha".to_string(),
                rc2: "beta".to_string(),
                planet_name: "Vega".to_string(),
                ..Identity::default()
            },
            TimingBlock::from_values([1, 2, 3, 4, 5, 6]),
            Toggles {
                dual_rc_toggle: dual,
                ..Toggles::default()
            },
            dual.then_some(TimingBlock::from_values([7, 8, 9, 10, 11, 12])),
        )
    }

    fn writer(dir: &TempDir, fake: &FakeSupervisor) -> ConfigWriter {
        ConfigWriter::new(dir.path(), WorkerNaming::default(), Arc::new(fake.clone()))
    }

    #[test]
    fn test_write_atomic_replaces_content() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config1.json");

        write_atomic(&path, b"{\"a\":1}").unwrap();
        write_atomic(&path, b"{\"a\":2}").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "{\"a\":2}");
        // No temp files left behind
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_identical_rewrite_advances_mtime() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config2.json");

        write_atomic(&path, b"same").unwrap();
        let first = fs::metadata(&path).unwrap().modified().unwrap();
        write_atomic(&path, b"same").unwrap();
        let second = fs::metadata(&path).unwrap().modified().unwrap();

        assert!(second > first);
    }

    #[test]
    fn test_stamps_strictly_increase() {
        let dir = TempDir::new().unwrap();
        let writer = writer(&dir, &FakeSupervisor::new());

        let mut last = 0;
        for _ in 0..50 {
            let stamped = writer.stamp(config(false));
            assert!(stamped.last_updated > last);
            last = stamped.last_updated;
        }
    }

    #[tokio::test]
    async fn test_persist_single_rc_omits_secondary_fields() {
        let dir = TempDir::new().unwrap();
        let fake = FakeSupervisor::new();
        let writer = writer(&dir, &fake);
        let slot = Slot::new(1).unwrap();

        writer
            .persist(writer.ticket(slot), &config(false), false)
            .await
            .unwrap();

        let raw = fs::read_to_string(dir.path().join("config1.json")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["RC1"], "alpha");
        assert!(value.get("RC2startAttackTime").is_none());
        assert!(value["lastUpdated"].as_i64().unwrap() > 0);
        assert!(!raw.contains('\n'));
        assert_eq!(fake.call_count("signal"), 0);
    }

    #[tokio::test]
    async fn test_persist_dual_rc_and_notify() {
        let dir = TempDir::new().unwrap();
        let fake = FakeSupervisor::new();
        let writer = writer(&dir, &fake);
        let slot = Slot::new(4).unwrap();

        let written = writer
            .persist(writer.ticket(slot), &config(true), true)
            .await
            .unwrap()
            .unwrap();

        let raw = fs::read_to_string(writer.path_for(slot)).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        for field in TimingBlock::FIELDS {
            assert!(value.get(field).is_some(), "missing {field}");
            assert!(value.get(format!("RC2{field}")).is_some(), "missing RC2{field}");
        }
        assert_eq!(value["lastUpdated"], written.last_updated);
        assert_eq!(fake.calls(), vec!["signal SIGUSR2 galaxy_4".to_string()]);
    }

    #[tokio::test]
    async fn test_persist_into_missing_dir_fails() {
        let dir = TempDir::new().unwrap();
        let writer = ConfigWriter::new(
            dir.path().join("absent"),
            WorkerNaming::default(),
            Arc::new(FakeSupervisor::new()),
        );
        let ticket = writer.ticket(Slot::new(1).unwrap());
        assert!(writer.persist(ticket, &config(false), false).await.is_err());
    }

    #[tokio::test]
    async fn test_stale_ticket_is_skipped() {
        let dir = TempDir::new().unwrap();
        let fake = FakeSupervisor::new();
        let writer = writer(&dir, &fake);
        let slot = Slot::new(2).unwrap();

        let older = writer.ticket(slot);
        let newer = writer.ticket(slot);
        let mut latest = config(false);
        latest.planet_name = "Rigel".to_string();

        assert!(writer.persist(newer, &latest, true).await.unwrap().is_some());
        assert!(writer.persist(older, &config(false), true).await.unwrap().is_none());

        let raw = fs::read_to_string(writer.path_for(slot)).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["planetName"], "Rigel");
        assert_eq!(fake.call_count("signal"), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_writes_keep_acceptance_order() {
        let dir = TempDir::new().unwrap();
        let writer = Arc::new(writer(&dir, &FakeSupervisor::new()));
        let slot = Slot::new(3).unwrap();

        let mut tasks = tokio::task::JoinSet::new();
        for attack in 1..=8u64 {
            let ticket = writer.ticket(slot);
            let mut next = config(false);
            next.timing.stop_attack_time = attack;
            let writer = Arc::clone(&writer);
            tasks.spawn(async move { writer.persist(ticket, &next, false).await.unwrap() });
        }
        while let Some(joined) = tasks.join_next().await {
            joined.unwrap();
        }

        let raw = fs::read_to_string(writer.path_for(slot)).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["stopAttackTime"], 8);
    }
}
