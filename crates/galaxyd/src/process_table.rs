//! Process Table - authoritative slot -> worker handle registry
//!
//! Reads go through an `RwLock` over the records and never wait on a
//! lifecycle transition. Transitions (launch, terminate) run on the task
//! pool and are serialized daemon-wide by `transitions`.
//!
//! Every start or stop bumps the slot's generation. A background transition
//! that finds its generation superseded skips its work, and a launch that
//! completes after a stop never records its handle.

use crate::config_writer::{ConfigWriter, WriteTicket};
use crate::pool::TaskPool;
use crate::supervisor::{LaunchSpec, ProcessSupervisor};
use crate::termination::TerminationEngine;
use chrono::{DateTime, Utc};
use galaxy_common::{DirectSlotStatus, DirectStatus, Slot, SlotState, WorkerConfig, WorkerNaming};
use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

#[derive(Error, Debug)]
pub enum LifecycleError {
    #[error("Script not found: {}", .0.display())]
    ScriptNotFound(PathBuf),
}

/// Handle of a launched worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerHandle {
    /// Pid reported by the supervisor, if any
    pub pid: Option<u32>,
    pub launched_at: DateTime<Utc>,
}

impl WorkerHandle {
    pub fn new(pid: Option<u32>) -> Self {
        Self {
            pid,
            launched_at: Utc::now(),
        }
    }

    /// Signal-0 liveness check of the recorded pid
    pub fn is_alive(&self) -> bool {
        self.pid.is_some_and(pid_alive)
    }
}

fn pid_alive(pid: u32) -> bool {
    match kill(Pid::from_raw(pid as i32), None) {
        Ok(()) => true,
        // Exists but owned by someone else
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

#[derive(Debug, Clone, Default)]
pub struct SlotRecord {
    pub handle: Option<WorkerHandle>,
    pub state: SlotState,
    /// Last validated config, kept for diagnostics
    pub config: Option<WorkerConfig>,
    generation: u64,
}

// ============================================================================
// Worker argv
// ============================================================================

type RenderFlag = fn(&WorkerConfig) -> String;

/// Worker command-line flags in emission order
const WORKER_FLAGS: &[(&str, RenderFlag)] = &[
    ("RC1", |c| c.rc1.clone()),
    ("RC2", |c| c.rc2.clone()),
    ("startAttackTime", |c| c.timing.start_attack_time.to_string()),
    ("stopAttackTime", |c| c.timing.stop_attack_time.to_string()),
    ("attackIntervalTime", |c| c.timing.attack_interval_time.to_string()),
    ("startDefenceTime", |c| c.timing.start_defence_time.to_string()),
    ("stopDefenceTime", |c| c.timing.stop_defence_time.to_string()),
    ("defenceIntervalTime", |c| c.timing.defence_interval_time.to_string()),
    ("planetName", |c| c.planet_name.clone()),
    ("rival", |c| c.rival.join(",")),
    ("blacklist", |c| c.blacklist.join(",")),
    ("whitelist", |c| c.whitelist.join(",")),
    ("standOnEnemy", |c| c.toggles.stand_on_enemy.to_string()),
    ("actionOnEnemy", |c| c.toggles.action_on_enemy.to_string()),
    ("aiChatToggle", |c| c.toggles.ai_chat_toggle.to_string()),
    ("aiPilotToggle", |c| c.toggles.ai_pilot_toggle.to_string()),
    ("kickAllToggle", |c| c.toggles.kick_all_toggle.to_string()),
    ("dualRCToggle", |c| c.toggles.dual_rc_toggle.to_string()),
];

/// Build the `--flag value` argument list handed to a worker
pub fn worker_args(config: &WorkerConfig) -> Vec<String> {
    let mut args = Vec::new();
    for (flag, render) in WORKER_FLAGS {
        args.push(format!("--{}", flag));
        args.push(render(config));
    }

    if let Some(secondary) = &config.secondary_timing {
        let block = secondary.block();
        for (field, value) in galaxy_common::TimingBlock::FIELDS.iter().zip(block.values()) {
            args.push(format!("--RC2{}", field));
            args.push(value.to_string());
        }
    }
    args
}

// ============================================================================
// Process Table
// ============================================================================

pub struct ProcessTable {
    records: RwLock<BTreeMap<Slot, SlotRecord>>,
    transitions: Mutex<()>,
    supervisor: Arc<dyn ProcessSupervisor>,
    engine: Arc<TerminationEngine>,
    writer: Arc<ConfigWriter>,
    pool: TaskPool,
    naming: WorkerNaming,
    backend_path: PathBuf,
}

impl ProcessTable {
    pub fn new(
        supervisor: Arc<dyn ProcessSupervisor>,
        engine: Arc<TerminationEngine>,
        writer: Arc<ConfigWriter>,
        pool: TaskPool,
        naming: WorkerNaming,
        backend_path: impl Into<PathBuf>,
    ) -> Self {
        let records = Slot::all().map(|s| (s, SlotRecord::default())).collect();
        Self {
            records: RwLock::new(records),
            transitions: Mutex::new(()),
            supervisor,
            engine,
            writer,
            pool,
            naming,
            backend_path: backend_path.into(),
        }
    }

    pub fn script_path(&self, slot: Slot) -> PathBuf {
        self.backend_path.join(self.naming.script_file(slot))
    }

    /// Cached record for `slot`
    pub async fn get(&self, slot: Slot) -> SlotRecord {
        self.records
            .read()
            .await
            .get(&slot)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn state(&self, slot: Slot) -> SlotState {
        self.get(slot).await.state
    }

    /// Retain the last validated config without touching the worker
    pub async fn remember_config(&self, slot: Slot, config: WorkerConfig) {
        if let Some(record) = self.records.write().await.get_mut(&slot) {
            record.config = Some(config);
        }
    }

    /// Begin launching a worker for `slot`; returns once the launch is queued.
    ///
    /// Fails without touching the table when the worker script is absent.
    pub async fn start(self: &Arc<Self>, slot: Slot, config: WorkerConfig) -> Result<(), LifecycleError> {
        let script = self.script_path(slot);
        if !tokio::fs::try_exists(&script).await.unwrap_or(false) {
            return Err(LifecycleError::ScriptNotFound(script));
        }

        let generation = {
            let mut records = self.records.write().await;
            let record = records.entry(slot).or_default();
            record.generation += 1;
            record.state = SlotState::Starting;
            record.config = Some(config.clone());
            record.generation
        };
        let ticket = self.writer.ticket(slot);

        let table = Arc::clone(self);
        self.pool.submit("launch", async move {
            table.launch(slot, generation, ticket, script, config).await;
        });
        Ok(())
    }

    async fn launch(
        &self,
        slot: Slot,
        generation: u64,
        ticket: WriteTicket,
        script: PathBuf,
        config: WorkerConfig,
    ) {
        let _transition = self.transitions.lock().await;
        if !self.is_current(slot, generation).await {
            debug!("[TABLE] slot {} launch superseded", slot);
            return;
        }

        // The worker reads its config file on boot; a newer update may
        // already be on disk
        if let Err(e) = self.writer.persist(ticket, &config, false).await {
            warn!("[TABLE] slot {} config write before launch failed: {:#}", slot, e);
        }

        // A worker may have outlived a previous daemon instance
        self.engine.terminate(slot).await;

        let spec = LaunchSpec {
            name: self.naming.process_name(slot),
            script,
            cwd: self.backend_path.clone(),
            args: worker_args(&config),
        };

        match self.supervisor.start(&spec).await {
            Ok(pid) => {
                let recorded = self
                    .update_if_current(slot, generation, |record| {
                        record.handle = Some(WorkerHandle::new(pid));
                        record.state = SlotState::Running;
                    })
                    .await;
                if recorded {
                    info!("[TABLE] slot {} started {} (pid {:?})", slot, spec.name, pid);
                } else {
                    debug!("[TABLE] slot {} stopped during launch, handle dropped", slot);
                }
            }
            Err(e) => {
                error!("[TABLE] slot {} launch failed: {}", slot, e);
                self.update_if_current(slot, generation, |record| {
                    record.handle = None;
                    record.state = SlotState::Idle;
                })
                .await;
            }
        }
    }

    /// Clear the slot's handle now and terminate its processes in the
    /// background. Returns the handle that was cleared, if any.
    pub async fn stop(self: &Arc<Self>, slot: Slot) -> Option<WorkerHandle> {
        let (previous, generation) = {
            let mut records = self.records.write().await;
            let record = records.entry(slot).or_default();
            record.generation += 1;
            record.state = SlotState::Stopping;
            (record.handle.take(), record.generation)
        };

        let table = Arc::clone(self);
        self.pool.submit("terminate", async move {
            let _transition = table.transitions.lock().await;
            // A later start runs its own terminate before launching
            if !table.is_current(slot, generation).await {
                debug!("[TABLE] slot {} stop superseded", slot);
                return;
            }
            table.engine.terminate(slot).await;
            table
                .update_if_current(slot, generation, |record| record.state = SlotState::Idle)
                .await;
        });
        previous
    }

    /// Direct view: liveness from recorded handles only
    pub async fn quick_status(&self) -> DirectStatus {
        let records = self.records.read().await;
        let slots = Slot::all().map(|slot| {
            let record = records.get(&slot).cloned().unwrap_or_default();
            let alive = record.handle.as_ref().is_some_and(WorkerHandle::is_alive);
            let status = DirectSlotStatus {
                running: alive,
                pid: record.handle.as_ref().and_then(|h| h.pid).filter(|_| alive),
                process_exists: record.handle.is_some(),
                state: record.state,
            };
            (slot, status)
        });
        DirectStatus::new(Utc::now().timestamp_millis(), slots)
    }

    /// Shutdown path: clear every slot and run the termination engine on all
    /// of them concurrently, each bounded by `per_slot`
    pub async fn terminate_all(&self, per_slot: Duration) {
        // Hold the transition lock so no queued launch can follow the kill
        let _transition = match tokio::time::timeout(per_slot, self.transitions.lock()).await {
            Ok(guard) => Some(guard),
            Err(_) => {
                warn!("[TABLE] transition in progress, terminating without the lock");
                None
            }
        };

        {
            let mut records = self.records.write().await;
            for record in records.values_mut() {
                record.generation += 1;
                record.handle = None;
                record.state = SlotState::Stopping;
            }
        }

        let mut tasks = JoinSet::new();
        for slot in Slot::all() {
            let engine = Arc::clone(&self.engine);
            tasks.spawn(async move {
                let outcome = tokio::time::timeout(per_slot, engine.terminate(slot)).await;
                (slot, outcome.is_ok())
            });
        }
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((slot, true)) => debug!("[TABLE] slot {} cleaned up", slot),
                Ok((slot, false)) => warn!("[TABLE] slot {} cleanup timed out after {:?}", slot, per_slot),
                Err(e) => warn!("[TABLE] cleanup task failed: {}", e),
            }
        }

        let mut records = self.records.write().await;
        for record in records.values_mut() {
            record.state = SlotState::Idle;
        }
    }

    async fn is_current(&self, slot: Slot, generation: u64) -> bool {
        self.records
            .read()
            .await
            .get(&slot)
            .is_some_and(|r| r.generation == generation)
    }

    async fn update_if_current<F>(&self, slot: Slot, generation: u64, apply: F) -> bool
    where
        F: FnOnce(&mut SlotRecord),
    {
        let mut records = self.records.write().await;
        match records.get_mut(&slot) {
            Some(record) if record.generation == generation => {
                apply(record);
                true
            }
            _ => false,
        }
    }
}
