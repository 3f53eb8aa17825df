//! The daemon: one owned instance of every component, shared by handlers.

use crate::channel::{LiveChannel, PushOutcome};
use crate::config::DaemonConfig;
use crate::config_writer::ConfigWriter;
use crate::error::ApiError;
use crate::log_stream::{LogChunk, LogTailer};
use crate::pool::TaskPool;
use crate::process_table::ProcessTable;
use crate::status_cache::StatusCache;
use crate::supervisor::{Pm2Supervisor, ProcessSupervisor};
use crate::termination::TerminationEngine;
use chrono::Utc;
use galaxy_common::{
    validate_form, DirectStatus, FormInput, HealthResponse, LifecycleAck, Slot, StatusSnapshot,
    UpdateMethod, WorkerConfig,
};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};

pub struct Daemon {
    config: DaemonConfig,
    table: Arc<ProcessTable>,
    status: StatusCache,
    channel: Arc<LiveChannel>,
    writer: Arc<ConfigWriter>,
    logs: Arc<LogTailer>,
    pool: TaskPool,
    shutdown_tx: watch::Sender<bool>,
    started_at: Instant,
}

impl Daemon {
    /// Daemon driving the configured pm2 binary
    pub fn new(config: DaemonConfig) -> Self {
        let supervisor = Arc::new(Pm2Supervisor::new(
            config.supervisor_bin.clone(),
            config.backend_path.clone(),
            config.supervisor_timeout(),
        ));
        Self::with_supervisor(config, supervisor)
    }

    pub fn with_supervisor(config: DaemonConfig, supervisor: Arc<dyn ProcessSupervisor>) -> Self {
        let naming = config.naming();
        let pool = TaskPool::new(config.pool_size);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let engine = Arc::new(TerminationEngine::new(
            Arc::clone(&supervisor),
            naming.clone(),
            config.runtime_marker.clone(),
            config.strategy_timeout(),
        ));
        let writer = Arc::new(ConfigWriter::new(
            config.backend_path.clone(),
            naming.clone(),
            Arc::clone(&supervisor),
        ));
        let table = Arc::new(ProcessTable::new(
            Arc::clone(&supervisor),
            engine,
            Arc::clone(&writer),
            pool.clone(),
            naming.clone(),
            config.backend_path.clone(),
        ));
        let status = StatusCache::new(
            supervisor,
            naming.clone(),
            config.status_freshness(),
            config.supervisor_timeout(),
        );
        let channel = Arc::new(LiveChannel::new(config.channel_wait()));
        let logs = Arc::new(LogTailer::new(
            config.log_dir.clone(),
            naming,
            config.log_poll(),
            shutdown_rx,
        ));

        Self {
            config,
            table,
            status,
            channel,
            writer,
            logs,
            pool,
            shutdown_tx,
            started_at: Instant::now(),
        }
    }

    pub fn config(&self) -> &DaemonConfig {
        &self.config
    }

    pub fn table(&self) -> &Arc<ProcessTable> {
        &self.table
    }

    pub fn channel(&self) -> &Arc<LiveChannel> {
        &self.channel
    }

    pub fn pool(&self) -> &TaskPool {
        &self.pool
    }

    /// Flips to `true` once shutdown begins
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    pub async fn start(&self, slot: Slot, form: &FormInput) -> Result<LifecycleAck, ApiError> {
        let config = validate_form(slot, form)?;
        warn_inverted(slot, &config);
        self.table.start(slot, config).await?;
        info!("  Start initiated for slot {}", slot);
        Ok(LifecycleAck::initiated(slot))
    }

    pub async fn stop(&self, slot: Slot) -> LifecycleAck {
        let previous = self.table.stop(slot).await;
        info!("  Stop requested for slot {} (handle {:?})", slot, previous.and_then(|h| h.pid));
        LifecycleAck::terminating(slot)
    }

    /// Validate and deliver a new config: over the live channel when a
    /// worker session acknowledges in time, otherwise through the file
    pub async fn update(&self, slot: Slot, form: &FormInput) -> Result<LifecycleAck, ApiError> {
        let config = validate_form(slot, form)?;
        warn_inverted(slot, &config);
        let ticket = self.writer.ticket(slot);
        self.table.remember_config(slot, config.clone()).await;

        let outcome = self.channel.push(slot, &config).await;
        let (method, result, notify) = match outcome {
            PushOutcome::Delivered(result) => (UpdateMethod::Channel, Some(result), false),
            other => {
                info!("  Slot {} update via file ({})", slot, other.as_str());
                (UpdateMethod::File, None, true)
            }
        };

        // The file stays the system of record either way
        let writer = Arc::clone(&self.writer);
        self.pool.submit("config_write", async move {
            if let Err(e) = writer.persist(ticket, &config, notify).await {
                warn!("  Slot {} config write failed: {:#}", slot, e);
            }
        });

        Ok(LifecycleAck::updated(slot, method, result))
    }

    pub async fn status(&self) -> Arc<StatusSnapshot> {
        self.status.aggregated().await
    }

    pub async fn quick_status(&self) -> DirectStatus {
        self.table.quick_status().await
    }

    pub fn health(&self) -> HealthResponse {
        HealthResponse {
            status: "healthy".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: Utc::now().timestamp_millis(),
            uptime_seconds: self.started_at.elapsed().as_secs(),
            backend_path: self.config.backend_path.display().to_string(),
            pool_size: self.pool.size(),
            tasks_in_flight: self.pool.in_flight(),
            channel_sessions: self.channel.session_count(),
        }
    }

    pub fn logs(&self, slot: Slot) -> ReceiverStream<LogChunk> {
        self.logs.stream(slot)
    }

    /// Terminate every worker, end open streams and release the pool
    pub async fn shutdown(&self) {
        info!("Performing cleanup...");
        self.shutdown_tx.send_replace(true);
        self.table.terminate_all(self.config.shutdown_timeout()).await;
        self.pool.close();
        if !self.pool.drain(self.config.shutdown_timeout()).await {
            warn!("Background tasks still running at shutdown: {}", self.pool.in_flight());
        }
        info!("Cleanup completed");
    }
}

/// Stop-before-start windows are accepted and only logged
fn warn_inverted(slot: Slot, config: &WorkerConfig) {
    let primary = config.timing.inverted_windows();
    let secondary = config
        .secondary_timing
        .map(|t| t.block().inverted_windows())
        .unwrap_or_default();
    if !primary.is_empty() || !secondary.is_empty() {
        warn!(
            "  Slot {} has inverted timing windows: {:?} (RC2: {:?})",
            slot, primary, secondary
        );
    }
}
