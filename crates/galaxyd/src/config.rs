//! Configuration management for galaxyd.
//!
//! Loads settings from /etc/galaxyd/config.toml or uses defaults. Every field
//! has a default so a partial file is valid.

use anyhow::{Context, Result};
use galaxy_common::WorkerNaming;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Config file path
pub const CONFIG_PATH: &str = "/etc/galaxyd/config.toml";

/// Allowed range for the status freshness window
pub const FRESHNESS_MIN_MS: u64 = 300;
pub const FRESHNESS_MAX_MS: u64 = 500;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Directory holding worker scripts and their config files
    #[serde(default = "default_backend_path")]
    pub backend_path: PathBuf,

    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Background worker pool size
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// Status cache freshness window, clamped to 300..=500 ms
    #[serde(default = "default_status_freshness")]
    pub status_freshness_ms: u64,

    /// External process supervisor executable
    #[serde(default = "default_supervisor_bin")]
    pub supervisor_bin: String,

    /// Timeout for a single supervisor CLI call
    #[serde(default = "default_supervisor_timeout")]
    pub supervisor_timeout_ms: u64,

    /// Budget for each termination strategy
    #[serde(default = "default_strategy_timeout")]
    pub strategy_timeout_ms: u64,

    /// How long an update waits for a live channel acknowledgement
    #[serde(default = "default_channel_wait")]
    pub channel_wait_ms: u64,

    /// Per-slot cleanup budget on shutdown
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_ms: u64,

    #[serde(default = "default_worker_prefix")]
    pub worker_prefix: String,

    /// Substring identifying the worker runtime on a command line
    #[serde(default = "default_runtime_marker")]
    pub runtime_marker: String,

    /// Directory the supervisor writes worker logs to
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,

    #[serde(default = "default_log_poll")]
    pub log_poll_ms: u64,
}

fn default_backend_path() -> PathBuf {
    PathBuf::from("/galaxybackend")
}

fn default_listen_addr() -> String {
    "0.0.0.0:7860".to_string()
}

fn default_pool_size() -> usize {
    10
}

fn default_status_freshness() -> u64 {
    500
}

fn default_supervisor_bin() -> String {
    "pm2".to_string()
}

fn default_supervisor_timeout() -> u64 {
    2_000
}

fn default_strategy_timeout() -> u64 {
    2_000
}

fn default_channel_wait() -> u64 {
    2_000
}

fn default_shutdown_timeout() -> u64 {
    2_000
}

fn default_worker_prefix() -> String {
    WorkerNaming::DEFAULT_PREFIX.to_string()
}

fn default_runtime_marker() -> String {
    "node".to_string()
}

fn default_log_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("/root"))
        .join(".pm2")
        .join("logs")
}

fn default_log_poll() -> u64 {
    500
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            backend_path: default_backend_path(),
            listen_addr: default_listen_addr(),
            pool_size: default_pool_size(),
            status_freshness_ms: default_status_freshness(),
            supervisor_bin: default_supervisor_bin(),
            supervisor_timeout_ms: default_supervisor_timeout(),
            strategy_timeout_ms: default_strategy_timeout(),
            channel_wait_ms: default_channel_wait(),
            shutdown_timeout_ms: default_shutdown_timeout(),
            worker_prefix: default_worker_prefix(),
            runtime_marker: default_runtime_marker(),
            log_dir: default_log_dir(),
            log_poll_ms: default_log_poll(),
        }
    }
}

impl DaemonConfig {
    /// Load from a TOML file; a missing file yields defaults
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!("No config at {}, using defaults", path.display());
            return Ok(Self::default().normalized());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;

        info!("Loaded config from {}", path.display());
        Ok(config.normalized())
    }

    /// Clamp values that have hard bounds
    pub fn normalized(mut self) -> Self {
        let clamped = self
            .status_freshness_ms
            .clamp(FRESHNESS_MIN_MS, FRESHNESS_MAX_MS);
        if clamped != self.status_freshness_ms {
            warn!(
                "status_freshness_ms={} out of range, using {}",
                self.status_freshness_ms, clamped
            );
            self.status_freshness_ms = clamped;
        }
        if self.pool_size == 0 {
            warn!("pool_size=0 is unusable, using {}", default_pool_size());
            self.pool_size = default_pool_size();
        }
        self
    }

    pub fn naming(&self) -> WorkerNaming {
        WorkerNaming::new(self.worker_prefix.clone())
    }

    pub fn status_freshness(&self) -> Duration {
        Duration::from_millis(self.status_freshness_ms)
    }

    pub fn supervisor_timeout(&self) -> Duration {
        Duration::from_millis(self.supervisor_timeout_ms)
    }

    pub fn strategy_timeout(&self) -> Duration {
        Duration::from_millis(self.strategy_timeout_ms)
    }

    pub fn channel_wait(&self) -> Duration {
        Duration::from_millis(self.channel_wait_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    pub fn log_poll(&self) -> Duration {
        Duration::from_millis(self.log_poll_ms)
    }
}
