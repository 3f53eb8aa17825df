//! Shared fixtures for galaxyd integration tests.
//!
//! Every harness uses a unique worker prefix so the OS-level kill strategies
//! can never match a real process on the test machine.

#![allow(dead_code)]

use galaxy_common::{FormInput, Slot, WorkerNaming};
use galaxyd::{Daemon, DaemonConfig, FakeSupervisor};
use serde_json::json;
use std::fs;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

pub struct Harness {
    pub dir: TempDir,
    pub fake: FakeSupervisor,
    pub daemon: Arc<Daemon>,
}

impl Harness {
    pub fn naming(&self) -> WorkerNaming {
        self.daemon.config().naming()
    }

    pub fn config_path(&self, id: i64) -> PathBuf {
        self.dir.path().join(self.naming().config_file(slot(id)))
    }

    pub fn log_path(&self, id: i64) -> PathBuf {
        self.daemon
            .config()
            .log_dir
            .join(self.naming().log_file(slot(id)))
    }

    pub fn process_name(&self, id: i64) -> String {
        self.naming().process_name(slot(id))
    }

    /// Read back a persisted config file as JSON
    pub fn persisted(&self, id: i64) -> Option<serde_json::Value> {
        let raw = fs::read_to_string(self.config_path(id)).ok()?;
        serde_json::from_str(&raw).ok()
    }
}

pub fn slot(id: i64) -> Slot {
    Slot::new(id).unwrap()
}

pub fn test_config(dir: &TempDir) -> DaemonConfig {
    let logs = dir.path().join("logs");
    fs::create_dir_all(&logs).unwrap();

    DaemonConfig {
        backend_path: dir.path().to_path_buf(),
        listen_addr: "127.0.0.1:0".to_string(),
        pool_size: 4,
        status_freshness_ms: 300,
        supervisor_timeout_ms: 200,
        strategy_timeout_ms: 500,
        channel_wait_ms: 300,
        shutdown_timeout_ms: 1_000,
        worker_prefix: format!("gxtest{}_", uuid::Uuid::new_v4().simple()),
        log_dir: logs,
        log_poll_ms: 20,
        ..DaemonConfig::default()
    }
}

/// Daemon over a fake supervisor whose workers report this process's pid,
/// with scripts present for `scripts`
pub fn harness_with_scripts(scripts: &[i64]) -> Harness {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let naming = config.naming();
    for &id in scripts {
        fs::write(dir.path().join(naming.script_file(slot(id))), "// worker\n").unwrap();
    }

    let fake = FakeSupervisor::new().with_launch_pid(std::process::id());
    let daemon = Arc::new(Daemon::with_supervisor(config, Arc::new(fake.clone())));
    Harness { dir, fake, daemon }
}

pub fn harness() -> Harness {
    harness_with_scripts(&[1, 2, 3, 4, 5])
}

/// Complete single-credential form for slot `id`
pub fn form(id: i64) -> FormInput {
    let value = json!({
        format!("RC1{id}"): "code-one",
        format!("RC2{id}"): "code-two",
        format!("startAttackTime{id}"): 1000,
        format!("stopAttackTime{id}"): 2000,
        format!("attackIntervalTime{id}"): 50,
        format!("startDefenceTime{id}"): 1500,
        format!("stopDefenceTime{id}"): 2500,
        format!("defenceIntervalTime{id}"): 60,
        format!("PlanetName{id}"): "Andromeda",
        format!("Rival{id}"): "alpha,beta",
        format!("Blacklist{id}"): "",
        format!("Whitelist{id}"): ["friend"],
        format!("standOnEnemy{id}"): "on",
        format!("actionOnEnemy{id}"): "0",
        format!("aiChatToggle{id}"): false,
        format!("aiPilotToggle{id}"): "yes",
        format!("kickAllToggle{id}"): "no",
        format!("dualRCToggle{id}"): "false",
    });
    match value {
        serde_json::Value::Object(map) => map,
        _ => unreachable!(),
    }
}

/// Poll `check` until it holds or five seconds pass
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..250 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}
