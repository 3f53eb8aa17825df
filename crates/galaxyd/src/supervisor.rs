//! External Process Supervisor Abstraction
//!
//! Workers run under an external CLI-driven supervisor (pm2). This module
//! puts a trait over the five operations the daemon needs so the lifecycle
//! code can be exercised without the real tool:
//!
//! - `Pm2Supervisor` shells out to the CLI, every call time-boxed
//! - `FakeSupervisor` keeps an in-memory inventory for tests

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("Failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{command}' timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },

    #[error("'{command}' exited with {code:?}: {stderr}")]
    Failed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("Unparseable process list: {0}")]
    Parse(#[from] serde_json::Error),
}

/// One entry of the supervisor's process inventory
#[derive(Debug, Clone, PartialEq)]
pub struct SupervisedProcess {
    pub name: String,
    pub pid: Option<u32>,
    pub status: String,
    pub cpu: f64,
    pub memory: u64,
}

impl SupervisedProcess {
    pub fn is_online(&self) -> bool {
        self.status == "online"
    }
}

/// Everything needed to launch one worker
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchSpec {
    pub name: String,
    pub script: PathBuf,
    pub cwd: PathBuf,
    pub args: Vec<String>,
}

// ============================================================================
// Supervisor Trait
// ============================================================================

#[async_trait]
pub trait ProcessSupervisor: Send + Sync {
    /// Launch a worker under `spec.name`; returns the worker pid when the
    /// supervisor reports one
    async fn start(&self, spec: &LaunchSpec) -> Result<Option<u32>, SupervisorError>;

    /// Force-delete the named entry, killing its process
    async fn delete(&self, name: &str) -> Result<(), SupervisorError>;

    /// Full process inventory
    async fn list(&self) -> Result<Vec<SupervisedProcess>, SupervisorError>;

    /// Deliver a signal (e.g. "SIGUSR2") to the named worker
    async fn signal(&self, name: &str, signal: &str) -> Result<(), SupervisorError>;

    /// Flush the supervisor's log buffers
    async fn flush(&self) -> Result<(), SupervisorError>;
}

// ============================================================================
// pm2 (Production)
// ============================================================================

pub struct Pm2Supervisor {
    program: String,
    cwd: PathBuf,
    timeout: Duration,
}

impl Pm2Supervisor {
    pub fn new(program: impl Into<String>, cwd: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            cwd: cwd.into(),
            timeout,
        }
    }

    async fn run(&self, args: &[&str]) -> Result<String, SupervisorError> {
        let command = format!("{} {}", self.program, args.join(" "));
        debug!("  Executing: {}", command);

        let output = Command::new(&self.program)
            .args(args)
            .current_dir(&self.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(self.timeout, output).await {
            Ok(result) => result.map_err(|source| SupervisorError::Spawn {
                program: self.program.clone(),
                source,
            })?,
            Err(_) => {
                return Err(SupervisorError::Timeout {
                    command,
                    timeout: self.timeout,
                })
            }
        };

        if !output.status.success() {
            return Err(SupervisorError::Failed {
                command,
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl ProcessSupervisor for Pm2Supervisor {
    async fn start(&self, spec: &LaunchSpec) -> Result<Option<u32>, SupervisorError> {
        let script = spec.script.to_string_lossy();
        let mut args: Vec<&str> = vec!["start", &*script, "--name", spec.name.as_str(), "--"];
        args.extend(spec.args.iter().map(String::as_str));
        self.run(&args).await?;

        // pm2 daemonizes the worker; its pid only shows up in the inventory.
        // A failed lookup loses the pid, not the launch.
        match self.list().await {
            Ok(processes) => Ok(processes
                .into_iter()
                .find(|p| p.name == spec.name)
                .and_then(|p| p.pid)),
            Err(e) => {
                warn!("  Started {} but could not read its pid: {}", spec.name, e);
                Ok(None)
            }
        }
    }

    async fn delete(&self, name: &str) -> Result<(), SupervisorError> {
        self.run(&["delete", name, "--force"]).await.map(|_| ())
    }

    async fn list(&self) -> Result<Vec<SupervisedProcess>, SupervisorError> {
        let stdout = self.run(&["jlist"]).await?;
        Ok(parse_jlist(&stdout)?)
    }

    async fn signal(&self, name: &str, signal: &str) -> Result<(), SupervisorError> {
        self.run(&["sendSignal", signal, name]).await.map(|_| ())
    }

    async fn flush(&self) -> Result<(), SupervisorError> {
        self.run(&["flush"]).await.map(|_| ())
    }
}

#[derive(Debug, Default, Deserialize)]
struct JlistEntry {
    #[serde(default)]
    name: String,
    #[serde(default)]
    pid: Option<u32>,
    #[serde(default)]
    pm2_env: JlistEnv,
    #[serde(default)]
    monit: JlistMonit,
}

#[derive(Debug, Default, Deserialize)]
struct JlistEnv {
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct JlistMonit {
    #[serde(default)]
    cpu: f64,
    #[serde(default)]
    memory: u64,
}

/// Parse `pm2 jlist` output.
///
/// pm2 may print notices such as `[PM2] Spawning PM2 daemon` before the JSON
/// array, so every `[` is tried as the start of the document. A pid of 0
/// means "not running" and maps to `None`.
pub fn parse_jlist(stdout: &str) -> Result<Vec<SupervisedProcess>, serde_json::Error> {
    let parsed = stdout
        .match_indices('[')
        .find_map(|(i, _)| serde_json::from_str::<Vec<JlistEntry>>(stdout[i..].trim()).ok());
    let entries = match parsed {
        Some(entries) => entries,
        None => serde_json::from_str(stdout.trim())?,
    };

    Ok(entries
        .into_iter()
        .map(|e| SupervisedProcess {
            name: e.name,
            pid: e.pid.filter(|&pid| pid != 0),
            status: e.pm2_env.status.unwrap_or_else(|| "unknown".to_string()),
            cpu: e.monit.cpu,
            memory: e.monit.memory,
        })
        .collect())
}

// ============================================================================
// Fake Supervisor (Testing)
// ============================================================================

#[derive(Debug, Default)]
struct FakeState {
    processes: HashMap<String, SupervisedProcess>,
    calls: Vec<String>,
    launches: Vec<LaunchSpec>,
    fail_list: bool,
    fail_start: bool,
    list_delay: Option<Duration>,
}

/// In-memory supervisor for deterministic tests.
///
/// `start` registers the worker as online with `launch_pid`; `delete`
/// removes it. Every call is recorded for assertions.
#[derive(Clone, Default)]
pub struct FakeSupervisor {
    state: Arc<Mutex<FakeState>>,
    launch_pid: Option<u32>,
}

impl FakeSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report this pid for every launched worker
    pub fn with_launch_pid(mut self, pid: u32) -> Self {
        self.launch_pid = Some(pid);
        self
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Insert or replace an inventory entry
    pub fn set_process(&self, name: &str, status: &str, pid: Option<u32>) {
        self.state().processes.insert(
            name.to_string(),
            SupervisedProcess {
                name: name.to_string(),
                pid,
                status: status.to_string(),
                cpu: 1.5,
                memory: 64 * 1024 * 1024,
            },
        );
    }

    pub fn set_fail_list(&self, fail: bool) {
        self.state().fail_list = fail;
    }

    pub fn set_fail_start(&self, fail: bool) {
        self.state().fail_start = fail;
    }

    pub fn set_list_delay(&self, delay: Duration) {
        self.state().list_delay = Some(delay);
    }

    /// Recorded calls, e.g. `["delete galaxy_1", "flush"]`
    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    pub fn call_count(&self, prefix: &str) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    pub fn launches(&self) -> Vec<LaunchSpec> {
        self.state().launches.clone()
    }

    fn record(&self, call: String) {
        self.state().calls.push(call);
    }
}

#[async_trait]
impl ProcessSupervisor for FakeSupervisor {
    async fn start(&self, spec: &LaunchSpec) -> Result<Option<u32>, SupervisorError> {
        self.record(format!("start {}", spec.name));
        let mut state = self.state();
        if state.fail_start {
            return Err(SupervisorError::Failed {
                command: format!("fake start {}", spec.name),
                code: Some(1),
                stderr: "start refused".to_string(),
            });
        }
        state.launches.push(spec.clone());
        state.processes.insert(
            spec.name.clone(),
            SupervisedProcess {
                name: spec.name.clone(),
                pid: self.launch_pid,
                status: "online".to_string(),
                cpu: 0.0,
                memory: 0,
            },
        );
        Ok(self.launch_pid)
    }

    async fn delete(&self, name: &str) -> Result<(), SupervisorError> {
        self.record(format!("delete {}", name));
        self.state().processes.remove(name);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<SupervisedProcess>, SupervisorError> {
        self.record("list".to_string());
        let delay = self.state().list_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let state = self.state();
        if state.fail_list {
            return Err(SupervisorError::Failed {
                command: "fake jlist".to_string(),
                code: Some(1),
                stderr: "daemon not reachable".to_string(),
            });
        }
        let mut processes: Vec<_> = state.processes.values().cloned().collect();
        processes.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(processes)
    }

    async fn signal(&self, name: &str, signal: &str) -> Result<(), SupervisorError> {
        self.record(format!("signal {} {}", signal, name));
        Ok(())
    }

    async fn flush(&self) -> Result<(), SupervisorError> {
        self.record("flush".to_string());
        Ok(())
    }
}
