//! Termination Engine - best-effort, bounded-time worker kill
//!
//! No single mechanism is authoritative: the supervisor entry may be gone
//! while the process lives on, or the process may have outlived a previous
//! daemon instance. Each strategy runs under its own timeout, failures are
//! logged and never stop the sequence, and the engine never returns an error.

use crate::supervisor::ProcessSupervisor;
use galaxy_common::{Slot, WorkerNaming};
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::collections::BTreeSet;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use sysinfo::System;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Kill strategies in the order they run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillStrategy {
    /// Ask the supervisor to force-delete the worker's entry
    SupervisorDelete,
    /// `pgrep -f` on the worker script name, SIGKILL each match
    PatternKill,
    /// Scan the whole process table for worker name plus runtime marker
    ProcessScan,
    /// Flush supervisor buffers
    SupervisorFlush,
}

impl KillStrategy {
    pub const SEQUENCE: [KillStrategy; 4] = [
        KillStrategy::SupervisorDelete,
        KillStrategy::PatternKill,
        KillStrategy::ProcessScan,
        KillStrategy::SupervisorFlush,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SupervisorDelete => "supervisor_delete",
            Self::PatternKill => "pattern_kill",
            Self::ProcessScan => "process_scan",
            Self::SupervisorFlush => "supervisor_flush",
        }
    }
}

pub struct TerminationEngine {
    supervisor: Arc<dyn ProcessSupervisor>,
    naming: WorkerNaming,
    runtime_marker: String,
    strategy_timeout: Duration,
}

impl TerminationEngine {
    pub fn new(
        supervisor: Arc<dyn ProcessSupervisor>,
        naming: WorkerNaming,
        runtime_marker: impl Into<String>,
        strategy_timeout: Duration,
    ) -> Self {
        Self {
            supervisor,
            naming,
            runtime_marker: runtime_marker.into(),
            strategy_timeout,
        }
    }

    /// Run every strategy against `slot`.
    ///
    /// Returns the pids this call believes it killed. The set is for logging
    /// only: an empty set does not prove nothing was running.
    pub async fn terminate(&self, slot: Slot) -> BTreeSet<u32> {
        let mut killed = BTreeSet::new();

        for strategy in KillStrategy::SEQUENCE {
            match tokio::time::timeout(self.strategy_timeout, self.run(strategy, slot)).await {
                Ok(Ok(pids)) => {
                    if !pids.is_empty() {
                        debug!("[KILL] slot {} {}: {:?}", slot, strategy.as_str(), pids);
                    }
                    killed.extend(pids);
                }
                Ok(Err(e)) => {
                    debug!("[KILL] slot {} {} failed: {:#}", slot, strategy.as_str(), e);
                }
                Err(_) => {
                    warn!(
                        "[KILL] slot {} {} timed out after {:?}",
                        slot,
                        strategy.as_str(),
                        self.strategy_timeout
                    );
                }
            }
        }

        if !killed.is_empty() {
            info!("[KILL] slot {}: terminated pids {:?}", slot, killed);
        }
        killed
    }

    async fn run(&self, strategy: KillStrategy, slot: Slot) -> anyhow::Result<Vec<u32>> {
        match strategy {
            KillStrategy::SupervisorDelete => {
                self.supervisor
                    .delete(&self.naming.process_name(slot))
                    .await?;
                Ok(Vec::new())
            }
            KillStrategy::PatternKill => {
                let pids = pgrep(&self.naming.script_file(slot)).await?;
                Ok(kill_all(&pids))
            }
            KillStrategy::ProcessScan => {
                let name = self.naming.process_name(slot);
                let marker = self.runtime_marker.clone();
                let pids = tokio::task::spawn_blocking(move || scan_processes(&name, &marker)).await?;
                Ok(kill_all(&pids))
            }
            KillStrategy::SupervisorFlush => {
                self.supervisor.flush().await?;
                Ok(Vec::new())
            }
        }
    }
}

/// Pids whose full command line matches `pattern`
async fn pgrep(pattern: &str) -> anyhow::Result<Vec<u32>> {
    let output = Command::new("pgrep")
        .arg("-f")
        .arg(pattern)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await?;

    // Exit status 1 means no match
    match output.status.code() {
        Some(0) | Some(1) => Ok(parse_pids(&String::from_utf8_lossy(&output.stdout))),
        code => anyhow::bail!("pgrep exited with {:?}", code),
    }
}

fn parse_pids(stdout: &str) -> Vec<u32> {
    stdout
        .lines()
        .filter_map(|line| line.trim().parse().ok())
        .collect()
}

/// Textual scan of every process command line for the worker name together
/// with the runtime marker; catches argv shapes `pgrep` misses
pub fn scan_processes(name: &str, marker: &str) -> Vec<u32> {
    let mut system = System::new();
    system.refresh_processes();

    system
        .processes()
        .iter()
        .filter(|(_, process)| {
            let cmdline = process.cmd().join(" ");
            cmdline.contains(name) && cmdline.contains(marker)
        })
        .map(|(pid, _)| pid.as_u32())
        .collect()
}

/// SIGKILL each pid except our own; returns the ones that were delivered
fn kill_all(pids: &[u32]) -> Vec<u32> {
    let own = std::process::id();
    pids.iter()
        .copied()
        .filter(|&pid| pid != own && pid > 1)
        .filter(|&pid| match kill(Pid::from_raw(pid as i32), Signal::SIGKILL) {
            Ok(()) => true,
            Err(Errno::ESRCH) => false,
            Err(e) => {
                debug!("[KILL] SIGKILL {} failed: {}", pid, e);
                false
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::supervisor::FakeSupervisor;

    fn engine(fake: &FakeSupervisor, prefix: &str) -> TerminationEngine {
        TerminationEngine::new(
            Arc::new(fake.clone()),
            WorkerNaming::new(prefix),
            "node",
            Duration::from_secs(2),
        )
    }

    #[test]
    fn test_parse_pids() {
        assert_eq!(parse_pids("12\n 34 \nnope\n"), vec![12, 34]);
        assert!(parse_pids("").is_empty());
    }

    #[test]
    fn test_kill_all_skips_self_and_init() {
        let own = std::process::id();
        assert!(kill_all(&[own, 1, 0]).is_empty());
    }

    #[tokio::test]
    async fn test_idempotent_on_dead_slot() {
        let fake = FakeSupervisor::new();
        let prefix = format!("gxidle{}_", uuid::Uuid::new_v4().simple());
        let engine = engine(&fake, &prefix);
        let slot = Slot::new(2).unwrap();

        assert!(engine.terminate(slot).await.is_empty());
        assert!(engine.terminate(slot).await.is_empty());

        assert_eq!(fake.call_count("delete"), 2);
        assert_eq!(fake.call_count("flush"), 2);
    }

    #[tokio::test]
    async fn test_strategies_run_in_order() {
        let fake = FakeSupervisor::new();
        let prefix = format!("gxorder{}_", uuid::Uuid::new_v4().simple());
        let engine = engine(&fake, &prefix);

        engine.terminate(Slot::new(1).unwrap()).await;
        assert_eq!(
            fake.calls(),
            vec![format!("delete {}1", prefix), "flush".to_string()]
        );
    }

    /// Idle shell whose argv carries `tags`, so it shows up in `pgrep -f`
    /// and command-line scans without running anything real
    fn decoy(tags: &[&str]) -> tokio::process::Child {
        Command::new("sh")
            .arg("-c")
            .arg("while :; do sleep 1; done")
            .args(tags)
            .kill_on_drop(true)
            .spawn()
            .unwrap()
    }

    #[tokio::test]
    async fn test_kills_live_processes_by_pattern_and_scan() {
        use std::os::unix::process::ExitStatusExt;

        let fake = FakeSupervisor::new();
        let prefix = format!("gxlive{}_", uuid::Uuid::new_v4().simple());
        let engine = engine(&fake, &prefix);
        let slot = Slot::new(3).unwrap();
        let naming = WorkerNaming::new(prefix.as_str());

        // Matched by the script pattern only
        let script = naming.script_file(slot);
        let mut by_pattern = decoy(&[script.as_str()]);
        // Matched by the name plus runtime marker only
        let name = naming.process_name(slot);
        let mut by_scan = decoy(&[name.as_str(), "node"]);
        let pids = [by_pattern.id().unwrap(), by_scan.id().unwrap()];

        // Let both children exec so their argv is visible
        tokio::time::sleep(Duration::from_millis(200)).await;

        let killed = engine.terminate(slot).await;
        for pid in pids {
            assert!(killed.contains(&pid), "{pid} not in {killed:?}");
        }

        for child in [&mut by_pattern, &mut by_scan] {
            let status = tokio::time::timeout(Duration::from_secs(5), child.wait())
                .await
                .expect("child reaped in time")
                .unwrap();
            assert_eq!(status.signal(), Some(Signal::SIGKILL as i32));
        }
    }
}
