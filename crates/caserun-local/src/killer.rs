//! OS-specific process-tree termination.
//!
//! Everything platform-dependent about finding and killing processes lives
//! behind [`ProcessTreeKiller`]. [`default_killer`] picks the implementation
//! for the host at startup.

use caserun_core::error::ExecutorError;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tokio::process::Command;
use tracing::{debug, warn};

/// One row of the OS process table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub pid: u32,
    pub ppid: u32,
    pub command: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillMode {
    /// SIGTERM, or taskkill without /F.
    Graceful,
    /// SIGKILL, or taskkill /F.
    Force,
}

#[async_trait::async_trait]
pub trait ProcessTreeKiller: Send + Sync {
    fn name(&self) -> &'static str;

    /// Snapshot of every process visible to us.
    async fn list_processes(&self) -> Result<Vec<ProcessInfo>, ExecutorError>;

    /// Signal `descendants` first, then `pid` itself. Processes that are
    /// already gone are not an error.
    async fn signal_tree(&self, pid: u32, descendants: &[u32], mode: KillMode);

    async fn is_alive(&self, pid: u32) -> bool;
}

/// Every transitive child of `root` in `table`, parents before children.
pub fn descendants_of(table: &[ProcessInfo], root: u32) -> Vec<u32> {
    let mut seen = HashSet::from([root]);
    let mut queue = VecDeque::from([root]);
    let mut out = Vec::new();

    while let Some(parent) = queue.pop_front() {
        for proc in table.iter().filter(|p| p.ppid == parent && p.pid != p.ppid) {
            if seen.insert(proc.pid) {
                out.push(proc.pid);
                queue.push_back(proc.pid);
            }
        }
    }
    out
}

pub fn default_killer() -> Arc<dyn ProcessTreeKiller> {
    #[cfg(unix)]
    {
        Arc::new(PosixKiller)
    }
    #[cfg(not(unix))]
    {
        Arc::new(WindowsKiller)
    }
}

/// `ps` for listing, `kill(2)`/`killpg(2)` through nix for signalling.
#[cfg(unix)]
pub struct PosixKiller;

#[cfg(unix)]
impl PosixKiller {
    fn send(pid: u32, signal: nix::sys::signal::Signal, group: bool) {
        use nix::errno::Errno;
        use nix::sys::signal::{kill, killpg};
        use nix::unistd::Pid;

        let Ok(raw) = i32::try_from(pid) else {
            return;
        };
        let target = Pid::from_raw(raw);
        let result = if group {
            killpg(target, signal)
        } else {
            kill(target, signal)
        };
        match result {
            Ok(()) => debug!(pid, group, signal = signal.as_str(), "signal sent"),
            Err(Errno::ESRCH) => {}
            // Not a group leader on some platforms.
            Err(Errno::EPERM) if group => {}
            Err(e) => warn!(pid, group, signal = signal.as_str(), error = %e, "failed to send signal"),
        }
    }
}

#[cfg(unix)]
#[async_trait::async_trait]
impl ProcessTreeKiller for PosixKiller {
    fn name(&self) -> &'static str {
        "posix"
    }

    async fn list_processes(&self) -> Result<Vec<ProcessInfo>, ExecutorError> {
        let output = Command::new("ps")
            .args(["-A", "-o", "pid=", "-o", "ppid=", "-o", "args="])
            .output()
            .await
            .map_err(|e| ExecutorError::Process(format!("ps failed: {}", e)))?;

        if !output.status.success() {
            return Err(ExecutorError::Process(format!(
                "ps exited with {}",
                output.status
            )));
        }

        Ok(parse_ps_output(&String::from_utf8_lossy(&output.stdout)))
    }

    async fn signal_tree(&self, pid: u32, descendants: &[u32], mode: KillMode) {
        use nix::sys::signal::Signal;

        let signal = match mode {
            KillMode::Graceful => Signal::SIGTERM,
            KillMode::Force => Signal::SIGKILL,
        };

        // Children spawned by us lead their own group; hit the group first.
        Self::send(pid, signal, true);
        for child in descendants.iter().rev() {
            Self::send(*child, signal, false);
        }
        Self::send(pid, signal, false);
    }

    async fn is_alive(&self, pid: u32) -> bool {
        use nix::errno::Errno;
        use nix::sys::signal::kill;
        use nix::unistd::Pid;

        let Ok(raw) = i32::try_from(pid) else {
            return false;
        };
        match kill(Pid::from_raw(raw), None) {
            Ok(()) => !is_zombie(pid),
            Err(Errno::EPERM) => true,
            Err(_) => false,
        }
    }
}

/// Zombies answer signal 0 but are already dead.
#[cfg(unix)]
fn is_zombie(pid: u32) -> bool {
    let Ok(stat) = std::fs::read_to_string(format!("/proc/{}/stat", pid)) else {
        return false;
    };
    // Format: pid (comm) state ...; comm may itself contain ')'.
    stat.rsplit_once(')')
        .and_then(|(_, rest)| rest.split_whitespace().next())
        .is_some_and(|state| state == "Z")
}

/// Parse `ps -o pid= -o ppid= -o args=` output.
pub fn parse_ps_output(text: &str) -> Vec<ProcessInfo> {
    text.lines()
        .filter_map(|line| {
            let line = line.trim_start();
            let (pid, rest) = line.split_once(char::is_whitespace)?;
            let rest = rest.trim_start();
            let (ppid, command) = match rest.split_once(char::is_whitespace) {
                Some((ppid, command)) => (ppid, command.trim()),
                None => (rest, ""),
            };
            Some(ProcessInfo {
                pid: pid.parse().ok()?,
                ppid: ppid.parse().ok()?,
                command: command.to_string(),
            })
        })
        .collect()
}

/// `taskkill /T` for signalling, CIM via PowerShell for listing.
pub struct WindowsKiller;

impl WindowsKiller {
    async fn taskkill(pid: u32, force: bool) {
        let pid_arg = pid.to_string();
        let mut cmd = Command::new("taskkill");
        cmd.arg("/T");
        if force {
            cmd.arg("/F");
        }
        cmd.args(["/PID", &pid_arg]);

        match cmd.output().await {
            Ok(out) if out.status.success() => debug!(pid, force, "taskkill succeeded"),
            // Exit code 128: process not found.
            Ok(out) => debug!(pid, force, status = %out.status, "taskkill reported failure"),
            Err(e) => warn!(pid, error = %e, "failed to run taskkill"),
        }
    }
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CimProcess {
    process_id: u32,
    parent_process_id: u32,
    command_line: Option<String>,
}

/// Parse `Get-CimInstance Win32_Process | ConvertTo-Json` output, which is a
/// bare object when only one process matches.
pub fn parse_cim_json(text: &str) -> Result<Vec<ProcessInfo>, ExecutorError> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(Vec::new());
    }
    let rows: Vec<CimProcess> = if text.starts_with('[') {
        serde_json::from_str(text)?
    } else {
        vec![serde_json::from_str(text)?]
    };
    Ok(rows
        .into_iter()
        .map(|row| ProcessInfo {
            pid: row.process_id,
            ppid: row.parent_process_id,
            command: row.command_line.unwrap_or_default(),
        })
        .collect())
}

#[async_trait::async_trait]
impl ProcessTreeKiller for WindowsKiller {
    fn name(&self) -> &'static str {
        "windows"
    }

    async fn list_processes(&self) -> Result<Vec<ProcessInfo>, ExecutorError> {
        let output = Command::new("powershell")
            .args([
                "-NoProfile",
                "-NonInteractive",
                "-Command",
                "Get-CimInstance Win32_Process | Select-Object ProcessId,ParentProcessId,CommandLine | ConvertTo-Json -Compress",
            ])
            .output()
            .await
            .map_err(|e| ExecutorError::Process(format!("powershell failed: {}", e)))?;

        if !output.status.success() {
            return Err(ExecutorError::Process(format!(
                "process listing exited with {}",
                output.status
            )));
        }
        parse_cim_json(&String::from_utf8_lossy(&output.stdout))
    }

    async fn signal_tree(&self, pid: u32, descendants: &[u32], mode: KillMode) {
        let force = mode == KillMode::Force;
        Self::taskkill(pid, force).await;
        if force {
            // Orphans are no longer reachable through /T from the root.
            for child in descendants {
                Self::taskkill(*child, true).await;
            }
        }
    }

    async fn is_alive(&self, pid: u32) -> bool {
        let filter = format!("PID eq {}", pid);
        match Command::new("tasklist")
            .args(["/FI", &filter, "/NH", "/FO", "CSV"])
            .output()
            .await
        {
            Ok(out) => {
                let needle = format!("\"{}\"", pid);
                String::from_utf8_lossy(&out.stdout).contains(&needle)
            }
            Err(_) => false,
        }
    }
}
