//! Supervision of one external script process.

use crate::args::ScriptInvocation;
use crate::killer::{descendants_of, KillMode, ProcessTreeKiller};
use crate::output::start_pump;
use caserun_core::config::Config;
use caserun_core::error::ExecutorError;
use caserun_core::outcome::ExecutionOutcome;
use caserun_core::registry::{CancelSignal, OwnedProcess};
use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("launcher '{launcher}' not found")]
    LauncherNotFound {
        launcher: String,
        #[source]
        source: io::Error,
    },

    #[error("permission denied launching '{launcher}'")]
    PermissionDenied {
        launcher: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to launch '{launcher}': {source}")]
    Spawn {
        launcher: String,
        #[source]
        source: io::Error,
    },

    #[error("cannot create log file {}: {source}", path.display())]
    LogFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl LaunchError {
    fn from_spawn(launcher: &str, source: io::Error) -> Self {
        let launcher = launcher.to_string();
        match source.kind() {
            io::ErrorKind::NotFound => Self::LauncherNotFound { launcher, source },
            io::ErrorKind::PermissionDenied => Self::PermissionDenied { launcher, source },
            _ => Self::Spawn { launcher, source },
        }
    }

    /// What the case reports when its script could not be started.
    pub fn outcome(&self) -> ExecutionOutcome {
        match self {
            Self::LauncherNotFound { launcher, .. } => ExecutionOutcome::blocked(
                "script could not be launched",
                format!("launcher unavailable: '{}' is not installed or not on PATH", launcher),
            ),
            Self::PermissionDenied { launcher, .. } => ExecutionOutcome::blocked(
                "script could not be launched",
                format!("launcher unavailable: permission denied executing '{}'", launcher),
            ),
            Self::Spawn { source, .. } => ExecutionOutcome::blocked(
                "script could not be launched",
                format!("execution crashed at launch: {}", source),
            ),
            Self::LogFile { .. } => ExecutionOutcome::faulted(self),
        }
    }
}

/// How a supervised wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Exited(i32),
    TimedOut,
    Cancelled,
}

/// Map an exit status to a code; killed-by-signal has none and reads as -1.
pub fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}

pub struct ProcessSupervisor {
    interpreter: String,
    locale: String,
    killer: Arc<dyn ProcessTreeKiller>,
    poll_interval: Duration,
    grace_period: Duration,
}

impl ProcessSupervisor {
    pub fn new(config: &Config, killer: Arc<dyn ProcessTreeKiller>) -> Self {
        Self {
            interpreter: config.interpreter.clone(),
            locale: config.locale.clone(),
            killer,
            poll_interval: config.poll_interval(),
            grace_period: config.grace_period(),
        }
    }

    pub fn interpreter(&self) -> &str {
        &self.interpreter
    }

    pub fn killer(&self) -> &Arc<dyn ProcessTreeKiller> {
        &self.killer
    }

    /// Start the script with merged, timestamped output going to `log_path`.
    pub async fn spawn(
        &self,
        invocation: &ScriptInvocation,
        log_path: &Path,
    ) -> Result<Arc<ProcessHandle>, LaunchError> {
        let log_error = |source| LaunchError::LogFile {
            path: log_path.to_path_buf(),
            source,
        };
        if let Some(parent) = log_path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(log_error)?;
        }
        let log = tokio::fs::File::create(log_path).await.map_err(log_error)?;

        let mut cmd = Command::new(&self.interpreter);
        cmd.args(invocation.argv())
            .env("PYTHONIOENCODING", "utf-8")
            .env("PYTHONUTF8", "1")
            .env("LANG", &self.locale)
            .env("LC_ALL", &self.locale)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Own process group, so the whole tree can be signalled at once.
        #[cfg(unix)]
        cmd.process_group(0);

        debug!(interpreter = %self.interpreter, args = ?invocation.argv(), "spawning script");

        let mut child = cmd
            .spawn()
            .map_err(|e| LaunchError::from_spawn(&self.interpreter, e))?;

        let pid = child.id();
        let pump = start_pump(
            child.stdout.take(),
            child.stderr.take(),
            log,
            log_path.to_path_buf(),
            invocation.label.clone(),
        );

        info!(pid = ?pid, script = %invocation.label, log = %log_path.display(), "script started");

        Ok(Arc::new(ProcessHandle {
            child: Mutex::new(child),
            pid,
            label: invocation.label.clone(),
            killer: Arc::clone(&self.killer),
            grace_period: self.grace_period,
            poll_interval: self.poll_interval,
            pump: std::sync::Mutex::new(Some(pump)),
        }))
    }

    /// Wait for exit, polling so that cancellation is seen within one interval.
    /// Timeout and cancellation both terminate the process tree before returning.
    pub async fn await_completion(
        &self,
        handle: &ProcessHandle,
        timeout: Duration,
        mut cancel: CancelSignal,
    ) -> Result<Completion, ExecutorError> {
        let deadline = Instant::now() + timeout;
        loop {
            match handle.try_exit().await {
                Ok(Some(status)) => {
                    let code = exit_code(status);
                    debug!(pid = ?handle.pid, code, "script exited");
                    return Ok(Completion::Exited(code));
                }
                Ok(None) => {}
                Err(e) => {
                    handle.terminate_tree().await;
                    return Err(ExecutorError::Process(format!(
                        "lost track of {}: {}",
                        handle.label, e
                    )));
                }
            }

            if cancel.is_cancelled() {
                info!(pid = ?handle.pid, script = %handle.label, "cancellation observed, terminating");
                handle.terminate_tree().await;
                return Ok(Completion::Cancelled);
            }

            let now = Instant::now();
            if now >= deadline {
                warn!(pid = ?handle.pid, script = %handle.label, timeout_secs = timeout.as_secs(), "script timed out, terminating");
                handle.terminate_tree().await;
                return Ok(Completion::TimedOut);
            }

            let nap = self.poll_interval.min(deadline - now);
            tokio::select! {
                _ = tokio::time::sleep(nap) => {}
                _ = cancel.cancelled() => {}
            }
        }
    }

    pub async fn terminate_tree(&self, handle: &ProcessHandle) {
        handle.terminate_tree().await;
    }
}

/// A running (or finished but not yet reaped) script.
pub struct ProcessHandle {
    child: Mutex<Child>,
    pid: Option<u32>,
    label: String,
    killer: Arc<dyn ProcessTreeKiller>,
    grace_period: Duration,
    poll_interval: Duration,
    pump: std::sync::Mutex<Option<JoinHandle<u64>>>,
}

impl ProcessHandle {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub async fn try_exit(&self) -> io::Result<Option<ExitStatus>> {
        self.child.lock().await.try_wait()
    }

    async fn has_exited(&self) -> bool {
        matches!(self.try_exit().await, Ok(Some(_)) | Err(_))
    }

    /// Graceful signal to the whole tree, then force after the grace period.
    /// Never fails; survivors are logged.
    pub async fn terminate_tree(&self) {
        let Some(pid) = self.pid else {
            // No OS id to walk from: only the direct child can be reached.
            warn!(script = %self.label, "no pid available, descendants may be orphaned");
            if let Err(e) = self.child.lock().await.start_kill() {
                debug!(script = %self.label, error = %e, "start_kill failed");
            }
            self.wait_for_exit(self.grace_period).await;
            return;
        };

        let descendants = match self.killer.list_processes().await {
            Ok(table) => descendants_of(&table, pid),
            Err(e) => {
                warn!(pid, error = %e, "could not list processes, descendants may be orphaned");
                Vec::new()
            }
        };
        debug!(pid, descendants = ?descendants, killer = self.killer.name(), "terminating process tree");

        self.killer
            .signal_tree(pid, &descendants, KillMode::Graceful)
            .await;
        if self.wait_for_tree(&descendants, self.grace_period).await {
            info!(pid, "process tree terminated gracefully");
            return;
        }

        warn!(pid, grace_secs = self.grace_period.as_secs(), "process tree survived grace period, forcing");
        self.killer.signal_tree(pid, &descendants, KillMode::Force).await;
        if let Err(e) = self.child.lock().await.start_kill() {
            debug!(pid, error = %e, "start_kill after force");
        }
        if !self.wait_for_tree(&descendants, self.grace_period).await {
            warn!(pid, "processes still alive after forced termination");
        }
    }

    /// Poll until the child has been reaped and every descendant is gone.
    async fn wait_for_tree(&self, descendants: &[u32], limit: Duration) -> bool {
        let deadline = Instant::now() + limit;
        loop {
            let mut done = self.has_exited().await;
            if done {
                for pid in descendants {
                    if self.killer.is_alive(*pid).await {
                        done = false;
                        break;
                    }
                }
            }
            if done {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(self.poll_interval.min(Duration::from_millis(100))).await;
        }
    }

    async fn wait_for_exit(&self, limit: Duration) -> bool {
        self.wait_for_tree(&[], limit).await
    }

    /// Give the output pump a bounded time to drain after exit.
    pub async fn finish_output(&self, limit: Duration) -> Option<u64> {
        let pump = self
            .pump
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        let mut pump = pump?;

        match tokio::time::timeout(limit, &mut pump).await {
            Ok(Ok(lines)) => Some(lines),
            Ok(Err(e)) => {
                warn!(script = %self.label, error = %e, "output pump failed");
                None
            }
            Err(_) => {
                // Typically an orphaned grandchild still holding the pipe.
                warn!(script = %self.label, drain_secs = limit.as_secs(), "output pump did not finish, abandoning it");
                pump.abort();
                None
            }
        }
    }
}

#[async_trait::async_trait]
impl OwnedProcess for ProcessHandle {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn label(&self) -> &str {
        &self.label
    }

    async fn terminate(&self) {
        self.terminate_tree().await;
    }
}
