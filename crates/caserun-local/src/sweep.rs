//! Registry-independent emergency cleanup.
//!
//! Scans the OS process table for command lines mentioning a task id or a
//! script name and terminates every match together with its descendants.
//! Used when the registry no longer knows about the processes, e.g. after the
//! executor itself restarted.

use crate::killer::{descendants_of, KillMode, ProcessInfo, ProcessTreeKiller};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

pub struct ProcessSweeper {
    killer: Arc<dyn ProcessTreeKiller>,
    filter: Option<String>,
    grace_period: Duration,
}

impl ProcessSweeper {
    /// `filter`, when set, must also appear in a command line for it to match.
    pub fn new(
        killer: Arc<dyn ProcessTreeKiller>,
        filter: Option<String>,
        grace_period: Duration,
    ) -> Self {
        Self {
            killer,
            filter,
            grace_period,
        }
    }

    pub async fn terminate_by_task_id(&self, task_id: &str) -> usize {
        self.sweep(task_id).await
    }

    /// Matches on the script's file name, so relative and absolute
    /// invocations are both caught.
    pub async fn terminate_by_script_path(&self, script: &Path) -> usize {
        let needle = script
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| script.display().to_string());
        self.sweep(&needle).await
    }

    async fn sweep(&self, needle: &str) -> usize {
        if needle.trim().is_empty() {
            warn!("refusing to sweep with an empty pattern");
            return 0;
        }

        let table = match self.killer.list_processes().await {
            Ok(table) => table,
            Err(e) => {
                warn!(pattern = needle, error = %e, "process listing failed, nothing swept");
                return 0;
            }
        };

        let roots = matching_pids(&table, needle, self.filter.as_deref(), std::process::id());
        if roots.is_empty() {
            info!(pattern = needle, "no matching processes");
            return 0;
        }

        let mut targets = BTreeSet::new();
        let mut trees = Vec::with_capacity(roots.len());
        for root in &roots {
            let descendants = descendants_of(&table, *root);
            targets.insert(*root);
            targets.extend(descendants.iter().copied());
            trees.push((*root, descendants));
        }
        info!(pattern = needle, matched = roots.len(), total = targets.len(), "sweeping processes");

        for (root, descendants) in &trees {
            self.killer
                .signal_tree(*root, descendants, KillMode::Graceful)
                .await;
        }

        let deadline = Instant::now() + self.grace_period;
        loop {
            let mut survivors = Vec::new();
            for pid in &targets {
                if self.killer.is_alive(*pid).await {
                    survivors.push(*pid);
                }
            }
            if survivors.is_empty() {
                break;
            }
            if Instant::now() >= deadline {
                warn!(pattern = needle, survivors = ?survivors, "forcing survivors");
                for (root, descendants) in &trees {
                    self.killer
                        .signal_tree(*root, descendants, KillMode::Force)
                        .await;
                }
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        targets.len()
    }
}

/// Pids whose command line contains `needle` (and `filter`, if any), never
/// including `own_pid`.
pub fn matching_pids(
    table: &[ProcessInfo],
    needle: &str,
    filter: Option<&str>,
    own_pid: u32,
) -> Vec<u32> {
    table
        .iter()
        .filter(|p| p.pid != own_pid)
        .filter(|p| p.command.contains(needle))
        .filter(|p| filter.map_or(true, |f| p.command.contains(f)))
        .map(|p| p.pid)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pid: u32, command: &str) -> ProcessInfo {
        ProcessInfo {
            pid,
            ppid: 1,
            command: command.to_string(),
        }
    }

    #[test]
    fn filter_and_own_pid_exclusion() {
        let table = vec![
            row(10, "python /opt/t-42/scripts/TC001.py --ip \"1.1.1.1\""),
            row(11, "vim /opt/t-42/scripts/TC001.py"),
            row(12, "python /opt/t-43/scripts/TC002.py"),
            row(99, "caserun emergency-stop --script TC001.py"),
        ];
        assert_eq!(matching_pids(&table, "TC001.py", Some("python"), 99), vec![10]);
        assert_eq!(matching_pids(&table, "TC001.py", None, 99), vec![10, 11]);
        assert_eq!(matching_pids(&table, "t-43", None, 99), vec![12]);
    }
}
