//! Control surface: submit, cancel, inspect and emergency-stop tasks.

use crate::executor::{TaskExecutor, TaskSummary};
use crate::killer::{default_killer, ProcessTreeKiller};
use crate::supervisor::ProcessSupervisor;
use crate::sweep::ProcessSweeper;
use caserun_core::config::Config;
use caserun_core::error::ExecutorError;
use caserun_core::registry::TaskRegistry;
use caserun_core::report::{HttpLogStore, LogStore, ReportSink};
use caserun_core::task::{Task, TaskId};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::info;

/// Snapshot of a live task.
#[derive(Debug, Clone, Serialize)]
pub struct TaskStatusView {
    pub task_id: TaskId,
    pub started_at: DateTime<Utc>,
    pub elapsed_secs: i64,
    pub cancelling: bool,
    pub active_pids: Vec<u32>,
}

pub struct Engine {
    registry: Arc<TaskRegistry>,
    executor: TaskExecutor,
    sweeper: ProcessSweeper,
}

impl Engine {
    /// Engine with the host's process killer and an HTTP log store.
    pub fn new(config: Config, sink: Arc<dyn ReportSink>) -> Self {
        let log_store: Arc<dyn LogStore> = Arc::new(HttpLogStore::new(config.log_store_url.clone()));
        Self::with_parts(config, default_killer(), sink, Some(log_store))
    }

    pub fn with_parts(
        config: Config,
        killer: Arc<dyn ProcessTreeKiller>,
        sink: Arc<dyn ReportSink>,
        log_store: Option<Arc<dyn LogStore>>,
    ) -> Self {
        let config = Arc::new(config);
        let registry = Arc::new(TaskRegistry::new(config.max_concurrent_tasks));
        let supervisor = Arc::new(ProcessSupervisor::new(&config, Arc::clone(&killer)));
        let sweeper = ProcessSweeper::new(killer, config.sweep_filter(), config.grace_period());
        let executor = TaskExecutor::new(config, supervisor, sink, log_store);

        Self {
            registry,
            executor,
            sweeper,
        }
    }

    /// Override the per-case timeout taken from the configuration.
    pub fn with_case_timeout(mut self, timeout: Duration) -> Self {
        self.executor = self.executor.with_case_timeout(timeout);
        self
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    /// Admit `task` and start it in the background. Fails fast on duplicate
    /// ids, a full registry, or a missing bundle directory.
    pub fn submit(&self, task: Task, bundle_dir: PathBuf) -> Result<JoinHandle<TaskSummary>, ExecutorError> {
        if !bundle_dir.is_dir() {
            return Err(ExecutorError::Config(format!(
                "bundle directory not found: {}",
                bundle_dir.display()
            )));
        }

        let registration = self.registry.register(&task.task_id)?;
        info!(task_id = %task.task_id, cases = task.cases.len(), "task accepted");

        let executor = self.executor.clone();
        let task = Arc::new(task);
        Ok(tokio::spawn(async move {
            executor.run(task, bundle_dir, registration).await
        }))
    }

    /// Cooperative and forceful cancellation. True iff a live task was found.
    /// Also sweeps the process table for stragglers naming the task.
    pub async fn cancel(&self, task_id: &TaskId) -> bool {
        let found = self.registry.cancel(task_id).await;
        let swept = self.sweeper.terminate_by_task_id(task_id.as_str()).await;
        info!(task_id = %task_id, found, swept, "cancel handled");
        found
    }

    pub fn status(&self, task_id: &TaskId) -> Option<TaskStatusView> {
        let state = self.registry.lookup(task_id)?;
        let started_at = state.started_at();
        Some(TaskStatusView {
            task_id: task_id.clone(),
            started_at,
            elapsed_secs: (Utc::now() - started_at).num_seconds(),
            cancelling: state.is_cancelled(),
            active_pids: state.active_pids(),
        })
    }

    pub fn running_tasks(&self) -> Vec<TaskId> {
        self.registry.running_task_ids()
    }

    /// Kill every process whose command line names `task_id`. Returns the
    /// number of processes signalled.
    pub async fn emergency_stop_task(&self, task_id: &TaskId) -> usize {
        self.sweeper.terminate_by_task_id(task_id.as_str()).await
    }

    pub async fn emergency_stop_script(&self, script: &Path) -> usize {
        self.sweeper.terminate_by_script_path(script).await
    }
}
