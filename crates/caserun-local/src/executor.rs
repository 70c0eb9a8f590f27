//! Sequential per-task execution loop.

use crate::args::ScriptInvocation;
use crate::script::{resolve_script, script_file_name};
use crate::supervisor::{Completion, ProcessSupervisor};
use caserun_core::classify::ResultClassifier;
use caserun_core::config::Config;
use caserun_core::error::ExecutorError;
use caserun_core::outcome::{ExecutionOutcome, ResultReport};
use caserun_core::registry::{OwnedProcess, Registration, TaskRuntimeState};
use caserun_core::report::{LogStore, ReportSink};
use caserun_core::task::{CaseStatus, Task, TaskId, TaskState, TestCaseSpec};
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub const SCRIPT_NOT_FOUND: &str = "script not found";

/// What one task run produced. `reports` is in case order.
#[derive(Debug, Clone)]
pub struct TaskSummary {
    pub task_id: TaskId,
    pub state: TaskState,
    pub succeeded: usize,
    pub failed: usize,
    pub blocked: usize,
    /// Subset of `blocked`.
    pub cancelled: usize,
    pub reports: Vec<ResultReport>,
}

impl TaskSummary {
    fn new(task_id: TaskId) -> Self {
        Self {
            task_id,
            state: TaskState::Running,
            succeeded: 0,
            failed: 0,
            blocked: 0,
            cancelled: 0,
            reports: Vec::new(),
        }
    }

    pub fn total(&self) -> usize {
        self.reports.len()
    }

    fn record(&mut self, outcome: &ExecutionOutcome, report: ResultReport) {
        match outcome.status {
            CaseStatus::Success => self.succeeded += 1,
            CaseStatus::Failed => self.failed += 1,
            CaseStatus::Blocked => self.blocked += 1,
        }
        if outcome.is_cancellation() {
            self.cancelled += 1;
        }
        self.reports.push(report);
    }
}

/// Runs every case of a task in order and reports each one exactly once.
#[derive(Clone)]
pub struct TaskExecutor {
    config: Arc<Config>,
    supervisor: Arc<ProcessSupervisor>,
    sink: Arc<dyn ReportSink>,
    log_store: Option<Arc<dyn LogStore>>,
    case_timeout: Duration,
}

impl TaskExecutor {
    pub fn new(
        config: Arc<Config>,
        supervisor: Arc<ProcessSupervisor>,
        sink: Arc<dyn ReportSink>,
        log_store: Option<Arc<dyn LogStore>>,
    ) -> Self {
        let case_timeout = config.case_timeout();
        Self {
            config,
            supervisor,
            sink,
            log_store,
            case_timeout,
        }
    }

    /// Override the per-case timeout taken from the configuration.
    pub fn with_case_timeout(mut self, timeout: Duration) -> Self {
        self.case_timeout = timeout;
        self
    }

    pub fn case_timeout(&self) -> Duration {
        self.case_timeout
    }

    /// Drive the task to a terminal state. The registry entry goes away when
    /// `registration` is dropped on return, whatever happened.
    pub async fn run(&self, task: Arc<Task>, bundle: PathBuf, registration: Registration) -> TaskSummary {
        let state = Arc::clone(registration.state());
        let mut summary = TaskSummary::new(task.task_id.clone());
        let mut task_fault = false;

        info!(task_id = %task.task_id, cases = task.cases.len(), bundle = %bundle.display(), "task running");

        let logs_dir = self.config.logs_dir(task.task_id.as_str());
        if let Err(e) = tokio::fs::create_dir_all(&logs_dir).await {
            error!(task_id = %task.task_id, dir = %logs_dir.display(), error = %e, "cannot create log directory");
            task_fault = true;
        }

        for (index, case) in task.cases.iter().enumerate() {
            if state.is_cancelled() {
                let remaining = &task.cases[index..];
                info!(task_id = %task.task_id, remaining = remaining.len(), "task cancelled, blocking remaining cases");
                for case in remaining {
                    self.emit(&task, case, ExecutionOutcome::cancelled(), &mut summary)
                        .await;
                }
                break;
            }

            let outcome = self.run_isolated(&task, case, &bundle, &state).await;
            self.emit(&task, case, outcome, &mut summary).await;
        }

        summary.state = if state.is_cancelled() {
            TaskState::Cancelled
        } else if task_fault {
            TaskState::Faulted
        } else {
            TaskState::Completed
        };

        if self.config.auto_cleanup {
            self.cleanup(&task.task_id).await;
        }

        info!(
            task_id = %task.task_id,
            state = %summary.state,
            succeeded = summary.succeeded,
            failed = summary.failed,
            blocked = summary.blocked,
            cancelled = summary.cancelled,
            "task finished"
        );
        drop(registration);
        summary
    }

    /// Run one case on its own tokio task so that a panic stays contained.
    async fn run_isolated(
        &self,
        task: &Arc<Task>,
        case: &TestCaseSpec,
        bundle: &Path,
        state: &Arc<TaskRuntimeState>,
    ) -> ExecutionOutcome {
        let this = self.clone();
        let task_ref = Arc::clone(task);
        let case_ref = case.clone();
        let bundle_ref = bundle.to_path_buf();
        let state_ref = Arc::clone(state);

        let joined = tokio::spawn(async move {
            this.run_case(&task_ref, &case_ref, &bundle_ref, &state_ref)
                .await
        })
        .await;

        match joined {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                error!(task_id = %task.task_id, case_id = case.test_case_id, round = case.round, error = %e, "case faulted");
                ExecutionOutcome::faulted(e)
            }
            Err(e) => {
                error!(task_id = %task.task_id, case_id = case.test_case_id, round = case.round, error = %e, "case panicked");
                ExecutionOutcome::faulted(e)
            }
        }
    }

    async fn run_case(
        &self,
        task: &Task,
        case: &TestCaseSpec,
        bundle: &Path,
        state: &Arc<TaskRuntimeState>,
    ) -> Result<ExecutionOutcome, ExecutorError> {
        let Some(number) = case.number() else {
            warn!(task_id = %task.task_id, case_id = case.test_case_id, "case has no case number");
            return Ok(ExecutionOutcome::blocked(
                SCRIPT_NOT_FOUND,
                format!("{}: case {} has no case number", SCRIPT_NOT_FOUND, case.test_case_id),
            ));
        };

        let Some(script) = resolve_script(bundle, number, &self.config.script_extension) else {
            let file = script_file_name(number, &self.config.script_extension);
            warn!(task_id = %task.task_id, case_id = case.test_case_id, file = %file, "script not found");
            return Ok(ExecutionOutcome::blocked(
                SCRIPT_NOT_FOUND,
                format!("{}: no {} under scripts/ or cases/", SCRIPT_NOT_FOUND, file),
            ));
        };

        let logs_dir = self.config.logs_dir(task.task_id.as_str());
        tokio::fs::create_dir_all(&logs_dir).await?;
        let log_name = format!("{}.log", case.log_stem());
        let log_path = logs_dir.join(&log_name);

        let invocation = ScriptInvocation::for_task(task, &script);
        info!(task_id = %task.task_id, case_id = case.test_case_id, round = case.round, script = %script.display(), "running {}", case);

        let started = Utc::now();
        let handle = match self.supervisor.spawn(&invocation, &log_path).await {
            Ok(handle) => handle,
            Err(e) => {
                warn!(task_id = %task.task_id, case_id = case.test_case_id, error = %e, "launch failed");
                return Ok(e.outcome().with_timing(started, Utc::now()));
            }
        };

        let completion = {
            let _tracking = state.track(Arc::clone(&handle) as Arc<dyn OwnedProcess>);
            self.supervisor
                .await_completion(&handle, self.case_timeout, state.cancel_signal())
                .await
        };
        handle.finish_output(self.config.output_drain()).await;
        let finished = Utc::now();

        let (completed, exit_code) = match completion? {
            Completion::Exited(code) => (true, code),
            Completion::TimedOut => (false, -1),
            Completion::Cancelled => {
                return Ok(ExecutionOutcome::cancelled().with_timing(started, finished));
            }
        };

        let bytes = tokio::fs::read(&log_path).await?;
        let log = String::from_utf8_lossy(&bytes).into_owned();

        let classification = ResultClassifier::new(self.case_timeout).classify(completed, exit_code, &log);
        debug!(task_id = %task.task_id, case_id = case.test_case_id, status = %classification.status, "case classified");

        let mut outcome = ExecutionOutcome::from_classification(classification, started, finished, log);
        outcome.log_location = Some(self.store_log(task, &log_path, &log_name).await);
        Ok(outcome)
    }

    /// Upload when a store is configured for this task; otherwise, or on
    /// failure, report the local file name.
    async fn store_log(&self, task: &Task, log_path: &Path, log_name: &str) -> String {
        if let Some(store) = self.log_store.as_ref().filter(|s| s.is_configured_for(task)) {
            match store.upload(task, log_path, log_name).await {
                Ok(location) => return location,
                Err(e) => warn!(task_id = %task.task_id, file = log_name, error = %e, "log upload failed"),
            }
        }
        log_name.to_string()
    }

    async fn emit(
        &self,
        task: &Task,
        case: &TestCaseSpec,
        outcome: ExecutionOutcome,
        summary: &mut TaskSummary,
    ) {
        let report = ResultReport::new(task, case, &outcome);
        info!(
            task_id = %task.task_id,
            case_id = case.test_case_id,
            round = case.round,
            status = %outcome.status,
            reason = outcome.reason.as_deref().unwrap_or(""),
            "case result"
        );
        if let Err(e) = self.sink.deliver(task, &report).await {
            warn!(task_id = %task.task_id, case_id = case.test_case_id, round = case.round, error = %e, "result report not delivered");
        }
        summary.record(&outcome, report);
    }

    async fn cleanup(&self, task_id: &TaskId) {
        let dir = self.config.task_dir(task_id.as_str());
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => debug!(task_id = %task_id, dir = %dir.display(), "task directory removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(task_id = %task_id, dir = %dir.display(), error = %e, "task directory cleanup failed"),
        }
    }
}
