use crate::classify::Classification;
use crate::task::{CaseStatus, Task, TaskId, TestCaseSpec};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const CANCELLED_REASON: &str = "execution cancelled by user";
pub const CANCELLED_MESSAGE: &str = "case execution cancelled";

/// Result of one test case. Built once, handed to the report sink, then dropped.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionOutcome {
    pub status: CaseStatus,
    pub message: String,
    pub reason: Option<String>,
    pub duration_ms: i64,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub log_content: String,
    pub log_location: Option<String>,
}

impl ExecutionOutcome {
    /// Outcome decided before (or without) running anything.
    pub fn blocked(message: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            status: CaseStatus::Blocked,
            message: message.into(),
            reason: Some(reason.into()),
            duration_ms: 0,
            started_at: None,
            finished_at: None,
            log_content: String::new(),
            log_location: None,
        }
    }

    pub fn cancelled() -> Self {
        Self::blocked(CANCELLED_MESSAGE, CANCELLED_REASON)
    }

    /// Unexpected orchestration fault isolated to one case.
    pub fn faulted(description: impl std::fmt::Display) -> Self {
        let reason = format!("execution fault: {}", description);
        Self {
            status: CaseStatus::Failed,
            message: reason.clone(),
            reason: Some(reason),
            duration_ms: 0,
            started_at: None,
            finished_at: None,
            log_content: String::new(),
            log_location: None,
        }
    }

    pub fn from_classification(
        classification: Classification,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        log_content: String,
    ) -> Self {
        Self {
            status: classification.status,
            message: classification.message,
            reason: classification.reason,
            duration_ms: (finished_at - started_at).num_milliseconds(),
            started_at: Some(started_at),
            finished_at: Some(finished_at),
            log_content,
            log_location: None,
        }
    }

    pub fn with_timing(mut self, started_at: DateTime<Utc>, finished_at: DateTime<Utc>) -> Self {
        self.duration_ms = (finished_at - started_at).num_milliseconds();
        self.started_at = Some(started_at);
        self.finished_at = Some(finished_at);
        self
    }

    pub fn is_cancellation(&self) -> bool {
        self.status == CaseStatus::Blocked && self.reason.as_deref() == Some(CANCELLED_REASON)
    }
}

/// Per-case report delivered to the result collector.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResultReport {
    pub task_id: TaskId,
    pub test_case_id: i64,
    pub round: u32,
    pub status: CaseStatus,
    pub result: String,
    /// Milliseconds.
    pub execution_time: i64,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    pub executor_ip: String,
    pub test_case_set_id: Option<i64>,
    pub log_file_path: Option<String>,
}

impl ResultReport {
    pub fn new(task: &Task, case: &TestCaseSpec, outcome: &ExecutionOutcome) -> Self {
        // FAILED/BLOCKED always carry a reason; fall back to the message.
        let failure_reason = if outcome.status.carries_reason() {
            Some(
                outcome
                    .reason
                    .clone()
                    .unwrap_or_else(|| outcome.message.clone()),
            )
        } else {
            None
        };

        Self {
            task_id: task.task_id.clone(),
            test_case_id: case.test_case_id,
            round: case.round,
            status: outcome.status,
            result: outcome.message.clone(),
            execution_time: outcome.duration_ms,
            start_time: outcome.started_at,
            end_time: outcome.finished_at,
            failure_reason,
            executor_ip: task.executor_ip.clone(),
            test_case_set_id: task.test_case_set_id,
            log_file_path: outcome.log_location.clone(),
        }
    }
}
