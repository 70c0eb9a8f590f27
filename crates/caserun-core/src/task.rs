use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    /// Fresh random id, used when an operator submits a task file without one.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn from_string(s: String) -> Self {
        Self(s)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// One batch of test cases bound to a single execution machine.
///
/// Field names follow the camelCase JSON accepted by the intake endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    #[serde(default)]
    pub task_id: TaskId,
    pub executor_ip: String,
    #[serde(default)]
    pub test_case_set_id: Option<i64>,
    #[serde(default)]
    pub test_case_set_path: Option<String>,
    #[serde(rename = "testCaseList")]
    pub cases: Vec<TestCaseSpec>,
    #[serde(default)]
    pub result_report_url: Option<String>,
    #[serde(default)]
    pub log_report_url: Option<String>,
    #[serde(default)]
    pub ue_list: Vec<Device>,
    #[serde(default)]
    pub collect_strategy_info: Option<CollectStrategy>,
    #[serde(default)]
    pub task_custom_params: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TestCaseSpec {
    pub test_case_id: i64,
    #[serde(default)]
    pub test_case_number: Option<String>,
    #[serde(default = "default_round")]
    pub round: u32,
}

fn default_round() -> u32 {
    1
}

impl TestCaseSpec {
    /// Case number with surrounding whitespace removed, if one is present and non-blank.
    pub fn number(&self) -> Option<&str> {
        self.test_case_number
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
    }

    /// Stem used for the per-round log file: `<number>_<round>` or `<id>_<round>`.
    pub fn log_stem(&self) -> String {
        match self.number() {
            Some(number) => format!("{}_{}", number, self.round),
            None => format!("{}_{}", self.test_case_id, self.round),
        }
    }
}

impl fmt::Display for TestCaseSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.number() {
            Some(number) => write!(f, "case {} ({}) round {}", self.test_case_id, number, self.round),
            None => write!(f, "case {} round {}", self.test_case_id, self.round),
        }
    }
}

/// Device ("UE") associated with the execution machine. Passed to scripts as JSON.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ue_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purpose: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_type_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vendor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Named collection strategy carrying the business parameters forwarded to scripts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct CollectStrategy {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub collect_count: Option<u32>,
    #[serde(default)]
    pub business_category: Option<String>,
    #[serde(default)]
    pub app: Option<String>,
    #[serde(default)]
    pub intent: Option<String>,
    #[serde(default)]
    pub custom_params: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Terminal status of one test case.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CaseStatus {
    Success,
    Failed,
    Blocked,
}

impl CaseStatus {
    /// Whether a report with this status carries a failure reason.
    pub fn carries_reason(&self) -> bool {
        !matches!(self, CaseStatus::Success)
    }
}

impl fmt::Display for CaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaseStatus::Success => write!(f, "SUCCESS"),
            CaseStatus::Failed => write!(f, "FAILED"),
            CaseStatus::Blocked => write!(f, "BLOCKED"),
        }
    }
}

/// Life-cycle of one task's executor loop.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Accepted,
    Running,
    Completed,
    Cancelled,
    Faulted,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Cancelled | TaskState::Faulted
        )
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskState::Accepted => write!(f, "accepted"),
            TaskState::Running => write!(f, "running"),
            TaskState::Completed => write!(f, "completed"),
            TaskState::Cancelled => write!(f, "cancelled"),
            TaskState::Faulted => write!(f, "faulted"),
        }
    }
}
