pub mod classify;
pub mod config;
pub mod error;
pub mod outcome;
pub mod registry;
pub mod report;
pub mod task;

pub use classify::{Classification, ResultClassifier};
pub use config::Config;
pub use error::ExecutorError;
pub use outcome::{ExecutionOutcome, ResultReport};
pub use registry::{CancelSignal, OwnedProcess, Registration, TaskRegistry, TaskRuntimeState};
pub use report::{HttpLogStore, HttpReportSink, LogStore, ReportSink};
pub use task::{CaseStatus, Task, TaskId, TaskState, TestCaseSpec};
