use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("Task already running: {0}")]
    TaskAlreadyRunning(String),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Too many concurrent tasks: {running} running, limit {limit}")]
    CapacityExceeded { running: usize, limit: usize },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Process error: {0}")]
    Process(String),

    #[error("Report delivery failed: {0}")]
    Report(String),

    #[error("Log upload failed: {0}")]
    Upload(String),
}

