use caserun_core::config::Config;
use caserun_core::error::ExecutorError;
use caserun_core::outcome::ResultReport;
use caserun_core::report::{HttpReportSink, ReportSink};
use caserun_core::task::Task;
use std::path::Path;

/// Load config from an explicit path, or the default location.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    match path {
        Some(path) => Config::load_from(path),
        None => Config::load_default(),
    }
}

/// Prints every report as one JSON line on stdout and, when the task (or the
/// config) names a collector, POSTs it there as well.
pub struct ConsoleReportSink {
    http: HttpReportSink,
    has_default_url: bool,
}

impl ConsoleReportSink {
    pub fn new(config: &Config) -> Self {
        Self {
            http: HttpReportSink::new(config.default_result_url.clone()),
            has_default_url: config.default_result_url.is_some(),
        }
    }
}

#[async_trait::async_trait]
impl ReportSink for ConsoleReportSink {
    async fn deliver(&self, task: &Task, report: &ResultReport) -> Result<(), ExecutorError> {
        println!("{}", serde_json::to_string(report)?);

        let task_has_url = task
            .result_report_url
            .as_deref()
            .is_some_and(|u| !u.trim().is_empty());
        if task_has_url || self.has_default_url {
            self.http.deliver(task, report).await?;
        }
        Ok(())
    }
}
