use crate::error::ExecutorError;
use crate::outcome::ResultReport;
use crate::task::{Task, TaskId};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Destination for per-case result reports.
/// Delivery failures are returned to the caller, which logs them; nothing retries.
#[async_trait::async_trait]
pub trait ReportSink: Send + Sync {
    async fn deliver(&self, task: &Task, report: &ResultReport) -> Result<(), ExecutorError>;
}

/// Store for captured case logs. Returns the location of the stored artifact.
#[async_trait::async_trait]
pub trait LogStore: Send + Sync {
    async fn upload(
        &self,
        task: &Task,
        local_path: &Path,
        file_name: &str,
    ) -> Result<String, ExecutorError>;

    /// Whether uploads for `task` have anywhere to go.
    fn is_configured_for(&self, _task: &Task) -> bool {
        true
    }
}

/// POSTs each report as JSON to the task's `resultReportUrl`.
pub struct HttpReportSink {
    client: reqwest::Client,
    fallback_url: Option<String>,
}

impl HttpReportSink {
    pub fn new(fallback_url: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self {
            client,
            fallback_url,
        }
    }

    fn url_for<'a>(&'a self, task: &'a Task) -> Option<&'a str> {
        task.result_report_url
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .or(self.fallback_url.as_deref())
    }
}

#[async_trait::async_trait]
impl ReportSink for HttpReportSink {
    async fn deliver(&self, task: &Task, report: &ResultReport) -> Result<(), ExecutorError> {
        let url = self
            .url_for(task)
            .ok_or_else(|| ExecutorError::Report("no result report URL configured".into()))?;

        debug!(task_id = %task.task_id, case_id = report.test_case_id, round = report.round, url, "posting result report");

        let response = self
            .client
            .post(url)
            .json(report)
            .send()
            .await
            .map_err(|e| ExecutorError::Report(e.to_string()))?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(ExecutorError::Report(format!(
                "HTTP {} from {}: {}",
                status, url, body
            )));
        }

        info!(task_id = %task.task_id, case_id = report.test_case_id, round = report.round, status = %report.status, "result report delivered");
        Ok(())
    }
}

/// Uploads log files as multipart form data to `<base>/upload/<task_id>`.
pub struct HttpLogStore {
    client: reqwest::Client,
    fallback_url: Option<String>,
}

impl HttpLogStore {
    pub fn new(fallback_url: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .timeout(Duration::from_secs(60))
            .build()
            .unwrap_or_default();
        Self {
            client,
            fallback_url,
        }
    }

    fn base_for<'a>(&'a self, task: &'a Task) -> Option<&'a str> {
        task.log_report_url
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .or(self.fallback_url.as_deref())
            .map(|u| u.trim_end_matches('/'))
    }
}

/// Location of an uploaded log, as handed back to the result collector.
pub fn uploaded_location(base: &str, task_id: &TaskId, file_name: &str) -> String {
    format!("{}/upload/{}/{}", base.trim_end_matches('/'), task_id, file_name)
}

#[async_trait::async_trait]
impl LogStore for HttpLogStore {
    fn is_configured_for(&self, task: &Task) -> bool {
        self.base_for(task).is_some()
    }

    async fn upload(
        &self,
        task: &Task,
        local_path: &Path,
        file_name: &str,
    ) -> Result<String, ExecutorError> {
        let base = self
            .base_for(task)
            .ok_or_else(|| ExecutorError::Upload("no log store URL configured".into()))?;

        let bytes = tokio::fs::read(local_path).await?;
        let size = bytes.len();
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(file_name.to_string())
            .mime_str("text/plain")
            .map_err(|e| ExecutorError::Upload(e.to_string()))?;
        let form = reqwest::multipart::Form::new().part("file", part);

        let upload_url = format!("{}/upload/{}", base, task.task_id);
        let response = self
            .client
            .post(&upload_url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| ExecutorError::Upload(e.to_string()))?;

        let status = response.status();
        if !(status == reqwest::StatusCode::OK || status == reqwest::StatusCode::CREATED) {
            let body = response.text().await.unwrap_or_default();
            return Err(ExecutorError::Upload(format!(
                "HTTP {} from {}: {}",
                status, upload_url, body
            )));
        }

        let location = uploaded_location(base, &task.task_id, file_name);
        info!(task_id = %task.task_id, bytes = size, location = %location, "log uploaded");
        Ok(location)
    }
}
