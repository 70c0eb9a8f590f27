#[cfg(test)]
mod tests {
    use caserun_core::config::Config;
    use caserun_core::outcome::{ExecutionOutcome, ResultReport, CANCELLED_REASON};
    use caserun_core::report::uploaded_location;
    use caserun_core::task::{CaseStatus, Task, TaskId, TaskState};
    use chrono::{Duration as ChronoDuration, Utc};
    use std::time::Duration;

    const TASK_JSON: &str = r#"{
        "taskId": "T1",
        "executorIp": "10.0.0.5",
        "testCaseSetId": 42,
        "testCaseList": [
            {"testCaseId": 1, "testCaseNumber": "TC001", "round": 1},
            {"testCaseId": 2, "testCaseNumber": "  ", "round": 2},
            {"testCaseId": 3}
        ],
        "resultReportUrl": "http://collector/api/result",
        "ueList": [{"ueId": "ue-1", "vendor": "acme"}],
        "collectStrategyInfo": {"businessCategory": "video", "app": "player", "intent": "r1"},
        "taskCustomParams": "[{\"key\":\"duration\",\"value\":\"30\"}]"
    }"#;

    #[test]
    fn test_task_deserializes_from_camel_case() {
        let task: Task = serde_json::from_str(TASK_JSON).unwrap();
        assert_eq!(task.task_id, TaskId::from("T1"));
        assert_eq!(task.cases.len(), 3);
        assert_eq!(task.cases[0].number(), Some("TC001"));
        assert_eq!(task.cases[1].number(), None);
        assert_eq!(task.cases[2].round, 1);
        assert_eq!(task.ue_list[0].vendor.as_deref(), Some("acme"));
        assert_eq!(
            task.collect_strategy_info.unwrap().business_category.as_deref(),
            Some("video")
        );
    }

    #[test]
    fn test_log_stem_falls_back_to_case_id() {
        let task: Task = serde_json::from_str(TASK_JSON).unwrap();
        assert_eq!(task.cases[0].log_stem(), "TC001_1");
        assert_eq!(task.cases[1].log_stem(), "2_2");
    }

    #[test]
    fn test_success_report_has_no_failure_reason() {
        let task: Task = serde_json::from_str(TASK_JSON).unwrap();
        let start = Utc::now();
        let end = start + ChronoDuration::milliseconds(1500);
        let outcome = ExecutionOutcome {
            status: CaseStatus::Success,
            message: "case passed".into(),
            reason: None,
            duration_ms: 0,
            started_at: None,
            finished_at: None,
            log_content: String::new(),
            log_location: Some("TC001_1.log".into()),
        }
        .with_timing(start, end);

        let report = ResultReport::new(&task, &task.cases[0], &outcome);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["status"], "SUCCESS");
        assert_eq!(json["executionTime"], 1500);
        assert_eq!(json["executorIp"], "10.0.0.5");
        assert_eq!(json["testCaseSetId"], 42);
        assert_eq!(json["logFilePath"], "TC001_1.log");
        assert!(json.get("failureReason").is_none());
    }

    #[test]
    fn test_cancelled_report_is_blocked_with_reason() {
        let task: Task = serde_json::from_str(TASK_JSON).unwrap();
        let outcome = ExecutionOutcome::cancelled();
        assert!(outcome.is_cancellation());

        let report = ResultReport::new(&task, &task.cases[1], &outcome);
        assert_eq!(report.status, CaseStatus::Blocked);
        assert_eq!(report.failure_reason.as_deref(), Some(CANCELLED_REASON));
        assert_eq!(report.round, 2);
    }

    #[test]
    fn test_failure_reason_defaults_to_message() {
        let task: Task = serde_json::from_str(TASK_JSON).unwrap();
        let mut outcome = ExecutionOutcome::faulted("log unreadable");
        outcome.reason = None;
        let report = ResultReport::new(&task, &task.cases[0], &outcome);
        assert_eq!(report.failure_reason.as_deref(), Some("execution fault: log unreadable"));
    }

    #[test]
    fn test_task_state_terminality() {
        assert!(TaskState::Completed.is_terminal());
        assert!(TaskState::Cancelled.is_terminal());
        assert!(TaskState::Faulted.is_terminal());
        assert!(!TaskState::Running.is_terminal());
        assert_eq!(TaskState::Cancelled.to_string(), "cancelled");
    }

    #[test]
    fn test_config_defaults_from_empty_yaml() {
        let config: Config = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config.timeout_minutes, 1);
        assert_eq!(config.max_concurrent_tasks, 10);
        assert_eq!(config.case_timeout(), Duration::from_secs(60));
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
        assert!(config.auto_cleanup);
        assert_eq!(config.sweep_filter().as_deref(), Some("python"));
    }

    #[test]
    fn test_config_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(
            &path,
            "root_directory: /srv/caserun\ninterpreter: /usr/bin/python3\npoll_interval_ms: 5000\nsweep_filter: \"\"\n",
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.logs_dir("T9"), std::path::PathBuf::from("/srv/caserun/T9/logs"));
        // Clamped: completion is always polled at least once a second.
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.sweep_filter(), None);
    }

    #[test]
    fn test_config_rejects_zero_concurrency() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "max_concurrent_tasks: 0\n").unwrap();
        assert!(Config::load_from(&path).is_err());
    }

    #[test]
    fn test_uploaded_location() {
        assert_eq!(
            uploaded_location("http://logs.local/", &TaskId::from("T1"), "TC001_1.log"),
            "http://logs.local/upload/T1/TC001_1.log"
        );
    }
}
