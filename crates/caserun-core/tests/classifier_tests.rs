#[cfg(test)]
mod tests {
    use caserun_core::classify::{
        environment_signal, extract_metrics, parse_summary, ResultClassifier, NO_INDICATOR_REASON,
    };
    use caserun_core::task::CaseStatus;
    use std::time::Duration;

    fn classifier() -> ResultClassifier {
        ResultClassifier::new(Duration::from_secs(60))
    }

    #[test]
    fn test_pass_line_is_success_without_reason() {
        let c = classifier().classify(true, 0, "PASS: all assertions ok\n");
        assert_eq!(c.status, CaseStatus::Success);
        assert_eq!(c.reason, None);
    }

    #[test]
    fn test_permission_denied_nonzero_exit_is_blocked() {
        let c = classifier().classify(true, 1, "Permission denied: /dev/ue0\n");
        assert_eq!(c.status, CaseStatus::Blocked);
        assert!(c.reason.unwrap().contains("Permission"));
    }

    #[test]
    fn test_timeout_is_failed_even_with_success_markers() {
        let c = classifier().classify(false, 0, "PASS\nsuccess\n");
        assert_eq!(c.status, CaseStatus::Failed);
        let reason = c.reason.unwrap();
        assert!(reason.contains("timeout"));
        assert!(reason.contains("1 minute"));
    }

    #[test]
    fn test_environment_signal_beats_failure_keyword() {
        let log = "ERROR: test failed\nConnection refused while opening socket\n";
        let c = classifier().classify(true, 2, log);
        assert_eq!(c.status, CaseStatus::Blocked);
        assert!(c.reason.unwrap().contains("connection failed"));
    }

    #[test]
    fn test_environment_signal_priority_order() {
        // Both module-not-found and file-not-found appear; module wins.
        let log = "No such file or directory\nModuleNotFoundError: No module named 'serial'\n";
        assert_eq!(environment_signal(log).unwrap().category, "module-not-found");
    }

    #[test]
    fn test_nonzero_exit_without_signal_reports_tail() {
        let log = "step 1\nstep 2\nstep 3\nstep 4\nstep 5\nassert x == y\n\n";
        let c = classifier().classify(true, 3, log);
        assert_eq!(c.status, CaseStatus::Failed);
        assert_eq!(
            c.reason.as_deref(),
            Some("step 2; step 3; step 4; step 5; assert x == y")
        );
    }

    #[test]
    fn test_nonzero_exit_with_empty_log() {
        let c = classifier().classify(true, 7, "");
        assert_eq!(c.status, CaseStatus::Failed);
        assert_eq!(c.reason.as_deref(), Some("process exited with code 7"));
    }

    #[test]
    fn test_clean_exit_without_markers_is_blocked() {
        let c = classifier().classify(true, 0, "measuring...\ndone\n");
        assert_eq!(c.status, CaseStatus::Blocked);
        assert_eq!(c.reason.as_deref(), Some(NO_INDICATOR_REASON));
    }

    #[test]
    fn test_clean_exit_failure_lines_collected() {
        let log = "start\nPASS: link up\nFAIL: throughput below target\nTraceback (most recent call last):\nend\n";
        let c = classifier().classify(true, 0, log);
        assert_eq!(c.status, CaseStatus::Failed);
        assert_eq!(
            c.reason.as_deref(),
            Some("FAIL: throughput below target; Traceback (most recent call last):")
        );
    }

    #[test]
    fn test_localized_markers() {
        assert_eq!(
            classifier().classify(true, 0, "测试通过\n").status,
            CaseStatus::Success
        );
        assert_eq!(
            classifier().classify(true, 0, "执行失败\n").status,
            CaseStatus::Failed
        );
    }

    #[test]
    fn test_partial_success_summary_is_failed_with_stats() {
        let log = "运行测试数: 10\n成功数: 8\n失败数: 1\n错误数: 1\n";
        let c = classifier().classify(true, 0, log);
        assert_eq!(c.status, CaseStatus::Failed);
        assert_eq!(
            c.reason.as_deref(),
            Some("total=10, success=8, failed=1, error=1, rate=80.0%")
        );
    }

    #[test]
    fn test_summary_supersedes_keywords() {
        // "error" appears in a test name, but the framework summary says OK.
        let log = "test_error_path ... ok\n----\nRan 3 tests in 0.004s\n\nOK\n";
        let c = classifier().classify(true, 0, log);
        assert_eq!(c.status, CaseStatus::Success);
        assert_eq!(parse_summary(log).unwrap().total, 3);
    }

    #[test]
    fn test_metrics_appended_to_message() {
        let log = "latency: 12.5 ms\nbandwidth: 95.2 Mbps\nsignal strength: -85 dBm\nPASS\n";
        let c = classifier().classify(true, 0, log);
        assert_eq!(c.status, CaseStatus::Success);
        assert!(c.message.ends_with(
            " (latency: 12.50ms) (bandwidth: 95.20Mbps) (signal strength: -85.00dBm)"
        ));
    }

    #[test]
    fn test_metrics_on_failure_path_too() {
        let c = classifier().classify(false, 0, "网络延迟: 30 ms\n");
        assert!(c.message.contains("(latency: 30.00ms)"));
        assert_eq!(extract_metrics("nothing here").latency_ms, None);
    }

    #[test]
    fn test_classification_is_deterministic() {
        let log = "Ran 4 tests in 0.1s\nFAILED (failures=2)\nlatency: 3 ms\n";
        let first = classifier().classify(true, 0, log);
        for _ in 0..10 {
            assert_eq!(classifier().classify(true, 0, log), first);
        }
    }
}
