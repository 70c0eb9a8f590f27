//! Log classification.
//!
//! Turns (completion state, exit code, captured log) into a [`Classification`].
//! Decision order, first match wins:
//!
//! 1. not completed: FAILED (timeout), whatever the log says
//! 2. non-zero exit: BLOCKED when an [`ENVIRONMENT_SIGNALS`] entry matches,
//!    otherwise FAILED with the tail of the log
//! 3. zero exit: a test-framework summary decides when one is present,
//!    otherwise the success/failure keyword heuristic
//!
//! Extracted metrics are appended to the message on every path.

use crate::task::CaseStatus;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt::Write as _;
use std::time::Duration;

/// One environment/infrastructure cause. Needles are matched against the
/// lower-cased log.
#[derive(Debug)]
pub struct EnvironmentSignal {
    pub category: &'static str,
    pub needles: &'static [&'static str],
    pub explanation: &'static str,
}

/// Priority order matters: a log often carries several of these at once.
pub const ENVIRONMENT_SIGNALS: &[EnvironmentSignal] = &[
    EnvironmentSignal {
        category: "module-not-found",
        needles: &["modulenotfounderror", "importerror", "no module named"],
        explanation: "module import failed: a required dependency is not installed",
    },
    EnvironmentSignal {
        category: "permission-denied",
        needles: &["permission denied", "access denied", "权限不足"],
        explanation: "Permission denied: the script could not access a file, directory or device",
    },
    EnvironmentSignal {
        category: "file-not-found",
        needles: &["no such file", "file not found", "文件不存在"],
        explanation: "file not found: a required file or directory does not exist",
    },
    EnvironmentSignal {
        category: "connection-failed",
        needles: &[
            "connection refused",
            "network is unreachable",
            "connection timed out",
            "网络连接失败",
        ],
        explanation: "connection failed: the target host refused the connection or is unreachable",
    },
    EnvironmentSignal {
        category: "dns-failure",
        needles: &[
            "dns resolution failed",
            "name or service not known",
            "temporary failure in name resolution",
            "dns解析失败",
        ],
        explanation: "DNS resolution failed: the host name could not be resolved",
    },
    EnvironmentSignal {
        category: "out-of-memory",
        needles: &["out of memory", "memoryerror", "cannot allocate memory", "内存不足"],
        explanation: "out of memory: the system could not allocate enough memory",
    },
    EnvironmentSignal {
        category: "disk-full",
        needles: &["no space left", "disk space", "磁盘空间不足"],
        explanation: "disk full: no space left to write files",
    },
    EnvironmentSignal {
        category: "launcher-missing",
        needles: &[
            "command not found",
            "cannot run program",
            "python executable",
            "is not recognized as an internal or external command",
        ],
        explanation: "launcher unavailable: the interpreter is not installed or not on PATH",
    },
];

const SUCCESS_MARKERS: &[&str] = &["pass", "success", "成功", "通过"];
const FAILURE_MARKERS: &[&str] = &["fail", "error", "失败", "错误"];
const STACK_TRACE_MARKERS: &[&str] = &["traceback", "exception", "assertionerror"];

const TAIL_LINES: usize = 5;

pub const NO_INDICATOR_REASON: &str = "log contained no explicit success or failure indicator";

#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub status: CaseStatus,
    pub message: String,
    pub reason: Option<String>,
    pub metrics: Metrics,
}

/// Test-framework counts read from the log.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Summary {
    pub total: u32,
    pub success: u32,
    pub failed: u32,
    pub errors: u32,
}

impl Summary {
    fn new(total: u32, failed: u32, errors: u32) -> Self {
        Self {
            total,
            success: total.saturating_sub(failed).saturating_sub(errors),
            failed,
            errors,
        }
    }

    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            f64::from(self.success) / f64::from(self.total) * 100.0
        }
    }

    pub fn has_failures(&self) -> bool {
        self.failed > 0 || self.errors > 0
    }

    pub fn stats_string(&self) -> String {
        format!(
            "total={}, success={}, failed={}, error={}, rate={:.1}%",
            self.total,
            self.success,
            self.failed,
            self.errors,
            self.success_rate()
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metrics {
    pub latency_ms: Option<f64>,
    pub bandwidth: Option<(f64, String)>,
    pub signal_dbm: Option<f64>,
}

impl Metrics {
    pub fn is_empty(&self) -> bool {
        self.latency_ms.is_none() && self.bandwidth.is_none() && self.signal_dbm.is_none()
    }

    /// Append every known metric to `message`, two decimals plus unit.
    pub fn annotate(&self, message: &str) -> String {
        let mut out = message.to_string();
        if let Some(latency) = self.latency_ms {
            let _ = write!(out, " (latency: {:.2}ms)", latency);
        }
        if let Some((value, unit)) = &self.bandwidth {
            let _ = write!(out, " (bandwidth: {:.2}{})", value, unit);
        }
        if let Some(signal) = self.signal_dbm {
            let _ = write!(out, " (signal strength: {:.2}dBm)", signal);
        }
        out
    }
}

static ZH_SUMMARY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)运行测试数[:：]\s*(\d+).*?失败数[:：]\s*(\d+).*?错误数[:：]\s*(\d+)")
        .expect("valid regex")
});
static UNITTEST_RAN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Ran (\d+) tests?").expect("valid regex"));
static UNITTEST_FAILED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"FAILED \(([^)]*)\)").expect("valid regex"));
static UNITTEST_OK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^(?:\[[^\]]*\]\s*)?OK\b").expect("valid regex"));
static PYTEST_SUMMARY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)=+ (.*?\d+ (?:passed|failed|errors?).*?) in [\d.]+s.*=+\s*$").expect("valid regex"));
static COUNT_FAILURES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"failures=(\d+)").expect("valid regex"));
static COUNT_ERRORS: Lazy<Regex> = Lazy::new(|| Regex::new(r"errors=(\d+)").expect("valid regex"));
static PYTEST_PASSED: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+) passed").expect("valid regex"));
static PYTEST_FAILED: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+) failed").expect("valid regex"));
static PYTEST_ERRORS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+) errors?\b").expect("valid regex"));

static LATENCY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:latency|网络延迟)\s*[:：]\s*(-?\d+(?:\.\d+)?)\s*ms").expect("valid regex")
});
static BANDWIDTH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:bandwidth|带宽)\s*[:：]\s*(\d+(?:\.\d+)?)\s*(gbps|mbps|kbps)")
        .expect("valid regex")
});
static SIGNAL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:signal strength|信号强度)\s*[:：]\s*(-?\d+(?:\.\d+)?)\s*dbm")
        .expect("valid regex")
});

/// Stateless apart from the timeout it reports on; `classify` is deterministic.
#[derive(Debug, Clone)]
pub struct ResultClassifier {
    timeout: Duration,
}

impl ResultClassifier {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn classify(&self, completed: bool, exit_code: i32, log: &str) -> Classification {
        let metrics = extract_metrics(log);
        let (status, message, reason) = if !completed {
            (
                CaseStatus::Failed,
                "case execution timed out".to_string(),
                Some(format!(
                    "execution exceeded timeout of {}",
                    describe_timeout(self.timeout)
                )),
            )
        } else if exit_code != 0 {
            classify_nonzero_exit(exit_code, log)
        } else {
            classify_clean_exit(log)
        };

        Classification {
            status,
            message: metrics.annotate(&message),
            reason,
            metrics,
        }
    }
}

/// First environment signal present in the log, in table order.
pub fn environment_signal(log: &str) -> Option<&'static EnvironmentSignal> {
    let lower = log.to_lowercase();
    ENVIRONMENT_SIGNALS
        .iter()
        .find(|signal| signal.needles.iter().any(|needle| lower.contains(needle)))
}

fn classify_nonzero_exit(exit_code: i32, log: &str) -> (CaseStatus, String, Option<String>) {
    if let Some(signal) = environment_signal(log) {
        return (
            CaseStatus::Blocked,
            "case blocked by environment problem".to_string(),
            Some(format!("environment problem: {}", signal.explanation)),
        );
    }

    let tail = tail_lines(log, TAIL_LINES);
    let reason = if tail.is_empty() {
        format!("process exited with code {}", exit_code)
    } else {
        tail
    };
    (
        CaseStatus::Failed,
        format!("case failed with exit code {}", exit_code),
        Some(reason),
    )
}

fn classify_clean_exit(log: &str) -> (CaseStatus, String, Option<String>) {
    if let Some(summary) = parse_summary(log) {
        if summary.has_failures() {
            let message = if summary.success > 0 {
                "case partially passed with failures"
            } else {
                "case failed"
            };
            return (
                CaseStatus::Failed,
                message.to_string(),
                Some(summary.stats_string()),
            );
        }
        if summary.total > 0 {
            return (CaseStatus::Success, "case passed".to_string(), None);
        }
    }

    let lower = log.to_lowercase();
    let has_failure = FAILURE_MARKERS.iter().any(|m| lower.contains(m));
    let has_success = SUCCESS_MARKERS.iter().any(|m| lower.contains(m));

    if has_failure {
        (
            CaseStatus::Failed,
            "case failed".to_string(),
            Some(failure_lines(log)),
        )
    } else if has_success {
        (CaseStatus::Success, "case passed".to_string(), None)
    } else {
        (
            CaseStatus::Blocked,
            "case outcome undetermined".to_string(),
            Some(NO_INDICATOR_REASON.to_string()),
        )
    }
}

/// Read a test-framework summary, if the log carries one.
pub fn parse_summary(log: &str) -> Option<Summary> {
    if let Some(caps) = ZH_SUMMARY.captures(log) {
        return Some(Summary::new(
            capture_u32(&caps, 1),
            capture_u32(&caps, 2),
            capture_u32(&caps, 3),
        ));
    }

    if let Some(caps) = UNITTEST_RAN.captures(log) {
        let total = capture_u32(&caps, 1);
        if let Some(failed) = UNITTEST_FAILED.captures(log) {
            let detail = failed.get(1).map(|m| m.as_str()).unwrap_or_default();
            let failures = first_count(&COUNT_FAILURES, detail);
            let errors = first_count(&COUNT_ERRORS, detail);
            return Some(Summary::new(total, failures, errors));
        }
        if UNITTEST_OK.is_match(log) {
            return Some(Summary::new(total, 0, 0));
        }
    }

    if let Some(caps) = PYTEST_SUMMARY.captures_iter(log).last() {
        let line = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
        let passed = first_count(&PYTEST_PASSED, line);
        let failed = first_count(&PYTEST_FAILED, line);
        let errors = first_count(&PYTEST_ERRORS, line);
        return Some(Summary::new(passed + failed + errors, failed, errors));
    }

    None
}

pub fn extract_metrics(log: &str) -> Metrics {
    let latency_ms = LATENCY
        .captures(log)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok());
    let bandwidth = BANDWIDTH.captures(log).and_then(|c| {
        let value = c.get(1)?.as_str().parse().ok()?;
        let unit = normalize_rate_unit(c.get(2)?.as_str());
        Some((value, unit))
    });
    let signal_dbm = SIGNAL
        .captures(log)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok());

    Metrics {
        latency_ms,
        bandwidth,
        signal_dbm,
    }
}

fn normalize_rate_unit(unit: &str) -> String {
    match unit.to_lowercase().as_str() {
        "gbps" => "Gbps".to_string(),
        "mbps" => "Mbps".to_string(),
        "kbps" => "Kbps".to_string(),
        other => other.to_string(),
    }
}

fn capture_u32(caps: &regex::Captures<'_>, idx: usize) -> u32 {
    caps.get(idx)
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0)
}

fn first_count(re: &Regex, text: &str) -> u32 {
    re.captures(text)
        .map(|c| capture_u32(&c, 1))
        .unwrap_or(0)
}

/// Last `n` non-blank lines, trimmed and joined with "; ".
fn tail_lines(log: &str, n: usize) -> String {
    let mut lines: Vec<&str> = log
        .lines()
        .rev()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .take(n)
        .collect();
    lines.reverse();
    lines.join("; ")
}

/// Lines carrying failure markers or stack-trace tokens, joined with "; ".
fn failure_lines(log: &str) -> String {
    log.lines()
        .map(str::trim)
        .filter(|line| {
            let lower = line.to_lowercase();
            FAILURE_MARKERS
                .iter()
                .chain(STACK_TRACE_MARKERS)
                .any(|m| lower.contains(m))
        })
        .collect::<Vec<_>>()
        .join("; ")
}

pub fn describe_timeout(timeout: Duration) -> String {
    let secs = timeout.as_secs();
    if secs > 0 && secs % 60 == 0 {
        let minutes = secs / 60;
        if minutes == 1 {
            "1 minute".to_string()
        } else {
            format!("{} minutes", minutes)
        }
    } else {
        format!("{} seconds", secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tail_skips_blank_lines() {
        let log = "one\n\n two \nthree\n\nfour\nfive\nsix\n\n";
        assert_eq!(tail_lines(log, 5), "two; three; four; five; six");
    }

    #[test]
    fn unittest_failed_summary() {
        let log = "....F.E\n----\nRan 7 tests in 0.012s\n\nFAILED (failures=1, errors=1)\n";
        let summary = parse_summary(log).unwrap();
        assert_eq!(summary, Summary::new(7, 1, 1));
        assert_eq!(summary.success, 5);
    }

    #[test]
    fn pytest_summary_line() {
        let log = "collected 4 items\n\n========= 3 passed, 1 failed in 0.42s =========\n";
        let summary = parse_summary(log).unwrap();
        assert_eq!(summary.total, 4);
        assert_eq!(summary.failed, 1);
    }

    #[test]
    fn timeout_description_prefers_minutes() {
        assert_eq!(describe_timeout(Duration::from_secs(120)), "2 minutes");
        assert_eq!(describe_timeout(Duration::from_secs(60)), "1 minute");
        assert_eq!(describe_timeout(Duration::from_secs(2)), "2 seconds");
    }
}
