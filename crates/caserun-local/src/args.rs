//! Command-line contract between the executor and test scripts.
//!
//! ```text
//! <interpreter> <script> --ip "<ip>" [--category "<c>"] [--app "<a>"]
//!     [--dataset_round "<intent>"] [--<key> "<value>"]* [--uelist "<json>"]
//! ```
//!
//! Values carry literal double quotes. Scripts in the field strip them, so
//! changing that is a contract change and must bump [`ARG_CONTRACT_VERSION`].

use caserun_core::task::{Device, Task};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const ARG_CONTRACT_VERSION: u32 = 1;

/// Everything needed to launch one script, minus the interpreter.
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptInvocation {
    pub script: PathBuf,
    pub args: Vec<String>,
    /// Short name used in logs and process tracking.
    pub label: String,
}

impl ScriptInvocation {
    pub fn for_task(task: &Task, script: &Path) -> Self {
        let label = script
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| script.display().to_string());
        Self {
            script: script.to_path_buf(),
            args: build_args(task),
            label,
        }
    }

    /// Full argv after the interpreter: script path first.
    pub fn argv(&self) -> Vec<String> {
        let mut argv = Vec::with_capacity(self.args.len() + 1);
        argv.push(self.script.display().to_string());
        argv.extend(self.args.iter().cloned());
        argv
    }
}

fn quoted(value: &str) -> String {
    format!("\"{}\"", value)
}

fn push_flag(args: &mut Vec<String>, flag: &str, value: Option<&str>) {
    if let Some(value) = value.filter(|v| !v.trim().is_empty()) {
        args.push(format!("--{}", flag));
        args.push(quoted(value));
    }
}

/// Flag arguments for every script of `task`.
pub fn build_args(task: &Task) -> Vec<String> {
    let mut args = vec!["--ip".to_string(), quoted(&task.executor_ip)];

    if let Some(strategy) = &task.collect_strategy_info {
        push_flag(&mut args, "category", strategy.business_category.as_deref());
        push_flag(&mut args, "app", strategy.app.as_deref());
        push_flag(&mut args, "dataset_round", strategy.intent.as_deref());
    }

    if let Some(raw) = task.task_custom_params.as_deref() {
        for (key, value) in parse_custom_params(raw) {
            debug!(key = %key, value = %value, "adding custom parameter");
            args.push(format!("--{}", key));
            args.push(quoted(&value));
        }
    }

    if !task.ue_list.is_empty() {
        match device_list_json(&task.ue_list) {
            Ok(json) => {
                args.push("--uelist".to_string());
                args.push(quoted(&escape_json_for_command_line(&json)));
            }
            Err(e) => warn!(error = %e, "could not serialize device list, omitting --uelist"),
        }
    }

    args
}

fn device_list_json(devices: &[Device]) -> Result<String, serde_json::Error> {
    serde_json::to_string(devices)
}

/// Parse `taskCustomParams`: a JSON array of `{"key", "value"}` objects or
/// `"k=v"` strings. Anything unrecognised is skipped with a warning.
pub fn parse_custom_params(raw: &str) -> Vec<(String, String)> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Vec::new();
    }

    let items = match serde_json::from_str::<Value>(raw) {
        Ok(Value::Array(items)) => items,
        Ok(_) => {
            warn!(params = raw, "custom parameters are not a JSON array, ignoring");
            return Vec::new();
        }
        Err(e) => {
            warn!(params = raw, error = %e, "custom parameters are not valid JSON, ignoring");
            return Vec::new();
        }
    };

    let mut params = Vec::new();
    for item in items {
        let pair = match &item {
            Value::Object(map) => {
                let key = map.get("key").and_then(scalar_text);
                let value = map.get("value").and_then(scalar_text);
                key.zip(value)
            }
            Value::String(s) => s
                .split_once('=')
                .map(|(k, v)| (k.trim().to_string(), v.trim().to_string())),
            _ => None,
        };

        match pair {
            Some((key, value)) if !key.trim().is_empty() && !value.trim().is_empty() => {
                params.push((key.trim().to_string(), value.trim().to_string()));
            }
            _ => warn!(item = %item, "skipping malformed custom parameter"),
        }
    }
    params
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Backslash-escape quotes and control whitespace so the JSON survives as a
/// single argument.
pub fn escape_json_for_command_line(json: &str) -> String {
    let mut out = String::with_capacity(json.len() + 16);
    for c in json.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            other => out.push(other),
        }
    }
    out
}
