use caserun_core::classify::ResultClassifier;
use caserun_core::config::Config;
use std::path::Path;

/// Classify a previously captured log without running anything.
pub async fn run(
    config: &Config,
    log: &Path,
    exit_code: i32,
    timed_out: bool,
    json: bool,
) -> anyhow::Result<()> {
    let bytes = tokio::fs::read(log).await?;
    let text = String::from_utf8_lossy(&bytes);

    let classification =
        ResultClassifier::new(config.case_timeout()).classify(!timed_out, exit_code, &text);

    if json {
        let value = serde_json::json!({
            "status": classification.status,
            "result": classification.message,
            "failureReason": classification.reason,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!("Status: {}", classification.status);
    println!("Result: {}", classification.message);
    if let Some(reason) = &classification.reason {
        println!("Reason: {}", reason);
    }

    Ok(())
}
