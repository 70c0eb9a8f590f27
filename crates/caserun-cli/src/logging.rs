//! Logging setup using `tracing` + `tracing-subscriber`.
//!
//! Filter priority:
//! 1. `CASERUN_LOG` environment variable (full `EnvFilter` syntax)
//! 2. `--log-level` flag
//! 3. `info`

use anyhow::Result;
use tracing_subscriber::EnvFilter;

pub const LOG_ENV: &str = "CASERUN_LOG";

/// Install the global subscriber. Call once at startup. Output goes to
/// stderr so that stdout stays machine-readable.
pub fn init_logging(cli_level: Option<&str>) -> Result<()> {
    let filter = match std::env::var(LOG_ENV) {
        Ok(spec) if !spec.trim().is_empty() => EnvFilter::try_new(spec)?,
        _ => EnvFilter::try_new(cli_level.unwrap_or("info"))?,
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .init();

    Ok(())
}
