use caserun_core::config::Config;
use caserun_local::{default_killer, ProcessSweeper};
use std::path::Path;

/// Sweep the process table, independent of any running engine.
pub async fn run(
    config: &Config,
    task_id: Option<&str>,
    script: Option<&Path>,
    no_filter: bool,
) -> anyhow::Result<()> {
    let filter = if no_filter { None } else { config.sweep_filter() };
    let sweeper = ProcessSweeper::new(default_killer(), filter, config.grace_period());

    let (what, count) = match (task_id, script) {
        (Some(id), _) => (format!("task {}", id), sweeper.terminate_by_task_id(id).await),
        (None, Some(script)) => (
            format!("script {}", script.display()),
            sweeper.terminate_by_script_path(script).await,
        ),
        (None, None) => anyhow::bail!("either --task-id or --script is required"),
    };

    println!("Terminated {} process(es) for {}.", count, what);
    Ok(())
}
