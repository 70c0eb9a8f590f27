use crate::dispatch::ConsoleReportSink;
use caserun_core::config::Config;
use caserun_core::task::{Task, TaskId};
use caserun_local::Engine;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Read a task description. `.json` files are parsed as JSON, anything else
/// as YAML (which accepts the same camelCase keys).
pub fn load_task(path: &Path) -> anyhow::Result<Task> {
    let contents = std::fs::read_to_string(path)?;
    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    let mut task: Task = if is_json {
        serde_json::from_str(&contents)?
    } else {
        serde_yaml::from_str(&contents)?
    };

    if task.task_id.as_str().trim().is_empty() {
        task.task_id = TaskId::generate();
    }
    Ok(task)
}

pub async fn run(
    config: Config,
    task_file: &Path,
    bundle: PathBuf,
    timeout_secs: Option<u64>,
) -> anyhow::Result<()> {
    let task = load_task(task_file)?;
    let task_id = task.task_id.clone();
    let started = chrono::Local::now();

    let sink = Arc::new(ConsoleReportSink::new(&config));
    let mut engine = Engine::new(config, sink);
    if let Some(secs) = timeout_secs {
        engine = engine.with_case_timeout(Duration::from_secs(secs));
    }

    let mut handle = engine.submit(task, bundle)?;

    let finished = tokio::select! {
        joined = &mut handle => Some(joined?),
        _ = tokio::signal::ctrl_c() => None,
    };
    let summary = match finished {
        Some(summary) => summary,
        None => {
            warn!(task_id = %task_id, "interrupt received, cancelling task");
            engine.cancel(&task_id).await;
            handle.await?
        }
    };

    let elapsed = chrono::Local::now() - started;
    eprintln!();
    eprintln!("Task {} {}", summary.task_id, summary.state);
    eprintln!("  Cases:     {}", summary.total());
    eprintln!("  Succeeded: {}", summary.succeeded);
    eprintln!("  Failed:    {}", summary.failed);
    eprintln!("  Blocked:   {} ({} cancelled)", summary.blocked, summary.cancelled);
    eprintln!("  Elapsed:   {}s", elapsed.num_seconds());

    Ok(())
}
