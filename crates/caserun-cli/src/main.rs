use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod dispatch;
mod logging;

#[derive(Parser)]
#[command(name = "caserun")]
#[command(about = "Run test-case scripts and report per-case results", long_about = None)]
struct Cli {
    /// Config file (default: ~/.config/caserun/config.yaml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level or filter; CASERUN_LOG takes precedence
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a task file against an extracted bundle (Ctrl-C cancels)
    Run {
        /// Task description (JSON or YAML)
        #[arg(short, long)]
        task: PathBuf,

        /// Bundle directory containing scripts/ or cases/
        #[arg(short, long)]
        bundle: PathBuf,

        /// Per-case timeout in seconds, overriding timeout_minutes
        #[arg(long)]
        timeout_secs: Option<u64>,
    },

    /// Classify a captured log offline
    Classify {
        /// Log file
        #[arg(short, long)]
        log: PathBuf,

        /// Exit code the script returned
        #[arg(short, long, default_value = "0", allow_hyphen_values = true)]
        exit_code: i32,

        /// The script was killed on timeout
        #[arg(long)]
        timed_out: bool,

        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Kill every process whose command line names a task or script
    EmergencyStop {
        /// Task ID to sweep for
        #[arg(long, conflicts_with = "script")]
        task_id: Option<String>,

        /// Script path (matched by file name)
        #[arg(long)]
        script: Option<PathBuf>,

        /// Do not require the interpreter name in matched command lines
        #[arg(long)]
        no_filter: bool,
    },

    /// Show or initialise configuration
    Config {
        /// Print the config file path
        #[arg(long)]
        path: bool,

        /// Write a sample config file
        #[arg(long)]
        init: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_logging(cli.log_level.as_deref())?;

    use Commands::*;

    match cli.command {
        Run {
            task,
            bundle,
            timeout_secs,
        } => {
            let config = dispatch::load_config(cli.config.as_deref())?;
            commands::run::run(config, &task, bundle, timeout_secs).await?;
        }
        Classify {
            log,
            exit_code,
            timed_out,
            json,
        } => {
            let config = dispatch::load_config(cli.config.as_deref())?;
            commands::classify::run(&config, &log, exit_code, timed_out, json).await?;
        }
        EmergencyStop {
            task_id,
            script,
            no_filter,
        } => {
            let config = dispatch::load_config(cli.config.as_deref())?;
            commands::emergency_stop::run(&config, task_id.as_deref(), script.as_deref(), no_filter)
                .await?;
        }
        Config { path, init } => {
            commands::config::run(path, init).await?;
        }
    }

    Ok(())
}
