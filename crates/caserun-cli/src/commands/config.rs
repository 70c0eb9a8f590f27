use caserun_core::Config;

const SAMPLE_CONFIG: &str = r#"# caserun configuration

# Per-task working directories live under <root_directory>/<task_id>
root_directory: /opt/caserun
timeout_minutes: 1
max_concurrent_tasks: 10

interpreter: python3
script_extension: py
locale: C.UTF-8

poll_interval_ms: 1000
grace_period_secs: 5
output_drain_secs: 5
auto_cleanup: true

# Emergency sweeps only hit command lines that also contain this
# (defaults to the interpreter name; "" disables the extra check)
# sweep_filter: python3

# log_store_url: http://collector.local:8080/logs
# default_result_url: http://collector.local:8080/api/results
"#;

pub async fn run(path: bool, init: bool) -> anyhow::Result<()> {
    if path {
        println!("{}", Config::default_path().display());
        return Ok(());
    }

    if init {
        let config_path = Config::default_path();
        if config_path.exists() {
            println!("Config already exists at: {}", config_path.display());
            println!("Remove it first if you want to reinitialize.");
            return Ok(());
        }

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&config_path, SAMPLE_CONFIG)?;
        println!("Sample config written to: {}", config_path.display());
        return Ok(());
    }

    let config_path = Config::default_path();
    println!("Config path:  {}", config_path.display());
    let config = if config_path.exists() {
        Config::load_from(&config_path)?
    } else {
        println!("Status:       not found, using defaults");
        println!("Run `caserun config --init` to create one.");
        Config::default()
    };

    println!("Root:         {}", config.root_directory.display());
    println!("Interpreter:  {} (*.{})", config.interpreter, config.script_extension);
    println!("Timeout:      {} min", config.timeout_minutes);
    println!("Max tasks:    {}", config.max_concurrent_tasks);
    println!("Auto cleanup: {}", config.auto_cleanup);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_config_parses() {
        let config: Config = serde_yaml::from_str(SAMPLE_CONFIG).unwrap();
        config.validate().unwrap();
        assert_eq!(config.interpreter, "python3");
        assert_eq!(config.sweep_filter().as_deref(), Some("python3"));
    }
}
