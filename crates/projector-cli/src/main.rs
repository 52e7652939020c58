use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use projector_bootstrap::{BootstrapConfig, ConfigLoadError, ErrorReport, TerminationHandle};
use tracing::{info, warn};

mod guard;
mod logging;
mod session;

use session::{Outcome, SessionPlan};

#[derive(Parser)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enables debug mode
    #[arg(short, long, action = clap::ArgAction::Count)]
    debug: u8,

    /// Config file (default: <config dir>/projector/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Prelude script, overrides `prelude.path`
    #[arg(short, long)]
    prelude: Option<PathBuf>,

    /// User script to run against the built template
    #[arg(short, long)]
    script: Option<PathBuf>,

    /// Module directory, overrides `modules.dir`
    #[arg(short, long)]
    modules: Option<PathBuf>,

    /// Argument passed to the template factory (repeatable)
    #[arg(short = 'a', long = "arg")]
    factory_args: Vec<String>,

    /// Time budget in milliseconds, overrides `execution.timeout_ms`
    #[arg(short, long)]
    timeout_ms: Option<u64>,

    /// Also log to a file in the data directory
    #[arg(long)]
    log_file: bool,
}

fn load_config(path: Option<&Path>) -> Result<BootstrapConfig> {
    let loaded = match path {
        Some(path) => BootstrapConfig::load_from(path),
        None => BootstrapConfig::load(),
    };

    match loaded {
        Ok(config) => Ok(config),
        Err(ConfigLoadError::NotFound) if path.is_none() => {
            info!("No config file found, using defaults");
            Ok(BootstrapConfig::default())
        }
        Err(e) => Err(e).context("Failed to load config"),
    }
}

fn session_plan(cli: Cli, mut config: BootstrapConfig) -> Result<SessionPlan> {
    if cli.modules.is_some() {
        config.modules.dir = cli.modules;
    }
    if cli.timeout_ms.is_some() {
        config.execution.timeout_ms = cli.timeout_ms;
    }

    let prelude = cli
        .prelude
        .or_else(|| config.prelude.path.clone())
        .context("No prelude given: pass --prelude or set prelude.path in the config")?;

    Ok(SessionPlan {
        timeout: config.execution.timeout_ms.map(Duration::from_millis),
        config,
        prelude,
        script: cli.script,
        factory_args: cli.factory_args,
    })
}

/// Stop script execution on Ctrl-C or once the whole run overruns `timeout`
async fn watch(termination: TerminationHandle, timeout: Option<Duration>) {
    let deadline = async {
        match timeout {
            Some(timeout) => tokio::time::sleep(timeout).await,
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => warn!("Interrupted, terminating script execution"),
        _ = deadline => warn!("Run exceeded {:?}, terminating script execution", timeout),
    }
    termination.terminate();
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let _log_guard =
        logging::init_logging(cli.debug, cli.log_file).context("Failed to initialize logging")?;

    let config = load_config(cli.config.as_deref())?;
    let plan = session_plan(cli, config)?;
    info!("Bootstrapping prelude {}", plan.prelude.display());

    let termination = TerminationHandle::new();
    let watcher = tokio::spawn(watch(termination.clone(), plan.timeout));

    // The engine is single-threaded; it lives and dies on one blocking thread
    let outcome = tokio::task::spawn_blocking(move || session::run(&plan, termination))
        .await
        .context("Script worker panicked")??;
    watcher.abort();

    match outcome {
        Outcome::Completed { template, result } => {
            println!("template: {}", template.join(", "));
            if let Some(result) = result {
                println!("result: {}", result);
            }
            Ok(ExitCode::SUCCESS)
        }
        Outcome::Failed(report) => {
            match &report {
                ErrorReport::Terminated => eprintln!("Script execution was terminated"),
                ErrorReport::Exception(message) => eprintln!("Error: {}", message),
            }
            Ok(ExitCode::from(report.code() as u8))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_flags_override_config() {
        let cli = Cli::parse_from([
            "projector",
            "--prelude",
            "flag.lua",
            "--modules",
            "mods",
            "--timeout-ms",
            "250",
            "-a",
            "orders",
            "-a",
            "eu",
        ]);
        let mut config = BootstrapConfig::default();
        config.prelude.path = Some(PathBuf::from("config.lua"));

        let plan = session_plan(cli, config).unwrap();

        assert_eq!(plan.prelude, PathBuf::from("flag.lua"));
        assert_eq!(plan.config.modules.dir, Some(PathBuf::from("mods")));
        assert_eq!(plan.timeout, Some(Duration::from_millis(250)));
        assert_eq!(plan.factory_args, vec!["orders".to_string(), "eu".to_string()]);
    }

    #[test]
    fn test_prelude_falls_back_to_config() {
        let cli = Cli::parse_from(["projector"]);
        let mut config = BootstrapConfig::default();
        config.prelude.path = Some(PathBuf::from("config.lua"));
        config.execution.timeout_ms = Some(1000);

        let plan = session_plan(cli, config).unwrap();

        assert_eq!(plan.prelude, PathBuf::from("config.lua"));
        assert_eq!(plan.timeout, Some(Duration::from_secs(1)));
    }

    #[test]
    fn test_missing_prelude_is_an_error() {
        let cli = Cli::parse_from(["projector"]);

        assert!(session_plan(cli, BootstrapConfig::default()).is_err());
    }

    #[test]
    fn test_explicit_config_must_exist() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");

        assert!(load_config(Some(&path)).is_err());

        fs::write(&path, "[prelude]\nname = \"1Prelude\"\n").unwrap();
        assert_eq!(load_config(Some(&path)).unwrap().prelude.name, "1Prelude");
    }
}
