//! Engage - AI-powered SOC operations assistant

use clap::{Parser, ValueEnum};
use std::io::IsTerminal;
use std::path::PathBuf;
use tracing::error;
use tracing_subscriber::EnvFilter;

use engage_config::Environment;

mod commands;

use commands::{check_integrations_command, run_command, RunOptions};

#[derive(Parser)]
#[command(name = "engage")]
#[command(about = "Engage - AI-powered SOC operations assistant")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Choose the configuration environment
    #[arg(long, value_enum, default_value_t = EnvironmentArg::Development)]
    environment: EnvironmentArg,

    /// Which playbook to use
    #[arg(long, required_unless_present = "check_integrations")]
    playbook: Option<PathBuf>,

    /// Directory holding config.<environment>.yaml [default: $ENGAGE_CONFIG_DIR or ./engage/files]
    #[arg(long)]
    config_dir: Option<PathBuf>,

    /// Directory holding <environment>_environment.md
    /// [default: $ENGAGE_PLAYBOOK_DIR or ./engage/playbooks]
    #[arg(long)]
    playbook_dir: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Test every configured integration and exit
    #[arg(long)]
    check_integrations: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum EnvironmentArg {
    Development,
    Test,
    Production,
}

impl From<EnvironmentArg> for Environment {
    fn from(arg: EnvironmentArg) -> Self {
        match arg {
            EnvironmentArg::Development => Environment::Development,
            EnvironmentArg::Test => Environment::Test,
            EnvironmentArg::Production => Environment::Production,
        }
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    // stdout carries only the agent's response
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let environment = Environment::from(cli.environment);
    let config_dir = cli.config_dir.unwrap_or_else(engage_config::default_config_dir);
    let playbook_dir = cli
        .playbook_dir
        .unwrap_or_else(engage_config::default_playbook_dir);

    let result = match (cli.check_integrations, cli.playbook) {
        (true, _) => check_integrations_command(environment, &config_dir).await,
        (false, Some(playbook)) => {
            run_command(RunOptions {
                environment,
                playbook,
                config_dir,
                playbook_dir,
            })
            .await
        }
        (false, None) => Err(anyhow::anyhow!("--playbook is required")),
    };

    if let Err(e) = result {
        error!("{:#}", e);
        std::process::exit(1);
    }
}
