//! Engage command implementations

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use tracing::info;

use engage_agent::tools::configured_integrations;
use engage_agent::{build_agent, run_playbook, DefaultModelFactory};
use engage_config::{Config, Environment};

pub struct RunOptions {
    pub environment: Environment,
    pub playbook: PathBuf,
    pub config_dir: PathBuf,
    pub playbook_dir: PathBuf,
}

/// Load config, build the agent, run the playbook, print the response
pub async fn run_command(options: RunOptions) -> Result<()> {
    let config = Config::load(options.environment, &options.config_dir).await;

    if !options.playbook.exists() {
        bail!("Playbook {} not found", options.playbook.display());
    }

    let factory = DefaultModelFactory::from_config(&config);
    let agent = build_agent(&config, options.environment, &options.playbook_dir, &factory)
        .await
        .context("Could not create agent")?;

    let response = run_playbook(&agent, &options.playbook)
        .await
        .with_context(|| format!("Playbook {} failed", options.playbook.display()))?;

    info!(
        "Finished in {} tool calls, {} tokens",
        response.tool_calls_made, response.usage.total_tokens
    );
    println!("{}", response.content);
    Ok(())
}

/// Test each configured integration and print one status line per service
pub async fn check_integrations_command(environment: Environment, config_dir: &Path) -> Result<()> {
    let config = Config::load(environment, config_dir).await;
    let integrations = configured_integrations(&config);

    if integrations.is_empty() {
        println!("No integrations configured for {}", environment);
        return Ok(());
    }

    println!("Integration  Status");
    println!("-----------  ------");
    let mut failed = 0;
    for integration in &integrations {
        match integration.test_connection().await {
            Ok(()) => println!("{:<11}  OK", integration.name()),
            Err(e) => {
                failed += 1;
                println!("{:<11}  FAILED ({})", integration.name(), e);
            }
        }
    }

    if failed > 0 {
        bail!("{} of {} integrations failed", failed, integrations.len());
    }
    Ok(())
}
