//! Agent assembly from configuration

use std::path::Path;
use tracing::debug;

use engage_config::{Config, Environment};

use crate::loop_agent::{Agent, AgentSettings};
use crate::model::{select_model, ModelFactory};
use crate::playbook::load_environment_description;
use crate::tools::{register_default_tools, ToolRegistry};
use crate::Result;

/// Model from `factory`, default tools, and the environment description as
/// additional context
pub async fn build_agent(
    config: &Config,
    environment: Environment,
    playbook_dir: &Path,
    factory: &dyn ModelFactory,
) -> Result<Agent> {
    let provider = select_model(config, factory)?;

    let description = load_environment_description(playbook_dir, environment).await;
    let settings = AgentSettings::from_config(config).with_additional_context(description);

    let mut tools = ToolRegistry::new();
    register_default_tools(&mut tools, config);
    debug!("Agent {} has {} tools", settings.name, tools.len());

    Ok(Agent::new(provider, tools, settings))
}
