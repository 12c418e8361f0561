//! Agent tool set

pub mod chronicle;
pub mod clock;
pub mod confluence;
pub mod integration;
pub mod jira;
pub mod slack;

pub use chronicle::ChronicleIntegration;
pub use clock::DayOfWeekTool;
pub use confluence::ConfluenceIntegration;
pub use integration::{Integration, IntegrationAuth, IntegrationClient, IntegrationError};
pub use jira::JiraIntegration;
pub use slack::SlackIntegration;

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use engage_config::Config;
use engage_provider::Tool;

use crate::{AgentError, Result};

/// Error type tools return; converted to [`AgentError::ToolExecution`]
pub type ToolError = Box<dyn std::error::Error + Send + Sync>;

type BoxedTool = Box<dyn ToolTrait + Send + Sync>;

#[async_trait]
pub trait ToolTrait: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters(&self) -> Value;
    async fn execute(&self, args: Value) -> std::result::Result<String, ToolError>;
}

pub fn to_provider_tool(tool: &dyn ToolTrait) -> Tool {
    Tool::new(tool.name(), tool.description(), tool.parameters())
}

/// Tools by name, iterated in name order
pub struct ToolRegistry {
    tools: BTreeMap<String, BoxedTool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: BTreeMap::new(),
        }
    }

    pub fn register<T: ToolTrait + 'static>(&mut self, tool: T) {
        let name = tool.name().to_string();
        self.tools.insert(name, Box::new(tool));
    }

    pub fn get(&self, name: &str) -> Option<&(dyn ToolTrait + Send + Sync)> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    pub fn has(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn definitions(&self) -> Vec<Tool> {
        self.tools
            .values()
            .map(|t| to_provider_tool(t.as_ref()))
            .collect()
    }

    pub async fn execute(&self, name: &str, args: Value) -> Result<String> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| AgentError::ToolNotFound(name.to_string()))?;
        tool.execute(args)
            .await
            .map_err(|e| AgentError::ToolExecution(format!("{}: {}", name, e)))
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Integrations with a section in `config`
pub struct Integrations {
    pub jira: Option<Arc<JiraIntegration>>,
    pub confluence: Option<Arc<ConfluenceIntegration>>,
    pub slack: Option<Arc<SlackIntegration>>,
    pub chronicle: Option<Arc<ChronicleIntegration>>,
}

impl Integrations {
    pub fn from_config(config: &Config) -> Self {
        Self {
            jira: config.jira.as_ref().map(|c| Arc::new(JiraIntegration::new(c))),
            confluence: config
                .confluence
                .as_ref()
                .map(|c| Arc::new(ConfluenceIntegration::new(c))),
            slack: config.slack.as_ref().map(|c| Arc::new(SlackIntegration::new(c))),
            chronicle: config
                .chronicle
                .as_ref()
                .map(|c| Arc::new(ChronicleIntegration::new(c))),
        }
    }

    pub fn all(&self) -> Vec<Arc<dyn Integration>> {
        let mut all: Vec<Arc<dyn Integration>> = Vec::new();
        if let Some(jira) = &self.jira {
            all.push(jira.clone());
        }
        if let Some(confluence) = &self.confluence {
            all.push(confluence.clone());
        }
        if let Some(slack) = &self.slack {
            all.push(slack.clone());
        }
        if let Some(chronicle) = &self.chronicle {
            all.push(chronicle.clone());
        }
        all
    }
}

/// Every integration with a config section, for connection checks
pub fn configured_integrations(config: &Config) -> Vec<Arc<dyn Integration>> {
    Integrations::from_config(config).all()
}

/// `day_of_week` plus the tools of every configured integration
pub fn register_default_tools(registry: &mut ToolRegistry, config: &Config) {
    registry.register(DayOfWeekTool);

    let integrations = Integrations::from_config(config);
    if let Some(jira) = integrations.jira {
        jira::register(registry, jira);
    }
    if let Some(confluence) = integrations.confluence {
        confluence::register(registry, confluence);
    }
    if let Some(slack) = integrations.slack {
        slack::register(registry, slack);
    }
    if let Some(chronicle) = integrations.chronicle {
        chronicle::register(registry, chronicle);
    }

    debug!("Registered tools: {}", registry.names().join(", "));
}

/// Parse tool arguments into `T`
pub(crate) fn parse_args<T: serde::de::DeserializeOwned>(
    args: Value,
) -> std::result::Result<T, ToolError> {
    let args = if args.is_null() {
        Value::Object(serde_json::Map::new())
    } else {
        args
    };
    serde_json::from_value(args)
        .map_err(|e| IntegrationError::InvalidArguments(e.to_string()).into())
}

/// Pretty JSON for the model
pub(crate) fn to_output(value: &Value) -> std::result::Result<String, ToolError> {
    Ok(serde_json::to_string_pretty(value)?)
}
