//! Agent loop - one request in, one response out

use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use engage_config::Config;
use engage_provider::{ChatParams, Provider, ToolCallDef, ToolChoice, Usage};

use crate::context::ContextBuilder;
use crate::tools::ToolRegistry;
use crate::{AgentError, Result};

pub const AGENT_ID: &str = "engage_agent";

const DEFAULT_DESCRIPTION: &str = "You are an expert in computer security and data analysis.";

/// Agent identity and generation settings
#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub session_id: String,
    pub name: String,
    pub user_id: String,
    pub markdown: bool,
    pub add_datetime_to_instructions: bool,
    pub description: String,
    pub instructions: Vec<String>,
    pub additional_context: String,
    pub max_iterations: u32,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            session_id: AGENT_ID.to_string(),
            name: AGENT_ID.to_string(),
            user_id: AGENT_ID.to_string(),
            markdown: true,
            add_datetime_to_instructions: true,
            description: DEFAULT_DESCRIPTION.to_string(),
            instructions: Vec::new(),
            additional_context: String::new(),
            max_iterations: 10,
            max_tokens: 4096,
            temperature: 0.0,
        }
    }
}

impl AgentSettings {
    /// Defaults with the generation limits taken from `config`
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_iterations: config.max_tool_iterations.max(1),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            ..Default::default()
        }
    }

    pub fn with_additional_context(mut self, context: impl Into<String>) -> Self {
        self.additional_context = context.into();
        self
    }
}

/// Result of [`Agent::run`]
#[derive(Debug, Clone, Serialize)]
pub struct RunResponse {
    pub content: String,
    pub session_id: String,
    pub run_id: String,
    pub model: String,
    pub tool_calls_made: u32,
    pub usage: Usage,
}

/// Conversational agent over any chat backend
pub struct Agent<P: Provider + ?Sized = dyn Provider> {
    provider: Arc<P>,
    tools: ToolRegistry,
    context: ContextBuilder,
    settings: AgentSettings,
}

impl<P: Provider + ?Sized> Agent<P> {
    pub fn new(provider: Arc<P>, tools: ToolRegistry, settings: AgentSettings) -> Self {
        let context = ContextBuilder::new(&settings);
        Self {
            provider,
            tools,
            context,
            settings,
        }
    }

    pub fn settings(&self) -> &AgentSettings {
        &self.settings
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn context(&self) -> &ContextBuilder {
        &self.context
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Submit `prompt` and drive tool calls until the model answers in text
    pub async fn run(&self, prompt: &str) -> Result<RunResponse> {
        let run_id = Uuid::new_v4().to_string();
        let model = self.provider.default_model();
        info!(
            "Run {} started for session {} on {}",
            run_id,
            self.settings.session_id,
            self.provider.name()
        );

        let mut messages = self.context.build_messages(prompt);
        let mut usage = Usage::default();
        let mut tool_calls_made = 0u32;
        let tools = self.tools.definitions();

        for iteration in 1..=self.settings.max_iterations {
            debug!("Agent iteration {}", iteration);

            let params = ChatParams {
                model: model.clone(),
                messages: messages.clone(),
                tools: tools.clone(),
                max_tokens: self.settings.max_tokens,
                temperature: self.settings.temperature,
                tool_choice: ToolChoice::Auto,
            };

            let response = self.provider.chat(params).await?;
            usage.add(response.usage);

            if !response.has_tool_calls() {
                info!("Run {} finished after {} tool calls", run_id, tool_calls_made);
                return Ok(RunResponse {
                    content: response.content.unwrap_or_default(),
                    session_id: self.settings.session_id.clone(),
                    run_id,
                    model,
                    tool_calls_made,
                    usage,
                });
            }

            let defs: Vec<ToolCallDef> =
                response.tool_calls.iter().map(ToolCallDef::from).collect();
            ContextBuilder::add_assistant_message(&mut messages, response.content.as_deref(), defs);

            for call in &response.tool_calls {
                debug!("Executing tool: {}", call.name);
                tool_calls_made += 1;

                let result = match self.tools.execute(&call.name, call.arguments.clone()).await {
                    Ok(output) => output,
                    Err(e) => {
                        warn!("Tool {} failed: {}", call.name, e);
                        format!("Error: {}", e)
                    }
                };

                ContextBuilder::add_tool_result(&mut messages, &call.id, &call.name, &result);
            }
        }

        Err(AgentError::MaxIterations(self.settings.max_iterations))
    }
}
