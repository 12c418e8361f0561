//! Engage agent
//!
//! Wires a model backend, a tool set and the environment description into a
//! conversational agent, and runs playbooks through it.

use thiserror::Error;

pub mod builder;
pub mod context;
pub mod loop_agent;
pub mod model;
pub mod playbook;
pub mod tools;

pub use builder::build_agent;
pub use context::ContextBuilder;
pub use loop_agent::{Agent, AgentSettings, RunResponse};
pub use model::{
    plan_model, select_model, DefaultModelFactory, GeminiAuthPlan, ModelFactory, ModelPlan,
};
pub use playbook::{load_environment_description, read_playbook, run_playbook};
pub use tools::{ToolRegistry, ToolTrait};

/// Agent errors
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("tool not found: {0}")]
    ToolNotFound(String),

    #[error("tool failed: {0}")]
    ToolExecution(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("model error: {0}")]
    Provider(#[from] engage_provider::ProviderError),

    #[error("gave up after {0} model turns")]
    MaxIterations(u32),

    #[error("{provider} support is not compiled in; {hint}")]
    ProviderUnavailable { provider: String, hint: String },
}

pub type Result<T> = std::result::Result<T, AgentError>;
