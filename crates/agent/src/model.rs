//! Model selection
//!
//! `model.provider` picks one of three construction branches: `openai`,
//! `ollama`, or anything else for Google Gemini. The Gemini branch then
//! chooses between an API key and workload identity.

use std::sync::Arc;
use tracing::info;

use engage_config::Config;
use engage_provider::Provider;

use crate::{AgentError, Result};

pub const DEFAULT_GEMINI_MODEL: &str = "gemini-1.5-flash";

/// How the Gemini client authenticates
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GeminiAuthPlan {
    ApiKey(String),
    WorkloadIdentity {
        location: String,
        project_id: Option<String>,
    },
}

/// Which backend to construct, decided from config alone
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelPlan {
    OpenAi { model_name: Option<String> },
    Ollama { model_name: Option<String> },
    Gemini { model_name: String, auth: GeminiAuthPlan },
}

/// Decide the backend without constructing anything
pub fn plan_model(config: &Config) -> ModelPlan {
    let model_name = config.model_name();
    match config.provider().as_deref() {
        Some("openai") => ModelPlan::OpenAi { model_name },
        Some("ollama") => ModelPlan::Ollama { model_name },
        _ => {
            let auth = match config.gemini_api_key() {
                Some(key) => GeminiAuthPlan::ApiKey(key),
                None => GeminiAuthPlan::WorkloadIdentity {
                    location: config.location(),
                    project_id: config.project_id(),
                },
            };
            ModelPlan::Gemini {
                model_name: model_name.unwrap_or_else(|| DEFAULT_GEMINI_MODEL.to_string()),
                auth,
            }
        }
    }
}

/// Constructs one backend per branch
pub trait ModelFactory {
    fn openai(&self, model_name: Option<String>) -> Result<Arc<dyn Provider>>;
    fn ollama(&self, model_name: Option<String>) -> Result<Arc<dyn Provider>>;
    fn gemini(&self, model_name: String, auth: GeminiAuthPlan) -> Result<Arc<dyn Provider>>;
}

/// Pick and build the model client for `config`
pub fn select_model(config: &Config, factory: &dyn ModelFactory) -> Result<Arc<dyn Provider>> {
    let provider = match plan_model(config) {
        ModelPlan::OpenAi { model_name } => factory.openai(model_name)?,
        ModelPlan::Ollama { model_name } => factory.ollama(model_name)?,
        ModelPlan::Gemini { model_name, auth } => factory.gemini(model_name, auth)?,
    };
    info!(
        "Using {} model {}",
        provider.name(),
        provider.default_model()
    );
    Ok(provider)
}

/// Builds the real HTTP backends
#[derive(Debug, Clone, Default)]
pub struct DefaultModelFactory {
    openai_api_key: Option<String>,
    openai_api_base: Option<String>,
    ollama_host: Option<String>,
}

impl DefaultModelFactory {
    pub fn from_config(config: &Config) -> Self {
        Self {
            openai_api_key: config.openai_api_key.clone(),
            openai_api_base: config.openai_api_base.clone(),
            ollama_host: config.ollama_host.clone(),
        }
    }
}

impl ModelFactory for DefaultModelFactory {
    fn openai(&self, model_name: Option<String>) -> Result<Arc<dyn Provider>> {
        build_openai(self, model_name)
    }

    fn ollama(&self, model_name: Option<String>) -> Result<Arc<dyn Provider>> {
        build_ollama(self, model_name)
    }

    fn gemini(&self, model_name: String, auth: GeminiAuthPlan) -> Result<Arc<dyn Provider>> {
        build_gemini(model_name, auth)
    }
}

#[allow(dead_code)]
fn unavailable(provider: &str) -> AgentError {
    AgentError::ProviderUnavailable {
        provider: provider.to_string(),
        hint: format!("rebuild with `cargo build --features {}`", provider),
    }
}

#[cfg(feature = "openai")]
fn build_openai(
    factory: &DefaultModelFactory,
    model_name: Option<String>,
) -> Result<Arc<dyn Provider>> {
    Ok(Arc::new(engage_provider::OpenAiProvider::new(
        factory.openai_api_key.clone(),
        factory.openai_api_base.clone(),
        model_name,
    )))
}

#[cfg(not(feature = "openai"))]
fn build_openai(_: &DefaultModelFactory, _: Option<String>) -> Result<Arc<dyn Provider>> {
    Err(unavailable("openai"))
}

#[cfg(feature = "ollama")]
fn build_ollama(
    factory: &DefaultModelFactory,
    model_name: Option<String>,
) -> Result<Arc<dyn Provider>> {
    Ok(Arc::new(engage_provider::OllamaProvider::new(
        factory.ollama_host.clone(),
        model_name,
    )))
}

#[cfg(not(feature = "ollama"))]
fn build_ollama(_: &DefaultModelFactory, _: Option<String>) -> Result<Arc<dyn Provider>> {
    Err(unavailable("ollama"))
}

#[cfg(feature = "gemini")]
fn build_gemini(model_name: String, auth: GeminiAuthPlan) -> Result<Arc<dyn Provider>> {
    use engage_provider::{GeminiAuth, GeminiProvider, TokenSource};

    let auth = match auth {
        GeminiAuthPlan::ApiKey(key) => GeminiAuth::ApiKey(key),
        GeminiAuthPlan::WorkloadIdentity {
            location,
            project_id,
        } => GeminiAuth::WorkloadIdentity {
            project_id,
            location,
            token_source: TokenSource::discover(),
        },
    };
    Ok(Arc::new(GeminiProvider::new(model_name, auth)))
}

#[cfg(not(feature = "gemini"))]
fn build_gemini(_: String, _: GeminiAuthPlan) -> Result<Arc<dyn Provider>> {
    Err(unavailable("gemini"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(yaml: &str) -> Config {
        Config::from_yaml(yaml).unwrap()
    }

    #[test]
    fn test_plan_openai() {
        let plan = plan_model(&config("model:\n  provider: openai\n  model_name: gpt-4o\n"));
        assert_eq!(
            plan,
            ModelPlan::OpenAi {
                model_name: Some("gpt-4o".to_string())
            }
        );
    }

    #[test]
    fn test_plan_ollama_without_model_name() {
        let plan = plan_model(&config("model:\n  provider: ollama\n"));
        assert_eq!(plan, ModelPlan::Ollama { model_name: None });
    }

    #[test]
    fn test_plan_absent_provider_is_gemini() {
        let plan = plan_model(&Config::default());
        assert_eq!(
            plan,
            ModelPlan::Gemini {
                model_name: DEFAULT_GEMINI_MODEL.to_string(),
                auth: GeminiAuthPlan::WorkloadIdentity {
                    location: "us-central1".to_string(),
                    project_id: None,
                },
            }
        );
    }

    #[test]
    fn test_plan_survives_broken_integration_section() {
        let plan = plan_model(&config(
            "model:\n  provider: openai\njira:\n  username: analyst\n",
        ));
        assert_eq!(plan, ModelPlan::OpenAi { model_name: None });
    }

    #[test]
    fn test_plan_unknown_provider_is_gemini() {
        let plan = plan_model(&config("model:\n  provider: google\n"));
        assert!(matches!(plan, ModelPlan::Gemini { .. }));
    }

    #[test]
    fn test_plan_gemini_api_key() {
        let plan = plan_model(&config(
            "model:\n  model_name: gemini-pro\ngemini_api_key: test_api_key\nlocation: europe-west1\n",
        ));
        assert_eq!(
            plan,
            ModelPlan::Gemini {
                model_name: "gemini-pro".to_string(),
                auth: GeminiAuthPlan::ApiKey("test_api_key".to_string()),
            }
        );
    }

    #[test]
    fn test_plan_gemini_empty_key_uses_custom_location() {
        let plan = plan_model(&config(
            "model:\n  model_name: gemini-1.5-pro\ngemini_api_key: \"\"\nlocation: europe-west1\n",
        ));
        assert_eq!(
            plan,
            ModelPlan::Gemini {
                model_name: "gemini-1.5-pro".to_string(),
                auth: GeminiAuthPlan::WorkloadIdentity {
                    location: "europe-west1".to_string(),
                    project_id: None,
                },
            }
        );
    }

    #[test]
    #[cfg(all(feature = "openai", feature = "ollama", feature = "gemini"))]
    fn test_default_factory_builds_each_backend() {
        let factory = DefaultModelFactory::from_config(&config(
            "openai_api_key: sk-test\nollama_host: http://gpu:11434\n",
        ));

        let openai = factory.openai(Some("gpt-4o".to_string())).unwrap();
        assert_eq!(openai.name(), "openai");
        assert_eq!(openai.default_model(), "gpt-4o");

        let ollama = factory.ollama(None).unwrap();
        assert_eq!(ollama.name(), "ollama");

        let gemini = factory
            .gemini(
                "gemini-pro".to_string(),
                GeminiAuthPlan::ApiKey("k".to_string()),
            )
            .unwrap();
        assert_eq!(gemini.name(), "gemini");
    }
}
