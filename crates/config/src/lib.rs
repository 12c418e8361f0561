//! Engage configuration
//!
//! Loads the per-environment YAML file (`config.<environment>.yaml`) and
//! exposes typed accessors over the keys the harness understands. Unknown
//! keys are kept in [`Config::extra`].

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, error, info, warn};

pub mod paths;

pub use paths::{
    config_path, default_config_dir, default_playbook_dir, environment_description_path,
};

/// Location used for Vertex AI when the config leaves it unset
pub const DEFAULT_LOCATION: &str = "us-central1";

/// Errors raised while loading configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config read failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse failed: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("config not found: {0}")]
    NotFound(PathBuf),

    #[error("unknown environment '{0}' (expected development, test or production)")]
    UnknownEnvironment(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Deployment environment selecting which config file is read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Environment {
    #[default]
    Development,
    Test,
    Production,
}

impl Environment {
    pub const ALL: [Environment; 3] = [
        Environment::Development,
        Environment::Test,
        Environment::Production,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Test => "test",
            Environment::Production => "production",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "development" => Ok(Environment::Development),
            "test" => Ok(Environment::Test),
            "production" => Ok(Environment::Production),
            other => Err(ConfigError::UnknownEnvironment(other.to_string())),
        }
    }
}

/// `model:` section
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ModelConfig {
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub model_name: Option<String>,
}

/// `jira:` section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JiraConfig {
    pub url: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub api_token: String,
    #[serde(default = "default_project_key")]
    pub project_key: String,
}

fn default_project_key() -> String {
    "SEC".to_string()
}

/// `confluence:` section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfluenceConfig {
    pub url: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub api_token: String,
    #[serde(default = "default_security_space")]
    pub security_space_key: String,
    #[serde(default = "default_playbook_space")]
    pub playbook_space_key: String,
    #[serde(default = "default_kb_labels")]
    pub knowledge_base_labels: Vec<String>,
}

fn default_security_space() -> String {
    "SEC".to_string()
}

fn default_playbook_space() -> String {
    "PLAYBOOKS".to_string()
}

fn default_kb_labels() -> Vec<String> {
    vec![
        "security".to_string(),
        "kb".to_string(),
        "procedures".to_string(),
    ]
}

/// `slack:` section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlackConfig {
    pub bot_token: String,
    #[serde(default = "default_channel")]
    pub default_channel: String,
    #[serde(default = "default_slack_api")]
    pub api_base: String,
    /// Where alerts and notifications go when no channel is given
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_channel: Option<String>,
    #[serde(default = "default_incident_prefix")]
    pub incident_channel_prefix: String,
    /// Mentioned on high and critical requests and alerts
    #[serde(default)]
    pub escalation_users: Vec<String>,
}

impl SlackConfig {
    /// `security_channel`, else `default_channel`
    pub fn security_channel(&self) -> &str {
        non_empty(self.security_channel.as_deref()).unwrap_or(self.default_channel.as_str())
    }
}

fn default_incident_prefix() -> String {
    "incident-".to_string()
}

fn default_channel() -> String {
    "#security".to_string()
}

fn default_slack_api() -> String {
    "https://slack.com/api".to_string()
}

/// `chronicle:` section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChronicleConfig {
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
}

/// Root configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gemini_api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub openai_api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub openai_api_base: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ollama_host: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default = "default_max_tool_iterations")]
    pub max_tool_iterations: u32,
    #[serde(
        default,
        deserialize_with = "jira_section",
        skip_serializing_if = "Option::is_none"
    )]
    pub jira: Option<JiraConfig>,
    #[serde(
        default,
        deserialize_with = "confluence_section",
        skip_serializing_if = "Option::is_none"
    )]
    pub confluence: Option<ConfluenceConfig>,
    #[serde(
        default,
        deserialize_with = "slack_section",
        skip_serializing_if = "Option::is_none"
    )]
    pub slack: Option<SlackConfig>,
    #[serde(
        default,
        deserialize_with = "chronicle_section",
        skip_serializing_if = "Option::is_none"
    )]
    pub chronicle: Option<ChronicleConfig>,
    /// Keys the harness does not interpret
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

type Section<T, E> = std::result::Result<Option<T>, E>;

/// Parse an integration section on its own so a broken one only disables
/// that integration.
fn lenient_section<'de, D, T>(deserializer: D, section: &str) -> Section<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Option::<serde_yaml::Value>::deserialize(deserializer)?;
    match value {
        None | Some(serde_yaml::Value::Null) => Ok(None),
        Some(value) => match serde_yaml::from_value(value) {
            Ok(parsed) => Ok(Some(parsed)),
            Err(e) => {
                warn!("Ignoring {} section: {}", section, e);
                Ok(None)
            }
        },
    }
}

fn jira_section<'de, D: Deserializer<'de>>(d: D) -> Section<JiraConfig, D::Error> {
    lenient_section(d, "jira")
}

fn confluence_section<'de, D: Deserializer<'de>>(d: D) -> Section<ConfluenceConfig, D::Error> {
    lenient_section(d, "confluence")
}

fn slack_section<'de, D: Deserializer<'de>>(d: D) -> Section<SlackConfig, D::Error> {
    lenient_section(d, "slack")
}

fn chronicle_section<'de, D: Deserializer<'de>>(d: D) -> Section<ChronicleConfig, D::Error> {
    lenient_section(d, "chronicle")
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_max_tool_iterations() -> u32 {
    10
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model: ModelConfig::default(),
            gemini_api_key: None,
            location: None,
            project_id: None,
            openai_api_key: None,
            openai_api_base: None,
            ollama_host: None,
            max_tokens: default_max_tokens(),
            temperature: 0.0,
            max_tool_iterations: default_max_tool_iterations(),
            jira: None,
            confluence: None,
            slack: None,
            chronicle: None,
            extra: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Load the config for `environment` from `dir`.
    ///
    /// Never fails: a missing or malformed file is logged and an empty
    /// config is returned, leaving downstream code to cope with absent keys.
    pub async fn load(environment: Environment, dir: &Path) -> Self {
        let path = config_path(dir, environment);
        match Self::load_from(&path).await {
            Ok(config) => {
                info!("Loaded {} configuration from {:?}", environment, path);
                config
            }
            Err(e) => {
                error!("Exception retrieving config: {}", e);
                Config::default()
            }
        }
    }

    /// Load from a specific file, reporting every failure
    pub async fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        debug!("Reading config from {:?}", path);
        let content = tokio::fs::read_to_string(path).await?;
        Self::from_yaml(&content)
    }

    /// Parse YAML text. Blank documents yield the default config.
    pub fn from_yaml(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Config::default());
        }
        let value: serde_yaml::Value = serde_yaml::from_str(content)?;
        if value.is_null() {
            return Ok(Config::default());
        }
        Ok(serde_yaml::from_value(value)?)
    }

    /// Write the config back out as YAML
    pub async fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let content = serde_yaml::to_string(self)?;
        tokio::fs::write(path, content).await?;
        Ok(())
    }

    /// Selected model backend, lowercased. `None` means the default (Google).
    pub fn provider(&self) -> Option<String> {
        non_empty(self.model.provider.as_deref()).map(|p| p.to_lowercase())
    }

    /// Model identifier from `model.model_name`, falling back to a
    /// top-level `model_name` key.
    pub fn model_name(&self) -> Option<String> {
        if let Some(name) = non_empty(self.model.model_name.as_deref()) {
            return Some(name.to_string());
        }
        self.extra
            .get("model_name")
            .and_then(|v| v.as_str())
            .and_then(|s| non_empty(Some(s)))
            .map(str::to_string)
    }

    /// Gemini API key, ignoring an empty value
    pub fn gemini_api_key(&self) -> Option<String> {
        non_empty(self.gemini_api_key.as_deref()).map(str::to_string)
    }

    /// Vertex AI location, `us-central1` when unset
    pub fn location(&self) -> String {
        non_empty(self.location.as_deref())
            .unwrap_or(DEFAULT_LOCATION)
            .to_string()
    }

    pub fn project_id(&self) -> Option<String> {
        non_empty(self.project_id.as_deref()).map(str::to_string)
    }

    /// Look up an uninterpreted top-level key
    pub fn get(&self, key: &str) -> Option<&serde_yaml::Value> {
        self.extra.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.model.provider.is_none()
            && self.model.model_name.is_none()
            && self.gemini_api_key.is_none()
            && self.location.is_none()
            && self.jira.is_none()
            && self.confluence.is_none()
            && self.slack.is_none()
            && self.chronicle.is_none()
            && self.extra.is_empty()
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_round_trip_names() {
        for env in Environment::ALL {
            assert_eq!(env.as_str().parse::<Environment>().unwrap(), env);
        }
        assert_eq!(Environment::default(), Environment::Development);
    }

    #[test]
    fn test_environment_rejects_unknown() {
        let err = "staging".parse::<Environment>().unwrap_err();
        assert!(err.to_string().contains("staging"));
    }

    #[test]
    fn test_blank_yaml_is_default() {
        assert!(Config::from_yaml("").unwrap().is_empty());
        assert!(Config::from_yaml("   \n").unwrap().is_empty());
        assert!(Config::from_yaml("~").unwrap().is_empty());
    }

    #[test]
    fn test_provider_is_normalised() {
        let config = Config::from_yaml("model:\n  provider: \" OpenAI \"\n").unwrap();
        assert_eq!(config.provider(), Some("openai".to_string()));

        let config = Config::from_yaml("model:\n  provider: \"\"\n").unwrap();
        assert_eq!(config.provider(), None);
    }

    #[test]
    fn test_model_name_falls_back_to_top_level() {
        let config = Config::from_yaml("model_name: gemini-1.5-pro\n").unwrap();
        assert_eq!(config.model_name(), Some("gemini-1.5-pro".to_string()));

        let config = Config::from_yaml(
            "model_name: ignored\nmodel:\n  model_name: gemini-2.0-flash\n",
        )
        .unwrap();
        assert_eq!(config.model_name(), Some("gemini-2.0-flash".to_string()));
    }

    #[test]
    fn test_location_default() {
        assert_eq!(Config::default().location(), "us-central1");
        let config = Config::from_yaml("location: \"\"\n").unwrap();
        assert_eq!(config.location(), "us-central1");
        let config = Config::from_yaml("location: europe-west1\n").unwrap();
        assert_eq!(config.location(), "europe-west1");
    }

    #[test]
    fn test_empty_api_key_is_none() {
        let config = Config::from_yaml("gemini_api_key: \"\"\n").unwrap();
        assert_eq!(config.gemini_api_key(), None);
        let config = Config::from_yaml("gemini_api_key:\n").unwrap();
        assert_eq!(config.gemini_api_key(), None);
    }
}
