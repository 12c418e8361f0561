//! Tests for config and playbook locations

use engage_config::{config_path, environment_description_path, Config, Environment};
use std::path::Path;

fn temp_dir() -> tempfile::TempDir {
    tempfile::tempdir().expect("Failed to create temp dir")
}

#[test]
fn test_config_path_per_environment() {
    let dir = Path::new("engage/files");
    assert_eq!(
        config_path(dir, Environment::Development),
        dir.join("config.development.yaml")
    );
    assert_eq!(
        config_path(dir, Environment::Test),
        dir.join("config.test.yaml")
    );
    assert_eq!(
        config_path(dir, Environment::Production),
        dir.join("config.production.yaml")
    );
}

#[test]
fn test_environment_description_path() {
    let dir = Path::new("playbooks");
    assert_eq!(
        environment_description_path(dir, Environment::Test),
        dir.join("test_environment.md")
    );
}

#[tokio::test]
async fn test_load_reads_environment_file() {
    let temp = temp_dir();
    std::fs::write(
        temp.path().join("config.test.yaml"),
        "model:\n  provider: ollama\n  model_name: llama3.1\n",
    )
    .unwrap();
    std::fs::write(
        temp.path().join("config.production.yaml"),
        "model:\n  provider: openai\n",
    )
    .unwrap();

    let config = Config::load(Environment::Test, temp.path()).await;
    assert_eq!(config.provider(), Some("ollama".to_string()));
    assert_eq!(config.model_name(), Some("llama3.1".to_string()));
}

#[tokio::test]
async fn test_load_missing_file_falls_back_to_empty() {
    let temp = temp_dir();

    let config = Config::load(Environment::Production, temp.path()).await;
    assert!(config.is_empty());
}

#[tokio::test]
async fn test_load_malformed_file_falls_back_to_empty() {
    let temp = temp_dir();
    std::fs::write(temp.path().join("config.development.yaml"), "model: [").unwrap();

    let config = Config::load(Environment::Development, temp.path()).await;
    assert!(config.is_empty());
}

#[tokio::test]
async fn test_load_from_reports_missing_file() {
    let temp = temp_dir();
    let path = temp.path().join("config.test.yaml");

    let err = Config::load_from(&path).await.unwrap_err();
    assert!(matches!(err, engage_config::ConfigError::NotFound(p) if p == path));
}

#[tokio::test]
async fn test_save_then_load() {
    let temp = temp_dir();
    let path = temp.path().join("nested").join("config.test.yaml");

    let mut config = Config::default();
    config.model.provider = Some("openai".to_string());
    config.location = Some("asia-east1".to_string());
    config.save_to(&path).await.unwrap();

    let loaded = Config::load_from(&path).await.unwrap();
    assert_eq!(loaded.provider(), Some("openai".to_string()));
    assert_eq!(loaded.location(), "asia-east1");
}
