//! Playbook and environment description loading

use std::path::Path;
use tracing::info;

use engage_config::{environment_description_path, Environment};
use engage_provider::Provider;

use crate::loop_agent::{Agent, RunResponse};
use crate::Result;

/// Contents of `<dir>/<environment>_environment.md`, or "" when absent
pub async fn load_environment_description(dir: &Path, environment: Environment) -> String {
    let path = environment_description_path(dir, environment);
    match tokio::fs::read_to_string(&path).await {
        Ok(description) => {
            info!("Loading environment description from {}", path.display());
            description
        }
        Err(_) => {
            info!("No environment description found at {}", path.display());
            String::new()
        }
    }
}

pub async fn read_playbook(path: &Path) -> Result<String> {
    Ok(tokio::fs::read_to_string(path).await?)
}

/// Run the agent once with the playbook text as the prompt
pub async fn run_playbook<P: Provider + ?Sized>(
    agent: &Agent<P>,
    path: &Path,
) -> Result<RunResponse> {
    let playbook = read_playbook(path).await?;
    info!("Running playbook {} ({} bytes)", path.display(), playbook.len());

    let response = agent.run(&playbook).await?;
    info!("Response: {}", response.content);
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_environment_description_present() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("test_environment.md"), "# Test lab\nTwo hosts.").unwrap();

        let description = load_environment_description(dir.path(), Environment::Test).await;
        assert_eq!(description, "# Test lab\nTwo hosts.");
    }

    #[tokio::test]
    async fn test_environment_description_missing() {
        let dir = TempDir::new().unwrap();
        let description = load_environment_description(dir.path(), Environment::Production).await;
        assert!(description.is_empty());
    }

    #[tokio::test]
    async fn test_read_playbook_missing_is_io_error() {
        let dir = TempDir::new().unwrap();
        let err = read_playbook(&dir.path().join("nope.md")).await.unwrap_err();
        assert!(matches!(err, crate::AgentError::Io(_)));
    }
}
