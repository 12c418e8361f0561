//! Google application-default credentials for Vertex AI

use reqwest::Client;
use serde::Deserialize;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

use crate::{ProviderError, Result};

pub const DEFAULT_METADATA_HOST: &str = "http://metadata.google.internal";

const TOKEN_PATH: &str = "/computeMetadata/v1/instance/service-accounts/default/token";
const PROJECT_PATH: &str = "/computeMetadata/v1/project/project-id";

/// Where bearer tokens come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenSource {
    /// Pre-minted token, e.g. from `gcloud auth print-access-token`
    Static(String),
    /// GCE / GKE metadata server (workload identity)
    Metadata { base_url: String },
}

impl TokenSource {
    /// `GOOGLE_OAUTH_ACCESS_TOKEN` if set, else the metadata server
    /// (`GCE_METADATA_HOST` overrides its address)
    pub fn discover() -> Self {
        if let Ok(token) = std::env::var("GOOGLE_OAUTH_ACCESS_TOKEN") {
            if !token.is_empty() {
                return TokenSource::Static(token);
            }
        }
        let base_url = std::env::var("GCE_METADATA_HOST")
            .ok()
            .filter(|h| !h.is_empty())
            .map(|h| {
                if h.starts_with("http") {
                    h
                } else {
                    format!("http://{}", h)
                }
            })
            .unwrap_or_else(|| DEFAULT_METADATA_HOST.to_string());
        TokenSource::Metadata { base_url }
    }
}

#[derive(Deserialize)]
struct MetadataToken {
    access_token: String,
    #[serde(default)]
    expires_in: u64,
}

/// Token source plus a cache of the last minted token
pub struct Credentials {
    source: TokenSource,
    cached: Mutex<Option<(String, Instant)>>,
}

impl Credentials {
    pub fn new(source: TokenSource) -> Self {
        Self {
            source,
            cached: Mutex::new(None),
        }
    }

    pub fn source(&self) -> &TokenSource {
        &self.source
    }

    /// Current bearer token, refreshed a minute before expiry
    pub async fn token(&self, client: &Client) -> Result<String> {
        let base_url = match &self.source {
            TokenSource::Static(token) => return Ok(token.clone()),
            TokenSource::Metadata { base_url } => base_url,
        };

        let mut cached = self.cached.lock().await;
        if let Some((token, expires_at)) = cached.as_ref() {
            if Instant::now() < *expires_at {
                return Ok(token.clone());
            }
        }

        debug!("Fetching access token from metadata server");
        let response = client
            .get(format!("{}{}", base_url, TOKEN_PATH))
            .header("Metadata-Flavor", "Google")
            .send()
            .await
            .map_err(|e| ProviderError::Auth(format!("metadata server unreachable: {}", e)))?;

        if !response.status().is_success() {
            return Err(ProviderError::Auth(format!(
                "metadata server returned {}",
                response.status()
            )));
        }

        let minted: MetadataToken = response.json().await?;
        let lifetime = Duration::from_secs(minted.expires_in.saturating_sub(60));
        *cached = Some((minted.access_token.clone(), Instant::now() + lifetime));
        Ok(minted.access_token)
    }

    /// Resolve the project: explicit value, `GOOGLE_CLOUD_PROJECT`, then metadata
    pub async fn project_id(&self, explicit: Option<&str>, client: &Client) -> Result<String> {
        if let Some(project) = explicit.filter(|p| !p.is_empty()) {
            return Ok(project.to_string());
        }
        if let Ok(project) = std::env::var("GOOGLE_CLOUD_PROJECT") {
            if !project.is_empty() {
                return Ok(project);
            }
        }

        let TokenSource::Metadata { base_url } = &self.source else {
            return Err(ProviderError::Auth(
                "no project id configured; set project_id or GOOGLE_CLOUD_PROJECT".to_string(),
            ));
        };

        let response = client
            .get(format!("{}{}", base_url, PROJECT_PATH))
            .header("Metadata-Flavor", "Google")
            .send()
            .await
            .map_err(|e| ProviderError::Auth(format!("metadata server unreachable: {}", e)))?;
        if !response.status().is_success() {
            return Err(ProviderError::Auth(format!(
                "project lookup returned {}",
                response.status()
            )));
        }
        Ok(response.text().await?.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_static_token_is_returned_verbatim() {
        let creds = Credentials::new(TokenSource::Static("ya29.abc".to_string()));
        let token = creds.token(&Client::new()).await.unwrap();
        assert_eq!(token, "ya29.abc");
    }

    #[tokio::test]
    async fn test_metadata_token_is_cached() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", TOKEN_PATH)
            .match_header("metadata-flavor", "Google")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({"access_token": "ya29.meta", "expires_in": 3599, "token_type": "Bearer"})
                    .to_string(),
            )
            .expect(1)
            .create_async()
            .await;

        let creds = Credentials::new(TokenSource::Metadata {
            base_url: server.url(),
        });
        let client = Client::new();
        assert_eq!(creds.token(&client).await.unwrap(), "ya29.meta");
        assert_eq!(creds.token(&client).await.unwrap(), "ya29.meta");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_metadata_failure_is_auth_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", TOKEN_PATH)
            .with_status(404)
            .create_async()
            .await;

        let creds = Credentials::new(TokenSource::Metadata {
            base_url: server.url(),
        });
        let err = creds.token(&Client::new()).await.unwrap_err();
        assert!(matches!(err, ProviderError::Auth(_)));
    }

    #[tokio::test]
    async fn test_explicit_project_wins() {
        let creds = Credentials::new(TokenSource::Static("t".to_string()));
        let project = creds
            .project_id(Some("soc-prod"), &Client::new())
            .await
            .unwrap();
        assert_eq!(project, "soc-prod");
    }

    #[tokio::test]
    async fn test_project_from_metadata() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", PROJECT_PATH)
            .with_status(200)
            .with_body("mock-project-id\n")
            .create_async()
            .await;

        std::env::remove_var("GOOGLE_CLOUD_PROJECT");
        let creds = Credentials::new(TokenSource::Metadata {
            base_url: server.url(),
        });
        let project = creds.project_id(None, &Client::new()).await.unwrap();
        assert_eq!(project, "mock-project-id");
    }
}
