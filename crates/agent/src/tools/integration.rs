//! Shared HTTP plumbing for the external integrations

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Error, Debug)]
pub enum IntegrationError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{service} returned {status}: {body}")]
    Status {
        service: String,
        status: u16,
        body: String,
    },

    #[error("{0}")]
    Api(String),

    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
}

/// How requests are authenticated
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntegrationAuth {
    Basic { username: String, token: String },
    Bearer(String),
}

/// reqwest client bound to one service's base URL
#[derive(Debug, Clone)]
pub struct IntegrationClient {
    service: String,
    http: Client,
    base_url: String,
    auth: IntegrationAuth,
}

impl IntegrationClient {
    pub fn new(service: impl Into<String>, base_url: &str, auth: IntegrationAuth) -> Self {
        Self {
            service: service.into(),
            http: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            auth,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        let request = request
            .timeout(REQUEST_TIMEOUT)
            .header("Accept", "application/json");
        match &self.auth {
            IntegrationAuth::Basic { username, token } => {
                request.basic_auth(username, Some(token))
            }
            IntegrationAuth::Bearer(token) => request.bearer_auth(token),
        }
    }

    pub async fn get(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Value, IntegrationError> {
        debug!("{} GET {}", self.service, path);
        let request = self.http.get(self.url(path)).query(query);
        self.send(self.authorize(request)).await
    }

    pub async fn post(&self, path: &str, body: &Value) -> Result<Value, IntegrationError> {
        debug!("{} POST {}", self.service, path);
        let request = self.http.post(self.url(path)).json(body);
        self.send(self.authorize(request)).await
    }

    pub async fn put(&self, path: &str, body: &Value) -> Result<Value, IntegrationError> {
        debug!("{} PUT {}", self.service, path);
        let request = self.http.put(self.url(path)).json(body);
        self.send(self.authorize(request)).await
    }

    async fn send(&self, request: RequestBuilder) -> Result<Value, IntegrationError> {
        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(IntegrationError::Status {
                service: self.service.clone(),
                status: status.as_u16(),
                body: text.chars().take(500).collect(),
            });
        }

        // 204s and empty bodies
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| {
            IntegrationError::Api(format!("{} sent invalid JSON: {}", self.service, e))
        })
    }
}

/// A configured external service
#[async_trait]
pub trait Integration: Send + Sync {
    fn name(&self) -> &str;
    async fn test_connection(&self) -> Result<(), IntegrationError>;
}

/// String field at a JSON pointer, or ""
pub(crate) fn str_at<'a>(value: &'a Value, pointer: &str) -> &'a str {
    value.pointer(pointer).and_then(Value::as_str).unwrap_or("")
}
