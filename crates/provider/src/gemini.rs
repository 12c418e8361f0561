//! Google Gemini backend
//!
//! Talks to either the Generative Language API (API key) or Vertex AI
//! (workload identity). Both share the `generateContent` wire format; only
//! the endpoint and the auth header differ.

use crate::auth::{Credentials, TokenSource};
use crate::*;
use reqwest::Client;
use serde::Serialize;
use serde_json::json;
use tokio::sync::OnceCell;
use tracing::{debug, trace, warn};

pub const GENERATIVE_LANGUAGE_BASE: &str = "https://generativelanguage.googleapis.com";

/// How requests are authenticated
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GeminiAuth {
    ApiKey(String),
    WorkloadIdentity {
        project_id: Option<String>,
        location: String,
        token_source: TokenSource,
    },
}

/// Sampling parameters, pinned for reproducible triage output
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    pub max_output_tokens: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: 0.0,
            top_p: 0.1,
            top_k: 1,
            max_output_tokens: 4096,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SafetySetting {
    pub category: &'static str,
    pub threshold: &'static str,
}

/// Block only high-probability harm. HARM_CATEGORY_UNSPECIFIED is left out
/// because the API-key endpoint rejects it.
pub fn safety_settings() -> Vec<SafetySetting> {
    [
        "HARM_CATEGORY_DANGEROUS_CONTENT",
        "HARM_CATEGORY_HATE_SPEECH",
        "HARM_CATEGORY_HARASSMENT",
        "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    ]
    .into_iter()
    .map(|category| SafetySetting {
        category,
        threshold: "BLOCK_ONLY_HIGH",
    })
    .collect()
}

pub struct GeminiProvider {
    client: Client,
    model: String,
    auth: GeminiAuth,
    credentials: Option<Credentials>,
    base_url: Option<String>,
    project: OnceCell<String>,
    generation_config: GenerationConfig,
}

impl GeminiProvider {
    pub fn new(model: impl Into<String>, auth: GeminiAuth) -> Self {
        let credentials = match &auth {
            GeminiAuth::ApiKey(_) => None,
            GeminiAuth::WorkloadIdentity { token_source, .. } => {
                Some(Credentials::new(token_source.clone()))
            }
        };
        Self {
            client: Client::new(),
            model: model.into(),
            auth,
            credentials,
            base_url: None,
            project: OnceCell::new(),
            generation_config: GenerationConfig::default(),
        }
    }

    /// Point at a different host (regional endpoint, proxy, test server)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into().trim_end_matches('/').to_string());
        self
    }

    pub fn auth(&self) -> &GeminiAuth {
        &self.auth
    }

    pub fn uses_vertex(&self) -> bool {
        matches!(self.auth, GeminiAuth::WorkloadIdentity { .. })
    }

    async fn endpoint(&self, model: &str) -> Result<String> {
        match &self.auth {
            GeminiAuth::ApiKey(_) => {
                let base = self
                    .base_url
                    .as_deref()
                    .unwrap_or(GENERATIVE_LANGUAGE_BASE);
                Ok(format!("{}/v1beta/models/{}:generateContent", base, model))
            }
            GeminiAuth::WorkloadIdentity {
                project_id,
                location,
                ..
            } => {
                let project = self
                    .project
                    .get_or_try_init(|| async {
                        match &self.credentials {
                            Some(creds) => {
                                creds.project_id(project_id.as_deref(), &self.client).await
                            }
                            None => Err(ProviderError::Auth("no credentials".to_string())),
                        }
                    })
                    .await?;
                let base = self
                    .base_url
                    .clone()
                    .unwrap_or_else(|| format!("https://{}-aiplatform.googleapis.com", location));
                Ok(format!(
                    "{}/v1/projects/{}/locations/{}/publishers/google/models/{}:generateContent",
                    base, project, location, model
                ))
            }
        }
    }

    fn build_request(&self, params: &ChatParams) -> serde_json::Value {
        let mut system_parts = Vec::new();
        let mut contents: Vec<serde_json::Value> = Vec::new();

        for message in &params.messages {
            let (role, parts) = match message.role {
                Role::System => {
                    system_parts.push(json!({ "text": message.text() }));
                    continue;
                }
                Role::User => ("user", vec![json!({ "text": message.text() })]),
                Role::Assistant => {
                    let mut parts = Vec::new();
                    if !message.text().is_empty() {
                        parts.push(json!({ "text": message.text() }));
                    }
                    for call in message.tool_calls.iter().flatten() {
                        parts.push(json!({
                            "functionCall": {
                                "name": call.function.name,
                                "args": call.function.arguments,
                            }
                        }));
                    }
                    ("model", parts)
                }
                // Function results travel as user turns
                Role::Tool => (
                    "user",
                    vec![json!({
                        "functionResponse": {
                            "name": message.name.as_deref().unwrap_or(""),
                            "response": { "content": message.text() },
                        }
                    })],
                ),
            };

            if parts.is_empty() {
                continue;
            }

            // Gemini wants alternating turns; fold consecutive same-role parts
            match contents.last_mut() {
                Some(last) if last["role"] == role => {
                    if let Some(existing) = last["parts"].as_array_mut() {
                        existing.extend(parts);
                    }
                }
                _ => contents.push(json!({ "role": role, "parts": parts })),
            }
        }

        let mut body = json!({
            "contents": contents,
            "generationConfig": self.generation_config,
            "safetySettings": safety_settings(),
        });

        if !system_parts.is_empty() {
            body["systemInstruction"] = json!({ "parts": system_parts });
        }

        if !params.tools.is_empty() {
            let declarations: Vec<serde_json::Value> = params
                .tools
                .iter()
                .map(|t| {
                    let mut decl = json!({
                        "name": t.function.name,
                        "description": t.function.description,
                    });
                    if has_properties(&t.function.parameters) {
                        decl["parameters"] = t.function.parameters.clone();
                    }
                    decl
                })
                .collect();
            body["tools"] = json!([{ "functionDeclarations": declarations }]);
            body["toolConfig"] = match &params.tool_choice {
                ToolChoice::Auto => json!({ "functionCallingConfig": { "mode": "AUTO" } }),
                ToolChoice::Required(name) => json!({
                    "functionCallingConfig": { "mode": "ANY", "allowedFunctionNames": [name] }
                }),
                ToolChoice::None => json!({ "functionCallingConfig": { "mode": "NONE" } }),
            };
        }

        body
    }

    fn parse_response(&self, json: serde_json::Value) -> Result<ChatResponse> {
        let Some(candidate) = json["candidates"].get(0) else {
            if let Some(reason) = json["promptFeedback"]["blockReason"].as_str() {
                return Err(ProviderError::Api(format!("prompt blocked: {}", reason)));
            }
            return Err(ProviderError::InvalidResponse);
        };

        let mut text = String::new();
        let mut tool_calls = Vec::new();
        for part in candidate["content"]["parts"].as_array().into_iter().flatten() {
            if let Some(t) = part["text"].as_str() {
                text.push_str(t);
            }
            if let Some(call) = part.get("functionCall") {
                tool_calls.push(ToolCall {
                    id: format!("call_{}", uuid::Uuid::new_v4().simple()),
                    name: call["name"].as_str().unwrap_or("").to_string(),
                    arguments: normalize_arguments(&call["args"]),
                });
            }
        }

        let finish_reason = if tool_calls.is_empty() {
            candidate["finishReason"]
                .as_str()
                .unwrap_or("STOP")
                .to_lowercase()
        } else {
            "tool_calls".to_string()
        };
        if finish_reason == "safety" {
            warn!("Gemini stopped generation on a safety filter");
        }

        let usage = Usage::new(
            json["usageMetadata"]["promptTokenCount"].as_u64().unwrap_or(0) as u32,
            json["usageMetadata"]["candidatesTokenCount"]
                .as_u64()
                .unwrap_or(0) as u32,
        );

        Ok(ChatResponse {
            content: if text.is_empty() { None } else { Some(text) },
            tool_calls,
            finish_reason,
            usage,
        })
    }
}

fn has_properties(schema: &serde_json::Value) -> bool {
    schema["properties"]
        .as_object()
        .map(|p| !p.is_empty())
        .unwrap_or(false)
}

#[async_trait::async_trait]
impl Provider for GeminiProvider {
    async fn chat(&self, params: ChatParams) -> Result<ChatResponse> {
        let model = if params.model.is_empty() {
            self.model.clone()
        } else {
            params.model.clone()
        };
        let url = self.endpoint(&model).await?;
        trace!("POST {}", url);

        let request = self.client.post(&url).json(&self.build_request(&params));
        let request = match (&self.auth, &self.credentials) {
            (GeminiAuth::ApiKey(key), _) => request.header("x-goog-api-key", key),
            (GeminiAuth::WorkloadIdentity { .. }, Some(creds)) => {
                request.bearer_auth(creds.token(&self.client).await?)
            }
            (GeminiAuth::WorkloadIdentity { .. }, None) => {
                return Err(ProviderError::Auth("no credentials".to_string()))
            }
        };

        let response = request.send().await?;
        let json = read_json(response).await?;
        let parsed = self.parse_response(json)?;
        debug!("gemini returned {} function calls", parsed.tool_calls.len());
        Ok(parsed)
    }

    fn default_model(&self) -> String {
        self.model.clone()
    }

    fn is_configured(&self) -> bool {
        match &self.auth {
            GeminiAuth::ApiKey(key) => !key.is_empty(),
            GeminiAuth::WorkloadIdentity { .. } => true,
        }
    }

    fn name(&self) -> &str {
        if self.uses_vertex() {
            "vertex-gemini"
        } else {
            "gemini"
        }
    }
}
