//! Ollama backend for local open-weight models

use crate::*;
use reqwest::Client;
use serde_json::json;
use tracing::{debug, trace};

pub const DEFAULT_HOST: &str = "http://localhost:11434";

/// Local Ollama runner, `POST /api/chat`
pub struct OllamaProvider {
    client: Client,
    host: String,
    default_model: String,
}

impl OllamaProvider {
    /// Host falls back to `OLLAMA_HOST`, then `localhost:11434`
    pub fn new(host: Option<String>, default_model: Option<String>) -> Self {
        let host = host
            .filter(|h| !h.is_empty())
            .or_else(|| std::env::var("OLLAMA_HOST").ok())
            .map(|h| {
                if h.starts_with("http://") || h.starts_with("https://") {
                    h
                } else {
                    format!("http://{}", h)
                }
            })
            .unwrap_or_else(|| DEFAULT_HOST.to_string())
            .trim_end_matches('/')
            .to_string();

        Self {
            client: Client::new(),
            host,
            default_model: default_model.unwrap_or_else(|| "llama3.1".to_string()),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    fn build_request(&self, params: &ChatParams) -> serde_json::Value {
        let model = if params.model.is_empty() {
            &self.default_model
        } else {
            &params.model
        };

        // Ollama takes arguments as objects and has no tool_call_id
        let messages: Vec<serde_json::Value> = params
            .messages
            .iter()
            .map(|m| {
                let mut obj = json!({
                    "role": m.role.as_str(),
                    "content": m.text(),
                });
                if let Some(calls) = &m.tool_calls {
                    obj["tool_calls"] = calls
                        .iter()
                        .map(|c| {
                            json!({
                                "function": {
                                    "name": c.function.name,
                                    "arguments": c.function.arguments,
                                }
                            })
                        })
                        .collect();
                }
                obj
            })
            .collect();

        let mut body = json!({
            "model": model,
            "messages": messages,
            "stream": false,
            "options": {
                "temperature": params.temperature,
                "num_predict": params.max_tokens,
            }
        });

        if !params.tools.is_empty() && params.tool_choice != ToolChoice::None {
            body["tools"] = json!(params.tools);
        }

        body
    }

    fn parse_response(&self, json: serde_json::Value) -> Result<ChatResponse> {
        let message = json
            .get("message")
            .filter(|m| m.is_object())
            .ok_or(ProviderError::InvalidResponse)?;

        let content = message["content"]
            .as_str()
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string());

        let tool_calls: Vec<ToolCall> = message["tool_calls"]
            .as_array()
            .map(|calls| {
                calls
                    .iter()
                    .map(|call| ToolCall {
                        id: format!("call_{}", uuid::Uuid::new_v4().simple()),
                        name: call["function"]["name"].as_str().unwrap_or("").to_string(),
                        arguments: normalize_arguments(&call["function"]["arguments"]),
                    })
                    .collect()
            })
            .unwrap_or_default();

        let finish_reason = if tool_calls.is_empty() {
            json["done_reason"].as_str().unwrap_or("stop").to_string()
        } else {
            "tool_calls".to_string()
        };

        let usage = Usage::new(
            json["prompt_eval_count"].as_u64().unwrap_or(0) as u32,
            json["eval_count"].as_u64().unwrap_or(0) as u32,
        );

        Ok(ChatResponse {
            content,
            tool_calls,
            finish_reason,
            usage,
        })
    }
}

#[async_trait::async_trait]
impl Provider for OllamaProvider {
    async fn chat(&self, params: ChatParams) -> Result<ChatResponse> {
        let url = format!("{}/api/chat", self.host);
        trace!("POST {}", url);

        let response = self
            .client
            .post(&url)
            .json(&self.build_request(&params))
            .send()
            .await?;

        let json = read_json(response).await?;
        let parsed = self.parse_response(json)?;
        debug!("ollama returned {} tool calls", parsed.tool_calls.len());
        Ok(parsed)
    }

    fn default_model(&self) -> String {
        self.default_model.clone()
    }

    fn is_configured(&self) -> bool {
        true
    }

    fn name(&self) -> &str {
        "ollama"
    }
}
