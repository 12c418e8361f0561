//! OpenAI chat-completions backend

use crate::*;
use reqwest::Client;
use serde_json::json;
use tracing::{debug, trace};

pub const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";

/// Hosted OpenAI (or any chat-completions compatible endpoint)
pub struct OpenAiProvider {
    client: Client,
    api_key: String,
    api_base: String,
    default_model: String,
}

impl OpenAiProvider {
    /// Key falls back to `OPENAI_API_KEY`, base to the public endpoint
    pub fn new(
        api_key: Option<String>,
        api_base: Option<String>,
        default_model: Option<String>,
    ) -> Self {
        let api_key = api_key
            .filter(|k| !k.is_empty())
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .unwrap_or_default();
        let api_base = api_base
            .filter(|b| !b.is_empty())
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string())
            .trim_end_matches('/')
            .to_string();

        Self {
            client: Client::new(),
            api_key,
            api_base,
            default_model: default_model.unwrap_or_else(|| "gpt-4o".to_string()),
        }
    }

    fn build_request(&self, params: &ChatParams) -> serde_json::Value {
        let model = if params.model.is_empty() {
            self.default_model.clone()
        } else {
            params.model.clone()
        };

        let messages: Vec<serde_json::Value> = params
            .messages
            .iter()
            .map(|m| {
                let mut obj = json!({ "role": m.role.as_str() });
                if let Some(content) = &m.content {
                    obj["content"] = json!(content);
                }
                if let Some(tool_calls) = &m.tool_calls {
                    // The API wants arguments as an encoded JSON string
                    let calls: Vec<serde_json::Value> = tool_calls
                        .iter()
                        .map(|c| {
                            json!({
                                "id": c.id,
                                "type": c.call_type,
                                "function": {
                                    "name": c.function.name,
                                    "arguments": c.function.arguments.to_string(),
                                }
                            })
                        })
                        .collect();
                    obj["tool_calls"] = json!(calls);
                }
                if let Some(tool_call_id) = &m.tool_call_id {
                    obj["tool_call_id"] = json!(tool_call_id);
                }
                obj
            })
            .collect();

        let mut body = json!({
            "model": model,
            "messages": messages,
            "max_tokens": params.max_tokens,
            "temperature": params.temperature,
        });

        if !params.tools.is_empty() {
            body["tools"] = json!(params.tools);
            body["tool_choice"] = match &params.tool_choice {
                ToolChoice::Auto => json!("auto"),
                ToolChoice::Required(name) => {
                    json!({"type": "function", "function": {"name": name}})
                }
                ToolChoice::None => json!("none"),
            };
        }

        body
    }

    fn parse_response(&self, json: serde_json::Value) -> Result<ChatResponse> {
        let choice = json["choices"]
            .get(0)
            .ok_or(ProviderError::InvalidResponse)?;
        let message = &choice["message"];
        let content = message["content"].as_str().map(|s| s.to_string());
        let finish_reason = choice["finish_reason"]
            .as_str()
            .unwrap_or("stop")
            .to_string();

        let tool_calls = message["tool_calls"]
            .as_array()
            .map(|calls| {
                calls
                    .iter()
                    .map(|call| ToolCall {
                        id: call["id"].as_str().unwrap_or("").to_string(),
                        name: call["function"]["name"].as_str().unwrap_or("").to_string(),
                        arguments: normalize_arguments(&call["function"]["arguments"]),
                    })
                    .collect()
            })
            .unwrap_or_default();

        let usage = json["usage"]
            .as_object()
            .map(|u| {
                Usage::new(
                    u.get("prompt_tokens").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
                    u.get("completion_tokens")
                        .and_then(|v| v.as_u64())
                        .unwrap_or(0) as u32,
                )
            })
            .unwrap_or_default();

        Ok(ChatResponse {
            content,
            tool_calls,
            finish_reason,
            usage,
        })
    }
}

#[async_trait::async_trait]
impl Provider for OpenAiProvider {
    async fn chat(&self, params: ChatParams) -> Result<ChatResponse> {
        if self.api_key.is_empty() {
            return Err(ProviderError::NoApiKey);
        }
        trace!("POST {}/chat/completions", self.api_base);

        let url = format!("{}/chat/completions", self.api_base);
        let body = self.build_request(&params);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let json = read_json(response).await?;
        let parsed = self.parse_response(json)?;
        debug!("openai returned {} tool calls", parsed.tool_calls.len());
        Ok(parsed)
    }

    fn default_model(&self) -> String {
        self.default_model.clone()
    }

    fn is_configured(&self) -> bool {
        !self.api_key.is_empty()
    }

    fn name(&self) -> &str {
        "openai"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn provider() -> OpenAiProvider {
        OpenAiProvider::new(Some("sk-test".to_string()), None, Some("gpt-4o-mini".to_string()))
    }

    #[test]
    fn test_new_defaults() {
        let provider = provider();
        assert_eq!(provider.api_base, DEFAULT_API_BASE);
        assert_eq!(provider.default_model(), "gpt-4o-mini");
        assert!(provider.is_configured());
    }

    #[test]
    fn test_new_trims_custom_base() {
        let provider = OpenAiProvider::new(
            Some("k".to_string()),
            Some("http://localhost:8000/v1/".to_string()),
            None,
        );
        assert_eq!(provider.api_base, "http://localhost:8000/v1");
        assert_eq!(provider.default_model, "gpt-4o");
    }

    #[test]
    fn test_build_request_uses_default_model_when_unset() {
        let request = provider().build_request(&ChatParams {
            messages: vec![Message::user("hi")],
            ..Default::default()
        });
        assert_eq!(request["model"], "gpt-4o-mini");
        assert!(request.get("tools").is_none());
        assert_eq!(request["messages"][0]["role"], "user");
    }

    #[test]
    fn test_build_request_encodes_tool_call_arguments() {
        let call = ToolCallDef::new("call_1", "search_iocs", json!({"ioc_value": "evil.com"}));
        let params = ChatParams {
            model: "gpt-4o".to_string(),
            messages: vec![
                Message::assistant_tool_calls(None, vec![call]),
                Message::tool("call_1", "search_iocs", "{}"),
            ],
            tools: vec![Tool::new("search_iocs", "Search IOCs", json!({}))],
            ..Default::default()
        };

        let request = provider().build_request(&params);
        let args = &request["messages"][0]["tool_calls"][0]["function"]["arguments"];
        assert!(args.is_string());
        assert_eq!(
            serde_json::from_str::<serde_json::Value>(args.as_str().unwrap()).unwrap(),
            json!({"ioc_value": "evil.com"})
        );
        assert_eq!(request["messages"][1]["tool_call_id"], "call_1");
        assert_eq!(request["tools"][0]["function"]["name"], "search_iocs");
        assert_eq!(request["tool_choice"], "auto");
    }

    #[test]
    fn test_build_request_required_tool_choice() {
        let params = ChatParams {
            tools: vec![Tool::new("day_of_week", "Weekday", json!({}))],
            tool_choice: ToolChoice::Required("day_of_week".to_string()),
            ..Default::default()
        };
        let request = provider().build_request(&params);
        assert_eq!(request["tool_choice"]["function"]["name"], "day_of_week");
    }

    #[test]
    fn test_parse_response_with_tool_calls() {
        let response = provider()
            .parse_response(json!({
                "choices": [{
                    "message": {
                        "content": null,
                        "tool_calls": [{
                            "id": "call_7",
                            "type": "function",
                            "function": {"name": "day_of_week", "arguments": "{}"}
                        }]
                    },
                    "finish_reason": "tool_calls"
                }],
                "usage": {"prompt_tokens": 12, "completion_tokens": 3, "total_tokens": 15}
            }))
            .unwrap();

        assert!(response.content.is_none());
        assert_eq!(response.tool_calls[0].id, "call_7");
        assert_eq!(response.tool_calls[0].arguments, json!({}));
        assert_eq!(response.usage.total_tokens, 15);
    }

    #[test]
    fn test_parse_response_empty_choices() {
        let result = provider().parse_response(json!({"choices": []}));
        assert!(matches!(result, Err(ProviderError::InvalidResponse)));
    }

    #[tokio::test]
    async fn test_chat_against_mock_server() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .match_header("authorization", "Bearer sk-test")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "choices": [{
                        "message": {"content": "Today is Friday"},
                        "finish_reason": "stop"
                    }]
                })
                .to_string(),
            )
            .create_async()
            .await;

        let provider = OpenAiProvider::new(Some("sk-test".to_string()), Some(server.url()), None);
        let response = provider
            .chat(ChatParams {
                messages: vec![Message::user("what day is it?")],
                ..Default::default()
            })
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(response.content.as_deref(), Some("Today is Friday"));
    }

    #[tokio::test]
    async fn test_chat_maps_rate_limit() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/chat/completions")
            .with_status(429)
            .with_body(json!({"error": {"message": "slow down"}}).to_string())
            .create_async()
            .await;

        let provider = OpenAiProvider::new(Some("sk-test".to_string()), Some(server.url()), None);
        let result = provider.chat(ChatParams::default()).await;
        assert!(matches!(result, Err(ProviderError::RateLimited)));
    }

    #[tokio::test]
    async fn test_chat_maps_plain_text_rate_limit() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/chat/completions")
            .with_status(429)
            .with_header("content-type", "text/plain")
            .with_body("Too Many Requests")
            .create_async()
            .await;

        let provider = OpenAiProvider::new(Some("sk-test".to_string()), Some(server.url()), None);
        let result = provider.chat(ChatParams::default()).await;
        assert!(matches!(result, Err(ProviderError::RateLimited)));
    }

    #[tokio::test]
    async fn test_chat_plain_text_gateway_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/chat/completions")
            .with_status(502)
            .with_body("Bad Gateway")
            .create_async()
            .await;

        let provider = OpenAiProvider::new(Some("sk-test".to_string()), Some(server.url()), None);
        let err = provider.chat(ChatParams::default()).await.unwrap_err();
        assert!(matches!(&err, ProviderError::Api(msg) if msg == "HTTP 502: Bad Gateway"));
    }

    #[tokio::test]
    async fn test_chat_without_key_fails_fast() {
        let provider = OpenAiProvider {
            client: Client::new(),
            api_key: String::new(),
            api_base: DEFAULT_API_BASE.to_string(),
            default_model: "gpt-4o".to_string(),
        };
        let result = provider.chat(ChatParams::default()).await;
        assert!(matches!(result, Err(ProviderError::NoApiKey)));
    }
}
