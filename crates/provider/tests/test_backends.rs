//! Backends behave uniformly behind `dyn Provider`
#![cfg(all(feature = "openai", feature = "ollama", feature = "gemini"))]

use engage_provider::{
    ChatParams, GeminiAuth, GeminiProvider, Message, OllamaProvider, OpenAiProvider, Provider,
    TokenSource,
};
use serde_json::json;

fn backends() -> Vec<Box<dyn Provider>> {
    vec![
        Box::new(OpenAiProvider::new(
            Some("sk-test".to_string()),
            None,
            Some("gpt-4o".to_string()),
        )),
        Box::new(OllamaProvider::new(
            Some("http://localhost:11434".to_string()),
            Some("llama3.1".to_string()),
        )),
        Box::new(GeminiProvider::new(
            "gemini-1.5-flash",
            GeminiAuth::ApiKey("key".to_string()),
        )),
        Box::new(GeminiProvider::new(
            "gemini-1.5-pro",
            GeminiAuth::WorkloadIdentity {
                project_id: Some("p".to_string()),
                location: "us-central1".to_string(),
                token_source: TokenSource::Static("t".to_string()),
            },
        )),
    ]
}

#[test]
fn test_backend_names_and_models() {
    let backends = backends();
    let names: Vec<&str> = backends.iter().map(|b| b.name()).collect();
    assert_eq!(names, vec!["openai", "ollama", "gemini", "vertex-gemini"]);

    let models: Vec<String> = backends.iter().map(|b| b.default_model()).collect();
    assert_eq!(
        models,
        vec!["gpt-4o", "llama3.1", "gemini-1.5-flash", "gemini-1.5-pro"]
    );
    assert!(backends.iter().all(|b| b.is_configured()));
}

#[test]
fn test_gemini_empty_key_is_not_configured() {
    let provider = GeminiProvider::new("gemini-pro", GeminiAuth::ApiKey(String::new()));
    assert!(!provider.is_configured());
    assert!(!provider.uses_vertex());
}

#[tokio::test]
async fn test_same_conversation_against_each_wire_format() {
    let mut server = mockito::Server::new_async().await;
    let openai = server
        .mock("POST", "/chat/completions")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({"choices": [{"message": {"content": "Monday"}, "finish_reason": "stop"}]})
                .to_string(),
        )
        .create_async()
        .await;
    let ollama = server
        .mock("POST", "/api/chat")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({"message": {"role": "assistant", "content": "Monday"}, "done_reason": "stop"})
                .to_string(),
        )
        .create_async()
        .await;
    let gemini = server
        .mock("POST", "/v1beta/models/gemini-pro:generateContent")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "candidates": [{"content": {"parts": [{"text": "Monday"}]}, "finishReason": "STOP"}]
            })
            .to_string(),
        )
        .create_async()
        .await;

    let backends: Vec<Box<dyn Provider>> = vec![
        Box::new(OpenAiProvider::new(
            Some("sk-test".to_string()),
            Some(server.url()),
            None,
        )),
        Box::new(OllamaProvider::new(Some(server.url()), None)),
        Box::new(
            GeminiProvider::new("gemini-pro", GeminiAuth::ApiKey("k".to_string()))
                .with_base_url(server.url()),
        ),
    ];

    for backend in &backends {
        let response = backend
            .chat(ChatParams {
                messages: vec![Message::system("answer in one word"), Message::user("what day?")],
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(response.content.as_deref(), Some("Monday"), "{}", backend.name());
        assert_eq!(response.finish_reason, "stop");
    }

    openai.assert_async().await;
    ollama.assert_async().await;
    gemini.assert_async().await;
}
