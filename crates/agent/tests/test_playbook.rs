//! End-to-end playbook run with a mocked model

use async_trait::async_trait;
use engage_agent::{build_agent, run_playbook, GeminiAuthPlan, ModelFactory};
use engage_config::{Config, Environment};
use engage_provider::{ChatParams, ChatResponse, Provider, ProviderError};
use mockall::mock;
use std::sync::Arc;
use tempfile::TempDir;

mock! {
    pub Provider {}

    #[async_trait]
    impl Provider for Provider {
        async fn chat(&self, params: ChatParams) -> Result<ChatResponse, ProviderError>;
        fn default_model(&self) -> String;
        fn is_configured(&self) -> bool;
        fn name(&self) -> &str;
    }
}

mock! {
    pub Factory {}

    impl ModelFactory for Factory {
        fn openai(&self, model_name: Option<String>) -> engage_agent::Result<Arc<dyn Provider>>;
        fn ollama(&self, model_name: Option<String>) -> engage_agent::Result<Arc<dyn Provider>>;
        fn gemini(
            &self,
            model_name: String,
            auth: GeminiAuthPlan,
        ) -> engage_agent::Result<Arc<dyn Provider>>;
    }
}

const PLAYBOOK: &str = "# Phishing triage\n\n1. Pull new detections\n2. Summarise\n";

#[tokio::test]
async fn test_playbook_text_is_the_prompt() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("test_environment.md"), "Lab with two hosts.").unwrap();
    let playbook = dir.path().join("phishing.md");
    std::fs::write(&playbook, PLAYBOOK).unwrap();

    let mut provider = MockProvider::new();
    provider.expect_default_model().return_const("llama3.1".to_string());
    provider.expect_name().return_const("ollama".to_string());
    provider.expect_chat().times(1).returning(|params| {
        assert!(params.messages[0].text().contains("Lab with two hosts."));
        assert!(params.messages[0]
            .text()
            .starts_with("You are an expert in computer security and data analysis."));
        assert_eq!(params.messages[1].text(), PLAYBOOK);
        Ok(ChatResponse::text("## Summary\nNothing new."))
    });

    let mut factory = MockFactory::new();
    factory
        .expect_ollama()
        .times(1)
        .return_once(move |_| Ok(Arc::new(provider) as Arc<dyn Provider>));

    let config = Config::from_yaml("model:\n  provider: ollama\n  model_name: llama3.1\n").unwrap();
    let agent = build_agent(&config, Environment::Test, dir.path(), &factory)
        .await
        .unwrap();
    assert!(agent.tools().has("day_of_week"));

    let response = run_playbook(&agent, &playbook).await.unwrap();
    assert_eq!(response.content, "## Summary\nNothing new.");
    assert_eq!(response.model, "llama3.1");
}

#[tokio::test]
async fn test_missing_environment_description_leaves_context_empty() {
    let dir = TempDir::new().unwrap();

    let mut factory = MockFactory::new();
    factory.expect_gemini().times(1).return_once(|_, _| {
        let mut provider = MockProvider::new();
        provider.expect_default_model().return_const("gemini-1.5-flash".to_string());
        provider.expect_name().return_const("gemini".to_string());
        Ok(Arc::new(provider) as Arc<dyn Provider>)
    });

    let agent = build_agent(&Config::default(), Environment::Production, dir.path(), &factory)
        .await
        .unwrap();
    assert!(agent.settings().additional_context.is_empty());
    assert_eq!(agent.settings().max_iterations, 10);
}
