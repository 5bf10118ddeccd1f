//! Integration tests for the HTTP reasoning providers
//!
//! wiremock stands in for the Ollama and Gemini endpoints.

use serde_json::json;
use wiremock::{
    matchers::{body_partial_json, header, method, path},
    Mock, MockServer, ResponseTemplate,
};

use warden_engine::agent::{AgentSettings, LoopState, Orchestrator};
use warden_engine::config::{Config, GeminiConfig};
use warden_engine::llm::{
    GeminiProvider, LLMError, LLMProvider, LLMRouter, Message, OllamaProvider,
};
use warden_engine::reasoning::LlmReasoner;
use warden_engine::sandbox::SandboxPolicy;
use warden_engine::tools::ToolRegistry;

fn ollama_reply(content: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "model": "llama3.1:8b",
        "message": { "role": "assistant", "content": content },
        "done": true
    }))
}

fn gemini_config(base_url: &str) -> GeminiConfig {
    GeminiConfig {
        base_url: base_url.to_string(),
        ..GeminiConfig::default()
    }
}

#[tokio::test]
async fn test_ollama_complete() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .and(body_partial_json(json!({ "model": "llama3.1:8b", "stream": false })))
        .respond_with(ollama_reply("Thought: hi\nFinal Answer: hello"))
        .expect(1)
        .mount(&server)
        .await;

    let provider = OllamaProvider::new(server.uri(), "llama3.1:8b");
    let text = provider.complete(&[Message::user("hi")]).await.unwrap();

    assert_eq!(text, "Thought: hi\nFinal Answer: hello");
    assert!(provider.is_local());
}

#[tokio::test]
async fn test_ollama_server_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(500).set_body_string("model not loaded"))
        .mount(&server)
        .await;

    let provider = OllamaProvider::new(server.uri(), "llama3.1:8b");
    let result = provider.complete(&[Message::user("hi")]).await;

    match result {
        Err(LLMError::ProviderUnavailable(msg)) => assert!(msg.contains("model not loaded")),
        other => panic!("Expected ProviderUnavailable, got: {:?}", other),
    }
}

#[tokio::test]
async fn test_ollama_health() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "models": [] })))
        .mount(&server)
        .await;

    let provider = OllamaProvider::new(server.uri(), "llama3.1:8b");
    assert!(provider.check_health().await);
}

#[tokio::test]
async fn test_gemini_complete_sends_key_and_system_instruction() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/models/gemini-1.5-flash-latest:generateContent"))
        .and(header("x-goog-api-key", "test-key"))
        .and(body_partial_json(json!({
            "systemInstruction": { "parts": [{ "text": "be brief" }] }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [{
                "content": { "parts": [{ "text": "Thought: ok\n" }, { "text": "Final Answer: 4" }] }
            }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let provider = GeminiProvider::new(gemini_config(&server.uri()), Some("test-key".into()));
    let text = provider
        .complete(&[Message::system("be brief"), Message::user("2+2?")])
        .await
        .unwrap();

    assert_eq!(text, "Thought: ok\nFinal Answer: 4");
}

#[tokio::test]
async fn test_gemini_auth_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(403).set_body_string("API key not valid"))
        .mount(&server)
        .await;

    let provider = GeminiProvider::new(gemini_config(&server.uri()), Some("bad".into()));
    let result = provider.complete(&[Message::user("hi")]).await;

    assert!(matches!(result, Err(LLMError::AuthenticationFailed(_))));
}

#[tokio::test]
async fn test_gemini_without_key_never_calls_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let provider = GeminiProvider::new(gemini_config(&server.uri()), None);

    assert!(!provider.check_health().await);
    assert!(matches!(
        provider.complete(&[Message::user("hi")]).await,
        Err(LLMError::AuthenticationFailed(_))
    ));
}

#[tokio::test]
async fn test_router_fails_over_to_ollama() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ollama_reply("Final Answer: local"))
        .mount(&server)
        .await;

    let providers: Vec<Box<dyn LLMProvider>> = vec![
        Box::new(OllamaProvider::new(server.uri(), "llama3.1:8b")),
        Box::new(GeminiProvider::new(gemini_config(&server.uri()), None)),
    ];
    let router = LLMRouter::new(providers, "gemini");

    let (text, provider) = router.call(&[Message::user("hi")]).await.unwrap();
    assert_eq!(text, "Final Answer: local");
    assert_eq!(provider, "ollama");
}

#[tokio::test]
async fn test_router_exhausted() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .mount(&server)
        .await;

    let router = LLMRouter::new(
        vec![Box::new(OllamaProvider::new(server.uri(), "llama3.1:8b")) as Box<dyn LLMProvider>],
        "ollama",
    );

    assert!(matches!(
        router.call(&[Message::user("hi")]).await,
        Err(LLMError::AllProvidersExhausted(_))
    ));
}

#[tokio::test]
async fn test_react_loop_over_ollama() {
    let server = MockServer::start().await;

    // First call writes a file, every later call finishes
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ollama_reply(
            " I should save it\nAction: Write Text to File\nAction Input: greeting.txt|hello there",
        ))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ollama_reply(
            " I now know the final answer\nFinal Answer: Saved greeting.txt",
        ))
        .mount(&server)
        .await;

    let dir = tempfile::TempDir::new().unwrap();
    let mut config = Config::default_config();
    config.core.project_root = dir.path().to_path_buf();
    config.llm.default_provider = "ollama".to_string();
    config.validate_and_process().unwrap();

    let router = LLMRouter::new(
        vec![Box::new(OllamaProvider::new(server.uri(), "llama3.1:8b")) as Box<dyn LLMProvider>],
        "ollama",
    );
    let sandbox = std::sync::Arc::new(SandboxPolicy::from_config(&config).unwrap());
    let tools = std::sync::Arc::new(ToolRegistry::builtin(&sandbox, &config).unwrap());
    let orchestrator = Orchestrator::new(
        std::sync::Arc::new(LlmReasoner::new(router).unwrap()),
        tools,
        sandbox,
        AgentSettings::from_config(&config.agent),
    );

    let report = orchestrator.run("save a greeting").await;

    assert_eq!(report.state, LoopState::Completed);
    assert_eq!(report.answer(), Some("Saved greeting.txt"));
    assert_eq!(report.trajectory.steps()[0].thought, "I should save it");
    assert_eq!(
        std::fs::read_to_string(config.core.sandbox_root.join("greeting.txt")).unwrap(),
        "hello there"
    );
}

#[tokio::test]
async fn test_unreachable_provider_fails_run() {
    let dir = tempfile::TempDir::new().unwrap();
    let mut config = Config::default_config();
    config.core.project_root = dir.path().to_path_buf();
    config.validate_and_process().unwrap();

    // Nothing listens on port 9 (discard) in a test sandbox
    let router = LLMRouter::new(
        vec![Box::new(OllamaProvider::new("http://127.0.0.1:9", "llama3.1:8b"))
            as Box<dyn LLMProvider>],
        "ollama",
    );
    let sandbox = std::sync::Arc::new(SandboxPolicy::from_config(&config).unwrap());
    let orchestrator = Orchestrator::new(
        std::sync::Arc::new(LlmReasoner::new(router).unwrap()),
        std::sync::Arc::new(ToolRegistry::empty()),
        sandbox,
        AgentSettings::from_config(&config.agent),
    );

    let report = orchestrator.run("anything").await;
    assert_eq!(report.state, LoopState::Failed);
    assert!(report.trajectory.is_empty());
}
