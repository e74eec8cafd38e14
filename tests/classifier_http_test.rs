//! HTTP intent classifier against a mock Messages API.

use std::sync::Arc;

use mockito::Server;

use simroute::adapters::classifier::AnthropicIntentClassifier;
use simroute::domain::models::{ClassifierConfig, RoutingConfig, RoutingMethod};
use simroute::domain::ports::ClassifierError;
use simroute::services::intent_router::IntentRouter;
use simroute::{AgentKind, IntentClassifier, Request, RoutingMode};

fn config(base_url: String) -> ClassifierConfig {
    ClassifierConfig {
        enabled: true,
        api_key: Some("test-api-key".to_string()),
        base_url,
        requests_per_second: 50,
        ..ClassifierConfig::default()
    }
}

fn reply_body(text: &str) -> String {
    serde_json::json!({
        "id": "msg_01ABC123",
        "type": "message",
        "role": "assistant",
        "content": [{"type": "text", "text": text}],
        "model": "claude-3-5-haiku-latest",
        "stop_reason": "end_turn",
        "usage": {"input_tokens": 120, "output_tokens": 24}
    })
    .to_string()
}

#[tokio::test]
async fn test_classify_success() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/v1/messages")
        .match_header("x-api-key", "test-api-key")
        .match_header("anthropic-version", "2023-06-01")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(reply_body(
            "{\"intent\": \"sweep\", \"confidence\": 0.91, \"reasoning\": \"varies enrichment\"}",
        ))
        .create_async()
        .await;

    let classifier = AnthropicIntentClassifier::from_config(&config(server.url())).unwrap();
    let classification = classifier
        .classify("try enrichments between 3 and 5 percent")
        .await
        .unwrap();

    assert_eq!(classification.intent, "sweep");
    assert!((classification.confidence - 0.91).abs() < 1e-9);
    assert_eq!(classification.reasoning, "varies enrichment");
    mock.assert_async().await;
}

#[tokio::test]
async fn test_api_error_status() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("POST", "/v1/messages")
        .with_status(529)
        .with_body("{\"type\":\"error\",\"error\":{\"type\":\"overloaded_error\"}}")
        .create_async()
        .await;

    let classifier = AnthropicIntentClassifier::from_config(&config(server.url())).unwrap();
    match classifier.classify("list runs").await {
        Err(ClassifierError::Api { status, body }) => {
            assert_eq!(status, 529);
            assert!(body.contains("overloaded_error"));
        }
        other => panic!("unexpected result: {other:?}"),
    }
}

#[tokio::test]
async fn test_prose_reply_is_invalid() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("POST", "/v1/messages")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(reply_body("That sounds like a parameter sweep to me."))
        .create_async()
        .await;

    let classifier = AnthropicIntentClassifier::from_config(&config(server.url())).unwrap();
    assert!(matches!(
        classifier.classify("vary the pitch").await,
        Err(ClassifierError::InvalidResponse(_))
    ));
}

#[tokio::test]
async fn test_router_falls_back_when_api_fails() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("POST", "/v1/messages")
        .with_status(500)
        .with_body("internal error")
        .create_async()
        .await;

    let classifier: Arc<dyn IntentClassifier> =
        Arc::new(AnthropicIntentClassifier::from_config(&config(server.url())).unwrap());
    let router = IntentRouter::new(Some(classifier));
    let request = Request::new("list previous runs").with_mode(RoutingMode::Probabilistic);

    let decision = router.route(&request, &RoutingConfig::default()).await;
    assert_eq!(decision.agent, AgentKind::Query);
    assert_eq!(decision.method, RoutingMethod::Deterministic);
}
