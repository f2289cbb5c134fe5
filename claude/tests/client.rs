//! HTTP-level tests for the Claude client against a local mock server.

use claude::{Claude, Error, Message, Request};
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client_for(server: &MockServer) -> Claude {
    Claude::new("test-key")
        .with_model("test-model")
        .with_base_url(format!("{}/v1", server.uri()))
}

#[tokio::test]
async fn test_complete_sends_model_temperature_and_system() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(header("x-api-key", "test-key"))
        .and(header("anthropic-version", "2023-06-01"))
        .and(body_partial_json(json!({
            "model": "test-model",
            "max_tokens": 200,
            "system": "You categorize stories.",
            "temperature": 0.3
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "msg_01",
            "model": "test-model",
            "content": [{"type": "text", "text": "{\"category\": \"animal\"}"}],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 12, "output_tokens": 7}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let request = Request::new(vec![Message::user("a brave rabbit")])
        .with_system("You categorize stories.")
        .with_max_tokens(200)
        .with_temperature(0.3);

    let response = client_for(&server).complete(request).await.unwrap();
    assert_eq!(response.text(), "{\"category\": \"animal\"}");
    assert_eq!(response.usage.input_tokens, 12);
}

#[tokio::test]
async fn test_api_error_carries_status_and_body() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(429).set_body_string("rate limited"))
        .mount(&server)
        .await;

    let err = client_for(&server)
        .complete(Request::new(vec![Message::user("hi")]))
        .await
        .unwrap_err();

    match err {
        Error::Api { status, ref message } => {
            assert_eq!(status, 429);
            assert_eq!(message, "rate limited");
        }
        other => panic!("expected API error, got {other:?}"),
    }
    assert!(err.is_rate_limited());
}

#[tokio::test]
async fn test_malformed_body_is_parse_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let err = client_for(&server)
        .complete(Request::new(vec![Message::user("hi")]))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Parse(_)));
}

#[tokio::test]
async fn test_unreachable_server_is_network_error() {
    let client = Claude::new("test-key").with_base_url("http://127.0.0.1:9/v1");

    let err = client
        .complete(Request::new(vec![Message::user("hi")]))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Network(_) | Error::Timeout));
}
