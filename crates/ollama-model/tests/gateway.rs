use std::future::poll_fn;
use std::pin::pin;
use std::time::Duration;

use agent_neo_model::{
    ErrorKind, ModelFinishReason, ModelMessage, ModelProvider,
    ModelProviderError, ModelRequest, ModelResponse, ModelResponseEvent,
};
use agent_neo_ollama_model::{OllamaConfigBuilder, OllamaProvider};
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn provider_for(server: &MockServer) -> OllamaProvider {
    let config = OllamaConfigBuilder::new().with_base_url(server.uri()).build();
    OllamaProvider::new(config).unwrap()
}

fn request(stream: bool) -> ModelRequest {
    let mut req =
        ModelRequest::with_messages([ModelMessage::User("Hello".to_owned())]);
    req.stream = stream;
    req
}

async fn collect_text<R: ModelResponse>(resp: R) -> Result<String, R::Error> {
    let mut resp = pin!(resp);
    let mut text = String::new();
    let mut completed = false;
    while let Some(event) =
        poll_fn(|cx| resp.as_mut().poll_next_event(cx)).await?
    {
        match event {
            ModelResponseEvent::MessageDelta(delta) => text.push_str(&delta),
            ModelResponseEvent::Completed(reason) => {
                assert_eq!(reason, ModelFinishReason::Stop);
                completed = true;
            }
            ModelResponseEvent::ToolCall(req) => panic!("unexpected {req:?}"),
        }
    }
    assert!(completed);
    Ok(text)
}

#[tokio::test]
async fn streams_ndjson_chat() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .and(body_partial_json(json!({ "model": "hailo-llm", "stream": true })))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            include_str!("../fixtures/chat_text.ndjson"),
            "application/x-ndjson",
        ))
        .expect(1)
        .mount(&server)
        .await;

    let resp = provider_for(&server)
        .send_request(&request(true))
        .await
        .unwrap();
    assert_eq!(collect_text(resp).await.unwrap(), "Hello! How can I help?");
}

#[tokio::test]
async fn reads_whole_chat() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .and(body_partial_json(json!({ "stream": false })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "model": "hailo-llm",
            "message": { "role": "assistant", "content": "Hello! How can I help?" },
            "done": true,
            "done_reason": "stop"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let resp = provider_for(&server)
        .send_request(&request(false))
        .await
        .unwrap();
    assert_eq!(collect_text(resp).await.unwrap(), "Hello! How can I help?");
}

#[tokio::test]
async fn lists_models() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "models": [
                { "name": "hailo-llm", "size": 1 },
                { "name": "qwen2:1.5b", "size": 2 }
            ]
        })))
        .mount(&server)
        .await;

    let models = provider_for(&server).list_models().await.unwrap();
    assert_eq!(models, vec!["hailo-llm", "qwen2:1.5b"]);
}

#[tokio::test]
async fn maps_failures_to_error_kinds() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(
            ResponseTemplate::new(503).set_body_string("accelerator busy"),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
        .mount(&server)
        .await;

    let provider = provider_for(&server);
    let err = provider.send_request(&request(true)).await.err().unwrap();
    assert_eq!(err.kind(), ErrorKind::Unavailable);
    assert!(err.message().contains("accelerator busy"));

    let err = provider.list_models().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Protocol);
}

#[tokio::test]
async fn times_out_slow_gateway() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "done": true }))
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let config = OllamaConfigBuilder::new()
        .with_base_url(server.uri())
        .with_timeout(Duration::from_millis(200))
        .build();
    let provider = OllamaProvider::new(config).unwrap();
    let err = provider.send_request(&request(false)).await.err().unwrap();
    assert_eq!(err.kind(), ErrorKind::Timeout);
}
