use std::future::poll_fn;
use std::pin::pin;
use std::time::Duration;

use agent_neo_model::{
    ErrorKind, ModelFinishReason, ModelMessage, ModelProvider,
    ModelProviderError, ModelRequest, ModelResponse, ModelResponseEvent,
};
use agent_neo_openai_model::{OpenAIConfigBuilder, OpenAIProvider};
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn provider_for(server: &MockServer) -> OpenAIProvider {
    let config = OpenAIConfigBuilder::with_api_key("test-key")
        .with_base_url(format!("{}/v1", server.uri()))
        .with_model("hailo-llm")
        .build();
    OpenAIProvider::new(config).unwrap()
}

fn hello_request(stream: bool) -> ModelRequest {
    let mut req = ModelRequest::with_messages([
        ModelMessage::System("Be concise.".to_owned()),
        ModelMessage::User("Hello".to_owned()),
    ]);
    req.stream = stream;
    req
}

async fn collect_events<R: ModelResponse>(
    resp: R,
) -> Result<Vec<ModelResponseEvent>, R::Error> {
    let mut resp = pin!(resp);
    let mut events = vec![];
    while let Some(event) =
        poll_fn(|cx| resp.as_mut().poll_next_event(cx)).await?
    {
        events.push(event);
    }
    Ok(events)
}

fn text_of(events: &[ModelResponseEvent]) -> String {
    events
        .iter()
        .filter_map(|event| match event {
            ModelResponseEvent::MessageDelta(delta) => Some(delta.as_str()),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn streams_text_from_sse_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer test-key"))
        .and(body_partial_json(json!({ "model": "hailo-llm", "stream": true })))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            include_str!("../fixtures/stream_text.txt"),
            "text/event-stream",
        ))
        .expect(1)
        .mount(&server)
        .await;

    let provider = provider_for(&server);
    let resp = provider.send_request(&hello_request(true)).await.unwrap();
    let events = collect_events(resp).await.unwrap();
    assert_eq!(text_of(&events), "Hi there! How can I help?");
    assert_eq!(
        events.last(),
        Some(&ModelResponseEvent::Completed(ModelFinishReason::Stop))
    );
}

#[tokio::test]
async fn reads_whole_completion() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_partial_json(json!({ "stream": false })))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            include_str!("../fixtures/completion_text.json"),
            "application/json",
        ))
        .expect(1)
        .mount(&server)
        .await;

    let provider = provider_for(&server);
    let resp = provider.send_request(&hello_request(false)).await.unwrap();
    let events = collect_events(resp).await.unwrap();
    assert_eq!(
        events,
        vec![
            ModelResponseEvent::MessageDelta(
                "Hi there! How can I help?".to_owned()
            ),
            ModelResponseEvent::Completed(ModelFinishReason::Stop),
        ]
    );
}

#[tokio::test]
async fn omits_authorization_without_api_key() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            include_str!("../fixtures/completion_text.json"),
            "application/json",
        ))
        .mount(&server)
        .await;

    let config = OpenAIConfigBuilder::without_api_key()
        .with_base_url(server.uri())
        .build();
    let provider = OpenAIProvider::new(config).unwrap();
    provider.send_request(&hello_request(false)).await.unwrap();

    let received = server.received_requests().await.unwrap();
    assert_eq!(received.len(), 1);
    assert!(!received[0].headers.contains_key("authorization"));
}

#[tokio::test]
async fn maps_http_status_to_error_kind() {
    let cases = [
        (500, ErrorKind::Unavailable),
        (503, ErrorKind::Unavailable),
        (429, ErrorKind::RateLimitExceeded),
        (400, ErrorKind::Protocol),
    ];
    for (status, kind) in cases {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(status).set_body_string("model overloaded"),
            )
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        let err = provider
            .send_request(&hello_request(true))
            .await
            .err()
            .unwrap();
        assert_eq!(err.kind(), kind, "status {status}");
        assert!(err.message().contains("model overloaded"));
    }
}

#[tokio::test]
async fn rejects_malformed_completion() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw("{\"choices\": 42", "application/json"),
        )
        .mount(&server)
        .await;

    let provider = provider_for(&server);
    let err = provider
        .send_request(&hello_request(false))
        .await
        .err()
        .unwrap();
    assert_eq!(err.kind(), ErrorKind::Protocol);
}

#[tokio::test]
async fn rejects_unexpected_content_type() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw("<html></html>", "text/html"),
        )
        .mount(&server)
        .await;

    let provider = provider_for(&server);
    let err = provider
        .send_request(&hello_request(true))
        .await
        .err()
        .unwrap();
    assert_eq!(err.kind(), ErrorKind::Protocol);
}

#[tokio::test]
async fn times_out_slow_backend() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(
                    include_str!("../fixtures/completion_text.json"),
                    "application/json",
                )
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let config = OpenAIConfigBuilder::without_api_key()
        .with_base_url(server.uri())
        .with_timeout(Duration::from_millis(200))
        .build();
    let provider = OpenAIProvider::new(config).unwrap();
    let err = provider
        .send_request(&hello_request(false))
        .await
        .err()
        .unwrap();
    assert_eq!(err.kind(), ErrorKind::Timeout);
}

#[tokio::test]
async fn unreachable_backend_is_unavailable() {
    // Nothing listens on the discard port.
    let config = OpenAIConfigBuilder::without_api_key()
        .with_base_url("http://127.0.0.1:9")
        .build();
    let provider = OpenAIProvider::new(config).unwrap();
    let err = provider
        .send_request(&hello_request(true))
        .await
        .err()
        .unwrap();
    assert_eq!(err.kind(), ErrorKind::Unavailable);
}
