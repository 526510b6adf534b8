//! A local fake model for testing purpose.

mod preset;

use std::collections::{HashMap, VecDeque};
use std::error::Error as StdError;
use std::fmt::{self, Display, Formatter};
use std::future::ready;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll, ready};
use std::time::Duration;

use agent_neo_model::{
    ErrorKind, ModelFinishReason, ModelProvider, ModelProviderError,
    ModelRequest, ModelResponse, ModelResponseEvent,
};
use tokio::time::{Sleep, sleep};

pub use preset::*;

#[derive(Clone, Debug)]
pub struct Error {
    message: String,
    kind: ErrorKind,
}

impl Error {
    fn new(message: impl Into<String>, kind: ErrorKind) -> Self {
        Self {
            message: message.into(),
            kind,
        }
    }

    #[inline]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.kind)
    }
}

impl StdError for Error {}

impl ModelProviderError for Error {
    #[inline]
    fn kind(&self) -> ErrorKind {
        self.kind
    }
}

pub struct TestModelResponse {
    events: VecDeque<Result<ModelResponseEvent, Error>>,
    delay: Duration,
    sleep: Option<Pin<Box<Sleep>>>,
}

impl ModelResponse for TestModelResponse {
    type Error = crate::Error;

    fn poll_next_event(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Option<ModelResponseEvent>, Self::Error>> {
        let this = self.get_mut();
        if this.events.is_empty() {
            return Poll::Ready(Ok(None));
        }

        let delay = this.delay;
        let sleep = this.sleep.get_or_insert_with(|| Box::pin(sleep(delay)));
        ready!(sleep.as_mut().poll(cx));
        this.sleep = None;

        match this.events.pop_front() {
            Some(Ok(event)) => Poll::Ready(Ok(Some(event))),
            Some(Err(err)) => {
                // A failed response never recovers.
                this.events.clear();
                Poll::Ready(Err(err))
            }
            None => Poll::Ready(Ok(None)),
        }
    }
}

#[derive(Clone)]
enum ConversationStep {
    System,
    UserInput,
    ToolResult,
    AssistantResponse(PresetResponse),
}

/// A local fake model for testing purpose.
///
/// Before sending requests, you need to setup the conversation script, which
/// is how the model should respond to a request. Each step matches the
/// message at the same position in the request, and the response for a
/// request with `n` messages is the assistant step at index `n`. If there
/// are no enough steps in the script, an error will be returned.
///
/// Every request is recorded and can be inspected with [`requests`].
///
/// # Note
///
/// This type is not optimized for production use, there are heavy memory
/// copies involved. You should only use it for testing.
///
/// [`requests`]: TestModelProvider::requests
#[derive(Clone, Default)]
pub struct TestModelProvider {
    conversation_script: Vec<ConversationStep>,
    delay: Option<Duration>,
    attempts: Arc<Mutex<HashMap<usize, u64>>>,
    requests: Arc<Mutex<Vec<ModelRequest>>>,
}

impl TestModelProvider {
    #[inline]
    pub fn add_system_step(&mut self) {
        self.conversation_script.push(ConversationStep::System);
    }

    #[inline]
    pub fn add_user_input_step(&mut self) {
        self.conversation_script.push(ConversationStep::UserInput);
    }

    #[inline]
    pub fn add_tool_result_step(&mut self) {
        self.conversation_script.push(ConversationStep::ToolResult);
    }

    #[inline]
    pub fn add_assistant_response_step(&mut self, preset: PresetResponse) {
        self.conversation_script
            .push(ConversationStep::AssistantResponse(preset));
    }

    #[inline]
    pub fn set_delay(&mut self, duration: Duration) {
        self.delay = Some(duration);
    }

    /// Returns all requests received so far, including failed ones.
    pub fn requests(&self) -> Vec<ModelRequest> {
        lock(&self.requests).clone()
    }

    fn make_response(
        &self,
        req: &ModelRequest,
    ) -> Result<TestModelResponse, Error> {
        let step_idx = req.messages.len();
        let Some(step) = self.conversation_script.get(step_idx) else {
            return Err(Error::new("no enough steps", ErrorKind::Protocol));
        };
        let ConversationStep::AssistantResponse(preset) = step else {
            return Err(Error::new(
                "not an assistant response step",
                ErrorKind::Protocol,
            ));
        };

        if let Some(failures) = preset.failures {
            let mut attempts = lock(&self.attempts);
            let attempt = attempts.entry(step_idx).or_default();
            *attempt += 1;
            if failures == 0 || *attempt <= failures {
                return Err(Error::new("preset failure", preset.failure_kind));
            }
        }

        Ok(TestModelResponse {
            events: build_events(&preset.events, req.stream),
            delay: self.delay.unwrap_or(Duration::from_millis(1)),
            sleep: None,
        })
    }
}

impl ModelProvider for TestModelProvider {
    type Error = crate::Error;
    type Response = TestModelResponse;

    fn model_name(&self) -> &str {
        "test-model"
    }

    fn send_request(
        &self,
        req: &ModelRequest,
    ) -> impl Future<Output = Result<Self::Response, Self::Error>> + Send + 'static
    {
        lock(&self.requests).push(req.clone());
        ready(self.make_response(req))
    }
}

/// Turns the preset into response events. Without streaming, all deltas
/// are merged into one, like a non-streamed response body would be.
fn build_events(
    preset_events: &[PresetEvent],
    stream: bool,
) -> VecDeque<Result<ModelResponseEvent, Error>> {
    let mut events = VecDeque::new();
    let mut merged_text = String::new();
    let mut tool_calls = vec![];

    for preset_event in preset_events {
        match preset_event {
            PresetEvent::MessageDelta(text) if stream => {
                events.push_back(Ok(ModelResponseEvent::MessageDelta(
                    text.clone(),
                )));
            }
            PresetEvent::MessageDelta(text) => merged_text.push_str(text),
            PresetEvent::ToolCall(req) if stream => {
                events.push_back(Ok(ModelResponseEvent::ToolCall(req.clone())));
            }
            PresetEvent::ToolCall(req) => tool_calls.push(req.clone()),
            PresetEvent::Error(kind) => {
                if !stream {
                    // The body would never have been received completely.
                    events.clear();
                }
                events.push_back(Err(Error::new("preset error", *kind)));
                return events;
            }
        }
    }

    if !merged_text.is_empty() {
        events.push_back(Ok(ModelResponseEvent::MessageDelta(merged_text)));
    }
    events.extend(
        tool_calls
            .into_iter()
            .map(|req| Ok(ModelResponseEvent::ToolCall(req))),
    );

    let has_tool_call = preset_events
        .iter()
        .any(|event| matches!(event, PresetEvent::ToolCall(_)));
    events.push_back(Ok(ModelResponseEvent::Completed(if has_tool_call {
        ModelFinishReason::ToolCalls
    } else {
        ModelFinishReason::Stop
    })));
    events
}

#[inline]
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use std::future::poll_fn;
    use std::pin::pin;

    use agent_neo_model::{
        AssistantToolCalls, ModelMessage, ModelRequest, ModelTool,
        ToolCallRequest, ToolCallResult,
    };
    use serde_json::json;

    use super::*;

    async fn collect_response(
        resp: TestModelResponse,
    ) -> Result<(Vec<String>, Vec<ToolCallRequest>), Error> {
        let mut resp = pin!(resp);
        let mut deltas = vec![];
        let mut tool_calls = vec![];
        loop {
            let Some(event) =
                poll_fn(|cx| resp.as_mut().poll_next_event(cx)).await?
            else {
                break;
            };
            match event {
                ModelResponseEvent::Completed(_) => {}
                ModelResponseEvent::MessageDelta(delta) => deltas.push(delta),
                ModelResponseEvent::ToolCall(req) => tool_calls.push(req),
            }
        }
        Ok((deltas, tool_calls))
    }

    fn weather_tool() -> ModelTool {
        ModelTool {
            name: "get_weather".to_owned(),
            description: "Get the current weather for a location.".to_owned(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "location": { "type": "string" }
                },
                "required": ["location"]
            }),
        }
    }

    #[tokio::test]
    async fn test_send_request() {
        let mut provider = TestModelProvider::default();
        provider.add_system_step();
        provider.add_user_input_step();
        provider.add_assistant_response_step(PresetResponse::with_events([
            PresetEvent::delta("Sure, "),
            PresetEvent::delta("let me take a look."),
            PresetEvent::tool_call(
                "call_1",
                "get_weather",
                json!({ "location": "Paris" }),
            ),
        ]));
        provider.add_tool_result_step();
        provider.add_assistant_response_step(PresetResponse::with_text(
            "It's clear and 18°C in Paris.",
        ));

        let mut req = ModelRequest {
            messages: vec![
                ModelMessage::System("Be concise.".to_owned()),
                ModelMessage::User("Weather in Paris?".to_owned()),
            ],
            tools: vec![weather_tool()],
            stream: true,
        };
        let resp = provider.send_request(&req).await.unwrap();
        let (deltas, tool_calls) = collect_response(resp).await.unwrap();
        assert_eq!(deltas.concat(), "Sure, let me take a look.");
        assert_eq!(tool_calls.len(), 1);
        assert_eq!(tool_calls[0].arguments, json!({ "location": "Paris" }));

        req.messages.push(ModelMessage::ToolCalls(AssistantToolCalls {
            content: deltas.concat(),
            calls: tool_calls,
        }));
        req.messages.push(ModelMessage::Tool(ToolCallResult {
            id: "call_1".to_owned(),
            content: "Paris: Clear, 18°C (feels like 17°C).".to_owned(),
        }));
        let resp = provider.send_request(&req).await.unwrap();
        let (deltas, tool_calls) = collect_response(resp).await.unwrap();
        assert_eq!(deltas, vec!["It's clear and 18°C in Paris."]);
        assert!(tool_calls.is_empty());

        assert_eq!(provider.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_non_streaming_merges_deltas() {
        let mut provider = TestModelProvider::default();
        provider.add_user_input_step();
        provider.add_assistant_response_step(PresetResponse::with_events([
            PresetEvent::delta("Hello, "),
            PresetEvent::delta("world!"),
        ]));

        let mut req =
            ModelRequest::with_messages([ModelMessage::User("Hi".to_owned())]);
        req.stream = false;
        let resp = provider.send_request(&req).await.unwrap();
        let (deltas, _) = collect_response(resp).await.unwrap();
        assert_eq!(deltas, vec!["Hello, world!"]);
    }

    #[tokio::test]
    async fn test_failures() {
        let mut provider = TestModelProvider::default();
        provider.add_user_input_step();
        provider.add_assistant_response_step(
            PresetResponse::with_text("Finally.")
                .with_failures(2)
                .with_failure_kind(ErrorKind::Timeout),
        );

        let req =
            ModelRequest::with_messages([ModelMessage::User("Hi".to_owned())]);
        for _ in 0..2 {
            let err = provider.send_request(&req).await.err().unwrap();
            assert_eq!(err.kind(), ErrorKind::Timeout);
        }
        let resp = provider.send_request(&req).await.unwrap();
        let (deltas, _) = collect_response(resp).await.unwrap();
        assert_eq!(deltas.concat(), "Finally.");
    }

    #[tokio::test]
    async fn test_mid_stream_error() {
        let mut provider = TestModelProvider::default();
        provider.add_user_input_step();
        provider.add_assistant_response_step(PresetResponse::with_events([
            PresetEvent::delta("Partial "),
            PresetEvent::Error(ErrorKind::Unavailable),
            PresetEvent::delta("never delivered"),
        ]));

        let req =
            ModelRequest::with_messages([ModelMessage::User("Hi".to_owned())]);
        let resp = provider.send_request(&req).await.unwrap();
        let err = collect_response(resp).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unavailable);
    }

    #[tokio::test]
    async fn test_script_exhausted() {
        let provider = TestModelProvider::default();
        let req =
            ModelRequest::with_messages([ModelMessage::User("Hi".to_owned())]);
        let err = provider.send_request(&req).await.err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Protocol);
        assert_eq!(err.message(), "no enough steps");
    }
}
