use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use agent_neo_model::{
    ErrorKind, ModelFinishReason, ModelResponse, ModelResponseEvent,
    ToolCallRequest,
};
use pin_project_lite::pin_project;

use crate::Error;
use crate::io::{Sse, SseError};
use crate::proto::{self, ChatCompletion, ChatCompletionChunk, ToolCall};

struct PartialState {
    sse: Sse,
    id: Option<String>,
    tool_calls: Vec<ToolCall>,
    // Tool calls are only complete once the stream has finished, then
    // they are emitted one by one starting from this index.
    next_tool_call_idx: usize,
    finished: bool,
    finish_reason: Option<ModelFinishReason>,
    completed_sent: bool,
}

type PinnedFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;
type NextEvent = Result<(Option<ModelResponseEvent>, PartialState), Error>;

pin_project! {
    /// A response from an OpenAI-compatible endpoint.
    ///
    /// Streamed responses are decoded lazily from the SSE body, while
    /// non-streamed responses are decoded upfront and replayed as events.
    pub struct OpenAIResponse {
        next_event_fut: Option<PinnedFuture<NextEvent>>,
        buffered: VecDeque<ModelResponseEvent>,
    }
}

impl OpenAIResponse {
    #[inline]
    pub fn from_sse(sse: Sse) -> Self {
        let partial_state = PartialState {
            sse,
            id: None,
            tool_calls: Default::default(),
            next_tool_call_idx: 0,
            finished: false,
            finish_reason: None,
            completed_sent: false,
        };
        let next_event_fut = async move { next_event(partial_state).await };
        Self {
            next_event_fut: Some(Box::pin(next_event_fut)),
            buffered: VecDeque::new(),
        }
    }

    pub fn from_completion(completion: ChatCompletion) -> Result<Self, Error> {
        let Some(choice) = completion.choices.into_iter().next() else {
            return Err(Error::new(
                "completion has no choices",
                ErrorKind::Protocol,
            ));
        };

        let mut buffered = VecDeque::new();
        if let Some(content) = choice.message.content {
            if !content.is_empty() {
                buffered.push_back(ModelResponseEvent::MessageDelta(content));
            }
        }
        let tool_calls = choice.message.tool_calls.unwrap_or_default();
        let has_tool_calls = !tool_calls.is_empty();
        for (idx, tool_call) in tool_calls.into_iter().enumerate() {
            let req = convert_tool_call(tool_call, idx)?;
            buffered.push_back(ModelResponseEvent::ToolCall(req));
        }

        let finish_reason = match choice.finish_reason.as_deref() {
            Some(reason) => parse_finish_reason(reason),
            None if has_tool_calls => ModelFinishReason::ToolCalls,
            None => ModelFinishReason::Stop,
        };
        buffered.push_back(ModelResponseEvent::Completed(finish_reason));

        Ok(Self {
            next_event_fut: None,
            buffered,
        })
    }
}

impl ModelResponse for OpenAIResponse {
    type Error = crate::Error;

    fn poll_next_event(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Option<ModelResponseEvent>, Self::Error>> {
        let this = self.project();
        if let Some(event) = this.buffered.pop_front() {
            return Poll::Ready(Ok(Some(event)));
        }

        let Some(next_event_fut) = this.next_event_fut else {
            return Poll::Ready(Ok(None));
        };
        let (event, partial_state) =
            match ready!(next_event_fut.as_mut().poll(cx)) {
                Ok((Some(event), partial_state)) => (event, partial_state),
                Ok((None, _)) => {
                    *this.next_event_fut = None;
                    return Poll::Ready(Ok(None));
                }
                Err(err) => {
                    *this.next_event_fut = None;
                    return Poll::Ready(Err(err));
                }
            };

        // The stream may still have more data to pull, create a new future for
        // the next event.
        let next_event_fut = async move { next_event(partial_state).await };
        *this.next_event_fut = Some(Box::pin(next_event_fut));

        Poll::Ready(Ok(Some(event)))
    }
}

async fn next_event(
    mut partial_state: PartialState,
) -> Result<(Option<ModelResponseEvent>, PartialState), Error> {
    let mut message_delta = None;

    while !partial_state.finished {
        let sse_event = match partial_state.sse.next_event().await {
            Ok(Some(event)) => event,
            Ok(None) => {
                finish_stream(&mut partial_state)?;
                break;
            }
            Err(SseError::ChunksError(err)) => {
                return Err(Error::new(err.message, err.kind));
            }
            Err(SseError::InvalidPayload) => {
                return Err(Error::new(
                    "invalid event stream payload",
                    ErrorKind::Protocol,
                ));
            }
        };
        trace!("got sse event: {sse_event}");
        if sse_event == "[DONE]" {
            finish_stream(&mut partial_state)?;
            break;
        }

        let chunk = serde_json::from_str::<ChatCompletionChunk>(&sse_event)
            .map_err(|err| Error::new(format!("{err}"), ErrorKind::Protocol))?;
        if let Some(id) = chunk.id {
            if partial_state.id.get_or_insert_with(|| id.clone()) != &id {
                return Err(Error::new(
                    "chunk id mismatch",
                    ErrorKind::Protocol,
                ));
            }
        }

        // Usage statistics come in a chunk without choices.
        let Some(choice) = chunk.choices.into_iter().next() else {
            continue;
        };

        if let Some(content) = choice.delta.content {
            if !content.is_empty() {
                message_delta = Some(content);
            }
        }
        if let Some(tool_calls) = choice.delta.tool_calls {
            for tool_call in tool_calls {
                merge_tool_call(&mut partial_state.tool_calls, tool_call);
            }
        }
        if let Some(finish_reason) = choice.finish_reason {
            partial_state.finish_reason =
                Some(parse_finish_reason(&finish_reason));
        }

        if message_delta.is_some() {
            break;
        }
    }

    // The order of events are important. Always emit message deltas first,
    // then emit tool calls, and finally emit the finish reason.

    if let Some(message_delta) = message_delta {
        return Ok((
            Some(ModelResponseEvent::MessageDelta(message_delta)),
            partial_state,
        ));
    }

    let idx = partial_state.next_tool_call_idx;
    if let Some(tool_call) = partial_state.tool_calls.get(idx) {
        partial_state.next_tool_call_idx += 1;
        let req = convert_tool_call(tool_call.clone(), idx)?;
        return Ok((Some(ModelResponseEvent::ToolCall(req)), partial_state));
    }

    if !partial_state.completed_sent {
        partial_state.completed_sent = true;
        let Some(finish_reason) = partial_state.finish_reason else {
            return Err(Error::new(
                "stream ended before completion",
                ErrorKind::Protocol,
            ));
        };
        return Ok((
            Some(ModelResponseEvent::Completed(finish_reason)),
            partial_state,
        ));
    }

    Ok((None, partial_state))
}

/// Marks the stream as finished. Both the end of the body and the `[DONE]`
/// marker require a finish reason to have arrived.
fn finish_stream(partial_state: &mut PartialState) -> Result<(), Error> {
    if partial_state.finish_reason.is_none() {
        return Err(Error::new(
            "stream ended before completion",
            ErrorKind::Protocol,
        ));
    }
    partial_state.finished = true;
    Ok(())
}

/// Patches a partial tool call into the list. Deltas of the same call
/// share an index; servers that omit the index only send the id with the
/// first delta of each call.
fn merge_tool_call(tool_calls: &mut Vec<ToolCall>, tool_call: ToolCall) {
    let partial_tool_call = match tool_call.index {
        Some(index) => {
            tool_calls.iter_mut().find(|t| t.index == Some(index))
        }
        None if tool_call.id.is_some() => None,
        None => tool_calls.last_mut(),
    };
    let Some(partial_tool_call) = partial_tool_call else {
        tool_calls.push(tool_call);
        return;
    };

    if let Some(id) = tool_call.id {
        partial_tool_call.id.get_or_insert_default().push_str(&id);
    }
    if let Some(ty) = tool_call.r#type {
        partial_tool_call.r#type = Some(ty);
    }
    if let Some(function) = tool_call.function {
        match partial_tool_call.function {
            Some(ref mut partial_func) => {
                if let Some(name) = function.name {
                    partial_func.name.get_or_insert_default().push_str(&name);
                }
                if let Some(arguments) = function.arguments {
                    partial_func
                        .arguments
                        .get_or_insert_default()
                        .push_str(&arguments);
                }
            }
            None => partial_tool_call.function = Some(function),
        }
    }
}

fn convert_tool_call(
    tool_call: ToolCall,
    idx: usize,
) -> Result<ToolCallRequest, Error> {
    let id = tool_call.id.unwrap_or_else(|| format!("call_{idx}"));
    let Some(function) = tool_call.function else {
        return Err(Error::new(
            format!("tool call {id} has no function"),
            ErrorKind::Protocol,
        ));
    };
    let Some(name) = function.name.filter(|name| !name.is_empty()) else {
        return Err(Error::new(
            format!("tool call {id} has no name"),
            ErrorKind::Protocol,
        ));
    };
    let arguments = proto::parse_arguments(function.arguments.as_deref())
        .map_err(|reason| Error::new(reason, ErrorKind::Protocol))?;
    Ok(ToolCallRequest {
        id,
        name,
        arguments,
    })
}

#[inline]
fn parse_finish_reason(reason: &str) -> ModelFinishReason {
    if reason == "tool_calls" {
        ModelFinishReason::ToolCalls
    } else {
        ModelFinishReason::Stop
    }
}

#[cfg(test)]
mod tests {
    use std::future::poll_fn;
    use std::pin::pin;

    use bytes::Bytes;
    use serde_json::json;

    use super::*;
    use crate::io::Chunks;

    async fn collect_events(
        resp: OpenAIResponse,
    ) -> Result<Vec<ModelResponseEvent>, Error> {
        let mut resp = pin!(resp);
        let mut events = vec![];
        while let Some(event) =
            poll_fn(|cx| resp.as_mut().poll_next_event(cx)).await?
        {
            events.push(event);
        }
        Ok(events)
    }

    fn sse_response(body: &'static [u8]) -> OpenAIResponse {
        let chunks = Chunks::from_vec_deque(vec![Bytes::from_static(body)].into());
        OpenAIResponse::from_sse(Sse::new(chunks))
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
    async fn test_text_events() {
        let resp =
            sse_response(include_bytes!("../fixtures/stream_text.txt"));
        let events = collect_events(resp).await.unwrap();
        assert_eq!(text_of(&events), "Hi there! How can I help?");
        assert_eq!(
            events.last(),
            Some(&ModelResponseEvent::Completed(ModelFinishReason::Stop))
        );
    }

    #[tokio::test]
    async fn test_tool_call_events() {
        let resp =
            sse_response(include_bytes!("../fixtures/stream_tool_calls.txt"));
        let events = collect_events(resp).await.unwrap();
        let tool_calls = events
            .iter()
            .filter_map(|event| match event {
                ModelResponseEvent::ToolCall(req) => Some(req.clone()),
                _ => None,
            })
            .collect::<Vec<_>>();
        assert_eq!(
            tool_calls,
            vec![
                ToolCallRequest {
                    id: "call_weather".to_owned(),
                    name: "get_weather".to_owned(),
                    arguments: json!({ "location": "Paris" }),
                },
                ToolCallRequest {
                    id: "call_time".to_owned(),
                    name: "get_current_time".to_owned(),
                    arguments: json!({}),
                },
            ]
        );
        assert_eq!(
            events.last(),
            Some(&ModelResponseEvent::Completed(
                ModelFinishReason::ToolCalls
            ))
        );
    }

    #[tokio::test]
    async fn test_streaming_matches_completion() {
        let streamed = collect_events(sse_response(include_bytes!(
            "../fixtures/stream_text.txt"
        )))
        .await
        .unwrap();

        let completion: ChatCompletion = serde_json::from_slice(include_bytes!(
            "../fixtures/completion_text.json"
        ))
        .unwrap();
        let whole = collect_events(
            OpenAIResponse::from_completion(completion).unwrap(),
        )
        .await
        .unwrap();

        assert_eq!(whole.len(), 2);
        assert_eq!(text_of(&streamed), text_of(&whole));
    }

    #[tokio::test]
    async fn test_completion_with_tool_calls() {
        let completion: ChatCompletion = serde_json::from_value(json!({
            "id": "chatcmpl-2",
            "object": "chat.completion",
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {
                            "name": "get_weather",
                            "arguments": "{\"location\":\"Paris\"}"
                        }
                    }]
                },
                "finish_reason": "tool_calls"
            }]
        }))
        .unwrap();
        let events = collect_events(
            OpenAIResponse::from_completion(completion).unwrap(),
        )
        .await
        .unwrap();
        assert_eq!(
            events,
            vec![
                ModelResponseEvent::ToolCall(ToolCallRequest {
                    id: "call_1".to_owned(),
                    name: "get_weather".to_owned(),
                    arguments: json!({ "location": "Paris" }),
                }),
                ModelResponseEvent::Completed(ModelFinishReason::ToolCalls),
            ]
        );
    }

    #[tokio::test]
    async fn test_malformed_responses() {
        let completion: ChatCompletion =
            serde_json::from_value(json!({ "choices": [] })).unwrap();
        let err = OpenAIResponse::from_completion(completion).err().unwrap();
        assert_eq!(err.kind, ErrorKind::Protocol);

        let resp = sse_response(b"data: {\"choices\": 42}\n\n");
        let err = collect_events(resp).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Protocol);

        // Cut off before any finish reason.
        let resp = sse_response(
            b"data: {\"id\":\"c\",\"choices\":[{\"delta\":{\"content\":\"Hi\"},\"finish_reason\":null}]}\n\n",
        );
        let mut resp = pin!(resp);
        let first = poll_fn(|cx| resp.as_mut().poll_next_event(cx)).await;
        assert_eq!(
            first.unwrap(),
            Some(ModelResponseEvent::MessageDelta("Hi".to_owned()))
        );
        let err = poll_fn(|cx| resp.as_mut().poll_next_event(cx))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Protocol);

        // Terminated with `[DONE]`, but still without a finish reason.
        let resp = sse_response(
            b"data: {\"id\":\"c\",\"choices\":[{\"delta\":{\"content\":\"Hi\"},\"finish_reason\":null}]}\n\ndata: [DONE]\n\n",
        );
        let mut resp = pin!(resp);
        let first = poll_fn(|cx| resp.as_mut().poll_next_event(cx)).await;
        assert_eq!(
            first.unwrap(),
            Some(ModelResponseEvent::MessageDelta("Hi".to_owned()))
        );
        let err = poll_fn(|cx| resp.as_mut().poll_next_event(cx))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Protocol);
        assert_eq!(err.message(), "stream ended before completion");
    }
}
