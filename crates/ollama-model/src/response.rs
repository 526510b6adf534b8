use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use agent_neo_model::{
    ErrorKind, ModelFinishReason, ModelResponse, ModelResponseEvent,
};
use pin_project_lite::pin_project;

use crate::Error;
use crate::io::{self, Lines};
use crate::proto::{self, ChatResponse};

struct StreamState {
    lines: Lines,
    next_tool_call_idx: usize,
    done: bool,
}

type PinnedFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;
type NextEvents = Result<(Vec<ModelResponseEvent>, StreamState), Error>;

pin_project! {
    /// A response from an Ollama-compatible gateway.
    pub struct OllamaResponse {
        next_events_fut: Option<PinnedFuture<NextEvents>>,
        buffered: VecDeque<ModelResponseEvent>,
    }
}

impl OllamaResponse {
    pub(crate) fn from_lines(lines: Lines) -> Self {
        let state = StreamState {
            lines,
            next_tool_call_idx: 0,
            done: false,
        };
        Self {
            next_events_fut: Some(Box::pin(next_events(state))),
            buffered: VecDeque::new(),
        }
    }

    pub(crate) fn from_chat_response(resp: ChatResponse) -> Result<Self, Error> {
        let mut next_tool_call_idx = 0;
        let events = convert_chunk(resp, &mut next_tool_call_idx, true)?;
        Ok(Self {
            next_events_fut: None,
            buffered: events.into(),
        })
    }
}

impl ModelResponse for OllamaResponse {
    type Error = Error;

    fn poll_next_event(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Option<ModelResponseEvent>, Self::Error>> {
        let this = self.project();
        if let Some(event) = this.buffered.pop_front() {
            return Poll::Ready(Ok(Some(event)));
        }

        let Some(fut) = this.next_events_fut else {
            return Poll::Ready(Ok(None));
        };
        match ready!(fut.as_mut().poll(cx)) {
            Ok((events, state)) => {
                *this.next_events_fut = if state.done {
                    None
                } else {
                    Some(Box::pin(next_events(state)))
                };
                this.buffered.extend(events);
                Poll::Ready(Ok(this.buffered.pop_front()))
            }
            Err(err) => {
                *this.next_events_fut = None;
                Poll::Ready(Err(err))
            }
        }
    }
}

/// Reads lines until some of them yield events, or the stream is done.
async fn next_events(mut state: StreamState) -> NextEvents {
    while !state.done {
        let line = match state.lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                return Err(Error::new(
                    "stream ended before completion",
                    ErrorKind::Protocol,
                ));
            }
            Err(io::Error::Transport { kind, message }) => {
                return Err(Error::new(message, kind));
            }
            Err(io::Error::InvalidPayload) => {
                return Err(Error::new(
                    "response body is not valid UTF-8",
                    ErrorKind::Protocol,
                ));
            }
        };
        trace!("got line: {line}");

        let chunk = serde_json::from_str::<ChatResponse>(&line)
            .map_err(|err| Error::new(format!("{err}"), ErrorKind::Protocol))?;
        state.done = chunk.done;
        let events = convert_chunk(chunk, &mut state.next_tool_call_idx, false)?;
        if !events.is_empty() {
            return Ok((events, state));
        }
    }
    Ok((vec![], state))
}

/// Converts one response object into events. The completion event is
/// appended when the object is the last one, or when `whole` is set for a
/// non-streamed body.
fn convert_chunk(
    chunk: ChatResponse,
    next_tool_call_idx: &mut usize,
    whole: bool,
) -> Result<Vec<ModelResponseEvent>, Error> {
    if let Some(error) = chunk.error {
        return Err(Error::new(error, ErrorKind::Protocol));
    }

    let mut events = vec![];
    if let Some(message) = chunk.message {
        if !message.content.is_empty() {
            events.push(ModelResponseEvent::MessageDelta(message.content));
        }
        for tool_call in message.tool_calls {
            let req = proto::convert_tool_call(tool_call, *next_tool_call_idx)
                .map_err(|reason| Error::new(reason, ErrorKind::Protocol))?;
            *next_tool_call_idx += 1;
            events.push(ModelResponseEvent::ToolCall(req));
        }
    }

    if chunk.done || whole {
        // Gateways report "stop" even when tools were requested.
        let finish_reason = if *next_tool_call_idx > 0 {
            ModelFinishReason::ToolCalls
        } else {
            ModelFinishReason::Stop
        };
        events.push(ModelResponseEvent::Completed(finish_reason));
    }
    Ok(events)
}
