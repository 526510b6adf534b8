//! A type-erased client over model providers.

use std::error::Error as StdError;
use std::fmt::{self, Display};
use std::future::poll_fn;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use agent_neo_model::{
    ErrorKind, ModelFinishReason, ModelProvider, ModelProviderError,
    ModelRequest, ModelResponse, ModelResponseEvent, ToolCallRequest,
};
use tracing::Instrument;

/// An error reported by the model backend.
pub type BackendError = Box<dyn ModelProviderError>;

type BoxedResponse = Pin<Box<dyn ErasedResponse>>;
type BoxedSendRequestFuture =
    Pin<Box<dyn Future<Output = Result<BoxedResponse, BackendError>> + Send>>;
type HandlerFn =
    Arc<dyn Fn(ModelRequest) -> BoxedSendRequestFuture + Send + Sync>;

trait ErasedResponse: Send {
    fn poll_next_event(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Option<ModelResponseEvent>, BackendError>>;
}

impl<R: ModelResponse> ErasedResponse for R {
    #[inline]
    fn poll_next_event(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Option<ModelResponseEvent>, BackendError>> {
        ModelResponse::poll_next_event(self, cx)
            .map_err(|err| Box::new(err) as BackendError)
    }
}

/// A wrapper around a model provider that provides a type-erased
/// interface for the other modules.
///
/// Cloning is cheap, clones share the same provider.
#[derive(Clone)]
pub struct ModelClient {
    handler_fn: HandlerFn,
    model_name: Arc<str>,
}

impl ModelClient {
    /// Wraps the given provider.
    pub fn new<P: ModelProvider + 'static>(provider: P) -> Self {
        let model_name = Arc::from(provider.model_name());
        // We have to erase the type `P`, since `ModelClient` doesn't have a
        // generic parameter and we don't want it either.
        let handler_fn: HandlerFn = Arc::new(move |req| {
            trace!("got a request: {req:?}");
            let fut = provider.send_request(&req);
            Box::pin(
                async move {
                    match fut.await {
                        Ok(resp) => Ok(Box::pin(resp) as BoxedResponse),
                        Err(err) => {
                            error!("request failed: {err}");
                            Err(Box::new(err) as BackendError)
                        }
                    }
                }
                .instrument(trace_span!("model client req")),
            )
        });
        Self {
            handler_fn,
            model_name,
        }
    }

    /// Returns the identifier of the model behind this client.
    #[inline]
    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    /// Sends a request and reads the whole response.
    pub async fn complete(
        &self,
        req: ModelRequest,
    ) -> Result<Completion, BackendError> {
        self.stream(req).await?.finish().await
    }

    /// Sends a request and returns a stream of text fragments.
    ///
    /// # Cancel safety
    ///
    /// This method is cancel safe. Dropping the returned stream stops
    /// receiving further events.
    pub async fn stream(
        &self,
        req: ModelRequest,
    ) -> Result<ModelStream, BackendError> {
        let resp = (self.handler_fn)(req).await?;
        Ok(ModelStream {
            resp,
            completion: Completion::default(),
            completed: false,
            exhausted: false,
        })
    }
}

/// A response being received, which yields text fragments in arrival
/// order. It can be consumed only once.
pub struct ModelStream {
    resp: BoxedResponse,
    completion: Completion,
    completed: bool,
    exhausted: bool,
}

impl ModelStream {
    /// Returns the next text fragment, or `None` if the response has
    /// ended. Tool calls are collected silently.
    pub async fn next_fragment(
        &mut self,
    ) -> Result<Option<String>, BackendError> {
        loop {
            if self.exhausted {
                return Ok(None);
            }
            let event =
                match poll_fn(|cx| self.resp.as_mut().poll_next_event(cx)).await
                {
                    Ok(event) => event,
                    Err(err) => {
                        self.exhausted = true;
                        return Err(err);
                    }
                };
            trace!("got an event: {event:?}");

            match event {
                Some(ModelResponseEvent::MessageDelta(delta)) => {
                    if delta.is_empty() {
                        continue;
                    }
                    self.completion.content.push_str(&delta);
                    return Ok(Some(delta));
                }
                Some(ModelResponseEvent::ToolCall(req)) => {
                    self.completion.tool_calls.push(req);
                }
                Some(ModelResponseEvent::Completed(reason)) => {
                    self.completion.finish_reason = reason;
                    self.completed = true;
                }
                None => self.exhausted = true,
            }
        }
    }

    /// Drains the rest of the response and returns everything received.
    pub async fn finish(mut self) -> Result<Completion, BackendError> {
        while self.next_fragment().await?.is_some() {}
        if !self.completed {
            return Err(Box::new(ClientError(
                "response ended without completion",
            )));
        }
        Ok(self.completion)
    }
}

/// A completely received response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Completion {
    content: String,
    tool_calls: Vec<ToolCallRequest>,
    finish_reason: ModelFinishReason,
}

impl Default for Completion {
    fn default() -> Self {
        Self {
            content: String::new(),
            tool_calls: vec![],
            finish_reason: ModelFinishReason::Stop,
        }
    }
}

/// What the model decided to do in a [`Completion`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome<'a> {
    /// The model answered with text.
    TextAnswer {
        /// The answer.
        content: &'a str,
    },
    /// The model requested tool calls before answering.
    ToolCalls {
        /// The requested calls, in the order the model issued them.
        requests: &'a [ToolCallRequest],
    },
}

impl Completion {
    /// Returns the text of the response. It may be non-empty even if tool
    /// calls were requested.
    #[inline]
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Returns the requested tool calls.
    #[inline]
    pub fn tool_calls(&self) -> &[ToolCallRequest] {
        &self.tool_calls
    }

    /// Returns the reason reported by the backend.
    #[inline]
    pub fn finish_reason(&self) -> ModelFinishReason {
        self.finish_reason
    }

    /// Classifies the response. Any tool call makes it a tool call
    /// request, whatever the finish reason says.
    pub fn outcome(&self) -> Outcome<'_> {
        if self.tool_calls.is_empty() {
            Outcome::TextAnswer {
                content: &self.content,
            }
        } else {
            Outcome::ToolCalls {
                requests: &self.tool_calls,
            }
        }
    }
}

#[derive(Debug)]
struct ClientError(&'static str);

impl Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl StdError for ClientError {}

impl ModelProviderError for ClientError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Protocol
    }
}
