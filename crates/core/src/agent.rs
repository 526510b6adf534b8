mod builder;
mod state;

use std::sync::Arc;
use std::time::Duration;

use agent_neo_model::{
    ErrorKind, ModelMessage, ModelRequest, ToolCallRequest,
};
use tracing::Instrument;

use crate::conversation::Conversation;
use crate::model_client::{BackendError, Completion, ModelClient};
use crate::tool::ToolRegistry;
pub use builder::AgentBuilder;
use state::{Turn, TurnStage};

/// Options of an [`Agent`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AgentConfig {
    /// Instructions sent ahead of the history in every request. The prompt
    /// is not part of the conversation, so it survives clearing.
    pub system_prompt: Option<String>,
    /// Whether to stream responses from the backend.
    pub stream: bool,
    /// Limit for every single backend call, including reading the whole
    /// response.
    pub timeout: Option<Duration>,
    /// How many times the model may call tools in one turn. The request
    /// after the last allowed round advertises no tools.
    pub max_tool_rounds: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            system_prompt: None,
            stream: true,
            timeout: None,
            max_tool_rounds: 1,
        }
    }
}

/// Something that happened while processing a turn.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TurnEvent<'a> {
    /// A piece of text from the model. Fragments of one backend call
    /// concatenate to the stored message.
    Fragment(&'a str),
    /// The model requested a tool call, which is about to run.
    ToolCall(&'a ToolCallRequest),
    /// A tool call finished.
    ToolResult {
        /// The id of the tool call.
        id: &'a str,
        /// The text handed back to the model.
        content: &'a str,
    },
}

/// The error of a failed turn. The conversation is left as it was before
/// the turn.
#[derive(Debug, thiserror::Error)]
pub enum TurnError {
    /// The backend could not be reached or did not respond in time.
    #[error("model backend unavailable: {message}")]
    BackendUnavailable {
        /// What went wrong in detail.
        kind: ErrorKind,
        /// The message from the backend.
        message: String,
    },
    /// The backend responded with something unexpected.
    #[error("unexpected response from model backend: {message}")]
    BackendProtocol {
        /// The message from the backend.
        message: String,
    },
}

impl TurnError {
    /// Returns the kind of the underlying backend error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            TurnError::BackendUnavailable { kind, .. } => *kind,
            TurnError::BackendProtocol { .. } => ErrorKind::Protocol,
        }
    }
}

impl From<BackendError> for TurnError {
    fn from(err: BackendError) -> Self {
        let message = err.to_string();
        let kind = err.kind();
        if kind.is_transport() {
            TurnError::BackendUnavailable { kind, message }
        } else {
            TurnError::BackendProtocol { message }
        }
    }
}

/// An agent instance, which maintains a conversation, a model client,
/// and the tools the model may call.
///
/// Turns are processed one at a time. Since processing borrows the agent
/// mutably, a turn can't start before the previous one finished.
pub struct Agent {
    model_client: ModelClient,
    tools: Arc<ToolRegistry>,
    config: AgentConfig,
    conversation: Conversation,
}

impl Agent {
    fn from_builder(builder: AgentBuilder) -> Self {
        let AgentBuilder {
            model_client,
            tools,
            config,
        } = builder;
        Self {
            model_client,
            tools,
            config,
            conversation: Conversation::default(),
        }
    }

    /// Returns the configuration.
    #[inline]
    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Returns the identifier of the model in use.
    #[inline]
    pub fn model_name(&self) -> &str {
        self.model_client.model_name()
    }

    /// Returns the history of committed turns.
    #[inline]
    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    /// Forgets all previous turns.
    #[inline]
    pub fn clear(&mut self) {
        self.conversation.clear();
    }

    /// Processes a user input and returns the answer.
    #[inline]
    pub async fn process<S: Into<String>>(
        &mut self,
        input: S,
    ) -> Result<String, TurnError> {
        self.process_with(input, |_| {}).await
    }

    /// Processes a user input like [`process`], reporting progress to the
    /// observer as it happens.
    ///
    /// # Cancel safety
    ///
    /// This method is cancel safe. If the returned future is dropped, the
    /// conversation stays the same as before the call.
    ///
    /// [`process`]: Agent::process
    pub async fn process_with<S, F>(
        &mut self,
        input: S,
        mut observer: F,
    ) -> Result<String, TurnError>
    where
        S: Into<String>,
        F: FnMut(TurnEvent<'_>),
    {
        let span = info_span!("turn", history = self.conversation.len());
        let mut turn = Turn::default();
        turn.accept_input(input.into());

        async {
            loop {
                match turn.stage() {
                    TurnStage::Idle => unreachable!("turn is not started"),
                    TurnStage::AwaitingModel => {
                        let with_tools =
                            turn.tool_rounds() < self.config.max_tool_rounds;
                        let req = self.build_request(&turn, with_tools);
                        let completion =
                            self.call_model(req, &mut observer).await?;
                        if !with_tools && !completion.tool_calls().is_empty() {
                            warn!("model still requests tools after the last round");
                            return Err(TurnError::BackendProtocol {
                                message: format!(
                                    "tool calls exceed the limit of {} round(s) per turn",
                                    self.config.max_tool_rounds
                                ),
                            });
                        }
                        turn.accept_completion(completion);
                    }
                    TurnStage::ExecutingTool(requests) => {
                        for req in requests.clone() {
                            observer(TurnEvent::ToolCall(&req));
                            let id = req.id.clone();
                            let content = self.tools.invoke(req).await;
                            observer(TurnEvent::ToolResult {
                                id: &id,
                                content: &content,
                            });
                            turn.accept_tool_result(id, content);
                        }
                    }
                    TurnStage::Done(_) => break,
                }
            }

            let staged = turn.staged().len();
            let answer = turn
                .commit(&mut self.conversation)
                .unwrap_or_default();
            debug!("turn committed {staged} message(s)");
            Ok(answer)
        }
        .instrument(span)
        .await
    }

    fn build_request(&self, turn: &Turn, with_tools: bool) -> ModelRequest {
        let system = self
            .config
            .system_prompt
            .as_ref()
            .map(|prompt| ModelMessage::System(prompt.clone()));
        let messages = system
            .into_iter()
            .chain(
                self.conversation
                    .snapshot()
                    .iter()
                    .chain(turn.staged())
                    .map(|msg| msg.to_model_message()),
            )
            .collect();
        ModelRequest {
            messages,
            tools: if with_tools {
                self.tools.describe()
            } else {
                vec![]
            },
            stream: self.config.stream,
        }
    }

    async fn call_model<F>(
        &self,
        req: ModelRequest,
        observer: &mut F,
    ) -> Result<Completion, TurnError>
    where
        F: FnMut(TurnEvent<'_>),
    {
        let stream = req.stream;
        let fut = async {
            if !stream {
                let completion = self.model_client.complete(req).await?;
                if !completion.content().is_empty() {
                    observer(TurnEvent::Fragment(completion.content()));
                }
                return Ok(completion);
            }

            let mut stream = self.model_client.stream(req).await?;
            while let Some(fragment) = stream.next_fragment().await? {
                observer(TurnEvent::Fragment(&fragment));
            }
            stream.finish().await
        };

        let Some(timeout) = self.config.timeout else {
            return fut.await.map_err(TurnError::from);
        };
        match tokio::time::timeout(timeout, fut).await {
            Ok(result) => result.map_err(TurnError::from),
            Err(_) => {
                warn!("model backend timed out after {timeout:?}");
                Err(TurnError::BackendUnavailable {
                    kind: ErrorKind::Timeout,
                    message: format!("no response within {timeout:?}"),
                })
            }
        }
    }
}
