use std::sync::Arc;
use std::time::Duration;

use agent_neo_core::conversation::Message;
use agent_neo_core::{
    Agent, AgentBuilder, ToolRegistry, TurnError, TurnEvent,
};
use agent_neo_model::ModelProvider;

use crate::tools::*;

/// The instructions Agent Neo runs with unless told otherwise.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are Agent Neo, a helpful AI \
    assistant running on a Raspberry Pi with the AI HAT+ 2. Be concise and \
    helpful.";

/// A session builder.
///
/// See [`Session`].
pub struct SessionBuilder {
    agent_builder: AgentBuilder,
    tools: Option<Arc<ToolRegistry>>,
}

impl SessionBuilder {
    /// Creates a session builder with a specified model provider.
    pub fn with_model_provider<M: ModelProvider + 'static>(
        provider: M,
    ) -> Self {
        let agent_builder = AgentBuilder::with_model_provider(provider)
            .with_system_prompt(DEFAULT_SYSTEM_PROMPT);
        Self {
            agent_builder,
            tools: None,
        }
    }

    /// Replaces the default system prompt.
    #[inline]
    pub fn with_system_prompt<S: Into<String>>(mut self, prompt: S) -> Self {
        self.agent_builder = self.agent_builder.with_system_prompt(prompt);
        self
    }

    /// Enables or disables streaming responses.
    #[inline]
    pub fn with_streaming(mut self, stream: bool) -> Self {
        self.agent_builder = self.agent_builder.with_streaming(stream);
        self
    }

    /// Sets the timeout of every model backend call.
    #[inline]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.agent_builder = self.agent_builder.with_timeout(timeout);
        self
    }

    /// Sets how many tool rounds are allowed in one turn.
    #[inline]
    pub fn with_max_tool_rounds(mut self, rounds: usize) -> Self {
        self.agent_builder = self.agent_builder.with_max_tool_rounds(rounds);
        self
    }

    /// Uses the given tools instead of the built-in ones.
    #[inline]
    pub fn with_tools(mut self, tools: Arc<ToolRegistry>) -> Self {
        self.tools = Some(tools);
        self
    }

    /// Builds a new session.
    pub fn build(self) -> Result<Session, SessionError> {
        let tools = match self.tools {
            Some(tools) => tools,
            None => Arc::new(
                ToolRegistry::builder()
                    .with_tool(CurrentTimeTool::new())
                    .with_tool(WeatherTool::new().map_err(SessionError::Tools)?)
                    .build(),
            ),
        };
        let agent = self.agent_builder.with_tools(tools).build();

        Ok(Session { agent })
    }
}

/// The error of building a [`Session`].
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// A built-in tool could not set up its HTTP client.
    #[error("failed to set up the built-in tools")]
    Tools(#[source] reqwest::Error),
}

/// A chat session, like a window that displays messages and has a input box.
///
/// The session holds a fully configured agent that you can use directly, and it
/// is basically a wrapper around [`Agent`].
pub struct Session {
    agent: Agent,
}

impl Session {
    /// Sends a message and waits for the answer.
    #[inline]
    pub async fn chat(&mut self, message: &str) -> Result<String, TurnError> {
        self.agent.process(message).await
    }

    /// Sends a message like [`chat`], reporting the answer text and tool
    /// calls as they come.
    ///
    /// [`chat`]: Session::chat
    #[inline]
    pub async fn chat_with<F>(
        &mut self,
        message: &str,
        observer: F,
    ) -> Result<String, TurnError>
    where
        F: FnMut(TurnEvent<'_>),
    {
        self.agent.process_with(message, observer).await
    }

    /// Forgets everything said so far. The system prompt stays.
    #[inline]
    pub fn clear_history(&mut self) {
        self.agent.clear();
    }

    /// Returns the messages exchanged so far.
    #[inline]
    pub fn history(&self) -> &[Message] {
        self.agent.conversation().snapshot()
    }

    /// Returns the identifier of the model in use.
    #[inline]
    pub fn model_name(&self) -> &str {
        self.agent.model_name()
    }
}
