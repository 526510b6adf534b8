use std::sync::Arc;
use std::time::Duration;

use agent_neo_model::ModelProvider;

use super::{Agent, AgentConfig};
use crate::model_client::ModelClient;
use crate::tool::ToolRegistry;

/// [`Agent`] builder.
pub struct AgentBuilder {
    pub(crate) model_client: ModelClient,
    pub(crate) tools: Arc<ToolRegistry>,
    pub(crate) config: AgentConfig,
}

impl AgentBuilder {
    /// Creates a new builder with the specified model provider.
    #[inline]
    pub fn with_model_provider<P: ModelProvider + 'static>(
        provider: P,
    ) -> Self {
        Self::with_model_client(ModelClient::new(provider))
    }

    /// Creates a new builder with a client that may be shared with other
    /// agents.
    #[inline]
    pub fn with_model_client(model_client: ModelClient) -> Self {
        Self {
            model_client,
            tools: Arc::default(),
            config: AgentConfig::default(),
        }
    }

    /// Sets the tools the model may call.
    #[inline]
    pub fn with_tools(mut self, tools: Arc<ToolRegistry>) -> Self {
        self.tools = tools;
        self
    }

    /// Replaces the whole configuration.
    #[inline]
    pub fn with_config(mut self, config: AgentConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the system prompt.
    #[inline]
    pub fn with_system_prompt<S: Into<String>>(mut self, prompt: S) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    /// Enables or disables streaming.
    #[inline]
    pub fn with_streaming(mut self, stream: bool) -> Self {
        self.config.stream = stream;
        self
    }

    /// Sets the timeout of every backend call.
    #[inline]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = Some(timeout);
        self
    }

    /// Sets how many tool rounds are allowed in one turn.
    #[inline]
    pub fn with_max_tool_rounds(mut self, rounds: usize) -> Self {
        self.config.max_tool_rounds = rounds;
        self
    }

    /// Builds the agent.
    #[inline]
    pub fn build(self) -> Agent {
        Agent::from_builder(self)
    }
}
