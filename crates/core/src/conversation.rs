//! Conversation-related types.

use std::fmt::{self, Display};

use agent_neo_model::{
    AssistantToolCalls, ModelMessage, ToolCallRequest, ToolCallResult,
};

/// The author of a message.
///
/// There is no system role. The system prompt belongs to the agent
/// configuration and is never part of the history.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Role {
    /// Input from the user.
    User,
    /// Output from the model.
    Assistant,
    /// The result of a tool call.
    Tool,
}

impl Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
            Role::Tool => write!(f, "tool"),
        }
    }
}

/// A message in the conversation.
///
/// Messages can only be created through the constructors, which keep
/// them well-formed: only tool messages carry a tool call id, and only
/// assistant messages carry tool calls.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    role: Role,
    content: String,
    tool_call_id: Option<String>,
    tool_calls: Vec<ToolCallRequest>,
}

impl Message {
    /// Creates a user message.
    #[inline]
    pub fn user<S: Into<String>>(content: S) -> Self {
        Self::plain(Role::User, content.into())
    }

    /// Creates an assistant message with a text answer.
    #[inline]
    pub fn assistant<S: Into<String>>(content: S) -> Self {
        Self::plain(Role::Assistant, content.into())
    }

    /// Creates an assistant message that requests tool calls.
    #[inline]
    pub fn assistant_tool_calls<S: Into<String>>(
        content: S,
        tool_calls: Vec<ToolCallRequest>,
    ) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_call_id: None,
            tool_calls,
        }
    }

    /// Creates a tool message holding the result of a tool call.
    #[inline]
    pub fn tool<S1: Into<String>, S2: Into<String>>(
        tool_call_id: S1,
        content: S2,
    ) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_call_id: Some(tool_call_id.into()),
            tool_calls: vec![],
        }
    }

    #[inline]
    fn plain(role: Role, content: String) -> Self {
        Self {
            role,
            content,
            tool_call_id: None,
            tool_calls: vec![],
        }
    }

    /// Returns the role of the message.
    #[inline]
    pub fn role(&self) -> Role {
        self.role
    }

    /// Returns the text content of the message.
    #[inline]
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Returns the id of the tool call this message answers, if it is a
    /// tool message.
    #[inline]
    pub fn tool_call_id(&self) -> Option<&str> {
        self.tool_call_id.as_deref()
    }

    /// Returns the tool calls requested by this message.
    #[inline]
    pub fn tool_calls(&self) -> &[ToolCallRequest] {
        &self.tool_calls
    }

    /// Converts the message to its wire-neutral form.
    pub fn to_model_message(&self) -> ModelMessage {
        match self.role {
            Role::User => ModelMessage::User(self.content.clone()),
            Role::Assistant if self.tool_calls.is_empty() => {
                ModelMessage::Assistant(self.content.clone())
            }
            Role::Assistant => ModelMessage::ToolCalls(AssistantToolCalls {
                content: self.content.clone(),
                calls: self.tool_calls.clone(),
            }),
            Role::Tool => ModelMessage::Tool(ToolCallResult {
                id: self.tool_call_id.clone().unwrap_or_default(),
                content: self.content.clone(),
            }),
        }
    }
}

/// Represents a conversation, an ordered history of messages.
#[derive(Clone, Default, Debug)]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    /// Appends a message to the end of the conversation.
    #[inline]
    pub fn append(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Returns all messages in chronological order.
    #[inline]
    pub fn snapshot(&self) -> &[Message] {
        &self.messages
    }

    /// Removes all messages.
    #[inline]
    pub fn clear(&mut self) {
        self.messages.clear();
    }

    /// Returns the number of messages.
    #[inline]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Returns `true` if there are no messages.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

impl Extend<Message> for Conversation {
    fn extend<T: IntoIterator<Item = Message>>(&mut self, iter: T) {
        self.messages.extend(iter);
    }
}
