//! Core logic including the turn loop, tool execution, conversation
//! history, and agent configuration.

#![deny(missing_docs)]

#[macro_use]
extern crate tracing;

mod agent;
pub mod conversation;
pub mod model_client;
pub mod tool;

pub use agent::{Agent, AgentBuilder, AgentConfig, TurnError, TurnEvent};
pub use tool::{Tool, ToolRegistry, ToolResult};
