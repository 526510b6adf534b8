//! Agent Neo, a conversational agent that relays your messages to a
//! language model and lets it look things up with tools.
//!
//! The crate includes a CLI tool for using in the terminal. And you can also
//! use it as a library to bring the agent into your own host apps.

#![deny(missing_docs)]

#[allow(unused_imports)]
#[macro_use]
extern crate tracing;

mod session;
pub mod tools;

pub use session::{
    DEFAULT_SYSTEM_PROMPT, Session, SessionBuilder, SessionError,
};

/// Re-exports of [`agent_neo_core`] crate.
pub mod core {
    pub use agent_neo_core::*;
}
