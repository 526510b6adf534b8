//! An abstraction layer for different chat backends.
//!
//! This crate establishes an unified protocol for the agent to talk to
//! the supported model backends, so that the agent can switch between a
//! local gateway and a hosted API without touching the core codebase.
//!
//! Types in this crate don't define any behavior, instead they are the
//! constraints that the implementors should adhere to.

#![deny(missing_docs)]

mod error;
mod provider;
mod request;
mod response;

pub use error::*;
pub use provider::*;
pub use request::*;
pub use response::*;
