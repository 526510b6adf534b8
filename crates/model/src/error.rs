use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

/// The kind of error that occurred.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The model provider cannot be reached, or it refused to serve the
    /// request.
    Unavailable,
    /// The request did not finish in time.
    Timeout,
    /// The model provider is rate limited.
    RateLimitExceeded,
    /// The model provider responded with something that doesn't follow
    /// the protocol, like a malformed body or missing fields.
    Protocol,
}

impl ErrorKind {
    /// Returns `true` if the error is caused by a broken or slow
    /// connection to the provider, rather than by the response content.
    #[inline]
    pub fn is_transport(&self) -> bool {
        !matches!(self, ErrorKind::Protocol)
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Unavailable => write!(f, "Unavailable"),
            ErrorKind::Timeout => write!(f, "Timeout"),
            ErrorKind::RateLimitExceeded => write!(f, "Rate limit exceeded"),
            ErrorKind::Protocol => write!(f, "Protocol error"),
        }
    }
}
