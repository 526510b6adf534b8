//! A model provider for Ollama-compatible gateways, such as the one that
//! fronts the accelerator on a Raspberry Pi AI HAT+.

#[macro_use]
extern crate tracing;

mod config;
mod io;
mod proto;
mod response;

use std::error::Error as StdError;
use std::fmt::{self, Display};
use std::sync::Arc;

use agent_neo_model::{
    ErrorKind, ModelProvider, ModelProviderError, ModelRequest,
};
use reqwest::{Client, Response, StatusCode};

pub use config::{OllamaConfig, OllamaConfigBuilder};
use io::{Chunks, Lines};
pub use response::OllamaResponse;

/// Error type for [`OllamaProvider`].
#[derive(Debug)]
pub struct Error {
    message: String,
    kind: ErrorKind,
}

impl Error {
    fn new(message: impl Into<String>, kind: ErrorKind) -> Self {
        Self {
            message: message.into(),
            kind,
        }
    }

    /// Returns the error message.
    #[inline]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl StdError for Error {}

impl ModelProviderError for Error {
    #[inline]
    fn kind(&self) -> ErrorKind {
        self.kind
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Self::new(format!("{err}"), error_kind_of(&err))
    }
}

pub(crate) fn error_kind_of(err: &reqwest::Error) -> ErrorKind {
    if err.is_timeout() {
        ErrorKind::Timeout
    } else if let Some(status) = err.status() {
        error_kind_of_status(status)
    } else if err.is_decode() {
        ErrorKind::Protocol
    } else {
        ErrorKind::Unavailable
    }
}

fn error_kind_of_status(status: StatusCode) -> ErrorKind {
    match status {
        StatusCode::TOO_MANY_REQUESTS => ErrorKind::RateLimitExceeded,
        s if s.is_server_error() => ErrorKind::Unavailable,
        _ => ErrorKind::Protocol,
    }
}

/// Ollama-compatible model provider.
#[derive(Clone, Debug)]
pub struct OllamaProvider {
    client: Client,
    config: Arc<OllamaConfig>,
}

impl OllamaProvider {
    /// Creates a new `OllamaProvider` with the given configuration.
    pub fn new(config: OllamaConfig) -> Result<Self, Error> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|err| {
                Error::new(
                    format!("failed to create HTTP client: {err}"),
                    ErrorKind::Unavailable,
                )
            })?;
        Ok(Self {
            client,
            config: Arc::new(config),
        })
    }

    /// Returns the configuration of this provider.
    #[inline]
    pub fn config(&self) -> &OllamaConfig {
        &self.config
    }

    /// Lists the names of the models the gateway serves.
    pub async fn list_models(&self) -> Result<Vec<String>, Error> {
        let url = format!("{}/api/tags", self.config.base_url);
        debug!("listing models from {url}");
        let resp = check_status(self.client.get(url).send().await?).await?;
        let body = resp.bytes().await?;
        let tags: proto::TagsResponse =
            serde_json::from_slice(&body).map_err(|err| {
                Error::new(format!("malformed model list: {err}"), ErrorKind::Protocol)
            })?;
        Ok(tags.models.into_iter().map(|tag| tag.name).collect())
    }
}

impl ModelProvider for OllamaProvider {
    type Error = Error;
    type Response = OllamaResponse;

    fn model_name(&self) -> &str {
        &self.config.model
    }

    fn send_request(
        &self,
        req: &ModelRequest,
    ) -> impl Future<Output = Result<Self::Response, Self::Error>> + Send + 'static
    {
        let stream = req.stream;
        let body = proto::create_request(req, &self.config);
        let resp_fut = self
            .client
            .post(format!("{}/api/chat", self.config.base_url))
            .json(&body)
            .send();

        async move {
            let resp = check_status(resp_fut.await?).await?;
            if stream {
                let lines = Lines::new(Chunks::Response(resp));
                return Ok(OllamaResponse::from_lines(lines));
            }

            let body = resp.bytes().await?;
            let chat_resp = serde_json::from_slice(&body).map_err(|err| {
                Error::new(format!("malformed response: {err}"), ErrorKind::Protocol)
            })?;
            OllamaResponse::from_chat_response(chat_resp)
        }
    }
}

async fn check_status(resp: Response) -> Result<Response, Error> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    let excerpt: String = body.chars().take(200).collect();
    warn!("gateway responded {status}: {excerpt}");
    Err(Error::new(
        format!("HTTP {status}: {excerpt}"),
        error_kind_of_status(status),
    ))
}
