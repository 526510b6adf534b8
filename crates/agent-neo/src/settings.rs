use std::time::Duration;

use clap::{Parser, ValueEnum};

const DEFAULT_MODEL: &str = "hailo-llm";
const DEFAULT_OLLAMA_BASE_URL: &str = "http://localhost:11434";
const DEFAULT_OPENAI_BASE_URL: &str = "http://localhost:11434/v1";

/// Command line arguments, each with an environment variable fallback.
#[derive(Debug, Parser)]
#[command(name = "agent-neo", version)]
#[command(about = "Chat with Agent Neo in the terminal.")]
pub struct Args {
    /// The protocol to talk to the model backend with.
    #[arg(long, env = "AGENT_NEO_BACKEND", value_enum)]
    #[arg(default_value_t = Backend::Ollama)]
    pub backend: Backend,

    /// Address of the model backend.
    #[arg(long, env = "AGENT_NEO_BASE_URL")]
    pub base_url: Option<String>,

    /// Model identifier.
    #[arg(long, env = "AGENT_NEO_MODEL", default_value = DEFAULT_MODEL)]
    pub model: String,

    /// Seconds to wait for each backend call.
    #[arg(long, env = "AGENT_NEO_TIMEOUT", default_value_t = 120)]
    pub timeout: u64,

    /// API key sent to OpenAI-compatible backends.
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// How many times the model may call tools before answering.
    #[arg(long, env = "AGENT_NEO_MAX_TOOL_ROUNDS", default_value_t = 1)]
    pub max_tool_rounds: usize,

    /// Wait for whole answers instead of streaming them.
    #[arg(long)]
    pub no_stream: bool,

    /// Print the models the backend offers and exit.
    #[arg(long)]
    pub list_models: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Backend {
    /// Native Ollama chat API.
    Ollama,
    /// OpenAI-compatible chat completions API.
    #[value(name = "openai")]
    OpenAI,
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum SettingsError {
    #[error("timeout must be at least one second")]
    ZeroTimeout,
    #[error("base URL must start with http:// or https://, got `{0}`")]
    InvalidBaseUrl(String),
    #[error("model identifier must not be empty")]
    EmptyModel,
    #[error("listing models is only supported by the ollama backend")]
    ListModelsUnsupported,
}

/// Validated settings, read once at startup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Settings {
    pub backend: Backend,
    pub base_url: String,
    pub model: String,
    pub timeout: Duration,
    pub api_key: Option<String>,
    pub max_tool_rounds: usize,
    pub stream: bool,
    pub list_models: bool,
}

impl TryFrom<Args> for Settings {
    type Error = SettingsError;

    fn try_from(args: Args) -> Result<Self, Self::Error> {
        if args.timeout == 0 {
            return Err(SettingsError::ZeroTimeout);
        }
        let model = args.model.trim();
        if model.is_empty() {
            return Err(SettingsError::EmptyModel);
        }
        if args.list_models && args.backend != Backend::Ollama {
            return Err(SettingsError::ListModelsUnsupported);
        }

        let base_url = match args.base_url {
            Some(base_url) => base_url.trim().to_owned(),
            None => match args.backend {
                Backend::Ollama => DEFAULT_OLLAMA_BASE_URL.to_owned(),
                Backend::OpenAI => DEFAULT_OPENAI_BASE_URL.to_owned(),
            },
        };
        if !base_url.starts_with("http://") && !base_url.starts_with("https://")
        {
            return Err(SettingsError::InvalidBaseUrl(base_url));
        }

        Ok(Settings {
            backend: args.backend,
            base_url,
            model: model.to_owned(),
            timeout: Duration::from_secs(args.timeout),
            api_key: args.api_key.filter(|key| !key.is_empty()),
            max_tool_rounds: args.max_tool_rounds,
            stream: !args.no_stream,
            list_models: args.list_models,
        })
    }
}
