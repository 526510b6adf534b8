//! Chat with Agent Neo in the terminal.

#[macro_use]
extern crate tracing;

mod commands;
mod settings;

use std::io::Write as _;
use std::time::Duration;

use agent_neo::SessionBuilder;
use agent_neo::core::TurnEvent;
use agent_neo_ollama_model::{
    OllamaConfig, OllamaConfigBuilder, OllamaProvider,
};
use agent_neo_openai_model::{OpenAIConfigBuilder, OpenAIProvider};
use anyhow::Context as _;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;
use tokio::io::{self, AsyncBufReadExt, BufReader, Stdin};
use tokio::select;
use tokio::signal::ctrl_c;

use crate::commands::Command;
use crate::settings::{Args, Backend, Settings};

const BAR_CHAR: &str = "▎";

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let settings = Settings::try_from(Args::parse())?;
    debug!(
        "using {:?} backend at {} with model `{}`",
        settings.backend, settings.base_url, settings.model
    );

    if settings.list_models {
        return list_models(&settings).await;
    }

    let mut session = build_session(&settings)?;

    println!(
        "{}",
        "Agent Neo - Powered by hailo-ollama on Raspberry Pi AI HAT+ 2".bold()
    );
    println!("Type 'quit' or 'exit' to end the conversation.");
    println!("Type 'clear' to clear conversation history.\n");

    let progress_style = ProgressStyle::with_template("{spinner} {wide_msg}")?
        .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏");
    let mut stdin = BufReader::new(io::stdin());

    loop {
        print!("{} ", "You:".bright_green().bold());
        flush_stdout();

        let line = select! {
            line = read_line(&mut stdin) => line,
            _ = ctrl_c() => None,
        };
        let Some(line) = line else {
            println!("\nGoodbye!");
            break;
        };

        match Command::parse(&line) {
            Command::Empty => continue,
            Command::Quit => {
                println!("Goodbye!");
                break;
            }
            Command::Clear => {
                session.clear_history();
                println!("Conversation history cleared.\n");
            }
            Command::Message(message) => {
                chat(&mut session, message, &progress_style).await;
            }
        }
    }

    Ok(())
}

async fn chat(
    session: &mut agent_neo::Session,
    message: &str,
    progress_style: &ProgressStyle,
) {
    let new_progress_bar = || {
        let progress_bar = ProgressBar::new_spinner();
        progress_bar.set_style(progress_style.clone());
        progress_bar.set_message("🤔 Thinking...");
        progress_bar.enable_steady_tick(Duration::from_millis(100));
        progress_bar
    };

    let mut progress_bar = Some(new_progress_bar());
    let mut answering = false;
    let result = select! {
        result = session.chat_with(message, |event| match event {
            TurnEvent::Fragment(text) => {
                // Finish the progress bar before printing anything else.
                if let Some(progress_bar) = progress_bar.take() {
                    progress_bar.finish_and_clear();
                }
                if !answering {
                    print!("{}", "Agent Neo: ".bright_cyan().bold());
                    answering = true;
                }
                print!("{text}");
                flush_stdout();
            }
            TurnEvent::ToolCall(req) => {
                if answering {
                    println!();
                    answering = false;
                }
                progress_bar
                    .get_or_insert_with(new_progress_bar)
                    .set_message(format!("🔧 Calling {}...", req.name));
            }
            TurnEvent::ToolResult { id, .. } => {
                debug!("tool call {id} finished");
                progress_bar
                    .get_or_insert_with(new_progress_bar)
                    .set_message("🤔 Thinking...");
            }
        }) => Some(result),
        _ = ctrl_c() => None,
    };
    if let Some(progress_bar) = progress_bar {
        progress_bar.finish_and_clear();
    }

    match result {
        Some(Ok(_)) => {
            if !answering {
                print!("{}", "Agent Neo: ".bright_cyan().bold());
            }
            println!("\n");
        }
        Some(Err(err)) => {
            warn!("turn failed: {err}");
            let bar = BAR_CHAR.bright_red();
            println!("\n{bar}{} {err}\n", "Error:".bright_red());
        }
        None => {
            let bar = BAR_CHAR.bright_yellow();
            println!("\n{bar}{}\n", "Interrupted.".bright_yellow());
        }
    }
}

fn ollama_config(settings: &Settings) -> OllamaConfig {
    OllamaConfigBuilder::new()
        .with_model(&settings.model)
        .with_base_url(&settings.base_url)
        .with_timeout(settings.timeout)
        .build()
}

fn build_session(settings: &Settings) -> anyhow::Result<agent_neo::Session> {
    let builder = match settings.backend {
        Backend::Ollama => {
            let provider = OllamaProvider::new(ollama_config(settings))
                .context("failed to set up the Ollama backend")?;
            SessionBuilder::with_model_provider(provider)
        }
        Backend::OpenAI => {
            let config = match &settings.api_key {
                Some(api_key) => OpenAIConfigBuilder::with_api_key(api_key),
                None => OpenAIConfigBuilder::without_api_key(),
            }
            .with_model(&settings.model)
            .with_base_url(&settings.base_url)
            .with_timeout(settings.timeout)
            .build();
            let provider = OpenAIProvider::new(config)
                .context("failed to set up the OpenAI backend")?;
            SessionBuilder::with_model_provider(provider)
        }
    };

    Ok(builder
        .with_streaming(settings.stream)
        .with_timeout(settings.timeout)
        .with_max_tool_rounds(settings.max_tool_rounds)
        .build()?)
}

async fn list_models(settings: &Settings) -> anyhow::Result<()> {
    let provider = OllamaProvider::new(ollama_config(settings))
        .context("failed to set up the Ollama backend")?;
    let models = provider
        .list_models()
        .await
        .with_context(|| {
            format!("failed to list models at {}", settings.base_url)
        })?;
    for model in models {
        println!("{model}");
    }
    Ok(())
}

async fn read_line(stdin: &mut BufReader<Stdin>) -> Option<String> {
    let mut line = String::new();

    match stdin.read_line(&mut line).await {
        Ok(count) => {
            if count == 0 {
                return None;
            }
            Some(line)
        }
        Err(err) => {
            error!("error reading input: {}", err);
            None
        }
    }
}

#[inline]
fn flush_stdout() {
    if let Err(err) = std::io::stdout().flush() {
        warn!("failed to flush stdout: {err}");
    }
}
