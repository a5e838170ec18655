//! Entry point for the homepage chat service.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use dotenvy::dotenv;

mod api;
mod client;
mod config;
mod core;
mod llm_client;
mod logging;
mod models;
mod prompts;
mod rate_limit;
mod session;
mod tools;

#[cfg(test)]
mod test_support;

use crate::api::{ApiOptions, AppState};
use crate::client::AnthropicClient;
use crate::config::Config;
use crate::core::engine::{ConversationEngine, EngineConfig};
use crate::llm_client::LlmClient;
use crate::rate_limit::RateLimiter;
use crate::session::SessionStore;

#[derive(Parser, Debug)]
#[command(
    name = "homepage-chat",
    author,
    version,
    about = "Streaming chat backend for a personal homepage"
)]
struct Cli {
    /// Address to bind
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on
    #[arg(long, default_value_t = 8000)]
    port: u16,

    /// Load environment variables from this file instead of `.env`
    #[arg(long)]
    env_file: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match &cli.env_file {
        Some(path) => {
            dotenvy::from_path(path)
                .with_context(|| format!("Failed to load env file {}", path.display()))?;
        }
        None => {
            dotenv().ok();
        }
    }
    logging::init(cli.verbose);

    let config = Config::from_env()?;
    let client = AnthropicClient::new(&config)?;
    logging::info(format!(
        "Using {} provider with model {}",
        client.provider_name(),
        config.model_name
    ));

    let system_prompt = prompts::build_system_prompt(&config.resume_path);
    let engine = ConversationEngine::new(
        Arc::new(client),
        Arc::new(SessionStore::default()),
        system_prompt,
        EngineConfig::from_config(&config),
    );
    let state = AppState::new(
        engine,
        Arc::new(RateLimiter::new(config.rate_limit_per_minute)),
    );

    api::run_http_server(
        state,
        &config.allowed_origins,
        ApiOptions {
            host: cli.host,
            port: cli.port,
        },
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_defaults() {
        let cli = Cli::parse_from(["homepage-chat"]);
        assert_eq!(cli.host, "0.0.0.0");
        assert_eq!(cli.port, 8000);
        assert!(cli.env_file.is_none());
        assert!(!cli.verbose);
    }

    #[test]
    fn cli_overrides() {
        let cli = Cli::parse_from([
            "homepage-chat",
            "--host",
            "127.0.0.1",
            "--port",
            "9000",
            "--env-file",
            "deploy.env",
            "-v",
        ]);
        assert_eq!(cli.host, "127.0.0.1");
        assert_eq!(cli.port, 9000);
        assert_eq!(cli.env_file, Some(PathBuf::from("deploy.env")));
        assert!(cli.verbose);
    }
}
