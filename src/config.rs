//! Configuration loading and defaults for the chat backend.
//!
//! All settings come from the process environment (optionally seeded from a
//! `.env` file by `main`).

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

pub const DEFAULT_MODEL_NAME: &str = "claude-sonnet-4-20250514";
pub const DEFAULT_ALLOWED_ORIGIN: &str = "http://localhost:3000";
pub const DEFAULT_RATE_LIMIT_PER_MINUTE: usize = 10;
pub const DEFAULT_MAX_TOKENS: u32 = 1024;
pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
pub const DEFAULT_RESUME_PATH: &str = "data/resume.md";
const DEFAULT_MAX_RETRIES: u32 = 2;

// === Types ===

/// Resolved retry policy with defaults applied.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub enabled: bool,
    pub max_retries: u32,
    pub initial_delay: f64,
    pub max_delay: f64,
    pub exponential_base: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: DEFAULT_MAX_RETRIES,
            initial_delay: 1.0,
            max_delay: 30.0,
            exponential_base: 2.0,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Compute the backoff delay for a retry attempt.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let delay = self.initial_delay * self.exponential_base.powi(exponent);
        let delay = delay.min(self.max_delay);
        // Guard against NaN/negative from misconfigured values
        let delay = delay.clamp(0.0, 300.0);
        Duration::from_secs_f64(delay)
    }
}

/// Resolved service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub allowed_origins: Vec<String>,
    pub rate_limit_per_minute: usize,
    pub model_name: String,
    pub max_tokens: u32,
    pub resume_path: PathBuf,
    pub retry: RetryPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: None,
            allowed_origins: vec![DEFAULT_ALLOWED_ORIGIN.to_string()],
            rate_limit_per_minute: DEFAULT_RATE_LIMIT_PER_MINUTE,
            model_name: DEFAULT_MODEL_NAME.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            resume_path: PathBuf::from(DEFAULT_RESUME_PATH),
            retry: RetryPolicy::default(),
        }
    }
}

// === Config Loading ===

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let mut config = Config {
            api_key: get("ANTHROPIC_API_KEY"),
            base_url: get("ANTHROPIC_BASE_URL"),
            ..Config::default()
        };

        if let Some(origins) = get("ALLOWED_ORIGINS") {
            config.allowed_origins = parse_origins(&origins);
        }
        if let Some(value) = get("RATE_LIMIT_PER_MINUTE") {
            config.rate_limit_per_minute = value
                .parse::<usize>()
                .with_context(|| format!("Invalid RATE_LIMIT_PER_MINUTE '{value}'"))?;
        }
        if let Some(value) = get("MODEL_NAME") {
            config.model_name = value;
        }
        if let Some(value) = get("MAX_TOKENS") {
            config.max_tokens = value
                .parse::<u32>()
                .with_context(|| format!("Invalid MAX_TOKENS '{value}'"))?;
        }
        if let Some(value) = get("RESUME_PATH") {
            config.resume_path = PathBuf::from(value);
        }
        if let Some(value) = get("ANTHROPIC_MAX_RETRIES") {
            let max_retries = value
                .parse::<u32>()
                .with_context(|| format!("Invalid ANTHROPIC_MAX_RETRIES '{value}'"))?;
            if max_retries == 0 {
                config.retry = RetryPolicy::disabled();
            } else {
                config.retry.max_retries = max_retries;
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate settings that have no sensible fallback.
    pub fn validate(&self) -> Result<()> {
        if self.rate_limit_per_minute == 0 {
            anyhow::bail!("RATE_LIMIT_PER_MINUTE must be greater than zero");
        }
        if self.max_tokens == 0 {
            anyhow::bail!("MAX_TOKENS must be greater than zero");
        }
        if self.allowed_origins.is_empty() {
            anyhow::bail!("ALLOWED_ORIGINS must name at least one origin");
        }
        Ok(())
    }

    /// Return the Anthropic API key, failing when it is not configured.
    pub fn anthropic_api_key(&self) -> Result<String> {
        match self.api_key.as_deref() {
            Some(key) if !key.trim().is_empty() => Ok(key.to_string()),
            _ => anyhow::bail!(
                "ANTHROPIC_API_KEY environment variable is required. \
                 Set it in a .env file or export it in your shell."
            ),
        }
    }

    /// Return the provider base URL (normalized).
    #[must_use]
    pub fn anthropic_base_url(&self) -> String {
        let base = self.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL);
        base.trim_end_matches('/').to_string()
    }
}

fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .map(str::to_string)
        .collect()
}
