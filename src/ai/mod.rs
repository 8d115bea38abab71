//! Model access for code analysis
//!
//! The pipeline only sees [`ModelClient`]: one analysis unit in, raw model
//! text out. Two implementations ship:
//!
//! - [`AiClient`] talks to a hosted LLM (Anthropic or any OpenAI-compatible
//!   endpoint). Uses BYOK - API keys are read from the environment.
//! - [`PatternAnalyzer`] is an offline rule set answering in the same JSON
//!   shape, used when no key is configured.
//!
//! Raw text is turned into issues by [`response::parse_issues`], which
//! tolerates both the legacy three-array shape and the unified `issues` array.
//!
//! # Environment Variables
//!
//! - `ANTHROPIC_API_KEY`, `OPENAI_API_KEY`, `DEEPINFRA_API_KEY`,
//!   `OPENROUTER_API_KEY`: keys for the hosted backends
//! - `OLLAMA_MODEL`: model override for a local Ollama server

mod client;
mod patterns;
mod prompts;
pub mod response;

pub use client::{AiClient, AiConfig, LlmBackend, Message, Role};
pub use patterns::PatternAnalyzer;
pub use prompts::{unit_prompt, SYSTEM_PROMPT};

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

use crate::config::AiSettings;
use crate::models::AnalysisUnit;

/// Errors that can occur in the AI module
#[derive(Error, Debug)]
pub enum AiError {
    #[error("Missing API key: {env_var} not set. Get your key at {signup_url}")]
    MissingApiKey { env_var: String, signup_url: String },

    #[error("API request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    #[error("API error: {status} - {message}")]
    ApiError { status: u16, message: String },

    #[error("Rate limited by the model API")]
    RateLimited { retry_after: Option<u64> },

    #[error("Failed to parse API response: {0}")]
    ParseError(String),

    #[error("Invalid configuration: {0}")]
    ConfigError(String),
}

pub type AiResult<T> = Result<T, AiError>;

/// Something that can analyze one unit of code and answer with JSON text
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn complete(&self, unit: &AnalysisUnit) -> AiResult<String>;

    /// Short name for logs and `/health`
    fn name(&self) -> String;
}

/// Backends that need a key, in auto-detection order
const AUTO_DETECT_ORDER: [LlmBackend; 4] = [
    LlmBackend::Anthropic,
    LlmBackend::OpenAi,
    LlmBackend::Deepinfra,
    LlmBackend::OpenRouter,
];

/// Build the model client described by `settings`.
///
/// `backend = "local"` selects the offline analyzer. With no backend set,
/// the first hosted backend with a key in the environment wins, else local.
pub fn build_model_client(settings: &AiSettings) -> AiResult<Arc<dyn ModelClient>> {
    let backend = match settings.backend.as_deref().map(str::trim) {
        Some(name) if name.eq_ignore_ascii_case("local") => {
            return Ok(Arc::new(PatternAnalyzer::new()));
        }
        Some(name) => Some(
            LlmBackend::from_name(name)
                .ok_or_else(|| AiError::ConfigError(format!("unknown backend '{name}'")))?,
        ),
        None => AUTO_DETECT_ORDER
            .into_iter()
            .find(|b| std::env::var(b.env_key()).is_ok_and(|k| !k.trim().is_empty())),
    };

    let Some(backend) = backend else {
        tracing::info!("No model API key found, using local pattern analyzer");
        return Ok(Arc::new(PatternAnalyzer::new()));
    };

    let mut config = AiConfig {
        backend,
        model: settings.model.clone(),
        api_url: settings.api_url.clone(),
        ..Default::default()
    };
    if let Some(max_tokens) = settings.max_tokens {
        config.max_tokens = max_tokens;
    }
    if let Some(temperature) = settings.temperature {
        config.temperature = temperature;
    }
    Ok(Arc::new(AiClient::from_env_with_config(config)?))
}
