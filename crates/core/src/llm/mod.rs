pub mod anthropic;
pub mod error;
pub mod gemini;
mod http;
pub mod json;
pub mod openai;

use crate::config::Settings;
use crate::context::RequestContext;
use crate::error::{AssistantError, Result};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Default per-call timeout for model requests.
pub const DEFAULT_MODEL_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Gemini,
    OpenAI,
    Anthropic,
}

impl Provider {
    pub fn as_str(self) -> &'static str {
        match self {
            Provider::Gemini => "gemini",
            Provider::OpenAI => "openai",
            Provider::Anthropic => "anthropic",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = AssistantError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gemini" => Ok(Provider::Gemini),
            "openai" => Ok(Provider::OpenAI),
            "anthropic" => Ok(Provider::Anthropic),
            other => Err(AssistantError::invalid(format!(
                "unsupported AI provider: {other}"
            ))),
        }
    }
}

/// Generative model port. Every call honours the context deadline and cancellation.
#[async_trait::async_trait]
pub trait ModelProvider: Send + Sync {
    fn provider(&self) -> Provider;

    async fn generate_content(&self, ctx: &RequestContext, prompt: &str) -> Result<String>;

    async fn embed_content(&self, ctx: &RequestContext, text: &str) -> Result<Vec<f32>>;
}

pub fn client_for(provider: Provider, settings: &Settings) -> Result<Arc<dyn ModelProvider>> {
    let client: Arc<dyn ModelProvider> = match provider {
        Provider::Gemini => Arc::new(gemini::GeminiClient::from_settings(settings)?),
        Provider::OpenAI => Arc::new(openai::OpenAiClient::from_settings(settings)?),
        Provider::Anthropic => Arc::new(anthropic::AnthropicClient::from_settings(settings)?),
    };
    Ok(client)
}

/// Builds the model selected by `AI_PROVIDER`.
pub fn model_from_settings(settings: &Settings) -> Result<Arc<dyn ModelProvider>> {
    let provider: Provider = settings.ai_provider.parse()?;
    tracing::info!(provider = %provider, "initialising model provider");
    client_for(provider, settings)
}
