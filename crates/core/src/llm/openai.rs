use crate::config::Settings;
use crate::context::RequestContext;
use crate::error::{AssistantError, Result, ResultExt};
use crate::llm::error::ProviderError;
use crate::llm::http::{build_client, post_json};
use crate::llm::{ModelProvider, Provider, DEFAULT_MODEL_TIMEOUT_SECS};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::{Deserialize, Serialize};

const DEFAULT_BASE_URL: &str = "https://api.openai.com";
const DEFAULT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_EMBEDDINGS_MODEL: &str = "text-embedding-3-small";

#[derive(Debug, Clone)]
pub struct OpenAiClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    embeddings_model: String,
}

impl OpenAiClient {
    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let api_key = settings.require_openai_api_key()?.to_string();
        let base_url =
            std::env::var("OPENAI_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        let model = std::env::var("OPENAI_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        let embeddings_model = std::env::var("OPENAI_EMBEDDINGS_MODEL")
            .unwrap_or_else(|_| DEFAULT_EMBEDDINGS_MODEL.to_string());
        let http = build_client("OPENAI_TIMEOUT_SECS", DEFAULT_MODEL_TIMEOUT_SECS)?;

        Ok(Self {
            http,
            api_key,
            base_url,
            model,
            embeddings_model,
        })
    }

    fn headers(&self) -> anyhow::Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", self.api_key))?,
        );
        Ok(headers)
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/{path}", self.base_url.trim_end_matches('/'))
    }

    async fn chat(&self, prompt: &str) -> anyhow::Result<String> {
        let req = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: Some(prompt.to_string()),
            }],
        };
        let res: ChatResponse = post_json(
            &self.http,
            Provider::OpenAI,
            &self.url("chat/completions"),
            self.headers()?,
            &req,
        )
        .await?;
        Self::response_text(res)
    }

    fn response_text(res: ChatResponse) -> anyhow::Result<String> {
        res.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|text| !text.trim().is_empty())
            .ok_or_else(|| ProviderError::Empty { provider: Provider::OpenAI }.into())
    }

    async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        let req = EmbeddingsRequest {
            model: &self.embeddings_model,
            input: text,
        };
        let res: EmbeddingsResponse = post_json(
            &self.http,
            Provider::OpenAI,
            &self.url("embeddings"),
            self.headers()?,
            &req,
        )
        .await?;
        Ok(res
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .unwrap_or_default())
    }
}

#[async_trait::async_trait]
impl ModelProvider for OpenAiClient {
    fn provider(&self) -> Provider {
        Provider::OpenAI
    }

    async fn generate_content(&self, ctx: &RequestContext, prompt: &str) -> Result<String> {
        ctx.run(async { self.chat(prompt).await.external("openai chat completion failed") })
            .await
    }

    async fn embed_content(&self, ctx: &RequestContext, text: &str) -> Result<Vec<f32>> {
        let values = ctx
            .run(async { self.embed(text).await.external("openai embeddings failed") })
            .await?;
        if values.is_empty() {
            return Err(AssistantError::External(anyhow::anyhow!(
                "openai returned an empty embedding"
            )));
        }
        Ok(values)
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Clone, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn takes_first_choice() {
        let res: ChatResponse = serde_json::from_value(json!({
            "choices": [
                {"message": {"role": "assistant", "content": "first"}},
                {"message": {"role": "assistant", "content": "second"}}
            ]
        }))
        .unwrap();
        assert_eq!(OpenAiClient::response_text(res).unwrap(), "first");
    }

    #[test]
    fn null_content_is_an_error() {
        let res: ChatResponse = serde_json::from_value(json!({
            "choices": [{"message": {"role": "assistant", "content": null}}]
        }))
        .unwrap();
        assert!(OpenAiClient::response_text(res).is_err());
    }
}
