use crate::config::Settings;
use crate::context::RequestContext;
use crate::error::{AssistantError, Result, ResultExt};
use crate::llm::error::ProviderError;
use crate::llm::http::{build_client, post_json};
use crate::llm::{ModelProvider, Provider, DEFAULT_MODEL_TIMEOUT_SECS};
use reqwest::header::{HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
const DEFAULT_MODEL: &str = "gemini-1.5-flash";
const DEFAULT_EMBEDDINGS_MODEL: &str = "text-embedding-004";

#[derive(Debug, Clone)]
pub struct GeminiClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    embeddings_model: String,
}

impl GeminiClient {
    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let api_key = settings.require_gemini_api_key()?.to_string();
        let base_url =
            std::env::var("GEMINI_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        let model = std::env::var("GEMINI_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        let embeddings_model = std::env::var("GEMINI_EMBEDDINGS_MODEL")
            .unwrap_or_else(|_| DEFAULT_EMBEDDINGS_MODEL.to_string());
        let http = build_client("GEMINI_TIMEOUT_SECS", DEFAULT_MODEL_TIMEOUT_SECS)?;

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
        headers.insert("x-goog-api-key", HeaderValue::from_str(&self.api_key)?);
        Ok(headers)
    }

    fn url(&self, model: &str, method: &str) -> String {
        format!(
            "{}/v1beta/models/{model}:{method}",
            self.base_url.trim_end_matches('/')
        )
    }

    async fn generate(&self, prompt: &str) -> anyhow::Result<String> {
        let req = GenerateContentRequest {
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![Part {
                    text: prompt.to_string(),
                }],
            }],
        };
        let res: GenerateContentResponse = post_json(
            &self.http,
            Provider::Gemini,
            &self.url(&self.model, "generateContent"),
            self.headers()?,
            &req,
        )
        .await?;
        Self::response_text(res)
    }

    fn response_text(res: GenerateContentResponse) -> anyhow::Result<String> {
        let text = res
            .candidates
            .into_iter()
            .next()
            .map(|c| {
                c.content
                    .parts
                    .into_iter()
                    .map(|p| p.text)
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .unwrap_or_default();
        if text.trim().is_empty() {
            return Err(ProviderError::Empty {
                provider: Provider::Gemini,
            }
            .into());
        }
        Ok(text)
    }

    async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        let req = EmbedContentRequest {
            model: format!("models/{}", self.embeddings_model),
            content: Content {
                role: None,
                parts: vec![Part {
                    text: text.to_string(),
                }],
            },
        };
        let res: EmbedContentResponse = post_json(
            &self.http,
            Provider::Gemini,
            &self.url(&self.embeddings_model, "embedContent"),
            self.headers()?,
            &req,
        )
        .await?;
        Ok(res.embedding.values)
    }
}

#[async_trait::async_trait]
impl ModelProvider for GeminiClient {
    fn provider(&self) -> Provider {
        Provider::Gemini
    }

    async fn generate_content(&self, ctx: &RequestContext, prompt: &str) -> Result<String> {
        ctx.run(async { self.generate(prompt).await.external("gemini generateContent failed") })
            .await
    }

    async fn embed_content(&self, ctx: &RequestContext, text: &str) -> Result<Vec<f32>> {
        let values = ctx
            .run(async { self.embed(text).await.external("gemini embedContent failed") })
            .await?;
        if values.is_empty() {
            return Err(AssistantError::External(anyhow::anyhow!(
                "gemini returned an empty embedding"
            )));
        }
        Ok(values)
    }
}

#[derive(Debug, Clone, Serialize)]
struct GenerateContentRequest {
    contents: Vec<Content>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Clone, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Clone, Deserialize)]
struct Candidate {
    content: Content,
}

#[derive(Debug, Clone, Serialize)]
struct EmbedContentRequest {
    model: String,
    content: Content,
}

#[derive(Debug, Clone, Deserialize)]
struct EmbedContentResponse {
    embedding: EmbeddingValues,
}

#[derive(Debug, Clone, Deserialize)]
struct EmbeddingValues {
    values: Vec<f32>,
}
