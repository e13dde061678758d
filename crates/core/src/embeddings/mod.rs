//! Embedding generation, vector storage and nearest-neighbour search.

pub mod fallback;
pub mod similarity;
pub mod store;

pub use fallback::FallbackEmbeddingService;
pub use similarity::{IndexRequest, SimilarityService};
pub use store::{EmbeddingRecord, InMemoryVectorStore, SimilarEmbedding, VectorStore};

use crate::context::RequestContext;
use crate::error::{AssistantError, Result};
use crate::config::Settings;
use crate::llm::{client_for, ModelProvider, Provider};
use anyhow::anyhow;
use futures_util::{stream, StreamExt, TryStreamExt};
use std::sync::Arc;

/// In-flight requests per batch.
pub const DEFAULT_BATCH_CONCURRENCY: usize = 5;

#[async_trait::async_trait]
pub trait EmbeddingService: Send + Sync {
    fn name(&self) -> &str;

    async fn generate_embedding(&self, ctx: &RequestContext, text: &str) -> Result<Vec<f32>>;

    /// One vector per input, in input order.
    async fn generate_batch_embeddings(&self, ctx: &RequestContext, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Embeds with the primary model, falling back to `AI_FALLBACK_PROVIDER` when set.
pub fn embedding_service_from_settings(
    settings: &Settings,
    model: Arc<dyn ModelProvider>,
) -> Result<Arc<dyn EmbeddingService>> {
    let primary: Arc<dyn EmbeddingService> = Arc::new(ModelEmbeddingService::new(model));
    let Some(fallback) = settings.ai_fallback_provider.as_deref().filter(|p| !p.trim().is_empty()) else {
        return Ok(primary);
    };
    let fallback: Provider = fallback.parse()?;
    tracing::info!(primary = %primary.name(), fallback = %fallback, "embedding fallback enabled");
    let fallback = Arc::new(ModelEmbeddingService::new(client_for(fallback, settings)?));
    Ok(Arc::new(FallbackEmbeddingService::new(primary, fallback)))
}

/// Trims the input and rejects empty text.
pub fn prepare_input(text: &str) -> Result<&str> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(AssistantError::invalid("text to embed must not be empty"));
    }
    Ok(trimmed)
}

/// Embeds through a model provider's embedding endpoint.
pub struct ModelEmbeddingService {
    model: Arc<dyn ModelProvider>,
    name: String,
    concurrency: usize,
}

impl ModelEmbeddingService {
    pub fn new(model: Arc<dyn ModelProvider>) -> Self {
        let name = model.provider().to_string();
        Self {
            model,
            name,
            concurrency: DEFAULT_BATCH_CONCURRENCY,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }
}

#[async_trait::async_trait]
impl EmbeddingService for ModelEmbeddingService {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate_embedding(&self, ctx: &RequestContext, text: &str) -> Result<Vec<f32>> {
        let text = prepare_input(text)?;
        let vector = ctx.run(self.model.embed_content(ctx, text)).await?;
        if vector.is_empty() {
            return Err(AssistantError::External(anyhow!(
                "{} returned an empty embedding",
                self.name
            )));
        }
        Ok(vector)
    }

    async fn generate_batch_embeddings(&self, ctx: &RequestContext, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        for text in texts {
            prepare_input(text)?;
        }
        let pending: Vec<_> = texts.iter().map(|text| self.generate_embedding(ctx, text)).collect();
        stream::iter(pending).buffered(self.concurrency).try_collect().await
    }
}
