use super::{prepare_input, EmbeddingService, DEFAULT_BATCH_CONCURRENCY};
use crate::context::RequestContext;
use crate::error::{AssistantError, Result};
use anyhow::anyhow;
use futures_util::{stream, StreamExt, TryStreamExt};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Tries `primary`, then `fallback` on any non-cancellation error.
pub struct FallbackEmbeddingService {
    primary: Arc<dyn EmbeddingService>,
    fallback: Arc<dyn EmbeddingService>,
    fallback_count: AtomicU64,
}

impl FallbackEmbeddingService {
    pub fn new(primary: Arc<dyn EmbeddingService>, fallback: Arc<dyn EmbeddingService>) -> Self {
        Self {
            primary,
            fallback,
            fallback_count: AtomicU64::new(0),
        }
    }

    /// Number of requests served by the fallback provider so far.
    pub fn fallback_count(&self) -> u64 {
        self.fallback_count.load(Ordering::Relaxed)
    }
}

#[async_trait::async_trait]
impl EmbeddingService for FallbackEmbeddingService {
    fn name(&self) -> &str {
        "fallback"
    }

    async fn generate_embedding(&self, ctx: &RequestContext, text: &str) -> Result<Vec<f32>> {
        let text = prepare_input(text)?;
        let primary_err = match self.primary.generate_embedding(ctx, text).await {
            Ok(vector) => return Ok(vector),
            Err(err @ AssistantError::Cancelled(_)) => return Err(err),
            Err(err) => err,
        };

        tracing::warn!(
            primary = %self.primary.name(),
            fallback = %self.fallback.name(),
            error = %primary_err,
            "primary embedding provider failed, using fallback"
        );
        self.fallback_count.fetch_add(1, Ordering::Relaxed);

        match self.fallback.generate_embedding(ctx, text).await {
            Ok(vector) => Ok(vector),
            Err(err @ AssistantError::Cancelled(_)) => Err(err),
            Err(fallback_err) => Err(AssistantError::External(anyhow!(
                "embedding failed on both providers: {}: {primary_err}; {}: {fallback_err}",
                self.primary.name(),
                self.fallback.name()
            ))),
        }
    }

    async fn generate_batch_embeddings(&self, ctx: &RequestContext, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        for text in texts {
            prepare_input(text)?;
        }
        let pending: Vec<_> = texts.iter().map(|text| self.generate_embedding(ctx, text)).collect();
        stream::iter(pending).buffered(DEFAULT_BATCH_CONCURRENCY).try_collect().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::testing::StubEmbedder;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn healthy_primary_never_touches_fallback() {
        let fallback = Arc::new(StubEmbedder::ok("secondary", vec![0.0, 1.0]));
        let service = FallbackEmbeddingService::new(
            Arc::new(StubEmbedder::ok("primary", vec![1.0, 0.0])),
            fallback.clone(),
        );
        let v = service
            .generate_embedding(&RequestContext::background(), "hello")
            .await
            .unwrap();
        assert_eq!(v, vec![1.0, 0.0]);
        assert_eq!(service.fallback_count(), 0);
        assert_eq!(fallback.calls(), 0);
    }

    #[tokio::test]
    async fn failing_primary_counts_each_fallback() {
        let service = FallbackEmbeddingService::new(
            Arc::new(StubEmbedder::failing("primary")),
            Arc::new(StubEmbedder::ok("secondary", vec![0.0, 1.0])),
        );
        let ctx = RequestContext::background();
        for expected in 1..=3 {
            let v = service.generate_embedding(&ctx, "hello").await.unwrap();
            assert_eq!(v, vec![0.0, 1.0]);
            assert_eq!(service.fallback_count(), expected);
        }
    }

    #[tokio::test]
    async fn both_failing_surfaces_combined_error() {
        let service = FallbackEmbeddingService::new(
            Arc::new(StubEmbedder::failing("primary")),
            Arc::new(StubEmbedder::failing("secondary")),
        );
        let err = service
            .generate_embedding(&RequestContext::background(), "hello")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::External);
        let msg = err.to_string();
        assert!(msg.contains("primary") && msg.contains("secondary"), "{msg}");
    }

    #[tokio::test]
    async fn batch_falls_back_per_element() {
        let service = FallbackEmbeddingService::new(
            Arc::new(StubEmbedder::failing("primary")),
            Arc::new(StubEmbedder::ok("secondary", vec![0.5, 0.5])),
        );
        let texts = vec!["a".to_string(), "b".to_string()];
        let out = service
            .generate_batch_embeddings(&RequestContext::background(), &texts)
            .await
            .unwrap();
        assert_eq!(out, vec![vec![0.5, 0.5], vec![0.5, 0.5]]);
        assert_eq!(service.fallback_count(), 2);
    }

    #[tokio::test]
    async fn empty_text_is_rejected_without_fallback() {
        let service = FallbackEmbeddingService::new(
            Arc::new(StubEmbedder::failing("primary")),
            Arc::new(StubEmbedder::ok("secondary", vec![1.0])),
        );
        let err = service
            .generate_embedding(&RequestContext::background(), "  ")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert_eq!(service.fallback_count(), 0);
    }
}
