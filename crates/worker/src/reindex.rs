use anyhow::Context;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

use tradeassist_core::config::Settings;
use tradeassist_core::context::{Clock, RequestContext};
use tradeassist_core::embeddings::{embedding_service_from_settings, IndexRequest, SimilarityService};
use tradeassist_core::llm::model_from_settings;
use tradeassist_core::memory::ConversationMemoryRepository;
use tradeassist_core::storage::{PgConversationRepository, PgVectorStore};

pub const DEFAULT_WORKERS: usize = 5;
const CHANNEL_CAPACITY: usize = 1000;

#[derive(Debug, Clone)]
pub struct Target {
    pub user_id: i64,
    pub session_id: String,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReindexStats {
    pub indexed: usize,
    pub failed: usize,
}

pub async fn run(
    ctx: &RequestContext,
    settings: &Settings,
    pool: &sqlx::PgPool,
    clock: Arc<dyn Clock>,
    target: Target,
    workers: usize,
    dry_run: bool,
) -> anyhow::Result<()> {
    let memory = PgConversationRepository::new(pool.clone(), clock.clone());
    let session = memory
        .retrieve(ctx, target.user_id, &target.session_id)
        .await?
        .with_context(|| format!("session not found (user_id={}, session_id={})", target.user_id, target.session_id))?;

    let requests = IndexRequest::for_messages(&session, &session.messages);
    let skipped = session.messages.len() - requests.len();
    if dry_run {
        tracing::info!(
            conversation_id = %session.conversation_id(),
            messages = requests.len(),
            skipped,
            dry_run = true,
            "session reindex"
        );
        return Ok(());
    }

    let model = model_from_settings(settings)?;
    let embedder = embedding_service_from_settings(settings, model)?;
    let similarity = SimilarityService::new(embedder, Arc::new(PgVectorStore::new(pool.clone(), clock)));

    let stats = index_all(ctx, similarity, requests, workers).await;
    tracing::info!(
        conversation_id = %session.conversation_id(),
        indexed = stats.indexed,
        failed = stats.failed,
        skipped,
        "session reindexed"
    );
    anyhow::ensure!(stats.failed == 0, "{} messages failed to index", stats.failed);
    Ok(())
}

/// Feeds requests through a bounded channel drained by a fixed worker pool.
pub async fn index_all(
    ctx: &RequestContext,
    similarity: SimilarityService,
    requests: Vec<IndexRequest>,
    workers: usize,
) -> ReindexStats {
    let (tx, rx) = mpsc::channel::<IndexRequest>(CHANNEL_CAPACITY);
    let rx = Arc::new(Mutex::new(rx));

    let handles: Vec<_> = (0..workers.max(1))
        .map(|worker| {
            let rx = rx.clone();
            let similarity = similarity.clone();
            let ctx = ctx.clone();
            tokio::spawn(async move {
                let mut stats = ReindexStats::default();
                loop {
                    let next = rx.lock().await.recv().await;
                    let Some(request) = next else { break };
                    let message_id = request.message_id.clone();
                    match similarity.index(&ctx, request).await {
                        Ok(()) => stats.indexed += 1,
                        Err(err) => {
                            tracing::warn!(worker, %message_id, error = %err, "failed to index message");
                            stats.failed += 1;
                        }
                    }
                }
                stats
            })
        })
        .collect();

    for request in requests {
        if tx.send(request).await.is_err() {
            break;
        }
    }
    drop(tx);

    let mut total = ReindexStats::default();
    for handle in handles {
        match handle.await {
            Ok(stats) => {
                total.indexed += stats.indexed;
                total.failed += stats.failed;
            }
            Err(err) => tracing::error!(error = %err, "index worker panicked"),
        }
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use serde_json::Map;
    use tradeassist_core::context::ManualClock;
    use tradeassist_core::embeddings::{EmbeddingService, InMemoryVectorStore, VectorStore};
    use tradeassist_core::error::{AssistantError, Result};

    struct LengthEmbedder;

    #[async_trait]
    impl EmbeddingService for LengthEmbedder {
        fn name(&self) -> &str {
            "length"
        }

        async fn generate_embedding(&self, _ctx: &RequestContext, text: &str) -> Result<Vec<f32>> {
            if text.contains("boom") {
                return Err(AssistantError::External(anyhow::anyhow!("embedding failed")));
            }
            Ok(vec![text.len() as f32, 1.0])
        }

        async fn generate_batch_embeddings(&self, ctx: &RequestContext, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            let mut out = Vec::with_capacity(texts.len());
            for text in texts {
                out.push(self.generate_embedding(ctx, text).await?);
            }
            Ok(out)
        }
    }

    fn request(id: usize, content: &str) -> IndexRequest {
        IndexRequest {
            conversation_id: "1:s".to_string(),
            message_id: format!("m{id}"),
            content: content.to_string(),
            metadata: Map::new(),
        }
    }

    #[tokio::test]
    async fn workers_drain_every_request_and_count_failures() {
        let clock = Arc::new(ManualClock::new(chrono::Utc::now()));
        let store = Arc::new(InMemoryVectorStore::new(clock));
        let similarity = SimilarityService::new(Arc::new(LengthEmbedder), store.clone());
        let ctx = RequestContext::background();

        let mut requests: Vec<_> = (0..40).map(|i| request(i, "hello there")).collect();
        requests.push(request(40, "boom"));

        let stats = index_all(&ctx, similarity, requests, 5).await;
        assert_eq!(stats, ReindexStats { indexed: 40, failed: 1 });
        assert_eq!(store.get_embeddings_by_conversation(&ctx, "1:s").await.unwrap().len(), 40);
    }
}
