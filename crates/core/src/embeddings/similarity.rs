use super::store::{SimilarEmbedding, VectorStore};
use super::EmbeddingService;
use crate::context::RequestContext;
use crate::domain::conversation::{ConversationMemory, Message};
use crate::error::Result;
use serde_json::{json, Map, Value};
use std::sync::Arc;

/// One message to embed and store.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexRequest {
    pub conversation_id: String,
    pub message_id: String,
    pub content: String,
    pub metadata: Map<String, Value>,
}

impl IndexRequest {
    /// One request per message carrying a `message_id` in its metadata; others are skipped.
    pub fn for_messages(memory: &ConversationMemory, messages: &[Message]) -> Vec<IndexRequest> {
        let conversation_id = memory.conversation_id();
        messages
            .iter()
            .filter_map(|m| {
                let message_id = m.metadata.get("message_id")?.as_str()?.to_string();
                let mut metadata = Map::new();
                metadata.insert("role".into(), json!(m.role.to_string()));
                metadata.insert("user_id".into(), json!(memory.user_id));
                metadata.insert("session_id".into(), json!(memory.session_id));
                Some(IndexRequest {
                    conversation_id: conversation_id.clone(),
                    message_id,
                    content: m.content.clone(),
                    metadata,
                })
            })
            .collect()
    }
}

/// Embeds on the way in and on the way out.
#[derive(Clone)]
pub struct SimilarityService {
    embedder: Arc<dyn EmbeddingService>,
    store: Arc<dyn VectorStore>,
}

impl SimilarityService {
    pub fn new(embedder: Arc<dyn EmbeddingService>, store: Arc<dyn VectorStore>) -> Self {
        Self { embedder, store }
    }

    pub fn store(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }

    pub async fn index(&self, ctx: &RequestContext, request: IndexRequest) -> Result<()> {
        let vector = self.embedder.generate_embedding(ctx, &request.content).await?;
        self.store
            .store_embedding(
                ctx,
                &request.conversation_id,
                &request.message_id,
                &request.content,
                vector,
                request.metadata,
            )
            .await
    }

    /// Embeds all contents in one batch, then stores them in order.
    pub async fn index_batch(&self, ctx: &RequestContext, requests: Vec<IndexRequest>) -> Result<()> {
        if requests.is_empty() {
            return Ok(());
        }
        let texts: Vec<String> = requests.iter().map(|r| r.content.clone()).collect();
        let vectors = self.embedder.generate_batch_embeddings(ctx, &texts).await?;
        for (request, vector) in requests.into_iter().zip(vectors) {
            self.store
                .store_embedding(
                    ctx,
                    &request.conversation_id,
                    &request.message_id,
                    &request.content,
                    vector,
                    request.metadata,
                )
                .await?;
        }
        Ok(())
    }

    pub async fn search(&self, ctx: &RequestContext, query: &str, limit: usize) -> Result<Vec<SimilarEmbedding>> {
        let vector = self.embedder.generate_embedding(ctx, query).await?;
        self.store.find_similar_embeddings(ctx, &vector, limit).await
    }

    /// Nearest neighbours among conversations whose id starts with `conversation_prefix`.
    pub async fn search_scoped(
        &self,
        ctx: &RequestContext,
        query: &str,
        conversation_prefix: &str,
        limit: usize,
    ) -> Result<Vec<SimilarEmbedding>> {
        let vector = self.embedder.generate_embedding(ctx, query).await?;
        self.store
            .find_similar_in_scope(ctx, &vector, conversation_prefix, limit)
            .await
    }
}
