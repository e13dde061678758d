use crate::context::{Clock, RequestContext};
use crate::error::{AssistantError, Result};
use anyhow::{ensure, Context};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    pub conversation_id: String,
    pub message_id: String,
    pub content: String,
    pub vector: Vec<f32>,
    pub dimensions: usize,
    pub metadata: Map<String, Value>,
    pub indexed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarEmbedding {
    pub conversation_id: String,
    pub message_id: String,
    pub content: String,
    /// `1 - cosine distance`, in `[-1, 1]`.
    pub similarity: f64,
    pub metadata: Map<String, Value>,
}

#[async_trait::async_trait]
pub trait VectorStore: Send + Sync {
    /// Upserts by `(conversation_id, message_id)` and stamps `indexed_at` into the metadata.
    async fn store_embedding(
        &self,
        ctx: &RequestContext,
        conversation_id: &str,
        message_id: &str,
        content: &str,
        vector: Vec<f32>,
        metadata: Map<String, Value>,
    ) -> Result<()>;

    /// `limit` nearest neighbours, most similar first.
    async fn find_similar_embeddings(
        &self,
        ctx: &RequestContext,
        query: &[f32],
        limit: usize,
    ) -> Result<Vec<SimilarEmbedding>>;

    /// Same ranking, over conversations whose id starts with `conversation_prefix` only.
    async fn find_similar_in_scope(
        &self,
        ctx: &RequestContext,
        query: &[f32],
        conversation_prefix: &str,
        limit: usize,
    ) -> Result<Vec<SimilarEmbedding>>;

    async fn get_embeddings_by_conversation(
        &self,
        ctx: &RequestContext,
        conversation_id: &str,
    ) -> Result<Vec<EmbeddingRecord>>;

    /// Returns the number of removed records. Idempotent.
    async fn delete_embeddings_by_conversation(&self, ctx: &RequestContext, conversation_id: &str) -> Result<u64>;
}

/// Little-endian IEEE-754 float32 bytes.
pub fn encode_vector(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|v| v.to_le_bytes()).collect()
}

pub fn decode_vector(bytes: &[u8], dimensions: usize) -> anyhow::Result<Vec<f32>> {
    ensure!(dimensions > 0, "embedding has zero dimensions");
    ensure!(
        bytes.len() == dimensions * 4,
        "embedding byte length {} does not match {} dimensions",
        bytes.len(),
        dimensions
    );
    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

/// `None` when lengths differ or either vector has zero norm.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f64> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }
    let (mut dot, mut na, mut nb) = (0.0f64, 0.0f64, 0.0f64);
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    if na == 0.0 || nb == 0.0 {
        return None;
    }
    Some((dot / (na.sqrt() * nb.sqrt())).clamp(-1.0, 1.0))
}

pub(crate) fn validate_vector(vector: &[f32]) -> Result<()> {
    if vector.is_empty() {
        return Err(AssistantError::invalid("embedding vector must not be empty"));
    }
    if vector.iter().any(|v| !v.is_finite()) {
        return Err(AssistantError::invalid("embedding vector contains non-finite values"));
    }
    Ok(())
}

pub(crate) fn stamp_indexed_at(metadata: &mut Map<String, Value>, now: DateTime<Utc>) {
    metadata.insert("indexed_at".to_string(), Value::String(now.to_rfc3339()));
}

/// Scores candidates against `query` and keeps the best `limit`. Candidates with a
/// different dimension are skipped; equal scores keep candidate order.
pub(crate) fn rank<'a, I>(candidates: I, query: &[f32], limit: usize) -> Vec<SimilarEmbedding>
where
    I: IntoIterator<Item = &'a EmbeddingRecord>,
{
    let mut scored: Vec<SimilarEmbedding> = candidates
        .into_iter()
        .filter_map(|record| {
            let Some(similarity) = cosine_similarity(&record.vector, query) else {
                tracing::debug!(
                    conversation_id = %record.conversation_id,
                    message_id = %record.message_id,
                    "skipping embedding with incompatible vector"
                );
                return None;
            };
            Some(SimilarEmbedding {
                conversation_id: record.conversation_id.clone(),
                message_id: record.message_id.clone(),
                content: record.content.clone(),
                similarity,
                metadata: record.metadata.clone(),
            })
        })
        .collect();
    scored.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
    scored.truncate(limit);
    scored
}

#[derive(Debug)]
pub struct InMemoryVectorStore {
    records: RwLock<Vec<EmbeddingRecord>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryVectorStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            records: RwLock::new(Vec::new()),
            clock,
        }
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

#[async_trait::async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn store_embedding(
        &self,
        ctx: &RequestContext,
        conversation_id: &str,
        message_id: &str,
        content: &str,
        vector: Vec<f32>,
        mut metadata: Map<String, Value>,
    ) -> Result<()> {
        ctx.ensure_active()?;
        validate_vector(&vector)?;
        let now = self.clock.now();
        stamp_indexed_at(&mut metadata, now);

        let record = EmbeddingRecord {
            conversation_id: conversation_id.to_string(),
            message_id: message_id.to_string(),
            content: content.to_string(),
            dimensions: vector.len(),
            vector,
            metadata,
            indexed_at: now,
        };

        let mut records = self.records.write();
        match records
            .iter_mut()
            .find(|r| r.conversation_id == conversation_id && r.message_id == message_id)
        {
            Some(existing) => *existing = record,
            None => records.push(record),
        }
        Ok(())
    }

    async fn find_similar_embeddings(
        &self,
        ctx: &RequestContext,
        query: &[f32],
        limit: usize,
    ) -> Result<Vec<SimilarEmbedding>> {
        ctx.ensure_active()?;
        validate_vector(query)?;
        Ok(rank(self.records.read().iter(), query, limit))
    }

    async fn find_similar_in_scope(
        &self,
        ctx: &RequestContext,
        query: &[f32],
        conversation_prefix: &str,
        limit: usize,
    ) -> Result<Vec<SimilarEmbedding>> {
        ctx.ensure_active()?;
        validate_vector(query)?;
        let records = self.records.read();
        Ok(rank(
            records.iter().filter(|r| r.conversation_id.starts_with(conversation_prefix)),
            query,
            limit,
        ))
    }

    async fn get_embeddings_by_conversation(
        &self,
        ctx: &RequestContext,
        conversation_id: &str,
    ) -> Result<Vec<EmbeddingRecord>> {
        ctx.ensure_active()?;
        Ok(self
            .records
            .read()
            .iter()
            .filter(|r| r.conversation_id == conversation_id)
            .cloned()
            .collect())
    }

    async fn delete_embeddings_by_conversation(&self, ctx: &RequestContext, conversation_id: &str) -> Result<u64> {
        ctx.ensure_active()?;
        let mut records = self.records.write();
        let before = records.len();
        records.retain(|r| r.conversation_id != conversation_id);
        Ok((before - records.len()) as u64)
    }
}

/// Decodes a persisted row back into a record, checking the stored dimension.
pub(crate) fn record_from_parts(
    conversation_id: String,
    message_id: String,
    content: String,
    bytes: &[u8],
    dimensions: i32,
    metadata: Value,
    indexed_at: DateTime<Utc>,
) -> anyhow::Result<EmbeddingRecord> {
    let dimensions = usize::try_from(dimensions).context("negative embedding dimensions")?;
    let vector = decode_vector(bytes, dimensions)
        .with_context(|| format!("corrupt embedding {conversation_id}/{message_id}"))?;
    let metadata = match metadata {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => anyhow::bail!("embedding metadata must be an object, got {other}"),
    };
    Ok(EmbeddingRecord {
        conversation_id,
        message_id,
        content,
        vector,
        dimensions,
        metadata,
        indexed_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ManualClock;
    use crate::error::ErrorKind;
    use crate::testing::t0;
    use pretty_assertions::assert_eq;

    fn store() -> InMemoryVectorStore {
        InMemoryVectorStore::new(Arc::new(ManualClock::new(t0())))
    }

    #[test]
    fn vector_codec_is_little_endian() {
        let bytes = encode_vector(&[1.0, -2.5]);
        assert_eq!(&bytes[..4], &1.0f32.to_le_bytes());
        assert_eq!(decode_vector(&bytes, 2).unwrap(), vec![1.0, -2.5]);
        assert!(decode_vector(&bytes, 3).is_err());
        assert!(decode_vector(&[], 0).is_err());
    }

    #[test]
    fn cosine_edge_cases() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), Some(0.0));
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[-3.0, 0.0]), Some(-1.0));
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), None);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), None);
    }

    #[tokio::test]
    async fn stored_vector_is_its_own_nearest_neighbour() {
        let store = store();
        let ctx = RequestContext::background();
        let v = vec![0.3, -0.7, 0.2, 0.9];
        store
            .store_embedding(&ctx, "c1", "m1", "hello", v.clone(), Map::new())
            .await
            .unwrap();
        store
            .store_embedding(&ctx, "c1", "m2", "other", vec![-0.3, 0.7, 0.0, 0.1], Map::new())
            .await
            .unwrap();

        let hits = store.find_similar_embeddings(&ctx, &v, 1).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].message_id, "m1");
        assert!(hits[0].similarity >= 0.999);
        assert_eq!(
            hits[0].metadata["indexed_at"],
            Value::String(t0().to_rfc3339())
        );
    }

    #[tokio::test]
    async fn scoped_search_ignores_closer_rows_outside_the_prefix() {
        let store = store();
        let ctx = RequestContext::background();
        for i in 0..12 {
            store
                .store_embedding(&ctx, &format!("6:s{i}"), "m", "dog", vec![1.0, 0.0], Map::new())
                .await
                .unwrap();
        }
        store
            .store_embedding(&ctx, "5:a", "m", "my dog is sick", vec![0.8, 0.6], Map::new())
            .await
            .unwrap();

        let hits = store.find_similar_in_scope(&ctx, &[1.0, 0.0], "5:", 1).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].conversation_id, "5:a");
        assert!(store.find_similar_in_scope(&ctx, &[1.0, 0.0], "7:", 3).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn ties_keep_insertion_order() {
        let store = store();
        let ctx = RequestContext::background();
        for id in ["a", "b", "c"] {
            store
                .store_embedding(&ctx, "c1", id, id, vec![1.0, 1.0], Map::new())
                .await
                .unwrap();
        }
        let ids: Vec<_> = store
            .find_similar_embeddings(&ctx, &[2.0, 2.0], 3)
            .await
            .unwrap()
            .into_iter()
            .map(|h| h.message_id)
            .collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn restoring_a_message_replaces_it() {
        let store = store();
        let ctx = RequestContext::background();
        store
            .store_embedding(&ctx, "c1", "m1", "v1", vec![1.0], Map::new())
            .await
            .unwrap();
        store
            .store_embedding(&ctx, "c1", "m1", "v2", vec![1.0], Map::new())
            .await
            .unwrap();
        let records = store.get_embeddings_by_conversation(&ctx, "c1").await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].content, "v2");
        assert_eq!(records[0].dimensions, 1);
    }

    #[tokio::test]
    async fn delete_by_conversation_is_idempotent() {
        let store = store();
        let ctx = RequestContext::background();
        store
            .store_embedding(&ctx, "c1", "m1", "x", vec![1.0], Map::new())
            .await
            .unwrap();
        store
            .store_embedding(&ctx, "c2", "m1", "y", vec![1.0], Map::new())
            .await
            .unwrap();
        assert_eq!(store.delete_embeddings_by_conversation(&ctx, "c1").await.unwrap(), 1);
        assert_eq!(store.delete_embeddings_by_conversation(&ctx, "c1").await.unwrap(), 0);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn empty_vectors_are_rejected() {
        let err = store()
            .store_embedding(&RequestContext::background(), "c", "m", "x", Vec::new(), Map::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn persisted_rows_are_validated_on_read() {
        let bytes = encode_vector(&[1.0, 2.0]);
        let ok = record_from_parts("c".into(), "m".into(), "x".into(), &bytes, 2, Value::Null, t0()).unwrap();
        assert_eq!(ok.vector, vec![1.0, 2.0]);
        assert!(record_from_parts("c".into(), "m".into(), "x".into(), &bytes, 3, Value::Null, t0()).is_err());
    }
}
