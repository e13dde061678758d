use crate::context::{Clock, RequestContext};
use crate::embeddings::store::{encode_vector, rank, record_from_parts, stamp_indexed_at, validate_vector};
use crate::embeddings::{EmbeddingRecord, SimilarEmbedding, VectorStore};
use crate::error::{AssistantError, Result, ResultExt};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::types::Json;
use sqlx::PgPool;
use std::sync::Arc;

#[derive(sqlx::FromRow)]
struct EmbeddingRow {
    conversation_id: String,
    message_id: String,
    content: String,
    embedding_vector: Vec<u8>,
    dimensions: i32,
    metadata: Value,
    indexed_at: DateTime<Utc>,
}

impl EmbeddingRow {
    fn decode(self) -> anyhow::Result<EmbeddingRecord> {
        record_from_parts(
            self.conversation_id,
            self.message_id,
            self.content,
            &self.embedding_vector,
            self.dimensions,
            self.metadata,
            self.indexed_at,
        )
    }
}

const COLUMNS: &str = "conversation_id, message_id, content, embedding_vector, dimensions, metadata, indexed_at";

/// Vectors are stored as little-endian float32 bytes and ranked in process.
#[derive(Clone)]
pub struct PgVectorStore {
    pool: PgPool,
    clock: Arc<dyn Clock>,
}

impl PgVectorStore {
    pub fn new(pool: PgPool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }
}

#[async_trait::async_trait]
impl VectorStore for PgVectorStore {
    async fn store_embedding(
        &self,
        ctx: &RequestContext,
        conversation_id: &str,
        message_id: &str,
        content: &str,
        vector: Vec<f32>,
        mut metadata: Map<String, Value>,
    ) -> Result<()> {
        validate_vector(&vector)?;
        let dimensions = i32::try_from(vector.len())
            .map_err(|_| AssistantError::invalid("embedding vector is too large"))?;
        let now = self.clock.now();
        stamp_indexed_at(&mut metadata, now);

        ctx.run(async {
            sqlx::query(&format!(
                "INSERT INTO conversation_embeddings ({COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7) \
                 ON CONFLICT (conversation_id, message_id) DO UPDATE \
                   SET content = EXCLUDED.content, embedding_vector = EXCLUDED.embedding_vector, \
                       dimensions = EXCLUDED.dimensions, metadata = EXCLUDED.metadata, indexed_at = EXCLUDED.indexed_at"
            ))
            .bind(conversation_id)
            .bind(message_id)
            .bind(content)
            .bind(encode_vector(&vector))
            .bind(dimensions)
            .bind(Json(&metadata))
            .bind(now)
            .execute(&self.pool)
            .await
            .external("upsert conversation_embeddings failed")?;
            Ok(())
        })
        .await
    }

    async fn find_similar_embeddings(
        &self,
        ctx: &RequestContext,
        query: &[f32],
        limit: usize,
    ) -> Result<Vec<SimilarEmbedding>> {
        self.find_similar_in_scope(ctx, query, "", limit).await
    }

    async fn find_similar_in_scope(
        &self,
        ctx: &RequestContext,
        query: &[f32],
        conversation_prefix: &str,
        limit: usize,
    ) -> Result<Vec<SimilarEmbedding>> {
        validate_vector(query)?;
        let dimensions = i32::try_from(query.len())
            .map_err(|_| AssistantError::invalid("embedding vector is too large"))?;
        ctx.run(async {
            let rows: Vec<EmbeddingRow> = sqlx::query_as(&format!(
                "SELECT {COLUMNS} FROM conversation_embeddings \
                 WHERE dimensions = $1 AND left(conversation_id, char_length($2)) = $2 \
                 ORDER BY indexed_at ASC, conversation_id ASC, message_id ASC"
            ))
            .bind(dimensions)
            .bind(conversation_prefix)
            .fetch_all(&self.pool)
            .await
            .external("select conversation_embeddings failed")?;

            let records: Vec<EmbeddingRecord> = rows
                .into_iter()
                .filter_map(|row| match row.decode() {
                    Ok(record) => Some(record),
                    Err(err) => {
                        tracing::warn!(error = %format!("{err:#}"), "skipping undecodable embedding");
                        None
                    }
                })
                .collect();
            Ok(rank(records.iter(), query, limit))
        })
        .await
    }

    async fn get_embeddings_by_conversation(
        &self,
        ctx: &RequestContext,
        conversation_id: &str,
    ) -> Result<Vec<EmbeddingRecord>> {
        ctx.run(async {
            let rows: Vec<EmbeddingRow> = sqlx::query_as(&format!(
                "SELECT {COLUMNS} FROM conversation_embeddings WHERE conversation_id = $1 \
                 ORDER BY indexed_at ASC, message_id ASC"
            ))
            .bind(conversation_id)
            .fetch_all(&self.pool)
            .await
            .external("select conversation_embeddings failed")?;
            rows.into_iter()
                .map(|row| row.decode().external("decode conversation_embeddings row failed"))
                .collect()
        })
        .await
    }

    async fn delete_embeddings_by_conversation(&self, ctx: &RequestContext, conversation_id: &str) -> Result<u64> {
        ctx.run(async {
            let res = sqlx::query("DELETE FROM conversation_embeddings WHERE conversation_id = $1")
                .bind(conversation_id)
                .execute(&self.pool)
                .await
                .external("delete conversation_embeddings failed")?;
            Ok(res.rows_affected())
        })
        .await
    }
}
