use crate::context::{Clock, RequestContext};
use crate::domain::conversation::{ConversationMemory, Message};
use crate::error::{AssistantError, Result, ResultExt};
use crate::memory::{clamp_to_tail, compact_in_place, ensure_ordered, ConversationMemoryRepository};
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::PgPool;
use std::sync::Arc;

#[derive(sqlx::FromRow)]
struct MemoryRow {
    user_id: i64,
    session_id: String,
    messages: Json<Vec<Message>>,
    summary: Option<String>,
    last_accessed: DateTime<Utc>,
}

impl From<MemoryRow> for ConversationMemory {
    fn from(row: MemoryRow) -> Self {
        Self {
            user_id: row.user_id,
            session_id: row.session_id,
            messages: row.messages.0,
            summary: row.summary,
            last_accessed: row.last_accessed,
        }
    }
}

const COLUMNS: &str = "user_id, session_id, messages, summary, last_accessed";

/// One row per session; the message log lives in a JSONB array.
#[derive(Clone)]
pub struct PgConversationRepository {
    pool: PgPool,
    clock: Arc<dyn Clock>,
}

impl PgConversationRepository {
    pub fn new(pool: PgPool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }

    /// Locks the session row for the rest of `tx`.
    async fn lock_row(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        user_id: i64,
        session_id: &str,
    ) -> Result<Option<ConversationMemory>> {
        let row: Option<MemoryRow> = sqlx::query_as(&format!(
            "SELECT {COLUMNS} FROM conversation_memories WHERE user_id = $1 AND session_id = $2 FOR UPDATE"
        ))
        .bind(user_id)
        .bind(session_id)
        .fetch_optional(&mut **tx)
        .await
        .external("select conversation_memories failed")?;
        Ok(row.map(Into::into))
    }

    async fn write_row(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        memory: &ConversationMemory,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE conversation_memories SET messages = $3, summary = $4, last_accessed = $5 \
             WHERE user_id = $1 AND session_id = $2",
        )
        .bind(memory.user_id)
        .bind(&memory.session_id)
        .bind(Json(&memory.messages))
        .bind(&memory.summary)
        .bind(memory.last_accessed)
        .execute(&mut **tx)
        .await
        .external("update conversation_memories failed")?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl ConversationMemoryRepository for PgConversationRepository {
    async fn store(
        &self,
        ctx: &RequestContext,
        user_id: i64,
        session_id: &str,
        messages: Vec<Message>,
        summary: Option<String>,
    ) -> Result<ConversationMemory> {
        ensure_ordered(&messages)?;
        let now = self.clock.now();
        ctx.run(async {
            let row: MemoryRow = sqlx::query_as(&format!(
                "INSERT INTO conversation_memories ({COLUMNS}) VALUES ($1, $2, $3, $4, $5) \
                 ON CONFLICT (user_id, session_id) DO UPDATE \
                   SET messages = EXCLUDED.messages, summary = EXCLUDED.summary, last_accessed = EXCLUDED.last_accessed \
                 RETURNING {COLUMNS}"
            ))
            .bind(user_id)
            .bind(session_id)
            .bind(Json(&messages))
            .bind(&summary)
            .bind(now)
            .fetch_one(&self.pool)
            .await
            .external("upsert conversation_memories failed")?;
            Ok(row.into())
        })
        .await
    }

    async fn retrieve(
        &self,
        ctx: &RequestContext,
        user_id: i64,
        session_id: &str,
    ) -> Result<Option<ConversationMemory>> {
        let now = self.clock.now();
        ctx.run(async {
            let row: Option<MemoryRow> = sqlx::query_as(&format!(
                "UPDATE conversation_memories SET last_accessed = GREATEST(last_accessed, $3) \
                 WHERE user_id = $1 AND session_id = $2 RETURNING {COLUMNS}"
            ))
            .bind(user_id)
            .bind(session_id)
            .bind(now)
            .fetch_optional(&self.pool)
            .await
            .external("retrieve conversation_memories failed")?;
            Ok(row.map(Into::into))
        })
        .await
    }

    async fn list_user_sessions(
        &self,
        ctx: &RequestContext,
        user_id: i64,
        limit: usize,
    ) -> Result<Vec<ConversationMemory>> {
        ctx.run(async {
            let rows: Vec<MemoryRow> = sqlx::query_as(&format!(
                "SELECT {COLUMNS} FROM conversation_memories WHERE user_id = $1 \
                 ORDER BY last_accessed DESC, session_id ASC LIMIT $2"
            ))
            .bind(user_id)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await
            .external("list conversation_memories failed")?;
            Ok(rows.into_iter().map(Into::into).collect())
        })
        .await
    }

    async fn delete_session(&self, ctx: &RequestContext, user_id: i64, session_id: &str) -> Result<()> {
        ctx.run(async {
            sqlx::query("DELETE FROM conversation_memories WHERE user_id = $1 AND session_id = $2")
                .bind(user_id)
                .bind(session_id)
                .execute(&self.pool)
                .await
                .external("delete conversation_memories failed")?;
            Ok(())
        })
        .await
    }

    async fn append(
        &self,
        ctx: &RequestContext,
        user_id: i64,
        session_id: &str,
        mut messages: Vec<Message>,
    ) -> Result<ConversationMemory> {
        let now = self.clock.now();
        ctx.run(async {
            let mut tx = self.pool.begin().await.external("begin transaction failed")?;

            // Creates the row first so concurrent appenders serialize on its lock.
            sqlx::query(
                "INSERT INTO conversation_memories (user_id, session_id, messages, summary, last_accessed) \
                 VALUES ($1, $2, '[]'::jsonb, NULL, $3) ON CONFLICT (user_id, session_id) DO NOTHING",
            )
            .bind(user_id)
            .bind(session_id)
            .bind(now)
            .execute(&mut *tx)
            .await
            .external("insert conversation_memories failed")?;

            let Some(mut memory) = Self::lock_row(&mut tx, user_id, session_id).await? else {
                return Err(AssistantError::External(anyhow::anyhow!(
                    "conversation row vanished during append"
                )));
            };
            let moved = clamp_to_tail(Some(&memory), &mut messages);
            if moved > 0 {
                tracing::debug!(user_id, session_id, moved, "late messages moved up to session tail");
            }
            memory.messages.extend(messages);
            if now > memory.last_accessed {
                memory.last_accessed = now;
            }
            Self::write_row(&mut tx, &memory).await?;

            tx.commit().await.external("commit transaction failed")?;
            Ok(memory)
        })
        .await
    }

    async fn compact(
        &self,
        ctx: &RequestContext,
        user_id: i64,
        session_id: &str,
        keep: usize,
    ) -> Result<Option<ConversationMemory>> {
        ctx.run(async {
            let mut tx = self.pool.begin().await.external("begin transaction failed")?;
            let Some(mut memory) = Self::lock_row(&mut tx, user_id, session_id).await? else {
                return Ok(None);
            };
            if compact_in_place(&mut memory, keep) {
                Self::write_row(&mut tx, &memory).await?;
            }
            tx.commit().await.external("commit transaction failed")?;
            Ok(Some(memory))
        })
        .await
    }
}
