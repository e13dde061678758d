//! Per-(user, session) conversation log with touch-on-read.

use crate::context::{Clock, RequestContext};
use crate::domain::conversation::{is_time_ordered, ConversationMemory, Message};
use crate::error::{AssistantError, Result};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Upper bound on a folded summary; older text is dropped first.
pub const MAX_SUMMARY_CHARS: usize = 4000;
const SUMMARY_LINE_CHARS: usize = 200;

#[async_trait::async_trait]
pub trait ConversationMemoryRepository: Send + Sync {
    /// Replaces the whole log for the session and sets `last_accessed = now`.
    async fn store(
        &self,
        ctx: &RequestContext,
        user_id: i64,
        session_id: &str,
        messages: Vec<Message>,
        summary: Option<String>,
    ) -> Result<ConversationMemory>;

    /// Returns the session and advances its `last_accessed`.
    async fn retrieve(
        &self,
        ctx: &RequestContext,
        user_id: i64,
        session_id: &str,
    ) -> Result<Option<ConversationMemory>>;

    /// Most recently accessed first.
    async fn list_user_sessions(
        &self,
        ctx: &RequestContext,
        user_id: i64,
        limit: usize,
    ) -> Result<Vec<ConversationMemory>>;

    /// Idempotent.
    async fn delete_session(&self, ctx: &RequestContext, user_id: i64, session_id: &str) -> Result<()>;

    /// Appends to the session atomically, creating it if absent. A message
    /// older than the stored tail takes the tail's timestamp.
    async fn append(
        &self,
        ctx: &RequestContext,
        user_id: i64,
        session_id: &str,
        messages: Vec<Message>,
    ) -> Result<ConversationMemory>;

    /// Folds all but the last `keep` messages into the summary.
    async fn compact(
        &self,
        ctx: &RequestContext,
        user_id: i64,
        session_id: &str,
        keep: usize,
    ) -> Result<Option<ConversationMemory>>;
}

pub(crate) fn ensure_ordered(messages: &[Message]) -> Result<()> {
    if !is_time_ordered(messages) {
        return Err(AssistantError::invalid("messages must be in timestamp order"));
    }
    Ok(())
}

/// Moves incoming messages older than the stored tail (or an earlier incoming
/// message) up to it. Returns how many were moved.
pub(crate) fn clamp_to_tail(existing: Option<&ConversationMemory>, incoming: &mut [Message]) -> usize {
    let mut floor = existing.and_then(|m| m.last_timestamp());
    let mut moved = 0;
    for message in incoming.iter_mut() {
        match floor {
            Some(tail) if message.timestamp < tail => {
                message.timestamp = tail;
                moved += 1;
            }
            _ => floor = Some(message.timestamp),
        }
    }
    moved
}

/// Appends role-prefixed, truncated lines for `dropped` to `existing`.
pub fn fold_summary(existing: Option<&str>, dropped: &[Message]) -> String {
    let mut out = existing.unwrap_or_default().to_string();
    for message in dropped {
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(&format!("{}: {}", message.role, truncate_chars(&message.content, SUMMARY_LINE_CHARS)));
    }

    let total = out.chars().count();
    if total > MAX_SUMMARY_CHARS {
        out = out.chars().skip(total - MAX_SUMMARY_CHARS).collect();
    }
    out
}

fn truncate_chars(s: &str, max: usize) -> String {
    let mut chars = s.chars();
    let head: String = chars.by_ref().take(max).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}

pub(crate) fn compact_in_place(memory: &mut ConversationMemory, keep: usize) -> bool {
    if memory.messages.len() <= keep {
        return false;
    }
    let split = memory.messages.len() - keep;
    let dropped: Vec<Message> = memory.messages.drain(..split).collect();
    memory.summary = Some(fold_summary(memory.summary.as_deref(), &dropped));
    true
}

fn touch(memory: &mut ConversationMemory, now: DateTime<Utc>) {
    if now > memory.last_accessed {
        memory.last_accessed = now;
    }
}

type SessionKey = (i64, String);

#[derive(Debug)]
pub struct InMemoryConversationRepository {
    sessions: RwLock<HashMap<SessionKey, ConversationMemory>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryConversationRepository {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            clock,
        }
    }
}

#[async_trait::async_trait]
impl ConversationMemoryRepository for InMemoryConversationRepository {
    async fn store(
        &self,
        ctx: &RequestContext,
        user_id: i64,
        session_id: &str,
        messages: Vec<Message>,
        summary: Option<String>,
    ) -> Result<ConversationMemory> {
        ctx.ensure_active()?;
        ensure_ordered(&messages)?;
        let memory = ConversationMemory {
            user_id,
            session_id: session_id.to_string(),
            messages,
            summary,
            last_accessed: self.clock.now(),
        };
        self.sessions
            .write()
            .insert((user_id, session_id.to_string()), memory.clone());
        Ok(memory)
    }

    async fn retrieve(
        &self,
        ctx: &RequestContext,
        user_id: i64,
        session_id: &str,
    ) -> Result<Option<ConversationMemory>> {
        ctx.ensure_active()?;
        let now = self.clock.now();
        let mut sessions = self.sessions.write();
        Ok(sessions
            .get_mut(&(user_id, session_id.to_string()))
            .map(|memory| {
                touch(memory, now);
                memory.clone()
            }))
    }

    async fn list_user_sessions(
        &self,
        ctx: &RequestContext,
        user_id: i64,
        limit: usize,
    ) -> Result<Vec<ConversationMemory>> {
        ctx.ensure_active()?;
        let mut hits: Vec<ConversationMemory> = self
            .sessions
            .read()
            .values()
            .filter(|m| m.user_id == user_id)
            .cloned()
            .collect();
        hits.sort_by(|a, b| {
            b.last_accessed
                .cmp(&a.last_accessed)
                .then_with(|| a.session_id.cmp(&b.session_id))
        });
        hits.truncate(limit);
        Ok(hits)
    }

    async fn delete_session(&self, ctx: &RequestContext, user_id: i64, session_id: &str) -> Result<()> {
        ctx.ensure_active()?;
        self.sessions.write().remove(&(user_id, session_id.to_string()));
        Ok(())
    }

    async fn append(
        &self,
        ctx: &RequestContext,
        user_id: i64,
        session_id: &str,
        mut messages: Vec<Message>,
    ) -> Result<ConversationMemory> {
        ctx.ensure_active()?;
        let now = self.clock.now();
        let mut sessions = self.sessions.write();
        let key = (user_id, session_id.to_string());
        let moved = clamp_to_tail(sessions.get(&key), &mut messages);
        if moved > 0 {
            tracing::debug!(user_id, session_id, moved, "late messages moved up to session tail");
        }

        let memory = sessions.entry(key).or_insert_with(|| ConversationMemory {
            user_id,
            session_id: session_id.to_string(),
            messages: Vec::new(),
            summary: None,
            last_accessed: now,
        });
        memory.messages.extend(messages);
        touch(memory, now);
        Ok(memory.clone())
    }

    async fn compact(
        &self,
        ctx: &RequestContext,
        user_id: i64,
        session_id: &str,
        keep: usize,
    ) -> Result<Option<ConversationMemory>> {
        ctx.ensure_active()?;
        let mut sessions = self.sessions.write();
        Ok(sessions
            .get_mut(&(user_id, session_id.to_string()))
            .map(|memory| {
                compact_in_place(memory, keep);
                memory.clone()
            }))
    }
}
