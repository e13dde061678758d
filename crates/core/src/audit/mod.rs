//! Append-only audit log of user-visible assistant actions.

use crate::context::{Clock, RequestContext};
use crate::domain::audit::{AuditEvent, AuditEventType, AuditSeverity};
use crate::error::{AssistantError, Result};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::sync::Arc;

pub const DEFAULT_PAGE_SIZE: usize = 50;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuditFilter {
    pub user_id: Option<i64>,
    pub event_type: Option<AuditEventType>,
    pub severity: Option<AuditSeverity>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub request_id: Option<String>,
    /// Zero means [`DEFAULT_PAGE_SIZE`].
    pub limit: usize,
    pub offset: usize,
}

impl AuditFilter {
    pub fn page_size(&self) -> usize {
        if self.limit == 0 {
            DEFAULT_PAGE_SIZE
        } else {
            self.limit
        }
    }

    pub fn matches(&self, event: &AuditEvent) -> bool {
        if self.user_id.is_some() && event.user_id != self.user_id {
            return false;
        }
        if self.event_type.is_some_and(|t| t != event.event_type) {
            return false;
        }
        if self.severity.is_some_and(|s| s != event.severity) {
            return false;
        }
        if let Some(request_id) = &self.request_id {
            if &event.request_id != request_id {
                return false;
            }
        }
        match event.created_at {
            Some(at) => {
                !(self.start.is_some_and(|s| at < s) || self.end.is_some_and(|e| at > e))
            }
            None => self.start.is_none() && self.end.is_none(),
        }
    }
}

#[async_trait::async_trait]
pub trait AuditRepository: Send + Sync {
    /// Persists the event and returns it with its assigned id.
    async fn insert(&self, ctx: &RequestContext, event: AuditEvent) -> Result<AuditEvent>;

    /// Newest first.
    async fn find(&self, ctx: &RequestContext, filter: &AuditFilter) -> Result<Vec<AuditEvent>>;

    async fn get(&self, ctx: &RequestContext, id: i64) -> Result<Option<AuditEvent>>;

    /// Oldest first, so a request's trail reads in order.
    async fn find_by_request(&self, ctx: &RequestContext, request_id: &str) -> Result<Vec<AuditEvent>>;
}

#[derive(Clone)]
pub struct AuditService {
    repo: Arc<dyn AuditRepository>,
    clock: Arc<dyn Clock>,
}

impl AuditService {
    pub fn new(repo: Arc<dyn AuditRepository>, clock: Arc<dyn Clock>) -> Self {
        Self { repo, clock }
    }

    /// Fills correlation fields from `ctx`, stamps `created_at` if unset, persists.
    pub async fn log_event(&self, ctx: &RequestContext, mut event: AuditEvent) -> Result<AuditEvent> {
        if event.user_id.is_none() {
            event.user_id = ctx.user_id;
        }
        if event.ip.is_empty() {
            event.ip = ctx.ip.clone();
        }
        if event.user_agent.is_empty() {
            event.user_agent = ctx.user_agent.clone();
        }
        if event.request_id.is_empty() {
            event.request_id = ctx.request_id.clone();
        }
        if event.created_at.is_none() {
            event.created_at = Some(self.clock.now());
        }

        tracing::info!(
            user_id = ?event.user_id,
            event_type = %event.event_type,
            severity = %event.severity,
            action = %event.action,
            request_id = %event.request_id,
            "audit event"
        );

        self.repo.insert(ctx, event).await
    }

    /// Best-effort variant: a failed write is logged, never surfaced.
    pub async fn record(&self, ctx: &RequestContext, event: AuditEvent) {
        let action = event.action.clone();
        if let Err(err) = self.log_event(ctx, event).await {
            tracing::warn!(action = %action, error = %err, "failed to persist audit event");
        }
    }

    pub async fn events(&self, ctx: &RequestContext, filter: &AuditFilter) -> Result<Vec<AuditEvent>> {
        self.repo.find(ctx, filter).await
    }

    pub async fn event(&self, ctx: &RequestContext, id: i64) -> Result<AuditEvent> {
        self.repo
            .get(ctx, id)
            .await?
            .ok_or_else(|| AssistantError::not_found(format!("audit event not found: {id}")))
    }

    pub async fn events_by_request(
        &self,
        ctx: &RequestContext,
        request_id: &str,
    ) -> Result<Vec<AuditEvent>> {
        self.repo.find_by_request(ctx, request_id).await
    }
}

#[derive(Debug, Default)]
pub struct InMemoryAuditRepository {
    events: RwLock<Vec<AuditEvent>>,
}

impl InMemoryAuditRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Vec<AuditEvent> {
        self.events.read().clone()
    }
}

#[async_trait::async_trait]
impl AuditRepository for InMemoryAuditRepository {
    async fn insert(&self, ctx: &RequestContext, mut event: AuditEvent) -> Result<AuditEvent> {
        ctx.ensure_active()?;
        let mut events = self.events.write();
        event.id = Some(events.len() as i64 + 1);
        events.push(event.clone());
        Ok(event)
    }

    async fn find(&self, ctx: &RequestContext, filter: &AuditFilter) -> Result<Vec<AuditEvent>> {
        ctx.ensure_active()?;
        let events = self.events.read();
        let mut hits: Vec<AuditEvent> = events.iter().filter(|e| filter.matches(e)).cloned().collect();
        // Stable sort keeps insertion order among equal timestamps; reverse for newest first.
        hits.sort_by_key(|e| (e.created_at, e.id));
        hits.reverse();
        Ok(hits
            .into_iter()
            .skip(filter.offset)
            .take(filter.page_size())
            .collect())
    }

    async fn get(&self, ctx: &RequestContext, id: i64) -> Result<Option<AuditEvent>> {
        ctx.ensure_active()?;
        Ok(self.events.read().iter().find(|e| e.id == Some(id)).cloned())
    }

    async fn find_by_request(&self, ctx: &RequestContext, request_id: &str) -> Result<Vec<AuditEvent>> {
        ctx.ensure_active()?;
        let mut hits: Vec<AuditEvent> = self
            .events
            .read()
            .iter()
            .filter(|e| e.request_id == request_id)
            .cloned()
            .collect();
        hits.sort_by_key(|e| (e.created_at, e.id));
        Ok(hits)
    }
}
