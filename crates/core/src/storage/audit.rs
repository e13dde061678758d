use crate::audit::{AuditFilter, AuditRepository};
use crate::context::RequestContext;
use crate::domain::audit::AuditEvent;
use crate::error::{AssistantError, Result, ResultExt};
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{PgPool, Postgres, QueryBuilder};

#[derive(sqlx::FromRow)]
struct AuditRow {
    id: i64,
    user_id: Option<i64>,
    #[sqlx(rename = "type")]
    event_type: String,
    severity: String,
    action: String,
    description: String,
    metadata: Value,
    ip: String,
    user_agent: String,
    request_id: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<AuditRow> for AuditEvent {
    type Error = AssistantError;

    fn try_from(row: AuditRow) -> Result<Self> {
        Ok(Self {
            id: Some(row.id),
            user_id: row.user_id,
            event_type: row.event_type.parse().external("decode audit_events.type failed")?,
            severity: row.severity.parse().external("decode audit_events.severity failed")?,
            action: row.action,
            description: row.description,
            metadata: row.metadata,
            ip: row.ip,
            user_agent: row.user_agent,
            request_id: row.request_id,
            created_at: Some(row.created_at),
        })
    }
}

const COLUMNS: &str =
    "id, user_id, type, severity, action, description, metadata, ip, user_agent, request_id, created_at";

fn to_i64(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

/// Append-only; rows are never updated.
#[derive(Clone)]
pub struct PgAuditRepository {
    pool: PgPool,
}

impl PgAuditRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl AuditRepository for PgAuditRepository {
    async fn insert(&self, ctx: &RequestContext, mut event: AuditEvent) -> Result<AuditEvent> {
        let created_at = event
            .created_at
            .ok_or_else(|| AssistantError::invalid("audit event has no created_at"))?;
        ctx.run(async {
            let id: i64 = sqlx::query_scalar(
                "INSERT INTO audit_events (user_id, type, severity, action, description, metadata, ip, user_agent, request_id, created_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
                 RETURNING id",
            )
            .bind(event.user_id)
            .bind(event.event_type.as_str())
            .bind(event.severity.as_str())
            .bind(&event.action)
            .bind(&event.description)
            .bind(&event.metadata)
            .bind(&event.ip)
            .bind(&event.user_agent)
            .bind(&event.request_id)
            .bind(created_at)
            .fetch_one(&self.pool)
            .await
            .external("insert audit_events failed")?;
            event.id = Some(id);
            Ok(event)
        })
        .await
    }

    async fn find(&self, ctx: &RequestContext, filter: &AuditFilter) -> Result<Vec<AuditEvent>> {
        let mut qb: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("SELECT {COLUMNS} FROM audit_events WHERE TRUE"));
        if let Some(user_id) = filter.user_id {
            qb.push(" AND user_id = ").push_bind(user_id);
        }
        if let Some(event_type) = filter.event_type {
            qb.push(" AND type = ").push_bind(event_type.as_str());
        }
        if let Some(severity) = filter.severity {
            qb.push(" AND severity = ").push_bind(severity.as_str());
        }
        if let Some(start) = filter.start {
            qb.push(" AND created_at >= ").push_bind(start);
        }
        if let Some(end) = filter.end {
            qb.push(" AND created_at <= ").push_bind(end);
        }
        if let Some(request_id) = &filter.request_id {
            qb.push(" AND request_id = ").push_bind(request_id.clone());
        }
        qb.push(" ORDER BY created_at DESC, id DESC LIMIT ")
            .push_bind(to_i64(filter.page_size()))
            .push(" OFFSET ")
            .push_bind(to_i64(filter.offset));

        ctx.run(async {
            let rows: Vec<AuditRow> = qb
                .build_query_as()
                .persistent(false)
                .fetch_all(&self.pool)
                .await
                .external("select audit_events failed")?;
            rows.into_iter().map(TryInto::try_into).collect()
        })
        .await
    }

    async fn get(&self, ctx: &RequestContext, id: i64) -> Result<Option<AuditEvent>> {
        ctx.run(async {
            let row: Option<AuditRow> =
                sqlx::query_as(&format!("SELECT {COLUMNS} FROM audit_events WHERE id = $1"))
                    .bind(id)
                    .fetch_optional(&self.pool)
                    .await
                    .external("select audit_events failed")?;
            row.map(TryInto::try_into).transpose()
        })
        .await
    }

    async fn find_by_request(&self, ctx: &RequestContext, request_id: &str) -> Result<Vec<AuditEvent>> {
        ctx.run(async {
            let rows: Vec<AuditRow> = sqlx::query_as(&format!(
                "SELECT {COLUMNS} FROM audit_events WHERE request_id = $1 ORDER BY created_at ASC, id ASC"
            ))
            .bind(request_id)
            .fetch_all(&self.pool)
            .await
            .external("select audit_events failed")?;
            rows.into_iter().map(TryInto::try_into).collect()
        })
        .await
    }
}
