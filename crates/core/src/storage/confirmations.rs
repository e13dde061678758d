use crate::context::RequestContext;
use crate::domain::confirmation::{ConfirmationStatus, TradeConfirmation};
use crate::domain::risk::RiskAssessment;
use crate::domain::trade::{TradeRecommendation, TradeRequest};
use crate::error::{AssistantError, Result, ResultExt};
use crate::risk::confirmation::{not_found, not_pending};
use crate::risk::ConfirmationRepository;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::PgPool;

#[derive(sqlx::FromRow)]
struct ConfirmationRow {
    id: String,
    user_id: i64,
    trade_request: Json<TradeRequest>,
    recommendation: Json<TradeRecommendation>,
    risk_assessment: Json<RiskAssessment>,
    status: String,
    confirmation_reason: String,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    confirmed_at: Option<DateTime<Utc>>,
}

impl TryFrom<ConfirmationRow> for TradeConfirmation {
    type Error = AssistantError;

    fn try_from(row: ConfirmationRow) -> Result<Self> {
        Ok(Self {
            status: row.status.parse().external("decode trade_confirmations.status failed")?,
            id: row.id,
            user_id: row.user_id,
            trade_request: row.trade_request.0,
            recommendation: row.recommendation.0,
            risk_assessment: row.risk_assessment.0,
            confirmation_reason: row.confirmation_reason,
            created_at: row.created_at,
            expires_at: row.expires_at,
            confirmed_at: row.confirmed_at,
        })
    }
}

fn decode_all(rows: Vec<ConfirmationRow>) -> Result<Vec<TradeConfirmation>> {
    rows.into_iter().map(TryInto::try_into).collect()
}

const COLUMNS: &str = "id, user_id, trade_request, recommendation, risk_assessment, status, \
                       confirmation_reason, created_at, expires_at, confirmed_at";

/// Sub-objects are stored as JSONB next to the queryable columns.
#[derive(Clone)]
pub struct PgConfirmationRepository {
    pool: PgPool,
}

impl PgConfirmationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ConfirmationRepository for PgConfirmationRepository {
    async fn store(&self, ctx: &RequestContext, c: &TradeConfirmation) -> Result<()> {
        ctx.run(async {
            sqlx::query(&format!(
                "INSERT INTO trade_confirmations ({COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)"
            ))
            .bind(&c.id)
            .bind(c.user_id)
            .bind(Json(&c.trade_request))
            .bind(Json(&c.recommendation))
            .bind(Json(&c.risk_assessment))
            .bind(c.status.as_str())
            .bind(&c.confirmation_reason)
            .bind(c.created_at)
            .bind(c.expires_at)
            .bind(c.confirmed_at)
            .execute(&self.pool)
            .await
            .external("insert trade_confirmations failed")?;
            Ok(())
        })
        .await
    }

    async fn get(&self, ctx: &RequestContext, id: &str) -> Result<Option<TradeConfirmation>> {
        ctx.run(async {
            let row: Option<ConfirmationRow> =
                sqlx::query_as(&format!("SELECT {COLUMNS} FROM trade_confirmations WHERE id = $1"))
                    .bind(id)
                    .fetch_optional(&self.pool)
                    .await
                    .external("select trade_confirmations failed")?;
            row.map(TryInto::try_into).transpose()
        })
        .await
    }

    async fn transition(
        &self,
        ctx: &RequestContext,
        id: &str,
        expected: ConfirmationStatus,
        status: ConfirmationStatus,
        confirmed_at: Option<DateTime<Utc>>,
    ) -> Result<TradeConfirmation> {
        ctx.run(async {
            let row: Option<ConfirmationRow> = sqlx::query_as(&format!(
                "UPDATE trade_confirmations SET status = $3, confirmed_at = COALESCE($4, confirmed_at) \
                 WHERE id = $1 AND status = $2 RETURNING {COLUMNS}"
            ))
            .bind(id)
            .bind(expected.as_str())
            .bind(status.as_str())
            .bind(confirmed_at)
            .fetch_optional(&self.pool)
            .await
            .external("update trade_confirmations failed")?;

            if let Some(row) = row {
                return row.try_into();
            }
            // Lost the compare-and-set; report what is there now.
            match self.get(ctx, id).await? {
                Some(current) => Err(not_pending(current.status)),
                None => Err(not_found(id)),
            }
        })
        .await
    }

    async fn list_pending(
        &self,
        ctx: &RequestContext,
        user_id: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<TradeConfirmation>> {
        ctx.run(async {
            let rows: Vec<ConfirmationRow> = sqlx::query_as(&format!(
                "SELECT {COLUMNS} FROM trade_confirmations \
                 WHERE user_id = $1 AND status = 'PENDING' AND expires_at > $2 \
                 ORDER BY created_at DESC, id ASC"
            ))
            .bind(user_id)
            .bind(now)
            .fetch_all(&self.pool)
            .await
            .external("list pending trade_confirmations failed")?;
            decode_all(rows)
        })
        .await
    }

    async fn cleanup_expired(&self, ctx: &RequestContext, now: DateTime<Utc>) -> Result<u64> {
        ctx.run(async {
            let res = sqlx::query(
                "UPDATE trade_confirmations SET status = 'EXPIRED' WHERE status = 'PENDING' AND expires_at < $1",
            )
            .bind(now)
            .execute(&self.pool)
            .await
            .external("expire trade_confirmations failed")?;
            Ok(res.rows_affected())
        })
        .await
    }
}
