use crate::context::{Clock, RequestContext};
use crate::domain::confirmation::{ConfirmationStatus, TradeConfirmation};
use crate::domain::risk::RiskAssessment;
use crate::domain::trade::{RiskLevel, TradeAction, TradeRecommendation, TradeRequest};
use crate::error::{AssistantError, Result};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

pub const CONFIRMATION_TTL_HOURS: i64 = 24;
/// Trades above this amount always need approval.
pub const LARGE_TRADE_AMOUNT: f64 = 5.0;

#[async_trait::async_trait]
pub trait ConfirmationRepository: Send + Sync {
    async fn store(&self, ctx: &RequestContext, confirmation: &TradeConfirmation) -> Result<()>;

    async fn get(&self, ctx: &RequestContext, id: &str) -> Result<Option<TradeConfirmation>>;

    /// Moves `id` from `expected` to `status`. Fails with StateConflict if the
    /// stored status is no longer `expected`.
    async fn transition(
        &self,
        ctx: &RequestContext,
        id: &str,
        expected: ConfirmationStatus,
        status: ConfirmationStatus,
        confirmed_at: Option<DateTime<Utc>>,
    ) -> Result<TradeConfirmation>;

    /// Pending and not yet expired at `now`, newest first.
    async fn list_pending(&self, ctx: &RequestContext, user_id: i64, now: DateTime<Utc>) -> Result<Vec<TradeConfirmation>>;

    /// Marks every pending confirmation past expiry as expired; returns how many.
    async fn cleanup_expired(&self, ctx: &RequestContext, now: DateTime<Utc>) -> Result<u64>;
}

pub(crate) fn not_pending(status: ConfirmationStatus) -> AssistantError {
    AssistantError::conflict(format!("confirmation is not pending: {status}"))
}

pub(crate) fn not_found(id: &str) -> AssistantError {
    AssistantError::not_found(format!("confirmation not found: {id}"))
}

/// Why a trade needs explicit approval, or `None`.
pub fn requires_confirmation(
    trade: &TradeRequest,
    recommendation: &TradeRecommendation,
    assessment: &RiskAssessment,
) -> Option<&'static str> {
    if recommendation.risk_level == RiskLevel::High {
        return Some("High risk trade requires confirmation");
    }
    if trade.amount > LARGE_TRADE_AMOUNT {
        return Some("Large trade amount requires confirmation");
    }
    if !assessment.risk_factors.is_empty() {
        return Some("Trade with risk factors requires confirmation");
    }
    if trade.action == TradeAction::Sell && assessment.explanation.contains("drawdown") {
        return Some("Selling during drawdown requires confirmation");
    }
    None
}

/// Two-phase approval of high-risk trades.
#[derive(Clone)]
pub struct ConfirmationFlow {
    repo: Arc<dyn ConfirmationRepository>,
    clock: Arc<dyn Clock>,
}

impl ConfirmationFlow {
    pub fn new(repo: Arc<dyn ConfirmationRepository>, clock: Arc<dyn Clock>) -> Self {
        Self { repo, clock }
    }

    pub async fn create_confirmation(
        &self,
        ctx: &RequestContext,
        user_id: i64,
        trade: TradeRequest,
        recommendation: TradeRecommendation,
        assessment: RiskAssessment,
        reason: &str,
    ) -> Result<TradeConfirmation> {
        let now = self.clock.now();
        let confirmation = TradeConfirmation {
            id: uuid::Uuid::new_v4().to_string(),
            user_id,
            trade_request: trade,
            recommendation,
            risk_assessment: assessment,
            status: ConfirmationStatus::Pending,
            confirmation_reason: reason.to_string(),
            created_at: now,
            expires_at: now + chrono::Duration::hours(CONFIRMATION_TTL_HOURS),
            confirmed_at: None,
        };
        self.repo.store(ctx, &confirmation).await?;
        tracing::info!(
            user_id,
            confirmation_id = %confirmation.id,
            reason = %reason,
            "trade confirmation created"
        );
        Ok(confirmation)
    }

    pub async fn get(&self, ctx: &RequestContext, id: &str) -> Result<TradeConfirmation> {
        self.repo.get(ctx, id).await?.ok_or_else(|| not_found(id))
    }

    pub async fn confirm_trade(&self, ctx: &RequestContext, id: &str, approve: bool) -> Result<TradeConfirmation> {
        let confirmation = self.get(ctx, id).await?;
        if confirmation.status != ConfirmationStatus::Pending {
            return Err(not_pending(confirmation.status));
        }

        let now = self.clock.now();
        if now > confirmation.expires_at {
            self.repo
                .transition(ctx, id, ConfirmationStatus::Pending, ConfirmationStatus::Expired, None)
                .await?;
            tracing::info!(confirmation_id = %id, "confirmation expired before decision");
            return Err(AssistantError::conflict("confirmation has expired"));
        }

        let status = if approve {
            ConfirmationStatus::Approved
        } else {
            ConfirmationStatus::Rejected
        };
        let updated = self
            .repo
            .transition(ctx, id, ConfirmationStatus::Pending, status, Some(now))
            .await?;
        tracing::info!(confirmation_id = %id, status = %status, "trade confirmation decided");
        Ok(updated)
    }

    pub async fn list_pending_confirmations(&self, ctx: &RequestContext, user_id: i64) -> Result<Vec<TradeConfirmation>> {
        self.repo.list_pending(ctx, user_id, self.clock.now()).await
    }

    pub async fn cleanup_expired_confirmations(&self, ctx: &RequestContext) -> Result<u64> {
        let expired = self.repo.cleanup_expired(ctx, self.clock.now()).await?;
        if expired > 0 {
            tracing::info!(expired, "expired pending confirmations");
        }
        Ok(expired)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryConfirmationRepository {
    rows: RwLock<HashMap<String, TradeConfirmation>>,
}

impl InMemoryConfirmationRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl ConfirmationRepository for InMemoryConfirmationRepository {
    async fn store(&self, ctx: &RequestContext, confirmation: &TradeConfirmation) -> Result<()> {
        ctx.ensure_active()?;
        self.rows
            .write()
            .insert(confirmation.id.clone(), confirmation.clone());
        Ok(())
    }

    async fn get(&self, ctx: &RequestContext, id: &str) -> Result<Option<TradeConfirmation>> {
        ctx.ensure_active()?;
        Ok(self.rows.read().get(id).cloned())
    }

    async fn transition(
        &self,
        ctx: &RequestContext,
        id: &str,
        expected: ConfirmationStatus,
        status: ConfirmationStatus,
        confirmed_at: Option<DateTime<Utc>>,
    ) -> Result<TradeConfirmation> {
        ctx.ensure_active()?;
        let mut rows = self.rows.write();
        let row = rows.get_mut(id).ok_or_else(|| not_found(id))?;
        if row.status != expected {
            return Err(not_pending(row.status));
        }
        row.status = status;
        if confirmed_at.is_some() {
            row.confirmed_at = confirmed_at;
        }
        Ok(row.clone())
    }

    async fn list_pending(&self, ctx: &RequestContext, user_id: i64, now: DateTime<Utc>) -> Result<Vec<TradeConfirmation>> {
        ctx.ensure_active()?;
        let mut hits: Vec<TradeConfirmation> = self
            .rows
            .read()
            .values()
            .filter(|c| c.user_id == user_id && c.status == ConfirmationStatus::Pending && c.expires_at > now)
            .cloned()
            .collect();
        hits.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(hits)
    }

    async fn cleanup_expired(&self, ctx: &RequestContext, now: DateTime<Utc>) -> Result<u64> {
        ctx.ensure_active()?;
        let mut expired = 0;
        for row in self.rows.write().values_mut() {
            if row.status == ConfirmationStatus::Pending && row.expires_at < now {
                row.status = ConfirmationStatus::Expired;
                expired += 1;
            }
        }
        Ok(expired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ManualClock;
    use crate::domain::trade::RecommendationAction;
    use crate::error::ErrorKind;
    use crate::testing::{recommendation, t0, trade};
    use pretty_assertions::assert_eq;
    use std::collections::BTreeSet;

    fn flow() -> (ConfirmationFlow, Arc<InMemoryConfirmationRepository>, Arc<ManualClock>) {
        let repo = Arc::new(InMemoryConfirmationRepository::new());
        let clock = Arc::new(ManualClock::new(t0()));
        (ConfirmationFlow::new(repo.clone(), clock.clone()), repo, clock)
    }

    async fn pending(flow: &ConfirmationFlow, user_id: i64) -> TradeConfirmation {
        flow.create_confirmation(
            &RequestContext::background(),
            user_id,
            trade("BTC", TradeAction::Buy, 10.0),
            recommendation(RecommendationAction::Buy, RiskLevel::Low, 1.0, 2.0),
            RiskAssessment::clear(),
            "Large trade amount requires confirmation",
        )
        .await
        .unwrap()
    }

    #[test]
    fn large_amount_requires_confirmation() {
        let reason = requires_confirmation(
            &trade("BTC", TradeAction::Sell, 10.0),
            &recommendation(RecommendationAction::Sell, RiskLevel::Low, 1.0, 2.0),
            &RiskAssessment::clear(),
        );
        assert_eq!(reason, Some("Large trade amount requires confirmation"));
    }

    #[test]
    fn confirmation_rules_in_priority_order() {
        let low = recommendation(RecommendationAction::Buy, RiskLevel::Low, 1.0, 2.0);
        let high = recommendation(RecommendationAction::Buy, RiskLevel::High, 1.0, 2.0);
        let small = trade("BTC", TradeAction::Buy, 1.0);
        let flagged = RiskAssessment {
            trade_allowed: true,
            risk_factors: BTreeSet::from(["symbol_exposure".to_string()]),
            explanation: String::new(),
        };
        let drawdown = RiskAssessment {
            explanation: "Account is in a 4.00% drawdown".to_string(),
            ..RiskAssessment::clear()
        };

        assert_eq!(
            requires_confirmation(&trade("BTC", TradeAction::Buy, 50.0), &high, &flagged),
            Some("High risk trade requires confirmation")
        );
        assert_eq!(
            requires_confirmation(&small, &low, &flagged),
            Some("Trade with risk factors requires confirmation")
        );
        assert_eq!(
            requires_confirmation(&trade("BTC", TradeAction::Sell, 1.0), &low, &drawdown),
            Some("Selling during drawdown requires confirmation")
        );
        assert_eq!(requires_confirmation(&small, &low, &drawdown), None);
        assert_eq!(requires_confirmation(&trade("BTC", TradeAction::Buy, 5.0), &low, &RiskAssessment::clear()), None);
    }

    #[tokio::test]
    async fn created_confirmation_expires_after_exactly_a_day() {
        let (flow, _, _) = flow();
        let c = pending(&flow, 1).await;
        assert_eq!(c.status, ConfirmationStatus::Pending);
        assert_eq!(c.created_at, t0());
        assert_eq!(c.expires_at - c.created_at, chrono::Duration::hours(24));
    }

    #[tokio::test]
    async fn approve_then_second_decision_conflicts() {
        let (flow, _, clock) = flow();
        let ctx = RequestContext::background();
        let c = pending(&flow, 1).await;
        clock.advance(chrono::Duration::hours(1));

        let approved = flow.confirm_trade(&ctx, &c.id, true).await.unwrap();
        assert_eq!(approved.status, ConfirmationStatus::Approved);
        assert_eq!(approved.confirmed_at, Some(t0() + chrono::Duration::hours(1)));

        let err = flow.confirm_trade(&ctx, &c.id, false).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StateConflict);
        assert_eq!(err.to_string(), "confirmation is not pending: APPROVED");
    }

    #[tokio::test]
    async fn reject_is_terminal() {
        let (flow, _, _) = flow();
        let ctx = RequestContext::background();
        let c = pending(&flow, 1).await;
        let rejected = flow.confirm_trade(&ctx, &c.id, false).await.unwrap();
        assert_eq!(rejected.status, ConfirmationStatus::Rejected);
        assert!(flow.confirm_trade(&ctx, &c.id, true).await.is_err());
    }

    #[tokio::test]
    async fn late_confirmation_expires_and_persists() {
        let (flow, repo, clock) = flow();
        let ctx = RequestContext::background();
        let c = pending(&flow, 1).await;
        clock.advance(chrono::Duration::hours(25));

        let err = flow.confirm_trade(&ctx, &c.id, true).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StateConflict);
        assert_eq!(err.to_string(), "confirmation has expired");

        let stored = repo.get(&ctx, &c.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ConfirmationStatus::Expired);
        assert_eq!(stored.confirmed_at, None);
    }

    #[tokio::test]
    async fn confirming_exactly_at_expiry_is_still_allowed() {
        let (flow, _, clock) = flow();
        let c = pending(&flow, 1).await;
        clock.advance(chrono::Duration::hours(24));
        let out = flow
            .confirm_trade(&RequestContext::background(), &c.id, true)
            .await
            .unwrap();
        assert_eq!(out.status, ConfirmationStatus::Approved);
    }

    #[tokio::test]
    async fn unknown_confirmation_is_not_found() {
        let (flow, _, _) = flow();
        let err = flow
            .confirm_trade(&RequestContext::background(), "missing", true)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn pending_list_is_newest_first_and_skips_expired() {
        let (flow, _, clock) = flow();
        let ctx = RequestContext::background();
        let oldest = pending(&flow, 1).await;
        clock.advance(chrono::Duration::hours(2));
        let middle = pending(&flow, 1).await;
        clock.advance(chrono::Duration::hours(2));
        let newest = pending(&flow, 1).await;
        pending(&flow, 2).await;

        let ids: Vec<_> = flow
            .list_pending_confirmations(&ctx, 1)
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(ids, vec![newest.id.clone(), middle.id.clone(), oldest.id.clone()]);

        clock.advance(chrono::Duration::hours(21));
        let ids: Vec<_> = flow
            .list_pending_confirmations(&ctx, 1)
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(ids, vec![newest.id, middle.id]);
    }

    #[tokio::test]
    async fn cleanup_expires_stale_rows_once() {
        let (flow, repo, clock) = flow();
        let ctx = RequestContext::background();
        let stale = pending(&flow, 1).await;
        clock.advance(chrono::Duration::hours(23));
        let fresh = pending(&flow, 1).await;
        clock.advance(chrono::Duration::hours(2));

        assert_eq!(flow.cleanup_expired_confirmations(&ctx).await.unwrap(), 1);
        assert_eq!(flow.cleanup_expired_confirmations(&ctx).await.unwrap(), 0);
        assert_eq!(
            repo.get(&ctx, &stale.id).await.unwrap().unwrap().status,
            ConfirmationStatus::Expired
        );
        assert_eq!(
            repo.get(&ctx, &fresh.id).await.unwrap().unwrap().status,
            ConfirmationStatus::Pending
        );
    }
}
