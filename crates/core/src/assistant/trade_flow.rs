use super::{actions, AiOrchestrator};
use crate::context::RequestContext;
use crate::domain::audit::{AuditEventType, AuditSeverity};
use crate::domain::confirmation::{ConfirmationStatus, TradeConfirmation};
use crate::domain::risk::GuardrailsResult;
use crate::domain::trade::{Order, TradeRecommendation, TradeRequest};
use crate::error::{AssistantError, Result};
use crate::risk::requires_confirmation;
use serde::Serialize;
use serde_json::json;

/// Decision on a confirmation, plus the submitted order when it was approved
/// and an executor is configured.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfirmationOutcome {
    pub confirmation: TradeConfirmation,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order: Option<Order>,
}

impl AiOrchestrator {
    /// Guardrails sized against the user's current portfolio value.
    pub async fn apply_guardrails(
        &self,
        ctx: &RequestContext,
        user_id: i64,
        recommendation: &TradeRecommendation,
    ) -> Result<GuardrailsResult> {
        let portfolio = self.deps.portfolio.portfolio(ctx, user_id).await?;
        let result = self
            .deps
            .guardrails
            .apply(ctx, user_id, recommendation, portfolio.total_value)
            .await?;

        if !result.modifications.is_empty() {
            self.audit(
                ctx,
                user_id,
                AuditEventType::Trading,
                AuditSeverity::Info,
                actions::GUARDRAILS_APPLIED,
                "Risk guardrails modified a recommendation",
                json!({
                    "original": result.original.recommendation,
                    "modified": result.modified.recommendation,
                    "modifications": result.modifications,
                }),
            )
            .await;
        }
        Ok(result)
    }

    /// Returns `None` when the trade does not need explicit approval.
    pub async fn create_trade_confirmation(
        &self,
        ctx: &RequestContext,
        user_id: i64,
        trade: TradeRequest,
        recommendation: TradeRecommendation,
    ) -> Result<Option<TradeConfirmation>> {
        let assessment = self.deps.assessor.assess(ctx, user_id, &trade).await?;
        let Some(reason) = requires_confirmation(&trade, &recommendation, &assessment) else {
            return Ok(None);
        };

        let confirmation = self
            .deps
            .confirmations
            .create_confirmation(ctx, user_id, trade, recommendation, assessment, reason)
            .await?;
        self.audit(
            ctx,
            user_id,
            AuditEventType::Trading,
            AuditSeverity::Info,
            actions::CONFIRMATION_CREATED,
            "Trade confirmation created",
            json!({
                "confirmation_id": confirmation.id,
                "reason": reason,
                "symbol": confirmation.trade_request.symbol,
            }),
        )
        .await;
        Ok(Some(confirmation))
    }

    /// Records the user's decision. An approved trade is re-checked against
    /// the current risk state before it is submitted.
    pub async fn confirm_trade(
        &self,
        ctx: &RequestContext,
        user_id: i64,
        confirmation_id: &str,
        approve: bool,
    ) -> Result<ConfirmationOutcome> {
        let pending = self.deps.confirmations.get(ctx, confirmation_id).await?;
        if pending.user_id != user_id {
            return Err(AssistantError::not_found(format!(
                "confirmation not found: {confirmation_id}"
            )));
        }

        if approve {
            let assessment = self
                .deps
                .assessor
                .assess(ctx, user_id, &pending.trade_request)
                .await?;
            if !assessment.trade_allowed {
                let confirmation = self
                    .deps
                    .confirmations
                    .confirm_trade(ctx, confirmation_id, false)
                    .await?;
                self.audit(
                    ctx,
                    user_id,
                    AuditEventType::Trading,
                    AuditSeverity::Warning,
                    actions::TRADE_BLOCKED,
                    "Approved trade blocked by risk checks",
                    json!({
                        "confirmation_id": confirmation.id,
                        "status": confirmation.status,
                        "risk_factors": assessment.risk_factors,
                    }),
                )
                .await;
                return Err(AssistantError::RiskBlocked(assessment.explanation));
            }
        }

        let confirmation = self
            .deps
            .confirmations
            .confirm_trade(ctx, confirmation_id, approve)
            .await?;
        if confirmation.status != ConfirmationStatus::Approved {
            self.audit(
                ctx,
                user_id,
                AuditEventType::Trading,
                AuditSeverity::Info,
                actions::TRADE_REJECTED,
                "Trade rejected by user",
                json!({ "confirmation_id": confirmation.id }),
            )
            .await;
            return Ok(ConfirmationOutcome {
                confirmation,
                order: None,
            });
        }

        self.audit(
            ctx,
            user_id,
            AuditEventType::Trading,
            AuditSeverity::Info,
            actions::TRADE_APPROVED,
            "Trade approved by user",
            json!({ "confirmation_id": confirmation.id }),
        )
        .await;

        let Some(executor) = &self.deps.executor else {
            tracing::info!(confirmation_id = %confirmation.id, "no trade executor configured, order not submitted");
            return Ok(ConfirmationOutcome {
                confirmation,
                order: None,
            });
        };
        let order = executor.execute(ctx, user_id, &confirmation.trade_request).await?;
        self.audit(
            ctx,
            user_id,
            AuditEventType::Trading,
            AuditSeverity::Info,
            actions::TRADE_EXECUTED,
            "Confirmed trade submitted",
            json!({
                "confirmation_id": confirmation.id,
                "order_id": order.id,
                "status": order.status,
            }),
        )
        .await;
        Ok(ConfirmationOutcome {
            confirmation,
            order: Some(order),
        })
    }

    pub async fn pending_confirmations(&self, ctx: &RequestContext, user_id: i64) -> Result<Vec<TradeConfirmation>> {
        self.deps.confirmations.list_pending_confirmations(ctx, user_id).await
    }

    pub async fn cleanup_expired_confirmations(&self, ctx: &RequestContext) -> Result<u64> {
        self.deps.confirmations.cleanup_expired_confirmations(ctx).await
    }
}
