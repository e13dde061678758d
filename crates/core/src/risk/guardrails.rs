use crate::context::{Clock, RequestContext};
use crate::domain::risk::{GuardrailsResult, RiskStatus};
use crate::domain::trade::{RecommendationAction, RiskLevel, TradeRecommendation};
use crate::error::Result;
use crate::ports::RiskMetrics;
use std::sync::Arc;

/// Symbols recognised in recommendation reasoning, in match priority order.
pub const KNOWN_SYMBOLS: [&str; 10] = ["BTC", "ETH", "SOL", "XRP", "ADA", "DOT", "DOGE", "SHIB", "AVAX", "MATIC"];
pub const DEFAULT_SYMBOL: &str = "BTC";
pub const DEFAULT_STOP_LOSS_PCT: f64 = 2.0;
pub const HIGH_RISK_DRAWDOWN_PCT: f64 = 10.0;

/// First known symbol mentioned in `reasoning` (case-sensitive), else BTC.
pub fn extract_symbol(reasoning: &str) -> &'static str {
    KNOWN_SYMBOLS
        .iter()
        .copied()
        .find(|symbol| reasoning.contains(symbol))
        .unwrap_or(DEFAULT_SYMBOL)
}

/// Rewrites model recommendations so they respect the account's risk state.
#[derive(Clone)]
pub struct RiskGuardrails {
    risk: Arc<dyn RiskMetrics>,
    clock: Arc<dyn Clock>,
}

impl RiskGuardrails {
    pub fn new(risk: Arc<dyn RiskMetrics>, clock: Arc<dyn Clock>) -> Self {
        Self { risk, clock }
    }

    pub async fn apply(
        &self,
        ctx: &RequestContext,
        user_id: i64,
        recommendation: &TradeRecommendation,
        account_balance: f64,
    ) -> Result<GuardrailsResult> {
        let status = self.risk.risk_status(ctx).await?;
        let mut modified = recommendation.clone();
        let mut modifications = Vec::new();

        if !status.trading_enabled {
            let reason = status
                .disabled_reason
                .clone()
                .unwrap_or_else(|| "risk limits reached".to_string());
            if modified.recommendation != RecommendationAction::Hold {
                modified.recommendation = RecommendationAction::Hold;
                modifications.push(format!(
                    "Changed recommendation to HOLD due to disabled trading: {reason}"
                ));
            } else {
                modifications.push(format!("Noted disabled trading in reasoning: {reason}"));
            }
            modified.reasoning = format!(
                "Trading disabled due to risk controls: {reason}. Original reasoning: {}",
                recommendation.reasoning
            );
            tracing::info!(user_id, reason = %reason, "trading disabled, recommendation forced to HOLD");
            return Ok(self.finish(recommendation, modified, modifications, status));
        }

        if modified.recommendation != RecommendationAction::Hold {
            let symbol = extract_symbol(&modified.reasoning);
            let safe_size = self
                .risk
                .calculate_position_size(ctx, symbol, account_balance)
                .await?;
            if modified.suggested_position_size > safe_size {
                modifications.push(format!(
                    "Reduced position size from {:.2}% to {:.2}% based on risk parameters",
                    modified.suggested_position_size, safe_size
                ));
                modified.suggested_position_size = safe_size;
            }

            if modified.risk_level == RiskLevel::High && status.current_drawdown > HIGH_RISK_DRAWDOWN_PCT {
                let previous = modified.recommendation;
                modified.recommendation = RecommendationAction::Hold;
                modified.reasoning = format!(
                    "High risk trade not recommended during significant drawdown ({:.2}%). Original reasoning: {}",
                    status.current_drawdown, modified.reasoning
                );
                modifications.push(format!(
                    "Changed recommendation from {previous} to HOLD due to high risk during {:.2}% drawdown",
                    status.current_drawdown
                ));
            }

            if modified.suggested_stop_loss == 0.0 && modified.recommendation != RecommendationAction::Hold {
                modified.suggested_stop_loss = DEFAULT_STOP_LOSS_PCT;
                modifications.push("Added default 2% stop loss as none was specified".to_string());
            }
        }

        if !modifications.is_empty() {
            tracing::debug!(user_id, count = modifications.len(), "guardrails modified recommendation");
        }
        Ok(self.finish(recommendation, modified, modifications, status))
    }

    fn finish(
        &self,
        original: &TradeRecommendation,
        modified: TradeRecommendation,
        modifications: Vec<String>,
        risk_status: RiskStatus,
    ) -> GuardrailsResult {
        GuardrailsResult {
            original: original.clone(),
            modified,
            modifications,
            risk_status,
            timestamp: self.clock.now(),
        }
    }
}
