use crate::context::RequestContext;
use crate::domain::risk::RiskAssessment;
use crate::domain::trade::{TradeAction, TradeRequest};
use crate::error::Result;
use crate::ports::RiskMetrics;
use std::collections::BTreeSet;
use std::sync::Arc;

pub const DAILY_LOSS_LIMIT: &str = "daily_loss_limit";
pub const MAX_DRAWDOWN: &str = "max_drawdown";
pub const SYMBOL_EXPOSURE: &str = "symbol_exposure";

/// Runs the pre-trade checks against the risk-metrics port.
#[derive(Clone)]
pub struct RiskAssessor {
    risk: Arc<dyn RiskMetrics>,
}

impl RiskAssessor {
    pub fn new(risk: Arc<dyn RiskMetrics>) -> Self {
        Self { risk }
    }

    /// Exposure only blocks buys; a sell reduces it.
    pub async fn assess(&self, ctx: &RequestContext, user_id: i64, trade: &TradeRequest) -> Result<RiskAssessment> {
        let daily = self.risk.check_daily_loss_limit(ctx, user_id).await?;
        let drawdown = self.risk.check_maximum_drawdown(ctx, user_id).await?;
        let exposure = self.risk.check_exposure_limit(ctx, user_id, &trade.symbol).await?;

        let mut factors = BTreeSet::new();
        let mut notes = Vec::new();
        let mut allowed = true;

        if !daily.allowed {
            allowed = false;
            factors.insert(DAILY_LOSS_LIMIT.to_string());
            notes.push(format!(
                "Daily loss limit reached ({:.2}% of {:.2}%)",
                daily.current, daily.threshold
            ));
        }

        if !drawdown.allowed {
            allowed = false;
            factors.insert(MAX_DRAWDOWN.to_string());
            notes.push(format!(
                "Maximum drawdown reached ({:.2}% of {:.2}%)",
                drawdown.current, drawdown.threshold
            ));
        } else if drawdown.current > 0.0 {
            notes.push(format!("Account is in a {:.2}% drawdown", drawdown.current));
        }

        if !exposure.allowed {
            if trade.action == TradeAction::Buy {
                allowed = false;
            }
            factors.insert(SYMBOL_EXPOSURE.to_string());
            notes.push(format!(
                "Exposure limit for {} reached ({:.2}% of {:.2}%)",
                trade.symbol, exposure.current, exposure.threshold
            ));
        }

        let explanation = if notes.is_empty() {
            "All risk checks passed".to_string()
        } else {
            notes.join("; ")
        };
        tracing::debug!(
            user_id,
            symbol = %trade.symbol,
            allowed,
            factors = factors.len(),
            "risk assessment"
        );

        Ok(RiskAssessment {
            trade_allowed: allowed,
            risk_factors: factors,
            explanation,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::StaticRiskPolicy;
    use crate::config::RiskPolicySettings;
    use crate::testing::trade;
    use pretty_assertions::assert_eq;

    fn assessor(settings: RiskPolicySettings) -> RiskAssessor {
        RiskAssessor::new(Arc::new(StaticRiskPolicy::new(settings)))
    }

    #[tokio::test]
    async fn clean_account_passes() {
        let a = assessor(RiskPolicySettings::default())
            .assess(&RequestContext::background(), 1, &trade("BTC", TradeAction::Buy, 1.0))
            .await
            .unwrap();
        assert_eq!(a, RiskAssessment {
            trade_allowed: true,
            risk_factors: BTreeSet::new(),
            explanation: "All risk checks passed".to_string(),
        });
    }

    #[tokio::test]
    async fn breached_limits_are_tagged() {
        let a = assessor(RiskPolicySettings {
            daily_loss_pct: 6.0,
            current_drawdown_pct: 25.0,
            ..RiskPolicySettings::default()
        })
        .assess(&RequestContext::background(), 1, &trade("ETH", TradeAction::Sell, 1.0))
        .await
        .unwrap();
        assert!(!a.trade_allowed);
        assert_eq!(
            a.risk_factors.into_iter().collect::<Vec<_>>(),
            vec![DAILY_LOSS_LIMIT.to_string(), MAX_DRAWDOWN.to_string()]
        );
        assert!(a.explanation.contains("drawdown"));
    }

    #[tokio::test]
    async fn shallow_drawdown_is_explained_but_allowed() {
        let a = assessor(RiskPolicySettings {
            current_drawdown_pct: 4.0,
            ..RiskPolicySettings::default()
        })
        .assess(&RequestContext::background(), 1, &trade("BTC", TradeAction::Sell, 1.0))
        .await
        .unwrap();
        assert!(a.trade_allowed);
        assert!(a.risk_factors.is_empty());
        assert_eq!(a.explanation, "Account is in a 4.00% drawdown");
    }
}
