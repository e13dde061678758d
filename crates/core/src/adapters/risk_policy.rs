use crate::config::RiskPolicySettings;
use crate::context::RequestContext;
use crate::domain::risk::{RiskCheck, RiskStatus};
use crate::error::Result;
use crate::ports::RiskMetrics;
use std::collections::HashMap;

/// Risk metrics answered from static settings.
#[derive(Debug, Clone)]
pub struct StaticRiskPolicy {
    settings: RiskPolicySettings,
    exposures: HashMap<String, f64>,
}

impl StaticRiskPolicy {
    pub fn new(settings: RiskPolicySettings) -> Self {
        Self {
            settings,
            exposures: HashMap::new(),
        }
    }

    /// Current exposure to `symbol`, in percent of the account.
    pub fn with_exposure(mut self, symbol: &str, pct: f64) -> Self {
        self.exposures.insert(symbol.to_ascii_uppercase(), pct);
        self
    }

    fn daily_loss(&self) -> RiskCheck {
        RiskCheck {
            allowed: self.settings.daily_loss_pct < self.settings.daily_loss_limit_pct,
            threshold: self.settings.daily_loss_limit_pct,
            current: self.settings.daily_loss_pct,
        }
    }

    fn drawdown(&self) -> RiskCheck {
        RiskCheck {
            allowed: self.settings.current_drawdown_pct < self.settings.max_drawdown_pct,
            threshold: self.settings.max_drawdown_pct,
            current: self.settings.current_drawdown_pct,
        }
    }
}

#[async_trait::async_trait]
impl RiskMetrics for StaticRiskPolicy {
    async fn check_daily_loss_limit(&self, ctx: &RequestContext, _user_id: i64) -> Result<RiskCheck> {
        ctx.ensure_active()?;
        Ok(self.daily_loss())
    }

    async fn check_maximum_drawdown(&self, ctx: &RequestContext, _user_id: i64) -> Result<RiskCheck> {
        ctx.ensure_active()?;
        Ok(self.drawdown())
    }

    async fn check_exposure_limit(&self, ctx: &RequestContext, _user_id: i64, symbol: &str) -> Result<RiskCheck> {
        ctx.ensure_active()?;
        let current = self
            .exposures
            .get(&symbol.to_ascii_uppercase())
            .copied()
            .unwrap_or(0.0);
        Ok(RiskCheck {
            allowed: current < self.settings.max_exposure_pct,
            threshold: self.settings.max_exposure_pct,
            current,
        })
    }

    async fn calculate_position_size(&self, ctx: &RequestContext, _symbol: &str, account_balance: f64) -> Result<f64> {
        ctx.ensure_active()?;
        if account_balance <= 0.0 {
            return Ok(0.0);
        }
        Ok(self.settings.max_position_pct)
    }

    async fn risk_status(&self, ctx: &RequestContext) -> Result<RiskStatus> {
        ctx.ensure_active()?;
        let disabled_reason = if !self.settings.trading_enabled {
            Some(
                self.settings
                    .disabled_reason
                    .clone()
                    .unwrap_or_else(|| "Trading disabled by configuration".to_string()),
            )
        } else if !self.drawdown().allowed {
            Some("Maximum drawdown reached".to_string())
        } else if !self.daily_loss().allowed {
            Some("Daily loss limit reached".to_string())
        } else {
            None
        };

        Ok(RiskStatus {
            trading_enabled: disabled_reason.is_none(),
            disabled_reason,
            current_drawdown: self.settings.current_drawdown_pct,
            total_exposure: self.exposures.values().sum(),
        })
    }
}
