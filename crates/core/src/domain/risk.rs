use crate::domain::trade::TradeRecommendation;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Outcome of one risk check against a threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskCheck {
    pub allowed: bool,
    pub threshold: f64,
    pub current: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskStatus {
    pub trading_enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disabled_reason: Option<String>,
    /// Percent.
    pub current_drawdown: f64,
    #[serde(default)]
    pub total_exposure: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub trade_allowed: bool,
    pub risk_factors: BTreeSet<String>,
    pub explanation: String,
}

impl RiskAssessment {
    pub fn clear() -> Self {
        Self {
            trade_allowed: true,
            risk_factors: BTreeSet::new(),
            explanation: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardrailsResult {
    pub original: TradeRecommendation,
    pub modified: TradeRecommendation,
    pub modifications: Vec<String>,
    pub risk_status: RiskStatus,
    pub timestamp: DateTime<Utc>,
}
