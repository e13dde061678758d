use crate::domain::risk::RiskAssessment;
use crate::domain::trade::{TradeRecommendation, TradeRequest};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConfirmationStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
}

impl ConfirmationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ConfirmationStatus::Pending => "PENDING",
            ConfirmationStatus::Approved => "APPROVED",
            ConfirmationStatus::Rejected => "REJECTED",
            ConfirmationStatus::Expired => "EXPIRED",
        }
    }
}

impl fmt::Display for ConfirmationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConfirmationStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(ConfirmationStatus::Pending),
            "APPROVED" => Ok(ConfirmationStatus::Approved),
            "REJECTED" => Ok(ConfirmationStatus::Rejected),
            "EXPIRED" => Ok(ConfirmationStatus::Expired),
            other => anyhow::bail!("unknown confirmation status: {other}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeConfirmation {
    pub id: String,
    pub user_id: i64,
    pub trade_request: TradeRequest,
    pub recommendation: TradeRecommendation,
    pub risk_assessment: RiskAssessment,
    pub status: ConfirmationStatus,
    pub confirmation_reason: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmed_at: Option<DateTime<Utc>>,
}
