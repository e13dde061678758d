//! Closed schemas for structured model replies.

use crate::domain::insight::{Importance, Insight, InsightMetric, InsightType};
use crate::domain::trade::{RecommendationAction, RiskLevel, TradeRecommendation};
use anyhow::{bail, ensure};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LlmTradeRecommendation {
    pub recommendation: String,
    pub confidence: f64,
    pub reasoning: String,
    pub risk_level: String,
    pub suggested_position_size: f64,
    #[serde(default)]
    pub suggested_stop_loss: Option<f64>,
    #[serde(default)]
    pub technical_indicators: BTreeMap<String, Value>,
}

impl LlmTradeRecommendation {
    pub fn validate_and_into_recommendation(self) -> anyhow::Result<TradeRecommendation> {
        let recommendation = match self.recommendation.trim().to_ascii_uppercase().as_str() {
            "BUY" => RecommendationAction::Buy,
            "SELL" => RecommendationAction::Sell,
            "HOLD" => RecommendationAction::Hold,
            other => bail!("recommendation must be BUY, SELL or HOLD (got {other})"),
        };
        let risk_level = match self.risk_level.trim().to_ascii_uppercase().as_str() {
            "LOW" => RiskLevel::Low,
            "MEDIUM" => RiskLevel::Medium,
            "HIGH" => RiskLevel::High,
            other => bail!("risk_level must be LOW, MEDIUM or HIGH (got {other})"),
        };

        ensure!(
            (0.0..=1.0).contains(&self.confidence),
            "confidence must be between 0 and 1 (got {})",
            self.confidence
        );
        ensure!(
            (0.0..=100.0).contains(&self.suggested_position_size),
            "suggested_position_size must be a percentage (got {})",
            self.suggested_position_size
        );

        let suggested_stop_loss = self.suggested_stop_loss.unwrap_or(0.0);
        ensure!(
            suggested_stop_loss >= 0.0,
            "suggested_stop_loss must be non-negative (got {suggested_stop_loss})"
        );

        let reasoning = self.reasoning.trim().to_string();
        ensure!(!reasoning.is_empty(), "reasoning must be non-empty");

        Ok(TradeRecommendation {
            recommendation,
            confidence: self.confidence,
            reasoning,
            risk_level,
            suggested_position_size: self.suggested_position_size,
            suggested_stop_loss,
            technical_indicators: self.technical_indicators,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LlmInsight {
    pub title: String,
    pub description: String,
    #[serde(rename = "type")]
    pub insight_type: String,
    pub importance: String,
    #[serde(default)]
    pub metrics: Vec<LlmInsightMetric>,
    #[serde(default)]
    pub recommendation: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmInsightMetric {
    pub name: String,
    pub value: Value,
    #[serde(default)]
    pub change: Option<f64>,
}

impl LlmInsight {
    /// Validates the reply and stamps it with a fresh id and `timestamp`.
    pub fn validate_and_into_insight(self, timestamp: DateTime<Utc>) -> anyhow::Result<Insight> {
        let title = self.title.trim().to_string();
        ensure!(!title.is_empty(), "insight title must be non-empty");

        let insight_type = match self.insight_type.trim().to_ascii_lowercase().as_str() {
            "portfolio" => InsightType::Portfolio,
            "market" => InsightType::Market,
            "opportunity" => InsightType::Opportunity,
            other => bail!("insight type must be portfolio, market or opportunity (got {other})"),
        };
        let importance = match self.importance.trim().to_ascii_lowercase().as_str() {
            "high" => Importance::High,
            "medium" => Importance::Medium,
            "low" => Importance::Low,
            other => bail!("importance must be high, medium or low (got {other})"),
        };

        let metrics = self
            .metrics
            .into_iter()
            .map(|m| InsightMetric {
                name: m.name,
                value: match m.value {
                    Value::String(s) => s,
                    other => other.to_string(),
                },
                change: m.change,
            })
            .collect();

        Ok(Insight {
            id: uuid::Uuid::new_v4().to_string(),
            title,
            description: self.description.trim().to_string(),
            insight_type,
            importance,
            metrics,
            recommendation: self
                .recommendation
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
            timestamp,
        })
    }
}
