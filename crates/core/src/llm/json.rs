use crate::domain::contract::{LlmInsight, LlmTradeRecommendation};
use crate::domain::insight::Insight;
use crate::domain::trade::TradeRecommendation;
use anyhow::Context;
use chrono::{DateTime, Utc};

pub fn extract_json(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.starts_with("```") {
        // Remove Markdown fences (```json ... ``` or ``` ... ```).
        let mut inner = trimmed;
        if let Some(after_first) = inner.splitn(2, '\n').nth(1) {
            inner = after_first;
        }
        if let Some(end) = inner.rfind("```") {
            inner = &inner[..end];
        }
        return Some(inner.trim().to_string());
    }

    // Best-effort extraction: first opening bracket to its last matching closer.
    let start = trimmed.find(|c: char| c == '{' || c == '[')?;
    let closer = if trimmed[start..].starts_with('{') { '}' } else { ']' };
    let end = trimmed.rfind(closer)?;
    if end <= start {
        return None;
    }
    Some(trimmed[start..=end].trim().to_string())
}

pub fn parse_trade_recommendation(text: &str) -> anyhow::Result<TradeRecommendation> {
    let json_str = extract_json(text).unwrap_or_else(|| text.trim().to_string());
    let parsed = serde_json::from_str::<LlmTradeRecommendation>(&json_str).with_context(|| {
        format!("model output is not valid JSON for trade recommendation schema: {json_str}")
    })?;
    parsed.validate_and_into_recommendation()
}

pub fn parse_insights(text: &str, timestamp: DateTime<Utc>) -> anyhow::Result<Vec<Insight>> {
    let json_str = extract_json(text).unwrap_or_else(|| text.trim().to_string());
    let parsed = serde_json::from_str::<Vec<LlmInsight>>(&json_str)
        .with_context(|| format!("model output is not a valid JSON insight array: {json_str}"))?;
    parsed
        .into_iter()
        .map(|insight| insight.validate_and_into_insight(timestamp))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::trade::{RecommendationAction, RiskLevel};
    use serde_json::json;

    #[test]
    fn extract_json_handles_fenced_blocks() {
        let body = "{\"a\":1}";
        let fenced = format!("```json\n{body}\n```\n");
        assert_eq!(extract_json(&fenced), Some(body.to_string()));
    }

    #[test]
    fn extract_json_falls_back_to_braces() {
        let s = "prefix {\"a\":1} suffix";
        assert_eq!(extract_json(s), Some("{\"a\":1}".to_string()));
    }

    #[test]
    fn extract_json_finds_arrays() {
        let s = "Here you go: [{\"a\":1},{\"b\":2}] hope it helps";
        assert_eq!(
            extract_json(s),
            Some("[{\"a\":1},{\"b\":2}]".to_string())
        );
    }

    #[test]
    fn parse_trade_recommendation_accepts_prose_wrapped_json() {
        let body = json!({
            "recommendation": "BUY",
            "confidence": 0.8,
            "reasoning": "SOL momentum is strong",
            "risk_level": "HIGH",
            "suggested_position_size": 10.0,
            "suggested_stop_loss": 4.0,
            "technical_indicators": {"rsi": 61.2}
        });
        let text = format!("Sure. {body} Let me know.");
        let rec = parse_trade_recommendation(&text).unwrap();
        assert_eq!(rec.recommendation, RecommendationAction::Buy);
        assert_eq!(rec.risk_level, RiskLevel::High);
        assert_eq!(rec.technical_indicators["rsi"], json!(61.2));
    }

    #[test]
    fn parse_trade_recommendation_rejects_garbage() {
        assert!(parse_trade_recommendation("I cannot help with that").is_err());
    }

    #[test]
    fn parse_insights_accepts_array() {
        let body = json!([
            {"title": "A", "description": "d", "type": "market", "importance": "low", "metrics": []},
            {"title": "B", "description": "d", "type": "opportunity", "importance": "medium",
             "metrics": [], "recommendation": "Consider ETH"}
        ])
        .to_string();
        let now = Utc::now();
        let insights = parse_insights(&format!("```json\n{body}\n```"), now).unwrap();
        assert_eq!(insights.len(), 2);
        assert_ne!(insights[0].id, insights[1].id);
        assert!(insights.iter().all(|i| i.timestamp == now));
    }
}
