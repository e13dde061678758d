//! Built-in prompt templates and their typed data.

use crate::domain::conversation::Message;
use crate::domain::market::{Holding, Ticker};
use crate::error::{AssistantError, Result};
use crate::prompt::registry::{PromptTemplate, TemplateData};
use serde::{Deserialize, Serialize};

pub const CHAT_RESPONSE: &str = "chat_response";
pub const TRADE_RECOMMENDATION: &str = "trade_recommendation";
pub const MARKET_ANALYSIS: &str = "market_analysis";
pub const PORTFOLIO_OPTIMIZATION: &str = "portfolio_optimization";
pub const INSIGHTS: &str = "insights";

/// Version every built-in is registered under.
pub const BUILTIN_VERSION: &str = "1.0";

const CHAT_RESPONSE_BODY: &str = r#"You are an AI trading assistant for a cryptocurrency bot.
Follow these guidelines:
- Be accurate and concise; say so when you are unsure.
- Never promise returns or encourage market manipulation.
- Never reveal credentials, keys or personal data.
{% if summary %}
CONVERSATION SUMMARY:
{{ summary }}
{% endif %}{% if history %}
RECENT CONVERSATION:
{% for m in history %}{{ m.role }}: {{ m.content }}
{% endfor %}{% endif %}{% if related %}
RELATED EARLIER MESSAGES:
{% for r in related %}- {{ r }}
{% endfor %}{% endif %}
USER QUERY:
{{ user_query }}

Please provide a helpful response based on the user query."#;

const TRADE_RECOMMENDATION_BODY: &str = r#"You are an AI trading assistant producing a single trade recommendation.

PORTFOLIO CONTEXT:
{{ portfolio_context }}

RISK PROFILE:
{{ risk_profile }}

MARKET CONDITIONS:
{{ market_conditions }}

TARGET ASSET: {{ target_asset }}
{% if user_query %}
USER QUERY:
{{ user_query }}
{% endif %}
Respond with ONLY a JSON object, no markdown, with exactly these keys:
{
  "recommendation": "BUY|SELL|HOLD",
  "confidence": 0.0,
  "reasoning": "mention {{ target_asset }} explicitly",
  "risk_level": "LOW|MEDIUM|HIGH",
  "suggested_position_size": 0.0,
  "suggested_stop_loss": 0.0,
  "technical_indicators": {}
}
confidence is in [0, 1]; suggested_position_size and suggested_stop_loss are percentages."#;

const MARKET_ANALYSIS_BODY: &str = r#"You are an AI market analyst for cryptocurrency markets.

TIME FRAME: {{ time_frame }}

MARKET DATA:
{% for t in market_data %}- {{ t.symbol }}: price {{ t.price }}, change {{ t.change }}%, volume {{ t.volume }}
{% endfor %}{% if historical_trends %}
HISTORICAL TRENDS:
{% for trend in historical_trends %}- {{ trend }}
{% endfor %}{% endif %}{% if user_query %}
USER QUERY:
{{ user_query }}
{% endif %}
Summarise the market structure, notable movers and key levels for the time frame."#;

const PORTFOLIO_OPTIMIZATION_BODY: &str = r#"You are an AI portfolio advisor for cryptocurrency holdings.

RISK PROFILE: {{ risk_profile }}

CURRENT PORTFOLIO:
{% for h in current_portfolio %}- {{ h.symbol }}: quantity {{ h.quantity }}, value {{ h.value }}
{% endfor %}{% if market_outlook %}
MARKET OUTLOOK:
{{ market_outlook }}
{% endif %}{% if user_goals %}
USER GOALS:
{% for g in user_goals %}- {{ g }}
{% endfor %}{% endif %}{% if user_query %}
USER QUERY:
{{ user_query }}
{% endif %}
Suggest a target allocation and the rebalancing steps to reach it."#;

const INSIGHTS_BODY: &str = r#"You are an AI trading assistant for a cryptocurrency bot.

PORTFOLIO DATA:
{{ portfolio_json }}

TRADE HISTORY:
{{ trade_history_json }}

TASK:
Generate {{ count }} insights based on the portfolio and trade history data. Focus on the following insight types: {{ insight_types | join(sep=", ") }}.

For each insight, provide a concise title, a detailed description, the type (one of: portfolio, market, opportunity), the importance (high, medium, low), relevant metrics with values and percentage changes, and a specific recommendation when appropriate.

Format your response as a JSON array with this structure and no other keys:
[
  {
    "title": "Insight title",
    "description": "Detailed description",
    "type": "portfolio|market|opportunity",
    "importance": "high|medium|low",
    "metrics": [{"name": "Metric name", "value": "Metric value", "change": 10.5}],
    "recommendation": "Specific recommendation"
  }
]"#;

pub fn builtin_templates() -> Result<Vec<PromptTemplate>> {
    Ok(vec![
        PromptTemplate::new(CHAT_RESPONSE, BUILTIN_VERSION, "General chat reply with guidelines", CHAT_RESPONSE_BODY)?,
        PromptTemplate::new(
            TRADE_RECOMMENDATION,
            BUILTIN_VERSION,
            "Structured BUY/SELL/HOLD recommendation",
            TRADE_RECOMMENDATION_BODY,
        )?,
        PromptTemplate::new(MARKET_ANALYSIS, BUILTIN_VERSION, "Market overview for a time frame", MARKET_ANALYSIS_BODY)?,
        PromptTemplate::new(
            PORTFOLIO_OPTIMIZATION,
            BUILTIN_VERSION,
            "Allocation and rebalancing advice",
            PORTFOLIO_OPTIMIZATION_BODY,
        )?,
        PromptTemplate::new(INSIGHTS, BUILTIN_VERSION, "Portfolio and market insights as JSON", INSIGHTS_BODY)?,
    ])
}

fn require(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(AssistantError::invalid(format!("{field} is required")));
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize)]
pub struct HistoryLine {
    pub role: String,
    pub content: String,
}

impl From<&Message> for HistoryLine {
    fn from(m: &Message) -> Self {
        Self {
            role: m.role.to_string(),
            content: m.content.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ChatData {
    pub user_query: String,
    pub summary: Option<String>,
    pub history: Vec<HistoryLine>,
    pub related: Vec<String>,
}

impl TemplateData for ChatData {
    fn validate(&self) -> Result<()> {
        require("user_query", &self.user_query)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TradeRecommendationData {
    pub portfolio_context: String,
    pub risk_profile: String,
    pub market_conditions: String,
    pub target_asset: String,
    pub user_query: String,
}

impl TemplateData for TradeRecommendationData {
    fn validate(&self) -> Result<()> {
        require("target_asset", &self.target_asset)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketAnalysisData {
    pub market_data: Vec<Ticker>,
    pub time_frame: String,
    pub historical_trends: Vec<String>,
    pub user_query: String,
}

impl TemplateData for MarketAnalysisData {
    fn validate(&self) -> Result<()> {
        if self.market_data.is_empty() {
            return Err(AssistantError::invalid("market_data must not be empty"));
        }
        require("time_frame", &self.time_frame)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PortfolioOptimizationData {
    pub current_portfolio: Vec<Holding>,
    pub risk_profile: String,
    pub market_outlook: String,
    pub user_goals: Vec<String>,
    pub user_query: String,
}

impl TemplateData for PortfolioOptimizationData {
    fn validate(&self) -> Result<()> {
        if self.current_portfolio.is_empty() {
            return Err(AssistantError::invalid("current_portfolio must not be empty"));
        }
        require("risk_profile", &self.risk_profile)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct InsightsData {
    pub portfolio_json: String,
    pub trade_history_json: String,
    pub insight_types: Vec<String>,
    pub count: usize,
}

impl TemplateData for InsightsData {
    fn validate(&self) -> Result<()> {
        if self.insight_types.is_empty() {
            return Err(AssistantError::invalid("at least one insight type is required"));
        }
        Ok(())
    }
}
