//! Fakes and fixtures shared by unit tests.

use crate::adapters::{StaticMarketData, StaticPortfolio, StaticRiskPolicy};
use crate::config::RiskPolicySettings;
use crate::context::{ManualClock, RequestContext};
use crate::domain::trade::{
    PriceType, RecommendationAction, RiskLevel, TradeAction, TradeRecommendation, TradeRequest,
};
use crate::embeddings::{prepare_input, EmbeddingService};
use crate::error::{AssistantError, Result};
use crate::functions::trading::TradingPorts;
use crate::llm::{ModelProvider, Provider};
use anyhow::anyhow;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
}

pub fn recommendation(
    action: RecommendationAction,
    risk_level: RiskLevel,
    position_size: f64,
    stop_loss: f64,
) -> TradeRecommendation {
    TradeRecommendation {
        recommendation: action,
        confidence: 0.9,
        reasoning: "Momentum on BTC is improving".to_string(),
        risk_level,
        suggested_position_size: position_size,
        suggested_stop_loss: stop_loss,
        technical_indicators: BTreeMap::new(),
    }
}

pub fn trade(symbol: &str, action: TradeAction, amount: f64) -> TradeRequest {
    TradeRequest {
        symbol: symbol.to_string(),
        action,
        amount,
        price_type: PriceType::Market,
        limit_price: None,
        stop_loss: None,
        take_profit: None,
    }
}

pub fn trading_ports() -> TradingPorts {
    let clock = Arc::new(ManualClock::new(t0()));
    TradingPorts {
        market: Arc::new(StaticMarketData::new(clock.clone())),
        portfolio: Arc::new(StaticPortfolio::new(clock.clone())),
        risk: Arc::new(StaticRiskPolicy::new(RiskPolicySettings::default())),
        clock,
    }
}

/// One axis per keyword plus a catch-all axis, normalised.
fn keyword_vector(keywords: &[String], text: &str) -> Vec<f32> {
    let lower = text.to_lowercase();
    let mut v: Vec<f32> = keywords
        .iter()
        .map(|k| lower.matches(k.as_str()).count() as f32)
        .collect();
    let hit = v.iter().any(|x| *x > 0.0);
    v.push(if hit { 0.0 } else { 1.0 });
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    v.iter().map(|x| x / norm).collect()
}

pub struct KeywordEmbedder {
    keywords: Vec<String>,
}

impl KeywordEmbedder {
    pub fn new(keywords: &[&str]) -> Self {
        Self {
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
        }
    }
}

#[async_trait::async_trait]
impl EmbeddingService for KeywordEmbedder {
    fn name(&self) -> &str {
        "keyword"
    }

    async fn generate_embedding(&self, ctx: &RequestContext, text: &str) -> Result<Vec<f32>> {
        ctx.ensure_active()?;
        Ok(keyword_vector(&self.keywords, prepare_input(text)?))
    }

    async fn generate_batch_embeddings(&self, ctx: &RequestContext, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.generate_embedding(ctx, text).await?);
        }
        Ok(out)
    }
}

/// Returns a fixed vector or always fails with an external error.
pub struct StubEmbedder {
    name: String,
    vector: Option<Vec<f32>>,
    calls: AtomicUsize,
}

impl StubEmbedder {
    pub fn ok(name: &str, vector: Vec<f32>) -> Self {
        Self {
            name: name.to_string(),
            vector: Some(vector),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(name: &str) -> Self {
        Self {
            name: name.to_string(),
            vector: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl EmbeddingService for StubEmbedder {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate_embedding(&self, _ctx: &RequestContext, text: &str) -> Result<Vec<f32>> {
        prepare_input(text)?;
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.vector
            .clone()
            .ok_or_else(|| AssistantError::External(anyhow!("{} unavailable", self.name)))
    }

    async fn generate_batch_embeddings(&self, ctx: &RequestContext, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.generate_embedding(ctx, text).await?);
        }
        Ok(out)
    }
}

/// Model that replays queued replies (then `"OK"`) and embeds by keyword.
pub struct ScriptedModel {
    replies: Mutex<VecDeque<Result<String>>>,
    prompts: Mutex<Vec<String>>,
    keywords: Vec<String>,
    embed_calls: AtomicUsize,
}

impl ScriptedModel {
    pub fn new(replies: Vec<String>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().map(Ok).collect()),
            prompts: Mutex::new(Vec::new()),
            keywords: ["cat", "dog", "btc", "eth"].iter().map(|k| k.to_string()).collect(),
            embed_calls: AtomicUsize::new(0),
        }
    }

    pub fn replying(replies: &[&str]) -> Self {
        Self::new(replies.iter().map(|r| r.to_string()).collect())
    }

    pub fn push_error(&self, message: &str) {
        self.replies
            .lock()
            .push_back(Err(AssistantError::External(anyhow!(message.to_string()))));
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }

    pub fn embed_calls(&self) -> usize {
        self.embed_calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl ModelProvider for ScriptedModel {
    fn provider(&self) -> Provider {
        Provider::Gemini
    }

    async fn generate_content(&self, ctx: &RequestContext, prompt: &str) -> Result<String> {
        ctx.ensure_active()?;
        self.prompts.lock().push(prompt.to_string());
        self.replies
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok("OK".to_string()))
    }

    async fn embed_content(&self, ctx: &RequestContext, text: &str) -> Result<Vec<f32>> {
        ctx.ensure_active()?;
        self.embed_calls.fetch_add(1, Ordering::SeqCst);
        Ok(keyword_vector(&self.keywords, text))
    }
}
