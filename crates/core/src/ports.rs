//! Ports to collaborators outside the assistant core.
//!
//! The model provider lives in [`crate::llm`] and the vector store in
//! [`crate::embeddings::store`]; persistence ports sit next to the component
//! that owns the data.

use crate::context::RequestContext;
use crate::domain::market::{PortfolioSnapshot, Ticker};
use crate::domain::risk::{RiskCheck, RiskStatus};
use crate::domain::trade::{Order, TradeRequest};
use crate::error::Result;

#[async_trait::async_trait]
pub trait PortfolioService: Send + Sync {
    async fn portfolio(&self, ctx: &RequestContext, user_id: i64) -> Result<PortfolioSnapshot>;
}

#[async_trait::async_trait]
pub trait TradeExecutor: Send + Sync {
    /// Submits the order and returns it with any fills. May have side effects
    /// even when the caller is cancelled afterwards.
    async fn execute(&self, ctx: &RequestContext, user_id: i64, request: &TradeRequest) -> Result<Order>;

    async fn cancel(&self, ctx: &RequestContext, order_id: &str) -> Result<Order>;

    async fn status(&self, ctx: &RequestContext, order_id: &str) -> Result<Order>;
}

#[async_trait::async_trait]
pub trait RiskMetrics: Send + Sync {
    async fn check_daily_loss_limit(&self, ctx: &RequestContext, user_id: i64) -> Result<RiskCheck>;

    async fn check_maximum_drawdown(&self, ctx: &RequestContext, user_id: i64) -> Result<RiskCheck>;

    async fn check_exposure_limit(
        &self,
        ctx: &RequestContext,
        user_id: i64,
        symbol: &str,
    ) -> Result<RiskCheck>;

    /// Safe position size for `symbol`, in percent.
    async fn calculate_position_size(
        &self,
        ctx: &RequestContext,
        symbol: &str,
        account_balance: f64,
    ) -> Result<f64>;

    async fn risk_status(&self, ctx: &RequestContext) -> Result<RiskStatus>;
}

#[async_trait::async_trait]
pub trait MarketDataPort: Send + Sync {
    async fn ticker(&self, ctx: &RequestContext, symbol: &str) -> Result<Ticker>;

    /// Most recent `limit` closes, oldest first.
    async fn closes(
        &self,
        ctx: &RequestContext,
        symbol: &str,
        timeframe: &str,
        limit: usize,
    ) -> Result<Vec<f64>>;
}
