use crate::context::{Clock, RequestContext};
use crate::domain::market::{Holding, PortfolioSnapshot};
use crate::error::Result;
use crate::ports::PortfolioService;
use std::sync::Arc;

/// Same holdings for every user.
#[derive(Debug, Clone)]
pub struct StaticPortfolio {
    holdings: Vec<Holding>,
    cash: f64,
    clock: Arc<dyn Clock>,
}

impl StaticPortfolio {
    /// 100k account: half BTC, 30% ETH, 10% SOL, 10% USDT cash.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let holding = |symbol: &str, quantity: f64, value: f64| Holding {
            symbol: symbol.to_string(),
            quantity,
            value,
        };
        Self {
            holdings: vec![
                holding("BTC", 1.0, 50_000.0),
                holding("ETH", 10.0, 30_000.0),
                holding("SOL", 10_000.0 / 150.0, 10_000.0),
                holding("USDT", 10_000.0, 10_000.0),
            ],
            cash: 10_000.0,
            clock,
        }
    }

    /// `cash` is the part of the holdings held as stablecoin, already counted in them.
    pub fn with_holdings(mut self, holdings: Vec<Holding>, cash: f64) -> Self {
        self.holdings = holdings;
        self.cash = cash;
        self
    }
}

#[async_trait::async_trait]
impl PortfolioService for StaticPortfolio {
    async fn portfolio(&self, ctx: &RequestContext, user_id: i64) -> Result<PortfolioSnapshot> {
        ctx.ensure_active()?;
        Ok(PortfolioSnapshot {
            user_id,
            total_value: self.holdings.iter().map(|h| h.value).sum(),
            cash: self.cash,
            holdings: self.holdings.clone(),
            as_of: self.clock.now(),
        })
    }
}
