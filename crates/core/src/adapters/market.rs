use crate::context::{Clock, RequestContext};
use crate::domain::market::Ticker;
use crate::error::{AssistantError, Result};
use crate::ports::MarketDataPort;
use std::sync::Arc;

/// Deterministic synthetic prices; the same symbol always yields the same series.
#[derive(Debug, Clone)]
pub struct StaticMarketData {
    clock: Arc<dyn Clock>,
}

fn base_price(symbol: &str) -> f64 {
    match symbol {
        "BTC" => 50_000.0,
        "ETH" => 3_000.0,
        "SOL" => 150.0,
        "XRP" => 0.6,
        "ADA" => 0.45,
        "DOT" => 7.0,
        "DOGE" => 0.12,
        "AVAX" => 35.0,
        "MATIC" => 0.8,
        "USDT" => 1.0,
        other => 10.0 + other.bytes().map(f64::from).sum::<f64>(),
    }
}

/// Oscillation amplitude grows with candle size.
fn amplitude(timeframe: &str) -> f64 {
    match timeframe {
        "1m" => 0.002,
        "5m" => 0.004,
        "15m" => 0.006,
        "1h" => 0.01,
        "4h" => 0.02,
        "1d" => 0.04,
        _ => 0.08,
    }
}

fn normalize(symbol: &str) -> Result<String> {
    let symbol = symbol.trim().to_ascii_uppercase();
    if symbol.is_empty() {
        return Err(AssistantError::invalid("symbol must not be empty"));
    }
    Ok(symbol)
}

impl StaticMarketData {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    fn series(symbol: &str, timeframe: &str, len: usize) -> Vec<f64> {
        let base = base_price(symbol);
        let amp = amplitude(timeframe);
        let phase = symbol.len() as f64;
        (0..len)
            .map(|i| {
                let t = i as f64;
                base * (1.0 + amp * (t * 0.3 + phase).sin() + amp * 0.5 * (t * 0.07).cos() + 0.0005 * t)
            })
            .collect()
    }
}

#[async_trait::async_trait]
impl MarketDataPort for StaticMarketData {
    async fn ticker(&self, ctx: &RequestContext, symbol: &str) -> Result<Ticker> {
        ctx.ensure_active()?;
        let symbol = normalize(symbol)?;
        let series = Self::series(&symbol, "1h", 25);
        let (first, last) = (series[0], series[series.len() - 1]);
        Ok(Ticker {
            price: last,
            change: (last - first) / first * 100.0,
            volume: base_price(&symbol) * 20.0,
            symbol,
            timestamp: self.clock.now(),
        })
    }

    async fn closes(&self, ctx: &RequestContext, symbol: &str, timeframe: &str, limit: usize) -> Result<Vec<f64>> {
        ctx.ensure_active()?;
        let symbol = normalize(symbol)?;
        Ok(Self::series(&symbol, timeframe, limit))
    }
}
