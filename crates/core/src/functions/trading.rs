//! Standard trading functions exposed to the model.

use super::catalog::{FunctionArgs, FunctionDefinition, FunctionHandler, FunctionRegistry, ParamSchema, ParamType};
use super::indicators;
use crate::context::{Clock, RequestContext};
use crate::domain::trade::{PriceType, TradeAction, TradeRequest};
use crate::error::{AssistantError, Result};
use crate::ports::{MarketDataPort, PortfolioService, RiskMetrics};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;

pub const GET_MARKET_DATA: &str = "get_market_data";
pub const ANALYZE_TECHNICAL_INDICATORS: &str = "analyze_technical_indicators";
pub const EXECUTE_TRADE: &str = "execute_trade";
pub const GET_PORTFOLIO_SUMMARY: &str = "get_portfolio_summary";
pub const GET_RISK_METRICS: &str = "get_risk_metrics";

pub const TIMEFRAMES: [&str; 7] = ["1m", "5m", "15m", "1h", "4h", "1d", "1w"];
pub const INDICATORS: [&str; 6] = ["rsi", "macd", "bollinger", "ema", "sma", "fibonacci"];

/// Enough history for SMA(200).
const INDICATOR_LOOKBACK: usize = 200;

/// Ports the standard functions read from.
#[derive(Clone)]
pub struct TradingPorts {
    pub market: Arc<dyn MarketDataPort>,
    pub portfolio: Arc<dyn PortfolioService>,
    pub risk: Arc<dyn RiskMetrics>,
    pub clock: Arc<dyn Clock>,
}

pub fn register_standard_functions(registry: &FunctionRegistry, ports: TradingPorts) -> Result<()> {
    let symbol = || ParamSchema::new(ParamType::String, "The trading symbol (e.g., BTC, ETH)");

    registry.register(
        FunctionDefinition::new(GET_MARKET_DATA, "Get current market data for a specific cryptocurrency")
            .required_param("symbol", symbol())
            .param(
                "timeframe",
                ParamSchema::new(ParamType::String, "Timeframe for the data (e.g., 1h, 4h, 1d)")
                    .one_of(&TIMEFRAMES)
                    .default_value(json!("1h")),
            ),
        Arc::new(MarketDataHandler {
            market: ports.market.clone(),
        }),
    )?;

    registry.register(
        FunctionDefinition::new(
            ANALYZE_TECHNICAL_INDICATORS,
            "Analyze technical indicators for a specific cryptocurrency",
        )
        .required_param("symbol", symbol())
        .required_param(
            "indicators",
            ParamSchema::new(ParamType::Array, "List of indicators to analyze")
                .items(ParamSchema::new(ParamType::String, "indicator").one_of(&INDICATORS)),
        )
        .param(
            "timeframe",
            ParamSchema::new(ParamType::String, "Candle size used for the calculation")
                .one_of(&TIMEFRAMES)
                .default_value(json!("1d")),
        ),
        Arc::new(IndicatorsHandler {
            market: ports.market.clone(),
            clock: ports.clock.clone(),
        }),
    )?;

    registry.register(
        FunctionDefinition::new(EXECUTE_TRADE, "Execute a trade (requires confirmation)")
            .required_param("symbol", symbol())
            .required_param(
                "action",
                ParamSchema::new(ParamType::String, "Buy or sell").one_of(&["buy", "sell"]),
            )
            .required_param(
                "amount",
                ParamSchema::new(ParamType::Number, "Amount to trade (in USD or percentage of portfolio)"),
            )
            .required_param(
                "price_type",
                ParamSchema::new(ParamType::String, "Market or limit order").one_of(&["market", "limit"]),
            )
            .param("limit_price", ParamSchema::new(ParamType::Number, "Price for limit orders"))
            .param("stop_loss", ParamSchema::new(ParamType::Number, "Stop loss price"))
            .param("take_profit", ParamSchema::new(ParamType::Number, "Take profit price")),
        Arc::new(ExecuteTradeHandler),
    )?;

    registry.register(
        FunctionDefinition::new(GET_PORTFOLIO_SUMMARY, "Get a summary of the user's portfolio"),
        Arc::new(PortfolioSummaryHandler {
            portfolio: ports.portfolio.clone(),
        }),
    )?;

    registry.register(
        FunctionDefinition::new(GET_RISK_METRICS, "Get risk metrics for the user's portfolio"),
        Arc::new(RiskMetricsHandler {
            risk: ports.risk,
            clock: ports.clock,
        }),
    )?;

    Ok(())
}

fn require_user(ctx: &RequestContext) -> Result<i64> {
    ctx.user_id
        .ok_or_else(|| AssistantError::invalid("user id is required for this function"))
}

#[derive(Debug, Deserialize)]
struct MarketDataArgs {
    symbol: String,
    timeframe: String,
}

struct MarketDataHandler {
    market: Arc<dyn MarketDataPort>,
}

#[async_trait::async_trait]
impl FunctionHandler for MarketDataHandler {
    async fn call(&self, ctx: &RequestContext, args: FunctionArgs) -> Result<Value> {
        let args: MarketDataArgs = args.parse()?;
        let ticker = self.market.ticker(ctx, &args.symbol).await?;
        Ok(json!({
            "symbol": ticker.symbol,
            "timeframe": args.timeframe,
            "price": ticker.price,
            "change": ticker.change,
            "volume": ticker.volume,
            "timestamp": ticker.timestamp.to_rfc3339(),
        }))
    }
}

#[derive(Debug, Deserialize)]
struct IndicatorArgs {
    symbol: String,
    indicators: Vec<String>,
    timeframe: String,
}

struct IndicatorsHandler {
    market: Arc<dyn MarketDataPort>,
    clock: Arc<dyn Clock>,
}

#[async_trait::async_trait]
impl FunctionHandler for IndicatorsHandler {
    async fn call(&self, ctx: &RequestContext, args: FunctionArgs) -> Result<Value> {
        let args: IndicatorArgs = args.parse()?;
        let closes = self
            .market
            .closes(ctx, &args.symbol, &args.timeframe, INDICATOR_LOOKBACK)
            .await?;

        let mut values = Map::new();
        for name in &args.indicators {
            let value = match name.as_str() {
                "rsi" => json!(indicators::rsi(&closes, 14)),
                "macd" => json!(indicators::macd(&closes, 12, 26, 9)),
                "bollinger" => json!(indicators::bollinger(&closes, 20, 2.0)),
                "ema" => json!({
                    "ema9": indicators::ema(&closes, 9),
                    "ema21": indicators::ema(&closes, 21),
                    "ema50": indicators::ema(&closes, 50),
                }),
                "sma" => json!({
                    "sma20": indicators::sma(&closes, 20),
                    "sma50": indicators::sma(&closes, 50),
                    "sma200": indicators::sma(&closes, 200),
                }),
                "fibonacci" => json!(indicators::fibonacci(&closes)),
                _ => continue,
            };
            values.insert(name.clone(), value);
        }

        Ok(json!({
            "symbol": args.symbol,
            "timeframe": args.timeframe,
            "timestamp": self.clock.now().to_rfc3339(),
            "indicators": values,
        }))
    }
}

/// Typed arguments of `execute_trade`.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecuteTradeArgs {
    pub symbol: String,
    pub action: String,
    pub amount: f64,
    pub price_type: PriceType,
    #[serde(default)]
    pub limit_price: Option<f64>,
    #[serde(default)]
    pub stop_loss: Option<f64>,
    #[serde(default)]
    pub take_profit: Option<f64>,
}

impl ExecuteTradeArgs {
    pub fn into_trade_request(self) -> Result<TradeRequest> {
        let action = match self.action.to_ascii_lowercase().as_str() {
            "buy" => TradeAction::Buy,
            "sell" => TradeAction::Sell,
            other => return Err(AssistantError::invalid(format!("unsupported trade action: {other}"))),
        };
        if !(self.amount.is_finite() && self.amount > 0.0) {
            return Err(AssistantError::invalid("trade amount must be positive"));
        }
        if self.price_type == PriceType::Limit && self.limit_price.is_none() {
            return Err(AssistantError::invalid("limit orders require limit_price"));
        }
        Ok(TradeRequest {
            symbol: self.symbol.trim().to_ascii_uppercase(),
            action,
            amount: self.amount,
            price_type: self.price_type,
            limit_price: self.limit_price,
            stop_loss: self.stop_loss,
            take_profit: self.take_profit,
        })
    }
}

/// Never submits an order; real execution goes through the confirmation flow.
struct ExecuteTradeHandler;

#[async_trait::async_trait]
impl FunctionHandler for ExecuteTradeHandler {
    async fn call(&self, _ctx: &RequestContext, args: FunctionArgs) -> Result<Value> {
        let request = args.parse::<ExecuteTradeArgs>()?.into_trade_request()?;
        Ok(json!({
            "success": false,
            "status": "confirmation_required",
            "message": "Trade execution is not implemented yet",
            "params": request,
        }))
    }
}

struct PortfolioSummaryHandler {
    portfolio: Arc<dyn PortfolioService>,
}

#[async_trait::async_trait]
impl FunctionHandler for PortfolioSummaryHandler {
    async fn call(&self, ctx: &RequestContext, _args: FunctionArgs) -> Result<Value> {
        let user_id = require_user(ctx)?;
        let snapshot = self.portfolio.portfolio(ctx, user_id).await?;

        let allocation: Map<String, Value> = snapshot
            .holdings
            .iter()
            .map(|h| {
                let pct = if snapshot.total_value > 0.0 {
                    h.value / snapshot.total_value * 100.0
                } else {
                    0.0
                };
                (h.symbol.clone(), json!(pct))
            })
            .collect();

        Ok(json!({
            "total_value": snapshot.total_value,
            "cash": snapshot.cash,
            "holdings": snapshot.holdings,
            "asset_allocation": allocation,
            "timestamp": snapshot.as_of.to_rfc3339(),
        }))
    }
}

struct RiskMetricsHandler {
    risk: Arc<dyn RiskMetrics>,
    clock: Arc<dyn Clock>,
}

#[async_trait::async_trait]
impl FunctionHandler for RiskMetricsHandler {
    async fn call(&self, ctx: &RequestContext, _args: FunctionArgs) -> Result<Value> {
        let user_id = require_user(ctx)?;
        let status = self.risk.risk_status(ctx).await?;
        let daily_loss = self.risk.check_daily_loss_limit(ctx, user_id).await?;
        let drawdown = self.risk.check_maximum_drawdown(ctx, user_id).await?;
        Ok(json!({
            "trading_enabled": status.trading_enabled,
            "disabled_reason": status.disabled_reason,
            "current_drawdown": status.current_drawdown,
            "total_exposure": status.total_exposure,
            "daily_loss": daily_loss,
            "max_drawdown": drawdown,
            "timestamp": self.clock.now().to_rfc3339(),
        }))
    }
}
