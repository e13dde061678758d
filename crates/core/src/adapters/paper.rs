use crate::context::{Clock, RequestContext};
use crate::domain::trade::{Order, OrderStatus, PriceType, TradeAction, TradeRequest};
use crate::error::{AssistantError, Result};
use crate::ports::{MarketDataPort, TradeExecutor};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Simulated executor. Market orders and marketable limits fill at the
/// current ticker price; other limits rest until cancelled.
pub struct PaperTradeExecutor {
    market: Arc<dyn MarketDataPort>,
    clock: Arc<dyn Clock>,
    orders: Mutex<HashMap<String, Order>>,
}

impl PaperTradeExecutor {
    pub fn new(market: Arc<dyn MarketDataPort>, clock: Arc<dyn Clock>) -> Self {
        Self {
            market,
            clock,
            orders: Mutex::new(HashMap::new()),
        }
    }
}

fn order_not_found(order_id: &str) -> AssistantError {
    AssistantError::not_found(format!("order not found: {order_id}"))
}

#[async_trait::async_trait]
impl TradeExecutor for PaperTradeExecutor {
    async fn execute(&self, ctx: &RequestContext, user_id: i64, request: &TradeRequest) -> Result<Order> {
        if request.amount <= 0.0 {
            return Err(AssistantError::invalid("trade amount must be positive"));
        }
        let ticker = self.market.ticker(ctx, &request.symbol).await?;
        let fill_price = match (request.price_type, request.limit_price) {
            (PriceType::Market, _) => Some(ticker.price),
            (PriceType::Limit, Some(limit)) => {
                let marketable = match request.action {
                    TradeAction::Buy => limit >= ticker.price,
                    TradeAction::Sell => limit <= ticker.price,
                };
                marketable.then_some(ticker.price)
            }
            (PriceType::Limit, None) => {
                return Err(AssistantError::invalid("limit orders require limit_price"));
            }
        };

        let now = self.clock.now();
        let order = Order {
            id: uuid::Uuid::new_v4().to_string(),
            user_id,
            request: request.clone(),
            status: if fill_price.is_some() {
                OrderStatus::Filled
            } else {
                OrderStatus::New
            },
            filled_amount: if fill_price.is_some() { request.amount } else { 0.0 },
            average_price: fill_price,
            created_at: now,
            updated_at: now,
        };
        tracing::info!(
            user_id,
            order_id = %order.id,
            symbol = %request.symbol,
            action = %request.action,
            amount = request.amount,
            status = ?order.status,
            "paper order submitted"
        );
        self.orders.lock().insert(order.id.clone(), order.clone());
        Ok(order)
    }

    async fn cancel(&self, ctx: &RequestContext, order_id: &str) -> Result<Order> {
        ctx.ensure_active()?;
        let mut orders = self.orders.lock();
        let order = orders.get_mut(order_id).ok_or_else(|| order_not_found(order_id))?;
        if order.status != OrderStatus::New {
            return Err(AssistantError::conflict(format!(
                "order cannot be cancelled: {:?}",
                order.status
            )));
        }
        order.status = OrderStatus::Cancelled;
        order.updated_at = self.clock.now();
        Ok(order.clone())
    }

    async fn status(&self, ctx: &RequestContext, order_id: &str) -> Result<Order> {
        ctx.ensure_active()?;
        self.orders
            .lock()
            .get(order_id)
            .cloned()
            .ok_or_else(|| order_not_found(order_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::StaticMarketData;
    use crate::context::ManualClock;
    use crate::error::ErrorKind;
    use crate::testing::{t0, trade};
    use pretty_assertions::assert_eq;

    fn executor() -> PaperTradeExecutor {
        let clock = Arc::new(ManualClock::new(t0()));
        PaperTradeExecutor::new(Arc::new(StaticMarketData::new(clock.clone())), clock)
    }

    #[tokio::test]
    async fn market_order_fills_immediately() {
        let ex = executor();
        let ctx = RequestContext::background();
        let order = ex.execute(&ctx, 1, &trade("BTC", TradeAction::Buy, 0.5)).await.unwrap();
        assert_eq!(order.status, OrderStatus::Filled);
        assert_eq!(order.filled_amount, 0.5);
        assert_eq!(ex.status(&ctx, &order.id).await.unwrap(), order);

        let err = ex.cancel(&ctx, &order.id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StateConflict);
    }

    #[tokio::test]
    async fn resting_limit_can_be_cancelled() {
        let ex = executor();
        let ctx = RequestContext::background();
        let mut request = trade("BTC", TradeAction::Buy, 1.0);
        request.price_type = PriceType::Limit;
        request.limit_price = Some(1.0);
        let order = ex.execute(&ctx, 1, &request).await.unwrap();
        assert_eq!(order.status, OrderStatus::New);
        assert_eq!(order.average_price, None);

        let cancelled = ex.cancel(&ctx, &order.id).await.unwrap();
        assert_eq!(cancelled.status, OrderStatus::Cancelled);
    }

    #[tokio::test]
    async fn unknown_order_is_not_found() {
        let err = executor()
            .status(&RequestContext::background(), "nope")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
