//! Configuration-driven implementations of the external ports.

mod market;
mod paper;
mod portfolio;
mod risk_policy;

pub use market::StaticMarketData;
pub use paper::PaperTradeExecutor;
pub use portfolio::StaticPortfolio;
pub use risk_policy::StaticRiskPolicy;
