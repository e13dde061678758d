pub mod audit;
pub mod confirmation;
pub mod contract;
pub mod conversation;
pub mod insight;
pub mod market;
pub mod risk;
pub mod trade;
