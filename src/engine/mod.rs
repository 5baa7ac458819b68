//! The matching engine: one order book per symbol, created on first
//! reference, with bounded trade and order-update channels and periodic
//! book compaction.

mod engine;
mod error;
mod request;

pub use engine::{EngineConfig, MatchingEngine};
pub use error::EngineError;
pub use request::{OrderRequest, OrderResponse};
