//! The capability set every strategy exposes to the runtime.

use crate::engine::EngineError;
use crate::resilience::CancelToken;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A normalized market-data tick handed to strategies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketDataEvent {
    /// Trading symbol
    pub symbol: String,
    /// Last traded or mark price
    pub price: f64,
    /// Best bid
    pub bid: f64,
    /// Best ask
    pub ask: f64,
    /// Producer timestamp, nanoseconds since the epoch. Monotonicity
    /// per symbol is assumed but not enforced; consumers window by
    /// their own receive time.
    pub timestamp_ns: u64,
}

impl MarketDataEvent {
    /// A tick with bid/ask set equal to the price.
    #[must_use]
    pub fn new(symbol: &str, price: f64, timestamp_ns: u64) -> Self {
        Self {
            symbol: symbol.to_string(),
            price,
            bid: price,
            ask: price,
            timestamp_ns,
        }
    }
}

/// Errors surfaced by strategy callbacks and the submission path.
#[derive(Debug, Error)]
pub enum StrategyError {
    /// The strategy is not running
    #[error("strategy is not running")]
    NotRunning,

    /// Configuration rejected at initialization
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The risk validator refused the order
    #[error("risk rejected: {0}")]
    RiskRejected(String),

    /// The engine refused the order
    #[error("order submission failed: {0}")]
    Submission(#[from] EngineError),

    /// A repository call failed
    #[error("repository failure: {0}")]
    Repository(#[from] super::repository::RepositoryError),

    /// Anything else
    #[error("strategy internal error: {0}")]
    Internal(String),
}

/// The single polymorphism point of the runtime.
///
/// `on_market_data` and `on_order_update` must be re-entrant-safe
/// within one instance: the runtime may call them from any pool worker
/// but never issues more than one concurrent invocation per instance —
/// strategies needing stronger FIFO across ticks serialize internally.
pub trait Strategy: Send + Sync {
    /// Unique strategy name.
    fn name(&self) -> &str;

    /// One-time setup before the first start.
    fn initialize(&self, ctx: &CancelToken) -> Result<(), StrategyError>;

    /// Begin accepting events.
    fn start(&self, ctx: &CancelToken) -> Result<(), StrategyError>;

    /// Stop accepting events; safe to call repeatedly.
    fn stop(&self, ctx: &CancelToken) -> Result<(), StrategyError>;

    /// Whether the strategy currently accepts events.
    fn is_running(&self) -> bool;

    /// Handle one market-data tick.
    fn on_market_data(
        &self,
        ctx: &CancelToken,
        tick: &MarketDataEvent,
    ) -> Result<(), StrategyError>;

    /// Handle one order status transition.
    fn on_order_update(
        &self,
        ctx: &CancelToken,
        update: &crate::orderbook::OrderUpdateEvent,
    ) -> Result<(), StrategyError>;

    /// Strategy-specific metrics as a JSON document.
    fn metrics(&self) -> serde_json::Value;
}
