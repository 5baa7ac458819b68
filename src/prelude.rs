//! Convenience re-exports of the crate's public surface.
//!
//! ```
//! use tradecore_rs::prelude::*;
//!
//! let engine = MatchingEngine::with_defaults();
//! let response = engine
//!     .place_order(&OrderRequest::limit("BTC/USD", Side::Buy, 100, 10, "acct"))
//!     .unwrap();
//! assert_eq!(response.status, OrderStatus::New);
//! ```

pub use crate::engine::{EngineConfig, EngineError, MatchingEngine, OrderRequest, OrderResponse};
pub use crate::orderbook::{
    AddOrderResult, Order, OrderBook, OrderBookError, OrderBookSnapshot, OrderBookSnapshotPackage,
    OrderId, OrderKind, OrderStatus, OrderUpdateEvent, OrderUpdateListener, PriceLevelSnapshot,
    Side, TimeInForce, Trade, TradeListener,
};
pub use crate::resilience::{
    BreakerConfig, BreakerError, BreakerMetrics, CancelToken, CircuitBreakers, CircuitState,
    PoolConfig, PoolError, PoolStats, QueuePolicy, WorkerPools,
};
pub use crate::risk::{
    AccountProvider, MarginRiskValidator, OrderCheck, RiskAssessment, RiskLevel, RiskValidator,
    StaticAccountProvider,
};
pub use crate::stats::{IncrementalCorrelation, IncrementalStatistics};
pub use crate::strategy::{
    MarketDataEvent, MeanReversionConfig, MeanReversionStrategy, OrderGateway, OrderSubmitter,
    PairDirection, PairPosition, PairRecord, PairStatisticsRecord, PluginConfig, PluginError,
    PluginInfo, Position, RuntimeConfig, RuntimeError, RuntimeMetrics, StatArbConfig,
    StatArbStrategy, Strategy, StrategyError, StrategyOrder, StrategyPlugin, StrategyRegistry,
    StrategyRuntime,
};
pub use crate::utils::current_time_millis;
