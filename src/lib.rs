//! # Trading Platform Core
//!
//! A price–time-priority matching engine coupled with a strategy runtime, written in Rust. This crate provides the core of a trading platform: per-symbol order books with deterministic matching, a prioritized event-dispatch runtime with failure isolation, two reference signal engines, and the resilience primitives they depend on.
//!
//! ## Key Features
//!
//! - **Deterministic Matching**: Per-symbol order books with strict price–time priority, partial fills, stop triggering and maker-priced trades. Matching within a symbol is strictly serial; distinct symbols proceed in parallel.
//!
//! - **Full Order Lifecycle**: Limit, market, stop-limit and stop-market orders with GTC/IOC/FOK time-in-force, O(log n) cancellation through an id index, and an order-update event for every status transition.
//!
//! - **Strategy Runtime**: Market-data fan-out to running strategies in priority order, one named worker pool per event class, and one named circuit breaker per strategy callback so a failing strategy never takes down its neighbors.
//!
//! - **Resilience Primitives**: Three-state circuit breakers with pluggable trip predicates, fallbacks and per-name metrics; bounded worker pools with panic isolation, idle-worker reclamation and queue policies.
//!
//! - **Signal Engines**: Mean reversion on rolling z-scores and statistical arbitrage on a pair spread, both built on a shared incremental-statistics module (Welford mean/variance, online Pearson correlation, O(1) sliding-window updates).
//!
//! - **Pre-Trade Risk**: A synchronous risk-validator interface with a margin-based default implementation, invoked by the order gateway before anything reaches the engine.
//!
//! ## Design Goals
//!
//! 1. **Correctness**: Every trade sequence corresponds to a serial history respecting price–time priority; the book is never left crossed.
//! 2. **Isolation**: Strategy faults are converted to typed errors at the crash barrier; the dispatch loop is never interrupted by a single strategy.
//! 3. **Determinism**: Arrival sequencing decides every tie; snapshots are reproducible and checksummed.
//! 4. **No global state**: Named breakers and pools live in registries owned by the runtime root.
//!
//! ## Architecture
//!
//! ```text
//! ticks ──► StrategyRuntime ──► worker pool ──► breaker ──► Strategy
//!                                                              │
//!                                             OrderGateway ◄───┘
//!                                                  │ risk check
//!                                                  ▼
//!                          MatchingEngine ──► OrderBook (per symbol)
//!                                │                  │
//!                          trade channel      order updates ──► runtime
//! ```
//!
//! Strategies hold only an opaque order-submission handle, never the
//! registry or the engine; the runtime holds strong references to
//! strategies. That one-way reference chain keeps the object graph
//! acyclic without weak-reference machinery.
//!
//! ## Example
//!
//! ```
//! use tradecore_rs::prelude::*;
//!
//! let engine = MatchingEngine::with_defaults();
//! engine
//!     .place_order(&OrderRequest::limit("BTC/USD", Side::Buy, 10_000, 5, "maker"))
//!     .unwrap();
//! let response = engine
//!     .place_order(&OrderRequest::market("BTC/USD", Side::Sell, 2, "taker"))
//!     .unwrap();
//! assert_eq!(response.status, OrderStatus::Filled);
//! assert_eq!(response.filled_quantity, 2);
//!
//! let snapshot = engine.snapshot("BTC/USD", 10).unwrap();
//! assert_eq!(snapshot.best_bid(), Some((10_000, 3)));
//! ```

pub mod engine;
pub mod orderbook;
pub mod prelude;
pub mod resilience;
pub mod risk;
pub mod stats;
pub mod strategy;
mod utils;

pub use engine::{EngineConfig, EngineError, MatchingEngine, OrderRequest, OrderResponse};
pub use orderbook::{
    AddOrderResult, CompactionReport, Order, OrderBook, OrderBookError, OrderBookSnapshot,
    OrderBookSnapshotPackage, OrderId, OrderKind, OrderStatus, OrderUpdateEvent,
    OrderUpdateListener, PriceLevelSnapshot, Side, TimeInForce, Trade, TradeListener,
};
pub use resilience::{
    BreakerConfig, BreakerCounts, BreakerError, BreakerMetrics, CancelToken, CircuitBreaker,
    CircuitBreakers, CircuitState, PoolConfig, PoolError, PoolStats, QueuePolicy, WorkerPool,
    WorkerPools,
};
pub use risk::{
    AccountProvider, MarginRiskValidator, OrderCheck, RiskAssessment, RiskLevel, RiskValidator,
    StaticAccountProvider,
};
pub use stats::{IncrementalCorrelation, IncrementalStatistics};
pub use strategy::{
    MarketDataEvent, MeanReversionConfig, MeanReversionStrategy, OrderGateway, OrderSubmitter,
    PairPosition, Position, RuntimeConfig, StatArbConfig, StatArbStrategy, Strategy,
    StrategyError, StrategyOrder, StrategyPlugin, StrategyRegistry, StrategyRuntime,
};
pub use utils::{current_time_millis, current_time_nanos, monotonic_nanos};
