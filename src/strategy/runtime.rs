//! Strategy runtime: prioritized fan-out of market data and order
//! updates through named worker pools and per-strategy circuit
//! breakers.

use super::contract::{MarketDataEvent, Strategy, StrategyError};
use super::registry::{RegistryError, StrategyRegistry};
use crate::orderbook::OrderUpdateEvent;
use crate::resilience::{
    BreakerError, BreakerMetrics, CancelToken, CircuitBreakers, PoolConfig, PoolError, QueuePolicy,
    WorkerPools,
};
use crossbeam::channel::{Receiver, RecvTimeoutError};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{info, warn};

/// Name of the pool carrying market-data fan-out tasks.
pub const MARKET_DATA_POOL: &str = "market-data-processor";
/// Name of the pool carrying order-update fan-out tasks.
pub const ORDER_UPDATE_POOL: &str = "order-processor";

/// Runtime construction options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Worker capacity of the market-data pool
    pub market_pool_capacity: usize,
    /// Worker capacity of the order-update pool
    pub order_pool_capacity: usize,
    /// Queue policy for both pools
    pub queue_policy: QueuePolicy,
    /// Soft deadline for strategy start/stop calls; recorded for hosts,
    /// enforcement is cooperative
    pub start_stop_timeout: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            market_pool_capacity: 4,
            order_pool_capacity: 4,
            queue_policy: QueuePolicy::BoundedBlock(1024),
            start_stop_timeout: Duration::from_secs(20),
        }
    }
}

/// Runtime failures.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Registration or lookup failure
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// The dispatch pool refused the task
    #[error(transparent)]
    Pool(#[from] PoolError),

    /// A strategy lifecycle call failed
    #[error("strategy '{name}' {operation} failed: {source}")]
    Lifecycle {
        /// Strategy the call targeted
        name: String,
        /// Which lifecycle call failed
        operation: &'static str,
        /// Underlying strategy error
        source: StrategyError,
    },
}

#[derive(Debug, Default)]
struct LatencyCell {
    invocations: AtomicU64,
    total_nanos: AtomicU64,
}

/// Per-strategy dispatch statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyDispatchMetrics {
    /// Strategy name
    pub name: String,
    /// Callback invocations dispatched
    pub invocations: u64,
    /// Mean callback latency in microseconds
    pub avg_latency_micros: f64,
}

/// Runtime-wide metrics snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeMetrics {
    /// Ticks accepted by `process_market_data`
    pub market_data_processed: u64,
    /// Updates accepted by `process_order_update`
    pub order_updates_processed: u64,
    /// Per-strategy dispatch statistics
    pub strategies: Vec<StrategyDispatchMetrics>,
    /// Per-breaker metrics
    pub breakers: HashMap<String, BreakerMetrics>,
}

/// Dispatches events to running strategies in priority order.
///
/// Each tick becomes one task on the market-data pool; inside the task
/// every running strategy's callback runs under its own named circuit
/// breaker with a log-and-swallow fallback, so one strategy's failure
/// never reaches the others. Order updates are dispatched the same way
/// through the order-update pool.
pub struct StrategyRuntime {
    registry: StrategyRegistry,
    breakers: Arc<CircuitBreakers>,
    pools: Arc<WorkerPools>,
    config: RuntimeConfig,
    market_data_processed: AtomicU64,
    order_updates_processed: AtomicU64,
    latencies: DashMap<String, Arc<LatencyCell>>,
}

impl StrategyRuntime {
    /// Creates a runtime with its own breaker and pool registries.
    #[must_use]
    pub fn new(config: RuntimeConfig) -> Arc<Self> {
        Arc::new(Self {
            registry: StrategyRegistry::new(),
            breakers: Arc::new(CircuitBreakers::new()),
            pools: Arc::new(WorkerPools::new()),
            config,
            market_data_processed: AtomicU64::new(0),
            order_updates_processed: AtomicU64::new(0),
            latencies: DashMap::new(),
        })
    }

    /// Creates a runtime with default configuration.
    #[must_use]
    pub fn with_defaults() -> Arc<Self> {
        Self::new(RuntimeConfig::default())
    }

    /// The strategy registry.
    #[must_use]
    pub fn registry(&self) -> &StrategyRegistry {
        &self.registry
    }

    /// The breaker registry protecting strategy callbacks.
    #[must_use]
    pub fn breakers(&self) -> &Arc<CircuitBreakers> {
        &self.breakers
    }

    /// The worker-pool registry.
    #[must_use]
    pub fn pools(&self) -> &Arc<WorkerPools> {
        &self.pools
    }

    /// Registers a strategy with a dispatch priority (lower runs
    /// earlier).
    pub fn register_strategy(
        &self,
        strategy: Arc<dyn Strategy>,
        priority: i32,
    ) -> Result<(), RuntimeError> {
        self.registry.register(strategy, priority)?;
        Ok(())
    }

    /// Initializes and starts a registered strategy.
    pub fn start_strategy(&self, ctx: &CancelToken, name: &str) -> Result<(), RuntimeError> {
        let strategy = self
            .registry
            .get(name)
            .ok_or_else(|| RegistryError::UnknownStrategy(name.to_string()))?;
        strategy
            .initialize(ctx)
            .map_err(|source| RuntimeError::Lifecycle {
                name: name.to_string(),
                operation: "initialize",
                source,
            })?;
        strategy
            .start(ctx)
            .map_err(|source| RuntimeError::Lifecycle {
                name: name.to_string(),
                operation: "start",
                source,
            })?;
        info!(strategy = %name, "strategy started");
        Ok(())
    }

    /// Stops a registered strategy.
    pub fn stop_strategy(&self, ctx: &CancelToken, name: &str) -> Result<(), RuntimeError> {
        let strategy = self
            .registry
            .get(name)
            .ok_or_else(|| RegistryError::UnknownStrategy(name.to_string()))?;
        strategy
            .stop(ctx)
            .map_err(|source| RuntimeError::Lifecycle {
                name: name.to_string(),
                operation: "stop",
                source,
            })?;
        info!(strategy = %name, "strategy stopped");
        Ok(())
    }

    /// Fans one tick out to every running strategy.
    ///
    /// Returns once the fan-out task is queued; strategy callbacks run
    /// on the pool. A cancelled `ctx` skips strategies not yet invoked
    /// but does not interrupt one already running.
    pub fn process_market_data(
        self: &Arc<Self>,
        ctx: &CancelToken,
        tick: MarketDataEvent,
    ) -> Result<(), RuntimeError> {
        self.market_data_processed.fetch_add(1, Ordering::Relaxed);
        let snapshot = self.registry.running_snapshot();
        if snapshot.is_empty() {
            return Ok(());
        }

        let pool = self.pools.get_or_create(
            MARKET_DATA_POOL,
            self.config.market_pool_capacity,
            PoolConfig {
                queue_policy: self.config.queue_policy,
                ..PoolConfig::default()
            },
        );
        let runtime = Arc::clone(self);
        let ctx = ctx.clone();
        pool.submit(move || {
            for (_, strategy) in &snapshot {
                if ctx.is_cancelled() {
                    break;
                }
                runtime.invoke(
                    &ctx,
                    strategy,
                    "strategy-market-data",
                    |strategy, ctx| strategy.on_market_data(ctx, &tick),
                );
            }
        })?;
        Ok(())
    }

    /// Fans one order update out to every running strategy.
    pub fn process_order_update(
        self: &Arc<Self>,
        ctx: &CancelToken,
        update: OrderUpdateEvent,
    ) -> Result<(), RuntimeError> {
        self.order_updates_processed.fetch_add(1, Ordering::Relaxed);
        let snapshot = self.registry.running_snapshot();
        if snapshot.is_empty() {
            return Ok(());
        }

        let pool = self.pools.get_or_create(
            ORDER_UPDATE_POOL,
            self.config.order_pool_capacity,
            PoolConfig {
                queue_policy: self.config.queue_policy,
                ..PoolConfig::default()
            },
        );
        let runtime = Arc::clone(self);
        let ctx = ctx.clone();
        pool.submit(move || {
            for (_, strategy) in &snapshot {
                if ctx.is_cancelled() {
                    break;
                }
                runtime.invoke(
                    &ctx,
                    strategy,
                    "strategy-order-update",
                    |strategy, ctx| strategy.on_order_update(ctx, &update),
                );
            }
        })?;
        Ok(())
    }

    /// Spawns a thread draining an engine update channel into
    /// [`Self::process_order_update`] until `ctx` is cancelled.
    pub fn spawn_order_update_pump(
        self: &Arc<Self>,
        ctx: CancelToken,
        updates: Receiver<OrderUpdateEvent>,
    ) -> JoinHandle<()> {
        let runtime = Arc::clone(self);
        std::thread::Builder::new()
            .name("order-update-pump".to_string())
            .spawn(move || {
                loop {
                    if ctx.is_cancelled() {
                        return;
                    }
                    match updates.recv_timeout(Duration::from_millis(100)) {
                        Ok(update) => {
                            if let Err(err) = runtime.process_order_update(&ctx, update) {
                                warn!(error = %err, "order update dispatch failed");
                            }
                        }
                        Err(RecvTimeoutError::Timeout) => {}
                        Err(RecvTimeoutError::Disconnected) => return,
                    }
                }
            })
            .expect("failed to spawn order update pump")
    }

    /// Metrics snapshot across counters, latencies and breakers.
    #[must_use]
    pub fn metrics(&self) -> RuntimeMetrics {
        let mut strategies: Vec<StrategyDispatchMetrics> = self
            .latencies
            .iter()
            .map(|entry| {
                let invocations = entry.value().invocations.load(Ordering::Relaxed);
                StrategyDispatchMetrics {
                    name: entry.key().clone(),
                    invocations,
                    avg_latency_micros: if invocations > 0 {
                        entry.value().total_nanos.load(Ordering::Relaxed) as f64
                            / invocations as f64
                            / 1_000.0
                    } else {
                        0.0
                    },
                }
            })
            .collect();
        strategies.sort_by(|a, b| a.name.cmp(&b.name));

        RuntimeMetrics {
            market_data_processed: self.market_data_processed.load(Ordering::Relaxed),
            order_updates_processed: self.order_updates_processed.load(Ordering::Relaxed),
            strategies,
            breakers: self.breakers.metrics(),
        }
    }

    /// Configured soft deadline for strategy start/stop.
    #[must_use]
    pub fn start_stop_timeout(&self) -> Duration {
        self.config.start_stop_timeout
    }

    /// Runs one strategy callback under its named breaker, recording
    /// latency; failures are logged and swallowed.
    fn invoke(
        &self,
        ctx: &CancelToken,
        strategy: &Arc<dyn Strategy>,
        breaker_prefix: &str,
        call: impl FnOnce(&Arc<dyn Strategy>, &CancelToken) -> Result<(), StrategyError>,
    ) {
        let name = strategy.name().to_string();
        let breaker_name = format!("{breaker_prefix}-{name}");
        let started = Instant::now();

        let _ = self.breakers.execute_with_fallback(
            &breaker_name,
            || call(strategy, ctx),
            |err| {
                match err {
                    BreakerError::Open { .. } => {
                        warn!(strategy = %name, breaker = %breaker_name, "callback skipped: breaker open");
                    }
                    BreakerError::Cancelled => {}
                    BreakerError::Inner(inner) => {
                        warn!(strategy = %name, error = %inner, "strategy callback failed");
                    }
                }
                Ok(())
            },
        );

        let cell = self
            .latencies
            .entry(name)
            .or_insert_with(|| Arc::new(LatencyCell::default()))
            .clone();
        cell.invocations.fetch_add(1, Ordering::Relaxed);
        cell.total_nanos
            .fetch_add(started.elapsed().as_nanos() as u64, Ordering::Relaxed);
    }
}

impl std::fmt::Debug for StrategyRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrategyRuntime")
            .field("registry", &self.registry)
            .field(
                "market_data_processed",
                &self.market_data_processed.load(Ordering::Relaxed),
            )
            .finish()
    }
}
