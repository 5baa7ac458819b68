//! Resilience primitives: circuit breakers, worker pools and
//! cooperative cancellation.

mod breaker;
mod cancel;
mod pool;

pub use breaker::{
    BreakerConfig, BreakerCounts, BreakerError, BreakerMetrics, CircuitBreaker, CircuitBreakers,
    CircuitState, StateChangeListener, TripPolicy,
};
pub use cancel::CancelToken;
pub use pool::{PanicHandler, PoolConfig, PoolError, PoolStats, QueuePolicy, WorkerPool, WorkerPools};
