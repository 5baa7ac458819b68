//! Named circuit breakers guarding strategy callbacks and other
//! failure-prone calls.
//!
//! Each name owns a three-state gate (CLOSED → OPEN → HALF_OPEN) with a
//! pluggable trip predicate, per-name metrics and an optional fallback
//! path whose outcome is recorded separately and never feeds the trip
//! predicate.

use super::cancel::CancelToken;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// State of a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitState {
    /// Calls flow through; failures are counted
    Closed,
    /// Calls are denied until the open timeout elapses
    Open,
    /// A limited number of probe calls are admitted
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Counts observed within the current interval, handed to the trip
/// predicate on every failure.
#[derive(Debug, Clone, Copy, Default)]
pub struct BreakerCounts {
    /// Requests admitted in the current interval
    pub requests: u64,
    /// Successes in the current interval
    pub successes: u64,
    /// Failures in the current interval
    pub failures: u64,
    /// Failures since the last success
    pub consecutive_failures: u64,
}

/// Decides whether a failure trips the breaker.
pub type TripPolicy = Arc<dyn Fn(&BreakerCounts) -> bool + Send + Sync>;

/// Callback invoked synchronously on the transitioning caller.
pub type StateChangeListener = Arc<dyn Fn(&str, CircuitState, CircuitState) + Send + Sync>;

/// Configuration for a named breaker.
#[derive(Clone)]
pub struct BreakerConfig {
    /// How long the breaker stays OPEN before admitting probes
    pub open_timeout: Duration,
    /// Rolling interval after which closed-state counts reset
    pub interval: Duration,
    /// Consecutive successes required to close from HALF_OPEN; also the
    /// maximum number of concurrent probe calls while half-open
    pub max_requests: u32,
    /// Trip predicate; `None` uses [`BreakerConfig::default_trip`]
    pub trip: Option<TripPolicy>,
    /// Invoked on every state transition
    pub on_state_change: Option<StateChangeListener>,
}

impl fmt::Debug for BreakerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BreakerConfig")
            .field("open_timeout", &self.open_timeout)
            .field("interval", &self.interval)
            .field("max_requests", &self.max_requests)
            .finish()
    }
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            open_timeout: Duration::from_secs(60),
            interval: Duration::from_secs(30),
            max_requests: 1,
            trip: None,
            on_state_change: None,
        }
    }
}

impl BreakerConfig {
    /// Default trip predicate: at least 10 requests with a failure
    /// ratio of 0.5 or more, or more than 5 consecutive failures.
    #[must_use]
    pub fn default_trip(counts: &BreakerCounts) -> bool {
        (counts.requests >= 10 && counts.failures * 2 >= counts.requests)
            || counts.consecutive_failures > 5
    }
}

/// Error returned by breaker execution.
#[derive(Debug, thiserror::Error)]
pub enum BreakerError<E> {
    /// The breaker denied the call
    #[error("circuit breaker '{name}' is open")]
    Open {
        /// Name of the denying breaker
        name: String,
    },
    /// The call was skipped because the context was cancelled
    #[error("circuit breaker call cancelled")]
    Cancelled,
    /// The wrapped call failed
    #[error("{0}")]
    Inner(E),
}

/// Per-name metrics exposed through [`CircuitBreakers::metrics`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BreakerMetrics {
    /// Total executions admitted
    pub executions: u64,
    /// Successful executions
    pub successes: u64,
    /// Failed executions
    pub failures: u64,
    /// Calls denied while open
    pub rejections: u64,
    /// Mean execution time in microseconds
    pub avg_execution_micros: f64,
    /// Fallback invocations
    pub fallbacks: u64,
    /// Successful fallback invocations
    pub fallback_successes: u64,
    /// Mean fallback time in microseconds
    pub avg_fallback_micros: f64,
    /// Transitions into OPEN
    pub transitions_to_open: u64,
    /// Transitions into HALF_OPEN
    pub transitions_to_half_open: u64,
    /// Transitions into CLOSED
    pub transitions_to_closed: u64,
}

#[derive(Debug, Default)]
struct MetricCells {
    executions: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    rejections: AtomicU64,
    execution_nanos: AtomicU64,
    fallbacks: AtomicU64,
    fallback_successes: AtomicU64,
    fallback_nanos: AtomicU64,
    to_open: AtomicU64,
    to_half_open: AtomicU64,
    to_closed: AtomicU64,
}

impl MetricCells {
    fn snapshot(&self) -> BreakerMetrics {
        let executions = self.executions.load(Ordering::Relaxed);
        let fallbacks = self.fallbacks.load(Ordering::Relaxed);
        BreakerMetrics {
            executions,
            successes: self.successes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            rejections: self.rejections.load(Ordering::Relaxed),
            avg_execution_micros: if executions > 0 {
                self.execution_nanos.load(Ordering::Relaxed) as f64 / executions as f64 / 1_000.0
            } else {
                0.0
            },
            fallbacks,
            fallback_successes: self.fallback_successes.load(Ordering::Relaxed),
            avg_fallback_micros: if fallbacks > 0 {
                self.fallback_nanos.load(Ordering::Relaxed) as f64 / fallbacks as f64 / 1_000.0
            } else {
                0.0
            },
            transitions_to_open: self.to_open.load(Ordering::Relaxed),
            transitions_to_half_open: self.to_half_open.load(Ordering::Relaxed),
            transitions_to_closed: self.to_closed.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug)]
struct Core {
    state: CircuitState,
    counts: BreakerCounts,
    interval_started: Instant,
    opened_at: Option<Instant>,
    half_open_successes: u32,
    half_open_inflight: u32,
}

/// A single named circuit breaker.
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    core: Mutex<Core>,
    metrics: MetricCells,
}

impl CircuitBreaker {
    fn new(name: &str, config: BreakerConfig) -> Self {
        Self {
            name: name.to_string(),
            config,
            core: Mutex::new(Core {
                state: CircuitState::Closed,
                counts: BreakerCounts::default(),
                interval_started: Instant::now(),
                opened_at: None,
                half_open_successes: 0,
                half_open_inflight: 0,
            }),
            metrics: MetricCells::default(),
        }
    }

    /// The breaker's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state; evaluates the open-timeout lazily.
    #[must_use]
    pub fn state(&self) -> CircuitState {
        let mut core = self.core.lock().expect("breaker lock poisoned");
        self.maybe_half_open(&mut core);
        core.state
    }

    /// Metrics snapshot for this breaker.
    #[must_use]
    pub fn metrics(&self) -> BreakerMetrics {
        self.metrics.snapshot()
    }

    /// Forces the breaker back to CLOSED and clears interval counts.
    pub fn reset(&self) {
        let mut core = self.core.lock().expect("breaker lock poisoned");
        let from = core.state;
        core.state = CircuitState::Closed;
        core.counts = BreakerCounts::default();
        core.interval_started = Instant::now();
        core.opened_at = None;
        core.half_open_successes = 0;
        core.half_open_inflight = 0;
        drop(core);
        if from != CircuitState::Closed {
            self.record_transition(from, CircuitState::Closed);
        }
    }

    /// Runs `f` under the breaker.
    ///
    /// # Errors
    /// [`BreakerError::Open`] when the circuit denies the call,
    /// [`BreakerError::Inner`] carrying `f`'s error otherwise.
    pub fn execute<T, E>(&self, f: impl FnOnce() -> Result<T, E>) -> Result<T, BreakerError<E>> {
        if !self.admit() {
            self.metrics.rejections.fetch_add(1, Ordering::Relaxed);
            return Err(BreakerError::Open {
                name: self.name.clone(),
            });
        }

        let started = Instant::now();
        let outcome = f();
        let elapsed = started.elapsed();
        self.metrics.executions.fetch_add(1, Ordering::Relaxed);
        self.metrics
            .execution_nanos
            .fetch_add(elapsed.as_nanos() as u64, Ordering::Relaxed);

        match outcome {
            Ok(value) => {
                self.on_success();
                Ok(value)
            }
            Err(err) => {
                self.on_failure();
                Err(BreakerError::Inner(err))
            }
        }
    }

    /// Like [`Self::execute`] but skips the call entirely when `ctx` is
    /// already cancelled. `f` itself must observe cancellation.
    pub fn execute_with_context<T, E>(
        &self,
        ctx: &CancelToken,
        f: impl FnOnce() -> Result<T, E>,
    ) -> Result<T, BreakerError<E>> {
        if ctx.is_cancelled() {
            return Err(BreakerError::Cancelled);
        }
        self.execute(f)
    }

    /// Runs `f`; on failure or an open circuit, runs `fallback` with
    /// the error. Fallback outcome is recorded separately and does not
    /// feed the trip predicate.
    pub fn execute_with_fallback<T, E>(
        &self,
        f: impl FnOnce() -> Result<T, E>,
        fallback: impl FnOnce(&BreakerError<E>) -> Result<T, E>,
    ) -> Result<T, E> {
        match self.execute(f) {
            Ok(value) => Ok(value),
            Err(err) => {
                let started = Instant::now();
                let result = fallback(&err);
                let elapsed = started.elapsed();
                self.metrics.fallbacks.fetch_add(1, Ordering::Relaxed);
                self.metrics
                    .fallback_nanos
                    .fetch_add(elapsed.as_nanos() as u64, Ordering::Relaxed);
                if result.is_ok() {
                    self.metrics
                        .fallback_successes
                        .fetch_add(1, Ordering::Relaxed);
                }
                result
            }
        }
    }

    /// Admission decision; transitions OPEN → HALF_OPEN lazily.
    fn admit(&self) -> bool {
        let mut core = self.core.lock().expect("breaker lock poisoned");
        self.maybe_half_open(&mut core);
        match core.state {
            CircuitState::Closed => {
                if core.interval_started.elapsed() >= self.config.interval {
                    let consecutive = core.counts.consecutive_failures;
                    core.counts = BreakerCounts {
                        consecutive_failures: consecutive,
                        ..BreakerCounts::default()
                    };
                    core.interval_started = Instant::now();
                }
                core.counts.requests += 1;
                true
            }
            CircuitState::Open => false,
            CircuitState::HalfOpen => {
                if core.half_open_inflight < self.config.max_requests {
                    core.half_open_inflight += 1;
                    core.counts.requests += 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    fn maybe_half_open(&self, core: &mut Core) {
        if core.state == CircuitState::Open
            && let Some(opened_at) = core.opened_at
            && opened_at.elapsed() >= self.config.open_timeout
        {
            core.state = CircuitState::HalfOpen;
            core.half_open_successes = 0;
            core.half_open_inflight = 0;
            self.record_transition(CircuitState::Open, CircuitState::HalfOpen);
        }
    }

    fn on_success(&self) {
        self.metrics.successes.fetch_add(1, Ordering::Relaxed);
        let mut core = self.core.lock().expect("breaker lock poisoned");
        core.counts.successes += 1;
        core.counts.consecutive_failures = 0;
        if core.state == CircuitState::HalfOpen {
            core.half_open_inflight = core.half_open_inflight.saturating_sub(1);
            core.half_open_successes += 1;
            if core.half_open_successes >= self.config.max_requests {
                core.state = CircuitState::Closed;
                core.counts = BreakerCounts::default();
                core.interval_started = Instant::now();
                core.opened_at = None;
                drop(core);
                self.record_transition(CircuitState::HalfOpen, CircuitState::Closed);
            }
        }
    }

    fn on_failure(&self) {
        self.metrics.failures.fetch_add(1, Ordering::Relaxed);
        let mut core = self.core.lock().expect("breaker lock poisoned");
        core.counts.failures += 1;
        core.counts.consecutive_failures += 1;
        match core.state {
            CircuitState::HalfOpen => {
                // Any probe failure reopens and restarts the timeout.
                core.half_open_inflight = core.half_open_inflight.saturating_sub(1);
                core.state = CircuitState::Open;
                core.opened_at = Some(Instant::now());
                drop(core);
                self.record_transition(CircuitState::HalfOpen, CircuitState::Open);
            }
            CircuitState::Closed => {
                let tripped = match &self.config.trip {
                    Some(trip) => trip(&core.counts),
                    None => BreakerConfig::default_trip(&core.counts),
                };
                if tripped {
                    core.state = CircuitState::Open;
                    core.opened_at = Some(Instant::now());
                    drop(core);
                    self.record_transition(CircuitState::Closed, CircuitState::Open);
                }
            }
            CircuitState::Open => {}
        }
    }

    fn record_transition(&self, from: CircuitState, to: CircuitState) {
        match to {
            CircuitState::Open => {
                self.metrics.to_open.fetch_add(1, Ordering::Relaxed);
                warn!(breaker = %self.name, %from, %to, "circuit breaker opened");
            }
            CircuitState::HalfOpen => {
                self.metrics.to_half_open.fetch_add(1, Ordering::Relaxed);
                debug!(breaker = %self.name, %from, %to, "circuit breaker half-open");
            }
            CircuitState::Closed => {
                self.metrics.to_closed.fetch_add(1, Ordering::Relaxed);
                debug!(breaker = %self.name, %from, %to, "circuit breaker closed");
            }
        }
        if let Some(listener) = &self.config.on_state_change {
            listener(&self.name, from, to);
        }
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}

/// Registry of named breakers; instances are created on first use and
/// never destroyed while referenced.
#[derive(Debug, Default)]
pub struct CircuitBreakers {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    default_config: BreakerConfig,
}

impl CircuitBreakers {
    /// Registry whose breakers use the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry whose breakers use `config` unless created explicitly.
    #[must_use]
    pub fn with_config(config: BreakerConfig) -> Self {
        Self {
            breakers: DashMap::new(),
            default_config: config,
        }
    }

    /// Returns the breaker registered under `name`, creating it with
    /// the registry default configuration on first use.
    pub fn get_or_create(&self, name: &str) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(name, self.default_config.clone())))
            .clone()
    }

    /// Creates or replaces a breaker with an explicit configuration.
    pub fn insert(&self, name: &str, config: BreakerConfig) -> Arc<CircuitBreaker> {
        let breaker = Arc::new(CircuitBreaker::new(name, config));
        self.breakers
            .insert(name.to_string(), Arc::clone(&breaker));
        breaker
    }

    /// Runs `f` under the breaker named `name`.
    pub fn execute<T, E>(
        &self,
        name: &str,
        f: impl FnOnce() -> Result<T, E>,
    ) -> Result<T, BreakerError<E>> {
        self.get_or_create(name).execute(f)
    }

    /// Context-aware variant of [`Self::execute`].
    pub fn execute_with_context<T, E>(
        &self,
        ctx: &CancelToken,
        name: &str,
        f: impl FnOnce() -> Result<T, E>,
    ) -> Result<T, BreakerError<E>> {
        self.get_or_create(name).execute_with_context(ctx, f)
    }

    /// Fallback variant of [`Self::execute`].
    pub fn execute_with_fallback<T, E>(
        &self,
        name: &str,
        f: impl FnOnce() -> Result<T, E>,
        fallback: impl FnOnce(&BreakerError<E>) -> Result<T, E>,
    ) -> Result<T, E> {
        self.get_or_create(name).execute_with_fallback(f, fallback)
    }

    /// State of the breaker named `name`, if it exists.
    #[must_use]
    pub fn state(&self, name: &str) -> Option<CircuitState> {
        self.breakers.get(name).map(|breaker| breaker.state())
    }

    /// Metrics for every named breaker.
    #[must_use]
    pub fn metrics(&self) -> HashMap<String, BreakerMetrics> {
        self.breakers
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().metrics()))
            .collect()
    }

    /// Resets one breaker back to CLOSED.
    pub fn reset(&self, name: &str) {
        if let Some(breaker) = self.breakers.get(name) {
            breaker.reset();
        }
    }

    /// Resets every breaker back to CLOSED.
    pub fn reset_all(&self) {
        for entry in self.breakers.iter() {
            entry.value().reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config() -> BreakerConfig {
        BreakerConfig {
            open_timeout: Duration::from_millis(50),
            interval: Duration::from_secs(30),
            max_requests: 2,
            trip: None,
            on_state_change: None,
        }
    }

    fn failing_call() -> Result<(), &'static str> {
        Err("boom")
    }

    #[test]
    fn test_closed_admits_and_counts() {
        let breaker = CircuitBreaker::new("test", fast_config());
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.execute(|| Ok::<_, &str>(42)).is_ok());
        let metrics = breaker.metrics();
        assert_eq!(metrics.executions, 1);
        assert_eq!(metrics.successes, 1);
    }

    #[test]
    fn test_trips_open_after_six_consecutive_failures() {
        let breaker = CircuitBreaker::new("test", fast_config());
        for i in 0..6 {
            let result = breaker.execute(failing_call);
            assert!(matches!(result, Err(BreakerError::Inner(_))), "call {i}");
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        // The seventh call is denied without invoking the closure.
        let mut invoked = false;
        let result = breaker.execute(|| {
            invoked = true;
            Ok::<_, &str>(())
        });
        assert!(matches!(result, Err(BreakerError::Open { .. })));
        assert!(!invoked);
    }

    #[test]
    fn test_failure_ratio_trips() {
        let breaker = CircuitBreaker::new("test", fast_config());
        // 5 successes, then 5 failures: 10 requests, ratio 0.5.
        for _ in 0..5 {
            let _ = breaker.execute(|| Ok::<_, &str>(()));
        }
        for _ in 0..5 {
            let _ = breaker.execute(failing_call);
        }
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[test]
    fn test_open_transitions_to_half_open_after_timeout() {
        let breaker = CircuitBreaker::new("test", fast_config());
        for _ in 0..6 {
            let _ = breaker.execute(failing_call);
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert!(breaker.execute(|| Ok::<_, &str>(())).is_ok());
    }

    #[test]
    fn test_half_open_closes_after_enough_successes() {
        let breaker = CircuitBreaker::new("test", fast_config());
        for _ in 0..6 {
            let _ = breaker.execute(failing_call);
        }
        std::thread::sleep(Duration::from_millis(60));

        // max_requests = 2 probe successes close the circuit.
        assert!(breaker.execute(|| Ok::<_, &str>(())).is_ok());
        assert!(breaker.execute(|| Ok::<_, &str>(())).is_ok());
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn test_half_open_failure_reopens() {
        let breaker = CircuitBreaker::new("test", fast_config());
        for _ in 0..6 {
            let _ = breaker.execute(failing_call);
        }
        std::thread::sleep(Duration::from_millis(60));

        let _ = breaker.execute(failing_call);
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[test]
    fn test_fallback_runs_on_failure_and_open() {
        let breaker = CircuitBreaker::new("test", fast_config());
        let result = breaker.execute_with_fallback(failing_call, |_| Ok(()));
        assert!(result.is_ok());

        for _ in 0..6 {
            let _ = breaker.execute(failing_call);
        }
        let result = breaker.execute_with_fallback(
            || Ok::<_, &str>(()),
            |err| {
                assert!(matches!(err, BreakerError::Open { .. }));
                Ok(())
            },
        );
        assert!(result.is_ok());

        let metrics = breaker.metrics();
        assert_eq!(metrics.fallbacks, 2);
        assert_eq!(metrics.fallback_successes, 2);
    }

    #[test]
    fn test_fallback_does_not_feed_trip_predicate() {
        let breaker = CircuitBreaker::new("test", fast_config());
        // Three real failures, each with a successful fallback: the
        // consecutive-failure count must still be 3, not reset.
        for _ in 0..3 {
            let _ = breaker.execute_with_fallback(failing_call, |_| Ok(()));
        }
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.metrics().failures, 3);
    }

    #[test]
    fn test_cancelled_context_skips_call() {
        let breaker = CircuitBreaker::new("test", fast_config());
        let ctx = CancelToken::new();
        ctx.cancel();
        let mut invoked = false;
        let result = breaker.execute_with_context(&ctx, || {
            invoked = true;
            Ok::<_, &str>(())
        });
        assert!(matches!(result, Err(BreakerError::Cancelled)));
        assert!(!invoked);
        assert_eq!(breaker.metrics().executions, 0);
    }

    #[test]
    fn test_reset_closes_the_circuit() {
        let breaker = CircuitBreaker::new("test", fast_config());
        for _ in 0..6 {
            let _ = breaker.execute(failing_call);
        }
        assert_eq!(breaker.state(), CircuitState::Open);
        breaker.reset();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.execute(|| Ok::<_, &str>(())).is_ok());
    }

    #[test]
    fn test_state_change_listener_fires() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let config = BreakerConfig {
            on_state_change: Some(Arc::new(move |name: &str, from, to| {
                sink.lock().unwrap().push((name.to_string(), from, to));
            })),
            ..fast_config()
        };
        let breaker = CircuitBreaker::new("observed", config);
        for _ in 0..6 {
            let _ = breaker.execute(failing_call);
        }
        let events = seen.lock().unwrap();
        assert_eq!(
            *events,
            vec![(
                "observed".to_string(),
                CircuitState::Closed,
                CircuitState::Open
            )]
        );
    }

    #[test]
    fn test_registry_creates_on_first_use() {
        let registry = CircuitBreakers::new();
        assert!(registry.state("absent").is_none());
        let _ = registry.execute("present", || Ok::<_, &str>(()));
        assert_eq!(registry.state("present"), Some(CircuitState::Closed));
        assert_eq!(registry.metrics().len(), 1);
    }

    #[test]
    fn test_registry_shares_instances_by_name() {
        let registry = CircuitBreakers::new();
        let a = registry.get_or_create("shared");
        let b = registry.get_or_create("shared");
        assert!(Arc::ptr_eq(&a, &b));
    }
}
