//! Dispatch-order, failure-isolation and wiring tests for the
//! strategy runtime.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tradecore_rs::prelude::*;

/// Strategy that records invocations into a shared log and optionally
/// fails every call.
struct ProbeStrategy {
    name: String,
    running: AtomicBool,
    log: Arc<Mutex<Vec<String>>>,
    fail: bool,
}

impl ProbeStrategy {
    fn new(name: &str, log: Arc<Mutex<Vec<String>>>, fail: bool) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            running: AtomicBool::new(false),
            log,
            fail,
        })
    }
}

impl Strategy for ProbeStrategy {
    fn name(&self) -> &str {
        &self.name
    }

    fn initialize(&self, _ctx: &CancelToken) -> Result<(), StrategyError> {
        Ok(())
    }

    fn start(&self, _ctx: &CancelToken) -> Result<(), StrategyError> {
        self.running.store(true, Ordering::Release);
        Ok(())
    }

    fn stop(&self, _ctx: &CancelToken) -> Result<(), StrategyError> {
        self.running.store(false, Ordering::Release);
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn on_market_data(
        &self,
        _ctx: &CancelToken,
        _tick: &MarketDataEvent,
    ) -> Result<(), StrategyError> {
        self.log.lock().unwrap().push(self.name.clone());
        if self.fail {
            Err(StrategyError::Internal("probe failure".to_string()))
        } else {
            Ok(())
        }
    }

    fn on_order_update(
        &self,
        _ctx: &CancelToken,
        _update: &OrderUpdateEvent,
    ) -> Result<(), StrategyError> {
        self.log.lock().unwrap().push(format!("{}:update", self.name));
        Ok(())
    }

    fn metrics(&self) -> serde_json::Value {
        serde_json::json!({ "name": self.name })
    }
}

fn wait_until(deadline: Duration, predicate: impl Fn() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < deadline {
        if predicate() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    predicate()
}

fn tick() -> MarketDataEvent {
    MarketDataEvent::new("FX", 100.0, 1)
}

#[test]
fn test_dispatch_follows_priority_order() {
    let runtime = StrategyRuntime::with_defaults();
    let log = Arc::new(Mutex::new(Vec::new()));
    let ctx = CancelToken::new();

    // Registered out of priority order on purpose.
    let low = ProbeStrategy::new("s-low", Arc::clone(&log), false);
    let high = ProbeStrategy::new("s-high", Arc::clone(&log), false);
    runtime.register_strategy(low, 10).unwrap();
    runtime.register_strategy(high, 0).unwrap();
    runtime.start_strategy(&ctx, "s-low").unwrap();
    runtime.start_strategy(&ctx, "s-high").unwrap();

    runtime.process_market_data(&ctx, tick()).unwrap();

    assert!(wait_until(Duration::from_secs(2), || {
        log.lock().unwrap().len() == 2
    }));
    assert_eq!(
        *log.lock().unwrap(),
        vec!["s-high".to_string(), "s-low".to_string()]
    );
}

#[test]
fn test_failure_does_not_prevent_later_strategies() {
    let runtime = StrategyRuntime::with_defaults();
    let log = Arc::new(Mutex::new(Vec::new()));
    let ctx = CancelToken::new();

    let failing = ProbeStrategy::new("s-failing", Arc::clone(&log), true);
    let healthy = ProbeStrategy::new("s-healthy", Arc::clone(&log), false);
    runtime.register_strategy(failing, 0).unwrap();
    runtime.register_strategy(healthy, 10).unwrap();
    runtime.start_strategy(&ctx, "s-failing").unwrap();
    runtime.start_strategy(&ctx, "s-healthy").unwrap();

    runtime.process_market_data(&ctx, tick()).unwrap();

    assert!(wait_until(Duration::from_secs(2), || {
        log.lock().unwrap().len() == 2
    }));
    assert_eq!(
        *log.lock().unwrap(),
        vec!["s-failing".to_string(), "s-healthy".to_string()]
    );

    // The failure was recorded against the failing strategy's breaker.
    let metrics = runtime.metrics();
    let breaker = metrics
        .breakers
        .get("strategy-market-data-s-failing")
        .expect("breaker must exist");
    assert_eq!(breaker.failures, 1);
    assert_eq!(breaker.fallbacks, 1);
}

#[test]
fn test_stopped_strategies_are_skipped() {
    let runtime = StrategyRuntime::with_defaults();
    let log = Arc::new(Mutex::new(Vec::new()));
    let ctx = CancelToken::new();

    let active = ProbeStrategy::new("s-active", Arc::clone(&log), false);
    let dormant = ProbeStrategy::new("s-dormant", Arc::clone(&log), false);
    runtime.register_strategy(active, 0).unwrap();
    runtime.register_strategy(dormant, 1).unwrap();
    runtime.start_strategy(&ctx, "s-active").unwrap();

    runtime.process_market_data(&ctx, tick()).unwrap();

    assert!(wait_until(Duration::from_secs(2), || {
        !log.lock().unwrap().is_empty()
    }));
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(*log.lock().unwrap(), vec!["s-active".to_string()]);
}

#[test]
fn test_cancelled_context_skips_dispatch() {
    let runtime = StrategyRuntime::with_defaults();
    let log = Arc::new(Mutex::new(Vec::new()));
    let ctx = CancelToken::new();

    let probe = ProbeStrategy::new("s-probe", Arc::clone(&log), false);
    runtime.register_strategy(probe, 0).unwrap();
    runtime.start_strategy(&ctx, "s-probe").unwrap();

    let cancelled = CancelToken::new();
    cancelled.cancel();
    runtime.process_market_data(&cancelled, tick()).unwrap();

    std::thread::sleep(Duration::from_millis(100));
    assert!(log.lock().unwrap().is_empty());
}

#[test]
fn test_counters_and_latency_metrics() {
    let runtime = StrategyRuntime::with_defaults();
    let log = Arc::new(Mutex::new(Vec::new()));
    let ctx = CancelToken::new();

    let probe = ProbeStrategy::new("s-metrics", Arc::clone(&log), false);
    runtime.register_strategy(probe, 0).unwrap();
    runtime.start_strategy(&ctx, "s-metrics").unwrap();

    for _ in 0..3 {
        runtime.process_market_data(&ctx, tick()).unwrap();
    }
    assert!(wait_until(Duration::from_secs(2), || {
        log.lock().unwrap().len() == 3
    }));

    let metrics = runtime.metrics();
    assert_eq!(metrics.market_data_processed, 3);
    let dispatch = metrics
        .strategies
        .iter()
        .find(|s| s.name == "s-metrics")
        .expect("dispatch metrics must exist");
    assert_eq!(dispatch.invocations, 3);
}

#[test]
fn test_order_update_dispatch() {
    let runtime = StrategyRuntime::with_defaults();
    let log = Arc::new(Mutex::new(Vec::new()));
    let ctx = CancelToken::new();

    let probe = ProbeStrategy::new("s-updates", Arc::clone(&log), false);
    runtime.register_strategy(probe, 0).unwrap();
    runtime.start_strategy(&ctx, "s-updates").unwrap();

    let update = OrderUpdateEvent {
        order_id: uuid::Uuid::new_v4(),
        client_order_id: None,
        symbol: "FX".to_string(),
        side: Side::Buy,
        status: OrderStatus::Filled,
        filled_quantity: 1,
        last_fill_quantity: 1,
        last_fill_price: Some(100),
    };
    runtime.process_order_update(&ctx, update).unwrap();

    assert!(wait_until(Duration::from_secs(2), || {
        log.lock().unwrap().contains(&"s-updates:update".to_string())
    }));
    assert_eq!(runtime.metrics().order_updates_processed, 1);
}

#[test]
fn test_engine_update_pump_reaches_strategies() {
    let engine = MatchingEngine::new(EngineConfig {
        cleanup_interval: Duration::from_secs(3600),
        ..EngineConfig::default()
    });
    let runtime = StrategyRuntime::with_defaults();
    let log = Arc::new(Mutex::new(Vec::new()));
    let ctx = CancelToken::new();

    let probe = ProbeStrategy::new("s-pumped", Arc::clone(&log), false);
    runtime.register_strategy(probe, 0).unwrap();
    runtime.start_strategy(&ctx, "s-pumped").unwrap();

    let pump = runtime.spawn_order_update_pump(ctx.clone(), engine.order_updates());

    engine
        .place_order(&OrderRequest::limit("FX", Side::Buy, 100, 1, "a"))
        .unwrap();

    assert!(wait_until(Duration::from_secs(2), || {
        !log.lock().unwrap().is_empty()
    }));

    ctx.cancel();
    pump.join().unwrap();
}

#[test]
fn test_duplicate_registration_conflicts() {
    let runtime = StrategyRuntime::with_defaults();
    let log = Arc::new(Mutex::new(Vec::new()));

    let first = ProbeStrategy::new("s-same", Arc::clone(&log), false);
    let second = ProbeStrategy::new("s-same", Arc::clone(&log), false);
    runtime.register_strategy(first, 0).unwrap();
    assert!(runtime.register_strategy(second, 0).is_err());
}
