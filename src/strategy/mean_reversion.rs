//! Mean-reversion signal engine: rolling window statistics on one
//! symbol's price, entry and exit by z-score bands.

use super::contract::{MarketDataEvent, Strategy, StrategyError};
use super::gateway::{OrderSubmitter, StrategyOrder};
use super::position::Position;
use crate::orderbook::{OrderId, OrderStatus, OrderUpdateEvent, Side};
use crate::resilience::CancelToken;
use crate::stats::IncrementalStatistics;
use crate::utils::monotonic_nanos;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Mean-reversion configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeanReversionConfig {
    /// Symbol the strategy trades
    pub symbol: String,
    /// Rolling window length in ticks
    pub lookback: usize,
    /// |z| at which a position is opened
    pub entry_threshold: f64,
    /// |z| band inside which a position is closed
    pub exit_threshold: f64,
    /// Minimum time between signal evaluations
    pub update_interval: Duration,
    /// Quantity per entry order
    pub order_quantity: f64,
    /// Display-price units per minimum price increment, used to read
    /// fill prices off order updates
    pub price_scale: f64,
}

impl Default for MeanReversionConfig {
    fn default() -> Self {
        Self {
            symbol: String::new(),
            lookback: 20,
            entry_threshold: 2.0,
            exit_threshold: 0.5,
            update_interval: Duration::from_secs(1),
            order_quantity: 1.0,
            price_scale: 1.0,
        }
    }
}

/// A signal waiting for its fill confirmation.
#[derive(Debug, Clone, Copy)]
struct PendingSignal {
    order_id: OrderId,
    side: Side,
}

#[derive(Debug, Default)]
struct State {
    window: VecDeque<f64>,
    stats: IncrementalStatistics,
    position: Position,
    pending: Option<PendingSignal>,
    last_eval_ns: u64,
}

/// Rolling-statistics mean-reversion strategy.
///
/// The per-instance mutex around [`State`] totally orders
/// `on_market_data` calls, which is the FIFO discipline the runtime
/// does not provide across ticks. Positions change only on a FILLED
/// confirmation arriving through `on_order_update`; until then at most
/// one signal is outstanding.
pub struct MeanReversionStrategy {
    name: String,
    config: MeanReversionConfig,
    submitter: Arc<dyn OrderSubmitter>,
    running: AtomicBool,
    state: Mutex<State>,
    signals_emitted: AtomicU64,
    fills_confirmed: AtomicU64,
}

impl MeanReversionStrategy {
    /// Creates a named strategy instance.
    pub fn new(
        name: &str,
        config: MeanReversionConfig,
        submitter: Arc<dyn OrderSubmitter>,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            config,
            submitter,
            running: AtomicBool::new(false),
            state: Mutex::new(State::default()),
            signals_emitted: AtomicU64::new(0),
            fills_confirmed: AtomicU64::new(0),
        })
    }

    /// Current signed position quantity.
    #[must_use]
    pub fn position(&self) -> f64 {
        self.state.lock().expect("strategy lock poisoned").position.quantity
    }

    fn evaluate(&self, state: &mut State, price: f64) -> Option<Side> {
        let z = state.stats.z_score(price);
        let position = state.position.quantity;
        debug!(strategy = %self.name, price, z, position, "mean reversion evaluated");

        if position > 0.0 && z > -self.config.exit_threshold {
            return Some(Side::Sell);
        }
        if position < 0.0 && z < self.config.exit_threshold {
            return Some(Side::Buy);
        }
        if z < -self.config.entry_threshold && position <= 0.0 {
            return Some(Side::Buy);
        }
        if z > self.config.entry_threshold && position >= 0.0 {
            return Some(Side::Sell);
        }
        None
    }

    fn emit(&self, state: &mut State, side: Side, price: f64) {
        let quantity = if state.position.is_open() && side != initial_side(state.position.quantity)
        {
            // Closing: flatten the open quantity.
            state.position.quantity.abs()
        } else {
            self.config.order_quantity
        };

        let order = StrategyOrder::market(&self.config.symbol, side, quantity, price);
        match self.submitter.submit(&order) {
            Ok(response) => {
                self.signals_emitted.fetch_add(1, Ordering::Relaxed);
                state.pending = Some(PendingSignal {
                    order_id: response.order_id,
                    side,
                });
                info!(
                    strategy = %self.name,
                    side = %side,
                    quantity,
                    order_id = %response.order_id,
                    "mean reversion signal emitted"
                );
            }
            Err(err) => {
                warn!(strategy = %self.name, error = %err, "signal submission failed");
            }
        }
    }
}

#[inline]
fn initial_side(quantity: f64) -> Side {
    if quantity > 0.0 { Side::Buy } else { Side::Sell }
}

impl Strategy for MeanReversionStrategy {
    fn name(&self) -> &str {
        &self.name
    }

    fn initialize(&self, _ctx: &CancelToken) -> Result<(), StrategyError> {
        if self.config.symbol.is_empty() {
            return Err(StrategyError::Config("symbol must be set".to_string()));
        }
        if self.config.lookback < 2 {
            return Err(StrategyError::Config(
                "lookback must be at least 2".to_string(),
            ));
        }
        if self.config.entry_threshold <= self.config.exit_threshold {
            return Err(StrategyError::Config(
                "entry threshold must exceed exit threshold".to_string(),
            ));
        }
        let mut state = self.state.lock().expect("strategy lock poisoned");
        state.position = Position::new(&self.config.symbol);
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
        ctx: &CancelToken,
        tick: &MarketDataEvent,
    ) -> Result<(), StrategyError> {
        if !self.is_running() {
            return Err(StrategyError::NotRunning);
        }
        if ctx.is_cancelled() || tick.symbol != self.config.symbol {
            return Ok(());
        }

        // Per-instance serialization: total order across ticks.
        let mut state = self.state.lock().expect("strategy lock poisoned");

        if state.window.len() == self.config.lookback {
            let oldest = state.window.pop_front().unwrap_or(tick.price);
            state.window.push_back(tick.price);
            state.stats.update(oldest, tick.price);
        } else {
            state.window.push_back(tick.price);
            state.stats.add(tick.price);
        }
        state.position.mark_to(tick.price);

        let now = monotonic_nanos();
        let interval_ns = self.config.update_interval.as_nanos() as u64;
        if state.window.len() < self.config.lookback
            || now.saturating_sub(state.last_eval_ns) < interval_ns
        {
            return Ok(());
        }
        state.last_eval_ns = now;

        // One outstanding signal at a time: wait for the confirmation.
        if state.pending.is_some() {
            return Ok(());
        }

        if let Some(side) = self.evaluate(&mut state, tick.price) {
            self.emit(&mut state, side, tick.price);
        }
        Ok(())
    }

    fn on_order_update(
        &self,
        _ctx: &CancelToken,
        update: &OrderUpdateEvent,
    ) -> Result<(), StrategyError> {
        if update.symbol != self.config.symbol {
            return Ok(());
        }
        let mut state = self.state.lock().expect("strategy lock poisoned");
        let Some(pending) = state.pending else {
            return Ok(());
        };
        if update.order_id != pending.order_id {
            return Ok(());
        }

        match update.status {
            OrderStatus::Filled => {
                let scale = if self.config.price_scale > 0.0 {
                    self.config.price_scale
                } else {
                    1.0
                };
                let price = update
                    .last_fill_price
                    .map(|p| p as f64 / scale)
                    .unwrap_or(state.position.mark);
                state.position.apply_fill(
                    pending.side,
                    update.filled_quantity as f64,
                    price,
                    monotonic_nanos(),
                );
                state.pending = None;
                self.fills_confirmed.fetch_add(1, Ordering::Relaxed);
                info!(
                    strategy = %self.name,
                    position = state.position.quantity,
                    "fill confirmed"
                );
            }
            OrderStatus::Cancelled | OrderStatus::Rejected => {
                // The signal may fire again on the next evaluation.
                state.pending = None;
            }
            OrderStatus::New | OrderStatus::PartiallyFilled => {}
        }
        Ok(())
    }

    fn metrics(&self) -> serde_json::Value {
        let state = self.state.lock().expect("strategy lock poisoned");
        serde_json::json!({
            "name": self.name,
            "symbol": self.config.symbol,
            "running": self.is_running(),
            "window_fill": state.window.len(),
            "lookback": self.config.lookback,
            "position": state.position.quantity,
            "realized_pnl": state.position.realized_pnl,
            "signals_emitted": self.signals_emitted.load(Ordering::Relaxed),
            "fills_confirmed": self.fills_confirmed.load(Ordering::Relaxed),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::OrderResponse;
    use uuid::Uuid;

    /// Submitter that records orders and confirms them with fixed ids.
    #[derive(Default)]
    struct RecordingSubmitter {
        orders: Mutex<Vec<StrategyOrder>>,
    }

    impl RecordingSubmitter {
        fn orders(&self) -> Vec<StrategyOrder> {
            self.orders.lock().unwrap().clone()
        }
    }

    impl OrderSubmitter for RecordingSubmitter {
        fn submit(&self, order: &StrategyOrder) -> Result<OrderResponse, StrategyError> {
            self.orders.lock().unwrap().push(order.clone());
            Ok(OrderResponse {
                order_id: Uuid::new_v4(),
                status: OrderStatus::New,
                filled_quantity: 0,
                avg_fill_price: None,
                reject_reason: None,
            })
        }
    }

    fn strategy(
        submitter: Arc<RecordingSubmitter>,
    ) -> Arc<MeanReversionStrategy> {
        let config = MeanReversionConfig {
            symbol: "BTC/USD".to_string(),
            lookback: 20,
            entry_threshold: 2.0,
            exit_threshold: 0.5,
            update_interval: Duration::ZERO,
            order_quantity: 1.0,
            price_scale: 1.0,
        };
        let strategy = MeanReversionStrategy::new("mr-test", config, submitter);
        let ctx = CancelToken::new();
        strategy.initialize(&ctx).unwrap();
        strategy.start(&ctx).unwrap();
        strategy
    }

    fn tick(price: f64) -> MarketDataEvent {
        MarketDataEvent::new("BTC/USD", price, 0)
    }

    #[test]
    fn test_no_signal_while_window_fills() {
        let submitter = Arc::new(RecordingSubmitter::default());
        let strategy = strategy(Arc::clone(&submitter));
        let ctx = CancelToken::new();

        for i in 0..19 {
            strategy
                .on_market_data(&ctx, &tick(100.0 + (i % 3) as f64 * 0.1))
                .unwrap();
        }
        assert!(submitter.orders().is_empty());
    }

    #[test]
    fn test_spike_emits_sell_exactly_once_until_confirmed() {
        let submitter = Arc::new(RecordingSubmitter::default());
        let strategy = strategy(Arc::clone(&submitter));
        let ctx = CancelToken::new();

        // Fill the window with slightly noisy prices around 100 so the
        // standard deviation is positive but small.
        for i in 0..20 {
            let noise = if i % 2 == 0 { 0.01 } else { -0.01 };
            strategy.on_market_data(&ctx, &tick(100.0 + noise)).unwrap();
        }
        assert!(submitter.orders().is_empty());

        // A spike far above the window mean: strong positive z.
        strategy.on_market_data(&ctx, &tick(110.0)).unwrap();
        let orders = submitter.orders();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].side, Side::Sell);

        // More spikes while the signal is pending: no duplicates.
        strategy.on_market_data(&ctx, &tick(111.0)).unwrap();
        strategy.on_market_data(&ctx, &tick(112.0)).unwrap();
        assert_eq!(submitter.orders().len(), 1);
    }

    #[test]
    fn test_fill_confirmation_updates_position() {
        let submitter = Arc::new(RecordingSubmitter::default());
        let strategy = strategy(Arc::clone(&submitter));
        let ctx = CancelToken::new();

        for i in 0..20 {
            let noise = if i % 2 == 0 { 0.01 } else { -0.01 };
            strategy.on_market_data(&ctx, &tick(100.0 + noise)).unwrap();
        }
        strategy.on_market_data(&ctx, &tick(110.0)).unwrap();

        let pending_id = strategy
            .state
            .lock()
            .unwrap()
            .pending
            .expect("signal must be pending")
            .order_id;

        strategy
            .on_order_update(
                &ctx,
                &OrderUpdateEvent {
                    order_id: pending_id,
                    client_order_id: None,
                    symbol: "BTC/USD".to_string(),
                    side: Side::Sell,
                    status: OrderStatus::Filled,
                    filled_quantity: 1,
                    last_fill_quantity: 1,
                    last_fill_price: Some(110),
                },
            )
            .unwrap();

        assert_eq!(strategy.position(), -1.0);
    }

    #[test]
    fn test_rejection_clears_pending_signal() {
        let submitter = Arc::new(RecordingSubmitter::default());
        let strategy = strategy(Arc::clone(&submitter));
        let ctx = CancelToken::new();

        for i in 0..20 {
            let noise = if i % 2 == 0 { 0.01 } else { -0.01 };
            strategy.on_market_data(&ctx, &tick(100.0 + noise)).unwrap();
        }
        strategy.on_market_data(&ctx, &tick(110.0)).unwrap();
        let pending_id = strategy.state.lock().unwrap().pending.unwrap().order_id;

        strategy
            .on_order_update(
                &ctx,
                &OrderUpdateEvent {
                    order_id: pending_id,
                    client_order_id: None,
                    symbol: "BTC/USD".to_string(),
                    side: Side::Sell,
                    status: OrderStatus::Rejected,
                    filled_quantity: 0,
                    last_fill_quantity: 0,
                    last_fill_price: None,
                },
            )
            .unwrap();

        // The next spike may signal again.
        strategy.on_market_data(&ctx, &tick(111.0)).unwrap();
        assert_eq!(submitter.orders().len(), 2);
    }

    #[test]
    fn test_ignores_other_symbols() {
        let submitter = Arc::new(RecordingSubmitter::default());
        let strategy = strategy(Arc::clone(&submitter));
        let ctx = CancelToken::new();

        for _ in 0..25 {
            strategy
                .on_market_data(&ctx, &MarketDataEvent::new("ETH/USD", 100.0, 0))
                .unwrap();
        }
        assert_eq!(strategy.metrics()["window_fill"], 0);
    }

    #[test]
    fn test_not_running_is_an_error() {
        let submitter = Arc::new(RecordingSubmitter::default());
        let strategy = strategy(Arc::clone(&submitter));
        let ctx = CancelToken::new();
        strategy.stop(&ctx).unwrap();

        let result = strategy.on_market_data(&ctx, &tick(100.0));
        assert!(matches!(result, Err(StrategyError::NotRunning)));
    }

    #[test]
    fn test_invalid_config_fails_initialize() {
        let submitter: Arc<dyn OrderSubmitter> = Arc::new(RecordingSubmitter::default());
        let config = MeanReversionConfig {
            symbol: "BTC/USD".to_string(),
            entry_threshold: 0.4,
            exit_threshold: 0.5,
            ..MeanReversionConfig::default()
        };
        let strategy = MeanReversionStrategy::new("bad", config, submitter);
        let result = strategy.initialize(&CancelToken::new());
        assert!(matches!(result, Err(StrategyError::Config(_))));
    }
}
