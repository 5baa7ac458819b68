//! Statistical arbitrage on a two-symbol pair spread.
//!
//! The spread `p1 − ratio·p2` is tracked with rolling statistics and an
//! online correlation; positions enter when the spread's z-score leaves
//! the entry band and exit when it reverts. Pair state and statistics
//! samples are persisted through the repository interfaces; a
//! repository failure is logged and the in-memory decision stands.

use super::contract::{MarketDataEvent, Strategy, StrategyError};
use super::gateway::{OrderSubmitter, StrategyOrder};
use super::position::{PairDirection, PairPosition};
use super::repository::{
    PairPositionRepository, PairRecord, PairRepository, PairStatisticsRecord,
    PairStatisticsRepository,
};
use crate::orderbook::{OrderUpdateEvent, Side};
use crate::resilience::CancelToken;
use crate::stats::{IncrementalCorrelation, IncrementalStatistics};
use crate::utils::monotonic_nanos;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Stat-arb configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatArbConfig {
    /// First leg symbol
    pub symbol1: String,
    /// Second leg symbol
    pub symbol2: String,
    /// Hedge ratio applied to the second leg
    pub ratio: f64,
    /// Rolling window length in paired observations
    pub lookback: usize,
    /// |z| at which a pair position opens
    pub z_entry: f64,
    /// |z| band at which a pair position closes
    pub z_exit: f64,
    /// First-leg quantity per position; the second leg is scaled by
    /// `ratio`
    pub position_size: f64,
    /// Maximum simultaneously open pair positions
    pub max_positions: usize,
    /// Minimum time between persisted statistics samples
    pub update_interval: Duration,
}

impl Default for StatArbConfig {
    fn default() -> Self {
        Self {
            symbol1: String::new(),
            symbol2: String::new(),
            ratio: 1.0,
            lookback: 60,
            z_entry: 2.0,
            z_exit: 0.5,
            position_size: 1.0,
            max_positions: 1,
            update_interval: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Default)]
struct State {
    last1: Option<f64>,
    last2: Option<f64>,
    spread_window: VecDeque<f64>,
    pair_window: VecDeque<(f64, f64)>,
    spread_stats: IncrementalStatistics,
    correlation: IncrementalCorrelation,
    open: Vec<PairPosition>,
    pair: Option<PairRecord>,
    last_persist_ns: u64,
}

/// Pair-spread mean-reversion strategy with persisted pair state.
pub struct StatArbStrategy {
    name: String,
    config: StatArbConfig,
    submitter: Arc<dyn OrderSubmitter>,
    pair_repo: Arc<dyn PairRepository>,
    stats_repo: Arc<dyn PairStatisticsRepository>,
    position_repo: Arc<dyn PairPositionRepository>,
    running: AtomicBool,
    state: Mutex<State>,
    positions_opened: AtomicU64,
    positions_closed: AtomicU64,
}

impl StatArbStrategy {
    /// Creates a named strategy instance wired to its repositories.
    pub fn new(
        name: &str,
        config: StatArbConfig,
        submitter: Arc<dyn OrderSubmitter>,
        pair_repo: Arc<dyn PairRepository>,
        stats_repo: Arc<dyn PairStatisticsRepository>,
        position_repo: Arc<dyn PairPositionRepository>,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            config,
            submitter,
            pair_repo,
            stats_repo,
            position_repo,
            running: AtomicBool::new(false),
            state: Mutex::new(State::default()),
            positions_opened: AtomicU64::new(0),
            positions_closed: AtomicU64::new(0),
        })
    }

    /// Number of currently open pair positions.
    #[must_use]
    pub fn open_positions(&self) -> usize {
        self.state.lock().expect("strategy lock poisoned").open.len()
    }

    fn persist_statistics(&self, ctx: &CancelToken, state: &mut State, z: f64) {
        let now = monotonic_nanos();
        let interval_ns = self.config.update_interval.as_nanos() as u64;
        if now.saturating_sub(state.last_persist_ns) < interval_ns {
            return;
        }
        state.last_persist_ns = now;

        let Some(pair) = state.pair.as_mut() else {
            return;
        };
        pair.last_zscore = z;
        pair.updated_ns = now;

        let sample = PairStatisticsRecord {
            pair_id: pair.id,
            correlation: state.correlation.correlation(),
            spread_mean: state.spread_stats.mean(),
            spread_std_dev: state.spread_stats.std_dev(),
            zscore: z,
            timestamp_ns: now,
        };
        if let Err(err) = self.stats_repo.create(ctx, &sample) {
            warn!(strategy = %self.name, error = %err, "pair statistics persistence failed");
        }
        if let Err(err) = self.pair_repo.update(ctx, pair) {
            warn!(strategy = %self.name, error = %err, "pair update failed");
        }
    }

    /// Closes every open position whose exit band the z-score crossed.
    fn run_exits(&self, ctx: &CancelToken, state: &mut State, z: f64, p1: f64, p2: f64) {
        let mut index = 0;
        while index < state.open.len() {
            let exits = match state.open[index].direction {
                PairDirection::Long => z >= -self.config.z_exit,
                PairDirection::Short => z <= self.config.z_exit,
            };
            if !exits {
                index += 1;
                continue;
            }

            let mut position = state.open.remove(index);
            // Reverse both legs.
            let leg1 = StrategyOrder::market(
                &self.config.symbol1,
                if position.quantity1 > 0.0 {
                    Side::Sell
                } else {
                    Side::Buy
                },
                position.quantity1.abs(),
                p1,
            );
            let leg2 = StrategyOrder::market(
                &self.config.symbol2,
                if position.quantity2 > 0.0 {
                    Side::Sell
                } else {
                    Side::Buy
                },
                position.quantity2.abs(),
                p2,
            );
            if let Err(err) = self.submitter.submit(&leg1) {
                warn!(strategy = %self.name, error = %err, "exit leg 1 failed, keeping position");
                state.open.insert(index, position);
                index += 1;
                continue;
            }
            if let Err(err) = self.submitter.submit(&leg2) {
                warn!(strategy = %self.name, error = %err, "exit leg 2 failed");
            }

            let pnl = position.close(p1, p2, monotonic_nanos());
            self.positions_closed.fetch_add(1, Ordering::Relaxed);
            info!(
                strategy = %self.name,
                position_id = %position.id,
                z,
                pnl,
                "pair position closed"
            );
            if let Err(err) = self.position_repo.update(ctx, &position) {
                warn!(strategy = %self.name, error = %err, "closed position persistence failed");
            }
        }
    }

    fn try_enter(&self, ctx: &CancelToken, state: &mut State, z: f64, spread: f64, p1: f64, p2: f64) {
        if state.open.len() >= self.config.max_positions {
            return;
        }
        let Some(pair_id) = state.pair.as_ref().map(|pair| pair.id) else {
            return;
        };
        let direction = if z <= -self.config.z_entry {
            PairDirection::Long
        } else if z >= self.config.z_entry {
            PairDirection::Short
        } else {
            return;
        };

        let quantity1 = self.config.position_size;
        let quantity2 = self.config.position_size * self.config.ratio;
        let (side1, side2, signed1, signed2) = match direction {
            PairDirection::Long => (Side::Buy, Side::Sell, quantity1, -quantity2),
            PairDirection::Short => (Side::Sell, Side::Buy, -quantity1, quantity2),
        };

        if let Err(err) = self
            .submitter
            .submit(&StrategyOrder::market(&self.config.symbol1, side1, quantity1, p1))
        {
            warn!(strategy = %self.name, error = %err, "entry leg 1 failed");
            return;
        }
        if let Err(err) = self
            .submitter
            .submit(&StrategyOrder::market(&self.config.symbol2, side2, quantity2, p2))
        {
            // Flatten the first leg rather than carry an unhedged one.
            warn!(strategy = %self.name, error = %err, "entry leg 2 failed, flattening leg 1");
            let unwind =
                StrategyOrder::market(&self.config.symbol1, side1.opposite(), quantity1, p1);
            if let Err(err) = self.submitter.submit(&unwind) {
                warn!(strategy = %self.name, error = %err, "leg 1 unwind failed");
            }
            return;
        }

        let position = PairPosition {
            id: Uuid::new_v4(),
            pair_id,
            symbol1: self.config.symbol1.clone(),
            symbol2: self.config.symbol2.clone(),
            quantity1: signed1,
            quantity2: signed2,
            entry_price1: p1,
            entry_price2: p2,
            entry_spread: spread,
            entry_zscore: z,
            direction,
            opened_ns: monotonic_nanos(),
            closed_ns: None,
            realized_pnl: 0.0,
        };
        self.positions_opened.fetch_add(1, Ordering::Relaxed);
        info!(
            strategy = %self.name,
            position_id = %position.id,
            ?direction,
            z,
            spread,
            "pair position opened"
        );
        if let Err(err) = self.position_repo.create(ctx, &position) {
            warn!(strategy = %self.name, error = %err, "position persistence failed");
        }
        state.open.push(position);
    }
}

impl Strategy for StatArbStrategy {
    fn name(&self) -> &str {
        &self.name
    }

    fn initialize(&self, ctx: &CancelToken) -> Result<(), StrategyError> {
        if self.config.symbol1.is_empty() || self.config.symbol2.is_empty() {
            return Err(StrategyError::Config(
                "both pair symbols must be set".to_string(),
            ));
        }
        if self.config.symbol1 == self.config.symbol2 {
            return Err(StrategyError::Config(
                "pair symbols must differ".to_string(),
            ));
        }
        if self.config.lookback < 2 {
            return Err(StrategyError::Config(
                "lookback must be at least 2".to_string(),
            ));
        }
        if self.config.ratio <= 0.0 {
            return Err(StrategyError::Config(
                "ratio must be positive".to_string(),
            ));
        }

        let mut state = self.state.lock().expect("strategy lock poisoned");
        let pair = match self
            .pair_repo
            .get(ctx, &self.config.symbol1, &self.config.symbol2)
        {
            Ok(Some(pair)) => pair,
            Ok(None) => {
                let pair = PairRecord {
                    id: Uuid::new_v4(),
                    symbol1: self.config.symbol1.clone(),
                    symbol2: self.config.symbol2.clone(),
                    ratio: self.config.ratio,
                    last_zscore: 0.0,
                    updated_ns: monotonic_nanos(),
                };
                if let Err(err) = self.pair_repo.update(ctx, &pair) {
                    warn!(strategy = %self.name, error = %err, "pair creation persistence failed");
                }
                pair
            }
            Err(err) => {
                warn!(strategy = %self.name, error = %err, "pair lookup failed, starting fresh");
                PairRecord {
                    id: Uuid::new_v4(),
                    symbol1: self.config.symbol1.clone(),
                    symbol2: self.config.symbol2.clone(),
                    ratio: self.config.ratio,
                    last_zscore: 0.0,
                    updated_ns: monotonic_nanos(),
                }
            }
        };
        match self.position_repo.get_open(ctx, pair.id) {
            Ok(open) => state.open = open,
            Err(err) => {
                warn!(strategy = %self.name, error = %err, "open position recovery failed");
            }
        }
        state.pair = Some(pair);
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
        if ctx.is_cancelled() {
            return Ok(());
        }

        // Per-instance serialization mutex.
        let mut state = self.state.lock().expect("strategy lock poisoned");

        if tick.symbol == self.config.symbol1 {
            state.last1 = Some(tick.price);
        } else if tick.symbol == self.config.symbol2 {
            state.last2 = Some(tick.price);
        } else {
            return Ok(());
        }
        let (Some(p1), Some(p2)) = (state.last1, state.last2) else {
            return Ok(());
        };

        let spread = p1 - self.config.ratio * p2;
        if state.spread_window.len() == self.config.lookback {
            let old_spread = state.spread_window.pop_front().unwrap_or(spread);
            let (old_p1, old_p2) = state.pair_window.pop_front().unwrap_or((p1, p2));
            state.spread_window.push_back(spread);
            state.pair_window.push_back((p1, p2));
            state.spread_stats.update(old_spread, spread);
            state.correlation.update(old_p1, old_p2, p1, p2);
        } else {
            state.spread_window.push_back(spread);
            state.pair_window.push_back((p1, p2));
            state.spread_stats.add(spread);
            state.correlation.add(p1, p2);
        }

        if state.spread_window.len() < self.config.lookback {
            return Ok(());
        }

        let z = state.spread_stats.z_score(spread);
        debug!(strategy = %self.name, spread, z, "pair spread evaluated");
        self.persist_statistics(ctx, &mut state, z);
        self.run_exits(ctx, &mut state, z, p1, p2);
        self.try_enter(ctx, &mut state, z, spread, p1, p2);
        Ok(())
    }

    fn on_order_update(
        &self,
        _ctx: &CancelToken,
        _update: &OrderUpdateEvent,
    ) -> Result<(), StrategyError> {
        // Pair accounting is done at submission time; fills only
        // confirm what the legs already recorded.
        Ok(())
    }

    fn metrics(&self) -> serde_json::Value {
        let state = self.state.lock().expect("strategy lock poisoned");
        serde_json::json!({
            "name": self.name,
            "pair": format!("{}/{}", self.config.symbol1, self.config.symbol2),
            "running": self.is_running(),
            "window_fill": state.spread_window.len(),
            "lookback": self.config.lookback,
            "correlation": state.correlation.correlation(),
            "spread_mean": state.spread_stats.mean(),
            "spread_std_dev": state.spread_stats.std_dev(),
            "open_positions": state.open.len(),
            "positions_opened": self.positions_opened.load(Ordering::Relaxed),
            "positions_closed": self.positions_closed.load(Ordering::Relaxed),
        })
    }
}
