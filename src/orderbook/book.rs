//! Core OrderBook implementation: four priority queues, an order-id
//! index and the per-book serialization lock.
//!
//! Bids and asks are stored in concurrent ordered maps (skip lists)
//! keyed by a composite (price, arrival-sequence) key, so ascending
//! iteration walks each side in strict price–time priority. Stop orders
//! wait in two further queues keyed by stop price and are drained into
//! the book whenever the last trade price touches them.

use super::error::OrderBookError;
use super::order::{BookOrder, BookQueue, Order, OrderHandle, OrderId, OrderStatus, Side, SideKey};
use super::trade::{OrderUpdateEvent, OrderUpdateListener, Trade, TradeListener};
use crossbeam::atomic::AtomicCell;
use crossbeam_skiplist::SkipMap;
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::debug;

/// Result of compacting a book, see [`OrderBook::compact`].
#[derive(Debug, Clone, Copy, Default)]
pub struct CompactionReport {
    /// Queue entries removed because their order had reached a terminal
    /// state
    pub removed_entries: usize,
    /// Index entries removed
    pub removed_index_entries: usize,
}

/// A price–time-priority order book for a single symbol.
///
/// All mutating operations are serialized by an internal operation lock;
/// reads (`get_order`, `snapshot`, best-price accessors) are lock-free.
pub struct OrderBook {
    /// The symbol or identifier for this order book
    pub(super) symbol: String,

    /// Bid side, best (highest) price first under ascending key order
    pub(super) bids: SkipMap<SideKey, Arc<BookOrder>>,

    /// Ask side, best (lowest) price first under ascending key order
    pub(super) asks: SkipMap<SideKey, Arc<BookOrder>>,

    /// Buy stops, lowest stop price first (triggered when last ≥ stop)
    pub(super) buy_stops: SkipMap<SideKey, Arc<BookOrder>>,

    /// Sell stops, highest stop price first (triggered when last ≤ stop)
    pub(super) sell_stops: SkipMap<SideKey, Arc<BookOrder>>,

    /// Order id → queue position, for O(log n) cancellation
    pub(super) orders: DashMap<OrderId, OrderHandle>,

    /// Admission sequence source; also the price–time tie-breaker
    pub(super) next_seq: AtomicU64,

    /// Mutation counter, used to stamp snapshots deterministically
    pub(super) op_count: AtomicU64,

    /// The last price at which a trade occurred
    pub(super) last_trade_price: AtomicCell<u128>,

    /// Flag indicating if there was a trade
    pub(super) has_traded: AtomicBool,

    /// Serializes add/cancel/compact; the innermost lock in the system
    pub(super) op_lock: Mutex<()>,

    /// Listens to trades as they execute
    pub trade_listener: Option<TradeListener>,

    /// Listens to order status transitions
    pub order_update_listener: Option<OrderUpdateListener>,
}

impl OrderBook {
    /// Create a new order book for the given symbol
    pub fn new(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            bids: SkipMap::new(),
            asks: SkipMap::new(),
            buy_stops: SkipMap::new(),
            sell_stops: SkipMap::new(),
            orders: DashMap::new(),
            next_seq: AtomicU64::new(1),
            op_count: AtomicU64::new(0),
            last_trade_price: AtomicCell::new(0),
            has_traded: AtomicBool::new(false),
            op_lock: Mutex::new(()),
            trade_listener: None,
            order_update_listener: None,
        }
    }

    /// Create a new order book with trade and order-update listeners.
    pub fn with_listeners(
        symbol: &str,
        trade_listener: TradeListener,
        order_update_listener: OrderUpdateListener,
    ) -> Self {
        let mut book = Self::new(symbol);
        book.trade_listener = Some(trade_listener);
        book.order_update_listener = Some(order_update_listener);
        book
    }

    /// Set a trade listener for this order book
    pub fn set_trade_listener(&mut self, trade_listener: TradeListener) {
        self.trade_listener = Some(trade_listener);
    }

    /// Set an order-update listener for this order book
    pub fn set_order_update_listener(&mut self, listener: OrderUpdateListener) {
        self.order_update_listener = Some(listener);
    }

    /// Get the symbol of this order book
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Get the best bid price, if any
    ///
    /// O(1): the skip list keeps the best bid at the front.
    #[must_use]
    pub fn best_bid(&self) -> Option<u128> {
        self.bids.front().map(|entry| entry.value().price)
    }

    /// Get the best ask price, if any
    #[must_use]
    pub fn best_ask(&self) -> Option<u128> {
        self.asks.front().map(|entry| entry.value().price)
    }

    /// Get the mid price (average of best bid and best ask)
    #[must_use]
    pub fn mid_price(&self) -> Option<f64> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some((bid as f64 + ask as f64) / 2.0),
            _ => None,
        }
    }

    /// Get the spread (best ask - best bid)
    #[must_use]
    pub fn spread(&self) -> Option<u128> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some(ask.saturating_sub(bid)),
            _ => None,
        }
    }

    /// Get the last trade price, if any
    #[must_use]
    pub fn last_trade_price(&self) -> Option<u128> {
        if self.has_traded.load(Ordering::Relaxed) {
            Some(self.last_trade_price.load())
        } else {
            None
        }
    }

    /// Total remaining quantity resting on one side of the book.
    #[must_use]
    pub fn depth(&self, side: Side) -> u64 {
        let queue = match side {
            Side::Buy => &self.bids,
            Side::Sell => &self.asks,
        };
        queue
            .iter()
            .map(|entry| entry.value().remaining())
            .fold(0u64, u64::saturating_add)
    }

    /// Number of orders resting on one side of the book.
    #[must_use]
    pub fn order_count(&self, side: Side) -> usize {
        match side {
            Side::Buy => self.bids.len(),
            Side::Sell => self.asks.len(),
        }
    }

    /// Number of untriggered stop orders waiting on one side.
    #[must_use]
    pub fn stop_order_count(&self, side: Side) -> usize {
        match side {
            Side::Buy => self.buy_stops.len(),
            Side::Sell => self.sell_stops.len(),
        }
    }

    /// Returns a value copy of an active order.
    #[must_use]
    pub fn get_order(&self, order_id: OrderId) -> Option<Order> {
        self.orders
            .get(&order_id)
            .map(|handle| handle.order.to_order(&self.symbol))
    }

    /// Removes terminal leftovers from all queues and the id index.
    ///
    /// Live entries keep their keys, so the ordering relation on the
    /// compacted queues equals the original restricted to live entries.
    pub fn compact(&self) -> CompactionReport {
        let _guard = self.op_lock.lock().expect("order book lock poisoned");
        let mut report = CompactionReport::default();

        for queue in [&self.bids, &self.asks, &self.buy_stops, &self.sell_stops] {
            let dead: Vec<SideKey> = queue
                .iter()
                .filter(|entry| {
                    entry.value().status().is_terminal() || entry.value().remaining() == 0
                })
                .map(|entry| *entry.key())
                .collect();
            for key in dead {
                if let Some(entry) = queue.remove(&key) {
                    self.orders.remove(&entry.value().id);
                    report.removed_entries += 1;
                }
            }
        }

        let dead_index: Vec<OrderId> = self
            .orders
            .iter()
            .filter(|entry| entry.value().order.status().is_terminal())
            .map(|entry| *entry.key())
            .collect();
        for id in dead_index {
            self.orders.remove(&id);
            report.removed_index_entries += 1;
        }

        if report.removed_entries > 0 || report.removed_index_entries > 0 {
            debug!(
                symbol = %self.symbol,
                removed = report.removed_entries,
                removed_index = report.removed_index_entries,
                "compacted order book"
            );
        }
        report
    }

    /// Records a trade price and marks the book as traded.
    pub(super) fn record_last_price(&self, price: u128) {
        self.last_trade_price.store(price);
        self.has_traded.store(true, Ordering::Relaxed);
    }

    pub(super) fn emit_trade(&self, trade: &Trade) {
        if let Some(listener) = &self.trade_listener {
            listener(trade);
        }
    }

    pub(super) fn emit_update(
        &self,
        order: &BookOrder,
        last_fill_quantity: u64,
        last_fill_price: Option<u128>,
    ) {
        if let Some(listener) = &self.order_update_listener {
            listener(&OrderUpdateEvent {
                order_id: order.id,
                client_order_id: order.client_order_id.clone(),
                symbol: self.symbol.clone(),
                side: order.side,
                status: order.status(),
                filled_quantity: order.quantity.saturating_sub(order.remaining()),
                last_fill_quantity,
                last_fill_price,
            });
        }
    }

    /// Inserts a resting order into its queue and the id index.
    ///
    /// Callers must hold the operation lock and have checked for
    /// duplicate ids.
    pub(super) fn index_order(
        &self,
        order: Arc<BookOrder>,
        queue: BookQueue,
    ) -> Result<(), OrderBookError> {
        let key = match queue {
            BookQueue::Bids => SideKey::descending(order.price, order.seq),
            BookQueue::Asks => SideKey::ascending(order.price, order.seq),
            BookQueue::BuyStops => {
                SideKey::ascending(order.stop_price.unwrap_or(order.price), order.seq)
            }
            BookQueue::SellStops => {
                SideKey::descending(order.stop_price.unwrap_or(order.price), order.seq)
            }
        };
        let map = match queue {
            BookQueue::Bids => &self.bids,
            BookQueue::Asks => &self.asks,
            BookQueue::BuyStops => &self.buy_stops,
            BookQueue::SellStops => &self.sell_stops,
        };
        map.insert(key, Arc::clone(&order));
        self.orders.insert(
            order.id,
            OrderHandle {
                queue,
                key,
                order,
            },
        );
        Ok(())
    }

    /// Removes an order from its queue and the id index.
    pub(super) fn unindex_order(&self, handle: &OrderHandle) {
        let map = match handle.queue {
            BookQueue::Bids => &self.bids,
            BookQueue::Asks => &self.asks,
            BookQueue::BuyStops => &self.buy_stops,
            BookQueue::SellStops => &self.sell_stops,
        };
        map.remove(&handle.key);
        self.orders.remove(&handle.order.id);
    }

    /// Checks whether a resting order left the active state and, if so,
    /// removes it from its queue and the index.
    pub(super) fn remove_if_terminal(&self, order: &Arc<BookOrder>) {
        if order.status() == OrderStatus::Filled || order.remaining() == 0 {
            if let Some((_, handle)) = self.orders.remove(&order.id) {
                let map = match handle.queue {
                    BookQueue::Bids => &self.bids,
                    BookQueue::Asks => &self.asks,
                    BookQueue::BuyStops => &self.buy_stops,
                    BookQueue::SellStops => &self.sell_stops,
                };
                map.remove(&handle.key);
            }
        }
    }
}

impl std::fmt::Debug for OrderBook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderBook")
            .field("symbol", &self.symbol)
            .field("bids", &self.bids.len())
            .field("asks", &self.asks.len())
            .field("buy_stops", &self.buy_stops.len())
            .field("sell_stops", &self.sell_stops.len())
            .field("last_trade_price", &self.last_trade_price())
            .finish()
    }
}
