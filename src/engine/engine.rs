//! Engine implementation: book routing, channels and maintenance.

use super::error::EngineError;
use super::request::{OrderRequest, OrderResponse};
use crate::orderbook::{
    Order, OrderBook, OrderBookError, OrderBookSnapshot, OrderId, OrderKind, OrderStatus,
    OrderUpdateEvent, OrderUpdateListener, Trade, TradeListener,
};
use crate::utils::monotonic_nanos;
use crossbeam::channel::{self, Receiver, Sender};
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Engine construction options.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct EngineConfig {
    /// Bounded capacity of the trade output channel; a full channel
    /// blocks the producing call (backpressure, no trades are dropped)
    pub trade_channel_capacity: usize,
    /// Bounded capacity of the order-update output channel
    pub update_channel_capacity: usize,
    /// How often the maintenance task compacts each book
    pub cleanup_interval: Duration,
    /// How long terminal orders stay in the audit index
    pub audit_retention: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            trade_channel_capacity: 4096,
            update_channel_capacity: 16_384,
            cleanup_interval: Duration::from_secs(60),
            audit_retention: Duration::from_secs(300),
        }
    }
}

/// Owns the order book for every symbol and routes submissions.
///
/// Distinct symbols proceed in parallel; matching within a symbol is
/// strictly serial. Emitted trades and order updates flow through
/// bounded channels obtained from [`MatchingEngine::trades`] and
/// [`MatchingEngine::order_updates`].
pub struct MatchingEngine {
    config: EngineConfig,
    books: DashMap<String, Arc<OrderBook>>,
    /// Routes an active order id back to its symbol for cancel/get
    order_symbols: DashMap<OrderId, String>,
    /// Terminal orders seen recently, for Conflict-vs-NotFound answers;
    /// shared with every book's update listener
    terminal: Arc<DashMap<OrderId, (OrderStatus, Instant)>>,
    trade_tx: Sender<Trade>,
    trade_rx: Receiver<Trade>,
    update_tx: Sender<OrderUpdateEvent>,
    update_rx: Receiver<OrderUpdateEvent>,
    stopped: AtomicBool,
    maintenance: Mutex<Option<JoinHandle<()>>>,
}

impl MatchingEngine {
    /// Creates an engine and starts its maintenance task.
    #[must_use]
    pub fn new(config: EngineConfig) -> Arc<Self> {
        let (trade_tx, trade_rx) = channel::bounded(config.trade_channel_capacity);
        let (update_tx, update_rx) = channel::bounded(config.update_channel_capacity);
        let engine = Arc::new(Self {
            config,
            books: DashMap::new(),
            order_symbols: DashMap::new(),
            terminal: Arc::new(DashMap::new()),
            trade_tx,
            trade_rx,
            update_tx,
            update_rx,
            stopped: AtomicBool::new(false),
            maintenance: Mutex::new(None),
        });
        engine.spawn_maintenance();
        engine
    }

    /// Creates an engine with default configuration.
    #[must_use]
    pub fn with_defaults() -> Arc<Self> {
        Self::new(EngineConfig::default())
    }

    /// Receiver of every trade the engine emits, in emission order.
    ///
    /// The channel is bounded; a slow consumer eventually blocks the
    /// producing `place_order` calls.
    #[must_use]
    pub fn trades(&self) -> Receiver<Trade> {
        self.trade_rx.clone()
    }

    /// Receiver of every order status transition.
    #[must_use]
    pub fn order_updates(&self) -> Receiver<OrderUpdateEvent> {
        self.update_rx.clone()
    }

    /// Symbols with a live book.
    #[must_use]
    pub fn symbols(&self) -> Vec<String> {
        self.books.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Submits an order.
    ///
    /// Returns a response with a terminal or in-progress status;
    /// matching-policy refusals are reported in the response, schema
    /// violations and duplicates as typed errors.
    ///
    /// # Errors
    /// [`EngineError::InvalidInput`], [`EngineError::Conflict`] or
    /// [`EngineError::Unavailable`] after shutdown.
    pub fn place_order(&self, request: &OrderRequest) -> Result<OrderResponse, EngineError> {
        self.ensure_running()?;
        Self::validate_request(request)?;

        let book = self.book(&request.symbol);
        let order = Order {
            id: Uuid::new_v4(),
            client_order_id: request.client_order_id.clone(),
            symbol: request.symbol.clone(),
            side: request.side,
            kind: request.kind,
            price: request.price,
            stop_price: request.stop_price,
            quantity: request.quantity,
            remaining: request.quantity,
            status: OrderStatus::New,
            time_in_force: request.time_in_force.unwrap_or_default(),
            arrival_ns: monotonic_nanos(),
            user_id: request.user_id.clone(),
        };
        let order_id = order.id;
        self.order_symbols.insert(order_id, request.symbol.clone());

        let result = match book.add_order(order) {
            Ok(result) => result,
            Err(err) => {
                self.order_symbols.remove(&order_id);
                return Err(Self::map_book_error(err));
            }
        };

        if result.order.status.is_terminal() {
            self.order_symbols.remove(&result.order.id);
        }
        debug!(
            symbol = %request.symbol,
            order_id = %result.order.id,
            status = %result.order.status,
            trades = result.trades.len(),
            "order placed"
        );
        Ok(OrderResponse::from_result(&result))
    }

    /// Cancels an active order by id.
    ///
    /// # Errors
    /// [`EngineError::Conflict`] when the order already reached a
    /// terminal state, [`EngineError::NotFound`] when it was never
    /// seen.
    pub fn cancel_order(&self, order_id: OrderId) -> Result<OrderResponse, EngineError> {
        self.ensure_running()?;

        let symbol = match self.order_symbols.get(&order_id) {
            Some(entry) => entry.value().clone(),
            None => return Err(self.terminal_or_not_found(order_id)),
        };
        let book = self.book(&symbol);

        match book.cancel_order(order_id) {
            Ok(order) => {
                self.order_symbols.remove(&order_id);
                Ok(OrderResponse {
                    order_id: order.id,
                    status: order.status,
                    filled_quantity: order.filled_quantity(),
                    avg_fill_price: None,
                    reject_reason: None,
                })
            }
            Err(OrderBookError::OrderNotFound(_)) => Err(self.terminal_or_not_found(order_id)),
            Err(err) => Err(Self::map_book_error(err)),
        }
    }

    /// Returns a value copy of an active order.
    ///
    /// # Errors
    /// [`EngineError::NotFound`] when the order is not active.
    pub fn get_order(&self, order_id: OrderId) -> Result<Order, EngineError> {
        let symbol = self
            .order_symbols
            .get(&order_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| EngineError::NotFound(format!("order {order_id}")))?;
        self.book(&symbol)
            .get_order(order_id)
            .ok_or_else(|| EngineError::NotFound(format!("order {order_id}")))
    }

    /// Depth-truncated snapshot of one symbol's book.
    ///
    /// # Errors
    /// [`EngineError::NotFound`] for a symbol without a book.
    pub fn snapshot(&self, symbol: &str, depth: usize) -> Result<OrderBookSnapshot, EngineError> {
        self.books
            .get(symbol)
            .map(|entry| entry.value().snapshot(depth))
            .ok_or_else(|| EngineError::NotFound(format!("symbol {symbol}")))
    }

    /// Stops the maintenance task and refuses further submissions.
    /// Idempotent.
    pub fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("matching engine shutting down");
        let handle = self
            .maintenance
            .lock()
            .expect("maintenance lock poisoned")
            .take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }

    /// Compacts every book immediately and prunes the audit index.
    pub fn compact_now(&self) {
        for entry in self.books.iter() {
            entry.value().compact();
        }
        let cutoff = Instant::now();
        let retention = self.config.audit_retention;
        self.terminal
            .retain(|_, (_, seen)| cutoff.duration_since(*seen) < retention);
        // Drop symbol routes whose orders went terminal.
        let stale: Vec<OrderId> = self
            .order_symbols
            .iter()
            .filter(|entry| {
                self.books
                    .get(entry.value())
                    .is_none_or(|book| book.get_order(*entry.key()).is_none())
            })
            .map(|entry| *entry.key())
            .collect();
        for id in stale {
            self.order_symbols.remove(&id);
        }
    }

    /// Book for `symbol`, created on first reference with the engine's
    /// channel listeners wired in.
    fn book(&self, symbol: &str) -> Arc<OrderBook> {
        if let Some(book) = self.books.get(symbol) {
            return Arc::clone(book.value());
        }
        let book = self
            .books
            .entry(symbol.to_string())
            .or_insert_with(|| {
                let trade_tx = self.trade_tx.clone();
                let trade_listener: TradeListener = Arc::new(move |trade: &Trade| {
                    if trade_tx.send(trade.clone()).is_err() {
                        warn!(symbol = %trade.symbol, "trade channel disconnected");
                    }
                });

                let update_tx = self.update_tx.clone();
                let terminal = Arc::clone(&self.terminal);
                let update_listener: OrderUpdateListener =
                    Arc::new(move |update: &OrderUpdateEvent| {
                        if update.status.is_terminal() {
                            terminal.insert(update.order_id, (update.status, Instant::now()));
                        }
                        if update_tx.send(update.clone()).is_err() {
                            warn!(symbol = %update.symbol, "order-update channel disconnected");
                        }
                    });

                Arc::new(OrderBook::with_listeners(
                    symbol,
                    trade_listener,
                    update_listener,
                ))
            })
            .clone();
        book
    }

    fn ensure_running(&self) -> Result<(), EngineError> {
        if self.stopped.load(Ordering::SeqCst) {
            Err(EngineError::Unavailable("engine stopped".to_string()))
        } else {
            Ok(())
        }
    }

    fn terminal_or_not_found(&self, order_id: OrderId) -> EngineError {
        match self.terminal.get(&order_id) {
            Some(entry) => {
                let (status, _) = entry.value();
                EngineError::Conflict(format!("order {order_id} already terminal ({status})"))
            }
            None => EngineError::NotFound(format!("order {order_id}")),
        }
    }

    fn validate_request(request: &OrderRequest) -> Result<(), EngineError> {
        if request.symbol.is_empty() {
            return Err(EngineError::InvalidInput("empty symbol".to_string()));
        }
        if request.quantity == 0 {
            return Err(EngineError::InvalidInput(
                "quantity must be greater than zero".to_string(),
            ));
        }
        match request.kind {
            OrderKind::Limit | OrderKind::StopLimit if request.price.is_none() => {
                return Err(EngineError::InvalidInput(format!(
                    "{} order requires a limit price",
                    request.kind
                )));
            }
            _ => {}
        }
        if request.kind.is_stop() && request.stop_price.is_none() {
            return Err(EngineError::InvalidInput(format!(
                "{} order requires a stop price",
                request.kind
            )));
        }
        if request.price == Some(0) || request.stop_price == Some(0) {
            return Err(EngineError::InvalidInput(
                "price must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    fn map_book_error(err: OrderBookError) -> EngineError {
        match err {
            OrderBookError::DuplicateOrderId(id) => {
                EngineError::Conflict(format!("duplicate order id {id}"))
            }
            OrderBookError::OrderNotFound(id) => EngineError::NotFound(format!("order {id}")),
            OrderBookError::InvalidQuantity { .. }
            | OrderBookError::InvalidPrice { .. }
            | OrderBookError::MissingPrice { .. }
            | OrderBookError::MissingStopPrice { .. } => {
                EngineError::InvalidInput(err.to_string())
            }
            OrderBookError::InsufficientLiquidity { .. } => EngineError::Rejected(err.to_string()),
            OrderBookError::InvalidOperation { .. } => EngineError::Internal(err.to_string()),
            _ => EngineError::Internal(err.to_string()),
        }
    }

    fn spawn_maintenance(self: &Arc<Self>) {
        let weak: Weak<Self> = Arc::downgrade(self);
        let interval = self.config.cleanup_interval;
        let handle = std::thread::Builder::new()
            .name("engine-maintenance".to_string())
            .spawn(move || {
                let step = Duration::from_millis(50).min(interval);
                let mut since_cleanup = Duration::ZERO;
                loop {
                    std::thread::sleep(step);
                    since_cleanup += step;
                    let Some(engine) = weak.upgrade() else {
                        return;
                    };
                    if engine.stopped.load(Ordering::SeqCst) {
                        return;
                    }
                    if since_cleanup >= interval {
                        since_cleanup = Duration::ZERO;
                        engine.compact_now();
                    }
                }
            })
            .expect("failed to spawn engine maintenance thread");
        *self
            .maintenance
            .lock()
            .expect("maintenance lock poisoned") = Some(handle);
    }
}

impl Drop for MatchingEngine {
    fn drop(&mut self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

impl std::fmt::Debug for MatchingEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MatchingEngine")
            .field("books", &self.books.len())
            .field("stopped", &self.stopped.load(Ordering::Relaxed))
            .finish()
    }
}
