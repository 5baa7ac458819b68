//! Order model: sides, kinds, statuses, time-in-force and the resting
//! order representation used inside the book.
//!
//! Prices are integers in minimum increments (`u128`) and quantities are
//! `u64`, so comparisons inside the matching loop are exact.

use crossbeam::atomic::AtomicCell;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// Stable 128-bit order identifier.
pub type OrderId = Uuid;

/// The side of an order or trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    /// Bid side
    Buy,
    /// Ask side
    Sell,
}

impl Side {
    /// Returns the opposite side.
    #[must_use]
    #[inline]
    pub fn opposite(&self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

/// The kind of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderKind {
    /// Rests at its limit price until matched or cancelled
    Limit,
    /// Executes immediately against available liquidity
    Market,
    /// Becomes a limit order once the stop price is touched
    StopLimit,
    /// Becomes a market order once the stop price is touched
    StopMarket,
}

impl OrderKind {
    /// Whether this kind waits in a stop queue until triggered.
    #[must_use]
    #[inline]
    pub fn is_stop(&self) -> bool {
        matches!(self, OrderKind::StopLimit | OrderKind::StopMarket)
    }

    /// The kind a stop order converts to when triggered.
    #[must_use]
    pub fn triggered_kind(&self) -> OrderKind {
        match self {
            OrderKind::StopLimit => OrderKind::Limit,
            OrderKind::StopMarket => OrderKind::Market,
            other => *other,
        }
    }
}

impl fmt::Display for OrderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderKind::Limit => write!(f, "LIMIT"),
            OrderKind::Market => write!(f, "MARKET"),
            OrderKind::StopLimit => write!(f, "STOP_LIMIT"),
            OrderKind::StopMarket => write!(f, "STOP_MARKET"),
        }
    }
}

/// Lifecycle state of an order.
///
/// Transitions form a DAG: `New → {PartiallyFilled, Filled, Cancelled,
/// Rejected}` and `PartiallyFilled → {Filled, Cancelled}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderStatus {
    /// Admitted, nothing filled yet
    New,
    /// Some quantity filled, remainder still active
    PartiallyFilled,
    /// Fully filled
    Filled,
    /// Cancelled with unfilled remainder
    Cancelled,
    /// Refused by validation or matching policy
    Rejected,
}

impl OrderStatus {
    /// Terminal states never transition again and leave the book.
    #[must_use]
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Cancelled | OrderStatus::Rejected
        )
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderStatus::New => write!(f, "NEW"),
            OrderStatus::PartiallyFilled => write!(f, "PARTIALLY_FILLED"),
            OrderStatus::Filled => write!(f, "FILLED"),
            OrderStatus::Cancelled => write!(f, "CANCELLED"),
            OrderStatus::Rejected => write!(f, "REJECTED"),
        }
    }
}

/// Time-in-force policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum TimeInForce {
    /// Good till cancelled: rests until matched or cancelled
    #[default]
    Gtc,
    /// Immediate or cancel: unfilled remainder is cancelled
    Ioc,
    /// Fill or kill: fills entirely or not at all
    Fok,
}

impl fmt::Display for TimeInForce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeInForce::Gtc => write!(f, "GTC"),
            TimeInForce::Ioc => write!(f, "IOC"),
            TimeInForce::Fok => write!(f, "FOK"),
        }
    }
}

/// A value copy of an order as seen through the public API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    /// Unique order identifier
    pub id: OrderId,
    /// Optional client-supplied identifier
    pub client_order_id: Option<String>,
    /// Trading symbol
    pub symbol: String,
    /// Buy or Sell
    pub side: Side,
    /// Limit, Market or Stop variant
    pub kind: OrderKind,
    /// Limit price, required for Limit/StopLimit
    pub price: Option<u128>,
    /// Stop price, required for stop kinds
    pub stop_price: Option<u128>,
    /// Original quantity
    pub quantity: u64,
    /// Quantity not yet filled
    pub remaining: u64,
    /// Lifecycle state
    pub status: OrderStatus,
    /// Time-in-force policy
    pub time_in_force: TimeInForce,
    /// Monotonic arrival timestamp in nanoseconds
    pub arrival_ns: u64,
    /// Owning account
    pub user_id: String,
}

impl Order {
    /// Quantity filled so far.
    #[must_use]
    #[inline]
    pub fn filled_quantity(&self) -> u64 {
        self.quantity.saturating_sub(self.remaining)
    }

    /// Whether the order is still eligible to rest or match.
    #[must_use]
    #[inline]
    pub fn is_active(&self) -> bool {
        !self.status.is_terminal()
    }
}

/// Resting order owned by the book.
///
/// `remaining` and `status` are atomic so lock-free readers (snapshots,
/// `get_order`) observe consistent values; every mutation happens under
/// the per-book operation lock.
#[derive(Debug)]
pub(crate) struct BookOrder {
    pub(crate) id: OrderId,
    pub(crate) client_order_id: Option<String>,
    pub(crate) side: Side,
    pub(crate) kind: AtomicCell<OrderKind>,
    pub(crate) price: u128,
    pub(crate) stop_price: Option<u128>,
    pub(crate) quantity: u64,
    pub(crate) remaining: AtomicU64,
    pub(crate) status: AtomicCell<OrderStatus>,
    pub(crate) time_in_force: TimeInForce,
    pub(crate) arrival_ns: u64,
    /// Admission sequence; preserved when a stop triggers so time
    /// priority is kept.
    pub(crate) seq: u64,
    pub(crate) user_id: String,
}

impl BookOrder {
    pub(crate) fn from_order(order: &Order, seq: u64) -> Arc<Self> {
        Arc::new(Self {
            id: order.id,
            client_order_id: order.client_order_id.clone(),
            side: order.side,
            kind: AtomicCell::new(order.kind),
            price: order.price.unwrap_or(0),
            stop_price: order.stop_price,
            quantity: order.quantity,
            remaining: AtomicU64::new(order.remaining),
            status: AtomicCell::new(order.status),
            time_in_force: order.time_in_force,
            arrival_ns: order.arrival_ns,
            seq,
            user_id: order.user_id.clone(),
        })
    }

    #[inline]
    pub(crate) fn remaining(&self) -> u64 {
        self.remaining.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn status(&self) -> OrderStatus {
        self.status.load()
    }

    /// Decrements `remaining` by `quantity` and advances the status.
    ///
    /// Returns the remaining quantity after the fill.
    pub(crate) fn fill(&self, quantity: u64) -> u64 {
        let before = self.remaining.load(Ordering::Acquire);
        let after = before.saturating_sub(quantity);
        self.remaining.store(after, Ordering::Release);
        self.status.store(if after == 0 {
            OrderStatus::Filled
        } else {
            OrderStatus::PartiallyFilled
        });
        after
    }

    /// Value copy for the public API.
    pub(crate) fn to_order(&self, symbol: &str) -> Order {
        let kind = self.kind.load();
        Order {
            id: self.id,
            client_order_id: self.client_order_id.clone(),
            symbol: symbol.to_string(),
            side: self.side,
            kind,
            price: match kind {
                OrderKind::Market | OrderKind::StopMarket => None,
                _ => Some(self.price),
            },
            stop_price: self.stop_price,
            quantity: self.quantity,
            remaining: self.remaining(),
            status: self.status(),
            time_in_force: self.time_in_force,
            arrival_ns: self.arrival_ns,
            user_id: self.user_id.clone(),
        }
    }
}

/// Composite priority key: ascending iteration yields priority order.
///
/// Bid and sell-stop keys store the bitwise complement of the price so
/// that the highest price sorts first; the admission sequence breaks
/// price ties in arrival order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct SideKey {
    pub(crate) price_key: u128,
    pub(crate) seq: u64,
}

impl SideKey {
    #[inline]
    pub(crate) fn ascending(price: u128, seq: u64) -> Self {
        Self {
            price_key: price,
            seq,
        }
    }

    #[inline]
    pub(crate) fn descending(price: u128, seq: u64) -> Self {
        Self {
            price_key: !price,
            seq,
        }
    }
}

/// Which queue inside the book an order currently lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BookQueue {
    Bids,
    Asks,
    BuyStops,
    SellStops,
}

/// Index entry mapping an order id to its queue position.
#[derive(Debug, Clone)]
pub(crate) struct OrderHandle {
    pub(crate) queue: BookQueue,
    pub(crate) key: SideKey,
    pub(crate) order: Arc<BookOrder>,
}
