//! Trade records and the listener types books notify on execution and
//! on order status transitions.

use super::order::{OrderId, OrderStatus, Side};
use crate::utils::monotonic_nanos;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// An executed trade. Immutable once emitted.
///
/// `price` is always the resting (maker) order's limit price; price
/// improvement goes to the taker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    /// Unique trade identifier
    pub id: Uuid,
    /// The symbol this trade belongs to
    pub symbol: String,
    /// Execution price (the maker's limit price)
    pub price: u128,
    /// Executed quantity
    pub quantity: u64,
    /// Order id of the resting (maker) side
    pub maker_order_id: OrderId,
    /// Order id of the incoming (taker) side
    pub taker_order_id: OrderId,
    /// Side of the taker
    pub taker_side: Side,
    /// Monotonic emission timestamp in nanoseconds
    pub timestamp_ns: u64,
}

impl Trade {
    pub(crate) fn new(
        symbol: &str,
        price: u128,
        quantity: u64,
        maker_order_id: OrderId,
        taker_order_id: OrderId,
        taker_side: Side,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            symbol: symbol.to_string(),
            price,
            quantity,
            maker_order_id,
            taker_order_id,
            taker_side,
            timestamp_ns: monotonic_nanos(),
        }
    }

    /// Notional value of the trade (price × quantity).
    #[must_use]
    #[inline]
    pub fn notional(&self) -> u128 {
        self.price.saturating_mul(self.quantity as u128)
    }
}

/// Trade listener specification using Arc for shared ownership
pub type TradeListener = Arc<dyn Fn(&Trade) + Send + Sync>;

/// Event emitted for every order status transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderUpdateEvent {
    /// The order this update refers to
    pub order_id: OrderId,
    /// Client-supplied identifier, if any
    pub client_order_id: Option<String>,
    /// Trading symbol
    pub symbol: String,
    /// Side of the order
    pub side: Side,
    /// Status after the transition
    pub status: OrderStatus,
    /// Cumulative filled quantity
    pub filled_quantity: u64,
    /// Quantity of the fill that caused this update (0 for non-fill
    /// transitions)
    pub last_fill_quantity: u64,
    /// Price of the fill that caused this update
    pub last_fill_price: Option<u128>,
}

/// Listener for order status transitions.
pub type OrderUpdateListener = Arc<dyn Fn(&OrderUpdateEvent) + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trade_notional() {
        let trade = Trade::new(
            "BTC/USD",
            10_000,
            5,
            Uuid::new_v4(),
            Uuid::new_v4(),
            Side::Buy,
        );
        assert_eq!(trade.notional(), 50_000);
    }

    #[test]
    fn test_trade_ids_are_unique() {
        let a = Trade::new("X", 1, 1, Uuid::new_v4(), Uuid::new_v4(), Side::Buy);
        let b = Trade::new("X", 1, 1, Uuid::new_v4(), Uuid::new_v4(), Side::Buy);
        assert_ne!(a.id, b.id);
    }
}
