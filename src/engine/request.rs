//! Public order submission types.

use crate::orderbook::{AddOrderResult, OrderId, OrderKind, OrderStatus, Side, TimeInForce};
use serde::{Deserialize, Serialize};

/// An order submission handed to the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    /// Optional client-supplied identifier echoed back on updates
    pub client_order_id: Option<String>,
    /// Trading symbol
    pub symbol: String,
    /// Buy or Sell
    pub side: Side,
    /// Limit, Market or Stop variant
    pub kind: OrderKind,
    /// Time-in-force; `None` defaults to GTC
    pub time_in_force: Option<TimeInForce>,
    /// Quantity in units
    pub quantity: u64,
    /// Limit price in minimum increments
    pub price: Option<u128>,
    /// Stop price in minimum increments
    pub stop_price: Option<u128>,
    /// Owning account
    pub user_id: String,
}

impl OrderRequest {
    /// A GTC limit order request.
    #[must_use]
    pub fn limit(symbol: &str, side: Side, price: u128, quantity: u64, user_id: &str) -> Self {
        Self {
            client_order_id: None,
            symbol: symbol.to_string(),
            side,
            kind: OrderKind::Limit,
            time_in_force: None,
            quantity,
            price: Some(price),
            stop_price: None,
            user_id: user_id.to_string(),
        }
    }

    /// A market order request.
    #[must_use]
    pub fn market(symbol: &str, side: Side, quantity: u64, user_id: &str) -> Self {
        Self {
            client_order_id: None,
            symbol: symbol.to_string(),
            side,
            kind: OrderKind::Market,
            time_in_force: None,
            quantity,
            price: None,
            stop_price: None,
            user_id: user_id.to_string(),
        }
    }

    /// A stop order request (StopLimit when `price` is given, else
    /// StopMarket).
    #[must_use]
    pub fn stop(
        symbol: &str,
        side: Side,
        stop_price: u128,
        price: Option<u128>,
        quantity: u64,
        user_id: &str,
    ) -> Self {
        Self {
            client_order_id: None,
            symbol: symbol.to_string(),
            side,
            kind: if price.is_some() {
                OrderKind::StopLimit
            } else {
                OrderKind::StopMarket
            },
            time_in_force: None,
            quantity,
            price,
            stop_price: Some(stop_price),
            user_id: user_id.to_string(),
        }
    }
}

/// The engine's answer to an [`OrderRequest`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderResponse {
    /// Identifier assigned to the order
    pub order_id: OrderId,
    /// Status after submission completed
    pub status: OrderStatus,
    /// Quantity filled during submission
    pub filled_quantity: u64,
    /// Volume-weighted average fill price
    pub avg_fill_price: Option<f64>,
    /// Populated when matching policy refused part or all of the order
    pub reject_reason: Option<String>,
}

impl OrderResponse {
    pub(crate) fn from_result(result: &AddOrderResult) -> Self {
        Self {
            order_id: result.order.id,
            status: result.order.status,
            filled_quantity: result.filled_quantity(),
            avg_fill_price: result.avg_fill_price(),
            reject_reason: result.reject_reason.clone(),
        }
    }
}
