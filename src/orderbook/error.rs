//! Order book error types

use super::order::{OrderId, OrderKind, Side};
use std::fmt;

/// Errors that can occur within the OrderBook
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum OrderBookError {
    /// An order with the same id is already indexed
    DuplicateOrderId(OrderId),

    /// Order not found in the book
    OrderNotFound(OrderId),

    /// Order quantity must be greater than zero
    InvalidQuantity {
        /// The quantity that failed validation
        quantity: u64,
    },

    /// Order price must be greater than zero
    InvalidPrice {
        /// The price that failed validation
        price: u128,
    },

    /// The order kind requires a limit price
    MissingPrice {
        /// The order kind that was submitted
        kind: OrderKind,
    },

    /// The order kind requires a stop price
    MissingStopPrice {
        /// The order kind that was submitted
        kind: OrderKind,
    },

    /// Insufficient liquidity for a market order
    InsufficientLiquidity {
        /// The side of the market order
        side: Side,
        /// Quantity requested
        requested: u64,
        /// Quantity available
        available: u64,
    },

    /// Operation not permitted for the specified order
    InvalidOperation {
        /// Description of the error
        message: String,
    },
}

impl fmt::Display for OrderBookError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderBookError::DuplicateOrderId(id) => write!(f, "Duplicate order id: {id}"),
            OrderBookError::OrderNotFound(id) => write!(f, "Order not found: {id}"),
            OrderBookError::InvalidQuantity { quantity } => {
                write!(f, "Invalid quantity: {quantity} (must be > 0)")
            }
            OrderBookError::InvalidPrice { price } => {
                write!(f, "Invalid price: {price} (must be > 0)")
            }
            OrderBookError::MissingPrice { kind } => {
                write!(f, "Missing limit price for {kind} order")
            }
            OrderBookError::MissingStopPrice { kind } => {
                write!(f, "Missing stop price for {kind} order")
            }
            OrderBookError::InsufficientLiquidity {
                side,
                requested,
                available,
            } => {
                write!(
                    f,
                    "Insufficient liquidity for {side} order: requested {requested}, available {available}"
                )
            }
            OrderBookError::InvalidOperation { message } => {
                write!(f, "Invalid operation: {message}")
            }
        }
    }
}

impl std::error::Error for OrderBookError {}
