//! OrderBook implementation: price–time-priority queues, stop
//! triggering and order matching for a single symbol.

mod book;
mod error;
mod matching;
mod operations;
mod order;
mod snapshot;
mod trade;


pub use book::{CompactionReport, OrderBook};
pub use error::OrderBookError;
pub use operations::AddOrderResult;
pub use order::{Order, OrderId, OrderKind, OrderStatus, Side, TimeInForce};
pub use snapshot::{
    OrderBookSnapshot, OrderBookSnapshotPackage, PriceLevelSnapshot, SNAPSHOT_FORMAT_VERSION,
};
pub use trade::{OrderUpdateEvent, OrderUpdateListener, Trade, TradeListener};
