//! Order book operations: admission, cancellation and lookups.

use super::book::OrderBook;
use super::error::OrderBookError;
use super::order::{
    BookOrder, BookQueue, Order, OrderId, OrderKind, OrderStatus, Side, TimeInForce,
};
use super::trade::Trade;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tracing::trace;

/// Outcome of admitting an order.
#[derive(Debug, Clone)]
pub struct AddOrderResult {
    /// Value copy of the order after the operation completed
    pub order: Order,
    /// Every trade emitted while the operation ran, including fills of
    /// stop orders the operation triggered
    pub trades: Vec<Trade>,
    /// Populated when matching policy refused part or all of the order
    pub reject_reason: Option<String>,
}

impl AddOrderResult {
    /// Quantity of this order filled during the operation.
    #[must_use]
    pub fn filled_quantity(&self) -> u64 {
        self.order.quantity.saturating_sub(self.order.remaining)
    }

    /// Volume-weighted average fill price over this order's own fills.
    #[must_use]
    pub fn avg_fill_price(&self) -> Option<f64> {
        let own: Vec<&Trade> = self
            .trades
            .iter()
            .filter(|t| t.maker_order_id == self.order.id || t.taker_order_id == self.order.id)
            .collect();
        let filled: u64 = own.iter().map(|t| t.quantity).sum();
        if filled == 0 {
            return None;
        }
        let notional: u128 = own.iter().map(|t| t.notional()).sum();
        Some(notional as f64 / filled as f64)
    }
}

impl OrderBook {
    /// Admit an order to the book.
    ///
    /// Market orders execute immediately; limit orders rest after the
    /// crossing loop closes; stop orders wait in the stop queues until
    /// the last trade price touches them. Matching-policy refusals
    /// (insufficient liquidity, unfillable FOK) are reported through the
    /// returned order's status and `reject_reason`, not as errors.
    ///
    /// # Errors
    /// Returns [`OrderBookError::DuplicateOrderId`] when the id is
    /// already indexed, and the `Invalid*`/`Missing*` variants for
    /// schema violations. Input errors leave the book unchanged.
    pub fn add_order(&self, order: Order) -> Result<AddOrderResult, OrderBookError> {
        Self::validate(&order)?;

        let _guard = self.op_lock.lock().expect("order book lock poisoned");

        if self.orders.contains_key(&order.id) {
            return Err(OrderBookError::DuplicateOrderId(order.id));
        }

        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        self.op_count.fetch_add(1, Ordering::Relaxed);
        let mut order = order;
        order.status = OrderStatus::New;
        order.remaining = order.quantity;
        let resting = BookOrder::from_order(&order, seq);
        trace!(
            symbol = %self.symbol,
            order_id = %order.id,
            side = %order.side,
            kind = %order.kind,
            quantity = order.quantity,
            "adding order"
        );

        let mut trades = Vec::new();
        let mut reject_reason = None;

        match order.kind {
            OrderKind::Market => {
                self.emit_update(&resting, 0, None);
                self.admit_market(&resting, &mut trades, &mut reject_reason);
            }
            OrderKind::Limit => {
                self.emit_update(&resting, 0, None);
                self.admit_limit(&resting, &mut trades, &mut reject_reason);
            }
            OrderKind::StopLimit | OrderKind::StopMarket => {
                let queue = match order.side {
                    Side::Buy => BookQueue::BuyStops,
                    Side::Sell => BookQueue::SellStops,
                };
                self.index_order(Arc::clone(&resting), queue)?;
                self.emit_update(&resting, 0, None);
            }
        }

        self.drain_triggered_stops(&mut trades);

        Ok(AddOrderResult {
            order: resting.to_order(&self.symbol),
            trades,
            reject_reason,
        })
    }

    /// Cancel an active order.
    ///
    /// O(log n): the id index locates the queue entry directly.
    ///
    /// # Errors
    /// Returns [`OrderBookError::OrderNotFound`] when the id is not
    /// active in this book.
    pub fn cancel_order(&self, order_id: OrderId) -> Result<Order, OrderBookError> {
        let _guard = self.op_lock.lock().expect("order book lock poisoned");

        let handle = self
            .orders
            .get(&order_id)
            .map(|entry| entry.value().clone())
            .ok_or(OrderBookError::OrderNotFound(order_id))?;

        self.unindex_order(&handle);
        handle.order.status.store(OrderStatus::Cancelled);
        self.op_count.fetch_add(1, Ordering::Relaxed);
        self.emit_update(&handle.order, 0, None);
        trace!(symbol = %self.symbol, order_id = %order_id, "order cancelled");

        Ok(handle.order.to_order(&self.symbol))
    }

    fn validate(order: &Order) -> Result<(), OrderBookError> {
        if order.quantity == 0 {
            return Err(OrderBookError::InvalidQuantity {
                quantity: order.quantity,
            });
        }
        match order.kind {
            OrderKind::Limit | OrderKind::StopLimit => match order.price {
                None => return Err(OrderBookError::MissingPrice { kind: order.kind }),
                Some(0) => return Err(OrderBookError::InvalidPrice { price: 0 }),
                Some(_) => {}
            },
            OrderKind::Market | OrderKind::StopMarket => {}
        }
        if order.kind.is_stop() {
            match order.stop_price {
                None => return Err(OrderBookError::MissingStopPrice { kind: order.kind }),
                Some(0) => return Err(OrderBookError::InvalidPrice { price: 0 }),
                Some(_) => {}
            }
        }
        Ok(())
    }

    /// Market admission: execute immediately, never rest.
    fn admit_market(
        &self,
        taker: &Arc<BookOrder>,
        trades: &mut Vec<Trade>,
        reject_reason: &mut Option<String>,
    ) {
        if taker.time_in_force == TimeInForce::Fok {
            let available = self.peek_depth(taker.side, None);
            if available < taker.quantity {
                taker.status.store(OrderStatus::Rejected);
                *reject_reason = Some(format!(
                    "fill-or-kill unfillable: requested {}, available {}",
                    taker.quantity, available
                ));
                self.emit_update(taker, 0, None);
                return;
            }
        }

        self.sweep(taker, None, trades);
        self.finish_nonresting(taker, reject_reason);
    }

    /// Limit admission: FOK simulates first, IOC sweeps without
    /// resting, GTC rests and runs the crossing loop.
    fn admit_limit(
        &self,
        taker: &Arc<BookOrder>,
        trades: &mut Vec<Trade>,
        reject_reason: &mut Option<String>,
    ) {
        match taker.time_in_force {
            TimeInForce::Fok => {
                let available = self.peek_depth(taker.side, Some(taker.price));
                if available < taker.quantity {
                    taker.status.store(OrderStatus::Rejected);
                    *reject_reason = Some(format!(
                        "fill-or-kill unfillable: requested {}, available {}",
                        taker.quantity, available
                    ));
                    self.emit_update(taker, 0, None);
                    return;
                }
                self.sweep(taker, Some(taker.price), trades);
            }
            TimeInForce::Ioc => {
                self.sweep(taker, Some(taker.price), trades);
                self.finish_nonresting(taker, reject_reason);
            }
            TimeInForce::Gtc => {
                let queue = match taker.side {
                    Side::Buy => BookQueue::Bids,
                    Side::Sell => BookQueue::Asks,
                };
                // Enqueue first, then close any cross; a partial fill
                // rests with the unfilled remainder.
                let _ = self.index_order(Arc::clone(taker), queue);
                self.match_crossing(trades);
                self.remove_if_terminal(taker);
            }
        }
    }

    /// Terminal bookkeeping for orders that never rest (market, IOC).
    fn finish_nonresting(&self, taker: &Arc<BookOrder>, reject_reason: &mut Option<String>) {
        if taker.remaining() == 0 {
            return;
        }
        let status = if taker.time_in_force == TimeInForce::Ioc {
            OrderStatus::Cancelled
        } else if taker.remaining() < taker.quantity {
            // Status DAG forbids PARTIALLY_FILLED → REJECTED.
            OrderStatus::Cancelled
        } else {
            OrderStatus::Rejected
        };
        taker.status.store(status);
        if status == OrderStatus::Rejected {
            *reject_reason = Some(format!(
                "insufficient liquidity: requested {}, filled 0",
                taker.quantity
            ));
        } else if taker.time_in_force != TimeInForce::Ioc {
            *reject_reason = Some(format!(
                "insufficient liquidity: remainder {} cancelled",
                taker.remaining()
            ));
        }
        self.emit_update(taker, 0, None);
    }
}
