//! Core matching logic: taker sweeps, the crossing loop and stop
//! triggering.
//!
//! Every function here runs with the per-book operation lock held, so
//! matching is strictly serial per symbol and any transient cross is
//! closed before the lock is released.

use super::book::OrderBook;
use super::order::{BookOrder, BookQueue, OrderStatus, Side};
use super::trade::Trade;
use std::sync::Arc;
use tracing::trace;

impl OrderBook {
    /// Quantity available on the opposite side up to `limit`.
    ///
    /// Used to simulate a fill before executing (FOK admission).
    pub(super) fn peek_depth(&self, taker_side: Side, limit: Option<u128>) -> u64 {
        let opposite = match taker_side {
            Side::Buy => &self.asks,
            Side::Sell => &self.bids,
        };

        let mut available = 0u64;
        for entry in opposite.iter() {
            let price = entry.value().price;
            if let Some(limit) = limit {
                match taker_side {
                    Side::Buy if price > limit => break,
                    Side::Sell if price < limit => break,
                    _ => {}
                }
            }
            available = available.saturating_add(entry.value().remaining());
        }
        available
    }

    /// Executes an incoming taker against the opposite side.
    ///
    /// Walks price levels best-to-worst until the taker is filled, the
    /// book is exhausted, or the next maker violates `limit`. Trades are
    /// priced at the maker's limit price.
    pub(super) fn sweep(
        &self,
        taker: &Arc<BookOrder>,
        limit: Option<u128>,
        trades: &mut Vec<Trade>,
    ) {
        loop {
            if taker.remaining() == 0 {
                break;
            }

            let opposite = match taker.side {
                Side::Buy => &self.asks,
                Side::Sell => &self.bids,
            };

            let (maker_key, maker) = match opposite.front() {
                Some(entry) => (*entry.key(), Arc::clone(entry.value())),
                None => break,
            };

            if let Some(limit) = limit {
                match taker.side {
                    Side::Buy if maker.price > limit => break,
                    Side::Sell if maker.price < limit => break,
                    _ => {}
                }
            }

            let quantity = taker.remaining().min(maker.remaining());
            if quantity == 0 {
                // Stale tombstone: a maker with nothing left must not
                // block the front of the queue.
                opposite.remove(&maker_key);
                self.orders.remove(&maker.id);
                continue;
            }

            self.execute_fill(&maker, taker, maker.price, quantity, trades);

            if maker.remaining() == 0 {
                opposite.remove(&maker_key);
                self.orders.remove(&maker.id);
            }
        }
    }

    /// Runs the price–time-priority matching loop until the top of book
    /// no longer crosses.
    ///
    /// The earlier-arrival top is the maker and sets the trade price;
    /// price improvement goes to the taker.
    pub(super) fn match_crossing(&self, trades: &mut Vec<Trade>) {
        loop {
            let (bid_key, bid) = match self.bids.front() {
                Some(entry) => (*entry.key(), Arc::clone(entry.value())),
                None => break,
            };
            let (ask_key, ask) = match self.asks.front() {
                Some(entry) => (*entry.key(), Arc::clone(entry.value())),
                None => break,
            };

            if bid.price < ask.price {
                break;
            }

            // Earlier arrival rests; equal sequences fall back to the
            // older id for a deterministic outcome.
            let bid_is_maker = (bid.seq, bid.id) <= (ask.seq, ask.id);
            let (maker, taker) = if bid_is_maker {
                (&bid, &ask)
            } else {
                (&ask, &bid)
            };

            let quantity = maker.remaining().min(taker.remaining());
            if quantity == 0 {
                let (queue, key, dead) = if maker.remaining() == 0 {
                    if maker.side == Side::Buy {
                        (&self.bids, bid_key, maker)
                    } else {
                        (&self.asks, ask_key, maker)
                    }
                } else if taker.side == Side::Buy {
                    (&self.bids, bid_key, taker)
                } else {
                    (&self.asks, ask_key, taker)
                };
                queue.remove(&key);
                self.orders.remove(&dead.id);
                continue;
            }

            self.execute_fill(maker, taker, maker.price, quantity, trades);

            if bid.remaining() == 0 {
                self.bids.remove(&bid_key);
                self.orders.remove(&bid.id);
            }
            if ask.remaining() == 0 {
                self.asks.remove(&ask_key);
                self.orders.remove(&ask.id);
            }
        }
    }

    /// Applies one fill to both sides, records the last price and
    /// notifies listeners.
    fn execute_fill(
        &self,
        maker: &Arc<BookOrder>,
        taker: &Arc<BookOrder>,
        price: u128,
        quantity: u64,
        trades: &mut Vec<Trade>,
    ) {
        maker.fill(quantity);
        taker.fill(quantity);
        self.record_last_price(price);

        let trade = Trade::new(&self.symbol, price, quantity, maker.id, taker.id, taker.side);
        trace!(
            symbol = %self.symbol,
            price,
            quantity,
            maker = %maker.id,
            taker = %taker.id,
            "trade executed"
        );
        self.emit_trade(&trade);
        trades.push(trade);

        self.emit_update(maker, quantity, Some(price));
        self.emit_update(taker, quantity, Some(price));
    }

    /// Drains every stop order whose trigger condition holds against
    /// the current last trade price and re-admits it as the limit or
    /// market order it converts to.
    ///
    /// Triggered orders keep their admission sequence, so they retain
    /// their original time priority. Re-admitted orders can trade and
    /// move the last price again; the drain loops until it reaches a
    /// fixed point.
    pub(super) fn drain_triggered_stops(&self, trades: &mut Vec<Trade>) {
        loop {
            if !self.has_traded.load(std::sync::atomic::Ordering::Relaxed) {
                return;
            }
            let last = self.last_trade_price.load();

            let mut triggered: Vec<Arc<BookOrder>> = Vec::new();

            // Buy stops trigger when last price rises to the stop.
            while let Some(entry) = self.buy_stops.front() {
                let order = Arc::clone(entry.value());
                let key = *entry.key();
                drop(entry);
                let stop = order.stop_price.unwrap_or(order.price);
                if stop > last {
                    break;
                }
                self.buy_stops.remove(&key);
                self.orders.remove(&order.id);
                triggered.push(order);
            }

            // Sell stops trigger when last price falls to the stop.
            while let Some(entry) = self.sell_stops.front() {
                let order = Arc::clone(entry.value());
                let key = *entry.key();
                drop(entry);
                let stop = order.stop_price.unwrap_or(order.price);
                if stop < last {
                    break;
                }
                self.sell_stops.remove(&key);
                self.orders.remove(&order.id);
                triggered.push(order);
            }

            if triggered.is_empty() {
                return;
            }

            for order in triggered {
                let converted = order.kind.load().triggered_kind();
                order.kind.store(converted);
                trace!(
                    symbol = %self.symbol,
                    order_id = %order.id,
                    kind = %converted,
                    "stop triggered"
                );

                if converted == super::order::OrderKind::Market {
                    self.sweep(&order, None, trades);
                    if order.remaining() > 0 {
                        let status = if order.remaining() < order.quantity {
                            OrderStatus::Cancelled
                        } else {
                            OrderStatus::Rejected
                        };
                        order.status.store(status);
                        self.emit_update(&order, 0, None);
                    }
                } else {
                    let queue = match order.side {
                        Side::Buy => BookQueue::Bids,
                        Side::Sell => BookQueue::Asks,
                    };
                    let _ = self.index_order(Arc::clone(&order), queue);
                    self.match_crossing(trades);
                }
            }
        }
    }
}
