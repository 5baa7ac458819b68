//! Positions held by strategies: single-symbol and pair.

use crate::orderbook::Side;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A signed single-symbol position with volume-weighted entry price.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Position {
    /// Trading symbol
    pub symbol: String,
    /// Signed quantity: positive long, negative short
    pub quantity: f64,
    /// Volume-weighted entry price of the open quantity
    pub entry_price: f64,
    /// Current mark price
    pub mark: f64,
    /// Profit realized by reducing fills
    pub realized_pnl: f64,
    /// Monotonic nanoseconds when the position was opened
    pub entry_time_ns: u64,
}

impl Position {
    /// Empty position for a symbol.
    #[must_use]
    pub fn new(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            ..Self::default()
        }
    }

    /// Whether any quantity is open.
    #[must_use]
    #[inline]
    pub fn is_open(&self) -> bool {
        self.quantity != 0.0
    }

    /// Unrealized P&L at the current mark.
    #[must_use]
    pub fn unrealized_pnl(&self) -> f64 {
        (self.mark - self.entry_price) * self.quantity
    }

    /// Updates the mark price.
    pub fn mark_to(&mut self, price: f64) {
        self.mark = price;
    }

    /// Applies a fill, adjusting entry price and realized P&L.
    ///
    /// Fills in the position's direction extend it at a volume-weighted
    /// entry; opposing fills realize P&L on the closed quantity and may
    /// flip the position.
    pub fn apply_fill(&mut self, side: Side, quantity: f64, price: f64, now_ns: u64) {
        let signed = match side {
            Side::Buy => quantity,
            Side::Sell => -quantity,
        };
        self.mark = price;

        if self.quantity == 0.0 || self.quantity.signum() == signed.signum() {
            // Extending: volume-weighted entry.
            let total = self.quantity + signed;
            if self.quantity == 0.0 {
                self.entry_time_ns = now_ns;
                self.entry_price = price;
            } else {
                self.entry_price = (self.entry_price * self.quantity.abs()
                    + price * signed.abs())
                    / total.abs();
            }
            self.quantity = total;
            return;
        }

        // Reducing or flipping.
        let closed = signed.abs().min(self.quantity.abs());
        let direction = self.quantity.signum();
        self.realized_pnl += (price - self.entry_price) * closed * direction;
        let remainder = self.quantity + signed;

        if remainder == 0.0 {
            self.quantity = 0.0;
            self.entry_price = 0.0;
        } else if remainder.signum() == direction {
            // Partial reduce: entry price unchanged.
            self.quantity = remainder;
        } else {
            // Flip: the excess opens a new position at the fill price.
            self.quantity = remainder;
            self.entry_price = price;
            self.entry_time_ns = now_ns;
        }
    }
}

/// Direction of a pair position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PairDirection {
    /// Long symbol 1, short symbol 2
    Long,
    /// Short symbol 1, long symbol 2
    Short,
}

/// A two-legged position opened by the stat-arb engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairPosition {
    /// Unique position identifier
    pub id: Uuid,
    /// The tracked pair this position belongs to
    pub pair_id: Uuid,
    /// First leg symbol
    pub symbol1: String,
    /// Second leg symbol
    pub symbol2: String,
    /// Signed quantity of the first leg
    pub quantity1: f64,
    /// Signed quantity of the second leg
    pub quantity2: f64,
    /// First leg entry price
    pub entry_price1: f64,
    /// Second leg entry price
    pub entry_price2: f64,
    /// Spread value at entry
    pub entry_spread: f64,
    /// Z-score at entry
    pub entry_zscore: f64,
    /// Long or short the spread
    pub direction: PairDirection,
    /// Monotonic nanoseconds at open
    pub opened_ns: u64,
    /// Monotonic nanoseconds at close, if closed
    pub closed_ns: Option<u64>,
    /// P&L realized at close
    pub realized_pnl: f64,
}

impl PairPosition {
    /// Whether the position is still open.
    #[must_use]
    #[inline]
    pub fn is_open(&self) -> bool {
        self.closed_ns.is_none()
    }

    /// Closes the position at the given leg prices and returns the
    /// realized P&L.
    pub fn close(&mut self, price1: f64, price2: f64, now_ns: u64) -> f64 {
        let pnl = (price1 - self.entry_price1) * self.quantity1
            + (price2 - self.entry_price2) * self.quantity2;
        self.realized_pnl = pnl;
        self.closed_ns = Some(now_ns);
        pnl
    }
}
