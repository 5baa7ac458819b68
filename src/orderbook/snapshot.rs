//! Order book snapshot for market data

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::trace;

use super::book::OrderBook;
use super::order::Side;

/// Aggregated quantity resting at one price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceLevelSnapshot {
    /// The price of this level
    pub price: u128,
    /// Total remaining quantity at this price
    pub quantity: u64,
    /// Number of orders contributing to this level
    pub order_count: usize,
}

/// A snapshot of the order book state at a specific point in time.
///
/// Snapshots are deterministic: taking two snapshots with no mutation
/// in between yields identical values, which is what makes the
/// checksum in [`OrderBookSnapshotPackage`] meaningful.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBookSnapshot {
    /// The symbol or identifier for this order book
    pub symbol: String,
    /// The last trade price, if the book has traded
    pub last_trade_price: Option<u128>,
    /// Bid levels, best first, truncated to the requested depth
    pub bids: Vec<PriceLevelSnapshot>,
    /// Ask levels, best first, truncated to the requested depth
    pub asks: Vec<PriceLevelSnapshot>,
}

impl OrderBookSnapshot {
    /// Get the best bid price and quantity
    #[must_use]
    pub fn best_bid(&self) -> Option<(u128, u64)> {
        self.bids.first().map(|level| (level.price, level.quantity))
    }

    /// Get the best ask price and quantity
    #[must_use]
    pub fn best_ask(&self) -> Option<(u128, u64)> {
        self.asks.first().map(|level| (level.price, level.quantity))
    }

    /// Calculate the total volume on the bid side
    #[must_use]
    pub fn total_bid_volume(&self) -> u64 {
        self.bids.iter().map(|level| level.quantity).sum()
    }

    /// Calculate the total volume on the ask side
    #[must_use]
    pub fn total_ask_volume(&self) -> u64 {
        self.asks.iter().map(|level| level.quantity).sum()
    }
}

/// Format version used for checksum-enabled order book snapshots.
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// Wrapper that provides checksum validation for [`OrderBookSnapshot`]
/// instances.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderBookSnapshotPackage {
    /// Snapshot format version
    pub version: u32,
    /// Hex-encoded SHA-256 checksum of the serialized snapshot
    pub checksum: String,
    /// The snapshot contents
    pub snapshot: OrderBookSnapshot,
}

impl OrderBookSnapshotPackage {
    /// Creates a new snapshot package computing the checksum of the
    /// snapshot contents.
    pub fn new(snapshot: OrderBookSnapshot) -> Result<Self, serde_json::Error> {
        let checksum = Self::compute_checksum(&snapshot)?;
        Ok(Self {
            version: SNAPSHOT_FORMAT_VERSION,
            checksum,
            snapshot,
        })
    }

    /// Validates the checksum and version.
    pub fn verify(&self) -> Result<bool, serde_json::Error> {
        if self.version != SNAPSHOT_FORMAT_VERSION {
            return Ok(false);
        }
        let computed = Self::compute_checksum(&self.snapshot)?;
        Ok(computed == self.checksum)
    }

    fn compute_checksum(snapshot: &OrderBookSnapshot) -> Result<String, serde_json::Error> {
        let serialized = serde_json::to_vec(snapshot)?;
        let mut hasher = Sha256::new();
        hasher.update(&serialized);
        let digest = hasher.finalize();
        Ok(digest.iter().map(|b| format!("{b:02x}")).collect())
    }
}

impl OrderBook {
    /// Aggregates price levels to the requested depth for both sides.
    ///
    /// A `depth` of 0 returns empty sides with the last trade price.
    #[must_use]
    pub fn snapshot(&self, depth: usize) -> OrderBookSnapshot {
        let snapshot = OrderBookSnapshot {
            symbol: self.symbol.clone(),
            last_trade_price: self.last_trade_price(),
            bids: self.aggregate_side(Side::Buy, depth),
            asks: self.aggregate_side(Side::Sell, depth),
        };
        trace!(symbol = %self.symbol, depth, "snapshot taken");
        snapshot
    }

    fn aggregate_side(&self, side: Side, depth: usize) -> Vec<PriceLevelSnapshot> {
        let queue = match side {
            Side::Buy => &self.bids,
            Side::Sell => &self.asks,
        };

        let mut levels: Vec<PriceLevelSnapshot> = Vec::with_capacity(depth.min(32));
        for entry in queue.iter() {
            let order = entry.value();
            let remaining = order.remaining();
            if remaining == 0 {
                continue;
            }
            match levels.last_mut() {
                Some(level) if level.price == order.price => {
                    level.quantity = level.quantity.saturating_add(remaining);
                    level.order_count += 1;
                }
                _ => {
                    if levels.len() == depth {
                        break;
                    }
                    levels.push(PriceLevelSnapshot {
                        price: order.price,
                        quantity: remaining,
                        order_count: 1,
                    });
                }
            }
        }
        levels
    }
}
