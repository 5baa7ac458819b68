//! Repository interfaces consumed by the stat-arb engine, with
//! in-memory implementations used by tests and standalone runs.
//!
//! Real deployments substitute database-backed implementations; the
//! engine only sees these traits.

use super::position::PairPosition;
use crate::resilience::CancelToken;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;
use thiserror::Error;
use uuid::Uuid;

/// Failure of a repository call.
#[derive(Debug, Clone, Error)]
pub enum RepositoryError {
    /// The backing store is unreachable
    #[error("repository unavailable: {0}")]
    Unavailable(String),

    /// The record could not be encoded or decoded
    #[error("repository serialization failure: {0}")]
    Serialization(String),

    /// The call observed a cancelled context
    #[error("repository call cancelled")]
    Cancelled,
}

/// Tracked pair and its latest characteristics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairRecord {
    /// Pair identifier
    pub id: Uuid,
    /// First leg symbol
    pub symbol1: String,
    /// Second leg symbol
    pub symbol2: String,
    /// Hedge ratio applied to the second leg
    pub ratio: f64,
    /// Most recent z-score
    pub last_zscore: f64,
    /// Monotonic nanoseconds of the last update
    pub updated_ns: u64,
}

/// One persisted sample of pair statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairStatisticsRecord {
    /// Pair this sample belongs to
    pub pair_id: Uuid,
    /// Pearson correlation of the two legs
    pub correlation: f64,
    /// Mean of the spread over the window
    pub spread_mean: f64,
    /// Standard deviation of the spread over the window
    pub spread_std_dev: f64,
    /// Z-score of the current spread
    pub zscore: f64,
    /// Monotonic nanoseconds when the sample was taken
    pub timestamp_ns: u64,
}

/// Lookup and update of tracked pairs.
pub trait PairRepository: Send + Sync {
    /// The pair for two symbols, if tracked.
    fn get(
        &self,
        ctx: &CancelToken,
        symbol1: &str,
        symbol2: &str,
    ) -> Result<Option<PairRecord>, RepositoryError>;

    /// Insert or update a pair.
    fn update(&self, ctx: &CancelToken, pair: &PairRecord) -> Result<(), RepositoryError>;
}

/// Append-only store of pair statistics samples.
pub trait PairStatisticsRepository: Send + Sync {
    /// Persist one sample.
    fn create(&self, ctx: &CancelToken, record: &PairStatisticsRecord)
    -> Result<(), RepositoryError>;
}

/// Store of pair positions.
pub trait PairPositionRepository: Send + Sync {
    /// Open positions for a pair.
    fn get_open(
        &self,
        ctx: &CancelToken,
        pair_id: Uuid,
    ) -> Result<Vec<PairPosition>, RepositoryError>;

    /// Persist a newly opened position.
    fn create(&self, ctx: &CancelToken, position: &PairPosition) -> Result<(), RepositoryError>;

    /// Persist a position update (including closes).
    fn update(&self, ctx: &CancelToken, position: &PairPosition) -> Result<(), RepositoryError>;
}

fn check(ctx: &CancelToken) -> Result<(), RepositoryError> {
    if ctx.is_cancelled() {
        Err(RepositoryError::Cancelled)
    } else {
        Ok(())
    }
}

/// In-memory [`PairRepository`].
#[derive(Debug, Default)]
pub struct InMemoryPairRepository {
    pairs: RwLock<HashMap<(String, String), PairRecord>>,
}

impl InMemoryPairRepository {
    /// Empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl PairRepository for InMemoryPairRepository {
    fn get(
        &self,
        ctx: &CancelToken,
        symbol1: &str,
        symbol2: &str,
    ) -> Result<Option<PairRecord>, RepositoryError> {
        check(ctx)?;
        Ok(self
            .pairs
            .read()
            .expect("pair lock poisoned")
            .get(&(symbol1.to_string(), symbol2.to_string()))
            .cloned())
    }

    fn update(&self, ctx: &CancelToken, pair: &PairRecord) -> Result<(), RepositoryError> {
        check(ctx)?;
        self.pairs
            .write()
            .expect("pair lock poisoned")
            .insert((pair.symbol1.clone(), pair.symbol2.clone()), pair.clone());
        Ok(())
    }
}

/// In-memory [`PairStatisticsRepository`].
#[derive(Debug, Default)]
pub struct InMemoryPairStatisticsRepository {
    samples: RwLock<Vec<PairStatisticsRecord>>,
}

impl InMemoryPairStatisticsRepository {
    /// Empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All persisted samples, oldest first.
    #[must_use]
    pub fn samples(&self) -> Vec<PairStatisticsRecord> {
        self.samples.read().expect("stats lock poisoned").clone()
    }
}

impl PairStatisticsRepository for InMemoryPairStatisticsRepository {
    fn create(
        &self,
        ctx: &CancelToken,
        record: &PairStatisticsRecord,
    ) -> Result<(), RepositoryError> {
        check(ctx)?;
        self.samples
            .write()
            .expect("stats lock poisoned")
            .push(record.clone());
        Ok(())
    }
}

/// In-memory [`PairPositionRepository`].
#[derive(Debug, Default)]
pub struct InMemoryPairPositionRepository {
    positions: RwLock<HashMap<Uuid, PairPosition>>,
}

impl InMemoryPairPositionRepository {
    /// Empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stored position, open and closed.
    #[must_use]
    pub fn all(&self) -> Vec<PairPosition> {
        self.positions
            .read()
            .expect("position lock poisoned")
            .values()
            .cloned()
            .collect()
    }
}

impl PairPositionRepository for InMemoryPairPositionRepository {
    fn get_open(
        &self,
        ctx: &CancelToken,
        pair_id: Uuid,
    ) -> Result<Vec<PairPosition>, RepositoryError> {
        check(ctx)?;
        Ok(self
            .positions
            .read()
            .expect("position lock poisoned")
            .values()
            .filter(|position| position.pair_id == pair_id && position.is_open())
            .cloned()
            .collect())
    }

    fn create(&self, ctx: &CancelToken, position: &PairPosition) -> Result<(), RepositoryError> {
        check(ctx)?;
        self.positions
            .write()
            .expect("position lock poisoned")
            .insert(position.id, position.clone());
        Ok(())
    }

    fn update(&self, ctx: &CancelToken, position: &PairPosition) -> Result<(), RepositoryError> {
        check(ctx)?;
        self.positions
            .write()
            .expect("position lock poisoned")
            .insert(position.id, position.clone());
        Ok(())
    }
}
