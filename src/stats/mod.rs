//! Online statistics over price streams.
//!
//! Welford's algorithm keeps mean and variance numerically stable in
//! one pass; the `update`/`remove` paths adjust the aggregates
//! algebraically in O(1) for sliding windows. Pure computation, no
//! locking: owners serialize access.

use serde::{Deserialize, Serialize};

/// Running count, mean, variance, min, max and z-score for one stream.
///
/// `remove` and `update` are best-effort for `min`/`max`: aggregates
/// alone cannot reconstruct them, and in a sliding window they
/// re-stabilize as fresh samples arrive.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IncrementalStatistics {
    count: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
    initialized: bool,
}

impl IncrementalStatistics {
    /// Creates an empty accumulator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Welford single-pass update.
    pub fn add(&mut self, x: f64) {
        self.count += 1;
        let delta = x - self.mean;
        self.mean += delta / self.count as f64;
        let delta2 = x - self.mean;
        self.m2 += delta * delta2;

        if !self.initialized || x < self.min {
            self.min = x;
        }
        if !self.initialized || x > self.max {
            self.max = x;
        }
        self.initialized = true;
    }

    /// Approximate inverse of [`Self::add`].
    ///
    /// Leaves the accumulator untouched when empty; resets it when the
    /// last sample is removed. `min`/`max` are left as-is.
    pub fn remove(&mut self, x: f64) {
        match self.count {
            0 => {}
            1 => self.reset(),
            _ => {
                let count = self.count as f64;
                let mean_without = (count * self.mean - x) / (count - 1.0);
                self.m2 -= (x - self.mean) * (x - mean_without);
                if self.m2 < 0.0 {
                    self.m2 = 0.0;
                }
                self.mean = mean_without;
                self.count -= 1;
            }
        }
    }

    /// Single-step slide: replaces `old_x` with `new_x` in one pass.
    ///
    /// Mean and M2 are adjusted algebraically; this is not
    /// `remove(old_x)` followed by `add(new_x)`.
    pub fn update(&mut self, old_x: f64, new_x: f64) {
        if self.count == 0 {
            self.add(new_x);
            return;
        }
        let count = self.count as f64;
        let delta = new_x - old_x;
        let old_mean = self.mean;
        self.mean += delta / count;
        self.m2 += delta * (old_x + new_x - old_mean - self.mean);
        if self.m2 < 0.0 {
            self.m2 = 0.0;
        }

        if new_x < self.min {
            self.min = new_x;
        }
        if new_x > self.max {
            self.max = new_x;
        }
    }

    /// Clears the accumulator.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Number of samples.
    #[must_use]
    #[inline]
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Running mean, 0.0 when empty.
    #[must_use]
    #[inline]
    pub fn mean(&self) -> f64 {
        self.mean
    }

    /// Sample variance; 0.0 below 2 samples.
    #[must_use]
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }

    /// Sample standard deviation; 0.0 below 2 samples.
    #[must_use]
    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    /// Smallest observed sample, 0.0 when empty.
    #[must_use]
    #[inline]
    pub fn min(&self) -> f64 {
        if self.initialized { self.min } else { 0.0 }
    }

    /// Largest observed sample, 0.0 when empty.
    #[must_use]
    #[inline]
    pub fn max(&self) -> f64 {
        if self.initialized { self.max } else { 0.0 }
    }

    /// Standardized deviation `(x − mean) / stdDev`, 0.0 when the
    /// standard deviation is not positive.
    #[must_use]
    pub fn z_score(&self, x: f64) -> f64 {
        let std_dev = self.std_dev();
        if std_dev > 0.0 {
            (x - self.mean) / std_dev
        } else {
            0.0
        }
    }
}

/// Online Pearson correlation over paired samples.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IncrementalCorrelation {
    count: u64,
    mean_x: f64,
    mean_y: f64,
    /// Accumulated cross-deviation Σ(x−mean_x)(y−mean_y)
    c: f64,
    m2_x: f64,
    m2_y: f64,
}

impl IncrementalCorrelation {
    /// Creates an empty accumulator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one paired observation.
    pub fn add(&mut self, x: f64, y: f64) {
        self.count += 1;
        let count = self.count as f64;
        let dx = x - self.mean_x;
        let dy = y - self.mean_y;
        self.mean_x += dx / count;
        self.mean_y += dy / count;
        self.c += dx * (y - self.mean_y);
        self.m2_x += dx * (x - self.mean_x);
        self.m2_y += dy * (y - self.mean_y);
    }

    /// Replaces the pair `(old_x, old_y)` with `(new_x, new_y)` in one
    /// pass, for sliding windows.
    pub fn update(&mut self, old_x: f64, old_y: f64, new_x: f64, new_y: f64) {
        if self.count == 0 {
            self.add(new_x, new_y);
            return;
        }
        let count = self.count as f64;
        let dx = new_x - old_x;
        let dy = new_y - old_y;
        let old_mean_x = self.mean_x;
        let old_mean_y = self.mean_y;
        self.mean_x += dx / count;
        self.mean_y += dy / count;
        self.m2_x += dx * (old_x + new_x - old_mean_x - self.mean_x);
        self.m2_y += dy * (old_y + new_y - old_mean_y - self.mean_y);
        // Cross term: Σxy changes by new_x·new_y − old_x·old_y;
        // C = Σxy − n·mean_x·mean_y.
        self.c += new_x * new_y - old_x * old_y
            - count * (self.mean_x * self.mean_y - old_mean_x * old_mean_y);
        if self.m2_x < 0.0 {
            self.m2_x = 0.0;
        }
        if self.m2_y < 0.0 {
            self.m2_y = 0.0;
        }
    }

    /// Clears the accumulator.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Number of paired samples.
    #[must_use]
    #[inline]
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Pearson correlation coefficient; 0.0 when either variance is
    /// zero or fewer than 2 pairs were observed.
    #[must_use]
    pub fn correlation(&self) -> f64 {
        if self.count < 2 {
            return 0.0;
        }
        let denom = (self.m2_x * self.m2_y).sqrt();
        if denom > 0.0 { self.c / denom } else { 0.0 }
    }
}
