//! Uniform reservoir sampling over primitive `i64` values
//!
//! Same algorithm and wire image as [`ReservoirSketch`], specialized to
//! `i64` with the fixed-width item encoding built in, so callers that
//! sample numeric streams never touch an [`ItemSerde`](crate::common::ItemSerde).

use crate::common::{ArrayOfLongsSerde, ResizeFactor, Result};
use crate::sampling::reservoir::ReservoirSketch;
use crate::sampling::subset_sum::SubsetSummary;
use std::fmt;

/// Uniform reservoir sketch over `i64` values
///
/// # Examples
///
/// ```
/// use sampling_oxide::sampling::ReservoirLongsSketch;
///
/// let mut sketch = ReservoirLongsSketch::new(64).unwrap();
/// for i in 0..10_000 {
///     sketch.update(i).unwrap();
/// }
/// let bytes = sketch.serialize();
/// let back = ReservoirLongsSketch::deserialize(&bytes).unwrap();
/// assert_eq!(back.samples(), sketch.samples());
/// ```
#[derive(Clone, Debug)]
pub struct ReservoirLongsSketch {
    inner: ReservoirSketch<i64>,
}

impl ReservoirLongsSketch {
    /// Creates a sketch with capacity `k` and the default X8 resize factor
    pub fn new(k: usize) -> Result<Self> {
        Ok(ReservoirLongsSketch {
            inner: ReservoirSketch::new(k)?,
        })
    }

    /// Creates a sketch with an explicit resize factor
    pub fn new_with_rf(k: usize, rf: ResizeFactor) -> Result<Self> {
        Ok(ReservoirLongsSketch {
            inner: ReservoirSketch::new_with_rf(k, rf)?,
        })
    }

    /// Creates a sketch with a fixed seed for reproducible runs
    pub fn with_seed(k: usize, seed: u64) -> Result<Self> {
        Ok(ReservoirLongsSketch {
            inner: ReservoirSketch::with_seed(k, seed)?,
        })
    }

    /// Offers a value to the reservoir
    pub fn update(&mut self, value: i64) -> Result<()> {
        self.inner.update(value)
    }

    /// Clears all state
    pub fn reset(&mut self) {
        self.inner.reset();
    }

    /// Borrowed view of the current sample
    pub fn samples(&self) -> &[i64] {
        self.inner.samples()
    }

    /// Number of values currently retained
    pub fn num_samples(&self) -> usize {
        self.inner.num_samples()
    }

    /// Total values offered
    pub fn n(&self) -> u64 {
        self.inner.n()
    }

    /// Configured capacity
    pub fn k(&self) -> usize {
        self.inner.k()
    }

    /// True if no values have been offered
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// True once the sketch holds a proper subsample
    pub fn estimation_mode(&self) -> bool {
        self.inner.estimation_mode()
    }

    /// Weight each retained value carries in stream-total estimates
    pub fn implicit_sample_weight(&self) -> f64 {
        self.inner.implicit_sample_weight()
    }

    /// Estimates the stream weight of values matching `predicate`
    pub fn estimate_subset_sum<P: Fn(&i64) -> bool>(&self, predicate: P) -> SubsetSummary {
        self.inner.estimate_subset_sum(predicate)
    }

    /// Serialized image size in bytes
    pub fn serialized_size_bytes(&self) -> usize {
        self.inner.serialized_size_bytes(&ArrayOfLongsSerde)
    }

    /// Writes the byte image
    pub fn serialize(&self) -> Vec<u8> {
        self.inner.serialize(&ArrayOfLongsSerde)
    }

    /// Reads a version 1 or version 2 byte image
    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        Ok(ReservoirLongsSketch {
            inner: ReservoirSketch::deserialize(bytes, &ArrayOfLongsSerde)?,
        })
    }

    pub(crate) fn inner(&self) -> &ReservoirSketch<i64> {
        &self.inner
    }

    pub(crate) fn from_inner(inner: ReservoirSketch<i64>) -> Self {
        ReservoirLongsSketch { inner }
    }
}

impl fmt::Display for ReservoirLongsSketch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.inner.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_then_sampling() {
        let mut sketch = ReservoirLongsSketch::with_seed(16, 21).unwrap();
        for i in 0..16 {
            sketch.update(i).unwrap();
        }
        assert!(!sketch.estimation_mode());
        for i in 16..200 {
            sketch.update(i).unwrap();
        }
        assert!(sketch.estimation_mode());
        assert_eq!(sketch.num_samples(), 16);
        assert_eq!(sketch.n(), 200);
    }

    #[test]
    fn test_round_trip() {
        let mut sketch = ReservoirLongsSketch::with_seed(8, 3).unwrap();
        for i in 0..100 {
            sketch.update(i * 3).unwrap();
        }
        let bytes = sketch.serialize();
        assert_eq!(bytes.len(), sketch.serialized_size_bytes());
        let back = ReservoirLongsSketch::deserialize(&bytes).unwrap();
        assert_eq!(back.n(), 100);
        assert_eq!(back.k(), 8);
        assert_eq!(back.samples(), sketch.samples());
    }

    #[test]
    fn test_empty_image_single_pre_long() {
        let sketch = ReservoirLongsSketch::new(5).unwrap();
        assert_eq!(sketch.serialize().len(), 8);
    }

    #[test]
    fn test_subset_sum_total_matches_n() {
        let mut sketch = ReservoirLongsSketch::with_seed(32, 4).unwrap();
        for i in 0..500 {
            sketch.update(i).unwrap();
        }
        let all = sketch.estimate_subset_sum(|_| true);
        assert_eq!(all.estimate, 500.0);
        assert_eq!(all.estimate, all.total_sketch_weight);
    }
}
