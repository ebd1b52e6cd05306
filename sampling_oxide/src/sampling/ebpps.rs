//! EBPPS: exact probability-proportional-to-size sampling with a bounded
//! sample size
//!
//! Implementation of the EBPPS algorithm (Hentschel, Haas, Tian 2023). The
//! sketch maintains a scaling factor rho such that every offered item is in
//! the sample with probability exactly rho times its weight. The sample has
//! a compact canonical form: floor(c) full items plus at most one partial
//! item whose presence probability is the fractional part of c, where
//! c = rho * cumulative_weight is the expected sample size.
//!
//! Each update shrinks rho just enough to keep c at or below k and to keep
//! rho * max_weight at or below one, then rescales the existing sample by
//! the rho ratio and folds the new item in with probability rho * weight.
//!
//! # Time Complexity
//!
//! - Update: O(1) expected (amortized over the canonical-form transitions)
//! - Merge: O(k)
//! - Result retrieval: O(k)
//!
//! # References
//!
//! - Hentschel, B., Haas, P. J., Tian, Y. (2023). "Exact PPS sampling with
//!   bounded sample size"

use crate::common::{validation, ItemSerde, Result, SketchError, SketchRng};
use crate::sampling::preamble::{self, Family, Preamble};
use crate::sampling::subset_sum::{self, SubsetSummary};
use std::fmt;

/// Canonical EBPPS sample: full items plus an optional partial item
#[derive(Clone, Debug)]
struct EbppsSample<T: Clone> {
    c: f64,
    data: Vec<T>,
    partial: Option<T>,
}

impl<T: Clone> EbppsSample<T> {
    fn empty() -> Self {
        EbppsSample {
            c: 0.0,
            data: Vec::new(),
            partial: None,
        }
    }

    // a single item with inclusion probability theta in (0, 1]
    fn single(item: T, theta: f64) -> Self {
        debug_assert!(theta > 0.0 && theta <= 1.0);
        if theta == 1.0 {
            EbppsSample {
                c: 1.0,
                data: vec![item],
                partial: None,
            }
        } else {
            EbppsSample {
                c: theta,
                data: Vec::new(),
                partial: Some(item),
            }
        }
    }

    // Multiplies every item's presence probability by theta while restoring
    // the canonical form. Large reductions are decomposed into steps that
    // each retire at most one full slot; the per-step transition kernels
    // keep every item's marginal presence exactly proportional.
    fn downsample(&mut self, theta: f64, rng: &mut SketchRng) {
        if theta >= 1.0 || self.c == 0.0 {
            return;
        }
        let target = theta * self.c;
        while self.c.floor() - target.floor() >= 2.0 {
            let mid = self.c.floor() - 1.0;
            self.downsample_step(mid, rng);
        }
        self.downsample_step(target, rng);
    }

    fn downsample_step(&mut self, new_c: f64, rng: &mut SketchRng) {
        debug_assert!(new_c <= self.c);
        if new_c >= self.c {
            return;
        }
        let c_int = self.c.floor();
        let c_frac = self.c - c_int;
        let new_int = new_c.floor();
        let new_frac = new_c - new_int;
        let theta = new_c / self.c;

        if new_int == 0.0 {
            // collapse to one partial item: the old partial is chosen in
            // proportion to its presence, each full item in proportion to 1
            let keep_partial =
                self.partial.is_some() && rng.next_double() < c_frac / self.c;
            if !keep_partial && !self.data.is_empty() {
                let idx = rng.next_index(self.data.len() as u64) as usize;
                self.partial = Some(self.data.swap_remove(idx));
            }
            self.data.clear();
        } else if new_int == c_int {
            // slot count unchanged; the partial may trade places with a
            // uniformly chosen full item
            let p_promote = (1.0 - theta) * c_int / (1.0 - new_frac);
            if self.partial.is_some() && rng.next_double() < p_promote {
                let idx = rng.next_index(self.data.len() as u64) as usize;
                let promoted = self.partial.take().expect("partial checked above");
                self.partial = Some(std::mem::replace(&mut self.data[idx], promoted));
            }
        } else {
            debug_assert_eq!(new_int, c_int - 1.0);
            if self.partial.is_none() {
                // no partial: a uniform full item becomes the partial
                let idx = rng.next_index(self.data.len() as u64) as usize;
                self.partial = Some(self.data.swap_remove(idx));
            } else {
                let scaled_frac = theta * c_frac;
                if scaled_frac <= new_frac {
                    // the partial either stays (deleting a uniform full
                    // item) or leaves and a full item is demoted in its place
                    if new_frac > 0.0 && rng.next_double() < scaled_frac / new_frac {
                        let idx = rng.next_index(self.data.len() as u64) as usize;
                        self.data.swap_remove(idx);
                    } else {
                        let idx = rng.next_index(self.data.len() as u64) as usize;
                        self.partial = Some(self.data.swap_remove(idx));
                    }
                } else {
                    // the partial is too present to shrink in place: promote
                    // it to a full slot with probability theta * c_frac,
                    // retiring one full item and demoting another
                    if rng.next_double() < scaled_frac {
                        let promoted = self.partial.take().expect("partial present");
                        let del = rng.next_index(self.data.len() as u64) as usize;
                        self.data.swap_remove(del);
                        let dem = rng.next_index(self.data.len() as u64) as usize;
                        self.partial = Some(std::mem::replace(&mut self.data[dem], promoted));
                    } else {
                        let idx = rng.next_index(self.data.len() as u64) as usize;
                        self.partial = Some(self.data.swap_remove(idx));
                    }
                }
            }
        }

        self.c = new_c;
        if new_frac == 0.0 {
            self.partial = None;
        }
        debug_assert_eq!(self.data.len() as f64, self.c.floor());
    }

    // Combines two canonical samples. Full items concatenate; the two
    // partials collapse into at most one, promoting a full item when the
    // fractional parts sum past one.
    fn combine(&mut self, other: &EbppsSample<T>, rng: &mut SketchRng) {
        let c_frac = self.c - self.c.floor();
        let other_frac = other.c - other.c.floor();
        self.c += other.c;
        self.data.extend(other.data.iter().cloned());

        let frac_sum = c_frac + other_frac;
        if frac_sum == 0.0 {
            self.partial = None;
        } else if frac_sum == 1.0 || self.c == self.c.floor() {
            // exactly one of the two partials becomes full, each chosen in
            // proportion to its own presence
            let promoted = if rng.next_double() * frac_sum < c_frac {
                self.partial.take()
            } else {
                other.partial.clone()
            };
            if let Some(item) = promoted {
                self.data.push(item);
            }
            self.partial = None;
        } else if frac_sum < 1.0 {
            if rng.next_double() * frac_sum < other_frac {
                self.partial = other.partial.clone();
            }
        } else {
            // one partial fills a slot, the other carries the remainder
            let p_self_full = (1.0 - other_frac) / (2.0 - frac_sum);
            if rng.next_double() < p_self_full {
                if let Some(item) = self.partial.take() {
                    self.data.push(item);
                }
                self.partial = other.partial.clone();
            } else if let Some(item) = other.partial.clone() {
                self.data.push(item);
            }
        }
    }
}

/// EBPPS weighted sampling sketch
///
/// # Examples
///
/// ```
/// use sampling_oxide::sampling::EbppsSketch;
///
/// let mut sketch: EbppsSketch<u32> = EbppsSketch::new(50).unwrap();
/// for i in 0..1000 {
///     sketch.update(i, 1.0 + (i % 10) as f64).unwrap();
/// }
/// let sample = sketch.get_result();
/// assert!(sample.len() <= 50);
/// ```
#[derive(Clone, Debug)]
pub struct EbppsSketch<T: Clone> {
    k: usize,
    n: u64,
    cumulative_wt: f64,
    wt_max: f64,
    rho: f64,
    sample: EbppsSample<T>,
    rng: SketchRng,
}

impl<T: Clone> EbppsSketch<T> {
    /// Creates a sketch with target sample size `k`
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` if k is 0 or exceeds 2^31 - 2.
    pub fn new(k: usize) -> Result<Self> {
        Self::with_rng(k, SketchRng::new())
    }

    /// Creates a sketch with a fixed seed for reproducible runs
    pub fn with_seed(k: usize, seed: u64) -> Result<Self> {
        Self::with_rng(k, SketchRng::with_seed(seed))
    }

    fn with_rng(k: usize, rng: SketchRng) -> Result<Self> {
        validation::validate_sample_size(k as u64)?;
        Ok(EbppsSketch {
            k,
            n: 0,
            cumulative_wt: 0.0,
            wt_max: 0.0,
            rho: 1.0,
            sample: EbppsSample::empty(),
            rng,
        })
    }

    /// Offers a weighted item
    ///
    /// Shrinks rho if needed, rescales the existing sample by the rho
    /// ratio, then folds the item in with probability rho * weight. Draw
    /// order: the downsample transition first, then the partial-combine
    /// draw for the new item.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` for a non-positive, NaN, or infinite
    /// weight, and `CapacityExceeded` once 2^48 - 2 items have been offered.
    pub fn update(&mut self, item: T, weight: f64) -> Result<()> {
        validation::validate_weight(weight)?;
        validation::validate_stream_length(self.n)?;

        let new_cum = self.cumulative_wt + weight;
        let new_max = self.wt_max.max(weight);
        let new_rho = (1.0 / new_max).min(self.k as f64 / new_cum);

        if self.cumulative_wt > 0.0 {
            self.sample.downsample(new_rho / self.rho, &mut self.rng);
        }
        let incoming = EbppsSample::single(item, (new_rho * weight).min(1.0));
        self.sample.combine(&incoming, &mut self.rng);

        self.cumulative_wt = new_cum;
        self.wt_max = new_max;
        self.rho = new_rho;
        self.n += 1;
        if self.sample.c > self.k as f64 {
            // floating-point drift guard
            self.sample.c = self.k as f64;
        }
        Ok(())
    }

    /// Offers an optional weighted item; `None` is a silent no-op
    pub fn update_opt(&mut self, item: Option<T>, weight: f64) -> Result<()> {
        match item {
            Some(item) => self.update(item, weight),
            None => Ok(()),
        }
    }

    /// Merges another sketch into this one
    ///
    /// Both samples are rescaled to the smaller resulting rho and combined;
    /// the resulting k is the smaller of the two.
    pub fn merge(&mut self, other: &EbppsSketch<T>) -> Result<()> {
        if other.is_empty() {
            return Ok(());
        }
        let combined_n = self
            .n
            .checked_add(other.n)
            .filter(|&n| n <= validation::MAX_STREAM_LENGTH)
            .ok_or(SketchError::CapacityExceeded {
                limit: validation::MAX_STREAM_LENGTH,
            })?;

        let new_k = self.k.min(other.k);
        let new_cum = self.cumulative_wt + other.cumulative_wt;
        let new_max = self.wt_max.max(other.wt_max);
        let new_rho = (1.0 / new_max).min(new_k as f64 / new_cum);

        self.sample.downsample(new_rho / self.rho, &mut self.rng);
        let mut other_sample = other.sample.clone();
        other_sample.downsample(new_rho / other.rho, &mut self.rng);
        self.sample.combine(&other_sample, &mut self.rng);

        self.k = new_k;
        self.n = combined_n;
        self.cumulative_wt = new_cum;
        self.wt_max = new_max;
        self.rho = new_rho;
        if self.sample.c > self.k as f64 {
            self.sample.c = self.k as f64;
        }
        Ok(())
    }

    /// Clears all state
    pub fn reset(&mut self) {
        self.n = 0;
        self.cumulative_wt = 0.0;
        self.wt_max = 0.0;
        self.rho = 1.0;
        self.sample = EbppsSample::empty();
    }

    /// Returns the sample: all full items, plus the partial item with
    /// probability c - floor(c)
    pub fn get_result(&mut self) -> Vec<T> {
        let mut out = self.sample.data.clone();
        let frac = self.sample.c - self.sample.c.floor();
        if let Some(partial) = &self.sample.partial {
            if self.rng.next_double() < frac {
                out.push(partial.clone());
            }
        }
        out
    }

    /// Target maximum sample size
    pub fn k(&self) -> usize {
        self.k
    }

    /// Total items offered
    pub fn n(&self) -> u64 {
        self.n
    }

    /// True if no items have been offered
    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    /// Expected sample size c
    pub fn c(&self) -> f64 {
        self.sample.c
    }

    /// Current scaling factor rho
    pub fn rho(&self) -> f64 {
        self.rho
    }

    /// Sum of all offered weights
    pub fn cumulative_weight(&self) -> f64 {
        self.cumulative_wt
    }

    /// Largest weight observed
    pub fn max_weight(&self) -> f64 {
        self.wt_max
    }

    /// Estimates the stream weight of items matching `predicate`
    ///
    /// Every sampled item has inclusion probability rho times its weight,
    /// so each contributes 1/rho to its subset estimate; the partial item
    /// contributes its fractional presence.
    pub fn estimate_subset_sum<P: Fn(&T) -> bool>(&self, predicate: P) -> SubsetSummary {
        if self.n == 0 {
            return subset_sum::estimate_with_bounds(0.0, 0.0, 0.0, 0.0, 0);
        }
        let frac = self.sample.c - self.sample.c.floor();
        let mut matched_presence = self
            .sample
            .data
            .iter()
            .filter(|item| predicate(item))
            .count() as f64;
        if let Some(partial) = &self.sample.partial {
            if predicate(partial) {
                matched_presence += frac;
            }
        }
        subset_sum::estimate_with_bounds(
            0.0,
            0.0,
            matched_presence / self.rho,
            self.sample.c / self.rho,
            self.sample.c.ceil() as u64,
        )
    }

    /// Serialized image size in bytes, given the item encoding
    pub fn serialized_size_bytes<S: ItemSerde<T>>(&self, serde: &S) -> usize {
        self.serialize(serde).len()
    }

    /// Writes the byte image
    ///
    /// Empty: one preamble long. Otherwise six preamble longs carrying the
    /// cumulative weight, max weight, rho and c, then the full-item count,
    /// the partial-item flag, and the items.
    pub fn serialize<S: ItemSerde<T>>(&self, serde: &S) -> Vec<u8> {
        let mut out = Vec::new();
        if self.n == 0 {
            Preamble::new(
                Family::Ebpps,
                1,
                preamble::FLAG_EMPTY,
                self.k as u32,
                0,
            )
            .write(&mut out);
            return out;
        }
        Preamble::new(Family::Ebpps, 6, 0, self.k as u32, self.n).write(&mut out);
        out.extend_from_slice(&self.cumulative_wt.to_le_bytes());
        out.extend_from_slice(&self.wt_max.to_le_bytes());
        out.extend_from_slice(&self.rho.to_le_bytes());
        out.extend_from_slice(&self.sample.c.to_le_bytes());
        out.extend_from_slice(&(self.sample.data.len() as u32).to_le_bytes());
        out.push(self.sample.partial.is_some() as u8);
        let mut items: Vec<T> = self.sample.data.clone();
        if let Some(partial) = &self.sample.partial {
            items.push(partial.clone());
        }
        out.extend_from_slice(&serde.serialize_to_bytes(&items));
        out
    }

    /// Reads a byte image
    pub fn deserialize<S: ItemSerde<T>>(bytes: &[u8], serde: &S) -> Result<Self> {
        let pre = Preamble::parse(bytes)?;
        if pre.family != Family::Ebpps {
            return Err(SketchError::CorruptImage {
                field: "family".to_string(),
                reason: format!("expected EBPPS, found 0x{:02x}", pre.family.id()),
            });
        }
        let k = pre.k as usize;
        if pre.is_empty() {
            return Self::new(k);
        }

        validation::validate_min_size(bytes.len(), 6 * preamble::PREAMBLE_LONG_BYTES + 5)?;
        let cumulative_wt = f64::from_le_bytes(bytes[16..24].try_into().unwrap());
        let wt_max = f64::from_le_bytes(bytes[24..32].try_into().unwrap());
        let rho = f64::from_le_bytes(bytes[32..40].try_into().unwrap());
        let c = f64::from_le_bytes(bytes[40..48].try_into().unwrap());
        if cumulative_wt.is_nan() || cumulative_wt < 0.0 {
            return Err(SketchError::CorruptImage {
                field: "cumulativeWeight".to_string(),
                reason: format!("{} must be a non-negative number", cumulative_wt),
            });
        }
        if !wt_max.is_finite() || wt_max < 0.0 {
            return Err(SketchError::CorruptImage {
                field: "maxWeight".to_string(),
                reason: format!("{} must be non-negative and finite", wt_max),
            });
        }
        if !(rho > 0.0) || !rho.is_finite() {
            return Err(SketchError::CorruptImage {
                field: "rho".to_string(),
                reason: format!("{} must be positive and finite", rho),
            });
        }
        if c.is_nan() || c < 0.0 || c > k as f64 {
            return Err(SketchError::CorruptImage {
                field: "c".to_string(),
                reason: format!("{} must lie in [0, k]", c),
            });
        }

        let num_full = u32::from_le_bytes(bytes[48..52].try_into().unwrap()) as usize;
        let has_partial = match bytes[52] {
            0 => false,
            1 => true,
            other => {
                return Err(SketchError::CorruptImage {
                    field: "partialItem".to_string(),
                    reason: format!("flag must be 0 or 1, found {}", other),
                });
            }
        };
        if num_full as f64 != c.floor() {
            return Err(SketchError::CorruptImage {
                field: "itemCount".to_string(),
                reason: format!("{} full items but floor(c) is {}", num_full, c.floor()),
            });
        }
        if has_partial == (c == c.floor()) {
            return Err(SketchError::CorruptImage {
                field: "partialItem".to_string(),
                reason: "flag inconsistent with the fractional part of c".to_string(),
            });
        }

        let total_items = num_full + has_partial as usize;
        let (mut items, _) = serde.deserialize_from_bytes(&bytes[53..], total_items)?;
        let partial = has_partial.then(|| items.pop().expect("partial item present"));

        let mut sketch = Self::new(k)?;
        sketch.n = pre.n;
        sketch.cumulative_wt = cumulative_wt;
        sketch.wt_max = wt_max;
        sketch.rho = rho;
        sketch.sample = EbppsSample {
            c,
            data: items,
            partial,
        };
        Ok(sketch)
    }
}

impl<T: Clone> fmt::Display for EbppsSketch<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "### EbppsSketch summary:")?;
        writeln!(f, "   k            : {}", self.k)?;
        writeln!(f, "   n            : {}", self.n)?;
        writeln!(f, "   c            : {}", self.sample.c)?;
        writeln!(f, "   rho          : {}", self.rho)?;
        writeln!(f, "   cumulative wt: {}", self.cumulative_wt)?;
        writeln!(f, "   max wt       : {}", self.wt_max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::ArrayOfLongsSerde;
    use proptest::prelude::*;

    fn check_invariants(sketch: &EbppsSketch<i64>) {
        assert!(sketch.c() >= 0.0);
        assert!(sketch.c() <= sketch.k() as f64 + 1e-12);
        if !sketch.is_empty() {
            assert!(sketch.rho() > 0.0);
            assert!(sketch.rho() * sketch.max_weight() <= 1.0 + 1e-12);
        }
        assert_eq!(sketch.sample.data.len() as f64, sketch.c().floor());
        assert_eq!(
            sketch.sample.partial.is_some(),
            sketch.c() != sketch.c().floor()
        );
    }

    #[test]
    fn test_new_invalid_k() {
        assert!(EbppsSketch::<i64>::new(0).is_err());
    }

    #[test]
    fn test_invalid_weights_rejected() {
        let mut sketch: EbppsSketch<i64> = EbppsSketch::new(4).unwrap();
        for bad in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            assert!(sketch.update(1, bad).is_err());
        }
        assert!(sketch.is_empty());
    }

    #[test]
    fn test_exact_phase_keeps_everything() {
        let mut sketch: EbppsSketch<i64> = EbppsSketch::with_seed(10, 1).unwrap();
        for i in 0..10 {
            sketch.update(i, 1.0).unwrap();
            check_invariants(&sketch);
        }
        assert_eq!(sketch.c(), 10.0);
        let mut sample = sketch.get_result();
        sample.sort_unstable();
        assert_eq!(sample, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_heavy_then_light() {
        // k items of weight 1, then one item of weight k
        let mut sketch: EbppsSketch<i64> = EbppsSketch::with_seed(100, 2).unwrap();
        for i in 0..100 {
            sketch.update(i, 1.0).unwrap();
        }
        sketch.update(1000, 100.0).unwrap();

        check_invariants(&sketch);
        assert!(sketch.c() < 100.0);
        assert_eq!(sketch.cumulative_weight(), 200.0);
        assert_eq!(sketch.rho(), 1.0 / 100.0);
        // the heavy item saturates its inclusion probability
        let sample = sketch.get_result();
        assert!(sample.contains(&1000));
    }

    #[test]
    fn test_sample_size_brackets_c() {
        let mut sketch: EbppsSketch<i64> = EbppsSketch::with_seed(20, 3).unwrap();
        for i in 0..500 {
            sketch.update(i, 1.0 + (i % 7) as f64).unwrap();
            check_invariants(&sketch);
            let size = sketch.get_result().len() as f64;
            let c = sketch.c();
            assert!(
                size == c.floor() || size == c.ceil(),
                "sample size {} outside [{}, {}]",
                size,
                c.floor(),
                c.ceil()
            );
        }
    }

    #[test]
    fn test_inclusion_proportional_to_weight() {
        // a weight-9 item should appear about nine times as often as a
        // weight-1 item once the sketch is saturated
        let trials = 3000;
        let mut heavy_hits = 0u32;
        let mut light_hits = 0u32;
        for seed in 0..trials {
            let mut sketch: EbppsSketch<i64> = EbppsSketch::with_seed(8, seed).unwrap();
            sketch.update(-1, 9.0).unwrap();
            sketch.update(-2, 1.0).unwrap();
            for i in 0..100 {
                sketch.update(i, 1.0).unwrap();
            }
            let sample = sketch.get_result();
            heavy_hits += sample.contains(&-1) as u32;
            light_hits += sample.contains(&-2) as u32;
        }
        let ratio = heavy_hits as f64 / light_hits as f64;
        assert!(
            (ratio - 9.0).abs() < 2.0,
            "heavy/light inclusion ratio {}",
            ratio
        );
    }

    #[test]
    fn test_merge_accumulates() {
        let mut a: EbppsSketch<i64> = EbppsSketch::with_seed(16, 4).unwrap();
        let mut b: EbppsSketch<i64> = EbppsSketch::with_seed(16, 5).unwrap();
        for i in 0..200 {
            a.update(i, 2.0).unwrap();
            b.update(i + 200, 3.0).unwrap();
        }
        a.merge(&b).unwrap();
        check_invariants(&a);
        assert_eq!(a.n(), 400);
        assert_eq!(a.cumulative_weight(), 200.0 * 2.0 + 200.0 * 3.0);
        assert_eq!(a.max_weight(), 3.0);
    }

    #[test]
    fn test_merge_takes_min_k() {
        let mut a: EbppsSketch<i64> = EbppsSketch::with_seed(32, 6).unwrap();
        let mut b: EbppsSketch<i64> = EbppsSketch::with_seed(8, 7).unwrap();
        for i in 0..100 {
            a.update(i, 1.0).unwrap();
            b.update(i + 100, 1.0).unwrap();
        }
        a.merge(&b).unwrap();
        assert_eq!(a.k(), 8);
        check_invariants(&a);
    }

    #[test]
    fn test_merge_empty_is_noop() {
        let mut a: EbppsSketch<i64> = EbppsSketch::with_seed(8, 8).unwrap();
        a.update(1, 1.0).unwrap();
        let b: EbppsSketch<i64> = EbppsSketch::new(8).unwrap();
        a.merge(&b).unwrap();
        assert_eq!(a.n(), 1);
    }

    #[test]
    fn test_reset() {
        let mut sketch: EbppsSketch<i64> = EbppsSketch::with_seed(8, 9).unwrap();
        for i in 0..100 {
            sketch.update(i, 2.0).unwrap();
        }
        sketch.reset();
        assert!(sketch.is_empty());
        assert_eq!(sketch.c(), 0.0);
        assert!(sketch.get_result().is_empty());
    }

    #[test]
    fn test_subset_sum_laws() {
        let mut sketch: EbppsSketch<i64> = EbppsSketch::with_seed(32, 10).unwrap();
        for i in 0..800 {
            sketch.update(i, 1.0).unwrap();
        }
        let all = sketch.estimate_subset_sum(|_| true);
        assert_eq!(all.estimate, all.total_sketch_weight);
        assert_eq!(all.estimate, all.upper_bound);
        assert!((all.estimate - 800.0).abs() < 1e-6);

        let none = sketch.estimate_subset_sum(|_| false);
        assert_eq!(none.estimate, 0.0);
        assert_eq!(none.lower_bound, 0.0);

        let half = sketch.estimate_subset_sum(|&x| x % 2 == 0);
        assert!(half.lower_bound <= half.estimate);
        assert!(half.estimate <= half.upper_bound);
    }

    #[test]
    fn test_empty_serialization_is_one_pre_long() {
        let sketch: EbppsSketch<i64> = EbppsSketch::new(16).unwrap();
        let bytes = sketch.serialize(&ArrayOfLongsSerde);
        assert_eq!(bytes.len(), 8);
        let back = EbppsSketch::<i64>::deserialize(&bytes, &ArrayOfLongsSerde).unwrap();
        assert!(back.is_empty());
        assert_eq!(back.k(), 16);
    }

    #[test]
    fn test_round_trip() {
        let mut sketch: EbppsSketch<i64> = EbppsSketch::with_seed(12, 11).unwrap();
        for i in 0..300 {
            sketch.update(i, 1.0 + (i % 5) as f64).unwrap();
        }
        let bytes = sketch.serialize(&ArrayOfLongsSerde);
        let back = EbppsSketch::<i64>::deserialize(&bytes, &ArrayOfLongsSerde).unwrap();
        assert_eq!(back.n(), sketch.n());
        assert_eq!(back.k(), sketch.k());
        assert_eq!(back.c().to_bits(), sketch.c().to_bits());
        assert_eq!(back.rho().to_bits(), sketch.rho().to_bits());
        assert_eq!(back.cumulative_weight(), sketch.cumulative_weight());
        assert_eq!(back.sample.data, sketch.sample.data);
        assert_eq!(back.sample.partial, sketch.sample.partial);
    }

    #[test]
    fn test_corrupt_nan_cumulative_weight() {
        let mut sketch: EbppsSketch<i64> = EbppsSketch::with_seed(8, 12).unwrap();
        for i in 0..50 {
            sketch.update(i, 1.0).unwrap();
        }
        let mut bytes = sketch.serialize(&ArrayOfLongsSerde);
        bytes[16..24].copy_from_slice(&f64::NAN.to_le_bytes());
        let err = EbppsSketch::<i64>::deserialize(&bytes, &ArrayOfLongsSerde).unwrap_err();
        assert!(
            matches!(err, SketchError::CorruptImage { field, .. } if field == "cumulativeWeight")
        );
    }

    #[test]
    fn test_corrupt_negative_rho() {
        let mut sketch: EbppsSketch<i64> = EbppsSketch::with_seed(8, 13).unwrap();
        for i in 0..50 {
            sketch.update(i, 1.0).unwrap();
        }
        let mut bytes = sketch.serialize(&ArrayOfLongsSerde);
        bytes[32..40].copy_from_slice(&(-0.5f64).to_le_bytes());
        let err = EbppsSketch::<i64>::deserialize(&bytes, &ArrayOfLongsSerde).unwrap_err();
        assert!(matches!(err, SketchError::CorruptImage { field, .. } if field == "rho"));
    }

    #[test]
    fn test_corrupt_c_above_k() {
        let mut sketch: EbppsSketch<i64> = EbppsSketch::with_seed(8, 14).unwrap();
        for i in 0..50 {
            sketch.update(i, 1.0).unwrap();
        }
        let mut bytes = sketch.serialize(&ArrayOfLongsSerde);
        bytes[40..48].copy_from_slice(&1000.0f64.to_le_bytes());
        let err = EbppsSketch::<i64>::deserialize(&bytes, &ArrayOfLongsSerde).unwrap_err();
        assert!(matches!(err, SketchError::CorruptImage { field, .. } if field == "c"));
    }

    #[test]
    fn test_display_summary() {
        let mut sketch: EbppsSketch<i64> = EbppsSketch::with_seed(8, 15).unwrap();
        sketch.update(1, 1.0).unwrap();
        let s = sketch.to_string();
        assert!(s.contains("EbppsSketch"));
        assert!(s.contains("rho"));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_invariants_hold(
            seed in 0u64..1000,
            k in 1usize..30,
            weights in proptest::collection::vec(1.0f64..500.0, 1..150),
        ) {
            let mut sketch: EbppsSketch<i64> = EbppsSketch::with_seed(k, seed).unwrap();
            let mut total = 0.0;
            for (i, &weight) in weights.iter().enumerate() {
                total += weight;
                sketch.update(i as i64, weight).unwrap();
                check_invariants(&sketch);
            }
            prop_assert!((sketch.cumulative_weight() - total).abs() <= 1e-9 * total);
            // c tracks rho * cumulative weight
            prop_assert!(
                (sketch.c() - sketch.rho() * sketch.cumulative_weight()).abs() <= 1e-6
            );
        }

        #[test]
        fn prop_round_trip_semantic_equality(
            seed in 0u64..1000,
            k in 1usize..16,
            len in 1usize..100,
        ) {
            let mut sketch: EbppsSketch<i64> = EbppsSketch::with_seed(k, seed).unwrap();
            for i in 0..len {
                sketch.update(i as i64, ((i % 13) + 1) as f64).unwrap();
            }
            let bytes = sketch.serialize(&ArrayOfLongsSerde);
            let back = EbppsSketch::<i64>::deserialize(&bytes, &ArrayOfLongsSerde).unwrap();
            prop_assert_eq!(back.n(), sketch.n());
            prop_assert_eq!(back.c().to_bits(), sketch.c().to_bits());
            prop_assert_eq!(back.sample.data.clone(), sketch.sample.data.clone());
            prop_assert_eq!(back.sample.partial.clone(), sketch.sample.partial.clone());
        }
    }
}
