//! Uniform reservoir sampling over generic items
//!
//! Implementation of reservoir sampling (Vitter 1985, Algorithm R) with a
//! growable buffer, a versioned byte image, and subset-sum estimation.
//!
//! # Algorithm Overview
//!
//! 1. Fill the reservoir with the first k items
//! 2. For each subsequent item (n > k), draw j uniform in [0, n);
//!    replace slot j when j < k
//!
//! Every offered item ends up in the sample with probability min(1, k/n).
//!
//! # Time Complexity
//!
//! - Update: O(1) amortized (buffer growth follows the resize policy)
//! - Sample retrieval: O(1) borrow
//! - Serialization: O(k)
//!
//! # References
//!
//! - Vitter, J. S. (1985). "Random sampling with a reservoir"

use crate::common::{validation, ItemSerde, ResizeFactor, Result, SketchError, SketchRng};
use crate::sampling::preamble::{self, Family, Preamble};
use crate::sampling::subset_sum::{self, SubsetSummary};
use std::fmt;

/// Uniform reservoir sketch over items of type `T`
///
/// The sketch retains at most `k` items; once more than `k` items have been
/// offered it holds a uniform random subset of them. Byte images are written
/// and read with a caller-supplied [`ItemSerde`].
///
/// # Examples
///
/// ```
/// use sampling_oxide::sampling::ReservoirSketch;
///
/// let mut reservoir: ReservoirSketch<u32> = ReservoirSketch::new(100).unwrap();
/// for i in 0..1000 {
///     reservoir.update(i).unwrap();
/// }
/// assert_eq!(reservoir.num_samples(), 100);
/// assert_eq!(reservoir.n(), 1000);
/// ```
#[derive(Clone, Debug)]
pub struct ReservoirSketch<T: Clone> {
    pub(crate) k: usize,
    pub(crate) n: u64,
    pub(crate) data: Vec<T>,
    curr_alloc: usize,
    pub(crate) rf: ResizeFactor,
    pub(crate) rng: SketchRng,
}

impl<T: Clone> ReservoirSketch<T> {
    /// Creates a reservoir with capacity `k` and the default X8 resize factor
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` if k is 0 or exceeds 2^31 - 2.
    pub fn new(k: usize) -> Result<Self> {
        Self::with_rf_and_rng(k, ResizeFactor::default(), SketchRng::new())
    }

    /// Creates a reservoir with an explicit resize factor
    pub fn new_with_rf(k: usize, rf: ResizeFactor) -> Result<Self> {
        Self::with_rf_and_rng(k, rf, SketchRng::new())
    }

    /// Creates a reservoir with a fixed seed for reproducible runs
    ///
    /// # Examples
    ///
    /// ```
    /// use sampling_oxide::sampling::ReservoirSketch;
    ///
    /// let mut r1: ReservoirSketch<i32> = ReservoirSketch::with_seed(10, 42).unwrap();
    /// let mut r2: ReservoirSketch<i32> = ReservoirSketch::with_seed(10, 42).unwrap();
    /// for i in 0..100 {
    ///     r1.update(i).unwrap();
    ///     r2.update(i).unwrap();
    /// }
    /// assert_eq!(r1.samples(), r2.samples());
    /// ```
    pub fn with_seed(k: usize, seed: u64) -> Result<Self> {
        Self::with_rf_and_rng(k, ResizeFactor::default(), SketchRng::with_seed(seed))
    }

    fn with_rf_and_rng(k: usize, rf: ResizeFactor, rng: SketchRng) -> Result<Self> {
        validation::validate_sample_size(k as u64)?;
        let curr_alloc = rf.initial_size(k);
        Ok(ReservoirSketch {
            k,
            n: 0,
            data: Vec::with_capacity(curr_alloc),
            curr_alloc,
            rf,
            rng,
        })
    }

    /// Offers an item to the reservoir
    ///
    /// One uniform index is drawn per offer once the reservoir is full; no
    /// randomness is consumed while filling.
    ///
    /// # Errors
    ///
    /// Returns `CapacityExceeded` once 2^48 - 2 items have been offered.
    pub fn update(&mut self, item: T) -> Result<()> {
        validation::validate_stream_length(self.n)?;
        self.n += 1;

        if self.data.len() < self.k {
            self.grow_if_needed();
            self.data.push(item);
        } else {
            let j = self.rng.next_index(self.n);
            if (j as usize) < self.k {
                self.data[j as usize] = item;
            }
        }
        Ok(())
    }

    /// Offers an optional item; `None` is a silent no-op
    ///
    /// Streams with gaps can be fed directly without filtering.
    pub fn update_opt(&mut self, item: Option<T>) -> Result<()> {
        match item {
            Some(item) => self.update(item),
            None => Ok(()),
        }
    }

    fn grow_if_needed(&mut self) {
        if self.data.len() == self.curr_alloc && self.curr_alloc < self.k {
            self.curr_alloc = self.rf.next_size(self.curr_alloc, self.k);
            self.data.reserve_exact(self.curr_alloc - self.data.len());
        }
    }

    /// Clears all state and returns the buffer to its initial allocation
    pub fn reset(&mut self) {
        self.n = 0;
        self.curr_alloc = self.rf.initial_size(self.k);
        self.data = Vec::with_capacity(self.curr_alloc);
    }

    /// Borrowed view of the current sample; valid until the next mutation
    pub fn samples(&self) -> &[T] {
        &self.data
    }

    /// Number of items currently retained, min(n, k)
    pub fn num_samples(&self) -> usize {
        self.data.len()
    }

    /// Total items offered
    pub fn n(&self) -> u64 {
        self.n
    }

    /// Configured capacity
    pub fn k(&self) -> usize {
        self.k
    }

    /// Configured resize factor
    pub fn resize_factor(&self) -> ResizeFactor {
        self.rf
    }

    /// True if no items have been offered
    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    /// True once the sketch holds a proper subsample of the stream
    pub fn estimation_mode(&self) -> bool {
        self.n > self.k as u64
    }

    /// Weight each retained item carries in stream-total estimates
    ///
    /// 1 while the reservoir is filling, n/k thereafter.
    pub fn implicit_sample_weight(&self) -> f64 {
        if self.estimation_mode() {
            self.n as f64 / self.k as f64
        } else {
            1.0
        }
    }

    /// Estimates the stream weight of items matching `predicate`
    ///
    /// In exact mode the answer is exact and the bounds collapse onto it.
    /// In estimation mode the matched count over k slots is scaled by n/k
    /// and bounded by a two-standard-deviation binomial interval.
    pub fn estimate_subset_sum<P: Fn(&T) -> bool>(&self, predicate: P) -> SubsetSummary {
        let matched = self.data.iter().filter(|item| predicate(item)).count() as f64;
        if !self.estimation_mode() {
            subset_sum::estimate_with_bounds(matched, self.n as f64, 0.0, 0.0, 0)
        } else {
            let n = self.n as f64;
            let k = self.k as f64;
            subset_sum::estimate_with_bounds(0.0, 0.0, matched * n / k, n, self.k as u64)
        }
    }

    /// Serialized image size in bytes, given the item encoding
    pub fn serialized_size_bytes<S: ItemSerde<T>>(&self, serde: &S) -> usize {
        if self.is_empty() {
            preamble::PREAMBLE_LONG_BYTES
        } else {
            2 * preamble::PREAMBLE_LONG_BYTES + serde.size_of(&self.data)
        }
    }

    /// Writes the version 2 byte image
    ///
    /// An empty sketch serializes to exactly one preamble long.
    pub fn serialize<S: ItemSerde<T>>(&self, serde: &S) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.serialized_size_bytes(serde));
        if self.is_empty() {
            let flags = Preamble::flags_with_rf(preamble::FLAG_EMPTY, self.rf);
            Preamble::new(Family::Reservoir, 1, flags, self.k as u32, 0).write(&mut out);
        } else {
            let flags = Preamble::flags_with_rf(0, self.rf);
            Preamble::new(Family::Reservoir, 2, flags, self.k as u32, self.n).write(&mut out);
            out.extend_from_slice(&serde.serialize_to_bytes(&self.data));
        }
        out
    }

    /// Reads a version 1 or version 2 byte image
    ///
    /// Version 1 images are upgraded transparently: the 16-bit encoded k is
    /// decoded while parsing and the reconstructed sketch reports the
    /// decoded capacity.
    pub fn deserialize<S: ItemSerde<T>>(bytes: &[u8], serde: &S) -> Result<Self> {
        let pre = Preamble::parse(bytes)?;
        if pre.family != Family::Reservoir {
            return Err(SketchError::CorruptImage {
                field: "family".to_string(),
                reason: format!("expected RESERVOIR, found 0x{:02x}", pre.family.id()),
            });
        }
        let k = pre.k as usize;
        let rf = pre.resize_factor();
        if pre.is_empty() {
            return Self::new_with_rf(k, rf);
        }

        let num_samples = (pre.n.min(k as u64)) as usize;
        let payload = &bytes[2 * preamble::PREAMBLE_LONG_BYTES..];
        let (data, _) = serde.deserialize_from_bytes(payload, num_samples)?;

        let mut sketch = Self::new_with_rf(k, rf)?;
        sketch.curr_alloc = data.len().max(sketch.curr_alloc).min(k);
        sketch.data = data;
        sketch.n = pre.n;
        Ok(sketch)
    }

    /// Rebuilds this sketch at a smaller capacity, preserving uniformity
    ///
    /// A uniform sample of a uniform sample is uniform, so re-inserting the
    /// retained items into a fresh reservoir of capacity `new_k` and keeping
    /// the original n yields a valid sketch. Used by the union when capacity
    /// must shrink.
    pub(crate) fn downsample(&self, new_k: usize, rng: SketchRng) -> Self {
        let mut out =
            Self::with_rf_and_rng(new_k, self.rf, rng).expect("downsample capacity is valid");
        for item in &self.data {
            // replay retained items; out.n tracks the replay count
            out.update(item.clone()).expect("replay below stream cap");
        }
        out.n = self.n;
        out
    }
}

impl<T: Clone> fmt::Display for ReservoirSketch<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "### ReservoirSketch summary:")?;
        writeln!(f, "   k            : {}", self.k)?;
        writeln!(f, "   n            : {}", self.n)?;
        writeln!(f, "   num samples  : {}", self.num_samples())?;
        writeln!(f, "   resize factor: {:?}", self.rf)?;
        writeln!(
            f,
            "   mode         : {}",
            if self.estimation_mode() {
                "estimation"
            } else {
                "exact"
            }
        )
    }
}
