//! Union of uniform reservoir sketches
//!
//! A union holds one internal reservoir (the gadget) and folds incoming
//! sketches into it while preserving uniformity. Two facts make the merge
//! sound:
//!
//! - a uniform subsample of a uniform sample is itself uniform, so a sketch
//!   can be rebuilt at a smaller capacity by re-inserting its retained items;
//! - two full reservoirs over disjoint streams of lengths n1 and n2 combine
//!   into a uniform reservoir by keeping slot i of the first with
//!   probability n1/(n1+n2), independently per slot.
//!
//! The gadget's capacity starts at min(max_k, first incoming k) and only
//! ever shrinks when a lower-k sketch arrives.

use crate::common::{validation, ArrayOfLongsSerde, ItemSerde, Result, SketchError, SketchRng};
use crate::sampling::preamble::{self, Family, Preamble};
use crate::sampling::reservoir::ReservoirSketch;
use crate::sampling::reservoir_longs::ReservoirLongsSketch;
use std::fmt;

/// Mergeable aggregator over [`ReservoirSketch`] instances
///
/// # Examples
///
/// ```
/// use sampling_oxide::sampling::{ReservoirSketch, ReservoirUnion};
///
/// let mut u: ReservoirUnion<i64> = ReservoirUnion::with_seed(100, 1).unwrap();
/// assert!(u.get_result().is_none());
///
/// let mut s1 = ReservoirSketch::with_seed(100, 2).unwrap();
/// let mut s2 = ReservoirSketch::with_seed(100, 3).unwrap();
/// for i in 0..50 {
///     s1.update(i).unwrap();
///     s2.update(i + 50).unwrap();
/// }
/// u.update(&s1).unwrap();
/// u.update(&s2).unwrap();
/// let merged = u.get_result().unwrap();
/// assert_eq!(merged.n(), 100);
/// assert_eq!(merged.num_samples(), 100);
/// ```
#[derive(Clone, Debug)]
pub struct ReservoirUnion<T: Clone> {
    max_k: usize,
    gadget: Option<ReservoirSketch<T>>,
    rng: SketchRng,
}

impl<T: Clone> ReservoirUnion<T> {
    /// Creates a union whose result never exceeds capacity `max_k`
    pub fn new(max_k: usize) -> Result<Self> {
        validation::validate_sample_size(max_k as u64)?;
        Ok(ReservoirUnion {
            max_k,
            gadget: None,
            rng: SketchRng::new(),
        })
    }

    /// Creates a union with a fixed seed for reproducible merges
    pub fn with_seed(max_k: usize, seed: u64) -> Result<Self> {
        validation::validate_sample_size(max_k as u64)?;
        Ok(ReservoirUnion {
            max_k,
            gadget: None,
            rng: SketchRng::with_seed(seed),
        })
    }

    /// Maximum capacity of the union result
    pub fn max_k(&self) -> usize {
        self.max_k
    }

    /// True if no non-empty sketch has been merged yet
    pub fn is_empty(&self) -> bool {
        self.gadget.is_none()
    }

    // one draw from the union source seeds each sketch the union builds,
    // keeping seeded unions reproducible end to end
    fn derived_rng(&mut self) -> SketchRng {
        SketchRng::with_seed(self.rng.next_index(u64::MAX))
    }

    /// Merges a sketch into the union
    ///
    /// Empty inputs are a no-op. Inputs with k above `max_k` are first
    /// rebuilt at `max_k`; a lower-k input shrinks the gadget permanently.
    pub fn update(&mut self, other: &ReservoirSketch<T>) -> Result<()> {
        if other.is_empty() {
            return Ok(());
        }
        // validate the combined count up front so a failure leaves no
        // partially merged gadget behind
        let existing = self.gadget.as_ref().map_or(0, ReservoirSketch::n);
        if existing
            .checked_add(other.n())
            .is_none_or(|n| n > validation::MAX_STREAM_LENGTH)
        {
            return Err(SketchError::CapacityExceeded {
                limit: validation::MAX_STREAM_LENGTH,
            });
        }
        let mut incoming = if other.k() > self.max_k {
            let rng = self.derived_rng();
            other.downsample(self.max_k, rng)
        } else {
            let mut clone = other.clone();
            clone.rng = self.derived_rng();
            clone
        };

        self.gadget = Some(match self.gadget.take() {
            None => incoming,
            Some(mut gadget) => {
                // equalize capacity by shrinking the larger side
                if incoming.k() < gadget.k() {
                    let rng = self.derived_rng();
                    gadget = gadget.downsample(incoming.k(), rng);
                } else if gadget.k() < incoming.k() {
                    let rng = self.derived_rng();
                    incoming = incoming.downsample(gadget.k(), rng);
                }

                if !incoming.estimation_mode() {
                    // incoming retains its entire stream: replay it
                    for item in incoming.samples() {
                        gadget.update(item.clone())?;
                    }
                    gadget
                } else if !gadget.estimation_mode() {
                    // the gadget retains its entire stream: replay it instead
                    for item in gadget.samples() {
                        incoming.update(item.clone())?;
                    }
                    incoming
                } else {
                    self.merge_full(gadget, &incoming)?
                }
            }
        });
        Ok(())
    }

    /// Deserializes a sketch image and merges it
    pub fn update_bytes<S: ItemSerde<T>>(&mut self, bytes: &[u8], serde: &S) -> Result<()> {
        let sketch = ReservoirSketch::deserialize(bytes, serde)?;
        self.update(&sketch)
    }

    // both sides full at the same k: one uniform draw per slot, slot order
    fn merge_full(
        &mut self,
        mut gadget: ReservoirSketch<T>,
        incoming: &ReservoirSketch<T>,
    ) -> Result<ReservoirSketch<T>> {
        debug_assert_eq!(gadget.k(), incoming.k());
        let combined = gadget
            .n()
            .checked_add(incoming.n())
            .filter(|&n| n <= validation::MAX_STREAM_LENGTH)
            .ok_or(SketchError::CapacityExceeded {
                limit: validation::MAX_STREAM_LENGTH,
            })?;
        let p_keep = gadget.n() as f64 / combined as f64;
        for slot in 0..gadget.k() {
            if self.rng.next_double() >= p_keep {
                gadget.data[slot] = incoming.data[slot].clone();
            }
        }
        gadget.n = combined;
        Ok(gadget)
    }

    /// Immutable view of the merged result; `None` before any update
    pub fn get_result(&self) -> Option<&ReservoirSketch<T>> {
        self.gadget.as_ref()
    }

    /// Writes the union image: the preamble wrapping the gadget image
    pub fn serialize<S: ItemSerde<T>>(&self, serde: &S) -> Vec<u8> {
        let mut out = Vec::new();
        match &self.gadget {
            None => {
                Preamble::new(
                    Family::ReservoirUnion,
                    1,
                    preamble::FLAG_EMPTY,
                    self.max_k as u32,
                    0,
                )
                .write(&mut out);
            }
            Some(gadget) => {
                Preamble::new(
                    Family::ReservoirUnion,
                    2,
                    0,
                    self.max_k as u32,
                    gadget.n(),
                )
                .write(&mut out);
                out.extend_from_slice(&gadget.serialize(serde));
            }
        }
        out
    }

    /// Reads a union image
    pub fn deserialize<S: ItemSerde<T>>(bytes: &[u8], serde: &S) -> Result<Self> {
        let pre = Preamble::parse(bytes)?;
        if pre.family != Family::ReservoirUnion {
            return Err(SketchError::CorruptImage {
                field: "family".to_string(),
                reason: format!("expected RESERVOIR_UNION, found 0x{:02x}", pre.family.id()),
            });
        }
        let mut union = Self::new(pre.k as usize)?;
        if pre.is_empty() {
            return Ok(union);
        }
        let inner =
            ReservoirSketch::deserialize(&bytes[2 * preamble::PREAMBLE_LONG_BYTES..], serde)?;
        if inner.n() != pre.n {
            return Err(SketchError::CorruptImage {
                field: "n".to_string(),
                reason: format!(
                    "union header says {} but inner sketch says {}",
                    pre.n,
                    inner.n()
                ),
            });
        }
        union.gadget = Some(inner);
        Ok(union)
    }
}

impl<T: Clone> fmt::Display for ReservoirUnion<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "### ReservoirUnion summary:")?;
        writeln!(f, "   max k        : {}", self.max_k)?;
        match &self.gadget {
            None => writeln!(f, "   gadget       : none"),
            Some(g) => write!(f, "{}", g),
        }
    }
}

/// Union of [`ReservoirLongsSketch`] instances
#[derive(Clone, Debug)]
pub struct ReservoirLongsUnion {
    inner: ReservoirUnion<i64>,
}

impl ReservoirLongsUnion {
    /// Creates a union whose result never exceeds capacity `max_k`
    pub fn new(max_k: usize) -> Result<Self> {
        Ok(ReservoirLongsUnion {
            inner: ReservoirUnion::new(max_k)?,
        })
    }

    /// Creates a union with a fixed seed for reproducible merges
    pub fn with_seed(max_k: usize, seed: u64) -> Result<Self> {
        Ok(ReservoirLongsUnion {
            inner: ReservoirUnion::with_seed(max_k, seed)?,
        })
    }

    /// Maximum capacity of the union result
    pub fn max_k(&self) -> usize {
        self.inner.max_k()
    }

    /// Merges a sketch into the union
    pub fn update(&mut self, sketch: &ReservoirLongsSketch) -> Result<()> {
        self.inner.update(sketch.inner())
    }

    /// Deserializes a sketch image and merges it
    pub fn update_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.inner.update_bytes(bytes, &ArrayOfLongsSerde)
    }

    /// Immutable view of the merged result; `None` before any update
    pub fn get_result(&self) -> Option<ReservoirLongsSketch> {
        self.inner
            .get_result()
            .map(|g| ReservoirLongsSketch::from_inner(g.clone()))
    }

    /// Writes the union image
    pub fn serialize(&self) -> Vec<u8> {
        self.inner.serialize(&ArrayOfLongsSerde)
    }

    /// Reads a union image
    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        Ok(ReservoirLongsUnion {
            inner: ReservoirUnion::deserialize(bytes, &ArrayOfLongsSerde)?,
        })
    }
}

impl fmt::Display for ReservoirLongsUnion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.inner.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(k: usize, seed: u64, range: std::ops::Range<i64>) -> ReservoirSketch<i64> {
        let mut s = ReservoirSketch::with_seed(k, seed).unwrap();
        for i in range {
            s.update(i).unwrap();
        }
        s
    }

    #[test]
    fn test_no_result_before_update() {
        let u: ReservoirUnion<i64> = ReservoirUnion::new(10).unwrap();
        assert!(u.get_result().is_none());
        assert!(u.is_empty());
    }

    #[test]
    fn test_empty_input_is_noop() {
        let mut u: ReservoirUnion<i64> = ReservoirUnion::new(10).unwrap();
        let empty = ReservoirSketch::new(10).unwrap();
        u.update(&empty).unwrap();
        assert!(u.get_result().is_none());
    }

    #[test]
    fn test_exact_inputs_concatenate() {
        let mut u: ReservoirUnion<i64> = ReservoirUnion::with_seed(100, 1).unwrap();
        u.update(&filled(100, 2, 0..30)).unwrap();
        u.update(&filled(100, 3, 30..60)).unwrap();
        let result = u.get_result().unwrap();
        assert_eq!(result.n(), 60);
        assert_eq!(result.num_samples(), 60);
        let mut items: Vec<i64> = result.samples().to_vec();
        items.sort_unstable();
        assert_eq!(items, (0..60).collect::<Vec<_>>());
    }

    #[test]
    fn test_sampling_merge_counts() {
        let mut u: ReservoirUnion<i64> = ReservoirUnion::with_seed(16, 1).unwrap();
        u.update(&filled(16, 2, 0..100)).unwrap();
        u.update(&filled(16, 3, 100..300)).unwrap();
        let result = u.get_result().unwrap();
        assert_eq!(result.n(), 300);
        assert_eq!(result.num_samples(), 16);
        assert!(result.samples().iter().all(|&x| (0..300).contains(&x)));
    }

    #[test]
    fn test_incoming_above_max_k_downsampled() {
        let mut u: ReservoirUnion<i64> = ReservoirUnion::with_seed(8, 1).unwrap();
        u.update(&filled(64, 2, 0..1000)).unwrap();
        let result = u.get_result().unwrap();
        assert_eq!(result.k(), 8);
        assert_eq!(result.n(), 1000);
        assert_eq!(result.num_samples(), 8);
    }

    #[test]
    fn test_gadget_k_shrinks_and_stays_shrunk() {
        let mut u: ReservoirUnion<i64> = ReservoirUnion::with_seed(64, 1).unwrap();
        u.update(&filled(64, 2, 0..500)).unwrap();
        assert_eq!(u.get_result().unwrap().k(), 64);
        // lower-k sampling-mode input shrinks the gadget
        u.update(&filled(16, 3, 500..900)).unwrap();
        assert_eq!(u.get_result().unwrap().k(), 16);
        // a higher-k input afterwards does not grow it back
        u.update(&filled(64, 4, 900..1400)).unwrap();
        let result = u.get_result().unwrap();
        assert_eq!(result.k(), 16);
        assert_eq!(result.n(), 1400);
    }

    #[test]
    fn test_merge_weights_by_stream_length() {
        // merge a long stream with a short one; sample composition should
        // lean toward the long stream roughly in proportion
        let trials = 400;
        let mut from_long = 0usize;
        let mut total = 0usize;
        for seed in 0..trials {
            let mut u: ReservoirUnion<i64> = ReservoirUnion::with_seed(20, seed).unwrap();
            u.update(&filled(20, seed + 1000, 0..900)).unwrap();
            u.update(&filled(20, seed + 2000, 1000..1100)).unwrap();
            let result = u.get_result().unwrap();
            from_long += result.samples().iter().filter(|&&x| x < 900).count();
            total += result.num_samples();
        }
        let frac = from_long as f64 / total as f64;
        assert!((frac - 0.9).abs() < 0.05, "long-stream fraction {}", frac);
    }

    #[test]
    fn test_union_round_trip() {
        let mut u = ReservoirLongsUnion::with_seed(16, 9).unwrap();
        let mut s = ReservoirLongsSketch::with_seed(16, 10).unwrap();
        for i in 0..200 {
            s.update(i).unwrap();
        }
        u.update(&s).unwrap();
        let bytes = u.serialize();
        let back = ReservoirLongsUnion::deserialize(&bytes).unwrap();
        let a = u.get_result().unwrap();
        let b = back.get_result().unwrap();
        assert_eq!(a.n(), b.n());
        assert_eq!(a.samples(), b.samples());
        assert_eq!(back.max_k(), 16);
    }

    #[test]
    fn test_empty_union_round_trip() {
        let u = ReservoirLongsUnion::new(12).unwrap();
        let bytes = u.serialize();
        assert_eq!(bytes.len(), 8);
        let back = ReservoirLongsUnion::deserialize(&bytes).unwrap();
        assert!(back.get_result().is_none());
        assert_eq!(back.max_k(), 12);
    }

    #[test]
    fn test_update_bytes() {
        let mut u = ReservoirLongsUnion::with_seed(16, 1).unwrap();
        let mut s = ReservoirLongsSketch::with_seed(16, 2).unwrap();
        for i in 0..10 {
            s.update(i).unwrap();
        }
        u.update_bytes(&s.serialize()).unwrap();
        assert_eq!(u.get_result().unwrap().n(), 10);
    }

    #[test]
    fn test_corrupt_union_n_mismatch() {
        let mut u = ReservoirLongsUnion::with_seed(8, 1).unwrap();
        let mut s = ReservoirLongsSketch::with_seed(8, 2).unwrap();
        for i in 0..5 {
            s.update(i).unwrap();
        }
        u.update(&s).unwrap();
        let mut bytes = u.serialize();
        bytes[8..16].copy_from_slice(&99u64.to_le_bytes());
        let err = ReservoirLongsUnion::deserialize(&bytes).unwrap_err();
        assert!(matches!(err, SketchError::CorruptImage { field, .. } if field == "n"));
    }
}
