//! Union of VarOpt sketches
//!
//! The union re-inserts every retained (item, weight) pair of each incoming
//! sketch into an internal gadget: a VarOpt sketch that additionally carries
//! a marks bitmap. Items arriving from an incoming R region enter at that
//! sketch's tau and are marked, because their weights are estimates rather
//! than exact observations.
//!
//! `get_result` resolves the marks: if any marked item sits in the gadget's
//! H region, a new threshold tau' is found such that demoting every item
//! whose weight falls at or below tau' yields an R region carrying exactly
//! the combined estimated mass. The threshold is the root of a piecewise
//! linear, strictly increasing function and is located by bisection after
//! bracketing, which stays robust when several H weights nearly coincide.

use crate::common::{validation, ItemSerde, Result, SketchError, SketchRng};
use crate::sampling::preamble::{self, Family, Preamble};
use crate::sampling::varopt::VarOptSketch;
use std::fmt;

/// Convergence tolerance for the tau' bisection
const TAU_TOLERANCE: f64 = 1e-12;

/// Mergeable aggregator over [`VarOptSketch`] instances
///
/// # Examples
///
/// ```
/// use sampling_oxide::sampling::{VarOptSketch, VarOptUnion};
///
/// let mut union: VarOptUnion<i64> = VarOptUnion::with_seed(1024, 1).unwrap();
/// let mut s1 = VarOptSketch::with_seed(1024, 2).unwrap();
/// let mut s2 = VarOptSketch::with_seed(1024, 3).unwrap();
/// for i in 0..256 {
///     s1.update(i, 1.0).unwrap();
///     s2.update(i + 256, 1.0).unwrap();
/// }
/// union.update(&s1).unwrap();
/// union.update(&s2).unwrap();
///
/// let merged = union.get_result().unwrap();
/// assert_eq!(merged.n(), 512);
/// assert_eq!(merged.estimate_subset_sum(|_| true).estimate, 512.0);
/// ```
#[derive(Clone, Debug)]
pub struct VarOptUnion<T: Clone> {
    max_k: usize,
    n: u64,
    gadget: VarOptSketch<T>,
    rng: SketchRng,
}

impl<T: Clone> VarOptUnion<T> {
    /// Creates a union whose result never exceeds capacity `max_k`
    pub fn new(max_k: usize) -> Result<Self> {
        Self::with_rng(max_k, SketchRng::new())
    }

    /// Creates a union with a fixed seed for reproducible merges
    pub fn with_seed(max_k: usize, seed: u64) -> Result<Self> {
        Self::with_rng(max_k, SketchRng::with_seed(seed))
    }

    fn with_rng(max_k: usize, mut rng: SketchRng) -> Result<Self> {
        validation::validate_sample_size(max_k as u64)?;
        let gadget_seed = rng.next_index(u64::MAX);
        Ok(VarOptUnion {
            max_k,
            n: 0,
            gadget: VarOptSketch::new_as_gadget(max_k, SketchRng::with_seed(gadget_seed))?,
            rng,
        })
    }

    /// Maximum capacity of the union result
    pub fn max_k(&self) -> usize {
        self.max_k
    }

    /// Total items offered across all merged sketches
    pub fn n(&self) -> u64 {
        self.n
    }

    /// True if no non-empty sketch has been merged yet
    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    /// Merges a sketch into the union
    ///
    /// H items re-enter with their exact weights; R items re-enter at the
    /// incoming tau and are marked for the resolve step.
    pub fn update(&mut self, sketch: &VarOptSketch<T>) -> Result<()> {
        if sketch.is_empty() {
            return Ok(());
        }
        let combined = self
            .n
            .checked_add(sketch.n())
            .filter(|&n| n <= validation::MAX_STREAM_LENGTH)
            .ok_or(SketchError::CapacityExceeded {
                limit: validation::MAX_STREAM_LENGTH,
            })?;
        for (item, weight, _) in sketch.heavy_entries() {
            self.gadget.update_marked(item.clone(), weight, false)?;
        }
        let tau = sketch.tau();
        for item in sketch.reservoir_entries() {
            self.gadget.update_marked(item.clone(), tau, true)?;
        }
        self.n = combined;
        Ok(())
    }

    /// Deserializes a sketch image and merges it
    pub fn update_bytes<S: ItemSerde<T>>(&mut self, bytes: &[u8], serde: &S) -> Result<()> {
        let sketch = VarOptSketch::deserialize(bytes, serde)?;
        self.update(&sketch)
    }

    /// Resolves the gadget into a plain VarOpt sketch
    ///
    /// The result carries no marks and satisfies every sketch invariant;
    /// repeated calls draw fresh randomness only through the gadget's own
    /// updates, so calling this is side-effect free.
    pub fn get_result(&self) -> Result<VarOptSketch<T>> {
        if self.n == 0 {
            return VarOptSketch::new(self.max_k);
        }

        let mut heavy: Vec<(T, f64, bool)> = self
            .gadget
            .heavy_entries()
            .map(|(item, weight, marked)| (item.clone(), weight, marked))
            .collect();
        let light: Vec<T> = self.gadget.reservoir_entries().cloned().collect();
        let r = light.len();
        let wt_r = self.gadget.total_wt_r;

        if self.gadget.num_marks_in_h == 0 {
            // nothing pretends exactness it does not have; reuse the layout
            let heavy_pairs = heavy.drain(..).map(|(item, weight, _)| (item, weight)).collect();
            return VarOptSketch::from_parts(self.max_k, self.n, heavy_pairs, light, wt_r, SketchRng::new());
        }

        // weights sorted ascending drive both the bracket and the demote set
        heavy.sort_by(|a, b| a.1.total_cmp(&b.1));
        let tau_prime = if r == 0 {
            Self::solve_tau_forced(&heavy)
        } else {
            Self::solve_tau(&heavy, wt_r, r)
        };

        let mut kept: Vec<(T, f64)> = Vec::new();
        let mut demoted: Vec<T> = light;
        let mut demoted_mass = wt_r;
        for (item, weight, marked) in heavy {
            let demote = if r == 0 {
                marked || weight <= tau_prime
            } else {
                weight <= tau_prime
            };
            if demote {
                demoted_mass += weight;
                demoted.push(item);
            } else {
                kept.push((item, weight));
            }
        }
        debug_assert!(!demoted.is_empty());
        // the new R region carries the demoted mass exactly, spread evenly
        VarOptSketch::from_parts(
            self.max_k,
            self.n,
            kept,
            demoted,
            demoted_mass,
            SketchRng::new(),
        )
    }

    // Root of f(t) = t * (r + |{w_i <= t}|) - wt_r - sum(w_i <= t): the
    // threshold at which demoting every lighter item conserves the combined
    // estimated mass. f is continuous, piecewise linear, and strictly
    // increasing for r >= 1, so bisection from a sign-changing bracket
    // converges unconditionally.
    fn solve_tau(heavy: &[(T, f64, bool)], wt_r: f64, r: usize) -> f64 {
        debug_assert!(r >= 1);
        let eval = |t: f64| -> f64 {
            let mut demoted = r as f64;
            let mut mass = wt_r;
            for (_, weight, _) in heavy {
                if *weight <= t {
                    demoted += 1.0;
                    mass += *weight;
                }
            }
            t * demoted - mass
        };
        let total: f64 = wt_r + heavy.iter().map(|(_, w, _)| *w).sum::<f64>();
        let mut lo = 0.0;
        let mut hi = total;
        debug_assert!(eval(hi) >= 0.0);
        for _ in 0..200 {
            if hi - lo <= TAU_TOLERANCE * hi.max(1.0) {
                break;
            }
            let mid = 0.5 * (lo + hi);
            if eval(mid) < 0.0 {
                lo = mid;
            } else {
                hi = mid;
            }
        }
        0.5 * (lo + hi)
    }

    // Same construction with no existing R region: the marked items seed
    // the demote set unconditionally, and unmarked items join below t.
    fn solve_tau_forced(heavy: &[(T, f64, bool)]) -> f64 {
        let forced_mass: f64 = heavy
            .iter()
            .filter(|(_, _, marked)| *marked)
            .map(|(_, w, _)| *w)
            .sum();
        let forced_count = heavy.iter().filter(|(_, _, m)| *m).count();
        debug_assert!(forced_count >= 1);
        let eval = |t: f64| -> f64 {
            let mut demoted = forced_count as f64;
            let mut mass = forced_mass;
            for (_, weight, marked) in heavy {
                if !*marked && *weight <= t {
                    demoted += 1.0;
                    mass += *weight;
                }
            }
            t * demoted - mass
        };
        let total: f64 = heavy.iter().map(|(_, w, _)| *w).sum();
        let mut lo = 0.0;
        let mut hi = total;
        for _ in 0..200 {
            if hi - lo <= TAU_TOLERANCE * hi.max(1.0) {
                break;
            }
            let mid = 0.5 * (lo + hi);
            if eval(mid) < 0.0 {
                lo = mid;
            } else {
                hi = mid;
            }
        }
        0.5 * (lo + hi)
    }

    /// Writes the union image: the preamble wrapping the gadget image
    pub fn serialize<S: ItemSerde<T>>(&self, serde: &S) -> Vec<u8> {
        let mut out = Vec::new();
        if self.n == 0 {
            Preamble::new(
                Family::VarOptUnion,
                1,
                preamble::FLAG_EMPTY,
                self.max_k as u32,
                0,
            )
            .write(&mut out);
            return out;
        }
        Preamble::new(Family::VarOptUnion, 4, 0, self.max_k as u32, self.n).write(&mut out);
        out.resize(4 * preamble::PREAMBLE_LONG_BYTES, 0);
        out.extend_from_slice(&self.gadget.serialize(serde));
        out
    }

    /// Reads a union image
    pub fn deserialize<S: ItemSerde<T>>(bytes: &[u8], serde: &S) -> Result<Self> {
        let pre = Preamble::parse(bytes)?;
        if pre.family != Family::VarOptUnion {
            return Err(SketchError::CorruptImage {
                field: "family".to_string(),
                reason: format!("expected VAROPT_UNION, found 0x{:02x}", pre.family.id()),
            });
        }
        let mut union = Self::new(pre.k as usize)?;
        if pre.is_empty() {
            return Ok(union);
        }
        let gadget =
            VarOptSketch::deserialize(&bytes[4 * preamble::PREAMBLE_LONG_BYTES..], serde)?;
        if !gadget.is_gadget() {
            return Err(SketchError::CorruptImage {
                field: "flags".to_string(),
                reason: "union payload must be a gadget image".to_string(),
            });
        }
        if gadget.k() != pre.k as usize {
            return Err(SketchError::CorruptImage {
                field: "k".to_string(),
                reason: format!(
                    "union header says {} but gadget says {}",
                    pre.k,
                    gadget.k()
                ),
            });
        }
        union.gadget = gadget;
        union.n = pre.n;
        Ok(union)
    }
}

impl<T: Clone> fmt::Display for VarOptUnion<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "### VarOptUnion summary:")?;
        writeln!(f, "   max k        : {}", self.max_k)?;
        writeln!(f, "   n            : {}", self.n)?;
        write!(f, "{}", self.gadget)
    }
}
