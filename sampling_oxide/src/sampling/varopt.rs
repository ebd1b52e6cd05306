//! VarOpt: variance-optimal weighted sampling
//!
//! Implementation of VarOpt sampling (Cohen et al. 2011), which keeps a
//! fixed-size weighted sample supporting unbiased subset-sum estimates with
//! provably minimal variance.
//!
//! # Algorithm Overview
//!
//! The sample lives in one buffer split into two regions around a single
//! empty gap slot:
//!
//! - **H region** `[0, h)`: items whose weight exceeds the threshold tau,
//!   kept by identity in a min-heap keyed by weight
//! - **R region** right of the gap: items subsumed into a reservoir where
//!   every member carries the common weight tau
//!
//! While fewer than k items have arrived every item sits in H (warm-up).
//! Once the sample overflows, the lightest items are folded into a candidate
//! set together with the current R region; exactly one candidate is evicted
//! with probabilities that keep every subset-sum estimate unbiased, and the
//! survivors become the new R region. The candidate mass is preserved, so
//! the weights held by the sketch always sum to the exact stream total.
//!
//! # Time Complexity
//!
//! - Update: O(log k) amortized
//! - Sample retrieval: O(k)
//! - Serialization: O(k)
//!
//! # References
//!
//! - Cohen, E. et al. (2011). "Efficient stream sampling for variance-optimal
//!   estimation of subset sums"
//! - Apache DataSketches VarOpt implementation

use crate::common::{validation, ItemSerde, ResizeFactor, Result, SketchError, SketchRng};
use crate::sampling::preamble::{self, Family, Preamble};
use crate::sampling::subset_sum::{self, SubsetSummary};
use std::fmt;

/// VarOpt weighted sampling sketch
///
/// # Examples
///
/// ```
/// use sampling_oxide::sampling::VarOptSketch;
///
/// let mut sketch: VarOptSketch<&str> = VarOptSketch::new(32).unwrap();
/// sketch.update("small", 1.0).unwrap();
/// sketch.update("large", 5000.0).unwrap();
///
/// let summary = sketch.estimate_subset_sum(|item| *item == "large");
/// assert_eq!(summary.estimate, 5000.0);
/// ```
#[derive(Clone, Debug)]
pub struct VarOptSketch<T: Clone> {
    pub(crate) k: usize,
    pub(crate) n: u64,
    pub(crate) h: usize,
    m: usize,
    pub(crate) r: usize,
    pub(crate) total_wt_r: f64,
    data: Vec<Option<T>>,
    weights: Vec<f64>,
    marks: Option<Vec<bool>>,
    pub(crate) num_marks_in_h: usize,
    curr_alloc: usize,
    rf: ResizeFactor,
    rng: SketchRng,
}

/// Sentinel weight for slots whose weight is implicitly tau
const PLACEHOLDER_WEIGHT: f64 = -1.0;

impl<T: Clone> VarOptSketch<T> {
    /// Creates a sketch with capacity `k`
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` if k is 0 or exceeds 2^31 - 2.
    pub fn new(k: usize) -> Result<Self> {
        Self::build(k, ResizeFactor::default(), SketchRng::new(), false)
    }

    /// Creates a sketch with a fixed seed for reproducible runs
    pub fn with_seed(k: usize, seed: u64) -> Result<Self> {
        Self::build(k, ResizeFactor::default(), SketchRng::with_seed(seed), false)
    }

    /// Creates a union gadget: same sketch plus a marks bitmap
    pub(crate) fn new_as_gadget(k: usize, rng: SketchRng) -> Result<Self> {
        Self::build(k, ResizeFactor::default(), rng, true)
    }

    fn build(k: usize, rf: ResizeFactor, rng: SketchRng, gadget: bool) -> Result<Self> {
        validation::validate_sample_size(k as u64)?;
        let curr_alloc = rf.initial_size(k);
        Ok(VarOptSketch {
            k,
            n: 0,
            h: 0,
            m: 0,
            r: 0,
            total_wt_r: 0.0,
            data: Vec::with_capacity(curr_alloc),
            weights: Vec::with_capacity(curr_alloc),
            marks: gadget.then(Vec::new),
            num_marks_in_h: 0,
            curr_alloc,
            rf,
            rng,
        })
    }

    /// Offers a weighted item
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` for a non-positive, NaN, or infinite
    /// weight, and `CapacityExceeded` once 2^48 - 2 items have been offered.
    pub fn update(&mut self, item: T, weight: f64) -> Result<()> {
        validation::validate_weight(weight)?;
        validation::validate_stream_length(self.n)?;
        self.update_impl(item, weight, false);
        Ok(())
    }

    /// Offers an optional weighted item; `None` is a silent no-op
    pub fn update_opt(&mut self, item: Option<T>, weight: f64) -> Result<()> {
        match item {
            Some(item) => self.update(item, weight),
            None => Ok(()),
        }
    }

    pub(crate) fn update_marked(&mut self, item: T, weight: f64, mark: bool) -> Result<()> {
        validation::validate_weight(weight)?;
        validation::validate_stream_length(self.n)?;
        self.update_impl(item, weight, mark);
        Ok(())
    }

    fn update_impl(&mut self, item: T, weight: f64, mark: bool) {
        self.n += 1;
        if self.r == 0 {
            self.update_warmup(item, weight, mark);
        } else if self.h + self.r == self.k {
            let tau = self.tau();
            if weight > tau {
                if self.r == 1 {
                    self.update_heavy_r_eq_1(item, weight, mark);
                } else {
                    self.update_heavy_general(item, weight, mark);
                }
            } else {
                self.update_light(item, weight, mark);
            }
        } else {
            // pseudo mode: an R region exists but the sample is not full,
            // which only arises in sketches produced by a union resolve
            let tau = self.tau();
            if weight > tau {
                self.update_pseudo_heavy(item, weight, mark);
            } else {
                self.update_pseudo_light(item, weight, mark);
            }
        }
        debug_assert!(self.h + self.r <= self.k);
        debug_assert_eq!(self.m, 0);
    }

    // Warm-up: append into the H heap; the (k+1)-th arrival triggers the
    // first candidate-set resolution.
    fn update_warmup(&mut self, item: T, weight: f64, mark: bool) {
        self.grow_if_needed();
        self.push_heavy(item, weight, mark);
        if self.h > self.k {
            self.transition_from_warmup();
        }
    }

    fn transition_from_warmup(&mut self) {
        debug_assert_eq!(self.h, self.k + 1);
        debug_assert_eq!(self.r, 0);
        // seed the candidate set with the two lightest items
        self.pop_min_to_m_region();
        self.pop_min_to_m_region();
        let wt_cands = self.weights[self.h] + self.weights[self.h + 1];
        self.grow_candidate_set(wt_cands, 2);
    }

    // Heavy item, general case: the gap admits the new item into the heap,
    // and the old R region alone seeds the candidates.
    fn update_heavy_general(&mut self, item: T, weight: f64, mark: bool) {
        debug_assert!(self.r >= 2);
        self.push_heavy(item, weight, mark);
        let (wt, num) = (self.total_wt_r, self.r);
        self.grow_candidate_set(wt, num);
    }

    // Heavy item with r == 1: a lone R item cannot seed the candidate set
    // (its implied threshold would divide by zero), so the heap minimum is
    // pulled out first.
    fn update_heavy_r_eq_1(&mut self, item: T, weight: f64, mark: bool) {
        debug_assert_eq!(self.r, 1);
        self.push_heavy(item, weight, mark);
        self.pop_min_to_m_region();
        let wt_cands = self.weights[self.h] + self.total_wt_r;
        self.grow_candidate_set(wt_cands, 2);
    }

    // Light item: goes straight into the gap as the first candidate.
    fn update_light(&mut self, item: T, weight: f64, mark: bool) {
        debug_assert!(self.r >= 1);
        let gap = self.h;
        self.write_slot(gap, item, weight, mark);
        self.m = 1;
        let (wt, num) = (self.total_wt_r + weight, self.r + 1);
        self.grow_candidate_set(wt, num);
    }

    // Pseudo-heavy: room remains, so the item simply joins H. The first R
    // item steps aside to the end of the buffer so the gap stays at h.
    fn update_pseudo_heavy(&mut self, item: T, weight: f64, mark: bool) {
        debug_assert!(self.r >= 1 && self.h + self.r < self.k);
        let first_r = self.h + 1;
        let moved = self.data[first_r].take();
        debug_assert!(moved.is_some());
        self.data.push(moved);
        self.weights.push(PLACEHOLDER_WEIGHT);
        if let Some(marks) = &mut self.marks {
            let moved_mark = marks[first_r];
            marks[first_r] = false;
            marks.push(moved_mark);
        }
        self.curr_alloc = self.data.len();
        self.push_heavy(item, weight, mark);
    }

    // Pseudo-light: the item joins R with probability weight / tau and then
    // carries tau like its peers; tau itself is unchanged. One draw decides.
    fn update_pseudo_light(&mut self, item: T, weight: f64, mark: bool) {
        debug_assert!(self.r >= 1 && self.h + self.r < self.k);
        let tau = self.tau();
        if self.rng.next_double() < weight / tau {
            self.data.push(Some(item));
            self.weights.push(PLACEHOLDER_WEIGHT);
            if let Some(marks) = &mut self.marks {
                marks.push(mark);
            }
            self.curr_alloc = self.data.len();
            self.r += 1;
            self.total_wt_r += tau;
        }
    }

    /// Shrinks the configured capacity by one, evicting at most one item
    ///
    /// # Errors
    ///
    /// Returns `IncompatibleSketches` when the capacity is already 1.
    pub fn decrease_k_by_1(&mut self) -> Result<()> {
        if self.k <= 1 {
            return Err(SketchError::IncompatibleSketches {
                reason: "cannot decrease k below 1".to_string(),
            });
        }
        if self.r == 0 {
            // warm-up: nothing to evict until the sample is overfull
            self.k -= 1;
            if self.h > self.k {
                self.transition_from_warmup();
            }
        } else if self.h + self.r < self.k {
            // pseudo mode has slack; the smaller capacity still fits
            self.k -= 1;
        } else {
            // close the gap so candidate slots stay contiguous
            let gap = self.h;
            debug_assert!(self.data[gap].is_none());
            self.data.remove(gap);
            self.weights.remove(gap);
            if let Some(marks) = &mut self.marks {
                marks.remove(gap);
            }
            self.curr_alloc = self.data.len();
            self.k -= 1;
            if self.h > 0 {
                let wt = self.weights[0];
                self.pop_min_to_m_region();
                let (cands, num) = (wt + self.total_wt_r, self.r + 1);
                self.grow_candidate_set(cands, num);
            } else {
                let (cands, num) = (self.total_wt_r, self.r);
                self.grow_candidate_set(cands, num);
            }
        }
        Ok(())
    }

    /// Drops the marks bitmap, turning a gadget into a plain sketch
    ///
    /// Irreversible.
    pub(crate) fn strip_marks(&mut self) {
        self.marks = None;
        self.num_marks_in_h = 0;
    }

    /// Clears all sampling state; a gadget stays a gadget
    pub fn reset(&mut self) {
        self.n = 0;
        self.h = 0;
        self.m = 0;
        self.r = 0;
        self.total_wt_r = 0.0;
        self.num_marks_in_h = 0;
        self.curr_alloc = self.rf.initial_size(self.k);
        self.data = Vec::with_capacity(self.curr_alloc);
        self.weights = Vec::with_capacity(self.curr_alloc);
        if self.marks.is_some() {
            self.marks = Some(Vec::new());
        }
    }

    /// Iterates over (item, weight) pairs; R items report tau
    pub fn sketch_samples(&self) -> impl Iterator<Item = (&T, f64)> + '_ {
        let tau = self.tau();
        let h = self.h;
        self.data
            .iter()
            .enumerate()
            .filter_map(move |(slot, item)| {
                item.as_ref()
                    .map(|it| (it, if slot < h { self.weights[slot] } else { tau }))
            })
    }

    /// Number of items currently retained
    pub fn num_samples(&self) -> usize {
        self.h + self.r
    }

    /// Total items offered
    pub fn n(&self) -> u64 {
        self.n
    }

    /// Configured capacity
    pub fn k(&self) -> usize {
        self.k
    }

    /// True if no items have been offered
    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    /// The common weight of R-region items; 0 while the region is empty
    pub fn tau(&self) -> f64 {
        if self.r == 0 {
            0.0
        } else {
            self.total_wt_r / self.r as f64
        }
    }

    /// Sum of all weights represented by the sketch
    ///
    /// Equals the exact total weight of the stream: candidate resolution
    /// conserves weight mass on every update.
    pub fn total_weight(&self) -> f64 {
        self.weights[..self.h].iter().sum::<f64>() + self.total_wt_r
    }

    /// Estimates the stream weight of items matching `predicate`
    ///
    /// H items contribute exactly; the R region contributes through a
    /// two-standard-deviation interval around its matched fraction.
    pub fn estimate_subset_sum<P: Fn(&T) -> bool>(&self, predicate: P) -> SubsetSummary {
        if self.n == 0 {
            return subset_sum::estimate_with_bounds(0.0, 0.0, 0.0, 0.0, 0);
        }
        let mut h_matched = 0.0;
        let mut h_total = 0.0;
        let mut r_matched = 0u64;
        for (slot, item) in self.data.iter().enumerate() {
            let Some(item) = item else { continue };
            if slot < self.h {
                h_total += self.weights[slot];
                if predicate(item) {
                    h_matched += self.weights[slot];
                }
            } else if predicate(item) {
                r_matched += 1;
            }
        }
        subset_sum::estimate_with_bounds(
            h_matched,
            h_total,
            r_matched as f64 * self.tau(),
            self.total_wt_r,
            self.r as u64,
        )
    }

    // ----- buffer and heap plumbing -----

    fn grow_if_needed(&mut self) {
        let limit = self.k + 1;
        if self.data.len() == self.curr_alloc && self.curr_alloc < limit {
            self.curr_alloc = self.rf.next_size(self.curr_alloc, limit);
            self.data.reserve_exact(self.curr_alloc - self.data.len());
            self.weights.reserve_exact(self.curr_alloc - self.weights.len());
        }
    }

    fn write_slot(&mut self, slot: usize, item: T, weight: f64, mark: bool) {
        if slot == self.data.len() {
            self.data.push(Some(item));
            self.weights.push(weight);
            if let Some(marks) = &mut self.marks {
                marks.push(mark);
            }
        } else {
            self.data[slot] = Some(item);
            self.weights[slot] = weight;
            if let Some(marks) = &mut self.marks {
                marks[slot] = mark;
            }
        }
    }

    fn swap_slots(&mut self, a: usize, b: usize) {
        self.data.swap(a, b);
        self.weights.swap(a, b);
        if let Some(marks) = &mut self.marks {
            marks.swap(a, b);
        }
    }

    fn is_marked(&self, slot: usize) -> bool {
        self.marks.as_ref().is_some_and(|m| m[slot])
    }

    // insert at the gap (or append) and restore heap order upward
    fn push_heavy(&mut self, item: T, weight: f64, mark: bool) {
        self.write_slot(self.h, item, weight, mark);
        if mark {
            self.num_marks_in_h += 1;
        }
        self.h += 1;
        self.restore_towards_root(self.h - 1);
    }

    fn restore_towards_root(&mut self, mut slot: usize) {
        while slot > 0 {
            let parent = (slot - 1) / 2;
            if self.weights[slot] < self.weights[parent] {
                self.swap_slots(slot, parent);
                slot = parent;
            } else {
                break;
            }
        }
    }

    fn restore_towards_leaves(&mut self, mut slot: usize) {
        loop {
            let left = 2 * slot + 1;
            if left >= self.h {
                break;
            }
            let mut child = left;
            let right = left + 1;
            if right < self.h && self.weights[right] < self.weights[left] {
                child = right;
            }
            if self.weights[child] < self.weights[slot] {
                self.swap_slots(slot, child);
                slot = child;
            } else {
                break;
            }
        }
    }

    // move the heap minimum into the slot just left of the candidate region
    fn pop_min_to_m_region(&mut self) {
        debug_assert!(self.h > 0);
        if self.is_marked(0) {
            self.num_marks_in_h -= 1;
        }
        let tgt = self.h - 1;
        if tgt != 0 {
            self.swap_slots(0, tgt);
        }
        self.h -= 1;
        self.m += 1;
        self.restore_towards_leaves(0);
    }

    // Pull heap items into the candidate set while the minimum is light
    // relative to the implied threshold, then evict one candidate. The
    // survivors become the new R region holding the full candidate mass.
    fn grow_candidate_set(&mut self, mut wt_cands: f64, mut num_cands: usize) {
        debug_assert_eq!(self.h + num_cands, self.k + 1);
        while self.h > 0 {
            let next_wt = self.weights[0];
            if next_wt * (num_cands as f64) < wt_cands + next_wt {
                wt_cands += next_wt;
                num_cands += 1;
                self.pop_min_to_m_region();
            } else {
                break;
            }
        }
        self.downsample_candidate_set(wt_cands, num_cands);
    }

    fn downsample_candidate_set(&mut self, wt_cands: f64, num_cands: usize) {
        debug_assert!(num_cands >= 2);
        debug_assert_eq!(self.h + num_cands, self.k + 1);

        let delete_slot = self.choose_delete_slot(wt_cands, num_cands);
        let leftmost = self.h;
        debug_assert!((leftmost..self.data.len()).contains(&delete_slot));
        if delete_slot != leftmost {
            self.data[delete_slot] = self.data[leftmost].take();
            if let Some(marks) = &mut self.marks {
                marks[delete_slot] = marks[leftmost];
                marks[leftmost] = false;
            }
        } else {
            self.data[leftmost] = None;
            if let Some(marks) = &mut self.marks {
                marks[leftmost] = false;
            }
        }
        for slot in leftmost..self.weights.len() {
            self.weights[slot] = PLACEHOLDER_WEIGHT;
        }
        self.m = 0;
        self.r = num_cands - 1;
        self.total_wt_r = wt_cands;
    }

    fn choose_delete_slot(&mut self, wt_cands: f64, num_cands: usize) -> usize {
        if self.m == 0 {
            // all candidates are current R items with equal weight
            self.pick_random_slot(self.h, num_cands)
        } else if self.m == 1 {
            // one real-weight candidate; it survives with probability
            // (num_cands - 1) * weight / candidate mass
            let wt_m = self.weights[self.h];
            let num_to_keep = (num_cands - 1) as f64;
            if wt_cands * self.rng.next_double_exclude_zero() < num_to_keep * wt_m {
                self.pick_random_slot(self.h + 1, num_cands - 1)
            } else {
                self.h
            }
        } else {
            self.choose_weighted_delete_slot(wt_cands, num_cands)
        }
    }

    // inverse-CDF walk over the real-weight candidates; falls through to a
    // uniform choice among the equal-weight R candidates
    fn choose_weighted_delete_slot(&mut self, wt_cands: f64, num_cands: usize) -> usize {
        debug_assert!(self.m >= 2);
        let offset = self.h;
        let final_m = offset + self.m - 1;
        let num_to_keep = (num_cands - 1) as f64;
        let mut left_subtotal = 0.0;
        let mut right_subtotal = -wt_cands * self.rng.next_double_exclude_zero();
        for slot in offset..=final_m {
            left_subtotal += num_to_keep * self.weights[slot];
            right_subtotal += wt_cands;
            if left_subtotal < right_subtotal {
                return slot;
            }
        }
        if num_cands > self.m {
            self.pick_random_slot(final_m + 1, num_cands - self.m)
        } else {
            final_m
        }
    }

    fn pick_random_slot(&mut self, start: usize, num: usize) -> usize {
        debug_assert!(num >= 1);
        start + self.rng.next_index(num as u64) as usize
    }

    // ----- union support -----

    pub(crate) fn is_gadget(&self) -> bool {
        self.marks.is_some()
    }

    pub(crate) fn heavy_entries(&self) -> impl Iterator<Item = (&T, f64, bool)> + '_ {
        (0..self.h).map(move |slot| {
            (
                self.data[slot].as_ref().expect("H slot is occupied"),
                self.weights[slot],
                self.is_marked(slot),
            )
        })
    }

    pub(crate) fn reservoir_entries(&self) -> impl Iterator<Item = &T> + '_ {
        self.data[self.h..]
            .iter()
            .filter_map(|item| item.as_ref())
    }

    // Directly assembles a sketch from resolved regions. Heavy pairs keep
    // their weights; light items share `total_wt_r` equally.
    pub(crate) fn from_parts(
        k: usize,
        n: u64,
        heavy: Vec<(T, f64)>,
        light: Vec<T>,
        total_wt_r: f64,
        rng: SketchRng,
    ) -> Result<Self> {
        let mut sketch = Self::build(k, ResizeFactor::default(), rng, false)?;
        debug_assert!(heavy.len() + light.len() <= k);
        for (item, weight) in heavy {
            sketch.grow_if_needed();
            sketch.push_heavy(item, weight, false);
        }
        if !light.is_empty() {
            // gap at h, R region packed immediately after it
            let len = sketch.h + 1 + light.len();
            sketch.data.resize_with(len, || None);
            sketch.weights.resize(len, PLACEHOLDER_WEIGHT);
            sketch.curr_alloc = len;
            let start = sketch.h + 1;
            for (offset, item) in light.into_iter().enumerate() {
                sketch.data[start + offset] = Some(item);
            }
            sketch.r = len - start;
            sketch.total_wt_r = total_wt_r;
        }
        sketch.n = n;
        Ok(sketch)
    }

    // ----- serialization -----

    fn pre_longs(&self) -> u8 {
        if self.n == 0 {
            1
        } else if self.r == 0 {
            2
        } else {
            4
        }
    }

    fn base_flags(&self) -> u8 {
        let mut flags = 0;
        if self.n == 0 {
            flags |= preamble::FLAG_EMPTY;
        }
        if self.marks.is_some() {
            flags |= preamble::FLAG_GADGET;
        }
        Preamble::flags_with_rf(flags, self.rf)
    }

    /// Serialized image size in bytes, given the item encoding
    pub fn serialized_size_bytes<S: ItemSerde<T>>(&self, serde: &S) -> usize {
        self.serialize(serde).len()
    }

    /// Writes the byte image
    ///
    /// Empty: one preamble long. Warm-up: two preamble longs, weights, then
    /// items. Full: four preamble longs carrying the H count, R count and R
    /// mass, then H weights, items in slot order, and the marks bitmap when
    /// the sketch is a gadget.
    pub fn serialize<S: ItemSerde<T>>(&self, serde: &S) -> Vec<u8> {
        let mut out = Vec::new();
        let pre_longs = self.pre_longs();
        Preamble::new(
            Family::VarOpt,
            pre_longs,
            self.base_flags(),
            self.k as u32,
            self.n,
        )
        .write(&mut out);
        if self.n == 0 {
            return out;
        }
        if self.r > 0 {
            out.extend_from_slice(&(self.h as u32).to_le_bytes());
            out.extend_from_slice(&(self.r as u32).to_le_bytes());
            out.extend_from_slice(&self.total_wt_r.to_le_bytes());
        }
        for weight in &self.weights[..self.h] {
            out.extend_from_slice(&weight.to_le_bytes());
        }
        let items: Vec<T> = self
            .data
            .iter()
            .filter_map(|item| item.clone())
            .collect();
        debug_assert_eq!(items.len(), self.num_samples());
        out.extend_from_slice(&serde.serialize_to_bytes(&items));
        if let Some(marks) = &self.marks {
            let mut packed = vec![0u8; self.num_samples().div_ceil(8)];
            let flags = self
                .data
                .iter()
                .enumerate()
                .filter(|(_, item)| item.is_some())
                .map(|(slot, _)| marks[slot]);
            for (bit, marked) in flags.enumerate() {
                if marked {
                    packed[bit / 8] |= 1 << (bit % 8);
                }
            }
            out.extend_from_slice(&packed);
        }
        out
    }

    /// Reads a byte image
    pub fn deserialize<S: ItemSerde<T>>(bytes: &[u8], serde: &S) -> Result<Self> {
        let pre = Preamble::parse(bytes)?;
        if pre.family != Family::VarOpt {
            return Err(SketchError::CorruptImage {
                field: "family".to_string(),
                reason: format!("expected VAROPT, found 0x{:02x}", pre.family.id()),
            });
        }
        let k = pre.k as usize;
        let gadget = pre.is_gadget();
        if pre.is_empty() {
            return Self::build(k, pre.resize_factor(), SketchRng::new(), gadget);
        }

        let (h, r, total_wt_r, mut pos) = if pre.pre_longs == 2 {
            // warm-up image: every offered item is in H
            if pre.n > k as u64 {
                return Err(SketchError::CorruptImage {
                    field: "n".to_string(),
                    reason: format!(
                        "warm-up image claims {} items but k is only {}",
                        pre.n, k
                    ),
                });
            }
            (pre.n as usize, 0usize, 0.0, 2 * preamble::PREAMBLE_LONG_BYTES)
        } else {
            validation::validate_min_size(bytes.len(), 4 * preamble::PREAMBLE_LONG_BYTES)?;
            let h = u32::from_le_bytes(bytes[16..20].try_into().unwrap()) as usize;
            let r = u32::from_le_bytes(bytes[20..24].try_into().unwrap()) as usize;
            let total_wt_r = f64::from_le_bytes(bytes[24..32].try_into().unwrap());
            if r == 0 {
                return Err(SketchError::CorruptImage {
                    field: "rCount".to_string(),
                    reason: "full image must have a non-empty R region".to_string(),
                });
            }
            if h + r > k {
                return Err(SketchError::CorruptImage {
                    field: "hCount".to_string(),
                    reason: format!("h ({}) + r ({}) must not exceed k ({})", h, r, k),
                });
            }
            if (pre.n as u128) < (h + r) as u128 {
                return Err(SketchError::CorruptImage {
                    field: "n".to_string(),
                    reason: format!("{} is less than the {} retained items", pre.n, h + r),
                });
            }
            if !total_wt_r.is_finite() || total_wt_r <= 0.0 {
                return Err(SketchError::CorruptImage {
                    field: "totalWtR".to_string(),
                    reason: format!("{} must be positive and finite", total_wt_r),
                });
            }
            (h, r, total_wt_r, 4 * preamble::PREAMBLE_LONG_BYTES)
        };

        validation::validate_min_size(bytes.len(), pos + 8 * h)?;
        let mut h_weights = Vec::with_capacity(h);
        for _ in 0..h {
            let weight = f64::from_le_bytes(bytes[pos..pos + 8].try_into().unwrap());
            if !weight.is_finite() || weight <= 0.0 {
                return Err(SketchError::CorruptImage {
                    field: "weights".to_string(),
                    reason: format!("H item weight {} must be positive and finite", weight),
                });
            }
            h_weights.push(weight);
            pos += 8;
        }

        let (items, consumed) = serde.deserialize_from_bytes(&bytes[pos..], h + r)?;
        pos += consumed;

        let mut marks_bits = vec![false; h + r];
        if gadget {
            let needed = (h + r).div_ceil(8);
            validation::validate_min_size(bytes.len(), pos + needed)?;
            for (bit, flag) in marks_bits.iter_mut().enumerate() {
                *flag = bytes[pos + bit / 8] & (1 << (bit % 8)) != 0;
            }
        }

        let mut sketch = Self::build(k, pre.resize_factor(), SketchRng::new(), gadget)?;
        let mut items = items.into_iter();
        for (slot, weight) in h_weights.into_iter().enumerate() {
            sketch.grow_if_needed();
            sketch.push_heavy(items.next().expect("serde returned h+r items"), weight, marks_bits[slot]);
        }
        if r > 0 {
            let len = h + 1 + r;
            sketch.data.resize_with(len, || None);
            sketch.weights.resize(len, PLACEHOLDER_WEIGHT);
            if let Some(marks) = &mut sketch.marks {
                marks.resize(len, false);
            }
            sketch.curr_alloc = len;
            for (offset, item) in items.enumerate() {
                let slot = h + 1 + offset;
                sketch.data[slot] = Some(item);
                if let Some(marks) = &mut sketch.marks {
                    marks[slot] = marks_bits[h + offset];
                }
            }
            sketch.r = r;
            sketch.total_wt_r = total_wt_r;
        }
        sketch.n = pre.n;
        Ok(sketch)
    }
}

impl<T: Clone> fmt::Display for VarOptSketch<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "### VarOptSketch summary:")?;
        writeln!(f, "   k            : {}", self.k)?;
        writeln!(f, "   n            : {}", self.n)?;
        writeln!(f, "   h            : {}", self.h)?;
        writeln!(f, "   r            : {}", self.r)?;
        writeln!(f, "   tau          : {}", self.tau())?;
        writeln!(
            f,
            "   mode         : {}",
            if self.r == 0 { "warm-up" } else { "sampling" }
        )
    }
}
