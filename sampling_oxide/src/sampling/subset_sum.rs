//! Subset-sum estimates with confidence bounds
//!
//! All three sketch families answer predicate queries through the same
//! summary shape: a point estimate, a confidence interval, and the
//! deterministic total weight held by the sketch. The interval construction
//! treats the randomized region of a sketch (reservoir slots, the R region,
//! the scaled EBPPS sample) as repeated Bernoulli trials on the predicate
//! and widens the matched fraction by two standard deviations.

/// Number of standard deviations used for the bounds
const NUM_STD_DEVS: f64 = 2.0;

/// Result of a subset-sum query
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SubsetSummary {
    /// Unbiased estimate of the matching weight in the full stream
    pub estimate: f64,
    /// Lower confidence bound on the matching weight
    pub lower_bound: f64,
    /// Upper confidence bound on the matching weight
    pub upper_bound: f64,
    /// Deterministic total weight currently represented by the sketch
    pub total_sketch_weight: f64,
}

/// Builds a summary from an exact part plus a randomized region
///
/// `exact_matched`/`exact_total` cover items the sketch holds with
/// certainty (H region items, exact-mode samples). `random_matched` is the
/// estimated matching weight inside the randomized region of total weight
/// `random_total`, observed over `trials` sampled slots.
pub(crate) fn estimate_with_bounds(
    exact_matched: f64,
    exact_total: f64,
    random_matched: f64,
    random_total: f64,
    trials: u64,
) -> SubsetSummary {
    let estimate = exact_matched + random_matched;
    let total = exact_total + random_total;

    if random_total <= 0.0 || trials == 0 {
        return SubsetSummary {
            estimate,
            lower_bound: estimate,
            upper_bound: estimate,
            total_sketch_weight: total,
        };
    }

    let frac = (random_matched / random_total).clamp(0.0, 1.0);
    let sigma = (frac * (1.0 - frac) / trials as f64).sqrt();
    let lo_frac = (frac - NUM_STD_DEVS * sigma).max(0.0);
    let hi_frac = (frac + NUM_STD_DEVS * sigma).min(1.0);

    SubsetSummary {
        estimate,
        lower_bound: exact_matched + lo_frac * random_total,
        upper_bound: exact_matched + hi_frac * random_total,
        total_sketch_weight: total,
    }
}
