//! Sampling sketches for streams
//!
//! Three coupled single-pass sampling families, each paired with a
//! mergeable union and sharing one preamble-based wire format:
//!
//! - [`ReservoirSketch`] / [`ReservoirLongsSketch`]: uniform sampling, every
//!   item equally likely (Vitter 1985)
//! - [`VarOptSketch`]: variance-optimal weighted sampling with an unbiased
//!   subset-sum estimator (Cohen et al. 2011)
//! - [`EbppsSketch`]: bounded-size sampling with inclusion probability
//!   exactly proportional to weight (Hentschel, Haas, Tian 2023)
//!
//! # Choosing a Sketch
//!
//! | Need | Sketch |
//! |------|--------|
//! | Uniform sample of a stream | [`ReservoirSketch`] |
//! | Weighted sample, best subset-sum variance | [`VarOptSketch`] |
//! | Inclusion probability proportional to weight | [`EbppsSketch`] |
//!
//! Every sketch answers [`estimate_subset_sum`](ReservoirSketch::estimate_subset_sum)
//! queries with a [`SubsetSummary`] carrying an estimate, confidence bounds,
//! and the deterministic total weight.

pub mod ebpps;
pub mod preamble;
pub mod reservoir;
pub mod reservoir_longs;
pub mod reservoir_union;
pub mod size_encoder;
pub mod subset_sum;
pub mod varopt;
pub mod varopt_union;

pub use ebpps::EbppsSketch;
pub use preamble::{preamble_to_string, Family, Preamble};
pub use reservoir::ReservoirSketch;
pub use reservoir_longs::ReservoirLongsSketch;
pub use reservoir_union::{ReservoirLongsUnion, ReservoirUnion};
pub use subset_sum::SubsetSummary;
pub use varopt::VarOptSketch;
pub use varopt_union::VarOptUnion;
