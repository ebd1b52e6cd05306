//! sampling_oxide: Weighted Sampling Sketches for Unbounded Streams
//!
//! This library implements three coupled single-pass sampling summaries
//! (uniform reservoir, VarOpt, EBPPS), each with a mergeable union, a
//! versioned little-endian wire format, and unbiased subset-sum estimators
//! with confidence bounds.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod common;
pub mod sampling;

// Re-export core types for convenience
pub use common::{
    ArrayOfLongsSerde, ArrayOfStringsSerde, ItemSerde, ResizeFactor, Result, SketchError,
    SketchRng,
};

/// Error types and result aliases for sketch operations
pub mod error {
    pub use crate::common::{Result, SketchError};
}

// Re-export the sketches themselves
pub use sampling::{
    preamble_to_string, EbppsSketch, ReservoirLongsSketch, ReservoirLongsUnion, ReservoirSketch,
    ReservoirUnion, SubsetSummary, VarOptSketch, VarOptUnion,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_families_share_the_preamble() {
        // every family's image must be introspectable through one codec
        let reservoir = ReservoirLongsSketch::new(10).unwrap();
        let varopt: VarOptSketch<i64> = VarOptSketch::new(10).unwrap();
        let ebpps: EbppsSketch<i64> = EbppsSketch::new(10).unwrap();

        for bytes in [
            reservoir.serialize(),
            varopt.serialize(&ArrayOfLongsSerde),
            ebpps.serialize(&ArrayOfLongsSerde),
        ] {
            let dump = preamble_to_string(&bytes).unwrap();
            assert!(dump.contains("EMPTY"));
            assert!(dump.contains(": 10"));
        }
    }
}
