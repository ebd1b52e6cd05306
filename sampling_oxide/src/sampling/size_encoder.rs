//! Lossy 16-bit encoding of reservoir sizes
//!
//! The legacy (version 1) reservoir image stored k in two bytes: 5 exponent
//! bits and an 11-bit binary fraction, giving 2048 bins per octave. Encoding
//! rounds up, so the decoded capacity is never smaller than the requested
//! one and the relative overshoot is at most 1/2048 above the first octave.
//! Current images store k as a plain 32-bit integer; this module exists only
//! to read and produce version 1 images.

use crate::common::{validation, Result, SketchError};

const MANTISSA_BITS: u32 = 11;
const BINS_PER_OCTAVE: u64 = 1 << MANTISSA_BITS;

/// Encodes a reservoir size into the 16-bit legacy representation
///
/// Rounds up to the next representable value, so
/// `decode(encode(n)?) >= n` for every valid `n`.
pub fn encode(n: u32) -> Result<u16> {
    validation::validate_sample_size(n as u64)?;
    let n = n as u64;
    let exponent = 63 - n.leading_zeros() as u64;
    let numerator = n << MANTISSA_BITS;
    let denominator = 1u64 << exponent;
    // ceiling division picks the smallest representable value >= n
    let mut mantissa = numerator.div_ceil(denominator) - BINS_PER_OCTAVE;
    let mut exponent = exponent;
    if mantissa == BINS_PER_OCTAVE {
        mantissa = 0;
        exponent += 1;
    }
    debug_assert!(mantissa < BINS_PER_OCTAVE);
    if exponent > 31 {
        return Err(SketchError::InvalidParameter {
            param: "k".to_string(),
            value: n.to_string(),
            constraint: "is not representable in the 16-bit size encoding".to_string(),
        });
    }
    Ok(((exponent as u16) << MANTISSA_BITS) | mantissa as u16)
}

/// Decodes the 16-bit legacy representation back to a reservoir size
pub fn decode(encoded: u16) -> u32 {
    let exponent = (encoded >> MANTISSA_BITS) as u64;
    let mantissa = (encoded & (BINS_PER_OCTAVE as u16 - 1)) as u64;
    (((BINS_PER_OCTAVE + mantissa) << exponent) >> MANTISSA_BITS) as u32
}
