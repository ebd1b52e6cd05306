//! Validation utilities for sketch parameters and deserialization bounds

use crate::common::{Result, SketchError};

/// Maximum configured sample size for any sketch (2^31 - 2)
pub const MAX_SAMPLE_SIZE: u64 = (1u64 << 31) - 2;

/// Maximum number of items a sketch may be offered (2^48 - 2)
pub const MAX_STREAM_LENGTH: u64 = (1u64 << 48) - 2;

/// Validate that a sample size k is in [1, 2^31 - 2]
pub fn validate_sample_size(k: u64) -> Result<()> {
    if k == 0 {
        return Err(SketchError::InvalidParameter {
            param: "k".to_string(),
            value: k.to_string(),
            constraint: "must be greater than 0".to_string(),
        });
    }
    if k > MAX_SAMPLE_SIZE {
        return Err(SketchError::InvalidParameter {
            param: "k".to_string(),
            value: k.to_string(),
            constraint: format!("must not exceed {}", MAX_SAMPLE_SIZE),
        });
    }
    Ok(())
}

/// Validate that an item weight is strictly positive and finite
pub fn validate_weight(weight: f64) -> Result<()> {
    if !(weight > 0.0) || !weight.is_finite() {
        return Err(SketchError::InvalidParameter {
            param: "weight".to_string(),
            value: weight.to_string(),
            constraint: "must be positive and finite".to_string(),
        });
    }
    Ok(())
}

/// Validate that offering one more item stays under the stream-length cap
pub fn validate_stream_length(n: u64) -> Result<()> {
    if n >= MAX_STREAM_LENGTH {
        return Err(SketchError::CapacityExceeded {
            limit: MAX_STREAM_LENGTH,
        });
    }
    Ok(())
}

/// Validate minimum required bytes for deserialization
pub fn validate_min_size(actual: usize, required: usize) -> Result<()> {
    if actual < required {
        return Err(SketchError::DeserializationError(format!(
            "Insufficient data: need at least {} bytes, got {}",
            required, actual
        )));
    }
    Ok(())
}
