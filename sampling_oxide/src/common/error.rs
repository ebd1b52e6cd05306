//! Error types for sampling sketch operations

use std::fmt;

/// Errors that can occur during sketch operations
#[derive(Debug, Clone, PartialEq)]
pub enum SketchError {
    /// Invalid parameter provided to sketch constructor or operation
    InvalidParameter {
        /// Parameter name
        param: String,
        /// Invalid value provided
        value: String,
        /// Constraint that was violated
        constraint: String,
    },

    /// Stream length would exceed the maximum representable item count
    CapacityExceeded {
        /// The maximum item count
        limit: u64,
    },

    /// A serialized image failed a structural invariant
    CorruptImage {
        /// Name of the inconsistent field
        field: String,
        /// What was wrong with it
        reason: String,
    },

    /// Error during item serialization
    SerializationError(String),

    /// Error during item deserialization
    DeserializationError(String),

    /// Attempted to combine or reconfigure sketches in an incompatible way
    IncompatibleSketches {
        /// Reason for incompatibility
        reason: String,
    },
}

impl fmt::Display for SketchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SketchError::InvalidParameter {
                param,
                value,
                constraint,
            } => {
                write!(
                    f,
                    "Invalid parameter '{}': value '{}' {}",
                    param, value, constraint
                )
            }
            SketchError::CapacityExceeded { limit } => {
                write!(f, "Stream length would exceed maximum of {} items", limit)
            }
            SketchError::CorruptImage { field, reason } => {
                write!(f, "Corrupt sketch image: field '{}' {}", field, reason)
            }
            SketchError::SerializationError(msg) => write!(f, "Serialization error: {}", msg),
            SketchError::DeserializationError(msg) => write!(f, "Deserialization error: {}", msg),
            SketchError::IncompatibleSketches { reason } => {
                write!(f, "Incompatible sketches: {}", reason)
            }
        }
    }
}

impl std::error::Error for SketchError {}

/// Result type alias for sketch operations
pub type Result<T> = std::result::Result<T, SketchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_invalid_parameter() {
        let err = SketchError::InvalidParameter {
            param: "k".to_string(),
            value: "0".to_string(),
            constraint: "must be greater than 0".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("'k'"));
        assert!(msg.contains("must be greater than 0"));
    }

    #[test]
    fn test_display_corrupt_image_names_field() {
        let err = SketchError::CorruptImage {
            field: "family".to_string(),
            reason: "expected 0x09, found 0x07".to_string(),
        };
        assert!(err.to_string().contains("'family'"));
    }

    #[test]
    fn test_display_capacity_exceeded() {
        let err = SketchError::CapacityExceeded { limit: 42 };
        assert!(err.to_string().contains("42"));
    }
}
