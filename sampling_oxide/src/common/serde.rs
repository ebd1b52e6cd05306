//! Item serialization contract for generic sketches
//!
//! A sketch over arbitrary items cannot know their byte layout; callers
//! supply an [`ItemSerde`] when writing or reading an image. The encoding
//! must be stable across process boundaries since images are the only
//! persisted state in this library.

use crate::common::{Result, SketchError};

/// Converts items of type `T` to and from a portable byte representation
pub trait ItemSerde<T> {
    /// Serializes `items` into a contiguous byte buffer
    fn serialize_to_bytes(&self, items: &[T]) -> Vec<u8>;

    /// Deserializes exactly `num_items` items from the front of `bytes`
    ///
    /// Returns the items and the number of bytes consumed.
    fn deserialize_from_bytes(&self, bytes: &[u8], num_items: usize) -> Result<(Vec<T>, usize)>;

    /// Number of bytes `serialize_to_bytes` would produce for `items`
    fn size_of(&self, items: &[T]) -> usize;
}

/// Fixed-width little-endian encoding for `i64` items
#[derive(Clone, Copy, Debug, Default)]
pub struct ArrayOfLongsSerde;

impl ItemSerde<i64> for ArrayOfLongsSerde {
    fn serialize_to_bytes(&self, items: &[i64]) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(items.len() * 8);
        for item in items {
            bytes.extend_from_slice(&item.to_le_bytes());
        }
        bytes
    }

    fn deserialize_from_bytes(&self, bytes: &[u8], num_items: usize) -> Result<(Vec<i64>, usize)> {
        let needed = num_items * 8;
        if bytes.len() < needed {
            return Err(SketchError::DeserializationError(format!(
                "Insufficient item data: need {} bytes for {} longs, got {}",
                needed,
                num_items,
                bytes.len()
            )));
        }
        let mut items = Vec::with_capacity(num_items);
        for chunk in bytes[..needed].chunks_exact(8) {
            items.push(i64::from_le_bytes(chunk.try_into().unwrap()));
        }
        Ok((items, needed))
    }

    fn size_of(&self, items: &[i64]) -> usize {
        items.len() * 8
    }
}

/// Length-prefixed UTF-8 encoding for `String` items
#[derive(Clone, Copy, Debug, Default)]
pub struct ArrayOfStringsSerde;

impl ItemSerde<String> for ArrayOfStringsSerde {
    fn serialize_to_bytes(&self, items: &[String]) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.size_of(items));
        for item in items {
            bytes.extend_from_slice(&(item.len() as u32).to_le_bytes());
            bytes.extend_from_slice(item.as_bytes());
        }
        bytes
    }

    fn deserialize_from_bytes(
        &self,
        bytes: &[u8],
        num_items: usize,
    ) -> Result<(Vec<String>, usize)> {
        let mut items = Vec::with_capacity(num_items);
        let mut pos = 0usize;
        for i in 0..num_items {
            if bytes.len() < pos + 4 {
                return Err(SketchError::DeserializationError(format!(
                    "Truncated length prefix for string item {}",
                    i
                )));
            }
            let len = u32::from_le_bytes(bytes[pos..pos + 4].try_into().unwrap()) as usize;
            pos += 4;
            if bytes.len() < pos + len {
                return Err(SketchError::DeserializationError(format!(
                    "Truncated payload for string item {}: need {} bytes",
                    i, len
                )));
            }
            let s = std::str::from_utf8(&bytes[pos..pos + len])
                .map_err(|e| {
                    SketchError::DeserializationError(format!(
                        "String item {} is not valid UTF-8: {}",
                        i, e
                    ))
                })?
                .to_string();
            pos += len;
            items.push(s);
        }
        Ok((items, pos))
    }

    fn size_of(&self, items: &[String]) -> usize {
        items.iter().map(|s| 4 + s.len()).sum()
    }
}
