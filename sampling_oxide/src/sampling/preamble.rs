//! Shared serialized-image preamble for the sampling sketch families
//!
//! Every image starts with a little-endian header measured in 8-byte
//! "preLongs". Byte layout:
//!
//! | offset | size | field |
//! |--------|------|-------|
//! | 0      | 1    | preLongs count |
//! | 1      | 1    | serialization version |
//! | 2      | 1    | family id |
//! | 3      | 1    | flags (bit 0 = empty, bit 1 = gadget, bits 2-3 = resize factor) |
//! | 4      | 4    | k as u32 (v2), or 16-bit encoded k at bytes 6..8 (v1) |
//! | 8      | 8    | item count n, present when preLongs >= 2 |
//!
//! Version 1 reservoir images are upgraded in place while parsing: the
//! encoded k is decoded per [`size_encoder`](super::size_encoder) and the
//! header is treated as version 2 from then on. Family-specific fields
//! follow from byte 16 onward and are owned by the individual sketches.

use crate::common::{validation, ResizeFactor, Result, SketchError};
use crate::sampling::size_encoder;

/// Bytes per preamble long
pub const PREAMBLE_LONG_BYTES: usize = 8;

/// Flag bit: the sketch is empty
pub const FLAG_EMPTY: u8 = 0x01;
/// Flag bit: the image carries a marks bitmap (union gadget)
pub const FLAG_GADGET: u8 = 0x02;

const FLAG_RF_SHIFT: u8 = 2;

/// Sketch family identifiers shared across the serialized images
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Family {
    /// Uniform reservoir sketch
    Reservoir,
    /// Union of uniform reservoirs
    ReservoirUnion,
    /// VarOpt weighted sketch
    VarOpt,
    /// Union of VarOpt sketches
    VarOptUnion,
    /// EBPPS weighted sketch
    Ebpps,
}

impl Family {
    /// Wire identifier for this family
    pub fn id(self) -> u8 {
        match self {
            Family::Reservoir => 0x07,
            Family::ReservoirUnion => 0x08,
            Family::VarOpt => 0x09,
            Family::VarOptUnion => 0x0A,
            Family::Ebpps => 0x0B,
        }
    }

    /// Looks up a family by wire identifier
    pub fn from_id(id: u8) -> Result<Self> {
        match id {
            0x07 => Ok(Family::Reservoir),
            0x08 => Ok(Family::ReservoirUnion),
            0x09 => Ok(Family::VarOpt),
            0x0A => Ok(Family::VarOptUnion),
            0x0B => Ok(Family::Ebpps),
            other => Err(SketchError::CorruptImage {
                field: "family".to_string(),
                reason: format!("unknown id 0x{:02x}", other),
            }),
        }
    }

    /// Smallest legal preLongs count for this family
    pub fn min_pre_longs(self) -> u8 {
        1
    }

    /// Largest legal preLongs count for this family
    pub fn max_pre_longs(self) -> u8 {
        match self {
            Family::Reservoir | Family::ReservoirUnion => 2,
            Family::VarOpt | Family::VarOptUnion => 4,
            Family::Ebpps => 6,
        }
    }

    /// Current serialization version written for this family
    pub fn ser_ver(self) -> u8 {
        match self {
            Family::Reservoir | Family::ReservoirUnion => 2,
            _ => 1,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Family::Reservoir => "RESERVOIR",
            Family::ReservoirUnion => "RESERVOIR_UNION",
            Family::VarOpt => "VAROPT",
            Family::VarOptUnion => "VAROPT_UNION",
            Family::Ebpps => "EBPPS",
        }
    }
}

/// Parsed and validated preamble fields
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Preamble {
    /// Number of 8-byte preamble longs
    pub pre_longs: u8,
    /// Serialization version after any upgrade
    pub ser_ver: u8,
    /// Sketch family
    pub family: Family,
    /// Raw flags byte
    pub flags: u8,
    /// Configured capacity
    pub k: u32,
    /// Items offered to the sketch
    pub n: u64,
}

impl Preamble {
    /// Builds a preamble for writing
    pub fn new(family: Family, pre_longs: u8, flags: u8, k: u32, n: u64) -> Self {
        Preamble {
            pre_longs,
            ser_ver: family.ser_ver(),
            family,
            flags,
            k,
            n,
        }
    }

    /// True when the empty flag is set
    pub fn is_empty(&self) -> bool {
        self.flags & FLAG_EMPTY != 0
    }

    /// True when the gadget flag is set
    pub fn is_gadget(&self) -> bool {
        self.flags & FLAG_GADGET != 0
    }

    /// Resize factor carried in the flags byte
    pub fn resize_factor(&self) -> ResizeFactor {
        ResizeFactor::from_bits(self.flags >> FLAG_RF_SHIFT)
    }

    /// Folds a resize factor into a flags byte
    pub fn flags_with_rf(flags: u8, rf: ResizeFactor) -> u8 {
        flags | (rf.to_bits() << FLAG_RF_SHIFT)
    }

    /// Parses and validates the preamble at the front of `bytes`
    ///
    /// Legacy version 1 reservoir headers are upgraded while parsing: the
    /// 16-bit encoded k at bytes 6..8 is decoded and the result reports
    /// version 2. Every structural inconsistency is reported as
    /// [`SketchError::CorruptImage`] naming the offending field.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        validation::validate_min_size(bytes.len(), PREAMBLE_LONG_BYTES)?;

        let pre_longs = bytes[0];
        let mut ser_ver = bytes[1];
        let family = Family::from_id(bytes[2])?;
        let flags = bytes[3];

        if pre_longs < family.min_pre_longs() || pre_longs > family.max_pre_longs() {
            return Err(SketchError::CorruptImage {
                field: "preLongs".to_string(),
                reason: format!(
                    "{} requires {}..={}, found {}",
                    family.name(),
                    family.min_pre_longs(),
                    family.max_pre_longs(),
                    pre_longs
                ),
            });
        }

        let k = match (family, ser_ver) {
            (Family::Reservoir | Family::ReservoirUnion, 1) => {
                let encoded = u16::from_le_bytes(bytes[6..8].try_into().unwrap());
                ser_ver = 2;
                size_encoder::decode(encoded)
            }
            (Family::Reservoir | Family::ReservoirUnion, 2) => {
                u32::from_le_bytes(bytes[4..8].try_into().unwrap())
            }
            (Family::VarOpt | Family::VarOptUnion | Family::Ebpps, 1) => {
                u32::from_le_bytes(bytes[4..8].try_into().unwrap())
            }
            _ => {
                return Err(SketchError::CorruptImage {
                    field: "serVer".to_string(),
                    reason: format!("unsupported version {} for {}", ser_ver, family.name()),
                });
            }
        };

        validation::validate_sample_size(k as u64).map_err(|_| SketchError::CorruptImage {
            field: "k".to_string(),
            reason: format!("{} is outside [1, 2^31 - 2]", k),
        })?;

        let n = if pre_longs >= 2 {
            validation::validate_min_size(bytes.len(), 2 * PREAMBLE_LONG_BYTES)?;
            u64::from_le_bytes(bytes[8..16].try_into().unwrap())
        } else {
            0
        };

        if n > validation::MAX_STREAM_LENGTH {
            return Err(SketchError::CorruptImage {
                field: "n".to_string(),
                reason: format!("{} exceeds the stream-length cap", n),
            });
        }

        let empty = flags & FLAG_EMPTY != 0;
        if empty && pre_longs != family.min_pre_longs() {
            return Err(SketchError::CorruptImage {
                field: "flags".to_string(),
                reason: format!(
                    "empty flag set but preLongs is {} instead of {}",
                    pre_longs,
                    family.min_pre_longs()
                ),
            });
        }
        if empty && n != 0 {
            return Err(SketchError::CorruptImage {
                field: "n".to_string(),
                reason: format!("empty flag set but n is {}", n),
            });
        }
        if !empty && n == 0 {
            return Err(SketchError::CorruptImage {
                field: "flags".to_string(),
                reason: "empty flag clear but n is 0".to_string(),
            });
        }

        validation::validate_min_size(bytes.len(), pre_longs as usize * PREAMBLE_LONG_BYTES)?;

        Ok(Preamble {
            pre_longs,
            ser_ver,
            family,
            flags,
            k,
            n,
        })
    }

    /// Appends the current-version header to `out`
    pub fn write(&self, out: &mut Vec<u8>) {
        out.push(self.pre_longs);
        out.push(self.family.ser_ver());
        out.push(self.family.id());
        out.push(self.flags);
        out.extend_from_slice(&self.k.to_le_bytes());
        if self.pre_longs >= 2 {
            out.extend_from_slice(&self.n.to_le_bytes());
        }
    }
}

/// Renders a human-readable dump of an image's preamble
pub fn preamble_to_string(bytes: &[u8]) -> Result<String> {
    let pre = Preamble::parse(bytes)?;
    let mut s = String::new();
    s.push_str("### Sampling sketch preamble:\n");
    s.push_str(&format!("   preLongs       : {}\n", pre.pre_longs));
    s.push_str(&format!("   serVer         : {}\n", pre.ser_ver));
    s.push_str(&format!(
        "   family         : {} (0x{:02x})\n",
        pre.family.name(),
        pre.family.id()
    ));
    s.push_str(&format!(
        "   flags          : 0x{:02x}{}{}\n",
        pre.flags,
        if pre.is_empty() { " EMPTY" } else { "" },
        if pre.is_gadget() { " GADGET" } else { "" },
    ));
    s.push_str(&format!("   k              : {}\n", pre.k));
    s.push_str(&format!("   n              : {}\n", pre.n));
    Ok(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_header(family: Family, pre_longs: u8, flags: u8, k: u32, n: u64) -> Vec<u8> {
        let mut out = Vec::new();
        Preamble::new(family, pre_longs, flags, k, n).write(&mut out);
        out
    }

    #[test]
    fn test_round_trip() {
        let mut bytes = valid_header(Family::VarOpt, 4, 0, 1024, 5000);
        bytes.resize(4 * PREAMBLE_LONG_BYTES, 0); // family-specific longs
        let pre = Preamble::parse(&bytes).unwrap();
        assert_eq!(pre.family, Family::VarOpt);
        assert_eq!(pre.pre_longs, 4);
        assert_eq!(pre.k, 1024);
        assert_eq!(pre.n, 5000);
        assert!(!pre.is_empty());
    }

    #[test]
    fn test_empty_round_trip() {
        let bytes = valid_header(Family::Reservoir, 1, FLAG_EMPTY, 64, 0);
        assert_eq!(bytes.len(), PREAMBLE_LONG_BYTES);
        let pre = Preamble::parse(&bytes).unwrap();
        assert!(pre.is_empty());
        assert_eq!(pre.k, 64);
        assert_eq!(pre.n, 0);
    }

    #[test]
    fn test_unknown_family_rejected() {
        let mut bytes = valid_header(Family::Reservoir, 1, FLAG_EMPTY, 64, 0);
        bytes[2] = 0x42;
        let err = Preamble::parse(&bytes).unwrap_err();
        assert!(matches!(err, SketchError::CorruptImage { field, .. } if field == "family"));
    }

    #[test]
    fn test_pre_longs_out_of_range() {
        let mut bytes = valid_header(Family::Reservoir, 2, 0, 64, 10);
        bytes[0] = 4; // reservoir max is 2
        let err = Preamble::parse(&bytes).unwrap_err();
        assert!(matches!(err, SketchError::CorruptImage { field, .. } if field == "preLongs"));
    }

    #[test]
    fn test_empty_flag_requires_min_pre_longs() {
        let mut bytes = valid_header(Family::Reservoir, 2, 0, 64, 10);
        bytes[3] |= FLAG_EMPTY;
        assert!(Preamble::parse(&bytes).is_err());
    }

    #[test]
    fn test_nonempty_with_zero_n_rejected() {
        let bytes = valid_header(Family::Reservoir, 2, 0, 64, 0);
        let err = Preamble::parse(&bytes).unwrap_err();
        assert!(matches!(err, SketchError::CorruptImage { .. }));
    }

    #[test]
    fn test_v1_upgrade_decodes_legacy_k() {
        use crate::sampling::size_encoder;
        // hand-build a v1 reservoir header with encoded k at bytes 6..8
        let encoded = size_encoder::encode(3000).unwrap();
        let mut bytes = vec![2u8, 1, Family::Reservoir.id(), 0];
        bytes.extend_from_slice(&[0, 0]); // bytes 4..6 unused in v1
        bytes.extend_from_slice(&encoded.to_le_bytes());
        bytes.extend_from_slice(&10u64.to_le_bytes());
        let pre = Preamble::parse(&bytes).unwrap();
        assert_eq!(pre.ser_ver, 2);
        assert!(pre.k >= 3000);
        assert_eq!(pre.k, size_encoder::decode(encoded));
    }

    #[test]
    fn test_bad_version_rejected() {
        let mut bytes = valid_header(Family::VarOpt, 4, 0, 64, 10);
        bytes[1] = 7;
        let err = Preamble::parse(&bytes).unwrap_err();
        assert!(matches!(err, SketchError::CorruptImage { field, .. } if field == "serVer"));
    }

    #[test]
    fn test_k_zero_rejected() {
        let bytes = valid_header(Family::VarOpt, 4, 0, 0, 10);
        let err = Preamble::parse(&bytes).unwrap_err();
        assert!(matches!(err, SketchError::CorruptImage { field, .. } if field == "k"));
    }

    #[test]
    fn test_preamble_to_string_mentions_fields() {
        let bytes = valid_header(Family::Ebpps, 1, FLAG_EMPTY, 100, 0);
        let s = preamble_to_string(&bytes).unwrap();
        assert!(s.contains("EBPPS"));
        assert!(s.contains("EMPTY"));
        assert!(s.contains("k"));
    }
}
