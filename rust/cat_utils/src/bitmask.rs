// Copyright (c) Meta Platforms, Inc. and affiliates.

// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! # CLOS Bitmask Codec
//!
//! Conversion between the hexadecimal capacity bitmasks stored in scenario
//! documents (`CLOS_MASK`) and the contiguous way ranges the engine works
//! with.
//!
//! A capacity bitmask of width `w` is read most significant bit first, so
//! position `0` of a [`ClosRange`] is the highest way of the cache:
//!
//!```
//!     use cat_utils::ClosRange;
//!     let range = ClosRange::decode("0xf0", 8).unwrap();
//!     assert_eq!(range, ClosRange::new(0, 4));
//!     assert_eq!(range.encode(8), "0xf0");
//!```
//!
//! Hardware only accepts contiguous runs of set bits. Decoding does not
//! reject other patterns; it keeps the number of set bits and the position
//! of the first one, which turns any mask into the tightest contiguous range
//! of equal weight. [`normalize_to_contiguous`] is that lossy round trip:
//!
//!```
//!     use cat_utils::normalize_to_contiguous;
//!     // 1010_1010 becomes 1111_0000
//!     assert_eq!(normalize_to_contiguous("0xAA", 8).unwrap(), "0xf0");
//!     // masks wider than the region are right justified
//!     assert_eq!(normalize_to_contiguous("0x3f0", 8).unwrap(), "0x3f");
//!```
//!
//! Widths are not limited to 64 bits; masks are held in bit vectors.

use anyhow::bail;
use anyhow::Context;
use anyhow::Result;
use bitvec::prelude::*;
use log::debug;
use std::fmt;

type MaskBits = BitVec<u8, Msb0>;

/// A half-open range `[start, end)` of cache ways, counted from the most
/// significant bit of a capacity bitmask.
#[derive(Debug, Clone, Copy, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ClosRange {
    pub start: usize,
    pub end: usize,
}

impl ClosRange {
    pub fn new(start: usize, end: usize) -> ClosRange {
        ClosRange { start, end }
    }

    /// The range covering every way of a `width` bit mask.
    pub fn full(width: usize) -> ClosRange {
        ClosRange {
            start: 0,
            end: width,
        }
    }

    /// Number of ways in the range.
    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Decode a hexadecimal CLOS mask into a way range of a `width` bit
    /// region.
    ///
    /// The mask is first fitted to `width` bits: a mask with more
    /// significant bits than `width` keeps its weight and is right
    /// justified (saturating to all ones), a narrower one is zero extended.
    /// The range then starts at the first set bit and spans as many ways as
    /// there are set bits.
    pub fn decode(clos_mask: &str, width: usize) -> Result<ClosRange> {
        let bits = parse_mask(clos_mask)?;
        let pattern = fit_to_width(&bits, width);

        let ones = pattern.count_ones();
        let start = pattern.first_one().unwrap_or(0);
        if !is_run(&pattern) {
            debug!(
                "CLOS mask {} is not contiguous at width {}, using {} ways from {}",
                clos_mask, width, ones, start
            );
        }

        Ok(ClosRange {
            start,
            end: start + ones,
        })
    }

    /// Render the range as a `width` bit hexadecimal CLOS mask.
    ///
    /// The result is zero padded to the digit count of an all ones mask of
    /// the same width. Ways past `width` are dropped.
    pub fn encode(&self, width: usize) -> String {
        let end = self.end.min(width);
        let start = self.start.min(end);

        let mut bits = bitvec![u8, Msb0; 0; width];
        bits[start..end].fill(true);
        format_mask(&bits)
    }
}

impl fmt::Display for ClosRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// Decode then re-encode `clos_mask` at `width`. Applying it twice gives
/// the same result as applying it once.
pub fn normalize_to_contiguous(clos_mask: &str, width: usize) -> Result<String> {
    Ok(ClosRange::decode(clos_mask, width)?.encode(width))
}

/// A `width` bit mask with every way enabled.
pub fn full_mask(width: usize) -> String {
    ClosRange::full(width).encode(width)
}

/// Whether the set bits of `clos_mask` form a single run. An empty mask
/// counts as contiguous.
pub fn is_contiguous(clos_mask: &str) -> Result<bool> {
    Ok(is_run(&parse_mask(clos_mask)?))
}

/// Number of significant bits in `clos_mask`, i.e. the narrowest region
/// width that holds it without truncation. Zero has one significant bit.
pub fn mask_bit_length(clos_mask: &str) -> Result<usize> {
    Ok(parse_mask(clos_mask)?.len())
}

/// Number of ways enabled by the bitwise OR of all `masks`.
pub fn union_weight<'a, I>(masks: I) -> Result<usize>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut union: BitVec<u8, Lsb0> = BitVec::new();
    for mask in masks {
        let bits = parse_mask(mask)?;
        if bits.len() > union.len() {
            union.resize(bits.len(), false);
        }
        // Align on the least significant bit.
        for (lsb, bit) in bits.iter().rev().enumerate() {
            if *bit {
                union.set(lsb, true);
            }
        }
    }

    Ok(union.count_ones())
}

/**************************************
 * Helper functions for mask handling *
 **************************************/

/// Parse a hexadecimal mask into its significant bits, most significant
/// first.
fn parse_mask(clos_mask: &str) -> Result<MaskBits> {
    let trimmed = clos_mask.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed)
        .replace('_', "");
    if digits.is_empty() {
        bail!("Empty CLOS mask {:?}", clos_mask);
    }

    let hex_str = if digits.len() % 2 != 0 {
        "0".to_string() + &digits
    } else {
        digits
    };
    let bytes =
        hex::decode(&hex_str).with_context(|| format!("Failed to parse CLOS mask: {clos_mask}"))?;

    let bits = MaskBits::from_vec(bytes);
    let first = bits.leading_zeros().min(bits.len() - 1);
    Ok(bits[first..].to_bitvec())
}

fn fit_to_width(bits: &BitSlice<u8, Msb0>, width: usize) -> MaskBits {
    let len = bits.len();
    let ones = bits.count_ones();

    if len > width {
        if ones >= width {
            return bitvec![u8, Msb0; 1; width];
        }
        let mut pattern = bitvec![u8, Msb0; 0; width];
        pattern[width - ones..].fill(true);
        return pattern;
    }

    let mut pattern = bitvec![u8, Msb0; 0; width - len];
    pattern.extend_from_bitslice(bits);
    pattern
}

fn is_run(bits: &BitSlice<u8, Msb0>) -> bool {
    match (bits.first_one(), bits.last_one()) {
        (Some(first), Some(last)) => bits.count_ones() == last - first + 1,
        _ => true,
    }
}

fn format_mask(bits: &BitSlice<u8, Msb0>) -> String {
    let digits = bits.len().div_ceil(4).max(1);

    let mut aligned = bitvec![u8, Msb0; 0; (8 - bits.len() % 8) % 8];
    aligned.extend_from_bitslice(bits);
    let hex_str = hex::encode(aligned.as_raw_slice());

    let tail = &hex_str[hex_str.len().saturating_sub(digits)..];
    format!("0x{:0>width$}", tail, width = digits)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_reference_mask() {
        assert_eq!(ClosRange::decode("0xAA", 8).unwrap(), ClosRange::new(0, 4));
        assert_eq!(ClosRange::new(0, 4).encode(8), "0xf0");
    }

    #[test]
    fn test_decode_narrow_mask_is_zero_extended() {
        // 0000_1100
        assert_eq!(ClosRange::decode("0xc", 8).unwrap(), ClosRange::new(4, 6));
        assert_eq!(ClosRange::decode("0x0f", 8).unwrap(), ClosRange::new(4, 8));
        assert_eq!(ClosRange::decode("0x1", 4).unwrap(), ClosRange::new(3, 4));
    }

    #[test]
    fn test_decode_wide_mask_is_right_justified() {
        // CDP halved an 8 way region to 4 ways.
        assert_eq!(ClosRange::decode("0xc0", 4).unwrap(), ClosRange::new(2, 4));
        assert_eq!(ClosRange::decode("0xff", 4).unwrap(), ClosRange::full(4));
        assert_eq!(ClosRange::decode("0xfff", 4).unwrap(), ClosRange::full(4));
    }

    #[test]
    fn test_decode_zero_mask() {
        let range = ClosRange::decode("0x0", 8).unwrap();
        assert!(range.is_empty());
        assert_eq!(range.encode(8), "0x00");
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(ClosRange::decode("0xzz", 8).is_err());
        assert!(ClosRange::decode("0x", 8).is_err());
        assert!(ClosRange::decode("", 8).is_err());
    }

    #[test]
    fn test_decode_accepts_separators_and_case() {
        assert_eq!(
            ClosRange::decode("0XFF_00", 16).unwrap(),
            ClosRange::new(0, 8)
        );
    }

    #[test]
    fn test_encode_pads_to_full_width_digits() {
        assert_eq!(ClosRange::new(7, 8).encode(8), "0x01");
        assert_eq!(ClosRange::new(10, 11).encode(11), "0x001");
        assert_eq!(ClosRange::full(11).encode(11), "0x7ff");
        assert_eq!(ClosRange::full(4).encode(4), "0xf");
        assert_eq!(ClosRange::full(0).encode(0), "0x0");
    }

    #[test]
    fn test_encode_clamps_to_width() {
        assert_eq!(ClosRange::new(2, 12).encode(8), "0x3f");
    }

    #[test]
    fn test_encode_wide_region() {
        let range = ClosRange::new(0, 1);
        assert_eq!(range.encode(72), "0x800000000000000000");
        assert_eq!(ClosRange::decode(&range.encode(72), 72).unwrap(), range);
    }

    #[test]
    fn test_normalize_is_idempotent() {
        for width in 0..=20 {
            for value in 0u32..(1 << 12) {
                let mask = format!("{value:#x}");
                let once = normalize_to_contiguous(&mask, width).unwrap();
                let twice = normalize_to_contiguous(&once, width).unwrap();
                assert_eq!(once, twice, "mask {mask} width {width}");
            }
        }
    }

    #[test]
    fn test_full_mask() {
        assert_eq!(full_mask(4), "0xf");
        assert_eq!(full_mask(8), "0xff");
        assert_eq!(full_mask(12), "0xfff");
        assert_eq!(full_mask(8), normalize_to_contiguous(&full_mask(8), 8).unwrap());
    }

    #[test]
    fn test_is_contiguous() {
        assert!(is_contiguous("0xf0").unwrap());
        assert!(is_contiguous("0x0").unwrap());
        assert!(is_contiguous("0x1").unwrap());
        assert!(!is_contiguous("0xaa").unwrap());
        assert!(!is_contiguous("0x101").unwrap());
    }

    #[test]
    fn test_mask_bit_length() {
        assert_eq!(mask_bit_length("0x0").unwrap(), 1);
        assert_eq!(mask_bit_length("0x0f").unwrap(), 4);
        assert_eq!(mask_bit_length("0x7ff").unwrap(), 11);
    }

    #[test]
    fn test_union_weight() {
        assert_eq!(union_weight(["0xf0", "0x0f"]).unwrap(), 8);
        assert_eq!(union_weight(["0xf0", "0x30"]).unwrap(), 4);
        assert_eq!(union_weight(["0x1", "0x100"]).unwrap(), 2);
        assert_eq!(union_weight(std::iter::empty()).unwrap(), 0);
    }
}
