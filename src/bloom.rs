//! Bloom pre-filter over 4-byte gram keys.
//!
//! The scan engine consults this filter once per candidate position before
//! touching the bucket index, so a negative answer must stay cheap: the bit
//! array is a power of two in size and the three probe positions come from
//! one finalizer hash plus one multiplicative step hash.
//!
//! # Format
//!
//! ```text
//! [Section]
//!   magic: [u8; 8]        // "0MG8L0oM"
//!   bit_size: u32         // power of two, whole 64-bit words
//!   reserved: u32         // 0
//!   bits: [u8]            // bit_size / 8 bytes, little-endian u64 words
//! ```

use crate::error::{MatchError, Result};
use crate::hashing::mix32;

/// Magic bytes opening the bloom section.
pub const BLOOM_MAGIC: &[u8; 8] = b"0MG8L0oM";

/// Step-hash multiplier for the second and third probes.
const STEP_MUL: u32 = 0x9e37_79b1;

/// Bits budgeted per key before rounding to a power of two of whole words.
const BITS_PER_KEY: usize = 16;

/// Choose the bit count for `n_keys` entries: ≈16 bits per key, whole
/// 64-bit words, rounded up to a power of two (minimum one word).
pub fn bit_count_for(n_keys: usize) -> u32 {
    let words = (n_keys * BITS_PER_KEY).div_ceil(64).max(1);
    let bits = (words * 64) as u32;
    bits.next_power_of_two()
}

/// Build-time bloom filter.
pub struct BloomBuilder {
    words: Vec<u64>,
    mask: u32,
}

impl BloomBuilder {
    /// Create a filter sized for `n_keys` gram keys.
    pub fn new(n_keys: usize) -> Self {
        let bits = bit_count_for(n_keys);
        BloomBuilder {
            words: vec![0u64; (bits / 64) as usize],
            mask: bits - 1,
        }
    }

    /// Total bit count (power of two).
    pub fn bit_size(&self) -> u32 {
        (self.words.len() * 64) as u32
    }

    /// Insert a gram key.
    pub fn insert(&mut self, gram: u32) {
        let h1 = mix32(gram);
        let h2 = gram.wrapping_mul(STEP_MUL);
        for i in 0..3u32 {
            let bit = (h1.wrapping_add(i.wrapping_mul(h2))) & self.mask;
            self.words[(bit / 64) as usize] |= 1u64 << (bit % 64);
        }
    }

    /// Serialize the full section (magic, sizes, bit words).
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(16 + self.words.len() * 8);
        out.extend_from_slice(BLOOM_MAGIC);
        out.extend_from_slice(&self.bit_size().to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        for word in &self.words {
            out.extend_from_slice(&word.to_le_bytes());
        }
        out
    }
}

/// Read-only view over a serialized bloom section.
#[derive(Clone, Copy)]
pub struct BloomView<'a> {
    bits: &'a [u8],
    mask: u32,
}

impl<'a> BloomView<'a> {
    /// Lay a view over the section at the start of `buf`.
    ///
    /// Returns the view and the total section length consumed.
    pub fn parse(buf: &'a [u8]) -> Result<(Self, usize)> {
        if buf.len() < 16 {
            return Err(MatchError::InvalidFormat(
                "bloom section truncated".to_string(),
            ));
        }
        if &buf[0..8] != BLOOM_MAGIC {
            return Err(MatchError::InvalidFormat(format!(
                "bloom magic mismatch: {:02x?}",
                &buf[0..8]
            )));
        }
        let bit_size = u32::from_le_bytes(buf[8..12].try_into().unwrap());
        if bit_size == 0 || !bit_size.is_power_of_two() || bit_size % 64 != 0 {
            return Err(MatchError::InvalidFormat(format!(
                "bloom bit size {} is not a power-of-two word multiple",
                bit_size
            )));
        }
        let data_len = (bit_size / 8) as usize;
        let total = 16 + data_len;
        if buf.len() < total {
            return Err(MatchError::InvalidFormat(format!(
                "bloom section needs {} bytes, {} available",
                total,
                buf.len()
            )));
        }
        Ok((
            BloomView {
                bits: &buf[16..total],
                mask: bit_size - 1,
            },
            total,
        ))
    }

    /// Test a gram key; false means definitely absent.
    #[inline(always)]
    pub fn query(&self, gram: u32) -> bool {
        let h1 = mix32(gram);
        let h2 = gram.wrapping_mul(STEP_MUL);
        self.bit(h1 & self.mask)
            && self.bit(h1.wrapping_add(h2) & self.mask)
            && self.bit(h1.wrapping_add(h2.wrapping_mul(2)) & self.mask)
    }

    #[inline(always)]
    fn bit(&self, idx: u32) -> bool {
        let byte = self.bits[(idx / 8) as usize];
        byte & (1u8 << (idx % 8)) != 0
    }

    /// Bit count of the mapped filter.
    pub fn bit_size(&self) -> u32 {
        self.mask + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hashing::gram_at;

    #[test]
    fn test_bit_count_rounding() {
        assert_eq!(bit_count_for(0), 64);
        assert_eq!(bit_count_for(1), 64);
        assert_eq!(bit_count_for(4), 64);
        assert_eq!(bit_count_for(5), 128);
        assert_eq!(bit_count_for(12), 256);
        assert_eq!(bit_count_for(1000), 16384);
    }

    #[test]
    fn test_no_false_negatives() {
        let keys: Vec<u32> = (0..500u32).map(|i| i.wrapping_mul(0x1234_5679)).collect();
        let mut builder = BloomBuilder::new(keys.len());
        for &k in &keys {
            builder.insert(k);
        }
        let bytes = builder.serialize();
        let (view, consumed) = BloomView::parse(&bytes).unwrap();
        assert_eq!(consumed, bytes.len());
        for &k in &keys {
            assert!(view.query(k), "inserted key 0x{:08x} must query true", k);
        }
    }

    #[test]
    fn test_mostly_rejects_foreign_keys() {
        let mut builder = BloomBuilder::new(100);
        for i in 0..100u32 {
            builder.insert(gram_at(format!("pat{i:04}").as_bytes(), 0));
        }
        let bytes = builder.serialize();
        let (view, _) = BloomView::parse(&bytes).unwrap();

        let mut hits = 0;
        for i in 0..10_000u32 {
            if view.query(i.wrapping_mul(0x9e37_79b9) ^ 0xdead_beef) {
                hits += 1;
            }
        }
        // 16 bits/key targets a low single-digit-permille false positive
        // rate; 5% leaves generous slack.
        assert!(hits < 500, "false positive rate too high: {hits}/10000");
    }

    #[test]
    fn test_parse_rejects_bad_magic() {
        let mut bytes = BloomBuilder::new(1).serialize();
        bytes[0] = b'X';
        assert!(matches!(
            BloomView::parse(&bytes),
            Err(MatchError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_parse_rejects_truncation() {
        let bytes = BloomBuilder::new(64).serialize();
        assert!(BloomView::parse(&bytes[..bytes.len() - 1]).is_err());
        assert!(BloomView::parse(&bytes[..8]).is_err());
    }

    #[test]
    fn test_parse_rejects_non_pow2_bits() {
        let mut bytes = BloomBuilder::new(1).serialize();
        bytes[8..12].copy_from_slice(&96u32.to_le_bytes());
        assert!(BloomView::parse(&bytes).is_err());
    }
}
