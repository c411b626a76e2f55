//! FNV-1a hash utilities for region routing.
//!
//! Provides the 32-bit FNV-1a hash used to spread location keys across
//! region workers. The hash is stable across processes and platforms, so a
//! given chunk always lands in the same region for a fixed region count.

/// FNV-1a offset basis (32-bit).
const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;

/// FNV-1a prime (32-bit).
const FNV_PRIME: u32 = 0x0100_0193;

/// Computes a 32-bit FNV-1a hash over the UTF-8 bytes of a string.
///
/// # Examples
///
/// ```
/// use taskweave_core::hash::fnv1a_hash;
///
/// assert_eq!(fnv1a_hash("hello"), 1_335_831_723);
/// assert_eq!(fnv1a_hash(""), 2_166_136_261); // FNV offset basis
/// ```
#[must_use]
pub fn fnv1a_hash(s: &str) -> u32 {
    let mut hash = FNV_OFFSET_BASIS;
    for byte in s.bytes() {
        hash ^= u32::from(byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fnv1a_hash_hello() {
        assert_eq!(fnv1a_hash("hello"), 1_335_831_723);
    }

    #[test]
    fn fnv1a_hash_empty_is_offset_basis() {
        assert_eq!(fnv1a_hash(""), FNV_OFFSET_BASIS);
    }

    #[test]
    fn fnv1a_hash_single_char() {
        assert_eq!(fnv1a_hash("a"), 3_826_002_220);
    }

    #[test]
    fn fnv1a_hash_chunk_key() {
        assert_eq!(fnv1a_hash("world:0:0"), 3_965_916_515);
        assert_ne!(fnv1a_hash("world:0:0"), fnv1a_hash("world:1:0"));
    }
}
