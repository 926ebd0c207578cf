//! SHA-256 in the shapes the beacon chain hashes things.
//!
//! Every preimage in the protocol is a concatenation of a few fixed-width values.
//! The helpers below are named after the bit widths of their parts so call sites read like the
//! preimage they build: `hash_256_64(seed, slot)` hashes a 32-byte root followed by a
//! little-endian `u64`.

use core::num::NonZeroUsize;

use ethereum_types::H256;
use lru::LruCache;
use once_cell::sync::Lazy;
use sha2::{Digest as _, Sha256};

/// Number of precomputed zero subtree roots.
///
/// Depth 40 is the depth of `VALIDATOR_REGISTRY_LIMIT` lists once their length is mixed in.
pub const ZERO_HASHES_COUNT: usize = 41;

/// `ZERO_HASHES[depth]` is the root of a tree of the given depth whose leaves are all zero chunks.
pub static ZERO_HASHES: Lazy<[H256; ZERO_HASHES_COUNT]> = Lazy::new(|| {
    let mut hashes = [H256::zero(); ZERO_HASHES_COUNT];

    for depth in 1..ZERO_HASHES_COUNT {
        hashes[depth] = hash_256_256(hashes[depth - 1], hashes[depth - 1]);
    }

    hashes
});

#[inline]
#[must_use]
pub fn hash(bytes: impl AsRef<[u8]>) -> H256 {
    H256(Sha256::digest(bytes).into())
}

fn hash_parts<const N: usize>(parts: [&[u8]; N]) -> H256 {
    let mut hasher = Sha256::new();

    for part in parts {
        hasher.update(part);
    }

    H256(hasher.finalize().into())
}

#[inline]
#[must_use]
pub fn hash_256(bytes: H256) -> H256 {
    hash(bytes)
}

#[inline]
#[must_use]
pub fn hash_256_8(a: H256, b: u8) -> H256 {
    hash_parts([a.as_bytes(), &[b]])
}

#[inline]
#[must_use]
pub fn hash_256_8_32(a: H256, b: u8, c: u32) -> H256 {
    hash_parts([a.as_bytes(), &[b], &c.to_le_bytes()])
}

#[inline]
#[must_use]
pub fn hash_256_64(a: H256, b: u64) -> H256 {
    hash_parts([a.as_bytes(), &b.to_le_bytes()])
}

#[inline]
#[must_use]
pub fn hash_32_64_256(a: [u8; 4], b: u64, c: H256) -> H256 {
    hash_parts([&a, &b.to_le_bytes(), c.as_bytes()])
}

#[inline]
#[must_use]
pub fn hash_256_256(left: H256, right: H256) -> H256 {
    hash_parts([left.as_bytes(), right.as_bytes()])
}

// Only ever called with `PublicKeyBytes`, which this crate cannot name.
#[inline]
#[must_use]
pub fn hash_384(bytes: impl AsRef<[u8; 48]>) -> H256 {
    hash(bytes.as_ref())
}

// Only ever called with `SignatureBytes`, which this crate cannot name.
#[inline]
#[must_use]
pub fn hash_768(bytes: impl AsRef<[u8; 96]>) -> H256 {
    hash(bytes.as_ref())
}

/// Bounded memo of `hash(bytes)`.
///
/// The cache has no global instance. Whoever wants memoized hashing creates one and passes it
/// to the code that needs it, which keeps its lifetime and memory use explicit.
pub struct HashCache {
    entries: LruCache<Box<[u8]>, H256>,
    hits: u64,
    misses: u64,
}

impl HashCache {
    #[must_use]
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            entries: LruCache::new(capacity),
            hits: 0,
            misses: 0,
        }
    }

    pub fn hash(&mut self, bytes: &[u8]) -> H256 {
        if let Some(digest) = self.entries.get(bytes) {
            self.hits += 1;
            return *digest;
        }

        self.misses += 1;

        let digest = hash(bytes);
        self.entries.put(bytes.into(), digest);
        digest
    }

    pub fn hash_256_256(&mut self, left: H256, right: H256) -> H256 {
        let mut preimage = [0; 64];
        preimage[..32].copy_from_slice(left.as_bytes());
        preimage[32..].copy_from_slice(right.as_bytes());
        self.hash(&preimage)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub const fn hits(&self) -> u64 {
        self.hits
    }

    #[must_use]
    pub const fn misses(&self) -> u64 {
        self.misses
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use hex_literal::hex;
    use itertools::Itertools as _;

    use super::*;

    #[test]
    fn higher_zero_hashes_are_calculated_from_lower_ones() {
        for (lower, higher) in ZERO_HASHES.iter().copied().tuple_windows() {
            assert_eq!(hash_256_256(lower, lower), higher);
        }
    }

    #[test]
    fn zero_hashes_match_known_values() {
        assert_eq!(ZERO_HASHES[0], H256::zero());
        assert_eq!(
            ZERO_HASHES[1],
            H256(hex!(
                "f5a5fd42d16a20302798ef6ed309979b43003d2320d9f0e8ea9831a92759fb4b"
            )),
        );
    }

    #[test]
    fn helpers_hash_concatenated_little_endian_parts() {
        let root = H256::repeat_byte(7);

        let mut preimage = root.as_bytes().to_vec();
        preimage.extend_from_slice(&5_u64.to_le_bytes());
        assert_eq!(hash_256_64(root, 5), hash(&preimage));

        let mut preimage = root.as_bytes().to_vec();
        preimage.push(3);
        preimage.extend_from_slice(&9_u32.to_le_bytes());
        assert_eq!(hash_256_8_32(root, 3, 9), hash(&preimage));
    }

    #[test]
    fn hash_cache_returns_the_same_digest_and_counts_hits() {
        let mut cache = HashCache::new(NonZeroUsize::MIN.saturating_add(1));

        let digest = cache.hash(b"abc");
        assert_eq!(cache.hash(b"abc"), digest);
        assert_eq!(digest, hash(b"abc"));
        assert_eq!((cache.hits(), cache.misses()), (1, 1));

        cache.hash(b"def");
        cache.hash(b"ghi");
        assert_eq!(cache.len(), 2);

        cache.clear();
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn hash_cache_pairs_match_plain_hashing() {
        let mut cache = HashCache::new(NonZeroUsize::MIN);
        let (left, right) = (H256::repeat_byte(1), H256::repeat_byte(2));
        assert_eq!(cache.hash_256_256(left, right), hash_256_256(left, right));
    }
}
