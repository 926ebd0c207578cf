//! Swap-or-not shuffling.
//!
//! Every round splits indices into pairs that mirror each other around a pivot derived from the
//! seed. Each pair is swapped depending on one bit of a hash of the seed, the round and the
//! position of the larger index in the pair.

use core::num::NonZeroU64;

use anyhow::{ensure, Result};
use bit_field::BitArray as _;
use hashing::HashCache;
use itertools::Itertools as _;
use tap::TryConv as _;
use thiserror::Error;
use types::{phase0::primitives::H256, preset::Preset};

const BITS_PER_HASH: u64 = H256::len_bytes() as u64 * 8;

#[derive(Debug, Error)]
pub enum Error {
    #[error("index {index} is out of bounds for {index_count} indices")]
    IndexOutOfBounds { index: u64, index_count: NonZeroU64 },
}

/// Returns the position `index` is moved to when shuffling `index_count` indices.
pub fn compute_shuffled_index<P: Preset>(
    index: u64,
    index_count: NonZeroU64,
    seed: H256,
) -> Result<u64> {
    shuffled_index_with::<P>(index, index_count, seed, |bytes| hashing::hash(bytes))
}

/// Like [`compute_shuffled_index`], but memoizes the hashes in `cache`.
///
/// Worthwhile when shuffling many indices with the same seed one at a time. The pivot of every
/// round is shared by all of them.
pub fn compute_shuffled_index_cached<P: Preset>(
    index: u64,
    index_count: NonZeroU64,
    seed: H256,
    cache: &mut HashCache,
) -> Result<u64> {
    shuffled_index_with::<P>(index, index_count, seed, |bytes| cache.hash(bytes))
}

fn shuffled_index_with<P: Preset>(
    mut index: u64,
    index_count: NonZeroU64,
    seed: H256,
    mut hash: impl FnMut(&[u8]) -> H256,
) -> Result<u64> {
    ensure!(
        index < index_count.get(),
        Error::IndexOutOfBounds { index, index_count },
    );

    for round in 0..P::SHUFFLE_ROUND_COUNT {
        let pivot = pivot_from_hash(hash(&pivot_preimage(seed, round)), index_count);
        let flip = (pivot + index_count.get() - index) % index_count;
        let position = index.max(flip);
        let source = hash(&source_preimage(seed, round, position / BITS_PER_HASH));

        if source_bit(source, position) {
            index = flip;
        }
    }

    Ok(index)
}

/// Shuffles `slice` in place so that `slice[i]` ends up holding the element previously at
/// `compute_shuffled_index(i, slice.len(), seed)`.
///
/// This is equivalent to calling [`compute_shuffled_index`] for every position but computes each
/// source hash once per round instead of once per position.
pub fn shuffle_slice<P: Preset, T>(slice: &mut [T], seed: H256) -> Result<()> {
    let Some(index_count) = slice.len().try_conv::<u64>().map(NonZeroU64::new)? else {
        return Ok(());
    };

    let window_count = index_count.get().div_ceil(BITS_PER_HASH);

    // Applying swaps to positions composes permutations in the opposite order.
    for round in (0..P::SHUFFLE_ROUND_COUNT).rev() {
        let pivot = compute_pivot(seed, round, index_count);

        let sources = (0..window_count)
            .map(|window| compute_source(seed, round, window))
            .collect_vec();

        for index in 0..index_count.get() {
            let flip = (pivot + index_count.get() - index) % index_count;

            // Visit each pair once, from its lower member.
            if index >= flip {
                continue;
            }

            let position = flip;
            let window = (position / BITS_PER_HASH).try_conv::<usize>()?;

            if source_bit(sources[window], position) {
                slice.swap(index.try_into()?, flip.try_into()?);
            }
        }
    }

    Ok(())
}

fn compute_pivot(seed: H256, round: u8, index_count: NonZeroU64) -> u64 {
    pivot_from_hash(hashing::hash_256_8(seed, round), index_count)
}

fn compute_source(seed: H256, round: u8, position_window: u64) -> H256 {
    hashing::hash(source_preimage(seed, round, position_window))
}

fn pivot_from_hash(hash: H256, index_count: NonZeroU64) -> u64 {
    let mut bytes = [0; size_of::<u64>()];
    bytes.copy_from_slice(&hash[..size_of::<u64>()]);
    u64::from_le_bytes(bytes) % index_count
}

fn pivot_preimage(seed: H256, round: u8) -> [u8; 33] {
    let mut preimage = [0; 33];
    preimage[..32].copy_from_slice(seed.as_bytes());
    preimage[32] = round;
    preimage
}

fn source_preimage(seed: H256, round: u8, position_window: u64) -> [u8; 37] {
    // Truncate to match `uint_to_bytes(uint32(position // 256))`.
    #[expect(clippy::cast_possible_truncation)]
    let position_window = position_window as u32;

    let mut preimage = [0; 37];
    preimage[..33].copy_from_slice(&pivot_preimage(seed, round));
    preimage[33..].copy_from_slice(&position_window.to_le_bytes());
    preimage
}

fn source_bit(source: H256, position: u64) -> bool {
    source.as_bytes().get_bit((position % BITS_PER_HASH) as usize)
}

#[cfg(test)]
mod tests {
    use itertools::Itertools as _;
    use nonzero_ext::nonzero;
    use test_case::test_case;
    use types::preset::{Mainnet, Minimal};

    use super::*;

    #[test_case(1)]
    #[test_case(2)]
    #[test_case(7)]
    #[test_case(256)]
    #[test_case(257)]
    #[test_case(1000)]
    fn shuffled_indices_form_a_permutation(count: u64) -> Result<()> {
        let index_count = NonZeroU64::new(count).ok_or_else(|| anyhow::anyhow!("zero count"))?;
        let seed = H256::repeat_byte(0x42);

        let shuffled = (0..count)
            .map(|index| compute_shuffled_index::<Minimal>(index, index_count, seed))
            .collect::<Result<Vec<_>>>()?;

        assert_eq!(shuffled.iter().copied().sorted().collect_vec(), (0..count).collect_vec());

        Ok(())
    }

    #[test_case(1)]
    #[test_case(5)]
    #[test_case(255)]
    #[test_case(256)]
    #[test_case(513)]
    fn shuffling_a_slice_matches_shuffling_single_indices(count: u64) -> Result<()> {
        let index_count = NonZeroU64::new(count).ok_or_else(|| anyhow::anyhow!("zero count"))?;
        let seed = hashing::hash_256_64(H256::zero(), count);

        let mut slice = (0..count).collect_vec();

        shuffle_slice::<Mainnet, _>(&mut slice, seed)?;

        for (position, element) in slice.into_iter().enumerate() {
            let position = position.try_into()?;
            let expected = compute_shuffled_index::<Mainnet>(position, index_count, seed)?;
            assert_eq!(element, expected);
        }

        Ok(())
    }

    #[test_case(Mainnet, [276, 228, 226, 264, 41, 71, 215, 180, 86])]
    #[test_case(Minimal, [1, 87, 30, 104, 58, 128, 150, 78, 134])]
    fn shuffled_indices_match_known_values<P: Preset>(
        _preset: P,
        expected: [u64; 9],
    ) -> Result<()> {
        let seed = H256::repeat_byte(0x42);

        let actual = (0..300)
            .step_by(37)
            .map(|index| compute_shuffled_index::<P>(index, nonzero!(300_u64), seed))
            .collect::<Result<Vec<_>>>()?;

        assert_eq!(actual, expected);

        Ok(())
    }

    #[test]
    fn shuffling_is_deterministic() -> Result<()> {
        let seed = H256::repeat_byte(7);

        let first = compute_shuffled_index::<Mainnet>(3, nonzero!(100_u64), seed)?;
        let second = compute_shuffled_index::<Mainnet>(3, nonzero!(100_u64), seed)?;

        assert_eq!(first, second);

        Ok(())
    }

    #[test]
    fn cached_shuffling_matches_uncached_and_reuses_pivots() -> Result<()> {
        let seed = H256::repeat_byte(9);
        let index_count = nonzero!(64_u64);
        let mut cache = HashCache::new(core::num::NonZeroUsize::MIN.saturating_add(1023));

        for index in 0..index_count.get() {
            assert_eq!(
                compute_shuffled_index_cached::<Minimal>(index, index_count, seed, &mut cache)?,
                compute_shuffled_index::<Minimal>(index, index_count, seed)?,
            );
        }

        assert!(cache.hits() > 0);

        Ok(())
    }

    #[test]
    fn out_of_bounds_index_is_rejected() {
        let result = compute_shuffled_index::<Minimal>(4, nonzero!(4_u64), H256::zero());

        assert!(result.is_err_and(|error| error.downcast_ref::<Error>().is_some()));
    }

    #[test]
    fn empty_slice_is_left_alone() -> Result<()> {
        let mut empty: [u64; 0] = [];
        shuffle_slice::<Minimal, _>(&mut empty, H256::zero())
    }
}
