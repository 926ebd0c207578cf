// Trees are described by their depth rather than by a type-level length.
// The depth is derived from the limit of the collection being hashed, so two lists with the same
// contents but different limits have different roots.
//
// ```text
// depth 2                0
//                  ┌─────┴─────┐
// depth 1          0           1
//               ┌──┴──┐     ┌──┴──┐
// depth 0       0     1     2     3      <- chunks, padded with zero chunks
// ```

use arithmetic::UsizeExt as _;
use ethereum_types::H256;
use hashing::ZERO_HASHES;
use typenum::Unsigned as _;

use crate::{porcelain::SszHash, BYTES_PER_CHUNK};

/// Number of chunks needed for `length` values of type `T`.
#[must_use]
pub fn chunk_count<T: SszHash>(length: usize) -> usize {
    length.div_ceil(T::PackingFactor::USIZE)
}

/// Root of a tree of the given depth whose leaves are `chunks` followed by zero chunks.
///
/// # Panics
///
/// Panics if there are more chunks than leaves.
pub fn merkleize_chunks(chunks: impl IntoIterator<Item = H256>, depth: usize) -> H256 {
    let mut level = chunks.into_iter().collect::<Vec<_>>();

    assert!(
        level.len() <= 1 << depth,
        "{} chunks do not fit in a tree of depth {depth}",
        level.len(),
    );

    if level.is_empty() {
        return ZERO_HASHES[depth];
    }

    for height in 0..depth {
        level = level
            .chunks(2)
            .map(|pair| match *pair {
                [left, right] => hashing::hash_256_256(left, right),
                [left] => hashing::hash_256_256(left, ZERO_HASHES[height]),
                _ => unreachable!("slice::chunks yields 1 or 2 elements"),
            })
            .collect();
    }

    level[0]
}

/// Packs basic values into chunks and merkleizes them.
///
/// `limit` is the maximum number of values, used to determine the depth of the tree.
pub fn merkleize_packed<T: SszHash>(values: &[T], limit: usize) -> H256 {
    let size = BYTES_PER_CHUNK / T::PackingFactor::USIZE;

    let chunks = values.chunks(T::PackingFactor::USIZE).map(|pack| {
        let mut chunk = H256::zero();

        for (destination, value) in chunk.as_bytes_mut().chunks_exact_mut(size).zip(pack) {
            destination.copy_from_slice(&value.hash_tree_root()[..size]);
        }

        chunk
    });

    merkleize_chunks(chunks, chunk_count::<T>(limit).ilog2_ceil().into())
}

/// Splits `bytes` into chunks and merkleizes them in a tree able to hold `limit_in_chunks` chunks.
pub fn merkleize_bytes(bytes: impl AsRef<[u8]>, limit_in_chunks: usize) -> H256 {
    let chunks = bytes.as_ref().chunks(BYTES_PER_CHUNK).map(|partial_chunk| {
        let mut chunk = H256::zero();
        chunk[..partial_chunk.len()].copy_from_slice(partial_chunk);
        chunk
    });

    merkleize_chunks(chunks, limit_in_chunks.ilog2_ceil().into())
}

#[must_use]
pub fn mix_in_length(root: H256, length: usize) -> H256 {
    let mut length_chunk = H256::zero();
    length_chunk[..size_of::<u64>()].copy_from_slice(&(length as u64).to_le_bytes());
    hashing::hash_256_256(root, length_chunk)
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test_case(0)]
    #[test_case(1)]
    #[test_case(5)]
    fn empty_tree_root_is_zero_hash(depth: usize) {
        assert_eq!(merkleize_chunks([], depth), ZERO_HASHES[depth]);
    }

    #[test]
    fn single_chunk_at_depth_zero_is_the_chunk_itself() {
        let chunk = H256::repeat_byte(0xaa);
        assert_eq!(merkleize_chunks([chunk], 0), chunk);
    }

    #[test]
    fn odd_chunk_is_paired_with_zero_subtree() {
        let a = H256::repeat_byte(1);
        let b = H256::repeat_byte(2);
        let c = H256::repeat_byte(3);

        let expected = hashing::hash_256_256(
            hashing::hash_256_256(a, b),
            hashing::hash_256_256(c, H256::zero()),
        );

        assert_eq!(merkleize_chunks([a, b, c], 2), expected);

        let deeper = hashing::hash_256_256(expected, ZERO_HASHES[2]);
        assert_eq!(merkleize_chunks([a, b, c], 3), deeper);
    }

    #[test]
    fn packed_values_share_chunks() {
        let values = [1_u64, 2, 3, 4, 5];

        let mut first = H256::zero();
        first[..8].copy_from_slice(&1_u64.to_le_bytes());
        first[8..16].copy_from_slice(&2_u64.to_le_bytes());
        first[16..24].copy_from_slice(&3_u64.to_le_bytes());
        first[24..].copy_from_slice(&4_u64.to_le_bytes());

        let mut second = H256::zero();
        second[..8].copy_from_slice(&5_u64.to_le_bytes());

        assert_eq!(
            merkleize_packed(&values, 8),
            hashing::hash_256_256(first, second),
        );
    }

    #[test]
    fn length_is_mixed_in_as_little_endian_u64() {
        let root = H256::repeat_byte(9);

        let mut length_chunk = H256::zero();
        length_chunk.0[0] = 3;

        assert_eq!(mix_in_length(root, 3), hashing::hash_256_256(root, length_chunk));
    }
}
