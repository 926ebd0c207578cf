use core::{
    fmt::{Debug, Formatter, Result as FmtResult},
    marker::PhantomData,
};

use bitvec::{boxed::BitBox, order::Lsb0, vec::BitVec};
use derivative::Derivative;
use derive_more::{Deref, DerefMut};
use ethereum_types::H256;
use typenum::{U1, Unsigned};

use crate::{error::ReadError, merkle_tree, porcelain::SszHash, BITS_PER_CHUNK};

/// Variable-length sequence of at most `N` bits.
///
/// The length is fixed at construction. Aggregation bits of an attestation always have the
/// length of the committee they refer to.
#[derive(Deref, DerefMut, Derivative)]
#[derivative(Clone(bound = ""), PartialEq(bound = ""), Eq(bound = ""), Default(bound = ""))]
pub struct BitList<N> {
    #[deref]
    #[deref_mut]
    bits: BitBox<u8, Lsb0>,
    #[derivative(PartialEq = "ignore")]
    phantom: PhantomData<N>,
}

impl<N> Debug for BitList<N> {
    fn fmt(&self, formatter: &mut Formatter) -> FmtResult {
        formatter.write_str("0b")?;

        for bit in self.bits.iter().by_vals() {
            formatter.write_str(if bit { "1" } else { "0" })?;
        }

        Ok(())
    }
}

impl<N: Unsigned> SszHash for BitList<N> {
    type PackingFactor = U1;

    fn hash_tree_root(&self) -> H256 {
        let root = merkle_tree::merkleize_bytes(
            self.bits.as_raw_slice(),
            N::USIZE.div_ceil(BITS_PER_CHUNK),
        );

        merkle_tree::mix_in_length(root, self.bits.len())
    }
}

impl<N: Unsigned> BitList<N> {
    pub fn with_length(length: usize) -> Result<Self, ReadError> {
        Self::new(false, length)
    }

    pub fn new(value: bool, length: usize) -> Result<Self, ReadError> {
        let maximum = N::USIZE;

        if length > maximum {
            return Err(ReadError::ListTooLong {
                maximum,
                actual: length,
            });
        }

        Ok(Self {
            bits: BitVec::repeat(value, length).into_boxed_bitslice(),
            phantom: PhantomData,
        })
    }

    /// Bits set in either list. Fails if the lengths differ.
    #[must_use]
    pub fn union(&self, other: &Self) -> Option<Self> {
        (self.len() == other.len()).then(|| {
            let mut union = self.clone();
            union.bits |= other.bits.as_bitslice();
            union
        })
    }

    #[must_use]
    pub fn any_in_common(&self, other: &Self) -> bool {
        self.bits
            .iter_ones()
            .any(|index| other.bits.get(index).is_some_and(|bit| *bit))
    }
}
