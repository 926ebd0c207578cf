use core::{
    fmt::{Debug, Formatter, Result as FmtResult},
    marker::PhantomData,
};

use bitvec::{boxed::BitBox, order::Lsb0, vec::BitVec};
use derivative::Derivative;
use derive_more::{Deref, DerefMut};
use ethereum_types::H256;
use typenum::{U1, Unsigned};

use crate::{merkle_tree, porcelain::SszHash, BITS_PER_CHUNK};

/// Fixed-length sequence of `N` bits.
#[derive(Deref, DerefMut, Derivative)]
#[derivative(Clone(bound = ""), PartialEq(bound = ""), Eq(bound = ""))]
pub struct BitVector<N> {
    #[deref]
    #[deref_mut]
    bits: BitBox<u8, Lsb0>,
    #[derivative(PartialEq = "ignore")]
    phantom: PhantomData<N>,
}

impl<N: Unsigned> Default for BitVector<N> {
    fn default() -> Self {
        Self {
            bits: BitVec::repeat(false, N::USIZE).into_boxed_bitslice(),
            phantom: PhantomData,
        }
    }
}

impl<N> Debug for BitVector<N> {
    fn fmt(&self, formatter: &mut Formatter) -> FmtResult {
        formatter.write_str("0b")?;

        for bit in self.bits.iter().by_vals() {
            formatter.write_str(if bit { "1" } else { "0" })?;
        }

        Ok(())
    }
}

impl<N: Unsigned> SszHash for BitVector<N> {
    type PackingFactor = U1;

    fn hash_tree_root(&self) -> H256 {
        merkle_tree::merkleize_bytes(self.bits.as_raw_slice(), N::USIZE.div_ceil(BITS_PER_CHUNK))
    }
}

impl<N> BitVector<N> {
    /// Moves every bit to the next higher index. The bit at index 0 becomes 0 and the highest bit
    /// is discarded.
    pub fn shift_up_by_1(&mut self) {
        self.bits.shift_right(1);
    }

    /// Whether every bit in `range` is set.
    #[must_use]
    pub fn all_in(&self, range: core::ops::Range<usize>) -> bool {
        self.bits[range].all()
    }
}
