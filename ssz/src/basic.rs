use ethereum_types::{H256, H32};
use typenum::{U1, U32, U4, U8};

use crate::porcelain::SszHash;

impl SszHash for bool {
    type PackingFactor = U32;

    #[inline]
    fn hash_tree_root(&self) -> H256 {
        let mut hash = H256::zero();
        hash.0[0] = (*self).into();
        hash
    }
}

impl SszHash for u8 {
    type PackingFactor = U32;

    #[inline]
    fn hash_tree_root(&self) -> H256 {
        let mut hash = H256::zero();
        hash.0[0] = *self;
        hash
    }
}

impl SszHash for u64 {
    type PackingFactor = U4;

    #[inline]
    fn hash_tree_root(&self) -> H256 {
        let mut hash = H256::zero();
        hash[..size_of::<Self>()].copy_from_slice(&self.to_le_bytes());
        hash
    }
}

// `Bytes4` in the protocol. Eight of them fit in a chunk.
impl SszHash for H32 {
    type PackingFactor = U8;

    #[inline]
    fn hash_tree_root(&self) -> H256 {
        let mut hash = H256::zero();
        hash[..Self::len_bytes()].copy_from_slice(self.as_bytes());
        hash
    }
}

impl SszHash for H256 {
    type PackingFactor = U1;

    #[inline]
    fn hash_tree_root(&self) -> H256 {
        *self
    }
}
