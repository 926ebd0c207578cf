use derive_more::AsRef;
use fixed_hash::construct_fixed_hash;
use ssz::{SszHash, H256, U1};

const SIZE: usize = 96;

construct_fixed_hash! {
    #[derive(AsRef)]
    pub struct SignatureBytes(SIZE);
}

impl SszHash for SignatureBytes {
    type PackingFactor = U1;

    #[inline]
    fn hash_tree_root(&self) -> H256 {
        ssz::merkleize_bytes(self, SIZE.div_ceil(ssz::BYTES_PER_CHUNK))
    }
}

impl SignatureBytes {
    /// The compressed point at infinity. It is what aggregating no signatures produces.
    #[inline]
    #[must_use]
    pub fn empty() -> Self {
        let mut bytes = Self::zero();
        bytes.as_mut()[0] = 0xc0;
        bytes
    }

    #[inline]
    #[must_use]
    pub fn is_empty(self) -> bool {
        self == Self::empty()
    }
}
