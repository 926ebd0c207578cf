use derive_more::AsRef;
use fixed_hash::construct_fixed_hash;
use ssz::{SszHash, H256, U1};

use crate::public_key::PublicKey;

const SIZE: usize = 48;

construct_fixed_hash! {
    #[derive(AsRef)]
    pub struct PublicKeyBytes(SIZE);
}

impl From<PublicKey> for PublicKeyBytes {
    #[inline]
    fn from(public_key: PublicKey) -> Self {
        Self(public_key.as_raw().compress())
    }
}

impl hex::FromHex for PublicKeyBytes {
    type Error = <[u8; SIZE] as hex::FromHex>::Error;

    fn from_hex<T: AsRef<[u8]>>(digits: T) -> Result<Self, Self::Error> {
        hex::FromHex::from_hex(digits).map(Self)
    }
}

impl SszHash for PublicKeyBytes {
    type PackingFactor = U1;

    #[inline]
    fn hash_tree_root(&self) -> H256 {
        ssz::merkleize_bytes(self, SIZE.div_ceil(ssz::BYTES_PER_CHUNK))
    }
}
