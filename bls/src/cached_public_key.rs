use core::fmt::{Debug, Formatter, Result as FmtResult};

use once_cell::sync::OnceCell;
use ssz::{SszHash, H256};

use crate::{error::Error, public_key::PublicKey, public_key_bytes::PublicKeyBytes};

/// Compressed public key that remembers its decompressed form.
///
/// Decompression dominates the cost of verifying a single signature, and the registry keeps the
/// same keys for the lifetime of a chain.
#[derive(Clone, Default)]
pub struct CachedPublicKey {
    bytes: PublicKeyBytes,
    decompressed: OnceCell<PublicKey>,
}

impl PartialEq for CachedPublicKey {
    fn eq(&self, other: &Self) -> bool {
        self.bytes == other.bytes
    }
}

impl Eq for CachedPublicKey {}

impl Debug for CachedPublicKey {
    fn fmt(&self, formatter: &mut Formatter) -> FmtResult {
        formatter
            .debug_tuple("CachedPublicKey")
            .field(&self.bytes)
            .finish()
    }
}

impl From<PublicKeyBytes> for CachedPublicKey {
    #[inline]
    fn from(bytes: PublicKeyBytes) -> Self {
        Self {
            bytes,
            decompressed: OnceCell::new(),
        }
    }
}

impl From<PublicKey> for CachedPublicKey {
    #[inline]
    fn from(public_key: PublicKey) -> Self {
        Self {
            bytes: public_key.into(),
            decompressed: OnceCell::with_value(public_key),
        }
    }
}

impl SszHash for CachedPublicKey {
    type PackingFactor = <PublicKeyBytes as SszHash>::PackingFactor;

    #[inline]
    fn hash_tree_root(&self) -> H256 {
        self.bytes.hash_tree_root()
    }
}

impl CachedPublicKey {
    #[inline]
    #[must_use]
    pub const fn as_bytes(&self) -> &PublicKeyBytes {
        &self.bytes
    }

    #[inline]
    #[must_use]
    pub const fn to_bytes(&self) -> PublicKeyBytes {
        self.bytes
    }

    #[inline]
    pub fn decompress(&self) -> Result<&PublicKey, Error> {
        self.decompressed
            .get_or_try_init(|| self.bytes.try_into())
    }
}
