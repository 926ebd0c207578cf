use ethereum_types::H256;
use typenum::{NonZero, Unsigned};

pub trait SszHash {
    /// How many values of this type fit in one 32-byte chunk when packed.
    ///
    /// Composite types use `U1`. Basic types place their little-endian serialization at the
    /// start of the value returned by [`SszHash::hash_tree_root`], which is what makes packing
    /// work without a separate serializer.
    type PackingFactor: Unsigned + NonZero;

    fn hash_tree_root(&self) -> H256;
}

impl<T: SszHash + ?Sized> SszHash for &T {
    type PackingFactor = T::PackingFactor;

    #[inline]
    fn hash_tree_root(&self) -> H256 {
        (*self).hash_tree_root()
    }
}

impl<T: SszHash + ?Sized> SszHash for Box<T> {
    type PackingFactor = T::PackingFactor;

    #[inline]
    fn hash_tree_root(&self) -> H256 {
        self.as_ref().hash_tree_root()
    }
}
