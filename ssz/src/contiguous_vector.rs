use core::{fmt::Debug, marker::PhantomData};

use arithmetic::UsizeExt as _;
use derivative::Derivative;
use derive_more::{Deref, DerefMut};
use ethereum_types::H256;
use typenum::{U1, Unsigned};

use crate::{error::ReadError, merkle_tree, porcelain::SszHash};

/// Fixed-length sequence of `N` values.
///
/// Ring buffers in `BeaconState` are vectors indexed by `slot % N` or `epoch % N`.
/// [`ContiguousVector::mod_index`] and [`ContiguousVector::mod_index_mut`] do the modular
/// arithmetic so callers cannot forget it.
#[derive(Deref, DerefMut, Derivative)]
#[derivative(
    Clone(bound = "T: Clone"),
    PartialEq(bound = "T: PartialEq"),
    Eq(bound = "T: Eq"),
    Debug(bound = "T: Debug", transparent = "true")
)]
pub struct ContiguousVector<T, N> {
    #[deref(forward)]
    #[deref_mut(forward)]
    elements: Box<[T]>,
    #[derivative(Debug = "ignore")]
    phantom: PhantomData<N>,
}

impl<T: Default, N: Unsigned> Default for ContiguousVector<T, N> {
    fn default() -> Self {
        Self::repeat_with(T::default)
    }
}

impl<T, N: Unsigned> TryFrom<Vec<T>> for ContiguousVector<T, N> {
    type Error = ReadError;

    fn try_from(elements: Vec<T>) -> Result<Self, Self::Error> {
        let expected = N::USIZE;
        let actual = elements.len();

        if actual != expected {
            return Err(ReadError::VectorSizeMismatch { expected, actual });
        }

        Ok(Self {
            elements: elements.into_boxed_slice(),
            phantom: PhantomData,
        })
    }
}

impl<'vector, T, N> IntoIterator for &'vector ContiguousVector<T, N> {
    type Item = &'vector T;
    type IntoIter = core::slice::Iter<'vector, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.elements.iter()
    }
}

impl<T: SszHash, N: Unsigned> SszHash for ContiguousVector<T, N> {
    type PackingFactor = U1;

    fn hash_tree_root(&self) -> H256 {
        if T::PackingFactor::USIZE == 1 {
            let depth = N::USIZE.ilog2_ceil().into();
            merkle_tree::merkleize_chunks(self.iter().map(T::hash_tree_root), depth)
        } else {
            merkle_tree::merkleize_packed(&self.elements, N::USIZE)
        }
    }
}

impl<T, N: Unsigned> ContiguousVector<T, N> {
    #[must_use]
    pub fn repeat_element(element: T) -> Self
    where
        T: Clone,
    {
        Self::repeat_with(|| element.clone())
    }

    #[must_use]
    pub fn repeat_with(function: impl FnMut() -> T) -> Self {
        let elements = core::iter::repeat_with(function).take(N::USIZE).collect();

        Self {
            elements,
            phantom: PhantomData,
        }
    }

    #[inline]
    #[must_use]
    pub fn mod_index(&self, index: u64) -> &T {
        &self.elements[Self::reduce(index)]
    }

    #[inline]
    #[must_use]
    pub fn mod_index_mut(&mut self, index: u64) -> &mut T {
        &mut self.elements[Self::reduce(index)]
    }

    fn reduce(index: u64) -> usize {
        // `N` is a length of an in-memory collection, so it fits in both `u64` and `usize`.
        // The remainder is smaller than `N`.
        usize::try_from(index % N::U64).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use typenum::{U3, U4, U8};

    use super::*;

    #[test]
    fn mod_index_wraps_around() {
        let mut vector = ContiguousVector::<u64, U4>::default();

        *vector.mod_index_mut(5) = 7;

        assert_eq!(vector[1], 7);
        assert_eq!(*vector.mod_index(9), 7);
    }

    #[test]
    fn conversion_rejects_wrong_length() {
        assert_eq!(
            ContiguousVector::<u64, U4>::try_from(vec![1, 2, 3]),
            Err(ReadError::VectorSizeMismatch {
                expected: 4,
                actual: 3,
            }),
        );
    }

    #[test]
    fn roots_of_composite_elements_are_padded_to_a_power_of_two() {
        let roots = ContiguousVector::<H256, U3>::repeat_element(H256::repeat_byte(1));
        let four = ContiguousVector::<H256, U4>::try_from(vec![
            H256::repeat_byte(1),
            H256::repeat_byte(1),
            H256::repeat_byte(1),
            H256::zero(),
        ])
        .expect("length matches");

        assert_eq!(roots.hash_tree_root(), four.hash_tree_root());
    }

    #[test]
    fn basic_elements_are_packed() {
        let vector = ContiguousVector::<u64, U8>::default();
        assert_eq!(vector.hash_tree_root(), hashing::ZERO_HASHES[1]);
    }
}
