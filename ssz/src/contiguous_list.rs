use core::{fmt::Debug, marker::PhantomData};

use arithmetic::UsizeExt as _;
use derivative::Derivative;
use derive_more::{Deref, DerefMut};
use ethereum_types::H256;
use typenum::{U1, Unsigned};

use crate::{
    error::{IndexError, PushError, ReadError},
    merkle_tree,
    porcelain::SszHash,
};

/// Variable-length sequence of at most `N` values.
///
/// Dereferences to a mutable slice, so elements can be modified in place but the length can only
/// change through methods that check the limit.
#[derive(Deref, DerefMut, Derivative)]
#[derivative(
    Clone(bound = "T: Clone"),
    PartialEq(bound = "T: PartialEq"),
    Eq(bound = "T: Eq"),
    Default(bound = ""),
    Debug(bound = "T: Debug", transparent = "true")
)]
pub struct ContiguousList<T, N> {
    #[deref(forward)]
    #[deref_mut(forward)]
    elements: Vec<T>,
    #[derivative(Debug = "ignore")]
    phantom: PhantomData<N>,
}

impl<T, N: Unsigned> TryFrom<Vec<T>> for ContiguousList<T, N> {
    type Error = ReadError;

    fn try_from(elements: Vec<T>) -> Result<Self, Self::Error> {
        Self::validate_length(elements.len())?;

        Ok(Self {
            elements,
            phantom: PhantomData,
        })
    }
}

impl<T, N> IntoIterator for ContiguousList<T, N> {
    type Item = T;
    type IntoIter = <Vec<T> as IntoIterator>::IntoIter;

    fn into_iter(self) -> Self::IntoIter {
        self.elements.into_iter()
    }
}

impl<'list, T, N> IntoIterator for &'list ContiguousList<T, N> {
    type Item = &'list T;
    type IntoIter = core::slice::Iter<'list, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.elements.iter()
    }
}

impl<T: SszHash, N: Unsigned> SszHash for ContiguousList<T, N> {
    type PackingFactor = U1;

    fn hash_tree_root(&self) -> H256 {
        let root = if T::PackingFactor::USIZE == 1 {
            let depth = N::USIZE.ilog2_ceil().into();
            merkle_tree::merkleize_chunks(self.iter().map(T::hash_tree_root), depth)
        } else {
            merkle_tree::merkleize_packed(&self.elements, N::USIZE)
        };

        merkle_tree::mix_in_length(root, self.len())
    }
}

impl<T, N: Unsigned> ContiguousList<T, N> {
    pub fn try_from_iter(elements: impl IntoIterator<Item = T>) -> Result<Self, ReadError> {
        elements.into_iter().collect::<Vec<_>>().try_into()
    }

    pub fn push(&mut self, element: T) -> Result<(), PushError> {
        if self.elements.len() >= N::USIZE {
            return Err(PushError { maximum: N::USIZE });
        }

        self.elements.push(element);

        Ok(())
    }

    /// Like [`slice::get`], but takes a `u64` index and fails with [`IndexError`].
    ///
    /// Validator indices and other registry positions are `u64`s.
    pub fn get(&self, index: u64) -> Result<&T, IndexError> {
        let length = self.elements.len();

        usize::try_from(index)
            .ok()
            .and_then(|index| self.elements.get(index))
            .ok_or(IndexError {
                length,
                index: usize::try_from(index).unwrap_or(usize::MAX),
            })
    }

    pub fn get_mut(&mut self, index: u64) -> Result<&mut T, IndexError> {
        let length = self.elements.len();

        usize::try_from(index)
            .ok()
            .and_then(|index| self.elements.get_mut(index))
            .ok_or(IndexError {
                length,
                index: usize::try_from(index).unwrap_or(usize::MAX),
            })
    }

    pub fn clear(&mut self) {
        self.elements.clear();
    }

    #[must_use]
    pub fn map<U>(self, function: impl FnMut(T) -> U) -> ContiguousList<U, N> {
        ContiguousList {
            elements: self.elements.into_iter().map(function).collect(),
            phantom: PhantomData,
        }
    }

    const fn validate_length(actual: usize) -> Result<(), ReadError> {
        let maximum = N::USIZE;

        if actual > maximum {
            return Err(ReadError::ListTooLong { maximum, actual });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use typenum::{U2, U4};

    use super::*;

    #[test]
    fn push_respects_the_limit() {
        let mut list = ContiguousList::<u64, U2>::default();

        assert_eq!(list.push(1), Ok(()));
        assert_eq!(list.push(2), Ok(()));
        assert_eq!(list.push(3), Err(PushError { maximum: 2 }));
        assert_eq!(list[..], [1, 2]);
    }

    #[test]
    fn get_reports_out_of_bounds_indices() {
        let list = ContiguousList::<u64, U4>::try_from(vec![5, 6]).expect("fits");

        assert_eq!(list.get(1), Ok(&6));
        assert_eq!(list.get(2), Err(IndexError { length: 2, index: 2 }));
    }

    #[test]
    fn conversion_rejects_long_vectors() {
        assert_eq!(
            ContiguousList::<u64, U2>::try_from(vec![1, 2, 3]),
            Err(ReadError::ListTooLong {
                maximum: 2,
                actual: 3,
            }),
        );
    }

    #[test]
    fn empty_list_root_is_zero_subtree_mixed_with_zero_length() {
        let list = ContiguousList::<H256, U4>::default();
        assert_eq!(
            list.hash_tree_root(),
            merkle_tree::mix_in_length(hashing::ZERO_HASHES[2], 0),
        );
    }

    #[test]
    fn length_affects_root() {
        let short = ContiguousList::<u64, U4>::try_from(vec![0]).expect("fits");
        let long = ContiguousList::<u64, U4>::try_from(vec![0, 0]).expect("fits");
        assert_ne!(short.hash_tree_root(), long.hash_tree_root());
    }
}
