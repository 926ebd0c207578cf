use core::num::NonZeroU64;
use std::sync::Arc;

use bls::PublicKeyBytes;
use enum_map::EnumMap;
use im::HashMap;
use once_cell::sync::OnceCell;

use crate::{nonstandard::RelativeEpoch, phase0::primitives::ValidatorIndex};

// The fields in `Cache` are ordered from short-lived to long-lived.
//
// Everything here is derived from other fields of the state. None of it is hashed or compared.
// Cloning a state shares the cached values, which is why the collections are behind `Arc` or use
// persistent data structures.
#[derive(Clone, Default, Debug)]
pub struct Cache {
    // `get_or_try_init` on an initialized `OnceCell` is cheaper than recomputing the index,
    // which requires sampling from the shuffled active validators.
    pub proposer_index: OnceCell<ValidatorIndex>,
    pub active_validator_indices_ordered: EnumMap<RelativeEpoch, OnceCell<Arc<[ValidatorIndex]>>>,
    pub active_validator_indices_shuffled: EnumMap<RelativeEpoch, OnceCell<Arc<[ValidatorIndex]>>>,
    pub total_active_balance: EnumMap<RelativeEpoch, OnceCell<NonZeroU64>>,
    pub validator_indices: OnceCell<HashMap<PublicKeyBytes, ValidatorIndex>>,
}

impl Cache {
    pub fn advance_slot(&mut self) {
        self.proposer_index.take();
    }

    pub fn advance_epoch(&mut self) {
        let ordered = &mut self.active_validator_indices_ordered;
        let shuffled = &mut self.active_validator_indices_shuffled;
        let balance = &mut self.total_active_balance;

        ordered[RelativeEpoch::Previous] = core::mem::take(&mut ordered[RelativeEpoch::Current]);
        shuffled[RelativeEpoch::Previous] = core::mem::take(&mut shuffled[RelativeEpoch::Current]);
        balance[RelativeEpoch::Previous] = core::mem::take(&mut balance[RelativeEpoch::Current]);

        ordered[RelativeEpoch::Current] = core::mem::take(&mut ordered[RelativeEpoch::Next]);
        shuffled[RelativeEpoch::Current] = core::mem::take(&mut shuffled[RelativeEpoch::Next]);
        balance[RelativeEpoch::Current] = core::mem::take(&mut balance[RelativeEpoch::Next]);
    }

    /// Forgets total active balances that depend on effective balances.
    ///
    /// Effective balances only change at the end of an epoch, after which the current and next
    /// epochs may have different totals.
    pub fn invalidate_total_active_balances(&mut self) {
        self.total_active_balance[RelativeEpoch::Current].take();
        self.total_active_balance[RelativeEpoch::Next].take();
    }

    /// Records a validator appended to the registry.
    ///
    /// Does nothing if the map has not been built yet. It will include the new validator when it
    /// is.
    pub fn add_validator_index(&mut self, pubkey: PublicKeyBytes, index: ValidatorIndex) {
        if let Some(indices) = self.validator_indices.get_mut() {
            indices.insert(pubkey, index);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_epoch_rotates_every_relative_epoch() {
        let mut cache = Cache::default();

        cache.active_validator_indices_ordered[RelativeEpoch::Current]
            .get_or_init(|| Arc::from([1, 2, 3]));
        cache.active_validator_indices_ordered[RelativeEpoch::Next]
            .get_or_init(|| Arc::from([1, 2, 3, 4]));
        cache.total_active_balance[RelativeEpoch::Next].get_or_init(|| NonZeroU64::MIN);
        cache.proposer_index.get_or_init(|| 2);

        cache.advance_slot();
        cache.advance_epoch();

        let ordered = &cache.active_validator_indices_ordered;

        assert_eq!(cache.proposer_index.get(), None);
        assert_eq!(ordered[RelativeEpoch::Previous].get().map(|indices| indices.len()), Some(3));
        assert_eq!(ordered[RelativeEpoch::Current].get().map(|indices| indices.len()), Some(4));
        assert_eq!(ordered[RelativeEpoch::Next].get(), None);
        assert_eq!(
            cache.total_active_balance[RelativeEpoch::Current].get(),
            Some(&NonZeroU64::MIN),
        );
    }

    #[test]
    fn validator_indices_are_only_extended_once_built() {
        let mut cache = Cache::default();

        cache.add_validator_index(PublicKeyBytes::repeat_byte(1), 0);

        assert!(cache.validator_indices.get().is_none());

        cache.validator_indices.get_or_init(HashMap::new);
        cache.add_validator_index(PublicKeyBytes::repeat_byte(1), 0);

        assert_eq!(
            cache
                .validator_indices
                .get()
                .and_then(|indices| indices.get(&PublicKeyBytes::repeat_byte(1))),
            Some(&0),
        );
    }
}
