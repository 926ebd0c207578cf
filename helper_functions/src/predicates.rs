use anyhow::{ensure, Error as AnyhowError, Result};
use bit_field::BitField as _;
use itertools::Itertools as _;
use types::{
    config::Config,
    phase0::{
        consts::FAR_FUTURE_EPOCH,
        primitives::{Epoch, H256},
    },
    phase1::{
        beacon_state::BeaconState,
        containers::{AttestationData, IndexedAttestation, Validator},
    },
    preset::Preset,
};

use crate::{
    accessors,
    error::{Error, SignatureKind},
    signing::SignForSingleFork as _,
    verifier::Verifier,
};

// > Check if ``validator`` is active.
#[inline]
#[must_use]
pub const fn is_active_validator(validator: &Validator, epoch: Epoch) -> bool {
    validator.activation_epoch <= epoch && epoch < validator.exit_epoch
}

// > Check if ``validator`` is eligible to be placed into the activation queue.
#[must_use]
pub const fn is_eligible_for_activation_queue<P: Preset>(validator: &Validator) -> bool {
    validator.activation_eligibility_epoch == FAR_FUTURE_EPOCH
        && validator.effective_balance == P::MAX_EFFECTIVE_BALANCE
}

// > Check if ``validator`` is eligible for activation.
#[must_use]
pub fn is_eligible_for_activation<P: Preset>(
    state: &BeaconState<P>,
    validator: &Validator,
) -> bool {
    // > Placement in queue is finalized
    validator.activation_eligibility_epoch <= state.finalized_checkpoint.epoch
        // > Has not yet been activated
        && validator.activation_epoch == FAR_FUTURE_EPOCH
}

#[inline]
#[must_use]
pub const fn is_eligible_for_penalties(validator: &Validator, previous_epoch: Epoch) -> bool {
    is_active_validator(validator, previous_epoch)
        || (validator.slashed && previous_epoch + 1 < validator.withdrawable_epoch)
}

// > Check if ``validator`` is slashable.
#[inline]
#[must_use]
pub const fn is_slashable_validator(validator: &Validator, epoch: Epoch) -> bool {
    !validator.slashed
        && validator.activation_epoch <= epoch
        && epoch < validator.withdrawable_epoch
}

// > Check if ``data_1`` and ``data_2`` are slashable according to Casper FFG rules.
#[inline]
#[must_use]
pub fn is_slashable_attestation_data(data_1: AttestationData, data_2: AttestationData) -> bool {
    // > Double vote
    (data_1 != data_2 && data_1.target.epoch == data_2.target.epoch)
        // > Surround vote
        || (data_1.source.epoch < data_2.source.epoch && data_2.target.epoch < data_1.target.epoch)
}

// This doesn't verify the signature when called directly with `MultiVerifier`.
// When calling directly, use `SingleVerifier` or call `finish` manually.
pub fn validate_constructed_indexed_attestation<P: Preset>(
    config: &Config,
    state: &BeaconState<P>,
    indexed_attestation: &IndexedAttestation<P>,
    verifier: impl Verifier,
) -> Result<()> {
    validate_indexed_attestation(config, state, indexed_attestation, verifier, false)
}

pub fn validate_received_indexed_attestation<P: Preset>(
    config: &Config,
    state: &BeaconState<P>,
    indexed_attestation: &IndexedAttestation<P>,
    verifier: impl Verifier,
) -> Result<()> {
    validate_indexed_attestation(config, state, indexed_attestation, verifier, true)
}

fn validate_indexed_attestation<P: Preset>(
    config: &Config,
    state: &BeaconState<P>,
    indexed_attestation: &IndexedAttestation<P>,
    mut verifier: impl Verifier,
    validate_indices_sorted_and_unique: bool,
) -> Result<()> {
    let indices = &indexed_attestation.attesting_indices;

    ensure!(!indices.is_empty(), Error::AttestationHasNoAttestingIndices);

    if validate_indices_sorted_and_unique {
        // > Verify indices are sorted and unique
        ensure!(
            indices.iter().tuple_windows().all(|(a, b)| a < b),
            Error::AttestingIndicesNotSortedAndUnique,
        );
    }

    // > Verify aggregate signature
    itertools::process_results(
        indices.iter().copied().map(|validator_index| {
            accessors::public_key(state, validator_index)?
                .decompress()
                .map_err(AnyhowError::new)
        }),
        |public_keys| {
            verifier.verify_aggregate(
                indexed_attestation.data.signing_root(config, state),
                indexed_attestation.signature,
                public_keys,
                SignatureKind::Attestation,
            )
        },
    )?
}

// > Check if ``leaf`` at ``index`` verifies against the Merkle ``root`` and ``branch``.
#[must_use]
pub fn is_valid_merkle_branch(
    leaf: H256,
    branch: impl IntoIterator<Item = H256>,
    index: u64,
    root: H256,
) -> bool {
    let mut hash = leaf;

    for (height, node) in branch.into_iter().enumerate() {
        if index.get_bit(height) {
            hash = hashing::hash_256_256(node, hash);
        } else {
            hash = hashing::hash_256_256(hash, node);
        }
    }

    hash == root
}

#[must_use]
pub fn is_in_inactivity_leak<P: Preset>(state: &BeaconState<P>) -> bool {
    accessors::get_finality_delay(state) > P::MIN_EPOCHS_TO_INACTIVITY_PENALTY
}

#[cfg(test)]
mod tests {
    use types::{phase0::containers::Checkpoint, preset::Minimal};

    use crate::verifier::NullVerifier;

    use super::*;

    fn attestation_data(source_epoch: Epoch, target_epoch: Epoch) -> AttestationData {
        AttestationData {
            source: Checkpoint {
                epoch: source_epoch,
                root: H256::zero(),
            },
            target: Checkpoint {
                epoch: target_epoch,
                root: H256::zero(),
            },
            ..AttestationData::default()
        }
    }

    #[test]
    fn validator_is_active_between_activation_and_exit() {
        let validator = Validator {
            activation_epoch: 2,
            exit_epoch: 5,
            ..Validator::default()
        };

        assert!(!is_active_validator(&validator, 1));
        assert!(is_active_validator(&validator, 2));
        assert!(is_active_validator(&validator, 4));
        assert!(!is_active_validator(&validator, 5));
    }

    #[test]
    fn slashed_validator_is_not_slashable() {
        let validator = Validator {
            withdrawable_epoch: FAR_FUTURE_EPOCH,
            ..Validator::default()
        };

        assert!(is_slashable_validator(&validator, 10));

        let slashed = Validator {
            slashed: true,
            ..validator
        };

        assert!(!is_slashable_validator(&slashed, 10));
    }

    #[test]
    fn slashed_validator_is_penalized_until_withdrawable() {
        let validator = Validator {
            slashed: true,
            exit_epoch: 3,
            withdrawable_epoch: 10,
            ..Validator::default()
        };

        assert!(is_eligible_for_penalties(&validator, 8));
        assert!(!is_eligible_for_penalties(&validator, 9));
    }

    #[test]
    fn double_vote_is_slashable() {
        let data_1 = attestation_data(0, 3);
        let data_2 = AttestationData {
            beacon_block_root: H256::repeat_byte(1),
            ..data_1
        };

        assert!(is_slashable_attestation_data(data_1, data_2));
        assert!(!is_slashable_attestation_data(data_1, data_1));
    }

    #[test]
    fn surround_vote_is_slashable_in_one_direction() {
        let surrounding = attestation_data(1, 5);
        let surrounded = attestation_data(2, 4);

        assert!(is_slashable_attestation_data(surrounding, surrounded));
        assert!(!is_slashable_attestation_data(surrounded, surrounding));
    }

    #[test]
    fn merkle_branch_of_two_leaves() {
        let left = H256::repeat_byte(1);
        let right = H256::repeat_byte(2);
        let root = hashing::hash_256_256(left, right);

        assert!(is_valid_merkle_branch(left, [right], 0, root));
        assert!(is_valid_merkle_branch(right, [left], 1, root));
        assert!(!is_valid_merkle_branch(left, [right], 1, root));
    }

    #[test]
    fn indexed_attestation_without_indices_is_invalid() {
        let config = Config::minimal();
        let state = BeaconState::<Minimal>::default();
        let indexed_attestation = IndexedAttestation::default();

        assert!(validate_received_indexed_attestation(
            &config,
            &state,
            &indexed_attestation,
            NullVerifier,
        )
        .is_err());
    }

    #[test]
    fn received_indices_must_be_sorted() -> Result<()> {
        let config = Config::minimal();

        let state = BeaconState::<Minimal> {
            validators: vec![Validator::default(); 4].try_into()?,
            ..BeaconState::default()
        };

        let unsorted = IndexedAttestation {
            attesting_indices: vec![2, 1].try_into()?,
            ..IndexedAttestation::default()
        };

        let result =
            validate_received_indexed_attestation(&config, &state, &unsorted, NullVerifier);

        assert!(result.is_err_and(|error| matches!(
            error.downcast_ref(),
            Some(Error::AttestingIndicesNotSortedAndUnique),
        )));

        Ok(())
    }

    #[test]
    fn inactivity_leak_starts_after_finality_stalls() {
        let mut state = BeaconState::<Minimal> {
            slot: 5 * 8,
            ..BeaconState::default()
        };

        assert!(!is_in_inactivity_leak(&state));

        state.slot = 6 * 8;

        assert!(is_in_inactivity_leak(&state));
    }
}
