use core::{
    num::NonZeroU64,
    ops::{Div as _, Mul as _},
};
use std::sync::Arc;

use anyhow::{bail, ensure, Result};
use arithmetic::NonZeroExt as _;
use bls::{CachedPublicKey, PublicKeyBytes};
use im::HashMap;
use itertools::{EitherOrBoth, Itertools as _};
use num_integer::Roots as _;
use ssz::{BitList, ContiguousList, SszHash as _};
use tap::{Pipe as _, TryConv as _};
use typenum::Unsigned as _;
use types::{
    config::Config,
    nonstandard::{AttestationEpoch, RelativeEpoch},
    phase0::{
        consts::{
            BASE_REWARDS_PER_EPOCH, DOMAIN_BEACON_ATTESTER, DOMAIN_BEACON_PROPOSER, GENESIS_EPOCH,
        },
        primitives::{CommitteeIndex, DomainType, Epoch, Gwei, Slot, ValidatorIndex, H256},
    },
    phase1::{
        beacon_state::BeaconState,
        containers::{Attestation, AttestationData, AttesterSlashing, IndexedAttestation},
    },
    preset::{Preset, SlotsPerHistoricalRoot},
};

use crate::{error::Error, misc, predicates};

#[must_use]
pub fn get_previous_epoch<P: Preset>(state: &BeaconState<P>) -> Epoch {
    get_current_epoch(state)
        .saturating_sub(1)
        .max(GENESIS_EPOCH)
}

#[must_use]
pub fn get_current_epoch<P: Preset>(state: &BeaconState<P>) -> Epoch {
    misc::compute_epoch_at_slot::<P>(state.slot)
}

#[must_use]
pub fn get_next_epoch<P: Preset>(state: &BeaconState<P>) -> Epoch {
    get_current_epoch(state) + 1
}

#[must_use]
pub fn absolute_epoch<P: Preset>(state: &BeaconState<P>, relative_epoch: RelativeEpoch) -> Epoch {
    match relative_epoch {
        RelativeEpoch::Previous => get_previous_epoch(state),
        RelativeEpoch::Current => get_current_epoch(state),
        RelativeEpoch::Next => get_next_epoch(state),
    }
}

pub fn attestation_epoch<P: Preset>(
    state: &BeaconState<P>,
    epoch: Epoch,
) -> Result<AttestationEpoch> {
    match get_current_epoch(state).checked_sub(epoch) {
        None => bail!(Error::EpochInTheFuture { epoch }),
        Some(0) => Ok(AttestationEpoch::Current),
        Some(1) => Ok(AttestationEpoch::Previous),
        Some(_) => bail!(Error::EpochBeforePrevious { epoch }),
    }
}

pub fn relative_epoch<P: Preset>(state: &BeaconState<P>, epoch: Epoch) -> Result<RelativeEpoch> {
    match get_next_epoch(state).checked_sub(epoch) {
        None => bail!(Error::EpochAfterNext { epoch }),
        Some(0) => Ok(RelativeEpoch::Next),
        Some(1) => Ok(RelativeEpoch::Current),
        Some(2) => Ok(RelativeEpoch::Previous),
        Some(_) => bail!(Error::EpochBeforePrevious { epoch }),
    }
}

#[must_use]
pub fn get_finality_delay<P: Preset>(state: &BeaconState<P>) -> u64 {
    get_previous_epoch(state) - state.finalized_checkpoint.epoch
}

// > Return the block root at the start of a recent ``epoch``.
pub fn get_block_root<P: Preset>(state: &BeaconState<P>, epoch: Epoch) -> Result<H256> {
    get_block_root_at_slot(state, misc::compute_start_slot_at_epoch::<P>(epoch))
}

// > Return the block root at a recent ``slot``.
pub fn get_block_root_at_slot<P: Preset>(state: &BeaconState<P>, slot: Slot) -> Result<H256> {
    let state_slot = state.slot;

    ensure!(
        slot < state_slot && state_slot <= slot + SlotsPerHistoricalRoot::<P>::U64,
        Error::SlotOutOfRange { slot, state_slot },
    );

    Ok(*state.block_roots.mod_index(slot))
}

/// Root of the block most recently applied to `state`.
///
/// The header stored in the state is missing its state root until the next slot is processed.
#[must_use]
pub fn latest_block_root<P: Preset>(state: &BeaconState<P>) -> H256 {
    let mut header = state.latest_block_header;

    if header.state_root.is_zero() {
        header.state_root = state.hash_tree_root();
    }

    header.hash_tree_root()
}

#[must_use]
pub fn get_randao_mix<P: Preset>(state: &BeaconState<P>, epoch: Epoch) -> H256 {
    *state.randao_mixes.mod_index(epoch)
}

pub fn public_key<P: Preset>(
    state: &BeaconState<P>,
    validator_index: ValidatorIndex,
) -> Result<&CachedPublicKey> {
    Ok(&state.validators.get(validator_index)?.pubkey)
}

#[must_use]
pub fn index_of_public_key<P: Preset>(
    state: &BeaconState<P>,
    public_key: PublicKeyBytes,
) -> Option<ValidatorIndex> {
    get_or_init_validator_indices(state).get(&public_key).copied()
}

fn get_or_init_validator_indices<P: Preset>(
    state: &BeaconState<P>,
) -> &HashMap<PublicKeyBytes, ValidatorIndex> {
    state.cache.validator_indices.get_or_init(|| {
        state
            .validators
            .iter()
            .map(|validator| validator.pubkey.to_bytes())
            .zip(0..)
            .collect()
    })
}

// > Return the sequence of active validator indices at ``epoch``.
pub fn get_active_validator_indices<P: Preset>(
    state: &BeaconState<P>,
    epoch: Epoch,
) -> impl Iterator<Item = ValidatorIndex> + '_ {
    (0..)
        .zip(state.validators.iter())
        .filter(move |(_, validator)| predicates::is_active_validator(validator, epoch))
        .map(|(index, _)| index)
}

// Only proposer selection needs the list of validators to be in order.
pub fn active_validator_indices_ordered<P: Preset>(
    state: &BeaconState<P>,
    relative_epoch: RelativeEpoch,
) -> &[ValidatorIndex] {
    state.cache.active_validator_indices_ordered[relative_epoch].get_or_init(|| {
        let epoch = absolute_epoch(state, relative_epoch);
        get_active_validator_indices(state, epoch).collect()
    })
}

/// Active validators at `relative_epoch` in the order committees take them.
///
/// Committees of an epoch are consecutive ranges of this slice.
pub fn active_validator_indices_shuffled<P: Preset>(
    state: &BeaconState<P>,
    relative_epoch: RelativeEpoch,
) -> Result<&[ValidatorIndex]> {
    state.cache.active_validator_indices_shuffled[relative_epoch]
        .get_or_try_init(|| {
            let epoch = absolute_epoch(state, relative_epoch);
            let seed = get_seed(state, epoch, DOMAIN_BEACON_ATTESTER);
            let mut shuffled = active_validator_indices_ordered(state, relative_epoch).to_vec();

            shuffling::shuffle_slice::<P, _>(&mut shuffled, seed)?;

            Ok::<Arc<[_]>, anyhow::Error>(shuffled.into())
        })
        .map(|indices| &**indices)
}

fn active_validator_count<P: Preset>(
    state: &BeaconState<P>,
    relative_epoch: RelativeEpoch,
) -> Result<u64> {
    active_validator_indices_ordered(state, relative_epoch)
        .len()
        .try_conv::<u64>()
        .map_err(Into::into)
}

pub fn get_validator_churn_limit<P: Preset>(
    config: &Config,
    state: &BeaconState<P>,
) -> Result<u64> {
    Ok(active_validator_count(state, RelativeEpoch::Current)?
        .div(config.churn_limit_quotient)
        .max(config.min_per_epoch_churn_limit))
}

// > Return the seed at ``epoch``.
#[must_use]
pub fn get_seed<P: Preset>(state: &BeaconState<P>, epoch: Epoch, domain_type: DomainType) -> H256 {
    let mix = get_randao_mix(
        state,
        epoch + P::EpochsPerHistoricalVector::U64 - P::MIN_SEED_LOOKAHEAD - 1,
    );

    hashing::hash_32_64_256(domain_type.to_fixed_bytes(), epoch, mix)
}

pub fn get_committee_count_per_slot<P: Preset>(
    state: &BeaconState<P>,
    relative_epoch: RelativeEpoch,
) -> Result<u64> {
    let active_validator_count = active_validator_count(state, relative_epoch)?;
    Ok(misc::committee_count_from_active_validator_count::<P>(active_validator_count))
}

/// Number of committees per slot in the epoch containing `slot`.
pub fn committee_count_at_slot<P: Preset>(state: &BeaconState<P>, slot: Slot) -> Result<u64> {
    let epoch = misc::compute_epoch_at_slot::<P>(slot);
    get_committee_count_per_slot(state, relative_epoch(state, epoch)?)
}

// > Return the beacon committee at ``slot`` for ``index``.
pub fn beacon_committee<P: Preset>(
    state: &BeaconState<P>,
    slot: Slot,
    committee_index: CommitteeIndex,
) -> Result<&[ValidatorIndex]> {
    let epoch = misc::compute_epoch_at_slot::<P>(slot);
    let relative_epoch = relative_epoch(state, epoch)?;
    let committees_per_slot = get_committee_count_per_slot(state, relative_epoch)?;

    ensure!(
        committee_index < committees_per_slot,
        Error::CommitteeIndexOutOfBounds {
            index: committee_index,
            count: committees_per_slot,
        },
    );

    let indices = active_validator_indices_shuffled(state, relative_epoch)?;

    let committees_in_epoch = committees_per_slot
        .mul(P::SlotsPerEpoch::U64)
        .pipe(NonZeroU64::new)
        .unwrap_or_else(P::SlotsPerEpoch::non_zero);

    let index_in_epoch =
        misc::slots_since_epoch_start::<P>(slot) * committees_per_slot + committee_index;

    let range = misc::committee_range(indices.len(), index_in_epoch, committees_in_epoch)?;

    Ok(&indices[range])
}

pub fn beacon_committees<P: Preset>(
    state: &BeaconState<P>,
    slot: Slot,
) -> Result<impl Iterator<Item = Result<&[ValidatorIndex]>>> {
    let committees_per_slot = committee_count_at_slot(state, slot)?;

    Ok((0..committees_per_slot)
        .map(move |committee_index| beacon_committee(state, slot, committee_index)))
}

// > Return the beacon proposer index at the current slot.
pub fn get_beacon_proposer_index<P: Preset>(state: &BeaconState<P>) -> Result<ValidatorIndex> {
    state
        .cache
        .proposer_index
        .get_or_try_init(|| {
            let epoch = get_current_epoch(state);
            let epoch_seed = get_seed(state, epoch, DOMAIN_BEACON_PROPOSER);
            let seed = hashing::hash_256_64(epoch_seed, state.slot);
            let indices = active_validator_indices_ordered(state, RelativeEpoch::Current);

            misc::compute_proposer_index(state, indices, seed)
        })
        .copied()
}

// > Return the signature domain (fork version concatenated with domain type) of a message.
#[must_use]
pub fn get_domain<P: Preset>(
    config: &Config,
    state: &BeaconState<P>,
    domain_type: DomainType,
    epoch: Option<Epoch>,
) -> H256 {
    let epoch = epoch.unwrap_or_else(|| get_current_epoch(state));
    let fork = state.fork;

    let fork_version = if epoch < fork.epoch {
        fork.previous_version
    } else {
        fork.current_version
    };

    misc::compute_domain(
        config,
        domain_type,
        Some(fork_version),
        Some(state.genesis_validators_root),
    )
}

// > Return the indexed attestation corresponding to ``attestation``.
pub fn get_indexed_attestation<P: Preset>(
    state: &BeaconState<P>,
    attestation: &Attestation<P>,
) -> Result<IndexedAttestation<P>> {
    let attesting_indices_iter =
        get_attesting_indices(state, attestation.data, &attestation.aggregation_bits)?;

    let mut attesting_indices = ContiguousList::try_from_iter(attesting_indices_iter)?;

    // Sorting a slice is faster than building a `BTreeSet`.
    attesting_indices.sort_unstable();

    Ok(IndexedAttestation {
        attesting_indices,
        data: attestation.data,
        signature: attestation.signature,
    })
}

// > Return the set of attesting indices corresponding to ``data`` and ``bits``.
pub fn get_attesting_indices<'all, P: Preset>(
    state: &'all BeaconState<P>,
    attestation_data: AttestationData,
    aggregation_bits: &'all BitList<P::MaxValidatorsPerCommittee>,
) -> Result<impl Iterator<Item = ValidatorIndex> + 'all> {
    let committee = beacon_committee(state, attestation_data.slot, attestation_data.index)?;

    ensure!(
        committee.len() == aggregation_bits.len(),
        Error::CommitteeLengthMismatch {
            aggregation_bitlist_length: aggregation_bits.len(),
            committee_length: committee.len(),
        },
    );

    aggregation_bits
        .iter()
        .by_vals()
        .zip(committee.iter().copied())
        .filter_map(|(present, validator_index)| present.then_some(validator_index))
        .pipe(Ok)
}

// > Return the combined effective balance of the ``indices``.
// > ``EFFECTIVE_BALANCE_INCREMENT`` Gwei minimum to avoid divisions by zero.
pub fn get_total_balance<P: Preset>(
    state: &BeaconState<P>,
    indices: impl IntoIterator<Item = ValidatorIndex>,
) -> Result<NonZeroU64> {
    let mut total = 0;

    for validator_index in indices {
        total += state.validators.get(validator_index)?.effective_balance;
    }

    Ok(NonZeroU64::new(total)
        .unwrap_or(P::EFFECTIVE_BALANCE_INCREMENT)
        .max(P::EFFECTIVE_BALANCE_INCREMENT))
}

// > Return the combined effective balance of the active validators.
pub fn total_active_balance<P: Preset>(state: &BeaconState<P>) -> Result<NonZeroU64> {
    state.cache.total_active_balance[RelativeEpoch::Current]
        .get_or_try_init(|| {
            let indices = active_validator_indices_ordered(state, RelativeEpoch::Current);
            get_total_balance(state, indices.iter().copied())
        })
        .copied()
}

pub fn get_base_reward<P: Preset>(
    state: &BeaconState<P>,
    validator_index: ValidatorIndex,
) -> Result<Gwei> {
    let effective_balance = state.validators.get(validator_index)?.effective_balance;
    let total_active_balance = total_active_balance(state)?;

    Ok(compute_base_reward::<P>(effective_balance, total_active_balance))
}

#[must_use]
pub fn compute_base_reward<P: Preset>(
    effective_balance: Gwei,
    total_active_balance: NonZeroU64,
) -> Gwei {
    // The square root of a nonzero number is nonzero.
    let square_root = total_active_balance.get().sqrt().max(1);

    effective_balance
        .mul(P::BASE_REWARD_FACTOR)
        .div(square_root)
        .div(BASE_REWARDS_PER_EPOCH)
}

/// Validators that attested to both conflicting attestations, in ascending order.
pub fn slashable_indices(
    attester_slashing: &AttesterSlashing<impl Preset>,
) -> impl Iterator<Item = ValidatorIndex> + '_ {
    let attesting_indices_1 = attester_slashing
        .attestation_1
        .attesting_indices
        .iter()
        .copied();

    let attesting_indices_2 = attester_slashing
        .attestation_2
        .attesting_indices
        .iter()
        .copied();

    attesting_indices_1
        .merge_join_by(attesting_indices_2, Ord::cmp)
        .filter_map(|either_or_both| match either_or_both {
            EitherOrBoth::Both(validator_index, _) => Some(validator_index),
            _ => None,
        })
}

/// Initialize shufflings required to compute attestation committees.
///
/// Shuffled validator indices are stored in a `once_cell::sync::OnceCell`. If attestations from
/// both epochs are about to be validated, computing both shufflings up front lets them be built in
/// parallel instead of one after the other.
pub fn initialize_shuffled_indices<'attestations, P: Preset>(
    state: &BeaconState<P>,
    attestations: impl IntoIterator<Item = &'attestations Attestation<P>>,
) -> Result<()> {
    let shuffled = &state.cache.active_validator_indices_shuffled;
    let have_previous = shuffled[RelativeEpoch::Previous].get().is_some();
    let have_current = shuffled[RelativeEpoch::Current].get().is_some();

    if have_previous && have_current {
        return Ok(());
    }

    let mut need_previous = false;
    let mut need_current = false;

    for attestation in attestations {
        match attestation_epoch(state, attestation.data.target.epoch)? {
            AttestationEpoch::Previous => need_previous = true,
            AttestationEpoch::Current => need_current = true,
        }
    }

    let initialize_previous =
        || active_validator_indices_shuffled(state, RelativeEpoch::Previous).map(drop);

    let initialize_current =
        || active_validator_indices_shuffled(state, RelativeEpoch::Current).map(drop);

    match (need_previous && !have_previous, need_current && !have_current) {
        (true, true) => {
            let (previous, current) = rayon::join(initialize_previous, initialize_current);
            previous?;
            current?;
        }
        (true, false) => initialize_previous()?,
        (false, true) => initialize_current()?,
        (false, false) => {}
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use types::{
        phase0::{consts::FAR_FUTURE_EPOCH, primitives::Version},
        phase1::containers::Validator,
        preset::Minimal,
    };

    use super::*;

    fn active_validator() -> Validator {
        Validator {
            effective_balance: Minimal::MAX_EFFECTIVE_BALANCE,
            exit_epoch: FAR_FUTURE_EPOCH,
            withdrawable_epoch: FAR_FUTURE_EPOCH,
            ..Validator::default()
        }
    }

    fn state_with_validators(slot: Slot, count: usize) -> Result<BeaconState<Minimal>> {
        Ok(BeaconState {
            slot,
            validators: vec![active_validator(); count].try_into()?,
            balances: vec![Minimal::MAX_EFFECTIVE_BALANCE; count].try_into()?,
            ..BeaconState::default()
        })
    }

    #[test]
    fn current_epoch_at_genesis() {
        let state = BeaconState::<Minimal>::default();

        assert_eq!(get_current_epoch(&state), GENESIS_EPOCH);
        assert_eq!(get_previous_epoch(&state), GENESIS_EPOCH);
    }

    #[test]
    fn epochs_relative_to_state() {
        let state = BeaconState::<Minimal> {
            slot: 35,
            ..BeaconState::default()
        };

        assert_eq!(get_current_epoch(&state), 4);
        assert_eq!(get_previous_epoch(&state), 3);
        assert_eq!(get_next_epoch(&state), 5);
    }

    #[test]
    fn relative_epoch_rejects_distant_epochs() {
        let state = BeaconState::<Minimal> {
            slot: 35,
            ..BeaconState::default()
        };

        assert_eq!(relative_epoch(&state, 3).ok(), Some(RelativeEpoch::Previous));
        assert_eq!(relative_epoch(&state, 5).ok(), Some(RelativeEpoch::Next));
        assert!(relative_epoch(&state, 2).is_err());
        assert!(relative_epoch(&state, 6).is_err());
        assert!(attestation_epoch(&state, 5).is_err());
    }

    #[test]
    fn block_root_at_start_of_previous_epoch() -> Result<()> {
        let mut state = BeaconState::<Minimal> {
            slot: 20,
            ..BeaconState::default()
        };

        for byte in 0..19 {
            *state.block_roots.mod_index_mut(byte.into()) = H256::repeat_byte(byte);
        }

        assert_eq!(get_block_root(&state, 1)?, H256::repeat_byte(8));

        Ok(())
    }

    #[test]
    fn block_root_at_current_slot_is_unavailable() {
        let state = BeaconState::<Minimal> {
            slot: 2,
            ..BeaconState::default()
        };

        assert!(get_block_root_at_slot(&state, 1).is_ok());
        assert!(get_block_root_at_slot(&state, 2).is_err());
    }

    #[test]
    fn churn_limit_has_a_minimum() -> Result<()> {
        let config = Config::minimal();
        let state = BeaconState::<Minimal>::default();

        assert_eq!(
            get_validator_churn_limit(&config, &state)?,
            config.min_per_epoch_churn_limit,
        );

        Ok(())
    }

    #[test]
    fn active_validator_indices_skip_exited_validators() -> Result<()> {
        let state = BeaconState::<Minimal> {
            slot: 28,
            validators: vec![
                Validator {
                    exit_epoch: 10,
                    ..Validator::default()
                },
                Validator {
                    exit_epoch: 1,
                    ..Validator::default()
                },
                Validator {
                    exit_epoch: 10,
                    ..Validator::default()
                },
            ]
            .try_into()?,
            ..BeaconState::default()
        };

        itertools::assert_equal(get_active_validator_indices(&state, 3), [0, 2]);
        assert_eq!(active_validator_indices_ordered(&state, RelativeEpoch::Current), [0, 2]);

        Ok(())
    }

    #[test]
    fn committees_of_a_slot_partition_its_share_of_validators() -> Result<()> {
        let state = state_with_validators(0, 64)?;

        let committees_per_slot = committee_count_at_slot(&state, 0)?;

        assert_eq!(committees_per_slot, 2);

        let members = (0..<Minimal as Preset>::SlotsPerEpoch::U64)
            .flat_map(|slot| (0..committees_per_slot).map(move |index| (slot, index)))
            .map(|(slot, index)| beacon_committee(&state, slot, index))
            .flatten_ok()
            .collect::<Result<Vec<_>>>()?;

        itertools::assert_equal(members.into_iter().copied().sorted(), 0..64);

        assert!(beacon_committee(&state, 0, committees_per_slot).is_err());

        Ok(())
    }

    #[test]
    fn attesting_indices_follow_aggregation_bits() -> Result<()> {
        let state = state_with_validators(0, 64)?;
        let committee = beacon_committee(&state, 1, 0)?.to_vec();

        let mut aggregation_bits = BitList::with_length(committee.len())?;
        aggregation_bits.set(0, true);
        aggregation_bits.set(2, true);

        let data = AttestationData {
            slot: 1,
            ..AttestationData::default()
        };

        let attestation = Attestation {
            aggregation_bits,
            data,
            ..Attestation::default()
        };

        let indexed_attestation = get_indexed_attestation(&state, &attestation)?;

        itertools::assert_equal(
            indexed_attestation.attesting_indices.iter().copied(),
            [committee[0], committee[2]].into_iter().sorted(),
        );

        let too_short = BitList::with_length(committee.len() - 1)?;

        assert!(get_attesting_indices(&state, data, &too_short).is_err());

        Ok(())
    }

    #[test]
    fn total_balance_has_a_minimum() -> Result<()> {
        let state = BeaconState::<Minimal>::default();

        assert_eq!(
            get_total_balance(&state, [])?,
            Minimal::EFFECTIVE_BALANCE_INCREMENT,
        );

        Ok(())
    }

    #[test]
    fn base_reward_scales_with_effective_balance() -> Result<()> {
        let state = state_with_validators(0, 64)?;
        let total = total_active_balance(&state)?;

        assert_eq!(total.get(), 64 * Minimal::MAX_EFFECTIVE_BALANCE);

        let expected = Minimal::MAX_EFFECTIVE_BALANCE * Minimal::BASE_REWARD_FACTOR
            / total.get().sqrt()
            / BASE_REWARDS_PER_EPOCH.get();

        assert_eq!(get_base_reward(&state, 0)?, expected);

        Ok(())
    }

    #[test]
    fn proposer_is_cached_until_slot_advances() -> Result<()> {
        let mut state = state_with_validators(0, 64)?;

        let proposer_index = get_beacon_proposer_index(&state)?;

        assert_eq!(state.cache.proposer_index.get(), Some(&proposer_index));

        state.slot = 1;
        state.cache.advance_slot();

        assert!(state.cache.proposer_index.get().is_none());
        assert!(get_beacon_proposer_index(&state)? < 64);

        Ok(())
    }

    #[test]
    fn domain_uses_previous_version_before_fork_epoch() {
        let config = Config::minimal();

        let previous_version = Version::repeat_byte(1);

        let mut state = BeaconState::<Minimal>::default();
        state.fork.previous_version = previous_version;
        state.fork.current_version = Version::repeat_byte(2);
        state.fork.epoch = 2;

        let before = get_domain(&config, &state, DOMAIN_BEACON_ATTESTER, Some(1));
        let after = get_domain(&config, &state, DOMAIN_BEACON_ATTESTER, Some(2));

        assert_eq!(
            before,
            misc::compute_domain(
                &config,
                DOMAIN_BEACON_ATTESTER,
                Some(previous_version),
                Some(H256::zero()),
            ),
        );
        assert_ne!(before, after);
    }
}
