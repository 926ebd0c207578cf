//! Helpers for the shard layer added in phase 1.

use core::{cmp::Ordering, num::NonZeroU64};

use anyhow::{ensure, Result};
use arithmetic::U64Ext as _;
use bls::{PublicKey, SignatureBytes};
use itertools::Itertools as _;
use types::{
    config::Config,
    phase0::primitives::{CommitteeIndex, Epoch, Gwei, Slot, ValidatorIndex, H256},
    phase1::{
        beacon_state::BeaconState,
        consts::{
            DOMAIN_SHARD_COMMITTEE, GASPRICE_ADJUSTMENT_COEFFICIENT, MAX_GASPRICE, MIN_GASPRICE,
            SHARD_BLOCK_OFFSETS, TARGET_SHARD_BLOCK_SIZE,
        },
        containers::{AttestationData, PendingAttestation},
        primitives::Shard,
    },
    preset::Preset,
};

use crate::{
    accessors::{
        committee_count_at_slot, get_active_validator_indices, get_current_epoch, get_seed,
    },
    error::{Error, SignatureKind},
    misc::{compute_committee, compute_epoch_at_slot, compute_start_slot_at_epoch},
    predicates::is_active_validator,
    verifier::{SingleVerifier, Verifier as _},
};

#[inline]
#[must_use]
pub const fn compute_previous_slot(slot: Slot) -> Slot {
    slot.saturating_sub(1)
}

// > Return the number of active shards.
// > Note that this puts an upper bound on the number of committees per slot.
#[inline]
#[must_use]
pub const fn get_active_shard_count<P: Preset>() -> NonZeroU64 {
    P::INITIAL_ACTIVE_SHARDS
}

// > Return the sum of committee counts in range ``[start_slot, stop_slot)``.
pub fn get_committee_count_delta<P: Preset>(
    state: &BeaconState<P>,
    start_slot: Slot,
    stop_slot: Slot,
) -> Result<u64> {
    (start_slot..stop_slot)
        .map(|slot| committee_count_at_slot(state, slot))
        .sum()
}

// > Return the start shard at ``slot``.
pub fn get_start_shard<P: Preset>(state: &BeaconState<P>, slot: Slot) -> Result<Shard> {
    let current_epoch_start_slot = compute_start_slot_at_epoch::<P>(get_current_epoch(state));
    let active_shard_count = get_active_shard_count::<P>();
    let start_shard = state.current_epoch_start_shard;

    let shard = match slot.cmp(&current_epoch_start_slot) {
        Ordering::Equal => start_shard,
        Ordering::Greater => {
            let shard_delta = get_committee_count_delta(state, current_epoch_start_slot, slot)?;
            (start_shard + shard_delta) % active_shard_count
        }
        Ordering::Less => {
            let shard_delta = get_committee_count_delta(state, slot, current_epoch_start_slot)?;
            let shard_delta = shard_delta % active_shard_count;
            (start_shard + active_shard_count.get() - shard_delta) % active_shard_count
        }
    };

    Ok(shard)
}

pub fn compute_shard_from_committee_index<P: Preset>(
    state: &BeaconState<P>,
    committee_index: CommitteeIndex,
    slot: Slot,
) -> Result<Shard> {
    let active_shard_count = get_active_shard_count::<P>();
    Ok((committee_index + get_start_shard(state, slot)?) % active_shard_count)
}

/// Slots at which shard blocks may be proposed after `start_slot` and before `end_slot`.
#[must_use]
pub fn compute_offset_slots(start_slot: Slot, end_slot: Slot) -> Vec<Slot> {
    // The offsets are increasing, so the first one past `end_slot` ends the sequence.
    SHARD_BLOCK_OFFSETS
        .into_iter()
        .map(|offset| start_slot + offset)
        .take_while(|slot| *slot < end_slot)
        .collect()
}

pub fn get_offset_slots<P: Preset>(state: &BeaconState<P>, shard: Shard) -> Result<Vec<Slot>> {
    let shard_state = state.shard_states.get(shard)?;
    Ok(compute_offset_slots(shard_state.slot, state.slot))
}

#[must_use]
pub fn compute_updated_gasprice(prev_gasprice: Gwei, shard_block_length: u64) -> Gwei {
    let target = TARGET_SHARD_BLOCK_SIZE.get();

    if shard_block_length > target {
        let delta = prev_gasprice.saturating_mul(shard_block_length - target)
            / TARGET_SHARD_BLOCK_SIZE
            / GASPRICE_ADJUSTMENT_COEFFICIENT;

        prev_gasprice.saturating_add(delta).min(MAX_GASPRICE)
    } else {
        let delta = prev_gasprice.saturating_mul(target - shard_block_length)
            / TARGET_SHARD_BLOCK_SIZE
            / GASPRICE_ADJUSTMENT_COEFFICIENT;

        prev_gasprice.max(MIN_GASPRICE + delta) - delta
    }
}

// > Return the source epoch for computing the committee.
#[must_use]
pub fn compute_committee_source_epoch(epoch: Epoch, period: NonZeroU64) -> Epoch {
    let source_epoch = epoch.prev_multiple_of(period);

    // > `period` epochs lookahead
    if source_epoch >= period.get() {
        source_epoch - period.get()
    } else {
        source_epoch
    }
}

/// Validators active in the current epoch that have had an attestation included recently.
pub fn get_online_validator_indices<P: Preset>(
    state: &BeaconState<P>,
) -> impl Iterator<Item = ValidatorIndex> + '_ {
    let current_epoch = get_current_epoch(state);

    state
        .validators
        .iter()
        .zip(state.online_countdown.iter())
        .zip(0..)
        .filter(move |((validator, countdown), _)| {
            is_active_validator(validator, current_epoch) && **countdown != 0
        })
        .map(|(_, validator_index)| validator_index)
}

// > Return the shard committee of the given ``epoch`` of the given ``shard``.
pub fn get_shard_committee<P: Preset>(
    config: &Config,
    state: &BeaconState<P>,
    epoch: Epoch,
    shard: Shard,
) -> Result<Vec<ValidatorIndex>> {
    let period =
        NonZeroU64::new(config.shard_committee_period).ok_or(Error::ShardCommitteePeriodZero)?;

    let source_epoch = compute_committee_source_epoch(epoch, period);
    let active_validator_indices = get_active_validator_indices(state, source_epoch).collect_vec();
    let seed = get_seed(state, source_epoch, DOMAIN_SHARD_COMMITTEE);

    compute_committee::<P>(
        &active_validator_indices,
        seed,
        shard,
        get_active_shard_count::<P>(),
    )
}

// > Return the proposer's index of shard block at ``slot``.
pub fn get_shard_proposer_index<P: Preset>(
    config: &Config,
    state: &BeaconState<P>,
    slot: Slot,
    shard: Shard,
) -> Result<ValidatorIndex> {
    let epoch = compute_epoch_at_slot::<P>(slot);
    let committee = get_shard_committee(config, state, epoch, shard)?;

    ensure!(!committee.is_empty(), Error::ShardCommitteeEmpty { shard });

    let seed = get_seed(state, epoch, DOMAIN_SHARD_COMMITTEE);
    let mut random_bytes = [0; 8];
    random_bytes.copy_from_slice(&seed.as_bytes()[..8]);

    let random = u64::from_le_bytes(random_bytes);
    let position = random % u64::try_from(committee.len())?;

    Ok(committee[usize::try_from(position)?])
}

// > Check if the given attestation_data is on-time.
#[must_use]
pub fn is_on_time_attestation<P: Preset>(
    state: &BeaconState<P>,
    attestation_data: AttestationData,
) -> bool {
    attestation_data.slot == compute_previous_slot(state.slot)
}

// > Check if the given attestation is for the winning shard transition root.
#[must_use]
pub fn is_winning_attestation<P: Preset>(
    state: &BeaconState<P>,
    attestation: &PendingAttestation<P>,
    committee_index: CommitteeIndex,
    winning_root: H256,
) -> bool {
    let data = attestation.data;

    is_on_time_attestation(state, data)
        && data.index == committee_index
        && data.shard_transition_root == winning_root
}

/// Verifies an aggregate over distinct messages that may have no signers at all.
#[must_use]
pub fn optional_aggregate_verify(
    public_keys: &[PublicKey],
    messages: &[H256],
    signature: SignatureBytes,
) -> bool {
    SingleVerifier
        .verify_optional_aggregate(messages, signature, public_keys, SignatureKind::ShardProposals)
        .is_ok()
}

/// Custody periods are staggered so that validators do not all reveal in the same epoch.
#[must_use]
pub fn get_custody_period_for_validator<P: Preset>(
    validator_index: ValidatorIndex,
    epoch: Epoch,
) -> u64 {
    let period = P::EPOCHS_PER_CUSTODY_PERIOD;
    (epoch + validator_index % period) / period
}
