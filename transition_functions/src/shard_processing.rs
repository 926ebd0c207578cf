//! Folding of shard chain progress into the beacon state.
//!
//! Each block may carry one [`ShardTransition`] per shard. A transition is applied when the online
//! members of the committee assigned to its shard in the previous slot attested to its root with
//! at least two thirds of their balance. Every other transition in the block must be empty.

use std::collections::BTreeSet;

use anyhow::{ensure, Result};
use helper_functions::{
    accessors::{
        beacon_committee, committee_count_at_slot, get_attesting_indices, get_base_reward,
        get_beacon_proposer_index, get_block_root_at_slot, get_total_balance, public_key,
    },
    error::SignatureKind,
    mutators::{balance, decrease_balance, increase_balance},
    phase1::{
        compute_previous_slot, compute_shard_from_committee_index, compute_updated_gasprice,
        get_active_shard_count, get_offset_slots, get_online_validator_indices,
        get_shard_proposer_index, is_on_time_attestation, is_winning_attestation,
    },
    signing::SignForSingleFork as _,
    verifier::Verifier,
};
use itertools::{izip, Itertools as _};
use ssz::SszHash as _;
use types::{
    config::Config,
    phase0::{
        consts::GENESIS_SLOT,
        primitives::{CommitteeIndex, Gwei, H256},
    },
    phase1::{
        beacon_state::BeaconState,
        containers::{Attestation, ShardBlockHeader, ShardTransition},
        primitives::Shard,
    },
    preset::Preset,
};

use crate::error::Error;

pub fn process_shard_transitions<P: Preset>(
    config: &Config,
    state: &mut BeaconState<P>,
    shard_transitions: &[ShardTransition],
    attestations: &[Attestation<P>],
    verifier: impl Verifier,
) -> Result<()> {
    // > Process crosslinks
    process_crosslinks(config, state, shard_transitions, attestations, verifier)?;

    // > Verify the empty proposal shard states
    verify_empty_shard_transitions(state, shard_transitions)
}

pub fn process_crosslinks<P: Preset>(
    config: &Config,
    state: &mut BeaconState<P>,
    shard_transitions: &[ShardTransition],
    attestations: &[Attestation<P>],
    mut verifier: impl Verifier,
) -> Result<()> {
    let on_time_attestation_slot = compute_previous_slot(state.slot);
    let committee_count = committee_count_at_slot(state, on_time_attestation_slot)?;

    for committee_index in 0..committee_count {
        // > All attestations in the block for this committee/shard and current slot
        let shard =
            compute_shard_from_committee_index(state, committee_index, on_time_attestation_slot)?;

        let transition = shard_transition::<P>(shard_transitions, shard)?;

        let shard_attestations = attestations
            .iter()
            .filter(|attestation| {
                is_on_time_attestation(state, attestation.data)
                    && attestation.data.index == committee_index
            })
            .collect_vec();

        let winning_root = process_crosslink_for_shard(
            config,
            state,
            committee_index,
            transition,
            &shard_attestations,
            &mut verifier,
        )?;

        if winning_root.is_zero() {
            continue;
        }

        // > If it will be a successful crosslink, set `crosslink_success` as true
        let winning_positions = state
            .current_epoch_attestations
            .iter()
            .positions(|pending_attestation| {
                is_winning_attestation(state, pending_attestation, committee_index, winning_root)
            })
            .collect_vec();

        for position in winning_positions {
            state.current_epoch_attestations[position].crosslink_success = true;
        }
    }

    Ok(())
}

/// Returns the root of the applied transition or [`H256::zero`] if there was no winner.
pub fn process_crosslink_for_shard<P: Preset>(
    config: &Config,
    state: &mut BeaconState<P>,
    committee_index: CommitteeIndex,
    shard_transition: &ShardTransition,
    attestations: &[&Attestation<P>],
    mut verifier: impl Verifier,
) -> Result<H256> {
    let on_time_attestation_slot = compute_previous_slot(state.slot);
    let shard =
        compute_shard_from_committee_index(state, committee_index, on_time_attestation_slot)?;

    let online_indices = get_online_validator_indices(state).collect::<BTreeSet<_>>();

    let online_committee_balance = get_total_balance(
        state,
        beacon_committee(state, on_time_attestation_slot, committee_index)?
            .iter()
            .copied()
            .filter(|validator_index| online_indices.contains(validator_index)),
    )?;

    // > Loop over all shard transition roots
    let shard_transition_roots = attestations
        .iter()
        .map(|attestation| attestation.data.shard_transition_root)
        .sorted()
        .dedup();

    for shard_transition_root in shard_transition_roots {
        let transition_attestations = attestations
            .iter()
            .copied()
            .filter(|attestation| attestation.data.shard_transition_root == shard_transition_root)
            .collect_vec();

        let mut transition_participants = BTreeSet::new();

        for attestation in &transition_attestations {
            transition_participants.extend(get_attesting_indices(
                state,
                attestation.data,
                &attestation.aggregation_bits,
            )?);
        }

        let online_participant_balance = get_total_balance(
            state,
            transition_participants
                .intersection(&online_indices)
                .copied(),
        )?;

        // > If not enough stake, try next transition root
        if online_participant_balance.get() * 3 < online_committee_balance.get() * 2 {
            continue;
        }

        // > Attestation <-> shard transition consistency
        let computed = shard_transition.hash_tree_root();

        ensure!(
            computed == shard_transition_root,
            Error::<P>::ShardTransitionRootMismatch {
                computed,
                in_attestation: shard_transition_root,
            },
        );

        // > Check `shard_head_root` of the winning root
        let shard_head_root = shard_transition
            .shard_states
            .last()
            .map(|shard_state| shard_state.latest_block_root)
            .ok_or(Error::<P>::ShardTransitionWithoutStates { shard })?;

        for attestation in transition_attestations {
            ensure!(
                attestation.data.shard_head_root == shard_head_root,
                Error::<P>::ShardHeadRootMismatch {
                    computed: shard_head_root,
                    in_attestation: attestation.data.shard_head_root,
                },
            );
        }

        // Shard block proposers are charged for the slots the transition covers.
        // Those must be computed before the transition moves the shard state forward.
        let offset_slots = get_offset_slots(state, shard)?;

        // > Apply transition
        apply_shard_transition(config, state, shard, shard_transition, &mut verifier)?;

        // > Apply proposer reward and cost
        let beacon_proposer_index = get_beacon_proposer_index(state)?;

        let estimated_attester_reward = transition_participants
            .iter()
            .map(|validator_index| get_base_reward(state, *validator_index))
            .sum::<Result<Gwei>>()?;

        let proposer_reward = estimated_attester_reward / P::PROPOSER_REWARD_QUOTIENT;

        increase_balance(balance(state, beacon_proposer_index)?, proposer_reward);

        for (shard_state, slot, length) in izip!(
            &shard_transition.shard_states,
            offset_slots,
            shard_transition.shard_block_lengths.iter().copied(),
        ) {
            let proposer_index = get_shard_proposer_index(config, state, slot, shard)?;
            let cost = shard_state.gasprice.saturating_mul(length);

            decrease_balance(balance(state, proposer_index)?, cost);
        }

        // > Return winning transition root
        return Ok(shard_transition_root);
    }

    // > No winning transition root, ensure empty and return empty root
    ensure!(
        shard_transition.is_empty(),
        Error::<P>::ShardTransitionNotEmpty { shard },
    );

    Ok(H256::zero())
}

pub fn apply_shard_transition<P: Preset>(
    config: &Config,
    state: &mut BeaconState<P>,
    shard: Shard,
    transition: &ShardTransition,
    mut verifier: impl Verifier,
) -> Result<()> {
    ensure!(state.slot > GENESIS_SLOT, Error::<P>::ShardTransitionAtGenesis);

    // > Correct data root count
    let offset_slots = get_offset_slots(state, shard)?;

    let lengths_match = [
        transition.shard_data_roots.len(),
        transition.shard_states.len(),
        transition.shard_block_lengths.len(),
    ]
    .into_iter()
    .all(|length| length == offset_slots.len());

    ensure!(
        lengths_match,
        Error::<P>::ShardTransitionLengthMismatch {
            data_roots: transition.shard_data_roots.len(),
            states: transition.shard_states.len(),
            block_lengths: transition.shard_block_lengths.len(),
            offset_slots: offset_slots.len(),
        },
    );

    let computed = offset_slots.first().copied();

    ensure!(
        computed == Some(transition.start_slot),
        Error::<P>::ShardTransitionStartSlotMismatch {
            computed,
            in_transition: transition.start_slot,
        },
    );

    let previous_shard_state = *state.shard_states.get(shard)?;
    let mut previous_gasprice = previous_shard_state.gasprice;
    let mut shard_parent_root = previous_shard_state.latest_block_root;

    let mut signing_roots = vec![];
    let mut public_keys = vec![];

    for (offset_slot, shard_block_length, shard_state, shard_data_root) in izip!(
        offset_slots,
        transition.shard_block_lengths.iter().copied(),
        transition.shard_states.iter().copied(),
        transition.shard_data_roots.iter().copied(),
    ) {
        // > Verify correct calculation of gas prices and slots
        let computed = compute_updated_gasprice(previous_gasprice, shard_block_length);

        ensure!(
            shard_state.gasprice == computed,
            Error::<P>::ShardStateGaspriceMismatch {
                computed,
                in_transition: shard_state.gasprice,
            },
        );

        ensure!(
            shard_state.slot == offset_slot,
            Error::<P>::ShardStateSlotMismatch {
                computed: offset_slot,
                in_transition: shard_state.slot,
            },
        );

        if shard_block_length == 0 {
            // > Must have a stub for `shard_data_root` if empty slot
            ensure!(
                shard_data_root.is_zero(),
                Error::<P>::EmptyShardBlockHasDataRoot {
                    slot: offset_slot,
                    shard_data_root,
                },
            );
        } else {
            let proposer_index = get_shard_proposer_index(config, state, offset_slot, shard)?;

            // > Reconstruct shard headers
            let header = ShardBlockHeader {
                shard_parent_root,
                beacon_parent_root: get_block_root_at_slot(state, offset_slot)?,
                slot: offset_slot,
                shard,
                proposer_index,
                body_root: shard_data_root,
            };

            shard_parent_root = header.hash_tree_root();

            signing_roots.push(header.signing_root(config, state));
            public_keys.push(*public_key(state, proposer_index)?.decompress()?);
        }

        previous_gasprice = shard_state.gasprice;
    }

    // > Verify combined proposer signature
    verifier.verify_optional_aggregate(
        &signing_roots,
        transition.proposer_signature_aggregate,
        &public_keys,
        SignatureKind::ShardProposals,
    )?;

    // > Copy and save updated shard state
    let mut shard_state = transition
        .shard_states
        .last()
        .copied()
        .ok_or(Error::<P>::ShardTransitionWithoutStates { shard })?;

    shard_state.slot = compute_previous_slot(state.slot);

    *state.shard_states.get_mut(shard)? = shard_state;

    Ok(())
}

pub fn verify_empty_shard_transitions<P: Preset>(
    state: &BeaconState<P>,
    shard_transitions: &[ShardTransition],
) -> Result<()> {
    let previous_slot = compute_previous_slot(state.slot);

    for shard in 0..get_active_shard_count::<P>().get() {
        if state.shard_states.get(shard)?.slot == previous_slot {
            continue;
        }

        ensure!(
            shard_transition::<P>(shard_transitions, shard)?.is_empty(),
            Error::<P>::ShardTransitionNotEmpty { shard },
        );
    }

    Ok(())
}

fn shard_transition<P: Preset>(
    shard_transitions: &[ShardTransition],
    shard: Shard,
) -> Result<&ShardTransition> {
    let transition = usize::try_from(shard)
        .ok()
        .and_then(|index| shard_transitions.get(index))
        .ok_or(Error::<P>::ShardOutOfBounds { shard })?;

    Ok(transition)
}

#[cfg(test)]
mod tests {
    use helper_functions::{
        accessors::beacon_committee,
        verifier::{NullVerifier, SingleVerifier},
    };
    use ssz::{BitList, ContiguousList};
    use types::{
        phase0::consts::FAR_FUTURE_EPOCH,
        phase1::{
            consts::{MIN_GASPRICE, ONLINE_PERIOD},
            containers::{AttestationData, PendingAttestation, ShardState, Validator},
        },
        preset::Minimal,
    };

    use super::*;

    const MAX: Gwei = Minimal::MAX_EFFECTIVE_BALANCE;

    fn state_at_slot(slot: u64) -> Result<BeaconState<Minimal>> {
        let validator = Validator {
            effective_balance: MAX,
            exit_epoch: FAR_FUTURE_EPOCH,
            withdrawable_epoch: FAR_FUTURE_EPOCH,
            ..Validator::default()
        };

        let shard_state = ShardState {
            gasprice: MIN_GASPRICE,
            ..ShardState::default()
        };

        Ok(BeaconState {
            slot,
            validators: vec![validator; 64].try_into()?,
            balances: vec![MAX; 64].try_into()?,
            online_countdown: vec![ONLINE_PERIOD; 64].try_into()?,
            shard_states: vec![shard_state; 4].try_into()?,
            ..BeaconState::default()
        })
    }

    // Shard blocks are empty, so no proposer signatures are needed.
    fn transition_with_empty_blocks(state: &BeaconState<Minimal>) -> Result<ShardTransition> {
        let offset_slots = get_offset_slots(state, 0)?;
        let mut gasprice = MIN_GASPRICE;

        let shard_states = offset_slots
            .iter()
            .map(|slot| {
                gasprice = compute_updated_gasprice(gasprice, 0);

                ShardState {
                    slot: *slot,
                    gasprice,
                    latest_block_root: H256::zero(),
                }
            })
            .collect_vec();

        Ok(ShardTransition {
            start_slot: offset_slots[0],
            shard_block_lengths: ContiguousList::try_from(vec![0; offset_slots.len()])?,
            shard_data_roots: ContiguousList::try_from(vec![H256::zero(); offset_slots.len()])?,
            shard_states: ContiguousList::try_from(shard_states)?,
            ..ShardTransition::default()
        })
    }

    #[test]
    fn transition_with_empty_blocks_advances_shard_state() -> Result<()> {
        let config = Config::minimal();
        let mut state = state_at_slot(3)?;
        let transition = transition_with_empty_blocks(&state)?;

        apply_shard_transition(&config, &mut state, 0, &transition, SingleVerifier)?;

        let shard_state = state.shard_states.get(0)?;
        let expected_gasprice = transition.shard_states.last().map(|state| state.gasprice);

        assert_eq!(shard_state.slot, 2);
        assert_eq!(Some(shard_state.gasprice), expected_gasprice);

        Ok(())
    }

    #[test]
    fn transition_with_wrong_start_slot_is_rejected() -> Result<()> {
        let config = Config::minimal();
        let mut state = state_at_slot(3)?;

        let transition = ShardTransition {
            start_slot: 2,
            ..transition_with_empty_blocks(&state)?
        };

        let result = apply_shard_transition(&config, &mut state, 0, &transition, NullVerifier);

        assert!(result.is_err_and(|error| matches!(
            error.downcast_ref(),
            Some(Error::<Minimal>::ShardTransitionStartSlotMismatch {
                computed: Some(1),
                in_transition: 2,
            }),
        )));

        Ok(())
    }

    #[test]
    fn transition_is_not_applied_in_genesis_slot() -> Result<()> {
        let config = Config::minimal();
        let mut state = state_at_slot(0)?;

        let result = apply_shard_transition(
            &config,
            &mut state,
            0,
            &ShardTransition::default(),
            NullVerifier,
        );

        assert!(result.is_err_and(|error| matches!(
            error.downcast_ref(),
            Some(Error::<Minimal>::ShardTransitionAtGenesis),
        )));

        Ok(())
    }

    #[test]
    fn shards_without_crosslink_need_empty_transitions() -> Result<()> {
        let state = state_at_slot(5)?;

        let mut transitions = vec![ShardTransition::default(); 4];

        verify_empty_shard_transitions(&state, &transitions)?;

        transitions[1] = transition_with_empty_blocks(&state)?;

        let result = verify_empty_shard_transitions(&state, &transitions);

        assert!(result.is_err_and(|error| matches!(
            error.downcast_ref(),
            Some(Error::<Minimal>::ShardTransitionNotEmpty { shard: 1 }),
        )));

        Ok(())
    }

    #[test]
    fn non_empty_transition_without_attestations_is_rejected() -> Result<()> {
        let config = Config::minimal();
        let mut state = state_at_slot(3)?;
        let shard = compute_shard_from_committee_index(&state, 0, 2)?;

        let mut transitions = vec![ShardTransition::default(); 4];
        transitions[usize::try_from(shard)?] = transition_with_empty_blocks(&state)?;

        let result = process_crosslinks(&config, &mut state, &transitions, &[], NullVerifier);

        assert!(result.is_err_and(|error| matches!(
            error.downcast_ref(),
            Some(Error::<Minimal>::ShardTransitionNotEmpty { .. }),
        )));

        Ok(())
    }

    #[test]
    fn supermajority_of_committee_crosslinks_shard() -> Result<()> {
        let config = Config::minimal();
        let mut state = state_at_slot(3)?;
        let shard = compute_shard_from_committee_index(&state, 0, 2)?;

        // Every shard starts at slot 0, so the offset slots are the same for all of them.
        let transition = transition_with_empty_blocks(&state)?;

        let data = AttestationData {
            slot: 2,
            index: 0,
            shard,
            shard_transition_root: transition.hash_tree_root(),
            ..AttestationData::default()
        };

        let committee = beacon_committee(&state, 2, 0)?.to_vec();
        let aggregation_bits = BitList::new(true, committee.len())?;

        let attestation = Attestation {
            aggregation_bits: aggregation_bits.clone(),
            data,
            ..Attestation::default()
        };

        state.current_epoch_attestations.push(PendingAttestation {
            aggregation_bits,
            data,
            inclusion_delay: 1,
            ..PendingAttestation::default()
        })?;

        let mut transitions = vec![ShardTransition::default(); 4];
        transitions[usize::try_from(shard)?] = transition;

        let proposer_index = get_beacon_proposer_index(&state)?;
        let proposer_balance = *state.balances.get(proposer_index)?;

        let base_rewards = committee
            .iter()
            .map(|validator_index| get_base_reward(&state, *validator_index))
            .sum::<Result<Gwei>>()?;

        process_shard_transitions(
            &config,
            &mut state,
            &transitions,
            &[attestation],
            SingleVerifier,
        )?;

        let shard_state = state.shard_states.get(shard)?;
        let pending_attestation = state
            .current_epoch_attestations
            .first()
            .ok_or_else(|| anyhow::anyhow!("pending attestation was removed"))?;

        assert_eq!(shard_state.slot, 2);
        assert!(pending_attestation.crosslink_success);
        assert_eq!(
            *state.balances.get(proposer_index)?,
            proposer_balance + base_rewards / Minimal::PROPOSER_REWARD_QUOTIENT,
        );

        Ok(())
    }
}
