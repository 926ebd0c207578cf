//! Builders for genesis states and fully signed blocks.
//!
//! The validators are the interop ones, so every signature can be produced from the validator
//! index alone. Blocks built here pass `untrusted_state_transition`.

use std::sync::Arc;

use anyhow::Result;
use bls::{Signature, SignatureBytes};
use deposit_tree::DepositTree;
use helper_functions::{
    accessors, misc,
    phase1::compute_shard_from_committee_index,
    signing::{RandaoEpoch, SignForSingleFork as _},
    verifier::NullVerifier,
};
use ssz::{BitList, ContiguousList, SszHash as _};
use thiserror::Error;
use types::{
    config::Config,
    phase0::{
        containers::Checkpoint,
        primitives::{CommitteeIndex, Epoch, Slot, ValidatorIndex, H256},
    },
    phase1::{
        beacon_state::BeaconState,
        containers::{
            Attestation, AttestationData, BeaconBlock, BeaconBlockBody, SignedBeaconBlock,
        },
    },
    preset::Preset,
};

pub type BlockWithState<P> = (Arc<SignedBeaconBlock<P>>, Arc<BeaconState<P>>);

/// Genesis state with the minimum number of validators needed to start the chain.
pub fn min_genesis_state<P: Preset>(
    config: &Config,
) -> Result<(Arc<BeaconState<P>>, DepositTree)> {
    let (genesis_state, deposit_tree) = interop::quick_start_beacon_state(
        config,
        config.min_genesis_time,
        config.min_genesis_active_validator_count,
    )?;

    Ok((Arc::new(genesis_state), deposit_tree))
}

pub fn empty_block<P: Preset>(
    config: &Config,
    pre_state: Arc<BeaconState<P>>,
    slot: Slot,
    graffiti: H256,
) -> Result<BlockWithState<P>> {
    block_with_attestations(config, pre_state, slot, graffiti, vec![])
}

/// Block carrying attestations from every committee of the slot two slots before it.
///
/// The attestations are late, so the block needs no shard transitions.
pub fn full_block<P: Preset>(
    config: &Config,
    pre_state: Arc<BeaconState<P>>,
    slot: Slot,
    graffiti: H256,
) -> Result<BlockWithState<P>> {
    let state = advance_to_slot(config, pre_state, slot)?;

    let attestations = match slot.checked_sub(2) {
        Some(attestation_slot) => attestations_at_slot(config, &state, attestation_slot)?,
        None => vec![],
    };

    block_on_advanced_state(config, state, graffiti, attestations)
}

pub fn block_with_attestations<P: Preset>(
    config: &Config,
    pre_state: Arc<BeaconState<P>>,
    slot: Slot,
    graffiti: H256,
    attestations: Vec<Attestation<P>>,
) -> Result<BlockWithState<P>> {
    let state = advance_to_slot(config, pre_state, slot)?;
    block_on_advanced_state(config, state, graffiti, attestations)
}

/// Full blocks for every slot after `pre_state` up to and including the start of `epoch`.
pub fn full_blocks_up_to_epoch<P: Preset>(
    config: &Config,
    pre_state: Arc<BeaconState<P>>,
    epoch: Epoch,
) -> Result<(Vec<Arc<SignedBeaconBlock<P>>>, Arc<BeaconState<P>>)> {
    let first_slot = pre_state.slot + 1;
    let last_slot = misc::compute_start_slot_at_epoch::<P>(epoch);

    let mut blocks = vec![];
    let mut state = pre_state;

    for slot in first_slot..=last_slot {
        let (block, post_state) = full_block(config, state, slot, H256::zero())?;
        blocks.push(block);
        state = post_state;
    }

    Ok((blocks, state))
}

/// Attestations signed by every member of every committee at `slot`.
///
/// `state` must be at a later slot than `slot` so the voted block root is known.
pub fn attestations_at_slot<P: Preset>(
    config: &Config,
    state: &BeaconState<P>,
    slot: Slot,
) -> Result<Vec<Attestation<P>>> {
    let target_epoch = misc::compute_epoch_at_slot::<P>(slot);

    let source = if target_epoch == accessors::get_current_epoch(state) {
        state.current_justified_checkpoint
    } else {
        state.previous_justified_checkpoint
    };

    let target = Checkpoint {
        epoch: target_epoch,
        root: accessors::get_block_root(state, target_epoch)?,
    };

    let beacon_block_root = accessors::get_block_root_at_slot(state, slot)?;

    accessors::beacon_committees(state, slot)?
        .zip(0..)
        .map(|(committee, index)| {
            let data = AttestationData {
                slot,
                index,
                beacon_block_root,
                source,
                target,
                shard: compute_shard_from_committee_index(state, index, slot)?,
                shard_head_root: H256::zero(),
                shard_transition_root: H256::zero(),
            };

            signed_attestation(config, state, data, committee?)
        })
        .collect()
}

fn signed_attestation<P: Preset>(
    config: &Config,
    state: &BeaconState<P>,
    data: AttestationData,
    committee: &[ValidatorIndex],
) -> Result<Attestation<P>> {
    let signing_root = data.signing_root(config, state);

    let signature = Signature::aggregate(
        committee
            .iter()
            .map(|validator_index| interop::secret_key(*validator_index).sign(signing_root)),
    )
    .ok_or(Error::EmptyCommittee {
        slot: data.slot,
        index: data.index,
    })?;

    Ok(Attestation {
        aggregation_bits: BitList::new(true, committee.len())?,
        data,
        signature: signature.into(),
    })
}

fn advance_to_slot<P: Preset>(
    config: &Config,
    pre_state: Arc<BeaconState<P>>,
    slot: Slot,
) -> Result<BeaconState<P>> {
    let mut state = Arc::unwrap_or_clone(pre_state);

    if state.slot < slot {
        transition_functions::process_slots(config, &mut state, slot)?;
    }

    Ok(state)
}

fn block_on_advanced_state<P: Preset>(
    config: &Config,
    mut state: BeaconState<P>,
    graffiti: H256,
    attestations: Vec<Attestation<P>>,
) -> Result<BlockWithState<P>> {
    let slot = state.slot;
    let proposer_index = accessors::get_beacon_proposer_index(&state)?;
    let secret_key = interop::secret_key(proposer_index);
    let epoch = accessors::get_current_epoch(&state);

    let randao_reveal = RandaoEpoch::from(epoch)
        .sign(config, &state, &secret_key)
        .into();

    let body = BeaconBlockBody {
        randao_reveal,
        eth1_data: state.eth1_data,
        graffiti,
        attestations: ContiguousList::try_from(attestations)?,
        ..BeaconBlockBody::default()
    };

    let mut block = BeaconBlock {
        slot,
        proposer_index,
        parent_root: accessors::latest_block_root(&state),
        state_root: H256::zero(),
        body,
    };

    transition_functions::custom_process_block(
        config,
        &mut state,
        &block,
        NullVerifier,
        NullVerifier,
    )?;

    block.state_root = state.hash_tree_root();

    let signature = SignatureBytes::from(block.sign(config, &state, &secret_key));

    Ok((Arc::new(block.with_signature(signature)), Arc::new(state)))
}

#[derive(Debug, Error)]
enum Error {
    #[error("committee {index} at slot {slot} is empty")]
    EmptyCommittee { slot: Slot, index: CommitteeIndex },
}
