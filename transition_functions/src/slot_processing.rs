use anyhow::{ensure, Result};
use helper_functions::misc;
use ssz::SszHash as _;
use types::{
    config::Config,
    phase0::primitives::Slot,
    phase1::{beacon_state::BeaconState, containers::BeaconBlock},
    preset::Preset,
};

use crate::{epoch_processing, error::Error};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ProcessSlots {
    Always,
    IfNeeded,
    Never,
}

impl ProcessSlots {
    #[must_use]
    pub fn should_process<P: Preset>(self, state: &BeaconState<P>, block: &BeaconBlock<P>) -> bool {
        match self {
            Self::Always => true,
            // The test for equality is intentional. It ensures that blocks attempting to "rewind"
            // the state are rejected early by `process_slots`.
            Self::IfNeeded => state.slot != block.slot,
            Self::Never => false,
        }
    }
}

pub fn process_slots<P: Preset>(
    config: &Config,
    state: &mut BeaconState<P>,
    slot: Slot,
) -> Result<()> {
    ensure!(
        state.slot < slot,
        Error::<P>::SlotNotLater {
            current: state.slot,
            target: slot,
        },
    );

    while state.slot < slot {
        process_slot(state);

        // > Process epoch on the start slot of the next epoch
        if misc::is_epoch_start::<P>(state.slot + 1) {
            epoch_processing::process_epoch(config, state)?;
        }

        state.slot += 1;
    }

    Ok(())
}

pub fn process_slot<P: Preset>(state: &mut BeaconState<P>) {
    let slot = state.slot;

    // > Cache state root
    let previous_state_root = state.hash_tree_root();
    *state.state_roots.mod_index_mut(slot) = previous_state_root;

    // > Cache latest block header state root
    if state.latest_block_header.state_root.is_zero() {
        state.latest_block_header.state_root = previous_state_root;
    }

    // > Cache block root
    let previous_block_root = state.latest_block_header.hash_tree_root();
    *state.block_roots.mod_index_mut(slot) = previous_block_root;

    state.cache.advance_slot();
}
