use std::sync::Arc;

use types::{
    phase0::{
        containers::BeaconBlockHeader,
        primitives::{Epoch, H256},
    },
    phase1::beacon_state::BeaconState,
    preset::Preset,
};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct LatestMessage {
    pub epoch: Epoch,
    pub root: H256,
}

/// A block that passed the state transition on top of its parent's post-state.
#[derive(Clone, Debug)]
pub struct ValidBlock<P: Preset> {
    pub block_root: H256,
    pub header: BeaconBlockHeader,
    pub state: Arc<BeaconState<P>>,
}
