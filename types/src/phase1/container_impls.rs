use bls::SignatureBytes;
use ssz::SszHash as _;

use crate::{
    phase0::{containers::BeaconBlockHeader, primitives::H256},
    phase1::containers::{BeaconBlock, ShardTransition, SignedBeaconBlock},
    preset::Preset,
};

impl<P: Preset> BeaconBlock<P> {
    #[inline]
    #[must_use]
    pub const fn with_signature(self, signature: SignatureBytes) -> SignedBeaconBlock<P> {
        SignedBeaconBlock {
            message: self,
            signature,
        }
    }

    #[inline]
    #[must_use]
    pub fn with_state_root(self, state_root: H256) -> Self {
        Self { state_root, ..self }
    }

    #[must_use]
    pub fn to_header(&self) -> BeaconBlockHeader {
        BeaconBlockHeader {
            slot: self.slot,
            proposer_index: self.proposer_index,
            parent_root: self.parent_root,
            state_root: self.state_root,
            body_root: self.body.hash_tree_root(),
        }
    }
}

impl<P: Preset> SignedBeaconBlock<P> {
    #[inline]
    #[must_use]
    pub fn split(self) -> (BeaconBlock<P>, SignatureBytes) {
        (self.message, self.signature)
    }
}

impl ShardTransition {
    /// Whether this is the placeholder submitted for shards without a crosslink.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[cfg(test)]
mod tests {
    use ssz::ContiguousList;

    use crate::{
        phase1::containers::{BeaconBlockBody, ShardState},
        preset::Minimal,
    };

    use super::*;

    #[test]
    fn header_commits_to_block_body() {
        let block = BeaconBlock::<Minimal> {
            slot: 3,
            proposer_index: 7,
            ..BeaconBlock::default()
        };

        let header = block.to_header();

        assert_eq!(header.slot, 3);
        assert_eq!(header.proposer_index, 7);
        assert_eq!(header.body_root, BeaconBlockBody::<Minimal>::default().hash_tree_root());
        assert_eq!(block.hash_tree_root(), header.hash_tree_root());
    }

    #[test]
    fn transition_with_states_is_not_empty() -> anyhow::Result<()> {
        assert!(ShardTransition::default().is_empty());

        let transition = ShardTransition {
            shard_states: ContiguousList::try_from(vec![ShardState::default()])?,
            ..ShardTransition::default()
        };

        assert!(!transition.is_empty());

        Ok(())
    }
}
