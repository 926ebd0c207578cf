use bls::{AggregateSignatureBytes, CachedPublicKey, SignatureBytes};
use ssz::{BitList, ContiguousList, ContiguousVector, Ssz};

use crate::{
    phase0::{
        containers::{Checkpoint, Deposit, Eth1Data, ProposerSlashing, SignedVoluntaryExit},
        primitives::{CommitteeIndex, Epoch, Gwei, Slot, ValidatorIndex, H256},
    },
    phase1::{consts::MaxShardBlocksPerAttestation, primitives::Shard},
    preset::Preset,
};

#[derive(Clone, PartialEq, Eq, Default, Debug, Ssz)]
pub struct Attestation<P: Preset> {
    pub aggregation_bits: BitList<P::MaxValidatorsPerCommittee>,
    pub data: AttestationData,
    pub signature: AggregateSignatureBytes,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Debug, Ssz)]
pub struct AttestationData {
    pub slot: Slot,
    pub index: CommitteeIndex,
    // > LMD GHOST vote
    pub beacon_block_root: H256,
    // > FFG vote
    pub source: Checkpoint,
    pub target: Checkpoint,
    // > Shard vote
    pub shard: Shard,
    // > Current-slot shard block root
    pub shard_head_root: H256,
    // > Shard transition root
    pub shard_transition_root: H256,
}

#[derive(Clone, PartialEq, Eq, Default, Debug, Ssz)]
pub struct AttesterSlashing<P: Preset> {
    pub attestation_1: IndexedAttestation<P>,
    pub attestation_2: IndexedAttestation<P>,
}

#[derive(Clone, PartialEq, Eq, Default, Debug, Ssz)]
pub struct BeaconBlock<P: Preset> {
    pub slot: Slot,
    pub proposer_index: ValidatorIndex,
    pub parent_root: H256,
    pub state_root: H256,
    pub body: BeaconBlockBody<P>,
}

#[derive(Clone, PartialEq, Eq, Default, Debug, Ssz)]
pub struct BeaconBlockBody<P: Preset> {
    pub randao_reveal: SignatureBytes,
    pub eth1_data: Eth1Data,
    pub graffiti: H256,
    pub proposer_slashings: ContiguousList<ProposerSlashing, P::MaxProposerSlashings>,
    pub attester_slashings: ContiguousList<AttesterSlashing<P>, P::MaxAttesterSlashings>,
    pub attestations: ContiguousList<Attestation<P>, P::MaxAttestations>,
    pub deposits: ContiguousList<Deposit, P::MaxDeposits>,
    pub voluntary_exits: ContiguousList<SignedVoluntaryExit, P::MaxVoluntaryExits>,
    // > Shards
    pub shard_transitions: ContiguousVector<ShardTransition, P::MaxShards>,
}

#[derive(Clone, PartialEq, Eq, Default, Debug, Ssz)]
pub struct IndexedAttestation<P: Preset> {
    pub attesting_indices: ContiguousList<ValidatorIndex, P::MaxValidatorsPerCommittee>,
    pub data: AttestationData,
    pub signature: AggregateSignatureBytes,
}

#[derive(Clone, PartialEq, Eq, Default, Debug, Ssz)]
pub struct PendingAttestation<P: Preset> {
    pub aggregation_bits: BitList<P::MaxValidatorsPerCommittee>,
    pub data: AttestationData,
    pub inclusion_delay: u64,
    pub proposer_index: ValidatorIndex,
    // > Phase 1
    pub crosslink_success: bool,
}

/// Header of a shard block. Shard proposers sign these.
#[derive(Clone, Copy, PartialEq, Eq, Default, Debug, Ssz)]
pub struct ShardBlockHeader {
    pub shard_parent_root: H256,
    pub beacon_parent_root: H256,
    pub slot: Slot,
    pub shard: Shard,
    pub proposer_index: ValidatorIndex,
    pub body_root: H256,
}

#[derive(Clone, Copy, PartialEq, Eq, Default, Debug, Ssz)]
pub struct ShardState {
    pub slot: Slot,
    pub gasprice: Gwei,
    pub latest_block_root: H256,
}

#[derive(Clone, PartialEq, Eq, Default, Debug, Ssz)]
pub struct ShardTransition {
    // > Starting from slot
    pub start_slot: Slot,
    // > Shard block lengths
    pub shard_block_lengths: ContiguousList<u64, MaxShardBlocksPerAttestation>,
    // > Shard data roots
    pub shard_data_roots: ContiguousList<H256, MaxShardBlocksPerAttestation>,
    // > Intermediate shard states
    pub shard_states: ContiguousList<ShardState, MaxShardBlocksPerAttestation>,
    // > Proposer signature aggregate
    pub proposer_signature_aggregate: AggregateSignatureBytes,
}

#[derive(Clone, PartialEq, Eq, Default, Debug, Ssz)]
pub struct SignedBeaconBlock<P: Preset> {
    pub message: BeaconBlock<P>,
    pub signature: SignatureBytes,
}

#[derive(Clone, PartialEq, Eq, Default, Debug, Ssz)]
pub struct Validator {
    pub pubkey: CachedPublicKey,
    // > Commitment to pubkey for withdrawals
    pub withdrawal_credentials: H256,
    // > Balance at stake
    pub effective_balance: Gwei,
    pub slashed: bool,
    // > Status epochs
    pub activation_eligibility_epoch: Epoch,
    pub activation_epoch: Epoch,
    pub exit_epoch: Epoch,
    pub withdrawable_epoch: Epoch,
    pub next_custody_secret_to_reveal: u64,
    pub all_custody_secrets_revealed_epoch: Epoch,
}
