use thiserror::Error;
use types::{
    phase0::{
        containers::{BeaconBlockHeader, Checkpoint, Deposit},
        primitives::{Epoch, Gwei, Slot, ValidatorIndex, H256},
    },
    phase1::{
        containers::{Attestation, AttestationData, Validator},
        primitives::Shard,
    },
    preset::Preset,
};

#[derive(Debug, Error)]
pub enum Error<P: Preset> {
    #[error("attestation committee index {index} is not below committee count {committee_count}")]
    AttestationCommitteeIndexOutOfBounds { index: u64, committee_count: u64 },
    #[error(
        "attestation committee index {index} is not below active shard count {active_shard_count}"
    )]
    AttestationCommitteeIndexExceedsShardCount { index: u64, active_shard_count: u64 },
    #[error("attestation data is not slashable (data_1: {data_1:?}, data_2: {data_2:?})")]
    AttestationDataNotSlashable {
        data_1: AttestationData,
        data_2: AttestationData,
    },
    #[error(
        "attestation in slot {attestation_slot} is outside \
         inclusion range for state at slot {state_slot}"
    )]
    AttestationOutsideInclusionRange {
        state_slot: Slot,
        attestation_slot: Slot,
    },
    #[error(
        "attestation source does not match justified checkpoint \
         (in_state: {in_state:?}, in_block: {in_block:?})"
    )]
    AttestationSourceMismatch {
        in_state: Checkpoint,
        in_block: Checkpoint,
    },
    #[error("attestation votes for a checkpoint in the wrong epoch: {attestation:?}")]
    AttestationTargetsWrongEpoch { attestation: Box<Attestation<P>> },
    #[error("block is not newer than latest block header ({block_slot} <= {block_header_slot})")]
    BlockNotNewerThanLatestBlockHeader {
        block_slot: Slot,
        block_header_slot: Slot,
    },
    #[error("deposit count is incorrect (computed: {computed}, in_block: {in_block})")]
    DepositCountMismatch { computed: u64, in_block: u64 },
    #[error("deposit proof is invalid: {deposit:?}")]
    DepositProofInvalid {
        // Boxed to pass `clippy::large_enum_variant`.
        deposit: Box<Deposit>,
    },
    #[error("shard block at slot {slot} is empty but has data root {shard_data_root:?}")]
    EmptyShardBlockHasDataRoot { slot: Slot, shard_data_root: H256 },
    #[error(
        "late attestation in slot {attestation_slot} is not delayed \
         enough for state at slot {state_slot}"
    )]
    LateAttestationNotDelayed {
        state_slot: Slot,
        attestation_slot: Slot,
    },
    #[error("late attestation has shard transition root {shard_transition_root:?}")]
    LateAttestationWithTransitionRoot { shard_transition_root: H256 },
    #[error("no attesters slashed")]
    NoAttestersSlashed,
    #[error(
        "on-time attestation does not vote for previous block \
         (computed: {computed:?}, in_attestation: {in_attestation:?})"
    )]
    OnTimeAttestationHeadMismatch { computed: H256, in_attestation: H256 },
    #[error(
        "on-time attestation names the wrong shard \
         (computed: {computed}, in_attestation: {in_attestation})"
    )]
    OnTimeAttestationShardMismatch { computed: Shard, in_attestation: Shard },
    #[error(
        "on-time attestation in slot {attestation_slot} has \
         unexpected shard transition root {shard_transition_root:?}"
    )]
    OnTimeAttestationTransitionRootInvalid {
        attestation_slot: Slot,
        shard_transition_root: H256,
    },
    #[error("block parent root ({in_block:?}) does not match latest block header ({computed:?})")]
    ParentRootMismatch { computed: H256, in_block: H256 },
    #[error("proposer (validator {index}) is slashed")]
    ProposerSlashed { index: ValidatorIndex },
    #[error("proposer index is incorrect (in_block: {in_block}, computed: {computed})")]
    ProposerIndexMismatch {
        computed: ValidatorIndex,
        in_block: ValidatorIndex,
    },
    #[error("proposer (validator {index}) is not slashable: {proposer:?}")]
    ProposerNotSlashable {
        index: ValidatorIndex,
        proposer: Box<Validator>,
    },
    #[error("block headers in proposer slashing are identical: {header:?}")]
    ProposerSlashingHeadersIdentical { header: BeaconBlockHeader },
    #[error(
        "proposer indices in proposer slashing do not match \
         ({proposer_index_1} != {proposer_index_2})"
    )]
    ProposerSlashingProposerMismatch {
        proposer_index_1: ValidatorIndex,
        proposer_index_2: ValidatorIndex,
    },
    #[error("slots in proposer slashing do not match ({slot_1} != {slot_2})")]
    ProposerSlashingSlotMismatch { slot_1: Slot, slot_2: Slot },
    #[error(
        "shard head root in attestation ({in_attestation:?}) \
         does not match winning transition ({computed:?})"
    )]
    ShardHeadRootMismatch { computed: H256, in_attestation: H256 },
    #[error("shard {shard} is out of bounds")]
    ShardOutOfBounds { shard: Shard },
    #[error(
        "shard state gas price is incorrect (computed: {computed}, in_transition: {in_transition})"
    )]
    ShardStateGaspriceMismatch { computed: Gwei, in_transition: Gwei },
    #[error("shard state slot is incorrect (computed: {computed}, in_transition: {in_transition})")]
    ShardStateSlotMismatch { computed: Slot, in_transition: Slot },
    #[error("shard transition applied in genesis slot")]
    ShardTransitionAtGenesis,
    #[error(
        "shard transition lengths do not match offset slots \
         (data_roots: {data_roots}, states: {states}, \
         block_lengths: {block_lengths}, offset_slots: {offset_slots})"
    )]
    ShardTransitionLengthMismatch {
        data_roots: usize,
        states: usize,
        block_lengths: usize,
        offset_slots: usize,
    },
    #[error("shard transition for shard {shard} should be empty")]
    ShardTransitionNotEmpty { shard: Shard },
    #[error(
        "shard transition root in attestation ({in_attestation:?}) \
         does not match block ({computed:?})"
    )]
    ShardTransitionRootMismatch { computed: H256, in_attestation: H256 },
    #[error(
        "shard transition start slot is incorrect \
         (computed: {computed:?}, in_transition: {in_transition})"
    )]
    ShardTransitionStartSlotMismatch {
        computed: Option<Slot>,
        in_transition: Slot,
    },
    #[error("winning shard transition for shard {shard} has no shard states")]
    ShardTransitionWithoutStates { shard: Shard },
    #[error("block slot ({block_slot}) does not match state slot ({state_slot})")]
    SlotMismatch { state_slot: Slot, block_slot: Slot },
    #[error("target slot ({target}) is not later than current slot ({current})")]
    SlotNotLater { current: Slot, target: Slot },
    #[error("state root in block ({in_block:?}) does not match state ({computed:?})")]
    StateRootMismatch { computed: H256, in_block: H256 },
    #[error("validator {index} exited in epoch {exit_epoch}")]
    ValidatorAlreadyExited {
        index: ValidatorIndex,
        exit_epoch: Epoch,
    },
    #[error(
        "validator {index} has not been active long enough \
         (activation_epoch: {activation_epoch}, current_epoch: {current_epoch})"
    )]
    ValidatorHasNotBeenActiveLongEnough {
        index: ValidatorIndex,
        activation_epoch: Epoch,
        current_epoch: Epoch,
    },
    #[error("validator {index} is not active in epoch {current_epoch}: {validator:?}")]
    ValidatorNotActive {
        index: ValidatorIndex,
        validator: Box<Validator>,
        current_epoch: Epoch,
    },
    #[error("voluntary exit is expired (epoch: {epoch}, current_epoch: {current_epoch})")]
    VoluntaryExitIsExpired { epoch: Epoch, current_epoch: Epoch },
}
