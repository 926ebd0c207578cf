use parse_display::Display;
use thiserror::Error;
use types::{
    phase0::primitives::{CommitteeIndex, Epoch, Slot},
    phase1::primitives::Shard,
};

#[derive(Debug, Error)]
pub enum Error {
    #[error("attestation has no attesting indices")]
    AttestationHasNoAttestingIndices,
    #[error("attesting indices are not sorted and unique")]
    AttestingIndicesNotSortedAndUnique,
    #[error("committee index {index} is out of bounds ({count} committees per slot)")]
    CommitteeIndexOutOfBounds {
        index: CommitteeIndex,
        count: u64,
    },
    #[error(
        "aggregation bitlist length {aggregation_bitlist_length} \
         does not match committee length {committee_length}"
    )]
    CommitteeLengthMismatch {
        aggregation_bitlist_length: usize,
        committee_length: usize,
    },
    #[error("epoch {epoch} is after next one relative to state")]
    EpochAfterNext { epoch: Epoch },
    #[error("epoch {epoch} is before previous one relative to state")]
    EpochBeforePrevious { epoch: Epoch },
    #[error("epoch {epoch} is in the future relative to state")]
    EpochInTheFuture { epoch: Epoch },
    #[error("epoch number overflowed")]
    EpochOverflow,
    #[error("failed to select proposer")]
    FailedToSelectProposer,
    #[error("no validators are active")]
    NoActiveValidators,
    #[error("shard committee period is zero")]
    ShardCommitteePeriodZero,
    #[error("shard {shard} has an empty committee")]
    ShardCommitteeEmpty { shard: Shard },
    #[error("{0} is invalid")]
    SignatureInvalid(SignatureKind),
    #[error("slot {slot} is out of range (state slot: {state_slot})")]
    SlotOutOfRange { slot: Slot, state_slot: Slot },
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Display)]
pub enum SignatureKind {
    #[display("attestation signature")]
    Attestation,
    #[display("block signature")]
    Block,
    #[display("deposit signature")]
    Deposit,
    #[display("collection of multiple signatures")]
    Multi,
    #[display("RANDAO reveal")]
    Randao,
    #[display("shard proposer signature aggregate")]
    ShardProposals,
    #[display("voluntary exit signature")]
    VoluntaryExit,
}
