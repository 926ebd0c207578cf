use anyhow::Error as AnyhowError;
use thiserror::Error;
use types::phase0::{
    containers::Checkpoint,
    primitives::{Epoch, Slot, H256},
};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ErrorKind {
    /// The object can never become valid.
    Invalid,
    /// The object may become valid after more blocks arrive or more time passes.
    Delayed,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(
        "attestation votes for a block from the future \
         (attestation_slot: {attestation_slot}, block_slot: {block_slot})"
    )]
    AttestationForFutureBlock {
        attestation_slot: Slot,
        block_slot: Slot,
    },
    #[error(
        "attestation is from the current or a future slot \
         (attestation_slot: {attestation_slot}, current_slot: {current_slot})"
    )]
    AttestationFromFuture {
        attestation_slot: Slot,
        current_slot: Slot,
    },
    #[error(
        "attestation targets a future epoch \
         (target_epoch: {target_epoch}, current_epoch: {current_epoch})"
    )]
    AttestationTargetsFutureEpoch {
        target_epoch: Epoch,
        current_epoch: Epoch,
    },
    #[error(
        "attestation targets an epoch that is too old \
         (target_epoch: {target_epoch}, current_epoch: {current_epoch})"
    )]
    AttestationTargetsOldEpoch {
        target_epoch: Epoch,
        current_epoch: Epoch,
    },
    #[error(
        "attestation target does not match its slot \
         (attestation_slot: {attestation_slot}, target: {target:?})"
    )]
    AttestationTargetsWrongEpoch {
        attestation_slot: Slot,
        target: Checkpoint,
    },
    #[error("block is from the future (block_slot: {block_slot}, current_slot: {current_slot})")]
    BlockFromFuture { block_slot: Slot, current_slot: Slot },
    #[error(
        "block is not newer than the finalized checkpoint \
         (block_slot: {block_slot}, finalized_slot: {finalized_slot})"
    )]
    BlockNotNewerThanFinalized {
        block_slot: Slot,
        finalized_slot: Slot,
    },
    #[error("block does not descend from the finalized block {finalized_root:?}")]
    BlockNotDescendantOfFinalized { finalized_root: H256 },
    #[error("attestation votes for a block that does not descend from its target {target:?}")]
    LmdGhostInconsistentWithFfgTarget { target: Checkpoint },
    #[error("missing state for checkpoint {checkpoint:?}")]
    MissingCheckpointState { checkpoint: Checkpoint },
    #[error("unknown block {block_root:?}")]
    UnknownBlock { block_root: H256 },
    #[error("unknown parent {parent_root:?}")]
    UnknownParent { parent_root: H256 },
}

impl Error {
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::AttestationFromFuture { .. }
            | Self::AttestationTargetsFutureEpoch { .. }
            | Self::BlockFromFuture { .. }
            | Self::UnknownBlock { .. }
            | Self::UnknownParent { .. } => ErrorKind::Delayed,
            Self::AttestationForFutureBlock { .. }
            | Self::AttestationTargetsOldEpoch { .. }
            | Self::AttestationTargetsWrongEpoch { .. }
            | Self::BlockNotNewerThanFinalized { .. }
            | Self::BlockNotDescendantOfFinalized { .. }
            | Self::LmdGhostInconsistentWithFfgTarget { .. }
            | Self::MissingCheckpointState { .. } => ErrorKind::Invalid,
        }
    }
}

/// Classifies an error returned by [`Store`](crate::Store) methods.
///
/// Errors that did not originate in the store (failed state transitions, bad signatures) make
/// the object invalid.
#[must_use]
pub fn error_kind(error: &AnyhowError) -> ErrorKind {
    error
        .downcast_ref::<Error>()
        .map_or(ErrorKind::Invalid, Error::kind)
}
