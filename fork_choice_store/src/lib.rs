//! Implementation of [Beacon Chain Fork Choice].
//!
//! The store follows the LMD-GHOST rule restricted to the subtree of the justified checkpoint.
//! Blocks whose post-states disagree with the store about the justified or finalized checkpoint
//! are filtered out before the head is chosen.
//!
//! Block processing is split into a `validate_block` method that does not mutate [`Store`] and an
//! `apply_block` method that does. The expensive part (the state transition) happens in the
//! former, so [`SharedStore`] can run it while holding only a read lock.
//!
//! This implementation makes use of persistent data structures, but they are not required for the
//! algorithm to work. They're only used to make snapshots cheap.
//!
//! Errors are classified by [`ErrorKind`]. Objects rejected with [`ErrorKind::Delayed`] may become
//! valid later (when their parent arrives or when the clock advances) and should be retried.
//!
//! [Beacon Chain Fork Choice]: https://github.com/ethereum/consensus-specs/blob/v0.12.3/specs/phase0/fork-choice.md

pub use crate::{
    error::{error_kind, Error, ErrorKind},
    misc::{LatestMessage, ValidBlock},
    shared_store::SharedStore,
    store::Store,
};

mod error;
mod misc;
mod shared_store;
mod store;
