use anyhow::Result;
use log::{debug, log_enabled, warn, Level};
use parking_lot::RwLock;
use types::{
    phase0::primitives::{UnixSeconds, H256},
    phase1::containers::{Attestation, SignedBeaconBlock},
    preset::Preset,
};

use crate::{
    error::{error_kind, ErrorKind},
    store::Store,
};

/// [`Store`] behind a lock, for use from multiple threads.
///
/// Blocks are validated under a read lock. Only adding a validated block requires the write lock,
/// so head queries are not blocked by state transitions.
pub struct SharedStore<P: Preset> {
    store: RwLock<Store<P>>,
}

impl<P: Preset> SharedStore<P> {
    #[must_use]
    pub const fn new(store: Store<P>) -> Self {
        Self {
            store: RwLock::new(store),
        }
    }

    pub fn on_tick(&self, time: UnixSeconds) -> Result<()> {
        self.store.write().on_tick(time)
    }

    pub fn on_block(&self, signed_block: &SignedBeaconBlock<P>) -> Result<()> {
        let validation_result = self.store.read().validate_block(signed_block);

        let result =
            validation_result.and_then(|valid_block| self.store.write().apply_block(valid_block));

        match &result {
            Ok(()) if log_enabled!(Level::Debug) => {
                if let Ok(head) = self.head() {
                    debug!("head after block import: {head:?}");
                }
            }
            Err(error) if error_kind(error) == ErrorKind::Invalid => {
                warn!("block rejected (slot: {}): {error}", signed_block.message.slot);
            }
            _ => {}
        }

        result
    }

    pub fn on_attestation(&self, attestation: &Attestation<P>) -> Result<()> {
        let result = self.store.write().on_attestation(attestation);

        if let Err(error) = &result {
            if error_kind(error) == ErrorKind::Invalid {
                warn!("attestation rejected (data: {:?}): {error}", attestation.data);
            }
        }

        result
    }

    pub fn head(&self) -> Result<H256> {
        self.store.read().get_head()
    }

    pub fn prune_below_finalized(&self) {
        self.store.write().prune_below_finalized();
    }

    /// Returns a copy of the store that is not affected by later updates.
    #[must_use]
    pub fn snapshot(&self) -> Store<P> {
        self.store.read().clone()
    }
}
