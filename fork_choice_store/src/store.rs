use std::sync::Arc;

use anyhow::{ensure, Result};
use helper_functions::{accessors, misc, predicates, verifier::SingleVerifier};
use im::HashMap;
use log::{debug, info};
use ssz::SszHash as _;
use types::{
    config::Config,
    phase0::{
        consts::{GENESIS_EPOCH, GENESIS_SLOT},
        containers::{BeaconBlockHeader, Checkpoint},
        primitives::{Gwei, Slot, UnixSeconds, ValidatorIndex, H256},
    },
    phase1::{
        beacon_state::BeaconState,
        containers::{Attestation, SignedBeaconBlock},
    },
    preset::Preset,
};

use crate::{
    error::Error,
    misc::{LatestMessage, ValidBlock},
};

/// [`Store`](https://github.com/ethereum/consensus-specs/blob/v0.12.3/specs/phase0/fork-choice.md#store)
///
/// Blocks are stored as headers. Fork choice only needs their slots, parents and state roots.
///
/// The state of the justified checkpoint is always present in `checkpoint_states`,
/// which makes [`Store::get_head`] a read-only query.
#[derive(Clone)]
pub struct Store<P: Preset> {
    config: Arc<Config>,
    time: UnixSeconds,
    genesis_time: UnixSeconds,
    justified_checkpoint: Checkpoint,
    finalized_checkpoint: Checkpoint,
    best_justified_checkpoint: Checkpoint,
    blocks: HashMap<H256, BeaconBlockHeader>,
    block_states: HashMap<H256, Arc<BeaconState<P>>>,
    checkpoint_states: HashMap<Checkpoint, Arc<BeaconState<P>>>,
    latest_messages: HashMap<ValidatorIndex, LatestMessage>,
}

impl<P: Preset> Store<P> {
    /// [`get_forkchoice_store`](https://github.com/ethereum/consensus-specs/blob/v0.12.3/specs/phase0/fork-choice.md#get_forkchoice_store)
    #[must_use]
    pub fn new(config: Arc<Config>, anchor_state: Arc<BeaconState<P>>) -> Self {
        let mut anchor_block_header = anchor_state.latest_block_header;

        if anchor_block_header.state_root.is_zero() {
            anchor_block_header.state_root = anchor_state.hash_tree_root();
        }

        let anchor_root = anchor_block_header.hash_tree_root();
        let anchor_epoch = accessors::get_current_epoch(&anchor_state);

        let anchor_checkpoint = Checkpoint {
            epoch: anchor_epoch,
            root: anchor_root,
        };

        let time = anchor_state.genesis_time + config.seconds_per_slot.get() * anchor_state.slot;

        Self {
            config,
            time,
            genesis_time: anchor_state.genesis_time,
            justified_checkpoint: anchor_checkpoint,
            finalized_checkpoint: anchor_checkpoint,
            best_justified_checkpoint: anchor_checkpoint,
            blocks: HashMap::unit(anchor_root, anchor_block_header),
            block_states: HashMap::unit(anchor_root, Arc::clone(&anchor_state)),
            checkpoint_states: HashMap::unit(anchor_checkpoint, anchor_state),
            latest_messages: HashMap::new(),
        }
    }

    #[must_use]
    pub const fn config(&self) -> &Arc<Config> {
        &self.config
    }

    #[must_use]
    pub const fn time(&self) -> UnixSeconds {
        self.time
    }

    #[must_use]
    pub const fn genesis_time(&self) -> UnixSeconds {
        self.genesis_time
    }

    #[must_use]
    pub fn current_slot(&self) -> Slot {
        GENESIS_SLOT + self.time.saturating_sub(self.genesis_time) / self.config.seconds_per_slot
    }

    #[must_use]
    pub const fn justified_checkpoint(&self) -> Checkpoint {
        self.justified_checkpoint
    }

    #[must_use]
    pub const fn finalized_checkpoint(&self) -> Checkpoint {
        self.finalized_checkpoint
    }

    #[must_use]
    pub const fn best_justified_checkpoint(&self) -> Checkpoint {
        self.best_justified_checkpoint
    }

    #[must_use]
    pub fn block(&self, block_root: H256) -> Option<&BeaconBlockHeader> {
        self.blocks.get(&block_root)
    }

    #[must_use]
    pub fn contains_block(&self, block_root: H256) -> bool {
        self.blocks.contains_key(&block_root)
    }

    #[must_use]
    pub fn block_state(&self, block_root: H256) -> Option<&Arc<BeaconState<P>>> {
        self.block_states.get(&block_root)
    }

    #[must_use]
    pub fn checkpoint_state(&self, checkpoint: Checkpoint) -> Option<&Arc<BeaconState<P>>> {
        self.checkpoint_states.get(&checkpoint)
    }

    #[must_use]
    pub fn latest_message(&self, validator_index: ValidatorIndex) -> Option<LatestMessage> {
        self.latest_messages.get(&validator_index).copied()
    }

    /// [`get_ancestor`](https://github.com/ethereum/consensus-specs/blob/v0.12.3/specs/phase0/fork-choice.md#get_ancestor)
    ///
    /// Returns `None` if the chain leading to `slot` passes through a block that is not in the
    /// store. That happens for unknown blocks and for blocks pruned after finalization.
    #[must_use]
    pub fn get_ancestor(&self, mut block_root: H256, slot: Slot) -> Option<H256> {
        loop {
            let block = self.blocks.get(&block_root)?;

            if block.slot <= slot {
                // If `block.slot < slot`, `slot` is a skipped slot.
                // The latest block before it is its ancestor.
                return Some(block_root);
            }

            block_root = block.parent_root;
        }
    }

    /// [`get_latest_attesting_balance`](https://github.com/ethereum/consensus-specs/blob/v0.12.3/specs/phase0/fork-choice.md#get_latest_attesting_balance)
    pub fn get_latest_attesting_balance(&self, block_root: H256) -> Result<Gwei> {
        let state = self.justified_checkpoint_state()?;
        let block_slot = self.known_block(block_root)?.slot;
        let current_epoch = accessors::get_current_epoch(state);

        accessors::get_active_validator_indices(state, current_epoch)
            .filter(|validator_index| {
                self.latest_messages
                    .get(validator_index)
                    .is_some_and(|message| {
                        self.get_ancestor(message.root, block_slot) == Some(block_root)
                    })
            })
            .map(|validator_index| -> Result<Gwei> {
                let validator = state.validators.get(validator_index)?;
                Ok(validator.effective_balance)
            })
            .sum()
    }

    /// [`filter_block_tree`](https://github.com/ethereum/consensus-specs/blob/v0.12.3/specs/phase0/fork-choice.md#filter_block_tree)
    ///
    /// The tree is walked depth-first without recursion to avoid overflowing the stack in long
    /// periods of non-finality. Children are visited before their parents, so viability still
    /// propagates from leaves upward.
    pub fn filter_block_tree(
        &self,
        block_root: H256,
        blocks: &mut HashMap<H256, BeaconBlockHeader>,
    ) -> Result<bool> {
        let children = self.children_by_parent();
        let mut viability = HashMap::<H256, bool>::new();
        let mut stack = vec![(block_root, false)];

        while let Some((root, children_visited)) = stack.pop() {
            let block = *self.known_block(root)?;
            let child_roots = children.get(&root).map(Vec::as_slice).unwrap_or_default();

            let viable = if child_roots.is_empty() {
                self.is_viable_leaf(root)?
            } else if children_visited {
                child_roots
                    .iter()
                    .any(|child| viability.get(child).copied().unwrap_or_default())
            } else {
                stack.push((root, true));
                stack.extend(child_roots.iter().map(|child| (*child, false)));
                continue;
            };

            if viable {
                blocks.insert(root, block);
            }

            viability.insert(root, viable);
        }

        Ok(viability.get(&block_root).copied().unwrap_or_default())
    }

    /// [`get_filtered_block_tree`](https://github.com/ethereum/consensus-specs/blob/v0.12.3/specs/phase0/fork-choice.md#get_filtered_block_tree)
    pub fn get_filtered_block_tree(&self) -> Result<HashMap<H256, BeaconBlockHeader>> {
        let base = self.justified_checkpoint.root;
        let mut blocks = HashMap::new();
        self.filter_block_tree(base, &mut blocks)?;
        Ok(blocks)
    }

    /// [`get_head`](https://github.com/ethereum/consensus-specs/blob/v0.12.3/specs/phase0/fork-choice.md#get_head)
    pub fn get_head(&self) -> Result<H256> {
        // > Get filtered block tree that only includes viable branches
        let blocks = self.get_filtered_block_tree()?;

        // > Execute the LMD-GHOST fork choice
        let mut head = self.justified_checkpoint.root;
        let justified_slot = self.justified_slot();

        loop {
            let children = blocks
                .iter()
                .filter(|(_, block)| block.parent_root == head && block.slot > justified_slot)
                .map(|(root, _)| *root);

            // > Sort by latest attesting balance with ties broken lexicographically
            let best_child = itertools::process_results(
                children.map(|root| -> Result<_> {
                    Ok((self.get_latest_attesting_balance(root)?, root))
                }),
                |weighted_children| weighted_children.max(),
            )?;

            match best_child {
                Some((_, child)) => head = child,
                None => return Ok(head),
            }
        }
    }

    /// [`should_update_justified_checkpoint`](https://github.com/ethereum/consensus-specs/blob/v0.12.3/specs/phase0/fork-choice.md#should_update_justified_checkpoint)
    ///
    /// > To address the bouncing attack, only update conflicting justified
    /// > checkpoints in the fork choice if in the early slots of the epoch.
    /// > Otherwise, delay incorporation of new justified checkpoint until next epoch boundary.
    #[must_use]
    pub fn should_update_justified_checkpoint(&self, new_justified_checkpoint: Checkpoint) -> bool {
        if misc::slots_since_epoch_start::<P>(self.current_slot())
            < self.config.safe_slots_to_update_justified
        {
            return true;
        }

        let justified_slot = self.justified_slot();

        self.get_ancestor(new_justified_checkpoint.root, justified_slot)
            == Some(self.justified_checkpoint.root)
    }

    /// [`on_tick`](https://github.com/ethereum/consensus-specs/blob/v0.12.3/specs/phase0/fork-choice.md#on_tick)
    pub fn on_tick(&mut self, time: UnixSeconds) -> Result<()> {
        let previous_slot = self.current_slot();

        // > update store time
        self.time = time;

        let current_slot = self.current_slot();

        // > Not a new epoch, return
        if !(current_slot > previous_slot && misc::is_epoch_start::<P>(current_slot)) {
            return Ok(());
        }

        // > Update store.justified_checkpoint if a better checkpoint is known
        if self.best_justified_checkpoint.epoch > self.justified_checkpoint.epoch {
            self.update_justified_checkpoint(self.best_justified_checkpoint)?;
        }

        Ok(())
    }

    /// [`on_block`](https://github.com/ethereum/consensus-specs/blob/v0.12.3/specs/phase0/fork-choice.md#on_block)
    pub fn on_block(&mut self, signed_block: &SignedBeaconBlock<P>) -> Result<()> {
        let valid_block = self.validate_block(signed_block)?;
        self.apply_block(valid_block)
    }

    /// Performs the checks from `on_block` and runs the state transition without mutating `self`.
    pub fn validate_block(&self, signed_block: &SignedBeaconBlock<P>) -> Result<ValidBlock<P>> {
        let block = &signed_block.message;

        // > Parent block must be known
        let parent_state = self
            .block_states
            .get(&block.parent_root)
            .ok_or(Error::UnknownParent {
                parent_root: block.parent_root,
            })?;

        // > Blocks cannot be in the future.
        // > If they are, their consideration must be delayed until the are in the past.
        let current_slot = self.current_slot();

        ensure!(
            current_slot >= block.slot,
            Error::BlockFromFuture {
                block_slot: block.slot,
                current_slot,
            },
        );

        self.validate_ancestry(block.slot, block.parent_root)?;

        // > Check the block is valid and compute the post-state
        let mut state = parent_state.as_ref().clone();
        transition_functions::untrusted_state_transition(&self.config, &mut state, signed_block)?;

        Ok(ValidBlock {
            block_root: block.hash_tree_root(),
            header: block.to_header(),
            state: Arc::new(state),
        })
    }

    /// Adds a block returned by [`Store::validate_block`] and updates the checkpoints.
    ///
    /// The store may have changed since the block was validated, so the checks that depend on the
    /// store are repeated.
    pub fn apply_block(&mut self, valid_block: ValidBlock<P>) -> Result<()> {
        let ValidBlock {
            block_root,
            header,
            state,
        } = valid_block;

        if self.contains_block(block_root) {
            debug!("block already known (block_root: {block_root:?})");
            return Ok(());
        }

        ensure!(
            self.block_states.contains_key(&header.parent_root),
            Error::UnknownParent {
                parent_root: header.parent_root,
            },
        );

        self.validate_ancestry(header.slot, header.parent_root)?;

        let state_justified = state.current_justified_checkpoint;
        let state_finalized = state.finalized_checkpoint;

        let mut justified_checkpoint = self.justified_checkpoint;
        let mut best_justified_checkpoint = self.best_justified_checkpoint;
        let mut finalized_checkpoint = self.finalized_checkpoint;

        // > Update justified checkpoint
        if state_justified.epoch > justified_checkpoint.epoch {
            if state_justified.epoch > best_justified_checkpoint.epoch {
                best_justified_checkpoint = state_justified;
            }

            if self.should_update_justified_checkpoint(state_justified) {
                justified_checkpoint = state_justified;
            }
        }

        // > Update finalized checkpoint
        if state_finalized.epoch > finalized_checkpoint.epoch {
            finalized_checkpoint = state_finalized;

            // > Potentially update justified if different from store
            if justified_checkpoint != state_justified {
                let finalized_slot =
                    misc::compute_start_slot_at_epoch::<P>(finalized_checkpoint.epoch);

                // > Update justified if new justified is later than store justified
                // > or if store justified is not in chain with finalized checkpoint
                if state_justified.epoch > justified_checkpoint.epoch
                    || self.get_ancestor(justified_checkpoint.root, finalized_slot)
                        != Some(finalized_checkpoint.root)
                {
                    justified_checkpoint = state_justified;
                }
            }
        }

        let justified_state = self.compute_checkpoint_state(justified_checkpoint)?;

        debug!(
            "block added to fork choice store (block_root: {block_root:?}, slot: {})",
            header.slot,
        );

        self.blocks.insert(block_root, header);
        self.block_states.insert(block_root, state);
        self.checkpoint_states
            .insert(justified_checkpoint, justified_state);

        self.best_justified_checkpoint = best_justified_checkpoint;

        if justified_checkpoint != self.justified_checkpoint {
            info!(
                "justified checkpoint updated (old: {:?}, new: {justified_checkpoint:?})",
                self.justified_checkpoint,
            );

            self.justified_checkpoint = justified_checkpoint;
        }

        if finalized_checkpoint != self.finalized_checkpoint {
            info!(
                "finalized checkpoint updated (old: {:?}, new: {finalized_checkpoint:?})",
                self.finalized_checkpoint,
            );

            self.finalized_checkpoint = finalized_checkpoint;
        }

        Ok(())
    }

    /// [`validate_on_attestation`](https://github.com/ethereum/consensus-specs/blob/v0.12.3/specs/phase0/fork-choice.md#validate_on_attestation)
    pub fn validate_on_attestation(&self, attestation: &Attestation<P>) -> Result<()> {
        let data = &attestation.data;
        let target = data.target;

        // > Attestations must be from the current or previous epoch
        let current_slot = self.current_slot();
        let current_epoch = misc::compute_epoch_at_slot::<P>(current_slot);

        // > Use GENESIS_EPOCH for previous when genesis to avoid underflow
        let previous_epoch = current_epoch.saturating_sub(1).max(GENESIS_EPOCH);

        ensure!(
            target.epoch <= current_epoch,
            Error::AttestationTargetsFutureEpoch {
                target_epoch: target.epoch,
                current_epoch,
            },
        );

        ensure!(
            target.epoch >= previous_epoch,
            Error::AttestationTargetsOldEpoch {
                target_epoch: target.epoch,
                current_epoch,
            },
        );

        ensure!(
            target.epoch == misc::compute_epoch_at_slot::<P>(data.slot),
            Error::AttestationTargetsWrongEpoch {
                attestation_slot: data.slot,
                target,
            },
        );

        // > Attestations target be for a known block.
        // > If target block is unknown, delay consideration until the block is found
        self.known_block(target.root)?;

        // > Attestations must be for a known block. If block is unknown, delay consideration until
        // > the block is found
        let block = self.known_block(data.beacon_block_root)?;

        // > Attestations must not be for blocks in the future. If not, the attestation should not
        // > be considered
        ensure!(
            block.slot <= data.slot,
            Error::AttestationForFutureBlock {
                attestation_slot: data.slot,
                block_slot: block.slot,
            },
        );

        // > LMD vote must be consistent with FFG vote target
        let target_slot = misc::compute_start_slot_at_epoch::<P>(target.epoch);

        ensure!(
            self.get_ancestor(data.beacon_block_root, target_slot) == Some(target.root),
            Error::LmdGhostInconsistentWithFfgTarget { target },
        );

        // > Attestations can only affect the fork choice of subsequent slots.
        // > Delay consideration in the fork choice until their slot is in the past.
        ensure!(
            current_slot > data.slot,
            Error::AttestationFromFuture {
                attestation_slot: data.slot,
                current_slot,
            },
        );

        Ok(())
    }

    /// [`store_target_checkpoint_state`](https://github.com/ethereum/consensus-specs/blob/v0.12.3/specs/phase0/fork-choice.md#store_target_checkpoint_state)
    pub fn store_target_checkpoint_state(&mut self, target: Checkpoint) -> Result<()> {
        // > Store target checkpoint state if not yet seen
        if !self.checkpoint_states.contains_key(&target) {
            let state = self.compute_checkpoint_state(target)?;
            self.checkpoint_states.insert(target, state);
        }

        Ok(())
    }

    /// [`update_latest_messages`](https://github.com/ethereum/consensus-specs/blob/v0.12.3/specs/phase0/fork-choice.md#update_latest_messages)
    pub fn update_latest_messages(
        &mut self,
        attesting_indices: impl IntoIterator<Item = ValidatorIndex>,
        attestation: &Attestation<P>,
    ) {
        let new_message = LatestMessage {
            epoch: attestation.data.target.epoch,
            root: attestation.data.beacon_block_root,
        };

        for validator_index in attesting_indices {
            let is_newer = self
                .latest_messages
                .get(&validator_index)
                .is_none_or(|old_message| new_message.epoch > old_message.epoch);

            if is_newer {
                self.latest_messages.insert(validator_index, new_message);
            }
        }
    }

    /// [`on_attestation`](https://github.com/ethereum/consensus-specs/blob/v0.12.3/specs/phase0/fork-choice.md#on_attestation)
    pub fn on_attestation(&mut self, attestation: &Attestation<P>) -> Result<()> {
        self.validate_on_attestation(attestation)?;

        let target = attestation.data.target;

        self.store_target_checkpoint_state(target)?;

        // > Get state at the `target` to fully validate attestation
        let target_state = self
            .checkpoint_states
            .get(&target)
            .ok_or(Error::MissingCheckpointState { checkpoint: target })?;

        let indexed_attestation = accessors::get_indexed_attestation(target_state, attestation)?;

        predicates::validate_constructed_indexed_attestation(
            &self.config,
            target_state,
            &indexed_attestation,
            SingleVerifier,
        )?;

        // > Update latest messages for attesting indices
        self.update_latest_messages(
            indexed_attestation.attesting_indices.iter().copied(),
            attestation,
        );

        Ok(())
    }

    /// Removes blocks that do not descend from the finalized block along with their states.
    ///
    /// The finalized block becomes the root of the block tree. Latest messages are kept because
    /// removing them would let validators replace their votes with older ones.
    pub fn prune_below_finalized(&mut self) {
        let finalized_checkpoint = self.finalized_checkpoint;
        let finalized_slot = misc::compute_start_slot_at_epoch::<P>(finalized_checkpoint.epoch);

        let pruned_roots = self
            .blocks
            .keys()
            .copied()
            .filter(|root| {
                self.get_ancestor(*root, finalized_slot) != Some(finalized_checkpoint.root)
            })
            .collect::<Vec<_>>();

        for root in &pruned_roots {
            self.blocks.remove(root);
            self.block_states.remove(root);
        }

        let blocks = &self.blocks;

        self.checkpoint_states.retain(|checkpoint, _| {
            checkpoint.epoch >= finalized_checkpoint.epoch && blocks.contains_key(&checkpoint.root)
        });

        if !pruned_roots.is_empty() {
            info!(
                "pruned {} blocks below finalized checkpoint {finalized_checkpoint:?}",
                pruned_roots.len(),
            );
        }
    }

    fn validate_ancestry(&self, slot: Slot, parent_root: H256) -> Result<()> {
        // > Check that block is later than the finalized epoch slot
        // > (optimization to reduce calls to get_ancestor)
        let finalized_slot =
            misc::compute_start_slot_at_epoch::<P>(self.finalized_checkpoint.epoch);

        ensure!(
            slot > finalized_slot,
            Error::BlockNotNewerThanFinalized {
                block_slot: slot,
                finalized_slot,
            },
        );

        // > Check block is a descendant of the finalized block at the checkpoint finalized slot
        //
        // The block itself is newer than `finalized_slot`, so its ancestor is that of its parent.
        ensure!(
            self.get_ancestor(parent_root, finalized_slot) == Some(self.finalized_checkpoint.root),
            Error::BlockNotDescendantOfFinalized {
                finalized_root: self.finalized_checkpoint.root,
            },
        );

        Ok(())
    }

    fn update_justified_checkpoint(&mut self, checkpoint: Checkpoint) -> Result<()> {
        self.store_target_checkpoint_state(checkpoint)?;

        info!(
            "justified checkpoint updated (old: {:?}, new: {checkpoint:?})",
            self.justified_checkpoint,
        );

        self.justified_checkpoint = checkpoint;

        Ok(())
    }

    fn compute_checkpoint_state(&self, checkpoint: Checkpoint) -> Result<Arc<BeaconState<P>>> {
        if let Some(state) = self.checkpoint_states.get(&checkpoint) {
            return Ok(Arc::clone(state));
        }

        let base_state = self
            .block_states
            .get(&checkpoint.root)
            .ok_or(Error::UnknownBlock {
                block_root: checkpoint.root,
            })?;

        let slot = misc::compute_start_slot_at_epoch::<P>(checkpoint.epoch);

        if base_state.slot >= slot {
            return Ok(Arc::clone(base_state));
        }

        let mut state = base_state.as_ref().clone();
        transition_functions::process_slots(&self.config, &mut state, slot)?;
        Ok(Arc::new(state))
    }

    fn justified_checkpoint_state(&self) -> Result<&BeaconState<P>> {
        let checkpoint = self.justified_checkpoint;

        self.checkpoint_states
            .get(&checkpoint)
            .map(Arc::as_ref)
            .ok_or_else(|| Error::MissingCheckpointState { checkpoint }.into())
    }

    fn justified_slot(&self) -> Slot {
        misc::compute_start_slot_at_epoch::<P>(self.justified_checkpoint.epoch)
    }

    fn known_block(&self, block_root: H256) -> Result<&BeaconBlockHeader> {
        self.blocks
            .get(&block_root)
            .ok_or_else(|| Error::UnknownBlock { block_root }.into())
    }

    fn is_viable_leaf(&self, block_root: H256) -> Result<bool> {
        let head_state = self
            .block_states
            .get(&block_root)
            .ok_or(Error::UnknownBlock { block_root })?;

        // > If leaf block, check finalized/justified checkpoints as matching latest.
        let correct_justified = self.justified_checkpoint.epoch == GENESIS_EPOCH
            || head_state.current_justified_checkpoint == self.justified_checkpoint;

        let correct_finalized = self.finalized_checkpoint.epoch == GENESIS_EPOCH
            || head_state.finalized_checkpoint == self.finalized_checkpoint;

        Ok(correct_justified && correct_finalized)
    }

    fn children_by_parent(&self) -> HashMap<H256, Vec<H256>> {
        let mut children = HashMap::<H256, Vec<H256>>::new();

        for (root, block) in &self.blocks {
            children.entry(block.parent_root).or_default().push(*root);
        }

        children
    }
}
