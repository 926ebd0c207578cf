use core::ops::Not as _;

use anyhow::{ensure, Error as AnyhowError, Result};
use helper_functions::{
    accessors,
    error::SignatureKind,
    misc, predicates,
    signing::{RandaoEpoch, SignForSingleFork as _},
    verifier::{NullVerifier, SingleVerifier, Triple, Verifier, VerifierOption},
};
use rayon::iter::{IntoParallelRefIterator as _, ParallelIterator as _};
use ssz::SszHash as _;
use types::{
    config::Config,
    phase1::{
        beacon_state::BeaconState,
        containers::{BeaconBlock, SignedBeaconBlock},
    },
    preset::Preset,
};

use crate::{
    block_processing,
    error::Error,
    slot_processing::{self, ProcessSlots},
};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum StateRootPolicy {
    Verify,
    Trust,
}

impl StateRootPolicy {
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn verify<P: Preset>(self, state: &BeaconState<P>, block: &BeaconBlock<P>) -> Result<()> {
        if self == Self::Verify {
            let computed = state.hash_tree_root();
            let in_block = block.state_root;

            ensure!(
                computed == in_block,
                Error::<P>::StateRootMismatch { computed, in_block },
            );
        }

        Ok(())
    }
}

/// Applies a block with every check enabled.
///
/// `state` is modified in place and may be left partially updated if the block is invalid.
/// Callers that need to keep the pre-state should pass a clone.
pub fn untrusted_state_transition<P: Preset>(
    config: &Config,
    state: &mut BeaconState<P>,
    signed_block: &SignedBeaconBlock<P>,
) -> Result<()> {
    state_transition(
        config,
        state,
        signed_block,
        ProcessSlots::IfNeeded,
        StateRootPolicy::Verify,
        SingleVerifier,
    )
}

/// Applies a block that is already known to be valid, such as one loaded from storage.
pub fn trusted_state_transition<P: Preset>(
    config: &Config,
    state: &mut BeaconState<P>,
    signed_block: &SignedBeaconBlock<P>,
) -> Result<()> {
    state_transition(
        config,
        state,
        signed_block,
        ProcessSlots::IfNeeded,
        StateRootPolicy::Trust,
        NullVerifier,
    )
}

#[tracing::instrument(level = "debug", skip_all, fields(slot = signed_block.message.slot))]
pub fn state_transition<P: Preset, V: Verifier + Send>(
    config: &Config,
    state: &mut BeaconState<P>,
    signed_block: &SignedBeaconBlock<P>,
    process_slots: ProcessSlots,
    state_root_policy: StateRootPolicy,
    verifier: V,
) -> Result<()> {
    let block = &signed_block.message;

    // > Process slots (including those with no blocks) since block
    if process_slots.should_process(state, block) {
        slot_processing::process_slots(config, state, block.slot)?;
    }

    // Signatures in the block are checked against the state before the block is applied.
    // Doing that in parallel with block processing hides most of the cost of verification.
    let verify_signatures = V::IS_NULL.not().then(|| {
        let state = state.clone();

        // > Verify signature
        move || verify_signatures(config, &state, signed_block, verifier)
    });

    let mut process_block = || {
        // > Process block
        if V::IS_NULL {
            block_processing::custom_process_block(
                config,
                state,
                block,
                NullVerifier,
                NullVerifier,
            )?;
        } else {
            block_processing::custom_process_block(
                config,
                state,
                block,
                NullVerifier,
                SingleVerifier,
            )?;
        }

        // > Verify state root
        state_root_policy.verify(state, block)
    };

    if let Some(verify_signatures) = verify_signatures {
        let (signature_result, block_result) = rayon::join(verify_signatures, process_block);
        signature_result.and(block_result)
    } else {
        process_block()
    }
}

/// Verifies every signature in `block` except shard proposal signatures.
///
/// Those can only be reconstructed while the winning shard transitions are applied.
pub fn verify_signatures<P: Preset>(
    config: &Config,
    state: &BeaconState<P>,
    block: &SignedBeaconBlock<P>,
    mut verifier: impl Verifier,
) -> Result<()> {
    verifier.reserve(count_required_signatures(block));

    // Block signature

    verifier.verify_singular(
        block.message.signing_root(config, state),
        block.signature,
        accessors::public_key(state, block.message.proposer_index)?,
        SignatureKind::Block,
    )?;

    // RANDAO reveal

    if !verifier.has_option(VerifierOption::SkipRandaoVerification) {
        verifier.verify_singular(
            RandaoEpoch::from(misc::compute_epoch_at_slot::<P>(block.message.slot))
                .signing_root(config, state),
            block.message.body.randao_reveal,
            accessors::public_key(state, block.message.proposer_index)?,
            SignatureKind::Randao,
        )?;
    }

    // Proposer slashings

    for proposer_slashing in &block.message.body.proposer_slashings {
        for signed_header in [
            proposer_slashing.signed_header_1,
            proposer_slashing.signed_header_2,
        ] {
            verifier.verify_singular(
                signed_header.message.signing_root(config, state),
                signed_header.signature,
                accessors::public_key(state, signed_header.message.proposer_index)?,
                SignatureKind::Block,
            )?;
        }
    }

    // Attester slashings

    for attester_slashing in &block.message.body.attester_slashings {
        for attestation in [
            &attester_slashing.attestation_1,
            &attester_slashing.attestation_2,
        ] {
            itertools::process_results(
                attestation
                    .attesting_indices
                    .iter()
                    .copied()
                    .map(|validator_index| {
                        accessors::public_key(state, validator_index)?
                            .decompress()
                            .map_err(AnyhowError::new)
                    }),
                |public_keys| {
                    verifier.verify_aggregate(
                        attestation.data.signing_root(config, state),
                        attestation.signature,
                        public_keys,
                        SignatureKind::Attestation,
                    )
                },
            )??;
        }
    }

    // Attestations

    let attestations = &block.message.body.attestations;

    accessors::initialize_shuffled_indices(state, attestations)?;

    let triples = attestations
        .par_iter()
        .map(|attestation| {
            let indexed_attestation = accessors::get_indexed_attestation(state, attestation)?;

            let mut triple = Triple::default();

            predicates::validate_constructed_indexed_attestation(
                config,
                state,
                &indexed_attestation,
                &mut triple,
            )?;

            Ok(triple)
        })
        .collect::<Result<Vec<_>>>()?;

    verifier.extend(triples, SignatureKind::Attestation)?;

    // Voluntary exits

    for voluntary_exit in &block.message.body.voluntary_exits {
        verifier.verify_singular(
            voluntary_exit.message.signing_root(config, state),
            voluntary_exit.signature,
            accessors::public_key(state, voluntary_exit.message.validator_index)?,
            SignatureKind::VoluntaryExit,
        )?;
    }

    verifier.finish()
}

fn count_required_signatures(block: &SignedBeaconBlock<impl Preset>) -> usize {
    1 + block_processing::count_required_signatures(&block.message)
}
