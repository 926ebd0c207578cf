use anyhow::{ensure, Result};
use arithmetic::U64Ext as _;
use bls::CachedPublicKey;
use helper_functions::{
    accessors::{
        attestation_epoch, get_beacon_proposer_index, get_block_root_at_slot,
        get_committee_count_per_slot, get_current_epoch, get_indexed_attestation, get_randao_mix,
        index_of_public_key, initialize_shuffled_indices, slashable_indices,
    },
    error::SignatureKind,
    misc::compute_epoch_at_slot,
    mutators::{balance, increase_balance, initiate_validator_exit, slash_validator},
    phase1::{
        compute_previous_slot, compute_shard_from_committee_index, get_active_shard_count,
        get_custody_period_for_validator, is_on_time_attestation,
    },
    predicates::{
        is_active_validator, is_slashable_attestation_data, is_slashable_validator,
        is_valid_merkle_branch, validate_constructed_indexed_attestation,
        validate_received_indexed_attestation,
    },
    signing::{RandaoEpoch, SignForAllForks as _, SignForSingleFork as _},
    verifier::{MultiVerifier, NullVerifier, SingleVerifier, Triple, Verifier, VerifierOption},
};
use itertools::Itertools as _;
use rayon::iter::{IntoParallelIterator as _, IntoParallelRefIterator as _, ParallelIterator as _};
use ssz::SszHash as _;
use typenum::Unsigned as _;
use types::{
    config::Config,
    nonstandard::AttestationEpoch,
    phase0::{
        consts::{FAR_FUTURE_EPOCH, GENESIS_SLOT},
        containers::{
            BeaconBlockHeader, Deposit, DepositData, DepositMessage, ProposerSlashing,
            SignedVoluntaryExit,
        },
        primitives::{DepositIndex, Gwei, ValidatorIndex, H256},
    },
    phase1::{
        beacon_state::BeaconState,
        consts::ONLINE_PERIOD,
        containers::{
            Attestation, AttesterSlashing, BeaconBlock, BeaconBlockBody, PendingAttestation,
            ShardTransition, Validator,
        },
    },
    preset::{Preset, SlotsPerEth1VotingPeriod},
};

use crate::{error::Error, shard_processing};

pub enum CombinedDeposit {
    NewValidator {
        pubkey: CachedPublicKey,
        withdrawal_credentials: H256,
        amounts: Vec<Gwei>,
    },
    TopUp {
        validator_index: ValidatorIndex,
        amounts: Vec<Gwei>,
    },
}

/// Processes a block whose signatures are checked by `verifier`.
///
/// Shard proposal signatures can only be reconstructed once the winning shard transitions are
/// known, so they are checked as the transitions are applied rather than batched with the rest.
pub fn process_block<P: Preset, V: Verifier>(
    config: &Config,
    state: &mut BeaconState<P>,
    block: &BeaconBlock<P>,
    mut verifier: V,
) -> Result<()> {
    verifier.reserve(count_required_signatures(block));

    if V::IS_NULL {
        custom_process_block(config, state, block, &mut verifier, NullVerifier)?;
    } else {
        custom_process_block(config, state, block, &mut verifier, SingleVerifier)?;
    }

    verifier.finish()
}

pub fn custom_process_block<P: Preset>(
    config: &Config,
    state: &mut BeaconState<P>,
    block: &BeaconBlock<P>,
    mut verifier: impl Verifier,
    shard_verifier: impl Verifier,
) -> Result<()> {
    debug_assert_eq!(state.slot, block.slot);

    process_block_header(state, block)?;
    process_randao(config, state, &block.body, &mut verifier)?;
    process_eth1_data(state, &block.body)?;
    process_operations(config, state, &block.body, verifier)?;

    shard_processing::process_shard_transitions(
        config,
        state,
        &block.body.shard_transitions,
        &block.body.attestations,
        shard_verifier,
    )
}

#[must_use]
pub fn count_required_signatures<P: Preset>(block: &BeaconBlock<P>) -> usize {
    let body = &block.body;

    1 + 2 * body.proposer_slashings.len()
        + 2 * body.attester_slashings.len()
        + body.attestations.len()
        + body.voluntary_exits.len()
}

pub fn process_block_header_for_gossip<P: Preset>(
    state: &BeaconState<P>,
    block: &BeaconBlock<P>,
) -> Result<()> {
    // > Verify that the slots match
    ensure!(
        block.slot == state.slot,
        Error::<P>::SlotMismatch {
            state_slot: state.slot,
            block_slot: block.slot,
        },
    );

    // > Verify that the block is newer than latest block header
    ensure!(
        block.slot > state.latest_block_header.slot,
        Error::<P>::BlockNotNewerThanLatestBlockHeader {
            block_slot: block.slot,
            block_header_slot: state.latest_block_header.slot,
        },
    );

    // > Verify that proposer index is the correct index
    let computed = get_beacon_proposer_index(state)?;
    let in_block = block.proposer_index;

    ensure!(
        computed == in_block,
        Error::<P>::ProposerIndexMismatch { computed, in_block },
    );

    // > Verify that the parent matches
    let computed = state.latest_block_header.hash_tree_root();
    let in_block = block.parent_root;

    ensure!(
        computed == in_block,
        Error::<P>::ParentRootMismatch { computed, in_block },
    );

    Ok(())
}

pub fn process_block_header<P: Preset>(
    state: &mut BeaconState<P>,
    block: &BeaconBlock<P>,
) -> Result<()> {
    process_block_header_for_gossip(state, block)?;

    // > Cache current block as the new latest block
    state.latest_block_header = BeaconBlockHeader {
        // > Overwritten in the next process_slot call
        state_root: H256::zero(),
        ..block.to_header()
    };

    // > Verify proposer is not slashed
    let index = block.proposer_index;
    let proposer = state.validators.get(index)?;

    ensure!(!proposer.slashed, Error::<P>::ProposerSlashed { index });

    Ok(())
}

pub fn process_randao<P: Preset>(
    config: &Config,
    state: &mut BeaconState<P>,
    body: &BeaconBlockBody<P>,
    mut verifier: impl Verifier,
) -> Result<()> {
    let epoch = get_current_epoch(state);
    let randao_reveal = body.randao_reveal;

    // > Verify RANDAO reveal
    if !verifier.has_option(VerifierOption::SkipRandaoVerification) {
        let proposer_index = get_beacon_proposer_index(state)?;
        let public_key = &state.validators.get(proposer_index)?.pubkey;

        verifier.verify_singular(
            RandaoEpoch::from(epoch).signing_root(config, state),
            randao_reveal,
            public_key,
            SignatureKind::Randao,
        )?;
    }

    // > Mix in RANDAO reveal
    let mix = get_randao_mix(state, epoch) ^ hashing::hash_768(randao_reveal);
    *state.randao_mixes.mod_index_mut(epoch) = mix;

    Ok(())
}

pub fn process_eth1_data<P: Preset>(
    state: &mut BeaconState<P>,
    body: &BeaconBlockBody<P>,
) -> Result<()> {
    state.eth1_data_votes.push(body.eth1_data)?;

    let vote_count = state
        .eth1_data_votes
        .iter()
        .filter(|vote| **vote == body.eth1_data)
        .count();

    if vote_count * 2 > SlotsPerEth1VotingPeriod::<P>::USIZE {
        state.eth1_data = body.eth1_data;
    }

    Ok(())
}

fn process_operations<P: Preset, V: Verifier>(
    config: &Config,
    state: &mut BeaconState<P>,
    body: &BeaconBlockBody<P>,
    mut verifier: V,
) -> Result<()> {
    // > Verify that outstanding deposits are processed up to the maximum number of deposits
    let computed = P::MaxDeposits::U64
        .min(state.eth1_data.deposit_count.saturating_sub(state.eth1_deposit_index));
    let in_block = body.deposits.len().try_into()?;

    ensure!(
        computed == in_block,
        Error::<P>::DepositCountMismatch { computed, in_block },
    );

    for proposer_slashing in body.proposer_slashings.iter().copied() {
        validate_proposer_slashing_with_verifier(config, state, proposer_slashing, &mut verifier)?;

        let index = proposer_slashing.signed_header_1.message.proposer_index;

        slash_validator(config, state, index, None)?;
    }

    for attester_slashing in &body.attester_slashings {
        let slashable_indices = validate_attester_slashing_with_verifier(
            config,
            state,
            attester_slashing,
            &mut verifier,
        )?;

        for validator_index in slashable_indices {
            slash_validator(config, state, validator_index, None)?;
        }
    }

    // Attestation validation is cheap compared to signature verification.
    // Run it sequentially when there are no signatures to gather.
    if V::IS_NULL {
        for attestation in &body.attestations {
            validate_attestation_with_verifier(config, state, attestation, &mut verifier)?;
        }
    } else {
        initialize_shuffled_indices(state, &body.attestations)?;

        let triples = body
            .attestations
            .par_iter()
            .map(|attestation| {
                let mut triple = Triple::default();
                validate_attestation_with_verifier(config, state, attestation, &mut triple)?;
                Ok(triple)
            })
            .collect::<Result<Vec<_>>>()?;

        verifier.extend(triples, SignatureKind::Attestation)?;
    }

    for attestation in &body.attestations {
        apply_attestation(state, attestation)?;
    }

    // The conditional only avoids overhead when processing blocks with no deposits.
    if !body.deposits.is_empty() {
        let combined_deposits = validate_deposits(config, state, &body.deposits)?;
        apply_deposits(state, body.deposits.len(), combined_deposits)?;
    }

    for voluntary_exit in body.voluntary_exits.iter().copied() {
        process_voluntary_exit(config, state, voluntary_exit, &mut verifier)?;
    }

    Ok(())
}

pub fn validate_proposer_slashing<P: Preset>(
    config: &Config,
    state: &BeaconState<P>,
    proposer_slashing: ProposerSlashing,
) -> Result<()> {
    validate_proposer_slashing_with_verifier(config, state, proposer_slashing, SingleVerifier)
}

pub fn validate_proposer_slashing_with_verifier<P: Preset>(
    config: &Config,
    state: &BeaconState<P>,
    proposer_slashing: ProposerSlashing,
    mut verifier: impl Verifier,
) -> Result<()> {
    let header_1 = proposer_slashing.signed_header_1.message;
    let header_2 = proposer_slashing.signed_header_2.message;

    // > Verify header slots match
    ensure!(
        header_1.slot == header_2.slot,
        Error::<P>::ProposerSlashingSlotMismatch {
            slot_1: header_1.slot,
            slot_2: header_2.slot,
        },
    );

    // > Verify header proposer indices match
    ensure!(
        header_1.proposer_index == header_2.proposer_index,
        Error::<P>::ProposerSlashingProposerMismatch {
            proposer_index_1: header_1.proposer_index,
            proposer_index_2: header_2.proposer_index,
        },
    );

    // > Verify the headers are different
    ensure!(
        header_1 != header_2,
        Error::<P>::ProposerSlashingHeadersIdentical { header: header_1 },
    );

    // > Verify the proposer is slashable
    let index = header_1.proposer_index;
    let proposer = state.validators.get(index)?;

    ensure!(
        is_slashable_validator(proposer, get_current_epoch(state)),
        Error::<P>::ProposerNotSlashable {
            index,
            proposer: Box::new(proposer.clone()),
        },
    );

    // > Verify signatures
    for signed_header in [
        proposer_slashing.signed_header_1,
        proposer_slashing.signed_header_2,
    ] {
        verifier.verify_singular(
            signed_header.message.signing_root(config, state),
            signed_header.signature,
            &proposer.pubkey,
            SignatureKind::Block,
        )?;
    }

    Ok(())
}

pub fn validate_attester_slashing<P: Preset>(
    config: &Config,
    state: &BeaconState<P>,
    attester_slashing: &AttesterSlashing<P>,
) -> Result<Vec<ValidatorIndex>> {
    validate_attester_slashing_with_verifier(config, state, attester_slashing, SingleVerifier)
}

pub fn validate_attester_slashing_with_verifier<P: Preset>(
    config: &Config,
    state: &BeaconState<P>,
    attester_slashing: &AttesterSlashing<P>,
    mut verifier: impl Verifier,
) -> Result<Vec<ValidatorIndex>> {
    let attestation_1 = &attester_slashing.attestation_1;
    let attestation_2 = &attester_slashing.attestation_2;

    let data_1 = attestation_1.data;
    let data_2 = attestation_2.data;

    ensure!(
        is_slashable_attestation_data(data_1, data_2),
        Error::<P>::AttestationDataNotSlashable { data_1, data_2 },
    );

    validate_received_indexed_attestation(config, state, attestation_1, &mut verifier)?;
    validate_received_indexed_attestation(config, state, attestation_2, verifier)?;

    let current_epoch = get_current_epoch(state);

    let slashable_indices = slashable_indices(attester_slashing)
        .filter(|attester_index| {
            state
                .validators
                .get(*attester_index)
                .is_ok_and(|attester| is_slashable_validator(attester, current_epoch))
        })
        .collect_vec();

    ensure!(
        !slashable_indices.is_empty(),
        Error::<P>::NoAttestersSlashed,
    );

    Ok(slashable_indices)
}

pub fn validate_attestation<P: Preset>(
    config: &Config,
    state: &BeaconState<P>,
    attestation: &Attestation<P>,
) -> Result<()> {
    validate_attestation_with_verifier(config, state, attestation, SingleVerifier)
}

pub fn validate_attestation_with_verifier<P: Preset>(
    config: &Config,
    state: &BeaconState<P>,
    attestation: &Attestation<P>,
    verifier: impl Verifier,
) -> Result<()> {
    let data = attestation.data;

    let attestation_epoch = attestation_epoch(state, data.target.epoch)?;

    let committee_count = get_committee_count_per_slot(state, attestation_epoch.into())?;

    ensure!(
        data.index < committee_count,
        Error::<P>::AttestationCommitteeIndexOutOfBounds {
            index: data.index,
            committee_count,
        },
    );

    let active_shard_count = get_active_shard_count::<P>().get();

    ensure!(
        data.index < active_shard_count,
        Error::<P>::AttestationCommitteeIndexExceedsShardCount {
            index: data.index,
            active_shard_count,
        },
    );

    ensure!(
        data.target.epoch == compute_epoch_at_slot::<P>(data.slot),
        Error::AttestationTargetsWrongEpoch {
            attestation: Box::new(attestation.clone()),
        },
    );

    let low_slot = data.slot + P::MIN_ATTESTATION_INCLUSION_DELAY.get();
    let high_slot = data.slot + P::SlotsPerEpoch::U64;

    ensure!(
        (low_slot..=high_slot).contains(&state.slot),
        Error::<P>::AttestationOutsideInclusionRange {
            state_slot: state.slot,
            attestation_slot: data.slot,
        },
    );

    let in_state = match attestation_epoch {
        AttestationEpoch::Previous => state.previous_justified_checkpoint,
        AttestationEpoch::Current => state.current_justified_checkpoint,
    };
    let in_block = data.source;

    ensure!(
        in_state == in_block,
        Error::<P>::AttestationSourceMismatch { in_state, in_block },
    );

    let previous_slot = compute_previous_slot(state.slot);

    if is_on_time_attestation(state, data) {
        // > Correct parent block root
        let computed = get_block_root_at_slot(state, previous_slot)?;
        let in_attestation = data.beacon_block_root;

        ensure!(
            computed == in_attestation,
            Error::<P>::OnTimeAttestationHeadMismatch {
                computed,
                in_attestation,
            },
        );

        // > Correct shard number
        let computed = compute_shard_from_committee_index(state, data.index, data.slot)?;
        let in_attestation = data.shard;

        ensure!(
            computed == in_attestation,
            Error::<P>::OnTimeAttestationShardMismatch {
                computed,
                in_attestation,
            },
        );

        // > On-time attestations should have a non-empty shard transition root
        let transition_root_valid = if data.slot > GENESIS_SLOT {
            data.shard_transition_root != ShardTransition::default().hash_tree_root()
        } else {
            data.shard_transition_root.is_zero()
        };

        ensure!(
            transition_root_valid,
            Error::<P>::OnTimeAttestationTransitionRootInvalid {
                attestation_slot: data.slot,
                shard_transition_root: data.shard_transition_root,
            },
        );
    } else {
        // > Ensure delayed attestation
        ensure!(
            data.slot < previous_slot,
            Error::<P>::LateAttestationNotDelayed {
                state_slot: state.slot,
                attestation_slot: data.slot,
            },
        );

        // > Late attestations cannot have a shard transition root
        ensure!(
            data.shard_transition_root.is_zero(),
            Error::<P>::LateAttestationWithTransitionRoot {
                shard_transition_root: data.shard_transition_root,
            },
        );
    }

    // The length of `attestation.aggregation_bits` is checked by `get_attesting_indices`.
    let indexed_attestation = get_indexed_attestation(state, attestation)?;

    // > Verify signature
    validate_constructed_indexed_attestation(config, state, &indexed_attestation, verifier)
}

fn apply_attestation<P: Preset>(
    state: &mut BeaconState<P>,
    attestation: &Attestation<P>,
) -> Result<()> {
    let data = attestation.data;

    // `crosslink_success` is filled in by `process_shard_transitions`.
    let pending_attestation = PendingAttestation {
        aggregation_bits: attestation.aggregation_bits.clone(),
        data,
        inclusion_delay: state.slot - data.slot,
        proposer_index: get_beacon_proposer_index(state)?,
        crosslink_success: false,
    };

    let attestations = match attestation_epoch(state, data.target.epoch)? {
        AttestationEpoch::Previous => &mut state.previous_epoch_attestations,
        AttestationEpoch::Current => &mut state.current_epoch_attestations,
    };

    attestations.push(pending_attestation).map_err(Into::into)
}

pub fn validate_deposits<'deposits, P: Preset>(
    config: &Config,
    state: &BeaconState<P>,
    deposits: impl IntoIterator<Item = &'deposits Deposit>,
) -> Result<impl Iterator<Item = CombinedDeposit>> {
    let deposits_by_pubkey = (0..)
        .zip(deposits)
        .into_group_map_by(|(_, deposit)| deposit.data.pubkey)
        .into_values()
        .map(|deposits| {
            let (_, first_deposit) = deposits[0];
            let existing_validator_index = index_of_public_key(state, first_deposit.data.pubkey);
            let cached_public_key = CachedPublicKey::from(first_deposit.data.pubkey);
            (existing_validator_index, cached_public_key, deposits)
        })
        .collect_vec();

    // Optimistically verify the signatures of new validators as a batch.
    // If that fails, fall back to verifying them one by one.
    let required_signatures_valid = deposits_by_pubkey
        .par_iter()
        .filter(|(existing_validator_index, _, _)| existing_validator_index.is_none())
        .map(|(_, cached_public_key, deposits)| {
            let (_, first_deposit) = deposits[0];

            let public_key = *cached_public_key.decompress()?;

            // > Verify the deposit signature (proof of possession)
            // > which is not checked by the deposit contract
            let deposit_message = DepositMessage::from(first_deposit.data);

            // > Fork-agnostic domain since deposits are valid across forks
            let signing_root = deposit_message.signing_root(config);

            Ok(Triple::new(
                signing_root,
                first_deposit.data.signature,
                public_key,
            ))
        })
        .collect::<Result<Vec<_>>>()
        .and_then(|triples| MultiVerifier::from(triples).finish())
        .is_ok();

    let mut combined_deposits = deposits_by_pubkey
        .into_par_iter()
        .map(|(existing_validator_index, cached_public_key, deposits)| {
            for (position, deposit) in deposits.iter().copied() {
                // > Verify the Merkle branch
                verify_deposit_merkle_branch(state, state.eth1_deposit_index + position, deposit)?;
            }

            let (first_position, _) = deposits[0];

            if let Some(validator_index) = existing_validator_index {
                let amounts = deposits
                    .into_iter()
                    .map(|(_, deposit)| deposit.data.amount)
                    .collect();

                let combined_deposit = CombinedDeposit::TopUp {
                    validator_index,
                    amounts,
                };

                return Ok(Some((first_position, combined_deposit)));
            }

            let mut deposits = deposits.into_iter();

            let first_valid = if required_signatures_valid {
                deposits.next()
            } else {
                deposits.find(|(_, deposit)| {
                    DepositMessage::from(deposit.data)
                        .verify(config, deposit.data.signature, &cached_public_key)
                        .is_ok()
                })
            };

            Ok(first_valid.map(|(position, deposit)| {
                let DepositData {
                    withdrawal_credentials,
                    amount: first_amount,
                    ..
                } = deposit.data;

                // Deposits after the first valid one top up the new validator.
                let amounts = core::iter::once(first_amount)
                    .chain(deposits.map(|(_, deposit)| deposit.data.amount))
                    .collect();

                let combined_deposit = CombinedDeposit::NewValidator {
                    pubkey: cached_public_key,
                    withdrawal_credentials,
                    amounts,
                };

                (position, combined_deposit)
            }))
        })
        .filter_map(Result::transpose)
        .collect::<Result<Vec<_>>>()?;

    combined_deposits.sort_unstable_by_key(|(position, _)| *position);

    Ok(combined_deposits
        .into_iter()
        .map(|(_, combined_deposit)| combined_deposit))
}

pub fn verify_deposit_merkle_branch<P: Preset>(
    state: &BeaconState<P>,
    eth1_deposit_index: DepositIndex,
    deposit: &Deposit,
) -> Result<()> {
    ensure!(
        is_valid_merkle_branch(
            deposit.data.hash_tree_root(),
            deposit.proof.iter().copied(),
            eth1_deposit_index,
            state.eth1_data.deposit_root,
        ),
        Error::<P>::DepositProofInvalid {
            deposit: Box::new(deposit.clone()),
        },
    );

    Ok(())
}

// This is used to compute the genesis state.
// Unlike `validate_deposits`, this doesn't verify `Deposit.proof`.
// Genesis deposits are checked against the deposit root by the caller.
pub fn process_deposit_data<P: Preset>(
    config: &Config,
    state: &mut BeaconState<P>,
    deposit_data: DepositData,
) -> Result<Option<ValidatorIndex>> {
    let DepositData {
        pubkey,
        withdrawal_credentials,
        amount,
        signature,
    } = deposit_data;

    if let Some(validator_index) = index_of_public_key(state, pubkey) {
        let combined_deposit = CombinedDeposit::TopUp {
            validator_index,
            amounts: vec![amount],
        };

        apply_deposits(state, 1, core::iter::once(combined_deposit))?;

        return Ok(Some(validator_index));
    }

    // > Verify the deposit signature (proof of possession)
    // > which is not checked by the deposit contract
    let deposit_message = DepositMessage::from(deposit_data);

    let pubkey = CachedPublicKey::from(pubkey);

    // > Fork-agnostic domain since deposits are valid across forks
    if deposit_message.verify(config, signature, &pubkey).is_ok() {
        let validator_index = state.validators.len().try_into()?;

        let combined_deposit = CombinedDeposit::NewValidator {
            pubkey,
            withdrawal_credentials,
            amounts: vec![amount],
        };

        apply_deposits(state, 1, core::iter::once(combined_deposit))?;

        return Ok(Some(validator_index));
    }

    apply_deposits(state, 1, core::iter::empty())?;

    Ok(None)
}

fn apply_deposits<P: Preset>(
    state: &mut BeaconState<P>,
    deposit_count: usize,
    combined_deposits: impl IntoIterator<Item = CombinedDeposit>,
) -> Result<()> {
    // > Deposits must be processed in order
    state.eth1_deposit_index += DepositIndex::try_from(deposit_count)?;

    let current_epoch = get_current_epoch(state);

    for combined_deposit in combined_deposits {
        match combined_deposit {
            // > Add validator and balance entries
            CombinedDeposit::NewValidator {
                pubkey,
                withdrawal_credentials,
                amounts,
            } => {
                let public_key_bytes = pubkey.to_bytes();
                let first_amount = amounts.first().copied().unwrap_or_default();
                let total_amount = amounts.iter().sum();

                let effective_balance = first_amount
                    .prev_multiple_of(P::EFFECTIVE_BALANCE_INCREMENT)
                    .min(P::MAX_EFFECTIVE_BALANCE);

                let validator_index = state.validators.len().try_into()?;

                let validator = Validator {
                    pubkey,
                    withdrawal_credentials,
                    effective_balance,
                    slashed: false,
                    activation_eligibility_epoch: FAR_FUTURE_EPOCH,
                    activation_epoch: FAR_FUTURE_EPOCH,
                    exit_epoch: FAR_FUTURE_EPOCH,
                    withdrawable_epoch: FAR_FUTURE_EPOCH,
                    next_custody_secret_to_reveal: get_custody_period_for_validator::<P>(
                        validator_index,
                        current_epoch,
                    ),
                    all_custody_secrets_revealed_epoch: FAR_FUTURE_EPOCH,
                };

                state.validators.push(validator)?;
                state.balances.push(total_amount)?;
                state.online_countdown.push(ONLINE_PERIOD)?;
                state.cache.add_validator_index(public_key_bytes, validator_index);
            }
            // > Increase balance by deposit amount
            CombinedDeposit::TopUp {
                validator_index,
                amounts,
            } => {
                increase_balance(balance(state, validator_index)?, amounts.iter().sum());
            }
        }
    }

    Ok(())
}

pub fn process_voluntary_exit<P: Preset>(
    config: &Config,
    state: &mut BeaconState<P>,
    signed_voluntary_exit: SignedVoluntaryExit,
    verifier: impl Verifier,
) -> Result<()> {
    validate_voluntary_exit_with_verifier(config, state, signed_voluntary_exit, verifier)?;

    // > Initiate exit
    initiate_validator_exit(config, state, signed_voluntary_exit.message.validator_index)
}

pub fn validate_voluntary_exit<P: Preset>(
    config: &Config,
    state: &BeaconState<P>,
    signed_voluntary_exit: SignedVoluntaryExit,
) -> Result<()> {
    validate_voluntary_exit_with_verifier(config, state, signed_voluntary_exit, SingleVerifier)
}

pub fn validate_voluntary_exit_with_verifier<P: Preset>(
    config: &Config,
    state: &BeaconState<P>,
    signed_voluntary_exit: SignedVoluntaryExit,
    mut verifier: impl Verifier,
) -> Result<()> {
    let voluntary_exit = signed_voluntary_exit.message;
    let index = voluntary_exit.validator_index;
    let validator = state.validators.get(index)?;
    let current_epoch = get_current_epoch(state);

    // > Verify the validator is active
    ensure!(
        is_active_validator(validator, current_epoch),
        Error::<P>::ValidatorNotActive {
            index,
            validator: Box::new(validator.clone()),
            current_epoch,
        },
    );

    // > Verify exit has not been initiated
    ensure!(
        validator.exit_epoch == FAR_FUTURE_EPOCH,
        Error::<P>::ValidatorAlreadyExited {
            index,
            exit_epoch: validator.exit_epoch,
        },
    );

    // > Exits must specify an epoch when they become valid; they are not valid before then
    ensure!(
        current_epoch >= voluntary_exit.epoch,
        Error::<P>::VoluntaryExitIsExpired {
            current_epoch,
            epoch: voluntary_exit.epoch,
        },
    );

    // > Verify the validator has been active long enough
    ensure!(
        current_epoch >= validator.activation_epoch + config.shard_committee_period,
        Error::<P>::ValidatorHasNotBeenActiveLongEnough {
            index,
            activation_epoch: validator.activation_epoch,
            current_epoch,
        },
    );

    // > Verify signature
    verifier.verify_singular(
        voluntary_exit.signing_root(config, state),
        signed_voluntary_exit.signature,
        &validator.pubkey,
        SignatureKind::VoluntaryExit,
    )
}
