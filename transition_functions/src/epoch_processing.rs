use core::ops::Mul as _;

use anyhow::Result;
use arithmetic::{NonZeroExt as _, U64Ext as _};
use helper_functions::{
    accessors::{
        get_attesting_indices, get_block_root, get_current_epoch, get_next_epoch,
        get_previous_epoch, get_randao_mix, get_validator_churn_limit, total_active_balance,
    },
    misc::compute_activation_exit_epoch,
    mutators::{decrease_balance, increase_balance, initiate_validator_exit},
    phase1::get_start_shard,
    predicates::{
        is_active_validator, is_eligible_for_activation, is_eligible_for_activation_queue,
    },
};
use itertools::Itertools as _;
use ssz::{ContiguousList, SszHash as _};
use typenum::Unsigned as _;
use types::{
    config::Config,
    phase0::{
        consts::GENESIS_EPOCH,
        containers::{Checkpoint, HistoricalBatch},
        primitives::{Epoch, Gwei},
    },
    phase1::{beacon_state::BeaconState, consts::ONLINE_PERIOD},
    preset::{EpochsPerSlashingsVector, Preset},
};

use crate::epoch_intermediates::{self, EpochDeltas, Statistics, ValidatorSummary};

#[tracing::instrument(level = "debug", skip_all, fields(slot = state.slot))]
pub fn process_epoch<P: Preset>(config: &Config, state: &mut BeaconState<P>) -> Result<()> {
    let (statistics, mut summaries, performance) = epoch_intermediates::statistics(state)?;

    process_justification_and_finalization(state, statistics)?;

    // Epoch deltas must be computed after `process_justification_and_finalization` because the
    // inactivity leak depends on the updated `BeaconState.finalized_checkpoint`.
    if should_process_rewards_and_penalties(state) {
        let epoch_deltas = epoch_intermediates::epoch_deltas(
            state,
            statistics,
            summaries.iter().copied(),
            performance,
        )?;

        process_rewards_and_penalties(state, epoch_deltas);
    }

    process_registry_updates(config, state, &mut summaries)?;
    process_slashings(state, summaries)?;
    process_final_updates(state)?;
    process_phase_1_final_updates(state)?;

    tracing::debug!(
        current_justified_epoch = state.current_justified_checkpoint.epoch,
        finalized_epoch = state.finalized_checkpoint.epoch,
        start_shard = state.current_epoch_start_shard,
        "epoch processed",
    );

    state.cache.advance_epoch();

    Ok(())
}

pub fn process_justification_and_finalization<P: Preset>(
    state: &mut BeaconState<P>,
    statistics: Statistics,
) -> Result<()> {
    if !should_process_justification_and_finalization(state) {
        return Ok(());
    }

    weigh_justification_and_finalization(
        state,
        statistics.current_epoch_active_balance,
        statistics.previous_epoch_target_attesting_balance,
        statistics.current_epoch_target_attesting_balance,
    )
}

pub fn weigh_justification_and_finalization<P: Preset>(
    state: &mut BeaconState<P>,
    total_active_balance: Gwei,
    previous_epoch_target_balance: Gwei,
    current_epoch_target_balance: Gwei,
) -> Result<()> {
    let previous_epoch = get_previous_epoch(state);
    let current_epoch = get_current_epoch(state);
    let old_previous_justified_checkpoint = state.previous_justified_checkpoint;
    let old_current_justified_checkpoint = state.current_justified_checkpoint;

    // > Process justifications
    state.previous_justified_checkpoint = state.current_justified_checkpoint;
    state.justification_bits.shift_up_by_1();

    let mut justify_if_supermajority = |epoch: Epoch, bit, target_balance: Gwei| -> Result<()> {
        if target_balance * 3 >= total_active_balance * 2 {
            state.current_justified_checkpoint = Checkpoint {
                epoch,
                root: get_block_root(state, epoch)?,
            };

            state.justification_bits.set(bit, true);
        }

        Ok(())
    };

    justify_if_supermajority(previous_epoch, 1, previous_epoch_target_balance)?;
    justify_if_supermajority(current_epoch, 0, current_epoch_target_balance)?;

    // > Process finalizations
    let bits = &state.justification_bits;

    // > The 2nd/3rd/4th most recent epochs are justified, the 2nd using the 4th as source
    let finalize_previous_with_4th = bits.all_in(1..4)
        && old_previous_justified_checkpoint.epoch + 3 == current_epoch;

    // > The 2nd/3rd most recent epochs are justified, the 2nd using the 3rd as source
    let finalize_previous_with_3rd = bits.all_in(1..3)
        && old_previous_justified_checkpoint.epoch + 2 == current_epoch;

    // > The 1st/2nd/3rd most recent epochs are justified, the 1st using the 3rd as source
    let finalize_current_with_3rd = bits.all_in(0..3)
        && old_current_justified_checkpoint.epoch + 2 == current_epoch;

    // > The 1st/2nd most recent epochs are justified, the 1st using the 2nd as source
    let finalize_current_with_2nd = bits.all_in(0..2)
        && old_current_justified_checkpoint.epoch + 1 == current_epoch;

    if finalize_previous_with_4th || finalize_previous_with_3rd {
        state.finalized_checkpoint = old_previous_justified_checkpoint;
    }

    if finalize_current_with_3rd || finalize_current_with_2nd {
        state.finalized_checkpoint = old_current_justified_checkpoint;
    }

    Ok(())
}

pub fn process_rewards_and_penalties<P: Preset>(
    state: &mut BeaconState<P>,
    deltas: impl IntoIterator<Item = EpochDeltas>,
) {
    for (balance, deltas) in state.balances.iter_mut().zip(deltas) {
        increase_balance(balance, deltas.combined_reward());
        decrease_balance(balance, deltas.combined_penalty());
    }
}

pub fn process_registry_updates<P: Preset>(
    config: &Config,
    state: &mut BeaconState<P>,
    summaries: &mut [ValidatorSummary],
) -> Result<()> {
    let current_epoch = get_current_epoch(state);
    let next_epoch = get_next_epoch(state);

    // The indices collected in these do not overlap.
    let mut eligible_for_activation_queue = vec![];
    let mut ejections = vec![];
    let mut activation_queue = vec![];

    for (validator, validator_index) in state.validators.iter().zip(0..) {
        if is_eligible_for_activation_queue::<P>(validator) {
            eligible_for_activation_queue.push(validator_index);
        }

        if is_active_validator(validator, current_epoch)
            && validator.effective_balance <= config.ejection_balance
        {
            ejections.push(validator_index);
        }

        if is_eligible_for_activation(state, validator) {
            activation_queue.push((validator_index, validator.activation_eligibility_epoch));
        }
    }

    // > Process activation eligibility and ejections
    for validator_index in eligible_for_activation_queue {
        state
            .validators
            .get_mut(validator_index)?
            .activation_eligibility_epoch = next_epoch;
    }

    for validator_index in ejections {
        initiate_validator_exit(config, state, validator_index)?;

        // `process_slashings` depends on `Validator.withdrawable_epoch`,
        // which may have been modified by `initiate_validator_exit`.
        if let Some(summary) = summaries.get_mut(usize::try_from(validator_index)?) {
            summary.update_from(state.validators.get(validator_index)?);
        }
    }

    // > Queue validators eligible for activation and not yet dequeued for activation
    let activation_queue = activation_queue
        .into_iter()
        .sorted_by_key(|&(validator_index, activation_eligibility_epoch)| {
            // > Order by the sequence of activation_eligibility_epoch setting and then index
            (activation_eligibility_epoch, validator_index)
        })
        .map(|(validator_index, _)| validator_index);

    // > Dequeued validators for activation up to churn limit
    let churn_limit = get_validator_churn_limit(config, state)?.try_into()?;
    let activation_exit_epoch = compute_activation_exit_epoch::<P>(current_epoch);

    for validator_index in activation_queue.take(churn_limit) {
        state.validators.get_mut(validator_index)?.activation_epoch = activation_exit_epoch;
    }

    Ok(())
}

pub fn process_slashings<P: Preset>(
    state: &mut BeaconState<P>,
    summaries: impl IntoIterator<Item = ValidatorSummary>,
) -> Result<()> {
    let current_epoch = get_current_epoch(state);
    let total_active_balance = total_active_balance(state)?;

    let adjusted_total_slashing_balance = state
        .slashings
        .iter()
        .sum::<Gwei>()
        .mul(P::PROPORTIONAL_SLASHING_MULTIPLIER)
        .min(total_active_balance.get());

    for (balance, summary) in state.balances.iter_mut().zip(summaries) {
        let ValidatorSummary {
            effective_balance,
            slashed,
            withdrawable_epoch,
            ..
        } = summary;

        let halfway_to_withdrawal = current_epoch + EpochsPerSlashingsVector::<P>::U64 / 2;

        if !slashed || halfway_to_withdrawal != withdrawable_epoch {
            continue;
        }

        // > Factored out from penalty numerator to avoid uint64 overflow
        let increment = P::EFFECTIVE_BALANCE_INCREMENT;
        let penalty_numerator = effective_balance / increment * adjusted_total_slashing_balance;
        let penalty = penalty_numerator / total_active_balance * increment.get();

        decrease_balance(balance, penalty);
    }

    Ok(())
}

pub fn process_final_updates<P: Preset>(state: &mut BeaconState<P>) -> Result<()> {
    process_eth1_data_reset(state);
    process_effective_balance_updates(state);
    process_slashings_reset(state);
    process_randao_mixes_reset(state);
    process_historical_roots_update(state)?;
    process_participation_record_updates(state);
    Ok(())
}

fn process_eth1_data_reset<P: Preset>(state: &mut BeaconState<P>) {
    let next_epoch = get_next_epoch(state);

    // > Reset eth1 data votes
    if next_epoch.is_multiple_of_nonzero(P::EpochsPerEth1VotingPeriod::non_zero()) {
        state.eth1_data_votes = ContiguousList::default();
    }
}

fn process_effective_balance_updates<P: Preset>(state: &mut BeaconState<P>) {
    let hysteresis_increment = P::EFFECTIVE_BALANCE_INCREMENT.get() / P::HYSTERESIS_QUOTIENT;
    let downward_threshold = hysteresis_increment * P::HYSTERESIS_DOWNWARD_MULTIPLIER;
    let upward_threshold = hysteresis_increment * P::HYSTERESIS_UPWARD_MULTIPLIER;

    // > Update effective balances with hysteresis
    for (validator, balance) in state.validators.iter_mut().zip(state.balances.iter().copied()) {
        let below = balance + downward_threshold < validator.effective_balance;
        let above = validator.effective_balance + upward_threshold < balance;

        if below || above {
            validator.effective_balance = balance
                .prev_multiple_of(P::EFFECTIVE_BALANCE_INCREMENT)
                .min(P::MAX_EFFECTIVE_BALANCE);
        }
    }

    state.cache.invalidate_total_active_balances();
}

fn process_slashings_reset<P: Preset>(state: &mut BeaconState<P>) {
    let next_epoch = get_next_epoch(state);

    // > Reset slashings
    *state.slashings.mod_index_mut(next_epoch) = 0;
}

fn process_randao_mixes_reset<P: Preset>(state: &mut BeaconState<P>) {
    let current_epoch = get_current_epoch(state);
    let next_epoch = get_next_epoch(state);

    // > Set randao mix
    *state.randao_mixes.mod_index_mut(next_epoch) = get_randao_mix(state, current_epoch);
}

fn process_historical_roots_update<P: Preset>(state: &mut BeaconState<P>) -> Result<()> {
    let next_epoch = get_next_epoch(state);

    // > Set historical root accumulator
    if next_epoch.is_multiple_of_nonzero(P::EpochsPerHistoricalRoot::non_zero()) {
        let historical_batch = HistoricalBatch::<P> {
            block_roots: state.block_roots.clone(),
            state_roots: state.state_roots.clone(),
        };

        state.historical_roots.push(historical_batch.hash_tree_root())?;
    }

    Ok(())
}

fn process_participation_record_updates<P: Preset>(state: &mut BeaconState<P>) {
    // > Rotate current/previous epoch attestations
    state.previous_epoch_attestations = core::mem::take(&mut state.current_epoch_attestations);
}

pub fn process_phase_1_final_updates<P: Preset>(state: &mut BeaconState<P>) -> Result<()> {
    process_online_tracking(state)?;

    // > Update current_epoch_start_shard
    state.current_epoch_start_shard = get_start_shard(state, state.slot + 1)?;

    Ok(())
}

fn process_online_tracking<P: Preset>(state: &mut BeaconState<P>) -> Result<()> {
    // > Slowly remove validators from the "online" set if they don't show up
    for countdown in state.online_countdown.iter_mut() {
        *countdown = countdown.saturating_sub(1);
    }

    // > Process pending attestations
    let mut online = vec![];

    for attestation in state
        .current_epoch_attestations
        .iter()
        .chain(&state.previous_epoch_attestations)
    {
        online.extend(get_attesting_indices(
            state,
            attestation.data,
            &attestation.aggregation_bits,
        )?);
    }

    for validator_index in online {
        *state.online_countdown.get_mut(validator_index)? = ONLINE_PERIOD;
    }

    Ok(())
}

#[must_use]
pub fn should_process_justification_and_finalization<P: Preset>(state: &BeaconState<P>) -> bool {
    // > Initial FFG checkpoint values have a `0x00` stub for `root`.
    // > Skip FFG updates in the first two epochs to avoid
    // > corner cases that might result in modifying this stub.
    GENESIS_EPOCH + 1 < get_current_epoch(state)
}

#[must_use]
pub fn should_process_rewards_and_penalties<P: Preset>(state: &BeaconState<P>) -> bool {
    // > No rewards are applied at the end of `GENESIS_EPOCH`
    // > because rewards are for work done in the previous epoch
    GENESIS_EPOCH < get_current_epoch(state)
}

#[cfg(test)]
mod tests {
    use ssz::BitList;
    use test_case::test_case;
    use types::{
        phase0::{consts::FAR_FUTURE_EPOCH, primitives::H256},
        phase1::containers::{AttestationData, PendingAttestation, Validator},
        preset::Minimal,
    };

    use super::*;

    const MAX: Gwei = Minimal::MAX_EFFECTIVE_BALANCE;

    fn active_validator() -> Validator {
        Validator {
            effective_balance: MAX,
            activation_eligibility_epoch: 0,
            exit_epoch: FAR_FUTURE_EPOCH,
            withdrawable_epoch: FAR_FUTURE_EPOCH,
            ..Validator::default()
        }
    }

    fn state_with(validators: Vec<Validator>, slot: u64) -> Result<BeaconState<Minimal>> {
        let count = validators.len();

        Ok(BeaconState {
            slot,
            balances: vec![MAX; count].try_into()?,
            online_countdown: vec![0; count].try_into()?,
            validators: validators.try_into()?,
            ..BeaconState::default()
        })
    }

    #[test]
    fn supermajority_in_consecutive_epochs_finalizes_older_checkpoint() -> Result<()> {
        let mut state = state_with(vec![active_validator(); 4], 4 * 8 - 1)?;

        state.previous_justified_checkpoint = Checkpoint {
            epoch: 1,
            root: H256::repeat_byte(1),
        };

        state.current_justified_checkpoint = Checkpoint {
            epoch: 2,
            root: H256::repeat_byte(2),
        };

        weigh_justification_and_finalization(&mut state, 300, 200, 200)?;

        assert!(state.justification_bits.all_in(0..2));
        assert_eq!(state.previous_justified_checkpoint.epoch, 2);
        assert_eq!(state.current_justified_checkpoint.epoch, 3);
        assert_eq!(
            state.finalized_checkpoint,
            Checkpoint {
                epoch: 2,
                root: H256::repeat_byte(2),
            },
        );

        Ok(())
    }

    #[test]
    fn insufficient_target_balance_justifies_nothing() -> Result<()> {
        let mut state = state_with(vec![active_validator(); 4], 4 * 8 - 1)?;

        weigh_justification_and_finalization(&mut state, 300, 199, 199)?;

        assert!(!state.justification_bits.any());
        assert_eq!(state.current_justified_checkpoint, Checkpoint::default());
        assert_eq!(state.finalized_checkpoint, Checkpoint::default());

        Ok(())
    }

    #[test]
    fn registry_updates_queue_eject_and_activate() -> Result<()> {
        let config = Config::minimal();

        let new_deposit = Validator {
            activation_eligibility_epoch: FAR_FUTURE_EPOCH,
            activation_epoch: FAR_FUTURE_EPOCH,
            ..active_validator()
        };

        let poor = Validator {
            effective_balance: config.ejection_balance,
            ..active_validator()
        };

        let queued = Validator {
            activation_eligibility_epoch: 0,
            activation_epoch: FAR_FUTURE_EPOCH,
            ..active_validator()
        };

        let mut state = state_with(
            vec![active_validator(), new_deposit, poor, queued],
            8 - 1,
        )?;

        let (_, mut summaries, _) = epoch_intermediates::statistics(&state)?;

        process_registry_updates(&config, &mut state, &mut summaries)?;

        let activation_exit_epoch = compute_activation_exit_epoch::<Minimal>(0);

        assert_eq!(state.validators.get(1)?.activation_eligibility_epoch, 1);
        assert_eq!(state.validators.get(2)?.exit_epoch, activation_exit_epoch);
        assert_eq!(
            summaries[2].withdrawable_epoch,
            activation_exit_epoch + config.min_validator_withdrawability_delay,
        );
        assert_eq!(state.validators.get(3)?.activation_epoch, activation_exit_epoch);
        assert_eq!(state.validators.get(0)?.exit_epoch, FAR_FUTURE_EPOCH);

        Ok(())
    }

    #[test_case(MAX, 31_800_000_000 => MAX; "small decrease stays")]
    #[test_case(MAX, 31_700_000_000 => 31_000_000_000; "large decrease rounds down")]
    #[test_case(31_000_000_000, 32_200_000_000 => 31_000_000_000; "small increase stays")]
    #[test_case(31_000_000_000, 32_300_000_000 => MAX; "large increase rounds down")]
    #[test_case(31_000_000_000, 40_000_000_000 => MAX; "capped at maximum")]
    fn effective_balance_moves_with_hysteresis(effective_balance: Gwei, balance: Gwei) -> Gwei {
        let mut state = BeaconState::<Minimal> {
            validators: vec![Validator {
                effective_balance,
                ..Validator::default()
            }]
            .try_into()
            .unwrap_or_default(),
            balances: vec![balance].try_into().unwrap_or_default(),
            ..BeaconState::default()
        };

        process_effective_balance_updates(&mut state);

        state
            .validators
            .first()
            .map(|validator| validator.effective_balance)
            .unwrap_or_default()
    }

    #[test]
    fn slashed_validator_is_penalized_halfway_to_withdrawal() -> Result<()> {
        let current_epoch = 2;
        let withdrawable_epoch = current_epoch + 64 / 2;

        let slashed = Validator {
            slashed: true,
            withdrawable_epoch,
            ..active_validator()
        };

        let mut state = state_with(
            vec![slashed, active_validator(), active_validator(), active_validator()],
            current_epoch * 8,
        )?;

        *state.slashings.mod_index_mut(0) = MAX;

        let (_, summaries, _) = epoch_intermediates::statistics(&state)?;

        process_slashings(&mut state, summaries)?;

        // 3 * 32 ETH slashed out of 128 ETH active.
        assert_eq!(*state.balances.get(0)?, MAX - MAX * 3 / 4);
        assert_eq!(*state.balances.get(1)?, MAX);

        Ok(())
    }

    #[test]
    fn participation_records_rotate_and_eth1_votes_reset() -> Result<()> {
        let mut state = state_with(vec![active_validator()], 4 * 8 - 1)?;

        state.current_epoch_attestations.push(PendingAttestation::default())?;
        state.eth1_data_votes.push(Default::default())?;

        process_final_updates(&mut state)?;

        assert_eq!(state.previous_epoch_attestations.len(), 1);
        assert!(state.current_epoch_attestations.is_empty());
        assert!(state.eth1_data_votes.is_empty());

        Ok(())
    }

    #[test]
    fn online_tracking_counts_down_and_refreshes_attesters() -> Result<()> {
        let mut state = state_with(vec![active_validator(); 64], 8 - 1)?;

        state.online_countdown = vec![3; 64].try_into()?;

        let data = AttestationData {
            slot: 2,
            index: 0,
            ..AttestationData::default()
        };

        let committee = helper_functions::accessors::beacon_committee(&state, 2, 0)?.to_vec();

        state.previous_epoch_attestations.push(PendingAttestation {
            aggregation_bits: BitList::new(true, committee.len())?,
            data,
            ..PendingAttestation::default()
        })?;

        process_online_tracking(&mut state)?;

        for (validator_index, countdown) in (0..).zip(state.online_countdown.iter().copied()) {
            if committee.contains(&validator_index) {
                assert_eq!(countdown, ONLINE_PERIOD);
            } else {
                assert_eq!(countdown, 2);
            }
        }

        Ok(())
    }
}
