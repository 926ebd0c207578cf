use core::cmp::Ordering;

use anyhow::Result;
use arithmetic::U64Ext as _;
use typenum::Unsigned as _;
use types::{
    config::Config,
    phase0::{
        consts::FAR_FUTURE_EPOCH,
        primitives::{Gwei, ValidatorIndex},
    },
    phase1::beacon_state::BeaconState,
    preset::{EpochsPerSlashingsVector, Preset},
};

use crate::{
    accessors::{get_beacon_proposer_index, get_current_epoch, get_validator_churn_limit},
    error::Error,
    misc::compute_activation_exit_epoch,
};

pub fn balance<P: Preset>(
    state: &mut BeaconState<P>,
    validator_index: ValidatorIndex,
) -> Result<&mut Gwei> {
    state
        .balances
        .get_mut(validator_index)
        .map_err(Into::into)
}

#[inline]
pub fn increase_balance(balance: &mut Gwei, delta: Gwei) {
    *balance += delta;
}

#[inline]
pub fn decrease_balance(balance: &mut Gwei, delta: Gwei) {
    *balance = balance.decrease_saturating(delta);
}

// > Initiate the exit of the validator with index ``index``.
pub fn initiate_validator_exit<P: Preset>(
    config: &Config,
    state: &mut BeaconState<P>,
    validator_index: ValidatorIndex,
) -> Result<()> {
    // > Return if validator already initiated exit
    if state.validators.get(validator_index)?.exit_epoch != FAR_FUTURE_EPOCH {
        return Ok(());
    }

    // > Compute exit queue epoch
    let mut exit_queue_epoch = compute_activation_exit_epoch::<P>(get_current_epoch(state));
    let mut exit_queue_churn = 0;

    for validator in state.validators.iter() {
        let exit_epoch = validator.exit_epoch;

        if exit_epoch == FAR_FUTURE_EPOCH {
            continue;
        }

        match exit_epoch.cmp(&exit_queue_epoch) {
            Ordering::Less => {}
            Ordering::Equal => exit_queue_churn += 1,
            Ordering::Greater => {
                exit_queue_epoch = exit_epoch;
                exit_queue_churn = 1;
            }
        }
    }

    if exit_queue_churn >= get_validator_churn_limit(config, state)? {
        exit_queue_epoch += 1;
    }

    // > Set validator exit epoch and withdrawable epoch
    let validator = state.validators.get_mut(validator_index)?;

    validator.exit_epoch = exit_queue_epoch;

    validator.withdrawable_epoch = exit_queue_epoch
        .checked_add(config.min_validator_withdrawability_delay)
        .ok_or(Error::EpochOverflow)?;

    Ok(())
}

// > Slash the validator with index ``slashed_index``.
pub fn slash_validator<P: Preset>(
    config: &Config,
    state: &mut BeaconState<P>,
    slashed_index: ValidatorIndex,
    whistleblower_index: Option<ValidatorIndex>,
) -> Result<()> {
    let epoch = get_current_epoch(state);

    initiate_validator_exit(config, state, slashed_index)?;

    let validator = state.validators.get_mut(slashed_index)?;
    let effective_balance = validator.effective_balance;

    validator.slashed = true;
    validator.withdrawable_epoch = validator
        .withdrawable_epoch
        .max(epoch + EpochsPerSlashingsVector::<P>::U64);

    *state.slashings.mod_index_mut(epoch) += effective_balance;

    decrease_balance(
        balance(state, slashed_index)?,
        effective_balance / P::MIN_SLASHING_PENALTY_QUOTIENT,
    );

    // > Apply proposer and whistleblower rewards
    let proposer_index = get_beacon_proposer_index(state)?;
    let whistleblower_index = whistleblower_index.unwrap_or(proposer_index);
    let whistleblower_reward = effective_balance / P::WHISTLEBLOWER_REWARD_QUOTIENT;
    let proposer_reward = whistleblower_reward / P::PROPOSER_REWARD_QUOTIENT;

    increase_balance(balance(state, proposer_index)?, proposer_reward);

    increase_balance(
        balance(state, whistleblower_index)?,
        whistleblower_reward - proposer_reward,
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use types::{phase1::containers::Validator, preset::Minimal};

    use crate::accessors;

    use super::*;

    #[test]
    fn exit_is_only_initiated_once() -> Result<()> {
        let config = Config::minimal();

        let validator_1 = Validator {
            effective_balance: 24,
            activation_eligibility_epoch: 2,
            activation_epoch: 3,
            exit_epoch: 4,
            withdrawable_epoch: FAR_FUTURE_EPOCH,
            ..Validator::default()
        };

        let validator_2 = Validator {
            effective_balance: 24,
            activation_eligibility_epoch: 2,
            activation_epoch: 3,
            exit_epoch: FAR_FUTURE_EPOCH,
            withdrawable_epoch: FAR_FUTURE_EPOCH,
            ..Validator::default()
        };

        let mut state = BeaconState::<Minimal> {
            validators: vec![validator_1, validator_2].try_into()?,
            ..BeaconState::default()
        };

        // `exit_epoch` is already set and should remain the same.
        initiate_validator_exit(&config, &mut state, 0)?;

        // `exit_epoch` is `FAR_FUTURE_EPOCH` and should be set to the lowest possible value.
        initiate_validator_exit(&config, &mut state, 1)?;

        assert_eq!(state.validators.get(0)?.exit_epoch, 4);
        assert_eq!(state.validators.get(1)?.exit_epoch, 5);
        assert_eq!(
            state.validators.get(1)?.withdrawable_epoch,
            5 + config.min_validator_withdrawability_delay,
        );

        Ok(())
    }

    #[test]
    fn exit_queue_spills_over_when_churn_limit_is_reached() -> Result<()> {
        let config = Config::minimal();

        let queued = Validator {
            exit_epoch: 5,
            ..Validator::default()
        };

        let exiting = Validator {
            exit_epoch: FAR_FUTURE_EPOCH,
            ..Validator::default()
        };

        let mut state = BeaconState::<Minimal> {
            validators: vec![queued.clone(), queued, exiting].try_into()?,
            ..BeaconState::default()
        };

        initiate_validator_exit(&config, &mut state, 2)?;

        assert_eq!(state.validators.get(2)?.exit_epoch, 6);

        Ok(())
    }

    #[test]
    fn slashing_rewards_proposer_and_penalizes_validator() -> Result<()> {
        let config = Config::minimal();
        let max = Minimal::MAX_EFFECTIVE_BALANCE;

        let validator = Validator {
            effective_balance: max,
            exit_epoch: FAR_FUTURE_EPOCH,
            withdrawable_epoch: FAR_FUTURE_EPOCH,
            ..Validator::default()
        };

        let mut state = BeaconState::<Minimal> {
            validators: vec![validator; 64].try_into()?,
            balances: vec![max; 64].try_into()?,
            ..BeaconState::default()
        };

        let proposer_index = accessors::get_beacon_proposer_index(&state)?;
        let slashed_index = (proposer_index + 1) % 64;

        slash_validator(&config, &mut state, slashed_index, None)?;

        let slashed = state.validators.get(slashed_index)?;
        let whistleblower_reward = max / Minimal::WHISTLEBLOWER_REWARD_QUOTIENT;

        assert!(slashed.slashed);
        assert_eq!(
            slashed.withdrawable_epoch,
            5 + config.min_validator_withdrawability_delay,
        );
        assert_eq!(*state.slashings.mod_index(0), max);
        assert_eq!(
            *state.balances.get(slashed_index)?,
            max - max / Minimal::MIN_SLASHING_PENALTY_QUOTIENT,
        );
        assert_eq!(
            *state.balances.get(proposer_index)?,
            max + whistleblower_reward,
        );

        Ok(())
    }

    #[test]
    fn decreasing_balance_saturates() {
        let mut low_balance = 5;
        let mut high_balance = 10;

        decrease_balance(&mut low_balance, 10);
        decrease_balance(&mut high_balance, 5);
        increase_balance(&mut high_balance, 10);

        assert_eq!(low_balance, 0);
        assert_eq!(high_balance, 15);
    }
}
