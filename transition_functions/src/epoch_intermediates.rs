//! Values computed once per epoch and shared by the stages of epoch processing.
//!
//! [`statistics`] makes a single pass over the registry and the pending attestations.
//! [`epoch_deltas`] turns the result into per-validator rewards and penalties without touching
//! balances, so that they can be applied in one pass afterwards.

use core::num::NonZeroU64;

use anyhow::Result;
use helper_functions::{
    accessors::{
        get_attesting_indices, get_block_root, get_block_root_at_slot, get_current_epoch,
        get_finality_delay, get_previous_epoch,
    },
    predicates::{is_active_validator, is_eligible_for_penalties, is_in_inactivity_leak},
};
use itertools::{izip, Itertools as _};
use num_integer::Roots as _;
use types::{
    phase0::{
        consts::BASE_REWARDS_PER_EPOCH,
        primitives::{Epoch, Gwei, ValidatorIndex},
    },
    phase1::{
        beacon_state::BeaconState,
        containers::{PendingAttestation, Validator},
    },
    preset::Preset,
};

#[expect(clippy::struct_field_names)]
#[derive(Clone, Copy, PartialEq, Eq, Default, Debug)]
pub struct Statistics {
    pub previous_epoch_source_attesting_balance: Gwei,
    pub previous_epoch_target_attesting_balance: Gwei,
    pub previous_epoch_head_attesting_balance: Gwei,
    pub current_epoch_active_balance: Gwei,
    pub current_epoch_target_attesting_balance: Gwei,
}

impl Statistics {
    fn accumulate_previous_epoch_attestation(
        &mut self,
        performance: &mut Performance,
        attestation: &PendingAttestation<impl Preset>,
        target: bool,
        head: bool,
        effective_balance: Gwei,
    ) {
        if !performance.previous_epoch_matching_source() {
            self.previous_epoch_source_attesting_balance += effective_balance;
            performance.previous_epoch_match = Match::Source;
        }

        if !performance.previous_epoch_matching_target() && target {
            self.previous_epoch_target_attesting_balance += effective_balance;
            performance.previous_epoch_match = Match::Target;
        }

        if !performance.previous_epoch_matching_head() && target && head {
            self.previous_epoch_head_attesting_balance += effective_balance;
            performance.previous_epoch_match = Match::Head;
        }

        let PendingAttestation {
            inclusion_delay,
            proposer_index,
            ..
        } = *attestation;

        // Attestations are only included after `MIN_ATTESTATION_INCLUSION_DELAY` slots.
        let Some(delay) = NonZeroU64::new(inclusion_delay) else {
            return;
        };

        let inclusion = Inclusion {
            delay,
            proposer_index,
        };

        let fastest = performance
            .previous_epoch_fastest_inclusion
            .get_or_insert(inclusion);

        if delay < fastest.delay {
            *fastest = inclusion;
        }
    }

    fn accumulate_current_epoch_attestation(
        &mut self,
        performance: &mut Performance,
        effective_balance: Gwei,
    ) {
        if !performance.current_epoch_matching_target {
            self.current_epoch_target_attesting_balance += effective_balance;
            performance.current_epoch_matching_target = true;
        }
    }

    // > ``EFFECTIVE_BALANCE_INCREMENT`` Gwei minimum to avoid divisions by zero.
    fn clamp_balances<P: Preset>(&mut self) {
        for balance in [
            &mut self.previous_epoch_source_attesting_balance,
            &mut self.previous_epoch_target_attesting_balance,
            &mut self.previous_epoch_head_attesting_balance,
            &mut self.current_epoch_active_balance,
            &mut self.current_epoch_target_attesting_balance,
        ] {
            *balance = (*balance).max(P::EFFECTIVE_BALANCE_INCREMENT.get());
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Default, Debug)]
pub struct ValidatorSummary {
    pub effective_balance: Gwei,
    pub slashed: bool,
    pub withdrawable_epoch: Epoch,
    pub eligible_for_penalties: bool,
}

impl ValidatorSummary {
    // This does not update derived fields because `process_slashings` does not use them.
    pub fn update_from(&mut self, validator: &Validator) {
        self.effective_balance = validator.effective_balance;
        self.slashed = validator.slashed;
        self.withdrawable_epoch = validator.withdrawable_epoch;
    }
}

#[derive(Clone, Copy, Default, Debug)]
pub struct Performance {
    previous_epoch_match: Match,
    previous_epoch_fastest_inclusion: Option<Inclusion>,
    current_epoch_matching_target: bool,
}

impl Performance {
    #[must_use]
    pub fn previous_epoch_matching_source(self) -> bool {
        Match::Source <= self.previous_epoch_match
    }

    #[must_use]
    pub fn previous_epoch_matching_target(self) -> bool {
        Match::Target <= self.previous_epoch_match
    }

    #[must_use]
    pub fn previous_epoch_matching_head(self) -> bool {
        Match::Head <= self.previous_epoch_match
    }

    #[must_use]
    pub const fn previous_epoch_fastest_inclusion(self) -> Option<Inclusion> {
        self.previous_epoch_fastest_inclusion
    }

    #[must_use]
    pub const fn current_epoch_matching_target(self) -> bool {
        self.current_epoch_matching_target
    }
}

// Each variant implies the ones before it.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Debug)]
enum Match {
    #[default]
    None,
    Source,
    Target,
    Head,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Inclusion {
    pub delay: NonZeroU64,
    pub proposer_index: ValidatorIndex,
}

#[derive(Clone, Copy, PartialEq, Eq, Default, Debug)]
pub struct EpochDeltas {
    pub source_reward: Gwei,
    pub source_penalty: Gwei,
    pub target_reward: Gwei,
    pub target_penalty: Gwei,
    pub head_reward: Gwei,
    pub head_penalty: Gwei,
    pub proposer_reward: Gwei,
    pub inclusion_delay_reward: Gwei,
    pub canceling_penalty: Gwei,
    pub inactivity_penalty: Gwei,
}

impl EpochDeltas {
    #[must_use]
    pub const fn combined_reward(self) -> Gwei {
        self.source_reward
            + self.target_reward
            + self.head_reward
            + self.proposer_reward
            + self.inclusion_delay_reward
    }

    #[must_use]
    pub const fn combined_penalty(self) -> Gwei {
        self.source_penalty
            + self.target_penalty
            + self.head_penalty
            + self.canceling_penalty
            + self.inactivity_penalty
    }
}

pub fn statistics<P: Preset>(
    state: &BeaconState<P>,
) -> Result<(Statistics, Vec<ValidatorSummary>, Vec<Performance>)> {
    let current_epoch = get_current_epoch(state);
    let previous_epoch = get_previous_epoch(state);

    let mut statistics = Statistics::default();

    let summaries = state
        .validators
        .iter()
        .map(|validator| {
            if is_active_validator(validator, current_epoch) {
                statistics.current_epoch_active_balance += validator.effective_balance;
            }

            ValidatorSummary {
                effective_balance: validator.effective_balance,
                slashed: validator.slashed,
                withdrawable_epoch: validator.withdrawable_epoch,
                eligible_for_penalties: is_eligible_for_penalties(validator, previous_epoch),
            }
        })
        .collect_vec();

    let mut performance = vec![Performance::default(); summaries.len()];

    // `get_block_root` fails in the genesis slot. There are no attestations to count then.
    if let Ok(previous_epoch_target_block_root) = get_block_root(state, previous_epoch) {
        for attestation in &state.previous_epoch_attestations {
            let target = attestation.data.target.root == previous_epoch_target_block_root;
            let head = attestation.data.beacon_block_root
                == get_block_root_at_slot(state, attestation.data.slot)?;

            for validator_index in
                get_attesting_indices(state, attestation.data, &attestation.aggregation_bits)?
            {
                let index = usize::try_from(validator_index)?;
                let summary = summaries[index];

                if summary.slashed {
                    continue;
                }

                statistics.accumulate_previous_epoch_attestation(
                    &mut performance[index],
                    attestation,
                    target,
                    head,
                    summary.effective_balance,
                );
            }
        }
    }

    if let Ok(current_epoch_target_block_root) = get_block_root(state, current_epoch) {
        for attestation in &state.current_epoch_attestations {
            if attestation.data.target.root != current_epoch_target_block_root {
                continue;
            }

            for validator_index in
                get_attesting_indices(state, attestation.data, &attestation.aggregation_bits)?
            {
                let index = usize::try_from(validator_index)?;
                let summary = summaries[index];

                if summary.slashed {
                    continue;
                }

                statistics.accumulate_current_epoch_attestation(
                    &mut performance[index],
                    summary.effective_balance,
                );
            }
        }
    }

    statistics.clamp_balances::<P>();

    Ok((statistics, summaries, performance))
}

pub fn epoch_deltas<P: Preset>(
    state: &BeaconState<P>,
    statistics: Statistics,
    summaries: impl IntoIterator<Item = ValidatorSummary>,
    performance: impl IntoIterator<Item = Performance>,
) -> Result<Vec<EpochDeltas>> {
    let finality_delay = get_finality_delay(state);
    let in_inactivity_leak = is_in_inactivity_leak(state);
    let total_active_balance = statistics.current_epoch_active_balance;
    let total_active_balance_sqrt = total_active_balance.sqrt().max(1);

    let mut deltas = vec![EpochDeltas::default(); state.validators.len()];

    for (index, summary, performance) in izip!(0_usize.., summaries, performance) {
        let ValidatorSummary {
            effective_balance,
            eligible_for_penalties,
            ..
        } = summary;

        let base_reward = effective_balance * P::BASE_REWARD_FACTOR
            / total_active_balance_sqrt
            / BASE_REWARDS_PER_EPOCH;

        let attestation_component_reward = |attesting_balance: Gwei| {
            // > Factored out from balance totals to avoid uint64 overflow
            let increment = P::EFFECTIVE_BALANCE_INCREMENT;

            if in_inactivity_leak {
                // > Since full base reward will be canceled out by inactivity penalty deltas,
                // > optimal participation receives full base reward compensation here.
                base_reward
            } else {
                let reward_numerator = base_reward * (attesting_balance / increment);
                reward_numerator / (total_active_balance / increment)
            }
        };

        let proposer_reward = base_reward / P::PROPOSER_REWARD_QUOTIENT;

        if eligible_for_penalties {
            let deltas = &mut deltas[index];

            if performance.previous_epoch_matching_source() {
                deltas.source_reward += attestation_component_reward(
                    statistics.previous_epoch_source_attesting_balance,
                );
            } else {
                deltas.source_penalty += base_reward;
            }

            if performance.previous_epoch_matching_target() {
                deltas.target_reward += attestation_component_reward(
                    statistics.previous_epoch_target_attesting_balance,
                );
            } else {
                deltas.target_penalty += base_reward;
            }

            if performance.previous_epoch_matching_head() {
                deltas.head_reward +=
                    attestation_component_reward(statistics.previous_epoch_head_attesting_balance);
            } else {
                deltas.head_penalty += base_reward;
            }

            if in_inactivity_leak {
                // > If validator is performing optimally this cancels all rewards for a neutral
                // > balance
                deltas.canceling_penalty +=
                    BASE_REWARDS_PER_EPOCH.get() * base_reward - proposer_reward;

                if !performance.previous_epoch_matching_target() {
                    deltas.inactivity_penalty +=
                        effective_balance * finality_delay / P::INACTIVITY_PENALTY_QUOTIENT;
                }
            }
        }

        if let Some(Inclusion {
            delay,
            proposer_index,
        }) = performance.previous_epoch_fastest_inclusion()
        {
            let proposer_index = usize::try_from(proposer_index)?;
            let max_attester_reward = base_reward - proposer_reward;

            deltas[proposer_index].proposer_reward += proposer_reward;
            deltas[index].inclusion_delay_reward += max_attester_reward / delay;
        }
    }

    Ok(deltas)
}
