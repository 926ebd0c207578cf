use core::num::NonZeroU64;

use anyhow::{ensure, Result};
use arithmetic::U64Ext as _;
use deposit_tree::DepositTree;
use helper_functions::accessors;
use ssz::{ContiguousList, ContiguousVector, SszHash as _};
use thiserror::Error;
use transition_functions::{process_deposit_data, verify_deposit_merkle_branch};
use types::{
    config::Config,
    phase0::{
        consts::{GENESIS_EPOCH, GENESIS_SLOT},
        containers::{BeaconBlockHeader, Deposit, DepositData, Fork},
        primitives::{DepositIndex, UnixSeconds, H256},
    },
    phase1::{
        beacon_state::BeaconState,
        consts::MIN_GASPRICE,
        containers::{BeaconBlock, BeaconBlockBody, ShardState, SignedBeaconBlock},
    },
    preset::Preset,
};

/// Builds a genesis state one deposit at a time.
pub struct Incremental<'config, P: Preset> {
    config: &'config Config,
    beacon_state: BeaconState<P>,
    deposit_tree: DepositTree,
}

impl<'config, P: Preset> Incremental<'config, P> {
    pub fn new(config: &'config Config) -> Result<Self> {
        let version = config.genesis_fork_version;

        let fork = Fork {
            previous_version: version,
            current_version: version,
            epoch: GENESIS_EPOCH,
        };

        let latest_block_header = BeaconBlockHeader {
            body_root: BeaconBlockBody::<P>::default().hash_tree_root(),
            ..BeaconBlockHeader::default()
        };

        let initial_shard_state = ShardState {
            slot: GENESIS_SLOT,
            gasprice: MIN_GASPRICE,
            latest_block_root: H256::zero(),
        };

        let shard_states = ContiguousList::try_from(vec![
            initial_shard_state;
            usize::try_from(P::INITIAL_ACTIVE_SHARDS.get())?
        ])?;

        let beacon_state = BeaconState {
            slot: GENESIS_SLOT,
            fork,
            latest_block_header,
            current_epoch_start_shard: 0,
            shard_states,
            ..BeaconState::default()
        };

        Ok(Self {
            config,
            beacon_state,
            deposit_tree: DepositTree::default(),
        })
    }

    pub fn validate(&self) -> Result<()> {
        validate_genesis_state(self.config, &self.beacon_state)
    }

    pub fn set_eth1_timestamp(&mut self, eth1_timestamp: UnixSeconds) {
        self.beacon_state.genesis_time = eth1_timestamp + self.config.genesis_delay;
    }

    /// Adds a deposit after checking its proof against the deposit root that includes it.
    pub fn add_deposit(&mut self, deposit: &Deposit) -> Result<()> {
        let deposit_index = self.beacon_state.eth1_deposit_index;

        self.push_to_deposit_tree(deposit.data, deposit_index)?;

        verify_deposit_merkle_branch(&self.beacon_state, deposit_index, deposit)?;

        self.apply_deposit_data(deposit.data)
    }

    pub fn add_deposit_data(
        &mut self,
        data: DepositData,
        deposit_index: DepositIndex,
    ) -> Result<()> {
        self.push_to_deposit_tree(data, deposit_index)?;
        self.apply_deposit_data(data)
    }

    pub fn finish(self, eth1_block_hash: H256) -> Result<(BeaconState<P>, DepositTree)> {
        let Self {
            mut beacon_state,
            deposit_tree,
            ..
        } = self;

        beacon_state.eth1_data.block_hash = eth1_block_hash;

        // > Seed RANDAO with Eth1 entropy
        beacon_state.randao_mixes = ContiguousVector::repeat_element(eth1_block_hash);

        // > Set genesis validators root for domain separation and chain versioning
        beacon_state.genesis_validators_root = beacon_state.validators.hash_tree_root();

        Ok((beacon_state, deposit_tree))
    }

    fn push_to_deposit_tree(
        &mut self,
        data: DepositData,
        deposit_index: DepositIndex,
    ) -> Result<()> {
        self.deposit_tree.push(deposit_index, data)?;

        let eth1_data = &mut self.beacon_state.eth1_data;

        eth1_data.deposit_root = self.deposit_tree.root();
        eth1_data.deposit_count = self.deposit_tree.deposit_count();

        Ok(())
    }

    fn apply_deposit_data(&mut self, data: DepositData) -> Result<()> {
        let Some(validator_index) =
            process_deposit_data(self.config, &mut self.beacon_state, data)?
        else {
            return Ok(());
        };

        // > Process activations
        let balance = *self.beacon_state.balances.get(validator_index)?;
        let validator = self.beacon_state.validators.get_mut(validator_index)?;

        validator.effective_balance = balance
            .prev_multiple_of(P::EFFECTIVE_BALANCE_INCREMENT)
            .min(P::MAX_EFFECTIVE_BALANCE);

        if validator.effective_balance == P::MAX_EFFECTIVE_BALANCE {
            validator.activation_eligibility_epoch = GENESIS_EPOCH;
            validator.activation_epoch = GENESIS_EPOCH;
        }

        Ok(())
    }
}

/// Builds the genesis state from the deposits made before `eth1_block_hash`.
///
/// The returned deposit tree contains every deposit and can be used to extend the chain.
pub fn initialize_beacon_state_from_eth1<P: Preset>(
    config: &Config,
    eth1_block_hash: H256,
    eth1_timestamp: UnixSeconds,
    deposits: &[Deposit],
) -> Result<(BeaconState<P>, DepositTree)> {
    let mut incremental = Incremental::new(config)?;

    incremental.set_eth1_timestamp(eth1_timestamp);

    for deposit in deposits {
        incremental.add_deposit(deposit)?;
    }

    incremental.finish(eth1_block_hash)
}

#[must_use]
pub fn is_valid_genesis_state<P: Preset>(config: &Config, state: &BeaconState<P>) -> bool {
    validate_genesis_state(config, state).is_ok()
}

/// The block that every node agrees is at the root of the block tree.
///
/// `BeaconBlock.body.eth1_data` is left at its default rather than set to the state's.
#[must_use]
pub fn beacon_block<P: Preset>(genesis_state: &BeaconState<P>) -> SignedBeaconBlock<P> {
    SignedBeaconBlock {
        message: BeaconBlock::default().with_state_root(genesis_state.hash_tree_root()),
        ..SignedBeaconBlock::default()
    }
}

#[derive(Debug, Error)]
enum GenesisTriggerError {
    #[error("too early ({actual_genesis_time} < {minimum_genesis_time})")]
    TooEarly {
        minimum_genesis_time: UnixSeconds,
        actual_genesis_time: UnixSeconds,
    },
    #[error("not enough active validators ({actual_validator_count} < {minimum_validator_count})")]
    NotEnoughActiveValidators {
        minimum_validator_count: NonZeroU64,
        actual_validator_count: u64,
    },
}

fn validate_genesis_state<P: Preset>(config: &Config, state: &BeaconState<P>) -> Result<()> {
    let minimum_genesis_time = config.min_genesis_time;
    let actual_genesis_time = state.genesis_time;

    ensure!(
        minimum_genesis_time <= actual_genesis_time,
        GenesisTriggerError::TooEarly {
            minimum_genesis_time,
            actual_genesis_time,
        },
    );

    let minimum_validator_count = config.min_genesis_active_validator_count;
    // The cached active validator count cannot be used here.
    // Caching is not designed to work with candidate genesis states.
    let actual_validator_count = accessors::get_active_validator_indices(state, GENESIS_EPOCH)
        .count()
        .try_into()?;

    ensure!(
        minimum_validator_count.get() <= actual_validator_count,
        GenesisTriggerError::NotEnoughActiveValidators {
            minimum_validator_count,
            actual_validator_count,
        },
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use bls::{SecretKey, SecretKeyBytes};
    use helper_functions::{accessors, misc, signing::SignForAllForks as _};
    use test_case::test_case;
    use types::{
        phase0::{consts::FAR_FUTURE_EPOCH, containers::DepositMessage},
        phase1::{consts::ONLINE_PERIOD, containers::Validator},
        preset::{Mainnet, Minimal},
    };

    use super::*;

    fn deposit_data(config: &Config, seed: u8, amount: u64) -> Result<DepositData> {
        let secret_key = SecretKey::try_from(SecretKeyBytes::from([seed; 32]))?;
        let pubkey = secret_key.to_public_key().into();
        let withdrawal_credentials = misc::bls_withdrawal_credentials(pubkey);

        let deposit_message = DepositMessage {
            pubkey,
            withdrawal_credentials,
            amount,
        };

        Ok(DepositData {
            pubkey,
            withdrawal_credentials,
            amount,
            signature: deposit_message.sign(config, &secret_key).into(),
        })
    }

    fn deposits_with_proofs(data: &[DepositData]) -> Result<Vec<Deposit>> {
        let mut tree = DepositTree::default();

        (0..)
            .zip(data)
            .map(|(index, data)| {
                tree.push(index, *data)?;

                Ok(Deposit {
                    proof: tree.proof(index)?,
                    data: *data,
                })
            })
            .collect()
    }

    #[test]
    fn genesis_state_has_phase_1_fields() -> Result<()> {
        let config = Config::minimal();
        let data = deposit_data(&config, 1, Minimal::MAX_EFFECTIVE_BALANCE)?;
        let deposits = deposits_with_proofs(&[data])?;
        let eth1_block_hash = H256::repeat_byte(0x42);

        let (state, deposit_tree) = initialize_beacon_state_from_eth1::<Minimal>(
            &config,
            eth1_block_hash,
            1000,
            &deposits,
        )?;

        assert_eq!(state.genesis_time, 1000 + config.genesis_delay);
        assert_eq!(state.current_epoch_start_shard, 0);
        assert_eq!(
            state.shard_states.len(),
            usize::try_from(Minimal::INITIAL_ACTIVE_SHARDS.get())?,
        );
        assert!(state
            .shard_states
            .iter()
            .all(|shard_state| shard_state.gasprice == MIN_GASPRICE));
        assert_eq!(state.online_countdown[..], [ONLINE_PERIOD]);
        assert_eq!(state.validators[0].activation_epoch, GENESIS_EPOCH);
        assert_eq!(state.eth1_data.deposit_root, deposit_tree.root());
        assert_eq!(state.eth1_data.deposit_count, 1);
        assert_eq!(state.eth1_deposit_index, 1);
        assert!(state.randao_mixes.iter().all(|mix| *mix == eth1_block_hash));
        assert_eq!(
            state.genesis_validators_root,
            state.validators.hash_tree_root(),
        );

        Ok(())
    }

    #[test]
    fn minimum_validator_count_at_minimum_time_is_valid_genesis() -> Result<()> {
        let config = Config::minimal();
        let validator_count = config.min_genesis_active_validator_count.get();

        let data = (1..=u8::try_from(validator_count)?)
            .map(|seed| deposit_data(&config, seed, Minimal::MAX_EFFECTIVE_BALANCE))
            .collect::<Result<Vec<_>>>()?;

        let deposits = deposits_with_proofs(&data)?;
        let eth1_timestamp = config.min_genesis_time.saturating_sub(config.genesis_delay);

        let (state, _) = initialize_beacon_state_from_eth1::<Minimal>(
            &config,
            H256::zero(),
            eth1_timestamp,
            &deposits,
        )?;

        assert!(is_valid_genesis_state(&config, &state));
        assert!(
            accessors::get_active_validator_indices(&state, GENESIS_EPOCH).eq(0..validator_count),
        );

        Ok(())
    }

    // Building a full mainnet genesis from signed deposits is too slow for a unit test.
    // The trigger only depends on the active validator count and the genesis time.
    #[test_case((1 << 14) - 1 => false)]
    #[test_case(1 << 14 => true)]
    fn mainnet_genesis_requires_minimum_validator_count(validator_count: usize) -> bool {
        let config = Config::mainnet();

        let validator = Validator {
            effective_balance: Mainnet::MAX_EFFECTIVE_BALANCE,
            activation_eligibility_epoch: GENESIS_EPOCH,
            activation_epoch: GENESIS_EPOCH,
            exit_epoch: FAR_FUTURE_EPOCH,
            withdrawable_epoch: FAR_FUTURE_EPOCH,
            ..Validator::default()
        };

        let state = BeaconState::<Mainnet> {
            genesis_time: config.min_genesis_time,
            validators: vec![validator; validator_count]
                .try_into()
                .expect("validator count is within the registry limit"),
            ..BeaconState::default()
        };

        is_valid_genesis_state(&config, &state)
    }

    #[test]
    fn top_up_to_maximum_activates_validator() -> Result<()> {
        let config = Config::minimal();
        let half = deposit_data(&config, 2, Minimal::MAX_EFFECTIVE_BALANCE / 2)?;

        let mut incremental = Incremental::<Minimal>::new(&config)?;

        incremental.add_deposit_data(half, 0)?;
        incremental.add_deposit_data(half, 1)?;

        let (state, _) = incremental.finish(H256::zero())?;

        assert_eq!(state.validators.len(), 1);
        assert_eq!(state.balances[0], Minimal::MAX_EFFECTIVE_BALANCE);
        assert_eq!(state.validators[0].activation_epoch, GENESIS_EPOCH);

        Ok(())
    }

    #[test]
    fn deposit_with_invalid_proof_is_rejected() -> Result<()> {
        let config = Config::minimal();
        let data = deposit_data(&config, 3, Minimal::MAX_EFFECTIVE_BALANCE)?;

        let deposit = Deposit {
            proof: ContiguousVector::default(),
            data,
        };

        let result = initialize_beacon_state_from_eth1::<Minimal>(
            &config,
            H256::zero(),
            0,
            &[deposit],
        );

        assert!(result.is_err());

        Ok(())
    }

    #[test]
    fn state_without_enough_validators_is_not_valid_genesis() -> Result<()> {
        let config = Config::minimal();
        let data = deposit_data(&config, 4, Minimal::MAX_EFFECTIVE_BALANCE)?;

        let mut incremental = Incremental::<Minimal>::new(&config)?;

        incremental.set_eth1_timestamp(config.min_genesis_time);
        incremental.add_deposit_data(data, 0)?;

        let error = incremental
            .validate()
            .expect_err("one validator is fewer than the minimum");

        assert!(matches!(
            error.downcast_ref(),
            Some(GenesisTriggerError::NotEnoughActiveValidators { .. }),
        ));

        let (state, _) = incremental.finish(H256::zero())?;

        assert!(!is_valid_genesis_state(&config, &state));

        Ok(())
    }

    #[test]
    fn genesis_block_commits_to_state() -> Result<()> {
        let config = Config::minimal();
        let (state, _) = Incremental::<Minimal>::new(&config)?.finish(H256::zero())?;

        let block = beacon_block(&state);

        assert_eq!(block.message.slot, GENESIS_SLOT);
        assert_eq!(block.message.state_root, state.hash_tree_root());

        Ok(())
    }
}
