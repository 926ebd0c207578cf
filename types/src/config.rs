use core::num::NonZeroU64;
use std::borrow::Cow;

use anyhow::Result;
use hex_literal::hex;
use nonzero_ext::nonzero;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    phase0::primitives::{Gwei, UnixSeconds, Version, H32},
    preset::PresetName,
};

/// Configuration variables customizable at runtime.
///
/// A chain instance loads this once at startup and passes it by reference to every function that
/// needs it. Variables missing from a YAML file keep their mainnet values.
#[derive(Clone, PartialEq, Eq, Debug, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields, rename_all = "SCREAMING_SNAKE_CASE")]
pub struct Config {
    // Meta
    pub config_name: Cow<'static, str>,
    pub preset_base: PresetName,

    // Genesis
    pub genesis_delay: u64,
    pub genesis_fork_version: Version,
    pub min_genesis_active_validator_count: NonZeroU64,
    pub min_genesis_time: UnixSeconds,

    // Time parameters
    pub eth1_follow_distance: u64,
    pub min_validator_withdrawability_delay: u64,
    pub seconds_per_eth1_block: u64,
    pub seconds_per_slot: NonZeroU64,
    pub shard_committee_period: u64,

    // Validator cycle
    pub churn_limit_quotient: NonZeroU64,
    pub ejection_balance: Gwei,
    pub min_per_epoch_churn_limit: u64,

    // Fork choice
    pub safe_slots_to_update_justified: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            // Meta
            //
            // Use `default` as the default `config_name` and override it in `Config::mainnet`.
            // This way custom networks are kept apart from mainnet if a user forgets to specify a
            // custom `CONFIG_NAME`.
            config_name: Cow::Borrowed("default"),
            preset_base: PresetName::Mainnet,

            // Genesis
            genesis_delay: 172_800,
            genesis_fork_version: H32(hex!("00000000")),
            min_genesis_active_validator_count: nonzero!(1_u64 << 14),
            min_genesis_time: 1_578_009_600,

            // Time parameters
            eth1_follow_distance: 1024,
            min_validator_withdrawability_delay: 256,
            seconds_per_eth1_block: 14,
            seconds_per_slot: nonzero!(12_u64),
            shard_committee_period: 256,

            // Validator cycle
            churn_limit_quotient: nonzero!(1_u64 << 16),
            ejection_balance: 16_000_000_000,
            min_per_epoch_churn_limit: 4,

            // Fork choice
            safe_slots_to_update_justified: 8,
        }
    }
}

impl Config {
    #[must_use]
    pub fn mainnet() -> Self {
        Self {
            config_name: Cow::Borrowed("mainnet"),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn minimal() -> Self {
        Self {
            // Meta
            config_name: Cow::Borrowed("minimal"),
            preset_base: PresetName::Minimal,

            // Genesis
            genesis_delay: 300,
            genesis_fork_version: H32(hex!("00000001")),
            min_genesis_active_validator_count: nonzero!(64_u64),

            // Time parameters
            eth1_follow_distance: 16,
            seconds_per_slot: nonzero!(6_u64),
            shard_committee_period: 64,

            // Validator cycle
            churn_limit_quotient: nonzero!(32_u64),
            min_per_epoch_churn_limit: 2,

            // Fork choice
            safe_slots_to_update_justified: 2,

            ..Self::default()
        }
    }

    /// Parses a configuration in the format used by `consensus-specs` and validates it.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config = serde_yaml::from_str::<Self>(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.config_name.is_empty() {
            return Err(Error::NameEmpty);
        }

        for character in self.config_name.chars() {
            if !matches!(character, 'a'..='z' | '0'..='9' | '-') {
                return Err(Error::NameContainsIllegalCharacters);
            }
        }

        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration name is empty")]
    NameEmpty,
    #[error("configuration name contains illegal characters")]
    NameContainsIllegalCharacters,
}

#[expect(
    clippy::needless_pass_by_value,
    reason = "Refactoring worsens readability, which is more important in tests."
)]
#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test_case(Config::mainnet())]
    #[test_case(Config::minimal())]
    fn config_is_valid(config: Config) -> Result<(), Error> {
        config.validate()
    }

    #[test]
    fn yaml_overrides_only_listed_variables() -> Result<()> {
        let config = Config::from_yaml(
            "
            CONFIG_NAME: testnet
            PRESET_BASE: minimal
            MIN_GENESIS_ACTIVE_VALIDATOR_COUNT: 16
            GENESIS_FORK_VERSION: '0x00000fff'
            SAFE_SLOTS_TO_UPDATE_JUSTIFIED: 4
            ",
        )?;

        assert_eq!(config.config_name, "testnet");
        assert_eq!(config.preset_base, PresetName::Minimal);
        assert_eq!(config.min_genesis_active_validator_count, nonzero!(16_u64));
        assert_eq!(config.genesis_fork_version, H32(hex!("00000fff")));
        assert_eq!(config.safe_slots_to_update_justified, 4);
        assert_eq!(config.seconds_per_slot, Config::mainnet().seconds_per_slot);

        Ok(())
    }

    #[test]
    fn yaml_with_unknown_variables_is_rejected() {
        assert!(Config::from_yaml("SHARD_COUNT: 64").is_err());
    }

    #[test_case("" => matches Err(Error::NameEmpty))]
    #[test_case("Mainnet" => matches Err(Error::NameContainsIllegalCharacters))]
    #[test_case("my-testnet-2" => matches Ok(()))]
    fn config_name_is_checked(name: &'static str) -> Result<(), Error> {
        Config {
            config_name: Cow::Borrowed(name),
            ..Config::default()
        }
        .validate()
    }
}
