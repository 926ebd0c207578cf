use core::{
    num::{NonZeroU64, NonZeroUsize},
    ops::{Div as _, Range},
};

use anyhow::{bail, Result};
use arithmetic::U64Ext as _;
use bls::PublicKeyBytes;
use hashing::HashCache;
use nonzero_ext::nonzero;
use ssz::SszHash;
use tap::{Pipe as _, TryConv as _};
use typenum::Unsigned as _;
use types::{
    config::Config,
    phase0::{
        consts::BLS_WITHDRAWAL_PREFIX,
        containers::{ForkData, SigningData},
        primitives::{Domain, DomainType, Epoch, Slot, ValidatorIndex, Version, H256},
    },
    phase1::beacon_state::BeaconState,
    preset::Preset,
};

use crate::error::Error;

// Shuffling indices one at a time with the same seed repeats the pivot hash of every round.
const HASH_CACHE_CAPACITY: NonZeroUsize = nonzero!(1024_usize);

const MAX_RANDOM_BYTE: u64 = u8::MAX as u64;

#[must_use]
pub fn compute_epoch_at_slot<P: Preset>(slot: Slot) -> Epoch {
    slot.div_typenum::<P::SlotsPerEpoch>()
}

#[must_use]
pub const fn compute_start_slot_at_epoch<P: Preset>(epoch: Epoch) -> Slot {
    epoch.saturating_mul(P::SlotsPerEpoch::U64)
}

#[must_use]
pub fn is_epoch_start<P: Preset>(slot: Slot) -> bool {
    slots_since_epoch_start::<P>(slot) == 0
}

#[must_use]
pub fn slots_since_epoch_start<P: Preset>(slot: Slot) -> u64 {
    slot.mod_typenum::<P::SlotsPerEpoch>()
}

#[must_use]
pub const fn compute_activation_exit_epoch<P: Preset>(epoch: Epoch) -> Epoch {
    epoch + 1 + P::MAX_SEED_LOOKAHEAD
}

// > Return the 32-byte fork data root for the ``current_version`` and ``genesis_validators_root``.
// > This is used primarily in signature domains to avoid collisions across forks/chains.
#[must_use]
pub fn compute_fork_data_root(current_version: Version, genesis_validators_root: H256) -> H256 {
    ForkData {
        current_version,
        genesis_validators_root,
    }
    .hash_tree_root()
}

/// Omitting `fork_version` and `genesis_validators_root` produces the fork-agnostic domain that
/// deposits are signed with.
#[must_use]
pub fn compute_domain(
    config: &Config,
    domain_type: DomainType,
    fork_version: Option<Version>,
    genesis_validators_root: Option<H256>,
) -> Domain {
    let fork_version = fork_version.unwrap_or(config.genesis_fork_version);
    let genesis_validators_root = genesis_validators_root.unwrap_or_else(H256::zero);
    let fork_data_root = compute_fork_data_root(fork_version, genesis_validators_root);

    let mut domain = Domain::zero();
    domain[..DomainType::len_bytes()].copy_from_slice(domain_type.as_bytes());
    domain[DomainType::len_bytes()..].copy_from_slice(&fork_data_root[..28]);
    domain
}

pub fn compute_signing_root(object: &(impl SszHash + ?Sized), domain: Domain) -> H256 {
    SigningData {
        object_root: object.hash_tree_root(),
        domain,
    }
    .hash_tree_root()
}

/// Positions in a shuffled list of `index_count` validators occupied by committee `index` out of
/// `count` committees.
///
/// Committee sizes differ by at most one.
pub fn committee_range(index_count: usize, index: u64, count: NonZeroU64) -> Result<Range<usize>> {
    let index_count = index_count.try_conv::<u64>()?;
    let start = (index_count * index / count).try_into()?;
    let end = (index_count * (index + 1) / count).try_into()?;
    Ok(start..end)
}

// > Return the committee corresponding to ``indices``, ``seed``, ``index``, and committee ``count``.
pub fn compute_committee<P: Preset>(
    indices: &[ValidatorIndex],
    seed: H256,
    index: u64,
    count: NonZeroU64,
) -> Result<Vec<ValidatorIndex>> {
    let Some(total) = indices.len().try_conv::<u64>()?.pipe(NonZeroU64::new) else {
        return Ok(vec![]);
    };

    let mut cache = HashCache::new(HASH_CACHE_CAPACITY);

    committee_range(indices.len(), index, count)?
        .map(|position| {
            let shuffled = shuffling::compute_shuffled_index_cached::<P>(
                position.try_into()?,
                total,
                seed,
                &mut cache,
            )?;

            Ok(indices[shuffled.try_conv::<usize>()?])
        })
        .collect()
}

// > Return from ``indices`` a random index sampled by effective balance.
pub fn compute_proposer_index<P: Preset>(
    state: &BeaconState<P>,
    indices: &[ValidatorIndex],
    seed: H256,
) -> Result<ValidatorIndex> {
    let total = indices
        .len()
        .try_conv::<u64>()?
        .pipe(NonZeroU64::new)
        .ok_or(Error::NoActiveValidators)?;

    // All attempts share the pivots of every round.
    let mut cache = HashCache::new(HASH_CACHE_CAPACITY);

    let random_bytes = (0..u64::MAX / H256::len_bytes() as u64).flat_map(|quotient| {
        hashing::hash_256_64(seed, quotient)
            .to_fixed_bytes()
            .map(u64::from)
    });

    for (random_byte, attempt) in random_bytes.zip(0_u64..) {
        let shuffled_index_of_index =
            shuffling::compute_shuffled_index_cached::<P>(attempt % total, total, seed, &mut cache)?
                .try_conv::<usize>()?;

        let candidate_index = indices[shuffled_index_of_index];
        let effective_balance = state.validators.get(candidate_index)?.effective_balance;

        if effective_balance * MAX_RANDOM_BYTE >= P::MAX_EFFECTIVE_BALANCE * random_byte {
            return Ok(candidate_index);
        }
    }

    bail!(Error::FailedToSelectProposer)
}

#[must_use]
pub fn committee_count_from_active_validator_count<P: Preset>(active_validator_count: u64) -> u64 {
    let maximum = P::MAX_COMMITTEES_PER_SLOT.min(P::INITIAL_ACTIVE_SHARDS);

    active_validator_count
        .div_typenum::<P::SlotsPerEpoch>()
        .div(P::TARGET_COMMITTEE_SIZE)
        .clamp(1, maximum.get())
}

#[must_use]
pub fn bls_withdrawal_credentials(public_key: PublicKeyBytes) -> H256 {
    let mut withdrawal_credentials = hashing::hash_384(public_key);
    withdrawal_credentials[..BLS_WITHDRAWAL_PREFIX.len()].copy_from_slice(BLS_WITHDRAWAL_PREFIX);
    withdrawal_credentials
}

#[cfg(test)]
mod tests {
    use itertools::Itertools as _;
    use test_case::test_case;
    use types::{
        phase0::consts::{DOMAIN_BEACON_ATTESTER, DOMAIN_DEPOSIT},
        phase1::containers::Validator,
        preset::{Mainnet, Minimal},
    };

    use super::*;

    #[test_case(0 => 0)]
    #[test_case(7 => 0)]
    #[test_case(8 => 1)]
    #[test_case(35 => 4)]
    fn epoch_at_slot(slot: Slot) -> Epoch {
        compute_epoch_at_slot::<Minimal>(slot)
    }

    #[test]
    fn start_slot_is_an_epoch_start() {
        let slot = compute_start_slot_at_epoch::<Mainnet>(3);

        assert_eq!(slot, 96);
        assert!(is_epoch_start::<Mainnet>(slot));
        assert!(!is_epoch_start::<Mainnet>(slot + 1));
        assert_eq!(slots_since_epoch_start::<Mainnet>(slot + 5), 5);
    }

    #[test]
    fn activation_exit_epoch_includes_seed_lookahead() {
        assert_eq!(compute_activation_exit_epoch::<Mainnet>(10), 15);
    }

    #[test_case(10, 3)]
    #[test_case(64, 4)]
    #[test_case(3, 8)]
    fn committees_partition_indices(index_count: usize, count: u64) -> Result<()> {
        let count = NonZeroU64::new(count).ok_or_else(|| anyhow::anyhow!("zero count"))?;

        let ranges = (0..count.get())
            .map(|index| committee_range(index_count, index, count))
            .collect::<Result<Vec<_>>>()?;

        let (smallest, largest) = ranges
            .iter()
            .map(ExactSizeIterator::len)
            .minmax()
            .into_option()
            .ok_or_else(|| anyhow::anyhow!("no committees"))?;

        assert!(largest - smallest <= 1);
        assert_eq!(ranges.into_iter().flatten().collect_vec(), (0..index_count).collect_vec());

        Ok(())
    }

    #[test]
    fn committees_contain_every_index_once() -> Result<()> {
        let indices = (100..150).collect_vec();
        let seed = H256::repeat_byte(3);
        let count = nonzero!(4_u64);

        let members = (0..count.get())
            .map(|index| compute_committee::<Minimal>(&indices, seed, index, count))
            .flatten_ok()
            .collect::<Result<Vec<_>>>()?;

        assert_eq!(members.into_iter().sorted().collect_vec(), indices);

        Ok(())
    }

    #[test]
    fn committee_matches_known_members() -> Result<()> {
        let indices = (0..100).collect_vec();
        let seed = H256::repeat_byte(0x42);

        assert_eq!(
            compute_committee::<Minimal>(&indices, seed, 3, nonzero!(8_u64))?,
            [58, 76, 54, 64, 7, 85, 81, 97, 69, 96, 19, 5, 65],
        );

        Ok(())
    }

    #[test]
    fn domain_starts_with_domain_type() {
        let config = Config::minimal();
        let domain = compute_domain(&config, DOMAIN_BEACON_ATTESTER, None, None);

        assert_eq!(domain[..4], *DOMAIN_BEACON_ATTESTER.as_bytes());
        assert_ne!(domain, compute_domain(&config, DOMAIN_DEPOSIT, None, None));
    }

    #[test]
    fn proposer_is_sampled_from_indices() -> Result<()> {
        let validator = Validator {
            effective_balance: Minimal::MAX_EFFECTIVE_BALANCE,
            ..Validator::default()
        };

        let state = BeaconState::<Minimal> {
            validators: vec![validator; 16].try_into()?,
            ..BeaconState::default()
        };

        let indices = [2, 3, 5, 7, 11, 13];
        let proposer_index = compute_proposer_index(&state, &indices, H256::repeat_byte(1))?;

        assert!(indices.contains(&proposer_index));

        Ok(())
    }

    #[test]
    fn proposer_selection_fails_without_candidates() {
        let state = BeaconState::<Minimal>::default();

        assert!(compute_proposer_index(&state, &[], H256::zero()).is_err());
    }

    #[test_case(0 => 1)]
    #[test_case(32 => 1)]
    #[test_case(64 => 2)]
    #[test_case(128 => 4)]
    #[test_case(1_000_000 => 4)]
    fn committee_count_is_clamped(active_validator_count: u64) -> u64 {
        committee_count_from_active_validator_count::<Minimal>(active_validator_count)
    }

    #[test]
    fn withdrawal_credentials_have_bls_prefix() {
        let credentials = bls_withdrawal_credentials(PublicKeyBytes::repeat_byte(1));

        assert_eq!(credentials[0], 0);
        assert_eq!(credentials[1..], hashing::hash_384(PublicKeyBytes::repeat_byte(1))[1..]);
    }
}
