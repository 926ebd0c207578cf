//! Collections used in `BeaconState`.
//!
//! All of them are contiguous. States are cloned once per block in fork choice, which is cheap
//! enough at the validator counts this crate is exercised with.

use ssz::{ContiguousList, ContiguousVector};

use crate::{
    phase0::{
        containers::Eth1Data,
        primitives::{Gwei, H256},
    },
    phase1::{
        containers::{PendingAttestation, ShardState, Validator},
        primitives::OnlineEpochs,
    },
    preset::{
        EpochsPerHistoricalVector, EpochsPerSlashingsVector, MaxAttestationsPerEpoch, Preset,
        SlotsPerEth1VotingPeriod, SlotsPerHistoricalRoot,
    },
};

pub type RecentRoots<P> = ContiguousVector<H256, SlotsPerHistoricalRoot<P>>;

pub type HistoricalRoots<P> = ContiguousList<H256, <P as Preset>::HistoricalRootsLimit>;

pub type Eth1DataVotes<P> = ContiguousList<Eth1Data, SlotsPerEth1VotingPeriod<P>>;

pub type Validators<P> = ContiguousList<Validator, <P as Preset>::ValidatorRegistryLimit>;

pub type Balances<P> = ContiguousList<Gwei, <P as Preset>::ValidatorRegistryLimit>;

pub type RandaoMixes<P> = ContiguousVector<H256, EpochsPerHistoricalVector<P>>;

pub type Slashings<P> = ContiguousVector<Gwei, EpochsPerSlashingsVector<P>>;

pub type Attestations<P> = ContiguousList<PendingAttestation<P>, MaxAttestationsPerEpoch<P>>;

pub type ShardStates<P> = ContiguousList<ShardState, <P as Preset>::MaxShards>;

pub type OnlineCountdown<P> = ContiguousList<OnlineEpochs, <P as Preset>::ValidatorRegistryLimit>;
