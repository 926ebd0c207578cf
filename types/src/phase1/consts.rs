use core::num::NonZeroU64;

use bls::SignatureBytes;
use hex_literal::hex;
use nonzero_ext::nonzero;
use static_assertions::const_assert;
use typenum::{Unsigned as _, U12};

use crate::{
    phase0::primitives::{DomainType, Gwei, H32},
    phase1::primitives::OnlineEpochs,
};

pub const DOMAIN_SHARD_COMMITTEE: DomainType = H32(hex!("81000000"));
pub const DOMAIN_SHARD_PROPOSAL: DomainType = H32(hex!("80000000"));

pub const GASPRICE_ADJUSTMENT_COEFFICIENT: NonZeroU64 = nonzero!(8_u64);
pub const MAX_GASPRICE: Gwei = 1 << 14;
pub const MIN_GASPRICE: Gwei = 8;
/// Signature of a shard transition that contains no shard blocks.
pub const NO_SIGNATURE: SignatureBytes = SignatureBytes::zero();
pub const TARGET_SHARD_BLOCK_SIZE: NonZeroU64 = nonzero!(1_u64 << 18);

/// Number of epochs a validator stays online after its last included attestation.
pub const ONLINE_PERIOD: OnlineEpochs = 8;

/// Offsets from the last crosslinked slot at which shard blocks may be proposed.
pub const SHARD_BLOCK_OFFSETS: [u64; MaxShardBlocksPerAttestation::USIZE] =
    [1, 2, 3, 5, 8, 13, 21, 34, 55, 89, 144, 233];

pub type MaxShardBlocksPerAttestation = U12;

const_assert!(MIN_GASPRICE <= MAX_GASPRICE);
