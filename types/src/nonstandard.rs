use enum_map::Enum;
use parse_display::Display;

/// Epoch relative to the current epoch of a state.
///
/// Committee caches are keyed by this so they can be rotated at epoch boundaries.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Enum, Display)]
#[display(style = "lowercase")]
pub enum RelativeEpoch {
    Previous,
    Current,
    Next,
}

/// Epochs an attestation included in a block may target.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Display)]
#[display(style = "lowercase")]
pub enum AttestationEpoch {
    Previous,
    Current,
}

impl From<AttestationEpoch> for RelativeEpoch {
    #[inline]
    fn from(attestation_epoch: AttestationEpoch) -> Self {
        match attestation_epoch {
            AttestationEpoch::Previous => Self::Previous,
            AttestationEpoch::Current => Self::Current,
        }
    }
}
