use core::num::NonZeroU64;

use easy_ext::ext;
use typenum::{NonZero, Unsigned};

#[ext(NonZeroExt)]
pub impl<N: Unsigned + NonZero> N {
    #[inline]
    #[must_use]
    fn non_zero() -> NonZeroU64 {
        NonZeroU64::new(Self::U64).unwrap_or(NonZeroU64::MIN)
    }
}

#[ext(UsizeExt)]
pub impl usize {
    #[inline]
    #[must_use]
    fn div_typenum<N: Unsigned + NonZero>(self) -> Self {
        self / N::USIZE
    }

    /// Number of bits needed to address `self` leaves, i.e. the depth of a tree with that many
    /// leaves after padding to a power of two.
    #[inline]
    #[must_use]
    fn ilog2_ceil(self) -> u8 {
        let bits = self
            .checked_next_power_of_two()
            .map_or(Self::BITS, Self::trailing_zeros);

        u8::try_from(bits).unwrap_or(u8::MAX)
    }
}

#[ext(U64Ext)]
pub impl u64 {
    #[inline]
    #[must_use]
    fn is_multiple_of_nonzero(self, factor: NonZeroU64) -> bool {
        self % factor == 0
    }

    #[inline]
    #[must_use]
    fn prev_multiple_of(self, factor: NonZeroU64) -> Self {
        self - self % factor
    }

    #[inline]
    #[must_use]
    fn div_typenum<N: Unsigned + NonZero>(self) -> Self {
        self / N::U64
    }

    #[inline]
    #[must_use]
    fn mod_typenum<N: Unsigned + NonZero>(self) -> Self {
        self % N::U64
    }

    /// `self.saturating_sub(other)`, named after the operation balances need.
    #[inline]
    #[must_use]
    fn decrease_saturating(self, amount: Self) -> Self {
        self.saturating_sub(amount)
    }
}
