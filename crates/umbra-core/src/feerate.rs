//! Fee rate arithmetic: umbrites per 1000 bytes of transaction data.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A fee rate in umbrites per kB.
///
/// Integer arithmetic throughout; constructing from a fee and size uses a
/// u128 intermediate so large fees cannot overflow.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Default,
    bincode::Encode, bincode::Decode,
)]
pub struct FeeRate {
    per_kb: u64,
}

impl FeeRate {
    /// The zero fee rate.
    pub const ZERO: Self = Self { per_kb: 0 };

    /// Construct from a rate already expressed per kB.
    pub fn from_per_kb(per_kb: u64) -> Self {
        Self { per_kb }
    }

    /// Construct from a total fee paid on `size` bytes.
    ///
    /// A zero size yields the zero rate (matches treating unsized data as
    /// unpriceable rather than infinitely cheap or expensive).
    pub fn from_fee(fee: u64, size: usize) -> Self {
        if size == 0 {
            return Self::ZERO;
        }
        let per_kb = (fee as u128) * 1000 / (size as u128);
        Self {
            per_kb: per_kb.min(u64::MAX as u128) as u64,
        }
    }

    /// The rate in umbrites per kB.
    pub fn per_kb(&self) -> u64 {
        self.per_kb
    }

    /// Fee this rate implies for `size` bytes, rounded down.
    pub fn fee_for(&self, size: usize) -> u64 {
        ((self.per_kb as u128) * (size as u128) / 1000).min(u64::MAX as u128) as u64
    }

    /// Saturating sum of two rates.
    pub fn saturating_add(self, other: Self) -> Self {
        Self {
            per_kb: self.per_kb.saturating_add(other.per_kb),
        }
    }
}

impl fmt::Display for FeeRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} umbrites/kB", self.per_kb)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_fee_scales_to_kb() {
        assert_eq!(FeeRate::from_fee(1000, 200).per_kb(), 5000);
        assert_eq!(FeeRate::from_fee(500, 1000).per_kb(), 500);
    }

    #[test]
    fn from_fee_zero_size_is_zero() {
        assert_eq!(FeeRate::from_fee(1000, 0), FeeRate::ZERO);
    }

    #[test]
    fn from_fee_truncates() {
        // 999 umbrites on 1000 bytes: 999/kB, no rounding up.
        assert_eq!(FeeRate::from_fee(999, 1000).per_kb(), 999);
    }

    #[test]
    fn fee_for_round_trips_at_kb_granularity() {
        let rate = FeeRate::from_per_kb(5000);
        assert_eq!(rate.fee_for(1000), 5000);
        assert_eq!(rate.fee_for(200), 1000);
        assert_eq!(rate.fee_for(0), 0);
    }

    #[test]
    fn ordering_by_rate() {
        assert!(FeeRate::from_per_kb(1) > FeeRate::ZERO);
        assert!(FeeRate::from_fee(100, 100) > FeeRate::from_fee(100, 200));
    }

    #[test]
    fn saturating_add_caps() {
        let a = FeeRate::from_per_kb(u64::MAX);
        assert_eq!(a.saturating_add(a).per_kb(), u64::MAX);
    }

    #[test]
    fn display_format() {
        assert_eq!(FeeRate::from_per_kb(42).to_string(), "42 umbrites/kB");
    }

    use proptest::prelude::*;

    proptest! {
        #[test]
        fn fee_for_never_exceeds_paid_fee(fee in 0u64..1_000_000_000_000, size in 1usize..1_000_000) {
            let rate = FeeRate::from_fee(fee, size);
            prop_assert!(rate.fee_for(size) <= fee);
        }

        #[test]
        fn rate_monotone_in_fee(fee in 0u64..1_000_000_000, bump in 0u64..1_000_000_000, size in 1usize..1_000_000) {
            prop_assert!(FeeRate::from_fee(fee + bump, size) >= FeeRate::from_fee(fee, size));
        }
    }
}
