// 1.0: all the primitives live here. nothing in the engine works without these types.
// owner ids, holders, prices, fixed-point amounts, timestamps. ids are newtypes so the
// compiler catches mixups between an owner and a raw number.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

// amounts are 1e18 fixed point. one "unit" of collateral or debt is 1e18.
pub type Amount = u128;

pub const DECIMAL_PRECISION: Amount = 1_000_000_000_000_000_000;

// NICR carries two extra decimals so small ratios keep precision in the sorted index.
pub const NICR_PRECISION: Amount = 100_000_000_000_000_000_000;

/// Whole units to fixed point. `units(1800)` is 1800 debt units.
pub const fn units(n: u64) -> Amount {
    n as Amount * DECIMAL_PRECISION
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OwnerId(pub u64);

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "owner#{}", self.0)
    }
}

// 1.1: anything that can hold debt tokens or receive collateral payouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Holder {
    User(OwnerId),
    StabilityPool,
    GasPool,
    Treasury,
}

impl From<OwnerId> for Holder {
    fn from(owner: OwnerId) -> Self {
        Holder::User(owner)
    }
}

impl fmt::Display for Holder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Holder::User(owner) => write!(f, "{}", owner),
            Holder::StabilityPool => write!(f, "stability-pool"),
            Holder::GasPool => write!(f, "gas-pool"),
            Holder::Treasury => write!(f, "treasury"),
        }
    }
}

// 1.2: collateral price in debt-asset units, 1e18 fixed point. must be positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Price(Amount);

impl Price {
    #[must_use]
    pub fn new(value: Amount) -> Option<Self> {
        if value > 0 {
            Some(Self(value))
        } else {
            None
        }
    }

    pub fn new_unchecked(value: Amount) -> Self {
        debug_assert!(value > 0);
        Self(value)
    }

    pub fn from_units(n: u64) -> Self {
        Self::new_unchecked(units(n))
    }

    pub fn value(&self) -> Amount {
        self.0
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", format_amount(self.0))
    }
}

// 1.3: fixed point to a human decimal for logs and the simulator.
// anything past the 96-bit decimal mantissa shows as Decimal::MAX.
pub fn format_amount(amount: Amount) -> Decimal {
    i128::try_from(amount)
        .ok()
        .and_then(|v| Decimal::try_from_i128_with_scale(v, 18).ok())
        .map(|d| d.normalize())
        .unwrap_or(Decimal::MAX)
}

// 1.4: millisecond timestamp. the engine runs on logical time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    pub const MILLIS_PER_MINUTE: i64 = 60_000;

    pub fn now() -> Self {
        Self(chrono::Utc::now().timestamp_millis())
    }

    pub fn from_millis(ms: i64) -> Self {
        Self(ms)
    }

    pub fn as_millis(&self) -> i64 {
        self.0
    }

    // whole minutes from self to a later timestamp, zero if `later` is earlier
    pub fn minutes_until(&self, later: &Timestamp) -> u64 {
        let diff = later.0.saturating_sub(self.0);
        if diff <= 0 {
            0
        } else {
            (diff / Self::MILLIS_PER_MINUTE) as u64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn units_scale_to_fixed_point() {
        assert_eq!(units(1), DECIMAL_PRECISION);
        assert_eq!(units(1800), 1_800_000_000_000_000_000_000);
        assert_eq!(NICR_PRECISION, 100 * DECIMAL_PRECISION);
    }

    #[test]
    fn price_rejects_zero() {
        assert!(Price::new(0).is_none());
        assert_eq!(Price::from_units(200).value(), units(200));
    }

    #[test]
    fn amounts_format_as_decimals() {
        assert_eq!(format_amount(units(1800)), dec!(1800));
        assert_eq!(format_amount(DECIMAL_PRECISION / 2), dec!(0.5));
        assert_eq!(format_amount(Amount::MAX), Decimal::MAX);
    }

    #[test]
    fn minutes_between_timestamps() {
        let start = Timestamp::from_millis(0);
        assert_eq!(start.minutes_until(&Timestamp::from_millis(59_999)), 0);
        assert_eq!(start.minutes_until(&Timestamp::from_millis(120_000)), 2);
        assert_eq!(Timestamp::from_millis(120_000).minutes_until(&start), 0);
    }

    #[test]
    fn wall_clock_is_past_2020() {
        // 2020-01-01T00:00:00Z
        assert!(Timestamp::now() > Timestamp::from_millis(1_577_836_800_000));
    }
}
