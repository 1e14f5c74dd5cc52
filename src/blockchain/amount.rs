use serde::{Deserialize, Serialize};

use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};

/// Number of base units in one coin
pub const UNITS_PER_COIN: i64 = 100_000_000;

/// A fixed-point quantity of coins.
///
/// Stored as an integer count of base units so that balance replay adds and
/// compares exactly. The arithmetic operators saturate at the `i64` bounds;
/// use [`Amount::checked_add`] and [`Amount::checked_sub`] where overflow must
/// be reported.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Amount(i64);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    pub const fn from_units(units: i64) -> Self {
        Amount(units)
    }

    /// Converts a coin quantity, rounding to the nearest base unit
    pub fn from_coins(coins: f64) -> Self {
        Amount((coins * UNITS_PER_COIN as f64).round() as i64)
    }

    pub const fn units(self) -> i64 {
        self.0
    }

    pub fn as_coins(self) -> f64 {
        self.0 as f64 / UNITS_PER_COIN as f64
    }

    pub const fn is_negative(self) -> bool {
        self.0 < 0
    }

    pub fn checked_add(self, other: Amount) -> Option<Amount> {
        self.0.checked_add(other.0).map(Amount)
    }

    pub fn checked_sub(self, other: Amount) -> Option<Amount> {
        self.0.checked_sub(other.0).map(Amount)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        let per_coin = UNITS_PER_COIN as u64;
        let whole = abs / per_coin;
        let frac = abs % per_coin;

        if frac == 0 {
            return write!(f, "{}{}.0", sign, whole);
        }

        let digits = format!("{:08}", frac);
        write!(f, "{}{}.{}", sign, whole, digits.trim_end_matches('0'))
    }
}

impl Add for Amount {
    type Output = Amount;

    fn add(self, rhs: Amount) -> Amount {
        Amount(self.0.saturating_add(rhs.0))
    }
}

impl Sub for Amount {
    type Output = Amount;

    fn sub(self, rhs: Amount) -> Amount {
        Amount(self.0.saturating_sub(rhs.0))
    }
}

impl Neg for Amount {
    type Output = Amount;

    fn neg(self) -> Amount {
        Amount(self.0.saturating_neg())
    }
}

impl AddAssign for Amount {
    fn add_assign(&mut self, rhs: Amount) {
        self.0 = self.0.saturating_add(rhs.0);
    }
}

impl SubAssign for Amount {
    fn sub_assign(&mut self, rhs: Amount) {
        self.0 = self.0.saturating_sub(rhs.0);
    }
}

impl Sum for Amount {
    fn sum<I: Iterator<Item = Amount>>(iter: I) -> Amount {
        iter.fold(Amount::ZERO, |acc, amount| acc + amount)
    }
}
