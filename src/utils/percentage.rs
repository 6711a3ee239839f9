//! Fixed-point percentage arithmetic.
//!
//! A [`Percentage`] holds percent points (`5` means 5%) with at most
//! [`PERCENTAGE_DECIMALS`] fractional digits, i.e. a scaled integer with a
//! factor of 10^18. Applying a percentage to an amount truncates toward zero,
//! so `add_percentage` rounds down and `subtract_percentage` rounds up.

use crate::error::{Error, Result};
use crate::utils::decimal::{checked_add, checked_sub, mul_div_trunc, product_ratio_trunc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of fractional digits kept in a percentage.
pub const PERCENTAGE_DECIMALS: u32 = 18;

const HUNDRED: Decimal = dec!(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Percentage(Decimal);

impl Percentage {
    pub const ZERO: Percentage = Percentage(Decimal::ZERO);
    pub const HUNDRED: Percentage = Percentage(HUNDRED);

    /// Build from percent points, truncating past the supported precision.
    pub fn new(points: Decimal) -> Self {
        Self(points.trunc_with_scale(PERCENTAGE_DECIMALS).normalize())
    }

    /// Build from whole percent points.
    pub fn from_points(points: u32) -> Self {
        Self(Decimal::from(points))
    }

    /// Build from the raw scaled integer (`1%` = `10^18`).
    pub fn from_scaled(raw: u128) -> Result<Self> {
        let raw = i128::try_from(raw).map_err(|_| Error::ArithmeticOverflow)?;
        Decimal::try_from_i128_with_scale(raw, PERCENTAGE_DECIMALS)
            .map(|d| Self(d.normalize()))
            .map_err(|_| Error::ArithmeticOverflow)
    }

    /// `numerator / denominator` expressed as a percentage.
    pub fn from_fraction(numerator: Decimal, denominator: Decimal) -> Result<Self> {
        product_ratio_trunc(&[numerator, HUNDRED], &[denominator], PERCENTAGE_DECIMALS)
            .map(Self::new)
    }

    /// Percent points as a decimal (`5` for 5%).
    pub fn points(&self) -> Decimal {
        self.0
    }

    /// True iff `0 <= self <= 100%`.
    pub fn is_in_range(&self) -> bool {
        is_percentage_in_range(*self)
    }
}

impl fmt::Display for Percentage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.0)
    }
}

/// `amount * pct / 100`, truncated toward zero.
pub fn apply_percentage(amount: Decimal, pct: Percentage) -> Result<Decimal> {
    mul_div_trunc(amount, pct.0, HUNDRED)
}

/// `amount + amount * pct / 100`.
pub fn add_percentage(amount: Decimal, pct: Percentage) -> Result<Decimal> {
    checked_add(amount, apply_percentage(amount, pct)?)
}

/// `amount - amount * pct / 100`.
pub fn subtract_percentage(amount: Decimal, pct: Percentage) -> Result<Decimal> {
    checked_sub(amount, apply_percentage(amount, pct)?)
}

/// Inverse of [`add_percentage`]: recovers the base amount from a total that
/// already includes `pct` on top, truncated toward zero.
pub fn remove_added_percentage(total: Decimal, pct: Percentage) -> Result<Decimal> {
    let denominator = checked_add(HUNDRED, pct.0)?;
    mul_div_trunc(total, HUNDRED, denominator)
}

pub fn is_percentage_in_range(pct: Percentage) -> bool {
    pct.0 >= Decimal::ZERO && pct.0 <= HUNDRED
}
