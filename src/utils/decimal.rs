//! Checked integer-unit arithmetic on `Decimal`.
//!
//! Token amounts and prices are whole base units stored in a `Decimal` with
//! scale 0. Division always truncates toward zero and nothing is allowed to
//! wrap or saturate.
//!
//! Products feeding a division are formed on 512-bit integers, so an
//! intermediate larger than `Decimal` can hold neither fails nor rounds.

use crate::error::{Error, Result};
use primitive_types::U512;
use rust_decimal::Decimal;

/// Largest mantissa a `Decimal` can hold (96 bits).
const MANTISSA_BITS: usize = 96;
const MAX_SCALE: u32 = 28;

pub fn checked_add(a: Decimal, b: Decimal) -> Result<Decimal> {
    a.checked_add(b).ok_or(Error::ArithmeticOverflow)
}

pub fn checked_sub(a: Decimal, b: Decimal) -> Result<Decimal> {
    a.checked_sub(b).ok_or(Error::ArithmeticOverflow)
}

/// Exact product. A product that would need rounding to fit is rejected.
pub fn checked_mul(a: Decimal, b: Decimal) -> Result<Decimal> {
    let product = a.checked_mul(b).ok_or(Error::ArithmeticOverflow)?;
    if product.scale() < a.scale() + b.scale() && product.normalize() != exact_product(a, b)? {
        return Err(Error::ArithmeticOverflow);
    }
    Ok(product)
}

/// Divide and truncate toward zero.
pub fn checked_div_trunc(numerator: Decimal, denominator: Decimal) -> Result<Decimal> {
    product_ratio_trunc(&[numerator], &[denominator], 0)
}

/// `a * b / c`, truncated toward zero.
pub fn mul_div_trunc(a: Decimal, b: Decimal, c: Decimal) -> Result<Decimal> {
    product_ratio_trunc(&[a, b], &[c], 0)
}

/// `prod(numerators) / prod(denominators)` truncated toward zero at `scale`
/// fractional digits. Only the final result has to fit in a `Decimal`.
pub fn product_ratio_trunc(
    numerators: &[Decimal],
    denominators: &[Decimal],
    scale: u32,
) -> Result<Decimal> {
    let mut num = pow10(scale)?;
    let mut den = U512::one();
    let mut negative = false;

    for value in numerators {
        let (mantissa, value_scale, sign) = widen(*value);
        num = num.checked_mul(mantissa).ok_or(Error::ArithmeticOverflow)?;
        den = den
            .checked_mul(pow10(value_scale)?)
            .ok_or(Error::ArithmeticOverflow)?;
        negative ^= sign;
    }
    for value in denominators {
        let (mantissa, value_scale, sign) = widen(*value);
        if mantissa.is_zero() {
            return Err(Error::DivisionByZero);
        }
        den = den.checked_mul(mantissa).ok_or(Error::ArithmeticOverflow)?;
        num = num
            .checked_mul(pow10(value_scale)?)
            .ok_or(Error::ArithmeticOverflow)?;
        negative ^= sign;
    }

    narrow(num / den, negative, scale)
}

fn exact_product(a: Decimal, b: Decimal) -> Result<Decimal> {
    let (ma, sa, na) = widen(a);
    let (mb, sb, nb) = widen(b);
    let product = ma.checked_mul(mb).ok_or(Error::ArithmeticOverflow)?;
    narrow(product, na ^ nb, sa + sb).map(|d| d.normalize())
}

fn widen(value: Decimal) -> (U512, u32, bool) {
    (
        U512::from(value.mantissa().unsigned_abs()),
        value.scale(),
        value.is_sign_negative(),
    )
}

fn narrow(mut magnitude: U512, negative: bool, mut scale: u32) -> Result<Decimal> {
    if magnitude.is_zero() {
        return Ok(Decimal::ZERO);
    }
    let ten = U512::from(10u8);
    // Only trailing zeros may be dropped
    while scale > 0
        && (magnitude.bits() > MANTISSA_BITS || scale > MAX_SCALE)
        && (magnitude % ten).is_zero()
    {
        magnitude = magnitude / ten;
        scale -= 1;
    }
    if magnitude.bits() > MANTISSA_BITS {
        return Err(Error::ArithmeticOverflow);
    }
    let mantissa = magnitude.low_u128() as i128;
    let signed = if negative { -mantissa } else { mantissa };
    Decimal::try_from_i128_with_scale(signed, scale).map_err(|_| Error::ArithmeticOverflow)
}

fn pow10(exponent: u32) -> Result<U512> {
    U512::from(10u8)
        .checked_pow(U512::from(exponent))
        .ok_or(Error::ArithmeticOverflow)
}

/// Round down to whole base units.
pub fn to_units(value: Decimal) -> Decimal {
    value.trunc()
}

/// Whether a value is a non-negative whole number of base units.
pub fn is_whole_units(value: Decimal) -> bool {
    !value.is_sign_negative() && value.fract().is_zero()
}
