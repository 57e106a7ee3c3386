// 2.0 math.rs: fixed-point helpers shared by the ledger, sorted index and stability pool.
// every amount is u128 scaled by 1e18. products of two scaled amounts can pass 128 bits,
// so mul_div falls back to a big integer when the fast path overflows. all division floors.

use crate::types::{Amount, Price, DECIMAL_PRECISION, NICR_PRECISION};
use num_bigint::BigUint;

// 525,600,000 minutes is 1000 years. decay below that is indistinguishable from zero.
pub const MAX_DECAY_MINUTES: u64 = 525_600_000;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MathError {
    #[error("arithmetic overflow in {0}")]
    Overflow(&'static str),

    #[error("division by zero in {0}")]
    DivisionByZero(&'static str),

    #[error("arithmetic underflow in {0}")]
    Underflow(&'static str),
}

pub(crate) fn widen(value: Amount) -> BigUint {
    BigUint::from(value)
}

pub(crate) fn narrow(value: &BigUint, context: &'static str) -> Result<Amount, MathError> {
    let digits = value.to_u64_digits();
    match digits.len() {
        0 => Ok(0),
        1 => Ok(digits[0] as Amount),
        2 => Ok(((digits[1] as Amount) << 64) | digits[0] as Amount),
        _ => Err(MathError::Overflow(context)),
    }
}

/// `numerator / divisor` and the remainder, for numerators wider than 128 bits.
pub(crate) fn div_rem_wide(
    numerator: &BigUint,
    divisor: Amount,
    context: &'static str,
) -> Result<(Amount, Amount), MathError> {
    if divisor == 0 {
        return Err(MathError::DivisionByZero(context));
    }
    let divisor = widen(divisor);
    let quotient = numerator / &divisor;
    let remainder = numerator - &quotient * &divisor;
    Ok((narrow(&quotient, context)?, narrow(&remainder, context)?))
}

/// `a * b / denominator`, floored.
pub fn mul_div(a: Amount, b: Amount, denominator: Amount) -> Result<Amount, MathError> {
    if denominator == 0 {
        return Err(MathError::DivisionByZero("mul_div"));
    }
    match a.checked_mul(b) {
        Some(product) => Ok(product / denominator),
        None => {
            let wide = widen(a) * widen(b) / widen(denominator);
            narrow(&wide, "mul_div")
        }
    }
}

pub fn checked_add(a: Amount, b: Amount, context: &'static str) -> Result<Amount, MathError> {
    a.checked_add(b).ok_or(MathError::Overflow(context))
}

pub fn checked_sub(a: Amount, b: Amount, context: &'static str) -> Result<Amount, MathError> {
    a.checked_sub(b).ok_or(MathError::Underflow(context))
}

/// Product of two 1e18 fixed-point values, rounded half up.
pub fn dec_mul(x: Amount, y: Amount) -> Result<Amount, MathError> {
    let product = x.checked_mul(y).ok_or(MathError::Overflow("dec_mul"))?;
    Ok(product
        .checked_add(DECIMAL_PRECISION / 2)
        .ok_or(MathError::Overflow("dec_mul"))?
        / DECIMAL_PRECISION)
}

/// `base ^ minutes` for a 1e18 fixed-point base <= 1.0, by squaring.
pub fn dec_pow(base: Amount, minutes: u64) -> Result<Amount, MathError> {
    let mut n = minutes.min(MAX_DECAY_MINUTES);
    if n == 0 {
        return Ok(DECIMAL_PRECISION);
    }

    let mut y = DECIMAL_PRECISION;
    let mut x = base;
    while n > 1 {
        if n % 2 == 0 {
            x = dec_mul(x, x)?;
            n /= 2;
        } else {
            y = dec_mul(x, y)?;
            x = dec_mul(x, x)?;
            n = (n - 1) / 2;
        }
    }
    dec_mul(x, y)
}

/// Collateral ratio at `price`. A position without debt has an infinite ratio.
pub fn compute_cr(coll: Amount, debt: Amount, price: Price) -> Result<Amount, MathError> {
    if debt == 0 {
        return Ok(Amount::MAX);
    }
    mul_div(coll, price.value(), debt)
}

/// Price-independent ratio used to order the sorted index.
pub fn compute_nominal_cr(coll: Amount, debt: Amount) -> Result<Amount, MathError> {
    if debt == 0 {
        return Ok(Amount::MAX);
    }
    mul_div(coll, NICR_PRECISION, debt)
}

pub fn abs_diff(a: Amount, b: Amount) -> Amount {
    if a >= b {
        a - b
    } else {
        b - a
    }
}
