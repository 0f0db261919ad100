use bigdecimal::BigDecimal;
use num_bigint::BigInt;
use num_traits::{pow, Signed, ToPrimitive};

/// Convert a monetary value to integer minor units (cents), rounding half
/// away from zero. The gateway rejects amounts that are off by a single
/// minor unit, so truncation is not acceptable here.
pub fn to_minor_units(value: &BigDecimal) -> Option<i64> {
    let (digits, scale) = (value * BigDecimal::from(100)).into_bigint_and_exponent();
    // digits * 10^-scale == value * 100
    if scale <= 0 {
        return (digits * pow(BigInt::from(10), scale.unsigned_abs() as usize)).to_i64();
    }
    let divisor = pow(BigInt::from(10), scale as usize);
    let quotient = &digits / &divisor;
    let remainder = &digits % &divisor;
    let rounded = if remainder.abs() * 2u8 >= divisor {
        if digits.is_negative() {
            quotient - 1
        } else {
            quotient + 1
        }
    } else {
        quotient
    };
    rounded.to_i64()
}
