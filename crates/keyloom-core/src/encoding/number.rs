use crate::error::EncodingError;

/// Width of the base-36 integer field.
pub const INTEGER_DIGITS: usize = 10;

/// Width of the base-36 fraction field.
pub const FRACTION_DIGITS: usize = 6;

const BASE36_DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Decimal places of the fraction that survive encoding.
const FRACTION_SCALE: u128 = 1_000_000;

/// 36^10: one past the largest encodable integer part.
const INTEGER_LIMIT: u128 = 3_656_158_440_062_976;

/// Largest fixed-point magnitude (integer part and six decimals) that fits.
const SCALED_MAX: u128 = INTEGER_LIMIT * FRACTION_SCALE - 1;

/// Encode a finite number as a string that sorts like the number.
///
/// Layout: `[-]IIIIIIIIII.FFFFFF`, both fields fixed-width lowercase base 36.
/// The magnitude is rounded to six decimal places, then clamped to
/// `36^10 - 1.999999`; distinctions below that precision or beyond that range
/// are lost. Negative values carry a leading `-` (which sorts before every
/// digit) followed by the complement of the magnitude, so larger magnitudes
/// sort first. `-0.0` encodes like `0.0`.
///
/// The integer range comfortably holds millisecond Unix timestamps.
pub fn encode_number(value: f64) -> Result<String, EncodingError> {
    if !value.is_finite() {
        return Err(EncodingError::NonFiniteNumber);
    }

    // `as` saturates, so huge magnitudes land on u128::MAX before the clamp.
    let scaled = ((value.abs() * FRACTION_SCALE as f64).round() as u128).min(SCALED_MAX);

    if value < 0.0 && scaled > 0 {
        let mut out = String::with_capacity(1 + INTEGER_DIGITS + 1 + FRACTION_DIGITS);
        out.push('-');
        push_fixed_point(&mut out, SCALED_MAX - scaled);
        Ok(out)
    } else {
        let mut out = String::with_capacity(INTEGER_DIGITS + 1 + FRACTION_DIGITS);
        push_fixed_point(&mut out, scaled);
        Ok(out)
    }
}

fn push_fixed_point(out: &mut String, scaled: u128) {
    push_base36(out, scaled / FRACTION_SCALE, INTEGER_DIGITS);
    out.push('.');
    push_base36(out, scaled % FRACTION_SCALE, FRACTION_DIGITS);
}

/// Append `n` as exactly `width` base-36 digits, zero-padded on the left.
fn push_base36(out: &mut String, mut n: u128, width: usize) {
    let mut digits = [b'0'; INTEGER_DIGITS];
    for slot in digits[..width].iter_mut().rev() {
        *slot = BASE36_DIGITS[(n % 36) as usize];
        n /= 36;
    }
    out.extend(digits[..width].iter().map(|&d| d as char));
}
