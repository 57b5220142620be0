//! Signed fixed-point leaf codec.
//!
//! A leaf holds a voter's net weight on one motion as a 256-bit big-endian
//! two's-complement integer scaled by `10^18`: positive weight backs YES,
//! negative weight backs NO, zero means no ballot.

use num_bigint::{BigInt, BigUint, Sign};
use num_traits::{One, Signed, Zero};
use thiserror::Error;

use crate::digest::Digest32;

/// Number of fractional decimal digits in a fixed-point amount.
pub const DECIMALS: u32 = 18;

/// Errors raised when a value cannot be represented as a leaf or parsed as an amount.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LeafError {
    /// Value lies outside the signed 256-bit range.
    #[error("amount {0} does not fit a signed 256-bit leaf")]
    OutOfRange(BigInt),
    /// Decimal string could not be parsed.
    #[error("invalid amount '{0}'")]
    InvalidAmount(String),
}

/// `10^18`, the fixed-point scale.
pub fn wad() -> BigInt {
    BigInt::from(10u64).pow(DECIMALS)
}

/// Smallest representable leaf value, `-2^255`.
pub fn min_leaf_value() -> BigInt {
    -(BigInt::one() << 255usize)
}

/// Largest representable leaf value, `2^255 - 1`.
pub fn max_leaf_value() -> BigInt {
    (BigInt::one() << 255usize) - BigInt::one()
}

/// Largest unsigned 256-bit value; the ceiling for ledger transfers.
pub fn max_u256() -> BigUint {
    (BigUint::one() << 256usize) - BigUint::one()
}

/// Checks that `value` fits a signed 256-bit word.
pub fn ensure_leaf_range(value: &BigInt) -> Result<(), LeafError> {
    if value < &min_leaf_value() || value > &max_leaf_value() {
        return Err(LeafError::OutOfRange(value.clone()));
    }
    Ok(())
}

/// Encodes a signed amount as a sign-extended 32-byte two's-complement word.
pub fn encode_leaf(value: &BigInt) -> Result<Digest32, LeafError> {
    ensure_leaf_range(value)?;
    let minimal = value.to_signed_bytes_be();
    let fill = if value.is_negative() { 0xff } else { 0x00 };
    let mut out = [fill; 32];
    out[32 - minimal.len()..].copy_from_slice(&minimal);
    Ok(out)
}

/// Decodes a 32-byte two's-complement word into a signed amount.
pub fn decode_leaf(leaf: &Digest32) -> BigInt {
    BigInt::from_signed_bytes_be(leaf)
}

/// Parses a decimal amount in whole units (`"3"`, `"-1.5"`) into fixed point.
pub fn parse_units(input: &str) -> Result<BigInt, LeafError> {
    let invalid = || LeafError::InvalidAmount(input.to_string());
    let trimmed = input.trim();
    let (negative, body) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed)),
    };
    let (whole, fraction) = match body.split_once('.') {
        Some((whole, fraction)) => (whole, fraction),
        None => (body, ""),
    };
    if whole.is_empty() && fraction.is_empty() {
        return Err(invalid());
    }
    if fraction.len() > DECIMALS as usize {
        return Err(invalid());
    }
    if !whole.chars().chain(fraction.chars()).all(|c| c.is_ascii_digit()) {
        return Err(invalid());
    }
    let digits = format!("{whole}{fraction:0<width$}", width = DECIMALS as usize);
    let magnitude = BigUint::parse_bytes(digits.as_bytes(), 10).ok_or_else(invalid)?;
    let sign = if negative { Sign::Minus } else { Sign::Plus };
    let value = BigInt::from_biguint(sign, magnitude);
    ensure_leaf_range(&value)?;
    Ok(value)
}

/// Renders a fixed-point amount in whole units, trimming trailing zeros.
pub fn format_units(value: &BigInt) -> String {
    let scale = wad();
    let magnitude = value.abs();
    let whole = &magnitude / &scale;
    let fraction = &magnitude % &scale;
    let sign = if value.is_negative() { "-" } else { "" };
    if fraction.is_zero() {
        return format!("{sign}{whole}");
    }
    let padded = format!("{:0>width$}", fraction.to_string(), width = DECIMALS as usize);
    format!("{sign}{whole}.{}", padded.trim_end_matches('0'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::{digest_to_hex, ZERO_DIGEST};
    use proptest::prelude::*;

    #[test]
    fn encodes_reference_amounts() {
        let three = parse_units("3").unwrap();
        assert_eq!(
            digest_to_hex(&encode_leaf(&three).unwrap()),
            "0x00000000000000000000000000000000000000000000000029a2241af62c0000"
        );
        let minus_one = parse_units("-1").unwrap();
        assert_eq!(
            digest_to_hex(&encode_leaf(&minus_one).unwrap()),
            "0xfffffffffffffffffffffffffffffffffffffffffffffffff21f494c589c0000"
        );
        assert_eq!(encode_leaf(&BigInt::zero()).unwrap(), ZERO_DIGEST);
    }

    #[test]
    fn extremes_roundtrip() {
        let min = min_leaf_value();
        let encoded = encode_leaf(&min).unwrap();
        assert_eq!(encoded[0], 0x80);
        assert!(encoded[1..].iter().all(|b| *b == 0));
        assert_eq!(decode_leaf(&encoded), min);

        let max = max_leaf_value();
        let encoded = encode_leaf(&max).unwrap();
        assert_eq!(encoded[0], 0x7f);
        assert_eq!(decode_leaf(&encoded), max);

        assert_eq!(decode_leaf(&[0xff; 32]), BigInt::from(-1));
    }

    #[test]
    fn rejects_out_of_range() {
        let too_big = max_leaf_value() + BigInt::one();
        assert_eq!(
            encode_leaf(&too_big).unwrap_err(),
            LeafError::OutOfRange(too_big.clone())
        );
        let too_small = min_leaf_value() - BigInt::one();
        assert!(encode_leaf(&too_small).is_err());
    }

    #[test]
    fn parses_and_formats_units() {
        assert_eq!(parse_units("1.5").unwrap(), BigInt::from(1_500_000_000_000_000_000u64));
        assert_eq!(parse_units("-0.000000000000000001").unwrap(), BigInt::from(-1));
        assert_eq!(parse_units(".25").unwrap(), BigInt::from(250_000_000_000_000_000u64));
        assert!(parse_units("1.0000000000000000001").is_err());
        assert!(parse_units("abc").is_err());
        assert!(parse_units("-").is_err());
        assert_eq!(format_units(&parse_units("-2.50").unwrap()), "-2.5");
        assert_eq!(format_units(&parse_units("400").unwrap()), "400");
    }

    proptest! {
        #[test]
        fn decode_inverts_encode(bytes in any::<[u8; 32]>()) {
            let value = BigInt::from_signed_bytes_be(&bytes);
            let encoded = encode_leaf(&value).unwrap();
            prop_assert_eq!(encoded, bytes);
            prop_assert_eq!(decode_leaf(&encoded), value);
        }

        #[test]
        fn small_values_roundtrip(value in any::<i128>()) {
            let value = BigInt::from(value);
            prop_assert_eq!(decode_leaf(&encode_leaf(&value).unwrap()), value);
        }
    }
}
