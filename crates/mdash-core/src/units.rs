//! Smallest-unit integer amounts and their natural-unit decimals.
//!
//! The trading API reports every amount as an integer in the smallest unit
//! of the token it is denominated in. Dividing by `10^decimals` must use the
//! decimals of that specific token; callers pass the exponent per field.

use crate::error::{CoreError, Result};
use rust_decimal::Decimal;

/// Decimals of the native gas token (wei-equivalent units).
pub const NATIVE_DECIMALS: u32 = 18;

/// Largest scale `rust_decimal` can represent.
const MAX_SCALE: u32 = 28;

/// Scale a smallest-unit integer to natural units.
///
/// `scale_units(2_500_000_000_000_000_000, 18)` is `2.5`.
pub fn scale_units(raw: u128, decimals: u32) -> Result<Decimal> {
    if decimals > MAX_SCALE {
        return Err(CoreError::DecimalsOutOfRange(decimals));
    }
    let mantissa = i128::try_from(raw)
        .map_err(|_| CoreError::Overflow(format!("{raw} does not fit i128")))?;
    Decimal::try_from_i128_with_scale(mantissa, decimals)
        .map(|d| d.normalize())
        .map_err(|e| CoreError::Overflow(format!("{raw} at {decimals} decimals: {e}")))
}

/// Parse a smallest-unit integer string and scale it to natural units.
pub fn parse_units(raw: &str, decimals: u32) -> Result<Decimal> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(CoreError::InvalidAmount("empty amount".to_string()));
    }
    let value: u128 = trimmed
        .parse()
        .map_err(|e| CoreError::InvalidAmount(format!("{trimmed:?}: {e}")))?;
    scale_units(value, decimals)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_scale_native_units() {
        assert_eq!(parse_units("2500000000000000000", 18).unwrap(), dec!(2.5));
        assert_eq!(parse_units("1000000000000000000", 18).unwrap(), dec!(1));
    }

    #[test]
    fn test_scale_uses_given_decimals() {
        // Same raw integer, different tokens.
        assert_eq!(parse_units("2500000", 6).unwrap(), dec!(2.5));
        assert_eq!(parse_units("2500000", 18).unwrap(), dec!(0.0000000000025));
        assert_eq!(parse_units("7", 0).unwrap(), dec!(7));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(parse_units("", 18), Err(CoreError::InvalidAmount(_))));
        assert!(matches!(parse_units("1.5", 18), Err(CoreError::InvalidAmount(_))));
        assert!(matches!(parse_units("-1", 18), Err(CoreError::InvalidAmount(_))));
    }

    #[test]
    fn test_decimals_out_of_range() {
        assert!(matches!(
            scale_units(1, 29),
            Err(CoreError::DecimalsOutOfRange(29))
        ));
    }

    #[test]
    fn test_mantissa_boundary() {
        // 2^96 - 1 is the largest representable mantissa.
        assert_eq!(
            parse_units("79228162514264337593543950335", 0).unwrap(),
            Decimal::MAX
        );
        assert!(matches!(
            parse_units("79228162514264337593543950336", 0),
            Err(CoreError::Overflow(_))
        ));
        // Scaling does not rescue an oversized mantissa.
        assert!(matches!(
            parse_units("79228162514264337593543950336", 18),
            Err(CoreError::Overflow(_))
        ));
    }

    #[test]
    fn test_integer_width_boundary() {
        assert!(matches!(
            scale_units(u128::MAX, 0),
            Err(CoreError::Overflow(_))
        ));
        // 2^128 does not parse as an integer at all.
        assert!(matches!(
            parse_units("340282366920938463463374607431768211456", 0),
            Err(CoreError::InvalidAmount(_))
        ));
    }

    #[test]
    fn test_max_scale() {
        assert_eq!(parse_units("1", 28).unwrap(), dec!(0.0000000000000000000000000001));
    }
}
