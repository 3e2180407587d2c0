//! Type conversion and formatting utilities.
//!
//! Functions for converting chain values (U256 amounts, timestamps, byte
//! strings) into the representations stored in PostgreSQL and sent to clients.

use alloy::primitives::{hex, U256};
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use num_traits::ToPrimitive;
use once_cell::sync::Lazy;
use std::str::FromStr;

// ============================================
// Hex Encoding
// ============================================

/// Encode bytes as a lowercase hex string with 0x prefix.
pub fn hex_encode(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

// ============================================
// U256 Conversions
// ============================================

/// Convert a U256 to u64, saturating at `u64::MAX`.
///
/// Contract timestamps are emitted as uint256 but always fit in 64 bits.
pub fn u256_to_u64(value: U256) -> u64 {
    value.saturating_to::<u64>()
}

/// Convert U256 to f64 with decimal adjustment using BigDecimal for precision.
///
/// # Example
/// ```ignore
/// let value = U256::from(1_000_000_000_000_000_000u128); // 1e18
/// let adjusted = u256_to_f64(value, 18); // Returns 1.0
/// ```
pub fn u256_to_f64(value: U256, decimals: u8) -> f64 {
    u256_to_f64_safe(value, decimals).unwrap_or(0.0)
}

/// Convert U256 to f64 with decimal adjustment, returning None when the
/// value cannot be represented as a finite f64.
pub fn u256_to_f64_safe(value: U256, decimals: u8) -> Option<f64> {
    let big_value = BigDecimal::from_str(&value.to_string()).ok()?;

    let adjusted = if decimals == 0 { big_value } else { big_value / big_pow10(decimals) };

    let result = adjusted.to_f64()?;

    if result.is_finite() {
        Some(result)
    } else {
        None
    }
}

// ============================================
// Timestamps
// ============================================

/// Convert a unix timestamp in seconds to a UTC datetime.
///
/// Out-of-range values clamp to the unix epoch.
pub fn unix_to_datetime(secs: u64) -> DateTime<Utc> {
    i64::try_from(secs)
        .ok()
        .and_then(|s| DateTime::from_timestamp(s, 0))
        .unwrap_or_default()
}

// ============================================
// Internal Helpers
// ============================================

static POW10_CACHE: Lazy<[BigDecimal; 25]> =
    Lazy::new(|| std::array::from_fn(|i| BigDecimal::from(10u128.pow(i as u32))));

/// Compute 10^exp as BigDecimal.
pub(crate) fn big_pow10(exp: u8) -> BigDecimal {
    if (exp as usize) < POW10_CACHE.len() {
        POW10_CACHE[exp as usize].clone()
    } else {
        BigDecimal::from_str(&format!("1e{}", exp)).unwrap_or_else(|_| BigDecimal::from(1u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_encode_prefixed_lowercase() {
        assert_eq!(hex_encode(&[0xAB, 0x01]), "0xab01");
    }

    #[test]
    fn test_one_ether_converts_to_one() {
        let value = U256::from(1_000_000_000_000_000_000u128);
        assert_eq!(u256_to_f64(value, 18), 1.0);
    }

    #[test]
    fn test_fractional_amount() {
        // 0.05 ETH
        let value = U256::from(50_000_000_000_000_000u128);
        let converted = u256_to_f64(value, 18);
        assert!((converted - 0.05).abs() < 1e-12);
    }

    #[test]
    fn test_u256_to_u64_saturates() {
        assert_eq!(u256_to_u64(U256::from(1_700_000_000u64)), 1_700_000_000);
        assert_eq!(u256_to_u64(U256::MAX), u64::MAX);
    }

    #[test]
    fn test_unix_to_datetime() {
        assert_eq!(unix_to_datetime(1_700_000_000).timestamp(), 1_700_000_000);
        assert_eq!(unix_to_datetime(u64::MAX).timestamp(), 0);
    }

    #[test]
    fn test_big_pow10_beyond_u64() {
        assert_eq!(big_pow10(24), BigDecimal::from_str("1e24").unwrap());
        assert_eq!(big_pow10(18), BigDecimal::from(1_000_000_000_000_000_000u64));
    }
}
