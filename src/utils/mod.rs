//! Utility functions for the TollChain poller.
//!
//! - [`conversion`] - Type conversions (U256, f64, hex encoding, timestamps)

mod conversion;

/// Decimals of the chain's native currency (toll amounts are paid in wei).
pub const NATIVE_DECIMALS: u8 = 18;

pub use conversion::{hex_encode, u256_to_f64, u256_to_f64_safe, u256_to_u64, unix_to_datetime};
