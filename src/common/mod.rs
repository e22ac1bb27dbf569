pub mod config;
pub mod crypto;
pub mod decimal;
pub mod error;
pub mod harn;
pub mod identity;
pub mod keygen;

use num_bigint::BigUint;
use num_traits::Zero;

/// Big-endian bytes without leading zeros; zero encodes as no bytes at all.
pub fn minimal_bytes(value: &BigUint) -> Vec<u8> {
    if value.is_zero() {
        Vec::new()
    } else {
        value.to_bytes_be()
    }
}
