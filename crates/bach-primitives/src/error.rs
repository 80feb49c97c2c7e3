//! Common error types for primitives

use thiserror::Error;

use crate::address::AddressError;
use crate::hash::HashError;

/// Primitive parsing error
#[derive(Debug, Error)]
pub enum PrimitiveError {
    /// Address error
    #[error("address error: {0}")]
    Address(#[from] AddressError),

    /// Hash error
    #[error("hash error: {0}")]
    Hash(#[from] HashError),

    /// Malformed hex byte string
    #[error("invalid hex bytes: {0}")]
    InvalidHex(String),

    /// Malformed decimal or hex quantity
    #[error("invalid quantity: {0}")]
    InvalidQuantity(String),
}

/// Decode a hex byte string, with or without `0x` prefix
pub fn decode_hex(s: &str) -> Result<Vec<u8>, PrimitiveError> {
    let s = s.trim();
    let s = s.strip_prefix("0x").unwrap_or(s);
    hex::decode(s).map_err(|e| PrimitiveError::InvalidHex(e.to_string()))
}

/// Parse a quantity given in decimal or `0x`-prefixed hex
pub fn parse_u256(s: &str) -> Result<primitive_types::U256, PrimitiveError> {
    let s = s.trim();
    let invalid = || PrimitiveError::InvalidQuantity(s.to_string());
    match s.strip_prefix("0x") {
        Some(h) => primitive_types::U256::from_str_radix(h, 16).map_err(|_| invalid()),
        None => primitive_types::U256::from_dec_str(s).map_err(|_| invalid()),
    }
}
