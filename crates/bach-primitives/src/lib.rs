//! # bach-primitives
//!
//! Primitive types shared by the execution crates.
//!
//! Addresses, 256-bit hashes and the `U256` machine word, plus the hex
//! helpers the tooling uses to read them from the command line.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod address;
mod error;
mod hash;

pub use address::{Address, AddressError};
pub use error::{decode_hex, parse_u256, PrimitiveError};
pub use hash::{HashError, H256};

// Re-export primitive-types for U256
pub use primitive_types::U256;

/// Block height type
pub type BlockNumber = u64;

/// Account nonce type
pub type Nonce = u64;

/// Gas type
pub type Gas = u64;
