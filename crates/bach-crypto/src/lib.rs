//! # bach-crypto
//!
//! Hashing for the BachLedger execution engine.
//!
//! Only Keccak-256 is needed here: contract address derivation, code
//! hashes, the `KECCAK256` opcode and the default block-hash function.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod hash;

pub use hash::{keccak256, keccak256_concat, EMPTY_CODE_HASH};
