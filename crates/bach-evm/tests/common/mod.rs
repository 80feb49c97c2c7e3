//! Shared helpers for the integration tests

#![allow(dead_code)]

use bach_evm::{
    BlockContext, BlockHashResolver, ExecutionEnvironment, Machine, MemoryStateDb, Message,
    RuleSet,
};
use bach_primitives::{Address, BlockNumber, H256};

pub const SENDER: Address = Address::from_bytes([0x5e; 20]);
pub const TARGET: Address = Address::from_bytes([0x7a; 20]);
pub const INNER: Address = Address::from_bytes([0x0b; 20]);

/// PUSH1 1 PUSH1 0 SSTORE STOP
pub const SSTORE_CODE: [u8; 6] = [0x60, 0x01, 0x60, 0x00, 0x55, 0x00];

/// PUSH1 0xab PUSH1 0 MSTORE8 PUSH1 1 PUSH1 0 REVERT
pub const REVERT_CODE: [u8; 10] = [0x60, 0xab, 0x60, 0x00, 0x53, 0x60, 0x01, 0x60, 0x00, 0xfd];

pub fn no_hashes(_: BlockNumber) -> H256 {
    H256::ZERO
}

/// PUSH20 `address`
pub fn push_address(address: Address) -> Vec<u8> {
    let mut code = vec![0x73];
    code.extend_from_slice(address.as_bytes());
    code
}

/// Run `f` against an environment over `state`
pub fn with_env<R>(
    rules: &dyn RuleSet,
    state: &mut MemoryStateDb,
    block: &BlockContext,
    message: &Message,
    hashes: &dyn BlockHashResolver,
    f: impl FnOnce(&mut ExecutionEnvironment<'_, MemoryStateDb, Machine>) -> R,
) -> R {
    let mut env = ExecutionEnvironment::new(rules, state, block, message, hashes, &Machine);
    f(&mut env)
}
