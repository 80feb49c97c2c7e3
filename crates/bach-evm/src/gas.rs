//! Gas cost calculations

use bach_primitives::U256;

use crate::opcode::Opcode;
use crate::rules::GasTable;

/// Costs that are the same under every rule version
pub mod cost {
    /// Zero gas
    pub const ZERO: u64 = 0;
    /// Base gas
    pub const BASE: u64 = 2;
    /// Very low gas
    pub const VERYLOW: u64 = 3;
    /// Low gas
    pub const LOW: u64 = 5;
    /// Mid gas
    pub const MID: u64 = 8;
    /// High gas
    pub const HIGH: u64 = 10;
    /// Jump dest gas
    pub const JUMPDEST: u64 = 1;
    /// Exp base gas
    pub const EXP: u64 = 10;
    /// Keccak base gas
    pub const SHA3: u64 = 30;
    /// Keccak word gas
    pub const SHA3_WORD: u64 = 6;
    /// BLOCKHASH gas
    pub const BLOCKHASH: u64 = 20;

    /// SSTORE writing a non-zero value into an empty slot
    pub const SSTORE_SET: u64 = 20000;
    /// Every other SSTORE
    pub const SSTORE_RESET: u64 = 5000;

    /// Log gas
    pub const LOG: u64 = 375;
    /// Log topic gas
    pub const LOG_TOPIC: u64 = 375;
    /// Log data gas (per byte)
    pub const LOG_DATA: u64 = 8;

    /// CREATE and CREATE2 base gas
    pub const CREATE: u64 = 32000;
    /// Call value transfer gas
    pub const CALL_VALUE: u64 = 9000;
    /// Call new account gas
    pub const CALL_NEW_ACCOUNT: u64 = 25000;
    /// Gas handed to the callee on top of the forwarded amount when value is sent
    pub const CALL_STIPEND: u64 = 2300;

    /// Memory gas per word
    pub const MEMORY: u64 = 3;
    /// Copy gas per word
    pub const COPY: u64 = 3;

    /// Max call depth
    pub const MAX_CALL_DEPTH: usize = 1024;
    /// Max stack size
    pub const MAX_STACK_SIZE: usize = 1024;
    /// Max deployed code size (EIP-170)
    pub const MAX_CODE_SIZE: usize = 24576;
}

/// Gas charged before an opcode executes.
///
/// Table-driven prices come from `table`; size-dependent parts are charged
/// separately by the interpreter.
pub fn constant_gas(opcode: Opcode, table: &GasTable) -> u64 {
    use Opcode::*;

    match opcode {
        STOP | RETURN | REVERT | INVALID | SSTORE => cost::ZERO,

        ADDRESS | ORIGIN | CALLER | CALLVALUE | CALLDATASIZE | CODESIZE | GASPRICE
        | COINBASE | TIMESTAMP | NUMBER | DIFFICULTY | GASLIMIT | RETURNDATASIZE | POP | PC
        | MSIZE | GAS => cost::BASE,

        ADD | SUB | NOT | LT | GT | SLT | SGT | EQ | ISZERO | AND | OR | XOR | BYTE | SHL
        | SHR | SAR | CALLDATALOAD | MLOAD | MSTORE | MSTORE8 | CALLDATACOPY | CODECOPY
        | RETURNDATACOPY => cost::VERYLOW,

        MUL | DIV | SDIV | MOD | SMOD | SIGNEXTEND => cost::LOW,
        ADDMOD | MULMOD | JUMP => cost::MID,
        JUMPI => cost::HIGH,
        JUMPDEST => cost::JUMPDEST,

        EXP => cost::EXP,
        KECCAK256 => cost::SHA3,
        BLOCKHASH => cost::BLOCKHASH,
        BALANCE => table.balance,
        EXTCODESIZE => table.extcode_size,
        EXTCODECOPY => table.extcode_copy,
        EXTCODEHASH => table.extcode_hash,
        SLOAD => table.sload,
        SELFDESTRUCT => table.suicide,

        LOG0 | LOG1 | LOG2 | LOG3 | LOG4 => {
            cost::LOG + cost::LOG_TOPIC * opcode.log_topics() as u64
        }

        CREATE | CREATE2 => cost::CREATE,
        CALL | CALLCODE | DELEGATECALL | STATICCALL => table.calls,

        _ if opcode.push_size() > 0 || opcode.dup_depth() > 0 || opcode.swap_depth() > 0 => {
            cost::VERYLOW
        }
        _ => cost::ZERO,
    }
}

/// Cost of growing memory from `current_size` to `new_size` bytes
pub fn memory_gas(current_size: usize, new_size: usize) -> u64 {
    if new_size <= current_size {
        return 0;
    }
    let new_cost = memory_word_cost(new_size.div_ceil(32));
    let old_cost = memory_word_cost(current_size.div_ceil(32));
    new_cost.saturating_sub(old_cost)
}

fn memory_word_cost(words: usize) -> u64 {
    let words = words as u64;
    cost::MEMORY * words + words * words / 512
}

/// Per-word cost of CALLDATACOPY, CODECOPY, EXTCODECOPY and RETURNDATACOPY
pub fn copy_gas(length: usize) -> u64 {
    cost::COPY * length.div_ceil(32) as u64
}

/// Exponent-size part of EXP
pub fn exp_byte_gas(exponent: U256, table: &GasTable) -> u64 {
    let bytes = (exponent.bits() as u64).div_ceil(8);
    table.exp_byte * bytes
}

/// Per-word part of KECCAK256, also charged by CREATE2 for hashing init code
pub fn sha3_word_gas(length: usize) -> u64 {
    cost::SHA3_WORD * length.div_ceil(32) as u64
}

/// Data part of LOG0..LOG4
pub fn log_data_gas(data_size: usize) -> u64 {
    cost::LOG_DATA * data_size as u64
}

/// SSTORE price before net gas metering
pub fn sstore_gas(current: U256, new: U256) -> u64 {
    if current.is_zero() && !new.is_zero() {
        cost::SSTORE_SET
    } else {
        cost::SSTORE_RESET
    }
}

/// All but one 64th of `available` (EIP-150)
pub fn all_but_one_64th(available: u64) -> u64 {
    available - available / 64
}
