//! # bach-evm
//!
//! Execution environment and call dispatcher for a gas-metered stack VM
//! following the Ethereum Classic rule history.
//!
//! This crate provides:
//! - Rule versions and per-version gas tables
//! - Block and message context, including ancestor block-hash lookup
//! - A journaled state-store capability with an in-memory implementation
//! - The execution environment and the CALL/CREATE family dispatcher
//! - A reference bytecode interpreter
//! - A throwaway execution harness

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod block;
pub mod dispatch;
pub mod environment;
pub mod error;
pub mod gas;
pub mod interpreter;
pub mod memory;
pub mod opcode;
pub mod rules;
pub mod runtime;
pub mod stack;
pub mod state;

pub use block::{
    AncestorHashes, BlockContext, BlockHashResolver, ChainReader, HeaderRecord, MemoryChain,
    Message,
};
pub use dispatch::{
    create2_address, create_address, CallOutcome, CallScheme, CreateOutcome, CreateScheme,
};
pub use environment::{CallFrame, ExecutionEnvironment};
pub use error::{ConfigError, ConfigResult, EvmError, EvmResult};
pub use interpreter::{Interpreter, InterpreterResult, Machine};
pub use opcode::{Fork, Opcode};
pub use rules::{ChainConfig, FrozenRules, GasTable, RuleSet};
pub use runtime::{Config, RuntimeOutput};
pub use state::{Account, Log, MemoryStateDb, SnapshotId, StateDb};
