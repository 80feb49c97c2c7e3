//! Throwaway executions for tooling and tests.
//!
//! [`execute`] seeds a fresh in-memory store with a contract and calls it;
//! [`call`] issues a single call against a caller-supplied store. Unset
//! configuration is filled by [`Config::set_defaults`].
//!
//! Each run executes on its own thread with [`EXECUTION_STACK_SIZE`] bytes of
//! native stack, since every nested call adds interpreter frames to it. The
//! store's undo history is dropped once the top-level call returns.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use bach_crypto::keccak256;
use bach_primitives::{Address, BlockNumber, H256, U256};
use bytes::Bytes;
use tracing::{debug, warn};

use crate::block::{BlockContext, Message};
use crate::environment::ExecutionEnvironment;
use crate::error::EvmError;
use crate::interpreter::Machine;
use crate::rules::{FrozenRules, RuleSet};
use crate::state::{MemoryStateDb, StateDb};

/// Native stack reserved for one harness run; must hold a full-depth call chain
pub const EXECUTION_STACK_SIZE: usize = 256 * 1024 * 1024;

/// Block hash lookup used by the harness
pub type HashFn = Arc<dyn Fn(BlockNumber) -> H256 + Send + Sync>;

/// Harness configuration
#[derive(Clone, Default)]
pub struct Config {
    /// Rule version, frozen rules when unset
    pub rules: Option<Arc<dyn RuleSet>>,
    /// Block difficulty
    pub difficulty: U256,
    /// Transaction sender
    pub origin: Address,
    /// Block beneficiary
    pub coinbase: Address,
    /// Block number
    pub block_number: BlockNumber,
    /// Block timestamp, current time when unset
    pub time: Option<u64>,
    /// Gas for the call, `u64::MAX` when unset
    pub gas_limit: Option<u64>,
    /// Gas price
    pub gas_price: U256,
    /// Value sent with the call
    pub value: U256,
    /// Block hash lookup, `keccak256` of the decimal block number when unset
    pub block_hashes: Option<HashFn>,
    /// Store used by [`execute`], a fresh one when unset
    pub state: Option<MemoryStateDb>,
}

impl Config {
    /// Fill every unset field
    pub fn set_defaults(&mut self) {
        if self.rules.is_none() {
            self.rules = Some(Arc::new(FrozenRules));
        }
        if self.time.is_none() {
            let now = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0);
            self.time = Some(now);
        }
        if self.gas_limit.is_none() {
            self.gas_limit = Some(u64::MAX);
        }
        if self.block_hashes.is_none() {
            self.block_hashes = Some(Arc::new(|n: BlockNumber| {
                keccak256(n.to_string().as_bytes())
            }));
        }
    }
}

/// Result of a harness run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeOutput {
    /// Returned (or reverted) bytes
    pub output: Bytes,
    /// Gas consumed out of the configured limit
    pub gas_used: u64,
    /// Failure of the top-level call
    pub error: Option<EvmError>,
}

impl RuntimeOutput {
    /// Whether the top-level call succeeded
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Address the harness installs code at: `"contract"` right-aligned
pub fn contract_address() -> Address {
    Address::from_low_bytes(b"contract")
}

/// Install `code` at [`contract_address`] in a throwaway store and call it
pub fn execute(code: &[u8], input: &[u8], mut cfg: Config) -> (RuntimeOutput, MemoryStateDb) {
    cfg.set_defaults();
    let mut state = cfg.state.take().unwrap_or_default();
    let address = contract_address();

    state.get_or_create_account(cfg.origin);
    state.create_account(address);
    state.set_code(address, Bytes::copy_from_slice(code));

    let output = run(&cfg, &mut state, address, Bytes::copy_from_slice(input));
    (output, state)
}

/// Call `address` in a caller-supplied store
pub fn call<S: StateDb + Send>(address: Address, input: &[u8], state: &mut S, mut cfg: Config) -> RuntimeOutput {
    cfg.set_defaults();
    state.get_or_create_account(cfg.origin);
    run(&cfg, state, address, Bytes::copy_from_slice(input))
}

fn run<S: StateDb + Send>(cfg: &Config, state: &mut S, address: Address, input: Bytes) -> RuntimeOutput {
    let spawned = std::thread::scope(|scope| {
        std::thread::Builder::new()
            .name("bach-evm-runtime".into())
            .stack_size(EXECUTION_STACK_SIZE)
            .spawn_scoped(scope, || run_inline(cfg, state, address, input.clone()))
            .map(|handle| handle.join())
    });

    match spawned {
        Ok(Ok(output)) => output,
        Ok(Err(panic)) => std::panic::resume_unwind(panic),
        Err(err) => {
            warn!("cannot spawn runtime thread, running on the caller's stack: {}", err);
            run_inline(cfg, state, address, input)
        }
    }
}

fn run_inline<S: StateDb>(cfg: &Config, state: &mut S, address: Address, input: Bytes) -> RuntimeOutput {
    let gas_limit = cfg.gas_limit.unwrap_or(u64::MAX);
    let rules: Arc<dyn RuleSet> = cfg.rules.clone().unwrap_or_else(|| Arc::new(FrozenRules));
    let hash_fn = cfg.block_hashes.clone();
    let resolver = move |n: BlockNumber| hash_fn.as_ref().map_or(H256::ZERO, |f| f(n));

    let block = BlockContext {
        number: cfg.block_number,
        timestamp: cfg.time.unwrap_or(0),
        difficulty: cfg.difficulty,
        gas_limit,
        coinbase: cfg.coinbase,
        parent_hash: H256::ZERO,
    };
    let message = Message {
        origin: cfg.origin,
        gas_price: cfg.gas_price,
        value: cfg.value,
        input,
        gas: gas_limit,
    };

    let outcome = {
        let mut env = ExecutionEnvironment::new(
            rules.as_ref(),
            state,
            &block,
            &message,
            &resolver,
            &Machine,
        );
        env.transact(address)
    };
    state.finalise();

    let gas_used = gas_limit - outcome.gas_left;
    debug!(
        "runtime call to {} at block {}: gas_used={} error={:?}",
        address, cfg.block_number, gas_used, outcome.error
    );

    RuntimeOutput {
        output: outcome.output,
        gas_used,
        error: outcome.error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::ChainConfig;

    /// PUSH1 value PUSH1 0 MSTORE PUSH1 32 PUSH1 0 RETURN
    fn return_byte(value: u8) -> Vec<u8> {
        vec![0x60, value, 0x60, 0x00, 0x52, 0x60, 0x20, 0x60, 0x00, 0xf3]
    }

    // ==================== Defaults ====================

    #[test]
    fn test_set_defaults() {
        let mut cfg = Config::default();
        cfg.set_defaults();
        assert!(cfg.rules.is_some());
        assert!(cfg.time.is_some());
        assert_eq!(cfg.gas_limit, Some(u64::MAX));
        assert_eq!(cfg.gas_price, U256::zero());
        assert_eq!(cfg.value, U256::zero());
        let hash = cfg.block_hashes.as_ref().map(|f| f(7));
        assert_eq!(hash, Some(keccak256(b"7")));
    }

    #[test]
    fn test_set_defaults_keeps_explicit_values() {
        let mut cfg = Config {
            time: Some(5),
            gas_limit: Some(100),
            ..Config::default()
        };
        cfg.set_defaults();
        assert_eq!(cfg.time, Some(5));
        assert_eq!(cfg.gas_limit, Some(100));
    }

    #[test]
    fn test_set_defaults_keeps_zero_gas() {
        let mut cfg = Config {
            gas_limit: Some(0),
            ..Config::default()
        };
        cfg.set_defaults();
        assert_eq!(cfg.gas_limit, Some(0));
    }

    #[test]
    fn test_contract_address() {
        let address = contract_address();
        assert_eq!(&address.as_bytes()[12..], b"contract");
        assert!(address.as_bytes()[..12].iter().all(|b| *b == 0));
    }

    // ==================== Execute ====================

    #[test]
    fn test_execute_returns_output() {
        let (out, state) = execute(&return_byte(0x2a), &[], Config::default());
        assert!(out.is_success());
        assert_eq!(U256::from_big_endian(&out.output), U256::from(0x2au64));
        assert!(out.gas_used > 0);
        assert_eq!(state.get_code(&contract_address()).as_ref(), return_byte(0x2a).as_slice());
    }

    #[test]
    fn test_execute_reports_gas_used() {
        // PUSH1 1 POP STOP: 3 + 2
        let cfg = Config {
            gas_limit: Some(1_000),
            ..Config::default()
        };
        let (out, _) = execute(&[0x60, 0x01, 0x50, 0x00], &[], cfg);
        assert_eq!(out.gas_used, 5);
    }

    #[test]
    fn test_execute_with_zero_gas() {
        let cfg = Config {
            gas_limit: Some(0),
            ..Config::default()
        };
        let (out, _) = execute(&[0x60, 0x01, 0x50, 0x00], &[], cfg);
        assert_eq!(out.error, Some(EvmError::OutOfGas));
        assert_eq!(out.gas_used, 0);
    }

    #[test]
    fn test_execute_stop_with_zero_gas() {
        let cfg = Config {
            gas_limit: Some(0),
            ..Config::default()
        };
        let (out, _) = execute(&[0x00], &[], cfg);
        assert!(out.is_success());
        assert_eq!(out.gas_used, 0);
    }

    #[test]
    fn test_execute_echoes_calldata() {
        // CALLDATASIZE PUSH1 0 PUSH1 0 CALLDATACOPY CALLDATASIZE PUSH1 0 RETURN
        let code = [0x36, 0x60, 0x00, 0x60, 0x00, 0x37, 0x36, 0x60, 0x00, 0xf3];
        let (out, _) = execute(&code, b"hello", Config::default());
        assert_eq!(out.output.as_ref(), b"hello");
    }

    #[test]
    fn test_execute_block_hash_default() {
        // PUSH1 9 BLOCKHASH ...RETURN
        let code = [0x60, 0x09, 0x40, 0x60, 0x00, 0x52, 0x60, 0x20, 0x60, 0x00, 0xf3];
        let cfg = Config {
            block_number: 10,
            ..Config::default()
        };
        let (out, _) = execute(&code, &[], cfg);
        assert_eq!(out.output.as_ref(), keccak256(b"9").as_bytes());
    }

    #[test]
    fn test_execute_value_without_balance() {
        let cfg = Config {
            value: U256::from(1u64),
            ..Config::default()
        };
        let (out, _) = execute(&return_byte(1), &[], cfg);
        assert_eq!(out.error, Some(EvmError::InsufficientBalance));
        assert_eq!(out.gas_used, 0);
    }

    #[test]
    fn test_execute_with_chain_rules() {
        let cfg = Config {
            rules: Some(Arc::new(ChainConfig::mainnet())),
            block_number: 0,
            ..Config::default()
        };
        // RETURNDATASIZE is not active at genesis
        let (out, _) = execute(&[0x3d], &[], cfg);
        assert_eq!(out.error, Some(EvmError::InvalidOpcode(0x3d)));
    }

    // ==================== Call ====================

    #[test]
    fn test_call_existing_state() {
        let mut state = MemoryStateDb::new();
        let target = Address::from_bytes([0x11; 20]);
        state.set_code(target, Bytes::from(return_byte(7)));

        let out = call(target, &[], &mut state, Config::default());
        assert!(out.is_success());
        assert_eq!(U256::from_big_endian(&out.output), U256::from(7u64));
        assert!(state.exists(&Address::ZERO));
    }

    #[test]
    fn test_call_transfers_value() {
        let mut state = MemoryStateDb::new();
        let origin = Address::from_bytes([0x01; 20]);
        let target = Address::from_bytes([0x02; 20]);
        state.add_balance(origin, U256::from(100u64));

        let cfg = Config {
            origin,
            value: U256::from(40u64),
            ..Config::default()
        };
        let out = call(target, &[], &mut state, cfg);
        assert!(out.is_success());
        assert_eq!(state.get_balance(&origin), U256::from(60u64));
        assert_eq!(state.get_balance(&target), U256::from(40u64));
    }

    #[test]
    fn test_call_drops_undo_history() {
        let mut state = MemoryStateDb::new();
        let target = Address::from_bytes([0x03; 20]);
        // PUSH1 1 PUSH1 0 SSTORE STOP
        state.set_code(target, Bytes::from_static(&[0x60, 0x01, 0x60, 0x00, 0x55, 0x00]));

        for _ in 0..2 {
            let out = call(target, &[], &mut state, Config::default());
            assert!(out.is_success());
            assert_eq!(state.journal_len(), 0);
        }
        assert_eq!(
            state.get_storage(&target, &H256::ZERO),
            H256::from_word(U256::one())
        );
    }

    #[test]
    fn test_execute_drops_undo_history() {
        let (out, state) = execute(&return_byte(1), &[], Config::default());
        assert!(out.is_success());
        assert_eq!(state.journal_len(), 0);
    }
}
