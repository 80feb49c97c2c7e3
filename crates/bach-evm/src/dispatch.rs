//! Call dispatcher: CALL, CALLCODE, DELEGATECALL, STATICCALL, CREATE, CREATE2.
//!
//! Every kind follows the same sequence:
//!
//! 1. depth check (no snapshot, forwarded gas returned)
//! 2. static and balance prechecks (no mutation)
//! 3. snapshot
//! 4. target resolution, or address derivation plus collision check
//! 5. value transfer
//! 6. interpreter run in a child frame one level below its parent
//! 7. on success keep mutations (and deposit code for creations)
//! 8. on failure revert to the snapshot; gas is only handed back on revert
//!
//! The snapshot is popped on every path, so the snapshot stack always
//! mirrors the frame stack.
//!
//! Top-level code runs at depth 0, the same level as the external frame it
//! is issued from, and a frame may only call while its depth is below
//! [`MAX_CALL_DEPTH`]. That admits 1025 nested frames.

use bach_crypto::{keccak256, keccak256_concat, EMPTY_CODE_HASH};
use bach_primitives::{Address, H256, U256};
use bytes::Bytes;
use rlp::RlpStream;
use tracing::{debug, trace};

use crate::environment::{CallFrame, ExecutionEnvironment};
use crate::error::EvmError;
use crate::gas::cost::{MAX_CALL_DEPTH, MAX_CODE_SIZE};
use crate::interpreter::{Interpreter, InterpreterResult};
use crate::state::{SnapshotId, StateDb};

/// Message-call kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallScheme {
    /// Run the target's code in the target's context, with value
    Call,
    /// Run the target's code in the caller's context, with value
    CallCode,
    /// Run the target's code in the caller's context, keeping caller and value
    DelegateCall,
    /// Run the target's code in the target's context, read-only
    StaticCall,
}

/// Contract creation kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateScheme {
    /// Address from sender and nonce
    Create,
    /// Address from sender, salt and init code hash
    Create2 {
        /// Caller-chosen salt
        salt: H256,
    },
}

/// Result of a message call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallOutcome {
    /// Return data, or revert data
    pub output: Bytes,
    /// Gas handed back to the caller
    pub gas_left: u64,
    /// Failure reason, `None` on success
    pub error: Option<EvmError>,
}

impl CallOutcome {
    fn success(output: Bytes, gas_left: u64) -> Self {
        Self {
            output,
            gas_left,
            error: None,
        }
    }

    fn failure(error: EvmError, gas_left: u64) -> Self {
        Self {
            output: Bytes::new(),
            gas_left,
            error: Some(error),
        }
    }

    /// Whether the call succeeded
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Result of a contract creation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateOutcome {
    /// Address of the new contract, set only on success
    pub address: Option<Address>,
    /// Revert data; empty otherwise
    pub output: Bytes,
    /// Gas handed back to the caller
    pub gas_left: u64,
    /// Failure reason, `None` on success
    pub error: Option<EvmError>,
}

impl CreateOutcome {
    fn failure(error: EvmError, gas_left: u64) -> Self {
        Self {
            address: None,
            output: Bytes::new(),
            gas_left,
            error: Some(error),
        }
    }

    /// Whether the creation succeeded
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// CREATE address: `keccak256(rlp([sender, nonce]))[12..]`
pub fn create_address(sender: &Address, nonce: u64) -> Address {
    let mut stream = RlpStream::new_list(2);
    stream.append(sender);
    stream.append(&nonce);
    let hash = keccak256(&stream.out());
    Address::from_low_bytes(hash.as_bytes())
}

/// CREATE2 address: `keccak256(0xff ++ sender ++ salt ++ keccak256(init_code))[12..]`
pub fn create2_address(sender: &Address, salt: &H256, init_code: &[u8]) -> Address {
    let code_hash = keccak256(init_code);
    let hash = keccak256_concat(&[
        &[0xffu8][..],
        &sender.as_bytes()[..],
        &salt.as_bytes()[..],
        &code_hash.as_bytes()[..],
    ]);
    Address::from_low_bytes(hash.as_bytes())
}

impl<S: StateDb, I: Interpreter> ExecutionEnvironment<'_, S, I> {
    /// Issue the message as a top-level CALL to `to` from the external frame
    pub fn transact(&mut self, to: Address) -> CallOutcome {
        let message = self.message();
        let (origin, input, gas, value) =
            (message.origin, message.input.clone(), message.gas, message.value);
        self.call(&CallFrame::external(origin), to, input, gas, value)
    }

    /// CALL: run `to`'s code in its own context, transferring `value`
    pub fn call(
        &mut self,
        parent: &CallFrame,
        to: Address,
        input: Bytes,
        gas: u64,
        value: U256,
    ) -> CallOutcome {
        self.dispatch_call(CallScheme::Call, parent, to, input, gas, value)
    }

    /// CALLCODE: run `to`'s code against the caller's own account
    pub fn call_code(
        &mut self,
        parent: &CallFrame,
        to: Address,
        input: Bytes,
        gas: u64,
        value: U256,
    ) -> CallOutcome {
        self.dispatch_call(CallScheme::CallCode, parent, to, input, gas, value)
    }

    /// DELEGATECALL: like CALLCODE, keeping the parent's caller and value
    pub fn delegate_call(
        &mut self,
        parent: &CallFrame,
        to: Address,
        input: Bytes,
        gas: u64,
    ) -> CallOutcome {
        self.dispatch_call(CallScheme::DelegateCall, parent, to, input, gas, parent.value)
    }

    /// STATICCALL: like CALL without value, forbidding any state change
    pub fn static_call(
        &mut self,
        parent: &CallFrame,
        to: Address,
        input: Bytes,
        gas: u64,
    ) -> CallOutcome {
        self.dispatch_call(CallScheme::StaticCall, parent, to, input, gas, U256::zero())
    }

    /// CREATE: deploy `init_code` at an address derived from the sender's nonce
    pub fn create(
        &mut self,
        parent: &CallFrame,
        init_code: Bytes,
        gas: u64,
        value: U256,
    ) -> CreateOutcome {
        self.dispatch_create(CreateScheme::Create, parent, init_code, gas, value)
    }

    /// CREATE2: deploy `init_code` at an address derived from `salt` and the code hash
    pub fn create2(
        &mut self,
        parent: &CallFrame,
        init_code: Bytes,
        gas: u64,
        value: U256,
        salt: H256,
    ) -> CreateOutcome {
        self.dispatch_create(CreateScheme::Create2 { salt }, parent, init_code, gas, value)
    }

    fn dispatch_call(
        &mut self,
        scheme: CallScheme,
        parent: &CallFrame,
        to: Address,
        input: Bytes,
        gas: u64,
        value: U256,
    ) -> CallOutcome {
        trace!("{:?} depth={} from={} to={} gas={}", scheme, parent.depth, parent.address, to, gas);

        if parent.depth >= MAX_CALL_DEPTH {
            debug!("{:?} to {} rejected at depth {}", scheme, to, parent.depth);
            return CallOutcome::failure(EvmError::CallDepthExceeded, gas);
        }
        let depth = self.child_depth(parent);

        let transfers_value = matches!(scheme, CallScheme::Call | CallScheme::CallCode);
        if scheme == CallScheme::Call && parent.is_static && !value.is_zero() {
            return CallOutcome::failure(EvmError::StaticCallViolation, 0);
        }
        if transfers_value && !self.can_transfer(&parent.address, value) {
            debug!("{:?} to {} rejected: insufficient balance", scheme, to);
            return CallOutcome::failure(EvmError::InsufficientBalance, gas);
        }

        let snapshot = self.snapshot();

        let frame = match scheme {
            CallScheme::Call | CallScheme::StaticCall => CallFrame {
                address: to,
                code_address: to,
                caller: parent.address,
                value,
                input,
                depth,
                is_static: parent.is_static || scheme == CallScheme::StaticCall,
            },
            CallScheme::CallCode => CallFrame {
                address: parent.address,
                code_address: to,
                caller: parent.address,
                value,
                input,
                depth,
                is_static: parent.is_static,
            },
            CallScheme::DelegateCall => CallFrame {
                address: parent.address,
                code_address: to,
                caller: parent.caller,
                value: parent.value,
                input,
                depth,
                is_static: parent.is_static,
            },
        };

        if scheme == CallScheme::Call {
            if !self.state.exists(&to) {
                // touching a missing account without value creates nothing (EIP-161)
                if self.is_atlantis() && value.is_zero() {
                    self.pop_snapshot(snapshot);
                    self.return_data = Bytes::new();
                    return CallOutcome::success(Bytes::new(), gas);
                }
                self.state.create_account(to);
            }
            self.transfer(parent.address, to, value);
        }

        let code = self.state.get_code(&to);
        let result = self.run_frame(&frame, &code, gas);
        let outcome = self.finish(snapshot, result);
        if let Some(error) = &outcome.error {
            debug!("{:?} to {} failed at depth {}: {}", scheme, to, frame.depth, error);
        }
        CallOutcome {
            output: outcome.output,
            gas_left: outcome.gas_left,
            error: outcome.error,
        }
    }

    fn dispatch_create(
        &mut self,
        scheme: CreateScheme,
        parent: &CallFrame,
        init_code: Bytes,
        gas: u64,
        value: U256,
    ) -> CreateOutcome {
        trace!("{:?} depth={} from={} gas={}", scheme, parent.depth, parent.address, gas);

        if parent.depth >= MAX_CALL_DEPTH {
            debug!("{:?} rejected at depth {}", scheme, parent.depth);
            return CreateOutcome::failure(EvmError::CallDepthExceeded, gas);
        }
        let depth = self.child_depth(parent);

        if parent.is_static {
            return CreateOutcome::failure(EvmError::StaticCallViolation, 0);
        }
        if !self.can_transfer(&parent.address, value) {
            debug!("{:?} rejected: insufficient balance", scheme);
            return CreateOutcome::failure(EvmError::InsufficientBalance, gas);
        }

        let nonce = self.state.get_nonce(&parent.address);
        let Some(next_nonce) = nonce.checked_add(1) else {
            return CreateOutcome::failure(EvmError::NonceOverflow, gas);
        };
        let address = match scheme {
            CreateScheme::Create => create_address(&parent.address, nonce),
            CreateScheme::Create2 { salt } => create2_address(&parent.address, &salt, &init_code),
        };
        // survives a failed creation
        self.state.set_nonce(parent.address, next_nonce);

        let snapshot = self.snapshot();

        if self.state.get_nonce(&address) != 0
            || self.state.get_code_hash(&address) != EMPTY_CODE_HASH
        {
            debug!("{:?} collides with existing account {}", scheme, address);
            self.revert(snapshot);
            self.pop_snapshot(snapshot);
            self.return_data = Bytes::new();
            return CreateOutcome::failure(EvmError::CreateCollision, 0);
        }

        self.state.create_account(address);
        if self.is_atlantis() {
            self.state.set_nonce(address, 1);
        }
        self.transfer(parent.address, address, value);

        let frame = CallFrame {
            address,
            code_address: address,
            caller: parent.address,
            value,
            input: Bytes::new(),
            depth,
            is_static: false,
        };
        let mut result = self.run_frame(&frame, &init_code, gas);
        if result.error.is_none() {
            self.deposit_code(address, &mut result);
        }

        let outcome = self.finish(snapshot, result);
        if let Some(error) = &outcome.error {
            debug!("{:?} of {} failed at depth {}: {}", scheme, address, frame.depth, error);
        }
        CreateOutcome {
            address: outcome.is_success().then_some(address),
            output: outcome.output,
            gas_left: outcome.gas_left,
            error: outcome.error,
        }
    }

    /// Depth of a frame entered from `parent`
    fn child_depth(&self, parent: &CallFrame) -> usize {
        if self.depth() == 0 {
            return 0;
        }
        debug_assert_eq!(self.depth(), parent.depth + 1, "frame depth out of step with snapshots");
        parent.depth + 1
    }

    fn run_frame(&mut self, frame: &CallFrame, code: &Bytes, gas: u64) -> InterpreterResult {
        if code.is_empty() {
            return InterpreterResult::success(Bytes::new(), gas);
        }
        self.return_data = Bytes::new();
        let interpreter = self.interpreter;
        interpreter.run(self, frame, code, gas)
    }

    /// Store the init code's output as contract code, charging the deposit cost
    fn deposit_code(&mut self, address: Address, result: &mut InterpreterResult) {
        let code = std::mem::take(&mut result.output);
        if self.is_atlantis() && code.len() > MAX_CODE_SIZE {
            result.error = Some(EvmError::MaxCodeSizeExceeded);
            return;
        }
        let deposit = code.len() as u64 * self.gas_table().create_data;
        if result.gas_left >= deposit {
            result.gas_left -= deposit;
            self.state.set_code(address, code);
        } else if self.is_homestead() {
            result.error = Some(EvmError::OutOfGas);
        }
        // before Homestead an unaffordable deposit leaves the account without code
    }

    /// Apply the success/failure rules to a finished child frame and pop its snapshot
    fn finish(&mut self, snapshot: SnapshotId, result: InterpreterResult) -> CallOutcome {
        let outcome = match result.error {
            None => CallOutcome::success(result.output, result.gas_left),
            Some(error) => {
                self.revert(snapshot);
                if error.is_revert() {
                    CallOutcome {
                        output: result.output,
                        gas_left: result.gas_left,
                        error: Some(error),
                    }
                } else {
                    CallOutcome::failure(error, 0)
                }
            }
        };
        self.pop_snapshot(snapshot);
        self.return_data = outcome.output.clone();
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_address_known_vectors() {
        let sender = Address::from_hex("0x6ac7ea33f8831ea9dcc53393aaa88b25a785dbf0").unwrap();
        assert_eq!(
            create_address(&sender, 0).to_hex(),
            "0xcd234a471b72ba2f1ccf0a70fcaba648a5eecd8d"
        );
        assert_eq!(
            create_address(&sender, 1).to_hex(),
            "0x343c43a37d37dff08ae8c4a11544c718abb4fcf8"
        );
    }

    #[test]
    fn test_create2_address_known_vectors() {
        // EIP-1014 example 0
        let sender = Address::ZERO;
        assert_eq!(
            create2_address(&sender, &H256::ZERO, &[0x00]).to_hex(),
            "0x4d1a2e2bb4f88f0250f26ffff098b0b30b26bf38"
        );
        // EIP-1014 example 1
        let sender = Address::from_hex("0xdeadbeef00000000000000000000000000000000").unwrap();
        assert_eq!(
            create2_address(&sender, &H256::ZERO, &[0x00]).to_hex(),
            "0xb928f69bb1d91cd65274e3c79d8986362984fda3"
        );
    }

    #[test]
    fn test_outcome_success_flags() {
        assert!(CallOutcome::success(Bytes::new(), 5).is_success());
        assert!(!CallOutcome::failure(EvmError::OutOfGas, 0).is_success());
        assert!(!CreateOutcome::failure(EvmError::CreateCollision, 0).is_success());
    }
}
