//! Interpreter capability and the bundled bytecode interpreter.
//!
//! The dispatcher only needs something that can run a piece of code in a
//! [`CallFrame`] and report `(output, gas_left, error)`. [`Machine`] is the
//! reference implementation; it re-enters the dispatcher for every
//! call-family opcode.

use std::collections::HashSet;

use bach_crypto::keccak256;
use bach_primitives::{Address, H256, U256};
use bytes::Bytes;
use primitive_types::U512;

use crate::dispatch::CallScheme;
use crate::environment::{CallFrame, ExecutionEnvironment};
use crate::error::{EvmError, EvmResult};
use crate::gas::{self, cost};
use crate::memory::Memory;
use crate::opcode::{Fork, Opcode};
use crate::rules::GasTable;
use crate::stack::Stack;
use crate::state::{Log, StateDb};

/// What an interpreter reports back for one frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterpreterResult {
    /// RETURN data, or REVERT data
    pub output: Bytes,
    /// Unused gas
    pub gas_left: u64,
    /// Failure reason, `None` on success
    pub error: Option<EvmError>,
}

impl InterpreterResult {
    /// Successful run
    pub fn success(output: Bytes, gas_left: u64) -> Self {
        Self {
            output,
            gas_left,
            error: None,
        }
    }

    /// Failed run that consumed all its gas
    pub fn failure(error: EvmError) -> Self {
        Self {
            output: Bytes::new(),
            gas_left: 0,
            error: Some(error),
        }
    }
}

/// Runs bytecode for one frame against an execution environment.
pub trait Interpreter: Sized {
    /// Execute `code` in `frame` with `gas` available
    fn run<S: StateDb>(
        &self,
        env: &mut ExecutionEnvironment<'_, S, Self>,
        frame: &CallFrame,
        code: &Bytes,
        gas: u64,
    ) -> InterpreterResult;
}

/// Reference bytecode interpreter
#[derive(Debug, Clone, Copy, Default)]
pub struct Machine;

impl Interpreter for Machine {
    fn run<S: StateDb>(
        &self,
        env: &mut ExecutionEnvironment<'_, S, Self>,
        frame: &CallFrame,
        code: &Bytes,
        gas: u64,
    ) -> InterpreterResult {
        let mut vm = Vm::new(code, gas);
        match vm.execute(env, frame) {
            Ok(()) => InterpreterResult::success(vm.output, vm.gas),
            Err(EvmError::Reverted) => InterpreterResult {
                output: vm.output,
                gas_left: vm.gas,
                error: Some(EvmError::Reverted),
            },
            Err(error) => InterpreterResult::failure(error),
        }
    }
}

enum Control {
    Continue,
    Halt,
}

/// Per-frame machine state
struct Vm<'c> {
    code: &'c [u8],
    pc: usize,
    stack: Stack,
    memory: Memory,
    gas: u64,
    jump_dests: HashSet<usize>,
    output: Bytes,
}

impl<'c> Vm<'c> {
    fn new(code: &'c [u8], gas: u64) -> Self {
        Self {
            code,
            pc: 0,
            stack: Stack::new(),
            memory: Memory::new(),
            gas,
            jump_dests: analyze_jump_dests(code),
            output: Bytes::new(),
        }
    }

    fn use_gas(&mut self, amount: u64) -> EvmResult<()> {
        if self.gas < amount {
            return Err(EvmError::OutOfGas);
        }
        self.gas -= amount;
        Ok(())
    }

    fn push(&mut self, value: U256) -> EvmResult<Control> {
        self.stack.push(value)?;
        Ok(Control::Continue)
    }

    /// Charge for and perform memory expansion covering `[offset, offset + len)`
    fn memory_access(&mut self, offset: U256, len: U256) -> EvmResult<Option<(usize, usize)>> {
        let Some((offset, len)) = memory_region(offset, len)? else {
            return Ok(None);
        };
        self.expand_memory(offset + len)?;
        Ok(Some((offset, len)))
    }

    fn expand_memory(&mut self, end: usize) -> EvmResult<()> {
        self.use_gas(gas::memory_gas(self.memory.size(), end))?;
        self.memory.resize(end);
        Ok(())
    }

    fn read_memory(&self, region: Option<(usize, usize)>) -> Bytes {
        region.map_or_else(Bytes::new, |(offset, len)| {
            Bytes::copy_from_slice(self.memory.slice(offset, len))
        })
    }

    fn execute<S: StateDb>(
        &mut self,
        env: &mut ExecutionEnvironment<'_, S, Machine>,
        frame: &CallFrame,
    ) -> EvmResult<()> {
        while self.pc < self.code.len() {
            let byte = self.code[self.pc];
            let opcode = Opcode::from_byte(byte).ok_or(EvmError::InvalidOpcode(byte))?;
            if !is_active(opcode, env) {
                return Err(EvmError::InvalidOpcode(byte));
            }
            if frame.is_static && opcode.writes_state() {
                return Err(EvmError::StaticCallViolation);
            }
            self.use_gas(gas::constant_gas(opcode, env.gas_table()))?;
            self.pc += 1;

            // call-family opcodes re-enter the dispatcher; `step` must not be
            // on the native stack while they run
            let control = match opcode {
                Opcode::CREATE | Opcode::CREATE2 => self.create(opcode, env, frame)?,
                Opcode::CALL => self.call(CallScheme::Call, env, frame)?,
                Opcode::CALLCODE => self.call(CallScheme::CallCode, env, frame)?,
                Opcode::DELEGATECALL => self.call(CallScheme::DelegateCall, env, frame)?,
                Opcode::STATICCALL => self.call(CallScheme::StaticCall, env, frame)?,
                _ => self.step(opcode, env, frame)?,
            };
            if let Control::Halt = control {
                break;
            }
        }
        Ok(())
    }

    #[inline(never)]
    fn step<S: StateDb>(
        &mut self,
        opcode: Opcode,
        env: &mut ExecutionEnvironment<'_, S, Machine>,
        frame: &CallFrame,
    ) -> EvmResult<Control> {
        use Opcode::*;

        match opcode {
            STOP => Ok(Control::Halt),

            // ====== arithmetic ======
            ADD => {
                let [a, b] = self.stack.pop_n()?;
                self.push(a.overflowing_add(b).0)
            }
            MUL => {
                let [a, b] = self.stack.pop_n()?;
                self.push(a.overflowing_mul(b).0)
            }
            SUB => {
                let [a, b] = self.stack.pop_n()?;
                self.push(a.overflowing_sub(b).0)
            }
            DIV => {
                let [a, b] = self.stack.pop_n()?;
                self.push(if b.is_zero() { U256::zero() } else { a / b })
            }
            SDIV => {
                let [a, b] = self.stack.pop_n()?;
                self.push(signed_div(a, b))
            }
            MOD => {
                let [a, b] = self.stack.pop_n()?;
                self.push(if b.is_zero() { U256::zero() } else { a % b })
            }
            SMOD => {
                let [a, b] = self.stack.pop_n()?;
                self.push(signed_mod(a, b))
            }
            ADDMOD => {
                let [a, b, n] = self.stack.pop_n()?;
                let result = if n.is_zero() {
                    U256::zero()
                } else {
                    low_word((U512::from(a) + U512::from(b)) % U512::from(n))
                };
                self.push(result)
            }
            MULMOD => {
                let [a, b, n] = self.stack.pop_n()?;
                let result = if n.is_zero() {
                    U256::zero()
                } else {
                    low_word(a.full_mul(b) % U512::from(n))
                };
                self.push(result)
            }
            EXP => {
                let [base, exponent] = self.stack.pop_n()?;
                self.use_gas(gas::exp_byte_gas(exponent, env.gas_table()))?;
                self.push(base.overflowing_pow(exponent).0)
            }
            SIGNEXTEND => {
                let [b, x] = self.stack.pop_n()?;
                self.push(sign_extend(b, x))
            }

            // ====== comparison and bitwise ======
            LT => {
                let [a, b] = self.stack.pop_n()?;
                self.push(bool_word(a < b))
            }
            GT => {
                let [a, b] = self.stack.pop_n()?;
                self.push(bool_word(a > b))
            }
            SLT => {
                let [a, b] = self.stack.pop_n()?;
                self.push(bool_word(signed_lt(a, b)))
            }
            SGT => {
                let [a, b] = self.stack.pop_n()?;
                self.push(bool_word(signed_lt(b, a)))
            }
            EQ => {
                let [a, b] = self.stack.pop_n()?;
                self.push(bool_word(a == b))
            }
            ISZERO => {
                let a = self.stack.pop()?;
                self.push(bool_word(a.is_zero()))
            }
            AND => {
                let [a, b] = self.stack.pop_n()?;
                self.push(a & b)
            }
            OR => {
                let [a, b] = self.stack.pop_n()?;
                self.push(a | b)
            }
            XOR => {
                let [a, b] = self.stack.pop_n()?;
                self.push(a ^ b)
            }
            NOT => {
                let a = self.stack.pop()?;
                self.push(!a)
            }
            BYTE => {
                let [i, x] = self.stack.pop_n()?;
                let result = if i < U256::from(32u64) {
                    U256::from(x.byte(31 - i.as_usize()))
                } else {
                    U256::zero()
                };
                self.push(result)
            }
            SHL => {
                let [shift, value] = self.stack.pop_n()?;
                let result = if shift < U256::from(256u64) {
                    value << shift.as_usize()
                } else {
                    U256::zero()
                };
                self.push(result)
            }
            SHR => {
                let [shift, value] = self.stack.pop_n()?;
                let result = if shift < U256::from(256u64) {
                    value >> shift.as_usize()
                } else {
                    U256::zero()
                };
                self.push(result)
            }
            SAR => {
                let [shift, value] = self.stack.pop_n()?;
                self.push(arithmetic_shr(shift, value))
            }

            KECCAK256 => {
                let [offset, len] = self.stack.pop_n()?;
                let region = self.memory_access(offset, len)?;
                self.use_gas(gas::sha3_word_gas(region.map_or(0, |r| r.1)))?;
                let hash = keccak256(&self.read_memory(region));
                self.push(hash.to_word())
            }

            // ====== environment ======
            ADDRESS => self.push(frame.address.to_word()),
            BALANCE => {
                let address = Address::from_word(self.stack.pop()?);
                self.push(env.state().get_balance(&address))
            }
            ORIGIN => self.push(env.message().origin.to_word()),
            CALLER => self.push(frame.caller.to_word()),
            CALLVALUE => self.push(frame.value),
            CALLDATALOAD => {
                let offset = self.stack.pop()?;
                let mut word = [0u8; 32];
                if offset < U256::from(frame.input.len()) {
                    let start = offset.as_usize();
                    let available = &frame.input[start..];
                    let len = available.len().min(32);
                    word[..len].copy_from_slice(&available[..len]);
                }
                self.push(U256::from_big_endian(&word))
            }
            CALLDATASIZE => self.push(U256::from(frame.input.len())),
            CALLDATACOPY => {
                let [mem_offset, data_offset, len] = self.stack.pop_n()?;
                self.copy_to_memory(mem_offset, len, &frame.input, data_offset)?;
                Ok(Control::Continue)
            }
            CODESIZE => self.push(U256::from(self.code.len())),
            CODECOPY => {
                let [mem_offset, code_offset, len] = self.stack.pop_n()?;
                let code = self.code;
                self.copy_to_memory(mem_offset, len, code, code_offset)?;
                Ok(Control::Continue)
            }
            GASPRICE => self.push(env.message().gas_price),
            EXTCODESIZE => {
                let address = Address::from_word(self.stack.pop()?);
                self.push(U256::from(env.state().get_code(&address).len()))
            }
            EXTCODECOPY => {
                let address = Address::from_word(self.stack.pop()?);
                let [mem_offset, code_offset, len] = self.stack.pop_n()?;
                let code = env.state().get_code(&address);
                self.copy_to_memory(mem_offset, len, &code, code_offset)?;
                Ok(Control::Continue)
            }
            RETURNDATASIZE => self.push(U256::from(env.return_data().len())),
            RETURNDATACOPY => {
                let [mem_offset, data_offset, len] = self.stack.pop_n()?;
                let data = env.return_data().clone();
                let (end, overflow) = data_offset.overflowing_add(len);
                if overflow || end > U256::from(data.len()) {
                    return Err(EvmError::ReturnDataOutOfBounds);
                }
                self.copy_to_memory(mem_offset, len, &data, data_offset)?;
                Ok(Control::Continue)
            }
            EXTCODEHASH => {
                let address = Address::from_word(self.stack.pop()?);
                let hash = if env.state().is_empty(&address) {
                    H256::ZERO
                } else {
                    env.state().get_code_hash(&address)
                };
                self.push(hash.to_word())
            }

            // ====== block ======
            BLOCKHASH => {
                let number = self.stack.pop()?;
                let current = env.block().number;
                let lowest = current.saturating_sub(256);
                let hash = if number.bits() <= 64
                    && number.low_u64() >= lowest
                    && number.low_u64() < current
                {
                    env.resolve_block_hash(number.low_u64())
                } else {
                    H256::ZERO
                };
                self.push(hash.to_word())
            }
            COINBASE => self.push(env.block().coinbase.to_word()),
            TIMESTAMP => self.push(U256::from(env.block().timestamp)),
            NUMBER => self.push(U256::from(env.block().number)),
            DIFFICULTY => self.push(env.block().difficulty),
            GASLIMIT => self.push(U256::from(env.block().gas_limit)),

            // ====== stack, memory, storage, flow ======
            POP => {
                self.stack.pop()?;
                Ok(Control::Continue)
            }
            MLOAD => {
                let offset = self.stack.pop()?;
                let (offset, _) = self
                    .memory_access(offset, U256::from(32u64))?
                    .ok_or(EvmError::OutOfGas)?;
                self.push(self.memory.load_word(offset))
            }
            MSTORE => {
                let [offset, value] = self.stack.pop_n()?;
                if let Some((offset, _)) = self.memory_access(offset, U256::from(32u64))? {
                    self.memory.store_word(offset, value);
                }
                Ok(Control::Continue)
            }
            MSTORE8 => {
                let [offset, value] = self.stack.pop_n()?;
                if let Some((offset, _)) = self.memory_access(offset, U256::one())? {
                    self.memory.store_byte(offset, value.byte(0));
                }
                Ok(Control::Continue)
            }
            SLOAD => {
                let key = H256::from_word(self.stack.pop()?);
                let value = env.state().get_storage(&frame.address, &key);
                self.push(value.to_word())
            }
            SSTORE => {
                let [key, value] = self.stack.pop_n()?;
                let key = H256::from_word(key);
                let current = env.state().get_storage(&frame.address, &key).to_word();
                self.use_gas(gas::sstore_gas(current, value))?;
                env.state_mut()
                    .set_storage(frame.address, key, H256::from_word(value));
                Ok(Control::Continue)
            }
            JUMP => {
                let dest = self.stack.pop()?;
                self.jump(dest)?;
                Ok(Control::Continue)
            }
            JUMPI => {
                let [dest, condition] = self.stack.pop_n()?;
                if !condition.is_zero() {
                    self.jump(dest)?;
                }
                Ok(Control::Continue)
            }
            PC => self.push(U256::from(self.pc - 1)),
            MSIZE => self.push(U256::from(self.memory.size())),
            GAS => self.push(U256::from(self.gas)),
            JUMPDEST => Ok(Control::Continue),

            // ====== logging ======
            LOG0 | LOG1 | LOG2 | LOG3 | LOG4 => {
                let [offset, len] = self.stack.pop_n()?;
                let mut topics = Vec::with_capacity(opcode.log_topics());
                for _ in 0..opcode.log_topics() {
                    topics.push(H256::from_word(self.stack.pop()?));
                }
                let region = self.memory_access(offset, len)?;
                self.use_gas(gas::log_data_gas(region.map_or(0, |r| r.1)))?;
                env.add_log(Log {
                    address: frame.address,
                    topics,
                    data: self.read_memory(region),
                });
                Ok(Control::Continue)
            }

            // ====== system ======
            CREATE | CREATE2 | CALL | CALLCODE | DELEGATECALL | STATICCALL => {
                unreachable!("call-family opcodes are dispatched before step")
            }
            RETURN | REVERT => {
                let [offset, len] = self.stack.pop_n()?;
                let region = self.memory_access(offset, len)?;
                self.output = self.read_memory(region);
                if opcode == REVERT {
                    return Err(EvmError::Reverted);
                }
                Ok(Control::Halt)
            }
            INVALID | SELFDESTRUCT => Err(EvmError::InvalidOpcode(opcode as u8)),

            _ => {
                let push = opcode.push_size();
                if push > 0 {
                    let mut word = [0u8; 32];
                    let end = (self.pc + push).min(self.code.len());
                    let bytes = &self.code[self.pc..end];
                    word[32 - push..32 - push + bytes.len()].copy_from_slice(bytes);
                    self.pc += push;
                    return self.push(U256::from_big_endian(&word));
                }
                if opcode.dup_depth() > 0 {
                    self.stack.dup(opcode.dup_depth())?;
                } else {
                    self.stack.swap(opcode.swap_depth())?;
                }
                Ok(Control::Continue)
            }
        }
    }

    fn jump(&mut self, dest: U256) -> EvmResult<()> {
        let target = if dest.bits() > 63 {
            usize::MAX
        } else {
            dest.low_u64() as usize
        };
        if !self.jump_dests.contains(&target) {
            return Err(EvmError::InvalidJump(target));
        }
        self.pc = target;
        Ok(())
    }

    fn copy_to_memory(
        &mut self,
        mem_offset: U256,
        len: U256,
        source: &[u8],
        source_offset: U256,
    ) -> EvmResult<()> {
        let Some((offset, len)) = self.memory_access(mem_offset, len)? else {
            return Ok(());
        };
        self.use_gas(gas::copy_gas(len))?;
        self.memory.set_padded(offset, len, source, source_offset);
        Ok(())
    }

    fn forwarded_gas(&self, requested: U256, table: &GasTable) -> EvmResult<u64> {
        if table.caps_call_gas() {
            let cap = gas::all_but_one_64th(self.gas);
            if requested > U256::from(cap) {
                return Ok(cap);
            }
            return Ok(requested.low_u64());
        }
        if requested.bits() > 64 {
            return Err(EvmError::OutOfGas);
        }
        Ok(requested.low_u64())
    }

    fn call<S: StateDb>(
        &mut self,
        scheme: CallScheme,
        env: &mut ExecutionEnvironment<'_, S, Machine>,
        frame: &CallFrame,
    ) -> EvmResult<Control> {
        let requested = self.stack.pop()?;
        let to = Address::from_word(self.stack.pop()?);
        let value = match scheme {
            CallScheme::Call | CallScheme::CallCode => self.stack.pop()?,
            CallScheme::DelegateCall | CallScheme::StaticCall => U256::zero(),
        };
        let [in_offset, in_len, out_offset, out_len] = self.stack.pop_n()?;

        if scheme == CallScheme::Call && frame.is_static && !value.is_zero() {
            return Err(EvmError::StaticCallViolation);
        }

        let input_region = memory_region(in_offset, in_len)?;
        let output_region = memory_region(out_offset, out_len)?;
        let end = [input_region, output_region]
            .iter()
            .flatten()
            .map(|(offset, len)| offset + len)
            .max()
            .unwrap_or(0);
        self.expand_memory(end)?;

        let mut extra = 0;
        if !value.is_zero() {
            extra += cost::CALL_VALUE;
        }
        if scheme == CallScheme::Call {
            let new_account = if env.is_atlantis() {
                !value.is_zero() && env.state().is_empty(&to)
            } else {
                !env.state().exists(&to)
            };
            if new_account {
                extra += cost::CALL_NEW_ACCOUNT;
            }
        }
        self.use_gas(extra)?;

        let mut call_gas = self.forwarded_gas(requested, env.gas_table())?;
        self.use_gas(call_gas)?;
        if !value.is_zero() {
            call_gas += cost::CALL_STIPEND;
        }

        let input = self.read_memory(input_region);
        let outcome = match scheme {
            CallScheme::Call => env.call(frame, to, input, call_gas, value),
            CallScheme::CallCode => env.call_code(frame, to, input, call_gas, value),
            CallScheme::DelegateCall => env.delegate_call(frame, to, input, call_gas),
            CallScheme::StaticCall => env.static_call(frame, to, input, call_gas),
        };
        self.gas = self.gas.saturating_add(outcome.gas_left);

        if let Some((offset, len)) = output_region {
            let copied = outcome.output.len().min(len);
            self.memory.set(offset, &outcome.output[..copied]);
        }
        self.push(bool_word(outcome.is_success()))
    }

    fn create<S: StateDb>(
        &mut self,
        opcode: Opcode,
        env: &mut ExecutionEnvironment<'_, S, Machine>,
        frame: &CallFrame,
    ) -> EvmResult<Control> {
        let [value, offset, len] = self.stack.pop_n()?;
        let salt = if opcode == Opcode::CREATE2 {
            Some(H256::from_word(self.stack.pop()?))
        } else {
            None
        };

        let region = self.memory_access(offset, len)?;
        if salt.is_some() {
            self.use_gas(gas::sha3_word_gas(region.map_or(0, |r| r.1)))?;
        }
        let init_code = self.read_memory(region);

        let gas = if env.gas_table().caps_call_gas() {
            gas::all_but_one_64th(self.gas)
        } else {
            self.gas
        };
        self.use_gas(gas)?;

        let outcome = match salt {
            Some(salt) => env.create2(frame, init_code, gas, value, salt),
            None => env.create(frame, init_code, gas, value),
        };
        self.gas = self.gas.saturating_add(outcome.gas_left);
        self.push(outcome.address.map_or_else(U256::zero, |a| a.to_word()))
    }
}

fn is_active<S: StateDb>(opcode: Opcode, env: &ExecutionEnvironment<'_, S, Machine>) -> bool {
    match opcode.introduced_in() {
        Fork::Frontier => true,
        Fork::Homestead => env.is_homestead(),
        Fork::Atlantis => env.is_atlantis(),
        Fork::Agharta => env.is_agharta(),
    }
}

/// Positions of JUMPDEST bytes that are not PUSH operands
fn analyze_jump_dests(code: &[u8]) -> HashSet<usize> {
    let mut dests = HashSet::new();
    let mut i = 0;
    while i < code.len() {
        let byte = code[i];
        if byte == Opcode::JUMPDEST as u8 {
            dests.insert(i);
        }
        if (0x60..=0x7F).contains(&byte) {
            i += (byte - 0x5F) as usize;
        }
        i += 1;
    }
    dests
}

/// Bounds of a memory operand; `None` when `len` is zero
fn memory_region(offset: U256, len: U256) -> EvmResult<Option<(usize, usize)>> {
    if len.is_zero() {
        return Ok(None);
    }
    if offset.bits() > 32 || len.bits() > 32 {
        return Err(EvmError::OutOfGas);
    }
    Ok(Some((offset.as_usize(), len.as_usize())))
}

fn bool_word(value: bool) -> U256 {
    if value {
        U256::one()
    } else {
        U256::zero()
    }
}

fn low_word(value: U512) -> U256 {
    let mut bytes = [0u8; 64];
    value.to_big_endian(&mut bytes);
    U256::from_big_endian(&bytes[32..])
}

fn is_negative(value: U256) -> bool {
    value.bit(255)
}

fn negate(value: U256) -> U256 {
    (!value).overflowing_add(U256::one()).0
}

fn abs(value: U256) -> U256 {
    if is_negative(value) {
        negate(value)
    } else {
        value
    }
}

fn signed_div(a: U256, b: U256) -> U256 {
    if b.is_zero() {
        return U256::zero();
    }
    let quotient = abs(a) / abs(b);
    if is_negative(a) != is_negative(b) {
        negate(quotient)
    } else {
        quotient
    }
}

fn signed_mod(a: U256, b: U256) -> U256 {
    if b.is_zero() {
        return U256::zero();
    }
    let remainder = abs(a) % abs(b);
    if is_negative(a) {
        negate(remainder)
    } else {
        remainder
    }
}

fn signed_lt(a: U256, b: U256) -> bool {
    match (is_negative(a), is_negative(b)) {
        (true, false) => true,
        (false, true) => false,
        _ => a < b,
    }
}

fn sign_extend(byte_index: U256, value: U256) -> U256 {
    if byte_index >= U256::from(31u64) {
        return value;
    }
    let bit = byte_index.as_usize() * 8 + 7;
    let mask = (U256::one() << (bit + 1)) - U256::one();
    if value.bit(bit) {
        value | !mask
    } else {
        value & mask
    }
}

fn arithmetic_shr(shift: U256, value: U256) -> U256 {
    let negative = is_negative(value);
    if shift >= U256::from(256u64) {
        return if negative { U256::MAX } else { U256::zero() };
    }
    let shift = shift.as_usize();
    if negative {
        !((!value) >> shift)
    } else {
        value >> shift
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{BlockContext, Message};
    use crate::rules::{ChainConfig, FrozenRules, RuleSet};
    use crate::state::MemoryStateDb;

    fn minus(n: u64) -> U256 {
        negate(U256::from(n))
    }

    fn contract() -> Address {
        Address::from_bytes([0xc0; 20])
    }

    fn caller() -> Address {
        Address::from_bytes([0xca; 20])
    }

    /// Run `code` as the top-level call and return the outcome and store
    fn run_with(
        rules: &dyn RuleSet,
        block: BlockContext,
        code: &[u8],
        gas: u64,
    ) -> (crate::dispatch::CallOutcome, MemoryStateDb) {
        let mut state = MemoryStateDb::new();
        state.set_code(contract(), Bytes::copy_from_slice(code));
        state.get_or_create_account(caller());
        let message = Message {
            origin: caller(),
            gas,
            ..Message::default()
        };
        let hashes = |n: u64| H256::from_word(U256::from(n + 0x100));
        let outcome = {
            let mut env = ExecutionEnvironment::new(rules, &mut state, &block, &message, &hashes, &Machine);
            env.transact(contract())
        };
        (outcome, state)
    }

    fn run(code: &[u8]) -> crate::dispatch::CallOutcome {
        run_with(&FrozenRules, BlockContext::default(), code, 1_000_000).0
    }

    /// Code that evaluates the word left on the stack and returns it
    fn returning_top(prefix: &[u8]) -> Vec<u8> {
        let mut code = prefix.to_vec();
        // PUSH1 0 MSTORE PUSH1 32 PUSH1 0 RETURN
        code.extend_from_slice(&[0x60, 0x00, 0x52, 0x60, 0x20, 0x60, 0x00, 0xf3]);
        code
    }

    fn run_word(prefix: &[u8]) -> U256 {
        let outcome = run(&returning_top(prefix));
        assert!(outcome.is_success(), "{:?}", outcome.error);
        U256::from_big_endian(&outcome.output)
    }

    // ====== signed arithmetic helpers ======

    #[test]
    fn test_signed_div_mod() {
        assert_eq!(signed_div(minus(7), U256::from(2u64)), minus(3));
        assert_eq!(signed_div(U256::from(7u64), minus(2)), minus(3));
        assert_eq!(signed_div(minus(7), minus(2)), U256::from(3u64));
        assert_eq!(signed_div(U256::one() << 255, minus(1)), U256::one() << 255);
        assert_eq!(signed_mod(minus(7), U256::from(2u64)), minus(1));
        assert_eq!(signed_mod(U256::from(7u64), minus(2)), U256::one());
        assert_eq!(signed_div(U256::one(), U256::zero()), U256::zero());
    }

    #[test]
    fn test_signed_compare_and_shift() {
        assert!(signed_lt(minus(1), U256::zero()));
        assert!(!signed_lt(U256::one(), minus(5)));
        assert!(signed_lt(minus(5), minus(1)));
        assert_eq!(arithmetic_shr(U256::from(4u64), minus(16)), minus(1));
        assert_eq!(arithmetic_shr(U256::from(300u64), minus(16)), U256::MAX);
        assert_eq!(arithmetic_shr(U256::one(), U256::from(16u64)), U256::from(8u64));
    }

    #[test]
    fn test_sign_extend() {
        assert_eq!(sign_extend(U256::zero(), U256::from(0xffu64)), U256::MAX);
        assert_eq!(sign_extend(U256::zero(), U256::from(0x7fu64)), U256::from(0x7fu64));
        assert_eq!(sign_extend(U256::one(), U256::from(0x12_80ffu64)), U256::from(0x80ffu64) | (U256::MAX << 16));
        assert_eq!(sign_extend(U256::from(31u64), U256::from(5u64)), U256::from(5u64));
    }

    #[test]
    fn test_jump_dest_analysis_skips_push_data() {
        // PUSH1 0x5b JUMPDEST
        let dests = analyze_jump_dests(&[0x60, 0x5b, 0x5b]);
        assert!(!dests.contains(&1));
        assert!(dests.contains(&2));
    }

    // ====== opcode semantics ======

    #[test]
    fn test_arithmetic() {
        // PUSH1 3 PUSH1 4 ADD
        assert_eq!(run_word(&[0x60, 0x03, 0x60, 0x04, 0x01]), U256::from(7u64));
        // PUSH1 4 PUSH1 3 SUB -> 3 - 4 wraps
        assert_eq!(run_word(&[0x60, 0x04, 0x60, 0x03, 0x03]), U256::MAX);
        // PUSH1 5 PUSH1 4 PUSH1 3 ADDMOD -> (3 + 4) % 5
        assert_eq!(run_word(&[0x60, 0x05, 0x60, 0x04, 0x60, 0x03, 0x08]), U256::from(2u64));
        // PUSH1 3 PUSH1 2 EXP -> 2 ** 3
        assert_eq!(run_word(&[0x60, 0x03, 0x60, 0x02, 0x0a]), U256::from(8u64));
        // PUSH1 0 PUSH1 9 DIV -> division by zero is zero
        assert_eq!(run_word(&[0x60, 0x00, 0x60, 0x09, 0x04]), U256::zero());
    }

    #[test]
    fn test_mulmod_uses_wide_product() {
        // PUSH1 7 PUSH32 MAX PUSH32 MAX MULMOD
        let mut code = vec![0x60, 0x07, 0x7f];
        code.extend_from_slice(&[0xff; 32]);
        code.push(0x7f);
        code.extend_from_slice(&[0xff; 32]);
        code.push(0x09);
        let expected = low_word(U256::MAX.full_mul(U256::MAX) % U512::from(7u64));
        assert_eq!(run_word(&code), expected);
    }

    #[test]
    fn test_environment_opcodes() {
        // CALLER
        assert_eq!(run_word(&[0x33]), caller().to_word());
        // ADDRESS
        assert_eq!(run_word(&[0x30]), contract().to_word());
        // PUSH1 1 BLOCKHASH: block 0 has no ancestors
        assert_eq!(run_word(&[0x60, 0x01, 0x40]), U256::zero());
    }

    #[test]
    fn test_blockhash_window() {
        let block = BlockContext {
            number: 300,
            ..BlockContext::default()
        };
        let word = |n: u8| {
            let code = returning_top(&[0x61, 0x00, n, 0x40]);
            let (outcome, _) = run_with(&FrozenRules, block.clone(), &code, 100_000);
            U256::from_big_endian(&outcome.output)
        };
        // 299 is the parent, 44 is the oldest in range, 43 is too old
        assert_eq!(word(44), U256::from(44u64 + 0x100));
        assert_eq!(word(43), U256::zero());
        // PUSH2 0x012b (299)
        let code = returning_top(&[0x61, 0x01, 0x2b, 0x40]);
        let (outcome, _) = run_with(&FrozenRules, block.clone(), &code, 100_000);
        assert_eq!(U256::from_big_endian(&outcome.output), U256::from(299u64 + 0x100));
        // PUSH2 0x012c (300) is the current block
        let code = returning_top(&[0x61, 0x01, 0x2c, 0x40]);
        let (outcome, _) = run_with(&FrozenRules, block, &code, 100_000);
        assert_eq!(U256::from_big_endian(&outcome.output), U256::zero());
    }

    #[test]
    fn test_push_truncated_at_code_end() {
        // PUSH2 0x01 with the second byte missing reads as 0x0100
        let outcome = run(&[0x61, 0x01]);
        assert!(outcome.is_success());
    }

    #[test]
    fn test_jumps() {
        // PUSH1 4 JUMP INVALID JUMPDEST PUSH1 1
        assert_eq!(run_word(&[0x60, 0x04, 0x56, 0xfe, 0x5b, 0x60, 0x01]), U256::one());
        // PUSH1 3 JUMP (not a JUMPDEST)
        let outcome = run(&[0x60, 0x03, 0x56, 0x00]);
        assert_eq!(outcome.error, Some(EvmError::InvalidJump(3)));
        assert_eq!(outcome.gas_left, 0);
    }

    #[test]
    fn test_storage_roundtrip() {
        // PUSH1 42 PUSH1 0 SSTORE PUSH1 0 SLOAD
        let code = returning_top(&[0x60, 0x2a, 0x60, 0x00, 0x55, 0x60, 0x00, 0x54]);
        let (outcome, state) = run_with(&FrozenRules, BlockContext::default(), &code, 100_000);
        assert!(outcome.is_success());
        assert_eq!(U256::from_big_endian(&outcome.output), U256::from(42u64));
        assert_eq!(
            state.get_storage(&contract(), &H256::ZERO),
            H256::from_word(U256::from(42u64))
        );
    }

    #[test]
    fn test_revert_keeps_gas_and_data() {
        // PUSH1 0xaa PUSH1 0 MSTORE8 PUSH1 1 PUSH1 0 REVERT
        let outcome = run(&[0x60, 0xaa, 0x60, 0x00, 0x53, 0x60, 0x01, 0x60, 0x00, 0xfd]);
        assert_eq!(outcome.error, Some(EvmError::Reverted));
        assert_eq!(outcome.output.as_ref(), &[0xaa]);
        assert!(outcome.gas_left > 0);
    }

    #[test]
    fn test_stack_underflow_consumes_gas() {
        let outcome = run(&[0x01]);
        assert_eq!(outcome.error, Some(EvmError::StackUnderflow));
        assert_eq!(outcome.gas_left, 0);
    }

    #[test]
    fn test_out_of_gas() {
        // PUSH1 1 PUSH1 0 SSTORE with far too little gas
        let (outcome, state) = run_with(
            &FrozenRules,
            BlockContext::default(),
            &[0x60, 0x01, 0x60, 0x00, 0x55],
            1_000,
        );
        assert_eq!(outcome.error, Some(EvmError::OutOfGas));
        assert_eq!(state.get_storage(&contract(), &H256::ZERO), H256::ZERO);
    }

    #[test]
    fn test_fork_gated_opcodes() {
        let rules = ChainConfig::mainnet();
        let before = BlockContext {
            number: 8_771_999,
            ..BlockContext::default()
        };
        // RETURNDATASIZE before Atlantis
        let (outcome, _) = run_with(&rules, before, &[0x3d], 100_000);
        assert_eq!(outcome.error, Some(EvmError::InvalidOpcode(0x3d)));

        let after = BlockContext {
            number: 8_772_000,
            ..BlockContext::default()
        };
        let (outcome, _) = run_with(&rules, after.clone(), &[0x3d], 100_000);
        assert!(outcome.is_success());

        // SHL needs Agharta
        let (outcome, _) = run_with(&rules, after, &[0x60, 0x01, 0x60, 0x01, 0x1b], 100_000);
        assert_eq!(outcome.error, Some(EvmError::InvalidOpcode(0x1b)));
    }

    #[test]
    fn test_selfdestruct_unsupported() {
        let outcome = run(&[0x60, 0x00, 0xff]);
        assert_eq!(outcome.error, Some(EvmError::InvalidOpcode(0xff)));
    }
}
