//! Execution environment: binds one state store, one rule version, one
//! block and one originating message for the length of an execution.
//!
//! Nested calls do not get a new environment. Each gets a [`CallFrame`]
//! whose depth is one more than its parent's, and the environment keeps the
//! matching stack of snapshot ids so the LIFO discipline can be checked.
//! Top-level code runs at depth 0 with one snapshot active.

use bach_primitives::{Address, BlockNumber, H256, U256};
use bytes::Bytes;
use tracing::trace;

use crate::block::{BlockContext, BlockHashResolver, Message};
use crate::interpreter::Interpreter;
use crate::rules::{GasTable, RuleSet};
use crate::state::{Log, SnapshotId, StateDb};

/// Addressing and permissions of one executing frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallFrame {
    /// Account whose storage and balance the code acts on
    pub address: Address,
    /// Account the executing code was loaded from
    pub code_address: Address,
    /// Immediate caller
    pub caller: Address,
    /// Value visible through CALLVALUE
    pub value: U256,
    /// Call data
    pub input: Bytes,
    /// Nesting level; top-level code and the external frame are both 0
    pub depth: usize,
    /// Whether state mutation is forbidden
    pub is_static: bool,
}

impl CallFrame {
    /// The frame a top-level invocation is issued from: the transaction sender itself
    pub fn external(origin: Address) -> Self {
        Self {
            address: origin,
            code_address: origin,
            caller: origin,
            value: U256::zero(),
            input: Bytes::new(),
            depth: 0,
            is_static: false,
        }
    }
}

/// Everything one execution needs, borrowed for its duration.
pub struct ExecutionEnvironment<'a, S: StateDb, I: Interpreter> {
    rules: &'a dyn RuleSet,
    gas_table: GasTable,
    pub(crate) state: &'a mut S,
    block: &'a BlockContext,
    message: &'a Message,
    block_hashes: &'a dyn BlockHashResolver,
    pub(crate) interpreter: &'a I,
    pub(crate) return_data: Bytes,
    snapshots: Vec<SnapshotId>,
}

impl<'a, S: StateDb, I: Interpreter> ExecutionEnvironment<'a, S, I> {
    /// Bind an execution to its rules, state, block, message and hash source
    pub fn new(
        rules: &'a dyn RuleSet,
        state: &'a mut S,
        block: &'a BlockContext,
        message: &'a Message,
        block_hashes: &'a dyn BlockHashResolver,
        interpreter: &'a I,
    ) -> Self {
        Self {
            gas_table: rules.gas_table(block.number),
            rules,
            state,
            block,
            message,
            block_hashes,
            interpreter,
            return_data: Bytes::new(),
            snapshots: Vec::new(),
        }
    }

    /// Rule version in force
    pub fn rules(&self) -> &dyn RuleSet {
        self.rules
    }

    /// Gas prices for the current block
    pub fn gas_table(&self) -> &GasTable {
        &self.gas_table
    }

    /// Whether Homestead rules apply to the current block
    pub fn is_homestead(&self) -> bool {
        self.rules.is_homestead(self.block.number)
    }

    /// Whether Atlantis rules apply to the current block
    pub fn is_atlantis(&self) -> bool {
        self.rules.is_atlantis(self.block.number)
    }

    /// Whether Agharta rules apply to the current block
    pub fn is_agharta(&self) -> bool {
        self.rules.is_agharta(self.block.number)
    }

    /// Current block
    pub fn block(&self) -> &BlockContext {
        self.block
    }

    /// Originating message
    pub fn message(&self) -> &Message {
        self.message
    }

    /// Read access to the state store
    pub fn state(&self) -> &S {
        &*self.state
    }

    /// Write access to the state store
    pub fn state_mut(&mut self) -> &mut S {
        &mut *self.state
    }

    /// Output of the most recent nested call made by the running frame
    pub fn return_data(&self) -> &Bytes {
        &self.return_data
    }

    /// Number of calls currently active; a frame at depth `d` runs with `d + 1`
    pub fn depth(&self) -> usize {
        self.snapshots.len()
    }

    /// Hash of an ancestor block, zero when it cannot be resolved
    pub fn resolve_block_hash(&self, number: BlockNumber) -> H256 {
        self.block_hashes.block_hash(number)
    }

    /// Whether `address` holds at least `amount`
    pub fn can_transfer(&self, address: &Address, amount: U256) -> bool {
        self.state.get_balance(address) >= amount
    }

    /// Move `amount` from `from` to `to`.
    ///
    /// The caller must have checked [`Self::can_transfer`].
    pub fn transfer(&mut self, from: Address, to: Address, amount: U256) {
        debug_assert!(
            self.can_transfer(&from, amount),
            "transfer from {} without sufficient balance",
            from
        );
        self.state.sub_balance(from, amount);
        self.state.add_balance(to, amount);
    }

    /// Append a log entry; undone if the emitting call fails
    pub fn add_log(&mut self, log: Log) {
        self.state.add_log(log);
    }

    /// Take a snapshot and push it on the call stack
    pub fn snapshot(&mut self) -> SnapshotId {
        let id = self.state.snapshot();
        self.snapshots.push(id);
        trace!("snapshot {:?} at depth {}", id, self.snapshots.len());
        id
    }

    /// Undo everything since `id`, which must be the innermost active snapshot
    pub fn revert(&mut self, id: SnapshotId) {
        debug_assert_eq!(self.snapshots.last(), Some(&id), "revert out of call order");
        self.state.revert_to_snapshot(id);
    }

    /// Pop `id` off the call stack once its call has returned
    pub fn pop_snapshot(&mut self, id: SnapshotId) {
        let top = self.snapshots.pop();
        debug_assert_eq!(top, Some(id), "snapshot popped out of call order");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpreter::Machine;
    use crate::rules::{ChainConfig, FrozenRules};
    use crate::state::MemoryStateDb;

    fn addr(n: u8) -> Address {
        Address::from_bytes([n; 20])
    }

    fn no_hashes(_: u64) -> H256 {
        H256::ZERO
    }

    #[test]
    fn test_transfer_moves_balance() {
        let mut state = MemoryStateDb::new();
        state.add_balance(addr(1), U256::from(100u64));
        let (block, message) = (BlockContext::default(), Message::default());
        let mut env =
            ExecutionEnvironment::new(&FrozenRules, &mut state, &block, &message, &no_hashes, &Machine);

        assert!(env.can_transfer(&addr(1), U256::from(100u64)));
        assert!(!env.can_transfer(&addr(1), U256::from(101u64)));
        assert!(env.can_transfer(&addr(9), U256::zero()));

        env.transfer(addr(1), addr(2), U256::from(30u64));
        assert_eq!(env.state().get_balance(&addr(1)), U256::from(70u64));
        assert_eq!(env.state().get_balance(&addr(2)), U256::from(30u64));
    }

    #[test]
    fn test_snapshot_stack_tracks_depth() {
        let mut state = MemoryStateDb::new();
        let (block, message) = (BlockContext::default(), Message::default());
        let mut env =
            ExecutionEnvironment::new(&FrozenRules, &mut state, &block, &message, &no_hashes, &Machine);

        let outer = env.snapshot();
        env.add_log(Log {
            address: addr(1),
            topics: vec![],
            data: Bytes::new(),
        });
        let inner = env.snapshot();
        assert_eq!(env.depth(), 2);
        env.state_mut().add_balance(addr(1), U256::one());

        env.revert(inner);
        env.pop_snapshot(inner);
        assert_eq!(env.state().get_balance(&addr(1)), U256::zero());
        assert_eq!(env.state().logs().len(), 1);

        env.revert(outer);
        env.pop_snapshot(outer);
        assert_eq!(env.depth(), 0);
        assert!(env.state().logs().is_empty());
    }

    #[test]
    fn test_rules_follow_block_number() {
        let mut state = MemoryStateDb::new();
        let rules = ChainConfig::mainnet();
        let block = BlockContext {
            number: 2_500_000,
            ..BlockContext::default()
        };
        let message = Message::default();
        let env = ExecutionEnvironment::new(&rules, &mut state, &block, &message, &no_hashes, &Machine);

        assert!(env.is_homestead());
        assert!(!env.is_atlantis());
        assert_eq!(env.gas_table(), &GasTable::GAS_REPRICE);
    }

    #[test]
    fn test_resolve_block_hash_delegates() {
        let mut state = MemoryStateDb::new();
        let (block, message) = (BlockContext::default(), Message::default());
        let hashes = |n: u64| H256::from_word(U256::from(n + 1));
        let env = ExecutionEnvironment::new(&FrozenRules, &mut state, &block, &message, &hashes, &Machine);
        assert_eq!(env.resolve_block_hash(6), H256::from_word(U256::from(7u64)));
    }
}
