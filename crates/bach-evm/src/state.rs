//! State store capability and an in-memory journaled implementation.
//!
//! The core never persists anything itself; every mutation goes through
//! [`StateDb`]. [`MemoryStateDb`] records each mutation in a journal so that
//! [`StateDb::revert_to_snapshot`] can undo it, logs included.

use std::collections::HashMap;

use bach_crypto::{keccak256, EMPTY_CODE_HASH};
use bach_primitives::{Address, H256, U256};
use bytes::Bytes;

/// Handle for a point in the store's mutation history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SnapshotId(usize);

/// Log entry emitted by LOG0..LOG4
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Log {
    /// Emitting contract
    pub address: Address,
    /// Indexed topics
    pub topics: Vec<H256>,
    /// Unindexed payload
    pub data: Bytes,
}

/// Account state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    /// Account nonce
    pub nonce: u64,
    /// Balance
    pub balance: U256,
    /// Contract code
    pub code: Bytes,
    /// Keccak-256 of `code`
    pub code_hash: H256,
    /// Storage slots; absent slots read as zero
    pub storage: HashMap<H256, H256>,
}

impl Default for Account {
    fn default() -> Self {
        Self {
            nonce: 0,
            balance: U256::zero(),
            code: Bytes::new(),
            code_hash: EMPTY_CODE_HASH,
            storage: HashMap::new(),
        }
    }
}

impl Account {
    /// Account holding only a balance
    pub fn with_balance(balance: U256) -> Self {
        Self {
            balance,
            ..Self::default()
        }
    }

    /// Zero nonce, zero balance, no code (EIP-161)
    pub fn is_empty(&self) -> bool {
        self.nonce == 0 && self.balance.is_zero() && self.code_hash == EMPTY_CODE_HASH
    }
}

/// Account, code, storage and log access with snapshot/revert.
///
/// Exactly one execution holds a store at a time. Snapshots nest: reverting
/// to an id undoes everything after it and invalidates every later id.
pub trait StateDb {
    /// Whether an account exists at `address`
    fn exists(&self, address: &Address) -> bool;

    /// Whether the account is missing or empty
    fn is_empty(&self, address: &Address) -> bool;

    /// Create a fresh account, replacing any existing one but keeping its balance
    fn create_account(&mut self, address: Address);

    /// Create the account if it does not exist
    fn get_or_create_account(&mut self, address: Address);

    /// Balance, zero for missing accounts
    fn get_balance(&self, address: &Address) -> U256;

    /// Credit `amount`, creating the account if needed
    fn add_balance(&mut self, address: Address, amount: U256);

    /// Debit `amount`; callers check the balance first
    fn sub_balance(&mut self, address: Address, amount: U256);

    /// Nonce, zero for missing accounts
    fn get_nonce(&self, address: &Address) -> u64;

    /// Set nonce, creating the account if needed
    fn set_nonce(&mut self, address: Address, nonce: u64);

    /// Code, empty for missing accounts
    fn get_code(&self, address: &Address) -> Bytes;

    /// Code hash, [`EMPTY_CODE_HASH`] for missing or code-less accounts
    fn get_code_hash(&self, address: &Address) -> H256;

    /// Install code, creating the account if needed
    fn set_code(&mut self, address: Address, code: Bytes);

    /// Storage slot value, zero if unset
    fn get_storage(&self, address: &Address, key: &H256) -> H256;

    /// Write a storage slot, creating the account if needed
    fn set_storage(&mut self, address: Address, key: H256, value: H256);

    /// Append a log entry
    fn add_log(&mut self, log: Log);

    /// Logs recorded so far
    fn logs(&self) -> &[Log];

    /// Mark the current point in the mutation history
    fn snapshot(&mut self) -> SnapshotId;

    /// Undo every mutation made after `id` was taken.
    ///
    /// Panics if `id` is unknown or was already reverted past.
    fn revert_to_snapshot(&mut self, id: SnapshotId);

    /// Commit everything so far and drop the undo history.
    ///
    /// Snapshots taken before this call can no longer be reverted.
    fn finalise(&mut self);
}

#[derive(Debug, Clone)]
enum JournalEntry {
    AccountCreated {
        address: Address,
        prev: Option<Box<Account>>,
    },
    BalanceChange {
        address: Address,
        prev: U256,
    },
    NonceChange {
        address: Address,
        prev: u64,
    },
    CodeChange {
        address: Address,
        prev_code: Bytes,
        prev_hash: H256,
    },
    StorageChange {
        address: Address,
        key: H256,
        prev: Option<H256>,
    },
    LogAdded,
}

/// In-memory [`StateDb`] with a mutation journal
#[derive(Debug, Clone, Default)]
pub struct MemoryStateDb {
    accounts: HashMap<Address, Account>,
    logs: Vec<Log>,
    journal: Vec<JournalEntry>,
    // (id, journal length) for every live snapshot, ascending
    revisions: Vec<(SnapshotId, usize)>,
    next_revision: usize,
}

impl MemoryStateDb {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an account outside the journal, for genesis or test setup
    pub fn insert_account(&mut self, address: Address, account: Account) {
        self.accounts.insert(address, account);
    }

    /// Borrow an account
    pub fn account(&self, address: &Address) -> Option<&Account> {
        self.accounts.get(address)
    }

    /// Number of accounts
    pub fn account_count(&self) -> usize {
        self.accounts.len()
    }

    /// Number of journal entries since the last `finalise`
    pub fn journal_len(&self) -> usize {
        self.journal.len()
    }

    fn account_mut(&mut self, address: Address) -> &mut Account {
        if !self.accounts.contains_key(&address) {
            self.journal.push(JournalEntry::AccountCreated { address, prev: None });
        }
        self.accounts.entry(address).or_default()
    }

    fn undo(&mut self, entry: JournalEntry) {
        match entry {
            JournalEntry::AccountCreated { address, prev } => match prev {
                Some(account) => {
                    self.accounts.insert(address, *account);
                }
                None => {
                    self.accounts.remove(&address);
                }
            },
            JournalEntry::BalanceChange { address, prev } => {
                if let Some(account) = self.accounts.get_mut(&address) {
                    account.balance = prev;
                }
            }
            JournalEntry::NonceChange { address, prev } => {
                if let Some(account) = self.accounts.get_mut(&address) {
                    account.nonce = prev;
                }
            }
            JournalEntry::CodeChange {
                address,
                prev_code,
                prev_hash,
            } => {
                if let Some(account) = self.accounts.get_mut(&address) {
                    account.code = prev_code;
                    account.code_hash = prev_hash;
                }
            }
            JournalEntry::StorageChange { address, key, prev } => {
                if let Some(account) = self.accounts.get_mut(&address) {
                    match prev {
                        Some(value) => account.storage.insert(key, value),
                        None => account.storage.remove(&key),
                    };
                }
            }
            JournalEntry::LogAdded => {
                self.logs.pop();
            }
        }
    }
}

impl StateDb for MemoryStateDb {
    fn exists(&self, address: &Address) -> bool {
        self.accounts.contains_key(address)
    }

    fn is_empty(&self, address: &Address) -> bool {
        self.accounts.get(address).map_or(true, Account::is_empty)
    }

    fn create_account(&mut self, address: Address) {
        let prev = self.accounts.remove(&address);
        let balance = prev.as_ref().map_or_else(U256::zero, |a| a.balance);
        self.journal.push(JournalEntry::AccountCreated {
            address,
            prev: prev.map(Box::new),
        });
        self.accounts.insert(address, Account::with_balance(balance));
    }

    fn get_or_create_account(&mut self, address: Address) {
        self.account_mut(address);
    }

    fn get_balance(&self, address: &Address) -> U256 {
        self.accounts
            .get(address)
            .map_or_else(U256::zero, |a| a.balance)
    }

    fn add_balance(&mut self, address: Address, amount: U256) {
        let account = self.account_mut(address);
        let prev = account.balance;
        account.balance = prev.saturating_add(amount);
        self.journal.push(JournalEntry::BalanceChange { address, prev });
    }

    fn sub_balance(&mut self, address: Address, amount: U256) {
        let account = self.account_mut(address);
        let prev = account.balance;
        account.balance = prev.saturating_sub(amount);
        self.journal.push(JournalEntry::BalanceChange { address, prev });
    }

    fn get_nonce(&self, address: &Address) -> u64 {
        self.accounts.get(address).map_or(0, |a| a.nonce)
    }

    fn set_nonce(&mut self, address: Address, nonce: u64) {
        let account = self.account_mut(address);
        let prev = std::mem::replace(&mut account.nonce, nonce);
        self.journal.push(JournalEntry::NonceChange { address, prev });
    }

    fn get_code(&self, address: &Address) -> Bytes {
        self.accounts
            .get(address)
            .map(|a| a.code.clone())
            .unwrap_or_default()
    }

    fn get_code_hash(&self, address: &Address) -> H256 {
        self.accounts
            .get(address)
            .map_or(EMPTY_CODE_HASH, |a| a.code_hash)
    }

    fn set_code(&mut self, address: Address, code: Bytes) {
        let hash = keccak256(&code);
        let account = self.account_mut(address);
        let prev_code = std::mem::replace(&mut account.code, code);
        let prev_hash = std::mem::replace(&mut account.code_hash, hash);
        self.journal.push(JournalEntry::CodeChange {
            address,
            prev_code,
            prev_hash,
        });
    }

    fn get_storage(&self, address: &Address, key: &H256) -> H256 {
        self.accounts
            .get(address)
            .and_then(|a| a.storage.get(key).copied())
            .unwrap_or(H256::ZERO)
    }

    fn set_storage(&mut self, address: Address, key: H256, value: H256) {
        let account = self.account_mut(address);
        let prev = account.storage.insert(key, value);
        self.journal.push(JournalEntry::StorageChange { address, key, prev });
    }

    fn add_log(&mut self, log: Log) {
        self.logs.push(log);
        self.journal.push(JournalEntry::LogAdded);
    }

    fn logs(&self) -> &[Log] {
        &self.logs
    }

    fn snapshot(&mut self) -> SnapshotId {
        let id = SnapshotId(self.next_revision);
        self.next_revision += 1;
        self.revisions.push((id, self.journal.len()));
        id
    }

    fn revert_to_snapshot(&mut self, id: SnapshotId) {
        let index = match self.revisions.binary_search_by(|(rev, _)| rev.cmp(&id)) {
            Ok(index) => index,
            Err(_) => panic!("snapshot {:?} cannot be reverted", id),
        };
        let journal_len = self.revisions[index].1;
        while self.journal.len() > journal_len {
            if let Some(entry) = self.journal.pop() {
                self.undo(entry);
            }
        }
        self.revisions.truncate(index);
    }

    fn finalise(&mut self) {
        self.journal.clear();
        self.revisions.clear();
    }
}
