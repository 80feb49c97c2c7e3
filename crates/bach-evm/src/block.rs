//! Block context, originating message and block-hash resolution

use std::collections::HashMap;

use bach_primitives::{Address, BlockNumber, H256, U256};
use bytes::Bytes;

/// Header fields of the block being executed.
///
/// Immutable for the duration of the block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockContext {
    /// Block number
    pub number: BlockNumber,
    /// Block timestamp
    pub timestamp: u64,
    /// Difficulty
    pub difficulty: U256,
    /// Block gas limit
    pub gas_limit: u64,
    /// Beneficiary address
    pub coinbase: Address,
    /// Hash of the parent block
    pub parent_hash: H256,
}

/// The top-level invocation an execution is running on behalf of.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    /// Sender of the transaction
    pub origin: Address,
    /// Gas price
    pub gas_price: U256,
    /// Value sent with the call
    pub value: U256,
    /// Call data
    pub input: Bytes,
    /// Gas available to the top-level call
    pub gas: u64,
}

/// Resolves the hash of an ancestor block by number.
///
/// Returns [`H256::ZERO`] when the block is unknown; that is a normal
/// answer, not an error.
pub trait BlockHashResolver {
    /// Hash of block `number`, or zero
    fn block_hash(&self, number: BlockNumber) -> H256;
}

impl<F> BlockHashResolver for F
where
    F: Fn(BlockNumber) -> H256,
{
    fn block_hash(&self, number: BlockNumber) -> H256 {
        self(number)
    }
}

/// Minimal header view needed to walk parent links
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderRecord {
    /// Hash of this header
    pub hash: H256,
    /// Block number
    pub number: BlockNumber,
    /// Hash of the parent header
    pub parent_hash: H256,
}

/// Read access to already-loaded headers
pub trait ChainReader {
    /// Header with the given hash, if known
    fn header(&self, hash: &H256) -> Option<HeaderRecord>;
}

/// In-memory header store
#[derive(Debug, Clone, Default)]
pub struct MemoryChain {
    headers: HashMap<H256, HeaderRecord>,
}

impl MemoryChain {
    /// Create an empty chain
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a header
    pub fn insert(&mut self, header: HeaderRecord) {
        self.headers.insert(header.hash, header);
    }

    /// Number of known headers
    pub fn len(&self) -> usize {
        self.headers.len()
    }

    /// Whether no header is known
    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }
}

impl ChainReader for MemoryChain {
    fn header(&self, hash: &H256) -> Option<HeaderRecord> {
        self.headers.get(hash).copied()
    }
}

/// Resolves block hashes by walking parent links back from a reference header.
///
/// Never looks at a block above the reference, so answers for heights at or
/// beyond the reference's successor are always zero.
pub struct AncestorHashes<'a, C: ChainReader + ?Sized> {
    chain: &'a C,
    reference: H256,
}

impl<'a, C: ChainReader + ?Sized> AncestorHashes<'a, C> {
    /// Resolver anchored at the header with hash `reference`
    pub fn new(chain: &'a C, reference: H256) -> Self {
        Self { chain, reference }
    }
}

impl<C: ChainReader + ?Sized> BlockHashResolver for AncestorHashes<'_, C> {
    fn block_hash(&self, number: BlockNumber) -> H256 {
        let mut hash = self.reference;
        while let Some(header) = self.chain.header(&hash) {
            if header.number == number {
                return header.hash;
            }
            if header.number < number || header.number == 0 {
                break;
            }
            hash = header.parent_hash;
        }
        H256::ZERO
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash_of(n: u64) -> H256 {
        H256::from_word(U256::from(0x1000 + n))
    }

    /// B0 <- B1 <- ... <- B(len-1)
    fn linear_chain(len: u64) -> MemoryChain {
        let mut chain = MemoryChain::new();
        for n in 0..len {
            chain.insert(HeaderRecord {
                hash: hash_of(n),
                number: n,
                parent_hash: if n == 0 { H256::ZERO } else { hash_of(n - 1) },
            });
        }
        chain
    }

    #[test]
    fn test_ancestor_lookup() {
        let chain = linear_chain(5);
        let resolver = AncestorHashes::new(&chain, hash_of(4));
        assert_eq!(resolver.block_hash(2), hash_of(2));
        assert_eq!(resolver.block_hash(0), hash_of(0));
        assert_eq!(resolver.block_hash(4), hash_of(4));
    }

    #[test]
    fn test_beyond_reference_is_zero() {
        let chain = linear_chain(8);
        // anchored in the middle of a longer chain: later blocks stay invisible
        let resolver = AncestorHashes::new(&chain, hash_of(4));
        assert_eq!(resolver.block_hash(5), H256::ZERO);
        assert_eq!(resolver.block_hash(10), H256::ZERO);
    }

    #[test]
    fn test_broken_parent_link() {
        let mut chain = linear_chain(5);
        chain.headers.remove(&hash_of(2));
        let resolver = AncestorHashes::new(&chain, hash_of(4));
        assert_eq!(resolver.block_hash(3), hash_of(3));
        assert_eq!(resolver.block_hash(1), H256::ZERO);
    }

    #[test]
    fn test_unknown_reference() {
        let chain = MemoryChain::new();
        assert!(chain.is_empty());
        let resolver = AncestorHashes::new(&chain, hash_of(4));
        assert_eq!(resolver.block_hash(0), H256::ZERO);
    }

    #[test]
    fn test_closure_resolver() {
        let resolver = |n: u64| H256::from_word(U256::from(n * 2));
        assert_eq!(resolver.block_hash(21), H256::from_word(U256::from(42u64)));
    }
}
