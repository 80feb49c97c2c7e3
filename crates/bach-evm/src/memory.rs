//! Byte-addressable frame memory.
//!
//! The interpreter charges for expansion and calls [`Memory::resize`]
//! before any access, so the accessors below never grow memory themselves.

use bach_primitives::U256;

/// Frame memory, always a whole number of 32-byte words
#[derive(Clone, Debug, Default)]
pub struct Memory {
    data: Vec<u8>,
}

impl Memory {
    /// Create new empty memory
    pub fn new() -> Self {
        Self { data: Vec::new() }
    }

    /// Current size in bytes
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Grow to cover `end` bytes, rounded up to a word boundary
    pub fn resize(&mut self, end: usize) {
        let aligned = end.div_ceil(32) * 32;
        if aligned > self.data.len() {
            self.data.resize(aligned, 0);
        }
    }

    /// Load a 32-byte word
    pub fn load_word(&self, offset: usize) -> U256 {
        U256::from_big_endian(&self.data[offset..offset + 32])
    }

    /// Store a 32-byte word
    pub fn store_word(&mut self, offset: usize, value: U256) {
        value.to_big_endian(&mut self.data[offset..offset + 32]);
    }

    /// Store a single byte
    pub fn store_byte(&mut self, offset: usize, value: u8) {
        self.data[offset] = value;
    }

    /// Borrow `len` bytes at `offset`
    pub fn slice(&self, offset: usize, len: usize) -> &[u8] {
        &self.data[offset..offset + len]
    }

    /// Write `data` at `offset`
    pub fn set(&mut self, offset: usize, data: &[u8]) {
        self.data[offset..offset + data.len()].copy_from_slice(data);
    }

    /// Copy `len` bytes of `source` starting at `source_offset`, zero-filling past its end
    pub fn set_padded(&mut self, offset: usize, len: usize, source: &[u8], source_offset: U256) {
        let target = &mut self.data[offset..offset + len];
        let start = if source_offset > U256::from(source.len()) {
            source.len()
        } else {
            source_offset.as_usize()
        };
        let available = &source[start..];
        let copied = available.len().min(len);
        target[..copied].copy_from_slice(&available[..copied]);
        target[copied..].fill(0);
    }
}
