use crate::{
    config::{BLOCK_BITS, BLOCK_SZ},
    FsError, FsResult,
};
use alloc::vec::Vec;

/// Hands out free block indices. Index 0 is never returned by a data
/// allocator: it marks an inode without a block.
pub trait BlockAllocator {
    fn alloc_block(&mut self) -> Option<u32>;
    fn dealloc_block(&mut self, id: u32);
}

/// First-fit allocation bitmap backed by one on-disk block.
pub struct Bitmap {
    bits: Vec<u64>,
    capacity: usize,
}

impl Bitmap {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity <= BLOCK_BITS);
        Self {
            bits: alloc::vec![0u64; (capacity + 63) / 64],
            capacity,
        }
    }

    /// Load from the raw bytes of a bitmap block.
    pub fn from_block(block: &[u8], capacity: usize) -> FsResult<Self> {
        if block.len() != BLOCK_SZ || capacity > BLOCK_BITS {
            return Err(FsError::InvalidImage);
        }
        let mut bitmap = Self::new(capacity);
        for (word, chunk) in bitmap.bits.iter_mut().zip(block.chunks_exact(8)) {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(chunk);
            *word = u64::from_le_bytes(bytes);
        }
        // bits past the capacity are never handed out
        let tail = capacity % 64;
        if tail != 0 {
            if let Some(last) = bitmap.bits.last_mut() {
                *last &= (1u64 << tail) - 1;
            }
        }
        Ok(bitmap)
    }

    pub fn write_block(&self, block: &mut [u8]) {
        block.fill(0);
        for (word, chunk) in self.bits.iter().zip(block.chunks_exact_mut(8)) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
    }

    pub fn alloc(&mut self) -> Option<usize> {
        let capacity = self.capacity;
        let (bits64_pos, inner_pos) = self
            .bits
            .iter()
            .enumerate()
            .find(|(_, bits64)| **bits64 != u64::MAX)
            .map(|(bits64_pos, bits64)| (bits64_pos, bits64.trailing_ones() as usize))?;
        let bit = bits64_pos * 64 + inner_pos;
        if bit >= capacity {
            return None;
        }
        self.bits[bits64_pos] |= 1u64 << inner_pos;
        Some(bit)
    }

    pub fn dealloc(&mut self, bit: usize) {
        let (bits64_pos, inner_pos) = decomposition(bit);
        debug_assert!(self.bits[bits64_pos] & (1u64 << inner_pos) > 0);
        self.bits[bits64_pos] &= !(1u64 << inner_pos);
    }

    /// Mark `bit` as used regardless of its state.
    pub fn reserve(&mut self, bit: usize) {
        let (bits64_pos, inner_pos) = decomposition(bit);
        self.bits[bits64_pos] |= 1u64 << inner_pos;
    }

    pub fn is_set(&self, bit: usize) -> bool {
        if bit >= self.capacity {
            return false;
        }
        let (bits64_pos, inner_pos) = decomposition(bit);
        self.bits[bits64_pos] & (1u64 << inner_pos) > 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn used(&self) -> usize {
        self.bits.iter().map(|bits64| bits64.count_ones() as usize).sum()
    }

    pub fn free(&self) -> usize {
        self.capacity - self.used()
    }
}

impl BlockAllocator for Bitmap {
    fn alloc_block(&mut self) -> Option<u32> {
        self.alloc().map(|bit| bit as u32)
    }

    fn dealloc_block(&mut self, id: u32) {
        self.dealloc(id as usize);
    }
}

fn decomposition(bit: usize) -> (usize, usize) {
    (bit / 64, bit % 64)
}
