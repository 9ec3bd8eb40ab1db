use crate::{FsError, FsResult, BLOCK_SZ};
use alloc::vec::Vec;
use spin::Mutex;

pub trait BlockDevice: Send + Sync {
    fn read_block(&self, block_id: usize, buf: &mut [u8]) -> FsResult<()>;
    fn write_block(&self, block_id: usize, buf: &[u8]) -> FsResult<()>;
}

/// A block device kept entirely in memory.
pub struct RamDisk {
    blocks: Mutex<Vec<u8>>,
}

impl RamDisk {
    pub fn new(total_blocks: usize) -> Self {
        Self {
            blocks: Mutex::new(alloc::vec![0u8; total_blocks * BLOCK_SZ]),
        }
    }

    pub fn total_blocks(&self) -> usize {
        self.blocks.lock().len() / BLOCK_SZ
    }

    fn range(&self, block_id: usize, len: usize) -> FsResult<core::ops::Range<usize>> {
        let start = block_id * BLOCK_SZ;
        if len != BLOCK_SZ || block_id >= self.total_blocks() {
            return Err(FsError::IoError);
        }
        Ok(start..start + BLOCK_SZ)
    }
}

impl BlockDevice for RamDisk {
    fn read_block(&self, block_id: usize, buf: &mut [u8]) -> FsResult<()> {
        let range = self.range(block_id, buf.len())?;
        buf.copy_from_slice(&self.blocks.lock()[range]);
        Ok(())
    }

    fn write_block(&self, block_id: usize, buf: &[u8]) -> FsResult<()> {
        let range = self.range(block_id, buf.len())?;
        self.blocks.lock()[range].copy_from_slice(buf);
        Ok(())
    }
}
