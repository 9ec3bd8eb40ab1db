use crate::{FsError, FsResult, BLOCK_SZ};
use alloc::vec::Vec;

type DataBlock = [u8; BLOCK_SZ];

/// The volume's data blocks, preallocated and laid out back to back.
/// Block `i` starts at byte `i * BLOCK_SZ`.
pub struct DataRegion {
    bytes: Vec<u8>,
    blocks: u32,
}

impl DataRegion {
    pub fn new(blocks: u32) -> Self {
        Self {
            bytes: alloc::vec![0u8; blocks as usize * BLOCK_SZ],
            blocks,
        }
    }

    pub fn blocks(&self) -> u32 {
        self.blocks
    }

    /// An index past the region can only come from a corrupted inode.
    pub fn block(&self, block_id: u32) -> FsResult<&DataBlock> {
        let start = self.offset_of(block_id)?;
        self.bytes[start..start + BLOCK_SZ]
            .try_into()
            .map_err(|_| FsError::IoError)
    }

    pub fn block_mut(&mut self, block_id: u32) -> FsResult<&mut DataBlock> {
        let start = self.offset_of(block_id)?;
        (&mut self.bytes[start..start + BLOCK_SZ])
            .try_into()
            .map_err(|_| FsError::IoError)
    }

    fn offset_of(&self, block_id: u32) -> FsResult<usize> {
        if block_id >= self.blocks {
            return Err(FsError::IoError);
        }
        Ok(block_id as usize * BLOCK_SZ)
    }
}
