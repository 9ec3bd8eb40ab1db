use crate::{FsError, FsResult};

/// the size of a block is 4096 bytes
pub const BLOCK_SZ: usize = 4096;
/// bits held by one bitmap block
pub const BLOCK_BITS: usize = BLOCK_SZ * 8;

pub const OSFS_MAGIC: u32 = 0x0513_0513;

pub const SUPER_BLOCK_ID: usize = 0;
pub const INODE_BITMAP_BLOCK_ID: usize = 1;
pub const DATA_BITMAP_BLOCK_ID: usize = 2;
pub const INODE_TABLE_START_BLOCK: usize = 3;

/// the size of one on-disk inode
pub const DISK_INODE_SZ: usize = 64;
pub const INODES_PER_BLOCK: usize = BLOCK_SZ / DISK_INODE_SZ;

pub const DEFAULT_INODE_COUNT: u32 = 128;
pub const DEFAULT_DATA_BLOCKS: u32 = 256;

/// Geometry of a freshly formatted volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumeConfig {
    /// number of inodes, the root directory included
    pub inode_count: u32,
    /// number of blocks in the data region, the reserved block 0 included
    pub data_blocks: u32,
}

impl Default for VolumeConfig {
    fn default() -> Self {
        Self {
            inode_count: DEFAULT_INODE_COUNT,
            data_blocks: DEFAULT_DATA_BLOCKS,
        }
    }
}

impl VolumeConfig {
    pub fn new(inode_count: u32, data_blocks: u32) -> Self {
        Self {
            inode_count,
            data_blocks,
        }
    }

    /// Each bitmap lives in a single block, so both counts are capped by
    /// `BLOCK_BITS`. A usable volume needs the root inode and at least one
    /// data block besides the reserved one.
    pub fn validate(&self) -> FsResult<()> {
        if self.inode_count == 0 || self.inode_count as usize > BLOCK_BITS {
            return Err(FsError::InvalidArgument);
        }
        if self.data_blocks < 2 || self.data_blocks as usize > BLOCK_BITS {
            return Err(FsError::InvalidArgument);
        }
        Ok(())
    }

    pub fn inode_table_blocks(&self) -> u32 {
        ((self.inode_count as usize + INODES_PER_BLOCK - 1) / INODES_PER_BLOCK) as u32
    }

    pub fn data_start_block(&self) -> u32 {
        INODE_TABLE_START_BLOCK as u32 + self.inode_table_blocks()
    }

    /// Size of the whole image in blocks.
    pub fn total_blocks(&self) -> u32 {
        self.data_start_block() + self.data_blocks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = VolumeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.inode_table_blocks(), 2);
        assert_eq!(config.data_start_block(), 5);
        assert_eq!(config.total_blocks(), 5 + DEFAULT_DATA_BLOCKS);
    }

    #[test]
    fn rejects_degenerate_geometry() {
        assert_eq!(
            VolumeConfig::new(0, 16).validate(),
            Err(FsError::InvalidArgument)
        );
        assert_eq!(
            VolumeConfig::new(16, 1).validate(),
            Err(FsError::InvalidArgument)
        );
        assert_eq!(
            VolumeConfig::new(16, BLOCK_BITS as u32 + 1).validate(),
            Err(FsError::InvalidArgument)
        );
    }

    #[test]
    fn inode_table_rounds_up() {
        assert_eq!(VolumeConfig::new(1, 2).inode_table_blocks(), 1);
        assert_eq!(
            VolumeConfig::new(INODES_PER_BLOCK as u32 + 1, 2).inode_table_blocks(),
            2
        );
    }
}
