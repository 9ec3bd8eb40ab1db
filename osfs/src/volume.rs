use crate::{
    bitmap::Bitmap,
    block_dev::BlockDevice,
    buffer::{UserSink, UserSource},
    config::{
        VolumeConfig, DATA_BITMAP_BLOCK_ID, DISK_INODE_SZ, INODES_PER_BLOCK,
        INODE_BITMAP_BLOCK_ID, INODE_TABLE_START_BLOCK, SUPER_BLOCK_ID,
    },
    layout::{DiskInode, InodeMode, SuperBlock},
    region::DataRegion,
    time::Clock,
    vfs::Inode,
    FsError, FsResult, BLOCK_SZ,
};
use alloc::{sync::Arc, vec::Vec};
use log::{debug, info, warn};
use spin::Mutex;

pub const ROOT_INODE_ID: u32 = 0;

type DataBlock = [u8; BLOCK_SZ];

/// Totals and free counts, as reported by `statfs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumeStat {
    pub block_size: usize,
    pub total_inodes: u32,
    pub free_inodes: u32,
    pub total_blocks: u32,
    pub free_blocks: u32,
}

/// A mounted volume: superblock, both allocation bitmaps, the inode table
/// and the data region, all held in memory.
pub struct Volume {
    config: VolumeConfig,
    inode_bitmap: Bitmap,
    data_bitmap: Bitmap,
    inodes: Vec<DiskInode>,
    region: DataRegion,
    clock: Arc<dyn Clock>,
}

impl Volume {
    pub fn format(config: &VolumeConfig, clock: Arc<dyn Clock>) -> FsResult<Arc<Mutex<Self>>> {
        config.validate()?;
        let mut data_bitmap = Bitmap::new(config.data_blocks as usize);
        // data block 0 stands for "unallocated" in every inode
        data_bitmap.reserve(0);
        let now = clock.now();
        let inodes = (0..config.inode_count)
            .map(|ino| DiskInode::new(ino, InodeMode::regular(), now))
            .collect();
        let mut volume = Self {
            config: *config,
            inode_bitmap: Bitmap::new(config.inode_count as usize),
            data_bitmap,
            inodes,
            region: DataRegion::new(config.data_blocks),
            clock,
        };
        let root = volume.alloc_inode(InodeMode::directory())?;
        debug_assert_eq!(root, ROOT_INODE_ID);
        info!(
            "osfs: formatted {} inodes, {} data blocks ({} blocks total)",
            config.inode_count,
            config.data_blocks,
            config.total_blocks()
        );
        Ok(Arc::new(Mutex::new(volume)))
    }

    pub fn open(device: &dyn BlockDevice, clock: Arc<dyn Clock>) -> FsResult<Arc<Mutex<Self>>> {
        let mut block: DataBlock = [0u8; BLOCK_SZ];
        device.read_block(SUPER_BLOCK_ID, &mut block)?;
        let super_block = SuperBlock::decode(&block);
        if !super_block.is_valid() {
            warn!("osfs: bad superblock magic or block size");
            return Err(FsError::InvalidImage);
        }
        let config = VolumeConfig::new(super_block.inode_count, super_block.data_blocks);
        if config.validate().is_err()
            || config.inode_table_blocks() != super_block.inode_table_blocks
        {
            warn!("osfs: inconsistent geometry in superblock");
            return Err(FsError::InvalidImage);
        }

        device.read_block(INODE_BITMAP_BLOCK_ID, &mut block)?;
        let inode_bitmap = Bitmap::from_block(&block, config.inode_count as usize)?;
        device.read_block(DATA_BITMAP_BLOCK_ID, &mut block)?;
        let mut data_bitmap = Bitmap::from_block(&block, config.data_blocks as usize)?;
        data_bitmap.reserve(0);

        let mut inodes = Vec::with_capacity(config.inode_count as usize);
        for table_block in 0..config.inode_table_blocks() as usize {
            device.read_block(INODE_TABLE_START_BLOCK + table_block, &mut block)?;
            for raw in block.chunks_exact(DISK_INODE_SZ) {
                if inodes.len() == config.inode_count as usize {
                    break;
                }
                inodes.push(DiskInode::decode(raw)?);
            }
        }
        if !inode_bitmap.is_set(ROOT_INODE_ID as usize) || !inodes[0].is_dir() {
            warn!("osfs: root directory missing");
            return Err(FsError::InvalidImage);
        }
        Self::check_inodes(&inodes, &inode_bitmap, &data_bitmap)?;

        let mut region = DataRegion::new(config.data_blocks);
        let data_start = config.data_start_block() as usize;
        for block_id in 1..config.data_blocks {
            if data_bitmap.is_set(block_id as usize) {
                device.read_block(data_start + block_id as usize, region.block_mut(block_id)?)?;
            }
        }
        info!(
            "osfs: opened volume, {} of {} data blocks free",
            data_bitmap.free(),
            config.data_blocks
        );
        Ok(Arc::new(Mutex::new(Self {
            config,
            inode_bitmap,
            data_bitmap,
            inodes,
            region,
            clock,
        })))
    }

    /// Every live inode must sit in its own slot and own only blocks that
    /// are in range, marked used, and not owned by another inode.
    fn check_inodes(
        inodes: &[DiskInode],
        inode_bitmap: &Bitmap,
        data_bitmap: &Bitmap,
    ) -> FsResult<()> {
        let mut claimed = Bitmap::new(data_bitmap.capacity());
        for (slot, inode) in inodes.iter().enumerate() {
            if !inode_bitmap.is_set(slot) {
                continue;
            }
            if inode.ino as usize != slot {
                warn!("osfs: inode slot {} records ino {}", slot, inode.ino);
                return Err(FsError::InvalidImage);
            }
            for block_id in inode.data_blocks() {
                let bit = block_id as usize;
                if bit >= data_bitmap.capacity()
                    || !data_bitmap.is_set(bit)
                    || claimed.is_set(bit)
                {
                    warn!("osfs: inode {} owns bad or shared block {}", slot, block_id);
                    return Err(FsError::InvalidImage);
                }
                claimed.reserve(bit);
            }
        }
        Ok(())
    }

    /// Write the whole volume to `device`, which must hold at least
    /// `config().total_blocks()` blocks.
    pub fn sync(&self, device: &dyn BlockDevice) -> FsResult<()> {
        let mut block: DataBlock = [0u8; BLOCK_SZ];
        let stat = self.statfs();
        let mut super_block = SuperBlock::new(
            self.config.inode_count,
            self.config.data_blocks,
            self.config.inode_table_blocks(),
        );
        super_block.free_inodes = stat.free_inodes;
        super_block.free_blocks = stat.free_blocks;
        super_block.encode(&mut block);
        device.write_block(SUPER_BLOCK_ID, &block)?;

        self.inode_bitmap.write_block(&mut block);
        device.write_block(INODE_BITMAP_BLOCK_ID, &block)?;
        self.data_bitmap.write_block(&mut block);
        device.write_block(DATA_BITMAP_BLOCK_ID, &block)?;

        for (table_block, chunk) in self.inodes.chunks(INODES_PER_BLOCK).enumerate() {
            block.fill(0);
            for (inode, raw) in chunk.iter().zip(block.chunks_exact_mut(DISK_INODE_SZ)) {
                inode.encode(raw);
            }
            device.write_block(INODE_TABLE_START_BLOCK + table_block, &block)?;
        }

        let data_start = self.config.data_start_block() as usize;
        for block_id in 0..self.region.blocks() {
            device.write_block(data_start + block_id as usize, self.region.block(block_id)?)?;
        }
        info!("osfs: synced {} blocks", self.config.total_blocks());
        Ok(())
    }

    pub fn root_inode(volume: &Arc<Mutex<Self>>) -> Inode {
        Inode::new(ROOT_INODE_ID, volume.clone())
    }

    pub fn config(&self) -> &VolumeConfig {
        &self.config
    }

    pub fn statfs(&self) -> VolumeStat {
        VolumeStat {
            block_size: BLOCK_SZ,
            total_inodes: self.inode_bitmap.capacity() as u32,
            free_inodes: self.inode_bitmap.free() as u32,
            total_blocks: self.data_bitmap.capacity() as u32,
            free_blocks: self.data_bitmap.free() as u32,
        }
    }

    pub fn alloc_inode(&mut self, mode: InodeMode) -> FsResult<u32> {
        let ino = self.inode_bitmap.alloc().ok_or_else(|| {
            warn!("osfs: out of inodes");
            FsError::NoSpace
        })? as u32;
        self.inodes[ino as usize] = DiskInode::new(ino, mode, self.clock.now());
        debug!("osfs: allocated inode {}", ino);
        Ok(ino)
    }

    /// Only undoes an `alloc_inode` whose directory entry could not be
    /// written; there is no unlink.
    pub(crate) fn dealloc_inode(&mut self, ino: u32) {
        debug!("osfs: released inode {}", ino);
        self.inode_bitmap.dealloc(ino as usize);
    }

    pub fn metadata(&self, ino: u32) -> FsResult<DiskInode> {
        self.inode(ino).copied()
    }

    pub fn read<S>(&self, ino: u32, pos: &mut usize, dst: &mut S) -> FsResult<usize>
    where
        S: UserSink + ?Sized,
    {
        self.inode(ino)?.read_at(pos, dst, &self.region)
    }

    pub fn write<S>(&mut self, ino: u32, pos: &mut usize, src: &S) -> FsResult<usize>
    where
        S: UserSource + ?Sized,
    {
        self.inode(ino)?;
        let inode = &mut self.inodes[ino as usize];
        inode.write_at(
            pos,
            src,
            &mut self.region,
            &mut self.data_bitmap,
            self.clock.as_ref(),
        )
    }

    fn inode(&self, ino: u32) -> FsResult<&DiskInode> {
        if !self.inode_bitmap.is_set(ino as usize) {
            return Err(FsError::NotFound);
        }
        self.inodes.get(ino as usize).ok_or(FsError::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{block_dev::RamDisk, time::ManualClock, time::TimeSpec};

    fn clock() -> Arc<dyn Clock> {
        Arc::new(ManualClock::new(TimeSpec::new(1_700_000_000, 0)))
    }

    #[test]
    fn format_creates_root() {
        let volume = Volume::format(&VolumeConfig::new(8, 16), clock()).unwrap();
        let volume = volume.lock();
        let root = volume.metadata(ROOT_INODE_ID).unwrap();
        assert!(root.is_dir());
        assert_eq!(root.nlink, 2);
        assert_eq!(root.size, 0);
        let stat = volume.statfs();
        assert_eq!(stat.free_inodes, 7);
        // block 0 is reserved
        assert_eq!(stat.free_blocks, 15);
    }

    #[test]
    fn format_rejects_bad_config() {
        assert!(matches!(
            Volume::format(&VolumeConfig::new(0, 16), clock()),
            Err(FsError::InvalidArgument)
        ));
    }

    #[test]
    fn unknown_inode_is_not_found() {
        let volume = Volume::format(&VolumeConfig::new(8, 16), clock()).unwrap();
        let mut volume = volume.lock();
        let mut pos = 0;
        assert_eq!(volume.metadata(5), Err(FsError::NotFound));
        assert_eq!(volume.write(5, &mut pos, &b"x"[..]), Err(FsError::NotFound));
        assert_eq!(volume.metadata(100), Err(FsError::NotFound));
    }

    #[test]
    fn runs_out_of_blocks() {
        let volume = Volume::format(&VolumeConfig::new(8, 3), clock()).unwrap();
        let mut volume = volume.lock();
        let a = volume.alloc_inode(InodeMode::regular()).unwrap();
        let b = volume.alloc_inode(InodeMode::regular()).unwrap();
        let c = volume.alloc_inode(InodeMode::regular()).unwrap();
        let mut pos = 0;
        assert_eq!(volume.write(a, &mut pos, &b"a"[..]), Ok(1));
        let mut pos = 0;
        assert_eq!(volume.write(b, &mut pos, &b"b"[..]), Ok(1));
        let mut pos = 0;
        assert_eq!(volume.write(c, &mut pos, &b"c"[..]), Err(FsError::NoSpace));
        assert!(!volume.metadata(c).unwrap().is_allocated());
        assert_eq!(volume.statfs().free_blocks, 0);
    }

    #[test]
    fn runs_out_of_inodes() {
        let volume = Volume::format(&VolumeConfig::new(2, 4), clock()).unwrap();
        let mut volume = volume.lock();
        assert_eq!(volume.alloc_inode(InodeMode::regular()), Ok(1));
        assert_eq!(volume.alloc_inode(InodeMode::regular()), Err(FsError::NoSpace));
    }

    #[test]
    fn sync_then_open_round_trip() {
        let config = VolumeConfig::new(40, 8);
        let volume = Volume::format(&config, clock()).unwrap();
        let ino = {
            let mut volume = volume.lock();
            let ino = volume.alloc_inode(InodeMode::regular()).unwrap();
            let mut pos = 0;
            volume.write(ino, &mut pos, &b"kept across sync"[..]).unwrap();
            ino
        };
        let disk = RamDisk::new(config.total_blocks() as usize);
        volume.lock().sync(&disk).unwrap();

        let reopened = Volume::open(&disk, clock()).unwrap();
        let reopened = reopened.lock();
        let before = volume.lock().metadata(ino).unwrap();
        assert_eq!(reopened.metadata(ino).unwrap(), before);
        assert_eq!(reopened.statfs(), volume.lock().statfs());
        let mut buf = [0u8; 64];
        let mut pos = 0;
        let n = reopened.read(ino, &mut pos, &mut buf[..]).unwrap();
        assert_eq!(&buf[..n], b"kept across sync");
    }

    #[test]
    fn open_rejects_blank_device() {
        let disk = RamDisk::new(16);
        assert!(matches!(
            Volume::open(&disk, clock()),
            Err(FsError::InvalidImage)
        ));
    }

    fn synced_with_one_file() -> (RamDisk, u32) {
        let config = VolumeConfig::new(8, 8);
        let volume = Volume::format(&config, clock()).unwrap();
        let mut volume = volume.lock();
        let ino = volume.alloc_inode(InodeMode::regular()).unwrap();
        let mut pos = 0;
        volume.write(ino, &mut pos, &b"AAAA"[..]).unwrap();
        let disk = RamDisk::new(config.total_blocks() as usize);
        volume.sync(&disk).unwrap();
        (disk, ino)
    }

    #[test]
    fn open_rejects_block_marked_free() {
        let (disk, _) = synced_with_one_file();
        disk.write_block(DATA_BITMAP_BLOCK_ID, &[0u8; BLOCK_SZ]).unwrap();
        assert!(matches!(
            Volume::open(&disk, clock()),
            Err(FsError::InvalidImage)
        ));
    }

    #[test]
    fn open_rejects_shared_block() {
        let (disk, ino) = synced_with_one_file();
        let mut block = [0u8; BLOCK_SZ];
        disk.read_block(INODE_TABLE_START_BLOCK, &mut block).unwrap();
        let offset = ino as usize * DISK_INODE_SZ;
        let owner = DiskInode::decode(&block[offset..offset + DISK_INODE_SZ]).unwrap();
        // a second live inode pointing at the same block
        let mut twin = owner;
        twin.ino = ino + 1;
        let offset = offset + DISK_INODE_SZ;
        twin.encode(&mut block[offset..offset + DISK_INODE_SZ]);
        disk.write_block(INODE_TABLE_START_BLOCK, &block).unwrap();
        let mut bitmap = [0u8; BLOCK_SZ];
        disk.read_block(INODE_BITMAP_BLOCK_ID, &mut bitmap).unwrap();
        bitmap[0] |= 1 << (ino + 1);
        disk.write_block(INODE_BITMAP_BLOCK_ID, &bitmap).unwrap();
        assert!(matches!(
            Volume::open(&disk, clock()),
            Err(FsError::InvalidImage)
        ));
    }

    #[test]
    fn open_rejects_misplaced_inode() {
        let (disk, ino) = synced_with_one_file();
        let mut block = [0u8; BLOCK_SZ];
        disk.read_block(INODE_TABLE_START_BLOCK, &mut block).unwrap();
        let raw = &mut block[ino as usize * DISK_INODE_SZ..][..DISK_INODE_SZ];
        let mut inode = DiskInode::decode(raw).unwrap();
        inode.ino += 3;
        inode.encode(raw);
        disk.write_block(INODE_TABLE_START_BLOCK, &block).unwrap();
        assert!(matches!(
            Volume::open(&disk, clock()),
            Err(FsError::InvalidImage)
        ));
    }

    #[test]
    fn sync_to_small_device_fails() {
        let config = VolumeConfig::new(8, 8);
        let volume = Volume::format(&config, clock()).unwrap();
        let disk = RamDisk::new(config.total_blocks() as usize - 1);
        assert_eq!(volume.lock().sync(&disk), Err(FsError::IoError));
    }
}
