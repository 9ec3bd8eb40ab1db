use crate::{
    bitmap::BlockAllocator,
    buffer::{UserSink, UserSource},
    config::{DISK_INODE_SZ, OSFS_MAGIC},
    region::DataRegion,
    time::{Clock, TimeSpec},
    FsError, FsResult, BLOCK_SZ,
};
use bitflags::bitflags;
use log::{trace, warn};

/// the number of data blocks an inode can address
pub const INODE_DIRECT_COUNT: usize = 1;
/// the max length of a file name
pub const NAME_LENGTH_LIMIT: usize = 27;
/// the size of struct DirEntry
pub const DIRENT_SZ: usize = 32;
/// data block index meaning "no block assigned"
const UNALLOCATED: u32 = 0;

const TIMES_OFFSET: usize = 12 + 4 * INODE_DIRECT_COUNT;
const TIMESPEC_SZ: usize = 12;
const _: () = assert!(TIMES_OFFSET + 3 * TIMESPEC_SZ <= DISK_INODE_SZ);

fn get_u16(bytes: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([bytes[offset], bytes[offset + 1]])
}

fn get_u32(bytes: &[u8], offset: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[offset..offset + 4]);
    u32::from_le_bytes(raw)
}

fn get_i64(bytes: &[u8], offset: usize) -> i64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[offset..offset + 8]);
    i64::from_le_bytes(raw)
}

fn put(bytes: &mut [u8], offset: usize, value: &[u8]) {
    bytes[offset..offset + value.len()].copy_from_slice(value);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SuperBlock {
    magic: u32,
    pub block_size: u32,
    pub inode_count: u32,
    pub data_blocks: u32,
    pub inode_table_blocks: u32,
    pub free_inodes: u32,
    pub free_blocks: u32,
}

impl SuperBlock {
    pub fn new(inode_count: u32, data_blocks: u32, inode_table_blocks: u32) -> Self {
        Self {
            magic: OSFS_MAGIC,
            block_size: BLOCK_SZ as u32,
            inode_count,
            data_blocks,
            inode_table_blocks,
            free_inodes: inode_count,
            free_blocks: data_blocks,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.magic == OSFS_MAGIC && self.block_size as usize == BLOCK_SZ
    }

    pub fn decode(block: &[u8]) -> Self {
        Self {
            magic: get_u32(block, 0),
            block_size: get_u32(block, 4),
            inode_count: get_u32(block, 8),
            data_blocks: get_u32(block, 12),
            inode_table_blocks: get_u32(block, 16),
            free_inodes: get_u32(block, 20),
            free_blocks: get_u32(block, 24),
        }
    }

    pub fn encode(&self, block: &mut [u8]) {
        block.fill(0);
        put(block, 0, &self.magic.to_le_bytes());
        put(block, 4, &self.block_size.to_le_bytes());
        put(block, 8, &self.inode_count.to_le_bytes());
        put(block, 12, &self.data_blocks.to_le_bytes());
        put(block, 16, &self.inode_table_blocks.to_le_bytes());
        put(block, 20, &self.free_inodes.to_le_bytes());
        put(block, 24, &self.free_blocks.to_le_bytes());
    }
}

bitflags! {
    pub struct InodeMode: u16 {
        const S_IFMT = 0o170000;
        const S_IFDIR = 0o040000;
        const S_IFREG = 0o100000;

        const S_IRUSR = 0o400;
        const S_IWUSR = 0o200;
        const S_IXUSR = 0o100;
        const S_IRGRP = 0o040;
        const S_IWGRP = 0o020;
        const S_IXGRP = 0o010;
        const S_IROTH = 0o004;
        const S_IWOTH = 0o002;
        const S_IXOTH = 0o001;
    }
}

impl InodeMode {
    /// rw-r--r--
    pub fn regular() -> Self {
        Self::S_IFREG | Self::S_IRUSR | Self::S_IWUSR | Self::S_IRGRP | Self::S_IROTH
    }

    /// rwxr-xr-x
    pub fn directory() -> Self {
        Self::S_IFDIR
            | Self::S_IRUSR
            | Self::S_IWUSR
            | Self::S_IXUSR
            | Self::S_IRGRP
            | Self::S_IXGRP
            | Self::S_IROTH
            | Self::S_IXOTH
    }
}

/// Per-file metadata record.
///
/// A file owns at most `INODE_DIRECT_COUNT` data blocks, listed in order in
/// `direct`; an entry of 0 means no block. While no block is assigned the
/// size stays 0. Once one is, bytes `[0, size)` of it hold file data and the
/// rest of the block is stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskInode {
    pub ino: u32,
    pub mode: InodeMode,
    pub nlink: u16,
    pub size: u32,
    pub direct: [u32; INODE_DIRECT_COUNT],
    pub atime: TimeSpec,
    pub mtime: TimeSpec,
    pub ctime: TimeSpec,
}

impl DiskInode {
    pub fn new(ino: u32, mode: InodeMode, now: TimeSpec) -> Self {
        Self {
            ino,
            mode,
            nlink: if mode.contains(InodeMode::S_IFDIR) { 2 } else { 1 },
            size: 0,
            direct: [UNALLOCATED; INODE_DIRECT_COUNT],
            atime: now,
            mtime: now,
            ctime: now,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.mode & InodeMode::S_IFMT == InodeMode::S_IFDIR
    }

    pub fn is_file(&self) -> bool {
        self.mode & InodeMode::S_IFMT == InodeMode::S_IFREG
    }

    /// The block holding the file's bytes, 0 if none yet.
    pub fn block_id(&self) -> u32 {
        self.direct[0]
    }

    pub fn is_allocated(&self) -> bool {
        self.block_id() != UNALLOCATED
    }

    /// Assigned data blocks in file order.
    pub fn data_blocks(&self) -> impl Iterator<Item = u32> + '_ {
        self.direct.iter().copied().take_while(|id| *id != UNALLOCATED)
    }

    /// Copy bytes starting at `*pos` into `dst`, stopping at end of file.
    ///
    /// Returns 0 for an empty file or when `*pos` is at or past the end. On
    /// success `*pos` moves forward by the returned count; a failed copy
    /// leaves it alone.
    pub fn read_at<S>(&self, pos: &mut usize, dst: &mut S, region: &DataRegion) -> FsResult<usize>
    where
        S: UserSink + ?Sized,
    {
        let size = self.size as usize;
        if !self.is_allocated() || *pos >= size {
            return Ok(0);
        }
        let len = core::cmp::min(dst.len(), size - *pos);
        let data_block = region.block(self.block_id())?;
        dst.copy_to_user(&data_block[*pos..*pos + len])?;
        trace!("ino {}: read {} bytes at {}", self.ino, len, *pos);
        *pos += len;
        Ok(len)
    }

    /// Copy bytes from `src` into the file at `*pos`.
    ///
    /// The first non-empty write assigns a block. A write is clipped to the
    /// end of the block, so the count returned may be short and the caller
    /// issues any follow-up itself. A position at or past the block end is
    /// rejected with `FileTooLarge` before any block is taken.
    ///
    /// If the copy from `src` fails, size, timestamps and `*pos` are left as
    /// they were, and a block assigned by this call goes back to `allocator`.
    ///
    /// The caller holds exclusive access to this inode for the whole call;
    /// two writers racing on one file would corrupt both data and size.
    pub fn write_at<S, A>(
        &mut self,
        pos: &mut usize,
        src: &S,
        region: &mut DataRegion,
        allocator: &mut A,
        clock: &dyn Clock,
    ) -> FsResult<usize>
    where
        S: UserSource + ?Sized,
        A: BlockAllocator + ?Sized,
    {
        let start = *pos;
        if start >= BLOCK_SZ {
            return Err(FsError::FileTooLarge);
        }
        if src.is_empty() {
            return Ok(0);
        }
        let (block_id, fresh) = if self.is_allocated() {
            (self.block_id(), false)
        } else {
            let block_id = allocator.alloc_block().ok_or_else(|| {
                warn!("ino {}: no free data block", self.ino);
                FsError::NoSpace
            })?;
            trace!("ino {}: assigned data block {}", self.ino, block_id);
            (block_id, true)
        };
        let release = |allocator: &mut A| {
            if fresh {
                warn!("ino {}: releasing data block {} after failed write", self.ino, block_id);
                allocator.dealloc_block(block_id);
            }
        };

        let len = core::cmp::min(src.len(), BLOCK_SZ - start);
        let data_block = match region.block_mut(block_id) {
            Ok(data_block) => data_block,
            Err(err) => {
                release(allocator);
                return Err(err);
            }
        };
        if let Err(err) = src.copy_to_kernel(&mut data_block[start..start + len]) {
            release(allocator);
            return Err(err);
        }
        let size = self.size as usize;
        if start > size {
            data_block[size..start].fill(0);
        }

        self.direct[0] = block_id;
        *pos = start + len;
        self.size = core::cmp::max(size, *pos) as u32;
        let now = clock.now();
        self.mtime = now;
        self.ctime = now;
        trace!("ino {}: wrote {} bytes at {}, size {}", self.ino, len, start, self.size);
        Ok(len)
    }

    pub fn decode(bytes: &[u8]) -> FsResult<Self> {
        if bytes.len() < DISK_INODE_SZ {
            return Err(FsError::InvalidImage);
        }
        let mut direct = [UNALLOCATED; INODE_DIRECT_COUNT];
        for (i, id) in direct.iter_mut().enumerate() {
            *id = get_u32(bytes, 12 + 4 * i);
        }
        let time_at = |i: usize| {
            let offset = TIMES_OFFSET + i * TIMESPEC_SZ;
            TimeSpec::new(get_i64(bytes, offset), get_u32(bytes, offset + 8))
        };
        let inode = Self {
            ino: get_u32(bytes, 0),
            mode: InodeMode::from_bits_truncate(get_u16(bytes, 4)),
            nlink: get_u16(bytes, 6),
            size: get_u32(bytes, 8),
            direct,
            atime: time_at(0),
            mtime: time_at(1),
            ctime: time_at(2),
        };
        if inode.size as usize > BLOCK_SZ || (!inode.is_allocated() && inode.size != 0) {
            return Err(FsError::InvalidImage);
        }
        Ok(inode)
    }

    pub fn encode(&self, bytes: &mut [u8]) {
        bytes[..DISK_INODE_SZ].fill(0);
        put(bytes, 0, &self.ino.to_le_bytes());
        put(bytes, 4, &self.mode.bits().to_le_bytes());
        put(bytes, 6, &self.nlink.to_le_bytes());
        put(bytes, 8, &self.size.to_le_bytes());
        for (i, id) in self.direct.iter().enumerate() {
            put(bytes, 12 + 4 * i, &id.to_le_bytes());
        }
        for (i, time) in [self.atime, self.mtime, self.ctime].iter().enumerate() {
            let offset = TIMES_OFFSET + i * TIMESPEC_SZ;
            put(bytes, offset, &time.sec.to_le_bytes());
            put(bytes, offset + 8, &time.nsec.to_le_bytes());
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirEntry {
    name: [u8; NAME_LENGTH_LIMIT + 1],
    inode_id: u32,
}

impl DirEntry {
    pub fn new(name: &str, inode_id: u32) -> FsResult<Self> {
        if name.is_empty() {
            return Err(FsError::InvalidArgument);
        }
        if name.len() > NAME_LENGTH_LIMIT {
            return Err(FsError::NameTooLong);
        }
        let mut bytes = [0u8; NAME_LENGTH_LIMIT + 1];
        bytes[..name.len()].copy_from_slice(name.as_bytes());
        Ok(Self {
            name: bytes,
            inode_id,
        })
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut name = [0u8; NAME_LENGTH_LIMIT + 1];
        name.copy_from_slice(&bytes[..NAME_LENGTH_LIMIT + 1]);
        Self {
            name,
            inode_id: get_u32(bytes, NAME_LENGTH_LIMIT + 1),
        }
    }

    pub fn as_bytes(&self) -> [u8; DIRENT_SZ] {
        let mut bytes = [0u8; DIRENT_SZ];
        put(&mut bytes, 0, &self.name);
        put(&mut bytes, NAME_LENGTH_LIMIT + 1, &self.inode_id.to_le_bytes());
        bytes
    }

    pub fn name(&self) -> FsResult<&str> {
        let len = self
            .name
            .iter()
            .position(|b| *b == 0)
            .unwrap_or(NAME_LENGTH_LIMIT + 1);
        core::str::from_utf8(&self.name[..len]).map_err(|_| FsError::InvalidImage)
    }

    pub fn inode_id(&self) -> u32 {
        self.inode_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{bitmap::Bitmap, time::ManualClock};
    use std::vec;

    struct Fixture {
        region: DataRegion,
        bitmap: Bitmap,
        clock: ManualClock,
        inode: DiskInode,
    }

    impl Fixture {
        fn new(blocks: u32) -> Self {
            let mut bitmap = Bitmap::new(blocks as usize);
            bitmap.reserve(0);
            Self {
                region: DataRegion::new(blocks),
                bitmap,
                clock: ManualClock::new(TimeSpec::new(100, 0)),
                inode: DiskInode::new(1, InodeMode::regular(), TimeSpec::ZERO),
            }
        }

        fn write(&mut self, pos: &mut usize, data: &[u8]) -> FsResult<usize> {
            self.inode
                .write_at(pos, data, &mut self.region, &mut self.bitmap, &self.clock)
        }

        fn read(&self, pos: &mut usize, len: usize) -> FsResult<vec::Vec<u8>> {
            let mut buf = vec![0u8; len];
            let n = self.inode.read_at(pos, &mut buf[..], &self.region)?;
            buf.truncate(n);
            Ok(buf)
        }
    }

    /// Counts allocator calls.
    struct CountingAllocator {
        inner: Bitmap,
        allocs: usize,
    }

    impl BlockAllocator for CountingAllocator {
        fn alloc_block(&mut self) -> Option<u32> {
            self.allocs += 1;
            self.inner.alloc_block()
        }

        fn dealloc_block(&mut self, id: u32) {
            self.inner.dealloc_block(id);
        }
    }

    /// A source whose copy always faults.
    struct FaultySource(usize);

    impl UserSource for FaultySource {
        fn len(&self) -> usize {
            self.0
        }

        fn copy_to_kernel(&self, _dst: &mut [u8]) -> FsResult<()> {
            Err(FsError::BadAddress)
        }
    }

    struct FaultySink(usize);

    impl UserSink for FaultySink {
        fn len(&self) -> usize {
            self.0
        }

        fn copy_to_user(&mut self, _src: &[u8]) -> FsResult<()> {
            Err(FsError::BadAddress)
        }
    }

    #[test]
    fn read_unallocated_is_eof() {
        let fx = Fixture::new(4);
        let mut pos = 0;
        assert!(fx.read(&mut pos, 16).unwrap().is_empty());
        assert_eq!(pos, 0);
    }

    #[test]
    fn read_at_size_is_eof() {
        let mut fx = Fixture::new(4);
        let mut pos = 0;
        fx.write(&mut pos, b"0123456789").unwrap();
        let mut pos = 10;
        assert!(fx.read(&mut pos, 1000).unwrap().is_empty());
        assert_eq!(pos, 10);
        let mut pos = 4000;
        assert!(fx.read(&mut pos, 1).unwrap().is_empty());
    }

    #[test]
    fn read_clamps_to_size() {
        let mut fx = Fixture::new(4);
        let mut pos = 0;
        fx.write(&mut pos, b"0123456789").unwrap();
        let mut pos = 5;
        assert_eq!(fx.read(&mut pos, 100).unwrap(), b"56789");
        assert_eq!(pos, 10);
    }

    #[test]
    fn write_allocates_once() {
        let mut inner = Bitmap::new(8);
        inner.reserve(0);
        let mut allocator = CountingAllocator { inner, allocs: 0 };
        let mut region = DataRegion::new(8);
        let clock = ManualClock::new(TimeSpec::ZERO);
        let mut inode = DiskInode::new(3, InodeMode::regular(), TimeSpec::ZERO);

        assert_eq!(inode.data_blocks().count(), 0);
        let mut pos = 0;
        inode
            .write_at(&mut pos, &b"abc"[..], &mut region, &mut allocator, &clock)
            .unwrap();
        assert_eq!(allocator.allocs, 1);
        let first = inode.block_id();
        assert_ne!(first, 0);
        assert_eq!(inode.data_blocks().collect::<vec::Vec<_>>(), vec![first]);
        for _ in 0..3 {
            inode
                .write_at(&mut pos, &b"def"[..], &mut region, &mut allocator, &clock)
                .unwrap();
        }
        assert_eq!(allocator.allocs, 1);
        assert_eq!(inode.block_id(), first);
        assert_eq!(inode.size, 12);
    }

    #[test]
    fn write_clips_to_block() {
        let mut fx = Fixture::new(4);
        let mut pos = 4000;
        assert_eq!(fx.write(&mut pos, &[1u8; 200]).unwrap(), 96);
        assert_eq!(pos, BLOCK_SZ);
        assert_eq!(fx.inode.size as usize, BLOCK_SZ);
    }

    #[test]
    fn write_at_block_end_is_rejected_without_allocating() {
        let mut fx = Fixture::new(4);
        let free = fx.bitmap.free();
        let mut pos = BLOCK_SZ;
        assert_eq!(fx.write(&mut pos, b"x"), Err(FsError::FileTooLarge));
        assert_eq!(pos, BLOCK_SZ);
        assert!(!fx.inode.is_allocated());
        assert_eq!(fx.bitmap.free(), free);

        let mut pos = BLOCK_SZ + 10;
        assert_eq!(fx.write(&mut pos, b"x"), Err(FsError::FileTooLarge));
    }

    #[test]
    fn size_never_shrinks() {
        let mut fx = Fixture::new(4);
        let mut pos = 0;
        fx.write(&mut pos, &[b'a'; 100]).unwrap();
        let mut pos = 10;
        assert_eq!(fx.write(&mut pos, b"bbbbb").unwrap(), 5);
        assert_eq!(fx.inode.size, 100);
        assert_eq!(pos, 15);
        let mut pos = 8;
        assert_eq!(fx.read(&mut pos, 9).unwrap(), b"aabbbbbaa");
    }

    #[test]
    fn write_updates_times() {
        let mut fx = Fixture::new(4);
        let mut pos = 0;
        fx.write(&mut pos, b"hello").unwrap();
        assert_eq!(fx.inode.mtime, TimeSpec::new(100, 0));
        assert_eq!(fx.inode.ctime, fx.inode.mtime);
        fx.write(&mut pos, b"!").unwrap();
        assert!(fx.inode.mtime > TimeSpec::new(100, 0));
        assert_eq!(fx.inode.atime, TimeSpec::ZERO);
    }

    #[test]
    fn fault_leaves_state_untouched() {
        let mut fx = Fixture::new(4);
        let mut pos = 0;
        fx.write(&mut pos, b"hello").unwrap();
        let before = fx.inode;

        let mut pos = 3;
        let err = fx
            .inode
            .write_at(&mut pos, &FaultySource(10), &mut fx.region, &mut fx.bitmap, &fx.clock);
        assert_eq!(err, Err(FsError::BadAddress));
        assert_eq!(pos, 3);
        assert_eq!(fx.inode, before);

        let mut pos = 1;
        let err = fx.inode.read_at(&mut pos, &mut FaultySink(2), &fx.region);
        assert_eq!(err, Err(FsError::BadAddress));
        assert_eq!(pos, 1);
    }

    #[test]
    fn fault_on_first_write_returns_block() {
        let mut fx = Fixture::new(4);
        let free = fx.bitmap.free();
        let mut pos = 0;
        let err = fx
            .inode
            .write_at(&mut pos, &FaultySource(8), &mut fx.region, &mut fx.bitmap, &fx.clock);
        assert_eq!(err, Err(FsError::BadAddress));
        assert!(!fx.inode.is_allocated());
        assert_eq!(fx.inode.size, 0);
        assert_eq!(fx.bitmap.free(), free);
    }

    #[test]
    fn no_space_leaves_inode_unallocated() {
        let mut fx = Fixture::new(2);
        fx.bitmap.reserve(1);
        let mut pos = 0;
        assert_eq!(fx.write(&mut pos, b"data"), Err(FsError::NoSpace));
        assert!(!fx.inode.is_allocated());
        assert_eq!(fx.inode.size, 0);
        assert_eq!(pos, 0);
    }

    #[test]
    fn empty_write_allocates_nothing() {
        let mut fx = Fixture::new(4);
        let mut pos = 7;
        assert_eq!(fx.write(&mut pos, b""), Ok(0));
        assert!(!fx.inode.is_allocated());
        assert_eq!(fx.inode.size, 0);
        assert_eq!(fx.inode.mtime, TimeSpec::ZERO);
    }

    #[test]
    fn write_past_end_zero_fills_gap() {
        let mut fx = Fixture::new(4);
        fx.region.block_mut(1).unwrap().fill(0xee);
        let mut pos = 0;
        fx.write(&mut pos, b"ab").unwrap();
        let mut pos = 6;
        fx.write(&mut pos, b"cd").unwrap();
        assert_eq!(fx.inode.size, 8);
        let mut pos = 0;
        assert_eq!(fx.read(&mut pos, 8).unwrap(), b"ab\0\0\0\0cd");
    }

    #[test]
    fn random_round_trip() {
        use rand::Rng;
        let mut rng = rand::thread_rng();
        for _ in 0..32 {
            let mut fx = Fixture::new(4);
            let start = rng.gen_range(0..BLOCK_SZ);
            let len = rng.gen_range(1..=BLOCK_SZ - start);
            let data: vec::Vec<u8> = (0..len).map(|_| rng.gen()).collect();
            let mut pos = start;
            assert_eq!(fx.write(&mut pos, &data).unwrap(), len);
            let mut pos = start;
            assert_eq!(fx.read(&mut pos, len).unwrap(), data);
        }
    }

    #[test]
    fn inode_encoding_survives_reload() {
        let mut fx = Fixture::new(4);
        let mut pos = 0;
        fx.write(&mut pos, b"persist").unwrap();
        let mut raw = [0u8; DISK_INODE_SZ];
        fx.inode.encode(&mut raw);
        assert_eq!(DiskInode::decode(&raw).unwrap(), fx.inode);
    }

    #[test]
    fn decode_rejects_size_without_block() {
        let mut inode = DiskInode::new(2, InodeMode::regular(), TimeSpec::ZERO);
        inode.size = 4;
        let mut raw = [0u8; DISK_INODE_SZ];
        inode.encode(&mut raw);
        assert_eq!(DiskInode::decode(&raw), Err(FsError::InvalidImage));
    }

    #[test]
    fn dir_entry_names() {
        let entry = DirEntry::new("hello.txt", 9).unwrap();
        let decoded = DirEntry::from_bytes(&entry.as_bytes());
        assert_eq!(decoded.name().unwrap(), "hello.txt");
        assert_eq!(decoded.inode_id(), 9);
        assert_eq!(
            DirEntry::new(&"x".repeat(NAME_LENGTH_LIMIT + 1), 1),
            Err(FsError::NameTooLong)
        );
        assert_eq!(DirEntry::new("", 1), Err(FsError::InvalidArgument));
        assert!(DirEntry::new(&"y".repeat(NAME_LENGTH_LIMIT), 1).is_ok());
    }
}
