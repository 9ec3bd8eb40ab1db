use crate::{
    buffer::{UserSink, UserSource},
    layout::{DirEntry, DiskInode, InodeMode, DIRENT_SZ},
    volume::Volume,
    FsError, FsResult, BLOCK_SZ,
};
use alloc::{string::String, sync::Arc, vec::Vec};
use log::debug;
use spin::Mutex;

/// Handle to one inode of a mounted volume.
///
/// Every operation takes the volume lock for its whole duration, which is
/// what gives the data path exclusive access to the inode it touches.
pub struct Inode {
    ino: u32,
    fs: Arc<Mutex<Volume>>,
}

impl Inode {
    pub fn new(ino: u32, fs: Arc<Mutex<Volume>>) -> Self {
        Self { ino, fs }
    }

    pub fn ino(&self) -> u32 {
        self.ino
    }

    pub fn metadata(&self) -> FsResult<DiskInode> {
        self.fs.lock().metadata(self.ino)
    }

    pub fn size(&self) -> FsResult<usize> {
        Ok(self.metadata()?.size as usize)
    }

    pub fn find(&self, name: &str) -> FsResult<Option<Arc<Inode>>> {
        let fs = self.fs.lock();
        let found = Self::dir_entries(&fs, self.ino)?
            .into_iter()
            .find(|entry| entry.name() == Ok(name))
            .map(|entry| Arc::new(Self::new(entry.inode_id(), self.fs.clone())));
        Ok(found)
    }

    pub fn create(&self, name: &str) -> FsResult<Arc<Inode>> {
        let mut fs = self.fs.lock();
        let entries = Self::dir_entries(&fs, self.ino)?;
        // validate the name before an inode is spent on it
        DirEntry::new(name, 0)?;
        if entries.iter().any(|entry| entry.name() == Ok(name)) {
            return Err(FsError::AlreadyExists);
        }
        let mut pos = entries.len() * DIRENT_SZ;
        if pos + DIRENT_SZ > BLOCK_SZ {
            return Err(FsError::NoSpace);
        }
        let ino = fs.alloc_inode(InodeMode::regular())?;
        let written = DirEntry::new(name, ino)
            .and_then(|dirent| fs.write(self.ino, &mut pos, &dirent.as_bytes()[..]));
        if let Err(err) = written {
            fs.dealloc_inode(ino);
            return Err(err);
        }
        debug!("osfs: created {} as inode {}", name, ino);
        Ok(Arc::new(Self::new(ino, self.fs.clone())))
    }

    pub fn ls(&self) -> FsResult<Vec<String>> {
        let fs = self.fs.lock();
        Self::dir_entries(&fs, self.ino)?
            .iter()
            .map(|entry| entry.name().map(String::from))
            .collect()
    }

    /// Read from `offset` without a session cursor.
    pub fn read_at(&self, offset: usize, buf: &mut [u8]) -> FsResult<usize> {
        let mut pos = offset;
        self.read(&mut pos, buf)
    }

    /// Write at `offset` without a session cursor. May be short.
    pub fn write_at(&self, offset: usize, buf: &[u8]) -> FsResult<usize> {
        let mut pos = offset;
        self.write(&mut pos, buf)
    }

    pub(crate) fn read<S>(&self, pos: &mut usize, dst: &mut S) -> FsResult<usize>
    where
        S: UserSink + ?Sized,
    {
        let fs = self.fs.lock();
        if fs.metadata(self.ino)?.is_dir() {
            return Err(FsError::IsDirectory);
        }
        fs.read(self.ino, pos, dst)
    }

    pub(crate) fn write<S>(&self, pos: &mut usize, src: &S) -> FsResult<usize>
    where
        S: UserSource + ?Sized,
    {
        let mut fs = self.fs.lock();
        if fs.metadata(self.ino)?.is_dir() {
            return Err(FsError::IsDirectory);
        }
        fs.write(self.ino, pos, src)
    }

    fn dir_entries(fs: &Volume, ino: u32) -> FsResult<Vec<DirEntry>> {
        let inode = fs.metadata(ino)?;
        if !inode.is_dir() {
            return Err(FsError::NotDirectory);
        }
        let mut raw = alloc::vec![0u8; inode.size as usize];
        let mut pos = 0;
        fs.read(ino, &mut pos, &mut raw[..])?;
        Ok(raw.chunks_exact(DIRENT_SZ).map(DirEntry::from_bytes).collect())
    }
}
