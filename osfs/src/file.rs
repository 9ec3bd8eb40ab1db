//! Open-file sessions over regular files.

use crate::{
    buffer::{UserSink, UserSource},
    vfs::Inode,
    FsError, FsResult,
};
use alloc::sync::Arc;
use bitflags::bitflags;
use spin::Mutex;

bitflags! {
    pub struct OpenFlags: u32 {
        const RDONLY = 0;
        const WRONLY = 1 << 0;
        const RDWR = 1 << 1;
        const CREATE = 1 << 9;
        const APPEND = 1 << 10;
    }
}

impl OpenFlags {
    /// Only the access mode bits matter here.
    /// Return (readable, writable)
    pub fn read_write(&self) -> (bool, bool) {
        let access = *self & (Self::WRONLY | Self::RDWR);
        if access.is_empty() {
            (true, false)
        } else if access == Self::WRONLY {
            (false, true)
        } else {
            (true, true)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekWhence {
    Set,
    Cur,
    End,
}

/// A regular file opened for reading and/or writing.
///
/// The cursor is shared by every holder of the session and is locked for the
/// length of each call, so calls through one session never interleave.
pub struct OpenFile {
    readable: bool,
    writable: bool,
    append: bool,
    pos: Mutex<usize>,
    inode: Arc<Inode>,
}

impl OpenFile {
    pub fn new(inode: Arc<Inode>, flags: OpenFlags) -> Self {
        let (readable, writable) = flags.read_write();
        Self {
            readable,
            writable,
            append: flags.contains(OpenFlags::APPEND),
            pos: Mutex::new(0),
            inode,
        }
    }

    pub fn readable(&self) -> bool {
        self.readable
    }

    pub fn writable(&self) -> bool {
        self.writable
    }

    pub fn inode(&self) -> Arc<Inode> {
        self.inode.clone()
    }

    pub fn offset(&self) -> usize {
        *self.pos.lock()
    }

    /// Read into `dst` from the cursor; 0 means end of file.
    pub fn read<S>(&self, dst: &mut S) -> FsResult<usize>
    where
        S: UserSink + ?Sized,
    {
        if !self.readable {
            return Err(FsError::PermissionDenied);
        }
        let mut pos = self.pos.lock();
        self.inode.read(&mut *pos, dst)
    }

    /// Write `src` at the cursor, or at end of file for `APPEND` sessions.
    /// The count returned may be less than `src.len()`. The append offset is
    /// not atomic across sessions: two appenders may both land on the same
    /// end of file.
    pub fn write<S>(&self, src: &S) -> FsResult<usize>
    where
        S: UserSource + ?Sized,
    {
        if !self.writable {
            return Err(FsError::PermissionDenied);
        }
        let mut pos = self.pos.lock();
        if self.append {
            *pos = self.inode.size()?;
        }
        self.inode.write(&mut *pos, src)
    }

    pub fn seek(&self, offset: isize, whence: SeekWhence) -> FsResult<usize> {
        let mut pos = self.pos.lock();
        let base = match whence {
            SeekWhence::Set => 0,
            SeekWhence::Cur => *pos as isize,
            SeekWhence::End => self.inode.size()? as isize,
        };
        let new_pos = base.checked_add(offset).ok_or(FsError::InvalidArgument)?;
        if new_pos < 0 {
            return Err(FsError::InvalidArgument);
        }
        *pos = new_pos as usize;
        Ok(*pos)
    }
}

/// Open `name` in directory `dir`, creating it when `CREATE` is given and it
/// does not exist yet.
pub fn open_file(dir: &Inode, name: &str, flags: OpenFlags) -> FsResult<Arc<OpenFile>> {
    let inode = match dir.find(name)? {
        Some(inode) => inode,
        None if flags.contains(OpenFlags::CREATE) => dir.create(name)?,
        None => return Err(FsError::NotFound),
    };
    if inode.metadata()?.is_dir() {
        return Err(FsError::IsDirectory);
    }
    Ok(Arc::new(OpenFile::new(inode, flags)))
}
