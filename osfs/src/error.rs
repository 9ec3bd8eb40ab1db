//! Filesystem error type
//!
//! Every fallible operation returns [`FsResult`]. [`FsError::to_errno()`]
//! gives the negative POSIX code a syscall layer would hand back.

use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    // data path
    BadAddress,   // -EFAULT(14): copy to/from the caller buffer failed
    NoSpace,      // -ENOSPC(28): no free block, inode or directory slot
    FileTooLarge, // -EFBIG(27): write position at or past block capacity

    // names
    NotFound,      // -ENOENT(2)
    AlreadyExists, // -EEXIST(17)
    NameTooLong,   // -ENAMETOOLONG(36)

    // inode kind
    NotDirectory, // -ENOTDIR(20)
    IsDirectory,  // -EISDIR(21)

    // session
    PermissionDenied, // -EACCES(13)
    InvalidArgument,  // -EINVAL(22)

    // volume
    InvalidImage, // -EINVAL(22): bad superblock or geometry
    IoError,      // -EIO(5)
}

pub type FsResult<T> = Result<T, FsError>;

impl FsError {
    pub fn to_errno(&self) -> isize {
        match self {
            FsError::NotFound => -2,
            FsError::IoError => -5,
            FsError::PermissionDenied => -13,
            FsError::BadAddress => -14,
            FsError::AlreadyExists => -17,
            FsError::NotDirectory => -20,
            FsError::IsDirectory => -21,
            FsError::InvalidArgument | FsError::InvalidImage => -22,
            FsError::FileTooLarge => -27,
            FsError::NoSpace => -28,
            FsError::NameTooLong => -36,
        }
    }
}

impl fmt::Display for FsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            FsError::BadAddress => "bad address",
            FsError::NoSpace => "no space left on volume",
            FsError::FileTooLarge => "file too large",
            FsError::NotFound => "no such file",
            FsError::AlreadyExists => "file exists",
            FsError::NameTooLong => "file name too long",
            FsError::NotDirectory => "not a directory",
            FsError::IsDirectory => "is a directory",
            FsError::PermissionDenied => "permission denied",
            FsError::InvalidArgument => "invalid argument",
            FsError::InvalidImage => "not an osfs image",
            FsError::IoError => "i/o error",
        };
        f.write_str(msg)
    }
}
