#![cfg_attr(not(test), no_std)]

extern crate alloc;

mod bitmap;
mod block_dev;
mod buffer;
pub mod config;
mod error;
mod file;
mod layout;
mod region;
mod time;
mod vfs;
mod volume;

pub use bitmap::{Bitmap, BlockAllocator};
pub use block_dev::{BlockDevice, RamDisk};
pub use buffer::{UserBuffer, UserSink, UserSource};
pub use config::{VolumeConfig, BLOCK_SZ};
pub use error::{FsError, FsResult};
pub use file::{open_file, OpenFile, OpenFlags, SeekWhence};
pub use layout::{DirEntry, DiskInode, InodeMode, INODE_DIRECT_COUNT};
pub use region::DataRegion;
pub use time::{Clock, ManualClock, TimeSpec};
pub use vfs::Inode;
pub use volume::{Volume, VolumeStat, ROOT_INODE_ID};
