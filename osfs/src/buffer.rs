//! Byte transport between caller buffers and volume storage.
//!
//! The data path never touches caller memory directly: it asks a
//! [`UserSource`] to fill a kernel-side slice, or a [`UserSink`] to accept
//! one. Either side may refuse with [`FsError::BadAddress`].

use crate::{FsError, FsResult};
use alloc::vec::Vec;

/// Caller memory the filesystem reads from (the source of a write).
pub trait UserSource {
    fn len(&self) -> usize;

    /// Copy the first `dst.len()` bytes of the buffer into `dst`.
    fn copy_to_kernel(&self, dst: &mut [u8]) -> FsResult<()>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Caller memory the filesystem writes into (the destination of a read).
pub trait UserSink {
    fn len(&self) -> usize;

    /// Copy `src` into the first `src.len()` bytes of the buffer.
    fn copy_to_user(&mut self, src: &[u8]) -> FsResult<()>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl UserSource for [u8] {
    fn len(&self) -> usize {
        <[u8]>::len(self)
    }

    fn copy_to_kernel(&self, dst: &mut [u8]) -> FsResult<()> {
        let src = self.get(..dst.len()).ok_or(FsError::BadAddress)?;
        dst.copy_from_slice(src);
        Ok(())
    }
}

impl UserSink for [u8] {
    fn len(&self) -> usize {
        <[u8]>::len(self)
    }

    fn copy_to_user(&mut self, src: &[u8]) -> FsResult<()> {
        let dst = self.get_mut(..src.len()).ok_or(FsError::BadAddress)?;
        dst.copy_from_slice(src);
        Ok(())
    }
}

/// A caller buffer split over several fragments, e.g. one per mapped page.
pub struct UserBuffer<'a> {
    pub buffers: Vec<&'a mut [u8]>,
}

impl<'a> UserBuffer<'a> {
    pub fn new(buffers: Vec<&'a mut [u8]>) -> Self {
        Self { buffers }
    }
}

impl UserSource for UserBuffer<'_> {
    fn len(&self) -> usize {
        self.buffers.iter().map(|b| b.len()).sum()
    }

    fn copy_to_kernel(&self, dst: &mut [u8]) -> FsResult<()> {
        if dst.len() > UserSource::len(self) {
            return Err(FsError::BadAddress);
        }
        let mut copied = 0;
        for buffer in self.buffers.iter() {
            if copied == dst.len() {
                break;
            }
            let n = core::cmp::min(buffer.len(), dst.len() - copied);
            dst[copied..copied + n].copy_from_slice(&buffer[..n]);
            copied += n;
        }
        Ok(())
    }
}

impl UserSink for UserBuffer<'_> {
    fn len(&self) -> usize {
        self.buffers.iter().map(|b| b.len()).sum()
    }

    fn copy_to_user(&mut self, src: &[u8]) -> FsResult<()> {
        if src.len() > UserSink::len(self) {
            return Err(FsError::BadAddress);
        }
        let mut copied = 0;
        for buffer in self.buffers.iter_mut() {
            if copied == src.len() {
                break;
            }
            let n = core::cmp::min(buffer.len(), src.len() - copied);
            buffer[..n].copy_from_slice(&src[copied..copied + n]);
            copied += n;
        }
        Ok(())
    }
}
