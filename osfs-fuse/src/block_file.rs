use osfs::{BlockDevice, FsError, FsResult, BLOCK_SZ};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::sync::Mutex;

/// A host file used as a block device.
pub struct BlockFile(pub Mutex<File>);

impl BlockFile {
    fn seek_to(file: &mut File, block_id: usize) -> FsResult<()> {
        file.seek(SeekFrom::Start((block_id * BLOCK_SZ) as u64))
            .map(|_| ())
            .map_err(|_| FsError::IoError)
    }
}

impl BlockDevice for BlockFile {
    fn read_block(&self, block_id: usize, buf: &mut [u8]) -> FsResult<()> {
        let mut file = self.0.lock().map_err(|_| FsError::IoError)?;
        Self::seek_to(&mut file, block_id)?;
        file.read_exact(buf).map_err(|_| FsError::IoError)
    }

    fn write_block(&self, block_id: usize, buf: &[u8]) -> FsResult<()> {
        let mut file = self.0.lock().map_err(|_| FsError::IoError)?;
        Self::seek_to(&mut file, block_id)?;
        file.write_all(buf).map_err(|_| FsError::IoError)
    }
}
