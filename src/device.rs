//! Block device abstraction. Every higher layer reads and writes whole,
//! fixed-size blocks addressed by index; this is the only module that talks
//! to the backing storage directly.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::layout::BLOCK_SIZE;

pub trait BlockDevice {
    fn read_block(&mut self, index: u32, buf: &mut [u8; BLOCK_SIZE]) -> io::Result<()>;
    fn write_block(&mut self, index: u32, buf: &[u8; BLOCK_SIZE]) -> io::Result<()>;

    /// Total number of addressable blocks backing this device.
    fn block_count(&self) -> u32;
}

/// A block device backed by a regular file on the host filesystem.
pub struct FileBlockDevice {
    file: File,
    block_count: u32,
}

impl FileBlockDevice {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let len = file.metadata()?.len();
        let block_count = (len / BLOCK_SIZE as u64) as u32;
        Ok(Self { file, block_count })
    }

    /// Creates (or truncates) a backing file of exactly `size_bytes`, rounded
    /// down to a whole number of blocks.
    pub fn create(path: &Path, size_bytes: u64) -> io::Result<Self> {
        let block_count = (size_bytes / BLOCK_SIZE as u64) as u32;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len(block_count as u64 * BLOCK_SIZE as u64)?;
        Ok(Self { file, block_count })
    }

    fn seek_to(&mut self, index: u32) -> io::Result<()> {
        self.file
            .seek(SeekFrom::Start(index as u64 * BLOCK_SIZE as u64))?;
        Ok(())
    }
}

impl BlockDevice for FileBlockDevice {
    fn read_block(&mut self, index: u32, buf: &mut [u8; BLOCK_SIZE]) -> io::Result<()> {
        self.seek_to(index)?;
        self.file.read_exact(buf)
    }

    fn write_block(&mut self, index: u32, buf: &[u8; BLOCK_SIZE]) -> io::Result<()> {
        self.seek_to(index)?;
        self.file.write_all(buf)?;
        self.file.flush()
    }

    fn block_count(&self) -> u32 {
        self.block_count
    }
}

/// An in-memory block device, used by unit tests that exercise the core
/// algorithms without touching a real file.
pub struct MemBlockDevice {
    blocks: Vec<[u8; BLOCK_SIZE]>,
}

impl MemBlockDevice {
    pub fn new(block_count: u32) -> Self {
        Self {
            blocks: vec![[0u8; BLOCK_SIZE]; block_count as usize],
        }
    }
}

impl BlockDevice for MemBlockDevice {
    fn read_block(&mut self, index: u32, buf: &mut [u8; BLOCK_SIZE]) -> io::Result<()> {
        let block = self.blocks.get(index as usize).ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "block index out of range")
        })?;
        buf.copy_from_slice(block);
        Ok(())
    }

    fn write_block(&mut self, index: u32, buf: &[u8; BLOCK_SIZE]) -> io::Result<()> {
        let block = self.blocks.get_mut(index as usize).ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "block index out of range")
        })?;
        block.copy_from_slice(buf);
        Ok(())
    }

    fn block_count(&self) -> u32 {
        self.blocks.len() as u32
    }
}
