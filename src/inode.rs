//! On-disk inode record and inode-table access by inode number.

use std::io;
use std::mem::size_of;
use std::time::{SystemTime, UNIX_EPOCH};

use static_assertions::const_assert_eq;
use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::device::BlockDevice;
use crate::error::{Error, Result};
use crate::layout::{Superblock, BLOCK_SIZE, NDIRECT, NINDIRECT_BLOCKS};

pub const INODE_RECORD_SIZE: usize = 80;

pub const MODE_DIR: u32 = 0o040000;
pub const MODE_REGULAR: u32 = 0o100000;

#[repr(C)]
#[derive(Clone, Copy, AsBytes, FromBytes, FromZeroes)]
pub struct RawInode {
    pub size: u32,
    pub atime: u32,
    pub mtime: u32,
    pub ctime: u32,
    pub mode: u32,
    pub direct: [u32; NDIRECT],
    pub indirect: [u32; NINDIRECT_BLOCKS],
    pub reserved: u32,
}

const_assert_eq!(size_of::<RawInode>(), INODE_RECORD_SIZE);

impl Default for RawInode {
    fn default() -> Self {
        RawInode {
            size: 0,
            atime: 0,
            mtime: 0,
            ctime: 0,
            mode: 0,
            direct: [0; NDIRECT],
            indirect: [0; NINDIRECT_BLOCKS],
            reserved: 0,
        }
    }
}

impl RawInode {
    pub fn is_free(&self) -> bool {
        self.mode == 0
    }

    pub fn is_dir(&self) -> bool {
        self.mode & MODE_DIR != 0
    }

    pub fn new_dir(now: u32) -> Self {
        RawInode {
            mode: MODE_DIR,
            atime: now,
            mtime: now,
            ctime: now,
            ..Default::default()
        }
    }

    pub fn new_file(now: u32) -> Self {
        RawInode {
            mode: MODE_REGULAR,
            atime: now,
            mtime: now,
            ctime: now,
            ..Default::default()
        }
    }
}

/// Current time as whole seconds since the epoch, the resolution the
/// on-disk timestamp fields carry.
pub fn now_secs() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}

/// Block containing inode `n`, and `n`'s byte offset within that block.
fn locate(superblock: &Superblock, n: u32) -> (u32, usize) {
    let per_block = BLOCK_SIZE / INODE_RECORD_SIZE;
    let block = superblock.inode_table_start() + n / per_block as u32;
    let offset = (n as usize % per_block) * INODE_RECORD_SIZE;
    (block, offset)
}

pub fn read_inode<D: BlockDevice>(
    device: &mut D,
    superblock: &Superblock,
    n: u32,
) -> Result<RawInode> {
    if n >= superblock.inode_count {
        return Err(Error::InvalidArgument);
    }
    let (block, offset) = locate(superblock, n);
    let mut buf = [0u8; BLOCK_SIZE];
    device.read_block(block, &mut buf)?;
    RawInode::read_from_prefix(&buf[offset..offset + INODE_RECORD_SIZE])
        .ok_or_else(|| Error::Io(io::Error::new(io::ErrorKind::InvalidData, "short inode read")))
}

pub fn write_inode<D: BlockDevice>(
    device: &mut D,
    superblock: &Superblock,
    n: u32,
    inode: &RawInode,
) -> Result<()> {
    if n >= superblock.inode_count {
        return Err(Error::InvalidArgument);
    }
    let (block, offset) = locate(superblock, n);
    let mut buf = [0u8; BLOCK_SIZE];
    device.read_block(block, &mut buf)?;
    buf[offset..offset + INODE_RECORD_SIZE].copy_from_slice(inode.as_bytes());
    device.write_block(block, &buf)?;
    Ok(())
}
