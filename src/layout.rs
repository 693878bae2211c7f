//! Disk layout: the fixed partitioning of the block device into superblock,
//! bitmaps, inode table, and data region, plus the on-disk superblock record
//! itself.

use std::io;
use std::mem::size_of;

use static_assertions::const_assert_eq;
use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::device::BlockDevice;
use crate::error::{Error, Result};

/// Block size in bytes.
pub const BLOCK_SIZE: usize = 4096;

/// Magic number stamped into every freshly formatted superblock.
pub const FS_MAGIC: u32 = 0x50_49_4e_41; // "PINA"

/// Number of direct block pointers per inode.
pub const NDIRECT: usize = 12;
/// Number of singly-indirect block pointers per inode.
pub const NINDIRECT_BLOCKS: usize = 2;
/// Block indices per indirect block (each index is a little-endian u32).
pub const NINDIRECT_PER_BLOCK: usize = BLOCK_SIZE / size_of::<u32>();

/// Maximum file size addressable by direct + indirect pointers.
pub const MAX_FILE_SIZE: u64 =
    ((NDIRECT + NINDIRECT_BLOCKS * NINDIRECT_PER_BLOCK) * BLOCK_SIZE) as u64;

/// Fixed block indices.
pub const SUPERBLOCK_INDEX: u32 = 0;
pub const INODE_BITMAP_INDEX: u32 = 1;
pub const DATA_BITMAP_START: u32 = 2;
pub const DATA_BITMAP_BLOCKS: u32 = 2;
pub const INODE_TABLE_START: u32 = DATA_BITMAP_START + DATA_BITMAP_BLOCKS;

/// One inode-bitmap block, 8 bits per byte: the inode count this layout
/// supports is fixed by that single block.
pub const INODE_COUNT: u32 = (BLOCK_SIZE * 8) as u32;

/// Two data-bitmap blocks fix the maximum addressable data-block count.
pub const MAX_DATA_BLOCKS: u32 = DATA_BITMAP_BLOCKS * (BLOCK_SIZE * 8) as u32;

pub const ROOT_INODE: u32 = 0;

const_assert_eq!(BLOCK_SIZE % size_of::<u32>(), 0);

#[repr(C)]
#[derive(Clone, Copy, AsBytes, FromBytes, FromZeroes)]
pub struct RawSuperblock {
    pub magic: u32,
    pub inode_count: u32,
    pub data_block_count: u32,
    pub inode_table_blocks: u32,
    pub data_bitmap_blocks: u32,
    pub first_data_block: u32,
}

const_assert_eq!(size_of::<RawSuperblock>(), 24);

/// Number of blocks needed to hold `INODE_COUNT` fixed-size inode records.
pub fn inode_table_blocks(inode_record_size: usize) -> u32 {
    let per_block = BLOCK_SIZE / inode_record_size;
    ((INODE_COUNT as usize + per_block - 1) / per_block) as u32
}

#[derive(Clone, Copy)]
pub struct Superblock {
    pub inode_count: u32,
    pub data_block_count: u32,
    pub inode_table_blocks: u32,
    pub data_bitmap_blocks: u32,
    pub first_data_block: u32,
}

impl Superblock {
    pub fn new(total_blocks: u32, inode_record_size: usize) -> Result<Self> {
        let inode_table_blocks = inode_table_blocks(inode_record_size);
        let first_data_block = INODE_TABLE_START + inode_table_blocks;
        if total_blocks <= first_data_block {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                "device too small to hold the fixed metadata layout",
            )));
        }
        let data_block_count = (total_blocks - first_data_block).min(MAX_DATA_BLOCKS);
        Ok(Self {
            inode_count: INODE_COUNT,
            data_block_count,
            inode_table_blocks,
            data_bitmap_blocks: DATA_BITMAP_BLOCKS,
            first_data_block,
        })
    }

    pub fn read<D: BlockDevice>(device: &mut D) -> Result<Self> {
        let mut buf = [0u8; BLOCK_SIZE];
        device.read_block(SUPERBLOCK_INDEX, &mut buf)?;
        let raw = RawSuperblock::read_from_prefix(&buf[..])
            .ok_or_else(|| Error::Io(io::Error::new(io::ErrorKind::InvalidData, "short read")))?;
        if raw.magic != FS_MAGIC {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::InvalidData,
                "bad superblock magic",
            )));
        }
        Ok(Self {
            inode_count: raw.inode_count,
            data_block_count: raw.data_block_count,
            inode_table_blocks: raw.inode_table_blocks,
            data_bitmap_blocks: raw.data_bitmap_blocks,
            first_data_block: raw.first_data_block,
        })
    }

    pub fn write<D: BlockDevice>(&self, device: &mut D) -> Result<()> {
        let raw = RawSuperblock {
            magic: FS_MAGIC,
            inode_count: self.inode_count,
            data_block_count: self.data_block_count,
            inode_table_blocks: self.inode_table_blocks,
            data_bitmap_blocks: self.data_bitmap_blocks,
            first_data_block: self.first_data_block,
        };
        let mut buf = [0u8; BLOCK_SIZE];
        buf[..size_of::<RawSuperblock>()].copy_from_slice(raw.as_bytes());
        device.write_block(SUPERBLOCK_INDEX, &buf)?;
        Ok(())
    }

    pub fn inode_table_start(&self) -> u32 {
        INODE_TABLE_START
    }
}
