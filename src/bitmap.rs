//! Bitmap allocator: two independent bit-vectors (inode bitmap, data-block
//! bitmap), each persisted in a fixed block range.

use crate::device::BlockDevice;
use crate::error::{Error, Result};
use crate::layout::{Superblock, BLOCK_SIZE, DATA_BITMAP_START, INODE_BITMAP_INDEX};

fn bit_block_and_pos(index: u32) -> (u32, usize, u8) {
    let bits_per_block = (BLOCK_SIZE * 8) as u32;
    let block_offset = index / bits_per_block;
    let bit_in_block = index % bits_per_block;
    (block_offset, (bit_in_block / 8) as usize, (bit_in_block % 8) as u8)
}

fn set_bit<D: BlockDevice>(device: &mut D, base_block: u32, index: u32) -> Result<()> {
    let (block_offset, byte, bit) = bit_block_and_pos(index);
    let mut buf = [0u8; BLOCK_SIZE];
    device.read_block(base_block + block_offset, &mut buf)?;
    buf[byte] |= 1 << bit;
    device.write_block(base_block + block_offset, &buf)?;
    Ok(())
}

fn clear_bit<D: BlockDevice>(device: &mut D, base_block: u32, index: u32) -> Result<()> {
    let (block_offset, byte, bit) = bit_block_and_pos(index);
    let mut buf = [0u8; BLOCK_SIZE];
    device.read_block(base_block + block_offset, &mut buf)?;
    debug_assert!(buf[byte] & (1 << bit) != 0, "freeing a bit that is already free");
    buf[byte] &= !(1 << bit);
    device.write_block(base_block + block_offset, &buf)?;
    Ok(())
}

/// Scans `count` bits starting at `base_block`, returns the index of the
/// first clear bit (without setting it).
fn find_first_clear<D: BlockDevice>(device: &mut D, base_block: u32, count: u32, blocks: u32) -> Result<Option<u32>> {
    let mut buf = [0u8; BLOCK_SIZE];
    for block_offset in 0..blocks {
        device.read_block(base_block + block_offset, &mut buf)?;
        for byte in 0..BLOCK_SIZE {
            if buf[byte] == 0xff {
                continue;
            }
            for bit in 0..8u32 {
                let index = block_offset * (BLOCK_SIZE * 8) as u32 + (byte as u32) * 8 + bit;
                if index >= count {
                    return Ok(None);
                }
                if buf[byte] & (1 << bit) == 0 {
                    return Ok(Some(index));
                }
            }
        }
    }
    Ok(None)
}

pub fn alloc_inode<D: BlockDevice>(device: &mut D, superblock: &Superblock) -> Result<u32> {
    let found = find_first_clear(device, INODE_BITMAP_INDEX, superblock.inode_count, 1)?
        .ok_or(Error::NoSpace)?;
    set_bit(device, INODE_BITMAP_INDEX, found)?;
    Ok(found)
}

pub fn free_inode<D: BlockDevice>(device: &mut D, n: u32) -> Result<()> {
    clear_bit(device, INODE_BITMAP_INDEX, n)
}

/// Allocates a data block, returning its absolute block index (already
/// offset by `first_data_block`), zero-filled.
pub fn alloc_data_block<D: BlockDevice>(device: &mut D, superblock: &Superblock) -> Result<u32> {
    let found = find_first_clear(
        device,
        DATA_BITMAP_START,
        superblock.data_block_count,
        superblock.data_bitmap_blocks,
    )?
    .ok_or(Error::NoSpace)?;
    set_bit(device, DATA_BITMAP_START, found)?;
    let absolute = superblock.first_data_block + found;
    device.write_block(absolute, &[0u8; BLOCK_SIZE])?;
    Ok(absolute)
}

pub fn free_data_block<D: BlockDevice>(device: &mut D, superblock: &Superblock, absolute: u32) -> Result<()> {
    let relative = absolute - superblock.first_data_block;
    clear_bit(device, DATA_BITMAP_START, relative)
}

pub fn count_free_data_blocks<D: BlockDevice>(device: &mut D, superblock: &Superblock) -> Result<u32> {
    let mut buf = [0u8; BLOCK_SIZE];
    let mut free = 0u32;
    for block_offset in 0..superblock.data_bitmap_blocks {
        device.read_block(DATA_BITMAP_START + block_offset, &mut buf)?;
        for index_in_block in 0..(BLOCK_SIZE * 8) as u32 {
            let index = block_offset * (BLOCK_SIZE * 8) as u32 + index_in_block;
            if index >= superblock.data_block_count {
                break;
            }
            let byte = (index_in_block / 8) as usize;
            let bit = (index_in_block % 8) as u8;
            if buf[byte] & (1 << bit) == 0 {
                free += 1;
            }
        }
    }
    Ok(free)
}

pub fn count_free_inodes<D: BlockDevice>(device: &mut D, superblock: &Superblock) -> Result<u32> {
    let mut buf = [0u8; BLOCK_SIZE];
    device.read_block(INODE_BITMAP_INDEX, &mut buf)?;
    let mut free = 0u32;
    for index in 0..superblock.inode_count {
        let byte = (index / 8) as usize;
        let bit = (index % 8) as u8;
        if buf[byte] & (1 << bit) == 0 {
            free += 1;
        }
    }
    Ok(free)
}
