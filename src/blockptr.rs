//! Maps a file-relative block index to an absolute data-block index via
//! direct pointers or one of the two singly-indirect index blocks.

use crate::bitmap;
use crate::device::BlockDevice;
use crate::error::{Error, Result};
use crate::inode::RawInode;
use crate::layout::{Superblock, BLOCK_SIZE, NDIRECT, NINDIRECT_BLOCKS, NINDIRECT_PER_BLOCK};

fn read_indices<D: BlockDevice>(device: &mut D, block: u32) -> Result<[u32; NINDIRECT_PER_BLOCK]> {
    let mut buf = [0u8; BLOCK_SIZE];
    device.read_block(block, &mut buf)?;
    let mut indices = [0u32; NINDIRECT_PER_BLOCK];
    for (i, chunk) in buf.chunks_exact(4).enumerate() {
        indices[i] = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }
    Ok(indices)
}

fn write_indices<D: BlockDevice>(
    device: &mut D,
    block: u32,
    indices: &[u32; NINDIRECT_PER_BLOCK],
) -> Result<()> {
    let mut buf = [0u8; BLOCK_SIZE];
    for (i, v) in indices.iter().enumerate() {
        buf[i * 4..i * 4 + 4].copy_from_slice(&v.to_le_bytes());
    }
    device.write_block(block, &buf)?;
    Ok(())
}

/// Resolves file-relative block index `j` to an absolute data-block index,
/// without allocating. Returns 0 (a hole) where no block has been assigned.
pub fn bmap<D: BlockDevice>(
    device: &mut D,
    _superblock: &Superblock,
    inode: &RawInode,
    j: u64,
) -> Result<u32> {
    if j < NDIRECT as u64 {
        return Ok(inode.direct[j as usize]);
    }
    let j = j - NDIRECT as u64;
    let group = (j / NINDIRECT_PER_BLOCK as u64) as usize;
    let slot = (j % NINDIRECT_PER_BLOCK as u64) as usize;
    if group >= NINDIRECT_BLOCKS {
        return Err(Error::FileTooLarge);
    }
    let indirect_block = inode.indirect[group];
    if indirect_block == 0 {
        return Ok(0);
    }
    let indices = read_indices(device, indirect_block)?;
    Ok(indices[slot])
}

/// Like `bmap`, but allocates the indirect block and/or target data block
/// if either is missing, persisting the updated inode in place.
pub fn bmap_or_alloc<D: BlockDevice>(
    device: &mut D,
    superblock: &Superblock,
    inode: &mut RawInode,
    j: u64,
) -> Result<u32> {
    if j < NDIRECT as u64 {
        let slot = j as usize;
        if inode.direct[slot] == 0 {
            inode.direct[slot] = bitmap::alloc_data_block(device, superblock)?;
        }
        return Ok(inode.direct[slot]);
    }
    let j = j - NDIRECT as u64;
    let group = (j / NINDIRECT_PER_BLOCK as u64) as usize;
    let slot = (j % NINDIRECT_PER_BLOCK as u64) as usize;
    if group >= NINDIRECT_BLOCKS {
        return Err(Error::FileTooLarge);
    }
    if inode.indirect[group] == 0 {
        inode.indirect[group] = bitmap::alloc_data_block(device, superblock)?;
    }
    let indirect_block = inode.indirect[group];
    let mut indices = read_indices(device, indirect_block)?;
    if indices[slot] == 0 {
        indices[slot] = bitmap::alloc_data_block(device, superblock)?;
        write_indices(device, indirect_block, &indices)?;
    }
    Ok(indices[slot])
}

/// Frees every data block (and indirect blocks themselves) referenced by
/// `inode`, leaving all pointer fields zeroed.
pub fn free_all<D: BlockDevice>(
    device: &mut D,
    superblock: &Superblock,
    inode: &mut RawInode,
) -> Result<()> {
    for slot in inode.direct.iter_mut() {
        if *slot != 0 {
            bitmap::free_data_block(device, superblock, *slot)?;
            *slot = 0;
        }
    }
    for group in inode.indirect.iter_mut() {
        if *group != 0 {
            let indices = read_indices(device, *group)?;
            for index in indices.iter() {
                if *index != 0 {
                    bitmap::free_data_block(device, superblock, *index)?;
                }
            }
            bitmap::free_data_block(device, superblock, *group)?;
            *group = 0;
        }
    }
    Ok(())
}

/// Frees every block strictly beyond file-relative index `keep_below`,
/// and any indirect block whose every child becomes free. Used by truncate.
pub fn free_above<D: BlockDevice>(
    device: &mut D,
    superblock: &Superblock,
    inode: &mut RawInode,
    keep_blocks: u64,
) -> Result<()> {
    for (i, slot) in inode.direct.iter_mut().enumerate() {
        if i as u64 >= keep_blocks && *slot != 0 {
            bitmap::free_data_block(device, superblock, *slot)?;
            *slot = 0;
        }
    }
    for (g, group) in inode.indirect.iter_mut().enumerate() {
        if *group == 0 {
            continue;
        }
        let group_base = NDIRECT as u64 + g as u64 * NINDIRECT_PER_BLOCK as u64;
        let mut indices = read_indices(device, *group)?;
        let mut changed = false;
        for (s, index) in indices.iter_mut().enumerate() {
            let file_block = group_base + s as u64;
            if file_block >= keep_blocks && *index != 0 {
                bitmap::free_data_block(device, superblock, *index)?;
                *index = 0;
                changed = true;
            }
        }
        if changed {
            write_indices(device, *group, &indices)?;
        }
        if indices.iter().all(|v| *v == 0) {
            bitmap::free_data_block(device, superblock, *group)?;
            *group = 0;
        }
    }
    Ok(())
}
