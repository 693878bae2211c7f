//! Directory store: scans, inserts, and removes fixed-size name/inode-number
//! entries within a directory's data blocks.

use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::blockptr;
use crate::device::BlockDevice;
use crate::error::{Error, Result};
use crate::inode::RawInode;
use crate::layout::{Superblock, BLOCK_SIZE};

/// Maximum filename length, excluding the NUL terminator. The name field is
/// one byte wider than strictly needed (24 + terminator), matching the
/// on-disk format's fixed 26-byte field.
pub const NAME_MAX: usize = 24;
const NAME_FIELD: usize = 26;

pub const ENTRY_SIZE: usize = NAME_FIELD + 4;
const ENTRIES_PER_BLOCK: usize = BLOCK_SIZE / ENTRY_SIZE;

#[repr(C, packed)]
#[derive(Clone, Copy, AsBytes, FromBytes, FromZeroes)]
pub struct RawDirent {
    pub name: [u8; NAME_FIELD],
    pub inode_num: u32,
}

impl RawDirent {
    fn empty() -> Self {
        RawDirent {
            name: [0; NAME_FIELD],
            inode_num: 0,
        }
    }

    fn matches(&self, name: &str) -> bool {
        self.inode_num != 0 && self.name_str() == name
    }

    fn name_str(&self) -> &str {
        let len = self.name.iter().position(|b| *b == 0).unwrap_or(NAME_FIELD);
        std::str::from_utf8(&self.name[..len]).unwrap_or("")
    }

    fn set_name(&mut self, name: &str) {
        self.name = [0; NAME_FIELD];
        self.name[..name.len()].copy_from_slice(name.as_bytes());
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > NAME_MAX {
        return Err(Error::NameTooLong);
    }
    Ok(())
}

/// One directory entry along with the byte offset it was found at, useful
/// for in-place rewrite.
pub struct Entry {
    pub name: String,
    pub inode_num: u32,
    pub offset: u64,
}

fn read_block_entries<D: BlockDevice>(
    device: &mut D,
    superblock: &Superblock,
    inode: &RawInode,
    file_block: u64,
) -> Result<[RawDirent; ENTRIES_PER_BLOCK]> {
    let absolute = blockptr::bmap(device, superblock, inode, file_block)?;
    let mut entries = [RawDirent::empty(); ENTRIES_PER_BLOCK];
    if absolute == 0 {
        return Ok(entries);
    }
    let mut buf = [0u8; BLOCK_SIZE];
    device.read_block(absolute, &mut buf)?;
    for (i, slot) in entries.iter_mut().enumerate() {
        let start = i * ENTRY_SIZE;
        *slot = RawDirent::read_from_prefix(&buf[start..start + ENTRY_SIZE])
            .expect("entry slice is exactly ENTRY_SIZE bytes");
    }
    Ok(entries)
}

fn write_block_entries<D: BlockDevice>(
    device: &mut D,
    superblock: &Superblock,
    inode: &mut RawInode,
    file_block: u64,
    entries: &[RawDirent; ENTRIES_PER_BLOCK],
) -> Result<()> {
    let absolute = blockptr::bmap_or_alloc(device, superblock, inode, file_block)?;
    let mut buf = [0u8; BLOCK_SIZE];
    for (i, entry) in entries.iter().enumerate() {
        let start = i * ENTRY_SIZE;
        buf[start..start + ENTRY_SIZE].copy_from_slice(entry.as_bytes());
    }
    device.write_block(absolute, &buf)?;
    Ok(())
}

fn block_count(inode: &RawInode) -> u64 {
    (inode.size as u64 + BLOCK_SIZE as u64 - 1) / BLOCK_SIZE as u64
}

/// Visits every in-use entry of a directory inode.
pub fn scan<D: BlockDevice>(
    device: &mut D,
    superblock: &Superblock,
    inode: &RawInode,
) -> Result<Vec<Entry>> {
    let mut out = Vec::new();
    for fb in 0..block_count(inode) {
        let entries = read_block_entries(device, superblock, inode, fb)?;
        for (i, entry) in entries.iter().enumerate() {
            if entry.inode_num != 0 {
                out.push(Entry {
                    name: entry.name_str().to_string(),
                    inode_num: entry.inode_num,
                    offset: fb * BLOCK_SIZE as u64 + (i * ENTRY_SIZE) as u64,
                });
            }
        }
    }
    Ok(out)
}

pub fn lookup<D: BlockDevice>(
    device: &mut D,
    superblock: &Superblock,
    inode: &RawInode,
    name: &str,
) -> Result<u32> {
    for fb in 0..block_count(inode) {
        let entries = read_block_entries(device, superblock, inode, fb)?;
        for entry in entries.iter() {
            if entry.matches(name) {
                return Ok(entry.inode_num);
            }
        }
    }
    Err(Error::NotFound)
}

/// Inserts `(name, child_inode)` into `inode`'s directory content, reusing a
/// free slot if one exists or appending a new one otherwise.
pub fn insert<D: BlockDevice>(
    device: &mut D,
    superblock: &Superblock,
    inode: &mut RawInode,
    name: &str,
    child_inode: u32,
) -> Result<()> {
    validate_name(name)?;
    if lookup(device, superblock, inode, name).is_ok() {
        return Err(Error::AlreadyExists);
    }

    // `used_slots` is the high-water mark of slots that have ever held an
    // entry; `size` grows by exactly one entry's worth whenever a slot at or
    // beyond that mark is claimed, never by a whole block.
    let used_slots = inode.size as u64 / ENTRY_SIZE as u64;

    let blocks = block_count(inode);
    for fb in 0..blocks {
        let mut entries = read_block_entries(device, superblock, inode, fb)?;
        if let Some(slot) = entries.iter().position(|e| e.inode_num == 0) {
            entries[slot].set_name(name);
            entries[slot].inode_num = child_inode;
            write_block_entries(device, superblock, inode, fb, &entries)?;
            let absolute_slot = fb * ENTRIES_PER_BLOCK as u64 + slot as u64;
            if absolute_slot >= used_slots {
                inode.size = ((absolute_slot + 1) * ENTRY_SIZE as u64) as u32;
            }
            return Ok(());
        }
    }

    // No free slot in any existing block: append a new one.
    let mut entries = [RawDirent::empty(); ENTRIES_PER_BLOCK];
    entries[0].set_name(name);
    entries[0].inode_num = child_inode;
    write_block_entries(device, superblock, inode, blocks, &entries)?;
    let absolute_slot = blocks * ENTRIES_PER_BLOCK as u64;
    inode.size = ((absolute_slot + 1) * ENTRY_SIZE as u64) as u32;
    Ok(())
}

/// Removes the entry named `name`, freeing its slot for reuse. Does not
/// shrink `inode.size`.
pub fn remove<D: BlockDevice>(
    device: &mut D,
    superblock: &Superblock,
    inode: &mut RawInode,
    name: &str,
) -> Result<u32> {
    for fb in 0..block_count(inode) {
        let mut entries = read_block_entries(device, superblock, inode, fb)?;
        if let Some(slot) = entries.iter().position(|e| e.matches(name)) {
            let removed = entries[slot].inode_num;
            entries[slot] = RawDirent::empty();
            write_block_entries(device, superblock, inode, fb, &entries)?;
            return Ok(removed);
        }
    }
    Err(Error::NotFound)
}

pub fn is_empty<D: BlockDevice>(
    device: &mut D,
    superblock: &Superblock,
    inode: &RawInode,
) -> Result<bool> {
    Ok(scan(device, superblock, inode)?.is_empty())
}
