//! Resolves absolute paths to inode numbers by walking the directory tree
//! from the root, one path component at a time.

use crate::device::BlockDevice;
use crate::dirent;
use crate::error::{Error, Result};
use crate::inode::{read_inode, RawInode};
use crate::layout::{Superblock, ROOT_INODE};

/// Splits a path into its `/`-separated, non-empty components.
fn components(path: &str) -> Result<Vec<&str>> {
    if !path.starts_with('/') {
        return Err(Error::InvalidArgument);
    }
    Ok(path.split('/').filter(|c| !c.is_empty()).collect())
}

/// Resolves an absolute path to an inode number.
pub fn resolve<D: BlockDevice>(device: &mut D, superblock: &Superblock, path: &str) -> Result<u32> {
    let parts = components(path)?;
    let mut current = ROOT_INODE;
    for part in parts {
        let inode = read_inode(device, superblock, current)?;
        if !inode.is_dir() {
            return Err(Error::NotFound);
        }
        current = dirent::lookup(device, superblock, &inode, part)?;
    }
    Ok(current)
}

/// Resolves all but the last path component, returning the parent inode
/// number and the final component's name.
pub fn resolve_parent<'a, D: BlockDevice>(
    device: &mut D,
    superblock: &Superblock,
    path: &'a str,
) -> Result<(u32, &'a str)> {
    let parts = components(path)?;
    let (last, init) = parts.split_last().ok_or(Error::InvalidArgument)?;
    let mut current = ROOT_INODE;
    for part in init {
        let inode = read_inode(device, superblock, current)?;
        if !inode.is_dir() {
            return Err(Error::NotFound);
        }
        current = dirent::lookup(device, superblock, &inode, part)?;
    }
    Ok((current, last))
}

/// Loads the inode at `path`, erroring with `NotFound` if any intermediate
/// component is missing or not a directory.
pub fn resolve_inode<D: BlockDevice>(
    device: &mut D,
    superblock: &Superblock,
    path: &str,
) -> Result<RawInode> {
    let n = resolve(device, superblock, path)?;
    read_inode(device, superblock, n)
}
