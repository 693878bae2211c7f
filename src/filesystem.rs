//! Filesystem core: composes the bitmap allocator, inode table, block
//! pointer traversal, directory store, and path resolver into the operation
//! handlers a userspace bridge calls.

use log::debug;

use crate::bitmap;
use crate::blockptr;
use crate::device::BlockDevice;
use crate::dirent;
use crate::error::{Error, Result};
use crate::inode::{self, now_secs, RawInode};
use crate::layout::{Superblock, BLOCK_SIZE, MAX_FILE_SIZE};
use crate::path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Regular,
    Directory,
}

#[derive(Debug, Clone, Copy)]
pub struct Attr {
    pub inode_num: u32,
    pub kind: FileKind,
    pub size: u64,
    pub blocks: u64,
    pub atime: u32,
    pub mtime: u32,
    pub ctime: u32,
}

#[derive(Debug, Clone)]
pub struct DirEntry {
    pub name: String,
    pub inode_num: u32,
    pub kind: FileKind,
}

#[derive(Debug, Clone, Copy)]
pub struct StatFs {
    pub block_size: u32,
    pub total_blocks: u32,
    pub free_blocks: u32,
    pub total_inodes: u32,
    pub free_inodes: u32,
    pub name_max: u32,
}

fn attr_of(inode_num: u32, inode: &RawInode) -> Attr {
    let pointer_blocks = inode.direct.iter().filter(|b| **b != 0).count()
        + inode.indirect.iter().filter(|b| **b != 0).count();
    Attr {
        inode_num,
        kind: if inode.is_dir() {
            FileKind::Directory
        } else {
            FileKind::Regular
        },
        size: inode.size as u64,
        blocks: ((inode.size as u64 + 511) / 512).max((pointer_blocks as u64 * BLOCK_SIZE as u64 + 511) / 512),
        atime: inode.atime,
        mtime: inode.mtime,
        ctime: inode.ctime,
    }
}

/// Writes `data` into the byte range `[offset, end)` of `inode`, allocating
/// blocks as needed. Left as a free function (rather than a `Filesystem`
/// method) so `write` can roll back whatever it allocated without the
/// borrow of `self` getting in the way.
fn write_bytes<D: BlockDevice>(
    device: &mut D,
    superblock: &Superblock,
    inode: &mut RawInode,
    offset: u64,
    end: u64,
    data: &[u8],
) -> Result<()> {
    let mut pos = offset;
    while pos < end {
        let file_block = pos / BLOCK_SIZE as u64;
        let in_block = (pos % BLOCK_SIZE as u64) as usize;
        let take = (BLOCK_SIZE - in_block).min((end - pos) as usize);
        let absolute = blockptr::bmap_or_alloc(device, superblock, inode, file_block)?;
        let mut buf = [0u8; BLOCK_SIZE];
        if take != BLOCK_SIZE {
            device.read_block(absolute, &mut buf)?;
        }
        let src_off = (pos - offset) as usize;
        buf[in_block..in_block + take].copy_from_slice(&data[src_off..src_off + take]);
        device.write_block(absolute, &buf)?;
        pos += take as u64;
    }
    Ok(())
}

pub struct Filesystem<D: BlockDevice> {
    device: D,
    superblock: Superblock,
}

impl<D: BlockDevice> Filesystem<D> {
    /// Formats `device` with a fresh superblock, zeroed bitmaps and inode
    /// table, and a root directory inode.
    pub fn format(mut device: D) -> Result<Self> {
        let superblock = Superblock::new(device.block_count(), inode::INODE_RECORD_SIZE)?;
        superblock.write(&mut device)?;

        let zero = [0u8; BLOCK_SIZE];
        device.write_block(crate::layout::INODE_BITMAP_INDEX, &zero)?;
        for b in 0..superblock.data_bitmap_blocks {
            device.write_block(crate::layout::DATA_BITMAP_START + b, &zero)?;
        }
        for b in 0..superblock.inode_table_blocks {
            device.write_block(superblock.inode_table_start() + b, &zero)?;
        }

        let mut fs = Filesystem { device, superblock };
        let allocated = bitmap::alloc_inode(&mut fs.device, &fs.superblock)?;
        debug_assert_eq!(allocated, crate::layout::ROOT_INODE);
        let now = now_secs();
        inode::write_inode(
            &mut fs.device,
            &fs.superblock,
            crate::layout::ROOT_INODE,
            &RawInode::new_dir(now),
        )?;
        debug!("formatted filesystem, root inode {}", crate::layout::ROOT_INODE);
        Ok(fs)
    }

    /// Mounts an already-formatted device by reading its superblock.
    pub fn mount(mut device: D) -> Result<Self> {
        let superblock = Superblock::read(&mut device)?;
        debug!("mounted filesystem, {} inodes", superblock.inode_count);
        Ok(Filesystem { device, superblock })
    }

    fn load(&mut self, n: u32) -> Result<RawInode> {
        inode::read_inode(&mut self.device, &self.superblock, n)
    }

    fn store(&mut self, n: u32, inode: &RawInode) -> Result<()> {
        inode::write_inode(&mut self.device, &self.superblock, n, inode)
    }

    pub fn getattr(&mut self, p: &str) -> Result<Attr> {
        let n = path::resolve(&mut self.device, &self.superblock, p)?;
        let inode = self.load(n)?;
        Ok(attr_of(n, &inode))
    }

    pub fn readdir(&mut self, p: &str) -> Result<Vec<DirEntry>> {
        let n = path::resolve(&mut self.device, &self.superblock, p)?;
        let mut inode = self.load(n)?;
        if !inode.is_dir() {
            return Err(Error::NotADirectory);
        }
        let entries = dirent::scan(&mut self.device, &self.superblock, &inode)?;
        let mut out = Vec::with_capacity(entries.len() + 2);
        out.push(DirEntry {
            name: ".".to_string(),
            inode_num: n,
            kind: FileKind::Directory,
        });
        out.push(DirEntry {
            name: "..".to_string(),
            inode_num: n,
            kind: FileKind::Directory,
        });
        for e in entries {
            let child = self.load(e.inode_num)?;
            out.push(DirEntry {
                name: e.name,
                inode_num: e.inode_num,
                kind: if child.is_dir() {
                    FileKind::Directory
                } else {
                    FileKind::Regular
                },
            });
        }
        inode.atime = now_secs();
        self.store(n, &inode)?;
        Ok(out)
    }

    fn create(&mut self, p: &str, kind: FileKind) -> Result<Attr> {
        let (parent_n, name) = path::resolve_parent(&mut self.device, &self.superblock, p)?;
        let mut parent = self.load(parent_n)?;
        if !parent.is_dir() {
            return Err(Error::NotADirectory);
        }
        if dirent::lookup(&mut self.device, &self.superblock, &parent, name).is_ok() {
            return Err(Error::AlreadyExists);
        }

        let child_n = bitmap::alloc_inode(&mut self.device, &self.superblock)?;
        let now = now_secs();
        let child = match kind {
            FileKind::Directory => RawInode::new_dir(now),
            FileKind::Regular => RawInode::new_file(now),
        };
        self.store(child_n, &child)?;

        if let Err(e) = dirent::insert(&mut self.device, &self.superblock, &mut parent, name, child_n) {
            // roll back the inode allocation on failure to link it in
            bitmap::free_inode(&mut self.device, child_n)?;
            return Err(e);
        }

        parent.mtime = now;
        parent.ctime = now;
        self.store(parent_n, &parent)?;
        debug!("created {:?} at {} (inode {})", kind, p, child_n);
        Ok(attr_of(child_n, &self.load(child_n)?))
    }

    pub fn mknod(&mut self, p: &str) -> Result<Attr> {
        self.create(p, FileKind::Regular)
    }

    pub fn mkdir(&mut self, p: &str) -> Result<Attr> {
        self.create(p, FileKind::Directory)
    }

    fn unlink_common(&mut self, p: &str, expect_dir: bool) -> Result<()> {
        let (parent_n, name) = path::resolve_parent(&mut self.device, &self.superblock, p)?;
        if name == "." || name == ".." {
            return Err(Error::InvalidArgument);
        }
        let mut parent = self.load(parent_n)?;
        let child_n = dirent::lookup(&mut self.device, &self.superblock, &parent, name)?;
        let mut child = self.load(child_n)?;

        if expect_dir {
            if !child.is_dir() {
                return Err(Error::NotADirectory);
            }
            if !dirent::is_empty(&mut self.device, &self.superblock, &child)? {
                return Err(Error::NotEmpty);
            }
        } else if child.is_dir() {
            return Err(Error::IsADirectory);
        }

        blockptr::free_all(&mut self.device, &self.superblock, &mut child)?;
        bitmap::free_inode(&mut self.device, child_n)?;
        dirent::remove(&mut self.device, &self.superblock, &mut parent, name)?;
        parent.mtime = now_secs();
        parent.ctime = parent.mtime;
        self.store(parent_n, &parent)?;
        debug!("removed {} (inode {})", p, child_n);
        Ok(())
    }

    pub fn unlink(&mut self, p: &str) -> Result<()> {
        self.unlink_common(p, false)
    }

    pub fn rmdir(&mut self, p: &str) -> Result<()> {
        self.unlink_common(p, true)
    }

    pub fn rename(&mut self, old: &str, new: &str) -> Result<()> {
        let (old_parent_n, old_name) = path::resolve_parent(&mut self.device, &self.superblock, old)?;
        let (new_parent_n, new_name) = path::resolve_parent(&mut self.device, &self.superblock, new)?;

        let mut old_parent = self.load(old_parent_n)?;
        let child_n = dirent::lookup(&mut self.device, &self.superblock, &old_parent, old_name)?;

        if old_parent_n == new_parent_n && old_name == new_name {
            return Ok(());
        }

        let mut new_parent = self.load(new_parent_n)?;
        if !new_parent.is_dir() {
            return Err(Error::NotADirectory);
        }

        if let Ok(existing_n) = dirent::lookup(&mut self.device, &self.superblock, &new_parent, new_name) {
            let mut existing = self.load(existing_n)?;
            if existing.is_dir() {
                if !dirent::is_empty(&mut self.device, &self.superblock, &existing)? {
                    return Err(Error::NotEmpty);
                }
            }
            blockptr::free_all(&mut self.device, &self.superblock, &mut existing)?;
            bitmap::free_inode(&mut self.device, existing_n)?;
            dirent::remove(&mut self.device, &self.superblock, &mut new_parent, new_name)?;
        }

        dirent::remove(&mut self.device, &self.superblock, &mut old_parent, old_name)?;
        dirent::insert(&mut self.device, &self.superblock, &mut new_parent, new_name, child_n)?;

        let now = now_secs();
        old_parent.mtime = now;
        old_parent.ctime = now;
        self.store(old_parent_n, &old_parent)?;
        if old_parent_n != new_parent_n {
            new_parent.mtime = now;
            new_parent.ctime = now;
            self.store(new_parent_n, &new_parent)?;
        }
        Ok(())
    }

    pub fn read(&mut self, p: &str, offset: u64, size: u32) -> Result<Vec<u8>> {
        let n = path::resolve(&mut self.device, &self.superblock, p)?;
        let mut inode = self.load(n)?;
        if inode.is_dir() {
            return Err(Error::IsADirectory);
        }
        let file_size = inode.size as u64;
        if offset >= file_size {
            return Ok(Vec::new());
        }
        let end = (offset + size as u64).min(file_size);
        let mut out = vec![0u8; (end - offset) as usize];

        let mut pos = offset;
        while pos < end {
            let file_block = pos / BLOCK_SIZE as u64;
            let in_block = (pos % BLOCK_SIZE as u64) as usize;
            let take = (BLOCK_SIZE - in_block).min((end - pos) as usize);
            let absolute = blockptr::bmap(&mut self.device, &self.superblock, &inode, file_block)?;
            if absolute != 0 {
                let mut buf = [0u8; BLOCK_SIZE];
                self.device.read_block(absolute, &mut buf)?;
                let out_off = (pos - offset) as usize;
                out[out_off..out_off + take].copy_from_slice(&buf[in_block..in_block + take]);
            }
            pos += take as u64;
        }

        inode.atime = now_secs();
        self.store(n, &inode)?;
        Ok(out)
    }

    pub fn write(&mut self, p: &str, offset: u64, data: &[u8]) -> Result<u32> {
        let n = path::resolve(&mut self.device, &self.superblock, p)?;
        let mut inode = self.load(n)?;
        if inode.is_dir() {
            return Err(Error::IsADirectory);
        }
        let end = offset + data.len() as u64;
        if end > MAX_FILE_SIZE {
            return Err(Error::FileTooLarge);
        }

        // Remember how many blocks existed before this call so a failure
        // partway through can free exactly the blocks it freshly allocated.
        let original_size = inode.size as u64;
        let original_blocks = if original_size == 0 {
            0
        } else {
            (original_size - 1) / BLOCK_SIZE as u64 + 1
        };

        if let Err(e) = write_bytes(&mut self.device, &self.superblock, &mut inode, offset, end, data) {
            blockptr::free_above(&mut self.device, &self.superblock, &mut inode, original_blocks)?;
            return Err(e);
        }

        if end > inode.size as u64 {
            inode.size = end as u32;
        }
        let now = now_secs();
        inode.mtime = now;
        inode.ctime = now;
        self.store(n, &inode)?;
        Ok(data.len() as u32)
    }

    pub fn truncate(&mut self, p: &str, size: u64) -> Result<()> {
        let n = path::resolve(&mut self.device, &self.superblock, p)?;
        let mut inode = self.load(n)?;
        if inode.is_dir() {
            return Err(Error::IsADirectory);
        }
        if size > MAX_FILE_SIZE {
            return Err(Error::FileTooLarge);
        }
        let current = inode.size as u64;
        if size > current {
            let keep_blocks = (size + BLOCK_SIZE as u64 - 1) / BLOCK_SIZE as u64;
            for fb in (current / BLOCK_SIZE as u64)..keep_blocks {
                blockptr::bmap_or_alloc(&mut self.device, &self.superblock, &mut inode, fb)?;
            }
        } else if size < current {
            let keep_blocks = if size == 0 { 0 } else { (size - 1) / BLOCK_SIZE as u64 + 1 };
            blockptr::free_above(&mut self.device, &self.superblock, &mut inode, keep_blocks)?;
        }
        inode.size = size as u32;
        inode.ctime = now_secs();
        self.store(n, &inode)?;
        Ok(())
    }

    pub fn utimens(&mut self, p: &str, atime: u32, mtime: u32) -> Result<()> {
        let n = path::resolve(&mut self.device, &self.superblock, p)?;
        let mut inode = self.load(n)?;
        inode.atime = atime;
        inode.mtime = mtime;
        inode.ctime = now_secs();
        self.store(n, &inode)?;
        Ok(())
    }

    pub fn statfs(&mut self) -> Result<StatFs> {
        let free_blocks = bitmap::count_free_data_blocks(&mut self.device, &self.superblock)?;
        let free_inodes = bitmap::count_free_inodes(&mut self.device, &self.superblock)?;
        Ok(StatFs {
            block_size: BLOCK_SIZE as u32,
            total_blocks: self.superblock.data_block_count,
            free_blocks,
            total_inodes: self.superblock.inode_count,
            free_inodes,
            name_max: dirent::NAME_MAX as u32,
        })
    }
}

