//! FUSE bridge: implements `fuser::Filesystem` over the path-based core,
//! translating the kernel's numeric inode addressing into path lookups via
//! a small ino<->path table.
//!
//! This module is the external collaborator boundary: it owns no filesystem
//! invariants of its own, only the ino/path translation the FUSE kernel
//! protocol requires.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::path::{Path as FsPath, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use fuser::{
    FileAttr, FileType, Filesystem as FuseFilesystem, ReplyAttr, ReplyCreate, ReplyData,
    ReplyDirectory, ReplyEmpty, ReplyEntry, ReplyStatfs, ReplyWrite, Request,
};
use libc::ENOENT;
use log::{debug, warn};

use crate::device::BlockDevice;
use crate::error::Error;
use crate::filesystem::{Attr, FileKind, Filesystem};

const TTL: Duration = Duration::from_secs(1);
const ROOT_FUSE_INO: u64 = 1;

fn secs_to_systemtime(secs: u32) -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(secs as u64)
}

fn file_attr(attr: &Attr, fuse_ino: u64) -> FileAttr {
    FileAttr {
        ino: fuse_ino,
        size: attr.size,
        blocks: attr.blocks,
        atime: secs_to_systemtime(attr.atime),
        mtime: secs_to_systemtime(attr.mtime),
        ctime: secs_to_systemtime(attr.ctime),
        crtime: secs_to_systemtime(attr.ctime),
        kind: match attr.kind {
            FileKind::Directory => FileType::Directory,
            FileKind::Regular => FileType::RegularFile,
        },
        perm: match attr.kind {
            FileKind::Directory => 0o755,
            FileKind::Regular => 0o644,
        },
        nlink: 1,
        uid: unsafe { libc::getuid() },
        gid: unsafe { libc::getgid() },
        rdev: 0,
        blksize: crate::layout::BLOCK_SIZE as u32,
        flags: 0,
    }
}

/// Bidirectional table mapping FUSE inode numbers to the absolute paths our
/// path-based core operates on.
struct InoTable {
    paths: HashMap<u64, PathBuf>,
    ids: HashMap<PathBuf, u64>,
    next: u64,
}

impl InoTable {
    fn new() -> Self {
        let mut paths = HashMap::new();
        let mut ids = HashMap::new();
        paths.insert(ROOT_FUSE_INO, PathBuf::from("/"));
        ids.insert(PathBuf::from("/"), ROOT_FUSE_INO);
        InoTable {
            paths,
            ids,
            next: ROOT_FUSE_INO + 1,
        }
    }

    fn path_of(&self, ino: u64) -> Option<&FsPath> {
        self.paths.get(&ino).map(|p| p.as_path())
    }

    fn ino_of(&mut self, path: &FsPath) -> u64 {
        if let Some(ino) = self.ids.get(path) {
            return *ino;
        }
        let ino = self.next;
        self.next += 1;
        self.paths.insert(ino, path.to_path_buf());
        self.ids.insert(path.to_path_buf(), ino);
        ino
    }

    fn forget_path(&mut self, path: &FsPath) {
        if let Some(ino) = self.ids.remove(path) {
            self.paths.remove(&ino);
        }
    }

    fn rename(&mut self, from: &FsPath, to: &FsPath) {
        if let Some(ino) = self.ids.remove(from) {
            self.paths.insert(ino, to.to_path_buf());
            self.ids.insert(to.to_path_buf(), ino);
        }
    }
}

pub struct FuseAdapter<D: BlockDevice> {
    fs: Mutex<Filesystem<D>>,
    inos: Mutex<InoTable>,
}

impl<D: BlockDevice> FuseAdapter<D> {
    pub fn new(fs: Filesystem<D>) -> Self {
        FuseAdapter {
            fs: Mutex::new(fs),
            inos: Mutex::new(InoTable::new()),
        }
    }

    fn join(&self, parent: u64, name: &OsStr) -> Option<PathBuf> {
        let inos = self.inos.lock().unwrap();
        let parent_path = inos.path_of(parent)?;
        let mut joined = if parent_path == FsPath::new("/") {
            PathBuf::from("/")
        } else {
            parent_path.to_path_buf()
        };
        joined.push(name);
        Some(joined)
    }
}

fn path_str(p: &FsPath) -> String {
    p.to_string_lossy().replace('\\', "/")
}

impl<D: BlockDevice> FuseFilesystem for FuseAdapter<D> {
    fn lookup(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let Some(path) = self.join(parent, name) else {
            reply.error(ENOENT);
            return;
        };
        let mut fs = self.fs.lock().unwrap();
        match fs.getattr(&path_str(&path)) {
            Ok(attr) => {
                let ino = self.inos.lock().unwrap().ino_of(&path);
                reply.entry(&TTL, &file_attr(&attr, ino), 0);
            }
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn getattr(&mut self, _req: &Request, ino: u64, reply: ReplyAttr) {
        let path = match self.inos.lock().unwrap().path_of(ino) {
            Some(p) => p.to_path_buf(),
            None => {
                reply.error(ENOENT);
                return;
            }
        };
        let mut fs = self.fs.lock().unwrap();
        match fs.getattr(&path_str(&path)) {
            Ok(attr) => reply.attr(&TTL, &file_attr(&attr, ino)),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn readdir(
        &mut self,
        _req: &Request,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        let path = match self.inos.lock().unwrap().path_of(ino) {
            Some(p) => p.to_path_buf(),
            None => {
                reply.error(ENOENT);
                return;
            }
        };
        let mut fs = self.fs.lock().unwrap();
        match fs.readdir(&path_str(&path)) {
            Ok(entries) => {
                for (i, entry) in entries.into_iter().enumerate().skip(offset as usize) {
                    let child_path = if path == FsPath::new("/") {
                        PathBuf::from(format!("/{}", entry.name))
                    } else {
                        let mut p = path.clone();
                        p.push(&entry.name);
                        p
                    };
                    let child_ino = if entry.name == "." {
                        ino
                    } else if entry.name == ".." {
                        ino
                    } else {
                        self.inos.lock().unwrap().ino_of(&child_path)
                    };
                    let kind = match entry.kind {
                        FileKind::Directory => FileType::Directory,
                        FileKind::Regular => FileType::RegularFile,
                    };
                    if reply.add(child_ino, (i + 1) as i64, kind, &entry.name) {
                        break;
                    }
                }
                reply.ok();
            }
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn mknod(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        _mode: u32,
        _umask: u32,
        _rdev: u32,
        reply: ReplyEntry,
    ) {
        let Some(path) = self.join(parent, name) else {
            reply.error(ENOENT);
            return;
        };
        let mut fs = self.fs.lock().unwrap();
        match fs.mknod(&path_str(&path)) {
            Ok(attr) => {
                let ino = self.inos.lock().unwrap().ino_of(&path);
                reply.entry(&TTL, &file_attr(&attr, ino), 0);
            }
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn create(
        &mut self,
        req: &Request,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        _flags: i32,
        reply: ReplyCreate,
    ) {
        let Some(path) = self.join(parent, name) else {
            reply.error(ENOENT);
            return;
        };
        let mut fs = self.fs.lock().unwrap();
        match fs.mknod(&path_str(&path)) {
            Ok(attr) => {
                let ino = self.inos.lock().unwrap().ino_of(&path);
                reply.created(&TTL, &file_attr(&attr, ino), 0, 0, 0);
            }
            Err(e) => reply.error(e.to_errno()),
        }
        let _ = (req, mode, umask);
    }

    fn mkdir(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        _mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        let Some(path) = self.join(parent, name) else {
            reply.error(ENOENT);
            return;
        };
        let mut fs = self.fs.lock().unwrap();
        match fs.mkdir(&path_str(&path)) {
            Ok(attr) => {
                let ino = self.inos.lock().unwrap().ino_of(&path);
                reply.entry(&TTL, &file_attr(&attr, ino), 0);
            }
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn unlink(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let Some(path) = self.join(parent, name) else {
            reply.error(ENOENT);
            return;
        };
        let mut fs = self.fs.lock().unwrap();
        match fs.unlink(&path_str(&path)) {
            Ok(()) => {
                self.inos.lock().unwrap().forget_path(&path);
                reply.ok();
            }
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn rmdir(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let Some(path) = self.join(parent, name) else {
            reply.error(ENOENT);
            return;
        };
        let mut fs = self.fs.lock().unwrap();
        match fs.rmdir(&path_str(&path)) {
            Ok(()) => {
                self.inos.lock().unwrap().forget_path(&path);
                reply.ok();
            }
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn rename(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        _flags: u32,
        reply: ReplyEmpty,
    ) {
        let (Some(old), Some(new)) = (self.join(parent, name), self.join(newparent, newname))
        else {
            reply.error(ENOENT);
            return;
        };
        let mut fs = self.fs.lock().unwrap();
        match fs.rename(&path_str(&old), &path_str(&new)) {
            Ok(()) => {
                self.inos.lock().unwrap().rename(&old, &new);
                reply.ok();
            }
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn read(
        &mut self,
        _req: &Request,
        ino: u64,
        _fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        let path = match self.inos.lock().unwrap().path_of(ino) {
            Some(p) => p.to_path_buf(),
            None => {
                reply.error(ENOENT);
                return;
            }
        };
        let mut fs = self.fs.lock().unwrap();
        match fs.read(&path_str(&path), offset as u64, size) {
            Ok(data) => reply.data(&data),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn write(
        &mut self,
        _req: &Request,
        ino: u64,
        _fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        let path = match self.inos.lock().unwrap().path_of(ino) {
            Some(p) => p.to_path_buf(),
            None => {
                reply.error(ENOENT);
                return;
            }
        };
        let mut fs = self.fs.lock().unwrap();
        match fs.write(&path_str(&path), offset as u64, data) {
            Ok(n) => reply.written(n),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn setattr(
        &mut self,
        _req: &Request,
        ino: u64,
        _mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        size: Option<u64>,
        atime: Option<fuser::TimeOrNow>,
        mtime: Option<fuser::TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        let path = match self.inos.lock().unwrap().path_of(ino) {
            Some(p) => p.to_path_buf(),
            None => {
                reply.error(ENOENT);
                return;
            }
        };
        let path_str_ = path_str(&path);
        let mut fs = self.fs.lock().unwrap();

        if let Some(size) = size {
            if let Err(e) = fs.truncate(&path_str_, size) {
                reply.error(e.to_errno());
                return;
            }
        }
        if atime.is_some() || mtime.is_some() {
            let now = crate::inode::now_secs();
            let to_secs = |t: fuser::TimeOrNow| match t {
                fuser::TimeOrNow::SpecificTime(st) => st
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.as_secs() as u32)
                    .unwrap_or(now),
                fuser::TimeOrNow::Now => now,
            };
            let a = atime.map(to_secs).unwrap_or(now);
            let m = mtime.map(to_secs).unwrap_or(now);
            if let Err(e) = fs.utimens(&path_str_, a, m) {
                reply.error(e.to_errno());
                return;
            }
        }

        match fs.getattr(&path_str_) {
            Ok(attr) => reply.attr(&TTL, &file_attr(&attr, ino)),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn statfs(&mut self, _req: &Request, _ino: u64, reply: ReplyStatfs) {
        let mut fs = self.fs.lock().unwrap();
        match fs.statfs() {
            Ok(s) => reply.statfs(
                s.total_blocks as u64,
                s.free_blocks as u64,
                s.free_blocks as u64,
                s.total_inodes as u64,
                s.free_inodes as u64,
                s.block_size,
                s.name_max,
                s.block_size,
            ),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn open(&mut self, _req: &Request, _ino: u64, _flags: i32, reply: fuser::ReplyOpen) {
        reply.opened(0, 0);
    }

    fn release(
        &mut self,
        _req: &Request,
        _ino: u64,
        _fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        reply.ok();
    }

    fn opendir(&mut self, _req: &Request, _ino: u64, _flags: i32, reply: fuser::ReplyOpen) {
        reply.opened(0, 0);
    }

    fn releasedir(&mut self, _req: &Request, _ino: u64, _fh: u64, _flags: i32, reply: ReplyEmpty) {
        reply.ok();
    }
}

/// Converts an `Error::Io` encountered outside any single handler (e.g. at
/// mount time) into a log line; the bridge itself never panics on it.
pub fn log_mount_error(err: &Error) {
    warn!("mount failed: {}", err);
}

pub fn log_dispatch(op: &str, path: &str) {
    debug!("{} {}", op, path);
}
