//! A small POSIX-style filesystem core: superblock, bitmap allocator,
//! inode table, block-pointer traversal, directory store, and path
//! resolver, exposed to the host OS through a FUSE bridge.

pub mod bitmap;
pub mod blockptr;
pub mod device;
pub mod dirent;
pub mod error;
pub mod filesystem;
pub mod fuse_adapter;
pub mod inode;
pub mod layout;
pub mod path;
