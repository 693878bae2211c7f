//! Error hierarchy for the filesystem core, with a mapping onto POSIX errno
//! values for the FUSE bridge boundary.

use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("no such file or directory")]
    NotFound,

    #[error("file or directory already exists")]
    AlreadyExists,

    #[error("no space left on device")]
    NoSpace,

    #[error("file too large")]
    FileTooLarge,

    #[error("file name too long")]
    NameTooLong,

    #[error("directory not empty")]
    NotEmpty,

    #[error("not a directory")]
    NotADirectory,

    #[error("is a directory")]
    IsADirectory,

    #[error("invalid argument")]
    InvalidArgument,

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Maps this error onto the POSIX errno constant a FUSE reply expects.
    pub fn to_errno(&self) -> i32 {
        match self {
            Error::NotFound => libc::ENOENT,
            Error::AlreadyExists => libc::EEXIST,
            Error::NoSpace => libc::ENOSPC,
            Error::FileTooLarge => libc::EFBIG,
            Error::NameTooLong => libc::ENAMETOOLONG,
            Error::NotEmpty => libc::ENOTEMPTY,
            Error::NotADirectory => libc::ENOTDIR,
            Error::IsADirectory => libc::EISDIR,
            Error::InvalidArgument => libc::EINVAL,
            Error::Io(_) => libc::EIO,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
