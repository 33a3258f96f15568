use std::io;

use thiserror::Error;

/// Errors produced by the store client, resolver, and inode layers.
#[derive(Debug, Error)]
pub enum Error {
    #[error("store transport error: {0}")]
    Transport(#[from] redis::RedisError),

    #[error("store returned an unexpected reply: {0}")]
    Store(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("path not found")]
    NotFound,

    #[error("not a directory")]
    NotDirectory,

    #[error("directory not empty")]
    NotEmpty,

    #[error("operation not permitted in read-only mode")]
    ReadOnly,
}

impl From<Error> for io::Error {
    fn from(err: Error) -> Self {
        let errno = match &err {
            Error::Transport(_) | Error::Store(_) => libc::EIO,
            Error::Config(_) => libc::EINVAL,
            Error::NotFound => libc::ENOENT,
            Error::NotDirectory => libc::ENOTDIR,
            Error::NotEmpty => libc::ENOTEMPTY,
            Error::ReadOnly => libc::EPERM,
        };
        io::Error::from_raw_os_error(errno)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
