//! Error handling types for the filesystem core.
//!
//! Every fallible operation in the crate returns [`FsResult`]. The variants
//! of [`Error`] are the internal error taxonomy; [`Error::errno`] maps each
//! kind to the POSIX error code that is reported through the kernel bridge.
//! Internal errors never cross the bridge as panics: the driver converts
//! them with `reply.error(err.errno())`.

use std::io;

pub type FsResult<T> = Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Row or remote id absent.
    #[error("no such entry: {0}")]
    NotFound(String),

    /// Name collision under a parent.
    #[error("entry already exists: {0}")]
    AlreadyExists(String),

    /// Name is in the ignore list and must not surface.
    #[error("ignored name: {0}")]
    Ignored(String),

    /// Network failure, timeout or 5xx after the retry budget.
    #[error("remote unreachable: {0}")]
    Unreachable(String),

    /// Credentials invalid, or the refresh attempt failed.
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// Downloaded content did not hash to the expected digest.
    #[error("integrity check failed: {0}")]
    Integrity(String),

    /// Content mutation on a read-only filesystem.
    #[error("filesystem is read-only: {0}")]
    ReadOnly(&'static str),

    /// Symlink target outside the mountpoint.
    #[error("cross-device link: {0}")]
    CrossDevice(String),

    /// Operation depends on a placeholder that has not been reconciled yet.
    #[error("entry is still pending reconciliation: {0}")]
    Pending(String),

    /// Operation this filesystem does not support.
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),

    /// Configuration did not validate. Fatal at startup only.
    #[error("invalid configuration: {0}")]
    Schema(String),

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("metadata store error: {0}")]
    Store(#[from] rusqlite::Error),
}

impl Error {
    /// POSIX error code reported to the kernel for this error kind.
    pub fn errno(&self) -> i32 {
        match self {
            Error::NotFound(_) => libc::ENOENT,
            Error::AlreadyExists(_) => libc::EEXIST,
            Error::Ignored(_) => libc::EIO,
            Error::Unreachable(_) => libc::EIO,
            Error::AuthFailed(_) => libc::EACCES,
            Error::Integrity(_) => libc::EIO,
            Error::ReadOnly(_) => libc::EROFS,
            Error::CrossDevice(_) => libc::EXDEV,
            Error::Pending(_) => libc::EAGAIN,
            Error::Unsupported(_) => libc::EIO,
            Error::Schema(_) => libc::EIO,
            Error::Io(e) => e.raw_os_error().unwrap_or(libc::EIO),
            Error::Store(_) => libc::EIO,
        }
    }

    pub(crate) fn not_found(what: impl ToString) -> Self {
        Error::NotFound(what.to_string())
    }

    pub(crate) fn unreachable(what: impl ToString) -> Self {
        Error::Unreachable(what.to_string())
    }
}
