//! Error types shared by the store layer and the filesystem adapter.

use thiserror::Error;

/// Failure reported by the command executor.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// No reply, connection-level error, or no connection held.
    #[error("transport failure: {0}")]
    Transport(String),

    /// The store received the command and answered with an error reply.
    #[error("store rejected command: {0}")]
    Rejected(String),

    /// Reconnect-and-retry failed under the `surface` failure policy.
    #[error("store unavailable while executing {command}: {reason}")]
    Unavailable {
        command: &'static str,
        reason: String,
    },
}

/// Filesystem-style outcome of an adapter or store operation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FsError {
    #[error("no such file")]
    NotFound,

    #[error("file already exists")]
    AlreadyExists,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("is a directory")]
    IsADirectory,

    #[error("not a directory")]
    NotADirectory,

    #[error("operation not supported")]
    Unsupported,

    #[error("I/O error: {0}")]
    Io(String),

    #[error("unexpected reply to {command}: {found}")]
    Protocol {
        command: &'static str,
        found: String,
    },

    #[error("listing buffer is full")]
    OutOfSpace,

    #[error("store temporarily unavailable: {0}")]
    Unavailable(String),
}

impl FsError {
    /// The errno reported to the kernel for this outcome.
    pub fn errno(&self) -> libc::c_int {
        match self {
            FsError::NotFound => libc::ENOENT,
            FsError::AlreadyExists => libc::EEXIST,
            FsError::InvalidArgument(_) => libc::EINVAL,
            FsError::IsADirectory => libc::EISDIR,
            FsError::NotADirectory => libc::ENOTDIR,
            FsError::Unsupported => libc::ENOSYS,
            FsError::Io(_) | FsError::Protocol { .. } => libc::EIO,
            FsError::OutOfSpace => libc::ENOMEM,
            FsError::Unavailable(_) => libc::EAGAIN,
        }
    }
}

impl From<StoreError> for FsError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable { .. } => FsError::Unavailable(err.to_string()),
            StoreError::Transport(msg) | StoreError::Rejected(msg) => FsError::Io(msg),
        }
    }
}

impl From<FsError> for std::io::Error {
    fn from(err: FsError) -> Self {
        std::io::Error::from_raw_os_error(err.errno())
    }
}

pub type Result<T, E = FsError> = std::result::Result<T, E>;
