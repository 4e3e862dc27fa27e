//! Key-value store access.
//!
//! Submodules:
//! - `executor`: runs one command on the shared connection, reconnecting and
//!   retrying once on transport failure.
//! - `ops`: file-semantics primitives (exists, length, ranged read/write, ...).
//! - `redis`: backend speaking the Redis protocol.
//! - `memory`: in-process backend with Redis command semantics, used by tests
//!   and by `--memory` mounts.

pub mod executor;
pub mod memory;
pub mod ops;
pub mod redis;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::StoreError;

pub use executor::Executor;
pub use ops::KvsOps;

/// The fixed command vocabulary consumed from the store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Set { key: String, value: Bytes },
    Get { key: String },
    Exists { key: String },
    Del { key: String },
    Rename { key: String, new_key: String },
    StrLen { key: String },
    Append { key: String, value: Bytes },
    SetRange { key: String, offset: i64, value: Bytes },
    GetRange { key: String, start: i64, end: i64 },
    Keys { pattern: String },
}

impl Command {
    /// Command verb, used in logs and protocol errors.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Set { .. } => "SET",
            Command::Get { .. } => "GET",
            Command::Exists { .. } => "EXISTS",
            Command::Del { .. } => "DEL",
            Command::Rename { .. } => "RENAME",
            Command::StrLen { .. } => "STRLEN",
            Command::Append { .. } => "APPEND",
            Command::SetRange { .. } => "SETRANGE",
            Command::GetRange { .. } => "GETRANGE",
            Command::Keys { .. } => "KEYS",
        }
    }
}

/// A successful reply from the store. Error replies never reach this type;
/// they surface as [`StoreError::Rejected`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Reply {
    Nil,
    Integer(i64),
    Bulk(Bytes),
    Status(String),
    Array(Vec<Reply>),
    /// Any reply shape outside the vocabulary above, rendered for diagnostics.
    Other(String),
}

impl Reply {
    /// Short description of the reply shape for protocol errors.
    pub fn describe(&self) -> String {
        match self {
            Reply::Nil => "nil".to_string(),
            Reply::Integer(n) => format!("integer {n}"),
            Reply::Bulk(data) => format!("bulk string of {} bytes", data.len()),
            Reply::Status(s) => format!("status {s:?}"),
            Reply::Array(items) => format!("array of {} elements", items.len()),
            Reply::Other(s) => s.clone(),
        }
    }
}

/// One live handle to the store.
#[async_trait]
pub trait Connection: Send {
    async fn execute(&mut self, command: &Command) -> Result<Reply, StoreError>;
}

/// Produces connections; called once at startup and again on every reconnect.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Conn: Connection + 'static;

    async fn connect(&self) -> Result<Self::Conn, StoreError>;

    /// Human readable endpoint for logs.
    fn endpoint(&self) -> String;
}
