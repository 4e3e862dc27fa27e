//! File-semantics primitives on top of the command executor.
//!
//! Each operation issues one or more commands and interprets the reply shape.
//! A reply of the wrong shape is a protocol error. Multi-command sequences
//! (length, truncate, zero-extend) are not atomic against concurrent writers
//! of the same key.

use std::ops::ControlFlow;

use bytes::Bytes;
use tracing::debug;

use super::{Command, Connector, Executor, Reply};
use crate::config::ExtendStrategy;
use crate::error::{FsError, Result};

/// Chunk size used by [`ExtendStrategy::ChunkedAppend`].
pub const ZERO_CHUNK: usize = 512;

static ZEROS: [u8; ZERO_CHUNK] = [0; ZERO_CHUNK];

pub struct KvsOps<C: Connector> {
    executor: Executor<C>,
    extend: ExtendStrategy,
}

impl<C: Connector> KvsOps<C> {
    pub fn new(executor: Executor<C>, extend: ExtendStrategy) -> Self {
        Self { executor, extend }
    }

    pub fn executor(&self) -> &Executor<C> {
        &self.executor
    }

    async fn run(&self, command: Command) -> Result<(Reply, &'static str)> {
        let name = command.name();
        let reply = self.executor.execute(command).await?;
        Ok((reply, name))
    }

    async fn integer(&self, command: Command) -> Result<i64> {
        match self.run(command).await? {
            (Reply::Integer(n), _) => Ok(n),
            (other, name) => Err(protocol(name, &other)),
        }
    }

    async fn bulk(&self, command: Command) -> Result<Bytes> {
        match self.run(command).await? {
            (Reply::Bulk(data), _) => Ok(data),
            (other, name) => Err(protocol(name, &other)),
        }
    }

    async fn status(&self, command: Command) -> Result<()> {
        match self.run(command).await? {
            (Reply::Status(_), _) => Ok(()),
            (other, name) => Err(protocol(name, &other)),
        }
    }

    pub async fn exists(&self, name: &str) -> Result<bool> {
        let n = self.integer(Command::Exists { key: name.into() }).await?;
        Ok(n > 0)
    }

    /// Value length of an existing key.
    ///
    /// STRLEN reports 0 for a missing key, so existence is checked first.
    pub async fn length(&self, name: &str) -> Result<u64> {
        if !self.exists(name).await? {
            return Err(FsError::NotFound);
        }
        self.strlen(name).await
    }

    async fn strlen(&self, name: &str) -> Result<u64> {
        let n = self.integer(Command::StrLen { key: name.into() }).await?;
        u64::try_from(n).map_err(|_| FsError::Protocol {
            command: "STRLEN",
            found: format!("negative length {n}"),
        })
    }

    /// Set the key to an empty value. Idempotent; exclusivity is the caller's concern.
    pub async fn create(&self, name: &str) -> Result<()> {
        self.status(Command::Set {
            key: name.into(),
            value: Bytes::new(),
        })
        .await
    }

    pub async fn delete(&self, name: &str) -> Result<()> {
        match self.integer(Command::Del { key: name.into() }).await? {
            0 => Err(FsError::NotFound),
            _ => Ok(()),
        }
    }

    /// Rename, replacing any existing destination.
    pub async fn rename(&self, name: &str, new_name: &str) -> Result<()> {
        self.status(Command::Rename {
            key: name.into(),
            new_key: new_name.into(),
        })
        .await
    }

    /// Grow the value to `new_size` bytes, appending NULs. No-op if it is already that long.
    pub async fn zero_extend(&self, name: &str, new_size: u64) -> Result<()> {
        let current = self.strlen(name).await?;
        if new_size <= current {
            return Ok(());
        }
        debug!(name, current, new_size, strategy = ?self.extend, "zero-extending");
        match self.extend {
            ExtendStrategy::RangedWrite => {
                let last = to_i64(new_size - 1)?;
                self.integer(Command::SetRange {
                    key: name.into(),
                    offset: last,
                    value: Bytes::from_static(&ZEROS[..1]),
                })
                .await?;
            }
            ExtendStrategy::ChunkedAppend => {
                let mut remaining = new_size - current;
                while remaining > 0 {
                    let chunk = remaining.min(ZERO_CHUNK as u64) as usize;
                    self.integer(Command::Append {
                        key: name.into(),
                        value: Bytes::from_static(&ZEROS[..chunk]),
                    })
                    .await?;
                    remaining -= chunk as u64;
                }
            }
        }
        Ok(())
    }

    /// Keep only the first `new_size` bytes: read the prefix, then overwrite the key with it.
    pub async fn truncate(&self, name: &str, new_size: u64) -> Result<()> {
        let prefix = if new_size == 0 {
            Bytes::new()
        } else {
            self.bulk(Command::GetRange {
                key: name.into(),
                start: 0,
                end: to_i64(new_size - 1)?,
            })
            .await?
        };
        self.status(Command::Set {
            key: name.into(),
            value: prefix,
        })
        .await
    }

    /// Bytes in `[offset, offset + size)`, fewer if the value is shorter.
    pub async fn read_range(&self, name: &str, size: u32, offset: u64) -> Result<Bytes> {
        if size == 0 {
            return Ok(Bytes::new());
        }
        let start = to_i64(offset)?;
        let end = start
            .checked_add(i64::from(size) - 1)
            .ok_or_else(|| FsError::InvalidArgument(format!("offset {offset} out of range")))?;
        self.bulk(Command::GetRange {
            key: name.into(),
            start,
            end,
        })
        .await
    }

    /// Write at `offset`; the store zero-fills any gap past the current end.
    pub async fn write_range(&self, name: &str, data: &[u8], offset: u64) -> Result<usize> {
        self.integer(Command::SetRange {
            key: name.into(),
            offset: to_i64(offset)?,
            value: Bytes::copy_from_slice(data),
        })
        .await?;
        Ok(data.len())
    }

    /// Deliver every key name to `sink` until it breaks, which yields `OutOfSpace`.
    pub async fn list_keys<F>(&self, mut sink: F) -> Result<()>
    where
        F: FnMut(String) -> ControlFlow<()>,
    {
        let items = match self.run(Command::Keys { pattern: "*".into() }).await? {
            (Reply::Array(items), _) => items,
            (other, name) => return Err(protocol(name, &other)),
        };
        for item in items {
            let raw = match item {
                Reply::Bulk(raw) => raw,
                other => return Err(protocol("KEYS", &other)),
            };
            // A lossy conversion would list a name that no longer matches its key.
            let key = match String::from_utf8(raw.to_vec()) {
                Ok(key) => key,
                Err(_) => {
                    debug!(key = ?raw, "skipping key that is not valid UTF-8");
                    continue;
                }
            };
            if sink(key).is_break() {
                debug!("listing sink is full");
                return Err(FsError::OutOfSpace);
            }
        }
        Ok(())
    }
}

fn protocol(command: &'static str, reply: &Reply) -> FsError {
    FsError::Protocol {
        command,
        found: reply.describe(),
    }
}

fn to_i64(value: u64) -> Result<i64> {
    i64::try_from(value).map_err(|_| FsError::InvalidArgument(format!("{value} out of range")))
}
