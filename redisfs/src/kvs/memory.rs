//! In-process store implementing the command vocabulary with Redis semantics.
//!
//! Used by the test suites and by `redisfs --memory`. Transport failures can
//! be injected to exercise the executor's reconnect path.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;

use super::{Command, Connection, Connector, Reply};
use crate::error::StoreError;

/// Redis refuses to grow a string past 512 MiB.
const MAX_VALUE_LEN: usize = 512 * 1024 * 1024;

#[derive(Default)]
struct Inner {
    data: Mutex<HashMap<String, Vec<u8>>>,
    /// Keys holding a non-string value (hash, list, ...).
    non_string: Mutex<HashSet<String>>,
    /// Keys reported by KEYS but gone for every other command.
    vanishing: Mutex<HashSet<String>>,
    failing_commands: AtomicUsize,
    failing_connects: AtomicUsize,
    connects: AtomicUsize,
    commands: AtomicUsize,
}

/// Shared handle to one in-memory keyspace.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connector(&self) -> MemoryConnector {
        MemoryConnector {
            store: self.clone(),
        }
    }

    /// Make the next `n` commands fail with a transport error.
    pub fn fail_next_commands(&self, n: usize) {
        self.inner.failing_commands.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` connection attempts fail.
    pub fn fail_next_connects(&self, n: usize) {
        self.inner.failing_connects.store(n, Ordering::SeqCst);
    }

    /// Successful connection attempts so far.
    pub fn connects(&self) -> usize {
        self.inner.connects.load(Ordering::SeqCst)
    }

    /// Commands that reached the keyspace (injected failures excluded).
    pub fn commands_seen(&self) -> usize {
        self.inner.commands.load(Ordering::SeqCst)
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.data().get(key).cloned()
    }

    pub fn insert(&self, key: impl Into<String>, value: impl Into<Vec<u8>>) {
        self.data().insert(key.into(), value.into());
    }

    /// Store `key` as a non-string value: string commands on it are rejected with WRONGTYPE.
    pub fn insert_non_string(&self, key: impl Into<String>) {
        let key = key.into();
        self.data().insert(key.clone(), Vec::new());
        lock(&self.inner.non_string).insert(key);
    }

    /// Make KEYS report `key` although it does not exist, as if it was
    /// deleted right after the enumeration.
    pub fn add_vanishing_key(&self, key: impl Into<String>) {
        lock(&self.inner.vanishing).insert(key.into());
    }

    pub fn len(&self) -> usize {
        self.data().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data().is_empty()
    }

    fn data(&self) -> MutexGuard<'_, HashMap<String, Vec<u8>>> {
        lock(&self.inner.data)
    }

    fn apply(&self, command: &Command) -> Result<Reply, StoreError> {
        if take_one(&self.inner.failing_commands) {
            return Err(StoreError::Transport("connection reset by peer".into()));
        }
        self.inner.commands.fetch_add(1, Ordering::SeqCst);

        if let Some(key) = string_key(command)
            && lock(&self.inner.non_string).contains(key)
        {
            return Err(StoreError::Rejected(
                "WRONGTYPE Operation against a key holding the wrong kind of value".into(),
            ));
        }

        let mut data = self.data();
        let reply = match command {
            Command::Set { key, value } => {
                data.insert(key.clone(), value.to_vec());
                Reply::Status("OK".into())
            }
            Command::Get { key } => match data.get(key) {
                Some(v) => Reply::Bulk(Bytes::copy_from_slice(v)),
                None => Reply::Nil,
            },
            Command::Exists { key } => Reply::Integer(data.contains_key(key) as i64),
            Command::Del { key } => Reply::Integer(data.remove(key).is_some() as i64),
            Command::Rename { key, new_key } => {
                let value = data
                    .remove(key)
                    .ok_or_else(|| StoreError::Rejected("ERR no such key".into()))?;
                data.insert(new_key.clone(), value);
                Reply::Status("OK".into())
            }
            Command::StrLen { key } => {
                Reply::Integer(data.get(key).map_or(0, |v| v.len()) as i64)
            }
            Command::Append { key, value } => {
                let entry = data.entry(key.clone()).or_default();
                if entry.len() + value.len() > MAX_VALUE_LEN {
                    return Err(too_large());
                }
                entry.extend_from_slice(value);
                Reply::Integer(entry.len() as i64)
            }
            Command::SetRange { key, offset, value } => {
                let offset = usize::try_from(*offset)
                    .map_err(|_| StoreError::Rejected("ERR offset is out of range".into()))?;
                if value.is_empty() {
                    return Ok(Reply::Integer(data.get(key).map_or(0, |v| v.len()) as i64));
                }
                let end = offset
                    .checked_add(value.len())
                    .filter(|end| *end <= MAX_VALUE_LEN)
                    .ok_or_else(too_large)?;
                let entry = data.entry(key.clone()).or_default();
                if entry.len() < end {
                    entry.resize(end, 0);
                }
                entry[offset..end].copy_from_slice(value);
                Reply::Integer(entry.len() as i64)
            }
            Command::GetRange { key, start, end } => {
                let value = data.get(key).map(Vec::as_slice).unwrap_or_default();
                Reply::Bulk(Bytes::copy_from_slice(get_range(value, *start, *end)))
            }
            Command::Keys { pattern } => Reply::Array(
                lock(&self.inner.vanishing)
                    .iter()
                    .chain(data.keys())
                    .filter(|k| glob_match(pattern.as_bytes(), k.as_bytes()))
                    .map(|k| Reply::Bulk(Bytes::copy_from_slice(k.as_bytes())))
                    .collect(),
            ),
        };
        Ok(reply)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The key of a command that only applies to string values.
fn string_key(command: &Command) -> Option<&str> {
    match command {
        Command::Get { key }
        | Command::StrLen { key }
        | Command::Append { key, .. }
        | Command::SetRange { key, .. }
        | Command::GetRange { key, .. } => Some(key),
        _ => None,
    }
}

fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

fn too_large() -> StoreError {
    StoreError::Rejected("ERR string exceeds maximum allowed size (proto-max-bulk-len)".into())
}

/// GETRANGE index semantics: inclusive bounds, negative values count from the end.
fn get_range(value: &[u8], start: i64, end: i64) -> &[u8] {
    let len = value.len() as i64;
    if len == 0 {
        return &[];
    }
    let mut start = if start < 0 { len + start } else { start };
    let mut end = if end < 0 { len + end } else { end };
    if start < 0 {
        start = 0;
    }
    if end < 0 {
        end = 0;
    }
    if end >= len {
        end = len - 1;
    }
    if start > end {
        return &[];
    }
    &value[start as usize..=end as usize]
}

/// Glob matching as used by KEYS, limited to `*` and `?`.
fn glob_match(pattern: &[u8], name: &[u8]) -> bool {
    match pattern.split_first() {
        None => name.is_empty(),
        Some((b'*', rest)) => (0..=name.len()).any(|i| glob_match(rest, &name[i..])),
        Some((b'?', rest)) => !name.is_empty() && glob_match(rest, &name[1..]),
        Some((c, rest)) => name.first() == Some(c) && glob_match(rest, &name[1..]),
    }
}

pub struct MemoryConnector {
    store: MemoryStore,
}

#[async_trait]
impl Connector for MemoryConnector {
    type Conn = MemoryConnection;

    async fn connect(&self) -> Result<MemoryConnection, StoreError> {
        if take_one(&self.store.inner.failing_connects) {
            return Err(StoreError::Transport("connection refused".into()));
        }
        self.store.inner.connects.fetch_add(1, Ordering::SeqCst);
        Ok(MemoryConnection {
            store: self.store.clone(),
        })
    }

    fn endpoint(&self) -> String {
        "memory".to_string()
    }
}

pub struct MemoryConnection {
    store: MemoryStore,
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn execute(&mut self, command: &Command) -> Result<Reply, StoreError> {
        self.store.apply(command)
    }
}
