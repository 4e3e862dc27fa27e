//! Inode numbering for the flat namespace.
//!
//! The store has no notion of inodes, so numbers are handed out the first
//! time the kernel sees a name. Replies that make the kernel hold an inode
//! (lookup, create, readdirplus) are counted; a number is dropped once the
//! kernel forgets all of them, or when its name is unlinked or renamed away.
//! Numbers are never reused within one mount.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

pub const ROOT_INO: u64 = 1;

struct Tables {
    next: u64,
    by_name: HashMap<String, u64>,
    by_ino: HashMap<u64, String>,
    lookups: HashMap<u64, u64>,
}

impl Tables {
    fn drop_ino(&mut self, ino: u64) {
        self.lookups.remove(&ino);
        if let Some(name) = self.by_ino.remove(&ino) {
            self.by_name.remove(&name);
        }
    }
}

pub struct InodeTable {
    tables: Mutex<Tables>,
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}

impl InodeTable {
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(Tables {
                next: ROOT_INO + 1,
                by_name: HashMap::new(),
                by_ino: HashMap::new(),
                lookups: HashMap::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Inode of `name`, assigning a fresh number on first sight.
    pub fn ino_of(&self, name: &str) -> u64 {
        Self::assign(&mut self.lock(), name)
    }

    /// Like [`ino_of`](Self::ino_of), and count one kernel reference.
    pub fn lookup(&self, name: &str) -> u64 {
        let mut t = self.lock();
        let ino = Self::assign(&mut t, name);
        *t.lookups.entry(ino).or_default() += 1;
        ino
    }

    /// Count one more kernel reference to a known number.
    pub fn add_lookup(&self, ino: u64) {
        let mut t = self.lock();
        if t.by_ino.contains_key(&ino) {
            *t.lookups.entry(ino).or_default() += 1;
        }
    }

    fn assign(t: &mut Tables, name: &str) -> u64 {
        if let Some(ino) = t.by_name.get(name) {
            return *ino;
        }
        let ino = t.next;
        t.next += 1;
        t.by_name.insert(name.to_string(), ino);
        t.by_ino.insert(ino, name.to_string());
        ino
    }

    /// The kernel dropped `nlookup` references to `ino`.
    pub fn forget_lookups(&self, ino: u64, nlookup: u64) {
        if ino == ROOT_INO {
            return;
        }
        let mut t = self.lock();
        let left = t
            .lookups
            .get(&ino)
            .map_or(0, |count| count.saturating_sub(nlookup));
        if left == 0 {
            t.drop_ino(ino);
        } else {
            t.lookups.insert(ino, left);
        }
    }

    /// Drop unreferenced numbers whose names are no longer listed.
    pub fn prune(&self, listed: &[String]) {
        let listed: HashSet<&str> = listed.iter().map(String::as_str).collect();
        let mut t = self.lock();
        let stale: Vec<u64> = t
            .by_ino
            .iter()
            .filter(|(ino, name)| !t.lookups.contains_key(*ino) && !listed.contains(name.as_str()))
            .map(|(ino, _)| *ino)
            .collect();
        for ino in stale {
            t.drop_ino(ino);
        }
    }

    pub fn name_of(&self, ino: u64) -> Option<String> {
        self.lock().by_ino.get(&ino).cloned()
    }

    pub fn forget(&self, name: &str) {
        let mut t = self.lock();
        if let Some(ino) = t.by_name.get(name).copied() {
            t.drop_ino(ino);
        }
    }

    /// Move the number held by `from` to `to`, dropping whatever `to` had.
    pub fn rename(&self, from: &str, to: &str) {
        let mut t = self.lock();
        if let Some(old) = t.by_name.get(to).copied() {
            t.drop_ino(old);
        }
        if let Some(ino) = t.by_name.remove(from) {
            t.by_name.insert(to.to_string(), ino);
            t.by_ino.insert(ino, to.to_string());
        }
    }

    pub fn len(&self) -> usize {
        self.lock().by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
