//! Path-based filesystem over a flat key-value namespace.
//!
//! `KvsFs` keeps no per-file state between calls: every call re-derives the
//! key from its path, so open/flush/release and the directory handle calls
//! never touch the store.

use std::ops::ControlFlow;

use bytes::Bytes;
use tracing::debug;

use super::{BLOCK_SIZE, FULL_ACCESS, FileAttr, FileKind, Node, is_flat_name};
use crate::error::{FsError, Result};
use crate::kvs::{Connector, KvsOps};

pub struct KvsFs<C: Connector> {
    ops: KvsOps<C>,
    uid: u32,
    gid: u32,
}

impl<C: Connector> KvsFs<C> {
    pub fn new(ops: KvsOps<C>, uid: u32, gid: u32) -> Self {
        Self { ops, uid, gid }
    }

    /// Files are reported as owned by the user and group running the daemon.
    pub fn with_current_user(ops: KvsOps<C>) -> Self {
        let (uid, gid) = super::current_user();
        Self::new(ops, uid, gid)
    }

    pub fn ops(&self) -> &KvsOps<C> {
        &self.ops
    }

    /// Establish the store connection unless one is already held.
    pub async fn init(&self) -> Result<()> {
        debug!(op = "init");
        let executor = self.ops.executor();
        if !executor.is_connected().await {
            executor.connect().await?;
        }
        Ok(())
    }

    /// Release the store connection.
    pub async fn shutdown(&self) {
        debug!(op = "destroy");
        self.ops.executor().disconnect().await;
    }

    pub async fn attributes(&self, path: &str) -> Result<FileAttr> {
        debug!(op = "getattr", path);
        match Node::resolve(path)? {
            Node::Root => Ok(self.make_attr(FileKind::Dir, 0)),
            Node::File(name) => {
                let size = self.ops.length(name).await?;
                Ok(self.make_attr(FileKind::File, size))
            }
        }
    }

    fn make_attr(&self, kind: FileKind, size: u64) -> FileAttr {
        FileAttr {
            kind,
            size,
            perm: FULL_ACCESS,
            nlink: match kind {
                FileKind::Dir => 2,
                FileKind::File => 1,
            },
            uid: self.uid,
            gid: self.gid,
            blksize: BLOCK_SIZE,
            blocks: size.div_ceil(u64::from(BLOCK_SIZE)),
        }
    }

    /// Create an empty regular file. `O_EXCL` in `flags` makes an existing key an error.
    pub async fn create(&self, path: &str, mode: u32, flags: u32) -> Result<()> {
        debug!(op = "create", path, mode, flags);
        let name = Node::file(path)?;
        if mode & libc::S_IFMT != libc::S_IFREG {
            return Err(FsError::InvalidArgument(format!(
                "only regular files can be created (mode {mode:o})"
            )));
        }
        if has_flag(flags, libc::O_EXCL) && self.ops.exists(name).await? {
            return Err(FsError::AlreadyExists);
        }
        self.ops.create(name).await
    }

    pub async fn remove(&self, path: &str) -> Result<()> {
        debug!(op = "unlink", path);
        let name = Node::file(path)?;
        self.ops.delete(name).await
    }

    /// Rename, replacing any existing destination.
    pub async fn rename(&self, from: &str, to: &str) -> Result<()> {
        debug!(op = "rename", path = from, to);
        let name = Node::file(from)?;
        let new_name = Node::file(to)?;
        self.ops.rename(name, new_name).await
    }

    /// Grow with NULs or cut to `new_size`.
    pub async fn resize(&self, path: &str, new_size: u64) -> Result<()> {
        debug!(op = "truncate", path, new_size);
        let name = Node::file(path)?;
        let current = self.ops.length(name).await?;
        if new_size > current {
            self.ops.zero_extend(name, new_size).await
        } else if new_size < current {
            self.ops.truncate(name, new_size).await
        } else {
            Ok(())
        }
    }

    /// Check that the file can be opened, honouring `O_CREAT` and `O_TRUNC`.
    pub async fn open(&self, path: &str, flags: u32) -> Result<()> {
        debug!(op = "open", path, flags);
        let name = Node::file(path)?;
        if !self.ops.exists(name).await? {
            if has_flag(flags, libc::O_CREAT) {
                return self.ops.create(name).await;
            }
            return Err(FsError::NotFound);
        }
        if has_flag(flags, libc::O_TRUNC) {
            self.ops.truncate(name, 0).await?;
        }
        Ok(())
    }

    pub async fn read(&self, path: &str, size: u32, offset: u64) -> Result<Bytes> {
        debug!(op = "read", path, size, offset);
        let name = Node::file(path)?;
        self.ops.read_range(name, size, offset).await
    }

    pub async fn write(&self, path: &str, data: &[u8], offset: u64) -> Result<usize> {
        debug!(op = "write", path, size = data.len(), offset);
        let name = Node::file(path)?;
        self.ops.write_range(name, data, offset).await
    }

    /// Feed the names in the root directory to `sink`.
    ///
    /// Keys that cannot be shown as flat names (for example `a/b`) are skipped.
    pub async fn list<F>(&self, path: &str, mut sink: F) -> Result<()>
    where
        F: FnMut(String) -> ControlFlow<()>,
    {
        debug!(op = "readdir", path);
        if Node::resolve(path)? != Node::Root {
            return Err(FsError::NotADirectory);
        }
        self.ops
            .list_keys(|key| {
                if is_flat_name(&key) {
                    sink(key)
                } else {
                    debug!(key, "skipping key that is not a flat file name");
                    ControlFlow::Continue(())
                }
            })
            .await
    }

    pub fn open_dir(&self, path: &str) -> Result<()> {
        debug!(op = "opendir", path);
        match Node::resolve(path)? {
            Node::Root => Ok(()),
            Node::File(_) => Err(FsError::NotADirectory),
        }
    }

    pub fn release_dir(&self, path: &str) -> Result<()> {
        debug!(op = "releasedir", path);
        Ok(())
    }

    pub fn fsync_dir(&self, path: &str) -> Result<()> {
        debug!(op = "fsyncdir", path);
        Ok(())
    }

    /// Nothing is buffered, so there is nothing to flush.
    pub fn flush(&self, path: &str) -> Result<()> {
        debug!(op = "flush", path);
        Ok(())
    }

    pub fn release(&self, path: &str) -> Result<()> {
        debug!(op = "release", path);
        Ok(())
    }

    pub fn fsync(&self, path: &str) -> Result<()> {
        debug!(op = "fsync", path);
        Ok(())
    }

    /// Permission checks always pass: every file is fully accessible.
    pub fn access(&self, path: &str, mask: u32) -> Result<()> {
        debug!(op = "access", path, mask);
        Ok(())
    }

    pub fn make_dir(&self, path: &str) -> Result<()> {
        unsupported("mkdir", path)
    }

    pub fn remove_dir(&self, path: &str) -> Result<()> {
        unsupported("rmdir", path)
    }

    pub fn symlink(&self, path: &str) -> Result<()> {
        unsupported("symlink", path)
    }

    pub fn read_link(&self, path: &str) -> Result<Bytes> {
        unsupported("readlink", path)
    }

    pub fn link(&self, path: &str) -> Result<()> {
        unsupported("link", path)
    }

    pub fn set_mode(&self, path: &str) -> Result<()> {
        unsupported("chmod", path)
    }

    pub fn set_owner(&self, path: &str) -> Result<()> {
        unsupported("chown", path)
    }

    pub fn set_times(&self, path: &str) -> Result<()> {
        unsupported("utimens", path)
    }

    pub fn set_xattr(&self, path: &str) -> Result<()> {
        unsupported("setxattr", path)
    }

    pub fn get_xattr(&self, path: &str) -> Result<Bytes> {
        unsupported("getxattr", path)
    }

    pub fn list_xattr(&self, path: &str) -> Result<Bytes> {
        unsupported("listxattr", path)
    }

    pub fn remove_xattr(&self, path: &str) -> Result<()> {
        unsupported("removexattr", path)
    }

    pub fn statfs(&self, path: &str) -> Result<()> {
        unsupported("statfs", path)
    }
}

fn unsupported<T>(op: &'static str, path: &str) -> Result<T> {
    debug!(op, path, "unsupported");
    Err(FsError::Unsupported)
}

fn has_flag(flags: u32, flag: libc::c_int) -> bool {
    flags & flag as u32 != 0
}
