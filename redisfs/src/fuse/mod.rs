//! FUSE binding for redisfs.
//!
//! `FuseAdapter` implements the rfuse3 raw `Filesystem` trait on top of the
//! path-based [`KvsFs`]. The kernel speaks inodes, the adapter speaks paths:
//! inode numbers are kept in an [`InodeTable`] and every request is resolved
//! to `/` or `/<name>` before delegating.
//!
//! Submodules:
//! - `inode`: name <-> inode number mapping
//! - `mount`: mounting helpers over rfuse3 sessions
pub mod inode;
pub mod mount;

use std::ffi::{OsStr, OsString};
use std::num::NonZeroU32;
use std::ops::ControlFlow;
use std::pin::Pin;
use std::time::{Duration, SystemTime};

use futures_util::stream::{self, Stream, StreamExt};
use rfuse3::raw::Filesystem;
use rfuse3::raw::Request;
use rfuse3::raw::reply::{
    DirectoryEntry, DirectoryEntryPlus, ReplyAttr, ReplyCreated, ReplyData, ReplyDirectory,
    ReplyDirectoryPlus, ReplyEntry, ReplyInit, ReplyOpen, ReplyStatFs, ReplyWrite, ReplyXAttr,
};
use rfuse3::{Errno, FileType as FuseFileType, Result as FuseResult, SetAttr, Timestamp};
use tracing::debug;

use crate::error::FsError;
use crate::kvs::Connector;
use crate::vfs::fs::KvsFs;
use crate::vfs::{FileAttr, FileKind};
use inode::{InodeTable, ROOT_INO};

const TTL: Duration = Duration::from_secs(1);
const MAX_WRITE: u32 = 1024 * 1024;

impl From<FsError> for Errno {
    fn from(err: FsError) -> Self {
        err.errno().into()
    }
}

pub struct FuseAdapter<C: Connector> {
    fs: KvsFs<C>,
    inodes: InodeTable,
    max_dir_entries: usize,
}

impl<C: Connector> FuseAdapter<C> {
    pub fn new(fs: KvsFs<C>, max_dir_entries: usize) -> Self {
        Self {
            fs,
            inodes: InodeTable::new(),
            max_dir_entries,
        }
    }

    pub fn fs(&self) -> &KvsFs<C> {
        &self.fs
    }

    /// Path of a known inode.
    fn path_of(&self, ino: u64) -> FuseResult<String> {
        if ino == ROOT_INO {
            return Ok("/".to_string());
        }
        match self.inodes.name_of(ino) {
            Some(name) => Ok(format!("/{name}")),
            None => Err(libc::ENOENT.into()),
        }
    }

    /// Path of `name` inside `parent`, which must be the root.
    fn child_path(&self, parent: u64, name: &OsStr) -> FuseResult<(String, String)> {
        if parent != ROOT_INO {
            return Err(match self.inodes.name_of(parent) {
                Some(_) => libc::ENOTDIR.into(),
                None => libc::ENOENT.into(),
            });
        }
        let Some(name) = name.to_str() else {
            return Err(libc::EINVAL.into());
        };
        Ok((format!("/{name}"), name.to_string()))
    }

    /// Inode for a path handed to the kernel, counted as one lookup.
    fn remember(&self, path: &str) -> u64 {
        match path.strip_prefix('/') {
            Some("") | None => ROOT_INO,
            Some(name) => self.inodes.lookup(name),
        }
    }

    async fn entry(&self, path: &str) -> FuseResult<ReplyEntry> {
        let attr = self.fs.attributes(path).await?;
        Ok(ReplyEntry {
            ttl: TTL,
            attr: to_fuse_attr(self.remember(path), &attr),
            generation: 0,
        })
    }

    async fn make_node(&self, parent: u64, name: &OsStr, mode: u32) -> FuseResult<ReplyEntry> {
        let (path, _) = self.child_path(parent, name)?;
        // mknod(2) never opens an existing file.
        self.fs.create(&path, mode, libc::O_EXCL as u32).await?;
        self.entry(&path).await
    }

    /// Collect the root listing, bounded by `max_dir_entries`.
    async fn list_root(&self, ino: u64) -> FuseResult<Vec<String>> {
        let path = self.path_of(ino)?;
        let limit = self.max_dir_entries;
        let mut names = Vec::new();
        self.fs
            .list(&path, |name| {
                if names.len() >= limit {
                    return ControlFlow::Break(());
                }
                names.push(name);
                ControlFlow::Continue(())
            })
            .await?;
        self.inodes.prune(&names);
        Ok(names)
    }

    /// `.` and `..`, then one entry per key. Offsets follow listing order.
    async fn dir_entries(&self, ino: u64) -> FuseResult<Vec<DirectoryEntry>> {
        let names = self.list_root(ino).await?;

        let mut all = Vec::with_capacity(names.len() + 2);
        for (name, offset) in [(".", 1), ("..", 2)] {
            all.push(DirectoryEntry {
                inode: ROOT_INO,
                kind: FuseFileType::Directory,
                name: OsString::from(name),
                offset,
            });
        }
        for (i, name) in names.into_iter().enumerate() {
            all.push(DirectoryEntry {
                inode: self.inodes.ino_of(&name),
                kind: FuseFileType::RegularFile,
                name: OsString::from(name),
                offset: i as i64 + 3,
            });
        }
        Ok(all)
    }

    /// Like [`dir_entries`](Self::dir_entries) with attributes. Keys whose
    /// attributes cannot be read are left out; their offsets stay unused.
    async fn dir_entries_plus(&self, ino: u64) -> FuseResult<Vec<DirectoryEntryPlus>> {
        let names = self.list_root(ino).await?;
        let root = self.fs.attributes("/").await?;

        let mut all = Vec::with_capacity(names.len() + 2);
        for (name, offset) in [(".", 1), ("..", 2)] {
            all.push(DirectoryEntryPlus {
                inode: ROOT_INO,
                generation: 0,
                kind: FuseFileType::Directory,
                name: OsString::from(name),
                offset,
                attr: to_fuse_attr(ROOT_INO, &root),
                entry_ttl: TTL,
                attr_ttl: TTL,
            });
        }
        for (i, name) in names.into_iter().enumerate() {
            let path = format!("/{name}");
            let attr = match self.fs.attributes(&path).await {
                Ok(attr) => attr,
                Err(e @ FsError::Unavailable(_)) => return Err(e.into()),
                // Deleted since KEYS, or not a string value.
                Err(e) => {
                    debug!(key = %name, error = %e, "leaving key out of readdirplus");
                    continue;
                }
            };
            let child = self.inodes.ino_of(&name);
            all.push(DirectoryEntryPlus {
                inode: child,
                generation: 0,
                kind: FuseFileType::RegularFile,
                name: OsString::from(name),
                offset: i as i64 + 3,
                attr: to_fuse_attr(child, &attr),
                entry_ttl: TTL,
                attr_ttl: TTL,
            });
        }
        Ok(all)
    }
}

/// Entries past the kernel's resume `offset`, which is the offset of the
/// last entry it received.
fn resume_after<T>(entries: Vec<T>, offset: i64, offset_of: impl Fn(&T) -> i64) -> Vec<T> {
    entries
        .into_iter()
        .filter(|e| offset_of(e) > offset)
        .collect()
}

impl<C: Connector> Filesystem for FuseAdapter<C> {
    type DirEntryStream<'a>
        = Pin<Box<dyn Stream<Item = FuseResult<DirectoryEntry>> + Send + 'a>>
    where
        Self: 'a;

    type DirEntryPlusStream<'a>
        = Pin<Box<dyn Stream<Item = FuseResult<DirectoryEntryPlus>> + Send + 'a>>
    where
        Self: 'a;

    async fn init(&self, _req: Request) -> FuseResult<ReplyInit> {
        self.fs.init().await?;
        let max_write = NonZeroU32::new(MAX_WRITE).ok_or(libc::EINVAL)?;
        Ok(ReplyInit { max_write })
    }

    async fn destroy(&self, _req: Request) {
        self.fs.shutdown().await;
    }

    async fn lookup(&self, _req: Request, parent: u64, name: &OsStr) -> FuseResult<ReplyEntry> {
        let (path, name) = self.child_path(parent, name)?;
        match self.fs.attributes(&path).await {
            Ok(attr) => Ok(ReplyEntry {
                ttl: TTL,
                attr: to_fuse_attr(self.inodes.lookup(&name), &attr),
                generation: 0,
            }),
            Err(FsError::NotFound) => {
                self.inodes.forget(&name);
                Err(libc::ENOENT.into())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn forget(&self, _req: Request, inode: u64, nlookup: u64) {
        self.inodes.forget_lookups(inode, nlookup);
    }

    async fn batch_forget(&self, _req: Request, inodes: &[(u64, u64)]) {
        for (inode, nlookup) in inodes {
            self.inodes.forget_lookups(*inode, *nlookup);
        }
    }

    async fn getattr(
        &self,
        _req: Request,
        ino: u64,
        _fh: Option<u64>,
        _flags: u32,
    ) -> FuseResult<ReplyAttr> {
        let path = self.path_of(ino)?;
        let attr = self.fs.attributes(&path).await?;
        Ok(ReplyAttr {
            ttl: TTL,
            attr: to_fuse_attr(ino, &attr),
        })
    }

    async fn setattr(
        &self,
        _req: Request,
        ino: u64,
        _fh: Option<u64>,
        set_attr: SetAttr,
    ) -> FuseResult<ReplyAttr> {
        let path = self.path_of(ino)?;
        if set_attr.mode.is_some() {
            self.fs.set_mode(&path)?;
        }
        if set_attr.uid.is_some() || set_attr.gid.is_some() {
            self.fs.set_owner(&path)?;
        }
        // A truncate may carry fresh timestamps as well; only the size matters then.
        if let Some(size) = set_attr.size {
            self.fs.resize(&path, size).await?;
        } else if set_attr.atime.is_some() || set_attr.mtime.is_some() {
            self.fs.set_times(&path)?;
        }
        let attr = self.fs.attributes(&path).await?;
        Ok(ReplyAttr {
            ttl: TTL,
            attr: to_fuse_attr(ino, &attr),
        })
    }

    async fn readlink(&self, _req: Request, ino: u64) -> FuseResult<ReplyData> {
        let path = self.path_of(ino)?;
        let data = self.fs.read_link(&path)?;
        Ok(ReplyData { data })
    }

    async fn symlink(
        &self,
        _req: Request,
        parent: u64,
        name: &OsStr,
        _link: &OsStr,
    ) -> FuseResult<ReplyEntry> {
        let (path, _) = self.child_path(parent, name)?;
        self.fs.symlink(&path)?;
        self.entry(&path).await
    }

    async fn mknod(
        &self,
        _req: Request,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _rdev: u32,
    ) -> FuseResult<ReplyEntry> {
        self.make_node(parent, name, mode).await
    }

    async fn mkdir(
        &self,
        _req: Request,
        parent: u64,
        name: &OsStr,
        _mode: u32,
        _umask: u32,
    ) -> FuseResult<ReplyEntry> {
        let (path, _) = self.child_path(parent, name)?;
        self.fs.make_dir(&path)?;
        self.entry(&path).await
    }

    async fn unlink(&self, _req: Request, parent: u64, name: &OsStr) -> FuseResult<()> {
        let (path, name) = self.child_path(parent, name)?;
        self.fs.remove(&path).await?;
        self.inodes.forget(&name);
        Ok(())
    }

    async fn rmdir(&self, _req: Request, parent: u64, name: &OsStr) -> FuseResult<()> {
        let (path, _) = self.child_path(parent, name)?;
        Ok(self.fs.remove_dir(&path)?)
    }

    async fn rename(
        &self,
        _req: Request,
        parent: u64,
        name: &OsStr,
        new_parent: u64,
        new_name: &OsStr,
    ) -> FuseResult<()> {
        let (from, name) = self.child_path(parent, name)?;
        let (to, new_name) = self.child_path(new_parent, new_name)?;
        self.fs.rename(&from, &to).await?;
        self.inodes.rename(&name, &new_name);
        Ok(())
    }

    async fn link(
        &self,
        _req: Request,
        ino: u64,
        new_parent: u64,
        new_name: &OsStr,
    ) -> FuseResult<ReplyEntry> {
        let path = self.path_of(ino)?;
        self.child_path(new_parent, new_name)?;
        self.fs.link(&path)?;
        self.entry(&path).await
    }

    async fn open(&self, _req: Request, ino: u64, flags: u32) -> FuseResult<ReplyOpen> {
        let path = self.path_of(ino)?;
        self.fs.open(&path, flags).await?;
        Ok(ReplyOpen { fh: 0, flags: 0 })
    }

    async fn read(
        &self,
        _req: Request,
        ino: u64,
        _fh: u64,
        offset: u64,
        size: u32,
    ) -> FuseResult<ReplyData> {
        let path = self.path_of(ino)?;
        let data = self.fs.read(&path, size, offset).await?;
        Ok(ReplyData { data })
    }

    async fn write(
        &self,
        _req: Request,
        ino: u64,
        _fh: u64,
        offset: u64,
        data: &[u8],
        _write_flags: u32,
        _flags: u32,
    ) -> FuseResult<ReplyWrite> {
        let path = self.path_of(ino)?;
        let n = self.fs.write(&path, data, offset).await?;
        let written = u32::try_from(n).map_err(|_| libc::EIO)?;
        Ok(ReplyWrite { written })
    }

    async fn statfs(&self, _req: Request, ino: u64) -> FuseResult<ReplyStatFs> {
        let path = self.path_of(ino)?;
        self.fs.statfs(&path)?;
        Err(libc::ENOSYS.into())
    }

    async fn release(
        &self,
        _req: Request,
        ino: u64,
        _fh: u64,
        _flags: u32,
        _lock_owner: u64,
        _flush: bool,
    ) -> FuseResult<()> {
        let path = self.path_of(ino)?;
        Ok(self.fs.release(&path)?)
    }

    async fn fsync(&self, _req: Request, ino: u64, _fh: u64, _datasync: bool) -> FuseResult<()> {
        let path = self.path_of(ino)?;
        Ok(self.fs.fsync(&path)?)
    }

    async fn setxattr(
        &self,
        _req: Request,
        ino: u64,
        _name: &OsStr,
        _value: &[u8],
        _flags: u32,
        _position: u32,
    ) -> FuseResult<()> {
        let path = self.path_of(ino)?;
        Ok(self.fs.set_xattr(&path)?)
    }

    async fn getxattr(
        &self,
        _req: Request,
        ino: u64,
        _name: &OsStr,
        _size: u32,
    ) -> FuseResult<ReplyXAttr> {
        let path = self.path_of(ino)?;
        let data = self.fs.get_xattr(&path)?;
        Ok(ReplyXAttr::Data(data))
    }

    async fn listxattr(&self, _req: Request, ino: u64, _size: u32) -> FuseResult<ReplyXAttr> {
        let path = self.path_of(ino)?;
        let data = self.fs.list_xattr(&path)?;
        Ok(ReplyXAttr::Data(data))
    }

    async fn removexattr(&self, _req: Request, ino: u64, _name: &OsStr) -> FuseResult<()> {
        let path = self.path_of(ino)?;
        Ok(self.fs.remove_xattr(&path)?)
    }

    async fn flush(&self, _req: Request, ino: u64, _fh: u64, _lock_owner: u64) -> FuseResult<()> {
        let path = self.path_of(ino)?;
        Ok(self.fs.flush(&path)?)
    }

    async fn opendir(&self, _req: Request, ino: u64, _flags: u32) -> FuseResult<ReplyOpen> {
        let path = self.path_of(ino)?;
        self.fs.open_dir(&path)?;
        Ok(ReplyOpen { fh: 0, flags: 0 })
    }

    async fn readdir<'a>(
        &'a self,
        _req: Request,
        ino: u64,
        _fh: u64,
        offset: i64,
    ) -> FuseResult<ReplyDirectory<Self::DirEntryStream<'a>>> {
        let all = self.dir_entries(ino).await?;
        let entries: Vec<_> = resume_after(all, offset, |e| e.offset)
            .into_iter()
            .map(Ok)
            .collect();
        let boxed: Self::DirEntryStream<'a> = Box::pin(stream::iter(entries));
        Ok(ReplyDirectory { entries: boxed })
    }

    async fn readdirplus<'a>(
        &'a self,
        _req: Request,
        ino: u64,
        _fh: u64,
        offset: u64,
        _lock_owner: u64,
    ) -> FuseResult<ReplyDirectoryPlus<Self::DirEntryPlusStream<'a>>> {
        let all = self.dir_entries_plus(ino).await?;
        let offset = i64::try_from(offset).unwrap_or(i64::MAX);
        let entries = resume_after(all, offset, |e| e.offset);
        // The kernel holds a reference to every entry it is handed.
        let counted = stream::iter(entries).inspect(move |e| {
            if e.inode != ROOT_INO {
                self.inodes.add_lookup(e.inode);
            }
        });
        let boxed: Self::DirEntryPlusStream<'a> = Box::pin(counted.map(Ok));
        Ok(ReplyDirectoryPlus { entries: boxed })
    }

    async fn releasedir(&self, _req: Request, ino: u64, _fh: u64, _flags: u32) -> FuseResult<()> {
        let path = self.path_of(ino)?;
        Ok(self.fs.release_dir(&path)?)
    }

    async fn fsyncdir(
        &self,
        _req: Request,
        ino: u64,
        _fh: u64,
        _datasync: bool,
    ) -> FuseResult<()> {
        let path = self.path_of(ino)?;
        Ok(self.fs.fsync_dir(&path)?)
    }

    async fn access(&self, _req: Request, ino: u64, mask: u32) -> FuseResult<()> {
        let path = self.path_of(ino)?;
        Ok(self.fs.access(&path, mask)?)
    }

    async fn create(
        &self,
        _req: Request,
        parent: u64,
        name: &OsStr,
        mode: u32,
        flags: u32,
    ) -> FuseResult<ReplyCreated> {
        let (path, _) = self.child_path(parent, name)?;
        self.fs.create(&path, mode, flags).await?;
        let attr = self.fs.attributes(&path).await?;
        let ino = self.remember(&path);
        debug!(ino, path, "created");
        Ok(ReplyCreated {
            ttl: TTL,
            attr: to_fuse_attr(ino, &attr),
            generation: 0,
            fh: 0,
            flags: 0,
        })
    }

    async fn interrupt(&self, _req: Request, _unique: u64) -> FuseResult<()> {
        Ok(())
    }
}

fn to_fuse_kind(kind: FileKind) -> FuseFileType {
    match kind {
        FileKind::Dir => FuseFileType::Directory,
        FileKind::File => FuseFileType::RegularFile,
    }
}

/// Timestamps are not stored, so every attribute reports the current time.
fn to_fuse_attr(ino: u64, attr: &FileAttr) -> rfuse3::raw::reply::FileAttr {
    let now = Timestamp::from(SystemTime::now());
    rfuse3::raw::reply::FileAttr {
        ino,
        size: attr.size,
        blocks: attr.blocks,
        atime: now,
        mtime: now,
        ctime: now,
        #[cfg(target_os = "macos")]
        crtime: now,
        kind: to_fuse_kind(attr.kind),
        perm: attr.perm,
        nlink: attr.nlink,
        uid: attr.uid,
        gid: attr.gid,
        rdev: 0,
        #[cfg(target_os = "macos")]
        flags: 0,
        blksize: attr.blksize,
    }
}
