//! VFS layer (virtual filesystem)
//!
//! Responsibilities:
//! - Map path-based filesystem calls onto the KVS primitives in `kvs::ops`.
//! - Enforce the flat namespace: `/` is the only directory, every other path
//!   names one key.
//! - Translate store outcomes into filesystem-style errors.
//!
//! Submodules:
//! - `fs`: the callback table (`KvsFs`)
pub mod fs;

use crate::error::{FsError, Result};

/// Fixed block size reported in attributes.
pub const BLOCK_SIZE: u32 = 512;
/// Full read/write/execute access for owner, group and others.
pub const FULL_ACCESS: u16 = 0o777;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileKind {
    Dir,
    File,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileAttr {
    pub kind: FileKind,
    pub size: u64,
    pub perm: u16,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub blksize: u32,
    pub blocks: u64,
}

/// A resolved path: the root directory or the key of one file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Node<'a> {
    Root,
    File(&'a str),
}

impl<'a> Node<'a> {
    /// Strip the leading separator and reject names that would imply nesting.
    pub fn resolve(path: &'a str) -> Result<Self> {
        if path == "/" {
            return Ok(Node::Root);
        }
        let name = path.strip_prefix('/').unwrap_or(path);
        if !is_flat_name(name) {
            return Err(FsError::InvalidArgument(format!("not a flat file name: {path:?}")));
        }
        Ok(Node::File(name))
    }

    /// The key of a file, or `IsADirectory` for the root.
    pub fn file(path: &'a str) -> Result<&'a str> {
        match Node::resolve(path)? {
            Node::Root => Err(FsError::IsADirectory),
            Node::File(name) => Ok(name),
        }
    }
}

/// Whether a key can be shown as a direct child of the root.
pub fn is_flat_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains(['/', '\0'])
}

/// Real uid and gid of this process.
pub fn current_user() -> (u32, u32) {
    // SAFETY: getuid and getgid cannot fail and touch no memory.
    unsafe { (libc::getuid(), libc::getgid()) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_paths() {
        assert_eq!(Node::resolve("/"), Ok(Node::Root));
        assert_eq!(Node::resolve("/a"), Ok(Node::File("a")));
        assert_eq!(Node::resolve("b"), Ok(Node::File("b")));
        assert!(Node::resolve("/a/b").is_err());
        assert!(Node::resolve("/..").is_err());
        assert!(Node::resolve("").is_err());
        assert_eq!(Node::file("/"), Err(FsError::IsADirectory));
    }

    #[test]
    fn flat_names() {
        assert!(is_flat_name("a"));
        assert!(is_flat_name("with space"));
        assert!(!is_flat_name("a/b"));
        assert!(!is_flat_name("nul\0inside"));
        assert!(!is_flat_name("."));
        assert!(!is_flat_name(""));
    }
}
