//! redisfs: a FUSE filesystem storing each file as one key in a Redis-like store.
//!
//! The root directory lists the keyspace. Every key is a regular file whose
//! contents are the key's value. There are no subdirectories.

pub mod config;
pub mod error;
pub mod fuse;
pub mod kvs;
pub mod vfs;
