//! Mount helpers for starting/stopping FUSE
//!
//! Notes:
//! - Only supported on Unix-like systems. Unprivileged mounts go through fusermount3.
//! - These helpers are thin wrappers over rfuse3 raw Session APIs.

use std::path::Path;

use rfuse3::MountOptions;
use tracing::info;

use super::FuseAdapter;
use crate::kvs::Connector;
use crate::vfs::current_user;

/// Mount options for redisfs. Files are owned by the mounting user.
fn mount_options(allow_other: bool) -> MountOptions {
    let (uid, gid) = current_user();
    let mut mo = MountOptions::default();
    mo.fs_name("redisfs").uid(uid).gid(gid).allow_other(allow_other);
    mo
}

/// Mount `fs` on an existing, empty directory.
///
/// `privileged` selects a direct mount(2) instead of fusermount3.
#[cfg(target_os = "linux")]
pub async fn mount<C: Connector>(
    fs: FuseAdapter<C>,
    mount_point: impl AsRef<Path>,
    privileged: bool,
    allow_other: bool,
) -> std::io::Result<rfuse3::raw::MountHandle> {
    let mount_point = mount_point.as_ref();
    let session = rfuse3::raw::Session::new(mount_options(allow_other));
    info!(mountpoint = %mount_point.display(), privileged, allow_other, "mounting");
    if privileged {
        session.mount(fs, mount_point).await
    } else {
        session.mount_with_unprivileged(fs, mount_point).await
    }
}

/// Fallback stub for non-Linux targets.
#[cfg(not(target_os = "linux"))]
pub async fn mount<C: Connector>(
    _fs: FuseAdapter<C>,
    _mount_point: impl AsRef<Path>,
    _privileged: bool,
    _allow_other: bool,
) -> std::io::Result<rfuse3::raw::MountHandle> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "FUSE mount is only supported on Linux in this build",
    ))
}
