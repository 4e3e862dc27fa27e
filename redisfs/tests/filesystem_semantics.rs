//! File semantics of the adapter, driven through the in-memory store.

use std::collections::HashSet;
use std::ops::ControlFlow;

use redisfs::config::{ExtendStrategy, FailurePolicy};
use redisfs::error::FsError;
use redisfs::kvs::memory::{MemoryConnector, MemoryStore};
use redisfs::kvs::{Executor, KvsOps};
use redisfs::vfs::fs::KvsFs;

const REG: u32 = libc::S_IFREG | 0o644;
const EXCL: u32 = (libc::O_CREAT | libc::O_EXCL) as u32;
const RDWR: u32 = libc::O_RDWR as u32;
const RDWR_CREAT: u32 = (libc::O_RDWR | libc::O_CREAT) as u32;

fn mount_fs(store: &MemoryStore, extend: ExtendStrategy) -> KvsFs<MemoryConnector> {
    let executor = Executor::new(store.connector(), FailurePolicy::Surface);
    KvsFs::new(KvsOps::new(executor, extend), 1000, 1000)
}

async fn read_all(fs: &KvsFs<MemoryConnector>, path: &str) -> Vec<u8> {
    fs.read(path, 1 << 20, 0).await.unwrap().to_vec()
}

async fn names(fs: &KvsFs<MemoryConnector>) -> HashSet<String> {
    let mut seen = HashSet::new();
    fs.list("/", |name| {
        seen.insert(name);
        ControlFlow::Continue(())
    })
    .await
    .unwrap();
    seen
}

#[tokio::test]
async fn example_scenario() {
    let store = MemoryStore::new();
    let fs = mount_fs(&store, ExtendStrategy::default());

    fs.create("/a", REG, EXCL).await.unwrap();
    assert_eq!(fs.write("/a", b"HELLO", 0).await, Ok(5));
    assert_eq!(fs.read("/a", 10, 0).await.unwrap(), &b"HELLO"[..]);

    fs.resize("/a", 2).await.unwrap();
    assert_eq!(read_all(&fs, "/a").await, b"HE");

    fs.create("/b", REG, 0).await.unwrap();
    fs.rename("/a", "/b").await.unwrap();
    assert_eq!(read_all(&fs, "/b").await, b"HE");
    assert_eq!(fs.attributes("/a").await, Err(FsError::NotFound));
}

#[tokio::test]
async fn exclusive_create_twice_fails() {
    let store = MemoryStore::new();
    let fs = mount_fs(&store, ExtendStrategy::default());
    for name in ["/x", "/with space", "/ünïcode"] {
        fs.create(name, REG, EXCL).await.unwrap();
        assert_eq!(fs.create(name, REG, EXCL).await, Err(FsError::AlreadyExists));
    }
}

#[tokio::test]
async fn writes_past_the_end_leave_a_zero_gap() {
    let store = MemoryStore::new();
    let fs = mount_fs(&store, ExtendStrategy::default());
    fs.create("/f", REG, 0).await.unwrap();
    fs.write("/f", b"abc", 0).await.unwrap();

    assert_eq!(fs.write("/f", b"tail", 10).await, Ok(4));
    let content = read_all(&fs, "/f").await;
    assert_eq!(content.len(), 14);
    assert_eq!(&content[..3], b"abc");
    assert!(content[3..10].iter().all(|b| *b == 0));

    // Reading past the new end returns only the written tail.
    assert_eq!(fs.read("/f", 100, 10).await.unwrap(), &b"tail"[..]);
    assert_eq!(fs.attributes("/f").await.unwrap().size, 14);
}

#[tokio::test]
async fn truncate_preserves_prefix() {
    let store = MemoryStore::new();
    let fs = mount_fs(&store, ExtendStrategy::default());
    let original: Vec<u8> = (0..=255u8).cycle().take(1024).collect();
    fs.create("/f", REG, 0).await.unwrap();
    fs.write("/f", &original, 0).await.unwrap();

    for size in [1000u64, 512, 7, 1] {
        fs.resize("/f", size).await.unwrap();
        assert_eq!(read_all(&fs, "/f").await, &original[..size as usize]);
    }
    fs.resize("/f", 0).await.unwrap();
    assert!(read_all(&fs, "/f").await.is_empty());
    assert_eq!(fs.attributes("/f").await.unwrap().size, 0);
}

#[tokio::test]
async fn rename_replaces_destination() {
    let store = MemoryStore::new();
    let fs = mount_fs(&store, ExtendStrategy::default());
    fs.create("/src", REG, 0).await.unwrap();
    fs.write("/src", b"source content", 0).await.unwrap();
    fs.create("/dst", REG, 0).await.unwrap();
    fs.write("/dst", b"old", 0).await.unwrap();

    fs.rename("/src", "/dst").await.unwrap();
    assert_eq!(read_all(&fs, "/dst").await, b"source content");
    assert_eq!(fs.attributes("/src").await, Err(FsError::NotFound));
    assert!(!names(&fs).await.contains("src"));
}

#[tokio::test]
async fn listing_returns_every_created_name() {
    let store = MemoryStore::new();
    let fs = mount_fs(&store, ExtendStrategy::default());
    let created: HashSet<String> = (0..50).map(|i| format!("file-{i}")).collect();
    for name in &created {
        fs.create(&format!("/{name}"), REG, EXCL).await.unwrap();
    }
    assert_eq!(names(&fs).await, created);
}

#[tokio::test]
async fn delete_absent_and_twice() {
    let store = MemoryStore::new();
    let fs = mount_fs(&store, ExtendStrategy::default());
    assert_eq!(fs.remove("/ghost").await, Err(FsError::NotFound));

    fs.create("/once", REG, 0).await.unwrap();
    fs.remove("/once").await.unwrap();
    assert_eq!(fs.remove("/once").await, Err(FsError::NotFound));
}

#[tokio::test]
async fn extend_strategies_agree() {
    let mut results = Vec::new();
    for strategy in [ExtendStrategy::RangedWrite, ExtendStrategy::ChunkedAppend] {
        let store = MemoryStore::new();
        let fs = mount_fs(&store, strategy);
        fs.create("/f", REG, 0).await.unwrap();
        fs.write("/f", b"seed", 0).await.unwrap();
        fs.resize("/f", 2049).await.unwrap();
        results.push(read_all(&fs, "/f").await);
    }
    assert_eq!(results[0].len(), 2049);
    assert_eq!(results[0], results[1]);
}

// Scenarios below mirror a POSIX client using open/lseek/write/read/ftruncate/rename.

#[tokio::test]
async fn open_existing_and_missing() {
    let store = MemoryStore::new();
    let fs = mount_fs(&store, ExtendStrategy::default());
    fs.open("/open.txt", RDWR_CREAT).await.unwrap();
    fs.release("/open.txt").unwrap();
    fs.open("/open.txt", RDWR).await.unwrap();
    assert_eq!(fs.open("/missing.txt", RDWR).await, Err(FsError::NotFound));
}

#[tokio::test]
async fn overwrite_in_the_middle() {
    let store = MemoryStore::new();
    let fs = mount_fs(&store, ExtendStrategy::default());
    let mut expected: Vec<u8> = (0..512u32).map(|i| (i % 251) as u8).collect();
    fs.open("/offset.txt", RDWR_CREAT).await.unwrap();
    assert_eq!(fs.write("/offset.txt", &expected, 0).await, Ok(512));

    expected[80..160].fill(b'#');
    assert_eq!(fs.write("/offset.txt", &expected[80..160], 80).await, Ok(80));
    assert_eq!(fs.read("/offset.txt", 512, 0).await.unwrap(), &expected[..]);
}

#[tokio::test]
async fn seek_past_end_and_write() {
    let store = MemoryStore::new();
    let fs = mount_fs(&store, ExtendStrategy::default());
    let mut expected = vec![b'x'; 1024];
    expected[512..1000].fill(0);

    fs.open("/extend.txt", RDWR_CREAT).await.unwrap();
    fs.write("/extend.txt", &expected[..512], 0).await.unwrap();
    assert_eq!(fs.write("/extend.txt", &expected[1000..], 1000).await, Ok(24));
    assert_eq!(fs.read("/extend.txt", 1024, 0).await.unwrap(), &expected[..]);
}

#[tokio::test]
async fn ftruncate_shrinks_then_empties() {
    let store = MemoryStore::new();
    let fs = mount_fs(&store, ExtendStrategy::default());
    let data = vec![b'z'; 1024];
    fs.open("/trunc.txt", RDWR_CREAT).await.unwrap();
    fs.write("/trunc.txt", &data, 0).await.unwrap();

    fs.resize("/trunc.txt", 512).await.unwrap();
    assert_eq!(fs.read("/trunc.txt", 1024, 0).await.unwrap().len(), 512);
    fs.resize("/trunc.txt", 0).await.unwrap();
    assert!(fs.read("/trunc.txt", 1024, 0).await.unwrap().is_empty());
}

#[tokio::test]
async fn rename_over_an_open_file() {
    let store = MemoryStore::new();
    let fs = mount_fs(&store, ExtendStrategy::default());
    let unique = b"0123456789abcdef0123456789ABCDEF";
    fs.open("/rename1.txt", RDWR_CREAT).await.unwrap();
    fs.write("/rename1.txt", unique, 0).await.unwrap();
    fs.open("/rename2.txt", RDWR_CREAT).await.unwrap();

    fs.rename("/rename1.txt", "/rename2.txt").await.unwrap();
    assert_eq!(fs.open("/rename1.txt", RDWR).await, Err(FsError::NotFound));
    fs.open("/rename2.txt", RDWR).await.unwrap();
    assert_eq!(fs.read("/rename2.txt", 32, 0).await.unwrap(), &unique[..]);
}

#[tokio::test]
async fn surfaced_outage_maps_to_eagain() {
    let store = MemoryStore::new();
    let fs = mount_fs(&store, ExtendStrategy::default());
    fs.init().await.unwrap();
    fs.create("/f", REG, 0).await.unwrap();

    store.fail_next_commands(2);
    let err = fs.attributes("/f").await.unwrap_err();
    assert_eq!(err.errno(), libc::EAGAIN);

    // The store is back; the next call reconnects.
    assert_eq!(fs.attributes("/f").await.unwrap().size, 0);
}

#[tokio::test]
async fn single_transport_failure_is_invisible() {
    let store = MemoryStore::new();
    let fs = mount_fs(&store, ExtendStrategy::default());
    fs.init().await.unwrap();
    fs.create("/f", REG, 0).await.unwrap();

    store.fail_next_commands(1);
    fs.write("/f", b"ok", 0).await.unwrap();
    assert_eq!(store.get("f").unwrap(), b"ok");
    assert_eq!(store.connects(), 2);
}
