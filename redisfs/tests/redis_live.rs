//! Runs against a real Redis server. Enabled with REDISFS_REDIS_TEST=1;
//! REDISFS_REDIS_DB selects the database (default 15), which is used for
//! throwaway keys prefixed with `redisfs-test-`.

use std::ops::ControlFlow;

use redisfs::config::{ExtendStrategy, FailurePolicy, RedisFsConfig};
use redisfs::error::FsError;
use redisfs::kvs::redis::RedisConnector;
use redisfs::kvs::{Executor, KvsOps};
use redisfs::vfs::fs::KvsFs;

const REG: u32 = libc::S_IFREG | 0o644;
const EXCL: u32 = (libc::O_CREAT | libc::O_EXCL) as u32;

fn enabled() -> bool {
    if std::env::var("REDISFS_REDIS_TEST").ok().as_deref() != Some("1") {
        eprintln!("skip redis test: set REDISFS_REDIS_TEST=1 to enable");
        return false;
    }
    true
}

async fn connect(extend: ExtendStrategy) -> KvsFs<RedisConnector> {
    let config = RedisFsConfig {
        db: std::env::var("REDISFS_REDIS_DB")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(15),
        failure_policy: FailurePolicy::Surface,
        extend_strategy: extend,
        ..RedisFsConfig::default()
    };
    let connector = RedisConnector::new(&config).expect("client");
    let fs = KvsFs::new(KvsOps::new(Executor::new(connector, config.failure_policy), extend), 0, 0);
    fs.init().await.expect("redis reachable");
    fs
}

async fn cleanup(fs: &KvsFs<RedisConnector>, names: &[&str]) {
    for name in names {
        let _ = fs.remove(&format!("/{name}")).await;
    }
}

#[tokio::test]
async fn example_scenario_on_redis() {
    if !enabled() {
        return;
    }
    let fs = connect(ExtendStrategy::default()).await;
    let (a, b) = ("/redisfs-test-a", "/redisfs-test-b");
    cleanup(&fs, &["redisfs-test-a", "redisfs-test-b"]).await;

    fs.create(a, REG, EXCL).await.unwrap();
    assert_eq!(fs.create(a, REG, EXCL).await, Err(FsError::AlreadyExists));
    assert_eq!(fs.write(a, b"HELLO", 0).await, Ok(5));
    assert_eq!(fs.read(a, 10, 0).await.unwrap(), &b"HELLO"[..]);
    fs.resize(a, 2).await.unwrap();
    assert_eq!(fs.read(a, 10, 0).await.unwrap(), &b"HE"[..]);

    fs.create(b, REG, 0).await.unwrap();
    fs.rename(a, b).await.unwrap();
    assert_eq!(fs.read(b, 10, 0).await.unwrap(), &b"HE"[..]);
    assert_eq!(fs.attributes(a).await, Err(FsError::NotFound));

    let mut listed = Vec::new();
    fs.list("/", |name| {
        listed.push(name);
        ControlFlow::Continue(())
    })
    .await
    .unwrap();
    assert!(listed.iter().any(|n| n == "redisfs-test-b"));

    cleanup(&fs, &["redisfs-test-b"]).await;
    fs.shutdown().await;
}

#[tokio::test]
async fn zero_extend_on_redis() {
    if !enabled() {
        return;
    }
    for strategy in [ExtendStrategy::RangedWrite, ExtendStrategy::ChunkedAppend] {
        let fs = connect(strategy).await;
        let path = "/redisfs-test-extend";
        cleanup(&fs, &["redisfs-test-extend"]).await;

        fs.create(path, REG, 0).await.unwrap();
        fs.write(path, b"ab", 0).await.unwrap();
        fs.resize(path, 1500).await.unwrap();
        let data = fs.read(path, 2000, 0).await.unwrap();
        assert_eq!(data.len(), 1500, "{strategy:?}");
        assert!(data[2..].iter().all(|b| *b == 0), "{strategy:?}");

        cleanup(&fs, &["redisfs-test-extend"]).await;
    }
}

#[tokio::test]
async fn rename_of_missing_key_is_io_error() {
    if !enabled() {
        return;
    }
    let fs = connect(ExtendStrategy::default()).await;
    let err = fs
        .rename("/redisfs-test-missing", "/redisfs-test-other")
        .await
        .unwrap_err();
    assert_eq!(err.errno(), libc::EIO);
}
