use std::fs::File;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use redisfs::config::{
    DEFAULT_HOST, DEFAULT_MAX_DIR_ENTRIES, DEFAULT_PORT, ExtendStrategy, FailurePolicy,
    RedisFsConfig,
};
use redisfs::fuse::FuseAdapter;
use redisfs::fuse::mount::mount;
use redisfs::kvs::memory::MemoryStore;
use redisfs::kvs::redis::RedisConnector;
use redisfs::kvs::{Connector, Executor, KvsOps};
use redisfs::vfs::fs::KvsFs;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "redisfs")]
#[command(about = "Mount a Redis keyspace as a flat directory of files", long_about = None)]
struct Args {
    /// Directory to mount on
    #[arg(long)]
    mountpoint: PathBuf,

    /// Redis host
    #[arg(long, default_value = DEFAULT_HOST)]
    host: String,

    /// Redis port
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Redis logical database
    #[arg(long, default_value_t = 0)]
    db: i64,

    /// Connection timeout in milliseconds
    #[arg(long, default_value_t = 1500)]
    connect_timeout_ms: u64,

    /// What to do when the store stays unreachable after one reconnect
    #[arg(long, value_enum, default_value_t = FailurePolicy::Abort)]
    on_store_failure: FailurePolicy,

    /// How files are grown with NUL bytes
    #[arg(long, value_enum, default_value_t = ExtendStrategy::RangedWrite)]
    extend_strategy: ExtendStrategy,

    /// Maximum number of entries returned by one directory listing
    #[arg(long, default_value_t = DEFAULT_MAX_DIR_ENTRIES)]
    max_dir_entries: usize,

    /// Let other users access the mount
    #[arg(long)]
    allow_other: bool,

    /// Mount directly instead of through fusermount3
    #[arg(long)]
    privileged: bool,

    /// Serve from an in-process store instead of Redis
    #[arg(long)]
    memory: bool,

    /// Write diagnostics to this file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,
}

impl Args {
    fn config(&self) -> RedisFsConfig {
        RedisFsConfig {
            host: self.host.clone(),
            port: self.port,
            db: self.db,
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            failure_policy: self.on_store_failure,
            extend_strategy: self.extend_strategy,
            max_dir_entries: self.max_dir_entries,
        }
    }
}

fn init_logging(log_file: Option<&PathBuf>) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match log_file {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("failed to create log file {}", path.display()))?;
            builder.with_writer(Mutex::new(file)).with_ansi(false).init();
        }
        None => builder.with_writer(std::io::stderr).init(),
    }
    Ok(())
}

async fn serve<C: Connector>(connector: C, config: &RedisFsConfig, args: &Args) -> anyhow::Result<()> {
    let executor = Executor::new(connector, config.failure_policy);
    // Fail fast: nothing is mounted if the store is unreachable.
    executor
        .connect()
        .await
        .with_context(|| format!("failed to connect to {}", executor.connector().endpoint()))?;

    let fs = KvsFs::with_current_user(KvsOps::new(executor, config.extend_strategy));
    let adapter = FuseAdapter::new(fs, config.max_dir_entries);

    let mut mount_handle = mount(adapter, &args.mountpoint, args.privileged, args.allow_other)
        .await
        .with_context(|| format!("failed to mount {}", args.mountpoint.display()))?;
    info!(mountpoint = %args.mountpoint.display(), "mounted");

    let handle = &mut mount_handle;
    tokio::select! {
        res = handle => {
            if let Err(e) = res {
                error!(error = %e, "fuse session ended with error");
                return Err(e.into());
            }
        }
        _ = signal::ctrl_c() => {
            info!("interrupted, unmounting");
            mount_handle.unmount().await.context("failed to unmount")?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.log_file.as_ref())?;

    let config = args.config();
    if args.memory {
        serve(MemoryStore::new().connector(), &config, &args).await
    } else {
        let connector = RedisConnector::new(&config)?;
        serve(connector, &config, &args).await
    }
}
