//! Runtime configuration for the store connection and the filesystem adapter.

use std::time::Duration;

use clap::ValueEnum;

/// Default Redis host: the store is expected on loopback.
pub const DEFAULT_HOST: &str = "127.0.0.1";
/// Default Redis port.
pub const DEFAULT_PORT: u16 = 6379;
/// Connection-establishment timeout (1.5 seconds).
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(1500);
/// Upper bound on entries delivered by one directory listing.
pub const DEFAULT_MAX_DIR_ENTRIES: usize = 100_000;

/// What the executor does when the single reconnect-and-retry also fails.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum FailurePolicy {
    /// Log and terminate the process.
    #[default]
    Abort,
    /// Return a transient-unavailable error and keep serving.
    Surface,
}

/// How a value is grown with NUL bytes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum ExtendStrategy {
    /// One SETRANGE of a single NUL at the final offset; the store fills the gap.
    #[default]
    RangedWrite,
    /// Repeated APPENDs of at most 512 NUL bytes each.
    ChunkedAppend,
}

#[derive(Clone, Debug)]
pub struct RedisFsConfig {
    pub host: String,
    pub port: u16,
    pub db: i64,
    pub connect_timeout: Duration,
    pub failure_policy: FailurePolicy,
    pub extend_strategy: ExtendStrategy,
    pub max_dir_entries: usize,
}

impl Default for RedisFsConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            db: 0,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            failure_policy: FailurePolicy::default(),
            extend_strategy: ExtendStrategy::default(),
            max_dir_entries: DEFAULT_MAX_DIR_ENTRIES,
        }
    }
}

impl RedisFsConfig {
    /// Connection URL understood by the `redis` crate.
    pub fn redis_url(&self) -> String {
        format!("redis://{}:{}/{}", self.host, self.port, self.db)
    }
}
