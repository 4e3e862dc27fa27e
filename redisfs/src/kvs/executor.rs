//! Command executor with a single reconnect-and-retry.
//!
//! All commands go through one connection guarded by an async mutex, so the
//! FUSE session may dispatch concurrently without interleaving requests on the
//! wire. The lock is held across the retry as well.

use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::{Command, Connection, Connector, Reply};
use crate::config::FailurePolicy;
use crate::error::StoreError;

pub struct Executor<C: Connector> {
    connector: C,
    conn: Mutex<Option<C::Conn>>,
    policy: FailurePolicy,
}

impl<C: Connector> Executor<C> {
    /// Create an executor that has not connected yet.
    pub fn new(connector: C, policy: FailurePolicy) -> Self {
        Self {
            connector,
            conn: Mutex::new(None),
            policy,
        }
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// Establish the connection, replacing any existing one.
    pub async fn connect(&self) -> Result<(), StoreError> {
        let conn = self.connector.connect().await?;
        *self.conn.lock().await = Some(conn);
        info!(endpoint = %self.connector.endpoint(), "connected to store");
        Ok(())
    }

    /// Drop the connection. Later commands reconnect on demand.
    pub async fn disconnect(&self) {
        if self.conn.lock().await.take().is_some() {
            info!(endpoint = %self.connector.endpoint(), "disconnected from store");
        }
    }

    pub async fn is_connected(&self) -> bool {
        self.conn.lock().await.is_some()
    }

    /// Execute one command.
    ///
    /// A transport failure triggers exactly one reconnect and one retry. A
    /// rejected command is returned as is. If the retry fails too, the
    /// configured [`FailurePolicy`] decides between terminating the process
    /// and returning [`StoreError::Unavailable`].
    pub async fn execute(&self, command: Command) -> Result<Reply, StoreError> {
        let mut guard = self.conn.lock().await;

        let first = match guard.as_mut() {
            Some(conn) => conn.execute(&command).await,
            None => Err(StoreError::Transport("not connected".to_string())),
        };
        let reason = match first {
            Ok(reply) => return Ok(reply),
            Err(StoreError::Rejected(msg)) => return Err(self.rejected(&command, msg)),
            Err(err) => err,
        };

        warn!(
            command = command.name(),
            error = %reason,
            "transport failure, reconnecting once"
        );
        *guard = None;

        let retried = match self.connector.connect().await {
            Ok(conn) => {
                debug!(endpoint = %self.connector.endpoint(), "reconnected, retrying");
                guard.insert(conn).execute(&command).await
            }
            Err(err) => Err(err),
        };
        match retried {
            Ok(reply) => Ok(reply),
            Err(StoreError::Rejected(msg)) => Err(self.rejected(&command, msg)),
            Err(err) => {
                *guard = None;
                self.give_up(&command, err)
            }
        }
    }

    fn rejected(&self, command: &Command, msg: String) -> StoreError {
        warn!(command = command.name(), error = %msg, "store rejected command");
        StoreError::Rejected(msg)
    }

    fn give_up(&self, command: &Command, err: StoreError) -> Result<Reply, StoreError> {
        match self.policy {
            FailurePolicy::Abort => {
                error!(
                    command = command.name(),
                    endpoint = %self.connector.endpoint(),
                    error = %err,
                    "store unreachable after reconnect, aborting"
                );
                std::process::exit(1);
            }
            FailurePolicy::Surface => {
                error!(
                    command = command.name(),
                    error = %err,
                    "store unreachable after reconnect"
                );
                Err(StoreError::Unavailable {
                    command: command.name(),
                    reason: err.to_string(),
                })
            }
        }
    }
}
