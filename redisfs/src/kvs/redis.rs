//! Redis backend built on the `redis` crate's multiplexed tokio connection.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use redis::aio::MultiplexedConnection;
use redis::{Client, RedisError, Value};

use super::{Command, Connection, Connector, Reply};
use crate::config::RedisFsConfig;
use crate::error::StoreError;

pub struct RedisConnector {
    client: Client,
    endpoint: String,
    timeout: Duration,
}

impl RedisConnector {
    pub fn new(config: &RedisFsConfig) -> Result<Self, StoreError> {
        let url = config.redis_url();
        let client = Client::open(url.as_str()).map_err(classify)?;
        Ok(Self {
            client,
            endpoint: url,
            timeout: config.connect_timeout,
        })
    }
}

#[async_trait]
impl Connector for RedisConnector {
    type Conn = RedisConnection;

    async fn connect(&self) -> Result<RedisConnection, StoreError> {
        let pending = self.client.get_multiplexed_async_connection();
        match tokio::time::timeout(self.timeout, pending).await {
            Ok(Ok(conn)) => Ok(RedisConnection { conn }),
            Ok(Err(err)) => Err(StoreError::Transport(err.to_string())),
            Err(_) => Err(StoreError::Transport(format!(
                "connect to {} timed out after {:?}",
                self.endpoint, self.timeout
            ))),
        }
    }

    fn endpoint(&self) -> String {
        self.endpoint.clone()
    }
}

pub struct RedisConnection {
    conn: MultiplexedConnection,
}

#[async_trait]
impl Connection for RedisConnection {
    async fn execute(&mut self, command: &Command) -> Result<Reply, StoreError> {
        let value: Value = to_cmd(command)
            .query_async(&mut self.conn)
            .await
            .map_err(classify)?;
        Ok(to_reply(value))
    }
}

fn to_cmd(command: &Command) -> redis::Cmd {
    let mut cmd = redis::cmd(command.name());
    match command {
        Command::Set { key, value } | Command::Append { key, value } => {
            cmd.arg(key).arg(&value[..]);
        }
        Command::Get { key }
        | Command::Exists { key }
        | Command::Del { key }
        | Command::StrLen { key } => {
            cmd.arg(key);
        }
        Command::Rename { key, new_key } => {
            cmd.arg(key).arg(new_key);
        }
        Command::SetRange { key, offset, value } => {
            cmd.arg(key).arg(*offset).arg(&value[..]);
        }
        Command::GetRange { key, start, end } => {
            cmd.arg(key).arg(*start).arg(*end);
        }
        Command::Keys { pattern } => {
            cmd.arg(pattern);
        }
    }
    cmd
}

/// Split errors into transport failures (retried) and store rejections (not retried).
fn classify(err: RedisError) -> StoreError {
    if err.is_io_error()
        || err.is_connection_dropped()
        || err.is_connection_refusal()
        || err.is_timeout()
    {
        StoreError::Transport(err.to_string())
    } else {
        StoreError::Rejected(err.to_string())
    }
}

fn to_reply(value: Value) -> Reply {
    match value {
        Value::Nil => Reply::Nil,
        Value::Int(n) => Reply::Integer(n),
        Value::BulkString(data) => Reply::Bulk(Bytes::from(data)),
        Value::Array(items) => Reply::Array(items.into_iter().map(to_reply).collect()),
        Value::SimpleString(s) => Reply::Status(s),
        Value::Okay => Reply::Status("OK".to_string()),
        other => Reply::Other(format!("{other:?}")),
    }
}
