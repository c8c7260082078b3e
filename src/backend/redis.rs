//! Redis client over a single TCP connection
//!
//! Commands are sent one at a time; the connection mutex keeps each
//! request paired with its reply. A command that fails or is abandoned
//! before its reply is read closes the connection, so a late reply can
//! never be taken for the answer to a later command.

use async_trait::async_trait;
use tokio::io::{AsyncWriteExt, BufStream};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::resp::{read_value, RespValue};
use super::{BackendResult, KeyValueStore};
use crate::error::BackendError;

type Connection = BufStream<TcpStream>;

/// A [`KeyValueStore`] backed by a Redis-compatible server
#[derive(Default)]
pub struct RedisStore {
    connection: Mutex<Option<Connection>>,
}

impl RedisStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Send a command and wait for its reply. Error replies become [`BackendError::Server`].
    pub async fn send_command<S: AsRef<str>>(&self, args: &[S]) -> BackendResult<RespValue> {
        let mut guard = self.connection.lock().await;
        // out of the slot until the whole reply is read
        let mut stream = guard.take().ok_or(BackendError::NotConnected)?;

        let reply = match round_trip(&mut stream, args).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(error = %e, "closing connection after failed command");
                return Err(e);
            }
        };
        *guard = Some(stream);

        match reply {
            RespValue::Error(message) => Err(BackendError::Server(message)),
            reply => Ok(reply),
        }
    }
}

async fn round_trip<S: AsRef<str>>(stream: &mut Connection, args: &[S]) -> BackendResult<RespValue> {
    stream.write_all(&RespValue::command(args).encode()).await?;
    stream.flush().await?;
    read_value(stream).await
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn connect(&self, host: &str, port: u16) -> BackendResult<()> {
        let mut stream = BufStream::new(TcpStream::connect((host, port)).await?);

        match round_trip(&mut stream, &["PING"]).await? {
            RespValue::Error(message) => return Err(BackendError::Server(message)),
            reply => debug!(?reply, "ping"),
        }

        *self.connection.lock().await = Some(stream);
        info!(host, port, "connected to key-value store");
        Ok(())
    }

    async fn is_open(&self) -> bool {
        self.connection.lock().await.is_some()
    }

    async fn exists(&self, key: &str) -> BackendResult<bool> {
        let count = self.send_command(&["EXISTS", key]).await?.into_integer()?;
        Ok(count > 0)
    }

    async fn hash_set_fields(&self, key: &str, fields: &[(String, String)]) -> BackendResult<()> {
        // HSET with no field/value pairs is a syntax error
        if fields.is_empty() {
            return Ok(());
        }

        let mut args: Vec<&str> = Vec::with_capacity(2 + fields.len() * 2);
        args.push("HSET");
        args.push(key);
        for (field, value) in fields {
            args.push(field);
            args.push(value);
        }
        self.send_command(args.as_slice()).await?.into_integer()?;
        Ok(())
    }

    async fn hash_get_all(&self, key: &str) -> BackendResult<Vec<(String, String)>> {
        let flat = self.send_command(&["HGETALL", key]).await?.into_strings()?;
        if flat.len() % 2 != 0 {
            return Err(BackendError::Protocol(format!(
                "HGETALL returned an odd number of elements ({})",
                flat.len()
            )));
        }

        let mut pairs = Vec::with_capacity(flat.len() / 2);
        let mut items = flat.into_iter();
        while let (Some(field), Some(value)) = (items.next(), items.next()) {
            pairs.push((field, value));
        }
        Ok(pairs)
    }

    async fn delete(&self, key: &str) -> BackendResult<()> {
        self.send_command(&["DEL", key]).await?.into_integer()?;
        Ok(())
    }

    async fn list_append(&self, list_key: &str, value: &str) -> BackendResult<()> {
        self.send_command(&["RPUSH", list_key, value]).await?.into_integer()?;
        Ok(())
    }

    async fn list_remove(&self, list_key: &str, value: &str, count: i64) -> BackendResult<usize> {
        let count = count.to_string();
        let removed = self
            .send_command(&["LREM", list_key, count.as_str(), value])
            .await?
            .into_integer()?;
        Ok(removed.max(0) as usize)
    }

    async fn list_range(&self, list_key: &str, start: i64, end: i64) -> BackendResult<Vec<String>> {
        let start = start.to_string();
        let end = end.to_string();
        self.send_command(&["LRANGE", list_key, start.as_str(), end.as_str()])
            .await?
            .into_strings()
    }
}
