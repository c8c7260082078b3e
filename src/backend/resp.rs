//! RESP2 (REdis Serialization Protocol) values
//!
//! Encoding of commands and decoding of replies for the Redis client.
//!
//! Reference: https://redis.io/docs/reference/protocol-spec/
use std::future::Future;
use std::pin::Pin;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

use super::BackendResult;
use crate::error::BackendError;

/// RESP data types
#[derive(Debug, Clone, PartialEq)]
pub enum RespValue {
    SimpleString(String),
    Error(String),
    Integer(i64),
    BulkString(Option<Vec<u8>>),   // None = null bulk string
    Array(Option<Vec<RespValue>>), // None = null array
}

impl RespValue {
    /// Build a command: an array of bulk strings
    pub fn command<S: AsRef<str>>(args: &[S]) -> Self {
        RespValue::Array(Some(
            args.iter()
                .map(|arg| RespValue::BulkString(Some(arg.as_ref().as_bytes().to_vec())))
                .collect(),
        ))
    }

    /// Encode RESP value to bytes
    pub fn encode(&self) -> Vec<u8> {
        match self {
            RespValue::SimpleString(s) => format!("+{}\r\n", s).into_bytes(),
            RespValue::Error(e) => format!("-{}\r\n", e).into_bytes(),
            RespValue::Integer(i) => format!(":{}\r\n", i).into_bytes(),
            RespValue::BulkString(None) => b"$-1\r\n".to_vec(),
            RespValue::BulkString(Some(data)) => {
                let mut bytes = format!("${}\r\n", data.len()).into_bytes();
                bytes.extend_from_slice(data);
                bytes.extend_from_slice(b"\r\n");
                bytes
            }
            RespValue::Array(None) => b"*-1\r\n".to_vec(),
            RespValue::Array(Some(arr)) => {
                let mut bytes = format!("*{}\r\n", arr.len()).into_bytes();
                for val in arr {
                    bytes.extend_from_slice(&val.encode());
                }
                bytes
            }
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, RespValue::Error(_))
    }

    /// Text of a simple or bulk string
    pub fn into_string(self) -> BackendResult<String> {
        match self {
            RespValue::SimpleString(s) => Ok(s),
            RespValue::BulkString(Some(data)) => String::from_utf8(data)
                .map_err(|e| BackendError::Protocol(format!("bulk string is not UTF-8: {}", e))),
            other => Err(unexpected("string", &other)),
        }
    }

    pub fn into_integer(self) -> BackendResult<i64> {
        match self {
            RespValue::Integer(i) => Ok(i),
            other => Err(unexpected("integer", &other)),
        }
    }

    /// Elements of an array reply as strings. A null array is empty.
    pub fn into_strings(self) -> BackendResult<Vec<String>> {
        match self {
            RespValue::Array(Some(items)) => items.into_iter().map(RespValue::into_string).collect(),
            RespValue::Array(None) => Ok(Vec::new()),
            other => Err(unexpected("array", &other)),
        }
    }
}

fn unexpected(expected: &str, got: &RespValue) -> BackendError {
    BackendError::Protocol(format!("expected {} reply, got {:?}", expected, got))
}

/// Read one RESP value
pub fn read_value<'a, R>(reader: &'a mut R) -> Pin<Box<dyn Future<Output = BackendResult<RespValue>> + Send + 'a>>
where
    R: AsyncBufRead + Unpin + Send,
{
    Box::pin(async move {
        let line = read_line(reader).await?;
        let kind = line.as_bytes()[0];
        let rest = line.get(1..).unwrap_or_default();

        match kind {
            b'+' => Ok(RespValue::SimpleString(rest.to_string())),
            b'-' => Ok(RespValue::Error(rest.to_string())),
            b':' => Ok(RespValue::Integer(parse_len(rest)?)),
            b'$' => {
                let len = parse_len(rest)?;
                if len < 0 {
                    return Ok(RespValue::BulkString(None));
                }

                // payload plus trailing \r\n
                let mut data = vec![0u8; len as usize + 2];
                reader.read_exact(&mut data).await?;
                if !data.ends_with(b"\r\n") {
                    return Err(BackendError::Protocol("bulk string not terminated by CRLF".to_string()));
                }
                data.truncate(len as usize);
                Ok(RespValue::BulkString(Some(data)))
            }
            b'*' => {
                let len = parse_len(rest)?;
                if len < 0 {
                    return Ok(RespValue::Array(None));
                }

                let mut elements = Vec::with_capacity(len as usize);
                for _ in 0..len {
                    elements.push(read_value(reader).await?);
                }
                Ok(RespValue::Array(Some(elements)))
            }
            other => Err(BackendError::Protocol(format!("unknown RESP type: {}", other as char))),
        }
    })
}

async fn read_line<R>(reader: &mut R) -> BackendResult<String>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    let n = reader.read_line(&mut line).await?;
    if n == 0 {
        return Err(BackendError::Protocol("connection closed by server".to_string()));
    }

    let line = line.trim_end_matches(['\r', '\n']);
    if line.is_empty() {
        return Err(BackendError::Protocol("empty reply line".to_string()));
    }
    Ok(line.to_string())
}

fn parse_len(s: &str) -> BackendResult<i64> {
    s.parse::<i64>()
        .map_err(|e| BackendError::Protocol(format!("invalid integer '{}': {}", s, e)))
}
