//! Key-value store boundary
//!
//! The record store only needs a handful of primitives from the underlying
//! store: key existence, whole-hash reads and writes, key deletion and a few
//! list operations. They are expressed by [`KeyValueStore`] so that the same
//! table logic runs against a Redis server ([`RedisStore`]) or an in-process
//! map ([`MemoryStore`]).
//!
//! List semantics follow Redis: `list_remove` is `LREM` and `list_range` is
//! `LRANGE` with inclusive bounds where negative indexes count from the end.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::BackendError;

pub mod memory;
pub mod redis;
pub mod resp;

pub use memory::MemoryStore;
pub use redis::RedisStore;

/// Result type for store primitives
pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// Primitive operations of a remote key-value store
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Open the connection. The record store calls this whenever
    /// [`is_open`](KeyValueStore::is_open) reports no usable connection.
    async fn connect(&self, host: &str, port: u16) -> BackendResult<()>;

    /// Whether commands can be sent without connecting first
    async fn is_open(&self) -> bool;

    async fn exists(&self, key: &str) -> BackendResult<bool>;

    /// Set the given fields of the hash at `key`, creating it if needed
    async fn hash_set_fields(&self, key: &str, fields: &[(String, String)]) -> BackendResult<()>;

    /// All fields of the hash at `key`; empty if the key does not exist
    async fn hash_get_all(&self, key: &str) -> BackendResult<Vec<(String, String)>>;

    async fn delete(&self, key: &str) -> BackendResult<()>;

    /// Push `value` to the tail of the list at `list_key`
    async fn list_append(&self, list_key: &str, value: &str) -> BackendResult<()>;

    /// Remove up to `count` occurrences of `value` (0 removes all, negative
    /// counts from the tail). Returns how many were removed.
    async fn list_remove(&self, list_key: &str, value: &str, count: i64) -> BackendResult<usize>;

    async fn list_range(&self, list_key: &str, start: i64, end: i64) -> BackendResult<Vec<String>>;
}

#[async_trait]
impl<T: KeyValueStore + ?Sized> KeyValueStore for Arc<T> {
    async fn connect(&self, host: &str, port: u16) -> BackendResult<()> {
        (**self).connect(host, port).await
    }

    async fn is_open(&self) -> bool {
        (**self).is_open().await
    }

    async fn exists(&self, key: &str) -> BackendResult<bool> {
        (**self).exists(key).await
    }

    async fn hash_set_fields(&self, key: &str, fields: &[(String, String)]) -> BackendResult<()> {
        (**self).hash_set_fields(key, fields).await
    }

    async fn hash_get_all(&self, key: &str) -> BackendResult<Vec<(String, String)>> {
        (**self).hash_get_all(key).await
    }

    async fn delete(&self, key: &str) -> BackendResult<()> {
        (**self).delete(key).await
    }

    async fn list_append(&self, list_key: &str, value: &str) -> BackendResult<()> {
        (**self).list_append(list_key, value).await
    }

    async fn list_remove(&self, list_key: &str, value: &str, count: i64) -> BackendResult<usize> {
        (**self).list_remove(list_key, value, count).await
    }

    async fn list_range(&self, list_key: &str, start: i64, end: i64) -> BackendResult<Vec<String>> {
        (**self).list_range(list_key, start, end).await
    }
}
