//! In-process key-value store
//!
//! Mirrors the Redis semantics the record store relies on: a key holds
//! either a hash or a list, empty hashes and lists cease to exist, and using
//! a key with the wrong kind of value is a `WRONGTYPE` error.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use super::{BackendResult, KeyValueStore};
use crate::error::BackendError;

const WRONGTYPE: &str = "WRONGTYPE Operation against a key holding the wrong kind of value";

#[derive(Debug, Clone, PartialEq)]
enum Entry {
    Hash(BTreeMap<String, String>),
    List(Vec<String>),
}

/// A [`KeyValueStore`] kept in a local map
#[derive(Debug)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
    reachable: AtomicBool,
    connected: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            reachable: AtomicBool::new(true),
            connected: AtomicBool::new(false),
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// While unreachable, `connect` fails with a refused connection
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Number of keys currently stored
    pub fn key_count(&self) -> usize {
        self.lock().map(|entries| entries.len()).unwrap_or(0)
    }

    fn lock(&self) -> BackendResult<MutexGuard<'_, HashMap<String, Entry>>> {
        self.entries
            .lock()
            .map_err(|_| BackendError::Protocol("memory store lock poisoned".to_string()))
    }

    fn connected_entries(&self) -> BackendResult<MutexGuard<'_, HashMap<String, Entry>>> {
        if !self.is_connected() {
            return Err(BackendError::NotConnected);
        }
        self.lock()
    }
}

/// Resolve Redis-style inclusive `start..=end` (negative from the end) against `len`
fn range_bounds(len: usize, start: i64, end: i64) -> Option<(usize, usize)> {
    let len = len as i64;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let end = if end < 0 { len + end } else { end.min(len - 1) };

    if len == 0 || start > end || start >= len {
        return None;
    }
    Some((start as usize, end as usize))
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn connect(&self, host: &str, port: u16) -> BackendResult<()> {
        if !self.reachable.load(Ordering::SeqCst) {
            return Err(BackendError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                format!("{}:{} refused the connection", host, port),
            )));
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn is_open(&self) -> bool {
        self.is_connected()
    }

    async fn exists(&self, key: &str) -> BackendResult<bool> {
        Ok(self.connected_entries()?.contains_key(key))
    }

    async fn hash_set_fields(&self, key: &str, fields: &[(String, String)]) -> BackendResult<()> {
        if fields.is_empty() {
            return Ok(());
        }

        let mut entries = self.connected_entries()?;
        let entry = entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::Hash(BTreeMap::new()));

        match entry {
            Entry::Hash(hash) => {
                for (field, value) in fields {
                    hash.insert(field.clone(), value.clone());
                }
                Ok(())
            }
            Entry::List(_) => Err(BackendError::Server(WRONGTYPE.to_string())),
        }
    }

    async fn hash_get_all(&self, key: &str) -> BackendResult<Vec<(String, String)>> {
        match self.connected_entries()?.get(key) {
            None => Ok(Vec::new()),
            Some(Entry::Hash(hash)) => Ok(hash.iter().map(|(f, v)| (f.clone(), v.clone())).collect()),
            Some(Entry::List(_)) => Err(BackendError::Server(WRONGTYPE.to_string())),
        }
    }

    async fn delete(&self, key: &str) -> BackendResult<()> {
        self.connected_entries()?.remove(key);
        Ok(())
    }

    async fn list_append(&self, list_key: &str, value: &str) -> BackendResult<()> {
        let mut entries = self.connected_entries()?;
        let entry = entries
            .entry(list_key.to_string())
            .or_insert_with(|| Entry::List(Vec::new()));

        match entry {
            Entry::List(list) => {
                list.push(value.to_string());
                Ok(())
            }
            Entry::Hash(_) => Err(BackendError::Server(WRONGTYPE.to_string())),
        }
    }

    async fn list_remove(&self, list_key: &str, value: &str, count: i64) -> BackendResult<usize> {
        let mut entries = self.connected_entries()?;
        let list = match entries.get_mut(list_key) {
            None => return Ok(0),
            Some(Entry::List(list)) => list,
            Some(Entry::Hash(_)) => return Err(BackendError::Server(WRONGTYPE.to_string())),
        };

        let limit = if count == 0 { usize::MAX } else { count.unsigned_abs() as usize };
        let mut positions: Vec<usize> = list
            .iter()
            .enumerate()
            .filter(|(_, item)| item.as_str() == value)
            .map(|(i, _)| i)
            .collect();
        if count < 0 {
            positions.reverse();
        }
        positions.truncate(limit);
        positions.sort_unstable();

        for position in positions.iter().rev() {
            list.remove(*position);
        }

        let removed = positions.len();
        if list.is_empty() {
            entries.remove(list_key);
        }
        Ok(removed)
    }

    async fn list_range(&self, list_key: &str, start: i64, end: i64) -> BackendResult<Vec<String>> {
        match self.connected_entries()?.get(list_key) {
            None => Ok(Vec::new()),
            Some(Entry::List(list)) => Ok(match range_bounds(list.len(), start, end) {
                Some((from, to)) => list[from..=to].to_vec(),
                None => Vec::new(),
            }),
            Some(Entry::Hash(_)) => Err(BackendError::Server(WRONGTYPE.to_string())),
        }
    }
}
