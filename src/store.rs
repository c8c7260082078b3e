//! Record Store
//!
//! Tables are emulated with two kinds of keys in the underlying store:
//!
//! ```text
//! dogs        list  [ "dogs:1", "dogs:7", ... ]     table index, insertion order
//! dogs:1      hash  { id: "1", name: "ralph", ... }  one record
//! ```
//!
//! The store has no multi-key transactions, so every operation is an ordered
//! series of round trips. Writes touch the index before the hash on insert
//! and the index before the hash on delete, so an interrupted operation
//! leaves at worst an index entry without a record. Such entries are
//! reported, never repaired:
//! - `insert` of that key fails with [`StoreError::DatabaseInsert`]
//! - `get_all` fails with [`StoreError::InconsistentIndex`]
//!
//! Within a `RecordStore`, mutations of one record key are serialized and
//! a purge excludes every other mutation of its table. Other processes
//! writing to the same server are not coordinated.
//!
//! The connection is opened on first use and again whenever the backend
//! reports it closed.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, RwLock};
use tracing::{debug, warn};

use crate::backend::{KeyValueStore, RedisStore};
use crate::config::StoreConfig;
use crate::error::{Result, StoreError};
use crate::record::{Record, NUMERIC_FIELDS};
use crate::registry::SchemaRegistry;
use crate::schema::SchemaDefinition;

/// Schema-checked tables on top of a [`KeyValueStore`]
pub struct RecordStore<S> {
    backend: S,
    config: StoreConfig,
    registry: SchemaRegistry,
    connecting: AsyncMutex<()>,
    // shared by record mutations, exclusive for purge
    tables: LockMap<RwLock<()>>,
    records: LockMap<AsyncMutex<()>>,
}

impl RecordStore<RedisStore> {
    /// A store talking to the Redis server named in `config`
    pub fn redis(config: StoreConfig) -> Self {
        Self::new(RedisStore::new(), config)
    }
}

impl<S: KeyValueStore> RecordStore<S> {
    pub fn new(backend: S, config: StoreConfig) -> Self {
        Self::with_registry(backend, config, SchemaRegistry::new())
    }

    pub fn with_registry(backend: S, config: StoreConfig, registry: SchemaRegistry) -> Self {
        Self {
            backend,
            config,
            registry,
            connecting: AsyncMutex::new(()),
            tables: LockMap::default(),
            records: LockMap::default(),
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn backend(&self) -> &S {
        &self.backend
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut SchemaRegistry {
        &mut self.registry
    }

    /// Register a table. See [`SchemaRegistry::register`].
    pub fn register(&mut self, definition: SchemaDefinition) -> Result<()> {
        self.registry.register(definition)
    }

    /// Register several tables. See [`SchemaRegistry::register_many`].
    pub fn register_many<I>(&mut self, definitions: I) -> Result<()>
    where
        I: IntoIterator<Item = SchemaDefinition>,
    {
        self.registry.register_many(definitions)
    }

    /// Insert a new record. Returns `true` once both the index entry and the
    /// record hash are written.
    pub async fn insert(&self, table: &str, data: Record) -> Result<bool> {
        self.ensure_connected().await?;
        let schema = self.registry.lookup(table)?;

        data.check_field_names()?;
        schema
            .validator()
            .validate(&data)
            .map_err(StoreError::validation)?;

        let pk = primary_key_value(schema, &data)?;
        let key = schema.record_key(&pk);
        let _table = self.tables.get(table).read_owned().await;
        let _record = self.records.get(&key).lock_owned().await;

        if self.backend.exists(&key).await? {
            return Err(StoreError::ItemAlreadyExists { key });
        }

        self.add_to_index(table, &key).await?;

        // index entry is in place; a failure here leaves it orphaned
        self.backend
            .hash_set_fields(&key, &data.to_hash_fields())
            .await
            .map_err(|e| StoreError::DatabaseInsert {
                key: key.clone(),
                reason: e.to_string(),
            })?;

        debug!(table, key = %key, "inserted record");
        Ok(true)
    }

    /// Fetch one record by primary key
    pub async fn get(&self, table: &str, pk: &str) -> Result<Record> {
        self.ensure_connected().await?;
        let schema = self.registry.lookup(table)?;
        let key = schema.record_key(pk);
        let fields = self.fetch(schema, key).await?;
        Ok(decode(schema, fields))
    }

    /// All records of a table, in index order
    pub async fn get_all(&self, table: &str) -> Result<Vec<Record>> {
        self.ensure_connected().await?;
        let schema = self.registry.lookup(table)?;

        let members = self.list_members(table).await?;
        let mut records = Vec::with_capacity(members.len());
        for key in members {
            let fields = self.backend.hash_get_all(&key).await?;
            if fields.is_empty() {
                warn!(table, key = %key, "index entry without a record");
                return Err(StoreError::InconsistentIndex {
                    table: table.to_string(),
                    key,
                });
            }
            records.push(decode(schema, fields));
        }
        Ok(records)
    }

    /// Merge `partial` over an existing record and store the result.
    ///
    /// The merged record must still satisfy the schema and keep its primary key.
    pub async fn update(&self, table: &str, pk: &str, partial: Record) -> Result<Record> {
        self.ensure_connected().await?;
        let schema = self.registry.lookup(table)?;
        partial.check_field_names()?;
        let key = schema.record_key(pk);
        let _table = self.tables.get(table).read_owned().await;
        let _record = self.records.get(&key).lock_owned().await;

        let stored = self.fetch(schema, key.clone()).await?;
        let had_numbers = stored.iter().any(|(field, _)| field == NUMERIC_FIELDS);
        let mut record = decode(schema, stored);

        if let Some(value) = partial.get(schema.primary_key()) {
            if value.to_string() != pk {
                return Err(StoreError::PrimaryKeyChange {
                    table: table.to_string(),
                    key,
                });
            }
        }

        record.merge(&partial);
        schema
            .validator()
            .validate(&record)
            .map_err(StoreError::validation)?;

        let mut fields = record.to_hash_fields();
        if had_numbers && !fields.iter().any(|(field, _)| field == NUMERIC_FIELDS) {
            // HSET never removes fields, so overwrite the stale list
            fields.push((NUMERIC_FIELDS.to_string(), "[]".to_string()));
        }
        self.backend.hash_set_fields(&key, &fields).await?;

        debug!(table, key = %key, changed = partial.len(), "updated record");
        Ok(decode(schema, fields))
    }

    /// Delete a record. The index entry goes first, then the hash.
    pub async fn delete(&self, table: &str, pk: &str) -> Result<bool> {
        self.ensure_connected().await?;
        let schema = self.registry.lookup(table)?;
        let key = schema.record_key(pk);
        let _table = self.tables.get(table).read_owned().await;
        let _record = self.records.get(&key).lock_owned().await;

        self.fetch(schema, key.clone()).await?;

        let removed = self.backend.list_remove(table, &key, 1).await?;
        if removed == 0 {
            warn!(table, key = %key, "record had no index entry");
        }
        self.backend.delete(&key).await?;

        debug!(table, key = %key, "deleted record");
        Ok(true)
    }

    /// The raw index of a table. No schema check.
    pub async fn list_members(&self, table: &str) -> Result<Vec<String>> {
        self.ensure_connected().await?;
        Ok(self.backend.list_range(table, 0, -1).await?)
    }

    /// Number of index entries of a registered table
    pub async fn count(&self, table: &str) -> Result<usize> {
        self.registry.lookup(table)?;
        Ok(self.list_members(table).await?.len())
    }

    /// Whether a record hash exists for `pk`
    pub async fn exists(&self, table: &str, pk: &str) -> Result<bool> {
        self.ensure_connected().await?;
        let schema = self.registry.lookup(table)?;
        Ok(self.backend.exists(&schema.record_key(pk)).await?)
    }

    /// Delete every record listed in a table's index, then the index itself.
    ///
    /// Individual delete failures are logged and skipped. Returns the number
    /// of index entries that were visited.
    pub async fn purge(&self, table: &str) -> Result<usize> {
        self.ensure_connected().await?;
        self.registry.lookup(table)?;
        let _table = self.tables.get(table).write_owned().await;

        let members = self.list_members(table).await?;
        for key in &members {
            if let Err(e) = self.backend.delete(key).await {
                warn!(table, key = %key, error = %e, "failed to delete record during purge");
            }
        }
        if let Err(e) = self.backend.delete(table).await {
            warn!(table, error = %e, "failed to delete table index during purge");
        }

        debug!(table, records = members.len(), "purged table");
        Ok(members.len())
    }

    async fn ensure_connected(&self) -> Result<()> {
        if self.backend.is_open().await {
            return Ok(());
        }

        let _connecting = self.connecting.lock().await;
        // another caller may have connected while this one waited
        if self.backend.is_open().await {
            return Ok(());
        }
        self.backend
            .connect(&self.config.host, self.config.port)
            .await
            .map_err(|e| StoreError::Connection {
                host: self.config.host.clone(),
                port: self.config.port,
                reason: e.to_string(),
            })
    }

    /// Raw hash of the record at `key`, which must hold its primary-key field
    async fn fetch(&self, schema: &SchemaDefinition, key: String) -> Result<Vec<(String, String)>> {
        let fields = self.backend.hash_get_all(&key).await?;
        if !fields.iter().any(|(field, _)| field == schema.primary_key()) {
            return Err(StoreError::ItemNotFound {
                key,
                table: schema.name().to_string(),
            });
        }
        Ok(fields)
    }

    /// Append `key` to the table index. `key` is known to have no hash, so
    /// finding it already listed means the index and the records disagree.
    async fn add_to_index(&self, table: &str, key: &str) -> Result<()> {
        let insert_error = |reason: String| StoreError::DatabaseInsert {
            key: key.to_string(),
            reason,
        };

        let members = self
            .backend
            .list_range(table, 0, -1)
            .await
            .map_err(|e| insert_error(e.to_string()))?;

        if members.iter().any(|member| member == key) {
            warn!(table, key, "index lists a key that has no record");
            return Err(insert_error(format!(
                "index of table {} already lists {} but the record does not exist",
                table, key
            )));
        }

        self.backend
            .list_append(table, key)
            .await
            .map_err(|e| insert_error(e.to_string()))
    }
}

/// Primary key of `data` in the text form used in record keys
fn primary_key_value(schema: &SchemaDefinition, data: &Record) -> Result<String> {
    data.get(schema.primary_key())
        .map(|value| value.to_string())
        .ok_or_else(|| {
            StoreError::validation(format!(
                "missing primary key field '{}' for table {}",
                schema.primary_key(),
                schema.name()
            ))
        })
}

fn decode(schema: &SchemaDefinition, fields: Vec<(String, String)>) -> Record {
    let validator = schema.validator();
    Record::from_hash_fields(fields, |field| validator.is_numeric_field(field))
}

/// One async lock per key, created on demand
struct LockMap<L> {
    locks: Mutex<HashMap<String, Arc<L>>>,
}

impl<L> Default for LockMap<L> {
    fn default() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }
}

impl<L: Default> LockMap<L> {
    fn get(&self, key: &str) -> Arc<L> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        // drop locks nobody holds or waits on
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        locks.entry(key.to_string()).or_default().clone()
    }
}
