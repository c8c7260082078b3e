//! kv-tables
//!
//! Schema-validated tables on top of a Redis-compatible key-value store.
//!
//! ## Features
//!
//! - **Schema Registry**: one JSON Schema and primary-key field per table
//! - **Record Store**: insert, get, list, update and delete of flat records
//! - **Index Consistency**: index/record mismatches are detected and reported
//! - **Pluggable Store**: Redis over TCP, or an in-process map for tests
//!
//! ## Layout in the store
//!
//! ```text
//! dogs      -> list ["dogs:1", "dogs:2"]
//! dogs:1    -> hash {id: "1", name: "ralph", paws: "4"}
//! dogs:2    -> hash {id: "2", name: "fido",  paws: "3"}
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use kv_tables::{Record, RecordStore, SchemaDefinition, StoreConfig};
//!
//! # async fn run() -> kv_tables::Result<()> {
//! let mut store = RecordStore::redis(StoreConfig::default());
//! store.register(SchemaDefinition::from_json_schema(
//!     "dogs",
//!     "id",
//!     serde_json::json!({"type": "object", "required": ["id", "name"]}),
//! )?)?;
//!
//! let ralph: Record = [("id", "1"), ("name", "ralph"), ("paws", "4")].into_iter().collect();
//! store.insert("dogs", ralph).await?;
//! let dog = store.get("dogs", "1").await?;
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod loader;
pub mod record;
pub mod registry;
pub mod schema;
pub mod store;

pub use backend::{KeyValueStore, MemoryStore, RedisStore};
pub use config::{StoreConfig, TablesConfig};
pub use error::{BackendError, Result, StoreError};
pub use loader::SchemaLoader;
pub use record::{FieldValue, Record};
pub use registry::SchemaRegistry;
pub use schema::{SchemaDefinition, SchemaValidator};
pub use store::RecordStore;
