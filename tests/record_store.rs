//! Record store behaviour over the in-process store
//!
//! Covers the observable contract of insert/get/get_all/update/delete and
//! how index/record mismatches are reported.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::Notify;

use kv_tables::backend::BackendResult;
use kv_tables::{
    BackendError, KeyValueStore, MemoryStore, Record, RecordStore, SchemaDefinition,
    SchemaValidator, StoreConfig, StoreError,
};

fn dogs() -> SchemaDefinition {
    SchemaDefinition::from_json_schema(
        "dogs",
        "id",
        json!({
            "type": "object",
            "properties": {
                "id": { "type": "string" },
                "name": { "type": "string" },
                "paws": { "type": "string" }
            },
            "required": ["id", "name"]
        }),
    )
    .unwrap()
}

fn record(value: serde_json::Value) -> Record {
    Record::from_json(value).unwrap()
}

/// A store sharing its backend with the test, so the test can poke at raw keys
fn dog_store() -> (RecordStore<Arc<MemoryStore>>, Arc<MemoryStore>) {
    let backend = Arc::new(MemoryStore::new());
    let mut store = RecordStore::new(backend.clone(), StoreConfig::default());
    store.register(dogs()).unwrap();
    (store, backend)
}

// =============================================================================
// Schema registration
// =============================================================================

#[test]
fn test_duplicate_schema_single_and_batch() {
    let mut store = RecordStore::new(MemoryStore::new(), StoreConfig::default());
    store.register(dogs()).unwrap();

    assert!(matches!(
        store.register(dogs()),
        Err(StoreError::DuplicateSchema { ref name }) if name == "dogs"
    ));

    let cats = SchemaDefinition::new("cats", "id", SchemaValidator::accept_all());
    assert!(matches!(
        store.register_many(vec![cats, dogs()]),
        Err(StoreError::DuplicateSchema { ref name }) if name == "dogs"
    ));
    // cats went in before the batch failed
    assert!(store.registry().contains("cats"));
}

#[tokio::test]
async fn test_unregistered_table() {
    let (store, backend) = dog_store();

    let err = store
        .insert("cats", record(json!({"id": "1", "name": "tom"})))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::UnregisteredSchema { ref name } if name == "cats"));
    assert!(err.to_string().contains("cats"));
    assert_eq!(backend.key_count(), 0);

    assert!(matches!(store.get("cats", "1").await, Err(StoreError::UnregisteredSchema { .. })));
    assert!(matches!(store.get_all("cats").await, Err(StoreError::UnregisteredSchema { .. })));
    assert!(matches!(
        store.update("cats", "1", Record::new()).await,
        Err(StoreError::UnregisteredSchema { .. })
    ));
    assert!(matches!(store.delete("cats", "1").await, Err(StoreError::UnregisteredSchema { .. })));
}

// =============================================================================
// Insert / get / update / delete
// =============================================================================

#[tokio::test]
async fn test_dogs_lifecycle() {
    let (store, _) = dog_store();

    let ralph = record(json!({"id": "1", "name": "ralph", "paws": "4"}));
    assert!(store.insert("dogs", ralph.clone()).await.unwrap());
    assert_eq!(store.get("dogs", "1").await.unwrap(), ralph);

    let updated = store
        .update("dogs", "1", record(json!({"paws": "2"})))
        .await
        .unwrap();
    assert_eq!(updated, record(json!({"id": "1", "name": "ralph", "paws": "2"})));

    assert!(store.delete("dogs", "1").await.unwrap());
    let err = store.get("dogs", "1").await.unwrap_err();
    assert!(matches!(
        err,
        StoreError::ItemNotFound { ref key, ref table } if key == "dogs:1" && table == "dogs"
    ));
}

#[tokio::test]
async fn test_validation_failure_writes_nothing() {
    let (store, backend) = dog_store();

    let err = store
        .insert("dogs", record(json!({"id": "1", "paws": "4"})))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Validation { ref message } if message.contains("name")));
    assert_eq!(backend.key_count(), 0);
}

#[tokio::test]
async fn test_duplicate_insert_keeps_first_record() {
    let (store, _) = dog_store();

    let first = record(json!({"id": "1", "name": "ralph"}));
    store.insert("dogs", first.clone()).await.unwrap();

    let err = store
        .insert("dogs", record(json!({"id": "1", "name": "impostor", "paws": "3"})))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::ItemAlreadyExists { ref key } if key == "dogs:1"));

    assert_eq!(store.get("dogs", "1").await.unwrap(), first);
    assert_eq!(store.list_members("dogs").await.unwrap(), vec!["dogs:1"]);
}

#[tokio::test]
async fn test_update_changes_only_named_fields() {
    let (store, backend) = dog_store();
    store
        .insert("dogs", record(json!({"id": "5", "name": "rex", "paws": "4"})))
        .await
        .unwrap();

    let returned = store
        .update("dogs", "5", record(json!({"name": "rexy"})))
        .await
        .unwrap();

    let stored = store.get("dogs", "5").await.unwrap();
    assert_eq!(returned, stored);
    assert_eq!(stored, record(json!({"id": "5", "name": "rexy", "paws": "4"})));
    // update never touches the index
    assert_eq!(backend.list_range("dogs", 0, -1).await.unwrap(), vec!["dogs:5"]);
}

#[tokio::test]
async fn test_update_and_delete_missing_record() {
    let (store, _) = dog_store();

    assert!(matches!(
        store.update("dogs", "404", record(json!({"name": "ghost"}))).await,
        Err(StoreError::ItemNotFound { .. })
    ));
    assert!(matches!(store.delete("dogs", "404").await, Err(StoreError::ItemNotFound { .. })));
}

// =============================================================================
// Value kinds
// =============================================================================

/// A table whose fields are only partly described by its schema
fn notes_store() -> RecordStore<MemoryStore> {
    let mut store = RecordStore::new(MemoryStore::new(), StoreConfig::default());
    store
        .register(
            SchemaDefinition::from_json_schema(
                "tags",
                "id",
                json!({
                    "type": "object",
                    "properties": {
                        "id": { "type": "string" },
                        "tag": { "type": ["integer", "string"] },
                        "score": { "type": "number" }
                    },
                    "required": ["id"]
                }),
            )
            .unwrap(),
        )
        .unwrap();
    store
        .register(SchemaDefinition::new("notes", "slug", SchemaValidator::accept_all()))
        .unwrap();
    store
}

#[tokio::test]
async fn test_union_typed_fields_keep_their_kind() {
    let store = notes_store();

    let text = record(json!({"id": "1", "tag": "42", "score": 1.5}));
    let number = record(json!({"id": "2", "tag": 42}));
    store.insert("tags", text.clone()).await.unwrap();
    store.insert("tags", number.clone()).await.unwrap();

    assert_eq!(store.get("tags", "1").await.unwrap(), text);
    assert_eq!(store.get("tags", "2").await.unwrap(), number);
    assert_eq!(store.get_all("tags").await.unwrap(), vec![text, number]);
}

#[tokio::test]
async fn test_undeclared_numbers_round_trip() {
    let store = notes_store();

    let note = record(json!({"slug": "a", "stars": 5, "ratio": 0.25, "code": "007"}));
    store.insert("notes", note.clone()).await.unwrap();
    assert_eq!(store.get("notes", "a").await.unwrap(), note);
}

#[tokio::test]
async fn test_update_switches_value_kind() {
    let store = notes_store();
    store
        .insert("notes", record(json!({"slug": "a", "stars": 5})))
        .await
        .unwrap();

    let returned = store
        .update("notes", "a", record(json!({"stars": "five"})))
        .await
        .unwrap();
    assert_eq!(returned, record(json!({"slug": "a", "stars": "five"})));
    assert_eq!(store.get("notes", "a").await.unwrap(), returned);

    let returned = store
        .update("notes", "a", record(json!({"stars": 6})))
        .await
        .unwrap();
    assert_eq!(returned, record(json!({"slug": "a", "stars": 6})));
    assert_eq!(store.get("notes", "a").await.unwrap(), returned);
}

#[tokio::test]
async fn test_reserved_field_name_is_rejected() {
    let store = notes_store();

    let data: Record = [("slug", "a"), (":numeric", "[]")].into_iter().collect();
    assert!(matches!(
        store.insert("notes", data.clone()).await,
        Err(StoreError::Validation { .. })
    ));
    assert!(store.list_members("notes").await.unwrap().is_empty());

    store.insert("notes", record(json!({"slug": "a"}))).await.unwrap();
    assert!(matches!(
        store.update("notes", "a", data).await,
        Err(StoreError::Validation { .. })
    ));
}

// =============================================================================
// Index consistency
// =============================================================================

#[tokio::test]
async fn test_get_all_follows_insertion_order() {
    let (store, _) = dog_store();
    assert!(store.get_all("dogs").await.unwrap().is_empty());

    for id in ["3", "1", "7", "2", "9"] {
        store
            .insert("dogs", record(json!({"id": id, "name": format!("dog-{}", id)})))
            .await
            .unwrap();
    }
    store.delete("dogs", "7").await.unwrap();
    store.delete("dogs", "3").await.unwrap();

    let ids: Vec<_> = store
        .get_all("dogs")
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.get("id").and_then(|v| v.as_str()).unwrap().to_string())
        .collect();
    assert_eq!(ids, vec!["1", "2", "9"]);
    assert_eq!(store.list_members("dogs").await.unwrap(), vec!["dogs:1", "dogs:2", "dogs:9"]);
}

#[tokio::test]
async fn test_orphan_index_entry_blocks_insert() {
    let (store, backend) = dog_store();
    store.list_members("dogs").await.unwrap(); // connects
    backend.list_append("dogs", "dogs:1").await.unwrap();

    let err = store
        .insert("dogs", record(json!({"id": "1", "name": "ralph"})))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::DatabaseInsert { ref key, .. } if key == "dogs:1"));

    // nothing was repaired or duplicated
    assert_eq!(backend.list_range("dogs", 0, -1).await.unwrap(), vec!["dogs:1"]);
    assert!(!backend.exists("dogs:1").await.unwrap());
}

#[tokio::test]
async fn test_orphan_index_entry_fails_get_all() {
    let (store, backend) = dog_store();
    store
        .insert("dogs", record(json!({"id": "1", "name": "ralph"})))
        .await
        .unwrap();
    backend.delete("dogs:1").await.unwrap();

    let err = store.get_all("dogs").await.unwrap_err();
    assert!(matches!(err, StoreError::InconsistentIndex { ref key, .. } if key == "dogs:1"));
}

#[tokio::test]
async fn test_purge_removes_records_and_index() {
    let (store, backend) = dog_store();
    for id in ["1", "2", "3"] {
        store
            .insert("dogs", record(json!({"id": id, "name": "x"})))
            .await
            .unwrap();
    }

    assert_eq!(store.purge("dogs").await.unwrap(), 3);
    assert_eq!(backend.key_count(), 0);
    assert!(store.get_all("dogs").await.unwrap().is_empty());
}

// =============================================================================
// Failures of the underlying store
// =============================================================================

/// Delegates to a [`MemoryStore`] but can be told to fail or pause hash writes
#[derive(Default)]
struct FlakyStore {
    inner: MemoryStore,
    fail_hash_writes: AtomicBool,
    pause_hash_writes: AtomicBool,
    paused: Notify,
    resume: Notify,
}

#[async_trait]
impl KeyValueStore for FlakyStore {
    async fn connect(&self, host: &str, port: u16) -> BackendResult<()> {
        self.inner.connect(host, port).await
    }

    async fn is_open(&self) -> bool {
        self.inner.is_open().await
    }

    async fn exists(&self, key: &str) -> BackendResult<bool> {
        self.inner.exists(key).await
    }

    async fn hash_set_fields(&self, key: &str, fields: &[(String, String)]) -> BackendResult<()> {
        if self.fail_hash_writes.load(Ordering::SeqCst) {
            return Err(BackendError::Server("OOM command not allowed".to_string()));
        }
        if self.pause_hash_writes.load(Ordering::SeqCst) {
            self.paused.notify_one();
            self.resume.notified().await;
        }
        self.inner.hash_set_fields(key, fields).await
    }

    async fn hash_get_all(&self, key: &str) -> BackendResult<Vec<(String, String)>> {
        self.inner.hash_get_all(key).await
    }

    async fn delete(&self, key: &str) -> BackendResult<()> {
        self.inner.delete(key).await
    }

    async fn list_append(&self, list_key: &str, value: &str) -> BackendResult<()> {
        self.inner.list_append(list_key, value).await
    }

    async fn list_remove(&self, list_key: &str, value: &str, count: i64) -> BackendResult<usize> {
        self.inner.list_remove(list_key, value, count).await
    }

    async fn list_range(&self, list_key: &str, start: i64, end: i64) -> BackendResult<Vec<String>> {
        self.inner.list_range(list_key, start, end).await
    }
}

#[tokio::test]
async fn test_failed_hash_write_leaves_detectable_orphan() {
    let backend = Arc::new(FlakyStore {
        fail_hash_writes: AtomicBool::new(true),
        ..FlakyStore::default()
    });
    let mut store = RecordStore::new(backend.clone(), StoreConfig::default());
    store.register(dogs()).unwrap();

    let err = store
        .insert("dogs", record(json!({"id": "1", "name": "ralph"})))
        .await
        .unwrap_err();
    match err {
        StoreError::DatabaseInsert { key, reason } => {
            assert_eq!(key, "dogs:1");
            assert!(reason.contains("OOM"));
        }
        other => panic!("unexpected error: {:?}", other),
    }

    // the index entry stays and is reported on the next access
    assert_eq!(store.list_members("dogs").await.unwrap(), vec!["dogs:1"]);
    backend.fail_hash_writes.store(false, Ordering::SeqCst);
    assert!(matches!(
        store.get_all("dogs").await,
        Err(StoreError::InconsistentIndex { .. })
    ));
    assert!(matches!(
        store.insert("dogs", record(json!({"id": "1", "name": "ralph"}))).await,
        Err(StoreError::DatabaseInsert { .. })
    ));
}

#[tokio::test]
async fn test_connection_failure_is_reported_and_retried() {
    let backend = Arc::new(MemoryStore::new());
    backend.set_reachable(false);

    let mut store = RecordStore::new(backend.clone(), StoreConfig::new("cache.internal", 6380));
    store.register(dogs()).unwrap();

    let err = store.get_all("dogs").await.unwrap_err();
    match err {
        StoreError::Connection { host, port, .. } => {
            assert_eq!(host, "cache.internal");
            assert_eq!(port, 6380);
        }
        other => panic!("unexpected error: {:?}", other),
    }

    backend.set_reachable(true);
    assert!(store.get_all("dogs").await.unwrap().is_empty());
    assert!(backend.is_connected());
}

// =============================================================================
// Concurrency
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_duplicate_inserts() {
    let (store, backend) = dog_store();
    let store = Arc::new(store);

    let mut handles = Vec::new();
    for n in 0..16 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            store
                .insert("dogs", record(json!({"id": "1", "name": format!("dog-{}", n)})))
                .await
        }));
    }

    let mut inserted = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => inserted += 1,
            Err(StoreError::ItemAlreadyExists { .. }) => {}
            Err(other) => panic!("unexpected error: {:?}", other),
        }
    }

    assert_eq!(inserted, 1);
    assert_eq!(backend.list_range("dogs", 0, -1).await.unwrap(), vec!["dogs:1"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_purge_waits_for_insert_in_flight() {
    let backend = Arc::new(FlakyStore {
        pause_hash_writes: AtomicBool::new(true),
        ..FlakyStore::default()
    });
    let mut store = RecordStore::new(backend.clone(), StoreConfig::default());
    store.register(dogs()).unwrap();
    let store = Arc::new(store);

    // insert stops between its index append and its hash write
    let insert = tokio::spawn({
        let store = store.clone();
        async move { store.insert("dogs", record(json!({"id": "5", "name": "rex"}))).await }
    });
    backend.paused.notified().await;

    let purge = tokio::spawn({
        let store = store.clone();
        async move { store.purge("dogs").await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!purge.is_finished());

    backend.resume.notify_one();
    assert!(insert.await.unwrap().unwrap());
    assert_eq!(purge.await.unwrap().unwrap(), 1);

    // neither an index entry nor a record hash survives
    assert!(store.list_members("dogs").await.unwrap().is_empty());
    assert!(!backend.exists("dogs:5").await.unwrap());
    assert_eq!(backend.inner.key_count(), 0);
}
