use agentstore::backends::MemoryStore;
use agentstore::data_store::{make_doc_id, BatchItem, DataStoreService, DATA_STORE_DB};
use agentstore::document_store::{Document, DocumentStore, IndexSpec, Selector, WriteAck};
use agentstore::StoreError;
use async_trait::async_trait;
use futures_util::future::join_all;
use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Delegates to a [`MemoryStore`] while counting calls, and can be told to fail
/// saves or index creation, or to slow index creation down.
#[derive(Default)]
struct CountingStore {
    inner: MemoryStore,
    gets: AtomicUsize,
    saves: AtomicUsize,
    finds: AtomicUsize,
    index_calls: AtomicUsize,
    fail_saves: AtomicBool,
    conflict_on_save: AtomicBool,
    fail_indexes: AtomicBool,
    slow_indexes: AtomicBool,
}

impl CountingStore {
    fn reset_counts(&self) {
        self.gets.store(0, Ordering::SeqCst);
        self.saves.store(0, Ordering::SeqCst);
        self.finds.store(0, Ordering::SeqCst);
        self.index_calls.store(0, Ordering::SeqCst);
    }
}

#[async_trait]
impl DocumentStore for CountingStore {
    async fn get(&self, db: &str, id: &str) -> Result<Document, StoreError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.inner.get(db, id).await
    }

    async fn save(&self, db: &str, id: &str, doc: Document) -> Result<WriteAck, StoreError> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        if self.conflict_on_save.load(Ordering::SeqCst) {
            return Err(StoreError::conflict(db, id, "document update conflict"));
        }
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(StoreError::Transport("connection reset".into()));
        }
        self.inner.save(db, id, doc).await
    }

    async fn delete(&self, db: &str, id: &str) -> Result<(), StoreError> {
        self.inner.delete(db, id).await
    }

    async fn list_all(&self, db: &str) -> Result<Vec<Document>, StoreError> {
        self.inner.list_all(db).await
    }

    async fn find(
        &self,
        db: &str,
        selector: &Selector,
        fields: Option<&[&str]>,
        limit: usize,
    ) -> Result<Vec<Document>, StoreError> {
        self.finds.fetch_add(1, Ordering::SeqCst);
        self.inner.find(db, selector, fields, limit).await
    }

    async fn ensure_index(&self, db: &str, index: &IndexSpec) -> Result<(), StoreError> {
        self.index_calls.fetch_add(1, Ordering::SeqCst);
        if self.slow_indexes.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        if self.fail_indexes.load(Ordering::SeqCst) {
            return Err(StoreError::Backend {
                status: 500,
                message: "index build failed".into(),
            });
        }
        self.inner.ensure_index(db, index).await
    }

    fn engine_name(&self) -> &str {
        "counting"
    }
}

fn setup() -> (Arc<CountingStore>, DataStoreService) {
    let store = Arc::new(CountingStore::default());
    let service = DataStoreService::new(store.clone());
    (store, service)
}

fn meta(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap()
}

#[tokio::test]
async fn test_set_then_get_round_trip() {
    let (_, service) = setup();
    let value = json!({"nested": [1, 2, {"deep": true}], "text": "hi"});

    let written = service
        .set("u1", "ns", "k", value.clone(), Some("writer"), None)
        .await
        .unwrap();
    assert_eq!(written.rev.as_deref(), Some("1-mem"));
    assert_eq!(written.created_by_agent.as_deref(), Some("writer"));

    let record = service.get("u1", "ns", "k", None).await.unwrap().unwrap();
    assert_eq!(record.value, value);
    assert_eq!(record.user_id, "u1");
    assert_eq!(record.namespace, "ns");
    assert_eq!(record.key, "k");
    assert_eq!(record.id, make_doc_id("u1", "ns", "k"));
}

#[tokio::test]
async fn test_get_missing_key_is_none() {
    let (_, service) = setup();
    assert!(service.get("u1", "ns", "missing", Some("a")).await.unwrap().is_none());
    assert!(!service.delete("u1", "ns", "missing").await.unwrap());
}

#[tokio::test]
async fn test_users_are_isolated() {
    let (_, service) = setup();
    service.set("alice", "shared", "k", json!("a"), None, None).await.unwrap();
    service.set("bob", "shared", "k", json!("b"), None, None).await.unwrap();
    service.set("bob", "private", "p", json!(1), None, None).await.unwrap();

    let alice = service.get("alice", "shared", "k", None).await.unwrap().unwrap();
    assert_eq!(alice.value, json!("a"));
    assert_eq!(service.list_keys("alice", "shared", None).await.unwrap(), vec!["k"]);
    assert_eq!(service.list_namespaces("alice").await.unwrap(), vec!["shared"]);
    assert!(service.get_all("alice", "private", None).await.unwrap().is_empty());
    assert!(service.get("alice", "private", "p", None).await.unwrap().is_none());
}

#[tokio::test]
async fn test_get_all_is_a_single_query() {
    let (store, service) = setup();
    for i in 0..100 {
        service
            .set("u1", "bulk", &format!("key-{:03}", i), json!(i), None, None)
            .await
            .unwrap();
    }
    service.set("u1", "other", "x", json!("x"), None, None).await.unwrap();
    store.reset_counts();

    let all = service.get_all("u1", "bulk", None).await.unwrap();

    assert_eq!(all.len(), 100);
    assert_eq!(all["key-042"], json!(42));
    assert_eq!(store.finds.load(Ordering::SeqCst), 1);
    assert_eq!(store.gets.load(Ordering::SeqCst), 0);
    assert_eq!(store.saves.load(Ordering::SeqCst), 0);

    // Same answer as list_keys followed by per-key get.
    let keys = service.list_keys("u1", "bulk", None).await.unwrap();
    let looped = service.get_many("u1", "bulk", &keys, None).await.unwrap();
    assert_eq!(looped, all);
}

#[tokio::test]
async fn test_get_all_with_agent_tracks_every_record() {
    let (store, service) = setup();
    for key in ["a", "b", "c"] {
        service.set("u1", "ns", key, json!(key), None, None).await.unwrap();
    }
    store.reset_counts();

    let all = service.get_all("u1", "ns", Some("reader")).await.unwrap();
    assert_eq!(all.len(), 3);
    assert_eq!(store.finds.load(Ordering::SeqCst), 1);
    assert_eq!(store.gets.load(Ordering::SeqCst), 0);
    assert_eq!(store.saves.load(Ordering::SeqCst), 3);

    let record = service.get("u1", "ns", "b", None).await.unwrap().unwrap();
    assert_eq!(record.access_count, 1);
    assert_eq!(record.last_accessed_by_agent.as_deref(), Some("reader"));
}

#[tokio::test]
async fn test_indexes_ensured_once_per_namespace() {
    let (store, service) = setup();

    service.set("u1", "a", "k1", json!(1), None, None).await.unwrap();
    assert_eq!(store.index_calls.load(Ordering::SeqCst), 1);

    service.set("u1", "a", "k2", json!(2), None, None).await.unwrap();
    service.set("u1", "a", "k1", json!(3), None, None).await.unwrap();
    assert_eq!(store.index_calls.load(Ordering::SeqCst), 1);

    service.set("u1", "b", "k1", json!(1), None, None).await.unwrap();
    assert_eq!(store.index_calls.load(Ordering::SeqCst), 2);

    let indexes = store.inner.indexes(DATA_STORE_DB);
    assert_eq!(indexes.len(), 1);
    assert_eq!(indexes[0].fields, vec!["userId", "namespace"]);
}

#[tokio::test]
async fn test_index_cache_is_per_user() {
    let (store, service) = setup();

    service.set("u1", "a", "k", json!(1), None, None).await.unwrap();
    assert_eq!(store.index_calls.load(Ordering::SeqCst), 1);

    service.set("u2", "a", "k", json!(1), None, None).await.unwrap();
    assert_eq!(store.index_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_concurrent_first_writes_ensure_indexes_once() {
    let (store, service) = setup();
    store.slow_indexes.store(true, Ordering::SeqCst);

    let writes = (0..8).map(|i| {
        let service = &service;
        async move {
            service
                .set("u1", "ns", &format!("k{}", i), json!(i), None, None)
                .await
        }
    });
    for written in join_all(writes).await {
        written.unwrap();
    }
    assert_eq!(store.index_calls.load(Ordering::SeqCst), 1);
    assert_eq!(service.list_keys("u1", "ns", None).await.unwrap().len(), 8);
}

#[tokio::test]
async fn test_with_standard_indexes_provisions_before_first_write() {
    let store = Arc::new(CountingStore::default());
    let service = DataStoreService::with_standard_indexes(store.clone()).await;

    assert_eq!(store.index_calls.load(Ordering::SeqCst), 1);
    assert_eq!(store.saves.load(Ordering::SeqCst), 0);
    let indexes = store.inner.indexes(DATA_STORE_DB);
    assert_eq!(indexes.len(), 1);
    assert_eq!(indexes[0].resolved_name(), "idx-user-namespace");
    assert_eq!(service.engine_name(), "counting");
}

#[tokio::test]
async fn test_index_failure_does_not_fail_writes() {
    let (store, service) = setup();
    store.fail_indexes.store(true, Ordering::SeqCst);

    service.ensure_standard_indexes().await;
    service.set("u1", "ns", "k", json!("v"), None, None).await.unwrap();

    let all = service.get_all("u1", "ns", None).await.unwrap();
    assert_eq!(all["k"], json!("v"));
}

#[tokio::test]
async fn test_access_tracking_failure_does_not_fail_reads() {
    let (store, service) = setup();
    service.set("u1", "ns", "k", json!("v"), None, None).await.unwrap();
    service.set("u1", "ns", "j", json!("w"), None, None).await.unwrap();
    store.fail_saves.store(true, Ordering::SeqCst);

    let record = service.get("u1", "ns", "k", Some("reader")).await.unwrap().unwrap();
    assert_eq!(record.value, json!("v"));

    let all = service.get_all("u1", "ns", Some("reader")).await.unwrap();
    assert_eq!(all.len(), 2);

    store.fail_saves.store(false, Ordering::SeqCst);
    let stored = service.get("u1", "ns", "k", None).await.unwrap().unwrap();
    assert_eq!(stored.access_count, 0);
}

#[tokio::test]
async fn test_conflict_surfaces_from_set() {
    let (store, service) = setup();
    store.conflict_on_save.store(true, Ordering::SeqCst);

    let err = service
        .set("u1", "ns", "k", json!("v"), None, None)
        .await
        .unwrap_err();
    assert!(err.is_conflict());
}

#[tokio::test]
async fn test_access_count_changes_only_on_agent_reads() {
    let (_, service) = setup();
    service
        .set("u1", "files:repoA", "a.py", json!("print(1)"), Some("indexer"), None)
        .await
        .unwrap();

    let all = service.get_all("u1", "files:repoA", None).await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all["a.py"], json!("print(1)"));

    service
        .set("u1", "files:repoA", "a.py", json!("print(2)"), Some("indexer"), None)
        .await
        .unwrap();
    let record = service.get("u1", "files:repoA", "a.py", None).await.unwrap().unwrap();
    assert_eq!(record.value, json!("print(2)"));
    assert_eq!(record.access_count, 0);
    assert_eq!(record.created_by_agent.as_deref(), Some("indexer"));

    let read = service
        .get("u1", "files:repoA", "a.py", Some("reviewer"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(read.access_count, 1);
    assert_eq!(read.last_accessed_by_agent.as_deref(), Some("reviewer"));
    assert!(read.rev.is_some());

    let again = service.get("u1", "files:repoA", "a.py", None).await.unwrap().unwrap();
    assert_eq!(again.access_count, 1);
}

#[tokio::test]
async fn test_update_merges_metadata_and_keeps_creation_fields() {
    let (_, service) = setup();
    let first = service
        .set(
            "u1",
            "ns",
            "k",
            json!(1),
            Some("creator"),
            Some(meta(json!({"lang": "py", "size": 1}))),
        )
        .await
        .unwrap();

    let second = service
        .set(
            "u1",
            "ns",
            "k",
            json!(2),
            Some("editor"),
            Some(meta(json!({"size": 2, "reviewed": true}))),
        )
        .await
        .unwrap();

    assert_eq!(second.metadata["lang"], "py");
    assert_eq!(second.metadata["size"], 2);
    assert_eq!(second.metadata["reviewed"], true);
    assert_eq!(second.created_at, first.created_at);
    assert_eq!(second.created_by_agent.as_deref(), Some("creator"));
    assert_eq!(second.last_accessed_by_agent.as_deref(), Some("editor"));
    assert!(second.updated_at >= first.updated_at);
    assert_eq!(second.rev.as_deref(), Some("2-mem"));
}

#[tokio::test]
async fn test_list_keys_sorted_with_prefix() {
    let (_, service) = setup();
    for key in ["src/b.rs", "README", "src/a.rs", "docs/x.md"] {
        service.set("u1", "repo", key, json!(key), None, None).await.unwrap();
    }

    assert_eq!(
        service.list_keys("u1", "repo", None).await.unwrap(),
        vec!["README", "docs/x.md", "src/a.rs", "src/b.rs"]
    );
    assert_eq!(
        service.list_keys("u1", "repo", Some("src/")).await.unwrap(),
        vec!["src/a.rs", "src/b.rs"]
    );
}

#[tokio::test]
async fn test_missing_namespace_reported_as_default() {
    let (store, service) = setup();
    service.set("u1", "zeta", "k", json!(1), None, None).await.unwrap();
    store.inner.insert_raw(
        DATA_STORE_DB,
        "legacy-1",
        meta(json!({"_id": "legacy-1", "userId": "u1", "key": "old", "value": 1})),
    );
    store.inner.insert_raw(
        DATA_STORE_DB,
        "legacy-2",
        meta(json!({"_id": "legacy-2", "userId": "u1", "namespace": null, "key": "older", "value": 2})),
    );

    assert_eq!(
        service.list_namespaces("u1").await.unwrap(),
        vec!["default", "zeta"]
    );
}

#[tokio::test]
async fn test_set_many_writes_every_item() {
    let (_, service) = setup();
    let items = vec![
        BatchItem::new("a", "k1", json!(1)),
        BatchItem::new("a", "k2", json!(2)).with_metadata(meta(json!({"tag": "x"}))),
        BatchItem::new("b", "k1", json!(3)),
    ];

    let written = service.set_many("u1", items, Some("batcher")).await.unwrap();
    assert_eq!(written, 3);

    assert_eq!(service.get("u1", "a", "k1", None).await.unwrap().unwrap().value, json!(1));
    let tagged = service.get("u1", "a", "k2", None).await.unwrap().unwrap();
    assert_eq!(tagged.metadata["tag"], "x");
    assert_eq!(service.get("u1", "b", "k1", None).await.unwrap().unwrap().value, json!(3));
}

#[tokio::test]
async fn test_set_many_stops_at_first_failure() {
    let (store, service) = setup();
    service
        .set_many("u1", vec![BatchItem::new("a", "first", json!(1))], None)
        .await
        .unwrap();
    store.fail_saves.store(true, Ordering::SeqCst);

    let result = service
        .set_many(
            "u1",
            vec![BatchItem::new("a", "second", json!(2)), BatchItem::new("a", "third", json!(3))],
            None,
        )
        .await;
    assert!(result.is_err());

    store.fail_saves.store(false, Ordering::SeqCst);
    assert_eq!(service.list_keys("u1", "a", None).await.unwrap(), vec!["first"]);
}

#[tokio::test]
async fn test_clear_namespace_leaves_others_untouched() {
    let (_, service) = setup();
    for key in ["a", "b", "c"] {
        service.set("u1", "scratch", key, json!(key), None, None).await.unwrap();
    }
    service.set("u1", "keep", "a", json!("kept"), None, None).await.unwrap();
    service.set("u2", "scratch", "a", json!("other user"), None, None).await.unwrap();

    assert_eq!(service.clear_namespace("u1", "scratch").await.unwrap(), 3);
    assert!(service.list_keys("u1", "scratch", None).await.unwrap().is_empty());
    assert_eq!(service.get("u1", "keep", "a", None).await.unwrap().unwrap().value, json!("kept"));
    assert_eq!(
        service.get("u2", "scratch", "a", None).await.unwrap().unwrap().value,
        json!("other user")
    );
    assert_eq!(service.clear_namespace("u1", "scratch").await.unwrap(), 0);
}

#[tokio::test]
async fn test_keys_with_delimiters_stay_distinct() {
    let (_, service) = setup();
    service.set("u1", "ns", "a:b", json!("colon"), None, None).await.unwrap();
    service.set("u1", "ns:a", "b", json!("nested ns"), None, None).await.unwrap();

    assert_eq!(service.get("u1", "ns", "a:b", None).await.unwrap().unwrap().value, json!("colon"));
    assert_eq!(
        service.get("u1", "ns:a", "b", None).await.unwrap().unwrap().value,
        json!("nested ns")
    );
}

#[tokio::test]
async fn test_open_memory_backend() {
    let service = DataStoreService::open(&agentstore::DataStoreConfig::default())
        .await
        .unwrap();
    assert_eq!(service.engine_name(), "memory");
    service.set("u1", "ns", "k", json!(true), None, None).await.unwrap();
    assert_eq!(service.get("u1", "ns", "k", None).await.unwrap().unwrap().value, json!(true));
}
