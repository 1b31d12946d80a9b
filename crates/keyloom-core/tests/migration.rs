//! Integration tests for lazy entity migration through extensions.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::json;

use keyloom_core::collection::{Collection, Extension, GetOptions, InsertOptions};
use keyloom_core::error::{Error, MigrationError, Result};
use keyloom_core::expression::{UpdateValue, UpdateValues, compile_condition, compile_update};
use keyloom_core::store::{DeleteRequest, MemoryStore, SharedStore, Store, UpdateRequest};
use keyloom_core::types::{Item, Key, Value, item_from_json};

/// Upgrades entities without a `_v` to version 2 by adding `status`.
///
/// With `interference` set, the first upgrade also writes to (or deletes) the
/// entity behind the migration's back.
struct SchemaV2 {
    store: SharedStore,
    interference: Option<Interference>,
    fired: AtomicBool,
    calls: AtomicUsize,
}

#[derive(Clone, Copy)]
enum Interference {
    ConcurrentWrite,
    ConcurrentDelete,
}

impl SchemaV2 {
    fn new(store: SharedStore, interference: Option<Interference>) -> Self {
        Self {
            store,
            interference,
            fired: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        }
    }

    async fn interfere(&self, key: Key) -> Result<()> {
        if self.fired.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        match self.interference {
            Some(Interference::ConcurrentWrite) => {
                let update = UpdateValues::new()
                    .with("name", "changed")
                    .with("_wc", UpdateValue::Inc(1.0));
                self.store
                    .update_item(UpdateRequest {
                        key,
                        update: compile_update(&update)?.into_expression(),
                        condition: compile_condition(None),
                    })
                    .await?;
            }
            Some(Interference::ConcurrentDelete) => {
                self.store
                    .delete_item(DeleteRequest {
                        key,
                        condition: compile_condition(None),
                    })
                    .await?;
            }
            None => {}
        }
        Ok(())
    }
}

#[async_trait]
impl Extension for SchemaV2 {
    fn entity_requires_migration(&self, entity: &Item) -> bool {
        entity.get("_v").and_then(Value::as_f64).unwrap_or(0.0) < 2.0
    }

    async fn migrate_entity(&self, entity: &Item) -> Result<UpdateValues> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(key) = Key::from_item(entity) {
            self.interfere(key).await?;
        }
        Ok(UpdateValues::new()
            .with("_v", 2)
            .with("status", "active"))
    }
}

/// An upgrade that never makes the entity current.
struct Broken;

#[async_trait]
impl Extension for Broken {
    fn entity_requires_migration(&self, _entity: &Item) -> bool {
        true
    }

    async fn migrate_entity(&self, _entity: &Item) -> Result<UpdateValues> {
        Ok(UpdateValues::new().with("touched", true))
    }
}

async fn seed_v1(store: &SharedStore) -> Item {
    // Written without the extension so the entity starts out stale.
    let plain = Collection::builder("users", store.clone())
        .partition_key("id")
        .build();
    let entity = item_from_json(json!({"id": "1", "name": "A"}));
    plain
        .insert(&entity, InsertOptions::default())
        .await
        .unwrap();
    item_from_json(json!({"id": "1"}))
}

fn users_with(store: SharedStore, extension: Arc<dyn Extension>) -> Collection {
    Collection::builder("users", store)
        .partition_key("id")
        .extension(extension)
        .build()
}

#[tokio::test]
async fn test_get_migrates_stale_entity() {
    let store = MemoryStore::new().into_shared();
    let key = seed_v1(&store).await;
    let schema = Arc::new(SchemaV2::new(store.clone(), None));
    let users = users_with(store, schema.clone());

    let stored = users
        .get_with_metadata(&key, GetOptions::default())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored["_v"], Value::from(2));
    assert_eq!(stored["status"], Value::from("active"));
    assert_eq!(stored["_wc"], Value::from(2));
    assert_eq!(schema.calls.load(Ordering::SeqCst), 1);

    // Already current: no second migration.
    let entity = users
        .get(&key, GetOptions::default())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(entity["status"], Value::from("active"));
    assert!(!entity.contains_key("_v"));
    assert_eq!(schema.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_concurrent_write_recomputes_upgrade() {
    let store = MemoryStore::new().into_shared();
    let key = seed_v1(&store).await;
    let schema = Arc::new(SchemaV2::new(
        store.clone(),
        Some(Interference::ConcurrentWrite),
    ));
    let users = users_with(store, schema.clone());

    let stored = users
        .get_with_metadata(&key, GetOptions::default())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored["name"], Value::from("changed"));
    assert_eq!(stored["_v"], Value::from(2));
    assert_eq!(stored["_wc"], Value::from(3));
    assert_eq!(schema.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_concurrent_delete_cancels_migration() {
    let store = MemoryStore::new().into_shared();
    let key = seed_v1(&store).await;
    let schema = Arc::new(SchemaV2::new(
        store.clone(),
        Some(Interference::ConcurrentDelete),
    ));
    let users = users_with(store, schema);

    let err = users
        .get(&key, GetOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Migration(MigrationError::Cancelled)));
}

#[tokio::test]
async fn test_unsatisfiable_upgrade_does_not_converge() {
    let store = MemoryStore::new().into_shared();
    let key = seed_v1(&store).await;
    let users = users_with(store, Arc::new(Broken));

    let err = users
        .get(&key, GetOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Migration(MigrationError::DidNotConverge)));
}
