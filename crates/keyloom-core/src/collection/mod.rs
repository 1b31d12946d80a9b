//! Collections: typed entity access on top of the key builder, the
//! expression compilers and the transaction engine.
//!
//! Every entity of a collection is stored under `_PK = "{name}#{partition
//! fields…}"` and `_SK = "{name}#{sort fields…}"` with `_c` naming the
//! collection and `_wc` counting writes. Entities handed back to callers
//! have those metadata attributes stripped; the `*_with_metadata` variants
//! return the stored record as is.

pub mod extension;
mod migration;
pub mod options;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tracing::debug;

use crate::config::EngineConfig;
use crate::encoding::{build_collection_key, build_key_string};
use crate::engine::{DeleteOperation, Operation, Transaction, UpdateOperation};
use crate::error::{Result, StoreError, UpdateError};
use crate::expression::{
    Condition, ConditionOp, PathSegment, UpdateValue, UpdateValues, compile_condition,
    compile_key_condition, parse_path,
};
use crate::store::{MAX_BATCH_GET_KEYS, QueryRequest, ScanRequest, SharedStore};
use crate::types::{
    COLLECTION_ATTR, Item, Key, PARTITION_KEY_ATTR, SORT_KEY_ATTR, Value, WRITE_COUNT_ATTR,
    strip_metadata,
};

pub use extension::Extension;
pub use options::{
    GetOptions, IndexKeyCondition, InsertOptions, QueryOptions, QueryResult, ScanOptions,
    SortOrder, UpdateOptions,
};

// ---------------------------------------------------------------------------
// CollectionBuilder
// ---------------------------------------------------------------------------

/// Builder for declaring a collection.
pub struct CollectionBuilder {
    name: String,
    store: SharedStore,
    partition_fields: Vec<String>,
    sort_fields: Vec<String>,
    extensions: Vec<Arc<dyn Extension>>,
    config: EngineConfig,
}

impl CollectionBuilder {
    fn new(name: String, store: SharedStore) -> Self {
        Self {
            name,
            store,
            partition_fields: Vec::new(),
            sort_fields: Vec::new(),
            extensions: Vec::new(),
            config: EngineConfig::default(),
        }
    }

    /// Append a field to the partition key.
    pub fn partition_key(mut self, field: &str) -> Self {
        self.partition_fields.push(field.to_string());
        self
    }

    /// Append a field to the sort key. Sort fields are ordered from most
    /// to least significant.
    pub fn sort_key(mut self, field: &str) -> Self {
        self.sort_fields.push(field.to_string());
        self
    }

    /// Register an extension. Hooks run in registration order.
    pub fn extension(mut self, extension: Arc<dyn Extension>) -> Self {
        self.extensions.push(extension);
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Collection {
        Collection {
            inner: Arc::new(CollectionInner {
                name: self.name,
                store: self.store,
                partition_fields: self.partition_fields,
                sort_fields: self.sort_fields,
                extensions: self.extensions,
                config: self.config,
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Collection
// ---------------------------------------------------------------------------

struct CollectionInner {
    name: String,
    store: SharedStore,
    partition_fields: Vec<String>,
    sort_fields: Vec<String>,
    extensions: Vec<Arc<dyn Extension>>,
    config: EngineConfig,
}

/// A named set of entities sharing a key layout. Cheap to clone.
#[derive(Clone)]
pub struct Collection {
    inner: Arc<CollectionInner>,
}

fn strip_result(item: Item) -> Result<Item> {
    Ok(strip_metadata(item))
}

impl Collection {
    pub fn builder(name: &str, store: SharedStore) -> CollectionBuilder {
        CollectionBuilder::new(name.to_string(), store)
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn partition_fields(&self) -> &[String] {
        &self.inner.partition_fields
    }

    pub fn sort_fields(&self) -> &[String] {
        &self.inner.sort_fields
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &SharedStore {
        &self.inner.store
    }

    /// The stored key of an entity (only its key fields need be present).
    pub fn key_for(&self, entity: &Item) -> Result<Key> {
        let name = &self.inner.name;
        let pk = build_key_string(&self.inner.partition_fields, entity)?;
        let sk = build_key_string(&self.inner.sort_fields, entity)?;
        Ok(Key::new(
            build_collection_key(name, &pk),
            build_collection_key(name, &sk),
        ))
    }

    /// Start a transaction on this collection's store and config.
    pub fn transaction(&self, primary: impl Into<Operation>) -> Result<Transaction> {
        Ok(Transaction::new(self.inner.store.clone(), primary)?
            .with_config(self.inner.config.clone()))
    }

    fn is_key_field(&self, field: &str) -> bool {
        self.inner
            .partition_fields
            .iter()
            .chain(&self.inner.sort_fields)
            .any(|f| f == field)
    }

    fn consistent(&self, requested: Option<bool>) -> bool {
        requested.unwrap_or(self.inner.config.consistent_reads)
    }

    // -- Insert -------------------------------------------------------------

    /// Build the transaction that inserts `entity`, without committing it.
    ///
    /// Unless `allow_overwrite` is set the write is conditioned on no item
    /// existing at the key. With it, the entity's fields are written over
    /// the existing item's.
    pub async fn insert_transaction(
        &self,
        entity: &Item,
        options: InsertOptions,
    ) -> Result<Transaction> {
        let key = self.key_for(entity)?;
        let mut record = strip_metadata(entity.clone());
        record.extend(key.to_item());
        record.insert(
            COLLECTION_ATTR.to_string(),
            Value::from(self.inner.name.as_str()),
        );

        let mut primary = UpdateOperation::new(key);
        if !options.allow_overwrite {
            primary = primary.condition(PARTITION_KEY_ATTR, ConditionOp::Exists(false));
        }
        let mut transaction = self.transaction(primary)?;

        for extension in &self.inner.extensions {
            extension.on_insert(&mut record, &mut transaction).await?;
        }

        let mut values: UpdateValues = record
            .into_iter()
            .filter(|(field, _)| field != PARTITION_KEY_ATTR && field != SORT_KEY_ATTR)
            .map(|(field, value)| (field, UpdateValue::Literal(value)))
            .collect();
        values.set(WRITE_COUNT_ATTR, UpdateValue::Inc(1.0));
        fill_primary(&mut transaction, values)?;
        Ok(transaction)
    }

    /// Insert an entity and return it as stored, without metadata.
    pub async fn insert(&self, entity: &Item, options: InsertOptions) -> Result<Item> {
        let mut transaction = self.insert_transaction(entity, options).await?;
        transaction.set_result_transformer(Arc::new(strip_result));
        transaction.commit_with_return().await
    }

    pub async fn insert_with_metadata(&self, entity: &Item, options: InsertOptions) -> Result<Item> {
        self.insert_transaction(entity, options)
            .await?
            .commit_with_return()
            .await
    }

    // -- Update -------------------------------------------------------------

    /// Build the transaction that updates an existing entity.
    ///
    /// `key_entity` supplies the key fields. Key fields themselves cannot be
    /// updated.
    pub async fn update_transaction(
        &self,
        key_entity: &Item,
        mut values: UpdateValues,
        options: UpdateOptions,
    ) -> Result<Transaction> {
        let key = self.key_for(key_entity)?;
        for (field, _) in values.iter() {
            if let Some(PathSegment::Attribute(root)) = parse_path(field)?.first()
                && self.is_key_field(root)
            {
                return Err(UpdateError::KeyFieldUpdate(root.clone()).into());
            }
        }

        let mut condition = Condition::new().with(PARTITION_KEY_ATTR, ConditionOp::Exists(true));
        condition.merge(&options.condition)?;
        let primary = UpdateOperation::new(key.clone()).conditions(condition);
        let mut transaction = self.transaction(primary)?;

        values.set(WRITE_COUNT_ATTR, UpdateValue::Inc(1.0));
        for extension in &self.inner.extensions {
            extension.on_update(&key, &mut values, &mut transaction).await?;
        }
        fill_primary(&mut transaction, values)?;
        Ok(transaction)
    }

    /// Update an existing entity and return it, without metadata.
    pub async fn update(
        &self,
        key_entity: &Item,
        values: UpdateValues,
        options: UpdateOptions,
    ) -> Result<Item> {
        let mut transaction = self.update_transaction(key_entity, values, options).await?;
        transaction.set_result_transformer(Arc::new(strip_result));
        transaction.commit_with_return().await
    }

    pub async fn update_with_metadata(
        &self,
        key_entity: &Item,
        values: UpdateValues,
        options: UpdateOptions,
    ) -> Result<Item> {
        self.update_transaction(key_entity, values, options)
            .await?
            .commit_with_return()
            .await
    }

    // -- Delete -------------------------------------------------------------

    pub async fn delete_transaction(
        &self,
        key_entity: &Item,
        condition: Condition,
    ) -> Result<Transaction> {
        let key = self.key_for(key_entity)?;
        let mut primary = DeleteOperation::new(key.clone());
        primary.condition = condition;
        let mut transaction = self.transaction(primary)?;
        for extension in &self.inner.extensions {
            extension.on_delete(&key, &mut transaction).await?;
        }
        Ok(transaction)
    }

    pub async fn delete(&self, key_entity: &Item, condition: Condition) -> Result<()> {
        self.delete_transaction(key_entity, condition)
            .await?
            .commit()
            .await?;
        Ok(())
    }

    // -- Reads --------------------------------------------------------------

    /// Read one entity, migrating it first if any extension reports it
    /// stale.
    pub async fn get(&self, key_entity: &Item, options: GetOptions) -> Result<Option<Item>> {
        Ok(self
            .get_with_metadata(key_entity, options)
            .await?
            .map(strip_metadata))
    }

    pub async fn get_with_metadata(
        &self,
        key_entity: &Item,
        options: GetOptions,
    ) -> Result<Option<Item>> {
        let key = self.key_for(key_entity)?;
        let Some(mut item) = self
            .inner
            .store
            .get_item(&key, self.consistent(options.consistent))
            .await?
        else {
            return Ok(None);
        };
        if self.requires_migration(&item) {
            item = self.migrate(item).await?;
        }
        self.post_retrieve(&mut item).await?;
        Ok(Some(item))
    }

    pub async fn query(&self, options: QueryOptions) -> Result<QueryResult> {
        let mut index_condition = None;
        for extension in &self.inner.extensions {
            if let Some(condition) = extension.expression_for_query(&options).await? {
                index_condition = Some(condition);
                break;
            }
        }
        let (index_name, key_condition) = match index_condition {
            Some(IndexKeyCondition {
                index_name,
                key_condition,
            }) => (index_name, key_condition),
            None => (
                None,
                compile_key_condition(
                    &self.inner.name,
                    &self.inner.partition_fields,
                    &self.inner.sort_fields,
                    &options.key,
                )?,
            ),
        };

        let request = QueryRequest {
            index_name,
            key_condition,
            filter: compile_condition(Some(&options.filter)),
            scan_forward: options.sort == SortOrder::Ascending,
            limit: options.limit,
            exclusive_start_key: options.exclusive_start_key,
            consistent: self.consistent(options.consistent),
        };
        let page = self.inner.store.query(request).await?;
        Ok(QueryResult {
            items: self.finish(page.items).await?,
            last_evaluated_key: page.last_evaluated_key,
        })
    }

    /// Scan the table for this collection's entities.
    pub async fn scan(&self, options: ScanOptions) -> Result<QueryResult> {
        let mut filter = Condition::new().with(COLLECTION_ATTR, self.inner.name.as_str());
        filter.merge(&options.filter)?;

        let request = ScanRequest {
            filter: compile_condition(Some(&filter)),
            limit: options.limit,
            exclusive_start_key: options.exclusive_start_key,
            segment: options.segment,
            consistent: self.consistent(options.consistent),
        };
        let page = self.inner.store.scan(request).await?;
        Ok(QueryResult {
            items: self.finish(page.items).await?,
            last_evaluated_key: page.last_evaluated_key,
        })
    }

    /// Read many entities by key. Duplicate keys are read once; missing
    /// entities are absent from the result.
    ///
    /// Keys the store leaves unprocessed are requested again after an
    /// exponentially growing delay, up to `batch_get_max_attempts` calls
    /// per chunk.
    pub async fn batch_get(&self, key_entities: &[Item]) -> Result<BTreeMap<Key, Item>> {
        let keys = key_entities
            .iter()
            .map(|entity| self.key_for(entity))
            .collect::<Result<BTreeSet<_>>>()?;
        let keys: Vec<Key> = keys.into_iter().collect();
        let consistent = self.consistent(None);
        let config = &self.inner.config;

        let mut found = BTreeMap::new();
        for chunk in keys.chunks(MAX_BATCH_GET_KEYS) {
            let mut pending = chunk.to_vec();
            let mut attempt = 1;
            loop {
                let output = self.inner.store.batch_get(pending, consistent).await?;
                for item in output.items {
                    if let Some(key) = Key::from_item(&item) {
                        found.insert(key, item);
                    }
                }
                if output.unprocessed_keys.is_empty() {
                    break;
                }
                if attempt >= config.batch_get_max_attempts {
                    return Err(StoreError::Unavailable(format!(
                        "{} keys still unprocessed after {attempt} batch get attempts",
                        output.unprocessed_keys.len()
                    ))
                    .into());
                }
                let delay = config.batch_get_delay(attempt);
                debug!(
                    unprocessed = output.unprocessed_keys.len(),
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "retrying unprocessed batch get keys"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
                pending = output.unprocessed_keys;
            }
        }

        let mut entities = BTreeMap::new();
        for (key, mut item) in found {
            self.post_retrieve(&mut item).await?;
            entities.insert(key, strip_metadata(item));
        }
        Ok(entities)
    }

    // -- Migration ----------------------------------------------------------

    fn requires_migration(&self, entity: &Item) -> bool {
        self.inner
            .extensions
            .iter()
            .any(|e| e.entity_requires_migration(entity))
    }

    /// Bring a stored record up to date with every extension, guarded by its
    /// write count. Concurrent writes cause the upgrade to be recomputed;
    /// a concurrent delete fails with `MigrationError::Cancelled`.
    pub async fn migrate(&self, entity: Item) -> Result<Item> {
        migration::migrate(
            &self.inner.store,
            &self.inner.config,
            &self.inner.extensions,
            entity,
        )
        .await
    }

    async fn post_retrieve(&self, item: &mut Item) -> Result<()> {
        for extension in &self.inner.extensions {
            extension.post_retrieve(item).await?;
        }
        Ok(())
    }

    async fn finish(&self, items: Vec<Item>) -> Result<Vec<Item>> {
        let mut out = Vec::with_capacity(items.len());
        for mut item in items {
            self.post_retrieve(&mut item).await?;
            out.push(strip_metadata(item));
        }
        Ok(out)
    }
}

/// Merge the operation's own field updates under whatever extensions
/// already merged into the primary.
fn fill_primary(transaction: &mut Transaction, mut values: UpdateValues) -> Result<()> {
    if let Some(primary) = transaction.primary_mut().as_update_mut() {
        values.merge(&primary.update_values)?;
        primary.update_values = values;
    }
    Ok(())
}
