//! Lazy migration of stale entities.
//!
//! A migration is an ordinary transaction: an update of `_wc` guarded by the
//! write count the entity was read with. Extension upgrades are contributed
//! by a pre-commit handler, so they are recomputed from fresh state whenever
//! a concurrent write forces a retry.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::try_join_all;
use parking_lot::Mutex;
use tracing::debug;

use crate::config::EngineConfig;
use crate::engine::{
    ErrorHandler, Operation, PreCommitHandler, Recovery, Transaction, UpdateOperation,
};
use crate::error::{EncodingError, Error, MigrationError, Result};
use crate::expression::{Condition, ConditionOp, UpdateValue};
use crate::store::SharedStore;
use crate::types::{Item, Key, PARTITION_KEY_ATTR, WRITE_COUNT_ATTR};

use super::extension::Extension;

/// The condition that the stored entity is still the version `entity`.
fn unchanged_since(entity: &Item) -> Condition {
    let write_count = match entity.get(WRITE_COUNT_ATTR) {
        Some(count) => ConditionOp::Eq(count.clone()),
        None => ConditionOp::Exists(false),
    };
    Condition::new()
        .with(PARTITION_KEY_ATTR, ConditionOp::Exists(true))
        .with(WRITE_COUNT_ATTR, write_count)
}

/// Asks every extension for its upgrade of the latest known entity state.
struct MigrationContributions {
    key: Key,
    state: Arc<Mutex<Item>>,
    extensions: Vec<Arc<dyn Extension>>,
}

#[async_trait]
impl PreCommitHandler for MigrationContributions {
    async fn before_commit(&self) -> Result<Vec<Operation>> {
        let entity = self.state.lock().clone();
        let upgrades =
            try_join_all(self.extensions.iter().map(|e| e.migrate_entity(&entity))).await?;
        Ok(upgrades
            .into_iter()
            .filter(|values| !values.is_empty())
            .map(|values| {
                Operation::Update(UpdateOperation::new(self.key.clone()).update_values(values))
            })
            .collect())
    }
}

/// Refreshes the state after a concurrent write and retries; gives up if the
/// entity was deleted.
struct MigrationConflictHandler {
    store: SharedStore,
    key: Key,
    state: Arc<Mutex<Item>>,
}

#[async_trait]
impl ErrorHandler for MigrationConflictHandler {
    async fn handle(&self, _error: &Error, operation: &mut Operation) -> Result<Recovery> {
        let Some(current) = self.store.get_item(&self.key, true).await? else {
            debug!(key = %self.key, "entity deleted during migration");
            return Err(MigrationError::Cancelled.into());
        };
        *operation.condition_mut() = unchanged_since(&current);
        *self.state.lock() = current;
        Ok(Recovery::Retry)
    }
}

/// Migrate a stored record (metadata included) and return the migrated
/// record.
pub(super) async fn migrate(
    store: &SharedStore,
    config: &EngineConfig,
    extensions: &[Arc<dyn Extension>],
    entity: Item,
) -> Result<Item> {
    let key = Key::from_item(&entity)
        .ok_or_else(|| EncodingError::MissingKeyValue(PARTITION_KEY_ATTR.to_string()))?;
    debug!(key = %key, "migrating entity");

    let state = Arc::new(Mutex::new(entity.clone()));
    let primary = UpdateOperation::new(key.clone())
        .set(WRITE_COUNT_ATTR, UpdateValue::Inc(1.0))
        .conditions(unchanged_since(&entity))
        .on_error(Arc::new(MigrationConflictHandler {
            store: store.clone(),
            key: key.clone(),
            state: state.clone(),
        }));

    let mut transaction = Transaction::new(store.clone(), primary)?.with_config(config.clone());
    transaction.add_pre_commit_handler(Arc::new(MigrationContributions {
        key,
        state,
        extensions: extensions.to_vec(),
    }));
    let migrated = transaction.commit_with_return().await?;

    if extensions
        .iter()
        .any(|e| e.entity_requires_migration(&migrated))
    {
        return Err(MigrationError::DidNotConverge.into());
    }
    Ok(migrated)
}
