use async_trait::async_trait;

use crate::engine::Transaction;
use crate::error::Result;
use crate::expression::UpdateValues;
use crate::types::{Item, Key};

use super::options::{IndexKeyCondition, QueryOptions};

/// Hooks a collection invokes around its operations.
///
/// Every method has a no-op default, so an extension implements only the
/// phases it cares about. Extensions run in registration order, each one
/// awaited before the next.
#[async_trait]
pub trait Extension: Send + Sync {
    /// Called with the full record (metadata included) before an insert
    /// commits. Changes to `entity` are written; operations added to
    /// `transaction` commit atomically with the insert.
    async fn on_insert(&self, _entity: &mut Item, _transaction: &mut Transaction) -> Result<()> {
        Ok(())
    }

    /// Called before an update commits. `update_values` may be extended.
    async fn on_update(
        &self,
        _key: &Key,
        _update_values: &mut UpdateValues,
        _transaction: &mut Transaction,
    ) -> Result<()> {
        Ok(())
    }

    async fn on_delete(&self, _key: &Key, _transaction: &mut Transaction) -> Result<()> {
        Ok(())
    }

    /// Supply the key condition for a query, typically against an index.
    /// The first extension returning `Some` wins.
    async fn expression_for_query(
        &self,
        _options: &QueryOptions,
    ) -> Result<Option<IndexKeyCondition>> {
        Ok(None)
    }

    /// Called with every record read back from the store.
    async fn post_retrieve(&self, _entity: &mut Item) -> Result<()> {
        Ok(())
    }

    /// Whether a stored record is out of date for this extension.
    fn entity_requires_migration(&self, _entity: &Item) -> bool {
        false
    }

    /// Field updates that bring `entity` up to date.
    async fn migrate_entity(&self, _entity: &Item) -> Result<UpdateValues> {
        Ok(UpdateValues::new())
    }
}
