//! The backing store protocol and an in-memory implementation of it.
//!
//! A [`Store`] is one wide-column table addressed by `(_PK, _SK)`. Requests
//! carry native expressions ([`CompiledExpression`]) produced by the
//! compilers in [`crate::expression`].

mod apply;
mod eval;
pub mod memory;
mod parser;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::expression::CompiledExpression;
use crate::types::{Item, Key};

pub use memory::MemoryStore;

/// Maximum number of items in one atomic transactional write.
pub const MAX_TRANSACT_ITEMS: usize = 100;

/// Maximum number of keys in one batch-get call.
pub const MAX_BATCH_GET_KEYS: usize = 100;

/// Per-operation outcome of a cancelled transactional write.
///
/// Reasons are reported by position; code `"None"` means the operation at
/// that position was not the cause of the cancellation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancellationReason {
    pub code: String,
    pub message: Option<String>,
}

impl CancellationReason {
    pub const NONE: &'static str = "None";
    pub const CONDITIONAL_CHECK_FAILED: &'static str = "ConditionalCheckFailed";

    pub fn none() -> Self {
        Self {
            code: Self::NONE.to_string(),
            message: None,
        }
    }

    pub fn conditional_check_failed() -> Self {
        Self {
            code: Self::CONDITIONAL_CHECK_FAILED.to_string(),
            message: Some("The conditional request failed".to_string()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.code == Self::NONE
    }

    pub fn is_conditional_check_failed(&self) -> bool {
        self.code == Self::CONDITIONAL_CHECK_FAILED
    }
}

impl fmt::Display for CancellationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(message) => write!(f, "{}: {message}", self.code),
            None => write!(f, "{}", self.code),
        }
    }
}

/// Conditional upsert of one item, returning the item after the write.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateRequest {
    pub key: Key,
    pub update: CompiledExpression,
    pub condition: CompiledExpression,
}

/// Conditional delete of one item, returning the item before the write.
#[derive(Debug, Clone, PartialEq)]
pub struct DeleteRequest {
    pub key: Key,
    pub condition: CompiledExpression,
}

/// A condition on one item that must hold for a transaction to commit.
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionCheckRequest {
    pub key: Key,
    pub condition: CompiledExpression,
}

/// One member of an atomic transactional write.
#[derive(Debug, Clone, PartialEq)]
pub enum TransactWriteItem {
    Update(UpdateRequest),
    Delete(DeleteRequest),
    ConditionCheck(ConditionCheckRequest),
}

impl TransactWriteItem {
    pub fn key(&self) -> &Key {
        match self {
            TransactWriteItem::Update(r) => &r.key,
            TransactWriteItem::Delete(r) => &r.key,
            TransactWriteItem::ConditionCheck(r) => &r.key,
        }
    }

    pub fn condition(&self) -> &CompiledExpression {
        match self {
            TransactWriteItem::Update(r) => &r.condition,
            TransactWriteItem::Delete(r) => &r.condition,
            TransactWriteItem::ConditionCheck(r) => &r.condition,
        }
    }
}

/// Range query on the table or one of its secondary indexes.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    /// `None` queries the primary key; `Some(id)` queries the index whose
    /// key attributes are `_{id}PK` / `_{id}SK`.
    pub index_name: Option<String>,
    pub key_condition: CompiledExpression,
    pub filter: CompiledExpression,
    pub scan_forward: bool,
    /// Maximum number of items to evaluate (before filtering).
    pub limit: Option<usize>,
    pub exclusive_start_key: Option<Item>,
    pub consistent: bool,
}

impl QueryRequest {
    pub fn new(key_condition: CompiledExpression) -> Self {
        Self {
            index_name: None,
            key_condition,
            filter: CompiledExpression::empty(),
            scan_forward: true,
            limit: None,
            exclusive_start_key: None,
            consistent: false,
        }
    }
}

/// One segment of a parallel scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub segment: u32,
    pub total_segments: u32,
}

/// Full-table scan, optionally restricted to one segment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanRequest {
    pub filter: CompiledExpression,
    pub limit: Option<usize>,
    pub exclusive_start_key: Option<Item>,
    pub segment: Option<Segment>,
    pub consistent: bool,
}

/// A page of query or scan results.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub items: Vec<Item>,
    /// Continuation cursor; present when more items may follow.
    pub last_evaluated_key: Option<Item>,
}

/// Result of a batch get. Keys the store did not get to are returned in
/// `unprocessed_keys` and must be requested again.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchGetOutput {
    pub items: Vec<Item>,
    pub unprocessed_keys: Vec<Key>,
}

/// The backing-store protocol, scoped to a single table.
#[async_trait]
pub trait Store: Send + Sync {
    /// Point read. `consistent` requests a strongly consistent read.
    async fn get_item(&self, key: &Key, consistent: bool) -> Result<Option<Item>, StoreError>;

    /// Conditional update (creating the item if absent). Returns the full
    /// item after the write.
    async fn update_item(&self, request: UpdateRequest) -> Result<Item, StoreError>;

    /// Conditional delete. Returns the deleted item, if there was one.
    async fn delete_item(&self, request: DeleteRequest) -> Result<Option<Item>, StoreError>;

    /// Atomic all-or-nothing write of up to [`MAX_TRANSACT_ITEMS`] items.
    ///
    /// On a failed condition the whole request fails with
    /// `StoreError::TransactionCanceled`, carrying one reason per item.
    async fn transact_write(&self, items: Vec<TransactWriteItem>) -> Result<(), StoreError>;

    async fn query(&self, request: QueryRequest) -> Result<Page, StoreError>;

    async fn scan(&self, request: ScanRequest) -> Result<Page, StoreError>;

    /// Read up to [`MAX_BATCH_GET_KEYS`] items. Missing items are omitted.
    async fn batch_get(&self, keys: Vec<Key>, consistent: bool)
    -> Result<BatchGetOutput, StoreError>;
}

/// A store shared between collections and transactions.
pub type SharedStore = Arc<dyn Store>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancellation_reason_display() {
        assert_eq!(CancellationReason::none().to_string(), "None");
        assert_eq!(
            CancellationReason::conditional_check_failed().to_string(),
            "ConditionalCheckFailed: The conditional request failed"
        );
        assert!(CancellationReason::none().is_ok());
        assert!(CancellationReason::conditional_check_failed().is_conditional_check_failed());
    }
}
