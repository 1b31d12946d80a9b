//! Transactions: a primary operation plus secondary operations, committed
//! as one unit with a bounded optimistic retry protocol.

use std::sync::Arc;

use futures_util::future::try_join_all;
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::error::{Error, Result, StoreError, TxnError};
use crate::store::SharedStore;
use crate::types::Item;

use super::handlers::{PreCommitHandler, Recovery, ResultTransformer};
use super::operation::{Operation, UpdateOperation};

/// The primary operation (position 0) followed by the secondaries.
#[derive(Clone)]
struct Operations {
    primary: Operation,
    secondary: Vec<Operation>,
}

impl Operations {
    fn len(&self) -> usize {
        1 + self.secondary.len()
    }

    fn iter(&self) -> impl Iterator<Item = &Operation> {
        std::iter::once(&self.primary).chain(self.secondary.iter())
    }

    fn get(&self, index: usize) -> Option<&Operation> {
        match index {
            0 => Some(&self.primary),
            i => self.secondary.get(i - 1),
        }
    }

    fn get_mut(&mut self, index: usize) -> Option<&mut Operation> {
        match index {
            0 => Some(&mut self.primary),
            i => self.secondary.get_mut(i - 1),
        }
    }

    /// Merge an update into an existing update on the same key, or append.
    fn add(&mut self, operation: Operation) -> Result<()> {
        if let Operation::Update(incoming) = &operation
            && let Some(existing) = self.update_on_key_mut(incoming)
        {
            existing.merge(incoming)?;
            return Ok(());
        }
        self.secondary.push(operation);
        Ok(())
    }

    fn update_on_key_mut(&mut self, incoming: &UpdateOperation) -> Option<&mut UpdateOperation> {
        std::iter::once(&mut self.primary)
            .chain(self.secondary.iter_mut())
            .filter_map(Operation::as_update_mut)
            .find(|existing| existing.key == incoming.key)
    }
}

/// Why an attempt did not commit.
enum Failure {
    /// A condition failed on the operation at `index`. `error` is handed to
    /// that operation's error handler; `unhandled` is returned when there
    /// is none.
    Conditional {
        index: usize,
        error: Error,
        unhandled: Error,
    },
    Fatal(Error),
}

impl From<Error> for Failure {
    fn from(error: Error) -> Self {
        Failure::Fatal(error)
    }
}

impl From<StoreError> for Failure {
    fn from(error: StoreError) -> Self {
        Failure::Fatal(error.into())
    }
}

/// A unit of work against the store.
///
/// With no secondary operations the primary is written directly; otherwise
/// all operations go to the store as one atomic transactional write.
pub struct Transaction {
    store: SharedStore,
    config: EngineConfig,
    operations: Operations,
    pre_commit: Vec<Arc<dyn PreCommitHandler>>,
    transformer: Option<ResultTransformer>,
}

impl Transaction {
    /// Create a transaction around its primary operation, which must be an
    /// update or a delete.
    pub fn new(store: SharedStore, primary: impl Into<Operation>) -> Result<Self> {
        let primary = primary.into();
        if let Operation::ConditionCheck(_) = primary {
            return Err(TxnError::InvalidPrimaryOperationType {
                expected: "update or delete",
                actual: primary.kind(),
            }
            .into());
        }
        Ok(Self {
            store,
            config: EngineConfig::default(),
            operations: Operations {
                primary,
                secondary: Vec::new(),
            },
            pre_commit: Vec::new(),
            transformer: None,
        })
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    pub fn primary(&self) -> &Operation {
        &self.operations.primary
    }

    pub fn primary_mut(&mut self) -> &mut Operation {
        &mut self.operations.primary
    }

    pub fn secondary_operations(&self) -> &[Operation] {
        &self.operations.secondary
    }

    /// Add an operation. An update whose key equals that of an existing
    /// update (primary first) is merged into it; anything else is appended.
    pub fn add_secondary_operation(&mut self, operation: impl Into<Operation>) -> Result<()> {
        self.operations.add(operation.into())
    }

    /// Fold another transaction's operations and pre-commit handlers into
    /// this one.
    pub fn add_secondary_transaction(&mut self, other: Transaction) -> Result<()> {
        let Operations { primary, secondary } = other.operations;
        self.operations.add(primary)?;
        for operation in secondary {
            self.operations.add(operation)?;
        }
        self.pre_commit.extend(other.pre_commit);
        Ok(())
    }

    pub fn add_pre_commit_handler(&mut self, handler: Arc<dyn PreCommitHandler>) {
        self.pre_commit.push(handler);
    }

    pub fn set_result_transformer(&mut self, transformer: ResultTransformer) {
        self.transformer = Some(transformer);
    }

    /// Commit, retrying on handled conditional failures.
    ///
    /// Returns the persisted primary item when the primary is an update, and
    /// `None` for a delete.
    pub async fn commit(self) -> Result<Option<Item>> {
        let Transaction {
            store,
            config,
            operations: mut snapshot,
            pre_commit,
            transformer,
        } = self;
        let mut retries = 0u32;

        loop {
            let mut attempt = snapshot.clone();
            for operation in run_pre_commit(&pre_commit).await? {
                attempt.add(operation)?;
            }

            let failure = match execute(&store, &config, &attempt, retries + 1).await {
                Ok(item) => {
                    return match (item, &transformer) {
                        (Some(item), Some(transform)) => transform(item).map(Some),
                        (item, _) => Ok(item),
                    };
                }
                Err(failure) => failure,
            };

            let (index, error, unhandled) = match failure {
                Failure::Fatal(error) => {
                    debug!(error = %error, "transaction failed");
                    return Err(error);
                }
                Failure::Conditional {
                    index,
                    error,
                    unhandled,
                } => (index, error, unhandled),
            };

            let Some(failed) = attempt.get(index) else {
                return Err(unhandled);
            };
            let Some(handler) = failed.error_handler().cloned() else {
                debug!(error = %unhandled, "conditional failure without error handler");
                return Err(unhandled);
            };

            // The handler edits the operation as it will be resubmitted.
            // Operations contributed by pre-commit handlers are rebuilt on
            // every attempt, so those get a throwaway copy.
            let mut scratch = failed.clone();
            let target = snapshot.get_mut(index).unwrap_or(&mut scratch);

            match handler.handle(&error, target).await? {
                Recovery::Retry => {
                    if retries >= config.max_retries {
                        debug!(retries, "transaction retry limit reached");
                        return Err(TxnError::MaxRetriesExceeded(config.max_retries).into());
                    }
                    retries += 1;
                    warn!(error = %error, retry = retries, "retrying transaction");
                }
                Recovery::Ignore => return Err(TxnError::InvalidErrorHandlerResponse.into()),
            }
        }
    }

    /// Commit a transaction whose primary operation is an update and return
    /// the persisted item.
    pub async fn commit_with_return(self) -> Result<Item> {
        if !matches!(self.operations.primary, Operation::Update(_)) {
            return Err(TxnError::InvalidPrimaryOperationType {
                expected: "update",
                actual: self.operations.primary.kind(),
            }
            .into());
        }
        self.commit()
            .await?
            .ok_or_else(|| TxnError::MissingReturnItem.into())
    }
}

async fn run_pre_commit(handlers: &[Arc<dyn PreCommitHandler>]) -> Result<Vec<Operation>> {
    if handlers.is_empty() {
        return Ok(Vec::new());
    }
    let contributed = try_join_all(handlers.iter().map(|h| h.before_commit())).await?;
    Ok(contributed.into_iter().flatten().collect())
}

async fn execute(
    store: &SharedStore,
    config: &EngineConfig,
    operations: &Operations,
    attempt: u32,
) -> std::result::Result<Option<Item>, Failure> {
    if operations.secondary.is_empty() {
        debug!(path = "single", operations = 1, attempt, "committing transaction");
        execute_single(store, &operations.primary).await
    } else {
        debug!(
            path = "multi",
            operations = operations.len(),
            attempt,
            "committing transaction"
        );
        execute_multi(store, config, operations).await
    }
}

async fn execute_single(
    store: &SharedStore,
    primary: &Operation,
) -> std::result::Result<Option<Item>, Failure> {
    let result = match primary {
        Operation::Update(update) => match store.update_item(update.to_request()?).await {
            Ok(item) => {
                update.run_success_handlers(&item)?;
                return Ok(Some(item));
            }
            Err(e) => e,
        },
        Operation::Delete(delete) => match store.delete_item(delete.to_request()).await {
            Ok(_) => return Ok(None),
            Err(e) => e,
        },
        Operation::ConditionCheck(_) => {
            return Err(Failure::Fatal(
                TxnError::InvalidPrimaryOperationType {
                    expected: "update or delete",
                    actual: primary.kind(),
                }
                .into(),
            ));
        }
    };

    match result {
        StoreError::ConditionalCheckFailed => {
            let message = format!("{} on {}", primary.kind(), primary.key());
            Err(Failure::Conditional {
                index: 0,
                error: TxnError::ConditionalCheckFailed(message.clone()).into(),
                unhandled: TxnError::ConditionalCheckFailed(message).into(),
            })
        }
        other => Err(other.into()),
    }
}

async fn execute_multi(
    store: &SharedStore,
    config: &EngineConfig,
    operations: &Operations,
) -> std::result::Result<Option<Item>, Failure> {
    let count = operations.len();
    if count > config.max_transaction_items {
        return Err(Failure::Fatal(
            TxnError::TooManyOperations {
                max: config.max_transaction_items,
                actual: count,
            }
            .into(),
        ));
    }

    let items = operations
        .iter()
        .map(Operation::to_transact_item)
        .collect::<Result<Vec<_>>>()?;

    match store.transact_write(items).await {
        Ok(()) => {}
        Err(StoreError::TransactionCanceled { reasons }) => {
            let failed = reasons.iter().position(|r| !r.is_ok());
            return Err(match failed {
                Some(index) if reasons[index].is_conditional_check_failed() => {
                    let message = match operations.get(index) {
                        Some(op) => format!("{} on {}: {}", op.kind(), op.key(), reasons[index]),
                        None => reasons[index].to_string(),
                    };
                    Failure::Conditional {
                        index,
                        error: TxnError::ConditionalCheckFailed(message).into(),
                        unhandled: TxnError::TransactionFailed { reasons }.into(),
                    }
                }
                _ => Failure::Fatal(TxnError::TransactionFailed { reasons }.into()),
            });
        }
        Err(other) => return Err(other.into()),
    }

    // Transactional writes return nothing, so read back what handlers and
    // the caller need.
    let targets: Vec<(usize, &UpdateOperation)> = operations
        .iter()
        .enumerate()
        .filter_map(|(i, op)| {
            let update = op.as_update()?;
            (i == 0 || !update.success_handlers.is_empty()).then_some((i, update))
        })
        .collect();
    let reads = try_join_all(targets.iter().map(|(_, u)| store.get_item(&u.key, true))).await?;

    let mut returned = None;
    for ((index, update), item) in targets.into_iter().zip(reads) {
        if let Some(item) = &item {
            update.run_success_handlers(item)?;
        }
        if index == 0 {
            returned = item;
        }
    }
    Ok(returned)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::engine::handlers::{error_handler_fn, pre_commit_fn, success_handler_fn};
    use crate::engine::operation::{ConditionCheckOperation, DeleteOperation};
    use crate::expression::{Condition, ConditionOp, UpdateValue};
    use crate::store::{MemoryStore, Store};
    use crate::types::{Key, Value};

    fn key(id: &str) -> Key {
        Key::new(format!("users#{id}#"), "users#")
    }

    fn setup() -> (Arc<MemoryStore>, SharedStore) {
        let memory = Arc::new(MemoryStore::new());
        let shared: SharedStore = memory.clone();
        (memory, shared)
    }

    async fn seed(store: &SharedStore, id: &str, field: &str, value: i64) {
        Transaction::new(store.clone(), UpdateOperation::new(key(id)).set(field, value))
            .unwrap()
            .commit()
            .await
            .unwrap();
    }

    fn counting_pre_commit(counter: Arc<AtomicUsize>) -> Arc<dyn PreCommitHandler> {
        pre_commit_fn(move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<Vec<Operation>, Error>(Vec::new())
            }
        })
    }

    // -----------------------------------------------------------------------
    // Construction and merging
    // -----------------------------------------------------------------------

    #[test]
    fn test_condition_check_cannot_be_primary() {
        let (_, store) = setup();
        let result = Transaction::new(
            store,
            ConditionCheckOperation::new(key("1"), Condition::new()),
        );
        assert!(matches!(
            result,
            Err(Error::Transaction(TxnError::InvalidPrimaryOperationType {
                actual: "condition check",
                ..
            }))
        ));
    }

    #[test]
    fn test_update_on_primary_key_merges() {
        let (_, store) = setup();
        let mut txn = Transaction::new(
            store,
            UpdateOperation::new(key("1")).set("count", UpdateValue::Inc(1.0)),
        )
        .unwrap();
        txn.add_secondary_operation(
            UpdateOperation::new(key("1")).set("count", UpdateValue::Inc(2.0)),
        )
        .unwrap();
        txn.add_secondary_operation(UpdateOperation::new(key("2")).set("x", 1))
            .unwrap();
        txn.add_secondary_operation(UpdateOperation::new(key("2")).set("y", 1))
            .unwrap();

        assert_eq!(txn.secondary_operations().len(), 1);
        let primary = txn.primary().as_update().unwrap();
        assert_eq!(
            primary.update_values.get("count"),
            Some(&UpdateValue::Inc(3.0))
        );
        assert_eq!(
            txn.secondary_operations()[0]
                .as_update()
                .unwrap()
                .update_values
                .len(),
            2
        );
    }

    #[test]
    fn test_non_update_operations_are_appended() {
        let (_, store) = setup();
        let mut txn = Transaction::new(store, UpdateOperation::new(key("1"))).unwrap();
        txn.add_secondary_operation(DeleteOperation::new(key("1")))
            .unwrap();
        txn.add_secondary_operation(ConditionCheckOperation::new(key("1"), Condition::new()))
            .unwrap();
        assert_eq!(txn.secondary_operations().len(), 2);
    }

    #[test]
    fn test_add_secondary_transaction_folds_operations() {
        let (_, store) = setup();
        let mut txn = Transaction::new(store.clone(), UpdateOperation::new(key("1")).set("a", 1))
            .unwrap();
        let mut other =
            Transaction::new(store, UpdateOperation::new(key("2")).set("b", 1)).unwrap();
        other
            .add_secondary_operation(UpdateOperation::new(key("1")).set("c", 1))
            .unwrap();
        other.add_pre_commit_handler(counting_pre_commit(Arc::new(AtomicUsize::new(0))));

        txn.add_secondary_transaction(other).unwrap();
        assert_eq!(txn.secondary_operations().len(), 1);
        assert_eq!(txn.primary().as_update().unwrap().update_values.len(), 2);
        assert_eq!(txn.pre_commit.len(), 1);
    }

    #[test]
    fn test_conflicting_merge_fails() {
        let (_, store) = setup();
        let mut txn =
            Transaction::new(store, UpdateOperation::new(key("1")).set("name", "A")).unwrap();
        let err = txn
            .add_secondary_operation(UpdateOperation::new(key("1")).set("name", "B"))
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Update(crate::error::UpdateError::ConflictingUpdate(_))
        ));
    }

    // -----------------------------------------------------------------------
    // Single-operation path
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_single_update_runs_success_handlers() {
        let (_, store) = setup();
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_in_handler = seen.clone();
        let op = UpdateOperation::new(key("1"))
            .set("name", "Alice")
            .on_success(success_handler_fn(move |item| {
                assert_eq!(item.get("name"), Some(&Value::from("Alice")));
                seen_in_handler.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }));
        let item = Transaction::new(store, op)
            .unwrap()
            .commit_with_return()
            .await
            .unwrap();
        assert_eq!(item.get("_PK"), Some(&Value::from("users#1#")));
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_single_delete_returns_none() {
        let (memory, store) = setup();
        seed(&store, "1", "v", 1).await;
        let result = Transaction::new(store, DeleteOperation::new(key("1")))
            .unwrap()
            .commit()
            .await
            .unwrap();
        assert!(result.is_none());
        assert!(memory.is_empty());
    }

    #[tokio::test]
    async fn test_commit_with_return_requires_update() {
        let (_, store) = setup();
        let err = Transaction::new(store, DeleteOperation::new(key("1")))
            .unwrap()
            .commit_with_return()
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Transaction(TxnError::InvalidPrimaryOperationType {
                expected: "update",
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_unhandled_condition_failure() {
        let (_, store) = setup();
        let op = UpdateOperation::new(key("1"))
            .set("name", "A")
            .condition("_PK", ConditionOp::Exists(true));
        let err = Transaction::new(store, op)
            .unwrap()
            .commit()
            .await
            .unwrap_err();
        assert!(err.is_conditional_check_failed());
    }

    #[tokio::test]
    async fn test_retry_is_bounded() {
        let (_, store) = setup();
        let attempts = Arc::new(AtomicUsize::new(0));
        let op = UpdateOperation::new(key("1"))
            .condition("_PK", ConditionOp::Exists(true))
            .on_error(error_handler_fn(|error: &Error, _: &mut Operation| {
                assert!(error.is_conditional_check_failed());
                Ok(Recovery::Retry)
            }));
        let mut txn = Transaction::new(store, op).unwrap();
        txn.add_pre_commit_handler(counting_pre_commit(attempts.clone()));

        let err = txn.commit().await.unwrap_err();
        assert!(matches!(
            err,
            Error::Transaction(TxnError::MaxRetriesExceeded(5))
        ));
        assert_eq!(attempts.load(Ordering::SeqCst), 6);
    }

    #[tokio::test]
    async fn test_retry_limit_follows_config() {
        let (_, store) = setup();
        let attempts = Arc::new(AtomicUsize::new(0));
        let op = UpdateOperation::new(key("1"))
            .condition("_PK", ConditionOp::Exists(true))
            .on_error(error_handler_fn(|_: &Error, _: &mut Operation| {
                Ok(Recovery::Retry)
            }));
        let mut txn = Transaction::new(store, op)
            .unwrap()
            .with_config(EngineConfig::default().max_retries(1));
        txn.add_pre_commit_handler(counting_pre_commit(attempts.clone()));

        let err = txn.commit().await.unwrap_err();
        assert!(matches!(
            err,
            Error::Transaction(TxnError::MaxRetriesExceeded(1))
        ));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_handler_edits_carry_into_retry() {
        let (_, store) = setup();
        seed(&store, "1", "v", 2).await;
        let op = UpdateOperation::new(key("1"))
            .set("name", "B")
            .condition("v", 1)
            .on_error(error_handler_fn(|_: &Error, operation: &mut Operation| {
                operation.condition_mut().insert("v", 2);
                Ok(Recovery::Retry)
            }));
        let item = Transaction::new(store, op)
            .unwrap()
            .commit_with_return()
            .await
            .unwrap();
        assert_eq!(item.get("name"), Some(&Value::from("B")));
    }

    #[tokio::test]
    async fn test_ignore_is_invalid_response() {
        let (_, store) = setup();
        let op = UpdateOperation::new(key("1"))
            .condition("_PK", ConditionOp::Exists(true))
            .on_error(error_handler_fn(|_: &Error, _: &mut Operation| {
                Ok(Recovery::Ignore)
            }));
        let err = Transaction::new(store, op)
            .unwrap()
            .commit()
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Transaction(TxnError::InvalidErrorHandlerResponse)
        ));
    }

    #[tokio::test]
    async fn test_handler_error_propagates() {
        let (_, store) = setup();
        let op = UpdateOperation::new(key("1"))
            .condition("_PK", ConditionOp::Exists(true))
            .on_error(error_handler_fn(|_: &Error, _: &mut Operation| {
                Err(TxnError::MissingReturnItem.into())
            }));
        let err = Transaction::new(store, op)
            .unwrap()
            .commit()
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Transaction(TxnError::MissingReturnItem)));
    }

    #[tokio::test]
    async fn test_result_transformer_applies_last() {
        let (_, store) = setup();
        let mut txn =
            Transaction::new(store, UpdateOperation::new(key("1")).set("name", "A")).unwrap();
        txn.set_result_transformer(Arc::new(|mut item: Item| {
            item.retain(|name, _| !name.starts_with('_'));
            Ok::<Item, Error>(item)
        }));
        let item = txn.commit_with_return().await.unwrap();
        assert_eq!(item.len(), 1);
    }

    // -----------------------------------------------------------------------
    // Multi-operation path
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_multi_commit_reads_back_primary() {
        let (memory, store) = setup();
        let secondary_seen = Arc::new(AtomicUsize::new(0));
        let seen = secondary_seen.clone();
        let mut txn =
            Transaction::new(store, UpdateOperation::new(key("1")).set("name", "A")).unwrap();
        txn.add_secondary_operation(UpdateOperation::new(key("2")).set("name", "B").on_success(
            success_handler_fn(move |item| {
                assert_eq!(item.get("name"), Some(&Value::from("B")));
                seen.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        ))
        .unwrap();

        let item = txn.commit_with_return().await.unwrap();
        assert_eq!(item.get("name"), Some(&Value::from("A")));
        assert_eq!(memory.len(), 2);
        assert_eq!(secondary_seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_condition_check_leaves_no_writes() {
        let (memory, store) = setup();
        let mut txn =
            Transaction::new(store.clone(), UpdateOperation::new(key("1")).set("name", "A"))
                .unwrap();
        txn.add_secondary_operation(ConditionCheckOperation::new(
            key("2"),
            Condition::new().with("_PK", ConditionOp::Exists(true)),
        ))
        .unwrap();

        let err = txn.commit().await.unwrap_err();
        match err {
            Error::Transaction(TxnError::TransactionFailed { reasons }) => {
                assert_eq!(reasons.len(), 2);
                assert!(reasons[0].is_ok());
                assert!(reasons[1].is_conditional_check_failed());
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(memory.is_empty());
        assert!(store.get_item(&key("1"), true).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_secondary_handler_retries() {
        let (_, store) = setup();
        let attempts = Arc::new(AtomicUsize::new(0));
        let mut txn =
            Transaction::new(store, UpdateOperation::new(key("1")).set("name", "A")).unwrap();
        txn.add_secondary_operation(
            ConditionCheckOperation::new(
                key("2"),
                Condition::new().with("_PK", ConditionOp::Exists(true)),
            )
            .on_error(error_handler_fn(|error: &Error, operation: &mut Operation| {
                assert!(error.to_string().contains("condition check on"));
                *operation.condition_mut() = Condition::new();
                Ok(Recovery::Retry)
            })),
        )
        .unwrap();
        txn.add_pre_commit_handler(counting_pre_commit(attempts.clone()));

        let item = txn.commit_with_return().await.unwrap();
        assert_eq!(item.get("name"), Some(&Value::from("A")));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_too_many_operations() {
        let (_, store) = setup();
        let mut txn = Transaction::new(store, UpdateOperation::new(key("0")))
            .unwrap()
            .with_config(EngineConfig::default().max_transaction_items(2));
        txn.add_secondary_operation(DeleteOperation::new(key("1")))
            .unwrap();
        txn.add_secondary_operation(DeleteOperation::new(key("2")))
            .unwrap();
        let err = txn.commit().await.unwrap_err();
        assert!(matches!(
            err,
            Error::Transaction(TxnError::TooManyOperations { max: 2, actual: 3 })
        ));
    }

    #[tokio::test]
    async fn test_pre_commit_operations_are_merged() {
        let (_, store) = setup();
        let mut txn = Transaction::new(
            store,
            UpdateOperation::new(key("1")).set("count", UpdateValue::Inc(1.0)),
        )
        .unwrap();
        txn.add_pre_commit_handler(pre_commit_fn(|| async {
            Ok::<Vec<Operation>, Error>(vec![
                UpdateOperation::new(key("1"))
                    .set("count", UpdateValue::Inc(2.0))
                    .into(),
            ])
        }));
        let item = txn.commit_with_return().await.unwrap();
        assert_eq!(item.get("count"), Some(&Value::Number(3.0)));
    }
}
