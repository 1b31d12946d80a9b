//! Integration tests for composing and committing multi-entity transactions.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde_json::json;

use keyloom_core::collection::{Collection, GetOptions, InsertOptions, UpdateOptions};
use keyloom_core::engine::{
    ConditionCheckOperation, Operation, Recovery, UpdateOperation, error_handler_fn,
    success_handler_fn,
};
use keyloom_core::error::{Error, TxnError};
use keyloom_core::expression::{Condition, ConditionOp, UpdateValue, UpdateValues};
use keyloom_core::store::{MemoryStore, SharedStore, Store};
use keyloom_core::types::{Value, item_from_json};

fn setup() -> (Arc<MemoryStore>, Collection, Collection) {
    let memory = Arc::new(MemoryStore::new());
    let store: SharedStore = memory.clone();
    let accounts = Collection::builder("accounts", store.clone())
        .partition_key("id")
        .build();
    let ledger = Collection::builder("ledger", store)
        .partition_key("account")
        .sort_key("seq")
        .build();
    (memory, accounts, ledger)
}

#[tokio::test]
async fn test_same_key_increments_merge() {
    let (_, accounts, _) = setup();
    let key = item_from_json(json!({"id": "a"}));
    accounts
        .insert(&item_from_json(json!({"id": "a", "count": 0})), InsertOptions::default())
        .await
        .unwrap();

    let mut transaction = accounts
        .update_transaction(
            &key,
            UpdateValues::new().with("count", UpdateValue::Inc(1.0)),
            UpdateOptions::default(),
        )
        .await
        .unwrap();
    let key_of_a = accounts.key_for(&key).unwrap();
    transaction
        .add_secondary_operation(
            UpdateOperation::new(key_of_a).set("count", UpdateValue::Inc(2.0)),
        )
        .unwrap();
    assert!(transaction.secondary_operations().is_empty());
    assert_eq!(
        transaction
            .primary()
            .as_update()
            .unwrap()
            .update_values
            .get("count"),
        Some(&UpdateValue::Inc(3.0))
    );

    let item = transaction.commit_with_return().await.unwrap();
    assert_eq!(item["count"], Value::from(3));
}

#[tokio::test]
async fn test_composed_transaction_commits_atomically() {
    let (memory, accounts, ledger) = setup();
    accounts
        .insert(&item_from_json(json!({"id": "a", "balance": 10})), InsertOptions::default())
        .await
        .unwrap();

    let mut transfer = accounts
        .update_transaction(
            &item_from_json(json!({"id": "a"})),
            UpdateValues::new().with("balance", UpdateValue::Inc(-4.0)),
            UpdateOptions::default(),
        )
        .await
        .unwrap();
    let entry = ledger
        .insert_transaction(
            &item_from_json(json!({"account": "a", "seq": 1, "amount": -4})),
            InsertOptions::default(),
        )
        .await
        .unwrap();
    transfer.add_secondary_transaction(entry).unwrap();

    let account = transfer.commit_with_return().await.unwrap();
    assert_eq!(account["balance"], Value::from(6));
    assert_eq!(memory.len(), 2);

    let written = ledger
        .get(&item_from_json(json!({"account": "a", "seq": 1})), GetOptions::default())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(written["amount"], Value::from(-4));
}

#[tokio::test]
async fn test_failed_condition_check_has_no_side_effects() {
    let (memory, accounts, _) = setup();
    accounts
        .insert(&item_from_json(json!({"id": "a", "balance": 10})), InsertOptions::default())
        .await
        .unwrap();

    let mut transaction = accounts
        .update_transaction(
            &item_from_json(json!({"id": "a"})),
            UpdateValues::new().with("balance", 0),
            UpdateOptions::default(),
        )
        .await
        .unwrap();
    let missing = accounts.key_for(&item_from_json(json!({"id": "b"}))).unwrap();
    transaction
        .add_secondary_operation(ConditionCheckOperation::new(
            missing,
            Condition::new().with("_PK", ConditionOp::Exists(true)),
        ))
        .unwrap();

    let err = transaction.commit().await.unwrap_err();
    assert!(matches!(
        err,
        Error::Transaction(TxnError::TransactionFailed { .. })
    ));

    let account = accounts
        .get(&item_from_json(json!({"id": "a"})), GetOptions::default())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(account["balance"], Value::from(10));
    assert_eq!(memory.len(), 1);
}

#[tokio::test]
async fn test_retry_bound_is_exact() {
    let (memory, accounts, _) = setup();
    let attempts = Arc::new(AtomicUsize::new(0));
    let counted = attempts.clone();
    let key = accounts.key_for(&item_from_json(json!({"id": "a"}))).unwrap();

    let operation = UpdateOperation::new(key)
        .set("x", 1)
        .condition("_PK", ConditionOp::Exists(true))
        .on_error(error_handler_fn(move |_: &Error, _: &mut Operation| {
            counted.fetch_add(1, Ordering::SeqCst);
            Ok(Recovery::Retry)
        }));
    let err = accounts
        .transaction(operation)
        .unwrap()
        .commit()
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        Error::Transaction(TxnError::MaxRetriesExceeded(5))
    ));
    // One failed attempt per handler call: the first plus five retries.
    assert_eq!(attempts.load(Ordering::SeqCst), 6);
    assert!(memory.is_empty());
}

#[tokio::test]
async fn test_success_handlers_see_committed_items() {
    let (memory, accounts, ledger) = setup();
    let seen = Arc::new(AtomicUsize::new(0));
    let store: SharedStore = memory.clone();

    let mut transaction = accounts
        .insert_transaction(&item_from_json(json!({"id": "a"})), InsertOptions::default())
        .await
        .unwrap();
    let entry_key = ledger
        .key_for(&item_from_json(json!({"account": "a", "seq": 1})))
        .unwrap();
    let counter = seen.clone();
    transaction
        .add_secondary_operation(
            UpdateOperation::new(entry_key.clone())
                .set("note", "opened")
                .on_success(success_handler_fn(move |item| {
                    assert_eq!(item.get("note"), Some(&Value::from("opened")));
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })),
        )
        .unwrap();

    let account = transaction.commit_with_return().await.unwrap();
    assert_eq!(account["_wc"], Value::from(1));
    assert_eq!(seen.load(Ordering::SeqCst), 1);
    assert!(store.get_item(&entry_key, true).await.unwrap().is_some());
}
