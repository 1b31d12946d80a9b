//! Single-table in-memory store.
//!
//! Implements the full store protocol over a `BTreeMap` keyed by `(_PK, _SK)`
//! behind a `parking_lot::Mutex`. Every read is strongly consistent.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use xxhash_rust::xxh64::xxh64;

use crate::error::StoreError;
use crate::types::{Item, Key, PARTITION_KEY_ATTR, SORT_KEY_ATTR, Value};

use super::apply::{apply_update, validate_no_key_updates};
use super::eval::holds;
use super::parser::{CondExpr, parse_condition, parse_update};
use super::{
    BatchGetOutput, CancellationReason, DeleteRequest, MAX_BATCH_GET_KEYS, MAX_TRANSACT_ITEMS,
    Page, QueryRequest, ScanRequest, SharedStore, Store, TransactWriteItem, UpdateRequest,
};

/// Default number of keys served per batch-get call.
pub const DEFAULT_BATCH_GET_PAGE_SIZE: usize = MAX_BATCH_GET_KEYS;

/// In-memory implementation of [`Store`].
pub struct MemoryStore {
    table: Mutex<BTreeMap<Key, Item>>,
    batch_get_page_size: usize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            table: Mutex::new(BTreeMap::new()),
            batch_get_page_size: DEFAULT_BATCH_GET_PAGE_SIZE,
        }
    }

    /// Serve at most `size` keys per batch-get call; the rest come back as
    /// unprocessed keys.
    pub fn with_batch_get_page_size(mut self, size: usize) -> Self {
        self.batch_get_page_size = size.max(1);
        self
    }

    /// Wrap in an `Arc` for sharing between collections.
    pub fn into_shared(self) -> SharedStore {
        Arc::new(self)
    }

    pub fn len(&self) -> usize {
        self.table.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.lock().is_empty()
    }

    /// Snapshot of every stored item in key order.
    pub fn items(&self) -> Vec<Item> {
        self.table.lock().values().cloned().collect()
    }

    /// Store an item as-is, bypassing conditions. The item must carry string
    /// `_PK` and `_SK` attributes.
    pub fn put_raw(&self, item: Item) -> Result<(), StoreError> {
        let key = Key::from_item(&item)
            .ok_or_else(|| StoreError::Validation("item is missing its key attributes".into()))?;
        self.table.lock().insert(key, item);
        Ok(())
    }
}

/// Condition check against the current state; an absent item is empty.
fn condition_holds(
    table: &BTreeMap<Key, Item>,
    key: &Key,
    condition: Option<&CondExpr>,
) -> bool {
    let empty = Item::new();
    holds(condition, table.get(key).unwrap_or(&empty))
}

/// Apply an update to the current state of `key`, creating the item if needed.
fn updated_item(
    table: &BTreeMap<Key, Item>,
    request: &UpdateRequest,
) -> Result<Item, StoreError> {
    let update = parse_update(&request.update)?;
    validate_no_key_updates(&update)?;
    let mut item = table
        .get(&request.key)
        .cloned()
        .unwrap_or_else(|| request.key.to_item());
    apply_update(&mut item, &update)?;
    Ok(item)
}

/// Sort position of an item within a query: index key (if any), then
/// primary key.
type Position = (Option<(String, String)>, String, String);

fn attr_str<'a>(item: &'a Item, name: &str) -> Option<&'a str> {
    item.get(name).and_then(Value::as_str)
}

fn position(item: &Item, index: Option<&(String, String)>) -> Option<Position> {
    let index_part = match index {
        Some((pk_attr, sk_attr)) => Some((
            attr_str(item, pk_attr)?.to_string(),
            attr_str(item, sk_attr).unwrap_or_default().to_string(),
        )),
        None => None,
    };
    Some((
        index_part,
        attr_str(item, PARTITION_KEY_ATTR)?.to_string(),
        attr_str(item, SORT_KEY_ATTR)?.to_string(),
    ))
}

/// The continuation cursor for an item: its primary key plus index key.
fn cursor_for(item: &Item, index: Option<&(String, String)>) -> Item {
    let mut cursor = Item::new();
    let mut names = vec![PARTITION_KEY_ATTR, SORT_KEY_ATTR];
    if let Some((pk_attr, sk_attr)) = index {
        names.push(pk_attr.as_str());
        names.push(sk_attr.as_str());
    }
    for name in names {
        if let Some(value) = item.get(name) {
            cursor.insert(name.to_string(), value.clone());
        }
    }
    cursor
}

/// Walk candidate items in order, applying cursor, limit and filter.
fn paginate(
    mut candidates: Vec<(Position, Item)>,
    forward: bool,
    start: Option<&Item>,
    limit: Option<usize>,
    filter: Option<&CondExpr>,
    index: Option<&(String, String)>,
) -> Result<Page, StoreError> {
    candidates.sort_by(|a, b| a.0.cmp(&b.0));
    if !forward {
        candidates.reverse();
    }

    let start = match start {
        Some(cursor) => Some(position(cursor, index).ok_or_else(|| {
            StoreError::Validation("exclusive start key is missing key attributes".into())
        })?),
        None => None,
    };
    let after_start = |p: &Position| match &start {
        None => true,
        Some(s) => {
            let ord = p.cmp(s);
            if forward {
                ord == Ordering::Greater
            } else {
                ord == Ordering::Less
            }
        }
    };

    let mut remaining = candidates.into_iter().filter(|(p, _)| after_start(p)).peekable();
    let mut page = Page::default();
    let mut evaluated = 0usize;
    while let Some((_, item)) = remaining.next() {
        evaluated += 1;
        let last = cursor_for(&item, index);
        if holds(filter, &item) {
            page.items.push(item);
        }
        if limit.is_some_and(|l| evaluated >= l) {
            if remaining.peek().is_some() {
                page.last_evaluated_key = Some(last);
            }
            break;
        }
    }
    Ok(page)
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_item(&self, key: &Key, _consistent: bool) -> Result<Option<Item>, StoreError> {
        Ok(self.table.lock().get(key).cloned())
    }

    async fn update_item(&self, request: UpdateRequest) -> Result<Item, StoreError> {
        let condition = parse_condition(&request.condition)?;
        let mut table = self.table.lock();
        if !condition_holds(&table, &request.key, condition.as_ref()) {
            return Err(StoreError::ConditionalCheckFailed);
        }
        let item = updated_item(&table, &request)?;
        table.insert(request.key, item.clone());
        Ok(item)
    }

    async fn delete_item(&self, request: DeleteRequest) -> Result<Option<Item>, StoreError> {
        let condition = parse_condition(&request.condition)?;
        let mut table = self.table.lock();
        if !condition_holds(&table, &request.key, condition.as_ref()) {
            return Err(StoreError::ConditionalCheckFailed);
        }
        Ok(table.remove(&request.key))
    }

    async fn transact_write(&self, items: Vec<TransactWriteItem>) -> Result<(), StoreError> {
        if items.is_empty() {
            return Err(StoreError::Validation(
                "transaction must contain at least one item".into(),
            ));
        }
        if items.len() > MAX_TRANSACT_ITEMS {
            return Err(StoreError::Validation(format!(
                "transaction has {} items, maximum is {MAX_TRANSACT_ITEMS}",
                items.len()
            )));
        }
        let mut seen = BTreeSet::new();
        for item in &items {
            if !seen.insert(item.key()) {
                return Err(StoreError::Validation(format!(
                    "transaction contains more than one operation on item {}",
                    item.key()
                )));
            }
        }
        let conditions = items
            .iter()
            .map(|item| parse_condition(item.condition()))
            .collect::<Result<Vec<_>, _>>()?;

        let mut table = self.table.lock();

        let reasons: Vec<CancellationReason> = items
            .iter()
            .zip(&conditions)
            .map(|(item, condition)| {
                if condition_holds(&table, item.key(), condition.as_ref()) {
                    CancellationReason::none()
                } else {
                    CancellationReason::conditional_check_failed()
                }
            })
            .collect();
        if reasons.iter().any(|r| !r.is_ok()) {
            return Err(StoreError::TransactionCanceled { reasons });
        }

        // Conditions were checked against the pre-transaction state and keys
        // are distinct, so writes are independent of each other.
        let mut staged = Vec::with_capacity(items.len());
        for item in &items {
            match item {
                TransactWriteItem::Update(request) => {
                    staged.push((request.key.clone(), Some(updated_item(&table, request)?)));
                }
                TransactWriteItem::Delete(request) => staged.push((request.key.clone(), None)),
                TransactWriteItem::ConditionCheck(_) => {}
            }
        }
        for (key, item) in staged {
            match item {
                Some(item) => {
                    table.insert(key, item);
                }
                None => {
                    table.remove(&key);
                }
            }
        }
        Ok(())
    }

    async fn query(&self, request: QueryRequest) -> Result<Page, StoreError> {
        let key_condition = parse_condition(&request.key_condition)?.ok_or_else(|| {
            StoreError::Validation("query requires a key condition expression".into())
        })?;
        let filter = parse_condition(&request.filter)?;
        let index = request
            .index_name
            .as_ref()
            .map(|id| (format!("_{id}PK"), format!("_{id}SK")));

        let candidates: Vec<(Position, Item)> = {
            let table = self.table.lock();
            table
                .values()
                .filter(|item| holds(Some(&key_condition), item))
                .filter_map(|item| Some((position(item, index.as_ref())?, item.clone())))
                .collect()
        };
        paginate(
            candidates,
            request.scan_forward,
            request.exclusive_start_key.as_ref(),
            request.limit,
            filter.as_ref(),
            index.as_ref(),
        )
    }

    async fn scan(&self, request: ScanRequest) -> Result<Page, StoreError> {
        let filter = parse_condition(&request.filter)?;
        if let Some(segment) = request.segment
            && (segment.total_segments == 0 || segment.segment >= segment.total_segments)
        {
            return Err(StoreError::Validation(format!(
                "invalid scan segment {} of {}",
                segment.segment, segment.total_segments
            )));
        }

        let candidates: Vec<(Position, Item)> = {
            let table = self.table.lock();
            table
                .iter()
                .filter(|(key, _)| match request.segment {
                    Some(s) => {
                        xxh64(key.pk.as_bytes(), 0) % u64::from(s.total_segments)
                            == u64::from(s.segment)
                    }
                    None => true,
                })
                .filter_map(|(_, item)| Some((position(item, None)?, item.clone())))
                .collect()
        };
        paginate(
            candidates,
            true,
            request.exclusive_start_key.as_ref(),
            request.limit,
            filter.as_ref(),
            None,
        )
    }

    async fn batch_get(
        &self,
        keys: Vec<Key>,
        _consistent: bool,
    ) -> Result<BatchGetOutput, StoreError> {
        if keys.len() > MAX_BATCH_GET_KEYS {
            return Err(StoreError::Validation(format!(
                "batch get has {} keys, maximum is {MAX_BATCH_GET_KEYS}",
                keys.len()
            )));
        }
        let mut keys = keys;
        let unprocessed_keys = if keys.len() > self.batch_get_page_size {
            keys.split_off(self.batch_get_page_size)
        } else {
            Vec::new()
        };
        let table = self.table.lock();
        let items = keys.iter().filter_map(|k| table.get(k).cloned()).collect();
        Ok(BatchGetOutput {
            items,
            unprocessed_keys,
        })
    }
}
