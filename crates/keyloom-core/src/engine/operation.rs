//! The operation model: updates, deletes and condition checks on one item.

use std::fmt;
use std::sync::Arc;

use crate::error::{Result, UpdateError};
use crate::expression::{
    Condition, ConditionOp, UpdateValue, UpdateValues, compile_condition, compile_update,
};
use crate::store::{ConditionCheckRequest, DeleteRequest, TransactWriteItem, UpdateRequest};
use crate::types::{Item, Key};

use super::handlers::{ErrorHandler, SuccessHandler};

/// Upsert of one item: field updates guarded by an optional condition.
#[derive(Clone)]
pub struct UpdateOperation {
    pub key: Key,
    pub update_values: UpdateValues,
    pub condition: Condition,
    pub success_handlers: Vec<SuccessHandler>,
    pub error_handler: Option<Arc<dyn ErrorHandler>>,
}

impl UpdateOperation {
    pub fn new(key: Key) -> Self {
        Self {
            key,
            update_values: UpdateValues::new(),
            condition: Condition::new(),
            success_handlers: Vec::new(),
            error_handler: None,
        }
    }

    pub fn set(mut self, field: impl Into<String>, value: impl Into<UpdateValue>) -> Self {
        self.update_values.set(field, value);
        self
    }

    pub fn update_values(mut self, values: UpdateValues) -> Self {
        self.update_values = values;
        self
    }

    pub fn condition(mut self, field: impl Into<String>, op: impl Into<ConditionOp>) -> Self {
        self.condition.insert(field, op);
        self
    }

    pub fn conditions(mut self, condition: Condition) -> Self {
        self.condition = condition;
        self
    }

    pub fn on_success(mut self, handler: SuccessHandler) -> Self {
        self.success_handlers.push(handler);
        self
    }

    pub fn on_error(mut self, handler: Arc<dyn ErrorHandler>) -> Self {
        self.error_handler = Some(handler);
        self
    }

    /// Merge another update on the same key into this one.
    ///
    /// Field updates and conditions are unioned (see [`UpdateValues::merge`]),
    /// success handlers are deduplicated by identity, and the other error
    /// handler is adopted only when this operation has none. On conflict
    /// nothing is changed.
    pub fn merge(&mut self, other: &UpdateOperation) -> std::result::Result<(), UpdateError> {
        let mut update_values = self.update_values.clone();
        update_values.merge(&other.update_values)?;
        let mut condition = self.condition.clone();
        condition.merge(&other.condition)?;

        self.update_values = update_values;
        self.condition = condition;
        for handler in &other.success_handlers {
            let known = self
                .success_handlers
                .iter()
                .any(|h| std::ptr::addr_eq(Arc::as_ptr(h), Arc::as_ptr(handler)));
            if !known {
                self.success_handlers.push(handler.clone());
            }
        }
        if self.error_handler.is_none() {
            self.error_handler = other.error_handler.clone();
        }
        Ok(())
    }

    pub fn to_request(&self) -> Result<UpdateRequest> {
        Ok(UpdateRequest {
            key: self.key.clone(),
            update: compile_update(&self.update_values)?.into_expression(),
            condition: compile_condition(Some(&self.condition)),
        })
    }

    pub(crate) fn run_success_handlers(&self, item: &Item) -> Result<()> {
        for handler in &self.success_handlers {
            handler(item)?;
        }
        Ok(())
    }
}

/// Conditional delete of one item.
#[derive(Clone)]
pub struct DeleteOperation {
    pub key: Key,
    pub condition: Condition,
    pub error_handler: Option<Arc<dyn ErrorHandler>>,
}

impl DeleteOperation {
    pub fn new(key: Key) -> Self {
        Self {
            key,
            condition: Condition::new(),
            error_handler: None,
        }
    }

    pub fn condition(mut self, field: impl Into<String>, op: impl Into<ConditionOp>) -> Self {
        self.condition.insert(field, op);
        self
    }

    pub fn on_error(mut self, handler: Arc<dyn ErrorHandler>) -> Self {
        self.error_handler = Some(handler);
        self
    }

    pub fn to_request(&self) -> DeleteRequest {
        DeleteRequest {
            key: self.key.clone(),
            condition: compile_condition(Some(&self.condition)),
        }
    }
}

/// A condition another item must satisfy for the transaction to commit.
/// Never valid as a primary operation.
#[derive(Clone)]
pub struct ConditionCheckOperation {
    pub key: Key,
    pub condition: Condition,
    pub error_handler: Option<Arc<dyn ErrorHandler>>,
}

impl ConditionCheckOperation {
    pub fn new(key: Key, condition: Condition) -> Self {
        Self {
            key,
            condition,
            error_handler: None,
        }
    }

    pub fn on_error(mut self, handler: Arc<dyn ErrorHandler>) -> Self {
        self.error_handler = Some(handler);
        self
    }
}

/// One write (or check) inside a transaction.
#[derive(Clone)]
pub enum Operation {
    Update(UpdateOperation),
    Delete(DeleteOperation),
    ConditionCheck(ConditionCheckOperation),
}

impl Operation {
    pub fn key(&self) -> &Key {
        match self {
            Operation::Update(op) => &op.key,
            Operation::Delete(op) => &op.key,
            Operation::ConditionCheck(op) => &op.key,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Operation::Update(_) => "update",
            Operation::Delete(_) => "delete",
            Operation::ConditionCheck(_) => "condition check",
        }
    }

    pub fn condition(&self) -> &Condition {
        match self {
            Operation::Update(op) => &op.condition,
            Operation::Delete(op) => &op.condition,
            Operation::ConditionCheck(op) => &op.condition,
        }
    }

    pub fn condition_mut(&mut self) -> &mut Condition {
        match self {
            Operation::Update(op) => &mut op.condition,
            Operation::Delete(op) => &mut op.condition,
            Operation::ConditionCheck(op) => &mut op.condition,
        }
    }

    pub fn error_handler(&self) -> Option<&Arc<dyn ErrorHandler>> {
        match self {
            Operation::Update(op) => op.error_handler.as_ref(),
            Operation::Delete(op) => op.error_handler.as_ref(),
            Operation::ConditionCheck(op) => op.error_handler.as_ref(),
        }
    }

    pub fn as_update(&self) -> Option<&UpdateOperation> {
        match self {
            Operation::Update(op) => Some(op),
            _ => None,
        }
    }

    pub fn as_update_mut(&mut self) -> Option<&mut UpdateOperation> {
        match self {
            Operation::Update(op) => Some(op),
            _ => None,
        }
    }

    /// Compile into a member of an atomic transactional write.
    pub fn to_transact_item(&self) -> Result<TransactWriteItem> {
        Ok(match self {
            Operation::Update(op) => TransactWriteItem::Update(op.to_request()?),
            Operation::Delete(op) => TransactWriteItem::Delete(op.to_request()),
            Operation::ConditionCheck(op) => {
                TransactWriteItem::ConditionCheck(ConditionCheckRequest {
                    key: op.key.clone(),
                    condition: compile_condition(Some(&op.condition)),
                })
            }
        })
    }
}

impl From<UpdateOperation> for Operation {
    fn from(op: UpdateOperation) -> Self {
        Operation::Update(op)
    }
}

impl From<DeleteOperation> for Operation {
    fn from(op: DeleteOperation) -> Self {
        Operation::Delete(op)
    }
}

impl From<ConditionCheckOperation> for Operation {
    fn from(op: ConditionCheckOperation) -> Self {
        Operation::ConditionCheck(op)
    }
}

impl fmt::Debug for UpdateOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdateOperation")
            .field("key", &self.key)
            .field("update_values", &self.update_values)
            .field("condition", &self.condition)
            .field("success_handlers", &self.success_handlers.len())
            .field("error_handler", &self.error_handler.is_some())
            .finish()
    }
}

impl fmt::Debug for DeleteOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeleteOperation")
            .field("key", &self.key)
            .field("condition", &self.condition)
            .field("error_handler", &self.error_handler.is_some())
            .finish()
    }
}

impl fmt::Debug for ConditionCheckOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConditionCheckOperation")
            .field("key", &self.key)
            .field("condition", &self.condition)
            .field("error_handler", &self.error_handler.is_some())
            .finish()
    }
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Update(op) => op.fmt(f),
            Operation::Delete(op) => op.fmt(f),
            Operation::ConditionCheck(op) => op.fmt(f),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::handlers::{Recovery, error_handler_fn, success_handler_fn};
    use crate::error::Error;
    use crate::types::Value;

    fn key() -> Key {
        Key::new("users#1#", "users#")
    }

    #[test]
    fn test_merge_unions_fields() {
        let mut a = UpdateOperation::new(key()).set("name", "A");
        let b = UpdateOperation::new(key()).set("email", "a@x");
        a.merge(&b).unwrap();
        assert_eq!(a.update_values.len(), 2);
    }

    #[test]
    fn test_merge_sums_increments() {
        let mut a = UpdateOperation::new(key()).set("count", UpdateValue::Inc(1.0));
        let b = UpdateOperation::new(key()).set("count", UpdateValue::Inc(2.0));
        a.merge(&b).unwrap();
        assert_eq!(a.update_values.get("count"), Some(&UpdateValue::Inc(3.0)));
    }

    #[test]
    fn test_merge_conflict_leaves_operation_untouched() {
        let mut a = UpdateOperation::new(key())
            .set("name", "A")
            .condition("v", 1);
        let b = UpdateOperation::new(key())
            .set("email", "x")
            .condition("v", 2);
        let err = a.merge(&b).unwrap_err();
        assert!(matches!(err, UpdateError::ConflictingUpdate(ref f) if f == "v"));
        assert_eq!(a.update_values.len(), 1);
        assert_eq!(a.condition.len(), 1);
    }

    #[test]
    fn test_merge_deduplicates_success_handlers() {
        let shared = success_handler_fn(|_| Ok(()));
        let other = success_handler_fn(|_| Ok(()));
        let mut a = UpdateOperation::new(key()).on_success(shared.clone());
        let b = UpdateOperation::new(key())
            .on_success(shared)
            .on_success(other);
        a.merge(&b).unwrap();
        assert_eq!(a.success_handlers.len(), 2);
    }

    #[test]
    fn test_merge_keeps_existing_error_handler() {
        let first = error_handler_fn(|_: &Error, _: &mut Operation| Ok(Recovery::Retry));
        let second = error_handler_fn(|_: &Error, _: &mut Operation| Ok(Recovery::Ignore));

        let mut without = UpdateOperation::new(key());
        without
            .merge(&UpdateOperation::new(key()).on_error(second.clone()))
            .unwrap();
        assert!(without.error_handler.is_some());

        let mut with = UpdateOperation::new(key()).on_error(first.clone());
        with.merge(&UpdateOperation::new(key()).on_error(second))
            .unwrap();
        let kept = with.error_handler.unwrap();
        assert!(std::ptr::addr_eq(Arc::as_ptr(&kept), Arc::as_ptr(&first)));
    }

    #[test]
    fn test_to_request_compiles_update_and_condition() {
        let op = UpdateOperation::new(key())
            .set("name", "B")
            .condition("_PK", ConditionOp::Exists(true));
        let request = op.to_request().unwrap();
        assert_eq!(request.key, key());
        assert_eq!(request.update.expression.as_deref(), Some("SET #u0_0 = :u0"));
        assert_eq!(
            request.condition.expression.as_deref(),
            Some("(attribute_exists(#exp0))")
        );
        assert_eq!(request.update.values[":u0"], Value::from("B"));
    }

    #[test]
    fn test_invalid_path_fails_to_compile() {
        let op = UpdateOperation::new(key()).set("[0].x", 1);
        assert!(matches!(
            op.to_request(),
            Err(Error::Update(UpdateError::InvalidPath(_)))
        ));
    }

    #[test]
    fn test_operation_accessors() {
        let mut op = Operation::from(DeleteOperation::new(key()));
        assert_eq!(op.kind(), "delete");
        assert!(op.as_update().is_none());
        op.condition_mut().insert("_wc", 3);
        assert_eq!(op.condition().get("_wc"), Some(&ConditionOp::Eq(Value::from(3))));
        assert!(matches!(
            op.to_transact_item().unwrap(),
            TransactWriteItem::Delete(_)
        ));
    }
}
