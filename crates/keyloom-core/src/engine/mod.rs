//! The write transaction engine.
//!
//! A [`Transaction`] holds a primary [`Operation`] and any number of
//! secondary operations. Updates on the same key are merged as they are
//! added. `commit()` runs pre-commit handlers, writes the primary directly
//! (or everything atomically when there are secondaries), and on a
//! conditional failure consults the failing operation's [`ErrorHandler`],
//! retrying a bounded number of times.

pub mod handlers;
pub mod operation;
pub mod transaction;

pub use handlers::{
    ErrorHandler, PreCommitHandler, Recovery, ResultTransformer, SuccessHandler,
    error_handler_fn, pre_commit_fn, success_handler_fn,
};
pub use operation::{ConditionCheckOperation, DeleteOperation, Operation, UpdateOperation};
pub use transaction::Transaction;
