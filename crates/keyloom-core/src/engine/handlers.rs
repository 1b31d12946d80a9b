//! Callback types attached to operations and transactions.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::types::Item;

use super::operation::Operation;

/// Called with the persisted item after a successful update.
pub type SuccessHandler = Arc<dyn Fn(&Item) -> Result<()> + Send + Sync>;

/// Applied to the item a commit returns, after all success handlers ran.
pub type ResultTransformer = Arc<dyn Fn(Item) -> Result<Item> + Send + Sync>;

/// What an error handler wants the engine to do after a conditional failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// Re-run the commit (pre-commit handlers included) from the restored
    /// operation snapshot.
    Retry,
    /// Anything other than a retry or an error is a protocol violation and
    /// fails the commit with `InvalidErrorHandlerResponse`.
    Ignore,
}

/// Decides how to recover when an operation's condition fails.
///
/// `operation` is the failed operation as it will be submitted on retry;
/// changes made to it (for example a refreshed optimistic-lock condition)
/// carry over into the next attempt.
#[async_trait]
pub trait ErrorHandler: Send + Sync {
    async fn handle(&self, error: &Error, operation: &mut Operation) -> Result<Recovery>;
}

/// Runs before every commit attempt, retries included. Returned operations
/// are merged into the transaction.
#[async_trait]
pub trait PreCommitHandler: Send + Sync {
    async fn before_commit(&self) -> Result<Vec<Operation>>;
}

/// Adapts a synchronous closure into an [`ErrorHandler`].
pub struct FnErrorHandler<F>(pub F);

#[async_trait]
impl<F> ErrorHandler for FnErrorHandler<F>
where
    F: Fn(&Error, &mut Operation) -> Result<Recovery> + Send + Sync,
{
    async fn handle(&self, error: &Error, operation: &mut Operation) -> Result<Recovery> {
        (self.0)(error, operation)
    }
}

/// Adapts a closure returning a future into a [`PreCommitHandler`].
pub struct FnPreCommit<F>(pub F);

#[async_trait]
impl<F, Fut> PreCommitHandler for FnPreCommit<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<Vec<Operation>>> + Send,
{
    async fn before_commit(&self) -> Result<Vec<Operation>> {
        (self.0)().await
    }
}

/// Wrap a closure as a shareable error handler.
pub fn error_handler_fn<F>(f: F) -> Arc<dyn ErrorHandler>
where
    F: Fn(&Error, &mut Operation) -> Result<Recovery> + Send + Sync + 'static,
{
    Arc::new(FnErrorHandler(f))
}

/// Wrap a closure as a shareable success handler.
pub fn success_handler_fn<F>(f: F) -> SuccessHandler
where
    F: Fn(&Item) -> Result<()> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Wrap an async closure as a shareable pre-commit handler.
pub fn pre_commit_fn<F, Fut>(f: F) -> Arc<dyn PreCommitHandler>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Vec<Operation>>> + Send + 'static,
{
    Arc::new(FnPreCommit(f))
}
