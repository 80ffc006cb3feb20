//! Confirmation prompt seam.

use std::future::Future;
use std::pin::Pin;

use async_trait::async_trait;

/// Asks an operator to confirm a call.
///
/// Implementations may block for as long as a human takes to answer; the gate
/// awaits the result before the call is dispatched.
#[async_trait]
pub trait ApprovalPrompt: Send + Sync {
    /// Returns `true` when the operator approves the described call.
    async fn confirm(&self, description: &str) -> bool;
}

/// Prompt that always returns the same answer.
#[derive(Debug, Clone, Copy)]
pub struct StaticPrompt(pub bool);

#[async_trait]
impl ApprovalPrompt for StaticPrompt {
    async fn confirm(&self, _description: &str) -> bool {
        self.0
    }
}

/// Boxed future returned by [`FnPrompt`] callbacks.
pub type PromptFuture = Pin<Box<dyn Future<Output = bool> + Send>>;

/// Prompt backed by an async closure receiving the owned description.
pub struct FnPrompt<F> {
    callback: F,
}

impl<F> FnPrompt<F>
where
    F: Fn(String) -> PromptFuture + Send + Sync,
{
    /// Wraps `callback`.
    #[must_use]
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<F> std::fmt::Debug for FnPrompt<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnPrompt").finish_non_exhaustive()
    }
}

#[async_trait]
impl<F> ApprovalPrompt for FnPrompt<F>
where
    F: Fn(String) -> PromptFuture + Send + Sync,
{
    async fn confirm(&self, description: &str) -> bool {
        (self.callback)(description.to_owned()).await
    }
}
