//! Terminal-transition callbacks.

use async_trait::async_trait;

use crate::engine::Engine;
use crate::error::Result;
use crate::instance::WorkflowInstance;

/// Name of the built-in callback that reports a child workflow's outcome to
/// its parent. Registered automatically.
pub const CHILD_COMPLETION_CALLBACK: &str = "replayflow.child-completion";

/// Notified when a workflow instance reaches `COMPLETED` or `ERROR`.
///
/// Instances name their handler through
/// [`NewWorkflowInstance::with_callback`](crate::NewWorkflowInstance::with_callback).
/// The handler runs from a callback timer, so it has at-least-once delivery
/// and an `Err` return is retried after the timer lease expires.
///
/// # Example
///
/// ```ignore
/// struct NotifyOwner { mailer: Mailer }
///
/// #[async_trait]
/// impl CallbackHandler for NotifyOwner {
///     async fn handle_update(&self, instance: &WorkflowInstance, _engine: &Engine) -> Result<()> {
///         self.mailer.send(format!("{} is {}", instance.id, instance.status)).await;
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait CallbackHandler: Send + Sync + 'static {
    async fn handle_update(&self, instance: &WorkflowInstance, engine: &Engine) -> Result<()>;
}

/// Bridges a finished child workflow back into its parent's history.
pub(crate) struct ChildCompletionCallback;

#[async_trait]
impl CallbackHandler for ChildCompletionCallback {
    async fn handle_update(&self, instance: &WorkflowInstance, engine: &Engine) -> Result<()> {
        engine.handle_child_workflow_completed(&instance.id).await
    }
}
