//! Operation execution context with correlation and idempotency metadata.

use time::OffsetDateTime;

use super::{OperationRequest, OperationRequestId, OperationType};
use crate::instance::WorkflowId;

/// Context provided to operations during execution.
///
/// Contains metadata for correlation (which workflow asked for the call) and
/// idempotency (safe retries against external services).
#[derive(Debug, Clone)]
pub struct OperationContext {
    /// The request being executed.
    pub request_id: OperationRequestId,

    /// The workflow that requested the call.
    pub workflow_id: WorkflowId,

    pub operation_type: OperationType,

    /// Ordinal occurrence of this method within the workflow's history.
    pub iteration: u32,

    /// Current attempt number (1-based).
    ///
    /// First execution is attempt 1, first retry is attempt 2, etc.
    pub attempt: u32,

    /// When the request was first created.
    pub created_at: OffsetDateTime,
}

impl OperationContext {
    /// Build the context for the next attempt of `request`.
    pub fn for_request(request: &OperationRequest) -> Self {
        Self {
            request_id: request.id,
            workflow_id: request.workflow_instance_id.clone(),
            operation_type: request.operation_type.clone(),
            iteration: request.iteration,
            attempt: request.failed_attempts.saturating_add(1),
            created_at: request.created_at,
        }
    }

    /// Get the idempotency key for external service calls.
    ///
    /// Format: `{workflow_id}:{request_id}`
    ///
    /// This key is:
    /// - **Stable across retries** — same key for all attempts of the same request
    /// - **Unique per call** — different calls have different keys
    pub fn idempotency_key(&self) -> String {
        format!("{}:{}", self.workflow_id, self.request_id)
    }

    /// Returns `true` if this is a retry (attempt > 1).
    pub fn is_retry(&self) -> bool {
        self.attempt > 1
    }
}
