//! Storage contracts for instances, operation history, and timers.
//!
//! The engine depends on three small contracts rather than on a concrete
//! database:
//!
//! - [`InstanceStore`] — workflow instance rows under optimistic concurrency
//! - [`OperationStore`] — operation requests and the append-only response history
//! - [`TimerStore`] — durable timers with upsert and leasing
//!
//! [`MemoryStore`] implements all three in process and is what the test suite
//! runs against.

mod memory;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

pub use memory::MemoryStore;

use crate::error::Result;
use crate::instance::{InstanceMutation, WorkflowId, WorkflowInstance};
use crate::operation::{OperationRequest, OperationRequestId, OperationResponse};
use crate::timer::{Timer, TimerId};

/// Persistence for workflow instance rows.
#[async_trait]
pub trait InstanceStore: Send + Sync + 'static {
    /// Insert a new instance.
    ///
    /// Fails with [`Error::DuplicateWorkflowInstance`](crate::Error::DuplicateWorkflowInstance)
    /// if the id is taken.
    async fn create_instance(&self, instance: WorkflowInstance) -> Result<WorkflowInstance>;

    /// Fails with [`Error::WorkflowNotFound`](crate::Error::WorkflowNotFound) if absent.
    async fn get_instance(&self, id: &WorkflowId) -> Result<WorkflowInstance>;

    /// List all instances, ordered by id.
    async fn find_instances(&self) -> Result<Vec<WorkflowInstance>>;

    /// Find the instance of `workflow_type` created with `correlation_id`.
    async fn find_by_correlation_id(
        &self,
        workflow_type: &str,
        correlation_id: &str,
    ) -> Result<Option<WorkflowInstance>>;

    /// Apply `mutation` if the stored version equals `expected_version`.
    ///
    /// Returns the updated instance. Fails with
    /// [`Error::VersionConflict`](crate::Error::VersionConflict) on a version
    /// mismatch, leaving the stored row unchanged.
    async fn update_instance(
        &self,
        id: &WorkflowId,
        mutation: InstanceMutation,
        expected_version: u64,
    ) -> Result<WorkflowInstance>;
}

/// Persistence for operation requests and responses.
#[async_trait]
pub trait OperationStore: Send + Sync + 'static {
    /// Insert a request. Idempotent on id: returns `false` if it already exists.
    async fn create_operation_request(&self, request: OperationRequest) -> Result<bool>;

    /// Fails with [`Error::OperationRequestNotFound`](crate::Error::OperationRequestNotFound)
    /// if absent.
    async fn get_operation_request(&self, id: &OperationRequestId) -> Result<OperationRequest>;

    /// Increment `failed_attempts` if it currently equals `expected`.
    ///
    /// Returns `false` without changing anything on a mismatch.
    async fn increment_failed_attempts(
        &self,
        id: &OperationRequestId,
        expected: u32,
    ) -> Result<bool>;

    /// Append a response.
    ///
    /// Returns `false` without storing anything if `response` is non-transient
    /// and a non-transient response already exists for the same
    /// `(workflow, operation type, iteration)`. Transient responses are
    /// always stored.
    async fn create_operation_response(&self, response: OperationResponse) -> Result<bool>;

    /// Responses of one workflow in creation order.
    async fn get_operation_responses(
        &self,
        workflow_id: &WorkflowId,
        include_transient: bool,
    ) -> Result<Vec<OperationResponse>>;

    /// Mark every failed response of the workflow transient so the failures
    /// drop out of replay. Returns the number of responses converted.
    async fn convert_all_error_responses_to_transient(&self, workflow_id: &WorkflowId)
    -> Result<u64>;
}

/// Persistence for durable timers.
#[async_trait]
pub trait TimerStore: Send + Sync + 'static {
    /// Upsert by id.
    ///
    /// A new timer is stored at version 0; an existing one is replaced and its
    /// version incremented. Returns the stored timer.
    async fn create_or_update(&self, timer: Timer) -> Result<Timer>;

    async fn get_timer(&self, id: &TimerId) -> Result<Option<Timer>>;

    /// Delete `timer` if its version is still current.
    ///
    /// Returns `false` if the timer is gone or has been updated since it was
    /// read. That is an expected race, not an error.
    async fn delete(&self, timer: &Timer) -> Result<bool>;

    /// Atomically lease up to `limit` due timers.
    ///
    /// Each returned timer has its timeout pushed to now + `lease`, its
    /// version bumped, and its retry count incremented, so no other caller
    /// selects it until the lease expires.
    async fn get_expired_timers(&self, limit: usize, lease: Duration) -> Result<Vec<Timer>>;
}

/// The three stores an [`Engine`](crate::Engine) runs against.
#[derive(Clone)]
pub struct Stores {
    pub instances: Arc<dyn InstanceStore>,
    pub operations: Arc<dyn OperationStore>,
    pub timers: Arc<dyn TimerStore>,
}

impl Stores {
    pub fn new(
        instances: Arc<dyn InstanceStore>,
        operations: Arc<dyn OperationStore>,
        timers: Arc<dyn TimerStore>,
    ) -> Self {
        Self {
            instances,
            operations,
            timers,
        }
    }
}

impl From<MemoryStore> for Stores {
    fn from(store: MemoryStore) -> Self {
        Self {
            instances: Arc::new(store.clone()),
            operations: Arc::new(store.clone()),
            timers: Arc::new(store),
        }
    }
}
