//! Operation requests, responses, and execution.
//!
//! This module provides the durable records that make up a workflow's
//! history and the machinery that produces them:
//!
//! - [`OperationRequest`] — a durable "please execute this call" record
//! - [`OperationResponse`] — an immutable record of one completed attempt
//! - [`Operation`] — trait implemented by external side-effecting services
//! - [`OperationExecutor`] — invokes one request and classifies the outcome
//! - [`RetryStrategy`] — delay policy for retriable failures

mod context;
mod executor;
mod handler;
mod retry;

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

pub use context::OperationContext;
pub use executor::{ExecutionOutcome, ExecutionStatus, OperationExecutor};
pub use handler::{FaultKind, Method, Operation, OperationFault};
pub use retry::RetryStrategy;

use crate::instance::WorkflowId;

/// Namespace for deterministic request ids (UUID v5).
const REQUEST_ID_NAMESPACE: Uuid = Uuid::from_u128(0x6f1c_2a0e_9b7d_4c35_8e21_d4a9_03f5_b7c1);

/// Namespace for idempotency tokens derived from request ids.
const TOKEN_NAMESPACE: Uuid = Uuid::from_u128(0x0b8e_47d2_c6a1_4f90_a3e5_71c2_9d04_e86b);

/// What an operation request targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationKind {
    /// A method on a registered [`Operation`].
    Operation,
    /// A child workflow; `target` is the child's workflow type.
    Workflow,
    /// A synthetic wait-timeout marker. Never calls user code.
    Timeout,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperationKind::Operation => "OPERATION",
            OperationKind::Workflow => "WORKFLOW",
            OperationKind::Timeout => "TIMEOUT",
        };
        f.write_str(name)
    }
}

/// Target + method + kind of an operation call.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationType {
    pub target: String,
    pub method: String,
    pub kind: OperationKind,
}

impl OperationType {
    pub fn new(target: impl Into<String>, method: impl Into<String>, kind: OperationKind) -> Self {
        Self {
            target: target.into(),
            method: method.into(),
            kind,
        }
    }

    /// A method call on a registered operation.
    pub fn operation(target: impl Into<String>, method: impl Into<String>) -> Self {
        Self::new(target, method, OperationKind::Operation)
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.target, self.method)
    }
}

/// Deterministic operation request id.
///
/// Derived from (workflow id, target, method, iteration, failed attempts), so
/// redundant decision passes that request the same call produce the same id
/// and the store deduplicates them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationRequestId(Uuid);

impl OperationRequestId {
    /// Derive the id for a call.
    pub fn derive(
        workflow_id: &WorkflowId,
        operation_type: &OperationType,
        iteration: u32,
        failed_attempts: u32,
    ) -> Self {
        let name = format!(
            "{}\u{1f}{}\u{1f}{}\u{1f}{}\u{1f}{}",
            workflow_id, operation_type.target, operation_type.method, iteration, failed_attempts
        );
        Self(Uuid::new_v5(&REQUEST_ID_NAMESPACE, name.as_bytes()))
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Idempotency token for the argument at `index`.
    ///
    /// Stable for a given request, so every redelivery of the same request
    /// presents the same token to the operation.
    pub fn idempotency_token(&self, index: usize) -> String {
        let name = format!("{}:{}", self.0, index);
        Uuid::new_v5(&TOKEN_NAMESPACE, name.as_bytes()).to_string()
    }

    /// Id of the child workflow instance spawned by this request.
    pub fn child_workflow_id(&self) -> WorkflowId {
        WorkflowId::new(format!("child-{}", self.0))
    }
}

impl fmt::Display for OperationRequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl std::str::FromStr for OperationRequestId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// A durable request to execute one operation call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationRequest {
    pub id: OperationRequestId,
    pub workflow_instance_id: WorkflowId,
    pub operation_type: OperationType,
    /// Ordinal occurrence of this method within the workflow's history.
    pub iteration: u32,
    pub arguments: Vec<Value>,
    pub created_at: OffsetDateTime,
    pub retry_strategy: RetryStrategy,
    /// Upper bound on a single invocation.
    pub timeout: Option<Duration>,
    pub failed_attempts: u32,
}

/// A recorded operation failure.
///
/// `kind` is the classification name (see the associated constants, or a
/// name chosen by the operation); `message` is human-readable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationError {
    pub kind: String,
    pub message: String,
}

impl OperationError {
    /// Marker recorded for a synthetic wait-timeout operation.
    pub const WAIT_TIMEOUT: &'static str = "WaitTimeout";
    /// The target operation or method is not registered.
    pub const UNKNOWN_OPERATION: &'static str = "UnknownOperation";
    /// Arguments did not match the declared signature.
    pub const INVALID_ARGUMENT: &'static str = "InvalidArgument";
    /// A required value was null.
    pub const NULL_VALUE: &'static str = "NullValue";
    /// The invocation exceeded the request timeout.
    pub const TIMED_OUT: &'static str = "TimedOut";
    /// A child workflow ended in `ERROR`.
    pub const CHILD_WORKFLOW_FAILED: &'static str = "ChildWorkflowFailed";

    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// Returns `true` if this is the wait-timeout marker.
    pub fn is_wait_timeout(&self) -> bool {
        self.kind == Self::WAIT_TIMEOUT
    }
}

impl fmt::Display for OperationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for OperationError {}

/// Immutable record of one completed operation attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationResponse {
    pub id: Uuid,
    pub workflow_instance_id: WorkflowId,
    pub operation_request_id: OperationRequestId,
    pub operation_type: OperationType,
    pub iteration: u32,
    pub created_at: OffsetDateTime,
    pub is_success: bool,
    /// A retriable failure that does not satisfy replay.
    pub is_transient: bool,
    /// Present iff success and the method returned a value.
    pub result: Option<Value>,
    /// Present iff `!is_success`.
    pub error: Option<OperationError>,
    pub execution_duration: Duration,
    /// Present iff the operation kind is `Workflow`.
    pub child_workflow_instance_id: Option<WorkflowId>,
}

impl OperationResponse {
    /// Record a successful attempt.
    pub fn success(
        request: &OperationRequest,
        result: Option<Value>,
        execution_duration: Duration,
    ) -> Self {
        Self::record(request, result, None, false, execution_duration)
    }

    /// Record a failed attempt.
    ///
    /// `transient` marks a failure that will be retried; it stays out of the
    /// replayed history.
    pub fn failure(
        request: &OperationRequest,
        error: OperationError,
        transient: bool,
        execution_duration: Duration,
    ) -> Self {
        Self::record(request, None, Some(error), transient, execution_duration)
    }

    /// Record the terminal outcome of a child workflow spawned by `request`.
    pub fn child_finished(
        request: &OperationRequest,
        child_id: WorkflowId,
        outcome: std::result::Result<Option<Value>, OperationError>,
    ) -> Self {
        let mut response = match outcome {
            Ok(result) => Self::record(request, result, None, false, Duration::ZERO),
            Err(error) => Self::record(request, None, Some(error), false, Duration::ZERO),
        };
        response.child_workflow_instance_id = Some(child_id);
        response
    }

    fn record(
        request: &OperationRequest,
        result: Option<Value>,
        error: Option<OperationError>,
        transient: bool,
        execution_duration: Duration,
    ) -> Self {
        let is_success = error.is_none();
        Self {
            id: Uuid::now_v7(),
            workflow_instance_id: request.workflow_instance_id.clone(),
            operation_request_id: request.id,
            operation_type: request.operation_type.clone(),
            iteration: request.iteration,
            created_at: OffsetDateTime::now_utc(),
            is_success,
            is_transient: transient && !is_success,
            result: result.filter(|value| !value.is_null()),
            error,
            execution_duration,
            child_workflow_instance_id: None,
        }
    }

    /// Returns `true` if this response records the call `(operation_type, iteration)`.
    pub fn is_for(&self, operation_type: &OperationType, iteration: u32) -> bool {
        self.iteration == iteration && &self.operation_type == operation_type
    }

    /// Returns `true` if both responses record the same call of the same workflow.
    pub fn same_call(&self, other: &OperationResponse) -> bool {
        self.workflow_instance_id == other.workflow_instance_id
            && self.is_for(&other.operation_type, other.iteration)
    }
}
