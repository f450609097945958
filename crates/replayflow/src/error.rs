//! Error types for replayflow.

use thiserror::Error;

use crate::instance::{WorkflowId, WorkflowStatus};
use crate::operation::OperationRequestId;
use crate::signature::ArgumentError;

/// A `Result` alias with [`enum@Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in replayflow operations.
///
/// Errors returned from API-level calls (create, signal) are validation
/// faults meant for the caller. Errors returned while processing timers are
/// absorbed by the timer processor, which leaves the timer leased so it is
/// retried after the lease expires.
#[derive(Debug, Error)]
pub enum Error {
    /// Failed to serialize or deserialize state, arguments, or payloads.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Arguments did not match a declared method signature.
    #[error("invalid arguments for {method}: {source}")]
    InvalidArguments {
        /// The method the arguments were bound against.
        method: String,
        /// The specific mismatch.
        #[source]
        source: ArgumentError,
    },

    /// Workflow type was not registered.
    #[error("unknown workflow type: {0}")]
    UnknownWorkflowType(String),

    /// Workflow type was registered more than once.
    #[error("duplicate workflow type registration: {0}")]
    DuplicateWorkflowType(String),

    /// Operation type was registered more than once.
    #[error("duplicate operation type registration: {0}")]
    DuplicateOperationType(String),

    /// Callback handler was registered more than once.
    #[error("duplicate callback registration: {0}")]
    DuplicateCallback(String),

    /// Callback reference does not name a registered handler.
    #[error("unknown callback handler: {0}")]
    UnknownCallback(String),

    /// Workflow definition failed registration checks.
    #[error("invalid workflow definition {workflow_type}: {reason}")]
    InvalidWorkflowDefinition {
        /// The workflow type identifier.
        workflow_type: &'static str,
        /// What was wrong with the definition.
        reason: String,
    },

    /// Signal name is not declared by the workflow.
    #[error("workflow type {workflow_type} has no signal named {signal}")]
    UnknownSignal {
        /// The workflow type identifier.
        workflow_type: String,
        /// The requested signal name.
        signal: String,
    },

    /// Signal handler rejected the signal.
    #[error("signal {signal} failed: {reason}")]
    SignalFailed {
        /// The signal name.
        signal: String,
        /// Human-readable failure reason.
        reason: String,
    },

    /// No workflow instance exists with this id.
    #[error("workflow instance not found: {0}")]
    WorkflowNotFound(WorkflowId),

    /// A workflow instance with this id already exists.
    #[error("workflow instance already exists: {0}")]
    DuplicateWorkflowInstance(WorkflowId),

    /// The workflow has reached a terminal status and accepts no more input.
    #[error("workflow instance {id} is {status} and cannot accept {action}")]
    WorkflowTerminated {
        /// The workflow instance ID.
        id: WorkflowId,
        /// The terminal status.
        status: WorkflowStatus,
        /// What the caller attempted.
        action: &'static str,
    },

    /// Optimistic concurrency check failed on an instance update.
    #[error("version conflict on workflow {id}: expected {expected}, found {actual}")]
    VersionConflict {
        /// The workflow instance ID.
        id: WorkflowId,
        /// The version the caller last observed.
        expected: u64,
        /// The version currently stored.
        actual: u64,
    },

    /// A mutation would break an instance invariant.
    #[error("invalid mutation for workflow {id}: {reason}")]
    InvalidMutation {
        /// The workflow instance ID.
        id: WorkflowId,
        /// The violated invariant.
        reason: &'static str,
    },

    /// No operation request exists with this id.
    #[error("operation request not found: {0}")]
    OperationRequestNotFound(OperationRequestId),

    /// A timer payload did not match its handler kind.
    #[error("invalid payload for {kind} timer {timer_id}: {source}")]
    InvalidTimerPayload {
        /// The timer id.
        timer_id: String,
        /// The handler kind the payload was decoded for.
        kind: &'static str,
        /// The decoding error.
        #[source]
        source: serde_json::Error,
    },

    /// Storage backend failure.
    ///
    /// External store backends report infrastructure faults (lost
    /// connections, failed queries) with this variant. The in-memory store
    /// never fails this way.
    #[error("storage error: {0}")]
    Storage(String),
}

impl Error {
    /// Create an argument validation error with method context.
    pub fn invalid_arguments(method: impl Into<String>, source: ArgumentError) -> Self {
        Error::InvalidArguments {
            method: method.into(),
            source,
        }
    }

    /// Returns `true` if this error is an optimistic-concurrency conflict.
    ///
    /// Conflicts are expected under concurrent timer delivery; the decision
    /// that lost the race is recomputed.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::VersionConflict { .. })
    }
}
