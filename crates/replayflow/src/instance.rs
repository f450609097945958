//! Workflow instance records.
//!
//! A [`WorkflowInstance`] is one logical execution of a workflow type. Besides
//! its operation history, the instance row is the only data that survives
//! between decision passes: the persisted state fields, the initial
//! arguments, and the terminal result.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Persisted workflow state: declared field name → value.
pub type StateMap = Map<String, Value>;

/// A workflow instance identifier.
///
/// Generated ids are UUID v7 (time-ordered). Callers may supply their own
/// id when creating an instance; child workflow ids are derived from the
/// parent's operation request id.
///
/// # Example
///
/// ```
/// use replayflow::WorkflowId;
///
/// let id = WorkflowId::new("wf-123");
/// assert_eq!(id.as_str(), "wf-123");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkflowId(String);

impl WorkflowId {
    /// Create a workflow ID from an existing string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh time-ordered ID.
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    /// Consume the wrapper and return the inner string.
    pub fn into_inner(self) -> String {
        self.0
    }

    /// Borrow the ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl From<String> for WorkflowId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for WorkflowId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Lifecycle status of a workflow instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowStatus {
    Active,
    Completed,
    Error,
}

impl WorkflowStatus {
    /// Returns `true` for `Completed` and `Error`.
    pub fn is_terminal(self) -> bool {
        !matches!(self, WorkflowStatus::Active)
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkflowStatus::Active => "ACTIVE",
            WorkflowStatus::Completed => "COMPLETED",
            WorkflowStatus::Error => "ERROR",
        };
        f.write_str(name)
    }
}

/// Names a registered callback handler, invoked when the instance reaches a
/// terminal status.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallbackRef(String);

impl CallbackRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallbackRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One logical workflow execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowInstance {
    pub id: WorkflowId,
    /// Caller-supplied idempotency key. For child workflows this is the
    /// parent's operation request id.
    pub correlation_id: Option<String>,
    pub workflow_type: String,
    pub status: WorkflowStatus,
    /// Present iff `status` is `Error`.
    pub status_reason: Option<String>,
    pub state: StateMap,
    pub initial_args: Vec<Value>,
    /// Present only if `status` is `Completed` and the entry method returned
    /// a value.
    pub result: Option<Value>,
    pub version: u64,
    pub callback: Option<CallbackRef>,
    pub created_at: OffsetDateTime,
}

impl WorkflowInstance {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Apply a mutation in place and bump the version.
    ///
    /// Stores call this after their compare-and-swap check so every backend
    /// enforces the same invariants.
    pub fn apply(&mut self, mutation: InstanceMutation) -> Result<()> {
        let status = mutation.status.unwrap_or(self.status);

        let status_reason = match status {
            WorkflowStatus::Error => match mutation
                .status_reason
                .or_else(|| self.status_reason.clone())
            {
                Some(reason) => Some(reason),
                None => {
                    return Err(Error::InvalidMutation {
                        id: self.id.clone(),
                        reason: "ERROR status requires a status reason",
                    });
                }
            },
            _ => None,
        };

        let result = match (status, mutation.result) {
            (WorkflowStatus::Completed, Some(result)) => Some(result),
            (WorkflowStatus::Completed, None) => self.result.clone(),
            (_, Some(_)) => {
                return Err(Error::InvalidMutation {
                    id: self.id.clone(),
                    reason: "result may only be set on a COMPLETED workflow",
                });
            }
            (_, None) => None,
        };

        if let Some(state) = mutation.state {
            self.state = state;
        }
        self.status = status;
        self.status_reason = status_reason;
        self.result = result;
        self.version += 1;
        Ok(())
    }
}

/// Request to create a workflow instance.
#[derive(Debug, Clone, PartialEq)]
pub struct NewWorkflowInstance {
    pub workflow_type: String,
    pub arguments: Vec<Value>,
    /// Explicit id. A fresh id is generated when `None`.
    pub id: Option<WorkflowId>,
    pub correlation_id: Option<String>,
    pub callback: Option<CallbackRef>,
}

impl NewWorkflowInstance {
    pub fn new(workflow_type: impl Into<String>) -> Self {
        Self {
            workflow_type: workflow_type.into(),
            arguments: Vec::new(),
            id: None,
            correlation_id: None,
            callback: None,
        }
    }

    /// Append an entry-method argument.
    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.arguments.push(value.into());
        self
    }

    pub fn with_arguments(mut self, arguments: Vec<Value>) -> Self {
        self.arguments = arguments;
        self
    }

    pub fn with_id(mut self, id: impl Into<WorkflowId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn with_callback(mut self, callback: CallbackRef) -> Self {
        self.callback = Some(callback);
        self
    }
}

/// A change to an instance row, applied under optimistic concurrency.
///
/// Fields left as `None` keep their stored value, except that the status
/// reason and result are cleared whenever the resulting status no longer
/// allows them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InstanceMutation {
    pub status: Option<WorkflowStatus>,
    pub status_reason: Option<String>,
    pub state: Option<StateMap>,
    pub result: Option<Value>,
}

impl InstanceMutation {
    /// Mark the workflow completed with an optional result.
    pub fn completed(result: Option<Value>) -> Self {
        Self {
            status: Some(WorkflowStatus::Completed),
            result,
            ..Self::default()
        }
    }

    /// Mark the workflow failed.
    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            status: Some(WorkflowStatus::Error),
            status_reason: Some(reason.into()),
            ..Self::default()
        }
    }

    /// Move the workflow back to `Active`.
    pub fn reactivated() -> Self {
        Self {
            status: Some(WorkflowStatus::Active),
            ..Self::default()
        }
    }

    /// Replace the persisted state.
    pub fn with_state(mut self, state: StateMap) -> Self {
        self.state = Some(state);
        self
    }
}
