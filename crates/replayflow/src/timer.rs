//! Durable timers: "process this payload with that handler at time T".
//!
//! Every unit of engine work is a timer. Deciding a workflow, executing an
//! operation request, and notifying a callback are all scheduled by upserting
//! a timer and performed when the [`TimerProcessor`](crate::TimerProcessor)
//! leases it.
//!
//! # Singleton ids
//!
//! | Kind | Id | Payload |
//! |------|----|---------|
//! | [`TimerKind::Decision`] | `decision-{workflow_id}` | `{"workflow_id": ...}` |
//! | [`TimerKind::OperationRequest`] | `operation-{request_id}` | `{"request_id": ...}` |
//! | [`TimerKind::Callback`] | `callback-{workflow_id}` | `{"workflow_id": ...}` |
//!
//! Ids are deterministic, so re-scheduling the same unit of work replaces the
//! pending timer instead of adding a second one.
//!
//! # Versions
//!
//! Every upsert and every lease bumps the version. A processor deletes a
//! timer only if the version it leased is still current; if a handler
//! re-scheduled its own timer while running, the stale delete is a no-op and
//! the new schedule survives.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use time::OffsetDateTime;
use time::macros::datetime;

use crate::instance::WorkflowId;
use crate::operation::OperationRequestId;

/// Latest instant a timer can be due at. Delays that would overshoot it are
/// clamped here.
pub const MAX_TIMEOUT: OffsetDateTime = datetime!(9999-12-31 23:59:59 UTC);

/// `at + delay`, saturating at [`MAX_TIMEOUT`].
pub(crate) fn saturating_add(at: OffsetDateTime, delay: Duration) -> OffsetDateTime {
    time::Duration::try_from(delay)
        .ok()
        .and_then(|delay| at.checked_add(delay))
        .map_or(MAX_TIMEOUT, |due| due.min(MAX_TIMEOUT))
}

/// Caller-chosen timer identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TimerId(String);

impl TimerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The singleton "next decision" timer of a workflow.
    pub fn decision(workflow_id: &WorkflowId) -> Self {
        Self(format!("decision-{workflow_id}"))
    }

    /// The singleton timer of an operation request.
    pub fn operation(request_id: &OperationRequestId) -> Self {
        Self(format!("operation-{request_id}"))
    }

    /// The singleton terminal-callback timer of a workflow.
    pub fn callback(workflow_id: &WorkflowId) -> Self {
        Self(format!("callback-{workflow_id}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which handler processes a timer's payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerKind {
    Decision,
    OperationRequest,
    Callback,
}

impl TimerKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TimerKind::Decision => "decision",
            TimerKind::OperationRequest => "operation_request",
            TimerKind::Callback => "callback",
        }
    }
}

impl fmt::Display for TimerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A durable scheduled callback.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use replayflow::{Timer, TimerKind, WorkflowId};
///
/// let wf = WorkflowId::new("wf-1");
///
/// // Decide now
/// let timer = Timer::decision(&wf);
/// assert_eq!(timer.kind, TimerKind::Decision);
///
/// // Decide again in five seconds
/// let later = Timer::decision(&wf).delayed(Duration::from_secs(5));
/// assert!(later.timeout > timer.timeout);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Timer {
    pub id: TimerId,
    /// When the timer becomes due (UTC). While leased, the lease expiry.
    pub timeout: OffsetDateTime,
    pub kind: TimerKind,
    pub payload: Value,
    /// How many times the timer has been leased.
    pub retries: u32,
    pub version: u64,
}

impl Timer {
    /// Create a timer that is due at `timeout`.
    pub fn at(id: TimerId, kind: TimerKind, payload: Value, timeout: OffsetDateTime) -> Self {
        Self {
            id,
            timeout,
            kind,
            payload,
            retries: 0,
            version: 0,
        }
    }

    /// Create a timer that is due immediately.
    pub fn now(id: TimerId, kind: TimerKind, payload: Value) -> Self {
        Self::at(id, kind, payload, OffsetDateTime::now_utc())
    }

    /// Schedule the next decision pass of a workflow.
    pub fn decision(workflow_id: &WorkflowId) -> Self {
        Self::now(
            TimerId::decision(workflow_id),
            TimerKind::Decision,
            json!({ "workflow_id": workflow_id }),
        )
    }

    /// Schedule execution of an operation request.
    pub fn operation(request_id: &OperationRequestId) -> Self {
        Self::now(
            TimerId::operation(request_id),
            TimerKind::OperationRequest,
            json!({ "request_id": request_id }),
        )
    }

    /// Schedule the terminal callback of a workflow.
    pub fn callback(workflow_id: &WorkflowId) -> Self {
        Self::now(
            TimerId::callback(workflow_id),
            TimerKind::Callback,
            json!({ "workflow_id": workflow_id }),
        )
    }

    /// Push the due time back by `delay`, saturating at [`MAX_TIMEOUT`].
    pub fn delayed(mut self, delay: Duration) -> Self {
        self.timeout = saturating_add(self.timeout, delay);
        self
    }

    /// Move the due time to `timeout`.
    pub fn due_at(mut self, timeout: OffsetDateTime) -> Self {
        self.timeout = timeout;
        self
    }

    /// Returns `true` if the timer is due at `now`.
    pub fn is_due(&self, now: OffsetDateTime) -> bool {
        self.timeout <= now
    }
}
