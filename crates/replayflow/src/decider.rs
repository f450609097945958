//! Workflow decision execution.

use serde_json::Value;
use time::OffsetDateTime;

use crate::error::{Error, Result};
use crate::instance::{StateMap, WorkflowInstance};
use crate::operation::OperationResponse;
use crate::workflow::{DecisionContext, Interrupt, Suspension, Workflow, WorkflowInspector};

/// Outcome of one decision pass.
///
/// Every variant carries the state snapshot taken after the pass, since
/// workflow code may mutate state before it suspends or fails.
#[derive(Debug, Clone, PartialEq)]
pub enum DecisionOutcome {
    /// The pass suspended; the workflow stays `ACTIVE`.
    Active {
        suspension: Suspension,
        state: StateMap,
    },
    /// The entry method returned.
    Completed {
        result: Option<Value>,
        state: StateMap,
    },
    /// A fault escaped the entry method.
    Error { reason: String, state: StateMap },
}

impl DecisionOutcome {
    pub fn state(&self) -> &StateMap {
        match self {
            DecisionOutcome::Active { state, .. }
            | DecisionOutcome::Completed { state, .. }
            | DecisionOutcome::Error { state, .. } => state,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, DecisionOutcome::Active { .. })
    }
}

/// Run one replay pass of `instance` against `history`.
///
/// This function:
/// 1. Injects the persisted state into a fresh workflow value
/// 2. Binds the initial arguments to the entry method's parameters
/// 3. Runs the entry method with a fresh [`DecisionContext`]
/// 4. Snapshots the state and interprets the returned [`Step`](crate::Step)
///
/// The pass is pure: identical `(instance, history, now)` inputs always
/// produce the same outcome. Nothing is persisted here.
pub(crate) fn decide<W: Workflow>(
    inspector: &WorkflowInspector<W>,
    instance: &WorkflowInstance,
    history: &[OperationResponse],
    now: OffsetDateTime,
) -> DecisionOutcome {
    let unchanged = |reason: String| DecisionOutcome::Error {
        reason,
        state: instance.state.clone(),
    };

    let mut workflow = match inspector.set_state(&instance.state) {
        Ok(workflow) => workflow,
        Err(err) => return unchanged(format!("failed to restore state: {err}")),
    };
    let args = match inspector.bind_entry_arguments(instance.initial_args.clone()) {
        Ok(args) => args,
        Err(err) => return unchanged(err.to_string()),
    };

    let mut ctx = DecisionContext::new(instance.id.clone(), instance.created_at, now, history);
    let step = workflow.run(&mut ctx, &args);

    let state = match inspector.get_state(&workflow) {
        Ok(state) => state,
        Err(err) => return unchanged(format!("failed to capture state: {err}")),
    };

    match step {
        Ok(result) => DecisionOutcome::Completed {
            result: Some(result).filter(|value| !value.is_null()),
            state,
        },
        Err(Interrupt::Suspend(suspension)) => DecisionOutcome::Active { suspension, state },
        Err(interrupt) => DecisionOutcome::Error {
            reason: interrupt.to_string(),
            state,
        },
    }
}

/// Run the named signal handler against the instance's current state.
///
/// Returns the new state snapshot. No history is replayed.
pub(crate) fn apply_signal<W: Workflow>(
    inspector: &WorkflowInspector<W>,
    instance: &WorkflowInstance,
    signal_name: &str,
    args: Vec<Value>,
) -> Result<StateMap> {
    let signal = inspector
        .signal(signal_name)
        .ok_or_else(|| Error::UnknownSignal {
            workflow_type: W::TYPE.to_owned(),
            signal: signal_name.to_owned(),
        })?;
    let args = inspector.bind_arguments(signal_name, args)?;

    let mut workflow = inspector.set_state(&instance.state)?;
    (signal.handler)(&mut workflow, &args).map_err(|interrupt| Error::SignalFailed {
        signal: signal_name.to_owned(),
        reason: interrupt.to_string(),
    })?;

    inspector.get_state(&workflow)
}
