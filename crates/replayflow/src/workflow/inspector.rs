//! Structural access to a workflow definition's state, entry method, and
//! signal handlers.

use std::collections::HashSet;

use serde_json::Value;

use super::{Signal, Workflow};
use crate::error::{Error, Result};
use crate::instance::StateMap;
use crate::signature::{self, Arguments, Parameter};

/// Descriptor-driven view of a [`Workflow`] type.
///
/// State is the workflow struct serialized to a JSON object: each top-level
/// field is one persisted state field. The entry method and signals come
/// from the trait's static descriptors.
pub struct WorkflowInspector<W: Workflow> {
    parameters: Vec<Parameter>,
    signals: Vec<Signal<W>>,
}

impl<W: Workflow> WorkflowInspector<W> {
    /// Inspect `W`, verifying that its definition is usable.
    ///
    /// Checks that `W::default()` serializes to an object, that it round-trips
    /// through that object, and that signal names are unique and distinct
    /// from the entry method.
    pub fn new() -> Result<Self> {
        let invalid = |reason: String| Error::InvalidWorkflowDefinition {
            workflow_type: W::TYPE,
            reason,
        };

        let state = match serde_json::to_value(W::default())? {
            Value::Object(state) => state,
            other => {
                return Err(invalid(format!(
                    "state must serialize to an object, got {}",
                    kind_of(&other)
                )));
            }
        };
        serde_json::from_value::<W>(Value::Object(state))
            .map_err(|e| invalid(format!("state does not round-trip: {e}")))?;

        let signals = W::signals();
        let mut names = HashSet::new();
        for signal in &signals {
            if signal.name == W::ENTRY {
                return Err(invalid(format!(
                    "signal {} shadows the entry method",
                    signal.name
                )));
            }
            if !names.insert(signal.name) {
                return Err(invalid(format!("signal {} declared twice", signal.name)));
            }
        }

        Ok(Self {
            parameters: W::parameters(),
            signals,
        })
    }

    /// Name of the entry method.
    pub fn entry_method(&self) -> &'static str {
        W::ENTRY
    }

    pub fn entry_parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    pub fn signal(&self, name: &str) -> Option<&Signal<W>> {
        self.signals.iter().find(|signal| signal.name == name)
    }

    pub fn signal_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.signals.iter().map(|signal| signal.name)
    }

    /// Extract the persisted state fields of `workflow`.
    pub fn get_state(&self, workflow: &W) -> Result<StateMap> {
        match serde_json::to_value(workflow)? {
            Value::Object(state) => Ok(state),
            other => Err(Error::InvalidWorkflowDefinition {
                workflow_type: W::TYPE,
                reason: format!("state must serialize to an object, got {}", kind_of(&other)),
            }),
        }
    }

    /// Build a fresh workflow and inject `state` into it.
    ///
    /// Fields absent from `state` keep their default value, so a state map
    /// persisted by an older definition still loads.
    pub fn set_state(&self, state: &StateMap) -> Result<W> {
        let mut fields = self.get_state(&W::default())?;
        for (name, value) in state {
            fields.insert(name.clone(), value.clone());
        }
        Ok(serde_json::from_value(Value::Object(fields))?)
    }

    /// Validate entry-method arguments.
    pub fn bind_entry_arguments(&self, values: Vec<Value>) -> Result<Arguments> {
        self.bind_arguments(W::ENTRY, values)
    }

    /// Validate arguments for the entry method or a named signal.
    pub fn bind_arguments(&self, method: &str, values: Vec<Value>) -> Result<Arguments> {
        let parameters = if method == W::ENTRY {
            &self.parameters
        } else {
            match self.signal(method) {
                Some(signal) => &signal.parameters,
                None => {
                    return Err(Error::UnknownSignal {
                        workflow_type: W::TYPE.to_owned(),
                        signal: method.to_owned(),
                    });
                }
            }
        };
        signature::bind(parameters, values)
            .map_err(|source| Error::invalid_arguments(format!("{}.{method}", W::TYPE), source))
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a bool",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
