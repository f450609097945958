//! Registry of workflow definitions, operations, and callback handlers.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use time::OffsetDateTime;

use crate::callback::{CHILD_COMPLETION_CALLBACK, CallbackHandler, ChildCompletionCallback};
use crate::decider::{self, DecisionOutcome};
use crate::error::{Error, Result};
use crate::instance::{StateMap, WorkflowInstance};
use crate::operation::{Operation, OperationExecutor, OperationResponse};
use crate::signature::Arguments;
use crate::workflow::{Workflow, WorkflowInspector};

/// Type-erased workflow entry for dynamic dispatch.
///
/// This trait allows the registry to store different workflow types
/// in a single HashMap while preserving typed execution.
pub(crate) trait WorkflowEntry: Send + Sync {
    /// Run one decision pass.
    fn decide(
        &self,
        instance: &WorkflowInstance,
        history: &[OperationResponse],
        now: OffsetDateTime,
    ) -> DecisionOutcome;

    /// Run a signal handler and return the new state.
    fn apply_signal(
        &self,
        instance: &WorkflowInstance,
        signal: &str,
        args: Vec<Value>,
    ) -> Result<StateMap>;

    /// Validate entry-method arguments.
    fn bind_arguments(&self, args: Vec<Value>) -> Result<Arguments>;

    /// State of a freshly created instance.
    fn initial_state(&self) -> Result<StateMap>;
}

/// Typed workflow entry that captures the concrete type at registration.
struct TypedWorkflowEntry<W: Workflow> {
    inspector: WorkflowInspector<W>,
}

impl<W: Workflow> WorkflowEntry for TypedWorkflowEntry<W> {
    fn decide(
        &self,
        instance: &WorkflowInstance,
        history: &[OperationResponse],
        now: OffsetDateTime,
    ) -> DecisionOutcome {
        decider::decide(&self.inspector, instance, history, now)
    }

    fn apply_signal(
        &self,
        instance: &WorkflowInstance,
        signal: &str,
        args: Vec<Value>,
    ) -> Result<StateMap> {
        decider::apply_signal(&self.inspector, instance, signal, args)
    }

    fn bind_arguments(&self, args: Vec<Value>) -> Result<Arguments> {
        self.inspector.bind_entry_arguments(args)
    }

    fn initial_state(&self) -> Result<StateMap> {
        self.inspector.get_state(&W::default())
    }
}

/// Everything an [`Engine`](crate::Engine) can dispatch to, keyed by logical type.
///
/// Built once at startup with [`Registry::builder`] and shared read-only.
pub struct Registry {
    workflows: HashMap<&'static str, Box<dyn WorkflowEntry>>,
    operations: OperationExecutor,
    callbacks: HashMap<String, Arc<dyn CallbackHandler>>,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    pub(crate) fn workflow(&self, workflow_type: &str) -> Result<&dyn WorkflowEntry> {
        self.workflows
            .get(workflow_type)
            .map(|entry| entry.as_ref())
            .ok_or_else(|| Error::UnknownWorkflowType(workflow_type.to_owned()))
    }

    pub(crate) fn callback(&self, name: &str) -> Result<Arc<dyn CallbackHandler>> {
        self.callbacks
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownCallback(name.to_owned()))
    }

    /// The executor routing requests to registered operations.
    pub fn operations(&self) -> &OperationExecutor {
        &self.operations
    }

    pub fn has_workflow(&self, workflow_type: &str) -> bool {
        self.workflows.contains_key(workflow_type)
    }

    pub fn has_callback(&self, name: &str) -> bool {
        self.callbacks.contains_key(name)
    }

    /// Returns the number of registered workflows.
    pub fn workflow_count(&self) -> usize {
        self.workflows.len()
    }
}

/// Builder for a [`Registry`].
///
/// Registration problems (duplicates, invalid definitions) are deferred and
/// reported by [`build`](Self::build), so registrations can be chained.
///
/// # Example
///
/// ```ignore
/// let registry = Registry::builder()
///     .workflow::<OrderWorkflow>()
///     .workflow::<ShippingWorkflow>()
///     .operation(Payments::new(client))
///     .callback("notify-owner", NotifyOwner::new(mailer))
///     .build()?;
/// ```
pub struct RegistryBuilder {
    workflows: HashMap<&'static str, Box<dyn WorkflowEntry>>,
    operations: OperationExecutor,
    callbacks: HashMap<String, Arc<dyn CallbackHandler>>,
    error: Option<Error>,
}

impl RegistryBuilder {
    fn new() -> Self {
        let mut callbacks: HashMap<String, Arc<dyn CallbackHandler>> = HashMap::new();
        callbacks.insert(
            CHILD_COMPLETION_CALLBACK.to_owned(),
            Arc::new(ChildCompletionCallback),
        );
        Self {
            workflows: HashMap::new(),
            operations: OperationExecutor::new(),
            callbacks,
            error: None,
        }
    }

    fn fail(&mut self, error: Error) {
        if self.error.is_none() {
            self.error = Some(error);
        }
    }

    /// Register a workflow type under `W::TYPE`.
    ///
    /// The definition is inspected immediately; see [`WorkflowInspector::new`].
    pub fn workflow<W: Workflow>(mut self) -> Self {
        if self.workflows.contains_key(W::TYPE) {
            self.fail(Error::DuplicateWorkflowType(W::TYPE.to_owned()));
            return self;
        }
        match WorkflowInspector::<W>::new() {
            Ok(inspector) => {
                self.workflows
                    .insert(W::TYPE, Box::new(TypedWorkflowEntry { inspector }));
            }
            Err(err) => self.fail(err),
        }
        self
    }

    /// Register an operation under its [`Operation::operation_type`].
    pub fn operation(self, operation: impl Operation) -> Self {
        self.shared_operation(Arc::new(operation))
    }

    /// Register an operation that is shared with other owners.
    pub fn shared_operation(mut self, operation: Arc<dyn Operation>) -> Self {
        let operation_type = operation.operation_type();
        if !self.operations.insert(operation) {
            self.fail(Error::DuplicateOperationType(operation_type.to_owned()));
        }
        self
    }

    /// Register a callback handler under `name`.
    pub fn callback(mut self, name: impl Into<String>, handler: impl CallbackHandler) -> Self {
        let name = name.into();
        if self.callbacks.contains_key(&name) {
            self.fail(Error::DuplicateCallback(name));
            return self;
        }
        self.callbacks.insert(name, Arc::new(handler));
        self
    }

    pub fn build(self) -> Result<Registry> {
        if let Some(error) = self.error {
            return Err(error);
        }
        Ok(Registry {
            workflows: self.workflows,
            operations: self.operations,
            callbacks: self.callbacks,
        })
    }
}
