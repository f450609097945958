//! Workflow engine: instance lifecycle, operation lifecycle, child workflows,
//! signals, and callbacks.

use std::sync::Arc;
use std::time::Duration;

use nonempty::NonEmpty;
use serde_json::Value;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::callback::CHILD_COMPLETION_CALLBACK;
use crate::decider::DecisionOutcome;
use crate::error::{Error, Result};
use crate::instance::{
    CallbackRef, InstanceMutation, NewWorkflowInstance, WorkflowId, WorkflowInstance,
    WorkflowStatus,
};
use crate::operation::{
    ExecutionOutcome, ExecutionStatus, OperationError, OperationKind, OperationRequest,
    OperationRequestId, OperationResponse,
};
use crate::runtime::Registry;
use crate::store::Stores;
use crate::timer::{Timer, TimerId};
use crate::workflow::Suspension;

/// Configuration for the [`Engine`].
///
/// # Example
///
/// ```
/// use replayflow::EngineConfig;
///
/// let config = EngineConfig {
///     synchronous_operations: true,
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Execute requested operations inside the decision pass that asked for
    /// them and replay again, instead of scheduling an operation timer.
    ///
    /// The loop stops at a wait, a child workflow, or an operation that is
    /// retrying. Observable results are the same as the scheduled path.
    /// Default: false.
    pub synchronous_operations: bool,

    /// Upper bound on in-process passes per decision when
    /// `synchronous_operations` is on. Remaining requests are scheduled
    /// normally. Default: 64.
    pub max_synchronous_passes: usize,

    /// How many times a decision that lost the optimistic version race is
    /// recomputed before the conflict propagates. Default: 3.
    pub max_conflict_retries: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            synchronous_operations: false,
            max_synchronous_passes: 64,
            max_conflict_retries: 3,
        }
    }
}

/// What happened to an executed attempt.
enum Settlement {
    /// A non-transient response was stored.
    Recorded,
    /// A non-transient response for the same call already existed.
    Duplicate,
    /// A transient response was stored and another attempt is due later.
    Retrying,
}

/// Orchestrates decision passes, operation execution, and timers.
///
/// Each method is one unit of work, normally invoked by the
/// [`TimerProcessor`](crate::TimerProcessor) when the corresponding timer
/// fires:
///
/// | Timer | Method |
/// |-------|--------|
/// | decision | [`process_decision`](Self::process_decision) |
/// | operation request | [`process_operation_request`](Self::process_operation_request) |
/// | callback | [`process_callback`](Self::process_callback) |
///
/// Methods are safe to call redundantly: singleton timer ids and the
/// optimistic instance version keep duplicate deliveries harmless.
///
/// # Example
///
/// ```ignore
/// let registry = Registry::builder()
///     .workflow::<OrderWorkflow>()
///     .operation(Payments::new(client))
///     .build()?;
/// let engine = Engine::new(registry, MemoryStore::new());
///
/// let order = engine
///     .create_workflow_instance(NewWorkflowInstance::new("order").arg("sku-1"))
///     .await?;
///
/// TimerProcessor::new(engine, RuntimeConfig::default())
///     .run(async { tokio::signal::ctrl_c().await.ok(); })
///     .await?;
/// ```
#[derive(Clone)]
pub struct Engine {
    stores: Stores,
    registry: Arc<Registry>,
    config: EngineConfig,
}

impl Engine {
    pub fn new(registry: Registry, stores: impl Into<Stores>) -> Self {
        Self {
            stores: stores.into(),
            registry: Arc::new(registry),
            config: EngineConfig::default(),
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Create an `ACTIVE` instance and schedule its first decision.
    ///
    /// Validates the workflow type, the entry arguments, and the callback
    /// reference first. If a correlation id is given and an instance of the
    /// same type was already created with it, that instance is returned
    /// instead.
    pub async fn create_workflow_instance(
        &self,
        request: NewWorkflowInstance,
    ) -> Result<WorkflowInstance> {
        let entry = self.registry.workflow(&request.workflow_type)?;
        entry.bind_arguments(request.arguments.clone())?;

        if let Some(callback) = &request.callback {
            if !self.registry.has_callback(callback.as_str()) {
                return Err(Error::UnknownCallback(callback.to_string()));
            }
        }

        if let Some(correlation_id) = &request.correlation_id {
            let existing = self
                .stores
                .instances
                .find_by_correlation_id(&request.workflow_type, correlation_id)
                .await?;
            if let Some(existing) = existing {
                debug!(
                    workflow_id = %existing.id,
                    correlation_id = %correlation_id,
                    "Workflow instance already exists for correlation id"
                );
                return Ok(existing);
            }
        }

        let instance = WorkflowInstance {
            id: request.id.unwrap_or_else(WorkflowId::generate),
            correlation_id: request.correlation_id,
            workflow_type: request.workflow_type,
            status: WorkflowStatus::Active,
            status_reason: None,
            state: entry.initial_state()?,
            initial_args: request.arguments,
            result: None,
            version: 0,
            callback: request.callback,
            created_at: OffsetDateTime::now_utc(),
        };
        let instance = self.stores.instances.create_instance(instance).await?;
        self.schedule(Timer::decision(&instance.id)).await?;

        info!(
            workflow_id = %instance.id,
            workflow_type = %instance.workflow_type,
            "Workflow instance created"
        );
        Ok(instance)
    }

    pub async fn get_workflow_instance(&self, id: &WorkflowId) -> Result<WorkflowInstance> {
        self.stores.instances.get_instance(id).await
    }

    pub async fn list_workflow_instances(&self) -> Result<Vec<WorkflowInstance>> {
        self.stores.instances.find_instances().await
    }

    /// Recorded responses of a workflow in creation order.
    pub async fn operation_history(
        &self,
        id: &WorkflowId,
        include_transient: bool,
    ) -> Result<Vec<OperationResponse>> {
        self.stores
            .operations
            .get_operation_responses(id, include_transient)
            .await
    }

    /// Run a decision pass and persist its outcome.
    ///
    /// A pass that loses the optimistic version race is recomputed against
    /// the fresh row, up to [`EngineConfig::max_conflict_retries`] times.
    pub async fn process_decision(&self, id: &WorkflowId) -> Result<()> {
        let mut conflicts = 0;
        loop {
            match self.decide(id).await {
                Err(err) if err.is_conflict() && conflicts < self.config.max_conflict_retries => {
                    conflicts += 1;
                    debug!(workflow_id = %id, conflicts, "Decision lost a version race, recomputing");
                }
                result => return result,
            }
        }
    }

    async fn decide(&self, id: &WorkflowId) -> Result<()> {
        let instance = self.stores.instances.get_instance(id).await?;
        if instance.is_terminal() {
            debug!(workflow_id = %id, status = %instance.status, "Skipping decision for finished workflow");
            return Ok(());
        }

        let entry = self.registry.workflow(&instance.workflow_type)?;
        let mut history = self
            .stores
            .operations
            .get_operation_responses(id, false)
            .await?;

        // Passes after the first resume from the previous pass's state, as
        // they would after a persisted round-trip.
        let mut current = instance.clone();
        let mut passes = 0;
        loop {
            let now = OffsetDateTime::now_utc();
            let outcome = entry.decide(&current, &history, now);
            passes += 1;

            let inline = if self.config.synchronous_operations
                && passes < self.config.max_synchronous_passes
            {
                inline_requests(&outcome)
            } else {
                None
            };

            if let Some(requests) = inline {
                if self.execute_inline(requests).await? {
                    current.state = outcome.state().clone();
                    history = self
                        .stores
                        .operations
                        .get_operation_responses(id, false)
                        .await?;
                    continue;
                }
                return self.apply_outcome(&instance, outcome, now, false).await;
            }

            return self.apply_outcome(&instance, outcome, now, true).await;
        }
    }

    /// Execute requests inside the current decision.
    ///
    /// Returns `true` if every request now has a recorded response.
    async fn execute_inline(&self, requests: &NonEmpty<OperationRequest>) -> Result<bool> {
        let mut settled = true;
        for request in requests.iter() {
            let created = self
                .stores
                .operations
                .create_operation_request(request.clone())
                .await?;

            if !created
                && self
                    .stores
                    .timers
                    .get_timer(&TimerId::operation(&request.id))
                    .await?
                    .is_some()
            {
                // In flight elsewhere or waiting out a retry delay.
                settled = false;
                continue;
            }

            let request = if created {
                request.clone()
            } else {
                self.stores
                    .operations
                    .get_operation_request(&request.id)
                    .await?
            };

            let outcome = self.registry.operations().execute(&request).await;
            if let Settlement::Retrying = self.settle(&request, outcome).await? {
                settled = false;
            }
        }
        Ok(settled)
    }

    async fn apply_outcome(
        &self,
        instance: &WorkflowInstance,
        outcome: DecisionOutcome,
        now: OffsetDateTime,
        dispatch: bool,
    ) -> Result<()> {
        let id = &instance.id;

        let mutation = match outcome {
            DecisionOutcome::Active { suspension, state } => {
                match suspension {
                    Suspension::Requests(requests) => {
                        if dispatch {
                            for request in requests {
                                self.dispatch_request(request).await?;
                            }
                        }
                    }
                    Suspension::Wait(delay) => {
                        self.schedule(Timer::decision(id).due_at(now).delayed(delay))
                            .await?;
                        debug!(workflow_id = %id, ?delay, "Workflow waiting");
                    }
                }
                (state != instance.state).then(|| InstanceMutation::default().with_state(state))
            }
            DecisionOutcome::Completed { result, state } => {
                Some(InstanceMutation::completed(result).with_state(state))
            }
            DecisionOutcome::Error { reason, state } => {
                warn!(workflow_id = %id, reason = %reason, "Workflow failed");
                Some(InstanceMutation::failed(reason).with_state(state))
            }
        };

        let Some(mutation) = mutation else {
            return Ok(());
        };

        let updated = self
            .stores
            .instances
            .update_instance(id, mutation, instance.version)
            .await?;

        if updated.is_terminal() {
            info!(workflow_id = %id, status = %updated.status, "Workflow finished");
            self.schedule(Timer::callback(id)).await?;
        }
        Ok(())
    }

    /// Persist a request and make sure exactly one timer will execute it.
    async fn dispatch_request(&self, request: OperationRequest) -> Result<()> {
        let id = request.id;
        let operation = request.operation_type.to_string();
        let created = self
            .stores
            .operations
            .create_operation_request(request)
            .await?;

        // An existing request keeps its pending timer. It may be leased or
        // waiting out a retry delay, and an upsert would reset either.
        if !created
            && self
                .stores
                .timers
                .get_timer(&TimerId::operation(&id))
                .await?
                .is_some()
        {
            return Ok(());
        }

        self.schedule(Timer::operation(&id)).await?;
        debug!(request_id = %id, operation = %operation, "Operation requested");
        Ok(())
    }

    /// Execute one attempt of an operation request, or start a child
    /// workflow for a workflow-kind request.
    ///
    /// A no-op if the workflow is no longer `ACTIVE` or the call already has
    /// a recorded response.
    pub async fn process_operation_request(&self, request_id: &OperationRequestId) -> Result<()> {
        let request = self
            .stores
            .operations
            .get_operation_request(request_id)
            .await?;
        let workflow_id = &request.workflow_instance_id;

        let instance = self.stores.instances.get_instance(workflow_id).await?;
        if instance.status != WorkflowStatus::Active {
            debug!(request_id = %request_id, status = %instance.status, "Skipping request for finished workflow");
            return Ok(());
        }

        let history = self
            .stores
            .operations
            .get_operation_responses(workflow_id, false)
            .await?;
        if history
            .iter()
            .any(|response| response.is_for(&request.operation_type, request.iteration))
        {
            debug!(request_id = %request_id, "Request already has a recorded response");
            return Ok(());
        }

        if request.operation_type.kind == OperationKind::Workflow {
            return self.start_child(&request).await;
        }

        let outcome = self.registry.operations().execute(&request).await;
        match self.settle(&request, outcome).await? {
            Settlement::Retrying => Ok(()),
            Settlement::Recorded | Settlement::Duplicate => {
                self.schedule(Timer::decision(workflow_id)).await?;
                Ok(())
            }
        }
    }

    /// Record an attempt and either schedule a retry or freeze the result.
    ///
    /// Shared by the scheduled and the synchronous paths.
    async fn settle(
        &self,
        request: &OperationRequest,
        outcome: ExecutionOutcome,
    ) -> Result<Settlement> {
        let duration = outcome.duration;
        let retry_delay = if outcome.is_retriable() {
            request.retry_strategy.next_delay(request.failed_attempts)
        } else {
            None
        };

        let response = match (outcome.status, outcome.error) {
            (ExecutionStatus::Completed, _) => {
                OperationResponse::success(request, outcome.result, duration)
            }
            (_, error) => {
                let error = error.unwrap_or_else(|| {
                    OperationError::new("Unknown", "operation failed without an error")
                });
                if let Some(delay) = retry_delay {
                    return self.schedule_retry(request, error, duration, delay).await;
                }
                if !error.is_wait_timeout() {
                    warn!(
                        request_id = %request.id,
                        operation = %request.operation_type,
                        attempts = request.failed_attempts + 1,
                        error = %error,
                        "Operation failed permanently"
                    );
                }
                OperationResponse::failure(request, error, false, duration)
            }
        };

        if self
            .stores
            .operations
            .create_operation_response(response)
            .await?
        {
            debug!(request_id = %request.id, operation = %request.operation_type, "Operation response recorded");
            Ok(Settlement::Recorded)
        } else {
            debug!(request_id = %request.id, "Duplicate operation response ignored");
            Ok(Settlement::Duplicate)
        }
    }

    async fn schedule_retry(
        &self,
        request: &OperationRequest,
        error: OperationError,
        duration: Duration,
        delay: Duration,
    ) -> Result<Settlement> {
        let response = OperationResponse::failure(request, error, true, duration);
        self.stores
            .operations
            .create_operation_response(response)
            .await?;

        if self
            .stores
            .operations
            .increment_failed_attempts(&request.id, request.failed_attempts)
            .await?
        {
            self.schedule(Timer::operation(&request.id).delayed(delay))
                .await?;
            debug!(
                request_id = %request.id,
                attempt = request.failed_attempts + 1,
                ?delay,
                "Operation failed, retry scheduled"
            );
        } else {
            debug!(
                request_id = %request.id,
                expected = request.failed_attempts,
                "Retry already scheduled by a concurrent attempt"
            );
        }
        Ok(Settlement::Retrying)
    }

    async fn start_child(&self, request: &OperationRequest) -> Result<()> {
        let child_id = request.id.child_workflow_id();
        let child = NewWorkflowInstance::new(request.operation_type.target.clone())
            .with_arguments(request.arguments.clone())
            .with_id(child_id.clone())
            .with_correlation_id(request.id.to_string())
            .with_callback(CallbackRef::new(CHILD_COMPLETION_CALLBACK));

        // The correlation lookup returns an existing child. A finished one
        // has already reported, so a re-issued request (after the parent was
        // recovered) must act on it here.
        match self.create_workflow_instance(child).await {
            Ok(child) if child.status == WorkflowStatus::Error => {
                info!(
                    workflow_id = %request.workflow_instance_id,
                    child_id = %child.id,
                    "Recovering failed child workflow"
                );
                self.recover_workflow(&child.id).await?;
                Ok(())
            }
            Ok(child) if child.status == WorkflowStatus::Completed => {
                self.handle_child_workflow_completed(&child.id).await
            }
            Ok(child) => {
                info!(
                    workflow_id = %request.workflow_instance_id,
                    child_id = %child.id,
                    "Child workflow started"
                );
                Ok(())
            }
            Err(Error::DuplicateWorkflowInstance(_)) => {
                debug!(child_id = %child_id, "Child workflow already exists");
                Ok(())
            }
            Err(err @ (Error::UnknownWorkflowType(_) | Error::InvalidArguments { .. })) => {
                let kind = match err {
                    Error::UnknownWorkflowType(_) => OperationError::UNKNOWN_OPERATION,
                    _ => OperationError::INVALID_ARGUMENT,
                };
                warn!(child_id = %child_id, error = %err, "Child workflow could not be started");
                let response = OperationResponse::child_finished(
                    request,
                    child_id,
                    Err(OperationError::new(kind, err.to_string())),
                );
                self.stores
                    .operations
                    .create_operation_response(response)
                    .await?;
                self.schedule(Timer::decision(&request.workflow_instance_id))
                    .await?;
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Report a finished child workflow to its parent.
    ///
    /// The child's correlation id names the parent's operation request. A
    /// `COMPLETED` child becomes a successful response carrying its result;
    /// an `ERROR` child becomes a non-retriable failure.
    pub async fn handle_child_workflow_completed(&self, child_id: &WorkflowId) -> Result<()> {
        let child = self.stores.instances.get_instance(child_id).await?;
        if !child.is_terminal() {
            warn!(child_id = %child_id, "Child completion reported for an active workflow");
            return Ok(());
        }

        let Some(request_id) = child
            .correlation_id
            .as_deref()
            .and_then(|id| id.parse::<OperationRequestId>().ok())
        else {
            warn!(child_id = %child_id, "Child workflow has no parent request");
            return Ok(());
        };

        let request = self
            .stores
            .operations
            .get_operation_request(&request_id)
            .await?;

        let outcome = match child.status {
            WorkflowStatus::Completed => Ok(child.result.clone()),
            _ => Err(OperationError::new(
                OperationError::CHILD_WORKFLOW_FAILED,
                child
                    .status_reason
                    .clone()
                    .unwrap_or_else(|| format!("child workflow {child_id} failed")),
            )),
        };

        let response = OperationResponse::child_finished(&request, child.id.clone(), outcome);
        if !self
            .stores
            .operations
            .create_operation_response(response)
            .await?
        {
            debug!(child_id = %child_id, "Child result already recorded");
        }

        self.schedule(Timer::decision(&request.workflow_instance_id))
            .await?;
        debug!(
            workflow_id = %request.workflow_instance_id,
            child_id = %child_id,
            "Child workflow result delivered"
        );
        Ok(())
    }

    /// Deliver a signal to an `ACTIVE` workflow and schedule a decision.
    ///
    /// Fails with [`Error::WorkflowTerminated`] for a finished workflow,
    /// leaving it untouched.
    pub async fn execute_signal_consumer(
        &self,
        id: &WorkflowId,
        signal: &str,
        args: Vec<Value>,
    ) -> Result<WorkflowInstance> {
        let mut conflicts = 0;
        loop {
            let instance = self.stores.instances.get_instance(id).await?;
            if instance.is_terminal() {
                return Err(Error::WorkflowTerminated {
                    id: id.clone(),
                    status: instance.status,
                    action: "signals",
                });
            }

            let entry = self.registry.workflow(&instance.workflow_type)?;
            let state = entry.apply_signal(&instance, signal, args.clone())?;

            match self
                .stores
                .instances
                .update_instance(
                    id,
                    InstanceMutation::default().with_state(state),
                    instance.version,
                )
                .await
            {
                Ok(updated) => {
                    self.schedule(Timer::decision(id)).await?;
                    info!(workflow_id = %id, signal = %signal, "Signal delivered");
                    return Ok(updated);
                }
                Err(err) if err.is_conflict() && conflicts < self.config.max_conflict_retries => {
                    conflicts += 1;
                    debug!(workflow_id = %id, conflicts, "Signal lost a version race, retrying");
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Invoke the instance's callback handler, if it has one.
    pub async fn process_callback(&self, id: &WorkflowId) -> Result<()> {
        let instance = self.stores.instances.get_instance(id).await?;
        let Some(callback) = &instance.callback else {
            return Ok(());
        };

        let handler = self.registry.callback(callback.as_str())?;
        debug!(workflow_id = %id, callback = %callback, "Invoking callback");
        handler.handle_update(&instance, self).await
    }

    /// Make a failed workflow replayable.
    ///
    /// Converts every recorded error response to transient so the failed
    /// calls are issued again, moves an `ERROR` instance back to `ACTIVE`,
    /// and schedules a decision.
    pub async fn recover_workflow(&self, id: &WorkflowId) -> Result<WorkflowInstance> {
        let instance = self.stores.instances.get_instance(id).await?;
        if instance.status == WorkflowStatus::Completed {
            return Err(Error::WorkflowTerminated {
                id: id.clone(),
                status: instance.status,
                action: "recovery",
            });
        }

        let converted = self
            .stores
            .operations
            .convert_all_error_responses_to_transient(id)
            .await?;

        let instance = if instance.status == WorkflowStatus::Error {
            self.stores
                .instances
                .update_instance(id, InstanceMutation::reactivated(), instance.version)
                .await?
        } else {
            instance
        };

        self.schedule(Timer::decision(id)).await?;
        info!(workflow_id = %id, converted, "Workflow recovered");
        Ok(instance)
    }

    async fn schedule(&self, timer: Timer) -> Result<Timer> {
        self.stores.timers.create_or_update(timer).await
    }
}

/// Requests the synchronous path may execute in-process.
fn inline_requests(outcome: &DecisionOutcome) -> Option<&NonEmpty<OperationRequest>> {
    match outcome {
        DecisionOutcome::Active {
            suspension: Suspension::Requests(requests),
            ..
        } if requests
            .iter()
            .all(|request| request.operation_type.kind != OperationKind::Workflow) =>
        {
            Some(requests)
        }
        _ => None,
    }
}
