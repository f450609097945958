//! Decision context: the interception layer between workflow code and history.

use std::collections::HashMap;
use std::time::Duration;

use nonempty::NonEmpty;
use serde::de::DeserializeOwned;
use serde_json::Value;
use time::OffsetDateTime;

use super::{Interrupt, Step, Suspension, Workflow};
use crate::instance::WorkflowId;
use crate::operation::{
    OperationError, OperationKind, OperationRequest, OperationRequestId, OperationResponse,
    OperationType, RetryStrategy,
};

const WAIT_TIMEOUT_TARGET: &str = "replayflow";
const WAIT_TIMEOUT_METHOD: &str = "wait_timeout";

#[derive(Debug, Clone, PartialEq)]
enum CallArg {
    Value(Value),
    IdempotencyToken,
}

/// Description of one operation or child-workflow call.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use replayflow::{Call, RetryStrategy};
///
/// let call = Call::operation("payments", "charge")
///     .arg(1999)
///     .idempotency_token()
///     .retry(RetryStrategy::fixed(Duration::from_secs(5), 3))
///     .timeout(Duration::from_secs(30));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    operation_type: OperationType,
    args: Vec<CallArg>,
    retry_strategy: RetryStrategy,
    timeout: Option<Duration>,
}

impl Call {
    fn new(operation_type: OperationType) -> Self {
        Self {
            operation_type,
            args: Vec::new(),
            retry_strategy: RetryStrategy::default(),
            timeout: None,
        }
    }

    /// Call `method` on the operation registered as `target`.
    pub fn operation(target: impl Into<String>, method: impl Into<String>) -> Self {
        Self::new(OperationType::operation(target, method))
    }

    /// Start a child workflow of type `workflow_type` and wait for its result.
    pub fn workflow(workflow_type: impl Into<String>) -> Self {
        Self::new(OperationType::new(
            workflow_type,
            "run",
            OperationKind::Workflow,
        ))
    }

    /// Start a child workflow of type `W`.
    pub fn child<W: Workflow>() -> Self {
        Self::new(OperationType::new(W::TYPE, W::ENTRY, OperationKind::Workflow))
    }

    fn wait_timeout() -> Self {
        let mut call = Self::new(OperationType::new(
            WAIT_TIMEOUT_TARGET,
            WAIT_TIMEOUT_METHOD,
            OperationKind::Timeout,
        ));
        call.retry_strategy = RetryStrategy::Never;
        call
    }

    /// Append an argument.
    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.args.push(CallArg::Value(value.into()));
        self
    }

    /// Append an idempotency token argument.
    ///
    /// The token is derived from the request id, so every attempt of this
    /// call presents the same string to the operation.
    pub fn idempotency_token(mut self) -> Self {
        self.args.push(CallArg::IdempotencyToken);
        self
    }

    pub fn retry(mut self, retry_strategy: RetryStrategy) -> Self {
        self.retry_strategy = retry_strategy;
        self
    }

    /// Bound each invocation of the operation.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn operation_type(&self) -> &OperationType {
        &self.operation_type
    }
}

/// Per-pass view of a workflow's history.
///
/// A fresh context is built for every decision pass and dropped when the
/// pass ends. Each [`call`](Self::call) either replays a recorded response
/// or suspends the pass with a new [`OperationRequest`].
///
/// # Iterations
///
/// Calls are matched to history by `(operation type, iteration)`, where the
/// iteration counts earlier calls to the *same* method in this pass. Calls to
/// other methods in between do not shift it, so loops replay stably.
pub struct DecisionContext<'h> {
    workflow_id: WorkflowId,
    now: OffsetDateTime,
    checkpoint: OffsetDateTime,
    history: &'h [OperationResponse],
    iterations: HashMap<OperationType, u32>,
    joining: bool,
}

impl<'h> DecisionContext<'h> {
    /// Build a context for one pass.
    ///
    /// `created_at` is the instance creation time, the checkpoint before any
    /// response has been replayed. Transient responses in `history` are
    /// ignored.
    pub fn new(
        workflow_id: WorkflowId,
        created_at: OffsetDateTime,
        now: OffsetDateTime,
        history: &'h [OperationResponse],
    ) -> Self {
        Self {
            workflow_id,
            now,
            checkpoint: created_at,
            history,
            iterations: HashMap::new(),
            joining: false,
        }
    }

    pub fn workflow_id(&self) -> &WorkflowId {
        &self.workflow_id
    }

    /// Time at which this pass started. Stable for the whole pass.
    pub fn now(&self) -> OffsetDateTime {
        self.now
    }

    /// Creation time of the latest replayed response.
    pub fn checkpoint(&self) -> OffsetDateTime {
        self.checkpoint
    }

    /// Replay or request a call.
    ///
    /// Returns the recorded result (`Value::Null` for none), the recorded
    /// error as [`Interrupt::Failed`], or [`Interrupt::Suspend`] with a new
    /// request.
    pub fn call(&mut self, call: Call) -> Step<Value> {
        let iteration = self
            .iterations
            .get(&call.operation_type)
            .copied()
            .unwrap_or(0);

        if let Some(response) = self.recorded(&call.operation_type, iteration) {
            self.iterations
                .insert(call.operation_type, iteration + 1);
            if response.created_at > self.checkpoint {
                self.checkpoint = response.created_at;
            }
            return match (&response.error, response.is_success) {
                (_, true) => Ok(response.result.clone().unwrap_or(Value::Null)),
                (Some(error), false) => Err(Interrupt::Failed(error.clone())),
                (None, false) => Err(Interrupt::Failed(OperationError::new(
                    "Unknown",
                    "failure recorded without an error",
                ))),
            };
        }

        // Inside a join the next member calling the same method must get the
        // next iteration even though this one is still pending.
        if self.joining {
            self.iterations
                .insert(call.operation_type.clone(), iteration + 1);
        }

        let request = self.request(call, iteration);
        Err(Interrupt::Suspend(Suspension::Requests(NonEmpty::new(
            request,
        ))))
    }

    /// [`call`](Self::call) and decode the result.
    pub fn call_as<T: DeserializeOwned>(&mut self, call: Call) -> Step<T> {
        let value = self.call(call)?;
        Ok(serde_json::from_value(value)?)
    }

    /// Issue several calls in one pass.
    ///
    /// ```ignore
    /// let [a, b]: [Value; 2] = ctx
    ///     .join()
    ///     .call(Call::operation("inventory", "reserve").arg(sku))
    ///     .call(Call::operation("payments", "charge").arg(amount))
    ///     .finish()?
    ///     .try_into()
    ///     .map_err(|_| Interrupt::fault("join arity"))?;
    /// ```
    pub fn join(&mut self) -> Join<'_, 'h> {
        self.joining = true;
        Join {
            ctx: self,
            results: Vec::new(),
        }
    }

    /// Suspend until `condition` holds or `timeout` has elapsed since the
    /// last checkpoint.
    ///
    /// Elapsed time is measured from the checkpoint rather than from the
    /// wall clock, so the outcome is stable under replay. When the timeout
    /// passes, a synthetic timeout operation is recorded first; once it is
    /// in history the wait fails with [`Interrupt::WaitTimeout`].
    pub fn wait_until(&mut self, condition: bool, timeout: Duration) -> Step<()> {
        if condition {
            return Ok(());
        }

        let elapsed = Duration::try_from(self.now - self.checkpoint).unwrap_or(Duration::ZERO);
        if elapsed < timeout {
            return Err(Interrupt::Suspend(Suspension::Wait(timeout - elapsed)));
        }

        match self.call(Call::wait_timeout()) {
            Err(Interrupt::Failed(error)) if error.is_wait_timeout() => Err(Interrupt::WaitTimeout),
            Ok(_) => Err(Interrupt::WaitTimeout),
            Err(other) => Err(other),
        }
    }

    /// Suspend for `duration` measured from the last checkpoint.
    pub fn sleep(&mut self, duration: Duration) -> Step<()> {
        match self.wait_until(false, duration) {
            Err(Interrupt::WaitTimeout) => Ok(()),
            other => other,
        }
    }

    fn recorded(&self, operation_type: &OperationType, iteration: u32) -> Option<&'h OperationResponse> {
        self.history
            .iter()
            .find(|response| !response.is_transient && response.is_for(operation_type, iteration))
    }

    fn request(&self, call: Call, iteration: u32) -> OperationRequest {
        let id = OperationRequestId::derive(&self.workflow_id, &call.operation_type, iteration, 0);
        let arguments = call
            .args
            .into_iter()
            .enumerate()
            .map(|(index, arg)| match arg {
                CallArg::Value(value) => value,
                CallArg::IdempotencyToken => Value::String(id.idempotency_token(index)),
            })
            .collect();

        OperationRequest {
            id,
            workflow_instance_id: self.workflow_id.clone(),
            operation_type: call.operation_type,
            iteration,
            arguments,
            created_at: self.now,
            retry_strategy: call.retry_strategy,
            timeout: call.timeout,
            failed_attempts: 0,
        }
    }
}

/// Fan-out/fan-in over several calls in one pass.
///
/// Every member is issued before the pass suspends, so all pending requests
/// are persisted together.
pub struct Join<'c, 'h> {
    ctx: &'c mut DecisionContext<'h>,
    results: Vec<Step<Value>>,
}

impl Join<'_, '_> {
    /// Add a member call.
    pub fn call(mut self, call: Call) -> Self {
        let result = self.ctx.call(call);
        self.results.push(result);
        self
    }

    /// Collect the members' results in call order.
    ///
    /// Pending members suspend together; otherwise the first recorded
    /// failure is returned.
    pub fn finish(mut self) -> Step<Vec<Value>> {
        let results = std::mem::take(&mut self.results);

        let mut suspension: Option<Suspension> = None;
        let mut failure: Option<Interrupt> = None;
        let mut values = Vec::with_capacity(results.len());

        for result in results {
            match result {
                Ok(value) => values.push(value),
                Err(Interrupt::Suspend(next)) => {
                    suspension = Some(match suspension {
                        Some(current) => current.merge(next),
                        None => next,
                    });
                }
                Err(other) => {
                    if failure.is_none() {
                        failure = Some(other);
                    }
                }
            }
        }

        if let Some(suspension) = suspension {
            return Err(Interrupt::Suspend(suspension));
        }
        match failure {
            Some(interrupt) => Err(interrupt),
            None => Ok(values),
        }
    }
}

impl Drop for Join<'_, '_> {
    fn drop(&mut self) {
        self.ctx.joining = false;
    }
}
