//! Invokes one operation request and classifies the outcome.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{debug, warn};

use super::context::OperationContext;
use super::handler::{FaultKind, Method, Operation, OperationFault};
use super::{OperationError, OperationKind, OperationRequest};
use crate::signature;

/// Classification of one execution attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStatus {
    Completed,
    /// Worth another attempt if the retry strategy allows it.
    RetriableError,
    /// Recorded as a permanent failure the workflow observes.
    NonRetriableError,
}

/// Result of [`OperationExecutor::execute`].
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionOutcome {
    pub status: ExecutionStatus,
    pub result: Option<Value>,
    pub error: Option<OperationError>,
    /// Wall-clock time spent, recorded on failures too.
    pub duration: Duration,
}

impl ExecutionOutcome {
    fn completed(result: Option<Value>, duration: Duration) -> Self {
        Self {
            status: ExecutionStatus::Completed,
            result,
            error: None,
            duration,
        }
    }

    fn failed(status: ExecutionStatus, error: OperationError, duration: Duration) -> Self {
        Self {
            status,
            result: None,
            error: Some(error),
            duration,
        }
    }

    pub fn is_retriable(&self) -> bool {
        self.status == ExecutionStatus::RetriableError
    }
}

struct RegisteredOperation {
    operation: Arc<dyn Operation>,
    methods: Vec<Method>,
}

/// Routes operation requests to registered [`Operation`] implementations.
///
/// Method signatures are captured once at registration and used to validate
/// persisted arguments before every invocation.
#[derive(Default)]
pub struct OperationExecutor {
    operations: HashMap<&'static str, RegisteredOperation>,
}

impl OperationExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an operation. Returns `false` if its type is already taken.
    pub(crate) fn insert(&mut self, operation: Arc<dyn Operation>) -> bool {
        let operation_type = operation.operation_type();
        if self.operations.contains_key(operation_type) {
            return false;
        }
        let methods = operation.methods();
        self.operations.insert(
            operation_type,
            RegisteredOperation { operation, methods },
        );
        true
    }

    /// Returns `true` if an operation is registered under `operation_type`.
    pub fn contains(&self, operation_type: &str) -> bool {
        self.operations.contains_key(operation_type)
    }

    /// Returns the number of registered operations.
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Execute one attempt of `request`.
    ///
    /// Never fails: every problem, including an unknown target or a
    /// signature mismatch, is folded into the returned outcome.
    pub async fn execute(&self, request: &OperationRequest) -> ExecutionOutcome {
        let started = Instant::now();

        let non_retriable = |kind: &str, message: String| {
            ExecutionOutcome::failed(
                ExecutionStatus::NonRetriableError,
                OperationError::new(kind, message),
                started.elapsed(),
            )
        };

        match request.operation_type.kind {
            OperationKind::Operation => {}
            OperationKind::Timeout => {
                return non_retriable(OperationError::WAIT_TIMEOUT, "wait timed out".to_owned());
            }
            OperationKind::Workflow => {
                return non_retriable(
                    OperationError::UNKNOWN_OPERATION,
                    format!(
                        "{} is a child workflow and cannot be executed as an operation",
                        request.operation_type
                    ),
                );
            }
        }

        let target = &request.operation_type.target;
        let method_name = &request.operation_type.method;

        let Some(registered) = self.operations.get(target.as_str()) else {
            warn!(operation = %request.operation_type, "Unknown operation type");
            return non_retriable(
                OperationError::UNKNOWN_OPERATION,
                format!("no operation registered for type {target}"),
            );
        };

        let Some(method) = registered.methods.iter().find(|m| m.name == method_name) else {
            warn!(operation = %request.operation_type, "Unknown operation method");
            return non_retriable(
                OperationError::UNKNOWN_OPERATION,
                format!("operation {target} has no method {method_name}"),
            );
        };

        let args = match signature::bind(&method.parameters, request.arguments.clone()) {
            Ok(args) => args,
            Err(err) => {
                return non_retriable(
                    OperationError::INVALID_ARGUMENT,
                    format!("{}: {err}", request.operation_type),
                );
            }
        };

        let ctx = OperationContext::for_request(request);
        debug!(
            request_id = %request.id,
            operation = %request.operation_type,
            attempt = ctx.attempt,
            "Invoking operation"
        );

        let invocation = registered.operation.invoke(method_name, args, &ctx);
        let result = match request.timeout {
            Some(limit) => match tokio::time::timeout(limit, invocation).await {
                Ok(result) => result,
                Err(_) => {
                    return ExecutionOutcome::failed(
                        ExecutionStatus::RetriableError,
                        OperationError::new(
                            OperationError::TIMED_OUT,
                            format!("{} exceeded {limit:?}", request.operation_type),
                        ),
                        started.elapsed(),
                    );
                }
            },
            None => invocation.await,
        };

        match result {
            Ok(value) => ExecutionOutcome::completed(value, started.elapsed()),
            Err(fault) => {
                let status = classify(method, &fault);
                ExecutionOutcome::failed(status, fault.into_error(), started.elapsed())
            }
        }
    }
}

/// Decide whether a fault is worth retrying.
///
/// Null-value and bad-argument faults are never retried, nor are faults the
/// method declares. Anything else is assumed transient.
pub(crate) fn classify(method: &Method, fault: &OperationFault) -> ExecutionStatus {
    match &fault.kind {
        FaultKind::NullValue | FaultKind::InvalidArgument => ExecutionStatus::NonRetriableError,
        FaultKind::Named(kind) if method.declares_fault(kind) => {
            ExecutionStatus::NonRetriableError
        }
        FaultKind::Named(_) => ExecutionStatus::RetriableError,
    }
}
