//! Operation trait for external side-effecting calls.

use std::fmt;

use async_trait::async_trait;
use serde_json::Value;

use super::OperationError;
use super::context::OperationContext;
use crate::signature::{Arguments, Parameter};

/// Declared signature of one operation method.
///
/// # Example
///
/// ```
/// use replayflow::{Method, ParamType, Parameter};
///
/// let charge = Method::new("charge")
///     .param(Parameter::required("amount_cents", ParamType::Integer))
///     .param(Parameter::required("token", ParamType::String))
///     .declares("CardDeclined");
/// assert_eq!(charge.parameters.len(), 2);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Method {
    pub name: &'static str,
    pub parameters: Vec<Parameter>,
    /// Fault kinds this method documents as part of its contract. They are
    /// business outcomes, not outages, and are never retried.
    pub declared_faults: Vec<&'static str>,
}

impl Method {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            parameters: Vec::new(),
            declared_faults: Vec::new(),
        }
    }

    pub fn param(mut self, parameter: Parameter) -> Self {
        self.parameters.push(parameter);
        self
    }

    pub fn declares(mut self, fault_kind: &'static str) -> Self {
        self.declared_faults.push(fault_kind);
        self
    }

    /// Returns `true` if `kind` is part of this method's declared contract.
    pub fn declares_fault(&self, kind: &str) -> bool {
        self.declared_faults.contains(&kind)
    }
}

/// Classification of an [`OperationFault`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FaultKind {
    /// A required value was missing. Never retried.
    NullValue,
    /// The call was malformed. Never retried.
    InvalidArgument,
    /// Any other named fault. Retried unless the method declares it.
    Named(String),
}

impl FaultKind {
    pub fn as_str(&self) -> &str {
        match self {
            FaultKind::NullValue => OperationError::NULL_VALUE,
            FaultKind::InvalidArgument => OperationError::INVALID_ARGUMENT,
            FaultKind::Named(name) => name,
        }
    }
}

/// Failure raised by an [`Operation`] invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationFault {
    pub kind: FaultKind,
    pub message: String,
}

impl OperationFault {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: FaultKind::Named(kind.into()),
            message: message.into(),
        }
    }

    pub fn null_value(message: impl Into<String>) -> Self {
        Self {
            kind: FaultKind::NullValue,
            message: message.into(),
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self {
            kind: FaultKind::InvalidArgument,
            message: message.into(),
        }
    }

    /// Convert to the recorded form.
    pub fn into_error(self) -> OperationError {
        OperationError::new(self.kind.as_str(), self.message)
    }
}

impl fmt::Display for OperationFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.as_str(), self.message)
    }
}

impl std::error::Error for OperationFault {}

impl From<serde_json::Error> for OperationFault {
    fn from(err: serde_json::Error) -> Self {
        Self::invalid_argument(err.to_string())
    }
}

/// An external service whose methods workflows call.
///
/// Implement this trait for each logical operation type. Workflow code never
/// calls an operation directly: it requests the call through its
/// [`DecisionContext`](crate::DecisionContext), and the engine invokes
/// [`invoke`](Self::invoke) later, from a timer.
///
/// # Results
///
/// | Result | Meaning |
/// |--------|---------|
/// | `Ok(Some(value))` | Success, `value` is replayed to the workflow |
/// | `Ok(None)` | Success with no return value |
/// | `Err(fault)` | Failure, classified by [`FaultKind`] and the method's declared faults |
///
/// # Idempotency
///
/// Operations have **at-least-once** delivery semantics. A method may run
/// more than once for the same request after a crash or a lease expiry. Use
/// [`OperationContext::idempotency_key()`] or an argument marked with
/// [`Call::idempotency_token`](crate::Call::idempotency_token) to dedupe in
/// the external system.
///
/// # Example
///
/// ```ignore
/// struct Payments { client: PaymentClient }
///
/// #[async_trait]
/// impl Operation for Payments {
///     fn operation_type(&self) -> &'static str {
///         "payments"
///     }
///
///     fn methods(&self) -> Vec<Method> {
///         vec![Method::new("charge")
///             .param(Parameter::required("amount", ParamType::Integer))
///             .declares("CardDeclined")]
///     }
///
///     async fn invoke(
///         &self,
///         method: &str,
///         args: Arguments,
///         ctx: &OperationContext,
///     ) -> Result<Option<Value>, OperationFault> {
///         let amount: i64 = args.decode(0)?;
///         let receipt = self.client
///             .charge(amount, ctx.idempotency_key())
///             .await
///             .map_err(|e| OperationFault::new("Network", e.to_string()))?;
///         Ok(Some(serde_json::to_value(receipt)?))
///     }
/// }
/// ```
#[async_trait]
pub trait Operation: Send + Sync + 'static {
    /// Logical type name workflows address this operation by.
    fn operation_type(&self) -> &'static str;

    /// Declared methods and their signatures.
    fn methods(&self) -> Vec<Method>;

    /// Invoke `method` with already-validated arguments.
    async fn invoke(
        &self,
        method: &str,
        args: Arguments,
        ctx: &OperationContext,
    ) -> Result<Option<Value>, OperationFault>;
}
