//! Workflow definitions and the replay control flow they are written against.
//!
//! A workflow is ordinary imperative Rust: a struct whose serialized fields
//! are its persisted state, and a [`run`](Workflow::run) method that calls
//! operations through a [`DecisionContext`]. Every call returns a
//! [`Step`]; the `?` operator unwinds the pass the moment a call has no
//! recorded result yet, and the engine resumes the workflow later by
//! replaying `run` from the top against the grown history.
//!
//! # Determinism
//!
//! `run` must derive its control flow only from its state, its arguments,
//! the values returned by the context, and [`DecisionContext::now`]. Reading
//! the wall clock, random numbers, or external I/O directly breaks replay.
//!
//! # Example
//!
//! ```ignore
//! #[derive(Default, Serialize, Deserialize)]
//! struct Greeter {
//!     greeted: bool,
//! }
//!
//! impl Workflow for Greeter {
//!     const TYPE: &'static str = "greeter";
//!
//!     fn parameters() -> Vec<Parameter> {
//!         vec![Parameter::required("name", ParamType::String)]
//!     }
//!
//!     fn run(&mut self, ctx: &mut DecisionContext<'_>, args: &Arguments) -> Step<Value> {
//!         let name: String = args.decode(0)?;
//!         ctx.call(Call::operation("mailer", "send").arg(name).idempotency_token())?;
//!         self.greeted = true;
//!         Ok(Value::Null)
//!     }
//! }
//! ```

mod context;
mod inspector;

use std::fmt;
use std::time::Duration;

use nonempty::NonEmpty;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

pub use context::{Call, DecisionContext, Join};
pub use inspector::WorkflowInspector;

use crate::operation::{OperationError, OperationRequest};
use crate::signature::{Arguments, Parameter};

/// Result of one workflow step.
pub type Step<T> = Result<T, Interrupt>;

/// Why a workflow step did not produce a value.
#[derive(Debug, Clone, PartialEq)]
pub enum Interrupt {
    /// The pass must stop; the workflow resumes when the suspension resolves.
    Suspend(Suspension),
    /// A recorded operation failure. Workflows may catch and handle it.
    Failed(OperationError),
    /// A [`DecisionContext::wait_until`] deadline passed with the condition
    /// still false. Workflows may catch and handle it.
    WaitTimeout,
    /// Any other fault. Drives the instance to `ERROR` if it escapes `run`.
    Fault(String),
}

impl Interrupt {
    pub fn fault(reason: impl Into<String>) -> Self {
        Interrupt::Fault(reason.into())
    }

    pub fn is_suspend(&self) -> bool {
        matches!(self, Interrupt::Suspend(_))
    }
}

impl fmt::Display for Interrupt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Interrupt::Suspend(Suspension::Requests(requests)) => {
                write!(f, "suspended on {} operation request(s)", requests.len())
            }
            Interrupt::Suspend(Suspension::Wait(delay)) => write!(f, "suspended for {delay:?}"),
            Interrupt::Failed(error) => write!(f, "operation failed: {error}"),
            Interrupt::WaitTimeout => f.write_str("wait timed out"),
            Interrupt::Fault(reason) => f.write_str(reason),
        }
    }
}

impl From<serde_json::Error> for Interrupt {
    fn from(err: serde_json::Error) -> Self {
        Interrupt::Fault(format!("serialization error: {err}"))
    }
}

impl From<OperationError> for Interrupt {
    fn from(err: OperationError) -> Self {
        Interrupt::Failed(err)
    }
}

/// What a suspended pass is waiting for.
///
/// New requests and a wait are never combined: a pass that has requests to
/// issue issues them, and the wait is recomputed on a later pass.
#[derive(Debug, Clone, PartialEq)]
pub enum Suspension {
    Requests(NonEmpty<OperationRequest>),
    Wait(Duration),
}

impl Suspension {
    /// Combine the suspensions of two joined calls.
    pub(crate) fn merge(self, other: Suspension) -> Suspension {
        match (self, other) {
            (Suspension::Requests(mut a), Suspension::Requests(b)) => {
                for request in b {
                    a.push(request);
                }
                Suspension::Requests(a)
            }
            (Suspension::Requests(a), Suspension::Wait(_))
            | (Suspension::Wait(_), Suspension::Requests(a)) => Suspension::Requests(a),
            (Suspension::Wait(a), Suspension::Wait(b)) => Suspension::Wait(a.min(b)),
        }
    }
}

/// Handler for a named signal.
pub type SignalHandler<W> = fn(&mut W, &Arguments) -> Step<()>;

/// A signal a workflow accepts while `ACTIVE`.
///
/// Signal handlers mutate state only; they run without history and must not
/// call operations.
pub struct Signal<W> {
    pub name: &'static str,
    pub parameters: Vec<Parameter>,
    pub handler: SignalHandler<W>,
}

impl<W> Signal<W> {
    pub fn new(name: &'static str, handler: SignalHandler<W>) -> Self {
        Self {
            name,
            parameters: Vec::new(),
            handler,
        }
    }

    pub fn param(mut self, parameter: Parameter) -> Self {
        self.parameters.push(parameter);
        self
    }
}

impl<W> fmt::Debug for Signal<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("name", &self.name)
            .field("parameters", &self.parameters)
            .finish_non_exhaustive()
    }
}

/// A durable workflow definition.
///
/// The implementing struct's serialized fields are the persisted state. It
/// must serialize to a JSON object, and `Default` must produce a fresh
/// instance; both are checked when the workflow is registered.
pub trait Workflow: Serialize + DeserializeOwned + Default + Send + 'static {
    /// Unique identifier for this workflow type.
    const TYPE: &'static str;

    /// Name of the entry method.
    const ENTRY: &'static str = "run";

    /// Declared entry-method parameters.
    fn parameters() -> Vec<Parameter> {
        Vec::new()
    }

    /// The entry method, replayed from the top on every decision pass.
    ///
    /// Returns the workflow result; `Value::Null` means no result.
    fn run(&mut self, ctx: &mut DecisionContext<'_>, args: &Arguments) -> Step<Value>;

    /// Declared signal handlers.
    fn signals() -> Vec<Signal<Self>> {
        Vec::new()
    }
}
