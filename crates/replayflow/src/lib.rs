//! Durable workflow engine built on deterministic replay.
//!
//! Replayflow runs long-lived business processes written as ordinary Rust:
//!
//! - **Replay, not snapshots** — a workflow's entry method is re-executed from
//!   the top on every decision pass; operation calls that already have a
//!   recorded response return it, the first one without suspends the pass
//! - **Durable operations** — side effects go through registered
//!   [`Operation`]s, executed at most once per successful response, with
//!   per-call [`RetryStrategy`]
//! - **Durable timers** — every unit of work is a leased [`Timer`], so work
//!   survives crashes and is redelivered after the lease expires
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                            TimerProcessor                            │
//! │   lease due timers ──► decision | operation request | callback       │
//! └──────────────┬───────────────────────────┬────────────────────┬──────┘
//!                ▼                           ▼                    ▼
//!   Engine::process_decision   Engine::process_operation_request  Engine::process_callback
//!   1. load instance + history  1. execute one attempt             invoke the instance's
//!   2. replay `run`             2. record response                 CallbackHandler
//!   3. persist state / result   3. schedule retry or decision
//!   4. schedule requests, waits
//! ```
//!
//! # Example
//!
//! ```ignore
//! use replayflow::{
//!     Arguments, Call, DecisionContext, Engine, MemoryStore, NewWorkflowInstance,
//!     ParamType, Parameter, Registry, RuntimeConfig, Step, TimerProcessor, Workflow,
//! };
//!
//! #[derive(Default, Serialize, Deserialize)]
//! struct Onboarding {
//!     welcomed: bool,
//! }
//!
//! impl Workflow for Onboarding {
//!     const TYPE: &'static str = "onboarding";
//!
//!     fn parameters() -> Vec<Parameter> {
//!         vec![Parameter::required("email", ParamType::String)]
//!     }
//!
//!     fn run(&mut self, ctx: &mut DecisionContext<'_>, args: &Arguments) -> Step<Value> {
//!         let email: String = args.decode(0)?;
//!         ctx.call(Call::operation("mailer", "send_welcome").arg(email))?;
//!         self.welcomed = true;
//!         ctx.sleep(Duration::from_secs(86_400))?;
//!         ctx.call(Call::operation("mailer", "send_tips").arg(args.decode::<String>(0)?))
//!     }
//! }
//!
//! let registry = Registry::builder()
//!     .workflow::<Onboarding>()
//!     .operation(Mailer::new(smtp))
//!     .build()?;
//! let engine = Engine::new(registry, MemoryStore::new());
//!
//! engine
//!     .create_workflow_instance(NewWorkflowInstance::new("onboarding").arg("ada@example.com"))
//!     .await?;
//!
//! TimerProcessor::new(engine, RuntimeConfig::default())
//!     .run(async { tokio::signal::ctrl_c().await.ok(); })
//!     .await?;
//! ```
//!
//! # Design Documentation
//!
//! See `DESIGN.md` for design decisions.

mod callback;
mod decider;
mod engine;
mod error;
mod instance;
pub mod operation;
pub mod runtime;
mod signature;
pub mod store;
mod timer;
mod workflow;

pub use callback::{CHILD_COMPLETION_CALLBACK, CallbackHandler};
pub use decider::DecisionOutcome;
pub use engine::{Engine, EngineConfig};
pub use error::{Error, Result};
pub use instance::{
    CallbackRef, InstanceMutation, NewWorkflowInstance, StateMap, WorkflowId, WorkflowInstance,
    WorkflowStatus,
};
pub use operation::{
    Method, Operation, OperationContext, OperationError, OperationFault, OperationKind,
    OperationRequest, OperationRequestId, OperationResponse, OperationType, RetryStrategy,
};
pub use runtime::{Registry, RegistryBuilder, RuntimeConfig, TimerProcessor};
pub use signature::{ArgumentError, Arguments, ParamType, Parameter};
pub use store::{MemoryStore, Stores};
pub use timer::{Timer, TimerId, TimerKind};
pub use workflow::{
    Call, DecisionContext, Interrupt, Join, Signal, SignalHandler, Step, Suspension, Workflow,
    WorkflowInspector,
};

// Re-export for workflow and operation implementations
pub use nonempty::NonEmpty;
pub use serde_json::Value;
