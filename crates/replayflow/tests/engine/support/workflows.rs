//! Workflows and operations exercised by the engine tests.
//!
//! Operations:
//! - `greeter.greet(name)` returns a greeting
//! - `flaky.attempt()` fails with a retriable fault a configurable number of times
//! - `inventory.reserve(sku)` fails with the declared `OutOfStock` fault while
//!   the shelf is empty
//!
//! Workflows cover a single call, retries, waits with signals, child
//! workflows, and joins.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use replayflow::{
    Arguments, Call, CallbackHandler, DecisionContext, Engine, Interrupt, Method, Operation,
    OperationContext, OperationFault, ParamType, Parameter, RetryStrategy, Signal, Step, Value,
    Workflow, WorkflowInstance,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::Mutex;

// =============================================================================
// Operations
// =============================================================================

#[derive(Default)]
pub struct Greeter {
    pub calls: AtomicU32,
}

#[async_trait]
impl Operation for Greeter {
    fn operation_type(&self) -> &'static str {
        "greeter"
    }

    fn methods(&self) -> Vec<Method> {
        vec![Method::new("greet").param(Parameter::required("name", ParamType::String))]
    }

    async fn invoke(
        &self,
        _method: &str,
        args: Arguments,
        _ctx: &OperationContext,
    ) -> Result<Option<Value>, OperationFault> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let name: String = args.decode(0)?;
        Ok(Some(json!(format!("Hello, {name}!"))))
    }
}

/// Fails `failures` times before succeeding.
#[derive(Default)]
pub struct Flaky {
    pub failures: AtomicU32,
    pub calls: AtomicU32,
}

#[async_trait]
impl Operation for Flaky {
    fn operation_type(&self) -> &'static str {
        "flaky"
    }

    fn methods(&self) -> Vec<Method> {
        vec![Method::new("attempt")]
    }

    async fn invoke(
        &self,
        _method: &str,
        _args: Arguments,
        ctx: &OperationContext,
    ) -> Result<Option<Value>, OperationFault> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call <= self.failures.load(Ordering::SeqCst) {
            return Err(OperationFault::new(
                "Unavailable",
                format!("attempt {} failed", ctx.attempt),
            ));
        }
        Ok(Some(json!(call)))
    }
}

pub struct Inventory {
    pub in_stock: AtomicBool,
}

impl Default for Inventory {
    fn default() -> Self {
        Self {
            in_stock: AtomicBool::new(true),
        }
    }
}

#[async_trait]
impl Operation for Inventory {
    fn operation_type(&self) -> &'static str {
        "inventory"
    }

    fn methods(&self) -> Vec<Method> {
        vec![
            Method::new("reserve")
                .param(Parameter::required("sku", ParamType::String))
                .declares("OutOfStock"),
        ]
    }

    async fn invoke(
        &self,
        _method: &str,
        args: Arguments,
        _ctx: &OperationContext,
    ) -> Result<Option<Value>, OperationFault> {
        let sku: String = args.decode(0)?;
        if !self.in_stock.load(Ordering::SeqCst) {
            return Err(OperationFault::new("OutOfStock", format!("{sku} is sold out")));
        }
        Ok(Some(json!({ "sku": sku, "reserved": true })))
    }
}

/// Shared handles to every test operation.
#[derive(Clone, Default)]
pub struct TestOperations {
    pub greeter: Arc<Greeter>,
    pub flaky: Arc<Flaky>,
    pub inventory: Arc<Inventory>,
}

// =============================================================================
// Callbacks
// =============================================================================

/// Records every instance it is notified about.
#[derive(Clone, Default)]
pub struct AuditCallback {
    pub seen: Arc<Mutex<Vec<WorkflowInstance>>>,
}

#[async_trait]
impl CallbackHandler for AuditCallback {
    async fn handle_update(
        &self,
        instance: &WorkflowInstance,
        _engine: &Engine,
    ) -> replayflow::Result<()> {
        self.seen.lock().await.push(instance.clone());
        Ok(())
    }
}

// =============================================================================
// Workflows
// =============================================================================

/// Greets once and returns the greeting.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct HelloWorkflow {
    pub greeting: Option<String>,
}

impl Workflow for HelloWorkflow {
    const TYPE: &'static str = "hello";

    fn parameters() -> Vec<Parameter> {
        vec![Parameter::required("name", ParamType::String)]
    }

    fn run(&mut self, ctx: &mut DecisionContext<'_>, args: &Arguments) -> Step<Value> {
        let name: String = args.decode(0)?;
        let greeting: String = ctx.call_as(Call::operation("greeter", "greet").arg(name))?;
        self.greeting = Some(greeting.clone());
        Ok(json!(greeting))
    }
}

/// Calls `flaky.attempt` with two immediate retries.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct RetryWorkflow {}

impl Workflow for RetryWorkflow {
    const TYPE: &'static str = "retrying";

    fn run(&mut self, ctx: &mut DecisionContext<'_>, _args: &Arguments) -> Step<Value> {
        ctx.call(Call::operation("flaky", "attempt").retry(RetryStrategy::fixed(Duration::ZERO, 2)))
    }
}

/// Waits for an approval signal, or gives up after `timeout_ms`.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ApprovalWorkflow {
    pub approved_by: Option<String>,
}

impl ApprovalWorkflow {
    fn approve(&mut self, args: &Arguments) -> Step<()> {
        let approver: String = args.decode(0)?;
        if approver.is_empty() {
            return Err(Interrupt::fault("approver must not be empty"));
        }
        self.approved_by = Some(approver);
        Ok(())
    }
}

impl Workflow for ApprovalWorkflow {
    const TYPE: &'static str = "approval";

    fn parameters() -> Vec<Parameter> {
        vec![Parameter::required("timeout_ms", ParamType::Integer)]
    }

    fn run(&mut self, ctx: &mut DecisionContext<'_>, args: &Arguments) -> Step<Value> {
        let timeout = Duration::from_millis(args.decode(0)?);
        match ctx.wait_until(self.approved_by.is_some(), timeout) {
            Ok(()) => Ok(json!({ "approved_by": self.approved_by })),
            Err(Interrupt::WaitTimeout) => Ok(json!("expired")),
            Err(other) => Err(other),
        }
    }

    fn signals() -> Vec<Signal<Self>> {
        vec![
            Signal::new("approve", Self::approve)
                .param(Parameter::required("approver", ParamType::String)),
        ]
    }
}

/// Reserves one SKU.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ReserveWorkflow {
    pub reserved: bool,
}

impl Workflow for ReserveWorkflow {
    const TYPE: &'static str = "reserve";

    fn parameters() -> Vec<Parameter> {
        vec![Parameter::required("sku", ParamType::String)]
    }

    fn run(&mut self, ctx: &mut DecisionContext<'_>, args: &Arguments) -> Step<Value> {
        let sku: String = args.decode(0)?;
        let reservation = ctx.call(
            Call::operation("inventory", "reserve")
                .arg(sku)
                .retry(RetryStrategy::Never),
        )?;
        self.reserved = true;
        Ok(reservation)
    }
}

/// Runs a child workflow of the given type and returns its result.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ParentWorkflow {}

impl Workflow for ParentWorkflow {
    const TYPE: &'static str = "parent";

    fn parameters() -> Vec<Parameter> {
        vec![
            Parameter::required("child_type", ParamType::String),
            Parameter::required("child_arg", ParamType::Any),
        ]
    }

    fn run(&mut self, ctx: &mut DecisionContext<'_>, args: &Arguments) -> Step<Value> {
        let child_type: String = args.decode(0)?;
        let child_arg: Value = args.decode(1)?;
        ctx.call(Call::workflow(child_type).arg(child_arg))
    }
}

/// Greets everyone in parallel.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct FanOutWorkflow {
    pub greeted: usize,
}

impl Workflow for FanOutWorkflow {
    const TYPE: &'static str = "fan_out";

    fn parameters() -> Vec<Parameter> {
        vec![Parameter::required("names", ParamType::Array)]
    }

    fn run(&mut self, ctx: &mut DecisionContext<'_>, args: &Arguments) -> Step<Value> {
        let names: Vec<String> = args.decode(0)?;
        let mut join = ctx.join();
        for name in names {
            join = join.call(Call::operation("greeter", "greet").arg(name));
        }
        let greetings = join.finish()?;
        self.greeted = greetings.len();
        Ok(Value::Array(greetings))
    }
}
