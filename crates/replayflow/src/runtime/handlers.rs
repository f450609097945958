//! Timer handlers: one per [`TimerKind`].

use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::instance::WorkflowId;
use crate::operation::OperationRequestId;
use crate::timer::{Timer, TimerKind};

/// Processes a fired timer of one kind.
///
/// Returning `Ok` lets the processor delete the timer. Returning `Err`
/// leaves it leased; it is redelivered once the lease expires.
#[async_trait]
pub(crate) trait TimerHandler: Send + Sync {
    async fn process(&self, timer: &Timer, engine: &Engine) -> Result<()>;
}

#[derive(Debug, Deserialize)]
struct DecisionPayload {
    workflow_id: WorkflowId,
}

#[derive(Debug, Deserialize)]
struct OperationPayload {
    request_id: OperationRequestId,
}

#[derive(Debug, Deserialize)]
struct CallbackPayload {
    workflow_id: WorkflowId,
}

fn decode<T: DeserializeOwned>(timer: &Timer) -> Result<T> {
    serde_json::from_value(timer.payload.clone()).map_err(|source| Error::InvalidTimerPayload {
        timer_id: timer.id.to_string(),
        kind: timer.kind.as_str(),
        source,
    })
}

struct DecisionHandler;

#[async_trait]
impl TimerHandler for DecisionHandler {
    async fn process(&self, timer: &Timer, engine: &Engine) -> Result<()> {
        let payload: DecisionPayload = decode(timer)?;
        engine.process_decision(&payload.workflow_id).await
    }
}

struct OperationRequestHandler;

#[async_trait]
impl TimerHandler for OperationRequestHandler {
    async fn process(&self, timer: &Timer, engine: &Engine) -> Result<()> {
        let payload: OperationPayload = decode(timer)?;
        engine.process_operation_request(&payload.request_id).await
    }
}

struct CallbackTimerHandler;

#[async_trait]
impl TimerHandler for CallbackTimerHandler {
    async fn process(&self, timer: &Timer, engine: &Engine) -> Result<()> {
        let payload: CallbackPayload = decode(timer)?;
        engine.process_callback(&payload.workflow_id).await
    }
}

/// Route a timer to the handler for its kind.
pub(crate) async fn handle(timer: &Timer, engine: &Engine) -> Result<()> {
    let handler: &dyn TimerHandler = match timer.kind {
        TimerKind::Decision => &DecisionHandler,
        TimerKind::OperationRequest => &OperationRequestHandler,
        TimerKind::Callback => &CallbackTimerHandler,
    };
    handler.process(timer, engine).await
}
