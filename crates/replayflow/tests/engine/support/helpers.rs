use std::time::Duration;

use anyhow::{Result, bail};
use replayflow::{
    Engine, EngineConfig, MemoryStore, NewWorkflowInstance, OperationResponse, Registry,
    RuntimeConfig, Stores, Timer, TimerKind, TimerProcessor, WorkflowId, WorkflowInstance,
    WorkflowStatus,
};

use super::workflows::{
    ApprovalWorkflow, AuditCallback, FanOutWorkflow, HelloWorkflow, ParentWorkflow,
    ReserveWorkflow, RetryWorkflow, TestOperations,
};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(20);
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(10);
pub const AUDIT_CALLBACK: &str = "audit";

/// Safety valve for [`TestApp::drain`].
const MAX_DRAIN_ROUNDS: usize = 100;

/// Fast runtime config for tests.
pub fn test_runtime_config() -> RuntimeConfig {
    RuntimeConfig {
        poll_interval: Duration::from_millis(10),
        lease_duration: Duration::from_secs(30),
        shutdown_timeout: Duration::from_secs(5),
        worker_id: Some("test-worker".into()),
        ..Default::default()
    }
}

/// An engine over an in-memory store, with every test workflow registered.
///
/// Tests drive timers explicitly with [`step`](Self::step) and
/// [`drain`](Self::drain), or hand the engine to a running processor.
pub struct TestApp {
    pub engine: Engine,
    pub store: MemoryStore,
    pub ops: TestOperations,
    pub audit: AuditCallback,
    pub processor: TimerProcessor,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn synchronous() -> Self {
        Self::with_config(EngineConfig {
            synchronous_operations: true,
            ..Default::default()
        })
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Self::on_store(MemoryStore::new(), config)
    }

    pub fn on_store(store: MemoryStore, config: EngineConfig) -> Self {
        let stores = Stores::from(store.clone());
        Self::with_stores(store, stores, config)
    }

    /// Run the engine against `stores`, inspecting through `store`.
    pub fn with_stores(store: MemoryStore, stores: Stores, config: EngineConfig) -> Self {
        let ops = TestOperations::default();
        let audit = AuditCallback::default();

        let registry = Registry::builder()
            .workflow::<HelloWorkflow>()
            .workflow::<RetryWorkflow>()
            .workflow::<ApprovalWorkflow>()
            .workflow::<ReserveWorkflow>()
            .workflow::<ParentWorkflow>()
            .workflow::<FanOutWorkflow>()
            .shared_operation(ops.greeter.clone())
            .shared_operation(ops.flaky.clone())
            .shared_operation(ops.inventory.clone())
            .callback(AUDIT_CALLBACK, audit.clone())
            .build()
            .expect("test registry is valid");

        let engine = Engine::new(registry, stores).with_config(config);
        let processor = TimerProcessor::new(engine.clone(), test_runtime_config());

        Self {
            engine,
            store,
            ops,
            audit,
            processor,
        }
    }

    pub async fn start(&self, request: NewWorkflowInstance) -> Result<WorkflowInstance> {
        Ok(self.engine.create_workflow_instance(request).await?)
    }

    /// Dispatch one batch of due timers.
    pub async fn step(&self) -> Result<usize> {
        Ok(self.processor.run_once().await?)
    }

    /// Dispatch due timers until none are left. Returns the total dispatched.
    pub async fn drain(&self) -> Result<usize> {
        let mut total = 0;
        for _ in 0..MAX_DRAIN_ROUNDS {
            let dispatched = self.step().await?;
            if dispatched == 0 {
                return Ok(total);
            }
            total += dispatched;
        }
        bail!("timers still due after {MAX_DRAIN_ROUNDS} rounds")
    }

    pub async fn instance(&self, id: &WorkflowId) -> Result<WorkflowInstance> {
        Ok(self.engine.get_workflow_instance(id).await?)
    }

    pub async fn history(&self, id: &WorkflowId) -> Result<Vec<OperationResponse>> {
        Ok(self.engine.operation_history(id, true).await?)
    }

    pub async fn timers(&self) -> Vec<Timer> {
        self.store.timers().await
    }

    /// Kinds of the stored timers, ordered by timer id.
    pub async fn timer_kinds(&self) -> Vec<TimerKind> {
        self.timers().await.into_iter().map(|timer| timer.kind).collect()
    }

    /// Drain timers and return the instance, failing if it is still active.
    pub async fn run_to_end(&self, id: &WorkflowId) -> Result<WorkflowInstance> {
        self.drain().await?;
        let instance = self.instance(id).await?;
        if instance.status == WorkflowStatus::Active {
            bail!("workflow {id} is still active after draining timers");
        }
        Ok(instance)
    }
}
