//! In-process implementation of the storage contracts.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::Mutex;

use super::{InstanceStore, OperationStore, TimerStore};
use crate::error::{Error, Result};
use crate::instance::{InstanceMutation, WorkflowId, WorkflowInstance};
use crate::operation::{OperationRequest, OperationRequestId, OperationResponse};
use crate::timer::{Timer, TimerId, saturating_add};

#[derive(Default)]
struct Inner {
    instances: BTreeMap<WorkflowId, WorkflowInstance>,
    requests: HashMap<OperationRequestId, OperationRequest>,
    request_order: Vec<OperationRequestId>,
    responses: Vec<OperationResponse>,
    timers: BTreeMap<TimerId, Timer>,
}

/// In-memory store implementing [`InstanceStore`], [`OperationStore`], and
/// [`TimerStore`].
///
/// Clones share the same data. Every call takes one lock for its whole
/// duration, so each operation is atomic with respect to the others.
///
/// # Example
///
/// ```
/// use replayflow::{MemoryStore, Stores};
///
/// let store = MemoryStore::new();
/// let stores = Stores::from(store.clone());
/// ```
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every pending timer, ordered by id.
    pub async fn timers(&self) -> Vec<Timer> {
        self.inner.lock().await.timers.values().cloned().collect()
    }

    /// Every operation request of a workflow, in creation order.
    pub async fn operation_requests(&self, workflow_id: &WorkflowId) -> Vec<OperationRequest> {
        let inner = self.inner.lock().await;
        inner
            .request_order
            .iter()
            .filter_map(|id| inner.requests.get(id))
            .filter(|request| &request.workflow_instance_id == workflow_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl InstanceStore for MemoryStore {
    async fn create_instance(&self, instance: WorkflowInstance) -> Result<WorkflowInstance> {
        let mut inner = self.inner.lock().await;
        if inner.instances.contains_key(&instance.id) {
            return Err(Error::DuplicateWorkflowInstance(instance.id));
        }
        inner
            .instances
            .insert(instance.id.clone(), instance.clone());
        Ok(instance)
    }

    async fn get_instance(&self, id: &WorkflowId) -> Result<WorkflowInstance> {
        self.inner
            .lock()
            .await
            .instances
            .get(id)
            .cloned()
            .ok_or_else(|| Error::WorkflowNotFound(id.clone()))
    }

    async fn find_instances(&self) -> Result<Vec<WorkflowInstance>> {
        Ok(self.inner.lock().await.instances.values().cloned().collect())
    }

    async fn find_by_correlation_id(
        &self,
        workflow_type: &str,
        correlation_id: &str,
    ) -> Result<Option<WorkflowInstance>> {
        Ok(self
            .inner
            .lock()
            .await
            .instances
            .values()
            .find(|instance| {
                instance.workflow_type == workflow_type
                    && instance.correlation_id.as_deref() == Some(correlation_id)
            })
            .cloned())
    }

    async fn update_instance(
        &self,
        id: &WorkflowId,
        mutation: InstanceMutation,
        expected_version: u64,
    ) -> Result<WorkflowInstance> {
        let mut inner = self.inner.lock().await;
        let instance = inner
            .instances
            .get_mut(id)
            .ok_or_else(|| Error::WorkflowNotFound(id.clone()))?;

        if instance.version != expected_version {
            return Err(Error::VersionConflict {
                id: id.clone(),
                expected: expected_version,
                actual: instance.version,
            });
        }

        instance.apply(mutation)?;
        Ok(instance.clone())
    }
}

#[async_trait]
impl OperationStore for MemoryStore {
    async fn create_operation_request(&self, request: OperationRequest) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        if inner.requests.contains_key(&request.id) {
            return Ok(false);
        }
        inner.request_order.push(request.id);
        inner.requests.insert(request.id, request);
        Ok(true)
    }

    async fn get_operation_request(&self, id: &OperationRequestId) -> Result<OperationRequest> {
        self.inner
            .lock()
            .await
            .requests
            .get(id)
            .cloned()
            .ok_or(Error::OperationRequestNotFound(*id))
    }

    async fn increment_failed_attempts(
        &self,
        id: &OperationRequestId,
        expected: u32,
    ) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        let request = inner
            .requests
            .get_mut(id)
            .ok_or(Error::OperationRequestNotFound(*id))?;

        if request.failed_attempts != expected {
            return Ok(false);
        }
        request.failed_attempts += 1;
        Ok(true)
    }

    async fn create_operation_response(&self, response: OperationResponse) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        if !response.is_transient
            && inner
                .responses
                .iter()
                .any(|existing| !existing.is_transient && existing.same_call(&response))
        {
            return Ok(false);
        }
        inner.responses.push(response);
        Ok(true)
    }

    async fn get_operation_responses(
        &self,
        workflow_id: &WorkflowId,
        include_transient: bool,
    ) -> Result<Vec<OperationResponse>> {
        Ok(self
            .inner
            .lock()
            .await
            .responses
            .iter()
            .filter(|response| &response.workflow_instance_id == workflow_id)
            .filter(|response| include_transient || !response.is_transient)
            .cloned()
            .collect())
    }

    async fn convert_all_error_responses_to_transient(
        &self,
        workflow_id: &WorkflowId,
    ) -> Result<u64> {
        let mut inner = self.inner.lock().await;
        let mut converted = 0;
        for response in inner.responses.iter_mut().filter(|response| {
            &response.workflow_instance_id == workflow_id
                && !response.is_success
                && !response.is_transient
        }) {
            response.is_transient = true;
            converted += 1;
        }
        Ok(converted)
    }
}

#[async_trait]
impl TimerStore for MemoryStore {
    async fn create_or_update(&self, mut timer: Timer) -> Result<Timer> {
        let mut inner = self.inner.lock().await;
        timer.version = match inner.timers.get(&timer.id) {
            Some(existing) => existing.version + 1,
            None => 0,
        };
        inner.timers.insert(timer.id.clone(), timer.clone());
        Ok(timer)
    }

    async fn get_timer(&self, id: &TimerId) -> Result<Option<Timer>> {
        Ok(self.inner.lock().await.timers.get(id).cloned())
    }

    async fn delete(&self, timer: &Timer) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        match inner.timers.get(&timer.id) {
            Some(current) if current.version == timer.version => {
                inner.timers.remove(&timer.id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get_expired_timers(&self, limit: usize, lease: Duration) -> Result<Vec<Timer>> {
        let now = OffsetDateTime::now_utc();
        let mut inner = self.inner.lock().await;

        let mut due: Vec<&mut Timer> = inner
            .timers
            .values_mut()
            .filter(|timer| timer.is_due(now))
            .collect();
        due.sort_by_key(|timer| timer.timeout);

        Ok(due
            .into_iter()
            .take(limit)
            .map(|timer| {
                timer.timeout = saturating_add(now, lease);
                timer.version += 1;
                timer.retries += 1;
                timer.clone()
            })
            .collect())
    }
}
