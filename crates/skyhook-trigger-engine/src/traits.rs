//! External collaborator interfaces.
//!
//! The execution engine and the persistence layer live outside this crate;
//! every interaction goes through an async trait. In-memory reference
//! implementations of the stores live in [`defaults`](crate::defaults).

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use super::errors::{EventStoreError, ExecutorError, TriggerStoreError};
use super::types::{DomainEvent, Trigger, TriggerType};

/// Parameters for starting one workflow run.
#[derive(Debug, Clone)]
pub struct WorkflowStart {
    pub workflow_name: String,
    pub version: u32,
    pub inputs: BTreeMap<String, Value>,
    pub workflow_definition_id: String,
    pub project_id: Option<String>,
    pub requested_by: Option<String>,
}

/// The external workflow execution engine.
///
/// DAG scheduling, per-task retries, and run state all belong to the
/// implementation behind this trait; the trigger engine only starts runs.
#[async_trait]
pub trait WorkflowExecutor: Send + Sync {
    /// Start a workflow run, returning its opaque run id.
    async fn start_workflow(&self, start: WorkflowStart) -> Result<String, ExecutorError>;
}

/// Persistence for [`Trigger`] entities.
#[async_trait]
pub trait TriggerStore: Send + Sync {
    async fn find_by_id(&self, id: &str) -> Result<Option<Trigger>, TriggerStoreError>;

    /// All triggers with the given enabled flag and type. The dispatchers'
    /// hot path: every poller tick and every published event calls this.
    async fn find_by_enabled_and_type(
        &self,
        enabled: bool,
        trigger_type: TriggerType,
    ) -> Result<Vec<Trigger>, TriggerStoreError>;

    async fn find_by_project_id(&self, project_id: &str)
        -> Result<Vec<Trigger>, TriggerStoreError>;

    async fn find_by_project_id_and_name(
        &self,
        project_id: &str,
        name: &str,
    ) -> Result<Option<Trigger>, TriggerStoreError>;

    async fn find_by_workflow_definition_id(
        &self,
        workflow_definition_id: &str,
    ) -> Result<Vec<Trigger>, TriggerStoreError>;

    async fn find_by_type(&self, trigger_type: TriggerType)
        -> Result<Vec<Trigger>, TriggerStoreError>;

    async fn find_by_enabled(&self, enabled: bool) -> Result<Vec<Trigger>, TriggerStoreError>;

    /// Upsert. Concurrent saves of the same trigger are last-writer-wins.
    async fn save(&self, trigger: &Trigger) -> Result<(), TriggerStoreError>;

    async fn delete(&self, id: &str) -> Result<(), TriggerStoreError>;
}

/// Persistence for [`DomainEvent`] entities.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Upsert. Concurrent saves of the same event are last-writer-wins.
    async fn save(&self, event: &DomainEvent) -> Result<(), EventStoreError>;

    async fn find_by_id(&self, id: &str) -> Result<Option<DomainEvent>, EventStoreError>;
}

/// Start a workflow with an upper bound on how long the executor may block.
///
/// Dispatchers use this instead of calling the executor directly so a hung
/// execution service surfaces as [`ExecutorError::Timeout`] rather than a
/// stalled tick or an HTTP caller left hanging.
/// Workflow name convention used by every dispatcher: the execution service
/// registers definitions as `workflow_{definition id}`, version 1.
pub(crate) fn workflow_name(workflow_definition_id: &str) -> String {
    format!("workflow_{workflow_definition_id}")
}

pub async fn start_with_timeout(
    executor: &dyn WorkflowExecutor,
    start: WorkflowStart,
    timeout: Duration,
) -> Result<String, ExecutorError> {
    match tokio::time::timeout(timeout, executor.start_workflow(start)).await {
        Ok(result) => result,
        Err(_) => Err(ExecutorError::Timeout {
            seconds: timeout.as_secs(),
        }),
    }
}
