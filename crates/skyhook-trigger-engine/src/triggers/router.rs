//! Domain event router.
//!
//! Persists published events and matches them against enabled EVENT
//! triggers, starting a workflow for every match. Processing is synchronous
//! with publish; a broadcast notification additionally fires for observers
//! but is not required for correctness.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::{json, Value};
use tokio::sync::broadcast;
use uuid::Uuid;

use super::super::errors::{EventRouterError, EventStoreError};
use super::super::traits::{
    start_with_timeout, workflow_name, EventStore, TriggerStore, WorkflowExecutor, WorkflowStart,
};
use super::super::types::{DomainEvent, EventConfig, EventStatus, Trigger, TriggerType};

/// Matches published domain events against EVENT triggers.
pub struct EventRouter {
    trigger_store: Arc<dyn TriggerStore>,
    event_store: Arc<dyn EventStore>,
    executor: Arc<dyn WorkflowExecutor>,
    executor_timeout: Duration,
    observers: broadcast::Sender<DomainEvent>,
}

impl EventRouter {
    pub fn new(
        trigger_store: Arc<dyn TriggerStore>,
        event_store: Arc<dyn EventStore>,
        executor: Arc<dyn WorkflowExecutor>,
    ) -> Self {
        Self::with_timeout(trigger_store, event_store, executor, Duration::from_secs(30))
    }

    pub fn with_timeout(
        trigger_store: Arc<dyn TriggerStore>,
        event_store: Arc<dyn EventStore>,
        executor: Arc<dyn WorkflowExecutor>,
        executor_timeout: Duration,
    ) -> Self {
        let (observers, _) = broadcast::channel(64);
        Self {
            trigger_store,
            event_store,
            executor,
            executor_timeout,
            observers,
        }
    }

    /// Observe every published event. Best-effort: a lagging observer never
    /// affects processing.
    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.observers.subscribe()
    }

    /// Persist a new event and immediately process it.
    ///
    /// The returned [`DomainEvent`] reflects the processing outcome:
    /// `Completed` with its `triggered_workflows` filled in, or `Failed`
    /// with an error message. Only the initial persist can fail hard.
    pub async fn publish_event(
        &self,
        event_type: impl Into<String>,
        event_source: impl Into<String>,
        project_id: Option<String>,
        user_id: Option<String>,
        event_data: BTreeMap<String, Value>,
    ) -> Result<DomainEvent, EventStoreError> {
        let mut event = DomainEvent {
            id: Uuid::new_v4().to_string(),
            event_type: event_type.into(),
            event_source: event_source.into(),
            project_id,
            user_id,
            event_data,
            timestamp: Utc::now(),
            processed: false,
            status: EventStatus::Pending,
            triggered_workflows: BTreeMap::new(),
            error_message: None,
            processed_at: None,
        };

        tracing::info!(
            event_id = %event.id,
            event_type = %event.event_type,
            event_source = %event.event_source,
            "publishing domain event"
        );

        self.event_store.save(&event).await?;

        // Notify observers; no receivers is fine.
        let _ = self.observers.send(event.clone());

        self.process_event(&mut event).await;
        Ok(event)
    }

    /// Match the event against enabled EVENT triggers and dispatch matches.
    ///
    /// A single trigger's dispatch failure is recorded on that trigger and
    /// the loop continues; the event still completes. Failures before the
    /// matching loop finishes (store errors) leave the event `Failed` with
    /// an error message.
    pub async fn process_event(&self, event: &mut DomainEvent) {
        if let Err(e) = self.process_inner(event).await {
            tracing::error!(event_id = %event.id, "error processing domain event: {e}");
            event.status = EventStatus::Failed;
            event.error_message = Some(e.to_string());
            if let Err(save_err) = self.event_store.save(event).await {
                tracing::error!(event_id = %event.id, "failed to persist failed event: {save_err}");
            }
        }
    }

    async fn process_inner(&self, event: &mut DomainEvent) -> Result<(), EventRouterError> {
        tracing::info!(event_id = %event.id, event_type = %event.event_type, "processing domain event");

        event.status = EventStatus::Processing;
        self.event_store.save(event).await?;

        let triggers = self
            .trigger_store
            .find_by_enabled_and_type(true, TriggerType::Event)
            .await?;

        let mut executed = 0;
        for mut trigger in triggers {
            if !matches_trigger(event, &trigger) {
                continue;
            }

            tracing::info!(
                event_id = %event.id,
                trigger_id = %trigger.id,
                trigger_name = %trigger.name,
                "event matches trigger"
            );

            if self.dispatch(event, &mut trigger).await {
                executed += 1;
            }
        }

        event.processed = true;
        event.status = EventStatus::Completed;
        event.processed_at = Some(Utc::now());
        self.event_store.save(event).await?;

        tracing::info!(
            event_id = %event.id,
            triggered_workflows = executed,
            "event processing completed"
        );
        Ok(())
    }

    /// Start the trigger's workflow for this event. Returns whether a run
    /// started; failures are recorded on the trigger, never raised.
    async fn dispatch(&self, event: &mut DomainEvent, trigger: &mut Trigger) -> bool {
        // Matching already established the config variant.
        let Some(config) = trigger.event_config() else {
            return false;
        };

        let inputs = build_inputs(event, trigger, config);
        let start = WorkflowStart {
            workflow_name: workflow_name(&trigger.workflow_definition_id),
            version: 1,
            inputs,
            workflow_definition_id: trigger.workflow_definition_id.clone(),
            project_id: trigger.project_id.clone(),
            requested_by: event.user_id.clone(),
        };

        let now = Utc::now();
        match start_with_timeout(self.executor.as_ref(), start, self.executor_timeout).await {
            Ok(run_id) => {
                event
                    .triggered_workflows
                    .insert(trigger.id.clone(), run_id.clone());
                trigger.record_success(&run_id, now);
                if let Err(e) = self.trigger_store.save(trigger).await {
                    tracing::error!(
                        trigger_id = %trigger.id,
                        "failed to persist trigger statistics: {e}"
                    );
                }
                tracing::info!(
                    event_id = %event.id,
                    trigger_id = %trigger.id,
                    run_id = %run_id,
                    "workflow started from event trigger"
                );
                true
            }
            Err(e) => {
                tracing::error!(
                    event_id = %event.id,
                    trigger_id = %trigger.id,
                    "failed to execute workflow from trigger: {e}"
                );
                trigger.record_failure(now);
                if let Err(save_err) = self.trigger_store.save(trigger).await {
                    tracing::error!(
                        trigger_id = %trigger.id,
                        "failed to persist trigger failure: {save_err}"
                    );
                }
                false
            }
        }
    }
}

/// Whether an EVENT trigger matches a published event.
///
/// Event type must match; source and project are exact-match filters when
/// set; every event filter entry must equal the corresponding event data
/// key, and a missing key never matches.
fn matches_trigger(event: &DomainEvent, trigger: &Trigger) -> bool {
    let Some(config) = trigger.event_config() else {
        return false;
    };

    if config.event_type != event.event_type {
        return false;
    }

    if let Some(source) = &config.event_source {
        if source != &event.event_source {
            return false;
        }
    }

    if let Some(project_id) = &trigger.project_id {
        if event.project_id.as_ref() != Some(project_id) {
            return false;
        }
    }

    config
        .event_filters
        .iter()
        .all(|(key, expected)| event.event_data.get(key) == Some(expected))
}

/// Workflow inputs: trigger defaults, event metadata, then event data
/// (mapped fields when a mapping is configured, otherwise passed through).
fn build_inputs(
    event: &DomainEvent,
    trigger: &Trigger,
    config: &EventConfig,
) -> BTreeMap<String, Value> {
    let mut inputs = trigger.default_inputs.clone();

    inputs.insert("eventId".into(), json!(event.id));
    inputs.insert("eventType".into(), json!(event.event_type));
    inputs.insert("eventSource".into(), json!(event.event_source));
    inputs.insert("triggerId".into(), json!(trigger.id));

    match &config.event_data_mapping {
        Some(mapping) => {
            for (event_field, workflow_param) in mapping {
                if let Some(value) = event.event_data.get(event_field) {
                    inputs.insert(workflow_param.clone(), value.clone());
                }
            }
        }
        None => {
            for (key, value) in &event.event_data {
                inputs.insert(key.clone(), value.clone());
            }
        }
    }

    inputs
}
