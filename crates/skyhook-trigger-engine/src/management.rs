//! Trigger lifecycle management.
//!
//! CRUD and enable/disable on top of the [`TriggerStore`], with type-aware
//! config validation so a trigger can only be persisted with the config
//! variant its type needs. The dispatchers never create triggers; this is
//! the surface an admin API calls.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use super::cron;
use super::errors::ManagementError;
use super::traits::TriggerStore;
use super::types::{ExecutionStatus, Trigger, TriggerConfig, TriggerType};

/// Parameters for creating a trigger.
#[derive(Debug, Clone)]
pub struct CreateTrigger {
    pub workflow_definition_id: String,
    pub project_id: String,
    pub name: String,
    pub description: Option<String>,
    pub trigger_type: TriggerType,
    pub config: TriggerConfig,
    pub default_inputs: BTreeMap<String, Value>,
    pub created_by: Option<String>,
}

/// Partial update; `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct UpdateTrigger {
    pub name: Option<String>,
    pub description: Option<String>,
    pub config: Option<TriggerConfig>,
    pub default_inputs: Option<BTreeMap<String, Value>>,
    pub enabled: Option<bool>,
}

/// Snapshot of a trigger's execution counters for dashboards.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct TriggerStatistics {
    pub trigger_id: String,
    pub name: String,
    pub trigger_type: TriggerType,
    pub enabled: bool,
    pub execution_count: u64,
    pub last_executed_at: Option<DateTime<Utc>>,
    pub last_execution_status: Option<ExecutionStatus>,
    pub last_execution_workflow_id: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Next fire time, for SCHEDULED triggers with a valid schedule.
    pub next_execution_time: Option<DateTime<Utc>>,
}

/// Trigger lifecycle operations.
pub struct TriggerManager {
    store: Arc<dyn TriggerStore>,
}

impl TriggerManager {
    pub fn new(store: Arc<dyn TriggerStore>) -> Self {
        Self { store }
    }

    /// Create a trigger, enabled, with a fresh id.
    ///
    /// Webhook triggers created without a secret get a generated one.
    pub async fn create_trigger(&self, create: CreateTrigger) -> Result<Trigger, ManagementError> {
        tracing::info!(
            name = %create.name,
            trigger_type = create.trigger_type.as_str(),
            project_id = %create.project_id,
            "creating workflow trigger"
        );

        if create.workflow_definition_id.is_empty() {
            return Err(ManagementError::Validation {
                message: "workflow definition id is required".into(),
            });
        }
        if create.project_id.is_empty() {
            return Err(ManagementError::Validation {
                message: "project id is required".into(),
            });
        }
        if create.name.is_empty() {
            return Err(ManagementError::Validation {
                message: "trigger name is required".into(),
            });
        }

        let mut config = create.config;
        validate_config(create.trigger_type, &config)?;
        if let TriggerConfig::Webhook(webhook) = &mut config {
            if webhook.webhook_secret.as_deref().unwrap_or("").is_empty() {
                webhook.webhook_secret = Some(generate_webhook_secret());
            }
        }

        if self
            .store
            .find_by_project_id_and_name(&create.project_id, &create.name)
            .await?
            .is_some()
        {
            return Err(ManagementError::DuplicateName { name: create.name });
        }

        let now = Utc::now();
        let trigger = Trigger {
            id: Uuid::new_v4().to_string(),
            name: create.name,
            description: create.description,
            workflow_definition_id: create.workflow_definition_id,
            project_id: Some(create.project_id),
            trigger_type: create.trigger_type,
            config,
            default_inputs: create.default_inputs,
            enabled: true,
            created_by: create.created_by,
            created_at: now,
            updated_at: now,
            last_executed_at: None,
            execution_count: 0,
            last_execution_status: None,
            last_execution_workflow_id: None,
        };

        self.store.save(&trigger).await?;
        tracing::info!(trigger_id = %trigger.id, name = %trigger.name, "created workflow trigger");
        Ok(trigger)
    }

    /// Apply a partial update to an existing trigger.
    pub async fn update_trigger(
        &self,
        trigger_id: &str,
        update: UpdateTrigger,
    ) -> Result<Trigger, ManagementError> {
        tracing::info!(trigger_id = %trigger_id, "updating workflow trigger");
        let mut trigger = self.get_trigger(trigger_id).await?;

        if let Some(name) = update.name {
            if let Some(project_id) = trigger.project_id.as_deref() {
                let existing = self
                    .store
                    .find_by_project_id_and_name(project_id, &name)
                    .await?;
                if existing.is_some_and(|t| t.id != trigger_id) {
                    return Err(ManagementError::DuplicateName { name });
                }
            }
            trigger.name = name;
        }

        if let Some(description) = update.description {
            trigger.description = Some(description);
        }

        if let Some(config) = update.config {
            validate_config(trigger.trigger_type, &config)?;
            trigger.config = config;
        }

        if let Some(default_inputs) = update.default_inputs {
            trigger.default_inputs = default_inputs;
        }

        if let Some(enabled) = update.enabled {
            trigger.enabled = enabled;
        }

        trigger.updated_at = Utc::now();
        self.store.save(&trigger).await?;
        Ok(trigger)
    }

    pub async fn delete_trigger(&self, trigger_id: &str) -> Result<(), ManagementError> {
        let trigger = self.get_trigger(trigger_id).await?;
        self.store.delete(&trigger.id).await?;
        tracing::info!(trigger_id = %trigger_id, name = %trigger.name, "deleted workflow trigger");
        Ok(())
    }

    pub async fn get_trigger(&self, trigger_id: &str) -> Result<Trigger, ManagementError> {
        self.store
            .find_by_id(trigger_id)
            .await?
            .ok_or_else(|| ManagementError::NotFound {
                id: trigger_id.to_string(),
            })
    }

    pub async fn project_triggers(&self, project_id: &str) -> Result<Vec<Trigger>, ManagementError> {
        Ok(self.store.find_by_project_id(project_id).await?)
    }

    pub async fn workflow_triggers(
        &self,
        workflow_definition_id: &str,
    ) -> Result<Vec<Trigger>, ManagementError> {
        Ok(self
            .store
            .find_by_workflow_definition_id(workflow_definition_id)
            .await?)
    }

    pub async fn triggers_by_type(
        &self,
        trigger_type: TriggerType,
    ) -> Result<Vec<Trigger>, ManagementError> {
        Ok(self.store.find_by_type(trigger_type).await?)
    }

    pub async fn enabled_triggers(&self) -> Result<Vec<Trigger>, ManagementError> {
        Ok(self.store.find_by_enabled(true).await?)
    }

    pub async fn enable_trigger(&self, trigger_id: &str) -> Result<Trigger, ManagementError> {
        self.set_enabled(trigger_id, true).await
    }

    pub async fn disable_trigger(&self, trigger_id: &str) -> Result<Trigger, ManagementError> {
        self.set_enabled(trigger_id, false).await
    }

    async fn set_enabled(
        &self,
        trigger_id: &str,
        enabled: bool,
    ) -> Result<Trigger, ManagementError> {
        tracing::info!(trigger_id = %trigger_id, enabled, "setting trigger enabled state");
        let mut trigger = self.get_trigger(trigger_id).await?;
        trigger.enabled = enabled;
        trigger.updated_at = Utc::now();
        self.store.save(&trigger).await?;
        Ok(trigger)
    }

    /// Execution counters, plus the next fire time for scheduled triggers.
    pub async fn trigger_statistics(
        &self,
        trigger_id: &str,
    ) -> Result<TriggerStatistics, ManagementError> {
        let trigger = self.get_trigger(trigger_id).await?;

        let next_execution_time = trigger.schedule_config().and_then(|schedule| {
            cron::next_execution_time(&schedule.cron_expression, schedule.timezone.as_deref())
        });

        Ok(TriggerStatistics {
            trigger_id: trigger.id,
            name: trigger.name,
            trigger_type: trigger.trigger_type,
            enabled: trigger.enabled,
            execution_count: trigger.execution_count,
            last_executed_at: trigger.last_executed_at,
            last_execution_status: trigger.last_execution_status,
            last_execution_workflow_id: trigger.last_execution_workflow_id,
            created_at: trigger.created_at,
            next_execution_time,
        })
    }
}

/// Type-specific validation: the config variant must match the declared
/// type, schedules must carry an evaluable cron expression and timezone,
/// and event triggers a non-empty event type.
fn validate_config(
    trigger_type: TriggerType,
    config: &TriggerConfig,
) -> Result<(), ManagementError> {
    if config.trigger_type() != trigger_type {
        return Err(ManagementError::Validation {
            message: format!(
                "configuration is for {} triggers but the trigger type is {}",
                config.trigger_type().as_str(),
                trigger_type.as_str()
            ),
        });
    }

    match config {
        TriggerConfig::Schedule(schedule) => {
            if schedule.cron_expression.is_empty() {
                return Err(ManagementError::Validation {
                    message: "cron expression is required for scheduled triggers".into(),
                });
            }
            if !cron::validate_cron_expression(&schedule.cron_expression) {
                return Err(ManagementError::Validation {
                    message: format!("invalid cron expression: {}", schedule.cron_expression),
                });
            }
            if let Err(e) = cron::resolve_timezone(schedule.timezone.as_deref()) {
                return Err(ManagementError::Validation {
                    message: e.to_string(),
                });
            }
        }
        TriggerConfig::Event(event) => {
            if event.event_type.is_empty() {
                return Err(ManagementError::Validation {
                    message: "event type is required for event triggers".into(),
                });
            }
        }
        TriggerConfig::Webhook(_) | TriggerConfig::Manual => {}
    }

    Ok(())
}

fn generate_webhook_secret() -> String {
    format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple())
}
