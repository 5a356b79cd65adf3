//! Trigger types — persisted rules describing how and when a workflow
//! run should start.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// How a trigger initiates workflow runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    /// Cron-based scheduled execution.
    Scheduled,
    /// External HTTP webhook.
    Webhook,
    /// Internal application event.
    Event,
    /// Manual trigger only, no automatic execution.
    Manual,
}

impl TriggerType {
    /// Canonical name used in workflow input maps and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerType::Scheduled => "SCHEDULED",
            TriggerType::Webhook => "WEBHOOK",
            TriggerType::Event => "EVENT",
            TriggerType::Manual => "MANUAL",
        }
    }
}

/// Type-specific trigger configuration.
///
/// Tagged by trigger kind so each variant only carries the fields that kind
/// actually uses; a webhook trigger cannot hold a cron expression.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum TriggerConfig {
    Schedule(ScheduleConfig),
    Webhook(WebhookConfig),
    Event(EventConfig),
    Manual,
}

impl TriggerConfig {
    /// The trigger type this configuration belongs to.
    pub fn trigger_type(&self) -> TriggerType {
        match self {
            TriggerConfig::Schedule(_) => TriggerType::Scheduled,
            TriggerConfig::Webhook(_) => TriggerType::Webhook,
            TriggerConfig::Event(_) => TriggerType::Event,
            TriggerConfig::Manual => TriggerType::Manual,
        }
    }
}

/// Configuration for SCHEDULED triggers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ScheduleConfig {
    /// Cron expression, 5/6/7-field forms accepted (e.g. `"0 0 * * MON-FRI"`).
    pub cron_expression: String,
    /// IANA timezone name for evaluating the expression. Default UTC.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    /// Do not fire before this instant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<DateTime<Utc>>,
    /// Disable the trigger once this instant has passed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<DateTime<Utc>>,
    /// Disable the trigger after this many executions. `None` = unlimited.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_executions: Option<u64>,
}

/// Configuration for WEBHOOK triggers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct WebhookConfig {
    /// Shared secret for request validation. `None` disables the check.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_secret: Option<String>,
    /// Accepted HTTP methods. Empty list = allow all.
    #[serde(default = "default_allowed_methods")]
    pub allowed_methods: Vec<String>,
    /// Accepted client IPs. Empty list = allow all.
    #[serde(default)]
    pub ip_whitelist: Vec<String>,
    /// Headers that must be present with exactly these values.
    #[serde(default)]
    pub required_headers: BTreeMap<String, String>,
    /// Path parameter name → workflow input name.
    #[serde(default)]
    pub path_param_mapping: BTreeMap<String, String>,
    /// Query parameter name → workflow input name.
    #[serde(default)]
    pub query_param_mapping: BTreeMap<String, String>,
    /// Body field → workflow input name. `None` = merge the whole body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_mapping: Option<BTreeMap<String, String>>,
}

fn default_allowed_methods() -> Vec<String> {
    vec!["POST".to_string()]
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            webhook_secret: None,
            allowed_methods: default_allowed_methods(),
            ip_whitelist: Vec::new(),
            required_headers: BTreeMap::new(),
            path_param_mapping: BTreeMap::new(),
            query_param_mapping: BTreeMap::new(),
            body_mapping: None,
        }
    }
}

/// Configuration for EVENT triggers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct EventConfig {
    /// Event type this trigger reacts to (e.g. `"IMAGE_UPLOADED"`).
    pub event_type: String,
    /// Optional exact-match filter on the event's source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_source: Option<String>,
    /// Exact-match constraints on the event's data. A missing key never matches.
    #[serde(default)]
    pub event_filters: BTreeMap<String, Value>,
    /// Event data field → workflow input name. `None` = pass all data through.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_data_mapping: Option<BTreeMap<String, String>>,
}

/// Outcome of a trigger's most recent dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Success,
    Failed,
}

/// A persisted rule describing how and when a workflow run should start.
///
/// `trigger_type` is the declared intent; `config` carries the matching
/// variant. The two are kept coherent by [`TriggerManager`] validation at
/// creation time, and each dispatcher re-checks the variant before firing.
///
/// [`TriggerManager`]: crate::management::TriggerManager
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Trigger {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Workflow definition this trigger starts.
    pub workflow_definition_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    pub trigger_type: TriggerType,
    pub config: TriggerConfig,
    /// Inputs merged into every run this trigger starts.
    #[serde(default)]
    pub default_inputs: BTreeMap<String, Value>,
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_executed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub execution_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_execution_status: Option<ExecutionStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_execution_workflow_id: Option<String>,
}

impl Trigger {
    /// The schedule config, if this trigger carries one.
    pub fn schedule_config(&self) -> Option<&ScheduleConfig> {
        match &self.config {
            TriggerConfig::Schedule(c) => Some(c),
            _ => None,
        }
    }

    /// The webhook config, if this trigger carries one.
    pub fn webhook_config(&self) -> Option<&WebhookConfig> {
        match &self.config {
            TriggerConfig::Webhook(c) => Some(c),
            _ => None,
        }
    }

    /// The event config, if this trigger carries one.
    pub fn event_config(&self) -> Option<&EventConfig> {
        match &self.config {
            TriggerConfig::Event(c) => Some(c),
            _ => None,
        }
    }

    /// Record a successful dispatch: bump the counter and statistics.
    pub fn record_success(&mut self, run_id: &str, now: DateTime<Utc>) {
        self.last_executed_at = Some(now);
        self.execution_count += 1;
        self.last_execution_status = Some(ExecutionStatus::Success);
        self.last_execution_workflow_id = Some(run_id.to_string());
        self.updated_at = now;
    }

    /// Record a failed dispatch attempt.
    pub fn record_failure(&mut self, now: DateTime<Utc>) {
        self.last_execution_status = Some(ExecutionStatus::Failed);
        self.updated_at = now;
    }

    /// Permanently disable this trigger (end date passed, max executions hit).
    pub fn disable(&mut self, now: DateTime<Utc>) {
        self.enabled = false;
        self.updated_at = now;
    }
}
