//! Domain events — application happenings that EVENT triggers react to.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Processing state of a published event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

/// A persisted application event.
///
/// Created on publish, mutated as triggers are matched, terminal once
/// `processed` flips to true (or processing fails).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DomainEvent {
    pub id: String,
    /// Event type, e.g. `"IMAGE_UPLOADED"` or `"PROCESSING_COMPLETE"`.
    pub event_type: String,
    /// Where the event came from, e.g. `"scheduler"` or `"api"`.
    pub event_source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default)]
    pub event_data: BTreeMap<String, Value>,
    pub timestamp: DateTime<Utc>,
    /// Flips false→true exactly once, when processing completes.
    pub processed: bool,
    pub status: EventStatus,
    /// Trigger id → run id for every workflow this event started.
    #[serde(default)]
    pub triggered_workflows: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<DateTime<Utc>>,
}
