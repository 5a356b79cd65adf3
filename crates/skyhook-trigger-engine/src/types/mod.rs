//! Core data model: triggers, their configurations, and domain events.

mod event;
mod trigger;

pub use event::{DomainEvent, EventStatus};
pub use trigger::{
    EventConfig, ExecutionStatus, ScheduleConfig, Trigger, TriggerConfig, TriggerType,
    WebhookConfig,
};
