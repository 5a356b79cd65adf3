//! Error types for all trigger-engine trait operations.

use thiserror::Error;

/// Errors from [`TriggerStore`](super::traits::TriggerStore).
#[derive(Debug, Error)]
pub enum TriggerStoreError {
    #[error("trigger not found: {id}")]
    NotFound { id: String },
    #[error("trigger store error: {message}")]
    Store { message: String },
}

/// Errors from [`EventStore`](super::traits::EventStore).
#[derive(Debug, Error)]
pub enum EventStoreError {
    #[error("event store error: {message}")]
    Store { message: String },
}

/// Errors from [`WorkflowExecutor`](super::traits::WorkflowExecutor).
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("workflow execution failed: {message}")]
    Execution { message: String },
    #[error("workflow start timed out after {seconds}s")]
    Timeout { seconds: u64 },
}

/// Errors from cron expression evaluation.
#[derive(Debug, Error)]
pub enum CronError {
    #[error("invalid cron expression '{expression}': {message}")]
    Expression { expression: String, message: String },
    #[error("invalid timezone '{timezone}'")]
    Timezone { timezone: String },
}

/// Errors from [`CompensationAction`](super::compensation::CompensationAction)
/// implementations.
#[derive(Debug, Error)]
pub enum CompensationError {
    #[error("compensation action failed: {message}")]
    Action { message: String },
}

/// Errors from [`TriggerManager`](super::management::TriggerManager) operations.
#[derive(Debug, Error)]
pub enum ManagementError {
    #[error("invalid trigger: {message}")]
    Validation { message: String },
    #[error("trigger not found: {id}")]
    NotFound { id: String },
    #[error("trigger with name '{name}' already exists in this project")]
    DuplicateName { name: String },
    #[error(transparent)]
    Store(#[from] TriggerStoreError),
}

/// Errors that abort event processing before the event reaches a terminal
/// state (per-trigger dispatch failures are recorded, not raised).
#[derive(Debug, Error)]
pub enum EventRouterError {
    #[error(transparent)]
    TriggerStore(#[from] TriggerStoreError),
    #[error(transparent)]
    EventStore(#[from] EventStoreError),
}
