//! Skyhook trigger engine — trigger evaluation and compensation for
//! automated workflow pipelines.
//!
//! Pipelines start three ways: on a cron schedule, via an inbound webhook
//! call, or in reaction to a published domain event. The three dispatchers
//! ([`ScheduledTriggerPoller`], [`WebhookGateway`], [`EventRouter`]) all
//! converge on the external execution service behind [`WorkflowExecutor`].
//! When a run fails partway through, the [`CompensationLedger`] undoes the
//! side effects the run already committed.
//!
//! The engine is designed to be embedded: persistence and execution are
//! traits, and the crate has no dependency on web servers or databases.

pub mod compensation;
pub mod cron;
pub mod defaults;
pub mod errors;
pub mod management;
pub mod traits;
pub mod triggers;
pub mod types;

// Re-export public types at the crate level.

// compensation
pub use compensation::{
    cleanup_cached_artifact, cleanup_run_results, custom, delete_directory, delete_file,
    CompensationAction, CompensationLedger, CompensationResult,
};

// cron (self:: disambiguates the module from the `cron` crate)
pub use self::cron::{next_execution_time, validate_cron_expression};

// defaults
pub use defaults::{InMemoryEventStore, InMemoryTriggerStore};

// errors
pub use errors::{
    CompensationError, CronError, EventRouterError, EventStoreError, ExecutorError,
    ManagementError, TriggerStoreError,
};

// management
pub use management::{CreateTrigger, TriggerManager, TriggerStatistics, UpdateTrigger};

// traits
pub use traits::{EventStore, TriggerStore, WorkflowExecutor, WorkflowStart};

// triggers
pub use triggers::{
    hmac_signature, EventRouter, PollerConfig, ScheduledTriggerPoller, TickFailure, TickReport,
    WebhookGateway, WebhookRequest, WebhookResponse,
};

// types
pub use types::{
    DomainEvent, EventConfig, EventStatus, ExecutionStatus, ScheduleConfig, Trigger,
    TriggerConfig, TriggerType, WebhookConfig,
};
