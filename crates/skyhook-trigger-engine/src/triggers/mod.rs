//! Trigger dispatch for the Skyhook pipeline platform.
//!
//! Triggers answer "when should this workflow run?". Three dispatchers are
//! built in: the [`ScheduledTriggerPoller`] scans cron schedules on a fixed
//! interval, the [`WebhookGateway`] validates and dispatches inbound webhook
//! calls, and the [`EventRouter`] matches published domain events. All three
//! converge on [`WorkflowExecutor::start_workflow`](crate::traits::WorkflowExecutor).

mod poller;
mod router;
mod webhook;

pub use poller::{PollerConfig, ScheduledTriggerPoller, TickFailure, TickReport};
pub use router::EventRouter;
pub use webhook::{hmac_signature, WebhookGateway, WebhookRequest, WebhookResponse};
