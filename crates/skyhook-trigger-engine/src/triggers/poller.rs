//! Scheduled trigger poller.
//!
//! Scans enabled SCHEDULED triggers once per fixed interval and fires the
//! ones whose cron schedule has come due. At most one fire per trigger per
//! tick: missed slots are never replayed in a batch.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde_json::json;
use tokio::sync::{broadcast, RwLock};
use tokio::time::MissedTickBehavior;

use super::super::cron;
use super::super::errors::CronError;
use super::super::traits::{
    start_with_timeout, workflow_name, TriggerStore, WorkflowExecutor, WorkflowStart,
};
use super::super::types::{ScheduleConfig, Trigger, TriggerType};

/// Timing knobs for the poller.
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// How often the scan runs.
    pub poll_interval: Duration,
    /// A never-fired trigger is eligible when its next fire time falls
    /// within this window of now.
    pub startup_window: Duration,
    /// Upper bound on a single `start_workflow` call.
    pub executor_timeout: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(60),
            startup_window: Duration::from_secs(30),
            executor_timeout: Duration::from_secs(30),
        }
    }
}

/// A single trigger's failure within a tick.
#[derive(Debug, Clone)]
pub struct TickFailure {
    pub trigger_id: String,
    pub error: String,
}

/// What one poller tick did, per trigger.
///
/// One trigger's failure never aborts the tick; it lands in `failures` and
/// the scan moves on.
#[derive(Debug, Clone, Default)]
pub struct TickReport {
    /// How many enabled SCHEDULED triggers were evaluated.
    pub evaluated: usize,
    /// Trigger ids that started a workflow this tick.
    pub fired: Vec<String>,
    /// Trigger ids permanently disabled this tick (end date, max executions).
    pub disabled: Vec<String>,
    pub failures: Vec<TickFailure>,
}

enum TriggerOutcome {
    Skipped,
    Fired,
    Disabled,
    Failed(String),
}

/// Fixed-interval scanner for SCHEDULED triggers.
///
/// The last-fired cache avoids re-reading `last_executed_at` mid-tick and
/// survives a slow store; on a cache miss (fresh process) evaluation falls
/// back to the persisted `last_executed_at`.
pub struct ScheduledTriggerPoller {
    store: Arc<dyn TriggerStore>,
    executor: Arc<dyn WorkflowExecutor>,
    config: PollerConfig,
    last_fired: RwLock<HashMap<String, DateTime<Utc>>>,
}

impl ScheduledTriggerPoller {
    pub fn new(store: Arc<dyn TriggerStore>, executor: Arc<dyn WorkflowExecutor>) -> Self {
        Self::with_config(store, executor, PollerConfig::default())
    }

    pub fn with_config(
        store: Arc<dyn TriggerStore>,
        executor: Arc<dyn WorkflowExecutor>,
        config: PollerConfig,
    ) -> Self {
        Self {
            store,
            executor,
            config,
            last_fired: RwLock::new(HashMap::new()),
        }
    }

    /// Run the poll loop until the shutdown signal arrives.
    ///
    /// Ticks run sequentially on this task, so they can never overlap; a
    /// tick that outlasts the interval skips the missed slots instead of
    /// firing a catch-up burst.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.tick(Utc::now()).await;
                    if !report.fired.is_empty() || !report.failures.is_empty() {
                        tracing::info!(
                            evaluated = report.evaluated,
                            fired = report.fired.len(),
                            failed = report.failures.len(),
                            "scheduled trigger tick complete"
                        );
                    }
                }
                _ = shutdown.recv() => {
                    tracing::debug!("scheduled trigger poller shutting down");
                    return;
                }
            }
        }
    }

    /// Evaluate every enabled SCHEDULED trigger against `now`.
    ///
    /// Exposed separately from [`run`](Self::run) so the scan is testable
    /// with an explicit clock.
    pub async fn tick(&self, now: DateTime<Utc>) -> TickReport {
        tracing::debug!("checking scheduled workflow triggers");

        let triggers = match self
            .store
            .find_by_enabled_and_type(true, TriggerType::Scheduled)
            .await
        {
            Ok(triggers) => triggers,
            Err(e) => {
                tracing::error!("scheduled trigger scan failed: {e}");
                return TickReport::default();
            }
        };

        let mut report = TickReport {
            evaluated: triggers.len(),
            ..TickReport::default()
        };

        for mut trigger in triggers {
            match self.evaluate(&mut trigger, now).await {
                TriggerOutcome::Skipped => {}
                TriggerOutcome::Fired => report.fired.push(trigger.id),
                TriggerOutcome::Disabled => report.disabled.push(trigger.id),
                TriggerOutcome::Failed(error) => report.failures.push(TickFailure {
                    trigger_id: trigger.id,
                    error,
                }),
            }
        }

        report
    }

    async fn evaluate(&self, trigger: &mut Trigger, now: DateTime<Utc>) -> TriggerOutcome {
        let Some(schedule) = trigger.schedule_config().cloned() else {
            tracing::warn!(
                trigger_id = %trigger.id,
                "scheduled trigger has no schedule config, skipping"
            );
            return TriggerOutcome::Skipped;
        };

        let tz = match cron::resolve_timezone(schedule.timezone.as_deref()) {
            Ok(tz) => tz,
            Err(e) => {
                tracing::error!(trigger_id = %trigger.id, "cannot evaluate schedule: {e}");
                return TriggerOutcome::Failed(e.to_string());
            }
        };

        let cached = { self.last_fired.read().await.get(&trigger.id).copied() };
        let reference = cached.or(trigger.last_executed_at);

        match self.is_due(&schedule, tz, reference, now) {
            Ok(true) => {}
            Ok(false) => return TriggerOutcome::Skipped,
            Err(e) => {
                tracing::error!(
                    trigger_id = %trigger.id,
                    cron = %schedule.cron_expression,
                    "cannot evaluate schedule: {e}"
                );
                return TriggerOutcome::Failed(e.to_string());
            }
        }

        // Start/end window and execution limit checks.
        if let Some(start) = schedule.start_date {
            if now < start {
                tracing::debug!(trigger_id = %trigger.id, start_date = %start, "trigger not yet started");
                return TriggerOutcome::Skipped;
            }
        }
        if let Some(end) = schedule.end_date {
            if now > end {
                tracing::info!(trigger_id = %trigger.id, end_date = %end, "trigger expired, disabling");
                return self.disable(trigger, now).await;
            }
        }
        if let Some(max) = schedule.max_executions {
            if trigger.execution_count >= max {
                tracing::info!(
                    trigger_id = %trigger.id,
                    count = trigger.execution_count,
                    "trigger reached max executions, disabling"
                );
                return self.disable(trigger, now).await;
            }
        }

        self.fire(trigger, now).await
    }

    /// Pure due-time check: same inputs, same answer.
    ///
    /// Never fired: the next fire time is computed anchored one poll
    /// interval back, and the trigger is due if that time falls inside the
    /// startup window. This makes the current minute the first eligible
    /// slot without replaying history; schedules finer than the poll
    /// interval collapse to at most one fire per tick.
    fn is_due(
        &self,
        schedule: &ScheduleConfig,
        tz: Tz,
        last_fired: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<bool, CronError> {
        match last_fired {
            None => {
                let anchor = now - chrono::Duration::seconds(self.config.poll_interval.as_secs() as i64);
                let window_end =
                    now + chrono::Duration::seconds(self.config.startup_window.as_secs() as i64);
                match cron::next_after(&schedule.cron_expression, tz, anchor)? {
                    Some(next) => Ok(next < window_end),
                    None => Ok(false),
                }
            }
            Some(last) => match cron::next_after(&schedule.cron_expression, tz, last)? {
                Some(next) => Ok(next <= now),
                None => Ok(false),
            },
        }
    }

    async fn disable(&self, trigger: &mut Trigger, now: DateTime<Utc>) -> TriggerOutcome {
        trigger.disable(now);
        if let Err(e) = self.store.save(trigger).await {
            tracing::error!(trigger_id = %trigger.id, "failed to persist disabled trigger: {e}");
            return TriggerOutcome::Failed(e.to_string());
        }
        TriggerOutcome::Disabled
    }

    async fn fire(&self, trigger: &mut Trigger, now: DateTime<Utc>) -> TriggerOutcome {
        tracing::info!(
            trigger_id = %trigger.id,
            trigger_name = %trigger.name,
            workflow_definition_id = %trigger.workflow_definition_id,
            "executing scheduled workflow"
        );

        let mut inputs = trigger.default_inputs.clone();
        inputs.insert("triggerId".into(), json!(trigger.id));
        inputs.insert("triggerType".into(), json!(TriggerType::Scheduled.as_str()));
        inputs.insert("executionTime".into(), json!(now.to_rfc3339()));

        let start = WorkflowStart {
            workflow_name: workflow_name(&trigger.workflow_definition_id),
            version: 1,
            inputs,
            workflow_definition_id: trigger.workflow_definition_id.clone(),
            project_id: trigger.project_id.clone(),
            requested_by: trigger.created_by.clone(),
        };

        match start_with_timeout(self.executor.as_ref(), start, self.config.executor_timeout).await
        {
            Ok(run_id) => {
                trigger.record_success(&run_id, now);
                if let Err(e) = self.store.save(trigger).await {
                    tracing::error!(
                        trigger_id = %trigger.id,
                        "failed to persist trigger statistics: {e}"
                    );
                }
                self.last_fired.write().await.insert(trigger.id.clone(), now);
                tracing::info!(
                    trigger_id = %trigger.id,
                    run_id = %run_id,
                    execution_count = trigger.execution_count,
                    "scheduled workflow started"
                );
                TriggerOutcome::Fired
            }
            Err(e) => {
                tracing::error!(trigger_id = %trigger.id, "failed to execute scheduled workflow: {e}");
                trigger.record_failure(now);
                if let Err(save_err) = self.store.save(trigger).await {
                    tracing::error!(
                        trigger_id = %trigger.id,
                        "failed to persist trigger failure: {save_err}"
                    );
                }
                TriggerOutcome::Failed(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::defaults::InMemoryTriggerStore;
    use crate::errors::ExecutorError;
    use crate::types::{ExecutionStatus, TriggerConfig};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::collections::BTreeMap;

    /// Records every start and fails for workflow definitions named "bad".
    struct MockExecutor {
        calls: parking_lot::Mutex<Vec<WorkflowStart>>,
    }

    impl MockExecutor {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: parking_lot::Mutex::new(Vec::new()),
            })
        }

        fn call_count(&self) -> usize {
            self.calls.lock().len()
        }
    }

    #[async_trait]
    impl WorkflowExecutor for MockExecutor {
        async fn start_workflow(&self, start: WorkflowStart) -> Result<String, ExecutorError> {
            if start.workflow_definition_id == "bad" {
                return Err(ExecutorError::Execution {
                    message: "intentional failure".into(),
                });
            }
            let mut calls = self.calls.lock();
            calls.push(start);
            Ok(format!("run-{}", calls.len()))
        }
    }

    fn trigger(id: &str, cron_expression: &str) -> Trigger {
        let now = Utc::now();
        Trigger {
            id: id.into(),
            name: format!("trigger {id}"),
            description: None,
            workflow_definition_id: "wf-1".into(),
            project_id: Some("p-1".into()),
            trigger_type: TriggerType::Scheduled,
            config: TriggerConfig::Schedule(ScheduleConfig {
                cron_expression: cron_expression.into(),
                timezone: None,
                start_date: None,
                end_date: None,
                max_executions: None,
            }),
            default_inputs: BTreeMap::new(),
            enabled: true,
            created_by: Some("user-1".into()),
            created_at: now,
            updated_at: now,
            last_executed_at: None,
            execution_count: 0,
            last_execution_status: None,
            last_execution_workflow_id: None,
        }
    }

    fn schedule_mut(trigger: &mut Trigger) -> &mut ScheduleConfig {
        match &mut trigger.config {
            TriggerConfig::Schedule(s) => s,
            _ => panic!("not a schedule config"),
        }
    }

    async fn setup(triggers: Vec<Trigger>) -> (Arc<InMemoryTriggerStore>, Arc<MockExecutor>, ScheduledTriggerPoller) {
        let store = Arc::new(InMemoryTriggerStore::new());
        for t in &triggers {
            store.save(t).await.expect("seed trigger");
        }
        let executor = MockExecutor::new();
        let poller = ScheduledTriggerPoller::new(
            Arc::clone(&store) as Arc<dyn TriggerStore>,
            Arc::clone(&executor) as Arc<dyn WorkflowExecutor>,
        );
        (store, executor, poller)
    }

    #[tokio::test]
    async fn test_disabled_trigger_is_never_evaluated() {
        let mut t = trigger("t-1", "* * * * *");
        t.enabled = false;
        let (_store, executor, poller) = setup(vec![t]).await;

        let report = poller.tick(Utc::now()).await;

        assert_eq!(report.evaluated, 0);
        assert_eq!(executor.call_count(), 0);
    }

    #[tokio::test]
    async fn test_never_fired_trigger_fires_on_current_minute() {
        let t = trigger("t-1", "* * * * *");
        let (store, executor, poller) = setup(vec![t]).await;

        let now = Utc.with_ymd_and_hms(2024, 3, 1, 10, 30, 10).unwrap();
        let report = poller.tick(now).await;

        assert_eq!(report.fired, vec!["t-1".to_string()]);
        assert_eq!(executor.call_count(), 1);

        let saved = store.find_by_id("t-1").await.unwrap().unwrap();
        assert_eq!(saved.execution_count, 1);
        assert_eq!(saved.last_executed_at, Some(now));
        assert_eq!(saved.last_execution_status, Some(ExecutionStatus::Success));
        assert_eq!(saved.last_execution_workflow_id.as_deref(), Some("run-1"));
    }

    #[tokio::test]
    async fn test_never_fired_trigger_outside_window_skips() {
        // Daily at midnight, evaluated mid-morning: next fire is hours away.
        let t = trigger("t-1", "0 0 * * *");
        let (_store, executor, poller) = setup(vec![t]).await;

        let now = Utc.with_ymd_and_hms(2024, 3, 1, 10, 30, 0).unwrap();
        let report = poller.tick(now).await;

        assert!(report.fired.is_empty());
        assert_eq!(executor.call_count(), 0);
    }

    #[tokio::test]
    async fn test_previously_fired_trigger_fires_when_slot_passes() {
        let mut t = trigger("t-1", "0 * * * *");
        t.last_executed_at = Some(Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap());
        let (_store, executor, poller) = setup(vec![t]).await;

        let now = Utc.with_ymd_and_hms(2024, 3, 1, 11, 0, 5).unwrap();
        let report = poller.tick(now).await;

        assert_eq!(report.fired, vec!["t-1".to_string()]);
        assert_eq!(executor.call_count(), 1);
    }

    #[tokio::test]
    async fn test_missed_slots_collapse_to_a_single_fire() {
        // Two hours of missed every-minute slots: exactly one fire, and the
        // next tick shortly after stays quiet.
        let mut t = trigger("t-1", "* * * * *");
        t.last_executed_at = Some(Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap());
        let (_store, executor, poller) = setup(vec![t]).await;

        let now = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 10).unwrap();
        let report = poller.tick(now).await;
        assert_eq!(report.fired.len(), 1);
        assert_eq!(executor.call_count(), 1);

        let report = poller.tick(now + chrono::Duration::seconds(5)).await;
        assert!(report.fired.is_empty());
        assert_eq!(executor.call_count(), 1);
    }

    #[tokio::test]
    async fn test_max_executions_disables_and_never_fires_again() {
        let mut t = trigger("t-1", "* * * * *");
        t.execution_count = 2;
        t.last_executed_at = Some(Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap());
        schedule_mut(&mut t).max_executions = Some(2);
        let (store, executor, poller) = setup(vec![t]).await;

        let now = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 10).unwrap();
        let report = poller.tick(now).await;

        assert_eq!(report.disabled, vec!["t-1".to_string()]);
        assert_eq!(executor.call_count(), 0);
        let saved = store.find_by_id("t-1").await.unwrap().unwrap();
        assert!(!saved.enabled);

        // Disabled triggers fall out of the scan entirely.
        let report = poller.tick(now + chrono::Duration::minutes(1)).await;
        assert_eq!(report.evaluated, 0);
        assert!(report.disabled.is_empty());
    }

    #[tokio::test]
    async fn test_end_date_disables_exactly_once() {
        let mut t = trigger("t-1", "* * * * *");
        t.last_executed_at = Some(Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap());
        schedule_mut(&mut t).end_date = Some(Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).unwrap());
        let (store, executor, poller) = setup(vec![t]).await;

        let now = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 10).unwrap();
        let report = poller.tick(now).await;
        assert_eq!(report.disabled, vec!["t-1".to_string()]);
        assert_eq!(executor.call_count(), 0);
        assert!(!store.find_by_id("t-1").await.unwrap().unwrap().enabled);

        // Later ticks never see the trigger again, so no repeated disables.
        let report = poller.tick(now + chrono::Duration::minutes(1)).await;
        assert_eq!(report.evaluated, 0);
        assert!(report.disabled.is_empty());
    }

    #[tokio::test]
    async fn test_start_date_in_future_skips_without_disabling() {
        let mut t = trigger("t-1", "* * * * *");
        schedule_mut(&mut t).start_date =
            Some(Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap());
        let (store, executor, poller) = setup(vec![t]).await;

        let now = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 10).unwrap();
        let report = poller.tick(now).await;

        assert!(report.fired.is_empty());
        assert!(report.disabled.is_empty());
        assert_eq!(executor.call_count(), 0);
        assert!(store.find_by_id("t-1").await.unwrap().unwrap().enabled);
    }

    #[tokio::test]
    async fn test_one_trigger_failure_never_aborts_the_tick() {
        let mut bad = trigger("t-bad", "* * * * *");
        bad.workflow_definition_id = "bad".into();
        let good = trigger("t-good", "* * * * *");
        let (store, executor, poller) = setup(vec![bad, good]).await;

        let now = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 10).unwrap();
        let report = poller.tick(now).await;

        assert_eq!(report.evaluated, 2);
        assert_eq!(report.fired, vec!["t-good".to_string()]);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].trigger_id, "t-bad");
        assert_eq!(executor.call_count(), 1);

        let failed = store.find_by_id("t-bad").await.unwrap().unwrap();
        assert_eq!(failed.last_execution_status, Some(ExecutionStatus::Failed));
        assert_eq!(failed.execution_count, 0);
    }

    #[tokio::test]
    async fn test_type_mismatched_config_is_skipped() {
        let mut t = trigger("t-1", "* * * * *");
        t.config = TriggerConfig::Manual;
        let (_store, executor, poller) = setup(vec![t]).await;

        let report = poller.tick(Utc::now()).await;

        assert_eq!(report.evaluated, 1);
        assert!(report.fired.is_empty());
        assert!(report.failures.is_empty());
        assert_eq!(executor.call_count(), 0);
    }

    #[tokio::test]
    async fn test_invalid_timezone_lands_in_failures() {
        let mut t = trigger("t-1", "* * * * *");
        schedule_mut(&mut t).timezone = Some("Mars/Olympus_Mons".into());
        let (_store, _executor, poller) = setup(vec![t]).await;

        let report = poller.tick(Utc::now()).await;

        assert_eq!(report.failures.len(), 1);
        assert!(report.failures[0].error.contains("Mars/Olympus_Mons"));
    }

    #[tokio::test]
    async fn test_is_due_is_pure() {
        let (_store, _executor, poller) = setup(vec![]).await;
        let schedule = ScheduleConfig {
            cron_expression: "0 * * * *".into(),
            timezone: None,
            start_date: None,
            end_date: None,
            max_executions: None,
        };
        let last = Some(Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap());
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 11, 0, 5).unwrap();

        for _ in 0..3 {
            assert!(poller
                .is_due(&schedule, chrono_tz::Tz::UTC, last, now)
                .expect("valid"));
        }
        assert!(!poller
            .is_due(&schedule, chrono_tz::Tz::UTC, Some(now), now)
            .expect("valid"));
    }

    #[tokio::test]
    async fn test_run_loop_ticks_and_shuts_down() {
        tokio::time::pause();

        let t = trigger("t-1", "* * * * *");
        let store = Arc::new(InMemoryTriggerStore::new());
        store.save(&t).await.expect("seed");
        let executor = MockExecutor::new();
        let poller = Arc::new(ScheduledTriggerPoller::new(
            Arc::clone(&store) as Arc<dyn TriggerStore>,
            Arc::clone(&executor) as Arc<dyn WorkflowExecutor>,
        ));

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let run = Arc::clone(&poller);
        let handle = tokio::spawn(async move { run.run(shutdown_rx).await });

        // First interval tick completes immediately.
        tokio::time::advance(Duration::from_millis(10)).await;
        tokio::task::yield_now().await;

        shutdown_tx.send(()).expect("send shutdown");
        handle.await.expect("poller task completes");
    }
}
