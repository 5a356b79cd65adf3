//! Compensation (rollback) ledger.
//!
//! Whatever drives a run registers reversal actions here as it commits
//! irreversible side effects; when the run fails, [`compensate`] undoes the
//! committed work in reverse-registration order. Compensation is best-effort
//! and exhaustive: one action's failure never stops the remaining actions.
//!
//! [`compensate`]: CompensationLedger::compensate

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde::Serialize;

use super::errors::CompensationError;

/// A single reversal step registered during a run.
#[async_trait]
pub trait CompensationAction: Send + Sync {
    /// Undo the side effect this action was registered for.
    async fn execute(&self) -> Result<(), CompensationError>;

    /// Human-readable description for logs and error reports.
    fn describe(&self) -> String;
}

/// Full accounting of one compensation pass.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct CompensationResult {
    pub run_id: String,
    /// True iff every action succeeded (trivially true for an empty list).
    pub success: bool,
    pub total_actions: usize,
    pub successful_actions: usize,
    pub failed_actions: usize,
    pub errors: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl CompensationResult {
    fn empty(run_id: &str) -> Self {
        Self {
            run_id: run_id.to_string(),
            success: true,
            total_actions: 0,
            successful_actions: 0,
            failed_actions: 0,
            errors: Vec::new(),
            timestamp: Utc::now(),
        }
    }
}

/// Per-run stacks of reversal actions.
///
/// `register_compensation` may race `compensate` for the same run id: the
/// take-and-clear inside `compensate` happens under one mutex acquisition,
/// so an action lands either in the pass being executed or in a fresh list
/// for a later pass, never nowhere.
#[derive(Default)]
pub struct CompensationLedger {
    actions: Mutex<HashMap<String, Vec<Box<dyn CompensationAction>>>>,
}

impl CompensationLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a reversal action to the run's stack.
    pub fn register_compensation(&self, run_id: &str, action: Box<dyn CompensationAction>) {
        tracing::debug!(
            run_id = %run_id,
            action = %action.describe(),
            "registering compensation action"
        );
        self.actions
            .lock()
            .entry(run_id.to_string())
            .or_default()
            .push(action);
    }

    /// Execute all registered actions for a failed run, newest first.
    ///
    /// The run's list is taken and cleared atomically; an unknown or empty
    /// run id yields an immediate success with zero counts. Each action's
    /// failure is captured in the result's error list without halting the
    /// remaining (earlier) actions.
    pub async fn compensate(&self, run_id: &str, reason: &str) -> CompensationResult {
        tracing::info!(run_id = %run_id, reason = %reason, "starting compensation");

        let taken = { self.actions.lock().remove(run_id) };
        let actions = match taken {
            Some(actions) if !actions.is_empty() => actions,
            _ => {
                tracing::info!(run_id = %run_id, "no compensation actions registered");
                return CompensationResult::empty(run_id);
            }
        };

        let total_actions = actions.len();
        let mut successful_actions = 0;
        let mut failed_actions = 0;
        let mut errors = Vec::new();

        for action in actions.iter().rev() {
            let description = action.describe();
            tracing::debug!(run_id = %run_id, action = %description, "executing compensation action");
            match action.execute().await {
                Ok(()) => successful_actions += 1,
                Err(e) => {
                    failed_actions += 1;
                    let message =
                        format!("Failed to execute compensation action '{description}': {e}");
                    tracing::error!(run_id = %run_id, "{message}");
                    errors.push(message);
                }
            }
        }

        tracing::info!(
            run_id = %run_id,
            "compensation completed: {successful_actions}/{total_actions} actions successful"
        );

        CompensationResult {
            run_id: run_id.to_string(),
            success: failed_actions == 0,
            total_actions,
            successful_actions,
            failed_actions,
            errors,
            timestamp: Utc::now(),
        }
    }

    /// Discard the run's actions without executing them (successful completion).
    pub fn clear_compensation(&self, run_id: &str) {
        if let Some(actions) = self.actions.lock().remove(run_id) {
            tracing::debug!(
                run_id = %run_id,
                count = actions.len(),
                "cleared compensation actions for completed run"
            );
        }
    }

    /// Descriptions of the actions currently registered for a run.
    pub fn pending_descriptions(&self, run_id: &str) -> Vec<String> {
        self.actions
            .lock()
            .get(run_id)
            .map(|actions| actions.iter().map(|a| a.describe()).collect())
            .unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// Built-in actions
// ---------------------------------------------------------------------------

struct DeleteFile {
    path: PathBuf,
}

#[async_trait]
impl CompensationAction for DeleteFile {
    async fn execute(&self) -> Result<(), CompensationError> {
        if self.path.exists() {
            std::fs::remove_file(&self.path).map_err(|e| CompensationError::Action {
                message: format!("failed to delete {}: {e}", self.path.display()),
            })?;
            tracing::info!(path = %self.path.display(), "deleted file during compensation");
        }
        Ok(())
    }

    fn describe(&self) -> String {
        format!("Delete file: {}", self.path.display())
    }
}

/// Delete a file; a no-op if the file no longer exists.
pub fn delete_file(path: impl Into<PathBuf>) -> Box<dyn CompensationAction> {
    Box::new(DeleteFile { path: path.into() })
}

struct DeleteDirectory {
    path: PathBuf,
}

#[async_trait]
impl CompensationAction for DeleteDirectory {
    async fn execute(&self) -> Result<(), CompensationError> {
        remove_tree(&self.path)
    }

    fn describe(&self) -> String {
        format!("Delete directory: {}", self.path.display())
    }
}

/// Delete a directory tree, deepest paths first; a no-op if absent.
pub fn delete_directory(path: impl Into<PathBuf>) -> Box<dyn CompensationAction> {
    Box::new(DeleteDirectory { path: path.into() })
}

struct Custom {
    description: String,
    logic: Box<dyn Fn() -> BoxFuture<'static, Result<(), CompensationError>> + Send + Sync>,
}

#[async_trait]
impl CompensationAction for Custom {
    async fn execute(&self) -> Result<(), CompensationError> {
        (self.logic)().await
    }

    fn describe(&self) -> String {
        self.description.clone()
    }
}

/// Wrap an async closure as a compensation action.
pub fn custom<F, Fut>(description: impl Into<String>, logic: F) -> Box<dyn CompensationAction>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<(), CompensationError>> + Send + 'static,
{
    Box::new(Custom {
        description: description.into(),
        logic: Box::new(move || -> BoxFuture<'static, Result<(), CompensationError>> {
            Box::pin(logic())
        }),
    })
}

/// Remove a run-scoped cached artifact: `{cache_dir}/{artifact_id}`.
pub fn cleanup_cached_artifact(
    cache_dir: impl Into<PathBuf>,
    artifact_id: &str,
) -> Box<dyn CompensationAction> {
    let path = cache_dir.into().join(artifact_id);
    let description = format!("Cleanup cached artifact: {artifact_id}");
    custom(description, move || {
        let path = path.clone();
        async move {
            if path.exists() {
                std::fs::remove_file(&path).map_err(|e| CompensationError::Action {
                    message: format!("failed to delete {}: {e}", path.display()),
                })?;
                tracing::info!(path = %path.display(), "cleaned up cached artifact");
            }
            Ok(())
        }
    })
}

/// Remove a run's generated result directory: `{results_dir}/{run_id}`.
pub fn cleanup_run_results(
    results_dir: impl Into<PathBuf>,
    run_id: &str,
) -> Box<dyn CompensationAction> {
    let path = results_dir.into().join(run_id);
    let description = format!("Cleanup generated results for run: {run_id}");
    custom(description, move || {
        let path = path.clone();
        async move { remove_tree(&path) }
    })
}

/// Delete `root` and everything under it, children before parents.
///
/// Individual path failures are logged and skipped so one undeletable entry
/// doesn't leave the rest of the tree behind.
fn remove_tree(root: &Path) -> Result<(), CompensationError> {
    if !root.exists() || !root.is_dir() {
        return Ok(());
    }

    let mut paths = Vec::new();
    collect_paths(root, &mut paths).map_err(|e| CompensationError::Action {
        message: format!("failed to walk {}: {e}", root.display()),
    })?;
    paths.push(root.to_path_buf());

    for path in &paths {
        let removed = if path.is_dir() {
            std::fs::remove_dir(path)
        } else {
            std::fs::remove_file(path)
        };
        if let Err(e) = removed {
            tracing::warn!(path = %path.display(), "failed to delete during compensation: {e}");
        }
    }

    tracing::info!(path = %root.display(), "deleted directory during compensation");
    Ok(())
}

/// Depth-first walk pushing descendants before the directory that holds them.
fn collect_paths(dir: &Path, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_paths(&path, out)?;
        }
        out.push(path);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    /// Records execution order and optionally fails.
    fn recording_action(
        label: &'static str,
        order: Arc<Mutex<Vec<&'static str>>>,
        fail: bool,
    ) -> Box<dyn CompensationAction> {
        custom(label, move || {
            let order = Arc::clone(&order);
            async move {
                order.lock().push(label);
                if fail {
                    Err(CompensationError::Action {
                        message: "intentional failure".into(),
                    })
                } else {
                    Ok(())
                }
            }
        })
    }

    #[tokio::test]
    async fn test_compensate_runs_in_reverse_order() {
        let ledger = CompensationLedger::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        ledger.register_compensation("run-1", recording_action("A", Arc::clone(&order), false));
        ledger.register_compensation("run-1", recording_action("B", Arc::clone(&order), false));
        ledger.register_compensation("run-1", recording_action("C", Arc::clone(&order), false));

        let result = ledger.compensate("run-1", "task failed").await;

        assert!(result.success);
        assert_eq!(result.total_actions, 3);
        assert_eq!(result.successful_actions, 3);
        assert_eq!(*order.lock(), vec!["C", "B", "A"]);
    }

    #[tokio::test]
    async fn test_one_failure_does_not_halt_the_rest() {
        let ledger = CompensationLedger::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        ledger.register_compensation("run-1", recording_action("A", Arc::clone(&order), false));
        ledger.register_compensation("run-1", recording_action("B", Arc::clone(&order), true));
        ledger.register_compensation("run-1", recording_action("C", Arc::clone(&order), false));

        let result = ledger.compensate("run-1", "task failed").await;

        assert!(!result.success);
        assert_eq!(result.total_actions, 3);
        assert_eq!(result.successful_actions, 2);
        assert_eq!(result.failed_actions, 1);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].contains("'B'"));
        // A and C both ran despite B failing.
        assert_eq!(*order.lock(), vec!["C", "B", "A"]);
    }

    #[tokio::test]
    async fn test_compensate_unknown_run_is_trivial_success() {
        let ledger = CompensationLedger::new();

        let result = ledger.compensate("no-such-run", "whatever").await;

        assert!(result.success);
        assert_eq!(result.total_actions, 0);
        assert_eq!(result.successful_actions, 0);
        assert_eq!(result.failed_actions, 0);
        assert!(result.errors.is_empty());
    }

    #[tokio::test]
    async fn test_clear_then_compensate_executes_nothing() {
        let ledger = CompensationLedger::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        ledger.register_compensation("run-1", recording_action("A", Arc::clone(&order), false));
        ledger.clear_compensation("run-1");

        let result = ledger.compensate("run-1", "task failed").await;

        assert!(result.success);
        assert_eq!(result.total_actions, 0);
        assert!(order.lock().is_empty());
    }

    #[tokio::test]
    async fn test_list_is_consumed_exactly_once() {
        let ledger = CompensationLedger::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        ledger.register_compensation("run-1", recording_action("A", Arc::clone(&order), false));
        let first = ledger.compensate("run-1", "task failed").await;
        assert_eq!(first.total_actions, 1);

        // A registration after the take lands in a fresh list for a later pass.
        ledger.register_compensation("run-1", recording_action("B", Arc::clone(&order), false));
        let second = ledger.compensate("run-1", "task failed again").await;

        assert_eq!(second.total_actions, 1);
        assert_eq!(*order.lock(), vec!["A", "B"]);
    }

    #[tokio::test]
    async fn test_pending_descriptions() {
        let ledger = CompensationLedger::new();
        ledger.register_compensation("run-1", delete_file("/tmp/some-file"));

        let pending = ledger.pending_descriptions("run-1");
        assert_eq!(pending.len(), 1);
        assert!(pending[0].contains("some-file"));
        assert!(ledger.pending_descriptions("other-run").is_empty());
    }

    #[tokio::test]
    async fn test_delete_file_removes_and_is_idempotent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("artifact.bin");
        std::fs::write(&path, b"data").expect("write");

        let action = delete_file(&path);
        action.execute().await.expect("delete succeeds");
        assert!(!path.exists());

        // Absent file is a no-op, not an error.
        action.execute().await.expect("no-op on absent file");
    }

    #[tokio::test]
    async fn test_delete_directory_removes_nested_tree() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path().join("results");
        std::fs::create_dir_all(root.join("nested/deeper")).expect("mkdir");
        std::fs::write(root.join("top.txt"), b"x").expect("write");
        std::fs::write(root.join("nested/deeper/leaf.txt"), b"y").expect("write");

        delete_directory(&root).execute().await.expect("delete");
        assert!(!root.exists());
    }

    #[tokio::test]
    async fn test_cleanup_run_results_removes_run_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        let run_dir = dir.path().join("run-42");
        std::fs::create_dir_all(&run_dir).expect("mkdir");
        std::fs::write(run_dir.join("out.tif"), b"z").expect("write");

        cleanup_run_results(dir.path(), "run-42")
            .execute()
            .await
            .expect("cleanup");
        assert!(!run_dir.exists());
    }

    #[tokio::test]
    async fn test_cleanup_cached_artifact_removes_cache_entry() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("img-7");
        std::fs::write(&path, b"cached").expect("write");

        cleanup_cached_artifact(dir.path(), "img-7")
            .execute()
            .await
            .expect("cleanup");
        assert!(!path.exists());
    }
}
