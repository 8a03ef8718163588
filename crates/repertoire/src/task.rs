//! Background reconciliation tasks.
//!
//! Tasks run on the blocking pool (the move search is CPU-bound), bounded by a
//! semaphore, and publish progress through the shared `ProgressRegistry`.

use std::sync::Arc;

use chess_core::ChessRules;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::error::RepertoireError;
use crate::progress::{ProgressEvent, ProgressRegistry, ProgressSubscription, TaskId};
use crate::reconciler::{reconcile, PositionSample, ReconcileOptions, ReconcileOutcome};

/// Handle to a running reconciliation.
pub struct ReconcileTask {
    id: TaskId,
    cancel: CancellationToken,
    handle: JoinHandle<Result<ReconcileOutcome, RepertoireError>>,
}

impl ReconcileTask {
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Request cancellation; the task stops before its next sample.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub async fn join(self) -> Result<ReconcileOutcome, RepertoireError> {
        self.handle
            .await
            .map_err(|e| RepertoireError::TaskJoin(e.to_string()))?
    }
}

/// Spawns reconciliation tasks that share one rules engine and progress registry.
#[derive(Clone)]
pub struct TaskRunner {
    rules: Arc<dyn ChessRules>,
    registry: ProgressRegistry,
    semaphore: Arc<Semaphore>,
}

impl TaskRunner {
    pub fn new(rules: Arc<dyn ChessRules>, max_concurrent: usize) -> Self {
        Self {
            rules,
            registry: ProgressRegistry::new(),
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    pub fn registry(&self) -> &ProgressRegistry {
        &self.registry
    }

    pub fn subscribe(&self, id: TaskId) -> Option<ProgressSubscription> {
        self.registry.subscribe(id)
    }

    /// Start reconciling `samples` in the background.
    /// Must be called from within a tokio runtime.
    pub fn spawn_reconciliation(
        &self,
        samples: Vec<PositionSample>,
        options: ReconcileOptions,
    ) -> ReconcileTask {
        let mut reporter = self.registry.register();
        let id = reporter.id();
        let cancel = CancellationToken::new();

        let token = cancel.clone();
        let rules = self.rules.clone();
        let semaphore = self.semaphore.clone();

        let handle = tokio::spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .map_err(|e| RepertoireError::TaskJoin(e.to_string()))?;

            info!(task_id = %id, samples = samples.len(), "Reconciliation started");
            tokio::task::spawn_blocking(move || {
                reporter.report(ProgressEvent::running(0, "Starting"));
                let mut last_percent = 0u8;
                let result = reconcile(rules.as_ref(), &samples, &options, &token, |event| {
                    last_percent = event.percent_complete;
                    reporter.report(event);
                });

                match &result {
                    Ok(ReconcileOutcome::Completed(r)) => {
                        reporter.report(ProgressEvent::completed(format!(
                            "Built {} nodes with {} unlinked gaps",
                            r.fragment.len(),
                            r.gaps.len()
                        )));
                    }
                    Ok(ReconcileOutcome::Cancelled(_)) => {
                        info!(task_id = %id, "Reconciliation cancelled");
                        reporter.report(ProgressEvent::cancelled(last_percent, "Cancelled"));
                    }
                    Err(e) => {
                        error!(task_id = %id, error = %e, "Reconciliation failed");
                        reporter.report(ProgressEvent::failed(e.to_string()));
                    }
                }
                result
            })
            .await
            .map_err(|e| RepertoireError::TaskJoin(e.to_string()))?
        });

        ReconcileTask { id, cancel, handle }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chess_core::{ShakmatyRules, STARTING_FEN};

    fn runner() -> TaskRunner {
        TaskRunner::new(Arc::new(ShakmatyRules::new()), 2)
    }

    #[tokio::test]
    async fn test_task_completes_and_deregisters() {
        let runner = runner();
        let rules = ShakmatyRules::new();
        let e4 = rules.validate_move(STARTING_FEN, "e4").unwrap().position;

        let task = runner.spawn_reconciliation(
            vec![
                PositionSample::new(STARTING_FEN, 0, 0.0),
                PositionSample::new(e4, 30, 1.0),
            ],
            ReconcileOptions::default(),
        );
        let id = task.id();
        let outcome = task.join().await.unwrap();

        assert!(!outcome.is_cancelled());
        assert_eq!(outcome.reconciliation().fragment.len(), 2);
        assert!(!runner.registry().contains(id));
    }

    #[tokio::test]
    async fn test_task_failure_is_reported() {
        let runner = runner();
        let task = runner.spawn_reconciliation(Vec::new(), ReconcileOptions::default());
        let id = task.id();
        let result = task.join().await;
        assert!(matches!(result, Err(RepertoireError::InvalidInputSequence(_))));
        assert!(!runner.registry().contains(id));
    }
}
