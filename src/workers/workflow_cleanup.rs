use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::services::workflows::WorkflowRepository;

#[derive(Debug)]
struct CleanupJob {
    workflow_id: String,
    due: Instant,
}

/// Deferred deletion of ephemeral chat workflows.
///
/// Jobs are deleted once their grace period has passed, in scheduling order.
#[derive(Clone)]
pub struct WorkflowCleanupQueue {
    tx: mpsc::UnboundedSender<CleanupJob>,
    pending: Arc<watch::Sender<usize>>,
    grace: Duration,
}

/// Consumer side of a [`WorkflowCleanupQueue`], owned by the worker.
pub struct WorkflowCleanupReceiver {
    rx: mpsc::UnboundedReceiver<CleanupJob>,
    pending: Arc<watch::Sender<usize>>,
}

impl WorkflowCleanupQueue {
    pub fn new(grace: Duration) -> (Self, WorkflowCleanupReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let pending = Arc::new(watch::Sender::new(0));
        (
            Self {
                tx,
                pending: pending.clone(),
                grace,
            },
            WorkflowCleanupReceiver { rx, pending },
        )
    }

    pub fn schedule(&self, workflow_id: impl Into<String>) {
        let job = CleanupJob {
            workflow_id: workflow_id.into(),
            due: Instant::now() + self.grace,
        };
        self.pending.send_modify(|n| *n += 1);
        if let Err(e) = self.tx.send(job) {
            self.pending.send_modify(|n| *n = n.saturating_sub(1));
            warn!(workflow_id = %e.0.workflow_id, "[CleanupWorker] Queue closed, workflow will not be deleted");
        }
    }

    /// Number of scheduled deletions not yet carried out.
    pub fn pending(&self) -> usize {
        *self.pending.borrow()
    }

    /// Resolves once every scheduled deletion has been carried out.
    pub async fn wait_idle(&self) {
        let mut rx = self.pending.subscribe();
        let _ = rx.wait_for(|n| *n == 0).await;
    }
}

/// Background worker that deletes ephemeral workflows after their grace period.
///
/// On shutdown, remaining jobs are deleted immediately.
pub async fn workflow_cleanup_worker(
    workflows: Arc<dyn WorkflowRepository>,
    mut queue: WorkflowCleanupReceiver,
    shutdown: CancellationToken,
) {
    info!("[CleanupWorker] Started");

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            job = queue.rx.recv() => {
                let Some(job) = job else { break };
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        delete_workflow(workflows.as_ref(), &queue, &job).await;
                        break;
                    }
                    _ = sleep_until(job.due) => {
                        delete_workflow(workflows.as_ref(), &queue, &job).await;
                    }
                }
            }
        }
    }

    queue.rx.close();
    while let Ok(job) = queue.rx.try_recv() {
        delete_workflow(workflows.as_ref(), &queue, &job).await;
    }

    info!("[CleanupWorker] Stopped");
}

async fn delete_workflow(
    workflows: &dyn WorkflowRepository,
    queue: &WorkflowCleanupReceiver,
    job: &CleanupJob,
) {
    match workflows.delete(&job.workflow_id).await {
        Ok(()) => info!(workflow_id = %job.workflow_id, "[CleanupWorker] Deleted chat workflow"),
        Err(e) => error!(workflow_id = %job.workflow_id, error = %e, "[CleanupWorker] Failed to delete chat workflow"),
    }
    queue.pending.send_modify(|n| *n = n.saturating_sub(1));
}
