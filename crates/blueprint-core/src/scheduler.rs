//! Asynchronous projection rebuilds
//!
//! Approvals enqueue a project rebuild and return immediately; a full queue
//! drops the request instead of waiting. A single worker task drains the
//! queue in order, so derived rows catch up with the version store shortly
//! after each commit.
//!
//! Requests for a project that is already queued are coalesced into the
//! pending job. [`RebuildScheduler::flush`] resolves once every job queued
//! before it has finished.

use crate::error::ServiceError;
use blueprint_projection::{ProjectRebuild, ProjectionStore, RunTrigger};
use blueprint_store::{ProjectId, Store};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};

enum RebuildJob {
    Project(ProjectId),
    Flush(oneshot::Sender<()>),
}

/// Queued request state
#[derive(Debug, Clone, Copy)]
struct Pending {
    trigger: RunTrigger,
    force: bool,
}

/// Handle to the rebuild worker
///
/// Dropping the handle closes the queue; the worker finishes what is
/// already queued and exits.
#[derive(Debug)]
pub struct RebuildScheduler {
    sender: mpsc::Sender<RebuildJob>,
    pending: Arc<DashMap<ProjectId, Pending>>,
    outcomes: Arc<DashMap<ProjectId, ProjectRebuild>>,
}

impl std::fmt::Debug for RebuildJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Project(id) => write!(f, "Project({id})"),
            Self::Flush(_) => write!(f, "Flush"),
        }
    }
}

impl RebuildScheduler {
    /// Start the worker on the current tokio runtime
    #[must_use]
    pub fn spawn(
        store: Arc<Store>,
        projection: Arc<ProjectionStore>,
        capacity: usize,
        force_resync: bool,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let pending = Arc::new(DashMap::new());
        let outcomes = Arc::new(DashMap::new());
        tokio::spawn(worker(
            receiver,
            store,
            projection,
            Arc::clone(&pending),
            Arc::clone(&outcomes),
            force_resync,
        ));
        Self {
            sender,
            pending,
            outcomes,
        }
    }

    /// Queue a project rebuild without waiting
    ///
    /// A request for a project that is already queued merges into the
    /// pending job; `force` sticks once any request sets it.
    ///
    /// # Errors
    /// - [`ServiceError::RebuildQueueFull`] if the queue is at capacity
    /// - [`ServiceError::SchedulerClosed`] if the worker has stopped
    pub fn schedule(
        &self,
        project_id: ProjectId,
        trigger: RunTrigger,
        force: bool,
    ) -> Result<(), ServiceError> {
        match self.pending.entry(project_id) {
            Entry::Occupied(mut queued) => {
                queued.get_mut().force |= force;
                tracing::debug!(project = %project_id, "rebuild already queued");
                return Ok(());
            }
            Entry::Vacant(slot) => {
                slot.insert(Pending { trigger, force });
            }
        }
        if let Err(err) = self.sender.try_send(RebuildJob::Project(project_id)) {
            self.pending.remove(&project_id);
            return Err(match err {
                TrySendError::Full(_) => ServiceError::RebuildQueueFull(project_id),
                TrySendError::Closed(_) => ServiceError::SchedulerClosed,
            });
        }
        tracing::debug!(project = %project_id, ?trigger, force, "rebuild queued");
        Ok(())
    }

    /// Wait until every job queued so far has run
    ///
    /// # Errors
    /// [`ServiceError::SchedulerClosed`] if the worker has stopped
    pub async fn flush(&self) -> Result<(), ServiceError> {
        let (ack, done) = oneshot::channel();
        self.sender
            .send(RebuildJob::Flush(ack))
            .await
            .map_err(|_| ServiceError::SchedulerClosed)?;
        done.await.map_err(|_| ServiceError::SchedulerClosed)
    }

    /// Outcome of the last rebuild the worker ran for a project
    #[must_use]
    pub fn last_outcome(&self, project_id: ProjectId) -> Option<ProjectRebuild> {
        self.outcomes.get(&project_id).map(|o| o.value().clone())
    }

    /// Projects waiting in the queue
    #[inline]
    #[must_use]
    pub fn queued(&self) -> usize {
        self.pending.len()
    }
}

async fn worker(
    mut receiver: mpsc::Receiver<RebuildJob>,
    store: Arc<Store>,
    projection: Arc<ProjectionStore>,
    pending: Arc<DashMap<ProjectId, Pending>>,
    outcomes: Arc<DashMap<ProjectId, ProjectRebuild>>,
    force_resync: bool,
) {
    while let Some(job) = receiver.recv().await {
        match job {
            RebuildJob::Project(project_id) => {
                // Taken before running so requests arriving mid-rebuild queue again
                let Some((_, request)) = pending.remove(&project_id) else {
                    continue;
                };
                let outcome = projection.rebuild_project_as(
                    &store,
                    project_id,
                    request.trigger,
                    request.force || force_resync,
                );
                if !outcome.is_clean() {
                    tracing::warn!(
                        project = %project_id,
                        failed = outcome.failed.len(),
                        "scheduled rebuild had failures"
                    );
                }
                outcomes.insert(project_id, outcome);
            }
            RebuildJob::Flush(ack) => {
                let _ = ack.send(());
            }
        }
    }
    tracing::debug!("rebuild worker stopped");
}
