//! Element service
//!
//! [`ElementService`] ties the version store, the projection and the
//! knowledge sink together. Approval runs in three stages:
//!
//! 1. The store commits every element of the revision atomically, or none
//! 2. A digest of each new version goes to the knowledge sink (best effort)
//! 3. A project rebuild is queued; derived rows catch up asynchronously

use crate::config::ServiceConfig;
use crate::error::ServiceError;
use crate::knowledge::{KnowledgeEntry, KnowledgeSink, NoopSink, SinkError};
use crate::scheduler::RebuildScheduler;
use blueprint_projection::{
    ProjectRebuild, ProjectionStore, RebuildInput, RowCounts, RunTrigger,
};
use blueprint_snapshot::{ElementSnapshot, SnapshotDigest};
use blueprint_store::{
    Approval, ChangePreview, CommittedVersion, DraftHandle, Element, ElementId, ElementVersion,
    ProjectId, Revision, RevisionChange, RevisionId, StageRequest, Store, VersionId,
};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::time::timeout;

/// Dry-run result for one staged element
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotPreview {
    #[serde(flatten)]
    pub change: ChangePreview,
    /// Rows the projection would hold after approval; `None` when the change
    /// would not commit
    pub rows: Option<RowCounts>,
}

/// Facade over store, projection, sink and scheduler
pub struct ElementService {
    config: ServiceConfig,
    store: Arc<Store>,
    projection: Arc<ProjectionStore>,
    sink: Arc<dyn KnowledgeSink>,
    digest: SnapshotDigest,
    scheduler: Option<RebuildScheduler>,
}

impl std::fmt::Debug for ElementService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElementService")
            .field("config", &self.config)
            .field("scheduler", &self.scheduler)
            .finish_non_exhaustive()
    }
}

impl ElementService {
    /// Service over an existing store with an empty projection
    ///
    /// Must be called inside a tokio runtime when rebuilds are enabled.
    ///
    /// # Errors
    /// [`ServiceError::Config`] if the configuration is out of range
    pub fn new(config: ServiceConfig, store: Store) -> Result<Self, ServiceError> {
        Self::with_parts(config, store, ProjectionStore::new())
    }

    /// Service over an existing store and its derived rows
    ///
    /// # Errors
    /// [`ServiceError::Config`] if the configuration is out of range
    pub fn with_parts(
        config: ServiceConfig,
        store: Store,
        projection: ProjectionStore,
    ) -> Result<Self, ServiceError> {
        config.validate()?;
        let store = Arc::new(store);
        let projection = Arc::new(projection);
        let scheduler = config.rebuild.enabled.then(|| {
            RebuildScheduler::spawn(
                Arc::clone(&store),
                Arc::clone(&projection),
                config.rebuild.queue_capacity,
                config.rebuild.force_resync,
            )
        });
        Ok(Self {
            digest: SnapshotDigest::with_max_chars(config.knowledge.digest_max_chars),
            config,
            store,
            projection,
            sink: Arc::new(NoopSink),
            scheduler,
        })
    }

    /// Service over an empty store
    ///
    /// # Errors
    /// [`ServiceError::Config`]
    pub fn in_memory(config: ServiceConfig) -> Result<Self, ServiceError> {
        Self::new(config, Store::new())
    }

    /// With a knowledge sink
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn KnowledgeSink>) -> Self {
        self.sink = sink;
        self
    }

    #[inline]
    #[must_use]
    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Underlying version store
    #[inline]
    #[must_use]
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Derived rows
    #[inline]
    #[must_use]
    pub fn projection(&self) -> &ProjectionStore {
        &self.projection
    }

    // -- elements --

    /// Create an element; a seeded element is queued for projection
    ///
    /// # Errors
    /// [`ServiceError::Store`] if the seed is invalid
    pub fn create_element(
        &self,
        project_id: ProjectId,
        name: &str,
        seed: Option<ElementSnapshot>,
        actor: &str,
    ) -> Result<Element, ServiceError> {
        let seeded = seed.is_some();
        let element = self.store.create_element(project_id, name, seed, actor)?;
        if seeded {
            self.queue_rebuild(project_id, RunTrigger::Manual);
        }
        Ok(element)
    }

    /// # Errors
    /// [`ServiceError::Store`] if the element does not exist
    pub fn archive_element(&self, element_id: ElementId) -> Result<Element, ServiceError> {
        Ok(self.store.archive_element(element_id)?)
    }

    /// Publish the active version
    ///
    /// # Errors
    /// [`ServiceError::Store`] if the element does not exist
    pub fn publish_element(&self, element_id: ElementId) -> Result<Option<VersionId>, ServiceError> {
        Ok(self.store.publish_element(element_id)?)
    }

    /// Delete an element, its history and its derived rows
    ///
    /// # Errors
    /// [`ServiceError::Store`] if the element does not exist
    pub fn delete_element(&self, element_id: ElementId) -> Result<Element, ServiceError> {
        let element = self.store.delete_element(element_id)?;
        let rows = self.projection.remove_element(element_id);
        tracing::info!(element = %element_id, rows, "element rows removed");
        Ok(element)
    }

    /// Versions newest first
    ///
    /// # Errors
    /// [`ServiceError::Store`] if the element does not exist
    pub fn history(&self, element_id: ElementId) -> Result<Vec<ElementVersion>, ServiceError> {
        Ok(self.store.history(element_id)?)
    }

    /// # Errors
    /// [`ServiceError::Store`] if the element does not exist
    pub fn current_snapshot(&self, element_id: ElementId) -> Result<ElementSnapshot, ServiceError> {
        Ok(self.store.current_snapshot(element_id)?)
    }

    // -- drafts --

    /// Open a draft, reusing the open one for the tab when configured to
    pub fn create_draft(
        &self,
        project_id: ProjectId,
        origin_tab: &str,
        action_type: &str,
        force_new: bool,
    ) -> DraftHandle {
        let force_new = force_new || !self.config.drafts.reuse_open_drafts;
        self.store
            .create_draft(project_id, origin_tab, action_type, force_new)
    }

    /// # Errors
    /// [`ServiceError::Store`]
    pub fn describe_revision(
        &self,
        revision_id: RevisionId,
        summary: &str,
        tags: Vec<String>,
    ) -> Result<Revision, ServiceError> {
        Ok(self.store.describe_revision(revision_id, summary, tags)?)
    }

    /// Stage a patch or proposed snapshot
    ///
    /// # Errors
    /// [`ServiceError::Store`]
    pub fn stage_change(
        &self,
        revision_id: RevisionId,
        request: StageRequest,
    ) -> Result<RevisionChange, ServiceError> {
        Ok(self.store.stage_change(revision_id, request)?)
    }

    /// Reject a draft
    ///
    /// # Errors
    /// [`ServiceError::Store`]
    pub fn discard(&self, revision_id: RevisionId, actor: &str) -> Result<Revision, ServiceError> {
        Ok(self.store.discard(revision_id, actor)?)
    }

    #[must_use]
    pub fn list_drafts(&self, project_id: ProjectId) -> Vec<Revision> {
        self.store.list_drafts(project_id)
    }

    /// Approve a draft
    ///
    /// Knowledge publication and rebuild scheduling happen after the commit
    /// and cannot fail the call. Each publish is bounded by
    /// `knowledge.publish_timeout_ms`; scheduling never waits for queue space.
    ///
    /// # Errors
    /// [`ServiceError::Store`]; conflicts report every stale element
    pub async fn approve(&self, revision_id: RevisionId, actor: &str) -> Result<Approval, ServiceError> {
        let approval = self.store.approve(revision_id, actor)?;

        if self.config.knowledge.enabled {
            self.publish_digests(approval.project_id, &approval.committed)
                .await;
        }
        self.queue_rebuild(approval.project_id, RunTrigger::Approval);
        Ok(approval)
    }

    /// What approving would produce, including derived row counts
    ///
    /// # Errors
    /// [`ServiceError::Store`] if the revision does not exist
    pub fn preview_snapshots(&self, revision_id: RevisionId) -> Result<Vec<SnapshotPreview>, ServiceError> {
        let previews = self.store.preview(revision_id)?;
        previews
            .into_iter()
            .map(|change| -> Result<SnapshotPreview, ServiceError> {
                let rows = match change.snapshot() {
                    Some(snapshot) if change.conflict.is_none() => {
                        let element = self.store.element(change.element_id)?;
                        let counts = self.projection.preview_counts(&RebuildInput {
                            element: &element,
                            version_id: change.current_version_id.unwrap_or_default(),
                            snapshot,
                            trigger: RunTrigger::Manual,
                        })?;
                        Some(counts)
                    }
                    _ => None,
                };
                Ok(SnapshotPreview { change, rows })
            })
            .collect()
    }

    // -- projection --

    /// Rebuild a project now, on the caller's task
    #[must_use]
    pub fn rebuild_now(&self, project_id: ProjectId, force: bool) -> ProjectRebuild {
        self.projection
            .rebuild_project(&self.store, project_id, force)
    }

    /// Wait for queued rebuilds to finish
    ///
    /// # Errors
    /// [`ServiceError::SchedulerClosed`]
    pub async fn flush(&self) -> Result<(), ServiceError> {
        match &self.scheduler {
            Some(scheduler) => scheduler.flush().await,
            None => Ok(()),
        }
    }

    /// Outcome of the last scheduled rebuild of a project
    #[must_use]
    pub fn last_rebuild(&self, project_id: ProjectId) -> Option<ProjectRebuild> {
        self.scheduler
            .as_ref()
            .and_then(|s| s.last_outcome(project_id))
    }

    fn queue_rebuild(&self, project_id: ProjectId, trigger: RunTrigger) {
        let Some(scheduler) = &self.scheduler else {
            return;
        };
        if let Err(err) = scheduler.schedule(project_id, trigger, false) {
            tracing::warn!(project = %project_id, error = %err, "rebuild not scheduled");
        }
    }

    async fn publish_digests(&self, project_id: ProjectId, committed: &[CommittedVersion]) {
        let entries: Vec<KnowledgeEntry> = committed
            .iter()
            .filter_map(|c| {
                let element = self.store.element(c.element_id).ok()?;
                let version = self.store.version(c.version_id).ok()?;
                Some(KnowledgeEntry {
                    project_id,
                    element_id: c.element_id,
                    version_id: c.version_id,
                    body: self.digest.render(&element.name, &version.snapshot),
                    title: element.name,
                })
            })
            .collect();

        let limit = self.config.knowledge.publish_timeout();
        let results = join_all(entries.into_iter().map(|entry| {
            let element_id = entry.element_id;
            let sink = Arc::clone(&self.sink);
            async move {
                let result = timeout(limit, sink.publish(entry))
                    .await
                    .unwrap_or_else(|_| {
                        Err(SinkError(format!("timed out after {}ms", limit.as_millis())))
                    });
                (element_id, result)
            }
        }))
        .await;

        for (element_id, result) in results {
            match result {
                Ok(()) => tracing::debug!(element = %element_id, "digest published"),
                Err(err) => {
                    tracing::warn!(element = %element_id, error = %err, "digest publication failed");
                }
            }
        }
    }
}
