//! Project-wide rebuild
//!
//! Walks every element of a project and rebuilds the ones whose current
//! content differs from the content they were last synced from. A failure on
//! one element is recorded and the walk continues.

use crate::error::ProjectionError;
use crate::rows::{DerivationRun, RunTrigger};
use crate::store::ProjectionStore;
use crate::sync::RebuildInput;
use blueprint_store::{ElementId, ProjectId, Store};
use serde::{Deserialize, Serialize};

/// Outcome of [`ProjectionStore::rebuild_project`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectRebuild {
    pub rebuilt: Vec<DerivationRun>,
    /// Already in sync, or nothing to project
    pub skipped: Vec<ElementId>,
    /// Elements whose rebuild failed, with the reason
    pub failed: Vec<(ElementId, String)>,
}

impl ProjectRebuild {
    /// Every element rebuilt or skipped
    #[inline]
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

impl ProjectionStore {
    /// Rebuild one element from its current version in `store`
    ///
    /// With `force` unset an element whose current version hashes to the
    /// content it was last synced from is left alone and `Ok(None)` is
    /// returned.
    ///
    /// # Errors
    /// [`ProjectionError::NoVersion`], [`ProjectionError::InvalidSnapshot`],
    /// or a store lookup failure
    pub fn rebuild_element(
        &self,
        store: &Store,
        element_id: ElementId,
        trigger: RunTrigger,
        force: bool,
    ) -> Result<Option<DerivationRun>, ProjectionError> {
        let element = store.element(element_id)?;
        let version = store
            .current_version(element_id)?
            .ok_or(ProjectionError::NoVersion(element_id))?;
        let in_sync = self
            .sync_marker(element_id)
            .is_some_and(|m| m.content_hash == version.content_hash);
        if !force && in_sync {
            tracing::debug!(element = %element_id, version = %version.id, "already in sync");
            return Ok(None);
        }
        let trigger = if force { RunTrigger::Forced } else { trigger };
        self.rebuild(&RebuildInput {
            element: &element,
            version_id: version.id,
            snapshot: &version.snapshot,
            trigger,
        })
        .map(Some)
    }

    /// Rebuild every element of a project
    pub fn rebuild_project(&self, store: &Store, project_id: ProjectId, force: bool) -> ProjectRebuild {
        self.rebuild_project_as(store, project_id, RunTrigger::Manual, force)
    }

    /// [`ProjectionStore::rebuild_project`] with an explicit trigger
    pub fn rebuild_project_as(
        &self,
        store: &Store,
        project_id: ProjectId,
        trigger: RunTrigger,
        force: bool,
    ) -> ProjectRebuild {
        let mut outcome = ProjectRebuild::default();
        for element in store.elements(project_id) {
            match self.rebuild_element(store, element.id, trigger, force) {
                Ok(Some(run)) => outcome.rebuilt.push(run),
                Ok(None) | Err(ProjectionError::NoVersion(_)) => outcome.skipped.push(element.id),
                Err(err) => {
                    tracing::warn!(element = %element.id, error = %err, "element rebuild failed");
                    outcome.failed.push((element.id, err.to_string()));
                }
            }
        }
        tracing::info!(
            project = %project_id,
            rebuilt = outcome.rebuilt.len(),
            skipped = outcome.skipped.len(),
            failed = outcome.failed.len(),
            "project rebuild finished"
        );
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blueprint_snapshot::{PatchOp, TextPath};
    use blueprint_store::StageRequest;
    use blueprint_test_utils::{purchase_snapshot, stage_set_snapshot};

    #[test]
    fn second_pass_is_skipped_by_sync_guard() {
        let store = Store::new();
        let project = ProjectId::new();
        store
            .create_element(project, "Wrap", Some(purchase_snapshot()), "seed")
            .unwrap();
        store
            .create_element(project, "Backdrop", Some(stage_set_snapshot()), "seed")
            .unwrap();
        let projection = ProjectionStore::new();

        let first = projection.rebuild_project(&store, project, false);
        assert_eq!(first.rebuilt.len(), 2);
        assert!(first.is_clean());

        let second = projection.rebuild_project(&store, project, false);
        assert!(second.rebuilt.is_empty());
        assert_eq!(second.skipped.len(), 2);

        let forced = projection.rebuild_project(&store, project, true);
        assert_eq!(forced.rebuilt.len(), 2);
        assert!(forced.rebuilt.iter().all(|r| r.trigger == RunTrigger::Forced));
    }

    #[test]
    fn unchanged_content_under_a_new_version_is_skipped() {
        let store = Store::new();
        let project = ProjectId::new();
        let element = store
            .create_element(project, "Wrap", Some(purchase_snapshot()), "seed")
            .unwrap();
        let projection = ProjectionStore::new();
        projection.rebuild_project(&store, project, false);
        let synced = projection.sync_marker(element.id).unwrap();

        let notes = store.current_snapshot(element.id).unwrap().free_text.notes;
        for text in ["call supplier".to_string(), notes] {
            let draft = store.create_draft(project, "notes", "edit", true).revision_id;
            store
                .stage_change(
                    draft,
                    StageRequest::patch(
                        element.id,
                        None,
                        vec![PatchOp::set_text(TextPath::Notes, text)],
                    ),
                )
                .unwrap();
            store.approve(draft, "alice").unwrap();
        }
        let current = store.current_version(element.id).unwrap().unwrap();
        assert_ne!(current.id, synced.version_id);
        assert_eq!(current.content_hash, synced.content_hash);

        let outcome = projection.rebuild_project(&store, project, false);
        assert!(outcome.rebuilt.is_empty());
        assert_eq!(outcome.skipped, vec![element.id]);
        assert_eq!(projection.runs(element.id).len(), 1);
    }

    #[test]
    fn elements_without_versions_are_skipped() {
        let store = Store::new();
        let project = ProjectId::new();
        let empty = store.create_element(project, "Idea", None, "seed").unwrap();
        let projection = ProjectionStore::new();

        let outcome = projection.rebuild_project(&store, project, false);
        assert_eq!(outcome.skipped, vec![empty.id]);
        assert!(matches!(
            projection.rebuild_element(&store, empty.id, RunTrigger::Manual, false),
            Err(ProjectionError::NoVersion(_))
        ));
    }
}
