//! Dry-run of an approval

use crate::conflict::VersionConflict;
use crate::error::StoreError;
use crate::ids::{ElementId, RevisionId, VersionId};
use crate::store::Store;
use crate::workflow::resolve_change;
use blueprint_snapshot::{ChangeStats, ElementSnapshot};
use serde::{Deserialize, Serialize};

/// What approving would do for one element
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePreview {
    pub element_id: ElementId,
    pub base_version_id: Option<VersionId>,
    pub current_version_id: Option<VersionId>,
    /// Set when approval would abort on this element
    pub conflict: Option<VersionConflict>,
    pub outcome: PreviewOutcome,
}

/// Result of replaying a change on the live base
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum PreviewOutcome {
    /// Change applies cleanly
    Ready {
        snapshot: ElementSnapshot,
        stats: ChangeStats,
    },
    /// Change would be rejected
    Invalid { reason: String },
}

impl ChangePreview {
    /// Would commit without error
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.conflict.is_none() && matches!(self.outcome, PreviewOutcome::Ready { .. })
    }

    /// Resulting snapshot, if the change applies
    #[must_use]
    pub fn snapshot(&self) -> Option<&ElementSnapshot> {
        match &self.outcome {
            PreviewOutcome::Ready { snapshot, .. } => Some(snapshot),
            PreviewOutcome::Invalid { .. } => None,
        }
    }
}

impl Store {
    /// Compute every staged change against the live base without writing
    ///
    /// Conflicts and invalid changes are reported per element instead of
    /// failing the whole call.
    ///
    /// # Errors
    /// [`StoreError::RevisionNotFound`]
    pub fn preview(&self, revision_id: RevisionId) -> Result<Vec<ChangePreview>, StoreError> {
        let state = self.state.read();
        state.revision(revision_id)?;
        let Some(changes) = state.changes.get(&revision_id) else {
            return Ok(Vec::new());
        };

        let previews = changes
            .values()
            .map(|change| {
                let element = match state.element(change.element_id) {
                    Ok(element) => element,
                    Err(err) => {
                        return ChangePreview {
                            element_id: change.element_id,
                            base_version_id: change.base_version_id,
                            current_version_id: None,
                            conflict: None,
                            outcome: PreviewOutcome::Invalid {
                                reason: err.to_string(),
                            },
                        }
                    }
                };
                let current = element.current_version_id();
                let outcome = state
                    .live_snapshot(element)
                    .and_then(|live| {
                        let snapshot = resolve_change(live, change)?;
                        let stats = ChangeStats::between(live, &snapshot);
                        Ok(PreviewOutcome::Ready { snapshot, stats })
                    })
                    .unwrap_or_else(|err| PreviewOutcome::Invalid {
                        reason: err.to_string(),
                    });
                ChangePreview {
                    element_id: change.element_id,
                    base_version_id: change.base_version_id,
                    current_version_id: current,
                    conflict: VersionConflict::check(
                        change.element_id,
                        change.base_version_id,
                        current,
                    ),
                    outcome,
                }
            })
            .collect();
        Ok(previews)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::ProjectId;
    use crate::revision::StageRequest;
    use blueprint_snapshot::{Entity, LineKey, PatchOp, TaskSpec};

    #[test]
    fn preview_reports_without_committing() {
        let store = Store::new();
        let project = ProjectId::new();
        let mut seed = ElementSnapshot::new();
        seed.tasks
            .push(TaskSpec::new(LineKey::new("tsk_1").unwrap(), "Paint"));
        let element = store
            .create_element(project, "Wall", Some(seed), "tester")
            .unwrap();
        let draft = store.create_draft(project, "tasks", "edit", false).revision_id;
        store
            .stage_change(
                draft,
                StageRequest::patch(
                    element.id,
                    element.active_version_id,
                    vec![PatchOp::remove(Entity::Tasks, LineKey::new("tsk_1").unwrap())],
                ),
            )
            .unwrap();

        let previews = store.preview(draft).unwrap();
        assert_eq!(previews.len(), 1);
        assert!(previews[0].is_clean());
        assert!(previews[0].snapshot().unwrap().tasks.is_empty());
        assert_eq!(store.current_snapshot(element.id).unwrap().tasks.len(), 1);
        assert!(store.revision(draft).unwrap().is_draft());
    }

    #[test]
    fn preview_flags_tombstone_violation() {
        let store = Store::new();
        let project = ProjectId::new();
        let mut seed = ElementSnapshot::new();
        seed.tombstones
            .add(Entity::Tasks, LineKey::new("tsk_1").unwrap());
        let element = store
            .create_element(project, "Wall", Some(seed), "tester")
            .unwrap();
        let draft = store.create_draft(project, "tasks", "edit", false).revision_id;
        store
            .stage_change(
                draft,
                StageRequest::patch(
                    element.id,
                    None,
                    vec![PatchOp::upsert(TaskSpec::new(
                        LineKey::new("tsk_1").unwrap(),
                        "Again",
                    ))],
                ),
            )
            .unwrap();

        let preview = &store.preview(draft).unwrap()[0];
        assert!(!preview.is_clean());
        match &preview.outcome {
            PreviewOutcome::Invalid { reason } => assert!(reason.contains("tsk_1")),
            other => panic!("unexpected outcome {other:?}"),
        }
    }
}
