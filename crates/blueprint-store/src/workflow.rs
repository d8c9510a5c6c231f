//! Draft/revision workflow
//!
//! Changes are staged against a draft revision and committed together by
//! [`Store::approve`]. Approval runs in three phases under one write lock:
//!
//! 1. **Check**: every change's base version must still be the element's
//!    current version; any mismatch aborts with [`StoreError::Conflict`].
//! 2. **Compute**: every new snapshot is built and validated against the
//!    live base; any failure aborts.
//! 3. **Commit**: versions are appended and pointers advanced.
//!
//! Nothing is written until phases 1 and 2 succeed for every element, so an
//! approval is all-or-nothing.

use crate::conflict::VersionConflict;
use crate::error::StoreError;
use crate::ids::{ElementId, ProjectId, RevisionId, VersionId};
use crate::revision::{ProposedChange, Revision, RevisionChange, RevisionStatus, StageRequest};
use crate::store::{Provenance, Store};
use crate::version::VersionOrigin;
use blueprint_snapshot::{apply, ChangeStats, ElementSnapshot, PatchOp, Section, SectionValue};
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Result of [`Store::create_draft`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DraftHandle {
    pub revision_id: RevisionId,
    /// An existing open draft was returned
    pub reused: bool,
}

/// One element committed by an approval
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommittedVersion {
    pub element_id: ElementId,
    pub version_id: VersionId,
    pub previous_version_id: Option<VersionId>,
    pub change_stats: ChangeStats,
}

/// Outcome of a successful approval
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Approval {
    pub revision_id: RevisionId,
    pub project_id: ProjectId,
    pub committed: Vec<CommittedVersion>,
}

impl Store {
    /// Open a draft for `(project, origin_tab)`
    ///
    /// Returns the newest open draft for the pair unless `force_new` is set.
    pub fn create_draft(
        &self,
        project_id: ProjectId,
        origin_tab: &str,
        action_type: &str,
        force_new: bool,
    ) -> DraftHandle {
        let mut state = self.state.write();
        if !force_new {
            if let Some(existing) = state
                .revisions
                .values()
                .rev()
                .find(|r| r.is_draft() && r.project_id == project_id && r.origin_tab == origin_tab)
            {
                return DraftHandle {
                    revision_id: existing.id,
                    reused: true,
                };
            }
        }

        let revision = Revision::draft(project_id, origin_tab, action_type);
        let revision_id = revision.id;
        state.revisions.insert(revision_id, revision);
        tracing::debug!(revision = %revision_id, origin_tab, "draft created");
        DraftHandle {
            revision_id,
            reused: false,
        }
    }

    /// Set summary and tags carried onto committed versions
    ///
    /// # Errors
    /// [`StoreError::RevisionNotFound`], [`StoreError::NotDraft`]
    pub fn describe_revision(
        &self,
        revision_id: RevisionId,
        summary: impl Into<String>,
        tags: Vec<String>,
    ) -> Result<Revision, StoreError> {
        let mut state = self.state.write();
        let revision = draft_mut(&mut state.revisions, revision_id)?;
        revision.summary = summary.into();
        revision.tags = tags;
        revision.updated_at = Utc::now();
        Ok(revision.clone())
    }

    /// Stage a change for one element
    ///
    /// A patch staged onto an existing patch change for the same element is
    /// appended to its op list, keeping the original base version. Any other
    /// combination replaces the staged change. Proposed snapshots are
    /// validated here so bad agent output is rejected before approval.
    ///
    /// # Errors
    /// - [`StoreError::RevisionNotFound`] / [`StoreError::ElementNotFound`]
    /// - [`StoreError::NotDraft`] if the revision is decided
    /// - [`StoreError::ProjectMismatch`]
    /// - [`StoreError::InvalidSnapshot`] for an invalid proposed snapshot
    pub fn stage_change(
        &self,
        revision_id: RevisionId,
        request: StageRequest,
    ) -> Result<RevisionChange, StoreError> {
        if let ProposedChange::ProposedSnapshot(snapshot) = &request.change {
            snapshot.validate()?;
        }

        let mut state = self.state.write();
        let element_id = request.element_id;
        let project_id = state.element(element_id)?.project_id;
        let revision = draft_mut(&mut state.revisions, revision_id)?;
        if revision.project_id != project_id {
            return Err(StoreError::ProjectMismatch {
                revision: revision_id,
                element: element_id,
            });
        }
        if !revision.affected_element_ids.contains(&element_id) {
            revision.affected_element_ids.push(element_id);
        }
        revision.updated_at = Utc::now();

        let changes = state.changes.entry(revision_id).or_default();
        let staged = match changes.get_mut(&element_id) {
            Some(existing) if existing.change.is_patch() && request.change.is_patch() => {
                if let (ProposedChange::PatchOps(current), ProposedChange::PatchOps(ops)) =
                    (&mut existing.change, request.change)
                {
                    current.extend(ops);
                }
                existing.updated_at = Utc::now();
                existing.clone()
            }
            _ => {
                let staged = RevisionChange {
                    revision_id,
                    element_id,
                    base_version_id: request.base_version_id,
                    change: request.change,
                    replace_mask: request.replace_mask,
                    updated_at: Utc::now(),
                };
                changes.insert(element_id, staged.clone());
                staged
            }
        };

        tracing::debug!(revision = %revision_id, element = %element_id, "change staged");
        Ok(staged)
    }

    /// Approve a draft, committing every staged change atomically
    ///
    /// # Errors
    /// - [`StoreError::Conflict`] naming every element whose base moved
    /// - [`StoreError::Patch`] / [`StoreError::InvalidSnapshot`] if a change
    ///   does not produce a valid snapshot on the live base
    /// - [`StoreError::InvalidTransition`] if the revision is not a draft
    ///
    /// On error the revision stays a draft and no version is written.
    pub fn approve(&self, revision_id: RevisionId, actor: &str) -> Result<Approval, StoreError> {
        let mut state = self.state.write();
        let revision = state.revision(revision_id)?.clone();
        ensure_transition(&revision, RevisionStatus::Approved)?;

        let changes: Vec<RevisionChange> = state
            .changes
            .get(&revision_id)
            .map(|c| c.values().cloned().collect())
            .unwrap_or_default();

        let mut conflicts = Vec::new();
        for change in &changes {
            let current = state.element(change.element_id)?.current_version_id();
            if let Some(conflict) =
                VersionConflict::check(change.element_id, change.base_version_id, current)
            {
                conflicts.push(conflict);
            }
        }
        if !conflicts.is_empty() {
            tracing::warn!(
                revision = %revision_id,
                conflicts = conflicts.len(),
                "approval aborted on base-version conflict"
            );
            return Err(StoreError::Conflict { conflicts });
        }

        let mut planned = Vec::with_capacity(changes.len());
        for change in &changes {
            let element = state.element(change.element_id)?;
            let live = state.live_snapshot(element)?;
            planned.push((change.element_id, resolve_change(live, change)?));
        }

        let provenance = Provenance {
            origin: VersionOrigin::Revision,
            revision: Some(&revision),
            actor,
        };
        let mut committed = Vec::with_capacity(planned.len());
        for (element_id, snapshot) in planned {
            let previous_version_id = state.element(element_id)?.current_version_id();
            let (version_id, change_stats) =
                state.commit_version(element_id, snapshot, &provenance)?;
            committed.push(CommittedVersion {
                element_id,
                version_id,
                previous_version_id,
                change_stats,
            });
        }

        if let Some(stored) = state.revisions.get_mut(&revision_id) {
            stored.status = RevisionStatus::Approved;
            stored.decided_at = Some(Utc::now());
            stored.decided_by = Some(actor.to_string());
            stored.updated_at = Utc::now();
        }

        tracing::info!(
            revision = %revision_id,
            elements = committed.len(),
            "revision approved"
        );
        Ok(Approval {
            revision_id,
            project_id: revision.project_id,
            committed,
        })
    }

    /// Reject a draft
    ///
    /// # Errors
    /// [`StoreError::RevisionNotFound`], [`StoreError::InvalidTransition`]
    pub fn discard(&self, revision_id: RevisionId, actor: &str) -> Result<Revision, StoreError> {
        let mut state = self.state.write();
        let revision = state
            .revisions
            .get_mut(&revision_id)
            .ok_or(StoreError::RevisionNotFound(revision_id))?;
        ensure_transition(revision, RevisionStatus::Rejected)?;
        revision.status = RevisionStatus::Rejected;
        revision.decided_at = Some(Utc::now());
        revision.decided_by = Some(actor.to_string());
        revision.updated_at = Utc::now();
        tracing::info!(revision = %revision_id, "revision discarded");
        Ok(revision.clone())
    }

    /// Open drafts of a project, oldest first
    #[must_use]
    pub fn list_drafts(&self, project_id: ProjectId) -> Vec<Revision> {
        self.revisions(project_id)
            .into_iter()
            .filter(Revision::is_draft)
            .collect()
    }

    /// Every revision of a project, oldest first
    #[must_use]
    pub fn revisions(&self, project_id: ProjectId) -> Vec<Revision> {
        self.state
            .read()
            .revisions
            .values()
            .filter(|r| r.project_id == project_id)
            .cloned()
            .collect()
    }

    /// Look up a revision
    ///
    /// # Errors
    /// [`StoreError::RevisionNotFound`]
    pub fn revision(&self, revision_id: RevisionId) -> Result<Revision, StoreError> {
        self.state.read().revision(revision_id).cloned()
    }

    /// Staged changes of a revision, in staging order
    ///
    /// # Errors
    /// [`StoreError::RevisionNotFound`]
    pub fn changes(&self, revision_id: RevisionId) -> Result<Vec<RevisionChange>, StoreError> {
        let state = self.state.read();
        state.revision(revision_id)?;
        Ok(state
            .changes
            .get(&revision_id)
            .map(|c| c.values().cloned().collect())
            .unwrap_or_default())
    }

    /// Staged change for one element
    ///
    /// # Errors
    /// [`StoreError::RevisionNotFound`], [`StoreError::ChangeNotFound`]
    pub fn change(
        &self,
        revision_id: RevisionId,
        element_id: ElementId,
    ) -> Result<RevisionChange, StoreError> {
        let state = self.state.read();
        state.revision(revision_id)?;
        state
            .changes
            .get(&revision_id)
            .and_then(|c| c.get(&element_id))
            .cloned()
            .ok_or(StoreError::ChangeNotFound {
                revision: revision_id,
                element: element_id,
            })
    }
}

fn draft_mut(
    revisions: &mut indexmap::IndexMap<RevisionId, Revision>,
    revision_id: RevisionId,
) -> Result<&mut Revision, StoreError> {
    let revision = revisions
        .get_mut(&revision_id)
        .ok_or(StoreError::RevisionNotFound(revision_id))?;
    if revision.is_draft() {
        Ok(revision)
    } else {
        Err(StoreError::NotDraft {
            revision: revision_id,
            status: revision.status,
        })
    }
}

fn ensure_transition(revision: &Revision, to: RevisionStatus) -> Result<(), StoreError> {
    if revision.status.can_transition_to(to) {
        Ok(())
    } else {
        Err(StoreError::InvalidTransition {
            revision: revision.id,
            from: revision.status,
            to,
        })
    }
}

/// Build the snapshot a change produces on top of `live`
///
/// # Errors
/// [`StoreError::Patch`] or [`StoreError::InvalidSnapshot`]
pub fn resolve_change(
    live: &ElementSnapshot,
    change: &RevisionChange,
) -> Result<ElementSnapshot, StoreError> {
    let patched = |ops: &[PatchOp]| {
        apply(live, ops).map_err(|source| StoreError::Patch {
            element: change.element_id,
            source,
        })
    };
    match &change.change {
        ProposedChange::PatchOps(ops) => patched(ops.as_slice()),
        ProposedChange::ProposedSnapshot(proposed) if change.replace_mask.is_empty() => {
            proposed.validate()?;
            Ok(proposed.clone())
        }
        ProposedChange::ProposedSnapshot(proposed) => {
            patched(mask_ops(live, proposed, &change.replace_mask).as_slice())
        }
    }
}

/// Express a masked replacement as section replacements on the live base
///
/// A live tombstone is lifted only for a key the proposal brings back as a
/// line of a masked section. Tombstones the proposal adds are carried over;
/// every other live tombstone stays in place.
fn mask_ops(live: &ElementSnapshot, proposed: &ElementSnapshot, mask: &[Section]) -> Vec<PatchOp> {
    let mut ops = Vec::new();
    let mut seen = Vec::with_capacity(mask.len());
    for section in mask {
        if seen.contains(section) {
            continue;
        }
        seen.push(*section);

        if let Some(entity) = section.entity() {
            for key in live.tombstones.keys(entity) {
                if proposed.contains_key(entity, key.as_str()) {
                    ops.push(PatchOp::restore(entity, key.clone()));
                }
            }
        }
        ops.push(PatchOp::ReplaceSection(SectionValue::from_snapshot(
            proposed, *section,
        )));
        if let Some(entity) = section.entity() {
            for key in proposed.tombstones.keys(entity) {
                if !live.tombstones.contains(entity, key.as_str()) {
                    ops.push(PatchOp::tombstone(entity, key.clone()));
                }
            }
        }
    }
    ops
}
