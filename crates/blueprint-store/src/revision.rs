//! Revisions and their per-element changes

use crate::ids::{ElementId, ProjectId, RevisionId, VersionId};
use blueprint_snapshot::{ElementSnapshot, PatchOp, Section};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Revision lifecycle: `draft -> approved | rejected`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevisionStatus {
    #[default]
    Draft,
    Approved,
    Rejected,
}

impl RevisionStatus {
    /// States reachable from `self`
    #[must_use]
    pub fn allowed_transitions(self) -> &'static [RevisionStatus] {
        match self {
            Self::Draft => &[Self::Approved, Self::Rejected],
            Self::Approved | Self::Rejected => &[],
        }
    }

    /// Whether `self -> to` is legal
    #[inline]
    #[must_use]
    pub fn can_transition_to(self, to: RevisionStatus) -> bool {
        self.allowed_transitions().contains(&to)
    }

    /// No further transitions possible
    #[inline]
    #[must_use]
    pub fn is_terminal(self) -> bool {
        self.allowed_transitions().is_empty()
    }
}

impl fmt::Display for RevisionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Draft => "draft",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        })
    }
}

/// Draft container grouping per-element changes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Revision {
    pub id: RevisionId,
    pub project_id: ProjectId,
    pub status: RevisionStatus,
    /// Editing surface the draft was opened from
    pub origin_tab: String,
    pub action_type: String,
    /// Elements with a staged change, in staging order
    pub affected_element_ids: Vec<ElementId>,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub decided_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub decided_by: Option<String>,
}

impl Revision {
    /// New draft
    #[must_use]
    pub fn draft(
        project_id: ProjectId,
        origin_tab: impl Into<String>,
        action_type: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: RevisionId::new(),
            project_id,
            status: RevisionStatus::Draft,
            origin_tab: origin_tab.into(),
            action_type: action_type.into(),
            affected_element_ids: Vec::new(),
            summary: String::new(),
            tags: Vec::new(),
            created_at: now,
            updated_at: now,
            decided_at: None,
            decided_by: None,
        }
    }

    /// Still open for staging
    #[inline]
    #[must_use]
    pub fn is_draft(&self) -> bool {
        self.status == RevisionStatus::Draft
    }
}

/// Proposed content for one element
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ProposedChange {
    /// Ops replayed against the live snapshot at approval
    PatchOps(Vec<PatchOp>),
    /// Full replacement snapshot
    ProposedSnapshot(ElementSnapshot),
}

impl ProposedChange {
    /// Patch mode
    #[inline]
    #[must_use]
    pub fn is_patch(&self) -> bool {
        matches!(self, Self::PatchOps(_))
    }
}

/// One element's change inside a revision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevisionChange {
    pub revision_id: RevisionId,
    pub element_id: ElementId,
    /// Version the change was drafted against
    pub base_version_id: Option<VersionId>,
    pub change: ProposedChange,
    /// Sections taken from a proposed snapshot; empty means all
    #[serde(default)]
    pub replace_mask: Vec<Section>,
    pub updated_at: DateTime<Utc>,
}

/// Input to [`Store::stage_change`](crate::Store::stage_change)
#[derive(Debug, Clone, PartialEq)]
pub struct StageRequest {
    pub element_id: ElementId,
    pub base_version_id: Option<VersionId>,
    pub change: ProposedChange,
    pub replace_mask: Vec<Section>,
}

impl StageRequest {
    /// Patch-mode request
    #[must_use]
    pub fn patch(
        element_id: ElementId,
        base_version_id: Option<VersionId>,
        ops: Vec<PatchOp>,
    ) -> Self {
        Self {
            element_id,
            base_version_id,
            change: ProposedChange::PatchOps(ops),
            replace_mask: Vec::new(),
        }
    }

    /// Full-snapshot request
    #[must_use]
    pub fn snapshot(
        element_id: ElementId,
        base_version_id: Option<VersionId>,
        snapshot: ElementSnapshot,
    ) -> Self {
        Self {
            element_id,
            base_version_id,
            change: ProposedChange::ProposedSnapshot(snapshot),
            replace_mask: Vec::new(),
        }
    }

    /// Restrict a snapshot replacement to `sections`
    #[must_use]
    pub fn with_mask(mut self, sections: impl IntoIterator<Item = Section>) -> Self {
        self.replace_mask = sections.into_iter().collect();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn draft_can_be_decided_once() {
        assert!(RevisionStatus::Draft.can_transition_to(RevisionStatus::Approved));
        assert!(RevisionStatus::Draft.can_transition_to(RevisionStatus::Rejected));
        assert!(!RevisionStatus::Approved.can_transition_to(RevisionStatus::Rejected));
        assert!(!RevisionStatus::Rejected.can_transition_to(RevisionStatus::Draft));
        assert!(RevisionStatus::Approved.is_terminal());
    }

    #[test]
    fn proposed_change_wire_names() {
        let change = ProposedChange::PatchOps(Vec::new());
        let json = serde_json::to_value(&change).unwrap();
        assert_eq!(json, serde_json::json!({"patchOps": []}));
    }
}
