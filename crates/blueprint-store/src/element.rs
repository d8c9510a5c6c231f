//! Elements and their lifecycle status

use crate::ids::{ElementId, ProjectId, VersionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of an element
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementStatus {
    /// Proposed, not yet confirmed by an approval
    #[default]
    Suggested,
    /// Confirmed deliverable
    Active,
    /// Kept for history, no longer worked on
    Archived,
}

/// A versioned deliverable
///
/// Only the version pointers and status change over an element's lifetime;
/// content lives in immutable [`ElementVersion`](crate::ElementVersion)s.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Element {
    pub id: ElementId,
    pub project_id: ProjectId,
    pub name: String,
    pub status: ElementStatus,
    /// Current working snapshot
    pub active_version_id: Option<VersionId>,
    /// Last externally published baseline
    pub published_version_id: Option<VersionId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Element {
    /// New suggested element with no versions
    #[must_use]
    pub fn new(project_id: ProjectId, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: ElementId::new(),
            project_id,
            name: name.into(),
            status: ElementStatus::Suggested,
            active_version_id: None,
            published_version_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Version that approvals replay against: active, else published
    #[inline]
    #[must_use]
    pub fn current_version_id(&self) -> Option<VersionId> {
        self.active_version_id.or(self.published_version_id)
    }

    /// Point the element at a freshly committed version
    pub(crate) fn advance(&mut self, version_id: VersionId) {
        self.active_version_id = Some(version_id);
        if self.status == ElementStatus::Suggested {
            self.status = ElementStatus::Active;
        }
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_version_prefers_active() {
        let mut element = Element::new(ProjectId::new(), "Arch");
        assert_eq!(element.current_version_id(), None);

        let published = VersionId::new();
        element.published_version_id = Some(published);
        assert_eq!(element.current_version_id(), Some(published));

        let active = VersionId::new();
        element.active_version_id = Some(active);
        assert_eq!(element.current_version_id(), Some(active));
    }

    #[test]
    fn advance_activates_suggested_only() {
        let mut element = Element::new(ProjectId::new(), "Arch");
        element.advance(VersionId::new());
        assert_eq!(element.status, ElementStatus::Active);

        element.status = ElementStatus::Archived;
        element.advance(VersionId::new());
        assert_eq!(element.status, ElementStatus::Archived);
    }
}
