//! Immutable element versions

use crate::ids::{ElementId, RevisionId, VersionId};
use blueprint_snapshot::{ChangeStats, ContentHash, ElementSnapshot};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How a version came to exist
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionOrigin {
    /// Initial snapshot supplied at element creation
    Seed,
    /// Committed by a revision approval
    Revision,
}

/// One immutable snapshot in an element's history
///
/// Versions form a chain through `based_on_version_id` and are never
/// mutated once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementVersion {
    pub id: VersionId,
    pub element_id: ElementId,
    pub snapshot: ElementSnapshot,
    pub content_hash: ContentHash,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    pub origin: VersionOrigin,
    pub origin_revision_id: Option<RevisionId>,
    pub based_on_version_id: Option<VersionId>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub change_stats: ChangeStats,
}

impl ElementVersion {
    /// Whether `other` holds identical content
    #[inline]
    #[must_use]
    pub fn same_content(&self, other: &ElementVersion) -> bool {
        self.content_hash == other.content_hash
    }
}
