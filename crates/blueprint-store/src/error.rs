//! Error types for the version store

use crate::conflict::{describe, VersionConflict};
use crate::ids::{ElementId, RevisionId, VersionId};
use crate::revision::RevisionStatus;
use blueprint_snapshot::{HashError, PatchError, SnapshotError};

/// Version store and workflow errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Element does not exist
    #[error("element not found: {0}")]
    ElementNotFound(ElementId),

    /// Version does not exist
    #[error("version not found: {0}")]
    VersionNotFound(VersionId),

    /// Revision does not exist
    #[error("revision not found: {0}")]
    RevisionNotFound(RevisionId),

    /// No staged change for the pair
    #[error("no change staged for element {element} in revision {revision}")]
    ChangeNotFound {
        revision: RevisionId,
        element: ElementId,
    },

    /// Base versions moved; nothing was committed
    #[error("approval conflict: {}", describe(.conflicts))]
    Conflict { conflicts: Vec<VersionConflict> },

    /// Revision is not in a state that allows the operation
    #[error("revision {revision} cannot go from {from} to {to}")]
    InvalidTransition {
        revision: RevisionId,
        from: RevisionStatus,
        to: RevisionStatus,
    },

    /// Revision is already decided
    #[error("revision {revision} is {status}; only drafts accept changes")]
    NotDraft {
        revision: RevisionId,
        status: RevisionStatus,
    },

    /// Element belongs to another project than the revision
    #[error("element {element} is not part of the revision's project")]
    ProjectMismatch {
        revision: RevisionId,
        element: ElementId,
    },

    /// Patch failed for an element
    #[error("element {element}: {source}")]
    Patch {
        element: ElementId,
        #[source]
        source: PatchError,
    },

    /// Proposed snapshot is invalid
    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(#[from] SnapshotError),

    /// Content hashing failed
    #[error("hash error: {0}")]
    Hash(#[from] HashError),

    /// Persistence I/O failed
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Persistence (de)serialization failed
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Persisted image is internally inconsistent
    #[error("corrupt store image: {0}")]
    CorruptImage(String),
}

impl StoreError {
    /// Conflict detected at approval
    #[inline]
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Missing element/version/revision/change
    #[inline]
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::ElementNotFound(_)
                | Self::VersionNotFound(_)
                | Self::RevisionNotFound(_)
                | Self::ChangeNotFound { .. }
        )
    }

    /// Snapshot or patch rejected
    #[inline]
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Patch { .. } | Self::InvalidSnapshot(_))
    }

    /// Conflicting elements, if any
    #[must_use]
    pub fn conflicts(&self) -> &[VersionConflict] {
        match self {
            Self::Conflict { conflicts } => conflicts,
            _ => &[],
        }
    }
}
