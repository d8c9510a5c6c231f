//! Error types for the projection synchronizer

use crate::rows::RowId;
use blueprint_snapshot::{HashError, SnapshotError};
use blueprint_store::{ElementId, StoreError};

/// Projection errors
#[derive(Debug, thiserror::Error)]
pub enum ProjectionError {
    /// Snapshot cannot be projected
    #[error("element {element} has an invalid snapshot: {source}")]
    InvalidSnapshot {
        element: ElementId,
        #[source]
        source: SnapshotError,
    },

    /// Row does not exist
    #[error("row not found: {0}")]
    RowNotFound(RowId),

    /// Element has nothing to project
    #[error("element {0} has no current version")]
    NoVersion(ElementId),

    /// Reading from the version store failed
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Snapshot could not be hashed
    #[error("hash error: {0}")]
    Hash(#[from] HashError),

    /// Saved projection is inconsistent
    #[error("corrupt projection image: {0}")]
    CorruptImage(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
