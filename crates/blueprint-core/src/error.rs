//! Error types for the element service
//!
//! [`ServiceError`] wraps the per-crate errors so callers match on one type:
//! - Validation and tombstone failures from the patch engine
//! - Conflicts, missing records and workflow errors from the store
//! - Rebuild failures from the projection
//! - Configuration problems

use crate::config::ConfigError;
use blueprint_projection::ProjectionError;
use blueprint_snapshot::{PatchError, SnapshotError};
use blueprint_store::{ProjectId, StoreError, VersionConflict};

/// Main service error type
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// Store operation failed
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Projection operation failed
    #[error(transparent)]
    Projection(#[from] ProjectionError),

    /// Patch could not be applied
    #[error(transparent)]
    Patch(#[from] PatchError),

    /// Snapshot failed validation
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Rebuild worker is gone
    #[error("rebuild scheduler stopped")]
    SchedulerClosed,

    /// Rebuild queue is at capacity; the project was not queued
    #[error("rebuild queue full, project {0} not queued")]
    RebuildQueueFull(ProjectId),

    /// State file could not be read or written
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// State file is not valid JSON for this schema
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ServiceError {
    /// Redrafting against the fresh base and retrying may succeed
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.is_conflict()
    }

    /// Approval aborted on a stale base version
    #[inline]
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Store(e) if e.is_conflict())
    }

    /// Referenced record does not exist
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Store(e) => e.is_not_found(),
            Self::Projection(ProjectionError::RowNotFound(_)) => true,
            Self::Projection(ProjectionError::Store(e)) => e.is_not_found(),
            _ => false,
        }
    }

    /// Rejected input: malformed snapshot, bad patch or tombstone violation
    #[must_use]
    pub fn is_validation(&self) -> bool {
        match self {
            Self::Store(e) => e.is_validation(),
            Self::Patch(_) | Self::Snapshot(_) => true,
            Self::Projection(ProjectionError::InvalidSnapshot { .. }) => true,
            _ => false,
        }
    }

    /// Conflicting elements, empty unless this is a conflict
    #[must_use]
    pub fn conflicts(&self) -> &[VersionConflict] {
        match self {
            Self::Store(e) => e.conflicts(),
            _ => &[],
        }
    }
}
