//! Knowledge sink
//!
//! After an approval commits, a text digest of each new version is handed to
//! a [`KnowledgeSink`]. Publication is best effort: a sink error is logged by
//! the service and never undoes the commit.

use blueprint_store::{ElementId, ProjectId, VersionId};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// One published digest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeEntry {
    pub project_id: ProjectId,
    pub element_id: ElementId,
    pub version_id: VersionId,
    pub title: String,
    pub body: String,
}

/// Sink failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("knowledge sink error: {0}")]
pub struct SinkError(pub String);

/// Destination for approved-version digests
#[async_trait::async_trait]
pub trait KnowledgeSink: Send + Sync {
    /// Publish one digest
    async fn publish(&self, entry: KnowledgeEntry) -> Result<(), SinkError>;
}

/// Sink that drops everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

#[async_trait::async_trait]
impl KnowledgeSink for NoopSink {
    async fn publish(&self, _entry: KnowledgeEntry) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Sink that keeps entries in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    entries: Mutex<Vec<KnowledgeEntry>>,
}

impl MemorySink {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Entries published so far, oldest first
    #[must_use]
    pub fn entries(&self) -> Vec<KnowledgeEntry> {
        self.entries.lock().clone()
    }

    /// Latest entry for an element
    #[must_use]
    pub fn latest(&self, element_id: ElementId) -> Option<KnowledgeEntry> {
        self.entries
            .lock()
            .iter()
            .rev()
            .find(|e| e.element_id == element_id)
            .cloned()
    }
}

#[async_trait::async_trait]
impl KnowledgeSink for MemorySink {
    async fn publish(&self, entry: KnowledgeEntry) -> Result<(), SinkError> {
        self.entries.lock().push(entry);
        Ok(())
    }
}
