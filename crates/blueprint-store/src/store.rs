//! In-memory version arena
//!
//! [`Store`] holds elements, their append-only version chains and the
//! revision/change tables behind one `RwLock`. Versions are only ever
//! appended; the element's `active_version_id` is the single mutable
//! pointer into its chain.

use crate::element::{Element, ElementStatus};
use crate::error::StoreError;
use crate::ids::{ElementId, ProjectId, RevisionId, VersionId};
use crate::revision::{Revision, RevisionChange};
use crate::version::{ElementVersion, VersionOrigin};
use blueprint_snapshot::{ChangeStats, ContentHash, ElementSnapshot};
use chrono::Utc;
use indexmap::IndexMap;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Element version store
#[derive(Debug, Default)]
pub struct Store {
    pub(crate) state: RwLock<StoreState>,
}

#[derive(Debug, Default)]
pub(crate) struct StoreState {
    pub(crate) elements: IndexMap<ElementId, Element>,
    pub(crate) versions: IndexMap<VersionId, ElementVersion>,
    /// Per-element chain, oldest first
    pub(crate) history: HashMap<ElementId, Vec<VersionId>>,
    pub(crate) revisions: IndexMap<RevisionId, Revision>,
    pub(crate) changes: HashMap<RevisionId, IndexMap<ElementId, RevisionChange>>,
}

/// Provenance for a version about to be appended
pub(crate) struct Provenance<'a> {
    pub(crate) origin: VersionOrigin,
    pub(crate) revision: Option<&'a Revision>,
    pub(crate) actor: &'a str,
}

impl StoreState {
    pub(crate) fn element(&self, id: ElementId) -> Result<&Element, StoreError> {
        self.elements.get(&id).ok_or(StoreError::ElementNotFound(id))
    }

    pub(crate) fn revision(&self, id: RevisionId) -> Result<&Revision, StoreError> {
        self.revisions.get(&id).ok_or(StoreError::RevisionNotFound(id))
    }

    /// Snapshot at the element's current pointer; empty if it has none
    pub(crate) fn live_snapshot(&self, element: &Element) -> Result<&ElementSnapshot, StoreError> {
        static EMPTY: std::sync::OnceLock<ElementSnapshot> = std::sync::OnceLock::new();
        match element.current_version_id() {
            Some(id) => self
                .versions
                .get(&id)
                .map(|v| &v.snapshot)
                .ok_or(StoreError::VersionNotFound(id)),
            None => Ok(EMPTY.get_or_init(ElementSnapshot::default)),
        }
    }

    /// Append a version and advance the element's pointer
    pub(crate) fn commit_version(
        &mut self,
        element_id: ElementId,
        snapshot: ElementSnapshot,
        provenance: &Provenance<'_>,
    ) -> Result<(VersionId, ChangeStats), StoreError> {
        let element = self.element(element_id)?;
        let previous = element.current_version_id();
        let change_stats = ChangeStats::between(self.live_snapshot(element)?, &snapshot);
        let content_hash = ContentHash::of_snapshot(&snapshot)?;

        let (summary, tags) = match provenance.revision {
            Some(rev) if !rev.summary.trim().is_empty() => (rev.summary.clone(), rev.tags.clone()),
            Some(rev) => (change_stats.summary(), rev.tags.clone()),
            None => (change_stats.summary(), Vec::new()),
        };

        let version = ElementVersion {
            id: VersionId::new(),
            element_id,
            snapshot,
            content_hash,
            created_at: Utc::now(),
            created_by: provenance.actor.to_string(),
            origin: provenance.origin,
            origin_revision_id: provenance.revision.map(|r| r.id),
            based_on_version_id: previous,
            tags,
            summary,
            change_stats: change_stats.clone(),
        };
        let version_id = version.id;

        self.versions.insert(version_id, version);
        self.history.entry(element_id).or_default().push(version_id);
        if let Some(element) = self.elements.get_mut(&element_id) {
            element.advance(version_id);
        }

        tracing::debug!(
            element = %element_id,
            version = %version_id,
            hash = %content_hash.short(),
            "version committed"
        );
        Ok((version_id, change_stats))
    }
}

impl Store {
    /// Empty store
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an element, optionally seeding its first version
    ///
    /// The element starts `suggested`. A seed snapshot is validated and
    /// becomes the active version immediately.
    ///
    /// # Errors
    /// [`StoreError::InvalidSnapshot`] if the seed fails validation
    pub fn create_element(
        &self,
        project_id: ProjectId,
        name: impl Into<String>,
        seed: Option<ElementSnapshot>,
        actor: &str,
    ) -> Result<Element, StoreError> {
        if let Some(snapshot) = &seed {
            snapshot.validate()?;
        }

        let mut state = self.state.write();
        let element = Element::new(project_id, name);
        let id = element.id;
        state.elements.insert(id, element);

        if let Some(snapshot) = seed {
            let provenance = Provenance {
                origin: VersionOrigin::Seed,
                revision: None,
                actor,
            };
            if let Err(err) = state.commit_version(id, snapshot, &provenance) {
                state.elements.shift_remove(&id);
                return Err(err);
            }
            // A seed is not a confirmation
            if let Some(element) = state.elements.get_mut(&id) {
                element.status = ElementStatus::Suggested;
            }
        }

        tracing::info!(element = %id, project = %project_id, "element created");
        state.element(id).cloned()
    }

    /// Look up an element
    ///
    /// # Errors
    /// [`StoreError::ElementNotFound`]
    pub fn element(&self, id: ElementId) -> Result<Element, StoreError> {
        self.state.read().element(id).cloned()
    }

    /// Elements of a project, in creation order
    #[must_use]
    pub fn elements(&self, project_id: ProjectId) -> Vec<Element> {
        self.state
            .read()
            .elements
            .values()
            .filter(|e| e.project_id == project_id)
            .cloned()
            .collect()
    }

    /// Mark an element archived
    ///
    /// # Errors
    /// [`StoreError::ElementNotFound`]
    pub fn archive_element(&self, id: ElementId) -> Result<Element, StoreError> {
        let mut state = self.state.write();
        let element = state
            .elements
            .get_mut(&id)
            .ok_or(StoreError::ElementNotFound(id))?;
        element.status = ElementStatus::Archived;
        element.updated_at = Utc::now();
        Ok(element.clone())
    }

    /// Delete an element together with its whole version history
    ///
    /// Pending draft changes for the element are dropped as well.
    ///
    /// # Errors
    /// [`StoreError::ElementNotFound`]
    pub fn delete_element(&self, id: ElementId) -> Result<Element, StoreError> {
        let mut state = self.state.write();
        let element = state
            .elements
            .shift_remove(&id)
            .ok_or(StoreError::ElementNotFound(id))?;

        for version_id in state.history.remove(&id).unwrap_or_default() {
            state.versions.shift_remove(&version_id);
        }

        let drafts: Vec<RevisionId> = state
            .revisions
            .values()
            .filter(|r| r.is_draft())
            .map(|r| r.id)
            .collect();
        for revision_id in drafts {
            if let Some(changes) = state.changes.get_mut(&revision_id) {
                changes.shift_remove(&id);
            }
            if let Some(revision) = state.revisions.get_mut(&revision_id) {
                revision.affected_element_ids.retain(|e| *e != id);
            }
        }

        tracing::info!(element = %id, "element deleted");
        Ok(element)
    }

    /// Copy the active pointer to the published pointer
    ///
    /// Returns the published version, or `None` if the element has no
    /// active version yet.
    ///
    /// # Errors
    /// [`StoreError::ElementNotFound`]
    pub fn publish_element(&self, id: ElementId) -> Result<Option<VersionId>, StoreError> {
        let mut state = self.state.write();
        let element = state
            .elements
            .get_mut(&id)
            .ok_or(StoreError::ElementNotFound(id))?;
        if element.active_version_id.is_some() {
            element.published_version_id = element.active_version_id;
            element.updated_at = Utc::now();
        }
        Ok(element.published_version_id)
    }

    /// Versions of an element, newest first
    ///
    /// # Errors
    /// [`StoreError::ElementNotFound`]
    pub fn history(&self, id: ElementId) -> Result<Vec<ElementVersion>, StoreError> {
        let state = self.state.read();
        state.element(id)?;
        Ok(state
            .history
            .get(&id)
            .map(|chain| {
                chain
                    .iter()
                    .rev()
                    .filter_map(|v| state.versions.get(v).cloned())
                    .collect()
            })
            .unwrap_or_default())
    }

    /// Look up a version
    ///
    /// # Errors
    /// [`StoreError::VersionNotFound`]
    pub fn version(&self, id: VersionId) -> Result<ElementVersion, StoreError> {
        self.state
            .read()
            .versions
            .get(&id)
            .cloned()
            .ok_or(StoreError::VersionNotFound(id))
    }

    /// Version at the element's current pointer
    ///
    /// # Errors
    /// [`StoreError::ElementNotFound`] or a dangling pointer
    pub fn current_version(&self, id: ElementId) -> Result<Option<ElementVersion>, StoreError> {
        let state = self.state.read();
        match state.element(id)?.current_version_id() {
            Some(version_id) => state
                .versions
                .get(&version_id)
                .cloned()
                .map(Some)
                .ok_or(StoreError::VersionNotFound(version_id)),
            None => Ok(None),
        }
    }

    /// Live snapshot of an element (empty if it has no version)
    ///
    /// # Errors
    /// [`StoreError::ElementNotFound`]
    pub fn current_snapshot(&self, id: ElementId) -> Result<ElementSnapshot, StoreError> {
        let state = self.state.read();
        let element = state.element(id)?;
        state.live_snapshot(element).cloned()
    }

    /// Number of stored versions across all elements
    #[must_use]
    pub fn version_count(&self) -> usize {
        self.state.read().versions.len()
    }
}
