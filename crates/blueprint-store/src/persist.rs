//! JSON persistence of the whole store

use crate::element::Element;
use crate::error::StoreError;
use crate::revision::{Revision, RevisionChange};
use crate::store::{Store, StoreState};
use crate::version::ElementVersion;
use blueprint_snapshot::ContentHash;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Current image format
pub const IMAGE_FORMAT: u32 = 1;

/// Serializable copy of a [`Store`]
///
/// Versions are listed in commit order, which is also each element's chain
/// order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreImage {
    pub format: u32,
    pub elements: Vec<Element>,
    pub versions: Vec<ElementVersion>,
    pub revisions: Vec<Revision>,
    pub changes: Vec<RevisionChange>,
}

impl Store {
    /// Copy the current state into an image
    #[must_use]
    pub fn image(&self) -> StoreImage {
        let state = self.state.read();
        StoreImage {
            format: IMAGE_FORMAT,
            elements: state.elements.values().cloned().collect(),
            versions: state.versions.values().cloned().collect(),
            revisions: state.revisions.values().cloned().collect(),
            changes: state
                .revisions
                .keys()
                .filter_map(|id| state.changes.get(id))
                .flat_map(|c| c.values().cloned())
                .collect(),
        }
    }

    /// Rebuild a store from an image
    ///
    /// # Errors
    /// [`StoreError::CorruptImage`] if references inside the image dangle or
    /// a version's content hash does not match its snapshot
    pub fn from_image(image: StoreImage) -> Result<Self, StoreError> {
        if image.format != IMAGE_FORMAT {
            return Err(StoreError::CorruptImage(format!(
                "unsupported format {}",
                image.format
            )));
        }

        let mut state = StoreState::default();
        for element in image.elements {
            state.elements.insert(element.id, element);
        }
        for version in image.versions {
            if !state.elements.contains_key(&version.element_id) {
                return Err(StoreError::CorruptImage(format!(
                    "version {} belongs to unknown element {}",
                    version.id, version.element_id
                )));
            }
            if ContentHash::of_snapshot(&version.snapshot)? != version.content_hash {
                return Err(StoreError::CorruptImage(format!(
                    "version {} content hash mismatch",
                    version.id
                )));
            }
            state
                .history
                .entry(version.element_id)
                .or_default()
                .push(version.id);
            state.versions.insert(version.id, version);
        }
        for element in state.elements.values() {
            for pointer in [element.active_version_id, element.published_version_id]
                .into_iter()
                .flatten()
            {
                if !state.versions.contains_key(&pointer) {
                    return Err(StoreError::CorruptImage(format!(
                        "element {} points at missing version {pointer}",
                        element.id
                    )));
                }
            }
        }
        for revision in image.revisions {
            state.revisions.insert(revision.id, revision);
        }
        for change in image.changes {
            if !state.revisions.contains_key(&change.revision_id) {
                return Err(StoreError::CorruptImage(format!(
                    "change for unknown revision {}",
                    change.revision_id
                )));
            }
            state
                .changes
                .entry(change.revision_id)
                .or_default()
                .insert(change.element_id, change);
        }

        Ok(Self {
            state: RwLock::new(state),
        })
    }

    /// Write the store as pretty JSON
    ///
    /// # Errors
    /// I/O or serialization failure
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), StoreError> {
        let json = serde_json::to_vec_pretty(&self.image())?;
        std::fs::write(path.as_ref(), json)?;
        tracing::debug!(path = %path.as_ref().display(), "store saved");
        Ok(())
    }

    /// Read a store written by [`Store::save`]
    ///
    /// # Errors
    /// I/O, parse or image consistency failure
    pub fn load(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let bytes = std::fs::read(path.as_ref())?;
        let image: StoreImage = serde_json::from_slice(&bytes)?;
        Self::from_image(image)
    }

    /// [`Store::load`], or an empty store if the file does not exist
    ///
    /// # Errors
    /// Same as [`Store::load`] for an existing file
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::ProjectId;
    use crate::revision::StageRequest;
    use blueprint_snapshot::{ElementSnapshot, PatchOp, TextPath};
    use pretty_assertions::assert_eq;

    fn populated() -> Store {
        let store = Store::new();
        let project = ProjectId::new();
        let element = store
            .create_element(project, "Stage", Some(ElementSnapshot::new()), "tester")
            .unwrap();
        let draft = store.create_draft(project, "notes", "edit", false).revision_id;
        store
            .stage_change(
                draft,
                StageRequest::patch(
                    element.id,
                    element.active_version_id,
                    vec![PatchOp::set_text(TextPath::Notes, "load-in at 6")],
                ),
            )
            .unwrap();
        store
    }

    #[test]
    fn save_and_load_preserve_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        let store = populated();
        store.save(&path).unwrap();

        let loaded = Store::load(&path).unwrap();
        assert_eq!(loaded.image(), store.image());
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::load_or_default(dir.path().join("absent.json")).unwrap();
        assert_eq!(store.version_count(), 0);
    }

    #[test]
    fn tampered_snapshot_is_detected() {
        let mut image = populated().image();
        image.versions[0].snapshot.free_text.notes = "edited on disk".to_string();
        assert!(matches!(
            Store::from_image(image),
            Err(StoreError::CorruptImage(_))
        ));
    }

    #[test]
    fn dangling_pointer_is_detected() {
        let mut image = populated().image();
        image.versions.clear();
        assert!(Store::from_image(image).is_err());
    }
}
