//! JSON persistence of the derived rows
//!
//! Rows, derivation runs and sync markers are saved together so a reloaded
//! projection resyncs against the same rows: generated rows keep their ids,
//! and manual rows, locks, actuals and task statuses survive.

use crate::error::ProjectionError;
use crate::rows::{DerivationRun, MaterialLine, RowId, SectionRow, SyncMarker, TaskRow, WorkLine};
use crate::store::{ProjectionStore, Tables};
use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Current image format
pub(crate) const IMAGE_FORMAT: u32 = 1;

/// Serializable copy of a [`ProjectionStore`]
///
/// Each table keeps its row order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectionImage {
    pub format: u32,
    pub sections: Vec<SectionRow>,
    pub materials: Vec<MaterialLine>,
    pub work: Vec<WorkLine>,
    pub tasks: Vec<TaskRow>,
    pub runs: Vec<DerivationRun>,
    pub synced: Vec<SyncMarker>,
}

impl Default for ProjectionImage {
    fn default() -> Self {
        Self {
            format: IMAGE_FORMAT,
            sections: Vec::new(),
            materials: Vec::new(),
            work: Vec::new(),
            tasks: Vec::new(),
            runs: Vec::new(),
            synced: Vec::new(),
        }
    }
}

fn index<R>(
    rows: Vec<R>,
    table: &str,
    id: impl Fn(&R) -> RowId,
) -> Result<IndexMap<RowId, R>, ProjectionError> {
    let mut map = IndexMap::with_capacity(rows.len());
    for row in rows {
        let row_id = id(&row);
        if map.insert(row_id, row).is_some() {
            return Err(ProjectionError::CorruptImage(format!(
                "duplicate {table} row {row_id}"
            )));
        }
    }
    Ok(map)
}

/// First row reference that points nowhere
fn dangling(tables: &Tables) -> Option<String> {
    for task in tables.tasks.values() {
        if let Some(dep) = task
            .dependency_ids
            .iter()
            .find(|id| !tables.tasks.contains_key(*id))
        {
            return Some(format!("task {} depends on missing row {dep}", task.meta.id));
        }
        if let Some(line) = task
            .material_line_id
            .filter(|id| !tables.materials.contains_key(id))
        {
            return Some(format!(
                "task {} buys missing material row {line}",
                task.meta.id
            ));
        }
    }
    tables.materials.values().find_map(|material| {
        material
            .purchase_task_id
            .filter(|id| !tables.tasks.contains_key(id))
            .map(|task| {
                format!(
                    "material {} points at missing purchase task {task}",
                    material.meta.id
                )
            })
    })
}

impl ProjectionStore {
    /// Copy every table into an image
    #[must_use]
    pub fn image(&self) -> ProjectionImage {
        let tables = self.tables.read();
        let mut synced: Vec<SyncMarker> = tables.synced.values().copied().collect();
        synced.sort_by_key(|m| m.element_id);
        ProjectionImage {
            format: IMAGE_FORMAT,
            sections: tables.sections.values().cloned().collect(),
            materials: tables.materials.values().cloned().collect(),
            work: tables.work.values().cloned().collect(),
            tasks: tables.tasks.values().cloned().collect(),
            runs: tables.runs.clone(),
            synced,
        }
    }

    /// Rebuild a projection from an image
    ///
    /// # Errors
    /// [`ProjectionError::CorruptImage`] on an unknown format, a duplicate
    /// row id, or a row reference that dangles
    pub fn from_image(image: ProjectionImage) -> Result<Self, ProjectionError> {
        if image.format != IMAGE_FORMAT {
            return Err(ProjectionError::CorruptImage(format!(
                "unsupported format {}",
                image.format
            )));
        }

        let tables = Tables {
            sections: index(image.sections, "section", |r| r.meta.id)?,
            materials: index(image.materials, "material", |r| r.meta.id)?,
            work: index(image.work, "work", |r| r.meta.id)?,
            tasks: index(image.tasks, "task", |r| r.meta.id)?,
            runs: image.runs,
            synced: image
                .synced
                .into_iter()
                .map(|m| (m.element_id, m))
                .collect::<HashMap<_, _>>(),
        };
        if let Some(reason) = dangling(&tables) {
            return Err(ProjectionError::CorruptImage(reason));
        }

        Ok(Self {
            tables: RwLock::new(tables),
        })
    }

    /// Write the projection as pretty JSON
    ///
    /// # Errors
    /// I/O or serialization failure
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ProjectionError> {
        let json = serde_json::to_vec_pretty(&self.image())?;
        std::fs::write(path.as_ref(), json)?;
        tracing::debug!(path = %path.as_ref().display(), "projection saved");
        Ok(())
    }

    /// Read a projection written by [`ProjectionStore::save`]
    ///
    /// # Errors
    /// I/O, parse or image consistency failure
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ProjectionError> {
        let bytes = std::fs::read(path.as_ref())?;
        let image: ProjectionImage = serde_json::from_slice(&bytes)?;
        Self::from_image(image)
    }
}
