//! Projection tables and direct row edits
//!
//! [`ProjectionStore`] owns the derived rows. Rebuilds go through
//! [`ProjectionStore::rebuild`]; everything else here is the direct editing a
//! downstream surface performs (actuals, task status, locks, manual rows).

use crate::error::ProjectionError;
use crate::rows::{
    Actuals, DerivationRun, MaterialLine, RowCounts, RowId, RowMeta, SectionRow, SyncMarker,
    TaskRow, WorkLine,
};
use blueprint_snapshot::{Procurement, TaskType};
use blueprint_store::{ElementId, VersionId};
use chrono::Utc;
use indexmap::IndexMap;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Derived row store
#[derive(Debug, Default)]
pub struct ProjectionStore {
    pub(crate) tables: RwLock<Tables>,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct Tables {
    pub(crate) sections: IndexMap<RowId, SectionRow>,
    pub(crate) materials: IndexMap<RowId, MaterialLine>,
    pub(crate) work: IndexMap<RowId, WorkLine>,
    pub(crate) tasks: IndexMap<RowId, TaskRow>,
    pub(crate) runs: Vec<DerivationRun>,
    /// What each element was last rebuilt from
    pub(crate) synced: HashMap<ElementId, SyncMarker>,
}

impl Tables {
    /// Copy of one element's rows, used for dry runs
    pub(crate) fn for_element(&self, element_id: ElementId) -> Self {
        fn pick<R: Clone>(
            rows: &IndexMap<RowId, R>,
            element_id: ElementId,
            meta: impl Fn(&R) -> &RowMeta,
        ) -> IndexMap<RowId, R> {
            rows.iter()
                .filter(|(_, r)| meta(r).element_id == element_id)
                .map(|(id, r)| (*id, r.clone()))
                .collect()
        }
        Self {
            sections: pick(&self.sections, element_id, |r| &r.meta),
            materials: pick(&self.materials, element_id, |r| &r.meta),
            work: pick(&self.work, element_id, |r| &r.meta),
            tasks: pick(&self.tasks, element_id, |r| &r.meta),
            runs: Vec::new(),
            synced: HashMap::new(),
        }
    }

    pub(crate) fn counts(&self, element_id: ElementId) -> RowCounts {
        RowCounts {
            sections: self
                .sections
                .values()
                .filter(|r| r.meta.element_id == element_id)
                .count(),
            materials: self
                .materials
                .values()
                .filter(|r| r.meta.element_id == element_id)
                .count(),
            work: self
                .work
                .values()
                .filter(|r| r.meta.element_id == element_id)
                .count(),
            tasks: self
                .tasks
                .values()
                .filter(|r| r.meta.element_id == element_id)
                .count(),
        }
    }
}

impl ProjectionStore {
    /// Empty projection
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Section row of an element
    #[must_use]
    pub fn section(&self, element_id: ElementId) -> Option<SectionRow> {
        self.tables
            .read()
            .sections
            .values()
            .find(|r| r.meta.element_id == element_id)
            .cloned()
    }

    /// Material lines of an element
    #[must_use]
    pub fn materials(&self, element_id: ElementId) -> Vec<MaterialLine> {
        self.tables
            .read()
            .materials
            .values()
            .filter(|r| r.meta.element_id == element_id)
            .cloned()
            .collect()
    }

    /// Work lines of an element
    #[must_use]
    pub fn work(&self, element_id: ElementId) -> Vec<WorkLine> {
        self.tables
            .read()
            .work
            .values()
            .filter(|r| r.meta.element_id == element_id)
            .cloned()
            .collect()
    }

    /// Task rows of an element
    #[must_use]
    pub fn tasks(&self, element_id: ElementId) -> Vec<TaskRow> {
        self.tables
            .read()
            .tasks
            .values()
            .filter(|r| r.meta.element_id == element_id)
            .cloned()
            .collect()
    }

    /// Task row by id
    #[must_use]
    pub fn task(&self, row_id: RowId) -> Option<TaskRow> {
        self.tables.read().tasks.get(&row_id).cloned()
    }

    /// Material line by id
    #[must_use]
    pub fn material(&self, row_id: RowId) -> Option<MaterialLine> {
        self.tables.read().materials.get(&row_id).cloned()
    }

    /// Derivation runs of an element, oldest first
    #[must_use]
    pub fn runs(&self, element_id: ElementId) -> Vec<DerivationRun> {
        self.tables
            .read()
            .runs
            .iter()
            .filter(|r| r.element_id == element_id)
            .cloned()
            .collect()
    }

    /// Row counts for an element
    #[must_use]
    pub fn counts(&self, element_id: ElementId) -> RowCounts {
        self.tables.read().counts(element_id)
    }

    /// Version the element was last rebuilt from
    #[must_use]
    pub fn last_synced(&self, element_id: ElementId) -> Option<VersionId> {
        self.sync_marker(element_id).map(|m| m.version_id)
    }

    /// Version and content hash the element was last rebuilt from
    #[must_use]
    pub fn sync_marker(&self, element_id: ElementId) -> Option<SyncMarker> {
        self.tables.read().synced.get(&element_id).copied()
    }

    /// Record actual figures on a material or work line
    ///
    /// # Errors
    /// [`ProjectionError::RowNotFound`]
    pub fn set_actuals(&self, row_id: RowId, actuals: Actuals) -> Result<(), ProjectionError> {
        let mut tables = self.tables.write();
        if let Some(row) = tables.materials.get_mut(&row_id) {
            row.actuals = actuals;
            row.meta.updated_at = Utc::now();
        } else if let Some(row) = tables.work.get_mut(&row_id) {
            row.actuals = actuals;
            row.meta.updated_at = Utc::now();
        } else {
            return Err(ProjectionError::RowNotFound(row_id));
        }
        Ok(())
    }

    /// Set a task's progress status
    ///
    /// # Errors
    /// [`ProjectionError::RowNotFound`]
    pub fn set_task_status(
        &self,
        row_id: RowId,
        status: Option<String>,
    ) -> Result<(), ProjectionError> {
        let mut tables = self.tables.write();
        let row = tables
            .tasks
            .get_mut(&row_id)
            .ok_or(ProjectionError::RowNotFound(row_id))?;
        row.status = status;
        row.meta.updated_at = Utc::now();
        Ok(())
    }

    /// Lock or unlock any row
    ///
    /// # Errors
    /// [`ProjectionError::RowNotFound`]
    pub fn lock_row(&self, row_id: RowId, lock: bool) -> Result<(), ProjectionError> {
        let mut tables = self.tables.write();
        let tables = &mut *tables;
        let meta = if let Some(r) = tables.sections.get_mut(&row_id) {
            &mut r.meta
        } else if let Some(r) = tables.materials.get_mut(&row_id) {
            &mut r.meta
        } else if let Some(r) = tables.work.get_mut(&row_id) {
            &mut r.meta
        } else if let Some(r) = tables.tasks.get_mut(&row_id) {
            &mut r.meta
        } else {
            return Err(ProjectionError::RowNotFound(row_id));
        };
        meta.lock = lock;
        meta.updated_at = Utc::now();
        Ok(())
    }

    /// Add a user-owned material line
    pub fn insert_manual_material(
        &self,
        element_id: ElementId,
        label: impl Into<String>,
        quantity: f64,
        unit: impl Into<String>,
    ) -> RowId {
        let row = MaterialLine {
            meta: RowMeta::manual(element_id),
            material_key: None,
            category: String::new(),
            label: label.into(),
            quantity,
            unit: unit.into(),
            unit_cost: None,
            procurement: Procurement::Stock,
            need_purchase: false,
            status: None,
            notes: String::new(),
            actuals: Actuals::default(),
            purchase_task_id: None,
        };
        let id = row.meta.id;
        self.tables.write().materials.insert(id, row);
        id
    }

    /// Add a user-owned work line
    pub fn insert_manual_work(
        &self,
        element_id: ElementId,
        label: impl Into<String>,
        hours: f64,
    ) -> RowId {
        let row = WorkLine {
            meta: RowMeta::manual(element_id),
            labor_key: None,
            category: String::new(),
            label: label.into(),
            quantity: hours,
            unit: "h".to_string(),
            unit_cost: None,
            status: None,
            notes: String::new(),
            actuals: Actuals::default(),
        };
        let id = row.meta.id;
        self.tables.write().work.insert(id, row);
        id
    }

    /// Add a user-owned task
    pub fn insert_manual_task(&self, element_id: ElementId, title: impl Into<String>) -> RowId {
        let row = TaskRow {
            meta: RowMeta::manual(element_id),
            task_key: None,
            title: title.into(),
            description: String::new(),
            task_type: TaskType::General,
            duration_hours: None,
            status: None,
            dependency_ids: Vec::new(),
            material_line_id: None,
        };
        let id = row.meta.id;
        self.tables.write().tasks.insert(id, row);
        id
    }

    /// Drop every row and run of an element; returns the number of rows removed
    pub fn remove_element(&self, element_id: ElementId) -> usize {
        let mut tables = self.tables.write();
        let before = tables.counts(element_id);
        tables.sections.retain(|_, r| r.meta.element_id != element_id);
        tables.materials.retain(|_, r| r.meta.element_id != element_id);
        tables.work.retain(|_, r| r.meta.element_id != element_id);
        tables.tasks.retain(|_, r| r.meta.element_id != element_id);
        tables.runs.retain(|r| r.element_id != element_id);
        tables.synced.remove(&element_id);
        before.sections + before.materials + before.work + before.tasks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_rows_are_user_owned() {
        let store = ProjectionStore::new();
        let element = ElementId::new();
        let id = store.insert_manual_material(element, "Spare screws", 200.0, "pcs");
        let row = store.material(id).unwrap();
        assert!(!row.meta.is_owned());
        assert_eq!(row.meta.derived_from, None);
        assert_eq!(store.counts(element).materials, 1);
    }

    #[test]
    fn edits_on_unknown_rows_fail() {
        let store = ProjectionStore::new();
        let missing = RowId::new();
        assert!(matches!(
            store.lock_row(missing, true),
            Err(ProjectionError::RowNotFound(_))
        ));
        assert!(store.set_task_status(missing, None).is_err());
        assert!(store.set_actuals(missing, Actuals::default()).is_err());
    }

    #[test]
    fn remove_element_drops_all_rows() {
        let store = ProjectionStore::new();
        let element = ElementId::new();
        let other = ElementId::new();
        store.insert_manual_task(element, "Load van");
        store.insert_manual_work(element, "Driver", 3.0);
        store.insert_manual_task(other, "Unrelated");
        assert_eq!(store.remove_element(element), 2);
        assert_eq!(store.counts(element), RowCounts::default());
        assert_eq!(store.counts(other).tasks, 1);
    }
}
