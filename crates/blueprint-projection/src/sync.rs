//! Element rebuild
//!
//! Turns one approved snapshot into section, material, work and task rows.
//!
//! # Matching
//! Existing generated rows are matched by stable content key first. Legacy
//! rows without a key fall back to a normalized-label match, and pick up the
//! key on their first patch so later rebuilds match them directly.
//!
//! # Ownership
//! Rows that are `manual` or locked are never patched or deleted. A snapshot
//! line matched to a locked row is counted as skipped; a manual row is never
//! matched at all.
//!
//! # Idempotence
//! Rebuilding the same snapshot again matches every row by key, so row ids
//! and counts stay the same.

use crate::error::ProjectionError;
use crate::rows::{
    normalize_label, Actuals, DerivationRun, DerivedFrom, Generation, KeyedRow, MaterialLine,
    RebuildSummary, RowCounts, RowId, RowMeta, RunId, RunTrigger, SectionRow, SyncMarker, TaskRow,
    WorkLine,
};
use crate::store::{ProjectionStore, Tables};
use blueprint_snapshot::{
    ContentHash, ElementSnapshot, KeyedLine, LaborSpec, LineKey, MaterialSpec, TaskSpec, TaskType,
};
use blueprint_store::{Element, ElementId, VersionId};
use chrono::Utc;
use indexmap::IndexMap;
use std::collections::{HashMap, HashSet};

/// Everything a rebuild needs for one element
#[derive(Debug, Clone, Copy)]
pub struct RebuildInput<'a> {
    pub element: &'a Element,
    pub version_id: VersionId,
    pub snapshot: &'a ElementSnapshot,
    pub trigger: RunTrigger,
}

impl ProjectionStore {
    /// Rebuild an element's rows from a snapshot
    ///
    /// # Errors
    /// [`ProjectionError::InvalidSnapshot`]; no row is touched in that case
    pub fn rebuild(&self, input: &RebuildInput<'_>) -> Result<DerivationRun, ProjectionError> {
        let run = self.tables.write().sync_element(input)?;
        tracing::info!(
            element = %run.element_id,
            version = %run.version_id,
            tasks = run.summary.tasks_synced,
            materials = run.summary.materials_synced,
            labor = run.summary.labor_synced,
            deleted = run.summary.rows_deleted,
            skipped = run.summary.rows_skipped,
            "projection rebuilt"
        );
        Ok(run)
    }

    /// Row counts a rebuild would leave, without writing anything
    ///
    /// # Errors
    /// [`ProjectionError::InvalidSnapshot`]
    pub fn preview_counts(&self, input: &RebuildInput<'_>) -> Result<RowCounts, ProjectionError> {
        let element_id = input.element.id;
        let mut scratch = self.tables.read().for_element(element_id);
        scratch.sync_element(input)?;
        Ok(scratch.counts(element_id))
    }
}

impl Tables {
    pub(crate) fn sync_element(
        &mut self,
        input: &RebuildInput<'_>,
    ) -> Result<DerivationRun, ProjectionError> {
        let element_id = input.element.id;
        input
            .snapshot
            .validate()
            .map_err(|source| ProjectionError::InvalidSnapshot {
                element: element_id,
                source,
            })?;
        let content_hash = ContentHash::of_snapshot(input.snapshot)?;

        let started_at = Utc::now();
        let run_id = RunId::new();
        let derived = DerivedFrom {
            element_version_id: input.version_id,
            derivation_run_id: run_id,
        };
        let mut touched = Vec::new();

        let section_id = self.sync_section(input, derived, &mut touched);

        let materials = sync_lines(
            &mut self.materials,
            element_id,
            &input.snapshot.materials,
            derived,
            &mut touched,
            patch_material,
            new_material,
        );
        let labor = sync_lines(
            &mut self.work,
            element_id,
            &input.snapshot.labor,
            derived,
            &mut touched,
            patch_work,
            new_work,
        );
        let tasks = sync_lines(
            &mut self.tasks,
            element_id,
            &input.snapshot.tasks,
            derived,
            &mut touched,
            patch_task,
            new_task,
        );

        self.rewire_tasks(input.snapshot, &tasks.ids, &materials.ids);
        self.link_purchases(element_id);

        let summary = RebuildSummary {
            element_id,
            section_id,
            tasks_synced: tasks.synced,
            materials_synced: materials.synced,
            labor_synced: labor.synced,
            rows_deleted: materials.deleted + labor.deleted + tasks.deleted,
            rows_skipped: materials.skipped + labor.skipped + tasks.skipped,
        };
        let run = DerivationRun {
            id: run_id,
            element_id,
            version_id: input.version_id,
            trigger: input.trigger,
            started_at,
            finished_at: Utc::now(),
            summary,
            row_ids: touched,
        };
        self.runs.push(run.clone());
        self.synced.insert(
            element_id,
            SyncMarker {
                element_id,
                version_id: input.version_id,
                content_hash,
            },
        );
        Ok(run)
    }

    fn sync_section(
        &mut self,
        input: &RebuildInput<'_>,
        derived: DerivedFrom,
        touched: &mut Vec<RowId>,
    ) -> RowId {
        let element = input.element;
        let description = input.snapshot.descriptions.short.clone();
        match self
            .sections
            .values_mut()
            .find(|r| r.meta.element_id == element.id)
        {
            Some(row) => {
                if row.meta.is_owned() {
                    row.name.clone_from(&element.name);
                    row.status = element.status;
                    row.description = description;
                    row.meta.touch(derived);
                    touched.push(row.meta.id);
                }
                row.meta.id
            }
            None => {
                let row = SectionRow {
                    meta: RowMeta::generated(element.id, derived),
                    name: element.name.clone(),
                    status: element.status,
                    description,
                };
                let id = row.meta.id;
                self.sections.insert(id, row);
                touched.push(id);
                id
            }
        }
    }

    /// Phase two: resolve task dependencies and purchase links to row ids
    fn rewire_tasks(
        &mut self,
        snapshot: &ElementSnapshot,
        task_ids: &HashMap<LineKey, RowId>,
        material_ids: &HashMap<LineKey, RowId>,
    ) {
        for spec in &snapshot.tasks {
            let Some(row) = task_ids
                .get(&spec.task_key)
                .and_then(|id| self.tasks.get_mut(id))
            else {
                continue;
            };
            if !row.meta.is_owned() {
                continue;
            }
            row.dependency_ids = spec
                .dependencies
                .iter()
                .filter_map(|k| task_ids.get(k).copied())
                .collect();
            row.material_line_id = match (spec.task_type, &spec.material_key) {
                (TaskType::PurchaseMaterial, Some(key)) => material_ids.get(key).copied(),
                _ => None,
            };
        }
    }

    /// Write material -> purchase task back-links from the task side
    fn link_purchases(&mut self, element_id: ElementId) {
        for row in self
            .materials
            .values_mut()
            .filter(|r| r.meta.element_id == element_id && r.meta.is_owned())
        {
            row.purchase_task_id = None;
        }
        let links: Vec<(RowId, RowId)> = self
            .tasks
            .values()
            .filter(|t| t.meta.element_id == element_id && t.task_type == TaskType::PurchaseMaterial)
            .filter_map(|t| t.material_line_id.map(|m| (m, t.meta.id)))
            .collect();
        for (material_id, task_id) in links {
            if let Some(material) = self.materials.get_mut(&material_id) {
                if material.meta.is_owned() {
                    material.purchase_task_id = Some(task_id);
                }
            }
        }
    }
}

/// Line text used for legacy label matching
trait MatchLabel {
    fn match_label(&self) -> &str;
}

impl MatchLabel for MaterialSpec {
    fn match_label(&self) -> &str {
        &self.label
    }
}

impl MatchLabel for LaborSpec {
    fn match_label(&self) -> &str {
        &self.label
    }
}

impl MatchLabel for TaskSpec {
    fn match_label(&self) -> &str {
        &self.title
    }
}

/// Lookup of an element's generated rows
struct Matcher {
    by_key: HashMap<LineKey, RowId>,
    by_label: HashMap<String, Vec<RowId>>,
}

impl Matcher {
    fn build<'r, R: KeyedRow + 'r>(rows: impl Iterator<Item = &'r R>, element_id: ElementId) -> Self {
        let mut by_key = HashMap::new();
        let mut by_label: HashMap<String, Vec<RowId>> = HashMap::new();
        for row in rows.filter(|r| {
            r.meta().element_id == element_id && r.meta().generation == Generation::Generated
        }) {
            match row.content_key() {
                Some(key) => {
                    by_key.insert(key.clone(), row.meta().id);
                }
                None => {
                    let label = normalize_label(row.match_label());
                    if !label.is_empty() {
                        by_label.entry(label).or_default().push(row.meta().id);
                    }
                }
            }
        }
        Self { by_key, by_label }
    }

    /// Key match, else consume one legacy row with the same label
    fn find(&mut self, key: &LineKey, label: &str) -> Option<RowId> {
        if let Some(id) = self.by_key.get(key) {
            return Some(*id);
        }
        let candidates = self.by_label.get_mut(&normalize_label(label))?;
        if candidates.is_empty() {
            None
        } else {
            Some(candidates.remove(0))
        }
    }
}

#[derive(Default)]
struct LineSync {
    ids: HashMap<LineKey, RowId>,
    synced: usize,
    skipped: usize,
    deleted: usize,
}

fn sync_lines<R, L>(
    rows: &mut IndexMap<RowId, R>,
    element_id: ElementId,
    lines: &[L],
    derived: DerivedFrom,
    touched: &mut Vec<RowId>,
    patch: impl Fn(&mut R, &L),
    create: impl Fn(&L, RowMeta) -> R,
) -> LineSync
where
    R: KeyedRow,
    L: KeyedLine + MatchLabel,
{
    let mut matcher = Matcher::build(rows.values(), element_id);
    let mut out = LineSync::default();
    let mut kept = HashSet::with_capacity(lines.len());

    for line in lines {
        let matched = matcher
            .find(line.key(), line.match_label())
            .and_then(|id| rows.get_mut(&id));
        let id = match matched {
            Some(row) if row.meta().is_owned() => {
                patch(row, line);
                row.meta_mut().touch(derived);
                out.synced += 1;
                touched.push(row.meta().id);
                row.meta().id
            }
            Some(row) => {
                out.skipped += 1;
                row.meta().id
            }
            None => {
                let row = create(line, RowMeta::generated(element_id, derived));
                let id = row.meta().id;
                rows.insert(id, row);
                out.synced += 1;
                touched.push(id);
                id
            }
        };
        kept.insert(id);
        out.ids.insert(line.key().clone(), id);
    }

    let before = rows.len();
    rows.retain(|id, r| {
        !(r.meta().element_id == element_id && r.meta().is_owned() && !kept.contains(id))
    });
    out.deleted = before - rows.len();
    out
}

fn patch_material(row: &mut MaterialLine, spec: &MaterialSpec) {
    row.material_key = Some(spec.material_key.clone());
    row.category.clone_from(&spec.category);
    row.label.clone_from(&spec.label);
    row.quantity = spec.quantity;
    row.unit.clone_from(&spec.unit);
    row.unit_cost = spec.unit_cost;
    row.procurement = spec.procurement;
    row.need_purchase = spec.need_purchase;
    row.status.clone_from(&spec.status);
    row.notes.clone_from(&spec.notes);
}

fn new_material(spec: &MaterialSpec, meta: RowMeta) -> MaterialLine {
    let mut row = MaterialLine {
        meta,
        material_key: None,
        category: String::new(),
        label: String::new(),
        quantity: 0.0,
        unit: String::new(),
        unit_cost: None,
        procurement: spec.procurement,
        need_purchase: false,
        status: None,
        notes: String::new(),
        actuals: Actuals::default(),
        purchase_task_id: None,
    };
    patch_material(&mut row, spec);
    row
}

fn patch_work(row: &mut WorkLine, spec: &LaborSpec) {
    row.labor_key = Some(spec.labor_key.clone());
    row.category.clone_from(&spec.category);
    row.label.clone_from(&spec.label);
    row.quantity = spec.quantity;
    row.unit.clone_from(&spec.unit);
    row.unit_cost = spec.unit_cost;
    row.status.clone_from(&spec.status);
    row.notes.clone_from(&spec.notes);
}

fn new_work(spec: &LaborSpec, meta: RowMeta) -> WorkLine {
    let mut row = WorkLine {
        meta,
        labor_key: None,
        category: String::new(),
        label: String::new(),
        quantity: 0.0,
        unit: String::new(),
        unit_cost: None,
        status: None,
        notes: String::new(),
        actuals: Actuals::default(),
    };
    patch_work(&mut row, spec);
    row
}

/// Existing progress status wins over the snapshot's
fn patch_task(row: &mut TaskRow, spec: &TaskSpec) {
    row.task_key = Some(spec.task_key.clone());
    row.title.clone_from(&spec.title);
    row.description.clone_from(&spec.details);
    row.task_type = spec.task_type;
    row.duration_hours = spec.duration_hours;
    if row.status.is_none() {
        row.status.clone_from(&spec.status);
    }
}

fn new_task(spec: &TaskSpec, meta: RowMeta) -> TaskRow {
    let mut row = TaskRow {
        meta,
        task_key: None,
        title: String::new(),
        description: String::new(),
        task_type: spec.task_type,
        duration_hours: None,
        status: None,
        dependency_ids: Vec::new(),
        material_line_id: None,
    };
    patch_task(&mut row, spec);
    row
}

#[cfg(test)]
mod tests {
    use super::*;
    use blueprint_store::ProjectId;
    use blueprint_test_utils::{key, purchase_snapshot, stage_set_snapshot};
    use pretty_assertions::assert_eq;

    fn rebuild(
        store: &ProjectionStore,
        element: &Element,
        snapshot: &ElementSnapshot,
    ) -> DerivationRun {
        store
            .rebuild(&RebuildInput {
                element,
                version_id: VersionId::new(),
                snapshot,
                trigger: RunTrigger::Manual,
            })
            .unwrap()
    }

    #[test]
    fn first_rebuild_creates_every_row() {
        let store = ProjectionStore::new();
        let element = Element::new(ProjectId::new(), "Backdrop");
        let run = rebuild(&store, &element, &stage_set_snapshot());

        assert_eq!(run.summary.materials_synced, 2);
        assert_eq!(run.summary.labor_synced, 1);
        assert_eq!(run.summary.tasks_synced, 4);
        assert_eq!(
            store.counts(element.id),
            RowCounts {
                sections: 1,
                materials: 2,
                work: 1,
                tasks: 4
            }
        );
        let section = store.section(element.id).unwrap();
        assert_eq!(section.name, "Backdrop");
        assert_eq!(section.description, "Stage backdrop");
    }

    #[test]
    fn dependencies_resolve_to_row_ids() {
        let store = ProjectionStore::new();
        let element = Element::new(ProjectId::new(), "Backdrop");
        rebuild(&store, &element, &stage_set_snapshot());

        let tasks = store.tasks(element.id);
        let id_of = |k: &str| {
            tasks
                .iter()
                .find(|t| t.task_key.as_ref().is_some_and(|tk| tk == k))
                .unwrap()
                .meta
                .id
        };
        let stretch = tasks
            .iter()
            .find(|t| t.meta.id == id_of("tsk_stretch"))
            .unwrap();
        assert_eq!(stretch.dependency_ids, vec![id_of("tsk_buy"), id_of("tsk_frame")]);
    }

    #[test]
    fn purchase_link_is_bidirectional() {
        let store = ProjectionStore::new();
        let element = Element::new(ProjectId::new(), "Wrap");
        rebuild(&store, &element, &purchase_snapshot());

        let material = store.materials(element.id).remove(0);
        let buy = store
            .tasks(element.id)
            .into_iter()
            .find(|t| t.task_type == TaskType::PurchaseMaterial)
            .unwrap();
        assert_eq!(buy.material_line_id, Some(material.meta.id));
        assert_eq!(material.purchase_task_id, Some(buy.meta.id));
    }

    #[test]
    fn rebuild_twice_keeps_ids_and_counts() {
        let store = ProjectionStore::new();
        let element = Element::new(ProjectId::new(), "Backdrop");
        let snapshot = stage_set_snapshot();
        rebuild(&store, &element, &snapshot);
        let ids = |s: &ProjectionStore| -> Vec<RowId> {
            let mut ids: Vec<RowId> = s
                .materials(element.id)
                .iter()
                .map(|r| r.meta.id)
                .chain(s.work(element.id).iter().map(|r| r.meta.id))
                .chain(s.tasks(element.id).iter().map(|r| r.meta.id))
                .collect();
            ids.sort();
            ids
        };
        let first_ids = ids(&store);
        let first_counts = store.counts(element.id);

        let second = rebuild(&store, &element, &snapshot);
        assert_eq!(ids(&store), first_ids);
        assert_eq!(store.counts(element.id), first_counts);
        assert_eq!(second.summary.rows_deleted, 0);
        assert_eq!(store.runs(element.id).len(), 2);
    }

    #[test]
    fn actuals_survive_label_change() {
        let store = ProjectionStore::new();
        let element = Element::new(ProjectId::new(), "Backdrop");
        let mut snapshot = stage_set_snapshot();
        rebuild(&store, &element, &snapshot);

        let frame = store
            .materials(element.id)
            .into_iter()
            .find(|m| m.label == "Timber 45x95")
            .unwrap();
        store
            .set_actuals(
                frame.meta.id,
                Actuals {
                    actual_quantity: Some(26.0),
                    actual_unit_cost: Some(3.2),
                },
            )
            .unwrap();

        snapshot.materials[0].label = "Pine 45x95".to_string();
        rebuild(&store, &element, &snapshot);

        let after = store.material(frame.meta.id).unwrap();
        assert_eq!(after.label, "Pine 45x95");
        assert_eq!(after.actuals.actual_quantity, Some(26.0));
        assert_eq!(after.actuals.actual_unit_cost, Some(3.2));
    }

    #[test]
    fn task_status_survives_resync() {
        let store = ProjectionStore::new();
        let element = Element::new(ProjectId::new(), "Backdrop");
        let mut snapshot = stage_set_snapshot();
        rebuild(&store, &element, &snapshot);
        let install = store
            .tasks(element.id)
            .into_iter()
            .find(|t| t.title == "Install on site")
            .unwrap();
        store
            .set_task_status(install.meta.id, Some("done".to_string()))
            .unwrap();

        snapshot.tasks[3].title = "Install at venue".to_string();
        snapshot.tasks[3].duration_hours = Some(3.0);
        rebuild(&store, &element, &snapshot);

        let after = store.task(install.meta.id).unwrap();
        assert_eq!(after.status.as_deref(), Some("done"));
        assert_eq!(after.title, "Install at venue");
        assert_eq!(after.duration_hours, Some(3.0));
    }

    #[test]
    fn locked_and_manual_rows_are_inert() {
        let store = ProjectionStore::new();
        let element = Element::new(ProjectId::new(), "Backdrop");
        let mut snapshot = stage_set_snapshot();
        rebuild(&store, &element, &snapshot);

        let canvas = store
            .materials(element.id)
            .into_iter()
            .find(|m| m.label == "Canvas")
            .unwrap();
        store.lock_row(canvas.meta.id, true).unwrap();
        let manual = store.insert_manual_task(element.id, "Call venue");

        snapshot.materials[1].label = "Cotton canvas".to_string();
        snapshot.materials[1].quantity = 30.0;
        let run = rebuild(&store, &element, &snapshot);

        let locked = store.material(canvas.meta.id).unwrap();
        assert_eq!(locked.label, "Canvas");
        assert_eq!(locked.quantity, 18.0);
        assert_eq!(run.summary.rows_skipped, 1);
        assert_eq!(store.counts(element.id).materials, 2);
        assert!(store.task(manual).is_some());
    }

    #[test]
    fn removed_lines_delete_only_owned_rows() {
        let store = ProjectionStore::new();
        let element = Element::new(ProjectId::new(), "Backdrop");
        let mut snapshot = stage_set_snapshot();
        rebuild(&store, &element, &snapshot);
        let manual = store.insert_manual_material(element.id, "Gaffer tape", 2.0, "rolls");

        snapshot.labor.clear();
        snapshot.tasks[1].uses_labor_keys.clear();
        let run = rebuild(&store, &element, &snapshot);

        assert_eq!(run.summary.rows_deleted, 1);
        assert!(store.work(element.id).is_empty());
        assert!(store.material(manual).is_some());
    }

    #[test]
    fn legacy_rows_match_by_label_and_gain_a_key() {
        let store = ProjectionStore::new();
        let element = Element::new(ProjectId::new(), "Backdrop");
        let legacy = RowMeta::generated(
            element.id,
            DerivedFrom {
                element_version_id: VersionId::new(),
                derivation_run_id: RunId::new(),
            },
        );
        let legacy_id = legacy.id;
        store.tables.write().materials.insert(
            legacy_id,
            new_material(
                &MaterialSpec::new(key("mat_tmp"), "TIMBER 45x95"),
                legacy,
            ),
        );
        if let Some(row) = store.tables.write().materials.get_mut(&legacy_id) {
            row.material_key = None;
        }

        rebuild(&store, &element, &stage_set_snapshot());
        let row = store.material(legacy_id).unwrap();
        assert_eq!(row.material_key, Some(key("mat_frame")));
        assert_eq!(store.counts(element.id).materials, 2);
    }

    #[test]
    fn invalid_snapshot_touches_nothing() {
        let store = ProjectionStore::new();
        let element = Element::new(ProjectId::new(), "Backdrop");
        let mut snapshot = stage_set_snapshot();
        snapshot.tasks[0].dependencies.push(key("tsk_ghost"));
        let err = store
            .rebuild(&RebuildInput {
                element: &element,
                version_id: VersionId::new(),
                snapshot: &snapshot,
                trigger: RunTrigger::Manual,
            })
            .unwrap_err();
        assert!(matches!(err, ProjectionError::InvalidSnapshot { .. }));
        assert_eq!(store.counts(element.id), RowCounts::default());
        assert!(store.runs(element.id).is_empty());
    }

    #[test]
    fn preview_counts_do_not_write() {
        let store = ProjectionStore::new();
        let element = Element::new(ProjectId::new(), "Backdrop");
        let counts = store
            .preview_counts(&RebuildInput {
                element: &element,
                version_id: VersionId::new(),
                snapshot: &stage_set_snapshot(),
                trigger: RunTrigger::Manual,
            })
            .unwrap();
        assert_eq!(counts.tasks, 4);
        assert_eq!(store.counts(element.id), RowCounts::default());
        assert_eq!(store.last_synced(element.id), None);
    }
}
