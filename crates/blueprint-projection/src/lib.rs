//! Blueprint Projection
//!
//! Flat, editable rows derived from approved element snapshots.
//!
//! # Core Concepts
//!
//! - [`ProjectionStore`]: Section, material, work and task tables
//! - [`RowMeta`]: Ownership of a row; only generated, unlocked rows are rebuilt
//! - [`ProjectionStore::rebuild`]: Idempotent sync of one element
//! - [`ProjectionStore::rebuild_project`]: Guarded sync of a whole project
//! - [`ProjectionImage`]: JSON save/load of rows, runs and sync markers
//!
//! # Example
//!
//! ```rust,ignore
//! let outcome = projection.rebuild_project(&store, project, false);
//! for (element, reason) in &outcome.failed {
//!     eprintln!("{element}: {reason}");
//! }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod error;
mod persist;
mod project;
mod rows;
mod store;
mod sync;

pub use error::ProjectionError;
pub use persist::ProjectionImage;
pub use project::ProjectRebuild;
pub use rows::{
    normalize_label, Actuals, DerivationRun, DerivedFrom, Generation, MaterialLine,
    RebuildSummary, RowCounts, RowId, RowMeta, RunId, RunTrigger, SectionRow, SyncMarker, TaskRow,
    WorkLine,
};
pub use store::ProjectionStore;
pub use sync::RebuildInput;

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod integration_tests {
    use super::*;
    use blueprint_snapshot::ElementSnapshot;
    use blueprint_store::{Element, ProjectId, VersionId};
    use blueprint_test_utils::stage_set_snapshot;
    use proptest::prelude::*;

    fn input<'a>(element: &'a Element, snapshot: &'a ElementSnapshot) -> RebuildInput<'a> {
        RebuildInput {
            element,
            version_id: VersionId::new(),
            snapshot,
            trigger: RunTrigger::Manual,
        }
    }

    #[test]
    fn rows_serialize_flat() {
        let store = ProjectionStore::new();
        let element = Element::new(ProjectId::new(), "Backdrop");
        store.rebuild(&input(&element, &stage_set_snapshot())).unwrap();

        let row = store.materials(element.id).remove(0);
        let json = serde_json::to_value(&row).unwrap();
        assert_eq!(json["generation"], "generated");
        assert_eq!(json["materialKey"], "mat_frame");
        assert!(json["derivedFrom"]["elementVersionId"].is_string());
        assert!(json.get("actualQuantity").is_some());

        let back: MaterialLine = serde_json::from_value(json).unwrap();
        assert_eq!(back, row);
    }

    proptest! {
        #[test]
        fn rebuild_count_matches_snapshot(drop_mask in proptest::collection::vec(any::<bool>(), 2)) {
            let mut snapshot = stage_set_snapshot();
            // Dropping a material requires dropping the tasks that point at it
            if drop_mask[0] {
                snapshot.materials.retain(|m| m.material_key != "mat_canvas");
                snapshot.tasks.retain(|t| t.task_key != "tsk_buy" && t.task_key != "tsk_stretch" && t.task_key != "tsk_install");
            }
            if drop_mask[1] {
                snapshot.labor.clear();
                for task in &mut snapshot.tasks {
                    task.uses_labor_keys.clear();
                }
            }

            let store = ProjectionStore::new();
            let element = Element::new(ProjectId::new(), "Backdrop");
            store.rebuild(&input(&element, &stage_set_snapshot())).unwrap();
            store.rebuild(&input(&element, &snapshot)).unwrap();

            let counts = store.counts(element.id);
            prop_assert_eq!(counts.materials, snapshot.materials.len());
            prop_assert_eq!(counts.work, snapshot.labor.len());
            prop_assert_eq!(counts.tasks, snapshot.tasks.len());
            prop_assert_eq!(counts.sections, 1);
        }
    }
}
