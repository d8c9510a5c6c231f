//! Blueprint Snapshot Model
//!
//! Versioned element specifications and the patch language used to edit them.
//!
//! # Core Concepts
//!
//! - [`ElementSnapshot`]: Full specification of an element at one version
//! - [`LineKey`]: Stable content key joining lines across patches and rebuilds
//! - [`PatchOp`]: One typed edit instruction; [`apply`] runs a batch of them
//! - [`Tombstones`]: Deleted keys that a stale proposal may not resurrect
//! - [`ContentHash`]: Blake3 hash of a snapshot's canonical encoding
//!
//! # Example
//!
//! ```rust,ignore
//! use blueprint_snapshot::{apply, Entity, PatchOp};
//!
//! let next = apply(&live, &[PatchOp::remove(Entity::Tasks, "tsk_1".parse()?)])?;
//! assert!(next.tombstones.contains(Entity::Tasks, "tsk_1"));
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod digest;
mod hash;
mod key;
mod patch;
mod snapshot;
mod stats;
mod validate;

pub use digest::SnapshotDigest;
pub use hash::{ContentHash, HashError};
pub use key::{Entity, KeyError, LineKey, MAX_KEY_LEN};
pub use patch::{
    apply, apply_with_report, LineValue, PatchBuilder, PatchError, PatchOp, PatchReport,
    SectionValue,
};
pub use snapshot::{
    Descriptions, ElementSnapshot, FreeText, KeyedLine, LaborSpec, MaterialSpec, Procurement,
    Section, TaskSpec, TaskType, TextPath, Tombstones,
};
pub use stats::{ChangeStats, LineDelta};
pub use validate::SnapshotError;

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod integration_tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use std::collections::BTreeSet;

    fn key(s: &str) -> LineKey {
        LineKey::new(s).unwrap()
    }

    #[test]
    fn purchase_task_removal_end_to_end() {
        let base: ElementSnapshot = serde_json::from_str(
            r#"{
                "materials": [{"materialKey": "mat_1", "label": "Vinyl", "needPurchase": true}],
                "tasks": [
                    {"taskKey": "tsk_1", "title": "Buy vinyl", "type": "purchase_material",
                     "materialKey": "mat_1", "dependencies": []},
                    {"taskKey": "tsk_2", "title": "Wrap", "dependencies": ["tsk_1"]}
                ]
            }"#,
        )
        .unwrap();
        let ops: Vec<PatchOp> =
            serde_json::from_str(r#"[{"op":"remove_line","entity":"tasks","key":"tsk_1"}]"#)
                .unwrap();

        let next = apply(&base, &ops).unwrap();

        let tasks: Vec<&str> = next.tasks.iter().map(|t| t.task_key.as_str()).collect();
        assert_eq!(tasks, vec!["tsk_2"]);
        assert!(next.tasks[0].dependencies.is_empty());
        assert!(!next.material("mat_1").unwrap().need_purchase);
        assert_eq!(next.tombstones.task_keys, vec![key("tsk_1")]);

        let stats = ChangeStats::between(&base, &next);
        assert_eq!(stats.tasks.removed, 1);
        assert_eq!(stats.tasks.modified, 1);
        assert_ne!(
            ContentHash::of_snapshot(&base).unwrap(),
            ContentHash::of_snapshot(&next).unwrap()
        );
    }

    #[test]
    fn replaying_a_patch_on_a_moved_base_is_well_defined() {
        let mut base = ElementSnapshot::new();
        base.labor.push(LaborSpec::new(key("lab_1"), "Paint crew"));
        let ops = PatchBuilder::new()
            .remove(Entity::Labor, key("lab_1"))
            .set_text(TextPath::Notes, "crew dropped")
            .build();

        let once = apply(&base, &ops).unwrap();
        let twice = apply(&once, &ops).unwrap();
        assert_eq!(once, twice);
    }

    #[derive(Debug, Clone)]
    enum Step {
        Remove(usize),
        Tombstone(usize),
        Restore(usize),
    }

    fn step() -> impl Strategy<Value = Step> {
        prop_oneof![
            (0..4usize).prop_map(Step::Remove),
            (0..4usize).prop_map(Step::Tombstone),
            (0..4usize).prop_map(Step::Restore),
        ]
    }

    proptest! {
        #[test]
        fn tombstones_follow_remove_add_restore(steps in prop::collection::vec(step(), 0..12)) {
            let keys: Vec<LineKey> = (0..4).map(|i| key(&format!("lab_{i}"))).collect();
            let ops: Vec<PatchOp> = steps
                .iter()
                .map(|s| match s {
                    Step::Remove(i) => PatchOp::remove(Entity::Labor, keys[*i].clone()),
                    Step::Tombstone(i) => PatchOp::tombstone(Entity::Labor, keys[*i].clone()),
                    Step::Restore(i) => PatchOp::restore(Entity::Labor, keys[*i].clone()),
                })
                .collect();

            let mut expected = BTreeSet::new();
            for s in &steps {
                match s {
                    Step::Remove(i) | Step::Tombstone(i) => { expected.insert(*i); }
                    Step::Restore(i) => { expected.remove(i); }
                }
            }

            let next = apply(&ElementSnapshot::new(), &ops).unwrap();
            let actual: BTreeSet<usize> = keys
                .iter()
                .enumerate()
                .filter(|(_, k)| next.tombstones.contains(Entity::Labor, k.as_str()))
                .map(|(i, _)| i)
                .collect();
            prop_assert_eq!(actual, expected);
            prop_assert!(next.validate().is_ok());
        }

        #[test]
        fn blank_tasks_never_survive(titles in prop::collection::vec("( |a|\t){0,3}", 1..6)) {
            let ops: Vec<PatchOp> = titles
                .iter()
                .enumerate()
                .map(|(i, title)| PatchOp::upsert(TaskSpec::new(key(&format!("tsk_{i}")), title.clone())))
                .collect();
            let next = apply(&ElementSnapshot::new(), &ops).unwrap();
            for task in &next.tasks {
                prop_assert!(!task.is_blank());
            }
            for (i, title) in titles.iter().enumerate() {
                if title.trim().is_empty() {
                    let key = format!("tsk_{i}");
                    prop_assert!(next.tombstones.contains(Entity::Tasks, &key));
                }
            }
        }
    }
}
