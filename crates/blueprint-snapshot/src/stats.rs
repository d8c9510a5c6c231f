//! Change statistics between two snapshots

use crate::key::Entity;
use crate::snapshot::{ElementSnapshot, KeyedLine, TextPath};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Added / removed / modified counts for one entity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineDelta {
    pub added: usize,
    pub removed: usize,
    pub modified: usize,
}

impl LineDelta {
    /// Total lines touched
    #[inline]
    #[must_use]
    pub const fn total(&self) -> usize {
        self.added + self.removed + self.modified
    }
}

/// Summary of what changed between two versions of an element
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChangeStats {
    pub materials: LineDelta,
    pub labor: LineDelta,
    pub tasks: LineDelta,
    /// Text fields whose value differs
    pub text_fields: Vec<TextPath>,
    /// Net change in tombstone count
    pub tombstones_delta: i64,
}

impl ChangeStats {
    /// Compare `before` and `after` by line key
    #[must_use]
    pub fn between(before: &ElementSnapshot, after: &ElementSnapshot) -> Self {
        let text_fields = TextPath::ALL
            .into_iter()
            .filter(|path| before.text(*path) != after.text(*path))
            .collect();
        Self {
            materials: line_delta(&before.materials, &after.materials),
            labor: line_delta(&before.labor, &after.labor),
            tasks: line_delta(&before.tasks, &after.tasks),
            text_fields,
            tombstones_delta: to_i64(after.tombstones.len()) - to_i64(before.tombstones.len()),
        }
    }

    /// Stats of a first version (everything added)
    #[must_use]
    pub fn initial(snapshot: &ElementSnapshot) -> Self {
        Self::between(&ElementSnapshot::default(), snapshot)
    }

    /// Counts for one entity
    #[must_use]
    pub fn entity(&self, entity: Entity) -> LineDelta {
        match entity {
            Entity::Materials => self.materials,
            Entity::Labor => self.labor,
            Entity::Tasks => self.tasks,
        }
    }

    /// Nothing changed
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.materials.total() == 0
            && self.labor.total() == 0
            && self.tasks.total() == 0
            && self.text_fields.is_empty()
            && self.tombstones_delta == 0
    }

    /// One-line human summary, e.g. `materials +1 ~2, tasks -1, 1 text field`
    #[must_use]
    pub fn summary(&self) -> String {
        let mut parts = Vec::new();
        for entity in Entity::ALL {
            let delta = self.entity(entity);
            if delta.total() == 0 {
                continue;
            }
            let mut counts = Vec::new();
            if delta.added > 0 {
                counts.push(format!("+{}", delta.added));
            }
            if delta.removed > 0 {
                counts.push(format!("-{}", delta.removed));
            }
            if delta.modified > 0 {
                counts.push(format!("~{}", delta.modified));
            }
            parts.push(format!("{entity} {}", counts.join(" ")));
        }
        match self.text_fields.len() {
            0 => {}
            1 => parts.push("1 text field".to_string()),
            n => parts.push(format!("{n} text fields")),
        }
        if parts.is_empty() {
            "no changes".to_string()
        } else {
            parts.join(", ")
        }
    }
}

fn to_i64(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

fn line_delta<L: KeyedLine + PartialEq>(before: &[L], after: &[L]) -> LineDelta {
    let old: HashMap<&str, &L> = before.iter().map(|l| (l.key().as_str(), l)).collect();
    let mut delta = LineDelta::default();
    let mut kept = 0;
    for line in after {
        match old.get(line.key().as_str()) {
            Some(prev) => {
                kept += 1;
                if *prev != line {
                    delta.modified += 1;
                }
            }
            None => delta.added += 1,
        }
    }
    delta.removed = old.len().saturating_sub(kept);
    delta
}
