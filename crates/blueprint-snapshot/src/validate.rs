//! Snapshot schema validation
//!
//! Every snapshot that enters the version store passes through
//! [`ElementSnapshot::validate`], whether it was produced by the patch engine,
//! proposed wholesale by a generation agent or typed in by a person.

use crate::key::{Entity, LineKey};
use crate::snapshot::{ElementSnapshot, KeyedLine};
use std::collections::HashSet;

/// Snapshot invariant violations
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SnapshotError {
    /// Two live lines share a key
    #[error("duplicate {entity} key '{key}'")]
    DuplicateKey { entity: Entity, key: LineKey },

    /// Key is both live and tombstoned
    #[error("{entity} key '{key}' is live but tombstoned")]
    TombstonedLiveKey { entity: Entity, key: LineKey },

    /// Task field points at a key that is not a live line
    #[error("task '{task}' {field} references unknown {entity} key '{key}'")]
    DanglingReference {
        task: LineKey,
        field: &'static str,
        entity: Entity,
        key: LineKey,
    },

    /// Task lists itself as a dependency
    #[error("task '{0}' depends on itself")]
    SelfDependency(LineKey),

    /// Negative or non-finite number
    #[error("{entity} line '{key}' has invalid {field}: {value}")]
    InvalidNumber {
        entity: Entity,
        key: LineKey,
        field: &'static str,
        value: f64,
    },
}

impl ElementSnapshot {
    /// Check the full snapshot rule set
    ///
    /// # Errors
    /// Returns the first violation found, checked in this order: duplicate
    /// keys, tombstone overlap, numeric fields, task references.
    pub fn validate(&self) -> Result<(), SnapshotError> {
        unique_keys(&self.materials)?;
        unique_keys(&self.labor)?;
        unique_keys(&self.tasks)?;

        for entity in Entity::ALL {
            if let Some(key) = self
                .tombstones
                .keys(entity)
                .iter()
                .find(|k| self.contains_key(entity, k.as_str()))
            {
                return Err(SnapshotError::TombstonedLiveKey {
                    entity,
                    key: key.clone(),
                });
            }
        }

        for m in &self.materials {
            check_number(Entity::Materials, &m.material_key, "quantity", m.quantity)?;
            if let Some(cost) = m.unit_cost {
                check_number(Entity::Materials, &m.material_key, "unitCost", cost)?;
            }
        }
        for l in &self.labor {
            check_number(Entity::Labor, &l.labor_key, "quantity", l.quantity)?;
            if let Some(cost) = l.unit_cost {
                check_number(Entity::Labor, &l.labor_key, "unitCost", cost)?;
            }
        }
        for t in &self.tasks {
            if let Some(hours) = t.duration_hours {
                check_number(Entity::Tasks, &t.task_key, "durationHours", hours)?;
            }
        }

        self.check_references()
    }

    fn check_references(&self) -> Result<(), SnapshotError> {
        let tasks: HashSet<&str> = self.tasks.iter().map(|t| t.task_key.as_str()).collect();
        let materials: HashSet<&str> = self
            .materials
            .iter()
            .map(|m| m.material_key.as_str())
            .collect();
        let labor: HashSet<&str> = self.labor.iter().map(|l| l.labor_key.as_str()).collect();

        for task in &self.tasks {
            let dangling = |field, entity, key: &LineKey| SnapshotError::DanglingReference {
                task: task.task_key.clone(),
                field,
                entity,
                key: key.clone(),
            };

            for dep in &task.dependencies {
                if *dep == task.task_key {
                    return Err(SnapshotError::SelfDependency(task.task_key.clone()));
                }
                if !tasks.contains(dep.as_str()) {
                    return Err(dangling("dependencies", Entity::Tasks, dep));
                }
            }
            if let Some(key) = &task.material_key {
                if !materials.contains(key.as_str()) {
                    return Err(dangling("materialKey", Entity::Materials, key));
                }
            }
            if let Some(key) = task
                .uses_material_keys
                .iter()
                .find(|k| !materials.contains(k.as_str()))
            {
                return Err(dangling("usesMaterialKeys", Entity::Materials, key));
            }
            if let Some(key) = task
                .uses_labor_keys
                .iter()
                .find(|k| !labor.contains(k.as_str()))
            {
                return Err(dangling("usesLaborKeys", Entity::Labor, key));
            }
        }
        Ok(())
    }
}

fn unique_keys<L: KeyedLine>(lines: &[L]) -> Result<(), SnapshotError> {
    let mut seen = HashSet::with_capacity(lines.len());
    for line in lines {
        if !seen.insert(line.key().as_str()) {
            return Err(SnapshotError::DuplicateKey {
                entity: L::ENTITY,
                key: line.key().clone(),
            });
        }
    }
    Ok(())
}

fn check_number(
    entity: Entity,
    key: &LineKey,
    field: &'static str,
    value: f64,
) -> Result<(), SnapshotError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(SnapshotError::InvalidNumber {
            entity,
            key: key.clone(),
            field,
            value,
        })
    }
}
