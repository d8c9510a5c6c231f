//! Patch operations and the patch engine
//!
//! A patch is an ordered list of [`PatchOp`]s applied to a base snapshot by
//! [`apply`]. The engine is pure: the base is never mutated, and the result
//! is either a fully validated snapshot or an error with nothing applied.
//!
//! # Tombstones
//! `remove_line` tombstones the removed key. A later `upsert_line` for that
//! key fails with [`PatchError::TombstoneViolation`] unless the same batch
//! also carries a `tombstone_restore` for it, so a stale proposal replayed
//! against a newer base cannot bring a deleted line back.

use crate::key::{Entity, LineKey};
use crate::snapshot::{
    Descriptions, ElementSnapshot, FreeText, KeyedLine, LaborSpec, MaterialSpec, Section,
    TaskSpec, TaskType, TextPath,
};
use crate::validate::SnapshotError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// One typed edit instruction
///
/// Serialized as an internally tagged object, e.g.
/// `{"op":"remove_line","entity":"tasks","key":"tsk_1"}`. Unknown `op`
/// values are rejected at deserialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawPatchOp", into = "RawPatchOp")]
pub enum PatchOp {
    /// Replace one free-text field
    SetText { path: TextPath, value: String },

    /// Replace a whole section
    ReplaceSection(SectionValue),

    /// Insert or replace a line by its key
    UpsertLine(LineValue),

    /// Delete a line, clean up references to it and tombstone its key
    RemoveLine { entity: Entity, key: LineKey },

    /// Tombstone a key directly
    TombstoneAdd { entity: Entity, key: LineKey },

    /// Lift a tombstone
    TombstoneRestore { entity: Entity, key: LineKey },
}

impl PatchOp {
    /// `set_text`
    #[inline]
    #[must_use]
    pub fn set_text(path: TextPath, value: impl Into<String>) -> Self {
        Self::SetText {
            path,
            value: value.into(),
        }
    }

    /// `upsert_line` for any keyed line
    #[inline]
    #[must_use]
    pub fn upsert(line: impl Into<LineValue>) -> Self {
        Self::UpsertLine(line.into())
    }

    /// `remove_line`
    #[inline]
    #[must_use]
    pub fn remove(entity: Entity, key: LineKey) -> Self {
        Self::RemoveLine { entity, key }
    }

    /// `tombstone_add`
    #[inline]
    #[must_use]
    pub fn tombstone(entity: Entity, key: LineKey) -> Self {
        Self::TombstoneAdd { entity, key }
    }

    /// `tombstone_restore`
    #[inline]
    #[must_use]
    pub fn restore(entity: Entity, key: LineKey) -> Self {
        Self::TombstoneRestore { entity, key }
    }

    /// Wire name of the operation
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::SetText { .. } => "set_text",
            Self::ReplaceSection(_) => "replace_section",
            Self::UpsertLine(_) => "upsert_line",
            Self::RemoveLine { .. } => "remove_line",
            Self::TombstoneAdd { .. } => "tombstone_add",
            Self::TombstoneRestore { .. } => "tombstone_restore",
        }
    }

    /// Entity and key targeted by line/tombstone operations
    #[must_use]
    pub fn target(&self) -> Option<(Entity, &LineKey)> {
        match self {
            Self::UpsertLine(line) => Some((line.entity(), line.key())),
            Self::RemoveLine { entity, key }
            | Self::TombstoneAdd { entity, key }
            | Self::TombstoneRestore { entity, key } => Some((*entity, key)),
            Self::SetText { .. } | Self::ReplaceSection(_) => None,
        }
    }
}

/// Payload of `replace_section`
#[derive(Debug, Clone, PartialEq)]
pub enum SectionValue {
    Descriptions(Descriptions),
    FreeText(FreeText),
    Materials(Vec<MaterialSpec>),
    Labor(Vec<LaborSpec>),
    Tasks(Vec<TaskSpec>),
}

impl SectionValue {
    /// Copy one section out of a snapshot
    #[must_use]
    pub fn from_snapshot(snapshot: &ElementSnapshot, section: Section) -> Self {
        match section {
            Section::Descriptions => Self::Descriptions(snapshot.descriptions.clone()),
            Section::FreeText => Self::FreeText(snapshot.free_text.clone()),
            Section::Materials => Self::Materials(snapshot.materials.clone()),
            Section::Labor => Self::Labor(snapshot.labor.clone()),
            Section::Tasks => Self::Tasks(snapshot.tasks.clone()),
        }
    }

    /// Section being replaced
    #[must_use]
    pub fn section(&self) -> Section {
        match self {
            Self::Descriptions(_) => Section::Descriptions,
            Self::FreeText(_) => Section::FreeText,
            Self::Materials(_) => Section::Materials,
            Self::Labor(_) => Section::Labor,
            Self::Tasks(_) => Section::Tasks,
        }
    }
}

/// Payload of `upsert_line`
#[derive(Debug, Clone, PartialEq)]
pub enum LineValue {
    Material(MaterialSpec),
    Labor(LaborSpec),
    Task(TaskSpec),
}

impl LineValue {
    /// Entity of the line
    #[must_use]
    pub fn entity(&self) -> Entity {
        match self {
            Self::Material(_) => Entity::Materials,
            Self::Labor(_) => Entity::Labor,
            Self::Task(_) => Entity::Tasks,
        }
    }

    /// Stable key of the line
    #[must_use]
    pub fn key(&self) -> &LineKey {
        match self {
            Self::Material(m) => m.key(),
            Self::Labor(l) => l.key(),
            Self::Task(t) => t.key(),
        }
    }
}

impl From<MaterialSpec> for LineValue {
    fn from(value: MaterialSpec) -> Self {
        Self::Material(value)
    }
}

impl From<LaborSpec> for LineValue {
    fn from(value: LaborSpec) -> Self {
        Self::Labor(value)
    }
}

impl From<TaskSpec> for LineValue {
    fn from(value: TaskSpec) -> Self {
        Self::Task(value)
    }
}

/// Errors from the patch engine
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PatchError {
    /// Upsert of a tombstoned key without a restore in the same batch
    #[error("{entity} key '{key}' is tombstoned; add a tombstone_restore to the same batch to revive it")]
    TombstoneViolation { entity: Entity, key: LineKey },

    /// Resulting snapshot failed validation
    #[error("patched snapshot is invalid: {0}")]
    Validation(#[from] SnapshotError),

    /// Op could not be decoded
    #[error("malformed patch op: {0}")]
    Malformed(String),
}

/// Result of [`apply_with_report`]
#[derive(Debug, Clone, PartialEq)]
pub struct PatchReport {
    /// Validated resulting snapshot
    pub snapshot: ElementSnapshot,
    /// Blank tasks removed by the post-pass
    pub pruned_tasks: Vec<LineKey>,
}

/// Apply `ops` to `base`, in order
///
/// # Errors
/// - [`PatchError::TombstoneViolation`] naming the offending key
/// - [`PatchError::Validation`] if the result breaks a snapshot invariant
pub fn apply(base: &ElementSnapshot, ops: &[PatchOp]) -> Result<ElementSnapshot, PatchError> {
    apply_with_report(base, ops).map(|report| report.snapshot)
}

/// Like [`apply`], also reporting which blank tasks were pruned
///
/// # Errors
/// Same as [`apply`]
pub fn apply_with_report(
    base: &ElementSnapshot,
    ops: &[PatchOp],
) -> Result<PatchReport, PatchError> {
    let mut next = base.clone();
    let restoring: HashSet<(Entity, &str)> = ops
        .iter()
        .filter_map(|op| match op {
            PatchOp::TombstoneRestore { entity, key } => Some((*entity, key.as_str())),
            _ => None,
        })
        .collect();

    for op in ops {
        tracing::trace!(op = op.name(), "applying patch op");
        apply_op(&mut next, op, &restoring)?;
    }

    let pruned_tasks = prune_blank_tasks(&mut next);
    if !pruned_tasks.is_empty() {
        tracing::debug!(count = pruned_tasks.len(), "pruned blank tasks");
    }
    next.tombstones.dedup();
    next.validate()?;

    Ok(PatchReport {
        snapshot: next,
        pruned_tasks,
    })
}

fn apply_op(
    snapshot: &mut ElementSnapshot,
    op: &PatchOp,
    restoring: &HashSet<(Entity, &str)>,
) -> Result<(), PatchError> {
    match op {
        PatchOp::SetText { path, value } => {
            *snapshot.text_mut(*path) = value.clone();
        }
        PatchOp::ReplaceSection(value) => replace_section(snapshot, value, restoring)?,
        PatchOp::UpsertLine(line) => {
            let (entity, key) = (line.entity(), line.key());
            admit_key(snapshot, entity, key, restoring)?;
            match line {
                LineValue::Material(m) => upsert(&mut snapshot.materials, m.clone()),
                LineValue::Labor(l) => upsert(&mut snapshot.labor, l.clone()),
                LineValue::Task(t) => upsert(&mut snapshot.tasks, t.clone()),
            }
        }
        PatchOp::RemoveLine { entity, key } => remove_line(snapshot, *entity, key),
        PatchOp::TombstoneAdd { entity, key } => snapshot.tombstones.add(*entity, key.clone()),
        PatchOp::TombstoneRestore { entity, key } => {
            snapshot.tombstones.restore(*entity, key.as_str());
        }
    }
    Ok(())
}

/// Reject tombstoned keys unless restored in this batch
fn admit_key(
    snapshot: &mut ElementSnapshot,
    entity: Entity,
    key: &LineKey,
    restoring: &HashSet<(Entity, &str)>,
) -> Result<(), PatchError> {
    if !snapshot.tombstones.contains(entity, key.as_str()) {
        return Ok(());
    }
    if restoring.contains(&(entity, key.as_str())) {
        snapshot.tombstones.restore(entity, key.as_str());
        Ok(())
    } else {
        Err(PatchError::TombstoneViolation {
            entity,
            key: key.clone(),
        })
    }
}

fn upsert<L: KeyedLine>(lines: &mut Vec<L>, line: L) {
    match lines.iter_mut().find(|l| l.key() == line.key()) {
        Some(slot) => *slot = line,
        None => lines.push(line),
    }
}

fn take<L: KeyedLine>(lines: &mut Vec<L>, key: &str) -> Option<L> {
    let idx = lines.iter().position(|l| l.key() == key)?;
    Some(lines.remove(idx))
}

fn replace_section(
    snapshot: &mut ElementSnapshot,
    value: &SectionValue,
    restoring: &HashSet<(Entity, &str)>,
) -> Result<(), PatchError> {
    match value {
        SectionValue::Descriptions(d) => snapshot.descriptions = d.clone(),
        SectionValue::FreeText(f) => snapshot.free_text = f.clone(),
        SectionValue::Materials(lines) => {
            let dropped = replace_lines(snapshot, lines, restoring, |s| &mut s.materials)?;
            for m in dropped {
                sweep_references(snapshot, m.key());
            }
        }
        SectionValue::Labor(lines) => {
            let dropped = replace_lines(snapshot, lines, restoring, |s| &mut s.labor)?;
            for l in dropped {
                sweep_references(snapshot, l.key());
            }
        }
        SectionValue::Tasks(lines) => {
            let dropped = replace_lines(snapshot, lines, restoring, |s| &mut s.tasks)?;
            for t in dropped {
                detach_task(snapshot, &t);
            }
        }
    }
    Ok(())
}

/// Swap in a new line list; returns lines whose keys disappeared
fn replace_lines<L, F>(
    snapshot: &mut ElementSnapshot,
    lines: &[L],
    restoring: &HashSet<(Entity, &str)>,
    field: F,
) -> Result<Vec<L>, PatchError>
where
    L: KeyedLine + Clone,
    F: Fn(&mut ElementSnapshot) -> &mut Vec<L>,
{
    for line in lines {
        admit_key(snapshot, L::ENTITY, line.key(), restoring)?;
    }
    let incoming: HashSet<&str> = lines.iter().map(|l| l.key().as_str()).collect();
    let previous = std::mem::replace(field(snapshot), lines.to_vec());
    Ok(previous
        .into_iter()
        .filter(|l| !incoming.contains(l.key().as_str()))
        .collect())
}

/// Delete a line, cascade reference cleanup, tombstone its key
///
/// Missing keys are still swept and tombstoned so that replaying a removal
/// against a base that already lost the line stays well-defined.
fn remove_line(snapshot: &mut ElementSnapshot, entity: Entity, key: &LineKey) {
    match entity {
        Entity::Materials => {
            take(&mut snapshot.materials, key.as_str());
        }
        Entity::Labor => {
            take(&mut snapshot.labor, key.as_str());
        }
        Entity::Tasks => {
            if let Some(task) = take(&mut snapshot.tasks, key.as_str()) {
                release_purchase(snapshot, &task);
            }
        }
    }
    sweep_references(snapshot, key);
    snapshot.tombstones.add(entity, key.clone());
}

fn detach_task(snapshot: &mut ElementSnapshot, task: &TaskSpec) {
    release_purchase(snapshot, task);
    sweep_references(snapshot, &task.task_key);
}

/// A removed purchase task no longer buys its material
fn release_purchase(snapshot: &mut ElementSnapshot, task: &TaskSpec) {
    if task.task_type != TaskType::PurchaseMaterial {
        return;
    }
    if let Some(material_key) = &task.material_key {
        if let Some(material) = snapshot
            .materials
            .iter_mut()
            .find(|m| m.material_key == *material_key)
        {
            material.need_purchase = false;
        }
    }
}

/// Strip `key` from every task reference field
fn sweep_references(snapshot: &mut ElementSnapshot, key: &LineKey) {
    for task in &mut snapshot.tasks {
        task.dependencies.retain(|k| k != key);
        task.uses_material_keys.retain(|k| k != key);
        task.uses_labor_keys.retain(|k| k != key);
        if task.material_key.as_ref() == Some(key) {
            task.material_key = None;
        }
    }
}

/// Remove and tombstone tasks whose title and details are blank
fn prune_blank_tasks(snapshot: &mut ElementSnapshot) -> Vec<LineKey> {
    let blank: Vec<LineKey> = snapshot
        .tasks
        .iter()
        .filter(|t| t.is_blank())
        .map(|t| t.task_key.clone())
        .collect();
    for key in &blank {
        remove_line(snapshot, Entity::Tasks, key);
    }
    blank
}

/// Fluent construction of op lists
#[derive(Debug, Clone, Default)]
pub struct PatchBuilder {
    ops: Vec<PatchOp>,
}

impl PatchBuilder {
    /// Empty builder
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `set_text`
    #[must_use]
    pub fn set_text(mut self, path: TextPath, value: impl Into<String>) -> Self {
        self.ops.push(PatchOp::set_text(path, value));
        self
    }

    /// Append `replace_section`
    #[must_use]
    pub fn replace_section(mut self, value: SectionValue) -> Self {
        self.ops.push(PatchOp::ReplaceSection(value));
        self
    }

    /// Append `upsert_line`
    #[must_use]
    pub fn upsert(mut self, line: impl Into<LineValue>) -> Self {
        self.ops.push(PatchOp::upsert(line));
        self
    }

    /// Append `remove_line`
    #[must_use]
    pub fn remove(mut self, entity: Entity, key: LineKey) -> Self {
        self.ops.push(PatchOp::remove(entity, key));
        self
    }

    /// Append `tombstone_add`
    #[must_use]
    pub fn tombstone(mut self, entity: Entity, key: LineKey) -> Self {
        self.ops.push(PatchOp::tombstone(entity, key));
        self
    }

    /// Append `tombstone_restore`
    #[must_use]
    pub fn restore(mut self, entity: Entity, key: LineKey) -> Self {
        self.ops.push(PatchOp::restore(entity, key));
        self
    }

    /// Finished op list
    #[must_use]
    pub fn build(self) -> Vec<PatchOp> {
        self.ops
    }
}

/// Wire shape of [`PatchOp`]
///
/// Line and section payloads travel as raw JSON and are decoded against the
/// declared entity/section, so a material payload can never land in tasks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum RawPatchOp {
    SetText {
        path: TextPath,
        value: String,
    },
    ReplaceSection {
        section: Section,
        value: serde_json::Value,
    },
    UpsertLine {
        entity: Entity,
        key: LineKey,
        value: serde_json::Value,
    },
    RemoveLine {
        entity: Entity,
        key: LineKey,
    },
    TombstoneAdd {
        entity: Entity,
        key: LineKey,
    },
    TombstoneRestore {
        entity: Entity,
        key: LineKey,
    },
}

impl TryFrom<RawPatchOp> for PatchOp {
    type Error = PatchError;

    fn try_from(raw: RawPatchOp) -> Result<Self, Self::Error> {
        Ok(match raw {
            RawPatchOp::SetText { path, value } => Self::SetText { path, value },
            RawPatchOp::ReplaceSection { section, value } => {
                Self::ReplaceSection(decode_section(section, value)?)
            }
            RawPatchOp::UpsertLine { entity, key, value } => {
                Self::UpsertLine(decode_line(entity, key, value)?)
            }
            RawPatchOp::RemoveLine { entity, key } => Self::RemoveLine { entity, key },
            RawPatchOp::TombstoneAdd { entity, key } => Self::TombstoneAdd { entity, key },
            RawPatchOp::TombstoneRestore { entity, key } => {
                Self::TombstoneRestore { entity, key }
            }
        })
    }
}

fn decode<T: serde::de::DeserializeOwned>(value: serde_json::Value) -> Result<T, PatchError> {
    serde_json::from_value(value).map_err(|e| PatchError::Malformed(e.to_string()))
}

fn decode_section(section: Section, value: serde_json::Value) -> Result<SectionValue, PatchError> {
    Ok(match section {
        Section::Descriptions => SectionValue::Descriptions(decode(value)?),
        Section::FreeText => SectionValue::FreeText(decode(value)?),
        Section::Materials => SectionValue::Materials(decode(value)?),
        Section::Labor => SectionValue::Labor(decode(value)?),
        Section::Tasks => SectionValue::Tasks(decode(value)?),
    })
}

/// The op key is authoritative; a payload may omit its own key field but
/// must not contradict it.
fn decode_line(
    entity: Entity,
    key: LineKey,
    mut value: serde_json::Value,
) -> Result<LineValue, PatchError> {
    let object = value
        .as_object_mut()
        .ok_or_else(|| PatchError::Malformed(format!("{entity} value must be an object")))?;
    match object.get(entity.key_field()) {
        Some(existing) if existing.as_str() != Some(key.as_str()) => {
            return Err(PatchError::Malformed(format!(
                "{} {existing} does not match op key '{key}'",
                entity.key_field()
            )));
        }
        Some(_) => {}
        None => {
            object.insert(
                entity.key_field().to_string(),
                serde_json::Value::String(key.to_string()),
            );
        }
    }
    Ok(match entity {
        Entity::Materials => LineValue::Material(decode(value)?),
        Entity::Labor => LineValue::Labor(decode(value)?),
        Entity::Tasks => LineValue::Task(decode(value)?),
    })
}

fn encode<T: Serialize>(value: &T) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or(serde_json::Value::Null)
}

impl From<PatchOp> for RawPatchOp {
    fn from(op: PatchOp) -> Self {
        match op {
            PatchOp::SetText { path, value } => Self::SetText { path, value },
            PatchOp::ReplaceSection(value) => {
                let section = value.section();
                let value = match &value {
                    SectionValue::Descriptions(d) => encode(d),
                    SectionValue::FreeText(f) => encode(f),
                    SectionValue::Materials(m) => encode(m),
                    SectionValue::Labor(l) => encode(l),
                    SectionValue::Tasks(t) => encode(t),
                };
                Self::ReplaceSection { section, value }
            }
            PatchOp::UpsertLine(line) => {
                let (entity, key) = (line.entity(), line.key().clone());
                let value = match &line {
                    LineValue::Material(m) => encode(m),
                    LineValue::Labor(l) => encode(l),
                    LineValue::Task(t) => encode(t),
                };
                Self::UpsertLine { entity, key, value }
            }
            PatchOp::RemoveLine { entity, key } => Self::RemoveLine { entity, key },
            PatchOp::TombstoneAdd { entity, key } => Self::TombstoneAdd { entity, key },
            PatchOp::TombstoneRestore { entity, key } => Self::TombstoneRestore { entity, key },
        }
    }
}
