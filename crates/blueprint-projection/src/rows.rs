//! Derived row types
//!
//! Every row carries a [`RowMeta`]: who owns it ([`Generation`]), whether
//! it is locked, and which version/run produced it. The synchronizer only
//! touches rows that are `generated` and unlocked.

use blueprint_snapshot::{ContentHash, LineKey, Procurement, TaskType};
use blueprint_store::{ElementId, ElementStatus, VersionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use ulid::Ulid;

/// Derived row identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RowId(pub Ulid);

impl RowId {
    /// Generate new row ID
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for RowId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Derivation run identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RunId(pub Ulid);

impl RunId {
    /// Generate new run ID
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Who owns a row
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Generation {
    /// Maintained by the synchronizer
    #[default]
    Generated,
    /// Entered by a person; never touched by rebuilds
    Manual,
}

/// Provenance of a generated row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DerivedFrom {
    pub element_version_id: VersionId,
    pub derivation_run_id: RunId,
}

/// Ownership fields shared by every row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowMeta {
    pub id: RowId,
    pub element_id: ElementId,
    pub generation: Generation,
    pub lock: bool,
    pub derived_from: Option<DerivedFrom>,
    pub updated_at: DateTime<Utc>,
}

impl RowMeta {
    pub(crate) fn generated(element_id: ElementId, derived_from: DerivedFrom) -> Self {
        Self {
            id: RowId::new(),
            element_id,
            generation: Generation::Generated,
            lock: false,
            derived_from: Some(derived_from),
            updated_at: Utc::now(),
        }
    }

    pub(crate) fn manual(element_id: ElementId) -> Self {
        Self {
            id: RowId::new(),
            element_id,
            generation: Generation::Manual,
            lock: false,
            derived_from: None,
            updated_at: Utc::now(),
        }
    }

    /// Rebuilds may patch or delete this row
    #[inline]
    #[must_use]
    pub fn is_owned(&self) -> bool {
        self.generation == Generation::Generated && !self.lock
    }

    pub(crate) fn touch(&mut self, derived_from: DerivedFrom) {
        self.derived_from = Some(derived_from);
        self.updated_at = Utc::now();
    }
}

/// Grouping record, one per element
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionRow {
    #[serde(flatten)]
    pub meta: RowMeta,
    pub name: String,
    pub status: ElementStatus,
    pub description: String,
}

/// User-entered actual figures
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Actuals {
    pub actual_quantity: Option<f64>,
    pub actual_unit_cost: Option<f64>,
}

/// Material line item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaterialLine {
    #[serde(flatten)]
    pub meta: RowMeta,
    /// `None` for legacy or manual rows
    pub material_key: Option<LineKey>,
    pub category: String,
    pub label: String,
    pub quantity: f64,
    pub unit: String,
    pub unit_cost: Option<f64>,
    pub procurement: Procurement,
    pub need_purchase: bool,
    pub status: Option<String>,
    pub notes: String,
    #[serde(flatten)]
    pub actuals: Actuals,
    /// Purchase task buying this material
    pub purchase_task_id: Option<RowId>,
}

/// Labor line item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkLine {
    #[serde(flatten)]
    pub meta: RowMeta,
    pub labor_key: Option<LineKey>,
    pub category: String,
    pub label: String,
    pub quantity: f64,
    pub unit: String,
    pub unit_cost: Option<f64>,
    pub status: Option<String>,
    pub notes: String,
    #[serde(flatten)]
    pub actuals: Actuals,
}

/// Scheduled task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRow {
    #[serde(flatten)]
    pub meta: RowMeta,
    pub task_key: Option<LineKey>,
    pub title: String,
    pub description: String,
    pub task_type: TaskType,
    pub duration_hours: Option<f64>,
    /// Progress status; survives resyncs once set
    pub status: Option<String>,
    pub dependency_ids: Vec<RowId>,
    /// Material bought by a purchase task
    pub material_line_id: Option<RowId>,
}

/// Common access for key/label matching
pub(crate) trait KeyedRow {
    fn meta(&self) -> &RowMeta;
    fn meta_mut(&mut self) -> &mut RowMeta;
    fn content_key(&self) -> Option<&LineKey>;
    fn match_label(&self) -> &str;
}

impl KeyedRow for MaterialLine {
    fn meta(&self) -> &RowMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut RowMeta {
        &mut self.meta
    }

    fn content_key(&self) -> Option<&LineKey> {
        self.material_key.as_ref()
    }

    fn match_label(&self) -> &str {
        &self.label
    }
}

impl KeyedRow for WorkLine {
    fn meta(&self) -> &RowMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut RowMeta {
        &mut self.meta
    }

    fn content_key(&self) -> Option<&LineKey> {
        self.labor_key.as_ref()
    }

    fn match_label(&self) -> &str {
        &self.label
    }
}

impl KeyedRow for TaskRow {
    fn meta(&self) -> &RowMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut RowMeta {
        &mut self.meta
    }

    fn content_key(&self) -> Option<&LineKey> {
        self.task_key.as_ref()
    }

    fn match_label(&self) -> &str {
        &self.title
    }
}

/// What started a rebuild
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunTrigger {
    /// Scheduled after a revision approval
    Approval,
    /// Requested directly
    Manual,
    /// Requested with the sync guard bypassed
    Forced,
}

/// Audit record of one rebuild pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DerivationRun {
    pub id: RunId,
    pub element_id: ElementId,
    pub version_id: VersionId,
    pub trigger: RunTrigger,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub summary: RebuildSummary,
    /// Rows created or patched by this run
    pub row_ids: Vec<RowId>,
}

/// What an element's rows were last rebuilt from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncMarker {
    pub element_id: ElementId,
    pub version_id: VersionId,
    pub content_hash: ContentHash,
}

/// Counts from one element rebuild
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RebuildSummary {
    pub element_id: ElementId,
    pub section_id: RowId,
    pub tasks_synced: usize,
    pub materials_synced: usize,
    pub labor_synced: usize,
    /// Generated rows removed because their key left the snapshot
    pub rows_deleted: usize,
    /// Snapshot lines matched to locked rows and left alone
    pub rows_skipped: usize,
}

/// Rows currently held for an element
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowCounts {
    pub sections: usize,
    pub materials: usize,
    pub work: usize,
    pub tasks: usize,
}

/// Normalize a label for legacy matching: lowercase alphanumeric words
#[must_use]
pub fn normalize_label(label: &str) -> String {
    label
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}
