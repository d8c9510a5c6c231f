//! Element snapshot value model
//!
//! [`ElementSnapshot`] is the full specification of an element at one
//! version: descriptions, free-text buckets, material/labor/task lines and
//! the tombstone sets that keep deleted keys deleted.

use crate::key::{Entity, KeyError, LineKey};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

/// Full specification of an element at one version
///
/// # Invariants
/// - Line keys are unique within each entity
/// - A key present in a tombstone set is never a live line of that entity
///
/// Use [`ElementSnapshot::validate`] to check the full rule set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ElementSnapshot {
    pub descriptions: Descriptions,
    pub free_text: FreeText,
    pub materials: Vec<MaterialSpec>,
    pub labor: Vec<LaborSpec>,
    pub tasks: Vec<TaskSpec>,
    pub tombstones: Tombstones,
}

impl ElementSnapshot {
    /// Empty snapshot
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Find material by key
    #[must_use]
    pub fn material(&self, key: &str) -> Option<&MaterialSpec> {
        self.materials.iter().find(|m| m.material_key == *key)
    }

    /// Find labor line by key
    #[must_use]
    pub fn labor_line(&self, key: &str) -> Option<&LaborSpec> {
        self.labor.iter().find(|l| l.labor_key == *key)
    }

    /// Find task by key
    #[must_use]
    pub fn task(&self, key: &str) -> Option<&TaskSpec> {
        self.tasks.iter().find(|t| t.task_key == *key)
    }

    /// Whether a live line of `entity` has this key
    #[must_use]
    pub fn contains_key(&self, entity: Entity, key: &str) -> bool {
        match entity {
            Entity::Materials => self.material(key).is_some(),
            Entity::Labor => self.labor_line(key).is_some(),
            Entity::Tasks => self.task(key).is_some(),
        }
    }

    /// Live keys of an entity, in snapshot order
    #[must_use]
    pub fn keys(&self, entity: Entity) -> Vec<&LineKey> {
        match entity {
            Entity::Materials => self.materials.iter().map(KeyedLine::key).collect(),
            Entity::Labor => self.labor.iter().map(KeyedLine::key).collect(),
            Entity::Tasks => self.tasks.iter().map(KeyedLine::key).collect(),
        }
    }

    /// Read a free-text field
    #[must_use]
    pub fn text(&self, path: TextPath) -> &str {
        match path {
            TextPath::DescriptionShort => &self.descriptions.short,
            TextPath::DescriptionLong => &self.descriptions.long,
            TextPath::Preferences => &self.free_text.preferences,
            TextPath::Risks => &self.free_text.risks,
            TextPath::OpenQuestions => &self.free_text.open_questions,
            TextPath::Installation => &self.free_text.installation,
            TextPath::Building => &self.free_text.building,
            TextPath::Constraints => &self.free_text.constraints,
            TextPath::Notes => &self.free_text.notes,
        }
    }

    /// Mutable access to a free-text field
    pub fn text_mut(&mut self, path: TextPath) -> &mut String {
        match path {
            TextPath::DescriptionShort => &mut self.descriptions.short,
            TextPath::DescriptionLong => &mut self.descriptions.long,
            TextPath::Preferences => &mut self.free_text.preferences,
            TextPath::Risks => &mut self.free_text.risks,
            TextPath::OpenQuestions => &mut self.free_text.open_questions,
            TextPath::Installation => &mut self.free_text.installation,
            TextPath::Building => &mut self.free_text.building,
            TextPath::Constraints => &mut self.free_text.constraints,
            TextPath::Notes => &mut self.free_text.notes,
        }
    }
}

/// Short and long descriptions
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Descriptions {
    pub short: String,
    pub long: String,
}

/// Free-text buckets
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FreeText {
    pub preferences: String,
    pub risks: String,
    pub open_questions: String,
    pub installation: String,
    pub building: String,
    pub constraints: String,
    pub notes: String,
}

/// How a material is sourced
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Procurement {
    /// Taken from existing stock
    #[default]
    Stock,
    /// Bought for this element
    Purchase,
    /// Rented for the build
    Rental,
    /// Provided by the client
    ClientSupplied,
}

/// Material line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaterialSpec {
    pub material_key: LineKey,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub quantity: f64,
    #[serde(default)]
    pub unit: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_cost: Option<f64>,
    #[serde(default)]
    pub procurement: Procurement,
    #[serde(default)]
    pub need_purchase: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default)]
    pub notes: String,
}

impl MaterialSpec {
    /// New material with defaults
    #[must_use]
    pub fn new(material_key: LineKey, label: impl Into<String>) -> Self {
        Self {
            material_key,
            category: String::new(),
            label: label.into(),
            quantity: 1.0,
            unit: "pcs".to_string(),
            unit_cost: None,
            procurement: Procurement::Stock,
            need_purchase: false,
            status: None,
            notes: String::new(),
        }
    }

    /// With quantity and unit
    #[must_use]
    pub fn with_quantity(mut self, quantity: f64, unit: impl Into<String>) -> Self {
        self.quantity = quantity;
        self.unit = unit.into();
        self
    }

    /// With unit cost
    #[must_use]
    pub fn with_unit_cost(mut self, unit_cost: f64) -> Self {
        self.unit_cost = Some(unit_cost);
        self
    }

    /// With category
    #[must_use]
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    /// Mark as bought for this element
    #[must_use]
    pub fn needing_purchase(mut self) -> Self {
        self.procurement = Procurement::Purchase;
        self.need_purchase = true;
        self
    }
}

/// Labor line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaborSpec {
    pub labor_key: LineKey,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub label: String,
    /// Hours, or `unit` multiples
    #[serde(default)]
    pub quantity: f64,
    #[serde(default)]
    pub unit: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_cost: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default)]
    pub notes: String,
}

impl LaborSpec {
    /// New labor line with defaults
    #[must_use]
    pub fn new(labor_key: LineKey, label: impl Into<String>) -> Self {
        Self {
            labor_key,
            category: String::new(),
            label: label.into(),
            quantity: 1.0,
            unit: "h".to_string(),
            unit_cost: None,
            status: None,
            notes: String::new(),
        }
    }

    /// With hours
    #[must_use]
    pub fn with_hours(mut self, hours: f64) -> Self {
        self.quantity = hours;
        self.unit = "h".to_string();
        self
    }

    /// With hourly rate
    #[must_use]
    pub fn with_rate(mut self, rate: f64) -> Self {
        self.unit_cost = Some(rate);
        self
    }
}

/// Kind of sub-task
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    #[default]
    General,
    /// Buy the linked material
    PurchaseMaterial,
    Build,
    Install,
    Logistics,
}

/// Sub-task line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSpec {
    pub task_key: LineKey,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub details: String,
    #[serde(default, rename = "type")]
    pub task_type: TaskType,
    /// Material bought by a `purchase_material` task
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub material_key: Option<LineKey>,
    /// Task keys that must finish first
    #[serde(default)]
    pub dependencies: Vec<LineKey>,
    #[serde(default)]
    pub uses_material_keys: Vec<LineKey>,
    #[serde(default)]
    pub uses_labor_keys: Vec<LineKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_hours: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

impl TaskSpec {
    /// New general task
    #[must_use]
    pub fn new(task_key: LineKey, title: impl Into<String>) -> Self {
        Self {
            task_key,
            title: title.into(),
            details: String::new(),
            task_type: TaskType::General,
            material_key: None,
            dependencies: Vec::new(),
            uses_material_keys: Vec::new(),
            uses_labor_keys: Vec::new(),
            duration_hours: None,
            status: None,
        }
    }

    /// New purchase task for a material
    #[must_use]
    pub fn purchase(task_key: LineKey, title: impl Into<String>, material_key: LineKey) -> Self {
        let mut task = Self::new(task_key, title);
        task.task_type = TaskType::PurchaseMaterial;
        task.material_key = Some(material_key);
        task
    }

    /// With task type
    #[must_use]
    pub fn with_type(mut self, task_type: TaskType) -> Self {
        self.task_type = task_type;
        self
    }

    /// With details
    #[must_use]
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = details.into();
        self
    }

    /// Add a dependency
    #[must_use]
    pub fn depends_on(mut self, task_key: LineKey) -> Self {
        self.dependencies.push(task_key);
        self
    }

    /// With duration
    #[must_use]
    pub fn with_duration(mut self, hours: f64) -> Self {
        self.duration_hours = Some(hours);
        self
    }

    /// Title and details both blank
    #[inline]
    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.title.trim().is_empty() && self.details.trim().is_empty()
    }
}

/// Common access to keyed lines
pub trait KeyedLine {
    /// Entity this line belongs to
    const ENTITY: Entity;

    /// Stable content key
    fn key(&self) -> &LineKey;
}

impl KeyedLine for MaterialSpec {
    const ENTITY: Entity = Entity::Materials;

    fn key(&self) -> &LineKey {
        &self.material_key
    }
}

impl KeyedLine for LaborSpec {
    const ENTITY: Entity = Entity::Labor;

    fn key(&self) -> &LineKey {
        &self.labor_key
    }
}

impl KeyedLine for TaskSpec {
    const ENTITY: Entity = Entity::Tasks;

    fn key(&self) -> &LineKey {
        &self.task_key
    }
}

/// Deleted keys per entity
///
/// Ordered by first deletion; [`Tombstones::dedup`] keeps the first occurrence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Tombstones {
    pub task_keys: Vec<LineKey>,
    pub material_keys: Vec<LineKey>,
    pub labor_keys: Vec<LineKey>,
}

impl Tombstones {
    /// Tombstoned keys of an entity
    #[must_use]
    pub fn keys(&self, entity: Entity) -> &[LineKey] {
        match entity {
            Entity::Materials => &self.material_keys,
            Entity::Labor => &self.labor_keys,
            Entity::Tasks => &self.task_keys,
        }
    }

    fn keys_mut(&mut self, entity: Entity) -> &mut Vec<LineKey> {
        match entity {
            Entity::Materials => &mut self.material_keys,
            Entity::Labor => &mut self.labor_keys,
            Entity::Tasks => &mut self.task_keys,
        }
    }

    /// Whether `key` is tombstoned for `entity`
    #[must_use]
    pub fn contains(&self, entity: Entity, key: &str) -> bool {
        self.keys(entity).iter().any(|k| k == key)
    }

    /// Tombstone a key (no-op if already present)
    pub fn add(&mut self, entity: Entity, key: LineKey) {
        if !self.contains(entity, key.as_str()) {
            self.keys_mut(entity).push(key);
        }
    }

    /// Remove a tombstone; returns whether it was present
    pub fn restore(&mut self, entity: Entity, key: &str) -> bool {
        let keys = self.keys_mut(entity);
        let before = keys.len();
        keys.retain(|k| k != key);
        keys.len() != before
    }

    /// Drop repeated keys, keeping first occurrences
    pub fn dedup(&mut self) {
        for entity in Entity::ALL {
            let keys = self.keys_mut(entity);
            let mut seen = std::collections::HashSet::with_capacity(keys.len());
            keys.retain(|k| seen.insert(k.clone()));
        }
    }

    /// Total tombstone count
    #[must_use]
    pub fn len(&self) -> usize {
        self.task_keys.len() + self.material_keys.len() + self.labor_keys.len()
    }

    /// No tombstones at all
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Addressable free-text fields for `set_text`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TextPath {
    #[serde(rename = "descriptions.short")]
    DescriptionShort,
    #[serde(rename = "descriptions.long")]
    DescriptionLong,
    #[serde(rename = "freeText.preferences")]
    Preferences,
    #[serde(rename = "freeText.risks")]
    Risks,
    #[serde(rename = "freeText.openQuestions")]
    OpenQuestions,
    #[serde(rename = "freeText.installation")]
    Installation,
    #[serde(rename = "freeText.building")]
    Building,
    #[serde(rename = "freeText.constraints")]
    Constraints,
    #[serde(rename = "freeText.notes")]
    Notes,
}

impl TextPath {
    /// Every text path
    pub const ALL: [TextPath; 9] = [
        TextPath::DescriptionShort,
        TextPath::DescriptionLong,
        TextPath::Preferences,
        TextPath::Risks,
        TextPath::OpenQuestions,
        TextPath::Installation,
        TextPath::Building,
        TextPath::Constraints,
        TextPath::Notes,
    ];

    /// Dotted wire path
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::DescriptionShort => "descriptions.short",
            Self::DescriptionLong => "descriptions.long",
            Self::Preferences => "freeText.preferences",
            Self::Risks => "freeText.risks",
            Self::OpenQuestions => "freeText.openQuestions",
            Self::Installation => "freeText.installation",
            Self::Building => "freeText.building",
            Self::Constraints => "freeText.constraints",
            Self::Notes => "freeText.notes",
        }
    }
}

impl Display for TextPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TextPath {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| KeyError::UnknownPath(s.to_string()))
    }
}

/// Whole sections addressable by `replace_section` and replace masks
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Section {
    Descriptions,
    FreeText,
    Materials,
    Labor,
    Tasks,
}

impl Section {
    /// Every section
    pub const ALL: [Section; 5] = [
        Section::Descriptions,
        Section::FreeText,
        Section::Materials,
        Section::Labor,
        Section::Tasks,
    ];

    /// Line entity held by this section, if any
    #[must_use]
    pub const fn entity(self) -> Option<Entity> {
        match self {
            Self::Materials => Some(Entity::Materials),
            Self::Labor => Some(Entity::Labor),
            Self::Tasks => Some(Entity::Tasks),
            Self::Descriptions | Self::FreeText => None,
        }
    }

    /// Wire name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Descriptions => "descriptions",
            Self::FreeText => "freeText",
            Self::Materials => "materials",
            Self::Labor => "labor",
            Self::Tasks => "tasks",
        }
    }
}

impl Display for Section {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Section {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| KeyError::UnknownSection(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> LineKey {
        LineKey::new(s).unwrap()
    }

    #[test]
    fn section_names_match_wire_format() {
        for section in Section::ALL {
            let json = serde_json::to_value(section).unwrap();
            assert_eq!(json, section.as_str());
            assert_eq!(section.as_str().parse::<Section>().unwrap(), section);
        }
        assert!(matches!(
            "notes".parse::<Section>(),
            Err(KeyError::UnknownSection(_))
        ));
    }

    #[test]
    fn snapshot_lookup_by_key() {
        let mut snapshot = ElementSnapshot::new();
        snapshot.materials.push(MaterialSpec::new(key("mat_1"), "Plywood"));
        snapshot.tasks.push(TaskSpec::new(key("tsk_1"), "Cut panels"));

        assert_eq!(snapshot.material("mat_1").unwrap().label, "Plywood");
        assert!(snapshot.contains_key(Entity::Tasks, "tsk_1"));
        assert!(!snapshot.contains_key(Entity::Labor, "tsk_1"));
    }

    #[test]
    fn tombstones_add_is_idempotent() {
        let mut tombstones = Tombstones::default();
        tombstones.add(Entity::Tasks, key("tsk_1"));
        tombstones.add(Entity::Tasks, key("tsk_1"));
        assert_eq!(tombstones.task_keys.len(), 1);
        assert!(tombstones.contains(Entity::Tasks, "tsk_1"));
        assert!(!tombstones.contains(Entity::Materials, "tsk_1"));
    }

    #[test]
    fn tombstones_restore_reports_presence() {
        let mut tombstones = Tombstones::default();
        tombstones.add(Entity::Labor, key("lab_1"));
        assert!(tombstones.restore(Entity::Labor, "lab_1"));
        assert!(!tombstones.restore(Entity::Labor, "lab_1"));
        assert!(tombstones.is_empty());
    }

    #[test]
    fn tombstones_dedup_keeps_first() {
        let mut tombstones = Tombstones {
            material_keys: vec![key("mat_2"), key("mat_1"), key("mat_2")],
            ..Tombstones::default()
        };
        tombstones.dedup();
        assert_eq!(tombstones.material_keys, vec![key("mat_2"), key("mat_1")]);
    }

    #[test]
    fn blank_task_detection_ignores_whitespace() {
        let task = TaskSpec::new(key("tsk_1"), "  ").with_details("\n\t");
        assert!(task.is_blank());
        assert!(!TaskSpec::new(key("tsk_2"), "Paint").is_blank());
    }

    #[test]
    fn snapshot_wire_format_is_camel_case() {
        let mut snapshot = ElementSnapshot::new();
        snapshot
            .materials
            .push(MaterialSpec::new(key("mat_1"), "Vinyl").needing_purchase());
        snapshot.tasks.push(TaskSpec::purchase(key("tsk_1"), "Buy vinyl", key("mat_1")));

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["materials"][0]["materialKey"], "mat_1");
        assert_eq!(json["materials"][0]["needPurchase"], true);
        assert_eq!(json["tasks"][0]["type"], "purchase_material");
        assert_eq!(json["tombstones"]["taskKeys"], serde_json::json!([]));

        let back: ElementSnapshot = serde_json::from_value(json).unwrap();
        assert_eq!(back, snapshot);
    }

    #[test]
    fn sparse_json_fills_defaults() {
        let snapshot: ElementSnapshot = serde_json::from_str(
            r#"{"tasks":[{"taskKey":"tsk_9","title":"Rig lights"}]}"#,
        )
        .unwrap();
        assert_eq!(snapshot.tasks[0].task_type, TaskType::General);
        assert!(snapshot.materials.is_empty());
    }

    #[test]
    fn text_path_parse_and_access() {
        let path: TextPath = "freeText.openQuestions".parse().unwrap();
        let mut snapshot = ElementSnapshot::new();
        *snapshot.text_mut(path) = "Which venue?".to_string();
        assert_eq!(snapshot.free_text.open_questions, "Which venue?");
        assert_eq!(snapshot.text(path), "Which venue?");
    }
}
