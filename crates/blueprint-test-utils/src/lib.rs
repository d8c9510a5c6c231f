//! Testing utilities for the Blueprint workspace
//!
//! Shared snapshot fixtures.

#![allow(missing_docs)]
#![allow(clippy::missing_panics_doc)]

use blueprint_snapshot::{
    ElementSnapshot, LaborSpec, LineKey, MaterialSpec, PatchOp, TaskSpec, TaskType,
};

/// Parse a key, panicking on invalid input
pub fn key(s: &str) -> LineKey {
    LineKey::new(s).unwrap()
}

/// `mat_1` bought by purchase task `tsk_1`, which `tsk_2` depends on
pub fn purchase_snapshot() -> ElementSnapshot {
    let mut s = ElementSnapshot::new();
    s.materials
        .push(MaterialSpec::new(key("mat_1"), "Vinyl wrap").needing_purchase());
    s.tasks
        .push(TaskSpec::purchase(key("tsk_1"), "Buy vinyl", key("mat_1")));
    s.tasks
        .push(TaskSpec::new(key("tsk_2"), "Apply wrap").depends_on(key("tsk_1")));
    s
}

/// A fuller build: two materials, one labor line, four tasks
pub fn stage_set_snapshot() -> ElementSnapshot {
    let mut s = ElementSnapshot::new();
    s.descriptions.short = "Stage backdrop".to_string();
    s.descriptions.long = "Painted 6x3m backdrop on a timber frame".to_string();
    s.free_text.risks = "Paint drying time".to_string();

    s.materials.push(
        MaterialSpec::new(key("mat_frame"), "Timber 45x95")
            .with_category("timber")
            .with_quantity(24.0, "m")
            .with_unit_cost(3.5),
    );
    s.materials.push(
        MaterialSpec::new(key("mat_canvas"), "Canvas")
            .with_category("fabric")
            .with_quantity(18.0, "m2")
            .with_unit_cost(12.0)
            .needing_purchase(),
    );
    s.labor
        .push(LaborSpec::new(key("lab_carp"), "Carpentry").with_hours(8.0).with_rate(45.0));

    s.tasks.push(TaskSpec::purchase(
        key("tsk_buy"),
        "Order canvas",
        key("mat_canvas"),
    ));
    let mut frame = TaskSpec::new(key("tsk_frame"), "Build frame")
        .with_type(TaskType::Build)
        .with_duration(6.0);
    frame.uses_material_keys.push(key("mat_frame"));
    frame.uses_labor_keys.push(key("lab_carp"));
    s.tasks.push(frame);
    s.tasks.push(
        TaskSpec::new(key("tsk_stretch"), "Stretch canvas")
            .with_type(TaskType::Build)
            .depends_on(key("tsk_buy"))
            .depends_on(key("tsk_frame")),
    );
    s.tasks.push(
        TaskSpec::new(key("tsk_install"), "Install on site")
            .with_type(TaskType::Install)
            .depends_on(key("tsk_stretch")),
    );
    s
}

/// Single-op patch that renames a material
pub fn rename_material(snapshot: &ElementSnapshot, material: &str, label: &str) -> PatchOp {
    let mut line = snapshot.material(material).cloned().unwrap();
    line.label = label.to_string();
    PatchOp::upsert(line)
}
