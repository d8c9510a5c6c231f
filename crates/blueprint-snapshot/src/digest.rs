//! Plain-text snapshot digest
//!
//! The digest is what gets published to the knowledge sink after an approval.
//! Output is deterministic for a given snapshot: sections always appear in the
//! same order and empty sections are omitted.

use crate::snapshot::{ElementSnapshot, TaskType, TextPath};
use std::fmt::Write;

/// Renders a snapshot as a compact text document
#[derive(Debug, Clone, Copy)]
pub struct SnapshotDigest {
    max_chars: usize,
}

impl Default for SnapshotDigest {
    fn default() -> Self {
        Self {
            max_chars: Self::DEFAULT_MAX_CHARS,
        }
    }
}

impl SnapshotDigest {
    /// Default truncation limit
    pub const DEFAULT_MAX_CHARS: usize = 8_000;

    /// Digest renderer with a character limit
    #[inline]
    #[must_use]
    pub const fn with_max_chars(max_chars: usize) -> Self {
        Self { max_chars }
    }

    /// Render `snapshot` under the heading `name`
    #[must_use]
    pub fn render(&self, name: &str, snapshot: &ElementSnapshot) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "# {name}");

        for path in TextPath::ALL {
            let text = snapshot.text(path).trim();
            if !text.is_empty() {
                let _ = writeln!(out, "\n## {path}\n{text}");
            }
        }

        if !snapshot.materials.is_empty() {
            out.push_str("\n## materials\n");
            for m in &snapshot.materials {
                let _ = write!(out, "- [{}] {} x{} {}", m.material_key, m.label, m.quantity, m.unit);
                if m.need_purchase {
                    out.push_str(" (purchase)");
                }
                out.push('\n');
            }
        }

        if !snapshot.labor.is_empty() {
            out.push_str("\n## labor\n");
            for l in &snapshot.labor {
                let _ = writeln!(out, "- [{}] {} {}{}", l.labor_key, l.label, l.quantity, l.unit);
            }
        }

        if !snapshot.tasks.is_empty() {
            out.push_str("\n## tasks\n");
            for t in &snapshot.tasks {
                let _ = write!(out, "- [{}] {}", t.task_key, t.title.trim());
                if t.task_type == TaskType::PurchaseMaterial {
                    if let Some(material) = &t.material_key {
                        let _ = write!(out, " (buys {material})");
                    }
                }
                if !t.dependencies.is_empty() {
                    let deps: Vec<&str> = t.dependencies.iter().map(|k| k.as_str()).collect();
                    let _ = write!(out, " after {}", deps.join(", "));
                }
                out.push('\n');
            }
        }

        truncate_chars(out, self.max_chars)
    }
}

fn truncate_chars(mut text: String, max_chars: usize) -> String {
    if let Some((idx, _)) = text.char_indices().nth(max_chars) {
        text.truncate(idx);
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::LineKey;
    use crate::snapshot::{MaterialSpec, TaskSpec};

    fn key(s: &str) -> LineKey {
        LineKey::new(s).unwrap()
    }

    fn sample() -> ElementSnapshot {
        let mut s = ElementSnapshot::new();
        s.descriptions.short = "Entrance arch".to_string();
        s.materials
            .push(MaterialSpec::new(key("mat_1"), "Birch ply").needing_purchase());
        s.tasks
            .push(TaskSpec::purchase(key("tsk_1"), "Order ply", key("mat_1")));
        s.tasks
            .push(TaskSpec::new(key("tsk_2"), "Assemble").depends_on(key("tsk_1")));
        s
    }

    #[test]
    fn digest_lists_sections_in_order() {
        let text = SnapshotDigest::default().render("Arch", &sample());
        assert!(text.starts_with("# Arch\n"));
        assert!(text.contains("## descriptions.short\nEntrance arch"));
        assert!(text.contains("- [mat_1] Birch ply x1 pcs (purchase)"));
        assert!(text.contains("- [tsk_1] Order ply (buys mat_1)"));
        assert!(text.contains("- [tsk_2] Assemble after tsk_1"));
        assert!(!text.contains("## labor"));
        let materials = text.find("## materials").unwrap();
        let tasks = text.find("## tasks").unwrap();
        assert!(materials < tasks);
    }

    #[test]
    fn digest_is_deterministic() {
        let digest = SnapshotDigest::default();
        assert_eq!(digest.render("A", &sample()), digest.render("A", &sample()));
    }

    #[test]
    fn digest_truncates_on_char_boundary() {
        let mut s = ElementSnapshot::new();
        s.free_text.notes = "ééééééééé".to_string();
        let text = SnapshotDigest::with_max_chars(12).render("N", &s);
        assert_eq!(text.chars().count(), 12);
    }
}
