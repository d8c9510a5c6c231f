//! Base-version conflict diagnostics

use crate::ids::{ElementId, VersionId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A staged change whose base version has moved
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionConflict {
    pub element_id: ElementId,
    /// Version the change was drafted against
    pub expected: VersionId,
    /// Element's current version at approval time
    pub actual: Option<VersionId>,
}

impl VersionConflict {
    /// Compare a drafted base against the current pointer
    #[must_use]
    pub fn check(
        element_id: ElementId,
        base: Option<VersionId>,
        current: Option<VersionId>,
    ) -> Option<Self> {
        match base {
            Some(expected) if Some(expected) != current => Some(Self {
                element_id,
                expected,
                actual: current,
            }),
            _ => None,
        }
    }
}

impl fmt::Display for VersionConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.actual {
            Some(actual) => write!(
                f,
                "element {} was drafted against {} but is now at {}",
                self.element_id, self.expected, actual
            ),
            None => write!(
                f,
                "element {} was drafted against {} but has no current version",
                self.element_id, self.expected
            ),
        }
    }
}

/// Render a conflict list for error messages
pub(crate) fn describe(conflicts: &[VersionConflict]) -> String {
    conflicts
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_base_never_conflicts() {
        assert!(VersionConflict::check(ElementId::new(), None, Some(VersionId::new())).is_none());
    }

    #[test]
    fn moved_base_conflicts() {
        let (element, v1, v2) = (ElementId::new(), VersionId::new(), VersionId::new());
        let conflict = VersionConflict::check(element, Some(v1), Some(v2)).unwrap();
        assert_eq!(conflict.actual, Some(v2));
        assert!(conflict.to_string().contains(&element.to_string()));
        assert!(VersionConflict::check(element, Some(v2), Some(v2)).is_none());
    }
}
