//! Stable content keys for snapshot lines
//!
//! Provides [`LineKey`], the join key that identifies a material, labor or
//! task line across patch replays and projection rebuilds, and [`Entity`],
//! the family a key belongs to.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use ulid::Ulid;

/// Maximum accepted key length
pub const MAX_KEY_LEN: usize = 128;

/// Line families that carry stable content keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Entity {
    /// Material lines (`materialKey`)
    Materials,
    /// Labor lines (`laborKey`)
    Labor,
    /// Sub-tasks (`taskKey`)
    Tasks,
}

impl Entity {
    /// Every entity, in snapshot order
    pub const ALL: [Entity; 3] = [Entity::Materials, Entity::Labor, Entity::Tasks];

    /// Prefix used for generated keys
    #[inline]
    #[must_use]
    pub const fn key_prefix(self) -> &'static str {
        match self {
            Self::Materials => "mat",
            Self::Labor => "lab",
            Self::Tasks => "tsk",
        }
    }

    /// Wire name of the key field on lines of this entity
    #[inline]
    #[must_use]
    pub const fn key_field(self) -> &'static str {
        match self {
            Self::Materials => "materialKey",
            Self::Labor => "laborKey",
            Self::Tasks => "taskKey",
        }
    }

    /// Wire name
    #[inline]
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Materials => "materials",
            Self::Labor => "labor",
            Self::Tasks => "tasks",
        }
    }
}

impl Display for Entity {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Entity {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "materials" => Ok(Self::Materials),
            "labor" => Ok(Self::Labor),
            "tasks" => Ok(Self::Tasks),
            other => Err(KeyError::UnknownEntity(other.to_string())),
        }
    }
}

/// Stable content key of a snapshot line
///
/// Assigned once and never regenerated. Keys are opaque; generated keys use
/// the entity prefix (`mat_`, `lab_`, `tsk_`) followed by a lowercase ULID.
///
/// # Invariants
/// - Non-empty, at most [`MAX_KEY_LEN`] bytes
/// - ASCII alphanumerics plus `_`, `-`, `.` and `:` only
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LineKey(String);

impl LineKey {
    /// Create key from string
    ///
    /// # Errors
    /// Returns error if the key is empty, too long or has invalid characters
    pub fn new(key: impl Into<String>) -> Result<Self, KeyError> {
        let key = key.into();
        if key.is_empty() {
            return Err(KeyError::Empty);
        }
        if key.len() > MAX_KEY_LEN {
            return Err(KeyError::TooLong {
                len: key.len(),
                max: MAX_KEY_LEN,
            });
        }
        if let Some(ch) = key
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | ':')))
        {
            return Err(KeyError::InvalidChar { key, ch });
        }
        Ok(Self(key))
    }

    /// Generate a fresh key for an entity
    #[must_use]
    pub fn generate(entity: Entity) -> Self {
        Self(format!(
            "{}_{}",
            entity.key_prefix(),
            Ulid::new().to_string().to_lowercase()
        ))
    }

    /// Key as string slice
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for LineKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for LineKey {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for LineKey {
    type Error = KeyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<LineKey> for String {
    fn from(key: LineKey) -> Self {
        key.0
    }
}

impl Borrow<str> for LineKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for LineKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for LineKey {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for LineKey {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

/// Errors constructing keys or entity names
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyError {
    /// Empty key
    #[error("line key must not be empty")]
    Empty,

    /// Key longer than [`MAX_KEY_LEN`]
    #[error("line key too long: {len} bytes (max {max})")]
    TooLong { len: usize, max: usize },

    /// Disallowed character
    #[error("line key '{key}' contains invalid character {ch:?}")]
    InvalidChar { key: String, ch: char },

    /// Unknown entity name
    #[error("unknown entity: '{0}'")]
    UnknownEntity(String),

    /// Unknown text path
    #[error("unknown text path: '{0}'")]
    UnknownPath(String),

    /// Section name not recognised
    #[error("unknown section: '{0}'")]
    UnknownSection(String),
}
