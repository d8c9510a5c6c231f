//! Service configuration
//!
//! Loaded from TOML; every key is optional and falls back to its default.
//!
//! ```toml
//! [rebuild]
//! enabled = true
//! queue_capacity = 64
//! force_resync = false
//!
//! [knowledge]
//! enabled = true
//! digest_max_chars = 8000
//! publish_timeout_ms = 5000
//!
//! [drafts]
//! reuse_open_drafts = true
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Config is not valid TOML for this schema
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is out of range
    #[error("invalid config value: {0}")]
    Invalid(String),
}

/// Projection rebuild scheduling
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RebuildConfig {
    /// Schedule a rebuild after every approval
    pub enabled: bool,
    /// Bound of the rebuild job queue
    pub queue_capacity: usize,
    /// Bypass the per-element sync guard on scheduled rebuilds
    pub force_resync: bool,
}

impl Default for RebuildConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            queue_capacity: 64,
            force_resync: false,
        }
    }
}

/// Knowledge digest publication
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KnowledgeConfig {
    pub enabled: bool,
    pub digest_max_chars: usize,
    /// Per-entry limit on a sink publish; a slower publish counts as failed
    pub publish_timeout_ms: u64,
}

impl KnowledgeConfig {
    #[inline]
    #[must_use]
    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms)
    }
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            digest_max_chars: blueprint_snapshot::SnapshotDigest::DEFAULT_MAX_CHARS,
            publish_timeout_ms: 5_000,
        }
    }
}

/// Draft handling
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DraftConfig {
    /// `create_draft` returns an open draft for the same tab when one exists
    pub reuse_open_drafts: bool,
}

impl Default for DraftConfig {
    fn default() -> Self {
        Self {
            reuse_open_drafts: true,
        }
    }
}

/// Element service configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub rebuild: RebuildConfig,
    pub knowledge: KnowledgeConfig,
    pub drafts: DraftConfig,
}

impl ServiceConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and validate a TOML document
    ///
    /// # Errors
    /// [`ConfigError::Parse`] or [`ConfigError::Invalid`]
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file
    ///
    /// # Errors
    /// [`ConfigError::Io`] plus everything [`ServiceConfig::from_toml_str`] returns
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Check value ranges
    ///
    /// # Errors
    /// [`ConfigError::Invalid`]
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rebuild.queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "rebuild.queue_capacity must be at least 1".to_string(),
            ));
        }
        if self.knowledge.digest_max_chars == 0 {
            return Err(ConfigError::Invalid(
                "knowledge.digest_max_chars must be at least 1".to_string(),
            ));
        }
        if self.knowledge.publish_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "knowledge.publish_timeout_ms must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// With rebuild scheduling on or off
    #[inline]
    #[must_use]
    pub fn with_rebuild(mut self, enabled: bool) -> Self {
        self.rebuild.enabled = enabled;
        self
    }

    /// With rebuild queue capacity
    #[inline]
    #[must_use]
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.rebuild.queue_capacity = capacity;
        self
    }

    /// With forced resyncs
    #[inline]
    #[must_use]
    pub fn with_force_resync(mut self, force: bool) -> Self {
        self.rebuild.force_resync = force;
        self
    }

    /// With knowledge publication on or off
    #[inline]
    #[must_use]
    pub fn with_knowledge(mut self, enabled: bool) -> Self {
        self.knowledge.enabled = enabled;
        self
    }

    /// With digest size limit
    #[inline]
    #[must_use]
    pub fn with_digest_max_chars(mut self, max_chars: usize) -> Self {
        self.knowledge.digest_max_chars = max_chars;
        self
    }

    /// With sink publish timeout
    #[inline]
    #[must_use]
    pub fn with_publish_timeout(mut self, timeout: Duration) -> Self {
        self.knowledge.publish_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// With draft reuse on or off
    #[inline]
    #[must_use]
    pub fn with_draft_reuse(mut self, reuse: bool) -> Self {
        self.drafts.reuse_open_drafts = reuse;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn empty_document_is_default() {
        assert_eq!(ServiceConfig::from_toml_str("").unwrap(), ServiceConfig::default());
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = ServiceConfig::from_toml_str(
            r#"
            [rebuild]
            queue_capacity = 8

            [drafts]
            reuse_open_drafts = false
            "#,
        )
        .unwrap();
        assert_eq!(config.rebuild.queue_capacity, 8);
        assert!(config.rebuild.enabled);
        assert!(!config.drafts.reuse_open_drafts);
        assert_eq!(config.knowledge, KnowledgeConfig::default());
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let err = ServiceConfig::from_toml_str("[rebuild]\nqueue_capacity = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn zero_publish_timeout_is_rejected() {
        let err =
            ServiceConfig::from_toml_str("[knowledge]\npublish_timeout_ms = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn wrong_type_is_a_parse_error() {
        let err = ServiceConfig::from_toml_str("[knowledge]\nenabled = \"yes\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn load_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[knowledge]\ndigest_max_chars = 200").unwrap();
        let config = ServiceConfig::load(file.path()).unwrap();
        assert_eq!(config.knowledge.digest_max_chars, 200);

        let missing = ServiceConfig::load(file.path().with_extension("missing"));
        assert!(matches!(missing, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn builders_chain() {
        let config = ServiceConfig::new()
            .with_rebuild(false)
            .with_queue_capacity(4)
            .with_force_resync(true)
            .with_knowledge(false)
            .with_digest_max_chars(100)
            .with_publish_timeout(Duration::from_millis(250))
            .with_draft_reuse(false);
        assert!(!config.rebuild.enabled);
        assert_eq!(config.rebuild.queue_capacity, 4);
        assert!(config.rebuild.force_resync);
        assert!(!config.knowledge.enabled);
        assert_eq!(config.knowledge.digest_max_chars, 100);
        assert_eq!(config.knowledge.publish_timeout(), Duration::from_millis(250));
        assert!(!config.drafts.reuse_open_drafts);
    }
}
