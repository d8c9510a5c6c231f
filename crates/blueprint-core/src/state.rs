//! On-disk service state
//!
//! One JSON document holds the version store and the derived rows, so a
//! reopened service resyncs against the rows it left behind.

use crate::config::ServiceConfig;
use crate::error::ServiceError;
use crate::service::ElementService;
use blueprint_projection::{ProjectionImage, ProjectionStore};
use blueprint_store::{Store, StoreImage};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Serializable copy of a service's store and projection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceImage {
    pub store: StoreImage,
    /// Missing in files written before rows were saved
    #[serde(default)]
    pub projection: ProjectionImage,
}

impl ElementService {
    /// Open the state at `path`, or start empty if the file does not exist
    ///
    /// # Errors
    /// I/O, parse or image consistency failure, or [`ServiceError::Config`]
    pub fn open(config: ServiceConfig, path: impl AsRef<Path>) -> Result<Self, ServiceError> {
        let path = path.as_ref();
        if !path.exists() {
            return Self::new(config, Store::new());
        }
        let bytes = std::fs::read(path)?;
        let image: ServiceImage = serde_json::from_slice(&bytes)?;
        let store = Store::from_image(image.store)?;
        let projection = ProjectionStore::from_image(image.projection)?;
        tracing::debug!(path = %path.display(), "state loaded");
        Self::with_parts(config, store, projection)
    }

    /// Copy the current state
    #[must_use]
    pub fn image(&self) -> ServiceImage {
        ServiceImage {
            store: self.store().image(),
            projection: self.projection().image(),
        }
    }

    /// Wait for queued rebuilds, then write the state as pretty JSON
    ///
    /// # Errors
    /// [`ServiceError::SchedulerClosed`], or an I/O or serialization failure
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<(), ServiceError> {
        self.flush().await?;
        let json = serde_json::to_vec_pretty(&self.image())?;
        tokio::fs::write(path.as_ref(), json).await?;
        tracing::debug!(path = %path.as_ref().display(), "state saved");
        Ok(())
    }
}
