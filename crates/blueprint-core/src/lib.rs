//! Blueprint Core - element service
//!
//! The service layer a host application talks to:
//! - Element lifecycle and the draft/approval workflow
//! - Best-effort digest publication to a knowledge sink
//! - Asynchronous projection rebuilds after each approval
//! - TOML configuration
//! - JSON state file holding versions and derived rows
//!
//! # Example
//!
//! ```rust,ignore
//! use blueprint_core::prelude::*;
//!
//! # async fn example() -> Result<(), ServiceError> {
//! let service = ElementService::in_memory(ServiceConfig::new())?;
//! let element = service.create_element(project, "Backdrop", Some(seed), "alice")?;
//!
//! let draft = service.create_draft(project, "tasks", "edit", false).revision_id;
//! service.stage_change(draft, StageRequest::patch(element.id, element.active_version_id, ops))?;
//! service.approve(draft, "alice").await?;
//! service.flush().await?;
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod config;
pub mod error;
pub mod knowledge;
pub mod scheduler;
pub mod service;
pub mod state;

pub use config::{ConfigError, DraftConfig, KnowledgeConfig, RebuildConfig, ServiceConfig};
pub use error::ServiceError;
pub use knowledge::{KnowledgeEntry, KnowledgeSink, MemorySink, NoopSink, SinkError};
pub use scheduler::RebuildScheduler;
pub use service::{ElementService, SnapshotPreview};
pub use state::ServiceImage;

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with the element service
    pub use crate::{ElementService, KnowledgeSink, ServiceConfig, ServiceError};
    pub use blueprint_snapshot::{ElementSnapshot, Entity, LineKey, PatchOp, TextPath};
    pub use blueprint_store::{ElementId, ProjectId, RevisionId, StageRequest, VersionId};
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
