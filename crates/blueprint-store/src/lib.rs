//! Blueprint Version Store
//!
//! Append-only element histories and the draft/revision approval workflow.
//!
//! # Core Concepts
//!
//! - [`Element`]: A deliverable with a mutable pointer into its version chain
//! - [`ElementVersion`]: Immutable snapshot plus provenance
//! - [`Revision`]: Draft grouping per-element [`RevisionChange`]s
//! - [`Store::approve`]: All-or-nothing commit with base-version conflict checks
//!
//! # Example
//!
//! ```rust,ignore
//! let draft = store.create_draft(project, "tasks", "edit", false).revision_id;
//! store.stage_change(draft, StageRequest::patch(element, Some(base), ops))?;
//! let approval = store.approve(draft, "alice")?;
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod conflict;
mod element;
mod error;
mod ids;
mod persist;
mod preview;
mod revision;
mod store;
mod version;
mod workflow;

pub use conflict::VersionConflict;
pub use element::{Element, ElementStatus};
pub use error::StoreError;
pub use ids::{ElementId, ProjectId, RevisionId, VersionId};
pub use persist::{StoreImage, IMAGE_FORMAT};
pub use preview::{ChangePreview, PreviewOutcome};
pub use revision::{ProposedChange, Revision, RevisionChange, RevisionStatus, StageRequest};
pub use store::Store;
pub use version::{ElementVersion, VersionOrigin};
pub use workflow::{resolve_change, Approval, CommittedVersion, DraftHandle};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
