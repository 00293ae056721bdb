//! Agent capability registry — what each routing target can do
//!
//! Loaded once at startup from a manifest that lists, per agent identity,
//! one or more dataset sources. Read-only afterwards.

pub mod capability;
pub mod manifest;

pub use capability::{CapabilityEntry, CapabilityMetadata, DatasetDocument, TaskTemplate};
pub use manifest::CapabilityRegistry;
