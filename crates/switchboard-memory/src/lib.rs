//! Durable per-agent memory for switchboard
//!
//! This crate provides:
//! - Typed memory entries (task inputs and task results)
//! - A file-backed, size-bounded append log per agent identity
//! - Replay, filtering, substring search, statistics, and export

pub mod entry;
pub mod error;
pub mod export;
pub mod store;

pub use entry::{EntryKind, MemoryEntry, TaskInput, TaskResult};
pub use error::{MemoryError, Result};
pub use export::ExportFormat;
pub use store::{DEFAULT_MAX_ENTRIES, MemoryStats, MemoryStore};
