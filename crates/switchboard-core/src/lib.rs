//! switchboard-core - The dispatch brain of switchboard
//!
//! This crate provides:
//! - Capability registry loaded from a manifest of per-agent datasets
//! - Lexical intent router with a deterministic tie-break and fallback agent
//! - Delegation seam with a registry-backed simulated executor
//! - Orchestrator tying routing, memory, and delegation into `route_task`

pub mod delegate;
pub mod error;
pub mod orchestrator;
pub mod registry;
pub mod router;
pub mod types;

// Re-export main types for convenience
pub use delegate::{Delegate, SimulatedDelegate};
pub use error::{Result, SwitchboardError};
pub use orchestrator::{Orchestrator, OrchestratorConfig, next_task_id};
pub use registry::{CapabilityEntry, CapabilityMetadata, CapabilityRegistry, TaskTemplate};
pub use router::{
    DEFAULT_FALLBACK_AGENT, FALLBACK_THRESHOLD, IntentAnalysis, IntentRouter, default_patterns,
};
pub use types::{AgentInfo, AgentState, AgentStatus, SystemStatus, TaskRecord, TaskResponse};
