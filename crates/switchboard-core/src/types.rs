//! Shared types for switchboard-core

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::registry::CapabilityMetadata;
use crate::router::IntentAnalysis;

/// Bookkeeping for one routed task, kept in the orchestrator's bounded history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_id: String,
    pub input_text: String,
    pub agent: String,
    pub timestamp: DateTime<Utc>,
    pub context: Value,
    pub intent_analysis: IntentAnalysis,
}

/// Public summary of an agent's static capabilities
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentInfo {
    pub agent: String,
    pub capabilities: Vec<String>,
    pub template_count: usize,
    pub metadata: CapabilityMetadata,
}

/// Result of `Orchestrator::route_task`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResponse {
    pub task_id: String,
    pub agent: String,
    pub result: Value,
    pub confidence: f64,
    pub agent_info: AgentInfo,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentState {
    Active,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentStatus {
    pub status: AgentState,
    pub memory_entries: usize,
}

/// Point-in-time view of the orchestrator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemStatus {
    pub agent_count: usize,
    pub agents: Vec<String>,
    pub total_tasks_processed: u64,
    pub memory_entries: BTreeMap<String, usize>,
    pub last_task: Option<TaskRecord>,
}
