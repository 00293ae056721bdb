//! Task orchestration
//!
//! Composes the intent router, the memory store, and a delegate into a single
//! `route_task` operation, and keeps a bounded in-process history of routed
//! tasks for status views. Every completed task is also published on a
//! broadcast channel so that front-ends can fan it out.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use serde_json::{Value, json};
use switchboard_memory::MemoryStore;
use tokio::sync::{RwLock, broadcast};
use tracing::{debug, info, warn};

use crate::delegate::{Delegate, SimulatedDelegate};
use crate::error::{Result, SwitchboardError};
use crate::registry::CapabilityRegistry;
use crate::router::IntentRouter;
use crate::types::{AgentInfo, AgentState, AgentStatus, SystemStatus, TaskRecord, TaskResponse};

static TASK_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate a process-unique task id: `task_<YYYYmmdd_HHMMSS_micros>_<counter>`
pub fn next_task_id() -> String {
    let seq = TASK_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("task_{}_{}", Utc::now().format("%Y%m%d_%H%M%S_%6f"), seq)
}

/// Configuration for the orchestrator
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub history_limit: usize,
    pub store_results: bool,
    pub notification_capacity: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            history_limit: 10_000,
            store_results: true,
            notification_capacity: 256,
        }
    }
}

#[derive(Default)]
struct TaskHistory {
    records: VecDeque<TaskRecord>,
    total: u64,
}

pub struct Orchestrator {
    registry: Arc<CapabilityRegistry>,
    router: IntentRouter,
    memory: Arc<MemoryStore>,
    delegate: Arc<dyn Delegate>,
    config: OrchestratorConfig,
    history: RwLock<TaskHistory>,
    notifications: broadcast::Sender<TaskResponse>,
}

impl Orchestrator {
    pub fn new(
        registry: Arc<CapabilityRegistry>,
        router: IntentRouter,
        memory: Arc<MemoryStore>,
        delegate: Arc<dyn Delegate>,
        config: OrchestratorConfig,
    ) -> Self {
        let (notifications, _) = broadcast::channel(config.notification_capacity.max(1));
        Self {
            registry,
            router,
            memory,
            delegate,
            config,
            history: RwLock::new(TaskHistory::default()),
            notifications,
        }
    }

    /// Orchestrator backed by the registry-driven `SimulatedDelegate`
    pub fn simulated(
        registry: Arc<CapabilityRegistry>,
        router: IntentRouter,
        memory: Arc<MemoryStore>,
        config: OrchestratorConfig,
    ) -> Self {
        let delegate = Arc::new(SimulatedDelegate::new(registry.clone()));
        Self::new(registry, router, memory, delegate, config)
    }

    pub fn memory(&self) -> &MemoryStore {
        &self.memory
    }

    /// Receive a copy of every completed task response
    pub fn subscribe(&self) -> broadcast::Receiver<TaskResponse> {
        self.notifications.subscribe()
    }

    /// Every identity the orchestrator can route to or describe, sorted
    pub fn identities(&self) -> Vec<String> {
        let mut known: BTreeSet<String> = self.registry.identities();
        known.extend(self.router.agents().map(str::to_string));
        known.insert(self.router.fallback_agent().to_string());
        known.into_iter().collect()
    }

    fn is_known(&self, agent: &str) -> bool {
        self.registry.contains(agent)
            || self.router.fallback_agent() == agent
            || self.router.agents().any(|a| a == agent)
    }

    /// Classify, record, and delegate one task
    pub async fn route_task(&self, text: &str, context: Option<Value>) -> Result<TaskResponse> {
        if text.trim().is_empty() {
            return Err(SwitchboardError::validation("Task input is required"));
        }

        let task_id = next_task_id();
        let analysis = self.router.classify(text);
        let agent = analysis.agent.clone();
        let context = context.unwrap_or_else(|| json!({}));
        info!("Task {} routed to '{}'", task_id, agent);

        self.memory
            .append_input(&agent, text, context.clone())
            .await?;

        let result = self.delegate.delegate(&agent, text).await?;

        if self.config.store_results {
            self.memory
                .append_result(
                    &agent,
                    &task_id,
                    result.clone(),
                    json!({
                        "confidence": analysis.confidence,
                        "fallback": analysis.fallback,
                    }),
                )
                .await?;
        }

        let timestamp = Utc::now();
        let confidence = analysis.confidence;
        let record = TaskRecord {
            task_id: task_id.clone(),
            input_text: text.to_string(),
            agent: agent.clone(),
            timestamp,
            context,
            intent_analysis: analysis,
        };
        {
            let mut history = self.history.write().await;
            history.records.push_back(record);
            while history.records.len() > self.config.history_limit {
                history.records.pop_front();
            }
            history.total += 1;
        }

        let response = TaskResponse {
            task_id,
            agent_info: self.get_agent_info(&agent),
            agent,
            result,
            confidence,
            timestamp,
        };

        if self.notifications.send(response.clone()).is_err() {
            debug!("No subscribers for task {} notification", response.task_id);
        }
        Ok(response)
    }

    pub fn get_agent_info(&self, agent: &str) -> AgentInfo {
        let entry = self.registry.get(agent);
        AgentInfo {
            agent: entry.agent,
            capabilities: entry.capabilities,
            template_count: entry.tasks.len(),
            metadata: entry.metadata,
        }
    }

    /// Most recent `limit` task records, newest last; 0 returns the whole history
    pub async fn get_task_history(&self, limit: usize) -> Vec<TaskRecord> {
        let history = self.history.read().await;
        let skip = if limit == 0 {
            0
        } else {
            history.records.len().saturating_sub(limit)
        };
        history.records.iter().skip(skip).cloned().collect()
    }

    pub async fn get_system_status(&self) -> SystemStatus {
        let agents = self.identities();
        let mut memory_entries = BTreeMap::new();
        for agent in &agents {
            memory_entries.insert(agent.clone(), self.memory.count(agent).await);
        }

        let history = self.history.read().await;
        SystemStatus {
            agent_count: agents.len(),
            agents,
            total_tasks_processed: history.total,
            memory_entries,
            last_task: history.records.back().cloned(),
        }
    }

    /// Status for one agent, or for every known agent when `agent` is `None`
    pub async fn agent_status(&self, agent: Option<&str>) -> BTreeMap<String, AgentStatus> {
        let targets = match agent {
            Some(a) => vec![a.to_string()],
            None => self.identities(),
        };

        let mut statuses = BTreeMap::new();
        for name in targets {
            let status = if self.is_known(&name) {
                AgentState::Active
            } else {
                warn!("Status requested for unknown agent '{}'", name);
                AgentState::Unknown
            };
            let memory_entries = self.memory.count(&name).await;
            statuses.insert(
                name,
                AgentStatus {
                    status,
                    memory_entries,
                },
            );
        }
        statuses
    }
}
