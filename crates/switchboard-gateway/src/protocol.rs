//! Gateway WebSocket protocol — typed JSON envelopes keyed by `type`

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use switchboard_core::{AgentStatus, SwitchboardError, TaskResponse};
use switchboard_memory::MemoryEntry;

// ── Well-known message types ──

/// Envelope types a client can send
pub mod message_types {
    pub const TASK_REQUEST: &str = "task_request";
    pub const AGENT_STATUS: &str = "agent_status";
    pub const MEMORY_QUERY: &str = "memory_query";
    pub const SYSTEM_INFO: &str = "system_info";
}

/// `agent` value that asks for every agent's status
pub const ALL_AGENTS: &str = "all";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskRequest {
    #[serde(default)]
    pub task: Option<String>,
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub context: Option<Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentStatusRequest {
    #[serde(default)]
    pub agent: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryQuery {
    #[serde(default)]
    pub agent: Option<String>,
}

/// Client → Gateway envelope
#[derive(Debug, Clone)]
pub enum ClientMessage {
    TaskRequest(TaskRequest),
    AgentStatus(AgentStatusRequest),
    MemoryQuery(MemoryQuery),
    SystemInfo,
}

impl ClientMessage {
    /// Decode a raw text frame: parse JSON, read `type`, then decode the
    /// payload for that type.
    pub fn parse(raw: &str) -> Result<Self, SwitchboardError> {
        let value: Value = serde_json::from_str(raw)
            .map_err(|_| SwitchboardError::validation("Invalid JSON format"))?;
        let Some(kind) = value.get("type").and_then(Value::as_str) else {
            return Err(SwitchboardError::validation("Message type is required"));
        };

        let invalid = |e: serde_json::Error| {
            SwitchboardError::validation(format!("Invalid '{}' message: {}", kind, e))
        };
        match kind {
            message_types::TASK_REQUEST => Ok(Self::TaskRequest(
                serde_json::from_value(value.clone()).map_err(invalid)?,
            )),
            message_types::AGENT_STATUS => Ok(Self::AgentStatus(
                serde_json::from_value(value.clone()).map_err(invalid)?,
            )),
            message_types::MEMORY_QUERY => Ok(Self::MemoryQuery(
                serde_json::from_value(value.clone()).map_err(invalid)?,
            )),
            message_types::SYSTEM_INFO => Ok(Self::SystemInfo),
            other => Err(SwitchboardError::UnknownMessageType(other.to_string())),
        }
    }
}

/// Body of `system_info_response` and `GET /api/status`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemInfo {
    pub connected_clients: usize,
    pub available_agents: Vec<String>,
    pub server_status: String,
    pub uptime_secs: u64,
}

/// Gateway → Client envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    ConnectionEstablished {
        message: String,
        client_id: String,
        timestamp: DateTime<Utc>,
    },
    TaskResponse {
        task_id: String,
        result: Box<TaskResponse>,
        status: String,
        timestamp: DateTime<Utc>,
    },
    TaskCompleted {
        task: String,
        agent: String,
        status: String,
        timestamp: DateTime<Utc>,
    },
    AgentStatusResponse {
        agents: BTreeMap<String, AgentStatus>,
        timestamp: DateTime<Utc>,
    },
    MemoryResponse {
        agent: String,
        memory: Vec<MemoryEntry>,
        timestamp: DateTime<Utc>,
    },
    SystemInfoResponse {
        info: SystemInfo,
        timestamp: DateTime<Utc>,
    },
    Error {
        message: String,
        timestamp: DateTime<Utc>,
    },
}

const STATUS_COMPLETED: &str = "completed";

impl ServerMessage {
    pub fn welcome(client_id: impl Into<String>) -> Self {
        Self::ConnectionEstablished {
            message: "Connected to switchboard".to_string(),
            client_id: client_id.into(),
            timestamp: Utc::now(),
        }
    }

    /// Full response for the requester; `task_id` echoes the client's id when given
    pub fn task_response(client_task_id: Option<String>, response: TaskResponse) -> Self {
        Self::TaskResponse {
            task_id: client_task_id.unwrap_or_else(|| response.task_id.clone()),
            result: Box::new(response),
            status: STATUS_COMPLETED.to_string(),
            timestamp: Utc::now(),
        }
    }

    /// Reduced event fanned out to every connected client
    pub fn task_completed(task: impl Into<String>, agent: impl Into<String>) -> Self {
        Self::TaskCompleted {
            task: task.into(),
            agent: agent.into(),
            status: STATUS_COMPLETED.to_string(),
            timestamp: Utc::now(),
        }
    }

    pub fn agent_status(agents: BTreeMap<String, AgentStatus>) -> Self {
        Self::AgentStatusResponse {
            agents,
            timestamp: Utc::now(),
        }
    }

    pub fn memory(agent: impl Into<String>, memory: Vec<MemoryEntry>) -> Self {
        Self::MemoryResponse {
            agent: agent.into(),
            memory,
            timestamp: Utc::now(),
        }
    }

    pub fn system_info(info: SystemInfo) -> Self {
        Self::SystemInfoResponse {
            info,
            timestamp: Utc::now(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_task_request() {
        let msg =
            ClientMessage::parse(r#"{"type":"task_request","task":"build X","task_id":"c1"}"#)
                .unwrap();
        match msg {
            ClientMessage::TaskRequest(req) => {
                assert_eq!(req.task.as_deref(), Some("build X"));
                assert_eq!(req.task_id.as_deref(), Some("c1"));
                assert!(req.context.is_none());
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_parse_system_info_ignores_extra_fields() {
        let msg = ClientMessage::parse(r#"{"type":"system_info","verbose":true}"#).unwrap();
        assert!(matches!(msg, ClientMessage::SystemInfo));
    }

    #[test]
    fn test_parse_memory_query_without_agent() {
        let msg = ClientMessage::parse(r#"{"type":"memory_query"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::MemoryQuery(MemoryQuery { agent: None })));
    }

    #[test]
    fn test_parse_unknown_type() {
        let err = ClientMessage::parse(r#"{"type":"dance"}"#).unwrap_err();
        assert_eq!(err.to_string(), "Unknown message type: dance");
    }

    #[test]
    fn test_parse_invalid_json() {
        let err = ClientMessage::parse("not json").unwrap_err();
        assert_eq!(err.to_string(), "Invalid JSON format");
    }

    #[test]
    fn test_parse_missing_type() {
        let err = ClientMessage::parse(r#"{"task":"build"}"#).unwrap_err();
        assert!(matches!(err, SwitchboardError::Validation(_)));
    }

    #[test]
    fn test_parse_wrong_field_type() {
        let err = ClientMessage::parse(r#"{"type":"task_request","task":42}"#).unwrap_err();
        assert!(err.to_string().starts_with("Invalid 'task_request' message"));
    }

    #[test]
    fn test_error_serialize() {
        let json = serde_json::to_value(ServerMessage::error("boom")).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["message"], "boom");
        assert!(json["timestamp"].is_string());
    }

    #[test]
    fn test_task_completed_serialize() {
        let json =
            serde_json::to_value(ServerMessage::task_completed("build X", "builder")).unwrap();
        assert_eq!(json["type"], "task_completed");
        assert_eq!(json["agent"], "builder");
        assert_eq!(json["status"], "completed");
    }

    #[test]
    fn test_welcome_serialize() {
        let msg = ServerMessage::welcome("abc");
        assert!(!msg.is_error());
        let json = serde_json::to_value(msg).unwrap();
        assert_eq!(json["type"], "connection_established");
        assert_eq!(json["client_id"], "abc");
    }
}
