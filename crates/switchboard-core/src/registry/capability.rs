//! Capability entries and the dataset documents they are built from

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// A unit of work an agent knows how to perform
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskTemplate {
    #[serde(deserialize_with = "required_string")]
    pub id: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub estimated_time: Option<String>,
}

impl TaskTemplate {
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: Some(description.into()),
            estimated_time: None,
        }
    }

    pub fn with_estimated_time(mut self, estimated_time: impl Into<String>) -> Self {
        self.estimated_time = Some(estimated_time.into());
        self
    }

    pub fn description(&self) -> &str {
        self.description.as_deref().unwrap_or("")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CapabilityMetadata {
    pub version: Option<String>,
    pub last_updated: Option<String>,
}

/// Static description of one agent: capability tags, task templates, metadata
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CapabilityEntry {
    pub agent: String,
    pub capabilities: Vec<String>,
    pub tasks: Vec<TaskTemplate>,
    pub metadata: CapabilityMetadata,
}

impl CapabilityEntry {
    /// An entry with no capabilities and no templates
    pub fn empty(agent: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty() && self.tasks.is_empty()
    }

    /// Overlay a dataset onto this entry. Fields present in the dataset
    /// replace the current value; absent fields are left as they are.
    pub fn merge(&mut self, doc: DatasetDocument) {
        if let Some(capabilities) = doc.metadata.capabilities {
            self.capabilities = capabilities;
        }
        if let Some(version) = doc.metadata.version {
            self.metadata.version = Some(version);
        }
        if let Some(last_updated) = doc.metadata.last_updated {
            self.metadata.last_updated = Some(last_updated);
        }
        if let Some(tasks) = doc.tasks {
            self.tasks = tasks;
        }
    }
}

/// One dataset source as found on disk
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DatasetDocument {
    #[serde(default)]
    pub metadata: DatasetMetadata,
    #[serde(default)]
    pub tasks: Option<Vec<TaskTemplate>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DatasetMetadata {
    #[serde(default)]
    pub capabilities: Option<Vec<String>>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub version: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub last_updated: Option<String>,
}

/// Accept strings, numbers, or booleans where a string is expected
fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| match v {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }))
}

fn required_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    lenient_string(deserializer)?
        .ok_or_else(|| serde::de::Error::custom("task id must not be null"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dataset_document_parse() {
        let raw = r#"{
            "metadata": {
                "capabilities": ["code_generation", "refactoring"],
                "version": 2.1,
                "last_updated": "2025-01-10"
            },
            "tasks": [
                {"id": "api_build", "description": "Build a REST API", "estimated_time": "2 hours"},
                {"id": 42, "description": "Numeric id", "estimated_time": 30}
            ]
        }"#;
        let doc: DatasetDocument = serde_json::from_str(raw).unwrap();
        assert_eq!(doc.metadata.version.as_deref(), Some("2.1"));
        let tasks = doc.tasks.unwrap();
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[1].id, "42");
        assert_eq!(tasks[1].estimated_time.as_deref(), Some("30"));
    }

    #[test]
    fn test_merge_overwrites_present_fields_only() {
        let mut entry = CapabilityEntry::empty("builder");
        entry.merge(DatasetDocument {
            metadata: DatasetMetadata {
                capabilities: Some(vec!["coding".into()]),
                version: Some("1".into()),
                last_updated: Some("2024-01-01".into()),
            },
            tasks: Some(vec![TaskTemplate::new("a", "first")]),
        });
        entry.merge(DatasetDocument {
            metadata: DatasetMetadata {
                capabilities: None,
                version: Some("2".into()),
                last_updated: None,
            },
            tasks: None,
        });

        assert_eq!(entry.capabilities, vec!["coding"]);
        assert_eq!(entry.metadata.version.as_deref(), Some("2"));
        assert_eq!(entry.metadata.last_updated.as_deref(), Some("2024-01-01"));
        assert_eq!(entry.tasks.len(), 1);
    }

    #[test]
    fn test_empty_entry() {
        let entry = CapabilityEntry::empty("scribe");
        assert!(entry.is_empty());
        assert_eq!(entry.agent, "scribe");
    }

    #[test]
    fn test_template_without_description() {
        let t: TaskTemplate = serde_json::from_str(r#"{"id": "x"}"#).unwrap();
        assert_eq!(t.description(), "");
        assert!(t.estimated_time.is_none());
    }
}
