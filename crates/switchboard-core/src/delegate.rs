//! Delegation: turns a routed task into a result payload
//!
//! `Delegate` is the seam where real agent executors plug in. The shipped
//! `SimulatedDelegate` answers from the capability registry alone: it picks
//! the task template that best matches the task text and reports which
//! capability tags the task engages.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::debug;

use crate::error::Result;
use crate::registry::{CapabilityEntry, CapabilityRegistry, TaskTemplate};

/// Executes a routed task on behalf of an agent
#[async_trait]
pub trait Delegate: Send + Sync {
    async fn delegate(&self, agent: &str, task: &str) -> Result<Value>;
}

/// Registry-backed stand-in executor
pub struct SimulatedDelegate {
    registry: Arc<CapabilityRegistry>,
}

impl SimulatedDelegate {
    pub fn new(registry: Arc<CapabilityRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl Delegate for SimulatedDelegate {
    async fn delegate(&self, agent: &str, task: &str) -> Result<Value> {
        let entry = self.registry.get(agent);
        Ok(simulate(&entry, task))
    }
}

fn simulate(entry: &CapabilityEntry, task: &str) -> Value {
    if entry.tasks.is_empty() {
        return Value::String(format!("{} working on: {}", entry.agent, task));
    }

    let words = task_words(task);
    let template = select_template(&entry.tasks, &words);
    debug!(
        "Delegating to '{}' with template {:?}",
        entry.agent,
        template.map(|t| t.id.as_str())
    );

    let message = match template {
        Some(t) => format!(
            "{} completed '{}': {}",
            entry.agent,
            t.id,
            t.description()
        ),
        None => format!("{} completed: {}", entry.agent, task),
    };

    json!({
        "agent": entry.agent,
        "status": "completed",
        "capabilities_engaged": engaged_capabilities(&entry.capabilities, &words),
        "template": template.map(|t| json!({
            "id": t.id,
            "description": t.description,
            "estimated_time": t.estimated_time,
        })),
        "message": message,
    })
}

fn task_words(task: &str) -> Vec<String> {
    task.split_whitespace().map(str::to_lowercase).collect()
}

/// Pick the template whose description or id contains the most task words.
///
/// Only a strictly higher score displaces the current best, so ties keep the
/// earlier template. A best score of zero selects nothing.
pub fn select_template<'a>(
    templates: &'a [TaskTemplate],
    words: &[String],
) -> Option<&'a TaskTemplate> {
    let mut best: Option<(&TaskTemplate, usize)> = None;
    for template in templates {
        let description = template.description().to_lowercase();
        let id = template.id.to_lowercase();
        let score = words
            .iter()
            .filter(|w| description.contains(w.as_str()) || id.contains(w.as_str()))
            .count();
        if best.is_none_or(|(_, top)| score > top) {
            best = Some((template, score));
        }
    }
    best.filter(|(_, score)| *score > 0).map(|(t, _)| t)
}

/// Capability tags mentioning any task word; every tag when none do
fn engaged_capabilities(capabilities: &[String], words: &[String]) -> Vec<String> {
    let engaged: Vec<String> = capabilities
        .iter()
        .filter(|cap| {
            let normalized = cap.replace('_', " ").to_lowercase();
            words.iter().any(|w| normalized.contains(w.as_str()))
        })
        .cloned()
        .collect();
    if engaged.is_empty() {
        capabilities.to_vec()
    } else {
        engaged
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builder_registry() -> Arc<CapabilityRegistry> {
        let mut builder = CapabilityEntry::empty("builder");
        builder.capabilities = vec!["api_development".into(), "database_design".into()];
        builder.tasks = vec![
            TaskTemplate::new("api_build", "Build a REST API").with_estimated_time("2 hours"),
            TaskTemplate::new("schema", "Design a database schema"),
        ];
        Arc::new(CapabilityRegistry::from_entries(vec![builder]))
    }

    #[tokio::test]
    async fn test_no_templates_returns_generic_ack() {
        let delegate = SimulatedDelegate::new(Arc::new(CapabilityRegistry::default()));
        let result = delegate.delegate("scribe", "write notes").await.unwrap();
        assert_eq!(result, Value::String("scribe working on: write notes".into()));
    }

    #[tokio::test]
    async fn test_selects_best_template() {
        let delegate = SimulatedDelegate::new(builder_registry());
        let result = delegate.delegate("builder", "build the REST api").await.unwrap();
        assert_eq!(result["status"], "completed");
        assert_eq!(result["template"]["id"], "api_build");
        assert_eq!(result["template"]["estimated_time"], "2 hours");
        assert_eq!(result["capabilities_engaged"], json!(["api_development"]));
    }

    #[tokio::test]
    async fn test_no_matching_template() {
        let delegate = SimulatedDelegate::new(builder_registry());
        let result = delegate.delegate("builder", "xyzzy").await.unwrap();
        assert!(result["template"].is_null());
        // nothing matched, so every capability is engaged
        assert_eq!(
            result["capabilities_engaged"],
            json!(["api_development", "database_design"])
        );
    }

    #[test]
    fn test_template_ties_keep_first() {
        let templates = vec![
            TaskTemplate::new("first", "deploy app"),
            TaskTemplate::new("second", "deploy app"),
        ];
        let words = task_words("deploy");
        assert_eq!(select_template(&templates, &words).unwrap().id, "first");
    }

    #[test]
    fn test_template_matches_on_id() {
        let templates = vec![
            TaskTemplate::new("readme", "Project overview"),
            TaskTemplate::new("changelog", "Release history"),
        ];
        let words = task_words("update the CHANGELOG");
        assert_eq!(select_template(&templates, &words).unwrap().id, "changelog");
    }
}
