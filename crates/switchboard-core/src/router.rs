//! Intent routing
//!
//! Scores free-form task text against a table of trigger phrases per agent
//! and picks one routing target. Classification is purely lexical:
//! - +1 when a phrase occurs anywhere in the lower-cased text
//! - +2 more when it also occurs as a whole word
//!
//! Agents are visited in lexicographic order and a later agent only wins
//! with a strictly higher score, so ties go to the alphabetically first
//! agent. The same table and input always produce the same decision.

use std::collections::BTreeMap;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, SwitchboardError};

/// Below this confidence a decision is flagged as a fallback
pub const FALLBACK_THRESHOLD: f64 = 0.3;

/// Agent used when nothing in the text matches any trigger phrase
pub const DEFAULT_FALLBACK_AGENT: &str = "featuresmith";

/// Outcome of classifying one piece of text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentAnalysis {
    pub agent: String,
    pub confidence: f64,
    pub scores: BTreeMap<String, u32>,
    pub fallback: bool,
}

struct TriggerPhrase {
    text: String,
    whole_word: Regex,
}

struct AgentRule {
    agent: String,
    phrases: Vec<TriggerPhrase>,
}

impl AgentRule {
    fn score(&self, lower: &str) -> u32 {
        self.phrases
            .iter()
            .map(|p| {
                let mut score = 0;
                if lower.contains(&p.text) {
                    score += 1;
                }
                if p.whole_word.is_match(lower) {
                    score += 2;
                }
                score
            })
            .sum()
    }
}

/// Lexical intent classifier over a static pattern table
pub struct IntentRouter {
    rules: Vec<AgentRule>,
    fallback_agent: String,
}

impl IntentRouter {
    /// Build a router from an agent → trigger-phrase table.
    ///
    /// Phrases are lower-cased, trimmed, and de-duplicated (first occurrence
    /// kept); empty phrases are dropped.
    pub fn new(
        patterns: BTreeMap<String, Vec<String>>,
        fallback_agent: impl Into<String>,
    ) -> Result<Self> {
        let mut rules = Vec::with_capacity(patterns.len());
        for (agent, raw_phrases) in patterns {
            let mut phrases: Vec<TriggerPhrase> = Vec::new();
            for raw in raw_phrases {
                let text = raw.trim().to_lowercase();
                if text.is_empty() || phrases.iter().any(|p| p.text == text) {
                    continue;
                }
                let whole_word = Regex::new(&format!(r"(?i)\b{}\b", regex::escape(&text)))
                    .map_err(|e| {
                        SwitchboardError::Configuration(format!(
                            "Invalid trigger phrase '{}' for agent '{}': {}",
                            text, agent, e
                        ))
                    })?;
                phrases.push(TriggerPhrase { text, whole_word });
            }
            rules.push(AgentRule { agent, phrases });
        }

        Ok(Self {
            rules,
            fallback_agent: fallback_agent.into(),
        })
    }

    pub fn fallback_agent(&self) -> &str {
        &self.fallback_agent
    }

    /// Agents in the pattern table, in tie-break order
    pub fn agents(&self) -> impl Iterator<Item = &str> {
        self.rules.iter().map(|r| r.agent.as_str())
    }

    /// Number of distinct trigger phrases configured for an agent
    pub fn phrase_count(&self, agent: &str) -> usize {
        self.rules
            .iter()
            .find(|r| r.agent == agent)
            .map(|r| r.phrases.len())
            .unwrap_or(0)
    }

    /// Classify text into a routing decision
    pub fn classify(&self, text: &str) -> IntentAnalysis {
        let lower = text.to_lowercase();
        let mut scores = BTreeMap::new();
        let mut best: Option<(&AgentRule, u32)> = None;

        for rule in &self.rules {
            let score = rule.score(&lower);
            scores.insert(rule.agent.clone(), score);
            if best.is_none_or(|(_, top)| score > top) {
                best = Some((rule, score));
            }
        }

        let analysis = match best {
            Some((rule, score)) if score > 0 => {
                let confidence = (score as f64 / rule.phrases.len() as f64).min(1.0);
                IntentAnalysis {
                    agent: rule.agent.clone(),
                    confidence,
                    scores,
                    fallback: confidence < FALLBACK_THRESHOLD,
                }
            }
            _ => IntentAnalysis {
                agent: self.fallback_agent.clone(),
                confidence: 0.0,
                scores,
                fallback: true,
            },
        };

        debug!(
            "Routed to '{}' (confidence {:.2}, fallback={})",
            analysis.agent, analysis.confidence, analysis.fallback
        );
        analysis
    }
}

impl Default for IntentRouter {
    fn default() -> Self {
        // Built-in phrases are plain words; escaping them always yields a valid pattern.
        Self::new(default_patterns(), DEFAULT_FALLBACK_AGENT).unwrap_or_else(|_| Self {
            rules: Vec::new(),
            fallback_agent: DEFAULT_FALLBACK_AGENT.to_string(),
        })
    }
}

/// The built-in trigger table
pub fn default_patterns() -> BTreeMap<String, Vec<String>> {
    let table: [(&str, &[&str]); 4] = [
        (
            "blueprint",
            &["ui", "design", "layout", "interface", "mockup", "wireframe"],
        ),
        (
            "builder",
            &["build", "code", "implement", "develop", "compile", "program"],
        ),
        (
            "integrator",
            &["apk", "deploy", "release", "integrate", "pipeline", "ship"],
        ),
        (
            "scribe",
            &["document", "documentation", "write", "report", "readme", "notes"],
        ),
    ];
    table
        .into_iter()
        .map(|(agent, phrases)| {
            (
                agent.to_string(),
                phrases.iter().map(|p| p.to_string()).collect(),
            )
        })
        .collect()
}
