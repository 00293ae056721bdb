//! Manifest loading — builds the registry from per-agent dataset sources

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, info, warn};

use super::capability::{CapabilityEntry, DatasetDocument};
use crate::error::{Result, SwitchboardError};

/// A manifest value: one locator or a list of them
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ManifestSources {
    One(String),
    Many(Vec<String>),
}

impl ManifestSources {
    fn into_vec(self) -> Vec<String> {
        match self {
            Self::One(s) => vec![s],
            Self::Many(v) => v,
        }
    }
}

/// Read-only mapping of agent identity to capability entry
#[derive(Debug, Clone, Default)]
pub struct CapabilityRegistry {
    entries: BTreeMap<String, CapabilityEntry>,
}

impl CapabilityRegistry {
    /// Load the registry from a manifest file.
    ///
    /// The manifest itself must be readable and valid JSON. Individual dataset
    /// sources that are missing or malformed are reported and skipped; their
    /// agent keeps whatever the other sources provided (possibly nothing).
    pub fn load(manifest_path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(manifest_path).map_err(|e| {
            SwitchboardError::Configuration(format!(
                "Failed to read capability manifest {}: {}",
                manifest_path.display(),
                e
            ))
        })?;

        let manifest: BTreeMap<String, ManifestSources> =
            serde_json::from_str(&raw).map_err(|e| {
                SwitchboardError::Configuration(format!(
                    "Failed to parse capability manifest {}: {}",
                    manifest_path.display(),
                    e
                ))
            })?;

        let base = manifest_path.parent().unwrap_or_else(|| Path::new("."));
        let mut entries = BTreeMap::new();

        for (agent, sources) in manifest {
            let mut entry = CapabilityEntry::empty(&agent);
            for locator in sources.into_vec() {
                let path = resolve(base, &locator);
                match load_dataset(&agent, &path) {
                    Ok(doc) => {
                        debug!("Loaded dataset {} for agent '{}'", path.display(), agent);
                        entry.merge(doc);
                    }
                    Err(e) => warn!("{}; continuing without it", e),
                }
            }
            entries.insert(agent, entry);
        }

        info!(
            "Capability registry loaded {} agents from {}",
            entries.len(),
            manifest_path.display()
        );
        Ok(Self { entries })
    }

    /// Build a registry directly from entries (keyed by each entry's agent)
    pub fn from_entries(entries: impl IntoIterator<Item = CapabilityEntry>) -> Self {
        Self {
            entries: entries
                .into_iter()
                .map(|e| (e.agent.clone(), e))
                .collect(),
        }
    }

    /// Capability entry for an agent; unknown agents get an empty entry
    pub fn get(&self, agent: &str) -> CapabilityEntry {
        self.entries
            .get(agent)
            .cloned()
            .unwrap_or_else(|| CapabilityEntry::empty(agent))
    }

    pub fn contains(&self, agent: &str) -> bool {
        self.entries.contains_key(agent)
    }

    /// All registered identities, sorted
    pub fn identities(&self) -> BTreeSet<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn resolve(base: &Path, locator: &str) -> PathBuf {
    let path = PathBuf::from(locator);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
    }
}

/// Parse one dataset source, choosing the format by file extension
fn load_dataset(agent: &str, path: &Path) -> Result<DatasetDocument> {
    let fail = |reason: String| SwitchboardError::DatasetLoad {
        agent: agent.to_string(),
        locator: path.display().to_string(),
        reason,
    };

    let raw = std::fs::read_to_string(path).map_err(|e| fail(e.to_string()))?;
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default();

    match ext.as_str() {
        "yaml" | "yml" => serde_yml::from_str(&raw).map_err(|e| fail(e.to_string())),
        "toml" => toml::from_str(&raw).map_err(|e| fail(e.to_string())),
        _ => serde_json::from_str(&raw).map_err(|e| fail(e.to_string())),
    }
}
