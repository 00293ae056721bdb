use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::{debug, warn};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SwitchboardConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub routing: RoutingConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_gateway_bind")]
    pub bind: String,
    #[serde(default = "default_handler_timeout_secs")]
    pub handler_timeout_secs: u64,
}

fn default_gateway_bind() -> String {
    "127.0.0.1:8765".to_string()
}

fn default_handler_timeout_secs() -> u64 {
    30
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind: default_gateway_bind(),
            handler_timeout_secs: default_handler_timeout_secs(),
        }
    }
}

impl GatewayConfig {
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        self.bind
            .parse()
            .with_context(|| format!("Invalid gateway bind address '{}'", self.bind))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    #[serde(default = "default_memory_dir")]
    pub dir: String,
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
}

fn default_memory_dir() -> String {
    config_dir().join("memory").display().to_string()
}

fn default_max_entries() -> usize {
    switchboard_memory::DEFAULT_MAX_ENTRIES
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            dir: default_memory_dir(),
            max_entries: default_max_entries(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Capability manifest; without one every agent has an empty capability entry
    #[serde(default)]
    pub manifest: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    #[serde(default = "default_fallback_agent")]
    pub fallback_agent: String,
    /// Replaces the built-in trigger table when set
    #[serde(default)]
    pub patterns: Option<BTreeMap<String, Vec<String>>>,
}

fn default_fallback_agent() -> String {
    switchboard_core::DEFAULT_FALLBACK_AGENT.to_string()
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            fallback_agent: default_fallback_agent(),
            patterns: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    #[serde(default = "default_store_results")]
    pub store_results: bool,
    #[serde(default = "default_notification_capacity")]
    pub notification_capacity: usize,
}

fn default_history_limit() -> usize {
    10_000
}

fn default_store_results() -> bool {
    true
}

fn default_notification_capacity() -> usize {
    256
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            history_limit: default_history_limit(),
            store_results: default_store_results(),
            notification_capacity: default_notification_capacity(),
        }
    }
}

impl From<&OrchestratorConfig> for switchboard_core::OrchestratorConfig {
    fn from(cfg: &OrchestratorConfig) -> Self {
        Self {
            history_limit: cfg.history_limit,
            store_results: cfg.store_results,
            notification_capacity: cfg.notification_capacity,
        }
    }
}

pub fn config_dir() -> PathBuf {
    if let Some(home) = std::env::var_os("SWITCHBOARD_HOME").filter(|h| !h.is_empty()) {
        return PathBuf::from(home);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".switchboard")
}

impl SwitchboardConfig {
    /// Load configuration. A missing default config file yields the built-in
    /// defaults; a missing file named with `--config` is an error.
    pub fn load(custom_path: &Option<PathBuf>) -> Result<Self> {
        let path = match custom_path {
            Some(p) => p.clone(),
            None => {
                let default_path = config_dir().join("config.toml");
                if !default_path.exists() {
                    debug!(
                        "No config at {}, using defaults",
                        default_path.display()
                    );
                    return Ok(Self::default());
                }
                default_path
            }
        };

        let content = std::fs::read_to_string(&path).with_context(|| {
            format!(
                "Failed to read config at {}. Run `switchboard init` first.",
                path.display()
            )
        })?;

        Self::parse(&content)
            .with_context(|| format!("Failed to parse config at {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        // Expand environment variables before parsing
        let expanded = expand_env_vars(content);
        let config: Self = toml::from_str(&expanded)?;
        Ok(config)
    }

    pub fn memory_dir(&self) -> PathBuf {
        expand_home(&self.memory.dir)
    }

    pub fn manifest_path(&self) -> Option<PathBuf> {
        self.registry.manifest.as_deref().map(expand_home)
    }
}

/// Resolve a leading `~/` against the home directory
fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(rest),
        None => PathBuf::from(path),
    }
}

/// Allowlist of environment variable names that may be expanded in config files.
/// This prevents an attacker who can modify the config from reading arbitrary env vars.
const ALLOWED_ENV_VARS: &[&str] = &["HOME", "USER", "SWITCHBOARD_HOME"];

fn expand_env_vars(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(start) = rest.find("${") {
        let Some(len) = rest[start..].find('}') else {
            break;
        };
        let var_name = &rest[start + 2..start + len];
        result.push_str(&rest[..start]);

        if ALLOWED_ENV_VARS.contains(&var_name) {
            result.push_str(&std::env::var(var_name).unwrap_or_default());
        } else {
            warn!(
                "Skipping expansion of unrecognized env var '{}' in config (not in allowlist)",
                var_name
            );
            // Leave the ${VAR} unexpanded so it's obvious
            result.push_str(&rest[start..start + len + 1]);
        }
        rest = &rest[start + len + 1..];
    }
    result.push_str(rest);
    result
}
