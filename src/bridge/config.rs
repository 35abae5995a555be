//! Bridge configuration loading and validation.
//!
//! Reads `dialect-bridge.yaml` and resolves environment variables before
//! parsing. Every field has a default, so an empty file (or no file at all)
//! yields a working config for a local server on the default port.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::capabilities::ModelCapabilities;
use super::errors::BridgeError;
use super::types::CanonicalTool;
use super::validator::ValidatorConfig;

/// File name searched for when walking up from the working directory.
pub const CONFIG_FILE_NAME: &str = "dialect-bridge.yaml";

/// Env var naming an explicit config file.
pub const CONFIG_PATH_ENV: &str = "DIALECT_BRIDGE_CONFIG";

// ─── Public Types ────────────────────────────────────────────────────────────

/// Exponential backoff bounds between retry attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    pub base_ms: u64,
    pub max_ms: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_ms: 500,
            max_ms: 8_000,
        }
    }
}

/// Top-level configuration (mirrors `dialect-bridge.yaml`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Backend API root; `/chat` and `/tags` are appended.
    pub base_url: String,
    /// Used when a call does not name a model.
    pub default_model: String,
    /// Per-attempt timeout. A model's `timeout_ms` capability takes precedence.
    pub timeout_ms: u64,
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub backoff: BackoffConfig,
    pub validator: ValidatorConfig,
    /// Per-model capability entries layered over the built-in table.
    pub capability_overrides: HashMap<String, ModelCapabilities>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434/api".to_string(),
            default_model: String::new(),
            timeout_ms: 120_000,
            max_retries: 3,
            backoff: BackoffConfig::default(),
            validator: ValidatorConfig::default(),
            capability_overrides: HashMap::new(),
        }
    }
}

impl BridgeConfig {
    /// Fail fast on settings that would make every call fail.
    pub fn validate(&self) -> Result<(), BridgeError> {
        let url = reqwest::Url::parse(&self.base_url).map_err(|e| BridgeError::Configuration {
            reason: format!("base_url '{}' is not a valid URL: {e}", self.base_url),
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(BridgeError::Configuration {
                reason: format!("base_url '{}' must use http or https", self.base_url),
            });
        }
        if self.timeout_ms == 0 {
            return Err(BridgeError::Configuration {
                reason: "timeout_ms must be greater than zero".into(),
            });
        }
        if self.backoff.base_ms > self.backoff.max_ms {
            return Err(BridgeError::Configuration {
                reason: format!(
                    "backoff.base_ms ({}) exceeds backoff.max_ms ({})",
                    self.backoff.base_ms, self.backoff.max_ms
                ),
            });
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// `base_url` joined with an endpoint path, without doubled slashes.
    pub fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    /// Pick the model for a call: the explicit id, else `default_model`.
    pub fn resolve_model(&self, model_id: &str) -> Result<String, BridgeError> {
        let model = if model_id.trim().is_empty() {
            self.default_model.trim()
        } else {
            model_id.trim()
        };
        if model.is_empty() {
            return Err(BridgeError::Configuration {
                reason: "no model id given and default_model is empty".into(),
            });
        }
        Ok(model.to_string())
    }
}

// ─── Collaborators ───────────────────────────────────────────────────────────

/// Where the orchestrator gets the registered tool set from.
///
/// Calls are only ever validated against this set, so it is the authority on
/// which tool names exist.
pub trait ToolSource: Send + Sync {
    fn tools(&self) -> Vec<CanonicalTool>;
}

/// A fixed tool list.
#[derive(Debug, Clone, Default)]
pub struct StaticTools(pub Vec<CanonicalTool>);

impl ToolSource for StaticTools {
    fn tools(&self) -> Vec<CanonicalTool> {
        self.0.clone()
    }
}

// ─── Loading ─────────────────────────────────────────────────────────────────

/// Locate the config file.
///
/// Order: `DIALECT_BRIDGE_CONFIG`, then `dialect-bridge.yaml` in `start` or
/// any ancestor, then `<config dir>/dialect-bridge/config.yaml`.
pub fn find_config_path(start: &Path) -> Result<PathBuf, BridgeError> {
    // 1. Explicit path
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        let candidate = PathBuf::from(expand_tilde(&path));
        if candidate.exists() {
            return Ok(candidate);
        }
    }

    // 2. Walk upward from `start`
    let mut dir = start.to_path_buf();
    loop {
        let candidate = dir.join(CONFIG_FILE_NAME);
        if candidate.exists() {
            return Ok(candidate);
        }
        if !dir.pop() {
            break;
        }
    }

    // 3. Per-user config
    if let Some(config_dir) = dirs::config_dir() {
        let candidate = config_dir.join("dialect-bridge").join("config.yaml");
        if candidate.exists() {
            return Ok(candidate);
        }
    }

    Err(BridgeError::Configuration {
        reason: format!("could not find {CONFIG_FILE_NAME}"),
    })
}

/// Load, interpolate, parse and validate a config file.
pub fn load_config(path: &Path) -> Result<BridgeConfig, BridgeError> {
    let raw = std::fs::read_to_string(path).map_err(|e| BridgeError::Configuration {
        reason: format!("failed to read {}: {e}", path.display()),
    })?;
    parse_config(&raw)
}

/// Like [`load_config`], but from a string.
pub fn parse_config(raw: &str) -> Result<BridgeConfig, BridgeError> {
    let interpolated = interpolate_env_vars(raw);

    // An empty document deserializes to unit, not a map.
    let config: BridgeConfig = if interpolated.trim().is_empty() {
        BridgeConfig::default()
    } else {
        serde_yaml::from_str(&interpolated).map_err(|e| BridgeError::Configuration {
            reason: format!("failed to parse config: {e}"),
        })?
    };

    config.validate()?;
    Ok(config)
}

/// Find and load the config, or fall back to defaults when there is none.
///
/// A file that exists but does not parse is still an error.
pub fn load_or_default(start: &Path) -> Result<BridgeConfig, BridgeError> {
    match find_config_path(start) {
        Ok(path) => {
            tracing::info!(path = %path.display(), "loading bridge config");
            load_config(&path)
        }
        Err(_) => {
            tracing::debug!("no bridge config found, using defaults");
            Ok(BridgeConfig::default())
        }
    }
}

// ─── Env-var interpolation ───────────────────────────────────────────────────

/// Replace `${VAR}` and `${VAR:-default}` in a string.
fn interpolate_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek() == Some(&'{') {
            chars.next();
            let mut var_expr = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_expr.push(c);
            }
            result.push_str(&resolve_var_expr(&var_expr));
        } else {
            result.push(ch);
        }
    }

    result
}

/// Resolve `VAR` or `VAR:-default`. Unset without a default is empty.
fn resolve_var_expr(expr: &str) -> String {
    match expr.split_once(":-") {
        Some((name, default)) => std::env::var(name).unwrap_or_else(|_| expand_tilde(default)),
        None => std::env::var(expr).unwrap_or_default(),
    }
}

/// Expand a leading `~` to the home directory.
fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix('~') {
        if let Some(home) = dirs::home_dir() {
            return format!("{}{rest}", home.display());
        }
    }
    path.to_string()
}

// ─── Tests ───────────────────────────────────────────────────────────────────
