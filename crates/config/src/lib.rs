//! Configuration loading, validation, and management for Crucible.
//!
//! Loads configuration from `~/.crucible/config.toml` (or an explicit path)
//! with environment variable overrides. Validates all settings at startup.
//! The resulting [`AppConfig`] is passed down explicitly; call
//! [`AppConfig::reload`] to re-read the same source.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crucible_core::ModelPricing;

/// The root configuration structure.
///
/// Maps directly to `~/.crucible/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// LLM backend selection and credentials
    #[serde(default)]
    pub backend: BackendConfig,

    /// Agent loop settings
    #[serde(default)]
    pub agent: AgentConfig,

    /// Oversized tool result handling
    #[serde(default)]
    pub result_store: ResultStoreConfig,

    /// Repeated-failure detection
    #[serde(default)]
    pub doom_loop: DoomLoopConfig,

    /// Backend retry policy
    #[serde(default)]
    pub retry: RetryConfig,

    /// Per-model pricing, keyed by model name
    #[serde(default)]
    pub pricing: HashMap<String, ModelPricing>,

    /// Session persistence
    #[serde(default)]
    pub sessions: SessionsConfig,

    /// Where this config was loaded from, for `reload`
    #[serde(skip)]
    source: Option<PathBuf>,
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("backend", &self.backend)
            .field("agent", &self.agent)
            .field("result_store", &self.result_store)
            .field("doom_loop", &self.doom_loop)
            .field("retry", &self.retry)
            .field("pricing", &self.pricing)
            .field("sessions", &self.sessions)
            .field("source", &self.source)
            .finish()
    }
}

impl std::fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendConfig")
            .field("kind", &self.kind)
            .field("model", &self.model)
            .field("api_key", &redact(&self.api_key))
            .field("base_url", &self.base_url)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// "anthropic" or "openai"
    #[serde(default = "default_backend_kind")]
    pub kind: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Override the provider's default endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_backend_kind() -> String {
    "anthropic".into()
}
fn default_model() -> String {
    "claude-sonnet-4-20250514".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    4096
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: default_backend_kind(),
            model: default_model(),
            api_key: None,
            base_url: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Maximum backend calls per turn
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Skip approval prompts for every tool
    #[serde(default)]
    pub auto_approve: bool,

    /// Run a batch of approved tool calls concurrently
    #[serde(default = "default_true")]
    pub parallel_tool_calls: bool,

    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
}

fn default_max_iterations() -> u32 {
    25
}
fn default_true() -> bool {
    true
}
fn default_system_prompt() -> String {
    "You are a careful research assistant. Use the available tools to gather \
     evidence before answering, and answer concisely once you have it."
        .into()
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            auto_approve: false,
            parallel_tool_calls: true,
            system_prompt: default_system_prompt(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultStoreConfig {
    /// Results longer than this many characters are stored out of history
    #[serde(default = "default_threshold_chars")]
    pub threshold_chars: usize,

    /// Characters of a stored result kept inline as a preview
    #[serde(default = "default_preview_chars")]
    pub preview_chars: usize,

    /// `peek_result` limit when the model omits one
    #[serde(default = "default_peek_limit")]
    pub default_peek_limit: usize,

    /// Oldest entries are evicted past this count (0 = unbounded)
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
}

fn default_threshold_chars() -> usize {
    32_000
}
fn default_preview_chars() -> usize {
    2_000
}
fn default_peek_limit() -> usize {
    4_000
}
fn default_max_entries() -> usize {
    64
}

impl Default for ResultStoreConfig {
    fn default() -> Self {
        Self {
            threshold_chars: default_threshold_chars(),
            preview_chars: default_preview_chars(),
            default_peek_limit: default_peek_limit(),
            max_entries: default_max_entries(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DoomLoopConfig {
    /// Consecutive identical failures before a corrective message
    #[serde(default = "default_doom_threshold")]
    pub threshold: u32,
}

fn default_doom_threshold() -> u32 {
    3
}

impl Default for DoomLoopConfig {
    fn default() -> Self {
        Self {
            threshold: default_doom_threshold(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    4
}
fn default_base_delay_ms() -> u64 {
    1_000
}
fn default_max_delay_ms() -> u64 {
    8_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionsConfig {
    /// Directory for JSON session files (default: `~/.crucible/sessions`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<PathBuf>,
}

impl SessionsConfig {
    /// The configured directory, or the default under the config dir.
    pub fn resolved_directory(&self) -> PathBuf {
        self.directory
            .clone()
            .unwrap_or_else(|| AppConfig::config_dir().join("sessions"))
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.crucible/config.toml).
    ///
    /// Environment variables override the file:
    /// - `CRUCIBLE_API_KEY`, then `ANTHROPIC_API_KEY` / `OPENAI_API_KEY`
    ///   (matching the backend kind) when the file sets no key
    /// - `CRUCIBLE_BACKEND`, `CRUCIBLE_MODEL`
    /// - `CRUCIBLE_AUTO_APPROVE` ("1", "true", "yes")
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with_env(&Self::default_path())
    }

    /// Load from `path`, then apply environment overrides and validate.
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::read(path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path, without env overrides.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let config = Self::read(path)?;
        config.validate()?;
        Ok(config)
    }

    fn read(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self {
                source: Some(path.to_path_buf()),
                ..Self::default()
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let mut config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        config.source = Some(path.to_path_buf());
        Ok(config)
    }

    /// Apply overrides from an environment lookup.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(kind) = lookup("CRUCIBLE_BACKEND") {
            self.backend.kind = kind;
        }

        if let Some(model) = lookup("CRUCIBLE_MODEL") {
            self.backend.model = model;
        }

        if self.backend.api_key.is_none() {
            let provider_var = match self.backend.kind.as_str() {
                "anthropic" => "ANTHROPIC_API_KEY",
                _ => "OPENAI_API_KEY",
            };
            self.backend.api_key = lookup("CRUCIBLE_API_KEY").or_else(|| lookup(provider_var));
        }

        if let Some(flag) = lookup("CRUCIBLE_AUTO_APPROVE") {
            self.agent.auto_approve = matches!(flag.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }
    }

    /// Re-read the source this config was loaded from.
    ///
    /// The current value is replaced only if the new one parses and
    /// validates; otherwise it is left untouched and the error returned.
    pub fn reload(&mut self) -> Result<(), ConfigError> {
        let path = self.source.clone().ok_or(ConfigError::NoSource)?;
        let fresh = Self::load_with_env(&path)?;
        tracing::info!(path = %path.display(), "Configuration reloaded");
        *self = fresh;
        Ok(())
    }

    /// The file this config was loaded from, if any.
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".crucible")
    }

    /// Default config file path.
    pub fn default_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !matches!(self.backend.kind.as_str(), "anthropic" | "openai") {
            return Err(ConfigError::ValidationError(format!(
                "backend.kind must be \"anthropic\" or \"openai\", got \"{}\"",
                self.backend.kind
            )));
        }

        if self.backend.temperature < 0.0 || self.backend.temperature > 2.0 {
            return Err(ConfigError::ValidationError(
                "backend.temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.agent.max_iterations == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_iterations must be at least 1".into(),
            ));
        }

        if self.result_store.threshold_chars == 0 {
            return Err(ConfigError::ValidationError(
                "result_store.threshold_chars must be > 0".into(),
            ));
        }

        if self.result_store.preview_chars > self.result_store.threshold_chars {
            return Err(ConfigError::ValidationError(
                "result_store.preview_chars must not exceed threshold_chars".into(),
            ));
        }

        if self.doom_loop.threshold == 0 {
            return Err(ConfigError::ValidationError(
                "doom_loop.threshold must be at least 1".into(),
            ));
        }

        if self.retry.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "retry.max_attempts must be at least 1".into(),
            ));
        }

        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(ConfigError::ValidationError(
                "retry.base_delay_ms must not exceed max_delay_ms".into(),
            ));
        }

        for (model, pricing) in &self.pricing {
            if pricing.input_per_m < 0.0 || pricing.output_per_m < 0.0 {
                return Err(ConfigError::ValidationError(format!(
                    "pricing for {model} must not be negative"
                )));
            }
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.backend.api_key.is_some()
    }

    /// Pricing for the configured model, if any.
    pub fn model_pricing(&self) -> Option<&ModelPricing> {
        self.pricing.get(&self.backend.model)
    }

    /// Generate a default config TOML string (for `config init`).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            backend: BackendConfig::default(),
            agent: AgentConfig::default(),
            result_store: ResultStoreConfig::default(),
            doom_loop: DoomLoopConfig::default(),
            retry: RetryConfig::default(),
            pricing: HashMap::new(),
            sessions: SessionsConfig::default(),
            source: None,
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),

    #[error("Configuration was not loaded from a file, nothing to reload")]
    NoSource,
}
