//! Configuration loading, validation, and management for ferrocode.
//!
//! Loads configuration from `~/.ferrocode/config.toml`. Every option has a
//! serde default so a partial file works; validation runs at load time and
//! configuration errors are fatal at startup.

use ferrocode_core::llm::{LlmConfig, LlmProvider};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// The root configuration structure.
///
/// Maps directly to `~/.ferrocode/config.toml`.
#[derive(Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub llm: LlmSettings,

    #[serde(default)]
    pub agent: AgentSettings,

    #[serde(default)]
    pub tools: ToolSettings,

    #[serde(default)]
    pub context: ContextSettings,

    #[serde(default)]
    pub prompts: PromptSettings,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("llm", &self.llm)
            .field("agent", &self.agent)
            .field("tools", &self.tools)
            .field("context", &self.context)
            .field("prompts", &self.prompts)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmSettings {
    #[serde(default = "default_provider")]
    pub default_provider: String,

    /// Per-provider sub-sections keyed by provider name
    #[serde(default)]
    pub providers: HashMap<String, ProviderSettings>,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            default_provider: default_provider(),
            providers: HashMap::new(),
        }
    }
}

fn default_provider() -> String {
    "openai".into()
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderSettings {
    #[serde(default)]
    pub api_key: String,

    #[serde(default)]
    pub base_url: String,

    #[serde(default)]
    pub model: String,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

fn default_max_tokens() -> u32 {
    8192
}
fn default_temperature() -> f32 {
    0.7
}

impl std::fmt::Debug for ProviderSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderSettings")
            .field(
                "api_key",
                &if self.api_key.is_empty() {
                    "None"
                } else {
                    "[REDACTED]"
                },
            )
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSettings {
    /// Iteration cap per turn
    #[serde(default = "default_max_loops")]
    pub max_loops: usize,

    /// Token budget override; defaults to the compression LLM's max_tokens
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_window: Option<usize>,

    /// Fraction of the context window at which compaction triggers
    #[serde(default = "default_compression_threshold")]
    pub compression_threshold: f64,
}

fn default_max_loops() -> usize {
    50
}
fn default_compression_threshold() -> f64 {
    0.9
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_loops: default_max_loops(),
            context_window: None,
            compression_threshold: default_compression_threshold(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSettings {
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    #[serde(default = "default_enabled_tools")]
    pub enabled_tools: Vec<String>,

    /// Per-tool timeout overrides, in milliseconds
    #[serde(default)]
    pub timeouts: HashMap<String, u64>,
}

fn default_max_concurrency() -> usize {
    10
}
fn default_enabled_tools() -> Vec<String> {
    [
        "read",
        "write",
        "edit",
        "multi_edit",
        "glob",
        "grep",
        "ls",
        "bash",
        "todo_read",
        "todo_write",
        "web_search",
        "web_fetch",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            enabled_tools: default_enabled_tools(),
            timeouts: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextSettings {
    /// Messages retained after compaction
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,

    #[serde(default = "default_storage_path")]
    pub storage_path: String,

    /// "json" or "sqlite"
    #[serde(default = "default_storage_type")]
    pub storage_type: String,

    /// Filename for the agent's persistent notes blob
    #[serde(default = "default_persistence_file")]
    pub persistence_file: String,
}

fn default_history_limit() -> usize {
    6
}
fn default_storage_path() -> String {
    "~/.ferrocode/sessions".into()
}
fn default_storage_type() -> String {
    "sqlite".into()
}
fn default_persistence_file() -> String {
    "persistent_context.md".into()
}

impl Default for ContextSettings {
    fn default() -> Self {
        Self {
            history_limit: default_history_limit(),
            storage_path: default_storage_path(),
            storage_type: default_storage_type(),
            persistence_file: default_persistence_file(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptSettings {
    #[serde(default = "default_prompts_directory")]
    pub directory: String,

    #[serde(default = "default_true")]
    pub hot_reload: bool,
}

fn default_prompts_directory() -> String {
    "~/.ferrocode/prompts".into()
}
fn default_true() -> bool {
    true
}

impl Default for PromptSettings {
    fn default() -> Self {
        Self {
            directory: default_prompts_directory(),
            hot_reload: true,
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path
    /// (`~/.ferrocode/config.toml`). A missing file yields the defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::config_dir().join("config.toml");
        if !path.exists() {
            let config = Self::default();
            config.validate()?;
            return Ok(config);
        }
        Self::load_from(&path)
    }

    /// Load configuration from an explicit path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        let config: Self =
            toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;

        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// The ferrocode configuration directory (`~/.ferrocode`).
    pub fn config_dir() -> PathBuf {
        let home = std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join(".ferrocode")
    }

    /// Serialized defaults, for seeding a fresh config file.
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }

    /// Check invariants that would otherwise surface as confusing runtime
    /// behavior. Config errors are fatal at startup.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.agent.compression_threshold <= 0.0 || self.agent.compression_threshold > 1.0 {
            return Err(ConfigError::Invalid(format!(
                "agent.compression_threshold must be in (0, 1], got {}",
                self.agent.compression_threshold
            )));
        }

        if self.tools.max_concurrency == 0 {
            return Err(ConfigError::Invalid(
                "tools.max_concurrency must be at least 1".into(),
            ));
        }

        if self.context.history_limit == 0 {
            return Err(ConfigError::Invalid(
                "context.history_limit must be at least 1".into(),
            ));
        }

        if !matches!(self.context.storage_type.as_str(), "json" | "sqlite") {
            return Err(ConfigError::Invalid(format!(
                "context.storage_type must be \"json\" or \"sqlite\", got \"{}\"",
                self.context.storage_type
            )));
        }

        parse_provider(&self.llm.default_provider)?;

        Ok(())
    }

    /// Build the LlmConfig for the configured default provider.
    pub fn default_llm_config(&self) -> Result<LlmConfig, ConfigError> {
        let name = &self.llm.default_provider;
        let provider = parse_provider(name)?;
        let settings = self.llm.providers.get(name).ok_or_else(|| {
            ConfigError::Invalid(format!("no [llm.providers.{name}] section configured"))
        })?;

        Ok(LlmConfig {
            provider,
            api_key: settings.api_key.clone(),
            base_url: settings.base_url.clone(),
            model: settings.model.clone(),
            max_tokens: settings.max_tokens,
            temperature: settings.temperature,
        })
    }

    /// Storage path with `~` expanded.
    pub fn storage_path(&self) -> PathBuf {
        expand_path(&self.context.storage_path)
    }

    /// Prompts directory with `~` expanded.
    pub fn prompts_directory(&self) -> PathBuf {
        expand_path(&self.prompts.directory)
    }
}

fn parse_provider(name: &str) -> Result<LlmProvider, ConfigError> {
    match name {
        "openai" => Ok(LlmProvider::OpenAi),
        "deepseek" => Ok(LlmProvider::DeepSeek),
        "claude" => Ok(LlmProvider::Claude),
        "ollama" => Ok(LlmProvider::Ollama),
        other => Err(ConfigError::Invalid(format!(
            "unknown LLM provider \"{other}\" (expected openai, deepseek, claude, or ollama)"
        ))),
    }
}

/// Expand a leading `~/` to the user's home directory.
pub fn expand_path(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        let home = std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string());
        return PathBuf::from(home).join(rest);
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = AppConfig::default();
        config.validate().unwrap();
        assert_eq!(config.agent.max_loops, 50);
        assert!((config.agent.compression_threshold - 0.9).abs() < f64::EPSILON);
        assert_eq!(config.tools.max_concurrency, 10);
        assert_eq!(config.tools.enabled_tools.len(), 12);
        assert_eq!(config.context.history_limit, 6);
        assert_eq!(config.context.storage_type, "sqlite");
        assert!(config.prompts.hot_reload);
    }

    #[test]
    fn toml_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.agent.max_loops, config.agent.max_loops);
        assert_eq!(parsed.context.storage_type, config.context.storage_type);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let toml_str = r#"
            [agent]
            max_loops = 5

            [llm]
            default_provider = "deepseek"

            [llm.providers.deepseek]
            api_key = "sk-secret"
            model = "deepseek-chat"
        "#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        config.validate().unwrap();
        assert_eq!(config.agent.max_loops, 5);
        assert_eq!(config.tools.max_concurrency, 10); // default
        assert_eq!(config.llm.default_provider, "deepseek");

        let llm = config.default_llm_config().unwrap();
        assert_eq!(llm.provider, LlmProvider::DeepSeek);
        assert_eq!(llm.model, "deepseek-chat");
        assert_eq!(llm.max_tokens, 8192);
    }

    #[test]
    fn invalid_threshold_rejected() {
        let mut config = AppConfig::default();
        config.agent.compression_threshold = 1.5;
        assert!(config.validate().is_err());
        config.agent.compression_threshold = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn unknown_storage_type_rejected() {
        let mut config = AppConfig::default();
        config.context.storage_type = "postgres".into();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("storage_type"));
    }

    #[test]
    fn unknown_provider_rejected() {
        let mut config = AppConfig::default();
        config.llm.default_provider = "grok".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_provider_section_is_error() {
        let config = AppConfig::default();
        // default_provider is "openai" but no providers configured
        assert!(config.default_llm_config().is_err());
    }

    #[test]
    fn load_from_missing_file_errors() {
        let result = AppConfig::load_from(Path::new("/nonexistent/config.toml"));
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
            [context]
            storage_type = "json"
            history_limit = 3
            "#,
        )
        .unwrap();

        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.context.storage_type, "json");
        assert_eq!(config.context.history_limit, 3);
    }

    #[test]
    fn api_keys_redacted_from_debug() {
        let mut config = AppConfig::default();
        config.llm.providers.insert(
            "openai".into(),
            ProviderSettings {
                api_key: "sk-very-secret".into(),
                base_url: String::new(),
                model: "gpt-4o".into(),
                max_tokens: 4096,
                temperature: 0.7,
            },
        );
        let debug = format!("{config:?}");
        assert!(!debug.contains("sk-very-secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn tilde_expansion() {
        std::env::set_var("HOME", "/home/tester");
        assert_eq!(
            expand_path("~/.ferrocode/sessions"),
            PathBuf::from("/home/tester/.ferrocode/sessions")
        );
        assert_eq!(expand_path("/absolute/path"), PathBuf::from("/absolute/path"));
    }

    #[test]
    fn default_toml_is_parseable() {
        let text = AppConfig::default_toml();
        assert!(text.contains("max_loops"));
        let parsed: AppConfig = toml::from_str(&text).unwrap();
        parsed.validate().unwrap();
    }
}
