//! Configuration management
//!
//! This module handles loading, validation, and management of the Warden
//! configuration. Configuration is stored in TOML format at
//! ~/.warden/config.toml.
//!
//! # Configuration Sections
//!
//! - **core**: Project root, sandbox root, scripts directory, log level
//! - **agent**: Step budget and the loop's timeouts
//! - **llm**: Reasoning provider settings
//! - **sandbox**: Command allowlist, interpreters and deny lists
//! - **tools**: Built-in tool enablement flags
//!
//! # Path Processing
//!
//! The configuration system automatically:
//! - Expands ~ to the user's home directory
//! - Resolves the sandbox and scripts directories against the project root
//! - Creates the project and sandbox roots if they don't exist
//! - Canonicalizes both roots so every later comparison is symlink-free
//!
//! The validated `Config` is built once at startup and passed by reference;
//! nothing reads configuration from process-wide state afterwards.
//!
//! # Examples
//!
//! ```no_run
//! use warden_engine::config::Config;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load_or_create()?;
//!
//! println!("Sandbox root: {:?}", config.core.sandbox_root);
//! println!("Default provider: {}", config.llm.default_provider);
//! # Ok(())
//! # }
//! ```

use sdk::errors::EngineError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Filesystem layout and logging
    pub core: CoreConfig,

    /// Orchestration loop limits
    #[serde(default)]
    pub agent: AgentConfig,

    /// Reasoning provider configuration
    pub llm: LLMConfig,

    /// Sandbox policy lists
    #[serde(default)]
    pub sandbox: SandboxConfig,

    /// Built-in tool enablement
    #[serde(default)]
    pub tools: ToolsConfig,
}

/// Core filesystem layout
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Directory commands run in and scripts are resolved from (supports ~)
    #[serde(default = "default_project_root")]
    pub project_root: PathBuf,

    /// Root every filesystem tool is confined to, relative to `project_root`
    /// unless absolute
    #[serde(default = "default_sandbox_root")]
    pub sandbox_root: PathBuf,

    /// Directory interpreter scripts must live in, relative to `project_root`
    /// unless absolute
    #[serde(default = "default_scripts_dir")]
    pub scripts_dir: PathBuf,

    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Orchestration loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Maximum number of steps per instruction
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,

    /// Timeout for each reasoning call
    #[serde(default = "default_llm_timeout")]
    pub llm_timeout_secs: u64,

    /// Timeout for a single terminal command
    #[serde(default = "default_tool_timeout")]
    pub tool_timeout_secs: u64,

    /// How long a destructive action waits for approval before it expires
    #[serde(default = "default_confirmation_timeout")]
    pub confirmation_timeout_secs: u64,

    /// Per-subscriber event buffer capacity
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

impl AgentConfig {
    pub fn llm_timeout(&self) -> Duration {
        Duration::from_secs(self.llm_timeout_secs)
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }

    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_secs(self.confirmation_timeout_secs)
    }
}

/// Reasoning provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMConfig {
    /// Provider tried first (gemini, ollama)
    pub default_provider: String,

    /// Ollama provider settings
    #[serde(default)]
    pub ollama: OllamaConfig,

    /// Gemini provider settings
    #[serde(default)]
    pub gemini: GeminiConfig,
}

/// Ollama provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaConfig {
    /// Base URL for Ollama API
    #[serde(default = "default_ollama_base_url")]
    pub base_url: String,

    /// Model name
    #[serde(default = "default_ollama_model")]
    pub model: String,
}

/// Gemini provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiConfig {
    /// Base URL for Gemini API
    #[serde(default = "default_gemini_base_url")]
    pub base_url: String,

    /// Model name
    #[serde(default = "default_gemini_model")]
    pub model: String,

    /// Environment variable holding the API key
    #[serde(default = "default_gemini_key_env")]
    pub api_key_env: String,

    /// Sampling temperature; low keeps planning deterministic
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    // Note: the key itself is never written to the config file
}

/// Sandbox policy lists
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Read-only inspection commands allowed as the leading token
    #[serde(default = "default_allowed_commands")]
    pub allowed_commands: Vec<String>,

    /// Interpreters allowed to run a script from the scripts directory
    #[serde(default = "default_interpreters")]
    pub interpreters: Vec<String>,

    /// Tokens rejected anywhere in a command line
    #[serde(default = "default_denied_tokens")]
    pub denied_tokens: Vec<String>,

    /// Path components rejected even inside the sandbox root
    #[serde(default = "default_denied_paths")]
    pub denied_paths: Vec<String>,
}

/// Built-in tool enablement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Read, write and list files inside the sandbox
    #[serde(default = "default_true")]
    pub filesystem: bool,

    /// Request deletion of a sandbox file (always confirmed)
    #[serde(default = "default_true")]
    pub deletion: bool,

    /// Run allowlisted commands and scripts
    #[serde(default = "default_true")]
    pub terminal: bool,

    /// Report the current date and time
    #[serde(default = "default_true")]
    pub clock: bool,
}

// Default value functions
fn default_project_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_sandbox_root() -> PathBuf {
    PathBuf::from("outputs")
}

fn default_scripts_dir() -> PathBuf {
    PathBuf::from("scripts")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_max_steps() -> usize {
    15
}

fn default_llm_timeout() -> u64 {
    120
}

fn default_tool_timeout() -> u64 {
    60
}

fn default_confirmation_timeout() -> u64 {
    300
}

fn default_event_buffer() -> usize {
    256
}

fn default_ollama_base_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_ollama_model() -> String {
    "llama3.1:8b".to_string()
}

fn default_gemini_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}

fn default_gemini_model() -> String {
    "gemini-1.5-flash-latest".to_string()
}

fn default_gemini_key_env() -> String {
    "GOOGLE_API_KEY".to_string()
}

fn default_temperature() -> f32 {
    0.1
}

fn default_allowed_commands() -> Vec<String> {
    ["ls", "pwd", "echo", "cat", "head", "tail", "grep", "wc", "date"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_interpreters() -> Vec<String> {
    vec!["python".to_string(), "python3".to_string()]
}

fn default_denied_tokens() -> Vec<String> {
    [
        "rm", "rmdir", "mv", "dd", "mkfs", "shred", "truncate", "sudo", "su", "doas", "chmod",
        "chown", "chgrp", "kill", "killall", "pkill", "shutdown", "reboot", "halt", "poweroff",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_denied_paths() -> Vec<String> {
    [
        ".ssh",
        ".env",
        ".gnupg",
        ".aws",
        "id_rsa",
        "id_ed25519",
        ".npmrc",
        ".pypirc",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            llm_timeout_secs: default_llm_timeout(),
            tool_timeout_secs: default_tool_timeout(),
            confirmation_timeout_secs: default_confirmation_timeout(),
            event_buffer: default_event_buffer(),
        }
    }
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: default_ollama_base_url(),
            model: default_ollama_model(),
        }
    }
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            base_url: default_gemini_base_url(),
            model: default_gemini_model(),
            api_key_env: default_gemini_key_env(),
            temperature: default_temperature(),
        }
    }
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            allowed_commands: default_allowed_commands(),
            interpreters: default_interpreters(),
            denied_tokens: default_denied_tokens(),
            denied_paths: default_denied_paths(),
        }
    }
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            filesystem: true,
            deletion: true,
            terminal: true,
            clock: true,
        }
    }
}

impl Config {
    /// Load configuration from the default location (~/.warden/config.toml)
    ///
    /// If the configuration file doesn't exist, creates a default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Configuration file cannot be read
    /// - TOML parsing fails
    /// - Validation fails (invalid values, uncreatable roots)
    pub fn load_or_create() -> Result<Self, EngineError> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::load_from_path(&config_path)
        } else {
            Self::create_default(&config_path)
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self, EngineError> {
        let contents = fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("Failed to read config file: {}", e)))?;

        Self::from_toml_str(&contents)
    }

    /// Parse and validate configuration from a TOML string
    pub fn from_toml_str(contents: &str) -> Result<Self, EngineError> {
        let mut config: Config = toml::from_str(contents)
            .map_err(|e| EngineError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate_and_process()?;

        Ok(config)
    }

    /// Create default configuration and save to path
    fn create_default(path: &Path) -> Result<Self, EngineError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                EngineError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        // Serialize before processing so the file keeps the portable,
        // relative defaults rather than this machine's absolute paths
        let raw = Self::default_config();
        let toml_string = toml::to_string_pretty(&raw)
            .map_err(|e| EngineError::Config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, toml_string)
            .map_err(|e| EngineError::Config(format!("Failed to write config file: {}", e)))?;

        let mut config = raw;
        config.validate_and_process()?;
        Ok(config)
    }

    /// Get the default configuration file path (~/.warden/config.toml)
    pub fn default_config_path() -> Result<PathBuf, EngineError> {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(".warden").join("config.toml"))
    }

    /// Create a default configuration
    pub fn default_config() -> Self {
        Self {
            core: CoreConfig {
                project_root: default_project_root(),
                sandbox_root: default_sandbox_root(),
                scripts_dir: default_scripts_dir(),
                log_level: default_log_level(),
            },
            agent: AgentConfig::default(),
            llm: LLMConfig {
                default_provider: "gemini".to_string(),
                ollama: OllamaConfig::default(),
                gemini: GeminiConfig::default(),
            },
            sandbox: SandboxConfig::default(),
            tools: ToolsConfig::default(),
        }
    }

    /// Point the sandbox at a different directory and re-validate.
    ///
    /// Used by the CLI `--sandbox` override.
    pub fn with_sandbox_root(mut self, sandbox_root: PathBuf) -> Result<Self, EngineError> {
        self.core.sandbox_root = sandbox_root;
        self.validate_and_process()?;
        Ok(self)
    }

    /// Validate and process configuration
    ///
    /// This method:
    /// - Validates enumerated and numeric fields
    /// - Expands ~ in paths
    /// - Resolves relative directories against the project root
    /// - Creates and canonicalizes the project and sandbox roots
    pub fn validate_and_process(&mut self) -> Result<(), EngineError> {
        let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_log_levels.contains(&self.core.log_level.as_str()) {
            return Err(EngineError::Config(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.core.log_level,
                valid_log_levels.join(", ")
            )));
        }

        let valid_providers = ["gemini", "ollama"];
        if !valid_providers.contains(&self.llm.default_provider.as_str()) {
            return Err(EngineError::Config(format!(
                "Invalid default provider '{}'. Must be one of: {}",
                self.llm.default_provider,
                valid_providers.join(", ")
            )));
        }

        if self.agent.max_steps == 0 {
            return Err(EngineError::Config(
                "max_steps must be at least 1".to_string(),
            ));
        }
        if self.agent.event_buffer == 0 {
            return Err(EngineError::Config(
                "event_buffer must be at least 1".to_string(),
            ));
        }
        if self.agent.llm_timeout_secs == 0
            || self.agent.tool_timeout_secs == 0
            || self.agent.confirmation_timeout_secs == 0
        {
            return Err(EngineError::Config(
                "timeouts must be greater than zero".to_string(),
            ));
        }

        if self.sandbox.allowed_commands.is_empty() && self.sandbox.interpreters.is_empty() {
            return Err(EngineError::Config(
                "sandbox must allow at least one command or interpreter".to_string(),
            ));
        }

        // Project root first: the other directories hang off it
        self.core.project_root = expand_path(&self.core.project_root)?;
        self.core.project_root = canonicalize_or_create(&self.core.project_root)?;

        let sandbox_root = resolve_against(&self.core.project_root, &self.core.sandbox_root)?;
        self.core.sandbox_root = canonicalize_or_create(&sandbox_root)?;

        if !self.core.sandbox_root.is_dir() {
            return Err(EngineError::Config(format!(
                "Sandbox root is not a directory: {:?}",
                self.core.sandbox_root
            )));
        }

        // The scripts directory is optional; canonicalize only if present
        let scripts_dir = resolve_against(&self.core.project_root, &self.core.scripts_dir)?;
        self.core.scripts_dir = scripts_dir.canonicalize().unwrap_or(scripts_dir);

        Ok(())
    }
}

/// Expand ~ in path to user's home directory
fn expand_path(path: &Path) -> Result<PathBuf, EngineError> {
    let path_str = path
        .to_str()
        .ok_or_else(|| EngineError::Config("Invalid UTF-8 in path".to_string()))?;

    if let Some(rest) = path_str.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(rest))
    } else if path_str == "~" {
        dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))
    } else {
        Ok(path.to_path_buf())
    }
}

/// Expand `path` and join it onto `base` unless it is already absolute
fn resolve_against(base: &Path, path: &Path) -> Result<PathBuf, EngineError> {
    let expanded = expand_path(path)?;
    if expanded.is_absolute() {
        Ok(expanded)
    } else {
        Ok(base.join(expanded))
    }
}

/// Canonicalize path, creating it if it doesn't exist
fn canonicalize_or_create(path: &Path) -> Result<PathBuf, EngineError> {
    if !path.exists() {
        fs::create_dir_all(path).map_err(|e| {
            EngineError::Config(format!("Failed to create directory {:?}: {}", path, e))
        })?;
    }

    path.canonicalize()
        .map_err(|e| EngineError::PathCanonicalization(path.to_path_buf(), e.to_string()))
}
