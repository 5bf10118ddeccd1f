//! Integration tests for configuration management
//!
//! These tests load full TOML files from disk and check that the processed
//! configuration drives the sandbox and the tool registry.

use std::sync::Arc;
use tempfile::TempDir;

use sdk::errors::{EngineError, SandboxViolation};
use warden_engine::config::Config;
use warden_engine::sandbox::SandboxPolicy;
use warden_engine::tools::ToolRegistry;

fn write_config(dir: &TempDir, body: &str) -> std::path::PathBuf {
    let contents = format!(
        "[core]\nproject_root = '{}'\n{}",
        dir.path().display(),
        body
    );
    let path = dir.path().join("config.toml");
    std::fs::write(&path, contents).unwrap();
    path
}

#[test]
fn test_full_config_file() {
    let dir = TempDir::new().unwrap();
    let path = write_config(
        &dir,
        r#"sandbox_root = "work"
scripts_dir = "tools"
log_level = "debug"

[agent]
max_steps = 8
llm_timeout_secs = 30
tool_timeout_secs = 10
confirmation_timeout_secs = 60
event_buffer = 32

[llm]
default_provider = "ollama"

[llm.ollama]
base_url = "http://127.0.0.1:11434"
model = "qwen2.5:7b"

[llm.gemini]
model = "gemini-1.5-pro"
api_key_env = "MY_GEMINI_KEY"

[sandbox]
allowed_commands = ["ls", "git"]
interpreters = ["python3"]
denied_tokens = ["rm", "push"]
denied_paths = [".git"]

[tools]
filesystem = true
deletion = false
terminal = true
clock = false
"#,
    );

    let config = Config::load_from_path(&path).unwrap();

    assert_eq!(config.core.log_level, "debug");
    assert_eq!(
        config.core.sandbox_root,
        dir.path().canonicalize().unwrap().join("work")
    );
    assert!(config.core.sandbox_root.is_dir());
    assert_eq!(config.agent.max_steps, 8);
    assert_eq!(config.agent.confirmation_timeout().as_secs(), 60);
    assert_eq!(config.llm.default_provider, "ollama");
    assert_eq!(config.llm.ollama.model, "qwen2.5:7b");
    assert_eq!(config.llm.gemini.api_key_env, "MY_GEMINI_KEY");
    // Unset fields keep their defaults
    assert_eq!(config.llm.gemini.temperature, 0.1);

    let sandbox = Arc::new(SandboxPolicy::from_config(&config).unwrap());
    assert_eq!(sandbox.allowed_commands(), vec!["git", "ls"]);
    assert!(sandbox.validate_command("git status").is_ok());
    assert!(matches!(
        sandbox.validate_command("git push origin"),
        Err(SandboxViolation::DeniedToken(_))
    ));
    assert!(matches!(
        sandbox.validate_command("cat notes.txt"),
        Err(SandboxViolation::CommandNotAllowed(_))
    ));
    assert!(matches!(
        sandbox.validate_path(".git/config"),
        Err(SandboxViolation::DeniedPath(_))
    ));

    let registry = ToolRegistry::builtin(&sandbox, &config).unwrap();
    assert_eq!(
        registry.names(),
        vec![
            "Read File Content",
            "Write Text to File",
            "List Directory Contents",
            "Run Terminal Command or Safe Script",
        ]
    );
}

#[test]
fn test_minimal_config_uses_defaults() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "\n[llm]\ndefault_provider = \"gemini\"\n");

    let config = Config::load_from_path(&path).unwrap();

    assert_eq!(config.agent.max_steps, 15);
    assert_eq!(config.agent.event_buffer, 256);
    assert!(config.core.sandbox_root.ends_with("outputs"));
    assert_eq!(config.llm.gemini.api_key_env, "GOOGLE_API_KEY");
    assert!(config.tools.deletion);
}

#[test]
fn test_invalid_values_rejected() {
    let dir = TempDir::new().unwrap();

    let path = write_config(&dir, "log_level = \"loud\"\n\n[llm]\ndefault_provider = \"gemini\"\n");
    assert!(matches!(
        Config::load_from_path(&path),
        Err(EngineError::Config(_))
    ));

    let path = write_config(
        &dir,
        "\n[agent]\nconfirmation_timeout_secs = 0\n\n[llm]\ndefault_provider = \"gemini\"\n",
    );
    assert!(matches!(
        Config::load_from_path(&path),
        Err(EngineError::Config(_))
    ));
}

#[test]
fn test_missing_file() {
    let dir = TempDir::new().unwrap();
    let result = Config::load_from_path(&dir.path().join("absent.toml"));
    assert!(matches!(result, Err(EngineError::Config(_))));
}
