//! Error types and handling
//!
//! This module provides the error types used throughout the Warden engine.
//! All errors implement the `WardenErrorExt` trait which provides user-friendly
//! hints and indicates whether errors are recoverable.
//!
//! Recoverable errors are the ones the orchestration loop folds back into the
//! trajectory as observations so the reasoning client can correct itself.
//! Non-recoverable errors end the run.

use thiserror::Error;

/// Trait for Warden error extensions
///
/// This trait provides additional context for errors, including user-friendly
/// hints and recoverability information. All engine errors implement this trait.
pub trait WardenErrorExt {
    /// Returns a user-friendly hint for the error
    ///
    /// The hint is safe to display to end users and does not contain
    /// secrets or absolute paths.
    fn user_hint(&self) -> &str;

    /// Returns whether the error is recoverable
    ///
    /// Recoverable errors are surfaced to the reasoning client as an
    /// observation. Non-recoverable errors terminate the run.
    fn is_recoverable(&self) -> bool;
}

/// A breach of the sandbox policy.
///
/// Every variant carries the offending path or token so it can be reported
/// back verbatim in an observation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SandboxViolation {
    #[error("Path traversal ('..') is not allowed: '{0}'")]
    ParentTraversal(String),

    #[error("Absolute paths are not allowed: '{0}'")]
    AbsolutePath(String),

    #[error("Path resolves outside the sandbox root: '{0}'")]
    OutsideRoot(String),

    #[error("Access to this path is denied: '{0}'")]
    DeniedPath(String),

    #[error("Empty command")]
    EmptyCommand,

    #[error("Command could not be parsed: {0}")]
    CommandParse(String),

    #[error("Command '{0}' is not in the allowlist")]
    CommandNotAllowed(String),

    #[error("Command contains a forbidden token: '{0}'")]
    DeniedToken(String),

    #[error("Interpreter '{0}' requires a script path")]
    MissingScript(String),

    #[error("Script path is outside the allowed scripts directory: '{0}'")]
    ScriptOutsideRoot(String),

    #[error("Script does not exist or is not a file: '{0}'")]
    ScriptNotFound(String),
}

impl SandboxViolation {
    /// The path or token that triggered the violation, if any.
    pub fn offending(&self) -> Option<&str> {
        match self {
            Self::ParentTraversal(s)
            | Self::AbsolutePath(s)
            | Self::OutsideRoot(s)
            | Self::DeniedPath(s)
            | Self::CommandParse(s)
            | Self::CommandNotAllowed(s)
            | Self::DeniedToken(s)
            | Self::MissingScript(s)
            | Self::ScriptOutsideRoot(s)
            | Self::ScriptNotFound(s) => Some(s),
            Self::EmptyCommand => None,
        }
    }
}

/// Main engine error type
///
/// # Error Categories
///
/// - **Configuration**: Invalid or missing configuration
/// - **Reasoning adapter**: the LLM side is unreachable (fatal)
/// - **Sandbox**: path or command policy breach (recoverable)
/// - **Tools**: unknown tools, duplicate registration, malformed input
/// - **Confirmation**: handshake bookkeeping failures
/// - **Run control**: step budget exhaustion and user cancellation
///
/// # Examples
///
/// ```
/// use sdk::errors::{EngineError, SandboxViolation, WardenErrorExt};
///
/// let error = EngineError::from(SandboxViolation::ParentTraversal("../x".into()));
/// println!("Hint: {}", error.user_hint());
/// assert!(error.is_recoverable());
///
/// let fatal_error = EngineError::Adapter("connection refused".into());
/// assert!(!fatal_error.is_recoverable());
/// ```
#[derive(Debug, Error)]
pub enum EngineError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Path canonicalization failed for {0:?}: {1}")]
    PathCanonicalization(std::path::PathBuf, String),

    // Reasoning adapter errors
    #[error("Reasoning client unavailable: {0}")]
    Adapter(String),

    // Sandbox errors
    #[error("Sandbox violation: {0}")]
    Sandbox(#[from] SandboxViolation),

    // Tool errors
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Tool already registered: {0}")]
    DuplicateTool(String),

    #[error("Malformed action: {0}")]
    MalformedAction(String),

    #[error("Tool error: {0}")]
    ToolError(String),

    // Confirmation errors
    #[error("Confirmation not found: {0}")]
    ConfirmationNotFound(String),

    #[error("Confirmation already resolved: {0}")]
    ConfirmationAlreadyResolved(String),

    #[error("Another confirmation is still awaiting a decision: {0}")]
    ConfirmationPending(String),

    #[error("Confirmation expired: {0}")]
    ConfirmationExpired(String),

    // Run control errors
    #[error("Step budget exhausted after {max_steps} steps")]
    StepBudgetExhausted { max_steps: usize },

    #[error("Run cancelled")]
    Cancelled,

    // Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WardenErrorExt for EngineError {
    fn user_hint(&self) -> &str {
        match self {
            Self::Config(_) => "Check your config.toml file for errors",
            Self::PathCanonicalization(_, _) => "Invalid path specified",

            Self::Adapter(_) => "Reasoning provider unavailable. Check your API key and network",

            Self::Sandbox(_) => "The action was blocked by the sandbox policy",

            Self::ToolNotFound(_) => "The requested tool is not available",
            Self::DuplicateTool(_) => "Each tool name may only be registered once",
            Self::MalformedAction(_) => "The action input did not match the tool's format",
            Self::ToolError(_) => "Tool operation failed",

            Self::ConfirmationNotFound(_) => "No such confirmation request",
            Self::ConfirmationAlreadyResolved(_) => "This request was already answered",
            Self::ConfirmationPending(_) => "Answer the outstanding confirmation first",
            Self::ConfirmationExpired(_) => "The confirmation timed out; nothing was deleted",

            Self::StepBudgetExhausted { .. } => {
                "Task too complex. Try breaking it into smaller steps"
            }
            Self::Cancelled => "The run was cancelled",

            Self::Io(_) => "File system operation failed",
        }
    }

    fn is_recoverable(&self) -> bool {
        match self {
            Self::Sandbox(_)
            | Self::ToolNotFound(_)
            | Self::MalformedAction(_)
            | Self::ToolError(_)
            | Self::ConfirmationExpired(_) => true,

            Self::Config(_)
            | Self::PathCanonicalization(_, _)
            | Self::Adapter(_)
            | Self::DuplicateTool(_)
            | Self::ConfirmationNotFound(_)
            | Self::ConfirmationAlreadyResolved(_)
            | Self::ConfirmationPending(_)
            | Self::StepBudgetExhausted { .. }
            | Self::Cancelled
            | Self::Io(_) => false,
        }
    }
}
