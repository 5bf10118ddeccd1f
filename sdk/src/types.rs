//! Tool output wire contract
//!
//! A tool answers every invocation with a single string. Three shapes are
//! recognised:
//!
//! - `CONFIRM_DELETE|<relativePath>`: the tool asks for a destructive action
//!   instead of performing it
//! - `Error: ...`: the tool failed and explains why
//! - anything else: a plain success observation

use serde::{Deserialize, Serialize};

/// Prefix of the destructive-action sentinel
pub const CONFIRM_DELETE_PREFIX: &str = "CONFIRM_DELETE|";

/// Prefix that marks a tool failure observation
pub const ERROR_PREFIX: &str = "Error:";

/// Parsed form of a tool's output string
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ToolOutcome {
    /// Normal observation text
    Success(String),

    /// Failure text, including the `Error:` prefix
    Failure(String),

    /// Request to delete the file at the given sandbox-relative path
    ConfirmDelete(String),
}

impl ToolOutcome {
    /// Classify a raw tool output string.
    ///
    /// Only the exact `CONFIRM_DELETE|<path>` shape with a non-empty path
    /// becomes a deletion request; anything else is an ordinary observation.
    pub fn parse(raw: &str) -> Self {
        if let Some(path) = raw.strip_prefix(CONFIRM_DELETE_PREFIX) {
            let path = path.trim();
            if !path.is_empty() && !path.contains('\n') {
                return Self::ConfirmDelete(path.to_string());
            }
        }

        if raw.trim_start().starts_with(ERROR_PREFIX) {
            Self::Failure(raw.to_string())
        } else {
            Self::Success(raw.to_string())
        }
    }

    /// Render back into the wire string.
    pub fn to_wire(&self) -> String {
        match self {
            Self::Success(text) | Self::Failure(text) => text.clone(),
            Self::ConfirmDelete(path) => format!("{}{}", CONFIRM_DELETE_PREFIX, path),
        }
    }

    /// Build a failure outcome, adding the `Error:` prefix.
    pub fn failure(reason: impl std::fmt::Display) -> Self {
        Self::Failure(format!("{} {}", ERROR_PREFIX, reason))
    }

    /// Whether this outcome reports a failure
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failure(_))
    }
}

/// Tool-specific errors
///
/// Returned by tool handlers; the engine renders them with the `Error:`
/// prefix so the reasoning client sees them as observations.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Not a file: {0}")]
    NotAFile(String),

    #[error("Not a directory: {0}")]
    NotADirectory(String),

    #[error("Timed out after {0} seconds")]
    Timeout(u64),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ToolError {
    /// Render as an observation string with the `Error:` prefix.
    pub fn to_observation(&self) -> String {
        ToolOutcome::failure(self).to_wire()
    }
}
