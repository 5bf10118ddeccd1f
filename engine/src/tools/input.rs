//! Typed action input
//!
//! The reasoning client produces a single raw input string per action. It is
//! parsed eagerly at the loop boundary according to the tool's
//! [`InputContract`], then authorized by the sandbox into an [`ActionInput`]
//! the handler can trust.

use crate::sandbox::{AllowedCommand, SandboxPolicy};
use sdk::errors::SandboxViolation;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Shape of the raw input a tool expects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputContract {
    /// One sandbox-relative path
    Path,
    /// `path|content`, split on the first pipe
    PathAndContent,
    /// A terminal command line
    CommandLine,
    /// Free text passed through unchanged
    Text,
    /// Input is not used
    Ignored,
}

impl InputContract {
    /// Format hint shown to the reasoning client
    pub fn hint(&self) -> &'static str {
        match self {
            Self::Path => "relative/path/inside/sandbox",
            Self::PathAndContent => "relative/path|content to write",
            Self::CommandLine => "command arg1 arg2",
            Self::Text => "free text",
            Self::Ignored => "any (ignored)",
        }
    }
}

impl fmt::Display for InputContract {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.hint())
    }
}

/// Raw input split into fields; not yet checked against the sandbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedInput {
    Path(String),
    PathAndContent { path: String, content: String },
    CommandLine(String),
    Text(String),
    Ignored,
}

impl ParsedInput {
    /// Parse `raw` according to `contract`.
    ///
    /// The error string explains the arity problem and becomes a malformed
    /// action observation.
    pub fn parse(contract: InputContract, raw: &str) -> Result<Self, String> {
        match contract {
            InputContract::Path => {
                let path = unquote(raw);
                if path.contains('|') {
                    return Err(format!(
                        "expected a single path but got pipe-delimited fields: '{}'",
                        raw.trim()
                    ));
                }
                // Empty means the sandbox root itself
                let path = if path.is_empty() { "." } else { path };
                Ok(Self::Path(path.to_string()))
            }
            InputContract::PathAndContent => {
                // Content is written verbatim, only the path is cleaned up
                let body = unwrap_quotes(raw).unwrap_or(raw);
                let (path, content) = body.split_once('|').ok_or_else(|| {
                    "expected 'path|content' but no '|' separator was found".to_string()
                })?;
                let path = unquote(path);
                if path.is_empty() {
                    return Err("the path before '|' is empty".to_string());
                }
                Ok(Self::PathAndContent {
                    path: path.to_string(),
                    content: content.to_string(),
                })
            }
            InputContract::CommandLine => {
                let line = unquote(raw);
                if line.is_empty() {
                    return Err("a command line is required".to_string());
                }
                Ok(Self::CommandLine(line.to_string()))
            }
            InputContract::Text => Ok(Self::Text(raw.trim().to_string())),
            InputContract::Ignored => Ok(Self::Ignored),
        }
    }

    /// Check every path or command against the sandbox policy.
    pub fn authorize(self, policy: &SandboxPolicy) -> Result<ActionInput, SandboxViolation> {
        match self {
            Self::Path(path) => policy.validate_path(&path).map(ActionInput::Path),
            Self::PathAndContent { path, content } => {
                let path = policy.validate_path(&path)?;
                Ok(ActionInput::PathAndContent { path, content })
            }
            Self::CommandLine(line) => policy.validate_command(&line).map(ActionInput::Command),
            Self::Text(text) => Ok(ActionInput::Text(text)),
            Self::Ignored => Ok(ActionInput::Ignored),
        }
    }
}

/// Input that passed the sandbox; handlers receive only this.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionInput {
    /// Absolute path under the sandbox root
    Path(PathBuf),
    PathAndContent {
        path: PathBuf,
        content: String,
    },
    Command(AllowedCommand),
    Text(String),
    Ignored,
}

impl ActionInput {
    /// Short name of the variant, for mismatch errors
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Path(_) => "path",
            Self::PathAndContent { .. } => "path and content",
            Self::Command(_) => "command",
            Self::Text(_) => "text",
            Self::Ignored => "ignored",
        }
    }
}

/// Inner text of an input wrapped in one pair of quotes or backticks.
fn unwrap_quotes(raw: &str) -> Option<&str> {
    let trimmed = raw.trim();
    ['"', '\'', '`'].into_iter().find_map(|quote| {
        trimmed
            .strip_prefix(quote)
            .and_then(|rest| rest.strip_suffix(quote))
            .filter(|inner| !inner.contains(quote))
    })
}

/// Trim and strip one pair of surrounding quotes or backticks.
fn unquote(raw: &str) -> &str {
    unwrap_quotes(raw).map_or(raw.trim(), str::trim)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_contract() {
        assert_eq!(
            ParsedInput::parse(InputContract::Path, " 'notes.txt' ").unwrap(),
            ParsedInput::Path("notes.txt".to_string())
        );
        assert_eq!(
            ParsedInput::parse(InputContract::Path, "").unwrap(),
            ParsedInput::Path(".".to_string())
        );
        assert!(ParsedInput::parse(InputContract::Path, "a.txt|extra").is_err());
    }

    #[test]
    fn test_path_and_content_splits_on_first_pipe() {
        let parsed = ParsedInput::parse(InputContract::PathAndContent, "notes.txt|a|b").unwrap();
        assert_eq!(
            parsed,
            ParsedInput::PathAndContent {
                path: "notes.txt".to_string(),
                content: "a|b".to_string(),
            }
        );

        assert!(ParsedInput::parse(InputContract::PathAndContent, "notes.txt").is_err());
        assert_eq!(
            ParsedInput::parse(InputContract::PathAndContent, "'notes.txt|quoted'").unwrap(),
            ParsedInput::PathAndContent {
                path: "notes.txt".to_string(),
                content: "quoted".to_string(),
            }
        );
        assert!(ParsedInput::parse(InputContract::PathAndContent, " |text").is_err());
    }

    #[test]
    fn test_content_is_kept_verbatim() {
        let parsed =
            ParsedInput::parse(InputContract::PathAndContent, " notes.txt |line1\n  line2\n\n").unwrap();
        assert_eq!(
            parsed,
            ParsedInput::PathAndContent {
                path: "notes.txt".to_string(),
                content: "line1\n  line2\n\n".to_string(),
            }
        );
    }

    #[test]
    fn test_command_line_contract() {
        assert_eq!(
            ParsedInput::parse(InputContract::CommandLine, "`ls -la`").unwrap(),
            ParsedInput::CommandLine("ls -la".to_string())
        );
        // Inner quotes of the same kind are left alone
        assert_eq!(
            ParsedInput::parse(InputContract::CommandLine, "'a' b 'c'").unwrap(),
            ParsedInput::CommandLine("'a' b 'c'".to_string())
        );
        assert!(ParsedInput::parse(InputContract::CommandLine, "  ").is_err());
    }

    #[test]
    fn test_ignored_and_text() {
        assert_eq!(
            ParsedInput::parse(InputContract::Ignored, "whatever").unwrap(),
            ParsedInput::Ignored
        );
        assert_eq!(
            ParsedInput::parse(InputContract::Text, "  hi ").unwrap(),
            ParsedInput::Text("hi".to_string())
        );
    }
}
