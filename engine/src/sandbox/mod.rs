//! Sandbox policy enforcement
//!
//! Every filesystem path and every terminal command passes through
//! [`SandboxPolicy`] before a tool handler runs. Validation is pure: it never
//! creates, modifies or deletes anything.
//!
//! # Path Gates
//!
//! 1. Reject absolute paths and any `..` segment
//! 2. Reject components on the deny list (`.ssh`, `.env`, ...)
//! 3. Join onto the canonical sandbox root after lexical normalization
//! 4. Canonicalize the deepest existing ancestor and require it to stay
//!    under the root, so a symlink inside the sandbox cannot escape it
//!
//! # Command Gates
//!
//! 1. Reject denied tokens anywhere in the line, including inside quoted
//!    arguments, shell fragments and path basenames (`/bin/rm`)
//! 2. Tokenize with quote and backslash support
//! 3. Accept an allowlisted leading command with any arguments, or an
//!    interpreter whose first argument is an existing script under the
//!    scripts directory
//!
//! Commands are never handed to a shell, so metacharacters in arguments are
//! inert; they only matter for finding denied tokens.

use crate::config::Config;
use sdk::errors::{EngineError, SandboxViolation};
use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// Characters that separate words for a shell
const SHELL_SEPARATORS: &[char] = &[
    '|', '&', ';', '<', '>', '(', ')', '$', '`', '"', '\'', '\n', '\r', '\t', ' ', '=', ',',
];

/// A command line that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllowedCommand {
    /// Program to execute, exactly as allowlisted
    pub program: String,

    /// Arguments after the program, already unquoted
    pub args: Vec<String>,

    /// Canonical script path when the program is an interpreter
    pub script: Option<PathBuf>,
}

impl AllowedCommand {
    /// Render back into a single display line
    pub fn display_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Path and command policy for one engine instance.
///
/// Built once from the validated [`Config`] and shared read-only.
#[derive(Debug, Clone)]
pub struct SandboxPolicy {
    root: PathBuf,
    project_root: PathBuf,
    scripts_root: PathBuf,
    allowed_commands: HashSet<String>,
    interpreters: HashSet<String>,
    denied_tokens: HashSet<String>,
    denied_paths: Vec<String>,
}

impl SandboxPolicy {
    /// Build the policy from a validated configuration.
    pub fn from_config(config: &Config) -> Result<Self, EngineError> {
        Self::new(
            &config.core.project_root,
            &config.core.sandbox_root,
            &config.core.scripts_dir,
        )
        .map(|policy| policy.with_lists(&config.sandbox))
    }

    /// Create a policy with the default command and path lists.
    ///
    /// Both `project_root` and `sandbox_root` must exist.
    pub fn new(
        project_root: &Path,
        sandbox_root: &Path,
        scripts_dir: &Path,
    ) -> Result<Self, EngineError> {
        let project_root = canonical(project_root)?;
        let root = canonical(sandbox_root)?;

        let scripts_root = if scripts_dir.is_absolute() {
            scripts_dir.to_path_buf()
        } else {
            project_root.join(scripts_dir)
        };
        let scripts_root = scripts_root.canonicalize().unwrap_or(scripts_root);

        let policy = Self {
            root,
            project_root,
            scripts_root,
            allowed_commands: HashSet::new(),
            interpreters: HashSet::new(),
            denied_tokens: HashSet::new(),
            denied_paths: Vec::new(),
        };

        Ok(policy.with_lists(&crate::config::SandboxConfig::default()))
    }

    /// Replace the command and path lists.
    pub fn with_lists(mut self, lists: &crate::config::SandboxConfig) -> Self {
        self.allowed_commands = lists.allowed_commands.iter().cloned().collect();
        self.interpreters = lists.interpreters.iter().cloned().collect();
        self.denied_tokens = lists
            .denied_tokens
            .iter()
            .map(|t| t.to_ascii_lowercase())
            .collect();
        self.denied_paths = lists.denied_paths.clone();
        self
    }

    /// Canonical sandbox root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Canonical project root; commands run here
    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    pub fn scripts_root(&self) -> &Path {
        &self.scripts_root
    }

    /// Allowlisted commands, sorted
    pub fn allowed_commands(&self) -> Vec<&str> {
        let mut commands: Vec<&str> = self.allowed_commands.iter().map(String::as_str).collect();
        commands.sort_unstable();
        commands
    }

    /// Validate a caller-supplied relative path.
    ///
    /// Returns the absolute path under the sandbox root. The empty path and
    /// `.` both name the root itself.
    ///
    /// # Errors
    ///
    /// Returns a [`SandboxViolation`] carrying the offending path if any
    /// gate fails.
    pub fn validate_path(&self, relative: &str) -> Result<PathBuf, SandboxViolation> {
        let normalized = relative.trim().replace('\\', "/");
        let candidate = resolve_relative(&self.root, &normalized, relative)?;

        if self.is_denied(&candidate) {
            return Err(SandboxViolation::DeniedPath(relative.to_string()));
        }

        // The target itself may not exist yet; its deepest existing ancestor
        // must still resolve inside the root
        let resolved = canonical_ancestor(&candidate)
            .ok_or_else(|| SandboxViolation::OutsideRoot(relative.to_string()))?;

        if !resolved.starts_with(&self.root) {
            debug!("Path {} resolved to {:?}, outside root", relative, resolved);
            return Err(SandboxViolation::OutsideRoot(relative.to_string()));
        }

        if self.is_denied(&resolved) {
            return Err(SandboxViolation::DeniedPath(relative.to_string()));
        }

        Ok(candidate)
    }

    /// Validate a command line against the allowlist and deny list.
    pub fn validate_command(&self, line: &str) -> Result<AllowedCommand, SandboxViolation> {
        if line.trim().is_empty() {
            return Err(SandboxViolation::EmptyCommand);
        }

        // Gate 1: denied tokens anywhere, before any parsing can fail
        if let Some(token) = self.find_denied_token(line) {
            return Err(SandboxViolation::DeniedToken(token));
        }

        // Gate 2: tokenize
        let mut tokens = tokenize(line)?.into_iter();
        let program = tokens.next().ok_or(SandboxViolation::EmptyCommand)?;
        let args: Vec<String> = tokens.collect();

        // Gate 3: allowlist
        if self.allowed_commands.contains(&program) {
            return Ok(AllowedCommand {
                program,
                args,
                script: None,
            });
        }

        // Gate 4: interpreter running a script from the scripts directory
        if self.interpreters.contains(&program) {
            let script = self.validate_script(&program, args.first())?;
            let mut args = args;
            args[0] = script.to_string_lossy().into_owned();
            return Ok(AllowedCommand {
                program,
                args,
                script: Some(script),
            });
        }

        Err(SandboxViolation::CommandNotAllowed(program))
    }

    /// Display form of an absolute sandbox path, relative to the root.
    pub fn relative_display(&self, path: &Path) -> String {
        match path.strip_prefix(&self.root) {
            Ok(rel) if rel.as_os_str().is_empty() => ".".to_string(),
            Ok(rel) => rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/"),
            Err(_) => path.display().to_string(),
        }
    }

    fn validate_script(
        &self,
        interpreter: &str,
        script: Option<&String>,
    ) -> Result<PathBuf, SandboxViolation> {
        let script = match script {
            Some(s) if !s.starts_with('-') => s,
            _ => return Err(SandboxViolation::MissingScript(interpreter.to_string())),
        };

        let normalized = script.replace('\\', "/");
        let candidate = resolve_relative(&self.project_root, &normalized, script)?;

        if !candidate.starts_with(&self.scripts_root) {
            return Err(SandboxViolation::ScriptOutsideRoot(script.clone()));
        }

        if !candidate.is_file() {
            return Err(SandboxViolation::ScriptNotFound(script.clone()));
        }

        let resolved = candidate
            .canonicalize()
            .map_err(|_| SandboxViolation::ScriptNotFound(script.clone()))?;

        if !resolved.starts_with(&self.scripts_root) {
            return Err(SandboxViolation::ScriptOutsideRoot(script.clone()));
        }

        Ok(resolved)
    }

    /// Find the first denied token in the raw line.
    fn find_denied_token(&self, line: &str) -> Option<String> {
        line.split(SHELL_SEPARATORS)
            .filter(|fragment| !fragment.is_empty())
            .find_map(|fragment| {
                let fragment = fragment.trim_matches('\\');
                let lowered = fragment.to_ascii_lowercase();
                let basename = lowered.rsplit('/').next().unwrap_or(&lowered);

                if self.denied_tokens.contains(&lowered) || self.denied_tokens.contains(basename)
                {
                    Some(fragment.to_string())
                } else {
                    None
                }
            })
    }

    /// Whether any component of `path` below the root is on the deny list.
    fn is_denied(&self, path: &Path) -> bool {
        let below = path.strip_prefix(&self.root).unwrap_or(path);
        below.components().any(|c| {
            let part = c.as_os_str().to_string_lossy();
            self.denied_paths.iter().any(|denied| part == denied.as_str())
        })
    }
}

/// Join a `/`-separated relative path onto `base` after lexical checks.
///
/// `original` is what gets reported in a violation.
fn resolve_relative(
    base: &Path,
    normalized: &str,
    original: &str,
) -> Result<PathBuf, SandboxViolation> {
    if normalized.starts_with('/') || has_drive_prefix(normalized) {
        return Err(SandboxViolation::AbsolutePath(original.to_string()));
    }

    let mut joined = base.to_path_buf();
    for component in Path::new(normalized).components() {
        match component {
            Component::Normal(part) => joined.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                return Err(SandboxViolation::ParentTraversal(original.to_string()))
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(SandboxViolation::AbsolutePath(original.to_string()))
            }
        }
    }

    Ok(joined)
}

/// `C:` style prefixes count as absolute on every platform
fn has_drive_prefix(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

/// Canonicalize the deepest ancestor of `path` that exists.
///
/// A dangling symlink counts as existing and fails to canonicalize.
fn canonical_ancestor(path: &Path) -> Option<PathBuf> {
    let existing = path
        .ancestors()
        .find(|ancestor| ancestor.symlink_metadata().is_ok())?;

    let mut resolved = existing.canonicalize().ok()?;
    if let Ok(rest) = path.strip_prefix(existing) {
        resolved.push(rest);
    }
    Some(resolved)
}

fn canonical(path: &Path) -> Result<PathBuf, EngineError> {
    path.canonicalize()
        .map_err(|e| EngineError::PathCanonicalization(path.to_path_buf(), e.to_string()))
}

/// Split a command line into words.
///
/// Supports single quotes (literal), double quotes (backslash escapes the
/// next character) and bare backslash escapes.
pub fn tokenize(line: &str) -> Result<Vec<String>, SandboxViolation> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                in_token = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(ch) => current.push(ch),
                        None => {
                            return Err(SandboxViolation::CommandParse(
                                "unterminated single quote".to_string(),
                            ))
                        }
                    }
                }
            }
            '"' => {
                in_token = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(ch) => current.push(ch),
                            None => {
                                return Err(SandboxViolation::CommandParse(
                                    "unterminated double quote".to_string(),
                                ))
                            }
                        },
                        Some(ch) => current.push(ch),
                        None => {
                            return Err(SandboxViolation::CommandParse(
                                "unterminated double quote".to_string(),
                            ))
                        }
                    }
                }
            }
            '\\' => {
                in_token = true;
                match chars.next() {
                    Some(ch) => current.push(ch),
                    None => {
                        return Err(SandboxViolation::CommandParse(
                            "trailing backslash".to_string(),
                        ))
                    }
                }
            }
            ch if ch.is_whitespace() => {
                if in_token {
                    tokens.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            ch => {
                in_token = true;
                current.push(ch);
            }
        }
    }

    if in_token {
        tokens.push(current);
    }

    Ok(tokens)
}
