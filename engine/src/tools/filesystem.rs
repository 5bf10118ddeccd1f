//! Filesystem tools
//!
//! Read, write and list inside the sandbox root. Every path arrives already
//! validated by the sandbox; these handlers only add the file-type checks.

use async_trait::async_trait;
use sdk::types::ToolError;
use std::path::Path;
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, info};

use super::{truncate_chars, ActionInput, InputContract, Tool};
use crate::sandbox::SandboxPolicy;

/// Characters of file content returned before truncation
const MAX_READ_CHARS: usize = 4000;

/// Directory entries listed before truncation
const MAX_LIST_ENTRIES: usize = 50;

fn expect_path(input: ActionInput) -> Result<std::path::PathBuf, ToolError> {
    match input {
        ActionInput::Path(path) => Ok(path),
        other => Err(ToolError::InvalidInput(format!(
            "expected a path, got {}",
            other.kind()
        ))),
    }
}

#[derive(Debug)]
pub struct ReadFileTool {
    sandbox: Arc<SandboxPolicy>,
}

impl ReadFileTool {
    pub fn new(sandbox: Arc<SandboxPolicy>) -> Self {
        Self { sandbox }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "Read File Content"
    }

    fn description(&self) -> &str {
        "Reads the text content of a file inside the sandbox. Input is the relative file path. Long files are truncated."
    }

    fn input_contract(&self) -> InputContract {
        InputContract::Path
    }

    async fn invoke(&self, input: ActionInput) -> Result<String, ToolError> {
        let path = expect_path(input)?;
        let rel = self.sandbox.relative_display(&path);

        let metadata = fs::metadata(&path)
            .await
            .map_err(|_| ToolError::NotFound(rel.clone()))?;
        if !metadata.is_file() {
            return Err(ToolError::NotAFile(rel));
        }

        info!("Reading file: {}", rel);
        let bytes = fs::read(&path).await?;
        let content = String::from_utf8_lossy(&bytes);

        debug!("Read {} bytes from {}", bytes.len(), rel);
        Ok(format!(
            "Content of '{}':\n{}",
            rel,
            truncate_chars(&content, MAX_READ_CHARS, "\n... (truncated)")
        ))
    }
}

#[derive(Debug)]
pub struct WriteFileTool {
    sandbox: Arc<SandboxPolicy>,
}

impl WriteFileTool {
    pub fn new(sandbox: Arc<SandboxPolicy>) -> Self {
        Self { sandbox }
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "Write Text to File"
    }

    fn description(&self) -> &str {
        "Writes text to a file inside the sandbox, creating folders as needed and overwriting any existing file. Input format: 'relative/path.txt|content'."
    }

    fn input_contract(&self) -> InputContract {
        InputContract::PathAndContent
    }

    async fn invoke(&self, input: ActionInput) -> Result<String, ToolError> {
        let (path, content) = match input {
            ActionInput::PathAndContent { path, content } => (path, content),
            other => {
                return Err(ToolError::InvalidInput(format!(
                    "expected path and content, got {}",
                    other.kind()
                )))
            }
        };

        if path == self.sandbox.root() {
            return Err(ToolError::InvalidInput(
                "cannot write to the sandbox root itself".to_string(),
            ));
        }

        let rel = self.sandbox.relative_display(&path);
        if path.is_dir() {
            return Err(ToolError::NotAFile(rel));
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        info!("Writing {} bytes to: {}", content.len(), rel);
        fs::write(&path, content.as_bytes()).await?;

        Ok(format!("Successfully wrote content to file: {}", rel))
    }
}

#[derive(Debug)]
pub struct ListDirectoryTool {
    sandbox: Arc<SandboxPolicy>,
}

impl ListDirectoryTool {
    pub fn new(sandbox: Arc<SandboxPolicy>) -> Self {
        Self { sandbox }
    }

    async fn entries(&self, dir: &Path) -> Result<Vec<String>, ToolError> {
        let mut reader = fs::read_dir(dir).await?;
        let mut entries = Vec::new();

        while let Some(entry) = reader.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            let kind = if entry.file_type().await?.is_dir() {
                "DIR"
            } else {
                "FILE"
            };
            entries.push(format!("{} ({})", name, kind));
        }

        entries.sort();
        Ok(entries)
    }
}

#[async_trait]
impl Tool for ListDirectoryTool {
    fn name(&self) -> &str {
        "List Directory Contents"
    }

    fn description(&self) -> &str {
        "Lists files and folders in a sandbox directory. Input is the relative directory path; leave empty for the sandbox root."
    }

    fn input_contract(&self) -> InputContract {
        InputContract::Path
    }

    async fn invoke(&self, input: ActionInput) -> Result<String, ToolError> {
        let path = expect_path(input)?;
        let rel = self.sandbox.relative_display(&path);

        let metadata = fs::metadata(&path)
            .await
            .map_err(|_| ToolError::NotFound(rel.clone()))?;
        if !metadata.is_dir() {
            return Err(ToolError::NotADirectory(rel));
        }

        info!("Listing directory: {}", rel);
        let entries = self.entries(&path).await?;

        if entries.is_empty() {
            return Ok(format!("Directory '{}' is empty.", rel));
        }

        let total = entries.len();
        let mut out = vec![format!("Contents of '{}':", rel)];
        out.extend(entries.into_iter().take(MAX_LIST_ENTRIES));
        if total > MAX_LIST_ENTRIES {
            out.push(format!(
                "... ({} more entries not shown)",
                total - MAX_LIST_ENTRIES
            ));
        }

        Ok(out.join("\n"))
    }
}
