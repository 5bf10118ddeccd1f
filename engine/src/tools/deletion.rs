//! Deletion request tool
//!
//! Never deletes anything. It checks that the target is an existing file
//! and answers with the `CONFIRM_DELETE|<path>` sentinel; the confirmation
//! gateway performs the deletion once a human approves it.

use async_trait::async_trait;
use sdk::types::{ToolError, CONFIRM_DELETE_PREFIX};
use std::sync::Arc;
use tokio::fs;
use tracing::info;

use super::{ActionInput, InputContract, Tool};
use crate::sandbox::SandboxPolicy;

#[derive(Debug)]
pub struct DeletionRequestTool {
    sandbox: Arc<SandboxPolicy>,
}

impl DeletionRequestTool {
    pub fn new(sandbox: Arc<SandboxPolicy>) -> Self {
        Self { sandbox }
    }
}

#[async_trait]
impl Tool for DeletionRequestTool {
    fn name(&self) -> &str {
        "Request File Deletion Confirmation"
    }

    fn description(&self) -> &str {
        "Requests deletion of a single file inside the sandbox. The user must confirm before anything is deleted. Input is the relative file path."
    }

    fn input_contract(&self) -> InputContract {
        InputContract::Path
    }

    async fn invoke(&self, input: ActionInput) -> Result<String, ToolError> {
        let path = match input {
            ActionInput::Path(path) => path,
            other => {
                return Err(ToolError::InvalidInput(format!(
                    "expected a path, got {}",
                    other.kind()
                )))
            }
        };
        let rel = self.sandbox.relative_display(&path);

        let metadata = fs::metadata(&path)
            .await
            .map_err(|_| ToolError::NotFound(format!("{} (cannot request deletion)", rel)))?;
        if !metadata.is_file() {
            return Err(ToolError::NotAFile(format!(
                "{} (only files can be deleted)",
                rel
            )));
        }

        info!("Deletion of {} requested", rel);
        Ok(format!("{}{}", CONFIRM_DELETE_PREFIX, rel))
    }
}
