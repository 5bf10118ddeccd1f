//! Terminal tool
//!
//! Runs a sandbox-approved command directly (no shell) in the project root.
//! stdin is null, stdout and stderr are captured and truncated, and the child
//! is killed if the timeout fires or the invoking future is dropped.

use async_trait::async_trait;
use sdk::types::ToolError;
use serde::Serialize;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::{truncate_chars, ActionInput, InputContract, Tool};
use crate::sandbox::SandboxPolicy;

/// Characters kept from each output stream
const MAX_OUTPUT_CHARS: usize = 3000;

#[derive(Debug, Serialize)]
struct CommandReport {
    stdout: String,
    stderr: String,
    exit_code: Option<i32>,
}

#[derive(Debug)]
pub struct TerminalTool {
    sandbox: Arc<SandboxPolicy>,
    timeout: Duration,
}

impl TerminalTool {
    pub fn new(sandbox: Arc<SandboxPolicy>, timeout: Duration) -> Self {
        Self { sandbox, timeout }
    }
}

#[async_trait]
impl Tool for TerminalTool {
    fn name(&self) -> &str {
        "Run Terminal Command or Safe Script"
    }

    fn description(&self) -> &str {
        "Runs a read-only inspection command (ls, pwd, echo, cat, head, tail, grep, wc, date) or 'python scripts/<name>.py' for a script in the scripts directory. No shell features; destructive commands are refused. Returns JSON with stdout, stderr and exit_code."
    }

    fn input_contract(&self) -> InputContract {
        InputContract::CommandLine
    }

    async fn invoke(&self, input: ActionInput) -> Result<String, ToolError> {
        let command = match input {
            ActionInput::Command(command) => command,
            other => {
                return Err(ToolError::InvalidInput(format!(
                    "expected a command, got {}",
                    other.kind()
                )))
            }
        };

        info!("Executing terminal command: {}", command.display_line());

        let child = Command::new(&command.program)
            .args(&command.args)
            .current_dir(self.sandbox.project_root())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                ToolError::ExecutionFailed(format!("failed to start '{}': {}", command.program, e))
            })?;

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result?,
            Err(_) => {
                warn!(
                    "Command timed out after {} seconds",
                    self.timeout.as_secs()
                );
                return Err(ToolError::Timeout(self.timeout.as_secs()));
            }
        };

        let report = CommandReport {
            stdout: truncate_chars(
                &String::from_utf8_lossy(&output.stdout),
                MAX_OUTPUT_CHARS,
                "\n... (stdout truncated)",
            ),
            stderr: truncate_chars(
                &String::from_utf8_lossy(&output.stderr),
                MAX_OUTPUT_CHARS,
                "\n... (stderr truncated)",
            ),
            exit_code: output.status.code(),
        };

        debug!("Command exited with {:?}", report.exit_code);
        serde_json::to_string(&report)
            .map_err(|e| ToolError::ExecutionFailed(format!("failed to encode output: {}", e)))
    }
}
