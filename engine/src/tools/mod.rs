//! Tool registry and the tool handler seam
//!
//! A tool is anything implementing [`Tool`]: a name, a description the
//! reasoning client reads to decide usage, an [`InputContract`] and an async
//! handler. The [`ToolRegistry`] is built once at startup and is read-only
//! while a run executes.

pub mod clock;
pub mod deletion;
pub mod filesystem;
pub mod input;
pub mod terminal;

pub use clock::ClockTool;
pub use deletion::DeletionRequestTool;
pub use filesystem::{ListDirectoryTool, ReadFileTool, WriteFileTool};
pub use input::{ActionInput, InputContract, ParsedInput};
pub use terminal::TerminalTool;

use crate::config::Config;
use crate::sandbox::SandboxPolicy;
use async_trait::async_trait;
use sdk::errors::EngineError;
use sdk::types::ToolError;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// A side-effecting capability the loop can dispatch to.
///
/// Handlers only ever receive sandbox-authorized input. They must not
/// perform destructive filesystem effects themselves; they return the
/// `CONFIRM_DELETE|<path>` sentinel instead.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn input_contract(&self) -> InputContract;

    /// Run the tool. `Ok` output follows the tool wire contract.
    async fn invoke(&self, input: ActionInput) -> Result<String, ToolError>;
}

/// Registry entry for one tool.
#[derive(Clone)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_contract: InputContract,
    pub handler: Arc<dyn Tool>,
}

impl ToolDescriptor {
    /// Describe a tool by asking it for its own metadata.
    pub fn from_tool(tool: Arc<dyn Tool>) -> Self {
        Self {
            name: tool.name().to_string(),
            description: tool.description().to_string(),
            input_contract: tool.input_contract(),
            handler: tool,
        }
    }

    /// What the reasoning client gets to see about this tool
    pub fn capability(&self) -> ToolCapability {
        ToolCapability {
            name: self.name.clone(),
            description: self.description.clone(),
            input_hint: self.input_contract.hint().to_string(),
        }
    }
}

impl fmt::Debug for ToolDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolDescriptor")
            .field("name", &self.name)
            .field("input_contract", &self.input_contract)
            .finish_non_exhaustive()
    }
}

/// Name, description and input hint of a tool, without its handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolCapability {
    pub name: String,
    pub description: String,
    pub input_hint: String,
}

/// Name-indexed tool descriptors in registration order.
#[derive(Debug, Default)]
pub struct ToolRegistry {
    descriptors: Vec<ToolDescriptor>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    /// Create an empty registry with no tools.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Register the built-in tools enabled in `config`.
    pub fn builtin(policy: &Arc<SandboxPolicy>, config: &Config) -> Result<Self, EngineError> {
        let mut registry = Self::empty();

        if config.tools.filesystem {
            registry.register_tool(Arc::new(ReadFileTool::new(Arc::clone(policy))))?;
            registry.register_tool(Arc::new(WriteFileTool::new(Arc::clone(policy))))?;
            registry.register_tool(Arc::new(ListDirectoryTool::new(Arc::clone(policy))))?;
        }
        if config.tools.deletion {
            registry.register_tool(Arc::new(DeletionRequestTool::new(Arc::clone(policy))))?;
        }
        if config.tools.terminal {
            registry.register_tool(Arc::new(TerminalTool::new(
                Arc::clone(policy),
                config.agent.tool_timeout(),
            )))?;
        }
        if config.tools.clock {
            registry.register_tool(Arc::new(ClockTool))?;
        }

        debug!("Registered {} built-in tools", registry.len());
        Ok(registry)
    }

    /// Add a descriptor.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::DuplicateTool` if the name is already taken.
    pub fn register(&mut self, descriptor: ToolDescriptor) -> Result<(), EngineError> {
        if self.index.contains_key(&descriptor.name) {
            return Err(EngineError::DuplicateTool(descriptor.name));
        }

        self.index
            .insert(descriptor.name.clone(), self.descriptors.len());
        self.descriptors.push(descriptor);
        Ok(())
    }

    /// Convenience for `register(ToolDescriptor::from_tool(tool))`.
    pub fn register_tool(&mut self, tool: Arc<dyn Tool>) -> Result<(), EngineError> {
        self.register(ToolDescriptor::from_tool(tool))
    }

    /// Look up a tool by exact name.
    pub fn resolve(&self, name: &str) -> Result<&ToolDescriptor, EngineError> {
        self.index
            .get(name)
            .map(|&i| &self.descriptors[i])
            .ok_or_else(|| EngineError::ToolNotFound(name.to_string()))
    }

    /// All descriptors in insertion order
    pub fn list(&self) -> &[ToolDescriptor] {
        &self.descriptors
    }

    pub fn capabilities(&self) -> Vec<ToolCapability> {
        self.descriptors.iter().map(ToolDescriptor::capability).collect()
    }

    /// Tool names in insertion order
    pub fn names(&self) -> Vec<&str> {
        self.descriptors.iter().map(|d| d.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

/// Truncate `text` to `max_chars` characters, appending `marker` if cut.
pub(crate) fn truncate_chars(text: &str, max_chars: usize, marker: &str) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}{}", &text[..cut], marker),
        None => text.to_string(),
    }
}
