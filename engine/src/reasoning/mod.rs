//! Reasoning client boundary
//!
//! The orchestration loop only needs one thing from an LLM: given the
//! instruction, the tool capabilities and the trajectory so far, propose the
//! next thought and action. [`ReasoningClient`] is that seam; [`LlmReasoner`]
//! is the production implementation over the provider router.
//!
//! An [`AdapterError`] means the reasoning side itself is unreachable. It is
//! kept apart from tool failures because it is the only error that ends a
//! run as `Failed`.

use async_trait::async_trait;
use std::time::Duration;

use crate::agent::Trajectory;
use crate::llm::LLMError;
use crate::tools::ToolCapability;

pub mod react;

pub use react::LlmReasoner;

/// Action name that ends a run
pub const FINAL_ANSWER: &str = "Final Answer";

/// The next thought and action proposed by the reasoning client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Proposal {
    pub thought: String,
    /// Tool name, [`FINAL_ANSWER`], or empty when nothing could be parsed
    pub action_name: String,
    /// Raw tool input, or the answer text for a final answer
    pub action_input: String,
}

impl Proposal {
    pub fn tool(
        thought: impl Into<String>,
        name: impl Into<String>,
        input: impl Into<String>,
    ) -> Self {
        Self {
            thought: thought.into(),
            action_name: name.into(),
            action_input: input.into(),
        }
    }

    pub fn final_answer(thought: impl Into<String>, answer: impl Into<String>) -> Self {
        Self::tool(thought, FINAL_ANSWER, answer)
    }

    pub fn is_final(&self) -> bool {
        self.action_name.trim() == FINAL_ANSWER
    }
}

/// The reasoning client could not produce a proposal
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("Reasoning client unavailable: {0}")]
    Unavailable(String),

    #[error("Reasoning call timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error(transparent)]
    Provider(#[from] LLMError),
}

#[async_trait]
pub trait ReasoningClient: Send + Sync {
    /// Propose the next step.
    async fn next_action(
        &self,
        instruction: &str,
        tools: &[ToolCapability],
        trajectory: &Trajectory,
    ) -> Result<Proposal, AdapterError>;
}
