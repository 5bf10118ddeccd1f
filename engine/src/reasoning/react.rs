//! ReAct prompt rendering and completion parsing
//!
//! The completion format is the classic one:
//!
//! ```text
//! Thought: I should look at the folder first
//! Action: List Directory Contents
//! Action Input: reports
//! ```
//!
//! or, to finish:
//!
//! ```text
//! Thought: I know the answer
//! Final Answer: The report is in reports/q1.txt
//! ```
//!
//! Anything the model writes after an `Observation:` marker is its own
//! invention and is cut before parsing.

use async_trait::async_trait;
use regex::Regex;
use tracing::{debug, warn};

use super::{AdapterError, Proposal, ReasoningClient, FINAL_ANSWER};
use crate::agent::{StepAction, Trajectory};
use crate::llm::{LLMRouter, Message};
use crate::tools::ToolCapability;

/// Parses ReAct completions into proposals
#[derive(Debug, Clone)]
pub struct ReactParser {
    observation: Regex,
    final_answer: Regex,
    action: Regex,
    action_input: Regex,
    thought_label: Regex,
}

impl ReactParser {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            observation: Regex::new(r"(?m)^\s*Observation\s*:")?,
            final_answer: Regex::new(r"(?m)^[ \t]*Final Answer[ \t]*:(?s:\s*(.*))")?,
            action: Regex::new(r"(?m)^\s*Action\s*:[ \t]*(.*?)\s*$")?,
            action_input: Regex::new(r"(?s)Action\s+Input\s*:[ \t]*(.*)$")?,
            thought_label: Regex::new(r"(?i)^\s*Thought\s*:\s*")?,
        })
    }

    /// Parse a completion.
    ///
    /// Returns a proposal with an empty action name when neither an action
    /// nor a final answer can be found, or when both are present.
    pub fn parse(&self, completion: &str) -> Proposal {
        // The line break before a cut observation belongs to the marker
        let text = match self.observation.find(completion) {
            Some(m) => {
                let head = &completion[..m.start()];
                let head = head.strip_suffix('\n').unwrap_or(head);
                head.strip_suffix('\r').unwrap_or(head)
            }
            None => completion,
        };

        let action = self
            .action
            .captures(text)
            .and_then(|c| Some((c.get(0)?.start(), c.get(1)?.as_str())));
        let final_answer = self
            .final_answer
            .captures(text)
            .and_then(|c| Some((c.get(0)?.start(), c.get(1)?.as_str())));

        match (action, final_answer) {
            (Some((a, raw_name)), None) => {
                let name = raw_name
                    .trim()
                    .trim_matches(|c| c == '`' || c == '"' || c == '*');
                let input = self
                    .action_input
                    .captures(&text[a..])
                    .and_then(|c| c.get(1))
                    .map_or("", |m| m.as_str());
                Proposal::tool(self.thought(&text[..a]), name, input)
            }
            (None, Some((f, answer))) => {
                Proposal::final_answer(self.thought(&text[..f]), answer.trim())
            }
            (Some((a, _)), Some((f, _))) => {
                debug!("Completion carries both an action and a final answer");
                Proposal::tool(self.thought(&text[..a.min(f)]), "", "")
            }
            (None, None) => Proposal::tool(self.thought(text), "", ""),
        }
    }

    fn thought(&self, prefix: &str) -> String {
        self.thought_label.replace(prefix.trim(), "").trim().to_string()
    }
}

/// Production [`ReasoningClient`]: ReAct prompting over the provider router.
pub struct LlmReasoner {
    router: LLMRouter,
    parser: ReactParser,
}

impl LlmReasoner {
    pub fn new(router: LLMRouter) -> Result<Self, regex::Error> {
        Ok(Self {
            router,
            parser: ReactParser::new()?,
        })
    }

    pub fn router(&self) -> &LLMRouter {
        &self.router
    }

    /// Render the conversation sent to the provider.
    pub fn build_messages(
        instruction: &str,
        tools: &[ToolCapability],
        trajectory: &Trajectory,
    ) -> Vec<Message> {
        let tool_lines: Vec<String> = tools
            .iter()
            .map(|t| {
                format!(
                    "- {}: {} (Action Input format: {})",
                    t.name, t.description, t.input_hint
                )
            })
            .collect();
        let tool_names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();

        let system = format!(
            "You are a careful assistant that completes tasks by using tools.\n\
             All file paths are relative to the sandbox folder. Deleting a file always needs user confirmation.\n\n\
             Available tools:\n{}\n\n\
             Use exactly this format:\n\
             Thought: what you should do next\n\
             Action: one of [{}]\n\
             Action Input: the input for the action\n\n\
             After each action you will receive an Observation. When you are done, reply with:\n\
             Thought: I now know the final answer\n\
             {}: the answer for the user\n\n\
             Never write an Observation yourself.",
            tool_lines.join("\n"),
            tool_names.join(", "),
            FINAL_ANSWER
        );

        let mut scratchpad = format!("Question: {}\n", instruction);
        for step in trajectory.steps() {
            scratchpad.push_str(&format!("Thought: {}\n", step.thought));
            match &step.action {
                StepAction::Tool { name, input } => {
                    scratchpad.push_str(&format!("Action: {}\nAction Input: {}\n", name, input));
                }
                StepAction::Malformed { .. } => {
                    scratchpad.push_str("Action: (unreadable)\n");
                }
                StepAction::FinalAnswer { answer } => {
                    scratchpad.push_str(&format!("{}: {}\n", FINAL_ANSWER, answer));
                }
            }
            if !step.observation.is_empty() {
                scratchpad.push_str(&format!("Observation: {}\n", step.observation));
            }
        }
        scratchpad.push_str("Thought:");

        vec![Message::system(system), Message::user(scratchpad)]
    }
}

#[async_trait]
impl ReasoningClient for LlmReasoner {
    async fn next_action(
        &self,
        instruction: &str,
        tools: &[ToolCapability],
        trajectory: &Trajectory,
    ) -> Result<Proposal, AdapterError> {
        let messages = Self::build_messages(instruction, tools, trajectory);
        let (completion, provider) = self.router.call(&messages).await?;

        // The prompt ends in "Thought:", so the completion usually omits it
        let completion = if completion.trim_start().starts_with("Thought") {
            completion
        } else {
            format!("Thought: {}", completion)
        };

        let proposal = self.parser.parse(&completion);
        if proposal.action_name.is_empty() {
            warn!("Could not parse a ReAct action from {} output", provider);
        } else {
            debug!("{} proposed action '{}'", provider, proposal.action_name);
        }
        Ok(proposal)
    }
}
