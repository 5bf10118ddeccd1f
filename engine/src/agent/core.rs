//! Orchestration loop
//!
//! This module implements the ReAct loop that drives one instruction to a
//! terminal state. Each iteration:
//!
//! 1. Asks the reasoning client for the next thought and action
//! 2. Finishes on a final answer
//! 3. Otherwise resolves the tool, parses its input, checks the sandbox and
//!    invokes the handler
//! 4. Suspends on a deletion request until it is approved, rejected or
//!    expires
//! 5. Appends exactly one step and publishes its events
//!
//! # Termination
//!
//! - `Completed`: the reasoning client gave a final answer
//! - `Failed`: the reasoning client was unreachable or timed out
//! - `Aborted`: the step budget ran out, or the run was cancelled
//!
//! Every other failure (unknown tool, malformed input, sandbox violation,
//! tool error, expired confirmation) becomes an observation so the reasoning
//! client can correct itself.

use std::sync::Arc;
use std::time::Duration;

use sdk::errors::EngineError;
use sdk::types::ToolOutcome;
use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::trajectory::{StepAction, Trajectory};
use crate::config::AgentConfig;
use crate::confirmation::{ConfirmationGateway, ConfirmationNotice};
use crate::events::{Event, EventKind, EventPublisher, EventSubscription};
use crate::reasoning::{AdapterError, Proposal, ReasoningClient};
use crate::sandbox::SandboxPolicy;
use crate::tools::{ParsedInput, ToolCapability, ToolRegistry};

/// Loop limits
#[derive(Debug, Clone)]
pub struct AgentSettings {
    /// Maximum steps per instruction
    pub max_steps: usize,

    /// Timeout for each reasoning call
    pub llm_timeout: Duration,

    /// How long a deletion request may wait for a decision
    pub confirmation_timeout: Duration,

    /// Per-subscriber event buffer
    pub event_buffer: usize,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self::from_config(&AgentConfig::default())
    }
}

impl AgentSettings {
    pub fn from_config(config: &AgentConfig) -> Self {
        Self {
            max_steps: config.max_steps,
            llm_timeout: config.llm_timeout(),
            confirmation_timeout: config.confirmation_timeout(),
            event_buffer: config.event_buffer,
        }
    }
}

/// Where the loop is in its state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    Running,
    AwaitingConfirmation,
    Completed,
    Failed,
    Aborted,
}

/// Why a run was aborted
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum AbortReason {
    StepBudgetExhausted { max_steps: usize },
    Cancelled,
}

impl From<AbortReason> for EngineError {
    fn from(reason: AbortReason) -> Self {
        match reason {
            AbortReason::StepBudgetExhausted { max_steps } => {
                EngineError::StepBudgetExhausted { max_steps }
            }
            AbortReason::Cancelled => EngineError::Cancelled,
        }
    }
}

/// How a run ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    Completed { answer: String },
    Failed { reason: String },
    Aborted(AbortReason),
}

impl RunOutcome {
    pub fn state(&self) -> LoopState {
        match self {
            Self::Completed { .. } => LoopState::Completed,
            Self::Failed { .. } => LoopState::Failed,
            Self::Aborted(_) => LoopState::Aborted,
        }
    }
}

/// Everything a finished run leaves behind
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub outcome: RunOutcome,
    pub state: LoopState,
    pub trajectory: Trajectory,
}

impl RunReport {
    /// The final answer, if the run completed
    pub fn answer(&self) -> Option<&str> {
        match &self.outcome {
            RunOutcome::Completed { answer } => Some(answer),
            _ => None,
        }
    }
}

/// Builds runs that share a reasoning client, tool registry and sandbox.
pub struct Orchestrator {
    reasoner: Arc<dyn ReasoningClient>,
    tools: Arc<ToolRegistry>,
    sandbox: Arc<SandboxPolicy>,
    settings: AgentSettings,
}

impl Orchestrator {
    pub fn new(
        reasoner: Arc<dyn ReasoningClient>,
        tools: Arc<ToolRegistry>,
        sandbox: Arc<SandboxPolicy>,
        settings: AgentSettings,
    ) -> Self {
        Self {
            reasoner,
            tools,
            sandbox,
            settings,
        }
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn settings(&self) -> &AgentSettings {
        &self.settings
    }

    /// Prepare a run with the configured step budget.
    pub fn prepare(&self, instruction: impl Into<String>) -> Run {
        self.prepare_with_budget(instruction, self.settings.max_steps)
    }

    /// Prepare a run with an explicit step budget.
    ///
    /// Subscribe and grab the confirmation gateway before calling
    /// [`Run::execute`].
    pub fn prepare_with_budget(&self, instruction: impl Into<String>, max_steps: usize) -> Run {
        Run {
            id: Uuid::new_v4(),
            instruction: instruction.into(),
            max_steps,
            reasoner: Arc::clone(&self.reasoner),
            tools: Arc::clone(&self.tools),
            sandbox: Arc::clone(&self.sandbox),
            llm_timeout: self.settings.llm_timeout,
            confirmation_timeout: self.settings.confirmation_timeout,
            events: EventPublisher::new(self.settings.event_buffer),
            confirmations: Arc::new(ConfirmationGateway::new(Arc::clone(&self.sandbox))),
            cancel: CancellationToken::new(),
            state: watch::channel(LoopState::Running).0,
        }
    }

    /// Prepare and execute in one go, without observers.
    pub async fn run(&self, instruction: impl Into<String>) -> RunReport {
        self.prepare(instruction).execute().await
    }
}

/// The run was cancelled while a step was in flight
struct Interrupted;

/// One instruction, ready to execute.
pub struct Run {
    id: Uuid,
    instruction: String,
    max_steps: usize,
    reasoner: Arc<dyn ReasoningClient>,
    tools: Arc<ToolRegistry>,
    sandbox: Arc<SandboxPolicy>,
    llm_timeout: Duration,
    confirmation_timeout: Duration,
    events: EventPublisher,
    confirmations: Arc<ConfirmationGateway>,
    cancel: CancellationToken,
    state: watch::Sender<LoopState>,
}

impl Run {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn instruction(&self) -> &str {
        &self.instruction
    }

    /// Attach an event subscriber. Call before `execute` to see every event.
    pub fn subscribe(&self) -> EventSubscription {
        self.events.subscribe()
    }

    /// Gateway for answering this run's deletion requests
    pub fn confirmations(&self) -> Arc<ConfirmationGateway> {
        Arc::clone(&self.confirmations)
    }

    /// Token that aborts the run when cancelled
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Follow the loop state as it changes
    pub fn watch_state(&self) -> watch::Receiver<LoopState> {
        self.state.subscribe()
    }

    /// Drive the loop to a terminal state.
    pub async fn execute(self) -> RunReport {
        let span = info_span!("run", run_id = %self.id);
        async move {
            info!("Starting run: {}", self.instruction);
            debug!("{} event subscribers attached", self.events.subscriber_count());

            let mut trajectory = Trajectory::new();
            let outcome = self.drive(&mut trajectory).await;
            let state = outcome.state();
            self.state.send_replace(state);

            match &outcome {
                RunOutcome::Completed { .. } => {
                    info!("Run completed after {} steps", trajectory.len())
                }
                RunOutcome::Failed { reason } => error!("Run failed: {}", reason),
                RunOutcome::Aborted(reason) => warn!("Run aborted: {:?}", reason),
            }

            // Withdraw anything still open so a late approval cannot act
            if let Some(pending) = self.confirmations.awaiting() {
                self.confirmations.expire(pending.id);
            }
            self.events.close();

            RunReport {
                run_id: self.id.to_string(),
                outcome,
                state,
                trajectory,
            }
        }
        .instrument(span)
        .await
    }

    fn publish(&self, kind: EventKind, step_index: usize, payload: impl Into<String>) {
        self.events.publish(Event::new(kind, step_index, payload));
    }

    async fn drive(&self, trajectory: &mut Trajectory) -> RunOutcome {
        let capabilities = self.tools.capabilities();

        loop {
            let index = trajectory.next_index();

            if self.cancel.is_cancelled() {
                return self.abort(index, AbortReason::Cancelled);
            }

            if trajectory.len() >= self.max_steps {
                return self.abort(
                    index,
                    AbortReason::StepBudgetExhausted {
                        max_steps: self.max_steps,
                    },
                );
            }

            debug!("Step {}/{}", index + 1, self.max_steps);

            let proposal = match self.reason(&capabilities, trajectory).await {
                Ok(Ok(proposal)) => proposal,
                Ok(Err(e)) => {
                    let reason = e.to_string();
                    self.publish(EventKind::Error, index, reason.clone());
                    return RunOutcome::Failed { reason };
                }
                Err(Interrupted) => return self.abort(index, AbortReason::Cancelled),
            };

            self.publish(EventKind::Thought, index, proposal.thought.clone());

            if proposal.is_final() {
                let answer = proposal.action_input;
                trajectory.push(
                    proposal.thought,
                    StepAction::FinalAnswer {
                        answer: answer.clone(),
                    },
                    String::new(),
                );
                self.publish(EventKind::FinalAnswer, index, answer.clone());
                return RunOutcome::Completed { answer };
            }

            let name = proposal.action_name.trim().to_string();
            if name.is_empty() {
                let observation = failure(EngineError::MalformedAction(
                    "expected either an Action with its Action Input or a Final Answer, on lines of their own"
                        .to_string(),
                ));
                trajectory.push(
                    proposal.thought,
                    StepAction::Malformed {
                        raw: proposal.action_input,
                    },
                    observation.clone(),
                );
                self.publish(EventKind::Observation, index, observation);
                continue;
            }

            self.publish(
                EventKind::Action,
                index,
                format!("{}: {}", name, proposal.action_input),
            );

            let observation = match self.dispatch(index, &name, &proposal).await {
                Ok(observation) => observation,
                Err(Interrupted) => return self.abort(index, AbortReason::Cancelled),
            };

            trajectory.push(
                proposal.thought,
                StepAction::Tool {
                    name,
                    input: proposal.action_input,
                },
                observation.clone(),
            );
            self.publish(EventKind::Observation, index, observation);
        }
    }

    async fn reason(
        &self,
        capabilities: &[ToolCapability],
        trajectory: &Trajectory,
    ) -> Result<Result<Proposal, AdapterError>, Interrupted> {
        let call = self
            .reasoner
            .next_action(&self.instruction, capabilities, trajectory);

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Interrupted),
            result = tokio::time::timeout(self.llm_timeout, call) => Ok(match result {
                Ok(proposal) => proposal,
                Err(_) => Err(AdapterError::Timeout(self.llm_timeout)),
            }),
        }
    }

    /// Resolve, parse, authorize and invoke one tool action.
    async fn dispatch(
        &self,
        index: usize,
        name: &str,
        proposal: &Proposal,
    ) -> Result<String, Interrupted> {
        let descriptor = match self.tools.resolve(name) {
            Ok(descriptor) => descriptor,
            Err(e) => {
                warn!("Unknown tool requested: {}", name);
                return Ok(format!(
                    "{} Available tools: {}",
                    failure(e),
                    self.tools.names().join(", ")
                ));
            }
        };

        let parsed = match ParsedInput::parse(descriptor.input_contract, &proposal.action_input) {
            Ok(parsed) => parsed,
            Err(reason) => {
                return Ok(failure(EngineError::MalformedAction(format!(
                    "'{}' expects input like '{}': {}",
                    name,
                    descriptor.input_contract.hint(),
                    reason
                ))))
            }
        };

        let input = match parsed.authorize(&self.sandbox) {
            Ok(input) => input,
            Err(violation) => {
                warn!("Sandbox rejected '{}': {}", name, violation);
                return Ok(failure(EngineError::Sandbox(violation)));
            }
        };

        let handler = Arc::clone(&descriptor.handler);
        let output = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(Interrupted),
            output = handler.invoke(input) => output,
        };

        let raw = match output {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Tool '{}' failed: {}", name, e);
                e.to_observation()
            }
        };

        match ToolOutcome::parse(&raw) {
            ToolOutcome::ConfirmDelete(path) => self.confirm(index, &path).await,
            outcome => Ok(outcome.to_wire()),
        }
    }

    /// Suspend on a deletion request until it is decided or expires.
    async fn confirm(&self, index: usize, target: &str) -> Result<String, Interrupted> {
        let id = match self.confirmations.request(target) {
            Ok(id) => id,
            Err(e) => return Ok(failure(e)),
        };

        let notice = self
            .confirmations
            .get(id)
            .map(|pending| ConfirmationNotice::from(&pending))
            .unwrap_or_else(|| ConfirmationNotice {
                confirmation_id: id.to_string(),
                target_path: target.to_string(),
            });
        let payload = serde_json::to_string(&notice).unwrap_or_else(|_| {
            format!(
                r#"{{"confirmation_id":"{}","target_path":"{}"}}"#,
                notice.confirmation_id, notice.target_path
            )
        });

        self.state.send_replace(LoopState::AwaitingConfirmation);
        self.publish(EventKind::ConfirmationRequested, index, payload);
        info!("Awaiting confirmation {} for {}", id, target);

        let resolution = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                self.confirmations.expire(id);
                return Err(Interrupted);
            }
            resolution = self.confirmations.wait(id, self.confirmation_timeout) => resolution,
        };
        self.state.send_replace(LoopState::Running);

        Ok(match resolution {
            Ok(resolution) => {
                debug!("Confirmation {} ended as {:?}", id, resolution.state);
                resolution.message
            }
            Err(e) => failure(e),
        })
    }

    fn abort(&self, index: usize, reason: AbortReason) -> RunOutcome {
        let message = EngineError::from(reason.clone()).to_string();
        self.publish(EventKind::Error, index, message);
        RunOutcome::Aborted(reason)
    }
}

/// Render an error as an `Error:` observation
fn failure(error: impl std::fmt::Display) -> String {
    ToolOutcome::failure(error).to_wire()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ClockTool;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::path::Path;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Replays proposals; repeats the last one once the script runs out
    struct Scripted {
        script: Mutex<VecDeque<Proposal>>,
        last: Proposal,
    }

    impl Scripted {
        fn new(script: Vec<Proposal>) -> Arc<Self> {
            let last = script
                .last()
                .cloned()
                .unwrap_or_else(|| Proposal::final_answer("", ""));
            Arc::new(Self {
                script: Mutex::new(script.into()),
                last,
            })
        }
    }

    #[async_trait]
    impl ReasoningClient for Scripted {
        async fn next_action(
            &self,
            _instruction: &str,
            _tools: &[ToolCapability],
            _trajectory: &Trajectory,
        ) -> Result<Proposal, AdapterError> {
            let next = self.script.lock().unwrap().pop_front();
            Ok(next.unwrap_or_else(|| self.last.clone()))
        }
    }

    fn orchestrator(dir: &TempDir, reasoner: Arc<dyn ReasoningClient>) -> Orchestrator {
        let sandbox =
            Arc::new(SandboxPolicy::new(dir.path(), dir.path(), Path::new("scripts")).unwrap());
        let mut tools = ToolRegistry::empty();
        tools.register_tool(Arc::new(ClockTool)).unwrap();
        Orchestrator::new(reasoner, Arc::new(tools), sandbox, AgentSettings::default())
    }

    #[tokio::test]
    async fn test_final_answer_completes() {
        let dir = TempDir::new().unwrap();
        let agent = orchestrator(&dir, Scripted::new(vec![Proposal::final_answer("done", "42")]));

        let run = agent.prepare("answer");
        let mut events = run.subscribe();
        let report = run.execute().await;

        assert_eq!(report.state, LoopState::Completed);
        assert_eq!(report.answer(), Some("42"));
        assert_eq!(report.trajectory.len(), 1);

        assert_eq!(events.next().await.unwrap().kind, EventKind::Thought);
        let last = events.next().await.unwrap();
        assert_eq!(last.kind, EventKind::FinalAnswer);
        assert_eq!(last.payload, "42");
        assert!(events.next().await.is_none());
    }

    #[tokio::test]
    async fn test_step_budget_aborts() {
        let dir = TempDir::new().unwrap();
        let agent = orchestrator(
            &dir,
            Scripted::new(vec![Proposal::tool("again", "Get Current Date and Time", "")]),
        );

        let report = agent.prepare_with_budget("loop forever", 3).execute().await;

        assert_eq!(report.state, LoopState::Aborted);
        assert_eq!(
            report.outcome,
            RunOutcome::Aborted(AbortReason::StepBudgetExhausted { max_steps: 3 })
        );
        assert_eq!(report.trajectory.len(), 3);
    }

    #[tokio::test]
    async fn test_malformed_and_unknown_tool_are_observations() {
        let dir = TempDir::new().unwrap();
        let agent = orchestrator(
            &dir,
            Scripted::new(vec![
                Proposal::tool("hmm", "", ""),
                Proposal::tool("try", "Launch Rocket", "now"),
                Proposal::final_answer("ok", "gave up"),
            ]),
        );

        let report = agent.run("do it").await;
        let steps = report.trajectory.steps();

        assert_eq!(report.answer(), Some("gave up"));
        assert!(matches!(steps[0].action, StepAction::Malformed { .. }));
        assert!(steps[0].observation.starts_with("Error: Malformed action"));
        assert!(steps[1].observation.contains("Tool not found: Launch Rocket"));
        assert!(steps[1].observation.contains("Get Current Date and Time"));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let dir = TempDir::new().unwrap();
        let agent = orchestrator(&dir, Scripted::new(vec![Proposal::final_answer("", "x")]));

        let run = agent.prepare("never");
        run.cancellation_token().cancel();
        let report = run.execute().await;

        assert_eq!(report.outcome, RunOutcome::Aborted(AbortReason::Cancelled));
        assert!(report.trajectory.is_empty());
    }
}
