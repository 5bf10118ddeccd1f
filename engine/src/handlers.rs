//! Command handlers for CLI operations
//!
//! This module implements the handlers for all CLI commands:
//! - run: Execute an instruction, streaming events and prompting for
//!   deletion confirmations
//! - tools: List the registered tools
//! - check: Dry-run the sandbox policy on a path or command line
//! - doctor: Show resolved roots and reasoning provider health

use anyhow::{bail, Context, Result};
use serde_json::json;
use std::io::{BufRead, Write};
use sdk::errors::{EngineError, WardenErrorExt};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

use crate::agent::{AgentSettings, LoopState, Orchestrator, RunOutcome, RunReport};
use crate::config::Config;
use crate::confirmation::{ConfirmationGateway, ConfirmationId, ConfirmationNotice};
use crate::events::{Event, EventKind};
use crate::llm::{GeminiProvider, LLMProvider, LLMRouter, OllamaProvider};
use crate::reasoning::LlmReasoner;
use crate::sandbox::SandboxPolicy;
use crate::tools::ToolRegistry;

/// Output format for command results
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for machine consumption
    Json,
}

/// Build the provider router from config
///
/// Ollama is always registered; Gemini reads its key from the configured
/// environment variable.
pub fn build_router(config: &Config) -> LLMRouter {
    let providers: Vec<Box<dyn LLMProvider>> = vec![
        Box::new(OllamaProvider::new(
            config.llm.ollama.base_url.clone(),
            config.llm.ollama.model.clone(),
        )),
        Box::new(GeminiProvider::from_env(config.llm.gemini.clone())),
    ];

    LLMRouter::new(providers, config.llm.default_provider.clone())
        .with_timeout(config.agent.llm_timeout())
}

/// Wire the sandbox, tool registry and reasoning client together
pub fn build_orchestrator(config: &Config) -> Result<Orchestrator> {
    let sandbox = Arc::new(SandboxPolicy::from_config(config).context("Failed to build sandbox")?);
    let tools = Arc::new(
        ToolRegistry::builtin(&sandbox, config).context("Failed to register built-in tools")?,
    );
    let reasoner =
        LlmReasoner::new(build_router(config)).context("Failed to build the ReAct parser")?;

    Ok(Orchestrator::new(
        Arc::new(reasoner),
        tools,
        sandbox,
        AgentSettings::from_config(&config.agent),
    ))
}

/// Execute an instruction
///
/// The loop runs on a worker task. This handler renders its events as they
/// arrive, answers deletion requests from stdin and cancels the run on
/// Ctrl-C.
pub async fn handle_run(
    instruction: String,
    max_steps: Option<usize>,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let orchestrator = build_orchestrator(config)?;
    let run = match max_steps {
        Some(0) => bail!("--max-steps must be at least 1"),
        Some(n) => orchestrator.prepare_with_budget(instruction.clone(), n),
        None => orchestrator.prepare(instruction.clone()),
    };

    if format == OutputFormat::Text {
        println!("Executing: {}", instruction);
        println!("Sandbox:   {}", config.core.sandbox_root.display());
        println!();
    }

    let mut events = run.subscribe();
    let mut state = run.watch_state();
    let confirmations = run.confirmations();
    let cancel = run.cancellation_token();
    let worker = tokio::spawn(run.execute());

    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling run");
            interrupt.cancel();
        }
    });

    let mut answers: Option<AnswerLines> = None;
    while let Some(event) = events.next().await {
        render_event(&event, format)?;

        if event.kind == EventKind::ConfirmationRequested {
            let answers = answers.get_or_insert_with(AnswerLines::stdin);
            tokio::select! {
                _ = cancel.cancelled() => {}
                answer = answer_confirmation(&confirmations, &event.payload, answers, &mut state) => answer?,
            }
        }
    }

    let report = worker.await.context("Run worker panicked")?;
    if events.dropped() > 0 {
        tracing::warn!("{} events were dropped by a slow consumer", events.dropped());
    }
    render_report(&report, format)?;

    match report.outcome {
        RunOutcome::Completed { .. } => Ok(()),
        RunOutcome::Failed { reason } => bail!("Run failed: {}", reason),
        RunOutcome::Aborted(reason) => bail!("Run aborted: {}", EngineError::from(reason)),
    }
}

/// Engine error behind an unsuccessful outcome
fn outcome_error(outcome: &RunOutcome) -> Option<EngineError> {
    match outcome {
        RunOutcome::Completed { .. } => None,
        RunOutcome::Failed { reason } => Some(EngineError::Adapter(reason.clone())),
        RunOutcome::Aborted(reason) => Some(EngineError::from(reason.clone())),
    }
}

/// Prompt for one deletion request and resolve it.
///
/// The prompt is abandoned once the loop leaves `AwaitingConfirmation`,
/// which happens when the request expires.
async fn answer_confirmation(
    gateway: &ConfirmationGateway,
    payload: &str,
    answers: &mut AnswerLines,
    state: &mut watch::Receiver<LoopState>,
) -> Result<()> {
    let notice: ConfirmationNotice =
        serde_json::from_str(payload).context("Malformed confirmation payload")?;
    let id: ConfirmationId = notice.confirmation_id.parse()?;
    let question = format!("Delete '{}' from the sandbox? [y/N] ", notice.target_path);

    let approved = tokio::select! {
        approved = answers.ask(&question) => approved?,
        _ = state.wait_for(|s| *s != LoopState::AwaitingConfirmation) => {
            eprintln!();
            eprintln!("✗ The deletion request for '{}' is no longer open", notice.target_path);
            return Ok(());
        }
    };

    if let Err(e) = gateway.resolve(id, approved).await {
        eprintln!("✗ {} ({})", e, e.user_hint());
    }
    Ok(())
}

/// Answers typed on stdin
///
/// One plain thread reads stdin for the whole run, so an unanswered prompt
/// never holds up runtime shutdown and an abandoned prompt does not leave a
/// second reader behind.
struct AnswerLines {
    lines: mpsc::UnboundedReceiver<std::io::Result<String>>,
}

impl AnswerLines {
    fn stdin() -> Self {
        let (tx, lines) = mpsc::unbounded_channel();
        std::thread::spawn(move || {
            for line in std::io::stdin().lock().lines() {
                if tx.send(line).is_err() {
                    break;
                }
            }
        });
        Self { lines }
    }

    /// Ask on stderr and wait for the next line.
    ///
    /// Lines typed before the question are discarded. A closed stdin
    /// answers no.
    async fn ask(&mut self, question: &str) -> Result<bool> {
        while self.lines.try_recv().is_ok() {}

        eprint!("{}", question);
        let _ = std::io::stderr().flush();

        match self.lines.recv().await {
            Some(line) => Ok(is_yes(&line.context("Failed to read answer from stdin")?)),
            None => Ok(false),
        }
    }
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}

fn render_event(event: &Event, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string(event)?),
        OutputFormat::Text => {
            let step = event.step_index + 1;
            match event.kind {
                EventKind::Thought => println!("[{}] Thought: {}", step, event.payload),
                EventKind::Action => println!("[{}] Action: {}", step, event.payload),
                EventKind::Observation => println!("[{}] Observation: {}", step, event.payload),
                EventKind::ConfirmationRequested => {
                    let target = serde_json::from_str::<ConfirmationNotice>(&event.payload)
                        .map(|n| n.target_path)
                        .unwrap_or_else(|_| event.payload.clone());
                    println!("[{}] Confirmation required to delete '{}'", step, target);
                }
                EventKind::Error => println!("[{}] ✗ {}", step, event.payload),
                EventKind::FinalAnswer => {
                    println!();
                    println!("Final Answer: {}", event.payload);
                }
                EventKind::Unknown => {}
            }
        }
    }
    Ok(())
}

fn render_report(report: &RunReport, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string(report)?),
        OutputFormat::Text => {
            println!();
            match &report.outcome {
                RunOutcome::Completed { .. } => println!("✓ Completed"),
                RunOutcome::Failed { reason } => println!("✗ Failed: {}", reason),
                RunOutcome::Aborted(reason) => println!("✗ Aborted: {:?}", reason),
            }
            if let Some(error) = outcome_error(&report.outcome) {
                println!("  Hint:   {}", error.user_hint());
            }
            println!("  Run ID: {}", report.run_id);
            println!("  Steps:  {}", report.trajectory.len());
        }
    }
    Ok(())
}

/// List the registered tools in registration order
pub async fn handle_tools(config: &Config, format: OutputFormat) -> Result<()> {
    let sandbox = Arc::new(SandboxPolicy::from_config(config)?);
    let registry = ToolRegistry::builtin(&sandbox, config)?;

    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string_pretty(&json!({ "tools": registry.capabilities() }))?
            );
        }
        OutputFormat::Text => {
            if registry.is_empty() {
                println!("No tools enabled. Check the [tools] section of config.toml");
                return Ok(());
            }

            println!("Registered tools ({}):", registry.len());
            println!();
            for capability in registry.capabilities() {
                println!("  {}", capability.name);
                println!("    {}", capability.description);
                println!("    Input: {}", capability.input_hint);
            }
        }
    }

    Ok(())
}

/// Dry-run the sandbox on a path
pub async fn handle_check_path(path: String, config: &Config, format: OutputFormat) -> Result<()> {
    let sandbox = SandboxPolicy::from_config(config)?;
    let verdict = sandbox
        .validate_path(&path)
        .map(|resolved| sandbox.relative_display(&resolved));
    print_verdict("path", &path, verdict, format)
}

/// Dry-run the sandbox on a command line
pub async fn handle_check_command(
    line: String,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let sandbox = SandboxPolicy::from_config(config)?;
    let verdict = sandbox
        .validate_command(&line)
        .map(|command| command.display_line());
    print_verdict("command", &line, verdict, format)
}

fn print_verdict(
    kind: &str,
    input: &str,
    verdict: std::result::Result<String, sdk::errors::SandboxViolation>,
    format: OutputFormat,
) -> Result<()> {
    match format {
        OutputFormat::Json => {
            let output = match &verdict {
                Ok(resolved) => json!({
                    "kind": kind,
                    "input": input,
                    "allowed": true,
                    "resolved": resolved,
                }),
                Err(violation) => json!({
                    "kind": kind,
                    "input": input,
                    "allowed": false,
                    "violation": violation.to_string(),
                }),
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Text => match &verdict {
            Ok(resolved) => println!("✓ Allowed {}: {}", kind, resolved),
            Err(violation) => println!("✗ Rejected {}: {}", kind, violation),
        },
    }
    Ok(())
}

/// Show resolved roots and provider health
pub async fn handle_doctor(config: &Config, format: OutputFormat) -> Result<()> {
    let mut checks: Vec<(String, String)> = Vec::new();
    let mut issues = Vec::new();

    // Config is already validated when loaded
    checks.push(("Configuration".into(), "Valid".into()));
    checks.push((
        "Project root".into(),
        config.core.project_root.display().to_string(),
    ));
    checks.push((
        "Sandbox root".into(),
        config.core.sandbox_root.display().to_string(),
    ));

    match SandboxPolicy::from_config(config) {
        Ok(sandbox) => {
            let scripts = sandbox.scripts_root();
            if scripts.is_dir() {
                checks.push(("Scripts directory".into(), scripts.display().to_string()));
            } else {
                checks.push(("Scripts directory".into(), "Missing".into()));
                issues.push(format!(
                    "Scripts directory does not exist: {}. Interpreter commands will be rejected.",
                    scripts.display()
                ));
            }
            checks.push((
                "Allowed commands".into(),
                sandbox.allowed_commands().join(", "),
            ));
        }
        Err(e) => {
            checks.push(("Sandbox".into(), "Error".into()));
            issues.push(format!("Cannot build sandbox policy: {}", e));
        }
    }

    let router = build_router(config);
    let health = router.check_health().await;
    for (name, healthy) in &health {
        let status = if *healthy { "Available" } else { "Not available" };
        checks.push((format!("Provider {}", name), status.into()));
    }
    if !health.iter().any(|(_, healthy)| *healthy) {
        issues.push(format!(
            "No reasoning provider available. Start Ollama or set {}.",
            config.llm.gemini.api_key_env
        ));
    }

    match format {
        OutputFormat::Text => {
            println!("Warden diagnostics");
            println!();
            for (name, status) in &checks {
                println!("  {:<20} {}", name, status);
            }
            println!();
            if issues.is_empty() {
                println!("✓ No issues found");
            } else {
                println!("Issues:");
                for issue in &issues {
                    println!("  ✗ {}", issue);
                }
            }
        }
        OutputFormat::Json => {
            let checks: Vec<_> = checks
                .iter()
                .map(|(name, status)| json!({ "check": name, "status": status }))
                .collect();
            let output = json!({
                "checks": checks,
                "issues": issues,
                "healthy": issues.is_empty(),
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AbortReason;
    use crate::confirmation::ConfirmationState;
    use std::path::Path;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_is_yes() {
        assert!(is_yes("y\n"));
        assert!(is_yes("  YES "));
        assert!(!is_yes("\n"));
        assert!(!is_yes("no"));
        assert!(!is_yes("yep"));
    }

    #[test]
    fn test_outcome_error_carries_hint() {
        assert!(outcome_error(&RunOutcome::Completed {
            answer: "ok".into()
        })
        .is_none());

        let aborted = outcome_error(&RunOutcome::Aborted(AbortReason::StepBudgetExhausted {
            max_steps: 3,
        }))
        .unwrap();
        assert!(matches!(
            aborted,
            EngineError::StepBudgetExhausted { max_steps: 3 }
        ));
        assert!(aborted.user_hint().contains("smaller steps"));

        let failed = outcome_error(&RunOutcome::Failed {
            reason: "connection refused".into(),
        })
        .unwrap();
        assert!(failed.to_string().contains("connection refused"));
        assert!(failed.user_hint().contains("Reasoning provider"));
    }

    fn pending_delete() -> (TempDir, ConfirmationGateway, ConfirmationId, String) {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir(temp.path().join("outputs")).unwrap();
        std::fs::write(temp.path().join("outputs/notes.txt"), "x").unwrap();
        let policy = Arc::new(
            SandboxPolicy::new(temp.path(), &temp.path().join("outputs"), Path::new("scripts"))
                .unwrap(),
        );
        let gateway = ConfirmationGateway::new(policy);
        let id = gateway.request("notes.txt").unwrap();
        let payload =
            serde_json::to_string(&ConfirmationNotice::from(&gateway.get(id).unwrap())).unwrap();
        (temp, gateway, id, payload)
    }

    #[tokio::test]
    async fn test_answer_resolves_request() {
        let (temp, gateway, id, payload) = pending_delete();
        let (tx, rx) = mpsc::unbounded_channel();
        let mut answers = AnswerLines { lines: rx };
        let (_state_tx, mut state) = watch::channel(LoopState::AwaitingConfirmation);

        // Typed before the question, so it must not count
        tx.send(Ok("y".to_string())).unwrap();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            tx.send(Ok("n".to_string())).unwrap();
        });

        answer_confirmation(&gateway, &payload, &mut answers, &mut state)
            .await
            .unwrap();

        assert_eq!(gateway.get(id).unwrap().state, ConfirmationState::Rejected);
        assert!(temp.path().join("outputs/notes.txt").exists());
    }

    #[tokio::test]
    async fn test_prompt_abandoned_when_loop_moves_on() {
        let (temp, gateway, id, payload) = pending_delete();
        let (_tx, rx) = mpsc::unbounded_channel();
        let mut answers = AnswerLines { lines: rx };
        let (state_tx, mut state) = watch::channel(LoopState::AwaitingConfirmation);

        let expiry = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            state_tx.send_replace(LoopState::Running);
            state_tx
        });

        tokio::time::timeout(
            Duration::from_secs(5),
            answer_confirmation(&gateway, &payload, &mut answers, &mut state),
        )
        .await
        .expect("prompt should give up once the request is closed")
        .unwrap();
        drop(expiry.await.unwrap());

        assert_eq!(gateway.get(id).unwrap().state, ConfirmationState::Awaiting);
        assert!(temp.path().join("outputs/notes.txt").exists());
    }

    #[test]
    fn test_default_provider_ranked_first() {
        let mut config = Config::default_config();
        config.llm.default_provider = "ollama".to_string();

        let router = build_router(&config);
        let ranked = router.rank_providers();
        assert_eq!(ranked[0].name(), "ollama");
        assert_eq!(ranked.len(), 2);
    }
}
