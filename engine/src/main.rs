// Warden agent engine
// Main entry point for the warden binary

use clap::Parser;
use warden_engine::cli::{CheckTarget, Cli, Command};
use warden_engine::config::Config;
use warden_engine::handlers::{
    handle_check_command, handle_check_path, handle_doctor, handle_run, handle_tools, OutputFormat,
};
use warden_engine::telemetry::init_telemetry_with_level;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Determine output format
    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    };

    // Load configuration (or use custom path if provided)
    let config = if let Some(config_path) = &cli.config {
        Config::load_from_path(config_path)?
    } else {
        Config::load_or_create()?
    };

    // --log beats the configured level; RUST_LOG beats both
    init_telemetry_with_level(cli.log.as_deref().unwrap_or(&config.core.log_level));

    let version = env!("CARGO_PKG_VERSION");
    let commit = env!("GIT_COMMIT_HASH");
    let timestamp = env!("BUILD_TIMESTAMP");

    tracing::info!("Warden Engine v{} ({} - {})", version, commit, timestamp);

    // Handle commands
    match cli.command {
        Command::Run {
            instruction,
            max_steps,
            sandbox,
        } => {
            let config = match sandbox {
                Some(dir) => {
                    // Relative to where the user is, not to the project root
                    let dir = if dir.is_absolute() {
                        dir
                    } else {
                        std::env::current_dir()?.join(dir)
                    };
                    config.with_sandbox_root(dir)?
                }
                None => config,
            };

            tracing::info!("Executing instruction: {}", instruction);
            handle_run(instruction, max_steps, &config, format).await
        }

        Command::Tools => handle_tools(&config, format).await,

        Command::Check { target } => match target {
            CheckTarget::Path { path } => handle_check_path(path, &config, format).await,
            CheckTarget::Command { line } => handle_check_command(line, &config, format).await,
        },

        Command::Doctor => {
            tracing::info!("Running diagnostics...");
            handle_doctor(&config, format).await
        }
    }
}
