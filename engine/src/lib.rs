//! Warden Engine Library
//!
//! This library provides the core functionality of the Warden engine: the
//! orchestration loop, the sandbox, the tool registry, the confirmation
//! gateway and the event stream. It is used by both the main binary and
//! integration tests.

/// Configuration management module
pub mod config;

/// Sandbox policy enforcement
pub mod sandbox;

/// Built-in tools and the tool registry
pub mod tools;

/// Confirmation handshake for destructive actions
pub mod confirmation;

/// Event stream publisher
pub mod events;

/// LLM provider abstraction layer
pub mod llm;

/// Reasoning client boundary
pub mod reasoning;

/// Agent loop core module
pub mod agent;

/// Telemetry and Observability
pub mod telemetry;

/// CLI interface module
pub mod cli;

/// Command handlers module
pub mod handlers;
