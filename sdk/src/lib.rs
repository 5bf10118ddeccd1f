//! Warden SDK
//!
//! Shared library providing the error taxonomy and the tool wire contract.
//! This crate is used by the engine and by anything that implements a tool
//! for it.

/// Error types and handling
pub mod errors;

/// Tool output wire contract
pub mod types;

// Re-export commonly used types
pub use errors::{EngineError, SandboxViolation, WardenErrorExt};
pub use types::{ToolError, ToolOutcome, CONFIRM_DELETE_PREFIX, ERROR_PREFIX};
