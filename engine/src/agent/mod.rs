//! Agent loop
//!
//! Drives one instruction through the think-act-observe cycle and records
//! every step in an append-only trajectory.

pub mod core;
pub mod trajectory;

pub use core::{
    AbortReason, AgentSettings, LoopState, Orchestrator, Run, RunOutcome, RunReport,
};
pub use trajectory::{Step, StepAction, Trajectory};
