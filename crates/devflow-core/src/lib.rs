//! Devflow Core: transport-agnostic coordination logic for multi-phase
//! development pipelines.
//!
//! This crate contains the decision-making core of the pipeline: which phase
//! a workflow is in, which queued tasks may run, whether to pause for human
//! approval, and whether a failed attempt deserves an informed retry. It has
//! **no HTTP framework dependency**, making it suitable for use in:
//!
//! - HTTP servers
//! - Desktop apps (direct IPC)
//! - CLI tools
//!
//! The actual content generation (code, designs, tests) is an external
//! collaborator behind the [`generator::Generator`] trait; this crate only
//! sequences, pauses, and retries the work.

pub mod db;
pub mod error;
pub mod generator;
pub mod machine;
pub mod models;
pub mod orchestrator;
pub mod reflexion;
pub mod scheduler;
pub mod store;

// Convenience re-exports
pub use db::Database;
pub use error::CoreError;
pub use machine::{TransitionRule, WorkflowStateMachine};
pub use orchestrator::{DualModeOrchestrator, ExecutionMode, ExecutionResult, ExecutionStatus};
pub use reflexion::ReflexionEngine;
pub use scheduler::TaskScheduler;
pub use store::WorkflowStore;
