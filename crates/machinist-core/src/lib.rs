//! Core types and error definitions for the Machinist orchestration engine.
//!
//! This crate provides the foundational types shared across all Machinist crates:
//! the unified error enum and a handful of JSON helpers used when agent outputs
//! are merged, compared, or addressed by field path.
//!
//! # Main types
//!
//! - [`MachinistError`]: Unified error enum for registry, scheduler, swarm and façade.
//! - [`MachinistResult`]: Convenience alias for `Result<T, MachinistError>`.
//! - [`json`]: Helpers for dotted-path lookup and object merging.

/// JSON helpers shared by the scheduler and the swarm coordinator.
pub mod json;

// --- Error types ---

/// Top-level error type for the Machinist engine.
///
/// Only structurally invalid requests are returned as errors by the scheduler and
/// coordinator. A task's final failure is recorded on its result instead.
#[derive(Debug, thiserror::Error)]
pub enum MachinistError {
    /// The requested agent id is not registered.
    #[error("Unknown agent: {id}")]
    UnknownAgent {
        /// The id that was looked up.
        id: String,
        /// Known ids close to the requested one.
        suggestions: Vec<String>,
    },

    /// The agent exists but is disabled in its descriptor.
    #[error("Agent disabled: {0}")]
    AgentDisabled(String),

    /// A malformed plan or swarm request. Carries every offending item.
    #[error("Validation error: {}", .0.join("; "))]
    Validation(Vec<String>),

    /// The agent's own computation failed or signalled failure.
    #[error("Agent failure: {0}")]
    AgentFailure(String),

    /// An attempt did not complete within its timeout.
    #[error("Timed out after {timeout_ms}ms")]
    Timeout {
        /// The per-attempt budget that was exceeded.
        timeout_ms: u64,
    },

    /// A swarm pattern could not produce an aggregate.
    #[error("Coordination failure: {0}")]
    Coordination(String),

    /// A plan, swarm, or other tracked object was not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// An error in configuration parsing or validation.
    #[error("Config error: {0}")]
    Config(String),

    /// A hook failed. Never escapes the hook bus.
    #[error("Hook error: {0}")]
    Hook(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MachinistError {
    /// Build a validation error from a single message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(vec![msg.into()])
    }

    /// Short machine-readable kind, used in dispatch envelopes and hook metadata.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UnknownAgent { .. } => "unknown_agent",
            Self::AgentDisabled(_) => "agent_disabled",
            Self::Validation(_) => "validation",
            Self::AgentFailure(_) => "agent_failure",
            Self::Timeout { .. } => "timeout",
            Self::Coordination(_) => "coordination",
            Self::NotFound(_) => "not_found",
            Self::Config(_) => "config",
            Self::Hook(_) => "hook",
            Self::Json(_) => "json",
            Self::Io(_) => "io",
        }
    }
}

/// A convenience `Result` alias using [`MachinistError`].
pub type MachinistResult<T> = Result<T, MachinistError>;
