//! Multi-agent coordination patterns layered on the task scheduler.

/// Reducers, partitioning, grouping and scoring of agent outputs.
pub mod aggregate;
/// The [`SwarmCoordinator`] and the pattern implementations.
pub mod coordinator;
/// Requests, options and results of swarm executions.
pub mod types;

pub use coordinator::SwarmCoordinator;
pub use types::{
    AgentScore, CollaborationOutcome, CollaborationRound, CompetitionOutcome, ConsensusOutcome,
    PatternInfo, ReduceFn, Reducer, ScoreFn, StopReason, SwarmOptions, SwarmPattern, SwarmRequest,
    SwarmResult, SwarmStatus, SwarmSummary, Weights,
};
