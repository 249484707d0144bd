//! Orchestration engine: task scheduling, plan execution and swarm coordination.
//!
//! Agents are invoked through the [`TaskScheduler`], which applies per-attempt
//! timeouts, retries with backoff and a global concurrency bound. Plans group
//! tasks under a sequential, parallel or pipeline mode. The [`SwarmCoordinator`]
//! combines several agents under one of eight coordination patterns. The
//! [`Engine`] wires everything together and exposes the JSON action façade.
//!
//! # Main types
//!
//! - [`Engine`]: Owns the registry, hook bus, scheduler and coordinator.
//! - [`TaskScheduler`]: Timeouts, retries, concurrency, plans and queue stats.
//! - [`SwarmCoordinator`]: Parallel, pipeline, map-reduce, consensus, hierarchical,
//!   ensemble, competition and collaboration patterns.
//! - [`EngineConfig`]: TOML-backed configuration with defaults.

/// Engine configuration and retry policy.
pub mod config;
/// The JSON action façade.
pub mod dispatch;
/// The engine that wires all components together.
pub mod engine;
/// Queue counters, in-flight tasks and per-agent metrics.
pub mod monitor;
/// Plan creation and execution.
pub mod plan;
/// Task execution with timeouts, retries and bounded concurrency.
pub mod scheduler;
/// Multi-agent coordination patterns.
pub mod swarm;
/// Dependency graph of plan tasks.
pub mod task_graph;
/// Tasks, plans and their results.
pub mod types;

pub use config::{EngineConfig, HookConfig, RegistryConfig, RetryPolicy, SchedulerConfig, SwarmConfig};
pub use dispatch::{error_envelope, Action, ACTIONS};
pub use engine::{Engine, Sessions};
pub use monitor::{ActiveTask, AgentMetrics, QueueMonitor, QueueStats, TaskOrigin};
pub use scheduler::{SchedulerSnapshot, TaskScheduler};
pub use swarm::{
    ConsensusOutcome, Reducer, SwarmCoordinator, SwarmOptions, SwarmPattern, SwarmRequest,
    SwarmResult, SwarmStatus,
};
pub use task_graph::TaskGraph;
pub use types::{
    ParallelReport, Plan, PlanMode, PlanStatus, PlanSummary, Priority, Task, TaskOptions,
    TaskResult, TaskSpec, TaskStatus,
};
