//! Named, best-effort side channels fired at defined scheduling points.
//!
//! A hook never affects the primary result unless it deliberately returns a
//! verdict the caller honors (for example a consensus veto). Errors, panics and
//! slow hooks are contained by the [`HookBus`].
//!
//! # Extension points
//!
//! - [`TASK_TIMEOUT`]: a task exhausted its retry budget with every attempt timed out.
//! - [`SWARM_CONSENSUS`]: a consensus result was computed and is about to be returned.
//! - [`PLAN_COMPLETED`], [`SWARM_COMPLETED`]: telemetry after a plan or swarm finishes.

/// The hook bus and the types passed through it.
pub mod bus;
/// Hooks shipped with the engine.
pub mod builtin;

pub use bus::{Hook, HookAnnotation, HookBus, HookContext, HookReport, HookTarget, HookVerdict, HookVeto};
pub use builtin::{ConsensusFloorHook, TracingHook};

/// Fired once per task after every attempt timed out.
pub const TASK_TIMEOUT: &str = "task:timeout";
/// Fired once per consensus swarm, before the result is returned.
pub const SWARM_CONSENSUS: &str = "swarm:consensus";
/// Fired after a plan reaches a final status.
pub const PLAN_COMPLETED: &str = "plan:completed";
/// Fired after any swarm pattern finishes.
pub const SWARM_COMPLETED: &str = "swarm:completed";
/// Hooks registered under this name receive every extension point.
pub const ALL_HOOKS: &str = "*";
