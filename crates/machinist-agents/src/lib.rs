//! Agent abstraction and registry.
//!
//! Every numerical model, data lookup, or report generator is exposed to the
//! engine as an [`Agent`] with a uniform JSON input/output contract, and looked
//! up by id through the [`AgentRegistry`].

/// The [`Agent`] trait, descriptors, and the closure adapter.
pub mod agent;
/// Thread-safe directory of registered agents.
pub mod registry;

pub use agent::{failure_signal, Agent, AgentDescriptor, AgentStatus, FnAgent};
pub use registry::AgentRegistry;
