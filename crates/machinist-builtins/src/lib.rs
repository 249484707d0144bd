//! Reference agents for the Machinist orchestration engine.
//!
//! Closed-form machining formulas and a small material table, enough to drive
//! plans and swarms from the CLI without external services.
//!
//! # Main entry points
//!
//! - [`register_builtins()`]: Register every reference agent.
//! - [`builtin_agents()`]: The same agents, unregistered.

/// Cutting speed, spindle speed, feed, removal rate and tool life.
pub mod formulas;
/// Material table, lookup and Kienzle cutting force.
pub mod materials;
mod params;

pub use formulas::{
    CuttingSpeedAgent, FeedRateAgent, MaterialRemovalRateAgent, SpindleSpeedAgent, ToolLifeAgent,
};
pub use materials::{find_material, CuttingForceAgent, Material, MaterialLookupAgent, MATERIALS};

use machinist_agents::{Agent, AgentRegistry};
use std::sync::Arc;
use tracing::info;

/// Every reference agent, in registration order.
pub fn builtin_agents() -> Vec<Arc<dyn Agent>> {
    vec![
        Arc::new(CuttingSpeedAgent::new()),
        Arc::new(SpindleSpeedAgent::new()),
        Arc::new(FeedRateAgent::new()),
        Arc::new(MaterialRemovalRateAgent::new()),
        Arc::new(ToolLifeAgent::new()),
        Arc::new(MaterialLookupAgent::new()),
        Arc::new(CuttingForceAgent::new()),
    ]
}

/// Register all reference agents into the given registry.
pub fn register_builtins(registry: &AgentRegistry) {
    let agents = builtin_agents();
    let count = agents.len();
    for agent in agents {
        registry.register(agent);
    }
    info!(count, "Registered builtin agents");
}
