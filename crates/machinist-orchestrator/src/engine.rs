use crate::config::EngineConfig;
use crate::scheduler::{SchedulerSnapshot, TaskScheduler};
use crate::swarm::{SwarmCoordinator, SwarmSummary};
use machinist_agents::{Agent, AgentRegistry};
use machinist_core::MachinistResult;
use machinist_hooks::{ConsensusFloorHook, Hook, HookBus, TracingHook, ALL_HOOKS, SWARM_CONSENSUS};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Everything the `session_list` action reports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sessions {
    #[serde(flatten)]
    pub scheduler: SchedulerSnapshot,
    pub swarms: Vec<SwarmSummary>,
}

/// An isolated orchestration engine: registry, hook bus, scheduler and swarm
/// coordinator wired together from one [`EngineConfig`].
///
/// Nothing is global; any number of engines can coexist in one process.
pub struct Engine {
    config: EngineConfig,
    registry: Arc<AgentRegistry>,
    hooks: Arc<HookBus>,
    scheduler: Arc<TaskScheduler>,
    swarms: SwarmCoordinator,
}

impl Engine {
    /// Create an engine with an empty registry.
    pub fn new(config: EngineConfig) -> MachinistResult<Self> {
        Self::with_registry(config, Arc::new(AgentRegistry::new()))
    }

    /// Create an engine around an existing registry.
    pub fn with_registry(config: EngineConfig, registry: Arc<AgentRegistry>) -> MachinistResult<Self> {
        config.validate()?;

        let hooks = Arc::new(HookBus::new(Duration::from_millis(config.hooks.timeout_ms)));
        if config.hooks.trace {
            hooks.register(ALL_HOOKS, Arc::new(TracingHook));
        }
        if let Some(floor) = config.hooks.consensus_floor {
            hooks.register(SWARM_CONSENSUS, Arc::new(ConsensusFloorHook::new(floor)));
        }

        let scheduler = Arc::new(TaskScheduler::new(
            Arc::clone(&registry),
            Arc::clone(&hooks),
            config.scheduler.clone(),
            config.registry.suggestion_limit,
        ));
        let swarms = SwarmCoordinator::new(
            Arc::clone(&scheduler),
            Arc::clone(&hooks),
            config.swarm.clone(),
        );

        info!(
            agents = registry.len(),
            max_concurrency = config.scheduler.max_concurrency,
            trace = config.hooks.trace,
            "Engine ready"
        );

        Ok(Self {
            config,
            registry,
            hooks,
            scheduler,
            swarms,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    pub fn hooks(&self) -> &Arc<HookBus> {
        &self.hooks
    }

    pub fn scheduler(&self) -> &Arc<TaskScheduler> {
        &self.scheduler
    }

    pub fn swarms(&self) -> &SwarmCoordinator {
        &self.swarms
    }

    pub fn register_agent(&self, agent: Arc<dyn Agent>) {
        self.registry.register(agent);
    }

    pub fn register_hook(&self, hook_name: impl Into<String>, hook: Arc<dyn Hook>) {
        self.hooks.register(hook_name, hook);
    }

    /// Plans, in-flight tasks, agents, metrics and retained swarms.
    pub async fn sessions(&self) -> Sessions {
        Sessions {
            scheduler: self.scheduler.sessions().await,
            swarms: self.swarms.summaries(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use machinist_agents::{AgentDescriptor, FnAgent};
    use serde_json::{json, Value};

    #[test]
    fn test_default_hooks() {
        let engine = Engine::new(EngineConfig::default()).unwrap();
        assert_eq!(engine.hooks().hook_count(SWARM_CONSENSUS), 1);

        let mut config = EngineConfig::default();
        config.hooks.trace = false;
        config.hooks.consensus_floor = Some(0.8);
        let engine = Engine::new(config).unwrap();
        assert_eq!(engine.hooks().hook_count(SWARM_CONSENSUS), 1);
        assert_eq!(engine.hooks().hook_count("task:timeout"), 0);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = EngineConfig::default();
        config.scheduler.max_concurrency = 0;
        assert!(Engine::new(config).is_err());
    }

    #[tokio::test]
    async fn test_engines_are_isolated() {
        let first = Engine::new(EngineConfig::default()).unwrap();
        let second = Engine::new(EngineConfig::default()).unwrap();
        first.register_agent(Arc::new(FnAgent::new(
            AgentDescriptor::new("echo", "Echo", "test"),
            |input: Value| async move { Ok(input) },
        )));
        assert_eq!(first.registry().len(), 1);
        assert!(second.registry().is_empty());

        let sessions = first.sessions().await;
        assert_eq!(sessions.scheduler.available_agents, vec!["echo"]);
        let value = serde_json::to_value(&sessions).unwrap();
        assert!(value.get("plans").is_some());
        assert_eq!(value["swarms"], json!([]));
    }
}
