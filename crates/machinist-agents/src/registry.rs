use crate::agent::{Agent, AgentDescriptor};
use machinist_core::MachinistError;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Central directory of every registered agent.
///
/// Append/replace only. Lookups take a shared read lock, so many concurrent
/// tasks can resolve agents while registration stays possible.
pub struct AgentRegistry {
    agents: RwLock<HashMap<String, Arc<dyn Agent>>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self {
            agents: RwLock::new(HashMap::new()),
        }
    }

    /// Register an agent, replacing any previous agent with the same id.
    pub fn register(&self, agent: Arc<dyn Agent>) {
        let id = agent.descriptor().id.clone();
        let category = agent.descriptor().category.clone();
        let replaced = self.agents.write().insert(id.clone(), agent).is_some();
        info!(agent = %id, category = %category, replaced, "Registered agent");
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Agent>> {
        self.agents.read().get(id).cloned()
    }

    pub fn descriptor(&self, id: &str) -> Option<AgentDescriptor> {
        self.agents.read().get(id).map(|a| a.descriptor().clone())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.agents.read().contains_key(id)
    }

    /// All descriptors, sorted by id.
    pub fn all(&self) -> Vec<AgentDescriptor> {
        let mut all: Vec<AgentDescriptor> = self
            .agents
            .read()
            .values()
            .map(|a| a.descriptor().clone())
            .collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    /// Ids of agents that are enabled and not offline, sorted.
    pub fn available_ids(&self) -> Vec<String> {
        self.all()
            .into_iter()
            .filter(AgentDescriptor::is_schedulable)
            .map(|d| d.id)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.agents.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.read().is_empty()
    }

    /// Suggest up to `limit` known ids for a missed lookup.
    ///
    /// Ids sharing a longer common prefix with `id`, or containing it, rank
    /// first; the rest follow alphabetically.
    pub fn suggest(&self, id: &str, limit: usize) -> Vec<String> {
        let needle = id.to_lowercase();
        let mut ranked: Vec<(usize, String)> = self
            .agents
            .read()
            .keys()
            .map(|known| {
                let lower = known.to_lowercase();
                let prefix = lower
                    .chars()
                    .zip(needle.chars())
                    .take_while(|(a, b)| a == b)
                    .count();
                let contains = !needle.is_empty()
                    && (lower.contains(&needle) || needle.contains(&lower));
                let score = prefix + if contains { needle.len() } else { 0 };
                (score, known.clone())
            })
            .collect();
        ranked.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
        ranked.into_iter().take(limit).map(|(_, id)| id).collect()
    }

    /// Resolve an id, converting a miss into [`MachinistError::UnknownAgent`].
    pub fn resolve(&self, id: &str, suggestion_limit: usize) -> Result<Arc<dyn Agent>, MachinistError> {
        self.get(id).ok_or_else(|| MachinistError::UnknownAgent {
            id: id.to_string(),
            suggestions: self.suggest(id, suggestion_limit),
        })
    }

    /// Every id in `ids` that is not registered, in input order, deduplicated.
    pub fn missing<'a>(&self, ids: impl IntoIterator<Item = &'a str>) -> Vec<String> {
        let agents = self.agents.read();
        let mut missing: Vec<String> = Vec::new();
        for id in ids {
            if !agents.contains_key(id) && !missing.iter().any(|m| m == id) {
                missing.push(id.to_string());
            }
        }
        missing
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::agent::FnAgent;
    use serde_json::{json, Value};

    fn agent(id: &str) -> Arc<dyn Agent> {
        Arc::new(FnAgent::new(
            AgentDescriptor::new(id, id, "test"),
            |_input: Value| async { Ok(json!(null)) },
        ))
    }

    #[test]
    fn test_register_and_get() {
        let registry = AgentRegistry::new();
        assert!(registry.is_empty());
        registry.register(agent("thermal_model"));
        assert_eq!(registry.len(), 1);
        assert!(registry.get("thermal_model").is_some());
        assert!(registry.get("nope").is_none());
    }

    #[test]
    fn test_register_replaces() {
        let registry = AgentRegistry::new();
        registry.register(agent("tool_wear"));
        registry.register(Arc::new(FnAgent::new(
            AgentDescriptor::new("tool_wear", "Tool wear v2", "wear"),
            |_input: Value| async { Ok(json!(null)) },
        )));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.descriptor("tool_wear").unwrap().name, "Tool wear v2");
    }

    #[test]
    fn test_all_sorted_and_available() {
        let registry = AgentRegistry::new();
        registry.register(agent("b"));
        registry.register(agent("a"));
        registry.register(Arc::new(FnAgent::new(
            AgentDescriptor::new("c", "c", "test").disabled(),
            |_input: Value| async { Ok(json!(null)) },
        )));
        let ids: Vec<String> = registry.all().into_iter().map(|d| d.id).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(registry.available_ids(), vec!["a", "b"]);
    }

    #[test]
    fn test_suggest_ranks_close_ids_first() {
        let registry = AgentRegistry::new();
        for id in ["cutting_force", "cutting_speed", "material_lookup", "thermal_model"] {
            registry.register(agent(id));
        }
        let suggestions = registry.suggest("cutting_forc", 2);
        assert_eq!(suggestions, vec!["cutting_force", "cutting_speed"]);
        assert_eq!(registry.suggest("zzz", 10).len(), 4);
    }

    #[test]
    fn test_resolve_unknown_carries_suggestions() {
        let registry = AgentRegistry::new();
        registry.register(agent("stability_lobe"));
        match registry.resolve("stability", 10) {
            Err(MachinistError::UnknownAgent { id, suggestions }) => {
                assert_eq!(id, "stability");
                assert_eq!(suggestions, vec!["stability_lobe"]);
            }
            other => panic!("expected UnknownAgent, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_missing_collects_all() {
        let registry = AgentRegistry::new();
        registry.register(agent("a"));
        assert_eq!(
            registry.missing(["a", "x", "y", "x"]),
            vec!["x".to_string(), "y".to_string()]
        );
    }
}
