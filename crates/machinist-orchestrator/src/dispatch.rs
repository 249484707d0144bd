use crate::engine::Engine;
use crate::swarm::{SwarmPattern, SwarmRequest};
use crate::types::{PlanMode, TaskOptions, TaskSpec};
use futures_util::FutureExt;
use machinist_core::{MachinistError, MachinistResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::str::FromStr;
use tracing::{debug, error, warn};
use uuid::Uuid;

/// Every action accepted by [`Engine::dispatch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    AgentExecute,
    AgentParallel,
    AgentPipeline,
    PlanCreate,
    PlanExecute,
    PlanStatus,
    QueueStats,
    SessionList,
    SwarmExecute,
    SwarmParallel,
    SwarmConsensus,
    SwarmPipeline,
    SwarmStatus,
    SwarmPatterns,
}

/// Action names in the order they are documented.
pub const ACTIONS: [&str; 14] = [
    "agent_execute",
    "agent_parallel",
    "agent_pipeline",
    "plan_create",
    "plan_execute",
    "plan_status",
    "queue_stats",
    "session_list",
    "swarm_execute",
    "swarm_parallel",
    "swarm_consensus",
    "swarm_pipeline",
    "swarm_status",
    "swarm_patterns",
];

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::AgentExecute => "agent_execute",
            Action::AgentParallel => "agent_parallel",
            Action::AgentPipeline => "agent_pipeline",
            Action::PlanCreate => "plan_create",
            Action::PlanExecute => "plan_execute",
            Action::PlanStatus => "plan_status",
            Action::QueueStats => "queue_stats",
            Action::SessionList => "session_list",
            Action::SwarmExecute => "swarm_execute",
            Action::SwarmParallel => "swarm_parallel",
            Action::SwarmConsensus => "swarm_consensus",
            Action::SwarmPipeline => "swarm_pipeline",
            Action::SwarmStatus => "swarm_status",
            Action::SwarmPatterns => "swarm_patterns",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let action = match s {
            "agent_execute" => Action::AgentExecute,
            "agent_parallel" => Action::AgentParallel,
            "agent_pipeline" => Action::AgentPipeline,
            "plan_create" => Action::PlanCreate,
            "plan_execute" => Action::PlanExecute,
            "plan_status" => Action::PlanStatus,
            "queue_stats" => Action::QueueStats,
            "session_list" => Action::SessionList,
            "swarm_execute" => Action::SwarmExecute,
            "swarm_parallel" => Action::SwarmParallel,
            "swarm_consensus" => Action::SwarmConsensus,
            "swarm_pipeline" => Action::SwarmPipeline,
            "swarm_status" => Action::SwarmStatus,
            "swarm_patterns" => Action::SwarmPatterns,
            other => return Err(format!("Unknown action: {other}")),
        };
        Ok(action)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AgentExecuteParams {
    #[serde(alias = "agent_id")]
    agent_id: String,
    #[serde(default)]
    input: Value,
    #[serde(flatten)]
    options: TaskOptions,
}

#[derive(Debug, Deserialize)]
struct TasksParams {
    tasks: Vec<TaskSpec>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AgentPipelineParams {
    agents: Vec<String>,
    #[serde(default)]
    input: Value,
    #[serde(default)]
    name: Option<String>,
    #[serde(flatten)]
    options: TaskOptions,
}

#[derive(Debug, Deserialize)]
struct PlanCreateParams {
    #[serde(default = "default_plan_name")]
    name: String,
    #[serde(default)]
    mode: PlanMode,
    tasks: Vec<TaskSpec>,
}

fn default_plan_name() -> String {
    "plan".to_string()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlanIdParams {
    #[serde(alias = "plan_id", alias = "id")]
    plan_id: Uuid,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SwarmIdParams {
    #[serde(alias = "swarm_id", alias = "id")]
    swarm_id: Uuid,
}

fn parse<T: DeserializeOwned>(params: Value) -> MachinistResult<T> {
    let params = if params.is_null() {
        Value::Object(Map::new())
    } else {
        params
    };
    serde_json::from_value(params)
        .map_err(|e| MachinistError::validation(format!("invalid params: {e}")))
}

fn to_json<T: Serialize>(value: &T) -> MachinistResult<Value> {
    Ok(serde_json::to_value(value)?)
}

/// `{error, action, kind}` plus the details a caller needs to recover.
pub fn error_envelope(action: &str, err: &MachinistError) -> Value {
    let mut envelope = json!({
        "error": err.to_string(),
        "action": action,
        "kind": err.kind(),
    });
    match err {
        MachinistError::UnknownAgent { suggestions, .. } => {
            envelope["suggestions"] = json!(suggestions);
        }
        MachinistError::Validation(errors) => {
            envelope["errors"] = json!(errors);
        }
        _ => {}
    }
    envelope
}

impl Engine {
    /// Route a named action with JSON parameters.
    ///
    /// Never fails and never panics: errors, unknown actions and panics inside
    /// the engine all come back as an error envelope.
    pub async fn dispatch(&self, action: &str, params: Value) -> Value {
        let parsed = match action.parse::<Action>() {
            Ok(parsed) => parsed,
            Err(message) => {
                warn!(action, "Unknown action");
                return json!({
                    "error": message,
                    "action": action,
                    "kind": "unknown_action",
                    "validActions": ACTIONS,
                });
            }
        };

        debug!(action, "Dispatching");
        match AssertUnwindSafe(self.route(parsed, params)).catch_unwind().await {
            Ok(Ok(value)) => value,
            Ok(Err(e)) => {
                warn!(action, error = %e, "Action failed");
                error_envelope(action, &e)
            }
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                error!(action, panic = %message, "Action panicked");
                json!({
                    "error": format!("Internal error: {message}"),
                    "action": action,
                    "kind": "internal",
                })
            }
        }
    }

    async fn route(&self, action: Action, params: Value) -> MachinistResult<Value> {
        let scheduler = self.scheduler();
        match action {
            Action::AgentExecute => {
                let p: AgentExecuteParams = parse(params)?;
                to_json(&scheduler.run_task(&p.agent_id, p.input, p.options).await?)
            }
            Action::AgentParallel => {
                let p: TasksParams = parse(params)?;
                to_json(&scheduler.run_agents_parallel(p.tasks).await?)
            }
            Action::AgentPipeline => {
                let p: AgentPipelineParams = parse(params)?;
                let specs = p
                    .agents
                    .iter()
                    .enumerate()
                    .map(|(i, agent)| {
                        let spec = TaskSpec::new(agent.as_str(), p.input.clone())
                            .with_id(format!("step-{}", i + 1))
                            .with_options(p.options.clone());
                        if i == 0 {
                            return spec;
                        }
                        let previous = format!("step-{i}");
                        spec.with_dependencies(vec![previous.as_str()])
                    })
                    .collect();
                let name = p.name.unwrap_or_else(|| "agent_pipeline".to_string());
                let plan = scheduler.create_plan(name, PlanMode::Pipeline, specs).await?;
                to_json(&scheduler.execute_plan(plan.id).await?)
            }
            Action::PlanCreate => {
                let p: PlanCreateParams = parse(params)?;
                to_json(&scheduler.create_plan(p.name, p.mode, p.tasks).await?)
            }
            Action::PlanExecute => {
                let p: PlanIdParams = parse(params)?;
                to_json(&scheduler.execute_plan(p.plan_id).await?)
            }
            Action::PlanStatus => {
                let p: PlanIdParams = parse(params)?;
                to_json(&scheduler.plan(p.plan_id).await?)
            }
            Action::QueueStats => to_json(&scheduler.queue_stats()),
            Action::SessionList => to_json(&self.sessions().await),
            Action::SwarmExecute => {
                let request: SwarmRequest = parse(params)?;
                to_json(&self.swarms().execute(request).await?)
            }
            Action::SwarmParallel => self.swarm_with(SwarmPattern::Parallel, params).await,
            Action::SwarmConsensus => self.swarm_with(SwarmPattern::Consensus, params).await,
            Action::SwarmPipeline => self.swarm_with(SwarmPattern::Pipeline, params).await,
            Action::SwarmStatus => {
                let p: SwarmIdParams = parse(params)?;
                to_json(&self.swarms().status(p.swarm_id)?)
            }
            Action::SwarmPatterns => to_json(&self.swarms().patterns()),
        }
    }

    async fn swarm_with(&self, pattern: SwarmPattern, params: Value) -> MachinistResult<Value> {
        let mut params = match params {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                return Err(MachinistError::validation(format!(
                    "params must be an object, got {other}"
                )))
            }
        };
        params.insert("pattern".to_string(), json!(pattern));
        let request: SwarmRequest = parse(Value::Object(params))?;
        to_json(&self.swarms().execute(request).await?)
    }
}
