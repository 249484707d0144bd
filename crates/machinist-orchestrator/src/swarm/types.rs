use crate::types::{TaskResult, TaskStatus};
use chrono::{DateTime, Utc};
use machinist_core::{MachinistError, MachinistResult};
use machinist_hooks::bus::HookAnnotation;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

/// Coordination pattern of a swarm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwarmPattern {
    Parallel,
    Pipeline,
    #[serde(alias = "map-reduce", alias = "mapreduce")]
    MapReduce,
    Consensus,
    Hierarchical,
    Ensemble,
    Competition,
    Collaboration,
}

impl SwarmPattern {
    pub const ALL: [SwarmPattern; 8] = [
        SwarmPattern::Parallel,
        SwarmPattern::Pipeline,
        SwarmPattern::MapReduce,
        SwarmPattern::Consensus,
        SwarmPattern::Hierarchical,
        SwarmPattern::Ensemble,
        SwarmPattern::Competition,
        SwarmPattern::Collaboration,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SwarmPattern::Parallel => "parallel",
            SwarmPattern::Pipeline => "pipeline",
            SwarmPattern::MapReduce => "map_reduce",
            SwarmPattern::Consensus => "consensus",
            SwarmPattern::Hierarchical => "hierarchical",
            SwarmPattern::Ensemble => "ensemble",
            SwarmPattern::Competition => "competition",
            SwarmPattern::Collaboration => "collaboration",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            SwarmPattern::Parallel => "Every agent receives the same input concurrently; outputs are listed in agent order",
            SwarmPattern::Pipeline => "Agents run in order, each output merged into the next agent's input",
            SwarmPattern::MapReduce => "Input is partitioned across agents and the partial results are reduced",
            SwarmPattern::Consensus => "Agents vote on a value; agreement is the share of the largest group",
            SwarmPattern::Hierarchical => "Agents run in tiers; each tier's reduced result feeds the next tier",
            SwarmPattern::Ensemble => "Outputs are combined by weighted mean or weighted majority",
            SwarmPattern::Competition => "Outputs are scored and the best one wins",
            SwarmPattern::Collaboration => "Agents take turns refining a shared artifact until it stops changing",
        }
    }
}

impl fmt::Display for SwarmPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SwarmPattern {
    type Err = MachinistError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('-', "_");
        match normalized.as_str() {
            "mapreduce" => return Ok(SwarmPattern::MapReduce),
            other => {
                for pattern in SwarmPattern::ALL {
                    if pattern.as_str() == other {
                        return Ok(pattern);
                    }
                }
            }
        }
        Err(MachinistError::validation(format!(
            "unknown swarm pattern '{s}' (expected one of: {})",
            SwarmPattern::ALL.map(SwarmPattern::as_str).join(", ")
        )))
    }
}

/// Built-in ways of combining several outputs into one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reducer {
    /// Numbers are summed, arrays concatenated, objects merged; anything else collected.
    #[default]
    Auto,
    Collect,
    Sum,
    Mean,
    Min,
    Max,
    Concat,
    Merge,
}

/// Caller-supplied reducer. In-process only.
pub type ReduceFn = Arc<dyn Fn(&[Value]) -> MachinistResult<Value> + Send + Sync>;

/// Caller-supplied scorer for competitions. `None` makes an output ineligible.
pub type ScoreFn = Arc<dyn Fn(&Value) -> Option<f64> + Send + Sync>;

/// Ensemble weights, either per agent id or per position in the agent list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Weights {
    ByAgent(HashMap<String, f64>),
    ByPosition(Vec<f64>),
}

impl Weights {
    /// Weight of the agent at `index`. Unlisted agents weigh 1.
    pub fn weight(&self, index: usize, agent_id: &str) -> f64 {
        match self {
            Weights::ByAgent(map) => map.get(agent_id).copied().unwrap_or(1.0),
            Weights::ByPosition(list) => list.get(index).copied().unwrap_or(1.0),
        }
    }
}

/// Pattern-specific knobs. Every field is optional.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwarmOptions {
    #[serde(default)]
    pub consensus_threshold: Option<f64>,
    /// Dotted path of the value compared by consensus and ensemble.
    #[serde(default)]
    pub consensus_field: Option<String>,
    #[serde(default)]
    pub weights: Option<Weights>,
    #[serde(default)]
    pub reducer: Option<Reducer>,
    #[serde(default)]
    pub partition_field: Option<String>,
    /// Explicit hierarchical tiers of agent ids.
    #[serde(default)]
    pub tiers: Option<Vec<Vec<String>>>,
    #[serde(default)]
    pub tier_size: Option<usize>,
    #[serde(default)]
    pub score_field: Option<String>,
    #[serde(default)]
    pub max_rounds: Option<u32>,
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(skip)]
    pub custom_reducer: Option<ReduceFn>,
    #[serde(skip)]
    pub scorer: Option<ScoreFn>,
}

impl fmt::Debug for SwarmOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SwarmOptions")
            .field("consensus_threshold", &self.consensus_threshold)
            .field("consensus_field", &self.consensus_field)
            .field("weights", &self.weights)
            .field("reducer", &self.reducer)
            .field("partition_field", &self.partition_field)
            .field("tiers", &self.tiers)
            .field("tier_size", &self.tier_size)
            .field("score_field", &self.score_field)
            .field("max_rounds", &self.max_rounds)
            .field("max_retries", &self.max_retries)
            .field("custom_reducer", &self.custom_reducer.is_some())
            .field("scorer", &self.scorer.is_some())
            .finish()
    }
}

/// A request to run several agents under one coordination pattern.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwarmRequest {
    #[serde(default = "default_swarm_name")]
    pub name: String,
    pub pattern: SwarmPattern,
    #[serde(default)]
    pub agents: Vec<String>,
    #[serde(default)]
    pub input: Value,
    #[serde(default, alias = "timeout_ms")]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub options: SwarmOptions,
}

fn default_swarm_name() -> String {
    "swarm".to_string()
}

impl SwarmRequest {
    pub fn new(pattern: SwarmPattern, agents: Vec<&str>) -> Self {
        Self {
            name: default_swarm_name(),
            pattern,
            agents: agents.into_iter().map(String::from).collect(),
            input: Value::Null,
            timeout_ms: None,
            options: SwarmOptions::default(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_input(mut self, input: Value) -> Self {
        self.input = input;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn with_options(mut self, options: SwarmOptions) -> Self {
        self.options = options;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SwarmStatus {
    Completed,
    Partial,
    Failed,
}

/// Vote tally of a consensus swarm.
///
/// `value` is what the largest group agreed on, read from `consensusField`
/// when one is set. The swarm's aggregated output is different: it is the
/// full output of the first agreeing agent, so callers keep the fields that
/// were not voted on.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsensusOutcome {
    pub reached: bool,
    pub actual_agreement: f64,
    pub threshold: f64,
    /// The agreed value (the voted field, not the whole output).
    pub value: Value,
    pub agreeing: Vec<String>,
    /// Number of distinct values among successful outputs.
    pub groups: usize,
    #[serde(default)]
    pub annotations: Vec<HookAnnotation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vetoed_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub veto_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentScore {
    pub agent_id: String,
    pub score: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompetitionOutcome {
    pub winner: String,
    pub score: f64,
    pub runner_up: Option<String>,
    pub margin: Option<f64>,
    pub scores: Vec<AgentScore>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Converged,
    RoundLimit,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollaborationRound {
    pub round: u32,
    pub agent_id: String,
    pub status: TaskStatus,
    /// Whether this round replaced the artifact.
    pub changed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollaborationOutcome {
    pub rounds: u32,
    pub converged: bool,
    pub stop_reason: StopReason,
    pub history: Vec<CollaborationRound>,
}

/// Outcome of one swarm execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwarmResult {
    pub swarm_id: Uuid,
    pub name: String,
    pub pattern: SwarmPattern,
    pub status: SwarmStatus,
    pub duration_ms: u64,
    pub success_count: usize,
    pub fail_count: usize,
    pub aggregated_output: Option<Value>,
    /// Per-invocation results in execution order.
    pub agents: Vec<TaskResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consensus: Option<ConsensusOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub competition: Option<CompetitionOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collaboration: Option<CollaborationOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl SwarmResult {
    pub fn summary(&self) -> SwarmSummary {
        SwarmSummary {
            swarm_id: self.swarm_id,
            name: self.name.clone(),
            pattern: self.pattern,
            status: self.status,
            success_count: self.success_count,
            fail_count: self.fail_count,
            duration_ms: self.duration_ms,
            finished_at: self.finished_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwarmSummary {
    pub swarm_id: Uuid,
    pub name: String,
    pub pattern: SwarmPattern,
    pub status: SwarmStatus,
    pub success_count: usize,
    pub fail_count: usize,
    pub duration_ms: u64,
    pub finished_at: DateTime<Utc>,
}

/// Name and description of a pattern, as listed by `swarm_patterns`.
#[derive(Debug, Clone, Serialize)]
pub struct PatternInfo {
    pub name: &'static str,
    pub description: &'static str,
}
