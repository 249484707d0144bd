use super::aggregate::{group_values, partition, reduce, score_of, values_equal, voted_value, weighted_ensemble};
use super::types::{
    AgentScore, CollaborationOutcome, CollaborationRound, CompetitionOutcome, ConsensusOutcome,
    PatternInfo, StopReason, SwarmPattern, SwarmRequest, SwarmResult, SwarmStatus, SwarmSummary,
    Weights,
};
use crate::config::SwarmConfig;
use crate::monitor::TaskOrigin;
use crate::scheduler::{timeout_problem, TaskRun, TaskScheduler};
use crate::types::{Priority, TaskResult};
use chrono::Utc;
use machinist_agents::Agent;
use machinist_core::json::{merge, with_field};
use machinist_core::{MachinistError, MachinistResult};
use machinist_hooks::{HookBus, HookContext, SWARM_COMPLETED, SWARM_CONSENSUS};
use parking_lot::RwLock;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

/// Per-execution settings shared by every invocation of one swarm.
struct SwarmRun<'a> {
    swarm_id: Uuid,
    request: &'a SwarmRequest,
    agents: Vec<(String, Arc<dyn Agent>)>,
    timeout_ms: u64,
    max_retries: u32,
    threshold: f64,
}

/// What a pattern produced before status and counts are derived.
#[derive(Default)]
struct PatternOutcome {
    aggregate: Option<Value>,
    results: Vec<TaskResult>,
    consensus: Option<ConsensusOutcome>,
    competition: Option<CompetitionOutcome>,
    collaboration: Option<CollaborationOutcome>,
    error: Option<String>,
}

impl PatternOutcome {
    fn failed(results: Vec<TaskResult>, error: MachinistError) -> Self {
        Self {
            results,
            error: Some(error.to_string()),
            ..Self::default()
        }
    }
}

/// Runs groups of agents under one of the eight coordination patterns.
///
/// Every invocation goes through the [`TaskScheduler`], so swarms share its
/// concurrency bound, retry policy and queue counters.
pub struct SwarmCoordinator {
    scheduler: Arc<TaskScheduler>,
    hooks: Arc<HookBus>,
    config: SwarmConfig,
    history: RwLock<VecDeque<SwarmResult>>,
}

impl SwarmCoordinator {
    pub fn new(scheduler: Arc<TaskScheduler>, hooks: Arc<HookBus>, config: SwarmConfig) -> Self {
        Self {
            scheduler,
            hooks,
            config,
            history: RwLock::new(VecDeque::new()),
        }
    }

    /// Every pattern with a one-line description.
    pub fn patterns(&self) -> Vec<PatternInfo> {
        SwarmPattern::ALL
            .into_iter()
            .map(|p| PatternInfo {
                name: p.as_str(),
                description: p.description(),
            })
            .collect()
    }

    pub fn status(&self, swarm_id: Uuid) -> MachinistResult<SwarmResult> {
        self.history
            .read()
            .iter()
            .find(|r| r.swarm_id == swarm_id)
            .cloned()
            .ok_or_else(|| MachinistError::NotFound(format!("swarm {swarm_id}")))
    }

    /// Summaries of retained swarms, oldest first.
    pub fn summaries(&self) -> Vec<SwarmSummary> {
        self.history.read().iter().map(SwarmResult::summary).collect()
    }

    /// Run a swarm. Malformed requests are errors; anything that goes wrong
    /// while agents run is reported on the result.
    pub async fn execute(&self, request: SwarmRequest) -> MachinistResult<SwarmResult> {
        let run = self.prepare(&request)?;
        let started_at = Utc::now();
        let started = Instant::now();
        info!(
            swarm_id = %run.swarm_id,
            swarm = %request.name,
            pattern = %request.pattern,
            agents = run.agents.len(),
            "Executing swarm"
        );

        let outcome = match request.pattern {
            SwarmPattern::Parallel => self.parallel(&run).await,
            SwarmPattern::Pipeline => self.pipeline(&run).await,
            SwarmPattern::MapReduce => self.map_reduce(&run).await,
            SwarmPattern::Consensus => self.consensus(&run).await,
            SwarmPattern::Hierarchical => self.hierarchical(&run).await,
            SwarmPattern::Ensemble => self.ensemble(&run).await,
            SwarmPattern::Competition => self.competition(&run).await,
            SwarmPattern::Collaboration => self.collaboration(&run).await,
        };

        let success_count = outcome.results.iter().filter(|r| r.is_success()).count();
        let fail_count = outcome.results.len() - success_count;
        let status = match (&outcome.aggregate, fail_count) {
            (Some(_), 0) => SwarmStatus::Completed,
            (Some(_), _) => SwarmStatus::Partial,
            (None, _) => SwarmStatus::Failed,
        };
        let error = match status {
            SwarmStatus::Failed => Some(
                outcome
                    .error
                    .unwrap_or_else(|| "swarm produced no aggregate".to_string()),
            ),
            _ => outcome.error,
        };

        let result = SwarmResult {
            swarm_id: run.swarm_id,
            name: request.name.clone(),
            pattern: request.pattern,
            status,
            duration_ms: started.elapsed().as_millis() as u64,
            success_count,
            fail_count,
            aggregated_output: outcome.aggregate,
            agents: outcome.results,
            consensus: outcome.consensus,
            competition: outcome.competition,
            collaboration: outcome.collaboration,
            error,
            started_at,
            finished_at: Utc::now(),
        };

        match status {
            SwarmStatus::Failed => warn!(swarm_id = %result.swarm_id, pattern = %result.pattern, error = ?result.error, "Swarm failed"),
            _ => info!(swarm_id = %result.swarm_id, pattern = %result.pattern, status = ?status, success_count, fail_count, "Swarm finished"),
        }

        let ctx = HookContext::new(
            SWARM_COMPLETED,
            "swarm_execute",
            "swarm",
            result.swarm_id.to_string(),
            json!(result.summary()),
        );
        self.hooks.execute(SWARM_COMPLETED, ctx).await;

        self.retain(result.clone());
        Ok(result)
    }

    fn prepare<'a>(&self, request: &'a SwarmRequest) -> MachinistResult<SwarmRun<'a>> {
        let options = &request.options;
        let tiered = request.pattern == SwarmPattern::Hierarchical && options.tiers.is_some();
        let mut ids: Vec<&str> = request.agents.iter().map(String::as_str).collect();
        if tiered {
            if let Some(tiers) = &options.tiers {
                ids.extend(tiers.iter().flatten().map(String::as_str));
            }
        }

        let mut problems = Vec::new();
        if ids.is_empty() {
            problems.push("swarm requires at least one agent".to_string());
        }
        problems.extend(self.scheduler.agent_problems(ids.iter().copied()));
        let threshold = options
            .consensus_threshold
            .unwrap_or(self.config.consensus_threshold);
        if !(0.0..=1.0).contains(&threshold) {
            problems.push(format!("consensusThreshold must be within [0, 1], got {threshold}"));
        }
        problems.extend(timeout_problem("swarm", request.timeout_ms));
        if options.tier_size == Some(0) {
            problems.push("tierSize must be at least 1".to_string());
        }
        if options.max_rounds == Some(0) {
            problems.push("maxRounds must be at least 1".to_string());
        }
        if let Some(tiers) = &options.tiers {
            if tiers.iter().any(Vec::is_empty) {
                problems.push("tiers must not be empty".to_string());
            }
        }
        if let Some(weights) = &options.weights {
            let values: Vec<f64> = match weights {
                Weights::ByAgent(map) => map.values().copied().collect(),
                Weights::ByPosition(list) => list.clone(),
            };
            if values.iter().any(|w| *w < 0.0 || !w.is_finite()) {
                problems.push("weights must be finite and non-negative".to_string());
            }
        }
        if !problems.is_empty() {
            return Err(MachinistError::Validation(problems));
        }

        let mut agents = Vec::with_capacity(request.agents.len());
        for id in &request.agents {
            agents.push((id.clone(), self.scheduler.resolve(id)?));
        }

        Ok(SwarmRun {
            swarm_id: Uuid::new_v4(),
            request,
            agents,
            timeout_ms: request.timeout_ms.unwrap_or(self.config.default_timeout_ms),
            max_retries: options
                .max_retries
                .unwrap_or(self.scheduler.config().default_max_retries),
            threshold,
        })
    }

    fn retain(&self, result: SwarmResult) {
        let mut history = self.history.write();
        history.push_back(result);
        while history.len() > self.config.max_retained_swarms.max(1) {
            history.pop_front();
        }
    }

    fn task_run(&self, run: &SwarmRun<'_>, task_id: String, input: Value) -> TaskRun {
        TaskRun {
            task_id,
            input,
            priority: Priority::Normal,
            timeout_ms: run.timeout_ms,
            max_retries: run.max_retries,
            origin: TaskOrigin::Swarm(run.swarm_id),
        }
    }

    async fn invoke(&self, run: &SwarmRun<'_>, agent: &Arc<dyn Agent>, task_id: String, input: Value) -> TaskResult {
        self.scheduler
            .execute(Arc::clone(agent), self.task_run(run, task_id, input))
            .await
    }

    /// Run `agents` concurrently, one input each. Results keep agent order.
    async fn fan_out(
        &self,
        run: &SwarmRun<'_>,
        agents: &[(String, Arc<dyn Agent>)],
        inputs: Vec<Value>,
        label: &str,
    ) -> Vec<TaskResult> {
        let runs = agents
            .iter()
            .zip(inputs)
            .enumerate()
            .map(|(i, ((id, agent), input))| {
                (
                    Arc::clone(agent),
                    self.task_run(run, format!("{label}{}-{id}", i + 1), input),
                )
            })
            .collect();
        self.scheduler.execute_batch(runs).await
    }

    async fn broadcast(&self, run: &SwarmRun<'_>) -> Vec<TaskResult> {
        let inputs = vec![run.request.input.clone(); run.agents.len()];
        self.fan_out(run, &run.agents, inputs, "").await
    }

    async fn parallel(&self, run: &SwarmRun<'_>) -> PatternOutcome {
        let results = self.broadcast(run).await;
        if !results.iter().any(TaskResult::is_success) {
            return PatternOutcome::failed(
                results,
                MachinistError::Coordination("every agent failed".into()),
            );
        }
        let outputs = results
            .iter()
            .map(|r| r.output.clone().unwrap_or(Value::Null))
            .collect();
        PatternOutcome {
            aggregate: Some(Value::Array(outputs)),
            results,
            ..PatternOutcome::default()
        }
    }

    async fn pipeline(&self, run: &SwarmRun<'_>) -> PatternOutcome {
        let mut results = Vec::with_capacity(run.agents.len());
        let mut input = run.request.input.clone();
        let mut last = None;
        for (stage, (id, agent)) in run.agents.iter().enumerate() {
            let result = self
                .invoke(run, agent, format!("stage-{}-{id}", stage + 1), input.clone())
                .await;
            let output = result.output.clone();
            let error = result.error.clone();
            results.push(result);
            match output {
                Some(output) => {
                    input = merge(&input, &output);
                    last = Some(output);
                }
                None => {
                    return PatternOutcome::failed(
                        results,
                        MachinistError::Coordination(format!(
                            "stage {} ({id}) failed: {}",
                            stage + 1,
                            error.unwrap_or_default()
                        )),
                    );
                }
            }
        }
        PatternOutcome {
            aggregate: last,
            results,
            ..PatternOutcome::default()
        }
    }

    async fn map_reduce(&self, run: &SwarmRun<'_>) -> PatternOutcome {
        let options = &run.request.options;
        let inputs = match partition(
            &run.request.input,
            run.agents.len(),
            options.partition_field.as_deref(),
        ) {
            Ok(inputs) => inputs,
            Err(e) => return PatternOutcome::failed(Vec::new(), e),
        };
        let results = self.fan_out(run, &run.agents, inputs, "map-").await;
        let outputs: Vec<Value> = results.iter().filter_map(|r| r.output.clone()).collect();
        if outputs.is_empty() {
            return PatternOutcome::failed(
                results,
                MachinistError::Coordination("no partition produced a result".into()),
            );
        }
        match self.reduce_outputs(run, &outputs) {
            Ok(value) => PatternOutcome {
                aggregate: Some(value),
                results,
                ..PatternOutcome::default()
            },
            Err(e) => PatternOutcome::failed(results, e),
        }
    }

    fn reduce_outputs(&self, run: &SwarmRun<'_>, outputs: &[Value]) -> MachinistResult<Value> {
        let options = &run.request.options;
        match &options.custom_reducer {
            Some(custom) => custom(outputs),
            None => reduce(options.reducer.unwrap_or_default(), outputs),
        }
    }

    async fn consensus(&self, run: &SwarmRun<'_>) -> PatternOutcome {
        let results = self.broadcast(run).await;
        let field = run.request.options.consensus_field.as_deref();
        let voters: Vec<(&TaskResult, Value)> = results
            .iter()
            .filter_map(|r| r.output.as_ref().map(|out| (r, voted_value(out, field))))
            .collect();
        if voters.is_empty() {
            return PatternOutcome::failed(
                results,
                MachinistError::Coordination("no agent produced a result to vote on".into()),
            );
        }

        let values: Vec<Value> = voters.iter().map(|(_, v)| v.clone()).collect();
        let groups = group_values(&values);
        let mut largest = 0;
        for (index, (_, members)) in groups.iter().enumerate() {
            // strictly larger, so ties keep the first-seen group
            if members.len() > groups[largest].1.len() {
                largest = index;
            }
        }
        let (value, members) = &groups[largest];
        let agreement = members.len() as f64 / voters.len() as f64;
        let agreeing: Vec<String> = members.iter().map(|&i| voters[i].0.agent_id.clone()).collect();
        let aggregate = voters[members[0]].0.output.clone();

        let mut outcome = ConsensusOutcome {
            reached: agreement >= run.threshold,
            actual_agreement: agreement,
            threshold: run.threshold,
            value: value.clone(),
            agreeing,
            groups: groups.len(),
            annotations: Vec::new(),
            vetoed_by: None,
            veto_reason: None,
        };

        let ctx = HookContext::new(
            SWARM_CONSENSUS,
            "consensus",
            "swarm",
            run.swarm_id.to_string(),
            json!({
                "reached": outcome.reached,
                "actualAgreement": outcome.actual_agreement,
                "threshold": outcome.threshold,
                "value": outcome.value,
                "agreeing": outcome.agreeing,
                "groups": outcome.groups,
            }),
        )
        .with_metadata("swarm", json!(run.request.name));
        let report = self.hooks.execute(SWARM_CONSENSUS, ctx).await;
        outcome.annotations = report.annotations;
        if let Some(veto) = report.vetoes.into_iter().next() {
            info!(swarm_id = %run.swarm_id, hook = %veto.hook, reason = %veto.reason, "Consensus vetoed");
            outcome.reached = false;
            outcome.vetoed_by = Some(veto.hook);
            outcome.veto_reason = Some(veto.reason);
        }

        PatternOutcome {
            aggregate,
            results,
            consensus: Some(outcome),
            ..PatternOutcome::default()
        }
    }

    async fn hierarchical(&self, run: &SwarmRun<'_>) -> PatternOutcome {
        let tiers = match self.tiers(run) {
            Ok(tiers) => tiers,
            Err(e) => return PatternOutcome::failed(Vec::new(), e),
        };
        let mut results = Vec::new();
        let mut carried: Option<Value> = None;

        for (index, tier) in tiers.iter().enumerate() {
            let input = match &carried {
                None => run.request.input.clone(),
                Some(previous) => {
                    let with_previous = with_field(&run.request.input, "previous_tier", previous.clone());
                    with_field(&with_previous, "tier", json!(index))
                }
            };
            let inputs = vec![input; tier.len()];
            let tier_results = self
                .fan_out(run, tier, inputs, &format!("tier{}-", index + 1))
                .await;
            let outputs: Vec<Value> = tier_results.iter().filter_map(|r| r.output.clone()).collect();
            results.extend(tier_results);

            if outputs.is_empty() {
                return PatternOutcome::failed(
                    results,
                    MachinistError::Coordination(format!("tier {} produced no results", index + 1)),
                );
            }
            match self.reduce_outputs(run, &outputs) {
                Ok(value) => carried = Some(value),
                Err(e) => return PatternOutcome::failed(results, e),
            }
        }

        PatternOutcome {
            aggregate: carried,
            results,
            ..PatternOutcome::default()
        }
    }

    /// Explicit tiers, or declaration-order groups of `tierSize`
    /// (default half the agents, rounded up).
    fn tiers(&self, run: &SwarmRun<'_>) -> MachinistResult<Vec<Vec<(String, Arc<dyn Agent>)>>> {
        let options = &run.request.options;
        if let Some(explicit) = &options.tiers {
            return explicit
                .iter()
                .map(|tier| {
                    tier.iter()
                        .map(|id| self.scheduler.resolve(id).map(|agent| (id.clone(), agent)))
                        .collect::<MachinistResult<Vec<_>>>()
                })
                .collect();
        }
        let size = options
            .tier_size
            .unwrap_or_else(|| run.agents.len().div_ceil(2))
            .max(1);
        Ok(run.agents.chunks(size).map(<[_]>::to_vec).collect())
    }

    async fn ensemble(&self, run: &SwarmRun<'_>) -> PatternOutcome {
        let results = self.broadcast(run).await;
        let options = &run.request.options;
        let field = options.consensus_field.as_deref();
        let votes: Vec<(Value, f64)> = results
            .iter()
            .enumerate()
            .filter_map(|(index, r)| {
                let weight = options
                    .weights
                    .as_ref()
                    .map_or(1.0, |w| w.weight(index, &r.agent_id));
                r.output.as_ref().map(|out| (voted_value(out, field), weight))
            })
            .collect();
        match weighted_ensemble(&votes) {
            Some(value) => PatternOutcome {
                aggregate: Some(value),
                results,
                ..PatternOutcome::default()
            },
            None => PatternOutcome::failed(
                results,
                MachinistError::Coordination("no agent produced a result to combine".into()),
            ),
        }
    }

    async fn competition(&self, run: &SwarmRun<'_>) -> PatternOutcome {
        let results = self.broadcast(run).await;
        let options = &run.request.options;

        let scores: Vec<AgentScore> = results
            .iter()
            .filter(|r| r.is_success())
            .map(|r| AgentScore {
                agent_id: r.agent_id.clone(),
                score: r.output.as_ref().and_then(|out| score_of(out, options)),
            })
            .collect();

        let mut ranked: Vec<(usize, f64)> = results
            .iter()
            .enumerate()
            .filter_map(|(i, r)| r.output.as_ref().and_then(|out| score_of(out, options)).map(|s| (i, s)))
            .collect();
        // stable sort: ties keep declaration order
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));

        let Some(&(winner_index, winner_score)) = ranked.first() else {
            return PatternOutcome::failed(
                results,
                MachinistError::Coordination("no output carried a score".into()),
            );
        };
        let runner_up = ranked.get(1).copied();
        let outcome = CompetitionOutcome {
            winner: results[winner_index].agent_id.clone(),
            score: winner_score,
            runner_up: runner_up.map(|(i, _)| results[i].agent_id.clone()),
            margin: runner_up.map(|(_, s)| winner_score - s),
            scores,
        };
        PatternOutcome {
            aggregate: results[winner_index].output.clone(),
            results,
            competition: Some(outcome),
            ..PatternOutcome::default()
        }
    }

    async fn collaboration(&self, run: &SwarmRun<'_>) -> PatternOutcome {
        let max_rounds = run
            .request
            .options
            .max_rounds
            .unwrap_or(run.agents.len() as u32)
            .max(1);
        let mut results = Vec::new();
        let mut history = Vec::new();
        let mut artifact: Option<Value> = None;
        let mut converged = false;
        let mut rounds = 0;

        for round in 1..=max_rounds {
            rounds = round;
            let (id, agent) = &run.agents[(round as usize - 1) % run.agents.len()];
            let input = if round == 1 {
                run.request.input.clone()
            } else {
                json!({
                    "input": run.request.input,
                    "artifact": artifact.clone().unwrap_or(Value::Null),
                    "round": round,
                })
            };
            let result = self.invoke(run, agent, format!("round-{round}-{id}"), input).await;
            let status = result.status;
            let output = result.output.clone();
            results.push(result);

            let mut changed = false;
            if let Some(output) = output {
                match &artifact {
                    Some(current) if values_equal(current, &output) => converged = true,
                    _ => {
                        artifact = Some(output);
                        changed = true;
                    }
                }
            }
            history.push(CollaborationRound {
                round,
                agent_id: id.clone(),
                status,
                changed,
            });
            if converged {
                break;
            }
        }

        let outcome = CollaborationOutcome {
            rounds,
            converged,
            stop_reason: if converged {
                StopReason::Converged
            } else {
                StopReason::RoundLimit
            },
            history,
        };
        let error = artifact
            .is_none()
            .then(|| MachinistError::Coordination("no round produced an artifact".into()).to_string());
        PatternOutcome {
            aggregate: artifact,
            results,
            collaboration: Some(outcome),
            error,
            ..PatternOutcome::default()
        }
    }
}
