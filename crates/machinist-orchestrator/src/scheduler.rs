use crate::config::SchedulerConfig;
use crate::monitor::{ActiveTask, AgentMetrics, QueueMonitor, QueueStats, TaskOrigin};
use crate::types::{ParallelReport, Plan, PlanSummary, Priority, TaskOptions, TaskResult, TaskSpec, TaskStatus};
use chrono::Utc;
use futures_util::future::join_all;
use machinist_agents::{failure_signal, Agent, AgentRegistry};
use machinist_core::{MachinistError, MachinistResult};
use machinist_hooks::{HookBus, HookContext, TASK_TIMEOUT};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{RwLock, Semaphore};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Everything needed to run one task against an already resolved agent.
#[derive(Debug, Clone)]
pub(crate) struct TaskRun {
    pub task_id: String,
    pub input: Value,
    pub priority: Priority,
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub origin: TaskOrigin,
}

/// Why a single attempt did not produce an output.
enum AttemptError {
    TimedOut,
    Failed(String),
}

/// Point-in-time view of the scheduler for session listings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSnapshot {
    pub plans: Vec<PlanSummary>,
    pub active_tasks: Vec<ActiveTask>,
    pub available_agents: Vec<String>,
    pub agent_metrics: BTreeMap<String, AgentMetrics>,
    pub queue: QueueStats,
}

/// Runs agent invocations with timeouts, retries and bounded concurrency, and
/// owns the plans created through it.
///
/// Every invocation of an agent runs on its own tokio task. A timed out call is
/// detached rather than cancelled, so agents must tolerate being abandoned.
pub struct TaskScheduler {
    pub(crate) registry: Arc<AgentRegistry>,
    pub(crate) hooks: Arc<HookBus>,
    pub(crate) config: SchedulerConfig,
    pub(crate) suggestion_limit: usize,
    permits: Arc<Semaphore>,
    monitor: Arc<QueueMonitor>,
    pub(crate) plans: RwLock<HashMap<Uuid, Plan>>,
}

impl TaskScheduler {
    pub fn new(
        registry: Arc<AgentRegistry>,
        hooks: Arc<HookBus>,
        config: SchedulerConfig,
        suggestion_limit: usize,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrency.max(1)));
        Self {
            registry,
            hooks,
            config,
            suggestion_limit,
            permits,
            monitor: Arc::new(QueueMonitor::new()),
            plans: RwLock::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Invoke one agent with retries and a per-attempt timeout.
    ///
    /// Returns an error only when the agent cannot be scheduled at all. A task
    /// that fails or times out still yields `Ok` with the outcome on the result.
    pub async fn run_task(
        &self,
        agent_id: &str,
        input: Value,
        options: TaskOptions,
    ) -> MachinistResult<TaskResult> {
        if let Some(problem) = timeout_problem("task", options.timeout_ms) {
            return Err(MachinistError::Validation(vec![problem]));
        }
        let agent = self.resolve(agent_id)?;
        let run = TaskRun {
            task_id: Uuid::new_v4().to_string(),
            input,
            priority: options.priority,
            timeout_ms: options.timeout_ms.unwrap_or(self.config.default_timeout_ms),
            max_retries: options.max_retries.unwrap_or(self.config.default_max_retries),
            origin: TaskOrigin::Standalone,
        };
        Ok(self.execute(agent, run).await)
    }

    /// Run independent tasks concurrently. Results keep the input order.
    ///
    /// Every agent id is checked before anything runs; all problems are
    /// reported together.
    pub async fn run_agents_parallel(&self, specs: Vec<TaskSpec>) -> MachinistResult<ParallelReport> {
        let mut problems = self.agent_problems(specs.iter().map(|s| s.agent_id.as_str()));
        problems.extend(spec_timeout_problems(&specs));
        if !problems.is_empty() {
            return Err(MachinistError::Validation(problems));
        }

        let mut runs = Vec::with_capacity(specs.len());
        for (index, spec) in specs.into_iter().enumerate() {
            let agent = self.resolve(&spec.agent_id)?;
            let run = TaskRun {
                task_id: spec.id.unwrap_or_else(|| format!("task-{}", index + 1)),
                input: spec.input,
                priority: spec.options.priority,
                timeout_ms: spec
                    .options
                    .timeout_ms
                    .unwrap_or(self.config.default_timeout_ms),
                max_retries: spec
                    .options
                    .max_retries
                    .unwrap_or(self.config.default_max_retries),
                origin: TaskOrigin::Standalone,
            };
            runs.push((agent, run));
        }

        let results = self.execute_batch(runs).await;
        info!(
            total = results.len(),
            successful = results.iter().filter(|r| r.is_success()).count(),
            "Parallel run finished"
        );
        Ok(ParallelReport::from(results))
    }

    /// Counters of the task queue.
    pub fn queue_stats(&self) -> QueueStats {
        self.monitor.stats()
    }

    /// Plans, in-flight tasks, schedulable agents and per-agent metrics.
    pub async fn sessions(&self) -> SchedulerSnapshot {
        SchedulerSnapshot {
            plans: self.plans().await,
            active_tasks: self.monitor.active_tasks().await,
            available_agents: self.registry.available_ids(),
            agent_metrics: self.monitor.agent_metrics().await.into_iter().collect(),
            queue: self.monitor.stats(),
        }
    }

    /// Look up an agent the scheduler is allowed to invoke.
    pub(crate) fn resolve(&self, agent_id: &str) -> MachinistResult<Arc<dyn Agent>> {
        let agent = self.registry.resolve(agent_id, self.suggestion_limit)?;
        if !agent.descriptor().is_schedulable() {
            return Err(MachinistError::AgentDisabled(agent_id.to_string()));
        }
        Ok(agent)
    }

    /// One message per unknown or unschedulable agent id, deduplicated.
    pub(crate) fn agent_problems<'a>(&self, ids: impl IntoIterator<Item = &'a str>) -> Vec<String> {
        let ids: Vec<&str> = ids.into_iter().collect();
        let mut problems: Vec<String> = self
            .registry
            .missing(ids.iter().copied())
            .into_iter()
            .map(|id| {
                let suggestions = self.registry.suggest(&id, self.suggestion_limit);
                if suggestions.is_empty() {
                    format!("unknown agent '{id}'")
                } else {
                    format!("unknown agent '{id}' (known: {})", suggestions.join(", "))
                }
            })
            .collect();
        let mut reported: Vec<&str> = Vec::new();
        for id in ids {
            if reported.contains(&id) {
                continue;
            }
            if let Some(descriptor) = self.registry.descriptor(id) {
                if !descriptor.is_schedulable() {
                    problems.push(format!("agent '{id}' is {}", if descriptor.enabled { "offline" } else { "disabled" }));
                    reported.push(id);
                }
            }
        }
        problems
    }

    /// Run several tasks at once. Slots are requested in priority order;
    /// results come back in input order.
    pub(crate) async fn execute_batch(&self, runs: Vec<(Arc<dyn Agent>, TaskRun)>) -> Vec<TaskResult> {
        let mut indexed: Vec<(usize, Arc<dyn Agent>, TaskRun)> = runs
            .into_iter()
            .enumerate()
            .map(|(i, (agent, run))| (i, agent, run))
            .collect();
        // stable: equal priorities keep submission order
        indexed.sort_by(|a, b| b.2.priority.cmp(&a.2.priority));

        let order: Vec<usize> = indexed.iter().map(|(i, _, _)| *i).collect();
        let finished = join_all(
            indexed
                .into_iter()
                .map(|(_, agent, run)| self.execute(agent, run)),
        )
        .await;

        let mut slots: Vec<Option<TaskResult>> = vec![None; order.len()];
        for (index, result) in order.into_iter().zip(finished) {
            slots[index] = Some(result);
        }
        slots.into_iter().flatten().collect()
    }

    /// Queue, run with retries, and record one task.
    pub(crate) async fn execute(&self, agent: Arc<dyn Agent>, run: TaskRun) -> TaskResult {
        let agent_id = agent.descriptor().id.clone();
        self.monitor.enqueue();

        // The semaphore is never closed; a failed acquire still gets a result.
        let _permit = match Arc::clone(&self.permits).acquire_owned().await {
            Ok(permit) => permit,
            Err(e) => {
                error!(task_id = %run.task_id, agent_id = %agent_id, error = %e, "No execution slot");
                return TaskResult::failed(&run.task_id, &agent_id, e.to_string());
            }
        };

        let run_id = Uuid::new_v4();
        self.monitor
            .start_task(ActiveTask {
                run_id,
                task_id: run.task_id.clone(),
                agent_id: agent_id.clone(),
                origin: run.origin,
                attempt: 0,
                started_at: Utc::now(),
            })
            .await;

        let started = Instant::now();
        let timeout = Duration::from_millis(run.timeout_ms);
        let mut every_attempt_timed_out = true;
        let mut last_error = None;
        let mut attempts = 0;
        let mut output = None;

        for attempt in 0..=run.max_retries {
            attempts = attempt + 1;
            self.monitor.record_attempt(run_id, attempts).await;
            match attempt_once(&agent, run.input.clone(), timeout).await {
                Ok(value) => {
                    output = Some(value);
                    break;
                }
                Err(AttemptError::TimedOut) => {
                    warn!(task_id = %run.task_id, agent_id = %agent_id, attempt = attempts, timeout_ms = run.timeout_ms, "Attempt timed out");
                    last_error = Some(
                        MachinistError::Timeout {
                            timeout_ms: run.timeout_ms,
                        }
                        .to_string(),
                    );
                }
                Err(AttemptError::Failed(message)) => {
                    warn!(task_id = %run.task_id, agent_id = %agent_id, attempt = attempts, error = %message, "Attempt failed");
                    every_attempt_timed_out = false;
                    last_error = Some(message);
                }
            }
            if attempt < run.max_retries {
                let delay = self.config.retry.backoff(attempt);
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }
        }

        let status = match (&output, every_attempt_timed_out) {
            (Some(_), _) => TaskStatus::Succeeded,
            (None, true) => TaskStatus::TimedOut,
            (None, false) => TaskStatus::Failed,
        };
        let result = TaskResult {
            task_id: run.task_id.clone(),
            agent_id: agent_id.clone(),
            status,
            error: if output.is_some() { None } else { last_error },
            output,
            attempts,
            duration_ms: started.elapsed().as_millis() as u64,
        };

        self.monitor.finish_task(run_id, status).await;
        self.monitor
            .record_outcome(&agent_id, status, result.duration_ms)
            .await;

        match status {
            TaskStatus::Succeeded => {
                debug!(task_id = %result.task_id, agent_id = %agent_id, attempts, duration_ms = result.duration_ms, "Task succeeded");
            }
            TaskStatus::TimedOut => {
                error!(task_id = %result.task_id, agent_id = %agent_id, attempts, "Task timed out on every attempt");
                let ctx = HookContext::new(
                    TASK_TIMEOUT,
                    "run_task",
                    "task",
                    result.task_id.clone(),
                    json!({
                        "agentId": agent_id,
                        "attempts": attempts,
                        "timeoutMs": run.timeout_ms,
                    }),
                )
                .with_metadata("origin", json!(run.origin));
                self.hooks.execute(TASK_TIMEOUT, ctx).await;
            }
            _ => {
                error!(task_id = %result.task_id, agent_id = %agent_id, attempts, error = ?result.error, "Task failed");
            }
        }

        result
    }
}

/// Run a single attempt on its own tokio task, racing it against `timeout`.
async fn attempt_once(
    agent: &Arc<dyn Agent>,
    input: Value,
    timeout: Duration,
) -> Result<Value, AttemptError> {
    let agent = Arc::clone(agent);
    let handle = tokio::spawn(async move { agent.invoke(input).await });
    // Dropping the handle on timeout detaches the call.
    match tokio::time::timeout(timeout, handle).await {
        Err(_) => Err(AttemptError::TimedOut),
        Ok(Err(join_err)) => Err(AttemptError::Failed(
            MachinistError::AgentFailure(format!("agent panicked: {join_err}")).to_string(),
        )),
        Ok(Ok(Err(e))) => Err(AttemptError::Failed(e.to_string())),
        Ok(Ok(Ok(output))) => match failure_signal(&output) {
            Some(message) => Err(AttemptError::Failed(
                MachinistError::AgentFailure(message).to_string(),
            )),
            None => Ok(output),
        },
    }
}

/// A zero timeout would expire every attempt before the agent runs.
pub(crate) fn timeout_problem(label: &str, timeout_ms: Option<u64>) -> Option<String> {
    (timeout_ms == Some(0)).then(|| format!("{label}: timeoutMs must be positive"))
}

pub(crate) fn spec_timeout_problems(specs: &[TaskSpec]) -> Vec<String> {
    specs
        .iter()
        .enumerate()
        .filter_map(|(index, spec)| {
            let label = match &spec.id {
                Some(id) => format!("task '{id}'"),
                None => format!("task {}", index + 1),
            };
            timeout_problem(&label, spec.options.timeout_ms)
        })
        .collect()
}
