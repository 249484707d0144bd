use crate::monitor::TaskOrigin;
use crate::scheduler::{spec_timeout_problems, TaskRun, TaskScheduler};
use crate::task_graph::TaskGraph;
use crate::types::{Plan, PlanMode, PlanStatus, PlanSummary, Task, TaskResult, TaskSpec, TaskStatus};
use chrono::Utc;
use futures_util::stream::{FuturesUnordered, StreamExt};
use machinist_core::json::with_field;
use machinist_core::{MachinistError, MachinistResult};
use machinist_hooks::{HookContext, PLAN_COMPLETED};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashMap, VecDeque};
use tracing::{info, warn};
use uuid::Uuid;

impl TaskScheduler {
    /// Validate and store a plan. Every problem found is reported at once.
    pub async fn create_plan(
        &self,
        name: impl Into<String>,
        mode: PlanMode,
        specs: Vec<TaskSpec>,
    ) -> MachinistResult<Plan> {
        let name = name.into();
        let mut problems = Vec::new();
        if specs.is_empty() {
            problems.push("plan must contain at least one task".to_string());
        }
        problems.extend(self.agent_problems(specs.iter().map(|s| s.agent_id.as_str())));
        problems.extend(spec_timeout_problems(&specs));

        let tasks: Vec<Task> = specs
            .into_iter()
            .enumerate()
            .map(|(index, spec)| self.task_from_spec(index, spec))
            .collect();
        if let Err(graph_problems) = TaskGraph::build(&tasks) {
            problems.extend(graph_problems);
        }
        if !problems.is_empty() {
            warn!(plan = %name, problems = problems.len(), "Rejected plan");
            return Err(MachinistError::Validation(problems));
        }

        let plan = Plan {
            id: Uuid::new_v4(),
            name,
            mode,
            tasks,
            status: PlanStatus::Pending,
            results: BTreeMap::new(),
            aggregated_output: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        };
        info!(plan_id = %plan.id, plan = %plan.name, mode = %plan.mode, tasks = plan.tasks.len(), "Created plan");

        let mut plans = self.plans.write().await;
        self.evict_plans(&mut plans);
        plans.insert(plan.id, plan.clone());
        Ok(plan)
    }

    /// Execute a stored plan and return its final state.
    ///
    /// A finished plan is reset and run again; a running plan is rejected.
    pub async fn execute_plan(&self, plan_id: Uuid) -> MachinistResult<Plan> {
        let (mode, tasks) = {
            let mut plans = self.plans.write().await;
            let plan = plans
                .get_mut(&plan_id)
                .ok_or_else(|| MachinistError::NotFound(format!("plan {plan_id}")))?;
            if plan.status == PlanStatus::Running {
                return Err(MachinistError::Coordination(format!(
                    "plan {plan_id} is already running"
                )));
            }
            if plan.status.is_finished() {
                plan.tasks.iter_mut().for_each(Task::reset);
                plan.results.clear();
                plan.aggregated_output = None;
                plan.finished_at = None;
            }
            plan.status = PlanStatus::Running;
            plan.started_at = Some(Utc::now());
            (plan.mode, plan.tasks.clone())
        };
        info!(plan_id = %plan_id, mode = %mode, tasks = tasks.len(), "Executing plan");

        let results = match mode {
            PlanMode::Sequential => self.run_sequential(plan_id, &tasks).await,
            PlanMode::Parallel => self.run_parallel(plan_id, &tasks).await,
            PlanMode::Pipeline => self.run_pipeline(plan_id, &tasks).await,
        };

        let sinks: Vec<String> = match mode {
            PlanMode::Pipeline => TaskGraph::build(&tasks)
                .map(|g| g.sinks().into_iter().map(String::from).collect())
                .unwrap_or_default(),
            _ => tasks.iter().map(|t| t.id.clone()).collect(),
        };
        let (status, aggregated) = conclude(mode, &tasks, &results, &sinks);

        let finished = {
            let mut plans = self.plans.write().await;
            let plan = plans
                .get_mut(&plan_id)
                .ok_or_else(|| MachinistError::NotFound(format!("plan {plan_id}")))?;
            for task in plan.tasks.iter_mut() {
                if let Some(result) = results.get(&task.id) {
                    task.apply(result);
                }
            }
            plan.results = results;
            plan.status = status;
            plan.aggregated_output = aggregated;
            plan.finished_at = Some(Utc::now());
            plan.clone()
        };

        let summary = finished.summary();
        info!(
            plan_id = %plan_id,
            status = ?status,
            succeeded = summary.succeeded,
            failed = summary.failed,
            skipped = summary.skipped,
            "Plan finished"
        );
        let ctx = HookContext::new(
            PLAN_COMPLETED,
            "execute_plan",
            "plan",
            plan_id.to_string(),
            json!(summary),
        );
        self.hooks.execute(PLAN_COMPLETED, ctx).await;

        Ok(finished)
    }

    pub async fn plan(&self, plan_id: Uuid) -> MachinistResult<Plan> {
        self.plans
            .read()
            .await
            .get(&plan_id)
            .cloned()
            .ok_or_else(|| MachinistError::NotFound(format!("plan {plan_id}")))
    }

    /// Summaries of retained plans, oldest first.
    pub async fn plans(&self) -> Vec<PlanSummary> {
        let mut summaries: Vec<PlanSummary> =
            self.plans.read().await.values().map(Plan::summary).collect();
        summaries.sort_by_key(|s| s.created_at);
        summaries
    }

    fn task_from_spec(&self, index: usize, spec: TaskSpec) -> Task {
        Task {
            id: spec.id.unwrap_or_else(|| format!("task-{}", index + 1)),
            agent_id: spec.agent_id,
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
            dependencies: spec.dependencies,
            status: TaskStatus::Pending,
            result: None,
            error: None,
            attempt_count: 0,
            completed_at: None,
        }
    }

    /// Make room for one more plan. Finished plans go first, then pending
    /// ones; running plans are never evicted.
    fn evict_plans(&self, plans: &mut HashMap<Uuid, Plan>) {
        let limit = self.config.max_retained_plans.max(1);
        while plans.len() >= limit {
            let victim = plans
                .values()
                .filter(|p| p.status != PlanStatus::Running)
                .min_by_key(|p| (!p.status.is_finished(), p.created_at))
                .map(|p| p.id);
            match victim {
                Some(id) => {
                    plans.remove(&id);
                    info!(plan_id = %id, "Evicted plan");
                }
                None => break,
            }
        }
    }

    async fn run_plan_task(&self, plan_id: Uuid, task: &Task, input: Value) -> TaskResult {
        match self.resolve(&task.agent_id) {
            Ok(agent) => self.execute(agent, self.plan_run(plan_id, task, input)).await,
            Err(e) => TaskResult::failed(&task.id, &task.agent_id, e.to_string()),
        }
    }

    fn plan_run(&self, plan_id: Uuid, task: &Task, input: Value) -> TaskRun {
        TaskRun {
            task_id: task.id.clone(),
            input,
            priority: task.priority,
            timeout_ms: task.timeout_ms,
            max_retries: task.max_retries,
            origin: TaskOrigin::Plan(plan_id),
        }
    }

    /// List order, one at a time. After the first failure the rest are skipped.
    async fn run_sequential(&self, plan_id: Uuid, tasks: &[Task]) -> BTreeMap<String, TaskResult> {
        let mut results = BTreeMap::new();
        let mut failed_at: Option<String> = None;
        for task in tasks {
            let result = match &failed_at {
                Some(previous) => TaskResult::skipped(
                    &task.id,
                    &task.agent_id,
                    format!("previous task '{previous}' did not succeed"),
                ),
                None => self.run_plan_task(plan_id, task, task.input.clone()).await,
            };
            if failed_at.is_none() && !result.is_success() {
                failed_at = Some(task.id.clone());
            }
            results.insert(task.id.clone(), result);
        }
        results
    }

    /// Everything at once, dependencies ignored.
    async fn run_parallel(&self, plan_id: Uuid, tasks: &[Task]) -> BTreeMap<String, TaskResult> {
        let mut runs = Vec::with_capacity(tasks.len());
        let mut unresolved = Vec::new();
        for task in tasks {
            match self.resolve(&task.agent_id) {
                Ok(agent) => runs.push((agent, self.plan_run(plan_id, task, task.input.clone()))),
                Err(e) => unresolved.push(TaskResult::failed(&task.id, &task.agent_id, e.to_string())),
            }
        }
        self.execute_batch(runs)
            .await
            .into_iter()
            .chain(unresolved)
            .map(|r| (r.task_id.clone(), r))
            .collect()
    }

    /// Dependency order. A task starts as soon as all of its dependencies are
    /// terminal; it runs only if they all succeeded and is skipped otherwise.
    async fn run_pipeline(&self, plan_id: Uuid, tasks: &[Task]) -> BTreeMap<String, TaskResult> {
        let mut results: BTreeMap<String, TaskResult> = BTreeMap::new();
        let graph = match TaskGraph::build(tasks) {
            Ok(graph) => graph,
            Err(problems) => {
                let reason = problems.join("; ");
                for task in tasks {
                    results.insert(task.id.clone(), TaskResult::failed(&task.id, &task.agent_id, reason.clone()));
                }
                return results;
            }
        };
        let by_id: HashMap<&str, (usize, &Task)> = tasks
            .iter()
            .enumerate()
            .map(|(i, t)| (t.id.as_str(), (i, t)))
            .collect();
        let mut waiting: HashMap<&str, usize> = tasks
            .iter()
            .map(|t| (t.id.as_str(), graph.dependencies(&t.id).len()))
            .collect();

        let mut ready: Vec<&Task> = tasks
            .iter()
            .filter(|t| graph.dependencies(&t.id).is_empty())
            .collect();
        let mut running = FuturesUnordered::new();

        loop {
            // higher priority first, then submission order
            ready.sort_by(|a, b| {
                b.priority
                    .cmp(&a.priority)
                    .then_with(|| by_id[a.id.as_str()].0.cmp(&by_id[b.id.as_str()].0))
            });
            for task in ready.drain(..) {
                let outputs: Map<String, Value> = graph
                    .dependencies(&task.id)
                    .iter()
                    .filter_map(|dep| {
                        results
                            .get(dep)
                            .and_then(|r| r.output.clone())
                            .map(|out| (dep.clone(), out))
                    })
                    .collect();
                let input = if outputs.is_empty() {
                    task.input.clone()
                } else {
                    with_field(&task.input, "dependency_results", Value::Object(outputs))
                };
                running.push(self.run_plan_task(plan_id, task, input));
            }

            let Some(result) = running.next().await else {
                break;
            };

            // Settle the finished task and any dependents it forces to skip.
            let mut settled: VecDeque<TaskResult> = VecDeque::from([result]);
            while let Some(result) = settled.pop_front() {
                let finished_id = result.task_id.clone();
                results.insert(finished_id.clone(), result);
                for dependent in graph.dependents(&finished_id) {
                    let Some(count) = waiting.get_mut(dependent.as_str()) else {
                        continue;
                    };
                    *count -= 1;
                    if *count > 0 {
                        continue;
                    }
                    let Some(&(_, task)) = by_id.get(dependent.as_str()) else {
                        continue;
                    };
                    let blocker = graph
                        .dependencies(dependent)
                        .iter()
                        .find(|dep| !results.get(*dep).is_some_and(TaskResult::is_success));
                    match blocker {
                        Some(dep) => settled.push_back(TaskResult::skipped(
                            &task.id,
                            &task.agent_id,
                            format!("dependency '{dep}' did not succeed"),
                        )),
                        None => ready.push(task),
                    }
                }
            }
        }

        results
    }
}

/// Final status and aggregated output of an executed plan.
fn conclude(
    mode: PlanMode,
    tasks: &[Task],
    results: &BTreeMap<String, TaskResult>,
    sinks: &[String],
) -> (PlanStatus, Option<Value>) {
    let succeeded = |id: &str| results.get(id).is_some_and(TaskResult::is_success);
    let output = |id: &str| results.get(id).and_then(|r| r.output.clone());

    if tasks.iter().all(|t| succeeded(&t.id)) {
        let aggregated = match mode {
            PlanMode::Sequential => tasks.last().and_then(|t| output(&t.id)),
            _ => sink_output(sinks, &succeeded, &output),
        };
        return (PlanStatus::Completed, aggregated);
    }

    if mode == PlanMode::Sequential || !sinks.iter().any(|s| succeeded(s)) {
        return (PlanStatus::Failed, None);
    }
    (PlanStatus::Partial, sink_output(sinks, &succeeded, &output))
}

/// One terminal task yields its output; several yield an object keyed by the
/// ids of those that succeeded.
fn sink_output(
    sinks: &[String],
    succeeded: &dyn Fn(&str) -> bool,
    output: &dyn Fn(&str) -> Option<Value>,
) -> Option<Value> {
    if let [only] = sinks {
        return output(only);
    }
    let keyed: Map<String, Value> = sinks
        .iter()
        .filter(|s| succeeded(s))
        .map(|s| (s.clone(), output(s).unwrap_or(Value::Null)))
        .collect();
    Some(Value::Object(keyed))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::{RetryPolicy, SchedulerConfig};
    use machinist_agents::{AgentDescriptor, AgentRegistry, FnAgent};
    use machinist_hooks::HookBus;
    use std::sync::Arc;

    fn scheduler() -> TaskScheduler {
        let registry = Arc::new(AgentRegistry::new());
        registry.register(Arc::new(FnAgent::new(
            AgentDescriptor::new("echo", "Echo", "test"),
            |input| async move { Ok(input) },
        )));
        registry.register(Arc::new(FnAgent::new(
            AgentDescriptor::new("broken", "Broken", "test"),
            |_| async { Err(MachinistError::AgentFailure("spindle overload".into())) },
        )));
        let config = SchedulerConfig {
            default_max_retries: 0,
            max_retained_plans: 2,
            retry: RetryPolicy::immediate(),
            ..SchedulerConfig::default()
        };
        TaskScheduler::new(registry, Arc::new(HookBus::default()), config, 10)
    }

    #[tokio::test]
    async fn test_create_plan_aggregates_problems() {
        let scheduler = scheduler();
        let err = scheduler
            .create_plan(
                "bad",
                PlanMode::Pipeline,
                vec![
                    TaskSpec::new("ghost", json!({})).with_id("a"),
                    TaskSpec::new("echo", json!({})).with_id("a"),
                    TaskSpec::new("echo", json!({}))
                        .with_id("b")
                        .with_dependencies(vec!["missing"]),
                ],
            )
            .await
            .unwrap_err();
        let MachinistError::Validation(problems) = err else {
            panic!("expected validation error");
        };
        assert_eq!(problems.len(), 3);
        assert!(scheduler.plans().await.is_empty());
    }

    #[tokio::test]
    async fn test_empty_plan_rejected() {
        let err = scheduler()
            .create_plan("empty", PlanMode::Parallel, Vec::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("at least one task"));
    }

    #[tokio::test]
    async fn test_unknown_plan() {
        let err = scheduler().execute_plan(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, MachinistError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_pipeline_passes_dependency_results() {
        let scheduler = scheduler();
        let plan = scheduler
            .create_plan(
                "chain",
                PlanMode::Pipeline,
                vec![
                    TaskSpec::new("echo", json!({"stage": "rough"})).with_id("rough"),
                    TaskSpec::new("echo", json!({"stage": "finish"}))
                        .with_id("finish")
                        .with_dependencies(vec!["rough"]),
                ],
            )
            .await
            .unwrap();
        let done = scheduler.execute_plan(plan.id).await.unwrap();
        assert_eq!(done.status, PlanStatus::Completed);
        let output = done.aggregated_output.clone().unwrap();
        assert_eq!(output["stage"], "finish");
        assert_eq!(output["dependency_results"]["rough"]["stage"], "rough");
        assert_eq!(done.task("finish").unwrap().status, TaskStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_pipeline_skips_transitively() {
        let scheduler = scheduler();
        let plan = scheduler
            .create_plan(
                "skip",
                PlanMode::Pipeline,
                vec![
                    TaskSpec::new("broken", json!({})).with_id("a"),
                    TaskSpec::new("echo", json!({})).with_id("b").with_dependencies(vec!["a"]),
                    TaskSpec::new("echo", json!({})).with_id("c").with_dependencies(vec!["b"]),
                ],
            )
            .await
            .unwrap();
        let done = scheduler.execute_plan(plan.id).await.unwrap();
        assert_eq!(done.status, PlanStatus::Failed);
        assert!(done.aggregated_output.is_none());
        assert_eq!(done.results["b"].status, TaskStatus::Skipped);
        assert_eq!(done.results["c"].status, TaskStatus::Skipped);
        assert_eq!(done.results["c"].attempts, 0);
    }

    #[tokio::test]
    async fn test_parallel_plan_partial() {
        let scheduler = scheduler();
        let plan = scheduler
            .create_plan(
                "fan",
                PlanMode::Parallel,
                vec![
                    TaskSpec::new("echo", json!(7)).with_id("ok"),
                    TaskSpec::new("broken", json!(8)).with_id("bad"),
                ],
            )
            .await
            .unwrap();
        let done = scheduler.execute_plan(plan.id).await.unwrap();
        assert_eq!(done.status, PlanStatus::Partial);
        assert_eq!(done.aggregated_output, Some(json!({"ok": 7})));
    }

    #[tokio::test]
    async fn test_reexecution_resets_plan() {
        let scheduler = scheduler();
        let plan = scheduler
            .create_plan("again", PlanMode::Sequential, vec![TaskSpec::new("echo", json!(1))])
            .await
            .unwrap();
        let first = scheduler.execute_plan(plan.id).await.unwrap();
        let second = scheduler.execute_plan(plan.id).await.unwrap();
        assert_eq!(first.status, PlanStatus::Completed);
        assert_eq!(second.status, PlanStatus::Completed);
        assert_eq!(second.results.len(), 1);
        assert_eq!(second.aggregated_output, Some(json!(1)));
        assert!(second.started_at >= first.started_at);
    }

    #[tokio::test]
    async fn test_retention_evicts_finished_first() {
        let scheduler = scheduler();
        let spec = || vec![TaskSpec::new("echo", json!(1))];
        let oldest = scheduler.create_plan("p1", PlanMode::Sequential, spec()).await.unwrap();
        let pending = scheduler.create_plan("p2", PlanMode::Sequential, spec()).await.unwrap();
        scheduler.execute_plan(oldest.id).await.unwrap();
        let newest = scheduler.create_plan("p3", PlanMode::Sequential, spec()).await.unwrap();

        let ids: Vec<Uuid> = scheduler.plans().await.into_iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![pending.id, newest.id]);
    }
}
