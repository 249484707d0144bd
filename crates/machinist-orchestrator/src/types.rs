use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Scheduling priority. Higher priority tasks acquire execution slots first.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

/// Status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    TimedOut,
    /// Never invoked because an upstream task did not succeed.
    Skipped,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Succeeded | TaskStatus::Failed | TaskStatus::TimedOut | TaskStatus::Skipped
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::Succeeded => write!(f, "succeeded"),
            TaskStatus::Failed => write!(f, "failed"),
            TaskStatus::TimedOut => write!(f, "timed_out"),
            TaskStatus::Skipped => write!(f, "skipped"),
        }
    }
}

/// Per-invocation options. Unset values fall back to the scheduler defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskOptions {
    #[serde(default)]
    pub priority: Priority,
    #[serde(default, alias = "timeoutMs")]
    pub timeout_ms: Option<u64>,
    #[serde(default, alias = "maxRetries")]
    pub max_retries: Option<u32>,
}

impl TaskOptions {
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }
}

/// A task as submitted by a caller, before the scheduler owns it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    /// Plan-local id. Generated from the position when absent.
    #[serde(default)]
    pub id: Option<String>,
    #[serde(alias = "agentId")]
    pub agent_id: String,
    #[serde(default)]
    pub input: Value,
    #[serde(flatten)]
    pub options: TaskOptions,
    #[serde(default, alias = "dependsOn")]
    pub dependencies: Vec<String>,
}

impl TaskSpec {
    pub fn new(agent_id: impl Into<String>, input: Value) -> Self {
        Self {
            id: None,
            agent_id: agent_id.into(),
            input,
            options: TaskOptions::default(),
            dependencies: Vec::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_dependencies(mut self, deps: Vec<&str>) -> Self {
        self.dependencies = deps.into_iter().map(String::from).collect();
        self
    }

    pub fn with_options(mut self, options: TaskOptions) -> Self {
        self.options = options;
        self
    }
}

/// A unit of work owned by the scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub agent_id: String,
    pub input: Value,
    pub priority: Priority,
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub dependencies: Vec<String>,
    pub status: TaskStatus,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub attempt_count: u32,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Copy the outcome of an execution onto the task.
    pub fn apply(&mut self, result: &TaskResult) {
        self.status = result.status;
        self.result = result.output.clone();
        self.error = result.error.clone();
        self.attempt_count = result.attempts;
        self.completed_at = Some(Utc::now());
    }

    pub(crate) fn reset(&mut self) {
        self.status = TaskStatus::Pending;
        self.result = None;
        self.error = None;
        self.attempt_count = 0;
        self.completed_at = None;
    }
}

/// Outcome of executing one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: String,
    pub agent_id: String,
    pub status: TaskStatus,
    pub output: Option<Value>,
    pub error: Option<String>,
    pub attempts: u32,
    pub duration_ms: u64,
}

impl TaskResult {
    pub fn is_success(&self) -> bool {
        self.status == TaskStatus::Succeeded
    }

    /// A result for a task that was never invoked.
    pub fn skipped(task_id: &str, agent_id: &str, reason: impl Into<String>) -> Self {
        Self {
            task_id: task_id.to_string(),
            agent_id: agent_id.to_string(),
            status: TaskStatus::Skipped,
            output: None,
            error: Some(reason.into()),
            attempts: 0,
            duration_ms: 0,
        }
    }

    pub(crate) fn failed(task_id: &str, agent_id: &str, error: impl Into<String>) -> Self {
        Self {
            task_id: task_id.to_string(),
            agent_id: agent_id.to_string(),
            status: TaskStatus::Failed,
            output: None,
            error: Some(error.into()),
            attempts: 0,
            duration_ms: 0,
        }
    }
}

/// Result of [`crate::TaskScheduler::run_agents_parallel`]. Counts are derived.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParallelReport {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub results: Vec<TaskResult>,
}

impl From<Vec<TaskResult>> for ParallelReport {
    fn from(results: Vec<TaskResult>) -> Self {
        let successful = results.iter().filter(|r| r.is_success()).count();
        Self {
            total: results.len(),
            successful,
            failed: results.len() - successful,
            results,
        }
    }
}

/// How the tasks of a plan are ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanMode {
    /// One at a time in list order, ignoring dependencies; fail-fast.
    #[default]
    Sequential,
    /// All at once, ignoring dependencies.
    Parallel,
    /// Dependency order; dependency outputs flow into dependents.
    Pipeline,
}

impl std::fmt::Display for PlanMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlanMode::Sequential => write!(f, "sequential"),
            PlanMode::Parallel => write!(f, "parallel"),
            PlanMode::Pipeline => write!(f, "pipeline"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanStatus {
    Pending,
    Running,
    Completed,
    Partial,
    Failed,
}

impl PlanStatus {
    pub fn is_finished(self) -> bool {
        matches!(
            self,
            PlanStatus::Completed | PlanStatus::Partial | PlanStatus::Failed
        )
    }
}

/// A named collection of tasks executed under one mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub id: Uuid,
    pub name: String,
    pub mode: PlanMode,
    pub tasks: Vec<Task>,
    pub status: PlanStatus,
    pub results: BTreeMap<String, TaskResult>,
    pub aggregated_output: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Plan {
    pub fn task(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn summary(&self) -> PlanSummary {
        let count = |status: TaskStatus| self.tasks.iter().filter(|t| t.status == status).count();
        PlanSummary {
            id: self.id,
            name: self.name.clone(),
            mode: self.mode,
            status: self.status,
            task_count: self.tasks.len(),
            succeeded: count(TaskStatus::Succeeded),
            failed: count(TaskStatus::Failed) + count(TaskStatus::TimedOut),
            skipped: count(TaskStatus::Skipped),
            created_at: self.created_at,
        }
    }
}

/// Compact view of a plan for session listings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanSummary {
    pub id: Uuid,
    pub name: String,
    pub mode: PlanMode,
    pub status: PlanStatus,
    pub task_count: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub created_at: DateTime<Utc>,
}
