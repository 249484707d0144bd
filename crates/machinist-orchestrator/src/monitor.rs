use crate::types::TaskStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// What submitted a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "id")]
pub enum TaskOrigin {
    Standalone,
    Plan(Uuid),
    Swarm(Uuid),
}

/// A task currently holding an execution slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveTask {
    pub run_id: Uuid,
    pub task_id: String,
    pub agent_id: String,
    pub origin: TaskOrigin,
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
}

/// Per-agent execution totals.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentMetrics {
    pub invocations: u64,
    pub failures: u64,
    pub timeouts: u64,
    pub duration_ms: u64,
}

/// Snapshot of the queue counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub queued: u64,
    pub running: u64,
    pub completed: u64,
    pub failed: u64,
}

/// Tracks queue counters, in-flight tasks and per-agent metrics.
///
/// Counters move once per task, never per attempt: `queued -> running ->
/// completed | failed`.
pub struct QueueMonitor {
    queued: AtomicU64,
    running: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    active: Arc<RwLock<HashMap<Uuid, ActiveTask>>>,
    metrics: Arc<RwLock<HashMap<String, AgentMetrics>>>,
}

impl QueueMonitor {
    pub fn new() -> Self {
        Self {
            queued: AtomicU64::new(0),
            running: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            active: Arc::new(RwLock::new(HashMap::new())),
            metrics: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// A task entered the queue and waits for a slot.
    pub fn enqueue(&self) {
        self.queued.fetch_add(1, Ordering::SeqCst);
    }

    /// A queued task acquired a slot.
    pub async fn start_task(&self, task: ActiveTask) {
        self.queued.fetch_sub(1, Ordering::SeqCst);
        self.running.fetch_add(1, Ordering::SeqCst);
        self.active.write().await.insert(task.run_id, task);
    }

    /// Record the attempt number of a running task.
    pub async fn record_attempt(&self, run_id: Uuid, attempt: u32) {
        if let Some(task) = self.active.write().await.get_mut(&run_id) {
            task.attempt = attempt;
        }
    }

    /// A running task reached a terminal status.
    pub async fn finish_task(&self, run_id: Uuid, status: TaskStatus) {
        self.running.fetch_sub(1, Ordering::SeqCst);
        if status == TaskStatus::Succeeded {
            self.completed.fetch_add(1, Ordering::SeqCst);
        } else {
            self.failed.fetch_add(1, Ordering::SeqCst);
        }
        self.active.write().await.remove(&run_id);
    }

    /// Fold one finished task into the metrics of its agent.
    pub async fn record_outcome(&self, agent_id: &str, status: TaskStatus, duration_ms: u64) {
        let mut metrics = self.metrics.write().await;
        let entry = metrics.entry(agent_id.to_string()).or_default();
        entry.invocations += 1;
        entry.duration_ms += duration_ms;
        match status {
            TaskStatus::Failed => entry.failures += 1,
            TaskStatus::TimedOut => entry.timeouts += 1,
            _ => {}
        }
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            queued: self.queued.load(Ordering::SeqCst),
            running: self.running.load(Ordering::SeqCst),
            completed: self.completed.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
        }
    }

    /// In-flight tasks, oldest first.
    pub async fn active_tasks(&self) -> Vec<ActiveTask> {
        let mut tasks: Vec<ActiveTask> = self.active.read().await.values().cloned().collect();
        tasks.sort_by_key(|t| t.started_at);
        tasks
    }

    pub async fn agent_metrics(&self) -> HashMap<String, AgentMetrics> {
        self.metrics.read().await.clone()
    }
}

impl Default for QueueMonitor {
    fn default() -> Self {
        Self::new()
    }
}
