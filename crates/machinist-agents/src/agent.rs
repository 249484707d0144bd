use async_trait::async_trait;
use machinist_core::MachinistResult;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Operational status advertised by an agent descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    /// Fully operational.
    #[default]
    Available,
    /// Operational, but results may be approximate or slow.
    Degraded,
    /// Registered but not currently schedulable.
    Offline,
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentStatus::Available => write!(f, "available"),
            AgentStatus::Degraded => write!(f, "degraded"),
            AgentStatus::Offline => write!(f, "offline"),
        }
    }
}

/// Metadata describing a registered agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentDescriptor {
    pub id: String,
    pub name: String,
    pub category: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub status: AgentStatus,
}

fn default_enabled() -> bool {
    true
}

impl AgentDescriptor {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        category: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            category: category.into(),
            enabled: true,
            status: AgentStatus::Available,
        }
    }

    pub fn with_status(mut self, status: AgentStatus) -> Self {
        self.status = status;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Whether the scheduler may invoke this agent.
    pub fn is_schedulable(&self) -> bool {
        self.enabled && self.status != AgentStatus::Offline
    }
}

/// Trait that every schedulable unit implements: calculations, lookups and reports.
///
/// Agents are assumed to be stateless: the scheduler may abandon a call that
/// outlives its timeout and invoke the agent again.
#[async_trait]
pub trait Agent: Send + Sync {
    fn descriptor(&self) -> &AgentDescriptor;

    async fn invoke(&self, input: Value) -> MachinistResult<Value>;
}

/// Returns the failure message when an output carries an explicit
/// `"success": false` flag.
pub fn failure_signal(output: &Value) -> Option<String> {
    match output.get("success") {
        Some(Value::Bool(false)) => Some(
            output
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("agent reported failure")
                .to_string(),
        ),
        _ => None,
    }
}

type InvokeFn = dyn Fn(Value) -> Pin<Box<dyn Future<Output = MachinistResult<Value>> + Send>>
    + Send
    + Sync;

/// Adapts an async closure into an [`Agent`].
pub struct FnAgent {
    descriptor: AgentDescriptor,
    func: Arc<InvokeFn>,
}

impl FnAgent {
    pub fn new<F, Fut>(descriptor: AgentDescriptor, func: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = MachinistResult<Value>> + Send + 'static,
    {
        Self {
            descriptor,
            func: Arc::new(move |input| Box::pin(func(input))),
        }
    }
}

#[async_trait]
impl Agent for FnAgent {
    fn descriptor(&self) -> &AgentDescriptor {
        &self.descriptor
    }

    async fn invoke(&self, input: Value) -> MachinistResult<Value> {
        (self.func)(input).await
    }
}
