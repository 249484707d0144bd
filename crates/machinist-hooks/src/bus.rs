use crate::ALL_HOOKS;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use machinist_core::MachinistResult;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// The object a hook invocation is about.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookTarget {
    /// `"task"`, `"plan"` or `"swarm"`.
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
    #[serde(default)]
    pub data: Value,
}

/// Context handed to every hook. Each hook receives its own clone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookContext {
    pub hook_name: String,
    pub operation: String,
    pub target: HookTarget,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    pub raised_at: DateTime<Utc>,
}

impl HookContext {
    pub fn new(
        hook_name: impl Into<String>,
        operation: impl Into<String>,
        kind: impl Into<String>,
        id: impl Into<String>,
        data: Value,
    ) -> Self {
        Self {
            hook_name: hook_name.into(),
            operation: operation.into(),
            target: HookTarget {
                kind: kind.into(),
                id: id.into(),
                data,
            },
            metadata: HashMap::new(),
            raised_at: Utc::now(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// What a hook wants done with the result that triggered it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "verdict", content = "detail")]
pub enum HookVerdict {
    Continue,
    Annotate(Value),
    Veto(String),
}

/// Annotation left by a named hook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HookAnnotation {
    pub hook: String,
    pub value: Value,
}

/// Veto raised by a named hook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HookVeto {
    pub hook: String,
    pub reason: String,
}

/// Collected verdicts of the hooks that finished in time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HookReport {
    pub invoked: usize,
    pub annotations: Vec<HookAnnotation>,
    pub vetoes: Vec<HookVeto>,
    /// Hooks that errored, panicked, or timed out.
    pub failures: usize,
}

impl HookReport {
    pub fn is_vetoed(&self) -> bool {
        !self.vetoes.is_empty()
    }

    fn record(&mut self, hook: String, verdict: HookVerdict) {
        match verdict {
            HookVerdict::Continue => {}
            HookVerdict::Annotate(value) => self.annotations.push(HookAnnotation { hook, value }),
            HookVerdict::Veto(reason) => self.vetoes.push(HookVeto { hook, reason }),
        }
    }
}

/// Trait for receiving hook invocations.
#[async_trait]
pub trait Hook: Send + Sync {
    fn name(&self) -> &str;

    async fn call(&self, ctx: &HookContext) -> MachinistResult<HookVerdict>;
}

/// Dispatches named hook invocations to registered hooks.
///
/// Every hook runs on its own tokio task, and all hooks of one invocation share a
/// single deadline. Whatever happens inside a hook, `execute` returns a report.
pub struct HookBus {
    hooks: RwLock<HashMap<String, Vec<Arc<dyn Hook>>>>,
    timeout: Duration,
}

impl HookBus {
    pub fn new(timeout: Duration) -> Self {
        Self {
            hooks: RwLock::new(HashMap::new()),
            timeout,
        }
    }

    /// Register a hook under an extension point name, or [`ALL_HOOKS`].
    pub fn register(&self, hook_name: impl Into<String>, hook: Arc<dyn Hook>) {
        let hook_name = hook_name.into();
        debug!(hook_name = %hook_name, hook = hook.name(), "Registered hook");
        self.hooks.write().entry(hook_name).or_default().push(hook);
    }

    /// Number of hooks registered for a point, including wildcard hooks.
    pub fn hook_count(&self, hook_name: &str) -> usize {
        let hooks = self.hooks.read();
        let direct = hooks.get(hook_name).map_or(0, Vec::len);
        let wildcard = if hook_name == ALL_HOOKS {
            0
        } else {
            hooks.get(ALL_HOOKS).map_or(0, Vec::len)
        };
        direct + wildcard
    }

    /// Fire every hook registered for `hook_name`. Never fails.
    pub async fn execute(&self, hook_name: &str, context: HookContext) -> HookReport {
        let hooks: Vec<Arc<dyn Hook>> = {
            let registered = self.hooks.read();
            registered
                .get(hook_name)
                .into_iter()
                .chain(registered.get(ALL_HOOKS))
                .flatten()
                .cloned()
                .collect()
        };

        let mut report = HookReport::default();
        if hooks.is_empty() {
            return report;
        }

        let deadline = tokio::time::Instant::now() + self.timeout;
        let handles: Vec<_> = hooks
            .into_iter()
            .map(|hook| {
                let ctx = context.clone();
                let name = hook.name().to_string();
                let handle = tokio::spawn(async move { hook.call(&ctx).await });
                (name, handle)
            })
            .collect();

        for (name, mut handle) in handles {
            report.invoked += 1;
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(Ok(verdict))) => report.record(name, verdict),
                Ok(Ok(Err(e))) => {
                    report.failures += 1;
                    warn!(hook_name, hook = %name, error = %e, "Hook failed");
                }
                Ok(Err(join_err)) => {
                    report.failures += 1;
                    warn!(hook_name, hook = %name, error = %join_err, "Hook panicked");
                }
                Err(_) => {
                    handle.abort();
                    report.failures += 1;
                    warn!(
                        hook_name,
                        hook = %name,
                        timeout_ms = self.timeout.as_millis() as u64,
                        "Hook timed out"
                    );
                }
            }
        }

        report
    }
}

impl Default for HookBus {
    fn default() -> Self {
        Self::new(Duration::from_millis(250))
    }
}
