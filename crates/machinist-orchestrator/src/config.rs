use machinist_core::{MachinistError, MachinistResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Full engine configuration, usually loaded from `machinist.toml`.
///
/// Every section and field is optional; missing values take the defaults below.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub hooks: HookConfig,
    #[serde(default)]
    pub swarm: SwarmConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
}

impl EngineConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(raw: &str) -> MachinistResult<Self> {
        let config: EngineConfig = toml::from_str(raw)
            .map_err(|e| MachinistError::Config(format!("Invalid engine config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot operate with.
    pub fn validate(&self) -> MachinistResult<()> {
        let mut problems = Vec::new();
        if self.scheduler.max_concurrency == 0 {
            problems.push("scheduler.max_concurrency must be at least 1".to_string());
        }
        if self.scheduler.default_timeout_ms == 0 {
            problems.push("scheduler.default_timeout_ms must be positive".to_string());
        }
        if !(0.0..=1.0).contains(&self.swarm.consensus_threshold) {
            problems.push(format!(
                "swarm.consensus_threshold must be within [0, 1], got {}",
                self.swarm.consensus_threshold
            ));
        }
        if let Some(floor) = self.hooks.consensus_floor {
            if !(0.0..=1.0).contains(&floor) {
                problems.push(format!("hooks.consensus_floor must be within [0, 1], got {floor}"));
            }
        }
        if self.scheduler.retry.backoff_base_ms > self.scheduler.retry.backoff_max_ms {
            problems.push("scheduler.retry.backoff_base_ms exceeds backoff_max_ms".to_string());
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(MachinistError::Config(problems.join("; ")))
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,
    #[serde(default = "default_max_retries")]
    pub default_max_retries: u32,
    /// Upper bound on tasks holding an execution slot at once.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    #[serde(default = "default_max_retained")]
    pub max_retained_plans: usize,
    #[serde(default)]
    pub retry: RetryPolicy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: default_timeout_ms(),
            default_max_retries: default_max_retries(),
            max_concurrency: default_max_concurrency(),
            max_retained_plans: default_max_retained(),
            retry: RetryPolicy::default(),
        }
    }
}

/// Backoff between attempts of the same task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Base delay in milliseconds for exponential backoff.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    /// Maximum delay in milliseconds (cap for exponential backoff).
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
}

impl RetryPolicy {
    /// No delay between attempts.
    pub fn immediate() -> Self {
        Self {
            backoff_base_ms: 0,
            backoff_max_ms: 0,
        }
    }

    /// Delay before retrying after the given zero-based attempt.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let delay = self
            .backoff_base_ms
            .saturating_mul(2u64.saturating_pow(attempt));
        Duration::from_millis(delay.min(self.backoff_max_ms))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookConfig {
    /// Shared deadline for all hooks of one invocation.
    #[serde(default = "default_hook_timeout_ms")]
    pub timeout_ms: u64,
    /// Register the tracing hook on every extension point.
    #[serde(default = "default_true")]
    pub trace: bool,
    /// When set, consensus results below this agreement are vetoed.
    #[serde(default)]
    pub consensus_floor: Option<f64>,
}

impl Default for HookConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_hook_timeout_ms(),
            trace: true,
            consensus_floor: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwarmConfig {
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,
    #[serde(default = "default_consensus_threshold")]
    pub consensus_threshold: f64,
    #[serde(default = "default_max_retained")]
    pub max_retained_swarms: usize,
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: default_timeout_ms(),
            consensus_threshold: default_consensus_threshold(),
            max_retained_swarms: default_max_retained(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// How many known ids to suggest on an unknown-agent miss.
    #[serde(default = "default_suggestion_limit")]
    pub suggestion_limit: usize,
    /// Register the built-in reference agents at startup.
    #[serde(default = "default_true")]
    pub builtins: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            suggestion_limit: default_suggestion_limit(),
            builtins: true,
        }
    }
}

fn default_timeout_ms() -> u64 {
    30_000
}
fn default_max_retries() -> u32 {
    2
}
fn default_max_concurrency() -> usize {
    16
}
fn default_max_retained() -> usize {
    256
}
fn default_backoff_base_ms() -> u64 {
    50
}
fn default_backoff_max_ms() -> u64 {
    2_000
}
fn default_hook_timeout_ms() -> u64 {
    250
}
fn default_consensus_threshold() -> f64 {
    0.5
}
fn default_suggestion_limit() -> usize {
    10
}
fn default_true() -> bool {
    true
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.scheduler.default_timeout_ms, 30_000);
        assert_eq!(config.scheduler.default_max_retries, 2);
        assert_eq!(config.swarm.consensus_threshold, 0.5);
        assert_eq!(config.registry.suggestion_limit, 10);
        assert!(config.hooks.trace);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = EngineConfig::from_toml_str(
            r#"
            [scheduler]
            max_concurrency = 4

            [scheduler.retry]
            backoff_base_ms = 10

            [hooks]
            consensus_floor = 0.7
            "#,
        )
        .unwrap();
        assert_eq!(config.scheduler.max_concurrency, 4);
        assert_eq!(config.scheduler.default_max_retries, 2);
        assert_eq!(config.scheduler.retry.backoff_base_ms, 10);
        assert_eq!(config.scheduler.retry.backoff_max_ms, 2_000);
        assert_eq!(config.hooks.consensus_floor, Some(0.7));
        assert_eq!(config.swarm.max_retained_swarms, 256);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = EngineConfig::from_toml_str(
            r#"
            [scheduler]
            max_concurrency = 0
            [swarm]
            consensus_threshold = 1.5
            "#,
        )
        .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("max_concurrency"));
        assert!(msg.contains("consensus_threshold"));
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = RetryPolicy {
            backoff_base_ms: 100,
            backoff_max_ms: 500,
        };
        assert_eq!(policy.backoff(0), Duration::from_millis(100));
        assert_eq!(policy.backoff(1), Duration::from_millis(200));
        assert_eq!(policy.backoff(5), Duration::from_millis(500));
        assert_eq!(RetryPolicy::immediate().backoff(3), Duration::ZERO);
    }
}
