use crate::bus::{Hook, HookContext, HookVerdict};
use async_trait::async_trait;
use machinist_core::json::as_f64;
use machinist_core::MachinistResult;
use serde_json::json;
use tracing::info;

/// Emits a structured log line for every invocation it receives.
pub struct TracingHook;

#[async_trait]
impl Hook for TracingHook {
    fn name(&self) -> &str {
        "tracing"
    }

    async fn call(&self, ctx: &HookContext) -> MachinistResult<HookVerdict> {
        info!(
            hook_name = %ctx.hook_name,
            operation = %ctx.operation,
            target_type = %ctx.target.kind,
            target_id = %ctx.target.id,
            "Hook fired"
        );
        Ok(HookVerdict::Continue)
    }
}

/// Vetoes a consensus result whose agreement falls below a floor.
///
/// Reads `actualAgreement` from the target data of a `swarm:consensus`
/// invocation; other invocations pass through.
pub struct ConsensusFloorHook {
    floor: f64,
}

impl ConsensusFloorHook {
    pub fn new(floor: f64) -> Self {
        Self { floor }
    }
}

#[async_trait]
impl Hook for ConsensusFloorHook {
    fn name(&self) -> &str {
        "consensus_floor"
    }

    async fn call(&self, ctx: &HookContext) -> MachinistResult<HookVerdict> {
        let Some(agreement) = ctx.target.data.get("actualAgreement").and_then(as_f64) else {
            return Ok(HookVerdict::Continue);
        };
        if agreement < self.floor {
            return Ok(HookVerdict::Veto(format!(
                "agreement {agreement:.3} below floor {:.3}",
                self.floor
            )));
        }
        Ok(HookVerdict::Annotate(json!({
            "validator": "consensus_floor",
            "floor": self.floor,
            "passed": true,
        })))
    }
}
