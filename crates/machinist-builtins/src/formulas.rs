use crate::params::{number_or, positive, round_to};
use async_trait::async_trait;
use machinist_agents::{Agent, AgentDescriptor};
use machinist_core::{MachinistError, MachinistResult};
use serde_json::{json, Value};
use std::f64::consts::PI;
use tracing::debug;

const CATEGORY: &str = "formula";

/// Cutting speed from tool diameter and spindle speed: `Vc = π·D·n / 1000`.
///
/// Input: `diameter_mm`, `spindle_rpm`. Output: `cutting_speed_m_min`.
pub struct CuttingSpeedAgent {
    descriptor: AgentDescriptor,
}

impl CuttingSpeedAgent {
    pub fn new() -> Self {
        Self {
            descriptor: AgentDescriptor::new("cutting_speed", "Cutting speed", CATEGORY),
        }
    }
}

impl Default for CuttingSpeedAgent {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Agent for CuttingSpeedAgent {
    fn descriptor(&self) -> &AgentDescriptor {
        &self.descriptor
    }

    async fn invoke(&self, input: Value) -> MachinistResult<Value> {
        let diameter = positive(&input, "diameter_mm")?;
        let rpm = positive(&input, "spindle_rpm")?;
        let vc = PI * diameter * rpm / 1000.0;
        Ok(json!({ "cutting_speed_m_min": round_to(vc, 3) }))
    }
}

/// Spindle speed for a target cutting speed: `n = 1000·Vc / (π·D)`.
///
/// An optional `max_rpm` caps the result; the output then carries
/// `"clamped": true`.
pub struct SpindleSpeedAgent {
    descriptor: AgentDescriptor,
}

impl SpindleSpeedAgent {
    pub fn new() -> Self {
        Self {
            descriptor: AgentDescriptor::new("spindle_speed", "Spindle speed", CATEGORY),
        }
    }
}

impl Default for SpindleSpeedAgent {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Agent for SpindleSpeedAgent {
    fn descriptor(&self) -> &AgentDescriptor {
        &self.descriptor
    }

    async fn invoke(&self, input: Value) -> MachinistResult<Value> {
        let diameter = positive(&input, "diameter_mm")?;
        let vc = positive(&input, "cutting_speed_m_min")?;
        let requested = 1000.0 * vc / (PI * diameter);
        let max_rpm = number_or(&input, "max_rpm", f64::INFINITY)?;
        let clamped = requested > max_rpm;
        if clamped {
            debug!(requested_rpm = requested, max_rpm, "Spindle speed clamped");
        }
        Ok(json!({
            "spindle_rpm": round_to(requested.min(max_rpm), 1),
            "clamped": clamped,
        }))
    }
}

/// Table feed for milling: `vf = fz·z·n`.
pub struct FeedRateAgent {
    descriptor: AgentDescriptor,
}

impl FeedRateAgent {
    pub fn new() -> Self {
        Self {
            descriptor: AgentDescriptor::new("feed_rate", "Feed rate", CATEGORY),
        }
    }
}

impl Default for FeedRateAgent {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Agent for FeedRateAgent {
    fn descriptor(&self) -> &AgentDescriptor {
        &self.descriptor
    }

    async fn invoke(&self, input: Value) -> MachinistResult<Value> {
        let rpm = positive(&input, "spindle_rpm")?;
        let fz = positive(&input, "feed_per_tooth_mm")?;
        let teeth = number_or(&input, "teeth", 1.0)?;
        if teeth < 1.0 || teeth.fract() != 0.0 {
            return Err(MachinistError::AgentFailure(format!(
                "'teeth' must be a whole number of at least 1, got {teeth}"
            )));
        }
        Ok(json!({ "feed_rate_mm_min": round_to(fz * teeth * rpm, 3) }))
    }
}

/// Material removal rate: `Q = ap·ae·vf / 1000` in cm³/min.
pub struct MaterialRemovalRateAgent {
    descriptor: AgentDescriptor,
}

impl MaterialRemovalRateAgent {
    pub fn new() -> Self {
        Self {
            descriptor: AgentDescriptor::new(
                "material_removal_rate",
                "Material removal rate",
                CATEGORY,
            ),
        }
    }
}

impl Default for MaterialRemovalRateAgent {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Agent for MaterialRemovalRateAgent {
    fn descriptor(&self) -> &AgentDescriptor {
        &self.descriptor
    }

    async fn invoke(&self, input: Value) -> MachinistResult<Value> {
        let ap = positive(&input, "depth_mm")?;
        let ae = positive(&input, "width_mm")?;
        let vf = positive(&input, "feed_rate_mm_min")?;
        Ok(json!({ "mrr_cm3_min": round_to(ap * ae * vf / 1000.0, 3) }))
    }
}

/// Taylor tool life: `V·Tⁿ = C`, solved for `T` in minutes.
///
/// `taylor_n` defaults to 0.25 (uncoated carbide on steel).
pub struct ToolLifeAgent {
    descriptor: AgentDescriptor,
}

impl ToolLifeAgent {
    pub fn new() -> Self {
        Self {
            descriptor: AgentDescriptor::new("tool_life", "Taylor tool life", CATEGORY),
        }
    }
}

impl Default for ToolLifeAgent {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Agent for ToolLifeAgent {
    fn descriptor(&self) -> &AgentDescriptor {
        &self.descriptor
    }

    async fn invoke(&self, input: Value) -> MachinistResult<Value> {
        let vc = positive(&input, "cutting_speed_m_min")?;
        let c = positive(&input, "taylor_c")?;
        let n = number_or(&input, "taylor_n", 0.25)?;
        if n <= 0.0 || n >= 1.0 {
            return Err(MachinistError::AgentFailure(format!(
                "'taylor_n' must be within (0, 1), got {n}"
            )));
        }
        let minutes = (c / vc).powf(1.0 / n);
        Ok(json!({ "tool_life_min": round_to(minutes, 3) }))
    }
}
