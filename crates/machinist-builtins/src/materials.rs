use crate::params::{number_or, positive, round_to};
use async_trait::async_trait;
use machinist_agents::{Agent, AgentDescriptor};
use machinist_core::{MachinistError, MachinistResult};
use serde::Serialize;
use serde_json::{json, Value};

const CATEGORY: &str = "material";

/// Workpiece material with Kienzle cutting-force coefficients.
///
/// Figures are typical handbook values for carbide tooling, good enough for
/// exercising the engine and not meant for production planning.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Material {
    /// Lookup key, lowercase with underscores.
    pub id: &'static str,
    /// Human-readable name with the common designation.
    pub name: &'static str,
    /// ISO 513 group: P steel, M stainless, K cast iron, N non-ferrous, S superalloys.
    pub iso_group: &'static str,
    /// Brinell hardness.
    pub hardness_hb: u32,
    /// Specific cutting force at 1 mm chip thickness, N/mm².
    pub kc11: f64,
    /// Kienzle exponent.
    pub mc: f64,
    /// Recommended cutting speed range, m/min.
    pub cutting_speed_m_min: [f64; 2],
}

/// Built-in material table.
pub const MATERIALS: &[Material] = &[
    Material {
        id: "steel_1045",
        name: "Medium carbon steel (C45)",
        iso_group: "P",
        hardness_hb: 180,
        kc11: 1500.0,
        mc: 0.25,
        cutting_speed_m_min: [180.0, 280.0],
    },
    Material {
        id: "steel_4140",
        name: "Chromium-molybdenum steel (42CrMo4)",
        iso_group: "P",
        hardness_hb: 250,
        kc11: 1800.0,
        mc: 0.25,
        cutting_speed_m_min: [150.0, 220.0],
    },
    Material {
        id: "stainless_304",
        name: "Austenitic stainless steel (X5CrNi18-10)",
        iso_group: "M",
        hardness_hb: 180,
        kc11: 2000.0,
        mc: 0.21,
        cutting_speed_m_min: [120.0, 200.0],
    },
    Material {
        id: "gray_iron",
        name: "Gray cast iron (EN-GJL-250)",
        iso_group: "K",
        hardness_hb: 200,
        kc11: 1100.0,
        mc: 0.28,
        cutting_speed_m_min: [150.0, 300.0],
    },
    Material {
        id: "aluminum_6061",
        name: "Wrought aluminium alloy (6061-T6)",
        iso_group: "N",
        hardness_hb: 95,
        kc11: 700.0,
        mc: 0.25,
        cutting_speed_m_min: [300.0, 1000.0],
    },
    Material {
        id: "titanium_ti6al4v",
        name: "Titanium alloy (Ti-6Al-4V)",
        iso_group: "S",
        hardness_hb: 330,
        kc11: 1400.0,
        mc: 0.23,
        cutting_speed_m_min: [40.0, 80.0],
    },
];

/// Look a material up by id, ignoring case and treating `-` like `_`.
pub fn find_material(id: &str) -> Option<&'static Material> {
    let wanted = id.trim().to_lowercase().replace('-', "_");
    MATERIALS.iter().find(|m| m.id == wanted)
}

fn material_ids() -> String {
    MATERIALS.iter().map(|m| m.id).collect::<Vec<_>>().join(", ")
}

fn material_field(input: &Value) -> MachinistResult<&str> {
    input
        .get("material")
        .and_then(Value::as_str)
        .ok_or_else(|| MachinistError::AgentFailure("missing 'material'".into()))
}

/// Returns the material record for `{"material": id}`.
///
/// An unknown id is reported in-band with `"success": false`, which the
/// scheduler treats as a failed attempt.
pub struct MaterialLookupAgent {
    descriptor: AgentDescriptor,
}

impl MaterialLookupAgent {
    pub fn new() -> Self {
        Self {
            descriptor: AgentDescriptor::new("material_lookup", "Material lookup", CATEGORY),
        }
    }
}

impl Default for MaterialLookupAgent {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Agent for MaterialLookupAgent {
    fn descriptor(&self) -> &AgentDescriptor {
        &self.descriptor
    }

    async fn invoke(&self, input: Value) -> MachinistResult<Value> {
        let id = material_field(&input)?;
        match find_material(id) {
            Some(material) => Ok(serde_json::to_value(material)?),
            None => Ok(json!({
                "success": false,
                "error": format!("unknown material '{id}' (known: {})", material_ids()),
            })),
        }
    }
}

/// Main cutting force by the Kienzle model.
///
/// With feed `f`, depth `ap` and entering angle `κ`: chip thickness
/// `h = f·sin κ`, chip width `b = ap / sin κ`, and `Fc = kc1.1 · b · h^(1 - mc)`.
/// When `cutting_speed_m_min` is given the cutting power is reported too.
pub struct CuttingForceAgent {
    descriptor: AgentDescriptor,
}

impl CuttingForceAgent {
    pub fn new() -> Self {
        Self {
            descriptor: AgentDescriptor::new("cutting_force", "Kienzle cutting force", CATEGORY),
        }
    }
}

impl Default for CuttingForceAgent {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Agent for CuttingForceAgent {
    fn descriptor(&self) -> &AgentDescriptor {
        &self.descriptor
    }

    async fn invoke(&self, input: Value) -> MachinistResult<Value> {
        let id = material_field(&input)?;
        let material = find_material(id).ok_or_else(|| {
            MachinistError::AgentFailure(format!("unknown material '{id}' (known: {})", material_ids()))
        })?;
        let feed = positive(&input, "feed_mm")?;
        let depth = positive(&input, "depth_mm")?;
        let kappa = number_or(&input, "kappa_deg", 90.0)?;
        if kappa <= 0.0 || kappa > 90.0 {
            return Err(MachinistError::AgentFailure(format!(
                "'kappa_deg' must be within (0, 90], got {kappa}"
            )));
        }

        let sin_kappa = kappa.to_radians().sin();
        let h = feed * sin_kappa;
        let b = depth / sin_kappa;
        let kc = material.kc11 * h.powf(-material.mc);
        let force = kc * b * h;

        let mut out = json!({
            "material": material.id,
            "chip_thickness_mm": round_to(h, 4),
            "chip_width_mm": round_to(b, 4),
            "specific_force_n_mm2": round_to(kc, 1),
            "cutting_force_n": round_to(force, 1),
        });
        if input.get("cutting_speed_m_min").is_some() {
            let vc = positive(&input, "cutting_speed_m_min")?;
            out["power_kw"] = json!(round_to(force * vc / 60_000.0, 3));
        }
        Ok(out)
    }
}
