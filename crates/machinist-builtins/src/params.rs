use machinist_core::{MachinistError, MachinistResult};
use serde_json::Value;

/// Read a required numeric field from an agent input.
pub(crate) fn number(input: &Value, field: &str) -> MachinistResult<f64> {
    input
        .get(field)
        .and_then(Value::as_f64)
        .filter(|n| n.is_finite())
        .ok_or_else(|| MachinistError::AgentFailure(format!("missing or non-numeric '{field}'")))
}

/// Like [`number`], but the value must be strictly positive.
pub(crate) fn positive(input: &Value, field: &str) -> MachinistResult<f64> {
    let value = number(input, field)?;
    if value <= 0.0 {
        return Err(MachinistError::AgentFailure(format!(
            "'{field}' must be positive, got {value}"
        )));
    }
    Ok(value)
}

/// Optional numeric field with a fallback.
pub(crate) fn number_or(input: &Value, field: &str, default: f64) -> MachinistResult<f64> {
    match input.get(field) {
        None | Some(Value::Null) => Ok(default),
        Some(_) => number(input, field),
    }
}

/// Round to `places` decimals so outputs compare cleanly across agents.
pub(crate) fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}
