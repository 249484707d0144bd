//! Pure functions that combine agent outputs: reducers, partitioning,
//! value grouping, weighting and scoring.

use super::types::{Reducer, SwarmOptions};
use machinist_core::json::{as_f64, merge, value_at, with_field};
use machinist_core::{MachinistError, MachinistResult};
use serde_json::{json, Map, Number, Value};

/// Equality used to group votes. Numbers compare by value, so `6` and `6.0`
/// agree.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(a, b)| values_equal(a, b))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x.iter()
                    .all(|(k, v)| y.get(k).is_some_and(|other| values_equal(v, other)))
        }
        _ => a == b,
    }
}

/// Group values by equality, keeping first-seen order. Each group holds the
/// indices of its members.
pub fn group_values(values: &[Value]) -> Vec<(Value, Vec<usize>)> {
    let mut groups: Vec<(Value, Vec<usize>)> = Vec::new();
    for (index, value) in values.iter().enumerate() {
        match groups.iter_mut().find(|(v, _)| values_equal(v, value)) {
            Some((_, members)) => members.push(index),
            None => groups.push((value.clone(), vec![index])),
        }
    }
    groups
}

/// The value compared by consensus and ensemble: the whole output, or the
/// value at `consensusField`.
pub fn voted_value(output: &Value, field: Option<&str>) -> Value {
    match field {
        Some(path) => value_at(output, path).cloned().unwrap_or(Value::Null),
        None => output.clone(),
    }
}

pub fn reduce(reducer: Reducer, values: &[Value]) -> MachinistResult<Value> {
    match reducer {
        Reducer::Auto => reduce_auto(values),
        Reducer::Collect => Ok(Value::Array(values.to_vec())),
        Reducer::Sum => sum(values),
        Reducer::Mean => {
            let numbers = numbers(values, "mean")?;
            if numbers.is_empty() {
                return Ok(Value::Null);
            }
            Ok(json!(numbers.iter().sum::<f64>() / numbers.len() as f64))
        }
        Reducer::Min => extreme(values, "min", |candidate, best| candidate < best),
        Reducer::Max => extreme(values, "max", |candidate, best| candidate > best),
        Reducer::Concat => Ok(Value::Array(
            values
                .iter()
                .flat_map(|v| match v {
                    Value::Array(items) => items.clone(),
                    other => vec![other.clone()],
                })
                .collect(),
        )),
        Reducer::Merge => {
            let mut merged = Value::Object(Map::new());
            for value in values {
                if !value.is_object() {
                    return Err(MachinistError::Coordination(format!(
                        "merge reducer expects objects, got {value}"
                    )));
                }
                merged = merge(&merged, value);
            }
            Ok(merged)
        }
    }
}

fn reduce_auto(values: &[Value]) -> MachinistResult<Value> {
    if values.is_empty() {
        return Ok(Value::Array(Vec::new()));
    }
    if values.iter().all(Value::is_number) {
        sum(values)
    } else if values.iter().all(Value::is_array) {
        reduce(Reducer::Concat, values)
    } else if values.iter().all(Value::is_object) {
        reduce(Reducer::Merge, values)
    } else {
        reduce(Reducer::Collect, values)
    }
}

/// Integers stay integers when every input is an integer.
fn sum(values: &[Value]) -> MachinistResult<Value> {
    if values.iter().all(|v| v.as_i64().is_some()) {
        let total = values.iter().filter_map(Value::as_i64).try_fold(0i64, i64::checked_add);
        if let Some(total) = total {
            return Ok(Value::Number(Number::from(total)));
        }
    }
    Ok(json!(numbers(values, "sum")?.iter().sum::<f64>()))
}

fn numbers(values: &[Value], reducer: &str) -> MachinistResult<Vec<f64>> {
    values
        .iter()
        .map(|v| {
            as_f64(v).ok_or_else(|| {
                MachinistError::Coordination(format!(
                    "{reducer} reducer expects numbers, got {v}"
                ))
            })
        })
        .collect()
}

/// The first value whose number beats every other, returned unchanged.
fn extreme(
    values: &[Value],
    reducer: &str,
    better: impl Fn(f64, f64) -> bool,
) -> MachinistResult<Value> {
    let numbers = numbers(values, reducer)?;
    let mut best: Option<usize> = None;
    for (index, n) in numbers.iter().enumerate() {
        if best.map_or(true, |b| better(*n, numbers[b])) {
            best = Some(index);
        }
    }
    Ok(best.map_or(Value::Null, |i| values[i].clone()))
}

/// Split the input into one partition per agent.
///
/// An array (or the array at `field`) is cut into contiguous chunks whose
/// sizes differ by at most one. Anything else is broadcast with its
/// `partition`/`partitions` indices.
pub fn partition(input: &Value, agents: usize, field: Option<&str>) -> MachinistResult<Vec<Value>> {
    let target = match field {
        Some(path) => value_at(input, path).ok_or_else(|| {
            MachinistError::validation(format!("partitionField '{path}' not found in input"))
        })?,
        None => input,
    };
    let Value::Array(items) = target else {
        if field.is_some() {
            return Err(MachinistError::validation(
                "partitionField must point to an array",
            ));
        }
        return Ok((0..agents)
            .map(|i| {
                let tagged = with_field(input, "partition", json!(i));
                with_field(&tagged, "partitions", json!(agents))
            })
            .collect());
    };

    let base = items.len() / agents.max(1);
    let extra = items.len() % agents.max(1);
    let mut start = 0;
    let mut parts = Vec::with_capacity(agents);
    for i in 0..agents {
        let len = base + usize::from(i < extra);
        let chunk = Value::Array(items[start..start + len].to_vec());
        start += len;
        parts.push(match field {
            // Top-level arrays are handed over as the bare chunk.
            None => chunk,
            Some(path) => {
                let replaced = replace_at(input, path, chunk);
                let tagged = with_field(&replaced, "partition", json!(i));
                with_field(&tagged, "partitions", json!(agents))
            }
        });
    }
    Ok(parts)
}

fn replace_at(input: &Value, path: &str, value: Value) -> Value {
    let mut out = input.clone();
    let pointer: String = path
        .split('.')
        .map(|segment| format!("/{}", segment.replace('~', "~0").replace('/', "~1")))
        .collect();
    if let Some(slot) = out.pointer_mut(&pointer) {
        *slot = value;
    }
    out
}

/// Weighted combination of ensemble votes. Numbers give the weight-normalized
/// mean; anything else gives the value with the largest total weight.
pub fn weighted_ensemble(votes: &[(Value, f64)]) -> Option<Value> {
    if votes.is_empty() {
        return None;
    }
    if votes.iter().all(|(v, _)| v.is_number()) {
        let total_weight: f64 = votes.iter().map(|(_, w)| w).sum();
        let mean = if total_weight > 0.0 {
            votes
                .iter()
                .filter_map(|(v, w)| v.as_f64().map(|n| n * w))
                .sum::<f64>()
                / total_weight
        } else {
            votes.iter().filter_map(|(v, _)| v.as_f64()).sum::<f64>() / votes.len() as f64
        };
        return Some(json!(mean));
    }

    let values: Vec<Value> = votes.iter().map(|(v, _)| v.clone()).collect();
    let mut best: Option<(Value, f64)> = None;
    for (value, members) in group_values(&values) {
        let weight: f64 = members.iter().map(|&i| votes[i].1).sum();
        if best.as_ref().map_or(true, |(_, w)| weight > *w) {
            best = Some((value, weight));
        }
    }
    best.map(|(value, _)| value)
}

/// Score of a competition entry: caller scorer, else `scoreField`, else
/// `score`, else `confidence`.
pub fn score_of(output: &Value, options: &SwarmOptions) -> Option<f64> {
    if let Some(scorer) = &options.scorer {
        return scorer(output).filter(|s| s.is_finite());
    }
    let score = match &options.score_field {
        Some(path) => value_at(output, path).and_then(as_f64),
        None => output
            .get("score")
            .and_then(as_f64)
            .or_else(|| output.get("confidence").and_then(as_f64)),
    };
    score.filter(|s| s.is_finite())
}
