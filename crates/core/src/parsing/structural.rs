//! Shape checks run before any field is interpreted.
//!
//! Only container kinds and the numeric aggregates are verified here. Business
//! invariants belong to [`crate::parsing::semantic`].

use serde_json::{Map, Value};

pub const PLAN_TASKS_KEY: &str = "executionPlan";
pub const PLAN_ALERTS_KEY: &str = "alerts";
pub const PLAN_METRICS_KEY: &str = "metrics";
pub const PLAN_METRIC_FIELDS: [&str; 4] =
    ["totalTasks", "highPriorityCount", "blockedCount", "estimatedWeeklyHours"];

pub const GRANTS_KEY: &str = "grants";
pub const PROPOSALS_KEY: &str = "proposals";
pub const BUDGET_FIELDS: [&str; 4] = ["personnel", "equipment", "operations", "total"];

pub fn validate_plan_shape(value: &Value) -> Result<(), Vec<String>> {
    let Some(root) = value.as_object() else {
        return Err(vec!["response root must be an object".to_string()]);
    };

    let mut errors = Vec::new();
    require_array_of_objects(root, PLAN_TASKS_KEY, &mut errors);
    require_array(root, PLAN_ALERTS_KEY, &mut errors);

    match root.get(PLAN_METRICS_KEY) {
        None => errors.push(format!("{PLAN_METRICS_KEY} is required")),
        Some(Value::Object(metrics)) => {
            for field in PLAN_METRIC_FIELDS {
                require_number(metrics, field, PLAN_METRICS_KEY, &mut errors);
            }
        }
        Some(other) => {
            errors.push(format!("{PLAN_METRICS_KEY} must be an object, found {}", kind(other)))
        }
    }

    finish(errors)
}

pub fn validate_grant_shape(value: &Value) -> Result<(), Vec<String>> {
    let Some(root) = value.as_object() else {
        return Err(vec!["response root must be an object".to_string()]);
    };

    let mut errors = Vec::new();
    require_array_of_objects(root, GRANTS_KEY, &mut errors);
    require_array_of_objects(root, PROPOSALS_KEY, &mut errors);

    if let Some(Value::Array(proposals)) = root.get(PROPOSALS_KEY) {
        for (index, proposal) in proposals.iter().enumerate() {
            let Some(budget) = proposal.get("budget") else {
                continue;
            };
            let path = format!("{PROPOSALS_KEY}[{index}].budget");
            match budget {
                Value::Object(budget) => {
                    for field in BUDGET_FIELDS {
                        if budget.contains_key(field) {
                            require_number(budget, field, &path, &mut errors);
                        }
                    }
                }
                other => errors.push(format!("{path} must be an object, found {}", kind(other))),
            }
        }
    }

    finish(errors)
}

fn require_array(root: &Map<String, Value>, key: &str, errors: &mut Vec<String>) {
    match root.get(key) {
        None => errors.push(format!("{key} is required")),
        Some(Value::Array(_)) => {}
        Some(other) => errors.push(format!("{key} must be an array, found {}", kind(other))),
    }
}

fn require_array_of_objects(root: &Map<String, Value>, key: &str, errors: &mut Vec<String>) {
    match root.get(key) {
        None => errors.push(format!("{key} is required")),
        Some(Value::Array(items)) => {
            for (index, item) in items.iter().enumerate() {
                if !item.is_object() {
                    errors.push(format!("{key}[{index}] must be an object, found {}", kind(item)));
                }
            }
        }
        Some(other) => errors.push(format!("{key} must be an array, found {}", kind(other))),
    }
}

/// Numbers encoded as numeric strings are accepted: the normalizer coerces them.
fn require_number(object: &Map<String, Value>, field: &str, parent: &str, errors: &mut Vec<String>) {
    match object.get(field) {
        Some(Value::Number(_)) => {}
        Some(Value::String(text)) if text.trim().parse::<f64>().is_ok() => {}
        Some(other) => {
            errors.push(format!("{parent}.{field} must be a number, found {}", kind(other)))
        }
        None => errors.push(format!("{parent}.{field} is required")),
    }
}

fn finish(errors: Vec<String>) -> Result<(), Vec<String>> {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
