//! Best-effort coercion of structurally valid JSON into typed domain objects.
//!
//! Nothing here fails. Every substitution made on the way is recorded as an
//! adjustment so the caller can surface it as a data-quality warning.

use std::collections::BTreeSet;
use std::str::FromStr;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde_json::{Map, Value};
use url::Url;

use crate::domain::grant::{
    Grant, GrantAssessment, GrantId, GrantProposal, ProposalBudget, MAX_ELIGIBILITY_SCORE,
    MIN_ELIGIBILITY_SCORE,
};
use crate::domain::plan::{
    Alert, AlertSeverity, ExecutionPlan, PlanMetrics, Priority, Task, TaskId,
};
use crate::parsing::structural::{GRANTS_KEY, PLAN_ALERTS_KEY, PLAN_METRICS_KEY, PLAN_TASKS_KEY, PROPOSALS_KEY};

pub const DEFAULT_TASK_TITLE: &str = "Untitled Task";
pub const DEFAULT_OWNER: &str = "founder";
pub const DEFAULT_ALERT_MESSAGE: &str = "No details provided";
pub const DEFAULT_GRANT_NAME: &str = "Untitled Grant";
pub const DEFAULT_FUNDER: &str = "Unknown Funder";
pub const PLACEHOLDER_URL: &str = "https://example.com/grant-not-found";
pub const DATE_FORMAT: &str = "%Y-%m-%d";

const ID_SUFFIX_LEN: usize = 6;

#[derive(Clone, Debug, PartialEq)]
pub struct Normalized<T> {
    pub value: T,
    pub adjustments: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct Normalizer {
    now: DateTime<Utc>,
}

impl Normalizer {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self { now }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    pub fn today(&self) -> NaiveDate {
        self.now.date_naive()
    }

    /// Fallback deadline for unparsable dates.
    pub fn tomorrow(&self) -> NaiveDate {
        self.today() + Duration::days(1)
    }

    pub fn normalize_plan(&self, value: &Value) -> Normalized<ExecutionPlan> {
        let mut notes = Vec::new();

        let tasks = array(value, PLAN_TASKS_KEY)
            .iter()
            .enumerate()
            .filter_map(|(index, item)| item.as_object().map(|task| (index, task)))
            .map(|(index, task)| self.task(task, &format!("{PLAN_TASKS_KEY}[{index}]"), &mut notes))
            .collect();

        let alerts = array(value, PLAN_ALERTS_KEY)
            .iter()
            .enumerate()
            .filter_map(|(index, item)| item.as_object().map(|alert| (index, alert)))
            .map(|(index, alert)| alert_from(alert, &format!("{PLAN_ALERTS_KEY}[{index}]"), &mut notes))
            .collect();

        let metrics = value
            .get(PLAN_METRICS_KEY)
            .and_then(Value::as_object)
            .map(|metrics| metrics_from(metrics, &mut notes))
            .unwrap_or_default();

        Normalized { value: ExecutionPlan { tasks, alerts, metrics }, adjustments: notes }
    }

    pub fn normalize_grants(&self, value: &Value) -> Normalized<GrantAssessment> {
        let mut notes = Vec::new();

        let grants = array(value, GRANTS_KEY)
            .iter()
            .enumerate()
            .filter_map(|(index, item)| item.as_object().map(|grant| (index, grant)))
            .map(|(index, grant)| self.grant(grant, &format!("{GRANTS_KEY}[{index}]"), &mut notes))
            .collect();

        let proposals = array(value, PROPOSALS_KEY)
            .iter()
            .enumerate()
            .filter_map(|(index, item)| item.as_object().map(|proposal| (index, proposal)))
            .map(|(index, proposal)| {
                proposal_from(proposal, &format!("{PROPOSALS_KEY}[{index}]"), &mut notes)
            })
            .collect();

        Normalized { value: GrantAssessment { grants, proposals }, adjustments: notes }
    }

    fn task(&self, task: &Map<String, Value>, path: &str, notes: &mut Vec<String>) -> Task {
        let id = match text(task, &["taskId", "id"]) {
            Some(id) => id,
            None => {
                let generated = self.generate_id("task");
                notes.push(format!("{path}.taskId missing, generated `{generated}`"));
                generated
            }
        };

        let title = text(task, &["title", "name"]).unwrap_or_else(|| {
            notes.push(format!("{path}.title defaulted to `{DEFAULT_TASK_TITLE}`"));
            DEFAULT_TASK_TITLE.to_string()
        });

        let priority = match text(task, &["priority"]) {
            Some(raw) => Priority::parse(&raw).unwrap_or_else(|| {
                notes.push(format!("{path}.priority `{raw}` not recognized, using `medium`"));
                Priority::Medium
            }),
            None => {
                notes.push(format!("{path}.priority missing, using `medium`"));
                Priority::Medium
            }
        };

        let owner = text(task, &["owner", "assignee"]).unwrap_or_else(|| {
            notes.push(format!("{path}.owner defaulted to `{DEFAULT_OWNER}`"));
            DEFAULT_OWNER.to_string()
        });

        let deadline = self.date(task.get("deadline"), &format!("{path}.deadline"), notes);
        let estimated_hours =
            non_negative(task.get("estimatedHours"), &format!("{path}.estimatedHours"), notes);

        let dependencies = string_list(task.get("dependencies"))
            .into_iter()
            .map(TaskId)
            .collect::<BTreeSet<_>>();

        Task { id: TaskId(id), title, priority, owner, deadline, estimated_hours, dependencies }
    }

    fn grant(&self, grant: &Map<String, Value>, path: &str, notes: &mut Vec<String>) -> Grant {
        let id = match text(grant, &["id", "grantId"]) {
            Some(id) => id,
            None => {
                let generated = self.generate_id("grant");
                notes.push(format!("{path}.id missing, generated `{generated}`"));
                generated
            }
        };

        let name = text(grant, &["name", "title"]).unwrap_or_else(|| {
            notes.push(format!("{path}.name defaulted to `{DEFAULT_GRANT_NAME}`"));
            DEFAULT_GRANT_NAME.to_string()
        });
        let funder = text(grant, &["funder", "organization"]).unwrap_or_else(|| {
            notes.push(format!("{path}.funder defaulted to `{DEFAULT_FUNDER}`"));
            DEFAULT_FUNDER.to_string()
        });

        let amount = money(grant.get("amount"), &format!("{path}.amount"), notes);
        let deadline = self.date(grant.get("deadline"), &format!("{path}.deadline"), notes);
        let eligibility_score = score(
            grant.get("eligibilityScore").or_else(|| grant.get("score")),
            &format!("{path}.eligibilityScore"),
            notes,
        );
        let match_reasons = string_list(grant.get("matchReasons"));
        let url = url_from(grant.get("url").or_else(|| grant.get("link")), &format!("{path}.url"), notes);

        Grant {
            id: GrantId(id),
            name,
            funder,
            amount,
            deadline,
            eligibility_score,
            match_reasons,
            url,
        }
    }

    fn date(&self, value: Option<&Value>, path: &str, notes: &mut Vec<String>) -> NaiveDate {
        let raw = value.and_then(Value::as_str).map(str::trim).unwrap_or_default();
        if let Some(date) = parse_strict_date(raw) {
            return date;
        }

        let fallback = self.tomorrow();
        if raw.is_empty() {
            notes.push(format!("{path} missing, defaulted to {fallback}"));
        } else {
            notes.push(format!("{path} `{raw}` is not YYYY-MM-DD, defaulted to {fallback}"));
        }
        fallback
    }

    fn generate_id(&self, prefix: &str) -> String {
        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(ID_SUFFIX_LEN)
            .map(|byte| char::from(byte).to_ascii_lowercase())
            .collect();
        format!("{prefix}-{}-{suffix}", self.now.timestamp_millis())
    }
}

fn alert_from(alert: &Map<String, Value>, path: &str, notes: &mut Vec<String>) -> Alert {
    let severity = match text(alert, &["severity", "type"]) {
        Some(raw) => AlertSeverity::parse(&raw).unwrap_or_else(|| {
            notes.push(format!("{path}.severity `{raw}` not recognized, using `info`"));
            AlertSeverity::Info
        }),
        None => AlertSeverity::Info,
    };

    let message = text(alert, &["message"]).unwrap_or_else(|| {
        notes.push(format!("{path}.message defaulted to `{DEFAULT_ALERT_MESSAGE}`"));
        DEFAULT_ALERT_MESSAGE.to_string()
    });

    let affected_task_ids = string_list(alert.get("affectedTasks").or_else(|| alert.get("affectedTaskIds")))
        .into_iter()
        .map(TaskId)
        .collect();

    Alert { severity, message, affected_task_ids }
}

fn metrics_from(metrics: &Map<String, Value>, notes: &mut Vec<String>) -> PlanMetrics {
    let count = |field: &str, notes: &mut Vec<String>| -> u32 {
        let value = non_negative(metrics.get(field), &format!("{PLAN_METRICS_KEY}.{field}"), notes);
        value.round().min(f64::from(u32::MAX)) as u32
    };

    PlanMetrics {
        total_tasks: count("totalTasks", notes),
        high_priority_count: count("highPriorityCount", notes),
        blocked_count: count("blockedCount", notes),
        estimated_weekly_hours: non_negative(
            metrics.get("estimatedWeeklyHours"),
            &format!("{PLAN_METRICS_KEY}.estimatedWeeklyHours"),
            notes,
        ),
    }
}

fn proposal_from(
    proposal: &Map<String, Value>,
    path: &str,
    notes: &mut Vec<String>,
) -> GrantProposal {
    let grant_id = text(proposal, &["grantId", "grant_id"]).unwrap_or_else(|| {
        notes.push(format!("{path}.grantId missing"));
        String::new()
    });

    let budget = match proposal.get("budget").and_then(Value::as_object) {
        Some(budget) => budget_from(budget, &format!("{path}.budget"), notes),
        None => {
            notes.push(format!("{path}.budget missing, defaulted to zero"));
            ProposalBudget::default()
        }
    };

    GrantProposal {
        grant_id: GrantId(grant_id),
        executive_summary: text(proposal, &["executiveSummary"]).unwrap_or_default(),
        problem_statement: text(proposal, &["problemStatement"]).unwrap_or_default(),
        solution: text(proposal, &["solution"]).unwrap_or_default(),
        budget,
        impact_metrics: string_list(proposal.get("impactMetrics")),
    }
}

fn budget_from(budget: &Map<String, Value>, path: &str, notes: &mut Vec<String>) -> ProposalBudget {
    let personnel = money(budget.get("personnel"), &format!("{path}.personnel"), notes);
    let equipment = money(budget.get("equipment"), &format!("{path}.equipment"), notes);
    let operations = money(budget.get("operations"), &format!("{path}.operations"), notes);
    let mut parsed = ProposalBudget { personnel, equipment, operations, total: Decimal::ZERO };
    parsed.total = if budget.contains_key("total") {
        money(budget.get("total"), &format!("{path}.total"), notes)
    } else {
        match parsed.parts_sum() {
            Some(sum) => {
                notes.push(format!("{path}.total missing, using sum of parts {sum}"));
                sum
            }
            None => {
                notes.push(format!(
                    "{path}.total missing and sum of parts overflows, capped at {}",
                    Decimal::MAX
                ));
                Decimal::MAX
            }
        }
    };
    parsed
}

fn array<'a>(value: &'a Value, key: &str) -> &'a [Value] {
    value.get(key).and_then(Value::as_array).map(Vec::as_slice).unwrap_or_default()
}

/// First non-blank string (or number rendered as string) among `keys`.
fn text(object: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match object.get(*key) {
        Some(Value::String(value)) if !value.trim().is_empty() => Some(value.trim().to_string()),
        Some(Value::Number(value)) => Some(value.to_string()),
        _ => None,
    })
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    let Some(Value::Array(items)) = value else {
        return Vec::new();
    };

    let mut seen = BTreeSet::new();
    items
        .iter()
        .filter_map(|item| match item {
            Value::String(value) if !value.trim().is_empty() => Some(value.trim().to_string()),
            Value::Number(value) => Some(value.to_string()),
            _ => None,
        })
        .filter(|item| seen.insert(item.clone()))
        .collect()
}

fn number(value: Option<&Value>) -> Option<f64> {
    let parsed = match value? {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().trim_end_matches('%').trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|value| value.is_finite())
}

fn non_negative(value: Option<&Value>, path: &str, notes: &mut Vec<String>) -> f64 {
    match number(value) {
        Some(parsed) if parsed < 0.0 => {
            notes.push(format!("{path} {parsed} clamped to 0"));
            0.0
        }
        Some(parsed) => parsed,
        None => {
            if value.is_some() {
                notes.push(format!("{path} is not a finite number, defaulted to 0"));
            }
            0.0
        }
    }
}

fn score(value: Option<&Value>, path: &str, notes: &mut Vec<String>) -> f64 {
    match number(value) {
        Some(parsed) => {
            let clamped = parsed.clamp(MIN_ELIGIBILITY_SCORE, MAX_ELIGIBILITY_SCORE);
            if clamped != parsed {
                notes.push(format!("{path} {parsed} clamped to {clamped}"));
            }
            clamped
        }
        None => {
            notes.push(format!("{path} missing or invalid, defaulted to 0"));
            MIN_ELIGIBILITY_SCORE
        }
    }
}

fn money(value: Option<&Value>, path: &str, notes: &mut Vec<String>) -> Decimal {
    let parsed = match value {
        Some(Value::Number(number)) => decimal_from_text(&number.to_string())
            .or_else(|| number.as_f64().and_then(Decimal::from_f64)),
        Some(Value::String(text)) => {
            let cleaned: String =
                text.chars().filter(|ch| !matches!(ch, '$' | ',' | ' ')).collect();
            decimal_from_text(&cleaned)
        }
        _ => None,
    };

    match parsed {
        Some(amount) if amount.is_sign_negative() && !amount.is_zero() => {
            notes.push(format!("{path} {amount} clamped to 0"));
            Decimal::ZERO
        }
        Some(amount) => amount,
        None => {
            notes.push(format!("{path} missing or invalid, defaulted to 0"));
            Decimal::ZERO
        }
    }
}

fn decimal_from_text(text: &str) -> Option<Decimal> {
    Decimal::from_str(text).ok().or_else(|| Decimal::from_scientific(text).ok())
}

fn url_from(value: Option<&Value>, path: &str, notes: &mut Vec<String>) -> String {
    let raw = value.and_then(Value::as_str).map(str::trim).unwrap_or_default();
    match Url::parse(raw) {
        Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => parsed.to_string(),
        _ => {
            notes.push(format!("{path} `{raw}` is not a valid http(s) URL, replaced with placeholder"));
            PLACEHOLDER_URL.to_string()
        }
    }
}

/// Accepts exactly `YYYY-MM-DD`.
pub fn parse_strict_date(raw: &str) -> Option<NaiveDate> {
    let bytes = raw.as_bytes();
    let shaped = bytes.len() == 10
        && bytes[4] == b'-'
        && bytes[7] == b'-'
        && bytes.iter().enumerate().all(|(index, byte)| index == 4 || index == 7 || byte.is_ascii_digit());
    if !shaped {
        return None;
    }
    NaiveDate::parse_from_str(raw, DATE_FORMAT).ok()
}
