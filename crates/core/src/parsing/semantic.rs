use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{Duration, NaiveDate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::grant::{GrantAssessment, MAX_ELIGIBILITY_SCORE, MIN_ELIGIBILITY_SCORE};
use crate::domain::plan::{ExecutionPlan, TaskId, PLANNING_HORIZON_DAYS};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    fn error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }
}

pub fn validate_plan(plan: &ExecutionPlan, today: NaiveDate) -> ValidationReport {
    let mut report = ValidationReport::default();

    for id in duplicates(plan.tasks.iter().map(|task| task.id.0.as_str())) {
        report.error(format!("duplicate task id `{id}`"));
    }

    let known: BTreeSet<&str> = plan.tasks.iter().map(|task| task.id.0.as_str()).collect();
    let horizon = today + Duration::days(PLANNING_HORIZON_DAYS);

    for task in &plan.tasks {
        for dependency in &task.dependencies {
            if dependency == &task.id {
                report.error(format!("task `{}` depends on itself", task.id.0));
            } else if !known.contains(dependency.0.as_str()) {
                report.warn(format!(
                    "task `{}` depends on unknown task `{}`",
                    task.id.0, dependency.0
                ));
            }
        }

        if !task.estimated_hours.is_finite() || task.estimated_hours < 0.0 {
            report.error(format!(
                "task `{}` estimatedHours {} must be a non-negative number",
                task.id.0, task.estimated_hours
            ));
        }

        if task.deadline < today {
            report.warn(format!("task `{}` deadline {} is in the past", task.id.0, task.deadline));
        } else if task.deadline > horizon {
            report.warn(format!(
                "task `{}` deadline {} is beyond the {PLANNING_HORIZON_DAYS}-day planning horizon",
                task.id.0, task.deadline
            ));
        }
    }

    for cycle in dependency_cycles(plan) {
        let path = cycle.iter().chain(cycle.first()).cloned().collect::<Vec<_>>().join(" -> ");
        report.error(format!("dependency cycle: {path}"));
    }

    for (index, alert) in plan.alerts.iter().enumerate() {
        for affected in &alert.affected_task_ids {
            if !known.contains(affected.0.as_str()) {
                report.warn(format!("alert {index} references unknown task `{}`", affected.0));
            }
        }
    }

    let actual_total = plan.tasks.len();
    if plan.metrics.total_tasks as usize != actual_total {
        report.warn(format!(
            "metrics.totalTasks is {} but the plan contains {actual_total} tasks",
            plan.metrics.total_tasks
        ));
    }
    let actual_high = plan.high_priority_count();
    if plan.metrics.high_priority_count as usize != actual_high {
        report.warn(format!(
            "metrics.highPriorityCount is {} but the plan contains {actual_high} high priority tasks",
            plan.metrics.high_priority_count
        ));
    }

    report
}

pub fn validate_grants(assessment: &GrantAssessment, today: NaiveDate) -> ValidationReport {
    let mut report = ValidationReport::default();

    for id in duplicates(assessment.grants.iter().map(|grant| grant.id.0.as_str())) {
        report.error(format!("duplicate grant id `{id}`"));
    }

    for grant in &assessment.grants {
        if grant.amount < Decimal::ZERO {
            report.error(format!("grant `{}` amount {} must not be negative", grant.id.0, grant.amount));
        }
        if !(MIN_ELIGIBILITY_SCORE..=MAX_ELIGIBILITY_SCORE).contains(&grant.eligibility_score) {
            report.error(format!(
                "grant `{}` eligibilityScore {} must be within 0..=100",
                grant.id.0, grant.eligibility_score
            ));
        }
        if grant.deadline < today {
            report.warn(format!("grant `{}` deadline {} has already passed", grant.id.0, grant.deadline));
        }
    }

    let known: BTreeSet<&str> = assessment.grants.iter().map(|grant| grant.id.0.as_str()).collect();
    let mut proposals_per_grant: BTreeMap<&str, usize> = BTreeMap::new();

    for (index, proposal) in assessment.proposals.iter().enumerate() {
        let grant_id = proposal.grant_id.0.as_str();
        if grant_id.is_empty() {
            report.error(format!("proposal {index} does not reference a grant"));
            continue;
        }
        if !known.contains(grant_id) {
            report.error(format!("proposal {index} references unknown grant `{grant_id}`"));
        }
        *proposals_per_grant.entry(grant_id).or_default() += 1;

        let budget = &proposal.budget;
        let parts = [
            ("personnel", budget.personnel),
            ("equipment", budget.equipment),
            ("operations", budget.operations),
            ("total", budget.total),
        ];
        for (field, amount) in parts {
            if amount < Decimal::ZERO {
                report.error(format!(
                    "proposal {index} budget.{field} {amount} must not be negative"
                ));
            }
        }

        if !budget.is_reconciled() {
            match budget.parts_sum() {
                Some(sum) => report.warn(format!(
                    "proposal {index} budget total {} differs from sum of parts {sum}",
                    budget.total
                )),
                None => report.warn(format!(
                    "proposal {index} budget parts overflow and cannot be reconciled with total {}",
                    budget.total
                )),
            }
        }
    }

    for (grant_id, count) in proposals_per_grant {
        if count > 1 {
            report.warn(format!("grant `{grant_id}` has {count} proposals"));
        }
    }

    report
}

/// Ids appearing more than once, in order of first appearance.
fn duplicates<'a>(ids: impl Iterator<Item = &'a str>) -> Vec<&'a str> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    let mut order = Vec::new();
    for id in ids {
        let count = counts.entry(id).or_default();
        *count += 1;
        if *count == 2 {
            order.push(id);
        }
    }
    order
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Visit {
    InProgress,
    Done,
}

/// Cycles of two or more tasks, each rotated to start at its smallest id. Self
/// dependencies are reported separately and skipped here.
fn dependency_cycles(plan: &ExecutionPlan) -> BTreeSet<Vec<String>> {
    let adjacency: BTreeMap<&TaskId, Vec<&TaskId>> = plan
        .tasks
        .iter()
        .map(|task| {
            let edges = task.dependencies.iter().filter(|dependency| *dependency != &task.id).collect();
            (&task.id, edges)
        })
        .collect();

    let mut state: HashMap<&TaskId, Visit> = HashMap::new();
    let mut cycles = BTreeSet::new();

    for start in adjacency.keys() {
        if state.contains_key(start) {
            continue;
        }

        let mut path: Vec<&TaskId> = vec![start];
        let mut frames: Vec<(&TaskId, usize)> = vec![(start, 0)];
        state.insert(start, Visit::InProgress);

        while let Some((node, next_edge)) = frames.last_mut() {
            let edges = adjacency.get(node).map(Vec::as_slice).unwrap_or_default();
            if *next_edge >= edges.len() {
                state.insert(*node, Visit::Done);
                frames.pop();
                path.pop();
                continue;
            }

            let neighbor = edges[*next_edge];
            *next_edge += 1;

            if !adjacency.contains_key(neighbor) {
                continue;
            }
            match state.get(neighbor) {
                Some(Visit::InProgress) => {
                    if let Some(position) = path.iter().position(|id| *id == neighbor) {
                        cycles.insert(canonical_cycle(&path[position..]));
                    }
                }
                Some(Visit::Done) => {}
                None => {
                    state.insert(neighbor, Visit::InProgress);
                    path.push(neighbor);
                    frames.push((neighbor, 0));
                }
            }
        }
    }

    cycles
}

fn canonical_cycle(cycle: &[&TaskId]) -> Vec<String> {
    let pivot = cycle
        .iter()
        .enumerate()
        .min_by(|(_, left), (_, right)| left.cmp(right))
        .map(|(index, _)| index)
        .unwrap_or(0);
    cycle[pivot..].iter().chain(&cycle[..pivot]).map(|id| id.0.clone()).collect()
}
