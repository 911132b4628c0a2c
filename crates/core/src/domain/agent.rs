use serde::{Deserialize, Serialize};

use crate::domain::grant::GrantAssessment;
use crate::domain::plan::ExecutionPlan;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    ExecutionPlanner,
    GrantScout,
}

impl AgentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ExecutionPlanner => "execution_planner",
            Self::GrantScout => "grant_scout",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "execution_planner" | "plan" | "execution_plan" => Some(Self::ExecutionPlanner),
            "grant_scout" | "grants" | "grant_assessment" => Some(Self::GrantScout),
            _ => None,
        }
    }
}

/// Validated agent output, one variant per agent kind.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum AgentOutput {
    ExecutionPlan(ExecutionPlan),
    GrantAssessment(GrantAssessment),
}

impl AgentOutput {
    pub fn kind(&self) -> AgentKind {
        match self {
            Self::ExecutionPlan(_) => AgentKind::ExecutionPlanner,
            Self::GrantAssessment(_) => AgentKind::GrantScout,
        }
    }
}
