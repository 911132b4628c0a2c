use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Largest difference between a proposal budget's stated total and the sum of its
/// parts that is still considered consistent.
pub const BUDGET_TOLERANCE: Decimal = Decimal::ONE;

pub const MIN_ELIGIBILITY_SCORE: f64 = 0.0;
pub const MAX_ELIGIBILITY_SCORE: f64 = 100.0;

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GrantId(pub String);

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Grant {
    pub id: GrantId,
    pub name: String,
    pub funder: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
    pub deadline: NaiveDate,
    pub eligibility_score: f64,
    pub match_reasons: Vec<String>,
    pub url: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposalBudget {
    #[serde(with = "rust_decimal::serde::float")]
    pub personnel: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub equipment: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub operations: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub total: Decimal,
}

impl ProposalBudget {
    /// `None` when the parts overflow `Decimal`.
    pub fn parts_sum(&self) -> Option<Decimal> {
        self.personnel.checked_add(self.equipment)?.checked_add(self.operations)
    }

    pub fn is_reconciled(&self) -> bool {
        self.parts_sum()
            .and_then(|sum| sum.checked_sub(self.total))
            .is_some_and(|difference| difference.abs() <= BUDGET_TOLERANCE)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrantProposal {
    pub grant_id: GrantId,
    pub executive_summary: String,
    pub problem_statement: String,
    pub solution: String,
    pub budget: ProposalBudget,
    pub impact_metrics: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrantAssessment {
    pub grants: Vec<Grant>,
    pub proposals: Vec<GrantProposal>,
}

impl GrantAssessment {
    pub fn grant(&self, id: &GrantId) -> Option<&Grant> {
        self.grants.iter().find(|grant| &grant.id == id)
    }
}
