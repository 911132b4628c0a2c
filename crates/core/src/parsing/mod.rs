//! Structured-output pipeline: extract, check shape, normalize, validate.
//!
//! Every stage after extraction works on a `serde_json::Value`, so failures are
//! reported as data rather than propagated. Callers receive a [`ParseResult`] whose
//! `errors` carry the failing stage as a prefix and whose `warnings` include every
//! normalizer adjustment.

pub mod extract;
pub mod normalize;
pub mod semantic;
pub mod structural;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::agent::{AgentKind, AgentOutput};
use crate::domain::grant::GrantAssessment;
use crate::domain::plan::ExecutionPlan;
use crate::errors::PipelineFailure;

pub use extract::{extract_json, extract_json_permissive, extract_object, strip_code_fences, Extracted};
pub use normalize::{Normalized, Normalizer};
pub use semantic::{validate_grants, validate_plan, ValidationReport};
pub use structural::{validate_grant_shape, validate_plan_shape};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParseResult<T> {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    #[serde(skip)]
    failure: Option<PipelineFailure>,
}

impl<T> ParseResult<T> {
    fn failed(failure: PipelineFailure, warnings: Vec<String>) -> Self {
        Self { success: false, data: None, errors: failure.messages(), warnings, failure: Some(failure) }
    }

    fn validated(value: T, report: ValidationReport, mut warnings: Vec<String>) -> Self {
        let ValidationReport { errors, warnings: semantic_warnings } = report;
        let mut combined = semantic_warnings;
        combined.append(&mut warnings);

        if errors.is_empty() {
            return Self { success: true, data: Some(value), errors, warnings: combined, failure: None };
        }
        Self::failed(PipelineFailure::Semantic(errors), combined)
    }

    /// Stage that rejected the output; `None` on success.
    pub fn failure(&self) -> Option<&PipelineFailure> {
        self.failure.as_ref()
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> ParseResult<U> {
        ParseResult {
            success: self.success,
            data: self.data.map(f),
            errors: self.errors,
            warnings: self.warnings,
            failure: self.failure,
        }
    }
}

/// One implementation per agent output variant.
pub trait StructuredOutput: Sized {
    fn check_shape(value: &Value) -> Result<(), Vec<String>>;
    fn normalize(normalizer: &Normalizer, value: &Value) -> Normalized<Self>;
    fn validate(&self, today: NaiveDate) -> ValidationReport;
}

impl StructuredOutput for ExecutionPlan {
    fn check_shape(value: &Value) -> Result<(), Vec<String>> {
        validate_plan_shape(value)
    }

    fn normalize(normalizer: &Normalizer, value: &Value) -> Normalized<Self> {
        normalizer.normalize_plan(value)
    }

    fn validate(&self, today: NaiveDate) -> ValidationReport {
        validate_plan(self, today)
    }
}

impl StructuredOutput for GrantAssessment {
    fn check_shape(value: &Value) -> Result<(), Vec<String>> {
        validate_grant_shape(value)
    }

    fn normalize(normalizer: &Normalizer, value: &Value) -> Normalized<Self> {
        normalizer.normalize_grants(value)
    }

    fn validate(&self, today: NaiveDate) -> ValidationReport {
        validate_grants(self, today)
    }
}

#[derive(Clone, Debug)]
pub struct OutputParser {
    normalizer: Normalizer,
}

impl OutputParser {
    pub fn at(now: DateTime<Utc>) -> Self {
        Self { normalizer: Normalizer::new(now) }
    }

    pub fn now() -> Self {
        Self::at(Utc::now())
    }

    pub fn parse_plan(&self, raw: &str) -> ParseResult<ExecutionPlan> {
        self.run(raw)
    }

    pub fn parse_grants(&self, raw: &str) -> ParseResult<GrantAssessment> {
        self.run(raw)
    }

    pub fn parse(&self, kind: AgentKind, raw: &str) -> ParseResult<AgentOutput> {
        match kind {
            AgentKind::ExecutionPlanner => self.parse_plan(raw).map(AgentOutput::ExecutionPlan),
            AgentKind::GrantScout => self.parse_grants(raw).map(AgentOutput::GrantAssessment),
        }
    }

    fn run<T: StructuredOutput>(&self, raw: &str) -> ParseResult<T> {
        let extracted = match extract_object(raw) {
            Ok(extracted) => extracted,
            Err(error) => return ParseResult::failed(PipelineFailure::Extraction(error), Vec::new()),
        };

        let parsed = match extracted.value {
            Some(value) => Ok(value),
            None => serde_json::from_str::<Value>(&extracted.text),
        };
        let value = match parsed {
            Ok(value) => value,
            Err(error) => {
                return ParseResult::failed(
                    PipelineFailure::Structural(vec![format!("invalid JSON: {error}")]),
                    Vec::new(),
                )
            }
        };

        if let Err(errors) = T::check_shape(&value) {
            return ParseResult::failed(PipelineFailure::Structural(errors), Vec::new());
        }

        let Normalized { value: output, adjustments } = T::normalize(&self.normalizer, &value);
        let report = output.validate(self.normalizer.today());
        ParseResult::validated(output, report, adjustments)
    }
}

pub fn parse_execution_plan(raw: &str) -> ParseResult<ExecutionPlan> {
    OutputParser::now().parse_plan(raw)
}

pub fn parse_grant_assessment(raw: &str) -> ParseResult<GrantAssessment> {
    OutputParser::now().parse_grants(raw)
}
