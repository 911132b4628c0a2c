pub mod config;
pub mod domain;
pub mod errors;
pub mod parsing;

pub use chrono;

pub use domain::agent::{AgentKind, AgentOutput};
pub use domain::grant::{Grant, GrantAssessment, GrantId, GrantProposal, ProposalBudget};
pub use domain::plan::{Alert, AlertSeverity, ExecutionPlan, PlanMetrics, Priority, Task, TaskId};
pub use domain::usage::{QuotaKind, SubjectId, UsageCounter, UsageDecision};
pub use errors::{ApplicationError, DomainError, ExtractionError, InterfaceError, PipelineFailure};
pub use parsing::{parse_execution_plan, parse_grant_assessment, OutputParser, ParseResult};
