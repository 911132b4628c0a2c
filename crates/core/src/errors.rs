use thiserror::Error;

use crate::domain::usage::QuotaKind;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ExtractionError {
    #[error("model output is empty")]
    EmptyInput,
    #[error("no JSON object found in model output")]
    NoObject,
    #[error("closing brace at byte {close} precedes opening brace at byte {open}")]
    InvertedSpan { open: usize, close: usize },
    #[error("JSON object starting at byte {open} is never closed")]
    Unterminated { open: usize },
}

/// Stage at which the structured-output pipeline stopped.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PipelineFailure {
    #[error("extraction: {0}")]
    Extraction(#[from] ExtractionError),
    #[error("structure: {}", .0.join("; "))]
    Structural(Vec<String>),
    #[error("semantic: {}", .0.join("; "))]
    Semantic(Vec<String>),
}

impl PipelineFailure {
    pub fn stage(&self) -> &'static str {
        match self {
            Self::Extraction(_) => "extraction",
            Self::Structural(_) => "structure",
            Self::Semantic(_) => "semantic",
        }
    }

    /// Flattened, stage-prefixed messages as surfaced in `ParseResult::errors`.
    pub fn messages(&self) -> Vec<String> {
        match self {
            Self::Extraction(error) => vec![format!("extraction: {error}")],
            Self::Structural(errors) => {
                errors.iter().map(|error| format!("structure: {error}")).collect()
            }
            Self::Semantic(errors) => errors.clone(),
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error(transparent)]
    Pipeline(#[from] PipelineFailure),
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("{} exceeded: {message}", .quota.label())]
    QuotaExceeded { quota: QuotaKind, message: String, retry_after_secs: Option<u64> },
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("integration failure: {0}")]
    Integration(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("too many requests: {message}")]
    TooManyRequests { message: String, retry_after_secs: Option<u64>, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "The agent response could not be processed. Please try again."
            }
            Self::TooManyRequests { .. } => {
                "Your free tier usage limit has been reached. Please wait before retrying."
            }
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::BadRequest { correlation_id, .. }
            | Self::TooManyRequests { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
        }
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::TooManyRequests { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        match value {
            ApplicationError::Domain(error) => {
                Self::BadRequest { message: error.to_string(), correlation_id: "unassigned".to_owned() }
            }
            ApplicationError::QuotaExceeded { message, retry_after_secs, .. } => {
                Self::TooManyRequests {
                    message,
                    retry_after_secs,
                    correlation_id: "unassigned".to_owned(),
                }
            }
            ApplicationError::Persistence(message) | ApplicationError::Integration(message) => {
                Self::ServiceUnavailable { message, correlation_id: "unassigned".to_owned() }
            }
            ApplicationError::Configuration(message) => {
                Self::Internal { message, correlation_id: "unassigned".to_owned() }
            }
        }
    }
}
