use std::sync::Arc;

use launchpad_core::domain::agent::{AgentKind, AgentOutput};
use launchpad_core::domain::usage::{QuotaKind, SubjectId};
use launchpad_core::errors::ApplicationError;
use launchpad_core::parsing::{OutputParser, ParseResult};
use launchpad_governance::UsageGovernance;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::guardrails::{GuardrailDecision, GuardrailPolicy};
use crate::llm::{CompletionRequest, GenerationParams, LlmClient, LlmError};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AgentRequest {
    pub subject_id: SubjectId,
    pub kind: AgentKind,
    pub prompt: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentInvocation {
    pub correlation_id: String,
    pub kind: AgentKind,
    pub output: ParseResult<AgentOutput>,
    pub tokens_used: u64,
    /// Set when usage could not be verified and the call proceeded anyway.
    pub degraded: bool,
}

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("usage limit reached: {message}")]
    GovernanceDenied {
        quota: Option<QuotaKind>,
        message: String,
        retry_after_secs: Option<u64>,
    },
    #[error(transparent)]
    Llm(#[from] LlmError),
}

impl From<AgentError> for ApplicationError {
    fn from(error: AgentError) -> Self {
        match error {
            AgentError::GovernanceDenied { quota: Some(quota), message, retry_after_secs } => {
                Self::QuotaExceeded { quota, message, retry_after_secs }
            }
            AgentError::GovernanceDenied { quota: None, message, .. } => Self::Persistence(message),
            AgentError::Llm(error) => Self::Integration(error.to_string()),
        }
    }
}

pub struct AgentRuntime {
    governance: Arc<UsageGovernance>,
    llm: Arc<dyn LlmClient>,
    guardrails: GuardrailPolicy,
    params: GenerationParams,
}

impl AgentRuntime {
    pub fn new(governance: Arc<UsageGovernance>, llm: Arc<dyn LlmClient>) -> Self {
        Self { governance, llm, guardrails: GuardrailPolicy::default(), params: GenerationParams::default() }
    }

    pub fn with_guardrails(mut self, guardrails: GuardrailPolicy) -> Self {
        self.guardrails = guardrails;
        self
    }

    pub fn with_params(mut self, params: GenerationParams) -> Self {
        self.params = params;
        self
    }

    pub async fn invoke(&self, request: AgentRequest) -> Result<AgentInvocation, AgentError> {
        let correlation_id = Uuid::new_v4().to_string();
        let AgentRequest { subject_id, kind, prompt } = request;

        let gate = self.governance.check_free_tier_limits(&subject_id).await;
        let degraded = match self.guardrails.evaluate(&gate) {
            GuardrailDecision::Allow => false,
            GuardrailDecision::Degrade { reason_code, .. } => {
                warn!(
                    event_name = "agent.invocation.degraded",
                    correlation_id = %correlation_id,
                    subject = subject_id.as_str(),
                    reason_code,
                    "proceeding without verified usage limits"
                );
                true
            }
            GuardrailDecision::Deny { reason_code, quota, user_message, retry_after_secs } => {
                info!(
                    event_name = "agent.invocation.denied",
                    correlation_id = %correlation_id,
                    subject = subject_id.as_str(),
                    reason_code,
                    "agent invocation blocked by usage governance"
                );
                return Err(AgentError::GovernanceDenied { quota, message: user_message, retry_after_secs });
            }
        };

        let completion = self
            .llm
            .complete(&CompletionRequest { prompt, params: self.params.clone() })
            .await
            .map_err(|error| {
                warn!(
                    event_name = "agent.invocation.llm_failed",
                    correlation_id = %correlation_id,
                    kind = kind.as_str(),
                    error = %error,
                    "inference failed"
                );
                error
            })?;

        self.governance.token_budget().record_usage(&subject_id, completion.tokens_used).await;

        let output = OutputParser::at(self.governance.now()).parse(kind, &completion.text);
        info!(
            event_name = "agent.invocation.completed",
            correlation_id = %correlation_id,
            subject = subject_id.as_str(),
            kind = kind.as_str(),
            success = output.success,
            errors = output.errors.len(),
            warnings = output.warnings.len(),
            tokens_used = completion.tokens_used,
            "agent invocation completed"
        );

        Ok(AgentInvocation { correlation_id, kind, output, tokens_used: completion.tokens_used, degraded })
    }
}
