use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use launchpad_core::config::LlmConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self { max_tokens: 2048, temperature: 0.7 }
    }
}

impl From<&LlmConfig> for GenerationParams {
    fn from(config: &LlmConfig) -> Self {
        Self { max_tokens: config.max_tokens, temperature: config.temperature }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub prompt: String,
    pub params: GenerationParams,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    pub text: String,
    pub tokens_used: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmFailure {
    RateLimited,
    Timeout,
    Unavailable,
    InvalidRequest,
    Unauthorized,
    ContentFiltered,
}

impl LlmFailure {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited | Self::Timeout | Self::Unavailable)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RateLimited => "rate_limited",
            Self::Timeout => "timeout",
            Self::Unavailable => "unavailable",
            Self::InvalidRequest => "invalid_request",
            Self::Unauthorized => "unauthorized",
            Self::ContentFiltered => "content_filtered",
        }
    }
}

impl fmt::Display for LlmFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Error, PartialEq)]
pub enum LlmError {
    #[error("retryable inference failure ({failure}): {message}")]
    Retryable { failure: LlmFailure, message: String },
    #[error("inference failed ({failure}): {message}")]
    NonRetryable { failure: LlmFailure, message: String },
}

impl LlmError {
    /// Classifies by failure kind.
    pub fn new(failure: LlmFailure, message: impl Into<String>) -> Self {
        let message = message.into();
        if failure.is_retryable() {
            Self::Retryable { failure, message }
        } else {
            Self::NonRetryable { failure, message }
        }
    }

    pub fn failure(&self) -> LlmFailure {
        match self {
            Self::Retryable { failure, .. } | Self::NonRetryable { failure, .. } => *failure,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable { .. })
    }
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, LlmError>;
}

/// Retries retryable failures with exponential backoff (`base_delay × 2^retry`).
pub struct RetryingLlmClient<C> {
    inner: C,
    max_attempts: u32,
    base_delay: Duration,
}

impl<C: LlmClient> RetryingLlmClient<C> {
    pub fn new(inner: C, max_attempts: u32, base_delay: Duration) -> Self {
        Self { inner, max_attempts: max_attempts.max(1), base_delay }
    }

    pub fn from_config(inner: C, config: &LlmConfig) -> Self {
        Self::new(inner, config.max_retries, Duration::from_millis(config.retry_base_delay_ms))
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    fn delay_for(&self, retry: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.checked_pow(retry).unwrap_or(u32::MAX))
    }
}

#[async_trait]
impl<C: LlmClient> LlmClient for RetryingLlmClient<C> {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, LlmError> {
        let mut attempt = 1;
        loop {
            match self.inner.complete(request).await {
                Ok(completion) => return Ok(completion),
                Err(error) if error.is_retryable() && attempt < self.max_attempts => {
                    let delay = self.delay_for(attempt - 1);
                    warn!(
                        event_name = "llm.retry",
                        attempt,
                        max_attempts = self.max_attempts,
                        failure = error.failure().as_str(),
                        delay_ms = delay.as_millis() as u64,
                        "inference failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }
}
