//! Agent runtime: usage gate, inference, structured-output parsing.
//!
//! An invocation follows a fixed sequence:
//! 1. **Gate** (`guardrails`) - translate the free-tier decision into allow/degrade/deny
//! 2. **Infer** (`llm`) - call the model through a retrying client
//! 3. **Account** - record the tokens the model reports
//! 4. **Parse** - run the output pipeline for the requested agent kind
//!
//! The model only produces text. Whether that text becomes a plan or an assessment is
//! decided by the deterministic pipeline in `launchpad-core`.

pub mod guardrails;
pub mod llm;
pub mod runtime;

pub use guardrails::{GuardrailDecision, GuardrailPolicy};
pub use llm::{Completion, CompletionRequest, GenerationParams, LlmClient, LlmError, LlmFailure, RetryingLlmClient};
pub use runtime::{AgentError, AgentInvocation, AgentRequest, AgentRuntime};
