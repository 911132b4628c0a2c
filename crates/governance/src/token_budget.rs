use std::sync::Arc;

use chrono::{DateTime, Utc};
use launchpad_core::config::TokenBudgetConfig;
use launchpad_core::domain::usage::{QuotaKind, SubjectId, UsageDecision};
use launchpad_db::{RecordStore, StoreError};

use crate::clock::Clock;
use crate::quota::{QuotaTracker, SweepReport, WindowPolicy};

/// Daily token allowance per subject, UTC calendar day.
pub struct TokenBudgetTracker {
    tracker: QuotaTracker,
}

impl TokenBudgetTracker {
    pub fn new(store: Arc<dyn RecordStore>, clock: Arc<dyn Clock>, config: &TokenBudgetConfig) -> Self {
        let tracker = QuotaTracker::new(
            QuotaKind::TokenBudget,
            config.daily_limit,
            WindowPolicy::CalendarDay,
            store,
            clock,
        )
        .with_fail_open(config.fail_open);
        Self { tracker }
    }

    pub fn with_sweep_batch(mut self, batch_size: usize) -> Self {
        self.tracker = self.tracker.with_sweep_batch(batch_size);
        self
    }

    pub fn tracker(&self) -> &QuotaTracker {
        &self.tracker
    }

    pub async fn check_and_consume(&self, subject: &SubjectId, tokens: u64) -> UsageDecision {
        self.tracker.check_and_consume(subject, tokens).await
    }

    /// Whether `tokens` more fit in today's budget. Does not consume.
    pub async fn can_spend(&self, subject: &SubjectId, tokens: u64) -> UsageDecision {
        self.tracker.project(subject, tokens).await
    }

    /// Records tokens reported by the model after a completion, even past the budget.
    pub async fn record_usage(&self, subject: &SubjectId, tokens: u64) -> UsageDecision {
        self.tracker.record_usage(subject, tokens).await
    }

    pub async fn status(&self, subject: &SubjectId) -> UsageDecision {
        self.tracker.status(subject).await
    }

    pub async fn sweep(&self, cutoff: DateTime<Utc>) -> Result<SweepReport, StoreError> {
        self.tracker.sweep(cutoff).await
    }
}
