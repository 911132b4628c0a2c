use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use launchpad_core::config::RateLimitConfig;
use launchpad_core::domain::usage::{QuotaKind, SubjectId, UsageDecision};
use launchpad_db::{RecordStore, StoreError};

use crate::clock::Clock;
use crate::quota::{QuotaTracker, SweepReport, WindowPolicy};

/// Longest window accepted from configuration (one week).
const MAX_WINDOW_MINUTES: u64 = 7 * 24 * 60;

/// Fixed-window request counter. A window opens with the first request after the
/// previous window ended, so bursts are counted from when they start.
pub struct RateLimiter {
    tracker: QuotaTracker,
    window_minutes: u64,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn RecordStore>, clock: Arc<dyn Clock>, config: &RateLimitConfig) -> Self {
        let window_minutes = config.window_minutes.clamp(1, MAX_WINDOW_MINUTES);
        let policy = WindowPolicy::Fixed(Duration::minutes(window_minutes as i64));
        let tracker = QuotaTracker::new(QuotaKind::RateLimit, config.limit, policy, store, clock)
            .with_fail_open(config.fail_open);
        Self { tracker, window_minutes }
    }

    pub fn with_sweep_batch(mut self, batch_size: usize) -> Self {
        self.tracker = self.tracker.with_sweep_batch(batch_size);
        self
    }

    pub fn window_minutes(&self) -> u64 {
        self.window_minutes
    }

    pub fn tracker(&self) -> &QuotaTracker {
        &self.tracker
    }

    pub async fn check_and_consume(&self, subject: &SubjectId) -> UsageDecision {
        self.tracker.check_and_consume(subject, 1).await
    }

    pub async fn status(&self, subject: &SubjectId) -> UsageDecision {
        self.tracker.status(subject).await
    }

    pub async fn sweep(&self, cutoff: DateTime<Utc>) -> Result<SweepReport, StoreError> {
        self.tracker.sweep(cutoff).await
    }
}
