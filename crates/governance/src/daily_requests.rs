use std::sync::Arc;

use chrono::{DateTime, Utc};
use launchpad_core::config::DailyRequestsConfig;
use launchpad_core::domain::usage::{QuotaKind, SubjectId, UsageDecision};
use launchpad_db::{RecordStore, StoreError};

use crate::clock::Clock;
use crate::quota::{QuotaTracker, SweepReport, WindowPolicy};

pub struct DailyRequestTracker {
    tracker: QuotaTracker,
}

impl DailyRequestTracker {
    pub fn new(store: Arc<dyn RecordStore>, clock: Arc<dyn Clock>, config: &DailyRequestsConfig) -> Self {
        let tracker = QuotaTracker::new(
            QuotaKind::DailyRequests,
            config.limit,
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
