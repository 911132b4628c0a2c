use std::sync::Arc;

use chrono::{DateTime, Utc};
use launchpad_core::config::StorageConfig;
use launchpad_core::domain::usage::{QuotaKind, SubjectId, UsageDecision};
use launchpad_db::{RecordStore, StoreError};

use crate::clock::Clock;
use crate::quota::{QuotaTracker, SweepReport, WindowPolicy};

/// Cumulative byte quota. Usage only goes down through [`StorageQuotaTracker::release`].
pub struct StorageQuotaTracker {
    tracker: QuotaTracker,
}

impl StorageQuotaTracker {
    pub fn new(store: Arc<dyn RecordStore>, clock: Arc<dyn Clock>, config: &StorageConfig) -> Self {
        let tracker = QuotaTracker::new(
            QuotaKind::Storage,
            config.limit_bytes,
            WindowPolicy::Cumulative,
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

    pub async fn consume(&self, subject: &SubjectId, bytes: u64) -> UsageDecision {
        self.tracker.check_and_consume(subject, bytes).await
    }

    pub async fn release(&self, subject: &SubjectId, bytes: u64) -> UsageDecision {
        self.tracker.release(subject, bytes).await
    }

    pub async fn status(&self, subject: &SubjectId) -> UsageDecision {
        self.tracker.status(subject).await
    }

    /// Cumulative counters carry no window end, so nothing is ever swept here.
    pub async fn sweep(&self, cutoff: DateTime<Utc>) -> Result<SweepReport, StoreError> {
        self.tracker.sweep(cutoff).await
    }
}
