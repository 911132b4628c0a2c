//! Aggregate free-tier gate over the four governors.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use launchpad_core::config::GovernanceConfig;
use launchpad_core::domain::usage::{QuotaKind, SubjectId, UsageDecision};
use launchpad_db::{RecordStore, RetryPolicy, RetryingStore, StoreError};
use serde::Serialize;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::daily_requests::DailyRequestTracker;
use crate::quota::SweepReport;
use crate::rate_limit::RateLimiter;
use crate::storage::StorageQuotaTracker;
use crate::token_budget::TokenBudgetTracker;

pub const ALLOWED_MESSAGE: &str = "Within free tier limits.";

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FreeTierDecision {
    pub allowed: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub denied_by: Option<QuotaKind>,
    pub decisions: Vec<UsageDecision>,
}

impl FreeTierDecision {
    pub fn decision(&self, quota: QuotaKind) -> Option<&UsageDecision> {
        self.decisions.iter().find(|decision| decision.quota == quota)
    }

    /// True when any governor answered from its failure policy.
    pub fn degraded(&self) -> bool {
        self.decisions.iter().any(|decision| decision.degraded)
    }

    pub fn retry_after_secs(&self) -> Option<u64> {
        self.denied_by.and_then(|quota| self.decision(quota)).and_then(|decision| decision.retry_after_secs)
    }
}

/// The four governors over one shared counter store. Built once at startup and
/// passed by reference.
pub struct UsageGovernance {
    rate_limiter: RateLimiter,
    token_budget: TokenBudgetTracker,
    daily_requests: DailyRequestTracker,
    storage: StorageQuotaTracker,
    clock: Arc<dyn Clock>,
    retention: Duration,
}

impl UsageGovernance {
    pub fn new(store: Arc<dyn RecordStore>, clock: Arc<dyn Clock>, config: &GovernanceConfig) -> Self {
        let batch = config.sweep.batch_size;
        let retention_hours = i64::try_from(config.sweep.retention_hours).unwrap_or(i64::MAX);

        Self {
            rate_limiter: RateLimiter::new(Arc::clone(&store), Arc::clone(&clock), &config.rate_limit)
                .with_sweep_batch(batch),
            token_budget: TokenBudgetTracker::new(Arc::clone(&store), Arc::clone(&clock), &config.token_budget)
                .with_sweep_batch(batch),
            daily_requests: DailyRequestTracker::new(
                Arc::clone(&store),
                Arc::clone(&clock),
                &config.daily_requests,
            )
            .with_sweep_batch(batch),
            storage: StorageQuotaTracker::new(store, Arc::clone(&clock), &config.storage)
                .with_sweep_batch(batch),
            clock,
            retention: Duration::try_hours(retention_hours).unwrap_or(Duration::MAX),
        }
    }

    /// Wraps `store` in the configured retry policy before building the governors.
    pub fn with_retry<S>(store: S, clock: Arc<dyn Clock>, config: &GovernanceConfig) -> Self
    where
        S: RecordStore + 'static,
    {
        let policy = RetryPolicy::from(&config.store_retry);
        Self::new(Arc::new(RetryingStore::new(store, policy)), clock, config)
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    pub fn token_budget(&self) -> &TokenBudgetTracker {
        &self.token_budget
    }

    pub fn daily_requests(&self) -> &DailyRequestTracker {
        &self.daily_requests
    }

    pub fn storage(&self) -> &StorageQuotaTracker {
        &self.storage
    }

    /// Consumes one request from the rate limiter and daily counter and checks the
    /// token and storage headroom. Increments already made are kept when another
    /// governor denies.
    pub async fn check_free_tier_limits(&self, subject: &SubjectId) -> FreeTierDecision {
        let (rate, tokens, storage, daily) = tokio::join!(
            self.rate_limiter.check_and_consume(subject),
            self.token_budget.can_spend(subject, 1),
            self.storage.status(subject),
            self.daily_requests.check_and_consume(subject),
        );
        let decisions = vec![rate, tokens, storage, daily];

        let Some(denied) = decisions.iter().find(|decision| !decision.allowed) else {
            debug!(event_name = "governance.free_tier.allowed", subject = subject.as_str(), "free tier check passed");
            return FreeTierDecision {
                allowed: true,
                message: ALLOWED_MESSAGE.to_string(),
                denied_by: None,
                decisions,
            };
        };

        let message = self.denial_message(denied);
        let denied_by = denied.quota;
        info!(
            event_name = "governance.free_tier.denied",
            subject = subject.as_str(),
            quota = denied_by.as_str(),
            retry_after_secs = denied.retry_after_secs,
            "free tier limit reached"
        );

        FreeTierDecision { allowed: false, message, denied_by: Some(denied_by), decisions }
    }

    pub async fn usage_summary(&self, subject: &SubjectId) -> Vec<UsageDecision> {
        let (rate, tokens, storage, daily) = tokio::join!(
            self.rate_limiter.status(subject),
            self.token_budget.status(subject),
            self.storage.status(subject),
            self.daily_requests.status(subject),
        );
        vec![rate, tokens, storage, daily]
    }

    /// Sweeps every governor for windows that ended more than the retention period
    /// before `now`.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<Vec<SweepReport>, StoreError> {
        let cutoff = now.checked_sub_signed(self.retention).unwrap_or(DateTime::<Utc>::MIN_UTC);
        Ok(vec![
            self.rate_limiter.sweep(cutoff).await?,
            self.token_budget.sweep(cutoff).await?,
            self.storage.sweep(cutoff).await?,
            self.daily_requests.sweep(cutoff).await?,
        ])
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn denial_message(&self, denied: &UsageDecision) -> String {
        let resets = denied
            .resets_at
            .map(|reset| format!(" Resets at {}.", reset.format("%Y-%m-%d %H:%M UTC")))
            .unwrap_or_default();

        match denied.quota {
            QuotaKind::RateLimit => {
                let retry_after = denied.retry_after_secs.unwrap_or(self.rate_limiter.window_minutes() * 60);
                format!(
                    "Rate limit exceeded: {} requests per {} minute(s). Retry after {retry_after} seconds.",
                    denied.limit,
                    self.rate_limiter.window_minutes()
                )
            }
            QuotaKind::TokenBudget => format!(
                "Daily token budget exceeded: {} of {} tokens used.{resets}",
                denied.current_usage, denied.limit
            ),
            QuotaKind::DailyRequests => {
                format!("Daily request limit exceeded: {} requests per day.{resets}", denied.limit)
            }
            QuotaKind::Storage => format!(
                "Storage quota exceeded: {} of {} bytes used.",
                denied.current_usage, denied.limit
            ),
        }
    }
}
