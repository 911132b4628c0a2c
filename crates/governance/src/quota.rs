//! Counter engine shared by every governor.
//!
//! One counter record exists per (quota kind, subject, window) in the `usage_counters`
//! collection. Consumption is a single conditional update against the store, so a
//! counter can never be pushed past its limit by concurrent callers.

use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveTime, SecondsFormat, Utc};
use launchpad_core::domain::usage::{
    QuotaKind, SubjectId, UsageCounter, UsageDecision, CUMULATIVE_WINDOW_KEY,
};
use launchpad_db::{
    Collection, Condition, Filter, Item, KeyCondition, Mutation, QueryRequest, RecordKey,
    RecordStore, ScanRequest, StoreError, UpdateRequest,
};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::clock::Clock;

pub const COUNTERS: Collection = Collection::new("usage_counters", "counterId", Some("windowKey"));

pub const DEFAULT_SWEEP_BATCH: usize = 25;

const COUNT: &str = "count";
const RELEASE_ATTEMPTS: u32 = 5;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WindowPolicy {
    /// Fixed-length window starting at the first request after the previous one ended.
    Fixed(Duration),
    /// UTC calendar day keyed `YYYY-MM-DD`.
    CalendarDay,
    /// Single counter per subject that never resets.
    Cumulative,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub quota: QuotaKind,
    pub scanned: usize,
    pub deleted: usize,
}

#[derive(Clone, Debug, PartialEq)]
struct Window {
    key: String,
    start: DateTime<Utc>,
    end: Option<DateTime<Utc>>,
}

struct Located {
    window: Window,
    record: Option<Item>,
}

pub struct QuotaTracker {
    quota: QuotaKind,
    limit: u64,
    policy: WindowPolicy,
    fail_open: bool,
    sweep_batch: usize,
    store: Arc<dyn RecordStore>,
    clock: Arc<dyn Clock>,
}

impl QuotaTracker {
    pub fn new(
        quota: QuotaKind,
        limit: u64,
        policy: WindowPolicy,
        store: Arc<dyn RecordStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            quota,
            limit,
            policy,
            fail_open: true,
            sweep_batch: DEFAULT_SWEEP_BATCH,
            store,
            clock,
        }
    }

    pub fn with_fail_open(mut self, fail_open: bool) -> Self {
        self.fail_open = fail_open;
        self
    }

    pub fn with_sweep_batch(mut self, batch_size: usize) -> Self {
        self.sweep_batch = batch_size.max(1);
        self
    }

    pub fn quota(&self) -> QuotaKind {
        self.quota
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn policy(&self) -> WindowPolicy {
        self.policy
    }

    pub fn fails_open(&self) -> bool {
        self.fail_open
    }

    /// Adds `amount` to the active window iff the result stays within the limit.
    /// A denial leaves the counter untouched.
    pub async fn check_and_consume(&self, subject: &SubjectId, amount: u64) -> UsageDecision {
        let now = self.clock.now();
        match self.try_consume(subject, amount, now).await {
            Ok(decision) => {
                if !decision.allowed {
                    info!(
                        event_name = "governance.quota.denied",
                        quota = self.quota.as_str(),
                        subject = subject.as_str(),
                        current_usage = decision.current_usage,
                        requested = amount,
                        limit = self.limit,
                        "quota exhausted"
                    );
                }
                decision
            }
            Err(error) => self.store_failure("check_and_consume", subject, amount, &error),
        }
    }

    /// Read-only: whether `amount` more would fit in the active window.
    pub async fn project(&self, subject: &SubjectId, amount: u64) -> UsageDecision {
        let now = self.clock.now();
        match self.try_project(subject, amount, now).await {
            Ok(decision) => decision,
            Err(error) => self.store_failure("status", subject, 0, &error),
        }
    }

    pub async fn status(&self, subject: &SubjectId) -> UsageDecision {
        self.project(subject, 1).await
    }

    /// Unconditional add, for usage that is only known after the fact.
    pub async fn record_usage(&self, subject: &SubjectId, amount: u64) -> UsageDecision {
        let now = self.clock.now();
        match self.try_record(subject, amount, now).await {
            Ok(decision) => decision,
            Err(error) => self.store_failure("record_usage", subject, amount, &error),
        }
    }

    /// Subtracts `amount`, saturating at zero.
    pub async fn release(&self, subject: &SubjectId, amount: u64) -> UsageDecision {
        let now = self.clock.now();
        match self.try_release(subject, amount, now).await {
            Ok(decision) => decision,
            Err(error) => self.store_failure("release", subject, 0, &error),
        }
    }

    /// Stored counter for the active window, if one exists.
    pub async fn counter(&self, subject: &SubjectId) -> Result<Option<UsageCounter>, StoreError> {
        let counter_id = UsageCounter::counter_id(self.quota, subject);
        let located = self.locate(&counter_id, self.clock.now()).await?;
        located
            .record
            .map(|item| {
                serde_json::from_value(Value::Object(item))
                    .map_err(|error| StoreError::Decode(error.to_string()))
            })
            .transpose()
    }

    /// Deletes counters of this quota kind whose window ended before `cutoff`.
    pub async fn sweep(&self, cutoff: DateTime<Utc>) -> Result<SweepReport, StoreError> {
        let cutoff_stamp = stamp(cutoff);
        let expired = Filter::And(vec![
            Filter::Eq("quota".to_string(), Value::from(self.quota.as_str())),
            Filter::Lt("windowEnd".to_string(), Value::from(cutoff_stamp.as_str())),
        ]);

        let mut report = SweepReport { quota: self.quota, scanned: 0, deleted: 0 };
        let mut cursor = None;
        loop {
            let page = self
                .store
                .scan(
                    &ScanRequest::new(COUNTERS)
                        .filter(expired.clone())
                        .limit(self.sweep_batch)
                        .after(cursor),
                )
                .await?;
            report.scanned += page.items.len();

            for item in &page.items {
                let key = COUNTERS.key_of(item)?;
                self.store.delete(&COUNTERS, &key).await?;
                report.deleted += 1;
            }
            debug!(
                event_name = "governance.sweep.batch",
                quota = self.quota.as_str(),
                deleted = page.items.len(),
                "expired counters deleted"
            );

            match page.cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        info!(
            event_name = "governance.sweep.completed",
            quota = self.quota.as_str(),
            scanned = report.scanned,
            deleted = report.deleted,
            cutoff = %cutoff_stamp,
            "counter sweep completed"
        );
        Ok(report)
    }

    async fn try_consume(
        &self,
        subject: &SubjectId,
        amount: u64,
        now: DateTime<Utc>,
    ) -> Result<UsageDecision, StoreError> {
        let counter_id = UsageCounter::counter_id(self.quota, subject);
        let located = self.locate(&counter_id, now).await?;
        let key = RecordKey::with_sort(counter_id.as_str(), located.window.key.as_str());

        let headroom = to_i64(self.limit).saturating_sub(to_i64(amount));
        let mut mutations = vec![Mutation::add(COUNT, to_i64(amount))];
        mutations.extend(self.counter_fields(subject, &located.window, now));
        let request = UpdateRequest::upsert(mutations)
            .when(Condition::AtMost { field: COUNT.to_string(), value: headroom });

        match self.store.update(&COUNTERS, &key, &request).await {
            Ok(item) => Ok(self.decision(true, count_of(&item), now, located.window.end)),
            Err(StoreError::ConditionFailed { .. }) => {
                // The denial is settled; a failed re-read only loses the exact usage.
                let usage = match self.store.get(&COUNTERS, &key).await {
                    Ok(current) => current.as_ref().map_or(0, count_of),
                    Err(error) => {
                        warn!(
                            event_name = "governance.consume.reread_failed",
                            quota = self.quota.as_str(),
                            subject = subject.as_str(),
                            error = %error,
                            "counter re-read failed after denial"
                        );
                        self.denied_usage_floor(amount)
                    }
                };
                Ok(self.decision(false, usage, now, located.window.end))
            }
            Err(error) => Err(error),
        }
    }

    /// Smallest count that fails the consume condition for `amount`.
    fn denied_usage_floor(&self, amount: u64) -> u64 {
        self.limit.checked_sub(amount).map_or(0, |headroom| headroom.saturating_add(1))
    }

    async fn try_project(
        &self,
        subject: &SubjectId,
        amount: u64,
        now: DateTime<Utc>,
    ) -> Result<UsageDecision, StoreError> {
        let counter_id = UsageCounter::counter_id(self.quota, subject);
        let located = self.locate(&counter_id, now).await?;
        let usage = located.record.as_ref().map_or(0, count_of);

        // A fixed window that has not been opened yet has nothing to reset.
        let resets_at = match (self.policy, &located.record) {
            (WindowPolicy::Fixed(_), None) => None,
            _ => located.window.end,
        };
        let allowed = usage.saturating_add(amount) <= self.limit;
        Ok(self.decision(allowed, usage, now, resets_at))
    }

    async fn try_record(
        &self,
        subject: &SubjectId,
        amount: u64,
        now: DateTime<Utc>,
    ) -> Result<UsageDecision, StoreError> {
        let counter_id = UsageCounter::counter_id(self.quota, subject);
        let located = self.locate(&counter_id, now).await?;
        let key = RecordKey::with_sort(counter_id.as_str(), located.window.key.as_str());

        let mut mutations = vec![Mutation::add(COUNT, to_i64(amount))];
        mutations.extend(self.counter_fields(subject, &located.window, now));
        let item = self.store.update(&COUNTERS, &key, &UpdateRequest::upsert(mutations)).await?;

        let usage = count_of(&item);
        Ok(self.decision(usage <= self.limit, usage, now, located.window.end))
    }

    async fn try_release(
        &self,
        subject: &SubjectId,
        amount: u64,
        now: DateTime<Utc>,
    ) -> Result<UsageDecision, StoreError> {
        let counter_id = UsageCounter::counter_id(self.quota, subject);

        for attempt in 1..=RELEASE_ATTEMPTS {
            let located = self.locate(&counter_id, now).await?;
            let Some(record) = located.record else {
                return Ok(self.decision(true, 0, now, None));
            };

            let key = RecordKey::with_sort(counter_id.as_str(), located.window.key.as_str());
            let observed = record.get(COUNT).cloned().unwrap_or(Value::Null);
            let next = count_of(&record).saturating_sub(amount);
            let request = UpdateRequest::existing(vec![
                Mutation::set(COUNT, next),
                Mutation::set("lastUpdated", stamp(now)),
            ])
            .when(Condition::Equals { field: COUNT.to_string(), value: observed });

            match self.store.update(&COUNTERS, &key, &request).await {
                Ok(item) => {
                    let usage = count_of(&item);
                    return Ok(self.decision(usage <= self.limit, usage, now, located.window.end));
                }
                Err(StoreError::ConditionFailed { .. } | StoreError::NotFound { .. }) => {
                    debug!(
                        event_name = "governance.release.conflict",
                        quota = self.quota.as_str(),
                        subject = subject.as_str(),
                        attempt,
                        "counter changed during release, re-reading"
                    );
                }
                Err(error) => return Err(error),
            }
        }

        Err(StoreError::Contention { collection: COUNTERS.name.to_string(), attempts: RELEASE_ATTEMPTS })
    }

    async fn locate(&self, counter_id: &str, now: DateTime<Utc>) -> Result<Located, StoreError> {
        match self.policy {
            WindowPolicy::Fixed(length) => {
                let latest = self
                    .store
                    .query(
                        &QueryRequest::new(COUNTERS, KeyCondition::partition(counter_id))
                            .descending()
                            .limit(1),
                    )
                    .await?
                    .items
                    .into_iter()
                    .next();

                if let Some(record) = latest {
                    if let Some(window) = fixed_window_of(&record, length) {
                        if window.end.is_some_and(|end| now < end) {
                            return Ok(Located { window, record: Some(record) });
                        }
                    }
                }

                let window = Window { key: stamp(now), start: now, end: Some(now + length) };
                Ok(Located { window, record: None })
            }
            WindowPolicy::CalendarDay => {
                let window = calendar_day(now);
                let record = self
                    .store
                    .get(&COUNTERS, &RecordKey::with_sort(counter_id, window.key.as_str()))
                    .await?;
                Ok(Located { window, record })
            }
            WindowPolicy::Cumulative => {
                let record = self
                    .store
                    .get(&COUNTERS, &RecordKey::with_sort(counter_id, CUMULATIVE_WINDOW_KEY))
                    .await?;
                let start = record.as_ref().and_then(|item| timestamp(item, "windowStart")).unwrap_or(now);
                let window = Window { key: CUMULATIVE_WINDOW_KEY.to_string(), start, end: None };
                Ok(Located { window, record })
            }
        }
    }

    fn counter_fields(&self, subject: &SubjectId, window: &Window, now: DateTime<Utc>) -> Vec<Mutation> {
        let mut fields = vec![
            Mutation::set("subjectId", subject.as_str()),
            Mutation::set("quota", self.quota.as_str()),
            Mutation::set("limit", self.limit),
            Mutation::set("windowStart", stamp(window.start)),
            Mutation::set("lastUpdated", stamp(now)),
        ];
        if let Some(end) = window.end {
            fields.push(Mutation::set("windowEnd", stamp(end)));
        }
        fields
    }

    fn decision(
        &self,
        allowed: bool,
        usage: u64,
        now: DateTime<Utc>,
        resets_at: Option<DateTime<Utc>>,
    ) -> UsageDecision {
        UsageDecision::from_usage(self.quota, allowed, usage, self.limit).with_reset(now, resets_at)
    }

    fn store_failure(
        &self,
        operation: &'static str,
        subject: &SubjectId,
        amount: u64,
        error: &StoreError,
    ) -> UsageDecision {
        warn!(
            event_name = "governance.store.degraded",
            quota = self.quota.as_str(),
            subject = subject.as_str(),
            operation,
            fail_open = self.fail_open,
            error = %error,
            "counter store unavailable, applying failure policy"
        );
        let usage = if self.fail_open { amount } else { 0 };
        UsageDecision::from_usage(self.quota, self.fail_open, usage, self.limit).degraded()
    }
}

/// RFC 3339 with fixed millisecond precision so stored stamps order lexicographically.
pub(crate) fn stamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn timestamp(item: &Item, field: &str) -> Option<DateTime<Utc>> {
    let raw = item.get(field)?.as_str()?;
    DateTime::parse_from_rfc3339(raw).ok().map(|parsed| parsed.with_timezone(&Utc))
}

fn count_of(item: &Item) -> u64 {
    item.get(COUNT).and_then(Value::as_u64).unwrap_or(0)
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn calendar_day(now: DateTime<Utc>) -> Window {
    let start = now.date_naive().and_time(NaiveTime::MIN).and_utc();
    Window {
        key: now.format("%Y-%m-%d").to_string(),
        start,
        end: Some(start + Duration::days(1)),
    }
}

fn fixed_window_of(record: &Item, length: Duration) -> Option<Window> {
    let key = record.get("windowKey")?.as_str()?.to_string();
    let start = timestamp(record, "windowStart")?;
    let end = timestamp(record, "windowEnd").unwrap_or(start + length);
    Some(Window { key, start, end: Some(end) })
}
