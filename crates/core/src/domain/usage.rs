use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubjectId(pub String);

impl SubjectId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SubjectId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaKind {
    RateLimit,
    TokenBudget,
    Storage,
    DailyRequests,
}

impl QuotaKind {
    pub const ALL: [QuotaKind; 4] =
        [Self::RateLimit, Self::TokenBudget, Self::Storage, Self::DailyRequests];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RateLimit => "rate_limit",
            Self::TokenBudget => "token_budget",
            Self::Storage => "storage",
            Self::DailyRequests => "daily_requests",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "rate_limit" => Some(Self::RateLimit),
            "token_budget" => Some(Self::TokenBudget),
            "storage" => Some(Self::Storage),
            "daily_requests" => Some(Self::DailyRequests),
            _ => None,
        }
    }

    /// Human label used in denial messages.
    pub fn label(&self) -> &'static str {
        match self {
            Self::RateLimit => "rate limit",
            Self::TokenBudget => "daily token budget",
            Self::Storage => "storage quota",
            Self::DailyRequests => "daily request limit",
        }
    }

    pub fn unit(&self) -> &'static str {
        match self {
            Self::RateLimit | Self::DailyRequests => "requests",
            Self::TokenBudget => "tokens",
            Self::Storage => "bytes",
        }
    }
}

/// Window key used by the cumulative storage counter.
pub const CUMULATIVE_WINDOW_KEY: &str = "cumulative";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageCounter {
    pub subject_id: SubjectId,
    pub quota: QuotaKind,
    pub window_key: String,
    pub count: u64,
    pub limit: u64,
    pub window_start: DateTime<Utc>,
    /// End of the window; `None` for cumulative counters.
    pub window_end: Option<DateTime<Utc>>,
    pub last_updated: DateTime<Utc>,
}

impl UsageCounter {
    pub fn counter_id(quota: QuotaKind, subject: &SubjectId) -> String {
        format!("{}#{}", quota.as_str(), subject.0)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageDecision {
    pub quota: QuotaKind,
    pub allowed: bool,
    pub current_usage: u64,
    pub limit: u64,
    pub remaining: u64,
    pub percentage_used: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resets_at: Option<DateTime<Utc>>,
    /// Set when the counter store could not be consulted and the decision reflects the
    /// configured failure policy instead of stored state.
    pub degraded: bool,
}

impl UsageDecision {
    pub fn from_usage(quota: QuotaKind, allowed: bool, usage: u64, limit: u64) -> Self {
        Self {
            quota,
            allowed,
            current_usage: usage,
            limit,
            remaining: limit.saturating_sub(usage),
            percentage_used: percentage(usage, limit),
            retry_after_secs: None,
            resets_at: None,
            degraded: false,
        }
    }

    pub fn with_reset(mut self, now: DateTime<Utc>, resets_at: Option<DateTime<Utc>>) -> Self {
        self.resets_at = resets_at;
        if !self.allowed {
            self.retry_after_secs = resets_at.map(|reset| seconds_until(now, reset));
        }
        self
    }

    pub fn degraded(mut self) -> Self {
        self.degraded = true;
        self
    }
}

pub fn percentage(usage: u64, limit: u64) -> f64 {
    if limit == 0 {
        return 0.0;
    }
    let raw = usage as f64 / limit as f64 * 100.0;
    (raw * 100.0).round() / 100.0
}

/// Whole seconds until `reset`, never less than one.
pub fn seconds_until(now: DateTime<Utc>, reset: DateTime<Utc>) -> u64 {
    let millis = (reset - now).num_milliseconds().max(0) as u64;
    millis.div_ceil(1000).max(1)
}
