pub mod clock;
pub mod daily_requests;
pub mod free_tier;
pub mod quota;
pub mod rate_limit;
pub mod storage;
pub mod token_budget;

pub use clock::{Clock, FixedClock, SystemClock};
pub use daily_requests::DailyRequestTracker;
pub use free_tier::{FreeTierDecision, UsageGovernance};
pub use quota::{QuotaTracker, SweepReport, WindowPolicy, COUNTERS};
pub use rate_limit::RateLimiter;
pub use storage::StorageQuotaTracker;
pub use token_budget::TokenBudgetTracker;
