use launchpad_core::domain::usage::QuotaKind;
use launchpad_governance::FreeTierDecision;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GuardrailDecision {
    Allow,
    Deny {
        reason_code: &'static str,
        quota: Option<QuotaKind>,
        user_message: String,
        retry_after_secs: Option<u64>,
    },
    Degrade { reason_code: &'static str, user_message: String },
}

impl GuardrailDecision {
    pub fn proceeds(&self) -> bool {
        !matches!(self, Self::Deny { .. })
    }

    pub fn reason_code(&self) -> Option<&'static str> {
        match self {
            Self::Allow => None,
            Self::Deny { reason_code, .. } | Self::Degrade { reason_code, .. } => Some(*reason_code),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GuardrailPolicy {
    /// Deny when a governor reports an exhausted quota.
    pub enforce_quotas: bool,
    /// Continue when governors answered from their failure policy.
    pub allow_degraded: bool,
}

impl Default for GuardrailPolicy {
    fn default() -> Self {
        Self { enforce_quotas: true, allow_degraded: true }
    }
}

impl GuardrailPolicy {
    pub fn evaluate(&self, decision: &FreeTierDecision) -> GuardrailDecision {
        match (decision.allowed, decision.denied_by) {
            (false, denied_by) if self.enforce_quotas => GuardrailDecision::Deny {
                reason_code: denied_by.map_or("governance_unavailable", reason_code),
                quota: denied_by,
                user_message: decision.message.clone(),
                retry_after_secs: decision.retry_after_secs(),
            },
            (false, _) => GuardrailDecision::Degrade {
                reason_code: "quota_enforcement_disabled",
                user_message: format!("{} Continuing because enforcement is disabled.", decision.message),
            },
            (true, _) if decision.degraded() && self.allow_degraded => GuardrailDecision::Degrade {
                reason_code: "governance_degraded",
                user_message: "Usage limits could not be verified. Continuing without enforcement."
                    .to_string(),
            },
            (true, _) if decision.degraded() => GuardrailDecision::Deny {
                reason_code: "governance_unavailable",
                quota: None,
                user_message: "Usage limits could not be verified. Please try again shortly."
                    .to_string(),
                retry_after_secs: None,
            },
            (true, _) => GuardrailDecision::Allow,
        }
    }
}

fn reason_code(quota: QuotaKind) -> &'static str {
    match quota {
        QuotaKind::RateLimit => "rate_limit_exceeded",
        QuotaKind::TokenBudget => "token_budget_exhausted",
        QuotaKind::Storage => "storage_quota_exceeded",
        QuotaKind::DailyRequests => "daily_request_limit_reached",
    }
}

#[cfg(test)]
mod tests {
    use launchpad_core::domain::usage::{QuotaKind, UsageDecision};
    use launchpad_governance::FreeTierDecision;

    use super::{GuardrailDecision, GuardrailPolicy};

    fn decision(denied_by: Option<QuotaKind>, degraded: bool) -> FreeTierDecision {
        let decisions = QuotaKind::ALL
            .iter()
            .map(|quota| {
                let allowed = Some(*quota) != denied_by;
                let mut usage = UsageDecision::from_usage(*quota, allowed, 1, 2);
                if !allowed {
                    usage.retry_after_secs = Some(42);
                }
                if degraded {
                    usage = usage.degraded();
                }
                usage
            })
            .collect();

        FreeTierDecision {
            allowed: denied_by.is_none(),
            message: match denied_by {
                Some(_) => "Rate limit exceeded: 2 requests per 1 minute(s). Retry after 42 seconds.".to_string(),
                None => "Within free tier limits.".to_string(),
            },
            denied_by,
            decisions,
        }
    }

    #[test]
    fn healthy_allowance_is_allowed() {
        let policy = GuardrailPolicy::default();
        assert_eq!(policy.evaluate(&decision(None, false)), GuardrailDecision::Allow);
    }

    #[test]
    fn rate_limit_denial_carries_retry_after() {
        let policy = GuardrailPolicy::default();
        let outcome = policy.evaluate(&decision(Some(QuotaKind::RateLimit), false));

        let (reason_code, quota, user_message, retry_after_secs) = match outcome {
            GuardrailDecision::Deny { reason_code, quota, user_message, retry_after_secs } => {
                (reason_code, quota, user_message, retry_after_secs)
            }
            _ => ("", None, String::new(), None),
        };

        assert_eq!(reason_code, "rate_limit_exceeded");
        assert_eq!(quota, Some(QuotaKind::RateLimit));
        assert!(user_message.contains("Retry after 42 seconds"));
        assert_eq!(retry_after_secs, Some(42));
    }

    #[test]
    fn fail_open_allowance_degrades() {
        let policy = GuardrailPolicy::default();
        let outcome = policy.evaluate(&decision(None, true));
        assert_eq!(outcome.reason_code(), Some("governance_degraded"));
        assert!(outcome.proceeds());

        let strict = GuardrailPolicy { allow_degraded: false, ..GuardrailPolicy::default() };
        let outcome = strict.evaluate(&decision(None, true));
        assert_eq!(outcome.reason_code(), Some("governance_unavailable"));
        assert!(!outcome.proceeds());
    }

    #[test]
    fn disabled_enforcement_degrades_denials() {
        let policy = GuardrailPolicy { enforce_quotas: false, ..GuardrailPolicy::default() };
        let outcome = policy.evaluate(&decision(Some(QuotaKind::TokenBudget), false));
        assert_eq!(outcome.reason_code(), Some("quota_enforcement_disabled"));
        assert!(outcome.proceeds());
    }
}
