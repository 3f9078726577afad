//! Per-user monthly token quotas.
//!
//! Request and response tokens are recorded per user against a monthly
//! quota. Reset is an explicit action; the service never resets on its
//! own. A warning fires once usage crosses the configured percentage.

use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use serde::Serialize;
use tracing::warn;

/// One user's quota state.
#[derive(Debug, Clone, Serialize)]
pub struct UserTokenBudget {
    /// User id.
    pub user_id: String,
    /// Monthly quota in tokens.
    pub monthly_quota: u64,
    /// Tokens used this period.
    pub used_tokens: u64,
    /// Unix millis when the record was created.
    pub created_time: u64,
}

impl UserTokenBudget {
    /// Remaining tokens, floored at zero.
    #[must_use]
    pub const fn remaining_tokens(&self) -> u64 {
        self.monthly_quota.saturating_sub(self.used_tokens)
    }

    /// Usage percentage of the quota.
    #[must_use]
    pub fn usage_pct(&self) -> f64 {
        if self.monthly_quota == 0 {
            return 100.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let pct = self.used_tokens as f64 / self.monthly_quota as f64 * 100.0;
        pct
    }
}

/// Process-wide token accounting keyed by user.
#[derive(Debug)]
pub struct TokenQuotaService {
    budgets: DashMap<String, UserTokenBudget>,
    default_quota: u64,
    warn_pct: u8,
}

impl TokenQuotaService {
    /// Creates a service with the given default quota and warn level.
    #[must_use]
    pub fn new(default_quota: u64, warn_pct: u8) -> Self {
        Self {
            budgets: DashMap::new(),
            default_quota,
            warn_pct,
        }
    }

    /// Records request/response token usage for a user. Returns the
    /// updated usage percentage.
    pub fn record_usage(&self, user_id: &str, request_tokens: u64, response_tokens: u64) -> f64 {
        let mut entry = self
            .budgets
            .entry(user_id.to_string())
            .or_insert_with(|| UserTokenBudget {
                user_id: user_id.to_string(),
                monthly_quota: self.default_quota,
                used_tokens: 0,
                created_time: now_millis(),
            });
        entry.used_tokens = entry
            .used_tokens
            .saturating_add(request_tokens)
            .saturating_add(response_tokens);
        let pct = entry.usage_pct();
        if pct > f64::from(self.warn_pct) {
            warn!(user = user_id, pct = format!("{pct:.1}"), "token quota nearly exhausted");
        }
        pct
    }

    /// Returns `true` when the user still has tokens available.
    #[must_use]
    pub fn has_remaining(&self, user_id: &str) -> bool {
        self.budgets
            .get(user_id)
            .is_none_or(|b| b.remaining_tokens() > 0)
    }

    /// Current budget snapshot for a user, if one exists.
    #[must_use]
    pub fn budget(&self, user_id: &str) -> Option<UserTokenBudget> {
        self.budgets.get(user_id).map(|b| b.clone())
    }

    /// Explicitly resets a user's usage to zero.
    pub fn reset(&self, user_id: &str) {
        if let Some(mut entry) = self.budgets.get_mut(user_id) {
            entry.used_tokens = 0;
        }
    }

    /// Overrides a user's monthly quota.
    pub fn set_quota(&self, user_id: &str, quota: u64) {
        let mut entry = self
            .budgets
            .entry(user_id.to_string())
            .or_insert_with(|| UserTokenBudget {
                user_id: user_id.to_string(),
                monthly_quota: quota,
                used_tokens: 0,
                created_time: now_millis(),
            });
        entry.monthly_quota = quota;
    }

    /// Number of tracked users.
    #[must_use]
    pub fn user_count(&self) -> usize {
        self.budgets.len()
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_accumulates() {
        let service = TokenQuotaService::new(1000, 80);
        service.record_usage("u1", 100, 50);
        service.record_usage("u1", 100, 50);
        let budget = service.budget("u1").unwrap_or_else(|| unreachable!());
        assert_eq!(budget.used_tokens, 300);
        assert_eq!(budget.remaining_tokens(), 700);
    }

    #[test]
    fn test_remaining_floors_at_zero() {
        let service = TokenQuotaService::new(100, 80);
        service.record_usage("u1", 500, 0);
        let budget = service.budget("u1").unwrap_or_else(|| unreachable!());
        assert_eq!(budget.remaining_tokens(), 0);
        assert!(!service.has_remaining("u1"));
    }

    #[test]
    fn test_unknown_user_has_remaining() {
        let service = TokenQuotaService::new(100, 80);
        assert!(service.has_remaining("nobody"));
    }

    #[test]
    fn test_explicit_reset() {
        let service = TokenQuotaService::new(100, 80);
        service.record_usage("u1", 90, 0);
        service.reset("u1");
        let budget = service.budget("u1").unwrap_or_else(|| unreachable!());
        assert_eq!(budget.used_tokens, 0);
        assert!(service.has_remaining("u1"));
    }

    #[test]
    fn test_set_quota() {
        let service = TokenQuotaService::new(100, 80);
        service.set_quota("u1", 5000);
        service.record_usage("u1", 200, 0);
        assert!(service.has_remaining("u1"));
        let budget = service.budget("u1").unwrap_or_else(|| unreachable!());
        assert_eq!(budget.monthly_quota, 5000);
    }

    #[test]
    fn test_usage_pct() {
        let service = TokenQuotaService::new(200, 80);
        let pct = service.record_usage("u1", 100, 0);
        assert!((pct - 50.0).abs() < f64::EPSILON);
    }
}
