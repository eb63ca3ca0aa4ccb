//! Per-user usage counters with reset windows
//!
//! Counters live in the key-value store under `quota:{user_len}:{user}:{key}`,
//! where `user_len` is the byte length of the user id. A counter whose stored
//! window is older than the current window reads as zero, so no background
//! reset job is needed.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::plans::{Limit, QuotaRule, ResetWindow};
use crate::clock::Clock;
use crate::error::Result;
use crate::storage::KeyValueStore;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct QuotaCounter {
    used: u64,
    window_start: DateTime<Utc>,
}

/// Snapshot of one quota for one user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuotaInfo {
    pub key: String,
    pub used: u64,
    pub limit: Limit,
    /// `None` when unlimited
    pub remaining: Option<u64>,
    pub window: ResetWindow,
    pub resets_at: Option<DateTime<Utc>>,
}

impl QuotaInfo {
    pub fn is_exhausted(&self) -> bool {
        !self.limit.allows(self.used, 1)
    }

    pub fn usage_ratio(&self) -> Option<f64> {
        self.limit.usage_ratio(self.used)
    }
}

/// Result of an attempt to consume quota
#[derive(Debug, Clone, PartialEq)]
pub enum QuotaOutcome {
    Consumed(QuotaInfo),
    /// Nothing was consumed
    Exceeded(QuotaInfo),
}

impl QuotaOutcome {
    pub fn info(&self) -> &QuotaInfo {
        match self {
            QuotaOutcome::Consumed(info) | QuotaOutcome::Exceeded(info) => info,
        }
    }

    pub fn is_consumed(&self) -> bool {
        matches!(self, QuotaOutcome::Consumed(_))
    }
}

/// Quota accounting over a key-value store
pub struct QuotaPolicy {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    // serializes read-modify-write of counters
    write_lock: Mutex<()>,
}

impl QuotaPolicy {
    pub fn new(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            write_lock: Mutex::new(()),
        }
    }

    /// Length-prefixed so no user's prefix covers another user's ids
    fn user_prefix(user_id: &str) -> String {
        format!("quota:{}:{}:", user_id.len(), user_id)
    }

    fn counter_key(user_id: &str, key: &str) -> String {
        format!("{}{}", Self::user_prefix(user_id), key)
    }

    /// Usage in the current window
    fn current_used(&self, user_id: &str, key: &str, window: ResetWindow) -> Result<u64> {
        let window_start = window.window_start(self.clock.now());
        let raw = match self.store.get(&Self::counter_key(user_id, key))? {
            Some(raw) => raw,
            None => return Ok(0),
        };

        match serde_json::from_str::<QuotaCounter>(&raw) {
            Ok(counter) if counter.window_start >= window_start => Ok(counter.used),
            Ok(_) => Ok(0),
            Err(e) => {
                tracing::warn!(
                    "Unreadable quota counter {} for user {}, treating as unused: {}",
                    key,
                    user_id,
                    e
                );
                Ok(0)
            }
        }
    }

    fn info(&self, key: &str, used: u64, rule: &QuotaRule) -> QuotaInfo {
        QuotaInfo {
            key: key.to_string(),
            used,
            limit: rule.limit,
            remaining: rule.limit.remaining(used),
            window: rule.window,
            resets_at: rule.window.next_reset(self.clock.now()),
        }
    }

    /// Current state without side effects
    pub fn check(&self, user_id: &str, key: &str, rule: &QuotaRule) -> Result<QuotaInfo> {
        let used = self.current_used(user_id, key, rule.window)?;
        Ok(self.info(key, used, rule))
    }

    /// Consume `amount` units if they fit; otherwise leave the counter untouched
    pub fn try_consume(
        &self,
        user_id: &str,
        key: &str,
        rule: &QuotaRule,
        amount: u64,
    ) -> Result<QuotaOutcome> {
        let _guard = self.write_lock.lock();

        let used = self.current_used(user_id, key, rule.window)?;
        if !rule.limit.allows(used, amount) {
            tracing::debug!(
                "Quota {} exhausted for user {} ({}/{})",
                key,
                user_id,
                used,
                rule.limit
            );
            return Ok(QuotaOutcome::Exceeded(self.info(key, used, rule)));
        }

        let counter = QuotaCounter {
            used: used.saturating_add(amount),
            window_start: rule.window.window_start(self.clock.now()),
        };
        self.store.put(
            &Self::counter_key(user_id, key),
            &serde_json::to_string(&counter)?,
        )?;

        Ok(QuotaOutcome::Consumed(self.info(key, counter.used, rule)))
    }

    /// Drop a user's counter for a key
    pub fn reset(&self, user_id: &str, key: &str) -> Result<()> {
        let _guard = self.write_lock.lock();
        self.store.delete(&Self::counter_key(user_id, key))
    }

    /// Drop all counters of a user (e.g. after a plan change)
    pub fn reset_all(&self, user_id: &str) -> Result<usize> {
        let _guard = self.write_lock.lock();
        let keys = self
            .store
            .keys_with_prefix(&Self::user_prefix(user_id))?;
        for key in &keys {
            self.store.delete(key)?;
        }
        Ok(keys.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::storage::MemoryKeyValueStore;
    use chrono::{Duration, TimeZone};

    fn policy() -> (QuotaPolicy, Arc<ManualClock>, Arc<MemoryKeyValueStore>) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 5, 10, 9, 0, 0).unwrap(),
        ));
        let store = Arc::new(MemoryKeyValueStore::new());
        (
            QuotaPolicy::new(store.clone(), clock.clone()),
            clock,
            store,
        )
    }

    #[test]
    fn test_consume_until_exhausted() {
        let (quotas, _, _) = policy();
        let rule = QuotaRule::daily(2);

        assert!(quotas.try_consume("u1", "k", &rule, 1).unwrap().is_consumed());
        assert!(quotas.try_consume("u1", "k", &rule, 1).unwrap().is_consumed());

        let outcome = quotas.try_consume("u1", "k", &rule, 1).unwrap();
        assert!(!outcome.is_consumed());
        assert_eq!(outcome.info().used, 2);
        assert_eq!(outcome.info().remaining, Some(0));
        assert!(outcome.info().is_exhausted());

        // other users are independent
        assert_eq!(quotas.check("u2", "k", &rule).unwrap().used, 0);
    }

    #[test]
    fn test_daily_rollover() {
        let (quotas, clock, _) = policy();
        let rule = QuotaRule::daily(1);

        quotas.try_consume("u1", "k", &rule, 1).unwrap();
        assert!(quotas.check("u1", "k", &rule).unwrap().is_exhausted());

        clock.advance(Duration::hours(15));
        let info = quotas.check("u1", "k", &rule).unwrap();
        assert_eq!(info.used, 0);
        assert_eq!(
            info.resets_at,
            Some(Utc.with_ymd_and_hms(2024, 5, 12, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_monthly_window_survives_days() {
        let (quotas, clock, _) = policy();
        let rule = QuotaRule::monthly(5);

        quotas.try_consume("u1", "exports", &rule, 3).unwrap();
        clock.advance(Duration::days(10));
        assert_eq!(quotas.check("u1", "exports", &rule).unwrap().used, 3);

        clock.advance(Duration::days(30));
        assert_eq!(quotas.check("u1", "exports", &rule).unwrap().used, 0);
    }

    #[test]
    fn test_unlimited_never_exhausts() {
        let (quotas, _, _) = policy();
        let rule = QuotaRule::daily(-1);
        for _ in 0..100 {
            assert!(quotas.try_consume("u1", "k", &rule, 1).unwrap().is_consumed());
        }
        let info = quotas.check("u1", "k", &rule).unwrap();
        assert_eq!(info.used, 100);
        assert_eq!(info.remaining, None);
    }

    #[test]
    fn test_corrupt_counter_reads_as_zero() {
        let (quotas, _, store) = policy();
        store.put("quota:2:u1:k", "garbage").unwrap();
        assert_eq!(quotas.check("u1", "k", &QuotaRule::daily(3)).unwrap().used, 0);
    }

    #[test]
    fn test_reset_all() {
        let (quotas, _, _) = policy();
        let rule = QuotaRule::daily(5);
        quotas.try_consume("u1", "a", &rule, 1).unwrap();
        quotas.try_consume("u1", "b", &rule, 1).unwrap();
        quotas.try_consume("u10", "a", &rule, 1).unwrap();

        assert_eq!(quotas.reset_all("u1").unwrap(), 2);
        assert_eq!(quotas.check("u1", "a", &rule).unwrap().used, 0);
        assert_eq!(quotas.check("u10", "a", &rule).unwrap().used, 1);
    }

    #[test]
    fn test_reset_all_ignores_ids_sharing_a_prefix() {
        let (quotas, _, _) = policy();
        let rule = QuotaRule::daily(5);
        quotas.try_consume("u1", "a", &rule, 1).unwrap();
        quotas.try_consume("u1:x", "a", &rule, 1).unwrap();
        quotas.try_consume("u1:x", "b", &rule, 2).unwrap();

        assert_eq!(quotas.reset_all("u1").unwrap(), 1);
        assert_eq!(quotas.check("u1:x", "a", &rule).unwrap().used, 1);
        assert_eq!(quotas.check("u1:x", "b", &rule).unwrap().used, 2);

        assert_eq!(quotas.reset_all("u1:x").unwrap(), 2);
        assert_eq!(quotas.check("u1", "a", &rule).unwrap().used, 0);
    }

    #[test]
    fn test_reset_all_non_ascii_user() {
        let (quotas, _, _) = policy();
        let rule = QuotaRule::daily(5);
        quotas.try_consume("josé", "a", &rule, 3).unwrap();
        assert_eq!(quotas.reset_all("josé").unwrap(), 1);
        assert_eq!(quotas.check("josé", "a", &rule).unwrap().used, 0);
    }
}
