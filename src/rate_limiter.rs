use std::collections::HashMap;

use chrono::DateTime;
use chrono::Utc;
use tokio::sync::Mutex;

use crate::domain::Account;
use crate::domain::LimitBehavior;
use crate::store::Store;
use crate::store::StoreError;

/// One configured rate-limit window, evaluated in ascending order (spec.md
/// §4.2, GLOSSARY "rate-limit window").
const WINDOWS: [(i64, fn(&Account) -> Option<i64>); 3] = [
    (60, |a| a.limit_per_minute),
    (3600, |a| a.limit_per_hour),
    (86400, |a| a.limit_per_day),
];

/// Outcome of `check_and_plan`: either the send may proceed now (both
/// fields `None`/`false`), or it must be deferred/rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmissionDecision {
    pub deferred_until: Option<DateTime<Utc>>,
    pub should_reject: bool,
}

impl AdmissionDecision {
    pub fn admit() -> Self {
        Self {
            deferred_until: None,
            should_reject: false,
        }
    }

    pub fn is_admitted(&self) -> bool {
        self.deferred_until.is_none() && !self.should_reject
    }
}

/// Per-account sliding-window admission control, backed by `send_log`, plus
/// an in-memory in-flight counter so concurrent workers for the same
/// account can't all pass the check before any of them has logged a send
/// (spec.md §4.2). The lock is held only across the count+increment step,
/// never across the SMTP send itself.
pub struct RateLimiter {
    store: Store,
    in_flight: Mutex<HashMap<String, u32>>,
}

impl RateLimiter {
    pub fn new(store: Store) -> Self {
        Self {
            store,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub async fn check_and_plan(
        &self,
        account: &Account,
        now: DateTime<Utc>,
    ) -> Result<AdmissionDecision, StoreError> {
        if account.limit_per_minute.is_none()
            && account.limit_per_hour.is_none()
            && account.limit_per_day.is_none()
        {
            return Ok(AdmissionDecision::admit());
        }

        let mut in_flight = self.in_flight.lock().await;

        for (window_secs, limit_fn) in WINDOWS {
            let Some(limit) = limit_fn(account) else {
                continue;
            };
            let window_start = now - chrono::Duration::seconds(window_secs);
            let count = self
                .store
                .count_sends_since(&account.id, window_start)
                .await?;
            let reserved = *in_flight.get(&account.id).unwrap_or(&0) as i64;

            if count + reserved >= limit {
                let now_secs = now.timestamp();
                let boundary_secs = (now_secs / window_secs + 1) * window_secs;
                let boundary = DateTime::from_timestamp(boundary_secs, 0).unwrap_or(now);
                tracing::debug!(
                    account_id = %account.id,
                    window_secs,
                    limit,
                    count,
                    reserved,
                    "rate limit hit"
                );
                return Ok(AdmissionDecision {
                    deferred_until: Some(boundary),
                    should_reject: account.limit_behavior == LimitBehavior::Reject,
                });
            }
        }

        *in_flight.entry(account.id.clone()).or_insert(0) += 1;
        Ok(AdmissionDecision::admit())
    }

    /// Call after a successful send: releases the reservation and persists
    /// the send for future window counts.
    pub async fn log_send(&self, account_id: &str, now: DateTime<Utc>) -> Result<(), StoreError> {
        self.release_reservation(account_id).await;
        self.store.log_send(account_id, now).await
    }

    /// Call after a failed send that never actually transmitted: releases
    /// the reservation without recording a send.
    pub async fn release_slot(&self, account_id: &str) { self.release_reservation(account_id).await; }

    async fn release_reservation(&self, account_id: &str) {
        let mut in_flight = self.in_flight.lock().await;
        if let Some(count) = in_flight.get_mut(account_id) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                in_flight.remove(account_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(limit_per_minute: Option<i64>) -> Account {
        Account {
            id: "a1".into(),
            tenant_id: "t1".into(),
            host: "smtp.local".into(),
            port: 25,
            user: None,
            password: None,
            use_tls: None,
            ttl: 300,
            limit_per_minute,
            limit_per_hour: None,
            limit_per_day: None,
            limit_behavior: LimitBehavior::Defer,
            batch_size: None,
            is_pec_account: false,
            imap_last_uid: None,
            imap_uidvalidity: None,
            imap_last_sync: None,
        }
    }

    #[test]
    fn window_boundary_rounds_up_to_next_minute() {
        let now_secs = 125;
        let boundary = (now_secs / 60 + 1) * 60;
        assert_eq!(boundary, 180);
    }

    #[test]
    fn account_without_limits_is_always_admitted() {
        let a = account(None);
        assert!(a.limit_per_minute.is_none());
    }
}
