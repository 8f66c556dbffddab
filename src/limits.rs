//! Rolling transaction limits
//!
//! Cache-backed daily and monthly completed-transaction totals per user.
//! Totals are computed from the store on a cache miss and invalidated as
//! soon as a transaction completes. While a store transaction is active the
//! cache is bypassed entirely, so the limit check that gates a debit reads
//! committed data from inside the same database transaction instead of a
//! possibly stale snapshot.

use chrono::{DateTime, Datelike, TimeZone, Utc};
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

use crate::cache::Cache;
use crate::store::{Store, StoreError};

/// Maximum completed volume per user per calendar day, in FCFA.
pub const DAILY_LIMIT: i64 = 2_000_000;

/// Maximum completed volume per user per calendar month, in FCFA.
pub const MONTHLY_LIMIT: i64 = 10_000_000;

#[derive(Clone)]
pub struct LimitTracker {
    store: Arc<dyn Store>,
    cache: Arc<dyn Cache>,
}

impl LimitTracker {
    pub fn new(store: Arc<dyn Store>, cache: Arc<dyn Cache>) -> Self {
        Self { store, cache }
    }

    /// Sum of COMPLETED transaction amounts for the user since midnight.
    pub async fn daily_total(&self, user_id: Uuid) -> Result<Decimal, StoreError> {
        let now = Utc::now();
        self.cached_total(daily_cache_key(user_id, now), user_id, start_of_day(now))
            .await
    }

    /// Sum of COMPLETED transaction amounts for the user since the first of
    /// the month.
    pub async fn monthly_total(&self, user_id: Uuid) -> Result<Decimal, StoreError> {
        let now = Utc::now();
        self.cached_total(monthly_cache_key(user_id, now), user_id, start_of_month(now))
            .await
    }

    /// Drop the user's current day and month totals. Called right after a
    /// transaction reaches COMPLETED.
    pub async fn invalidate(&self, user_id: Uuid) {
        let now = Utc::now();
        self.cache.delete(&daily_cache_key(user_id, now)).await;
        self.cache.delete(&monthly_cache_key(user_id, now)).await;
    }

    async fn cached_total(
        &self,
        cache_key: String,
        user_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<Decimal, StoreError> {
        // Inside an active store transaction the aggregate must come from
        // the authoritative table, not the cache.
        if !self.store.in_transaction() {
            if let Some(cached) = self.cache.get(&cache_key).await {
                if let Ok(total) = Decimal::from_str(&cached) {
                    return Ok(total);
                }
                // unreadable entry, recompute below
                self.cache.delete(&cache_key).await;
            }
        }

        let total = self.store.completed_total_since(user_id, since).await?;

        if !self.store.in_transaction() {
            self.cache.put(&cache_key, total.to_string(), None).await;
        }

        Ok(total)
    }
}

fn daily_cache_key(user_id: Uuid, now: DateTime<Utc>) -> String {
    format!("daily_transactions_{}_{}", user_id, now.format("%Y-%m-%d"))
}

fn monthly_cache_key(user_id: Uuid, now: DateTime<Utc>) -> String {
    format!("monthly_transactions_{}_{}", user_id, now.format("%Y-%m"))
}

fn start_of_day(now: DateTime<Utc>) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(now.year(), now.month(), now.day(), 0, 0, 0)
        .single()
        .expect("midnight is always a valid UTC timestamp")
}

fn start_of_month(now: DateTime<Utc>) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(now.year(), now.month(), 1, 0, 0, 0)
        .single()
        .expect("the first of the month is always a valid UTC timestamp")
}
