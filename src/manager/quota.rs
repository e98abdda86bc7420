//! Hourly signing quotas
//!
//! Each key may carry a cap on signatures per fixed one-hour window. The
//! window restarts on the first check after it is more than an hour old.
//! A check reserves a slot for the in-flight signature; the slot becomes
//! a counted sign on success and is released on failure, so concurrent
//! signers can never overshoot the cap.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Hourly quota state for one key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageQuota {
    pub key_id: String,
    /// Maximum signatures allowed per window
    pub max_signs_per_hour: u32,
    /// Successful signatures in the current window
    pub current_hour_signs: u32,
    /// Start of the current window
    pub hour_started_at: DateTime<Utc>,
    /// Set when a sign was refused in the current window
    pub exceeded: bool,
    /// Reserved slots for signatures still at the backend
    #[serde(skip)]
    in_flight: u32,
}

impl UsageQuota {
    pub fn new(key_id: String, max_signs_per_hour: u32, now: DateTime<Utc>) -> Self {
        Self {
            key_id,
            max_signs_per_hour,
            current_hour_signs: 0,
            hour_started_at: now,
            exceeded: false,
            in_flight: 0,
        }
    }

    fn window_elapsed(&self, now: DateTime<Utc>) -> bool {
        now - self.hour_started_at > Duration::hours(1)
    }

    /// Start a new window if the current one is more than an hour old
    pub fn roll_window(&mut self, now: DateTime<Utc>) -> bool {
        if !self.window_elapsed(now) {
            return false;
        }
        self.current_hour_signs = 0;
        self.exceeded = false;
        self.hour_started_at = now;
        true
    }

    /// Signatures still allowed in the current window
    pub fn remaining(&self) -> u32 {
        self.max_signs_per_hour
            .saturating_sub(self.current_hour_signs + self.in_flight)
    }

    /// Exceeded in a window that is still running
    pub fn is_exceeded(&self, now: DateTime<Utc>) -> bool {
        self.exceeded && !self.window_elapsed(now)
    }

    fn try_reserve(&mut self, now: DateTime<Utc>) -> QuotaCheckResult {
        if self.roll_window(now) {
            tracing::debug!("Quota window for {} restarted", self.key_id);
        }

        let used = self.current_hour_signs + self.in_flight;
        if used >= self.max_signs_per_hour {
            self.exceeded = true;
            return QuotaCheckResult::Exceeded {
                used,
                limit: self.max_signs_per_hour,
            };
        }

        self.in_flight += 1;
        QuotaCheckResult::Reserved
    }
}

/// Result of a quota check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuotaCheckResult {
    /// No quota assigned to the key
    Unlimited,
    /// A slot was reserved and must be committed or released
    Reserved,
    Exceeded { used: u32, limit: u32 },
}

/// Quotas of all keys owned by one manager
#[derive(Debug, Default)]
pub(crate) struct QuotaManager {
    quotas: HashMap<String, UsageQuota>,
}

impl QuotaManager {
    /// Assign or replace a key's limit; the window starts fresh
    pub fn set_quota(&mut self, key_id: &str, max_signs_per_hour: u32, now: DateTime<Utc>) {
        self.quotas.insert(
            key_id.to_string(),
            UsageQuota::new(key_id.to_string(), max_signs_per_hour, now),
        );
    }

    pub fn get(&self, key_id: &str) -> Option<&UsageQuota> {
        self.quotas.get(key_id)
    }

    pub fn remove(&mut self, key_id: &str) -> Option<UsageQuota> {
        self.quotas.remove(key_id)
    }

    pub fn try_reserve(&mut self, key_id: &str, now: DateTime<Utc>) -> QuotaCheckResult {
        match self.quotas.get_mut(key_id) {
            Some(quota) => quota.try_reserve(now),
            None => QuotaCheckResult::Unlimited,
        }
    }

    /// Turn a reservation into a counted signature
    pub fn commit(&mut self, key_id: &str) {
        if let Some(quota) = self.quotas.get_mut(key_id) {
            quota.in_flight = quota.in_flight.saturating_sub(1);
            quota.current_hour_signs += 1;
        }
    }

    /// Drop a reservation whose signature failed
    pub fn release(&mut self, key_id: &str) {
        if let Some(quota) = self.quotas.get_mut(key_id) {
            quota.in_flight = quota.in_flight.saturating_sub(1);
        }
    }

    /// Give a rotated key's successor the same limit with a fresh window
    pub fn carry_over(&mut self, old_key_id: &str, new_key_id: &str, now: DateTime<Utc>) {
        if let Some(limit) = self.quotas.get(old_key_id).map(|q| q.max_signs_per_hour) {
            self.set_quota(new_key_id, limit, now);
        }
    }

    pub fn exceeded_count(&self, now: DateTime<Utc>) -> usize {
        self.quotas.values().filter(|q| q.is_exceeded(now)).count()
    }
}
