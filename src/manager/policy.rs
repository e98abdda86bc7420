//! Rotation policies and the reasons a key falls due

use crate::keys::KeyRecord;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

const DAY_MS: i64 = 24 * 60 * 60 * 1000;

/// When a key should be replaced
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RotationPolicy {
    /// Maximum key age (milliseconds)
    pub max_age_ms: i64,
    /// Maximum successful signatures
    pub max_sign_count: u64,
    pub enabled: bool,
}

impl Default for RotationPolicy {
    fn default() -> Self {
        Self {
            max_age_ms: 90 * DAY_MS, // 90 days
            max_sign_count: 10_000,
            enabled: true,
        }
    }
}

impl RotationPolicy {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Every threshold the key has crossed; empty when it is not due,
    /// the policy is off, or the key is no longer active
    pub fn evaluate(&self, record: &KeyRecord, now: DateTime<Utc>) -> Vec<RotationReason> {
        let mut reasons = Vec::new();
        if !self.enabled || !record.is_active() {
            return reasons;
        }

        let age_ms = (now - record.created_at).num_milliseconds();
        if age_ms > self.max_age_ms {
            reasons.push(RotationReason::MaxAgeExceeded {
                age_ms,
                max_age_ms: self.max_age_ms,
            });
        }
        if record.sign_count > self.max_sign_count {
            reasons.push(RotationReason::SignCountExceeded {
                sign_count: record.sign_count,
                max_sign_count: self.max_sign_count,
            });
        }
        reasons
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RotationReason {
    MaxAgeExceeded { age_ms: i64, max_age_ms: i64 },
    SignCountExceeded { sign_count: u64, max_sign_count: u64 },
}

impl fmt::Display for RotationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RotationReason::MaxAgeExceeded { age_ms, max_age_ms } => {
                write!(f, "key age {}ms exceeds max age {}ms", age_ms, max_age_ms)
            }
            RotationReason::SignCountExceeded {
                sign_count,
                max_sign_count,
            } => write!(
                f,
                "sign count {} exceeds max sign count {}",
                sign_count, max_sign_count
            ),
        }
    }
}

/// A managed key that is due for rotation. Each key appears at most once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotationCandidate {
    pub key_id: String,
    pub reasons: Vec<RotationReason>,
    pub age_ms: i64,
    pub sign_count: u64,
}

impl RotationCandidate {
    pub fn reason_summary(&self) -> String {
        self.reasons
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Result of one automatic rotation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoRotation {
    pub old_key_id: String,
    pub new_key_id: String,
    pub reason: String,
}
