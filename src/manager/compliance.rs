//! Point-in-time status counters and compliance reporting

use super::ManagedKeyEntry;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Active keys older than this are called out in the report
pub const MAX_RECOMMENDED_KEY_AGE_DAYS: f64 = 180.0;

const DAY_MS: f64 = 24.0 * 60.0 * 60.0 * 1000.0;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ManagerStatus {
    pub total_keys: usize,
    pub by_status: BTreeMap<String, usize>,
    /// Only keys with a derivation path are counted here
    pub by_purpose: BTreeMap<String, usize>,
    pub by_region: BTreeMap<String, usize>,
    pub pending_rotation: usize,
    pub quota_exceeded: usize,
}

impl ManagerStatus {
    pub(crate) fn build(
        entries: &[ManagedKeyEntry],
        pending_rotation: usize,
        quota_exceeded: usize,
    ) -> Self {
        let mut status = ManagerStatus {
            total_keys: entries.len(),
            pending_rotation,
            quota_exceeded,
            ..Default::default()
        };

        for entry in entries {
            *status
                .by_status
                .entry(entry.record.status.as_str().to_string())
                .or_default() += 1;
            if let Some(path) = &entry.derivation_path {
                *status
                    .by_purpose
                    .entry(path.purpose.as_str().to_string())
                    .or_default() += 1;
            }
            *status.by_region.entry(entry.region.clone()).or_default() += 1;
        }
        status
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceReport {
    pub generated_at: DateTime<Utc>,
    pub total_keys: usize,
    pub active_keys: usize,
    pub rotation_policy_enabled: usize,
    pub overdue_for_rotation: usize,
    pub quota_exceeded: usize,
    /// Age of the oldest active key, 0 without active keys
    pub oldest_key_age_days: f64,
    pub average_key_age_days: f64,
    pub total_sign_operations: u64,
    /// Independent findings, in a fixed order
    pub recommendations: Vec<String>,
}

impl ComplianceReport {
    pub(crate) fn build(
        entries: &[ManagedKeyEntry],
        overdue_for_rotation: usize,
        quota_exceeded: usize,
        now: DateTime<Utc>,
    ) -> Self {
        let active: Vec<&ManagedKeyEntry> =
            entries.iter().filter(|e| e.record.is_active()).collect();

        let ages_days: Vec<f64> = active
            .iter()
            .map(|e| (now - e.record.created_at).num_milliseconds() as f64 / DAY_MS)
            .collect();
        let oldest_key_age_days = ages_days.iter().copied().fold(0.0, f64::max);
        let average_key_age_days = if ages_days.is_empty() {
            0.0
        } else {
            ages_days.iter().sum::<f64>() / ages_days.len() as f64
        };

        let rotation_policy_enabled = entries
            .iter()
            .filter(|e| e.rotation_policy.enabled)
            .count();
        let unprotected = active
            .iter()
            .filter(|e| !e.rotation_policy.enabled)
            .count();
        let total_sign_operations = entries.iter().map(|e| e.record.sign_count).sum();

        let mut recommendations = Vec::new();
        if overdue_for_rotation > 0 {
            recommendations.push(format!(
                "{} key(s) overdue for rotation; run auto-rotation or rotate them manually",
                overdue_for_rotation
            ));
        }
        if unprotected > 0 {
            recommendations.push(format!(
                "{} active key(s) have no rotation policy enabled",
                unprotected
            ));
        }
        if quota_exceeded > 0 {
            recommendations.push(format!(
                "{} key(s) exceeded their hourly signing quota; review limits or investigate unusual signing activity",
                quota_exceeded
            ));
        }
        if oldest_key_age_days > MAX_RECOMMENDED_KEY_AGE_DAYS {
            recommendations.push(format!(
                "Oldest active key is {:.0} days old; rotate keys older than {:.0} days",
                oldest_key_age_days, MAX_RECOMMENDED_KEY_AGE_DAYS
            ));
        }
        if entries.is_empty() {
            recommendations.push(
                "No managed keys yet; create derived agent keys to bootstrap the key hierarchy"
                    .to_string(),
            );
        }

        ComplianceReport {
            generated_at: now,
            total_keys: entries.len(),
            active_keys: active.len(),
            rotation_policy_enabled,
            overdue_for_rotation,
            quota_exceeded,
            oldest_key_age_days,
            average_key_age_days,
            total_sign_operations,
            recommendations,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeySpec;
    use crate::keys::{KeyRecord, KeyStatus};
    use crate::manager::{DerivationPath, KeyPurpose, RotationPolicy};
    use chrono::Duration;
    use std::collections::{BTreeSet, HashMap};

    fn entry(key_id: &str, age: Duration, status: KeyStatus, policy: RotationPolicy) -> ManagedKeyEntry {
        let now = Utc::now();
        ManagedKeyEntry {
            record: KeyRecord {
                key_id: key_id.into(),
                key_arn: format!("arn:aws:kms:us-east-1:000000000000:key/{}", key_id),
                public_key: vec![1; 32],
                native_public_key: String::new(),
                key_spec: KeySpec::Ed25519,
                created_at: now - age,
                status,
                sign_count: 4,
                last_used_at: None,
                agent_id: None,
            },
            derivation_path: Some(DerivationPath::new(KeyPurpose::Payment, "agent-1", 0)),
            rotation_policy: policy,
            aliases: BTreeSet::new(),
            region: "us-east-1".into(),
            metadata: HashMap::new(),
        }
    }

    #[test]
    fn test_empty_report_bootstraps() {
        let report = ComplianceReport::build(&[], 0, 0, Utc::now());
        assert_eq!(report.total_keys, 0);
        assert_eq!(report.oldest_key_age_days, 0.0);
        assert_eq!(report.recommendations.len(), 1);
        assert!(report.recommendations[0].starts_with("No managed keys"));
    }

    #[test]
    fn test_recommendations_are_additive() {
        let entries = vec![
            entry("old", Duration::days(200), KeyStatus::Active, RotationPolicy::default()),
            entry("bare", Duration::days(10), KeyStatus::Active, RotationPolicy::disabled()),
            entry("gone", Duration::days(400), KeyStatus::Retired, RotationPolicy::default()),
        ];

        let report = ComplianceReport::build(&entries, 1, 2, Utc::now());

        assert_eq!(report.total_keys, 3);
        assert_eq!(report.active_keys, 2);
        assert_eq!(report.rotation_policy_enabled, 2);
        assert_eq!(report.total_sign_operations, 12);
        assert!(report.oldest_key_age_days > 199.0 && report.oldest_key_age_days < 201.0);
        assert!(report.average_key_age_days > 104.0 && report.average_key_age_days < 106.0);

        assert_eq!(report.recommendations.len(), 4);
        assert!(report.recommendations[0].contains("overdue"));
        assert!(report.recommendations[1].contains("no rotation policy"));
        assert!(report.recommendations[2].contains("quota"));
        assert!(report.recommendations[3].contains("180 days"));
    }

    #[test]
    fn test_status_counts() {
        let mut other_region =
            entry("b", Duration::days(1), KeyStatus::Retired, RotationPolicy::default());
        other_region.region = "eu-west-1".into();
        other_region.derivation_path = None;

        let entries = vec![
            entry("a", Duration::days(1), KeyStatus::Active, RotationPolicy::default()),
            other_region,
        ];
        let status = ManagerStatus::build(&entries, 1, 0);

        assert_eq!(status.total_keys, 2);
        assert_eq!(status.by_status["active"], 1);
        assert_eq!(status.by_status["retired"], 1);
        assert_eq!(status.by_purpose.get("payment"), Some(&1));
        assert_eq!(status.by_purpose.len(), 1);
        assert_eq!(status.by_region["eu-west-1"], 1);
        assert_eq!(status.pending_rotation, 1);
    }
}
