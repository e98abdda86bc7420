//! Manager Module - Identity-level key orchestration
//!
//! Layers aliases, purpose-scoped derivation paths, rotation policies,
//! hourly quotas and compliance reporting over the key store.

mod compliance;
mod derivation;
mod entry;
mod orchestrator;
mod policy;
mod quota;
pub mod scheduler;

pub use compliance::{ComplianceReport, ManagerStatus, MAX_RECOMMENDED_KEY_AGE_DAYS};
pub use derivation::{DerivationError, DerivationPath, KeyPurpose};
pub use entry::{CreateKeyParams, ManagedKeyEntry, ROTATED_FROM, ROTATED_TO};
pub use orchestrator::MultiKeyManager;
pub use policy::{AutoRotation, RotationCandidate, RotationPolicy, RotationReason};
pub use quota::{QuotaCheckResult, UsageQuota};
