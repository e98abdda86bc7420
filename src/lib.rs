//! KeyVault Core - Signing key lifecycle over a remote KMS/HSM backend
//!
//! This crate manages opaque key handles held by a signing backend: key
//! creation, public key extraction, signing with audit trail, rotation,
//! hourly usage quotas and compliance reporting. The backend itself is
//! only reached through the [`backend::KeyBackend`] trait.
//!
//! Layering is strict: [`manager::MultiKeyManager`] (aliases, derivation
//! paths, policies, quotas) sits on [`keys::KeyStore`] (records, state
//! machine, audit log), which sits on the backend.

pub mod backend;
pub mod clock;
pub mod crypto;
pub mod keys;
pub mod manager;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use backend::{BackendError, KeyBackend, LocalBackend};
pub use crypto::{CryptoError, KeySpec};
pub use keys::{KeyRecord, KeyStatus, KeyStore};
pub use manager::{DerivationError, MultiKeyManager, RotationPolicy};

/// Main error type for key lifecycle operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyVaultError {
    #[error("Key not found: {0}")]
    NotFound(String),

    #[error("Key {0} is not active")]
    KeyRetired(String),

    #[error("Key {0} is not managed")]
    NotManaged(String),

    #[error("Alias not found: {0}")]
    AliasNotFound(String),

    #[error("Hourly signing quota exceeded for key {key_id}: {used}/{limit}")]
    QuotaExceeded { key_id: String, used: u32, limit: u32 },

    #[error("Rotation already in progress for key {0}")]
    RotationInProgress(String),

    #[error("Cryptographic error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Derivation error: {0}")]
    Derivation(#[from] DerivationError),

    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),
}

impl From<BackendError> for KeyVaultError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::NotFound(key_id) => KeyVaultError::NotFound(key_id),
            BackendError::Unavailable(reason) => KeyVaultError::BackendUnavailable(reason),
        }
    }
}

pub type Result<T> = std::result::Result<T, KeyVaultError>;

/// Core configuration shared by the store and the manager
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyVaultConfig {
    /// Region (or keyspace) the backend keys live in
    pub region: String,

    /// Key family used when a caller does not pick one
    pub default_key_spec: KeySpec,

    /// Policy applied to managed keys created without one
    pub default_rotation_policy: RotationPolicy,

    /// Monthly storage cost of one active key (USD)
    pub monthly_key_cost_usd: f64,

    /// Key usage passed to the backend on creation
    pub key_usage: String,

    /// Maximum retained audit entries (oldest dropped first), unbounded if None
    pub audit_capacity: Option<usize>,

    /// Seconds between background auto-rotation runs
    pub auto_rotation_interval_secs: u64,
}

impl Default for KeyVaultConfig {
    fn default() -> Self {
        Self {
            region: "us-east-1".to_string(),
            default_key_spec: KeySpec::Ed25519,
            default_rotation_policy: RotationPolicy::default(),
            monthly_key_cost_usd: 1.0,
            key_usage: "SIGN_VERIFY".to_string(),
            audit_capacity: None,
            auto_rotation_interval_secs: 60 * 60, // hourly
        }
    }
}
