//! Key records and the values the store hands back

use crate::crypto::{KeySpec, SigningAlgorithm};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a backend key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyStatus {
    Active,
    /// Replacement material is being created; signing is refused
    Rotating,
    /// Replaced by a newer key. Terminal.
    Retired,
}

impl KeyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyStatus::Active => "active",
            KeyStatus::Rotating => "rotating",
            KeyStatus::Retired => "retired",
        }
    }
}

impl fmt::Display for KeyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything the store knows about one backend key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyRecord {
    /// Opaque backend handle
    pub key_id: String,

    pub key_arn: String,

    /// Raw public key bytes (32 for Ed25519, 33 or 65 for secp256k1)
    #[serde(with = "hex::serde")]
    pub public_key: Vec<u8>,

    /// DER-prefixed hex form, as ledgers expect it
    pub native_public_key: String,

    pub key_spec: KeySpec,

    pub created_at: DateTime<Utc>,

    pub status: KeyStatus,

    /// Successful signatures produced with this key
    pub sign_count: u64,

    pub last_used_at: Option<DateTime<Utc>>,

    /// Agent this key signs for (not owned by the record)
    pub agent_id: Option<String>,
}

impl KeyRecord {
    pub fn is_active(&self) -> bool {
        self.status == KeyStatus::Active
    }

    pub fn metadata(&self) -> KeyMetadata {
        KeyMetadata {
            key_id: self.key_id.clone(),
            key_arn: self.key_arn.clone(),
            key_spec: self.key_spec,
            public_key_hex: hex::encode(&self.public_key),
            native_public_key: self.native_public_key.clone(),
            created_at: self.created_at,
        }
    }
}

/// Public description of a key, returned by creation and rotation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyMetadata {
    pub key_id: String,
    pub key_arn: String,
    pub key_spec: KeySpec,
    pub public_key_hex: String,
    pub native_public_key: String,
    pub created_at: DateTime<Utc>,
}

/// Outcome of a successful signing call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignResult {
    #[serde(with = "hex::serde")]
    pub signature: Vec<u8>,
    pub key_id: String,
    pub algorithm: SigningAlgorithm,
    pub latency_ms: u64,
}

/// Aggregate counters over the store
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeyStats {
    pub total_keys: usize,
    pub active_keys: usize,
    pub rotating_keys: usize,
    pub retired_keys: usize,
    pub total_sign_operations: u64,
    pub average_sign_latency_ms: f64,
    pub audit_entries: usize,
}

/// Informational monthly cost of keeping the active keys
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostEstimate {
    pub active_keys: usize,
    pub monthly_cost_per_key_usd: f64,
    pub monthly_total_usd: f64,
}
