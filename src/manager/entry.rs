//! Managed key entries and creation parameters

use super::{DerivationPath, RotationPolicy};
use crate::crypto::KeySpec;
use crate::keys::KeyRecord;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};

/// Metadata key set on a rotated key's successor
pub const ROTATED_FROM: &str = "rotatedFrom";

/// Metadata key set on a key once it has been rotated away
pub const ROTATED_TO: &str = "rotatedTo";

/// Identity-level view of a backend key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagedKeyEntry {
    /// Snapshot of the store record when the entry was read
    pub record: KeyRecord,
    pub derivation_path: Option<DerivationPath>,
    pub rotation_policy: RotationPolicy,
    pub aliases: BTreeSet<String>,
    pub region: String,
    pub metadata: HashMap<String, Value>,
}

impl ManagedKeyEntry {
    pub fn key_id(&self) -> &str {
        &self.record.key_id
    }

    /// Linked to `agent_id` through its derivation path or its record
    pub fn belongs_to(&self, agent_id: &str) -> bool {
        self.derivation_path
            .as_ref()
            .map_or(false, |p| p.agent_id == agent_id)
            || self.record.agent_id.as_deref() == Some(agent_id)
    }
}

/// Manager-side state of an entry; the record lives in the store
#[derive(Debug, Clone)]
pub(crate) struct EntryState {
    pub derivation_path: Option<DerivationPath>,
    pub rotation_policy: RotationPolicy,
    pub aliases: BTreeSet<String>,
    pub region: String,
    pub metadata: HashMap<String, Value>,
}

impl EntryState {
    pub fn with_record(&self, record: KeyRecord) -> ManagedKeyEntry {
        ManagedKeyEntry {
            record,
            derivation_path: self.derivation_path.clone(),
            rotation_policy: self.rotation_policy.clone(),
            aliases: self.aliases.clone(),
            region: self.region.clone(),
            metadata: self.metadata.clone(),
        }
    }
}

/// Parameters for [`super::MultiKeyManager::create_key`]
#[derive(Debug, Clone, Default)]
pub struct CreateKeyParams {
    /// Falls back to the configured default key spec
    pub key_spec: Option<KeySpec>,
    pub description: Option<String>,
    pub tags: HashMap<String, String>,
    pub derivation_path: Option<DerivationPath>,
    /// Falls back to the configured default policy
    pub rotation_policy: Option<RotationPolicy>,
    pub aliases: Vec<String>,
    pub metadata: HashMap<String, Value>,
    /// Falls back to the configured region
    pub region: Option<String>,
    /// Agent link recorded on the store record
    pub agent_id: Option<String>,
}
