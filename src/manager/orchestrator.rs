//! Multi-key orchestration over a [`KeyStore`]
//!
//! Adds identity-level semantics on top of raw key records: aliases,
//! derivation paths, rotation policies and hourly quotas. All manager
//! state sits behind one lock that is never held across a store call that
//! awaits the backend.

use super::compliance::{ComplianceReport, ManagerStatus};
use super::derivation::IndexAllocator;
use super::entry::{EntryState, ROTATED_FROM, ROTATED_TO};
use super::policy::{AutoRotation, RotationCandidate};
use super::quota::{QuotaCheckResult, QuotaManager, UsageQuota};
use super::{CreateKeyParams, DerivationPath, KeyPurpose, ManagedKeyEntry};
use crate::crypto::KeySpec;
use crate::keys::{KeyStore, SignResult};
use crate::{KeyVaultError, Result};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};

#[derive(Default)]
struct ManagerState {
    entries: HashMap<String, EntryState>,
    /// alias -> key id
    aliases: HashMap<String, String>,
    quotas: QuotaManager,
    indices: IndexAllocator,
}

impl ManagerState {
    /// Point `alias` at `key_id`. A previous owner loses the alias.
    fn bind_alias(&mut self, alias: &str, key_id: &str) {
        if let Some(previous) = self.aliases.insert(alias.to_string(), key_id.to_string()) {
            if previous != key_id {
                tracing::warn!(
                    "Alias {} reassigned from {} to {}",
                    alias,
                    previous,
                    key_id
                );
                if let Some(entry) = self.entries.get_mut(&previous) {
                    entry.aliases.remove(alias);
                }
            }
        }
        if let Some(entry) = self.entries.get_mut(key_id) {
            entry.aliases.insert(alias.to_string());
        }
    }
}

/// Identity-oriented key manager
pub struct MultiKeyManager {
    store: KeyStore,
    state: Mutex<ManagerState>,
}

impl MultiKeyManager {
    pub fn new(store: KeyStore) -> Self {
        Self {
            store,
            state: Mutex::new(ManagerState::default()),
        }
    }

    /// Underlying record store (stats, audit log, cost estimate)
    pub fn store(&self) -> &KeyStore {
        &self.store
    }

    fn now(&self) -> DateTime<Utc> {
        self.store.clock().now()
    }

    fn view(&self, key_id: &str, entry: &EntryState) -> Option<ManagedKeyEntry> {
        self.store.get_key(key_id).map(|record| entry.with_record(record))
    }

    /// Entries with their current records, oldest first
    fn snapshot(&self) -> Vec<ManagedKeyEntry> {
        let state = self.state.lock();
        let mut entries: Vec<ManagedKeyEntry> = state
            .entries
            .iter()
            .filter_map(|(key_id, entry)| self.view(key_id, entry))
            .collect();
        entries.sort_by(|a, b| {
            a.record
                .created_at
                .cmp(&b.record.created_at)
                .then_with(|| a.record.key_id.cmp(&b.record.key_id))
        });
        entries
    }

    /// Create a backend key and register it as a managed entry
    ///
    /// An explicit derivation path must not be in use by any other entry.
    pub async fn create_key(&self, params: CreateKeyParams) -> Result<ManagedKeyEntry> {
        if let Some(path) = &params.derivation_path {
            self.state.lock().indices.claim(path)?;
        }
        self.register(params).await
    }

    /// Create and register a key whose derivation path is already claimed
    async fn register(&self, params: CreateKeyParams) -> Result<ManagedKeyEntry> {
        let config = self.store.config();
        let key_spec = params.key_spec.unwrap_or(config.default_key_spec);

        let metadata = self
            .store
            .create_key(key_spec, params.description.as_deref(), params.tags)
            .await?;
        let key_id = metadata.key_id;

        if let Some(agent_id) = &params.agent_id {
            self.store.set_agent_id(&key_id, agent_id)?;
        }

        let entry = EntryState {
            derivation_path: params.derivation_path,
            rotation_policy: params
                .rotation_policy
                .unwrap_or_else(|| config.default_rotation_policy.clone()),
            aliases: BTreeSet::new(),
            region: params.region.unwrap_or_else(|| config.region.clone()),
            metadata: params.metadata,
        };

        let mut state = self.state.lock();
        state.entries.insert(key_id.clone(), entry);
        for alias in &params.aliases {
            state.bind_alias(alias, &key_id);
        }

        tracing::info!("Managed key {} registered with {} alias(es)", key_id, params.aliases.len());

        let entry = state
            .entries
            .get(&key_id)
            .and_then(|entry| self.view(&key_id, entry));
        entry.ok_or(KeyVaultError::NotFound(key_id))
    }

    /// Create the next key for `(purpose, agent_id)`, aliased by its path
    pub async fn create_derived_key(
        &self,
        purpose: KeyPurpose,
        agent_id: &str,
        key_spec: Option<KeySpec>,
    ) -> Result<ManagedKeyEntry> {
        let index = self.state.lock().indices.allocate(purpose, agent_id);
        let path = DerivationPath::new(purpose, agent_id, index);

        let mut metadata = HashMap::new();
        metadata.insert("purpose".to_string(), Value::from(purpose.as_str()));

        self.register(CreateKeyParams {
            key_spec,
            description: Some(format!("{} key {}", purpose, path)),
            aliases: vec![path.alias()],
            derivation_path: Some(path),
            metadata,
            agent_id: Some(agent_id.to_string()),
            ..Default::default()
        })
        .await
    }

    /// Sign with quota enforcement
    pub async fn sign(
        &self,
        key_id: &str,
        message: &[u8],
        tx_hash: Option<&str>,
    ) -> Result<SignResult> {
        let now = self.now();
        let reservation = self.state.lock().quotas.try_reserve(key_id, now);

        match reservation {
            QuotaCheckResult::Exceeded { used, limit } => {
                tracing::warn!("Quota exceeded for {}: {}/{}", key_id, used, limit);
                return Err(KeyVaultError::QuotaExceeded {
                    key_id: key_id.to_string(),
                    used,
                    limit,
                });
            }
            QuotaCheckResult::Unlimited => return self.store.sign(key_id, message, tx_hash).await,
            QuotaCheckResult::Reserved => {}
        }

        let result = self.store.sign(key_id, message, tx_hash).await;

        let mut state = self.state.lock();
        match &result {
            Ok(_) => state.quotas.commit(key_id),
            Err(_) => state.quotas.release(key_id),
        }
        result
    }

    pub async fn sign_by_alias(
        &self,
        alias: &str,
        message: &[u8],
        tx_hash: Option<&str>,
    ) -> Result<SignResult> {
        let key_id = self
            .resolve_alias(alias)
            .ok_or_else(|| KeyVaultError::AliasNotFound(alias.to_string()))?;
        self.sign(&key_id, message, tx_hash).await
    }

    /// Cap a managed key's signatures per hour
    pub fn set_quota(&self, key_id: &str, max_signs_per_hour: u32) -> Result<()> {
        let now = self.now();
        let mut state = self.state.lock();
        if !state.entries.contains_key(key_id) {
            return Err(KeyVaultError::NotManaged(key_id.to_string()));
        }
        state.quotas.set_quota(key_id, max_signs_per_hour, now);
        Ok(())
    }

    pub fn get_quota(&self, key_id: &str) -> Option<UsageQuota> {
        self.state.lock().quotas.get(key_id).cloned()
    }

    /// Lift a key's quota; returns whether one was set
    pub fn remove_quota(&self, key_id: &str) -> bool {
        self.state.lock().quotas.remove(key_id).is_some()
    }

    pub fn resolve_alias(&self, alias: &str) -> Option<String> {
        self.state.lock().aliases.get(alias).cloned()
    }

    /// Register an extra alias for a managed key (last registration wins)
    pub fn add_alias(&self, key_id: &str, alias: &str) -> Result<()> {
        let mut state = self.state.lock();
        if !state.entries.contains_key(key_id) {
            return Err(KeyVaultError::NotManaged(key_id.to_string()));
        }
        state.bind_alias(alias, key_id);
        Ok(())
    }

    pub fn remove_alias(&self, alias: &str) -> bool {
        let mut state = self.state.lock();
        match state.aliases.remove(alias) {
            Some(key_id) => {
                if let Some(entry) = state.entries.get_mut(&key_id) {
                    entry.aliases.remove(alias);
                }
                true
            }
            None => false,
        }
    }

    /// Rotate a managed key, moving its identity to the new key
    ///
    /// The successor keeps the policy, region and metadata (tagged with
    /// `rotatedFrom`), takes the next derivation index and receives every
    /// alias of the old key in the same critical section.
    pub async fn rotate_key(&self, key_id: &str) -> Result<ManagedKeyEntry> {
        if !self.state.lock().entries.contains_key(key_id) {
            return Err(KeyVaultError::NotManaged(key_id.to_string()));
        }

        let rotated = self.store.rotate_key(key_id).await?;
        let new_key_id = rotated.key_id;
        let now = self.now();

        let mut state = self.state.lock();
        let old = state
            .entries
            .get_mut(key_id)
            .ok_or_else(|| KeyVaultError::NotManaged(key_id.to_string()))?;
        let aliases = std::mem::take(&mut old.aliases);
        old.metadata
            .insert(ROTATED_TO.to_string(), Value::from(new_key_id.as_str()));

        let mut metadata = old.metadata.clone();
        metadata.remove(ROTATED_TO);
        metadata.insert(ROTATED_FROM.to_string(), Value::from(key_id));
        metadata.insert("rotatedAt".to_string(), Value::from(now.to_rfc3339()));

        let old_path = old.derivation_path.clone();
        let rotation_policy = old.rotation_policy.clone();
        let region = old.region.clone();

        let derivation_path = old_path.map(|path| {
            let index = state.indices.allocate(path.purpose, &path.agent_id);
            DerivationPath { index, ..path }
        });

        state.entries.insert(
            new_key_id.clone(),
            EntryState {
                derivation_path,
                rotation_policy,
                aliases: BTreeSet::new(),
                region,
                metadata,
            },
        );
        for alias in &aliases {
            state.bind_alias(alias, &new_key_id);
        }
        state.quotas.carry_over(key_id, &new_key_id, now);

        tracing::info!(
            "Managed key {} rotated to {} ({} alias(es) moved)",
            key_id,
            new_key_id,
            aliases.len()
        );

        let entry = state
            .entries
            .get(&new_key_id)
            .and_then(|entry| self.view(&new_key_id, entry));
        entry.ok_or(KeyVaultError::NotFound(new_key_id))
    }

    /// Active, policy-enabled keys past their age or sign-count limit
    pub fn get_keys_needing_rotation(&self) -> Vec<RotationCandidate> {
        let now = self.now();
        self.snapshot()
            .into_iter()
            .filter_map(|entry| {
                let reasons = entry.rotation_policy.evaluate(&entry.record, now);
                if reasons.is_empty() {
                    return None;
                }
                Some(RotationCandidate {
                    key_id: entry.record.key_id.clone(),
                    age_ms: (now - entry.record.created_at).num_milliseconds(),
                    sign_count: entry.record.sign_count,
                    reasons,
                })
            })
            .collect()
    }

    /// Rotate every key that is due. A key whose rotation fails is skipped
    /// and picked up again on the next run.
    pub async fn auto_rotate(&self) -> Vec<AutoRotation> {
        let mut rotated = Vec::new();
        for candidate in self.get_keys_needing_rotation() {
            match self.rotate_key(&candidate.key_id).await {
                Ok(entry) => rotated.push(AutoRotation {
                    old_key_id: candidate.key_id.clone(),
                    new_key_id: entry.record.key_id,
                    reason: candidate.reason_summary(),
                }),
                Err(err) => {
                    tracing::warn!("Auto-rotation of {} skipped: {}", candidate.key_id, err);
                }
            }
        }
        rotated
    }

    pub fn get_managed_key(&self, key_id: &str) -> Option<ManagedKeyEntry> {
        let state = self.state.lock();
        state
            .entries
            .get(key_id)
            .and_then(|entry| self.view(key_id, entry))
    }

    /// Every managed entry, retired ones included, oldest first
    pub fn list_managed_keys(&self) -> Vec<ManagedKeyEntry> {
        self.snapshot()
    }

    /// Keys linked to an agent by derivation path or by record
    pub fn get_agent_keys(&self, agent_id: &str) -> Vec<ManagedKeyEntry> {
        self.snapshot()
            .into_iter()
            .filter(|entry| entry.belongs_to(agent_id))
            .collect()
    }

    pub fn get_status(&self) -> ManagerStatus {
        let entries = self.snapshot();
        let pending = self.get_keys_needing_rotation().len();
        let exceeded = self.state.lock().quotas.exceeded_count(self.now());
        ManagerStatus::build(&entries, pending, exceeded)
    }

    pub fn generate_compliance_report(&self) -> ComplianceReport {
        let now = self.now();
        let entries = self.snapshot();
        let overdue = self.get_keys_needing_rotation().len();
        let exceeded = self.state.lock().quotas.exceeded_count(now);
        ComplianceReport::build(&entries, overdue, exceeded, now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::LocalBackend;
    use crate::clock::ManualClock;
    use crate::keys::KeyStatus;
    use crate::manager::{DerivationError, RotationPolicy};
    use crate::test_support::init_tracing;
    use crate::KeyVaultConfig;
    use chrono::Duration;
    use std::sync::Arc;

    struct Harness {
        backend: Arc<LocalBackend>,
        clock: Arc<ManualClock>,
        manager: MultiKeyManager,
    }

    fn create_test_manager() -> Harness {
        init_tracing();
        let clock = Arc::new(ManualClock::default());
        let backend = Arc::new(LocalBackend::new("us-east-1").with_clock(clock.clone()));
        let store = KeyStore::with_clock(backend.clone(), KeyVaultConfig::default(), clock.clone());
        Harness {
            backend,
            clock,
            manager: MultiKeyManager::new(store),
        }
    }

    fn aliased(aliases: &[&str]) -> CreateKeyParams {
        CreateKeyParams {
            aliases: aliases.iter().map(|a| a.to_string()).collect(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_key_applies_defaults() {
        let h = create_test_manager();
        let entry = h.manager.create_key(aliased(&["treasury"])).await.unwrap();

        assert_eq!(entry.record.key_spec, KeySpec::Ed25519);
        assert_eq!(entry.rotation_policy, RotationPolicy::default());
        assert_eq!(entry.region, "us-east-1");
        assert!(entry.aliases.contains("treasury"));
        assert_eq!(
            h.manager.resolve_alias("treasury").as_deref(),
            Some(entry.key_id())
        );
    }

    #[tokio::test]
    async fn test_derived_indices_are_sequential() {
        let h = create_test_manager();

        for expected in 0..3u32 {
            let entry = h
                .manager
                .create_derived_key(KeyPurpose::AgentSigning, "agent-42", None)
                .await
                .unwrap();
            let path = entry.derivation_path.clone().unwrap();
            assert_eq!(path.index, expected);
            assert!(entry
                .aliases
                .contains(&format!("agent-signing/agent-42/{}", expected)));
        }

        // Other purposes and agents count separately
        let other = h
            .manager
            .create_derived_key(KeyPurpose::Payment, "agent-42", Some(KeySpec::EcdsaSecp256k1))
            .await
            .unwrap();
        assert_eq!(other.derivation_path.unwrap().index, 0);
        assert_eq!(other.record.key_spec, KeySpec::EcdsaSecp256k1);
    }

    #[tokio::test]
    async fn test_concurrent_derived_keys_get_unique_indices() {
        let h = create_test_manager();
        let futures = (0..5).map(|_| {
            h.manager
                .create_derived_key(KeyPurpose::TopicSubmit, "agent-1", None)
        });
        let results = futures::future::join_all(futures).await;

        let mut indices: Vec<u32> = results
            .into_iter()
            .map(|r| r.unwrap().derivation_path.unwrap().index)
            .collect();
        indices.sort_unstable();
        assert_eq!(indices, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_sign_by_alias() {
        let h = create_test_manager();
        let entry = h.manager.create_key(aliased(&["ops"])).await.unwrap();

        let result = h.manager.sign_by_alias("ops", b"msg", Some("0xfeed")).await.unwrap();
        assert_eq!(result.key_id, entry.key_id());

        let err = h.manager.sign_by_alias("nobody", b"msg", None).await.unwrap_err();
        assert_eq!(err, KeyVaultError::AliasNotFound("nobody".into()));
    }

    #[tokio::test]
    async fn test_alias_collision_last_write_wins() {
        let h = create_test_manager();
        let first = h.manager.create_key(aliased(&["shared", "first"])).await.unwrap();
        let second = h.manager.create_key(aliased(&["shared"])).await.unwrap();

        assert_eq!(
            h.manager.resolve_alias("shared").as_deref(),
            Some(second.key_id())
        );
        let first = h.manager.get_managed_key(first.key_id()).unwrap();
        assert!(!first.aliases.contains("shared"));
        assert!(first.aliases.contains("first"));
    }

    #[tokio::test]
    async fn test_add_and_remove_alias() {
        let h = create_test_manager();
        let entry = h.manager.create_key(CreateKeyParams::default()).await.unwrap();

        h.manager.add_alias(entry.key_id(), "backup-signer").unwrap();
        assert!(h.manager.resolve_alias("backup-signer").is_some());
        assert!(h.manager.remove_alias("backup-signer"));
        assert!(!h.manager.remove_alias("backup-signer"));
        assert!(h
            .manager
            .get_managed_key(entry.key_id())
            .unwrap()
            .aliases
            .is_empty());

        assert!(matches!(
            h.manager.add_alias("ghost", "x"),
            Err(KeyVaultError::NotManaged(_))
        ));
    }

    #[tokio::test]
    async fn test_quota_blocks_fourth_sign() {
        let h = create_test_manager();
        let entry = h.manager.create_key(CreateKeyParams::default()).await.unwrap();
        h.manager.set_quota(entry.key_id(), 3).unwrap();

        for _ in 0..3 {
            h.manager.sign(entry.key_id(), b"m", None).await.unwrap();
        }
        let err = h.manager.sign(entry.key_id(), b"m", None).await.unwrap_err();
        assert!(matches!(err, KeyVaultError::QuotaExceeded { .. }));
        assert!(err.to_string().contains("3/3"));

        // The refused sign never reached the backend
        assert_eq!(h.backend.sign_calls(), 3);
        assert_eq!(h.manager.store().get_key(entry.key_id()).unwrap().sign_count, 3);
        assert!(h.manager.get_quota(entry.key_id()).unwrap().exceeded);
        assert_eq!(h.manager.get_status().quota_exceeded, 1);
    }

    #[tokio::test]
    async fn test_quota_window_elapses() {
        let h = create_test_manager();
        let entry = h.manager.create_key(CreateKeyParams::default()).await.unwrap();
        h.manager.set_quota(entry.key_id(), 2).unwrap();

        h.manager.sign(entry.key_id(), b"a", None).await.unwrap();
        h.manager.sign(entry.key_id(), b"b", None).await.unwrap();
        assert!(h.manager.sign(entry.key_id(), b"c", None).await.is_err());

        h.clock.advance(Duration::minutes(61));
        h.manager.sign(entry.key_id(), b"d", None).await.unwrap();

        let quota = h.manager.get_quota(entry.key_id()).unwrap();
        assert_eq!(quota.current_hour_signs, 1);
        assert!(!quota.exceeded);
    }

    #[tokio::test]
    async fn test_failed_sign_does_not_consume_quota() {
        let h = create_test_manager();
        let entry = h.manager.create_key(CreateKeyParams::default()).await.unwrap();
        h.manager.set_quota(entry.key_id(), 1).unwrap();

        h.backend.set_available(false);
        assert!(matches!(
            h.manager.sign(entry.key_id(), b"m", None).await,
            Err(KeyVaultError::BackendUnavailable(_))
        ));

        h.backend.set_available(true);
        h.manager.sign(entry.key_id(), b"m", None).await.unwrap();
        assert_eq!(h.manager.get_quota(entry.key_id()).unwrap().current_hour_signs, 1);
    }

    #[tokio::test]
    async fn test_concurrent_signs_respect_quota() {
        let h = create_test_manager();
        let entry = h.manager.create_key(CreateKeyParams::default()).await.unwrap();
        h.manager.set_quota(entry.key_id(), 3).unwrap();

        let futures = (0..6).map(|_| h.manager.sign(entry.key_id(), b"burst", None));
        let results = futures::future::join_all(futures).await;

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 3);
        assert_eq!(h.manager.store().get_key(entry.key_id()).unwrap().sign_count, 3);
    }

    #[tokio::test]
    async fn test_set_quota_requires_managed_key() {
        let h = create_test_manager();
        assert_eq!(
            h.manager.set_quota("ghost", 3).unwrap_err(),
            KeyVaultError::NotManaged("ghost".into())
        );
    }

    #[tokio::test]
    async fn test_rotation_moves_aliases_and_identity() {
        let h = create_test_manager();
        let old = h
            .manager
            .create_derived_key(KeyPurpose::Identity, "agent-9", None)
            .await
            .unwrap();
        h.manager.add_alias(old.key_id(), "primary").unwrap();
        h.manager.set_quota(old.key_id(), 10).unwrap();

        let new = h.manager.rotate_key(old.key_id()).await.unwrap();

        for alias in ["primary", "identity/agent-9/0"] {
            assert_eq!(h.manager.resolve_alias(alias).as_deref(), Some(new.key_id()));
            assert!(new.aliases.contains(alias));
        }
        assert_eq!(new.derivation_path.as_ref().unwrap().index, 1);
        assert_eq!(new.metadata[ROTATED_FROM], Value::from(old.key_id()));
        assert_eq!(new.metadata["purpose"], Value::from("identity"));
        assert_eq!(new.record.agent_id.as_deref(), Some("agent-9"));
        assert_eq!(h.manager.get_quota(new.key_id()).unwrap().max_signs_per_hour, 10);

        let old = h.manager.get_managed_key(old.key_id()).unwrap();
        assert!(old.aliases.is_empty());
        assert_eq!(old.record.status, KeyStatus::Retired);
        assert_eq!(old.metadata[ROTATED_TO], Value::from(new.key_id()));

        // The next derived key continues after the rotated index
        let next = h
            .manager
            .create_derived_key(KeyPurpose::Identity, "agent-9", None)
            .await
            .unwrap();
        assert_eq!(next.derivation_path.unwrap().index, 2);
    }

    #[tokio::test]
    async fn test_rotate_unmanaged_key() {
        let h = create_test_manager();
        let raw = h
            .manager
            .store()
            .create_key(KeySpec::Ed25519, None, HashMap::new())
            .await
            .unwrap();

        assert_eq!(
            h.manager.rotate_key(&raw.key_id).await.unwrap_err(),
            KeyVaultError::NotManaged(raw.key_id.clone())
        );
    }

    #[tokio::test]
    async fn test_concurrent_rotation_transfers_once() {
        let h = create_test_manager();
        let entry = h.manager.create_key(aliased(&["hot"])).await.unwrap();

        let (a, b) = tokio::join!(
            h.manager.rotate_key(entry.key_id()),
            h.manager.rotate_key(entry.key_id())
        );
        assert_eq!(a.is_ok() as u8 + b.is_ok() as u8, 1);

        let winner = a.or(b).unwrap();
        assert_eq!(h.manager.resolve_alias("hot").as_deref(), Some(winner.key_id()));
        assert_eq!(h.manager.list_managed_keys().len(), 2);
    }

    #[tokio::test]
    async fn test_rotation_by_sign_count() {
        let h = create_test_manager();
        let entry = h
            .manager
            .create_key(CreateKeyParams {
                rotation_policy: Some(RotationPolicy {
                    max_sign_count: 2,
                    ..RotationPolicy::default()
                }),
                ..Default::default()
            })
            .await
            .unwrap();

        // Policy flags, it does not block
        for _ in 0..3 {
            h.manager.sign(entry.key_id(), b"tx", None).await.unwrap();
        }

        let due = h.manager.get_keys_needing_rotation();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].key_id, entry.key_id());
        assert!(due[0].reason_summary().contains("sign count"));

        let rotated = h.manager.auto_rotate().await;
        assert_eq!(rotated.len(), 1);
        assert_eq!(rotated[0].old_key_id, entry.key_id());

        let new = h.manager.get_managed_key(&rotated[0].new_key_id).unwrap();
        assert_eq!(new.metadata[ROTATED_FROM], Value::from(entry.key_id()));
        assert!(h.manager.get_keys_needing_rotation().is_empty());
    }

    #[tokio::test]
    async fn test_rotation_by_age_skips_disabled() {
        let h = create_test_manager();
        let aging = h.manager.create_key(CreateKeyParams::default()).await.unwrap();
        h.manager
            .create_key(CreateKeyParams {
                rotation_policy: Some(RotationPolicy::disabled()),
                ..Default::default()
            })
            .await
            .unwrap();

        h.clock.advance(Duration::days(91));

        let due = h.manager.get_keys_needing_rotation();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].key_id, aging.key_id());
        assert_eq!(due[0].reasons.len(), 1);
        assert!(due[0].reason_summary().contains("age"));
    }

    #[tokio::test]
    async fn test_auto_rotate_isolates_failures() {
        let h = create_test_manager();
        for _ in 0..3 {
            h.manager.create_key(CreateKeyParams::default()).await.unwrap();
        }
        h.clock.advance(Duration::days(100));

        h.backend.fail_next_creates(1);
        let rotated = h.manager.auto_rotate().await;
        assert_eq!(rotated.len(), 2);

        // The skipped key is still due and goes through on the next run
        assert_eq!(h.manager.get_keys_needing_rotation().len(), 1);
        assert_eq!(h.manager.auto_rotate().await.len(), 1);
        assert_eq!(h.manager.get_status().by_status["retired"], 3);
    }

    #[tokio::test]
    async fn test_agent_keys_union() {
        let h = create_test_manager();
        let derived = h
            .manager
            .create_derived_key(KeyPurpose::AgentSigning, "agent-5", None)
            .await
            .unwrap();
        let linked = h
            .manager
            .create_key(CreateKeyParams {
                agent_id: Some("agent-5".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        let path_only = h
            .manager
            .create_key(CreateKeyParams {
                derivation_path: Some(DerivationPath::new(KeyPurpose::Backup, "agent-5", 0)),
                ..Default::default()
            })
            .await
            .unwrap();
        h.manager.create_key(CreateKeyParams::default()).await.unwrap();

        let keys: Vec<String> = h
            .manager
            .get_agent_keys("agent-5")
            .into_iter()
            .map(|e| e.record.key_id)
            .collect();
        assert_eq!(keys.len(), 3);
        for expected in [&derived, &linked, &path_only] {
            assert!(keys.iter().any(|k| k == expected.key_id()));
        }
        assert!(h.manager.get_agent_keys("agent-6").is_empty());
    }

    #[tokio::test]
    async fn test_explicit_path_cannot_reuse_index() {
        let h = create_test_manager();
        let derived = h
            .manager
            .create_derived_key(KeyPurpose::Payment, "ag", None)
            .await
            .unwrap();
        assert_eq!(derived.derivation_path.as_ref().unwrap().index, 0);

        let err = h
            .manager
            .create_key(CreateKeyParams {
                derivation_path: Some(DerivationPath::new(KeyPurpose::Payment, "ag", 0)),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert_eq!(
            err,
            KeyVaultError::Derivation(DerivationError::PathInUse("payment/ag/0".into()))
        );
        assert_eq!(h.manager.list_managed_keys().len(), 1);
        assert_eq!(h.backend.key_count(), 1);

        // An explicit path moves the counter past it
        h.manager
            .create_key(CreateKeyParams {
                derivation_path: Some(DerivationPath::new(KeyPurpose::Payment, "ag", 4)),
                ..Default::default()
            })
            .await
            .unwrap();
        let next = h
            .manager
            .create_derived_key(KeyPurpose::Payment, "ag", None)
            .await
            .unwrap();
        assert_eq!(next.derivation_path.unwrap().index, 5);
    }

    #[tokio::test]
    async fn test_status_and_compliance() {
        let h = create_test_manager();

        let empty = h.manager.generate_compliance_report();
        assert_eq!(empty.total_keys, 0);
        assert!(empty.recommendations.iter().any(|r| r.contains("No managed keys")));

        h.manager
            .create_derived_key(KeyPurpose::Payment, "agent-1", None)
            .await
            .unwrap();
        h.manager
            .create_key(CreateKeyParams {
                rotation_policy: Some(RotationPolicy::disabled()),
                region: Some("eu-central-1".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        h.clock.advance(Duration::days(200));

        let status = h.manager.get_status();
        assert_eq!(status.total_keys, 2);
        assert_eq!(status.by_purpose["payment"], 1);
        assert_eq!(status.by_region["eu-central-1"], 1);
        assert_eq!(status.pending_rotation, 1);

        let report = h.manager.generate_compliance_report();
        assert_eq!(report.total_keys, 2);
        assert_eq!(report.rotation_policy_enabled, 1);
        assert_eq!(report.overdue_for_rotation, 1);
        assert!(report.oldest_key_age_days >= 200.0);
        assert_eq!(report.recommendations.len(), 3);
        assert!(!report.recommendations.iter().any(|r| r.contains("No managed keys")));
    }
}
