//! Key Record Store - per-key signing state over one backend keyspace
//!
//! Owns the key id → record map and the audit log. Record mutations are
//! short critical sections on either side of the backend call; no record
//! lock is held while the backend is awaited.
//!
//! Each key also has a signing gate. Signatures hold it shared for the
//! whole backend round trip and rotation takes it exclusively to leave
//! `active`, so a key is never retired under an in-flight signature.

use super::audit::{AuditEntry, AuditLog, AuditOperation};
use super::record::{CostEstimate, KeyMetadata, KeyRecord, KeyStats, KeyStatus, SignResult};
use crate::backend::{CreateKeyRequest, KeyBackend, SignRequest};
use crate::clock::{Clock, SystemClock};
use crate::crypto::{self, KeySpec, MessageType};
use crate::{KeyVaultConfig, KeyVaultError, Result};

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;

/// Audit key id for creations the backend never assigned an id to
const UNASSIGNED_KEY_ID: &str = "unassigned";

struct StoreInner {
    backend: Arc<dyn KeyBackend>,
    config: KeyVaultConfig,
    clock: Arc<dyn Clock>,
    records: Mutex<HashMap<String, KeyRecord>>,
    gates: Mutex<HashMap<String, Arc<RwLock<()>>>>,
    audit: AuditLog,
}

/// Lifecycle manager for the keys of one backend region
///
/// Cloning is cheap and every clone shares the same state.
#[derive(Clone)]
pub struct KeyStore {
    inner: Arc<StoreInner>,
}

impl KeyStore {
    pub fn new(backend: Arc<dyn KeyBackend>, config: KeyVaultConfig) -> Self {
        Self::with_clock(backend, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        backend: Arc<dyn KeyBackend>,
        config: KeyVaultConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let audit = AuditLog::new(config.audit_capacity);
        Self {
            inner: Arc::new(StoreInner {
                backend,
                config,
                clock,
                records: Mutex::new(HashMap::new()),
                gates: Mutex::new(HashMap::new()),
                audit,
            }),
        }
    }

    pub fn config(&self) -> &KeyVaultConfig {
        &self.inner.config
    }

    pub(crate) fn clock(&self) -> &Arc<dyn Clock> {
        &self.inner.clock
    }

    fn audit(&self, entry: AuditEntry) {
        self.inner.audit.record(entry);
    }

    fn gate(&self, key_id: &str) -> Result<Arc<RwLock<()>>> {
        self.inner
            .gates
            .lock()
            .get(key_id)
            .cloned()
            .ok_or_else(|| KeyVaultError::NotFound(key_id.to_string()))
    }

    fn track(&self, record: KeyRecord) {
        self.inner
            .gates
            .lock()
            .insert(record.key_id.clone(), Arc::new(RwLock::new(())));
        self.inner
            .records
            .lock()
            .insert(record.key_id.clone(), record);
    }

    /// Create a key in the backend and start tracking it as active
    pub async fn create_key(
        &self,
        key_spec: KeySpec,
        description: Option<&str>,
        tags: HashMap<String, String>,
    ) -> Result<KeyMetadata> {
        let record = self.provision(key_spec, description, tags).await?;
        let metadata = record.metadata();
        self.track(record);

        tracing::info!("Created {} key {}", metadata.key_spec, metadata.key_id);
        Ok(metadata)
    }

    /// Backend round trips for a new key; the record is not stored yet
    async fn provision(
        &self,
        key_spec: KeySpec,
        description: Option<&str>,
        tags: HashMap<String, String>,
    ) -> Result<KeyRecord> {
        let backend = &self.inner.backend;
        let request = CreateKeyRequest {
            key_spec,
            key_usage: self.inner.config.key_usage.clone(),
            description: description.map(str::to_string),
            tags,
        };

        let created = match backend.create_key(request).await {
            Ok(created) => {
                self.audit(AuditEntry::success(
                    self.inner.clock.now(),
                    &created.key_id,
                    AuditOperation::CreateKey,
                ));
                created
            }
            Err(err) => {
                tracing::warn!("Backend failed to create {} key: {}", key_spec, err);
                self.audit(AuditEntry::failure(
                    self.inner.clock.now(),
                    UNASSIGNED_KEY_ID,
                    AuditOperation::CreateKey,
                    &err,
                ));
                return Err(KeyVaultError::BackendUnavailable(err.to_string()));
            }
        };

        let decoded = match backend.get_public_key(&created.key_id).await {
            Ok(response) => crypto::extract_raw_public_key(&response.public_key_der, key_spec)
                .and_then(|raw| {
                    let native = crypto::native_public_key(&raw, key_spec)?;
                    Ok((raw, native))
                })
                .map_err(KeyVaultError::from),
            Err(err) => Err(KeyVaultError::from(err)),
        };

        let (public_key, native_public_key) = match decoded {
            Ok(decoded) => {
                self.audit(AuditEntry::success(
                    self.inner.clock.now(),
                    &created.key_id,
                    AuditOperation::GetPublicKey,
                ));
                decoded
            }
            Err(err) => {
                tracing::warn!("Public key of {} unusable: {}", created.key_id, err);
                self.audit(AuditEntry::failure(
                    self.inner.clock.now(),
                    &created.key_id,
                    AuditOperation::GetPublicKey,
                    &err,
                ));
                return Err(err);
            }
        };

        Ok(KeyRecord {
            key_id: created.key_id,
            key_arn: created.arn,
            public_key,
            native_public_key,
            key_spec,
            created_at: created.created_at,
            status: KeyStatus::Active,
            sign_count: 0,
            last_used_at: None,
            agent_id: None,
        })
    }

    /// Sign `message` with an active key
    pub async fn sign(
        &self,
        key_id: &str,
        message: &[u8],
        tx_hash: Option<&str>,
    ) -> Result<SignResult> {
        let gate = self.gate(key_id)?;
        let _signing = gate.read().await;

        let algorithm = {
            let records = self.inner.records.lock();
            let record = records
                .get(key_id)
                .ok_or_else(|| KeyVaultError::NotFound(key_id.to_string()))?;
            if !record.is_active() {
                return Err(KeyVaultError::KeyRetired(key_id.to_string()));
            }
            record.key_spec.signing_algorithm()
        };

        let started = Instant::now();
        let response = self
            .inner
            .backend
            .sign(SignRequest {
                key_id: key_id.to_string(),
                message: message.to_vec(),
                message_type: MessageType::Raw,
                signing_algorithm: algorithm,
            })
            .await;
        let latency_ms = started.elapsed().as_millis() as u64;
        let now = self.inner.clock.now();

        let response = match response {
            Ok(response) => response,
            Err(err) => {
                tracing::warn!("Backend failed to sign with {}: {}", key_id, err);
                self.audit(
                    AuditEntry::failure(now, key_id, AuditOperation::Sign, &err)
                        .with_tx_hash(tx_hash),
                );
                return Err(err.into());
            }
        };

        if let Some(record) = self.inner.records.lock().get_mut(key_id) {
            record.sign_count += 1;
            record.last_used_at = Some(now);
        }
        self.audit(
            AuditEntry::success(now, key_id, AuditOperation::Sign)
                .with_tx_hash(tx_hash)
                .with_latency(latency_ms),
        );

        tracing::debug!("Signed with {} in {}ms", key_id, latency_ms);

        Ok(SignResult {
            signature: response.signature,
            key_id: key_id.to_string(),
            algorithm: response.signing_algorithm,
            latency_ms,
        })
    }

    /// Signing handle bound to one key; the key must exist now
    pub fn get_signer(&self, key_id: &str) -> Result<KeySigner> {
        if !self.inner.records.lock().contains_key(key_id) {
            return Err(KeyVaultError::NotFound(key_id.to_string()));
        }
        Ok(KeySigner {
            store: self.clone(),
            key_id: key_id.to_string(),
        })
    }

    /// Replace a key with fresh material of the same spec
    ///
    /// Waits for signatures already in flight on the key, then marks it
    /// `rotating` while the backend works, so later signs and rotations of
    /// it are refused. On success it is retired and the new key (carrying
    /// the agent link) is returned; on failure it goes back to `active`.
    pub async fn rotate_key(&self, key_id: &str) -> Result<KeyMetadata> {
        let gate = self.gate(key_id)?;
        let (key_spec, agent_id) = {
            let _drained = gate.write().await;
            let mut records = self.inner.records.lock();
            let record = records
                .get_mut(key_id)
                .ok_or_else(|| KeyVaultError::NotFound(key_id.to_string()))?;
            match record.status {
                KeyStatus::Active => {}
                KeyStatus::Rotating => {
                    return Err(KeyVaultError::RotationInProgress(key_id.to_string()))
                }
                KeyStatus::Retired => return Err(KeyVaultError::KeyRetired(key_id.to_string())),
            }
            record.status = KeyStatus::Rotating;
            (record.key_spec, record.agent_id.clone())
        };

        let description = format!("Rotation of {}", key_id);
        let provisioned = self
            .provision(key_spec, Some(&description), HashMap::new())
            .await;
        let now = self.inner.clock.now();

        let mut new_record = match provisioned {
            Ok(record) => record,
            Err(err) => {
                if let Some(record) = self.inner.records.lock().get_mut(key_id) {
                    record.status = KeyStatus::Active;
                }
                tracing::warn!("Rotation of {} failed: {}", key_id, err);
                self.audit(AuditEntry::failure(now, key_id, AuditOperation::RotateKey, &err));
                return Err(err);
            }
        };
        new_record.agent_id = agent_id;
        let metadata = new_record.metadata();

        self.inner
            .gates
            .lock()
            .insert(new_record.key_id.clone(), Arc::new(RwLock::new(())));
        {
            let mut records = self.inner.records.lock();
            if let Some(old) = records.get_mut(key_id) {
                old.status = KeyStatus::Retired;
            }
            records.insert(new_record.key_id.clone(), new_record);
        }
        self.audit(AuditEntry::success(now, key_id, AuditOperation::RotateKey));

        tracing::info!("Rotated key {} -> {}", key_id, metadata.key_id);
        Ok(metadata)
    }

    pub fn get_key(&self, key_id: &str) -> Option<KeyRecord> {
        self.inner.records.lock().get(key_id).cloned()
    }

    /// All records, oldest first
    pub fn list_keys(&self) -> Vec<KeyRecord> {
        let mut keys: Vec<KeyRecord> = self.inner.records.lock().values().cloned().collect();
        keys.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.key_id.cmp(&b.key_id)));
        keys
    }

    /// Link a key to the agent it signs for
    pub fn set_agent_id(&self, key_id: &str, agent_id: &str) -> Result<()> {
        let mut records = self.inner.records.lock();
        let record = records
            .get_mut(key_id)
            .ok_or_else(|| KeyVaultError::NotFound(key_id.to_string()))?;
        record.agent_id = Some(agent_id.to_string());
        Ok(())
    }

    /// Oldest active key linked to `agent_id`
    pub fn get_key_for_agent(&self, agent_id: &str) -> Option<KeyRecord> {
        self.inner
            .records
            .lock()
            .values()
            .filter(|r| r.is_active() && r.agent_id.as_deref() == Some(agent_id))
            .min_by(|a, b| a.created_at.cmp(&b.created_at).then(a.key_id.cmp(&b.key_id)))
            .cloned()
    }

    pub fn get_audit_log(&self, key_id: Option<&str>, limit: Option<usize>) -> Vec<AuditEntry> {
        self.inner.audit.query(key_id, limit)
    }

    pub fn get_stats(&self) -> KeyStats {
        let mut stats = KeyStats::default();
        for record in self.inner.records.lock().values() {
            stats.total_keys += 1;
            stats.total_sign_operations += record.sign_count;
            match record.status {
                KeyStatus::Active => stats.active_keys += 1,
                KeyStatus::Rotating => stats.rotating_keys += 1,
                KeyStatus::Retired => stats.retired_keys += 1,
            }
        }
        stats.average_sign_latency_ms = self.inner.audit.average_sign_latency_ms();
        stats.audit_entries = self.inner.audit.len();
        stats
    }

    pub fn get_cost_estimate(&self) -> CostEstimate {
        let active_keys = self
            .inner
            .records
            .lock()
            .values()
            .filter(|r| r.is_active())
            .count();
        let per_key = self.inner.config.monthly_key_cost_usd;

        CostEstimate {
            active_keys,
            monthly_cost_per_key_usd: per_key,
            monthly_total_usd: active_keys as f64 * per_key,
        }
    }
}

/// Signing function bound to a single key
#[derive(Clone)]
pub struct KeySigner {
    store: KeyStore,
    key_id: String,
}

impl KeySigner {
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// Sign and return the signature bytes
    pub async fn sign(&self, message: &[u8]) -> Result<Vec<u8>> {
        let result = self.store.sign(&self.key_id, message, None).await?;
        Ok(result.signature)
    }
}
