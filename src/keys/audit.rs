//! Append-only audit trail of lifecycle operations

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOperation {
    CreateKey,
    GetPublicKey,
    Sign,
    RotateKey,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub key_id: String,
    pub operation: AuditOperation,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Ledger transaction this signature was produced for
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    /// Backend round trip, recorded for sign operations
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
}

impl AuditEntry {
    pub fn success(timestamp: DateTime<Utc>, key_id: &str, operation: AuditOperation) -> Self {
        Self {
            timestamp,
            key_id: key_id.to_string(),
            operation,
            success: true,
            error: None,
            tx_hash: None,
            latency_ms: None,
        }
    }

    pub fn failure(
        timestamp: DateTime<Utc>,
        key_id: &str,
        operation: AuditOperation,
        error: impl ToString,
    ) -> Self {
        Self {
            success: false,
            error: Some(error.to_string()),
            ..Self::success(timestamp, key_id, operation)
        }
    }

    pub fn with_tx_hash(mut self, tx_hash: Option<&str>) -> Self {
        self.tx_hash = tx_hash.map(str::to_string);
        self
    }

    pub fn with_latency(mut self, latency_ms: u64) -> Self {
        self.latency_ms = Some(latency_ms);
        self
    }
}

/// Entries are kept in insertion order; a capacity drops the oldest first
pub struct AuditLog {
    entries: Mutex<VecDeque<AuditEntry>>,
    capacity: Option<usize>,
}

impl AuditLog {
    pub fn new(capacity: Option<usize>) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            capacity,
        }
    }

    pub fn record(&self, entry: AuditEntry) {
        let mut entries = self.entries.lock();
        entries.push_back(entry);
        if let Some(capacity) = self.capacity {
            while entries.len() > capacity {
                entries.pop_front();
            }
        }
    }

    /// Most recent `limit` entries (all when None), optionally for one key,
    /// oldest first
    pub fn query(&self, key_id: Option<&str>, limit: Option<usize>) -> Vec<AuditEntry> {
        let entries = self.entries.lock();
        let mut matching: Vec<AuditEntry> = entries
            .iter()
            .filter(|e| key_id.map_or(true, |id| e.key_id == id))
            .cloned()
            .collect();

        if let Some(limit) = limit {
            let skip = matching.len().saturating_sub(limit);
            matching.drain(..skip);
        }
        matching
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Mean latency of successful sign operations, 0 when there are none
    pub fn average_sign_latency_ms(&self) -> f64 {
        let entries = self.entries.lock();
        let (total, count) = entries
            .iter()
            .filter(|e| e.operation == AuditOperation::Sign && e.success)
            .filter_map(|e| e.latency_ms)
            .fold((0u64, 0u64), |(total, count), latency| (total + latency, count + 1));

        if count == 0 {
            0.0
        } else {
            total as f64 / count as f64
        }
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new(None)
    }
}
