//! Purpose-scoped key naming
//!
//! A derivation path is a logical name `{purpose}/{agent}/{index}`, not a
//! cryptographic derivation: every key is independent backend material.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DerivationError {
    #[error("Unknown key purpose: {0}")]
    UnknownPurpose(String),

    #[error("Derivation path {0} is already in use")]
    PathInUse(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KeyPurpose {
    AgentSigning,
    TopicSubmit,
    Identity,
    Payment,
    Backup,
}

impl KeyPurpose {
    pub const ALL: [KeyPurpose; 5] = [
        KeyPurpose::AgentSigning,
        KeyPurpose::TopicSubmit,
        KeyPurpose::Identity,
        KeyPurpose::Payment,
        KeyPurpose::Backup,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            KeyPurpose::AgentSigning => "agent-signing",
            KeyPurpose::TopicSubmit => "topic-submit",
            KeyPurpose::Identity => "identity",
            KeyPurpose::Payment => "payment",
            KeyPurpose::Backup => "backup",
        }
    }
}

impl fmt::Display for KeyPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeyPurpose {
    type Err = DerivationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        KeyPurpose::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| DerivationError::UnknownPurpose(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DerivationPath {
    pub purpose: KeyPurpose,
    pub agent_id: String,
    pub index: u32,
}

impl DerivationPath {
    pub fn new(purpose: KeyPurpose, agent_id: impl Into<String>, index: u32) -> Self {
        Self {
            purpose,
            agent_id: agent_id.into(),
            index,
        }
    }

    /// Canonical alias, e.g. `agent-signing/agent-42/0`
    pub fn alias(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for DerivationPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.purpose, self.agent_id, self.index)
    }
}

/// Hands out the next unused index per (purpose, agent)
///
/// Indices are never reused, even when the key they were reserved for
/// failed to materialize.
#[derive(Debug, Default)]
pub(crate) struct IndexAllocator {
    next: HashMap<(KeyPurpose, String), u32>,
    claimed: HashSet<DerivationPath>,
}

impl IndexAllocator {
    pub fn allocate(&mut self, purpose: KeyPurpose, agent_id: &str) -> u32 {
        // Claims push the counter past their index, so `next` is always free
        let next = self.next.entry((purpose, agent_id.to_string())).or_insert(0);
        let index = *next;
        *next += 1;
        self.claimed
            .insert(DerivationPath::new(purpose, agent_id, index));
        index
    }

    /// Reserve a path chosen by the caller
    pub fn claim(&mut self, path: &DerivationPath) -> Result<(), DerivationError> {
        if !self.claimed.insert(path.clone()) {
            return Err(DerivationError::PathInUse(path.to_string()));
        }
        let next = self
            .next
            .entry((path.purpose, path.agent_id.clone()))
            .or_insert(0);
        *next = (*next).max(path.index.saturating_add(1));
        Ok(())
    }
}
