//! Backend Module - Remote signing backend capability
//!
//! The store never touches private key material. Everything that needs it
//! (generating a key, reading back its public half, producing a signature)
//! goes through [`KeyBackend`]. A KMS client, an HSM bridge or the
//! in-process [`LocalBackend`] can sit behind it.

mod local;

pub use local::LocalBackend;

use crate::crypto::{KeySpec, MessageType, SigningAlgorithm};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("Key not found in backend: {0}")]
    NotFound(String),

    #[error("Backend unavailable: {0}")]
    Unavailable(String),
}

/// Parameters for creating an asymmetric signing key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateKeyRequest {
    pub key_spec: KeySpec,
    /// Always `SIGN_VERIFY` for this crate, passed through for the backend
    pub key_usage: String,
    pub description: Option<String>,
    pub tags: HashMap<String, String>,
}

/// Handle returned by the backend for a freshly created key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatedKey {
    pub key_id: String,
    pub arn: String,
    pub created_at: DateTime<Utc>,
    pub key_spec: KeySpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicKeyResponse {
    /// SubjectPublicKeyInfo, DER encoded
    pub public_key_der: Vec<u8>,
    pub key_spec: KeySpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignRequest {
    pub key_id: String,
    pub message: Vec<u8>,
    pub message_type: MessageType,
    pub signing_algorithm: SigningAlgorithm,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignResponse {
    pub signature: Vec<u8>,
    pub signing_algorithm: SigningAlgorithm,
}

/// Capability interface of a remote signing backend
#[async_trait]
pub trait KeyBackend: Send + Sync {
    /// Create a new key. Fails with `Unavailable` on transport or auth errors.
    async fn create_key(&self, request: CreateKeyRequest) -> Result<CreatedKey, BackendError>;

    /// Fetch the DER public key of an existing key
    async fn get_public_key(&self, key_id: &str) -> Result<PublicKeyResponse, BackendError>;

    async fn sign(&self, request: SignRequest) -> Result<SignResponse, BackendError>;
}
