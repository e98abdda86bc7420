//! In-process backend holding real key material in memory
//!
//! Behaves like a KMS from the caller's side: opaque key ids, ARNs, SPKI
//! DER public keys and backend-side signing. Useful for tests and local
//! development; keys vanish with the process.

use super::{
    BackendError, CreateKeyRequest, CreatedKey, KeyBackend, PublicKeyResponse, SignRequest,
    SignResponse,
};
use crate::clock::{Clock, SystemClock};
use crate::crypto::der::{ED25519_SPKI_HEADER, SECP256K1_SPKI_HEADER};
use crate::crypto::{KeySpec, MessageType};

use async_trait::async_trait;
use ed25519_dalek::SigningKey;
use parking_lot::Mutex;
use secp256k1::{All, Message, Secp256k1, SecretKey};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Private half of a locally held key
enum KeyMaterial {
    Ed25519(SigningKey),
    Secp256k1(SecretKey),
}

struct LocalKey {
    spec: KeySpec,
    material: KeyMaterial,
}

pub struct LocalBackend {
    region: String,
    clock: Arc<dyn Clock>,
    secp: Secp256k1<All>,
    keys: Mutex<HashMap<String, LocalKey>>,
    available: AtomicBool,
    failing_creates: AtomicUsize,
    sign_calls: AtomicU64,
}

impl LocalBackend {
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            clock: Arc::new(SystemClock),
            secp: Secp256k1::new(),
            keys: Mutex::new(HashMap::new()),
            available: AtomicBool::new(true),
            failing_creates: AtomicUsize::new(0),
            sign_calls: AtomicU64::new(0),
        }
    }

    /// Stamp `created_at` from the given clock
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Simulate an outage: every call fails with `Unavailable` while false
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Make the next `count` key creations fail with `Unavailable`
    pub fn fail_next_creates(&self, count: usize) {
        self.failing_creates.store(count, Ordering::SeqCst);
    }

    /// Number of signatures actually produced
    pub fn sign_calls(&self) -> u64 {
        self.sign_calls.load(Ordering::SeqCst)
    }

    pub fn key_count(&self) -> usize {
        self.keys.lock().len()
    }

    fn ensure_available(&self) -> Result<(), BackendError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BackendError::Unavailable(format!(
                "local backend in {} is offline",
                self.region
            )))
        }
    }

    fn take_create_failure(&self) -> bool {
        self.failing_creates
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn generate(&self, spec: KeySpec) -> KeyMaterial {
        match spec {
            KeySpec::Ed25519 => KeyMaterial::Ed25519(SigningKey::generate(&mut rand::rngs::OsRng)),
            KeySpec::EcdsaSecp256k1 => {
                let (secret, _) = self.secp.generate_keypair(&mut rand::thread_rng());
                KeyMaterial::Secp256k1(secret)
            }
        }
    }

    fn public_key_der(&self, material: &KeyMaterial) -> Vec<u8> {
        match material {
            KeyMaterial::Ed25519(key) => {
                let mut der = ED25519_SPKI_HEADER.to_vec();
                der.extend_from_slice(key.verifying_key().as_bytes());
                der
            }
            KeyMaterial::Secp256k1(secret) => {
                let point = secp256k1::PublicKey::from_secret_key(&self.secp, secret);
                let mut der = SECP256K1_SPKI_HEADER.to_vec();
                der.extend_from_slice(&point.serialize_uncompressed());
                der
            }
        }
    }
}

impl Default for LocalBackend {
    fn default() -> Self {
        Self::new("local")
    }
}

#[async_trait]
impl KeyBackend for LocalBackend {
    async fn create_key(&self, request: CreateKeyRequest) -> Result<CreatedKey, BackendError> {
        self.ensure_available()?;
        if self.take_create_failure() {
            return Err(BackendError::Unavailable(
                "injected key creation failure".into(),
            ));
        }

        let key_id = uuid::Uuid::new_v4().to_string();
        let arn = format!("arn:aws:kms:{}:000000000000:key/{}", self.region, key_id);
        let material = self.generate(request.key_spec);

        self.keys.lock().insert(
            key_id.clone(),
            LocalKey {
                spec: request.key_spec,
                material,
            },
        );

        tracing::debug!("Local backend created {} key {}", request.key_spec, key_id);

        Ok(CreatedKey {
            key_id,
            arn,
            created_at: self.clock.now(),
            key_spec: request.key_spec,
        })
    }

    async fn get_public_key(&self, key_id: &str) -> Result<PublicKeyResponse, BackendError> {
        self.ensure_available()?;

        let keys = self.keys.lock();
        let key = keys
            .get(key_id)
            .ok_or_else(|| BackendError::NotFound(key_id.to_string()))?;

        Ok(PublicKeyResponse {
            public_key_der: self.public_key_der(&key.material),
            key_spec: key.spec,
        })
    }

    async fn sign(&self, request: SignRequest) -> Result<SignResponse, BackendError> {
        self.ensure_available()?;

        let signature = {
            let keys = self.keys.lock();
            let key = keys
                .get(&request.key_id)
                .ok_or_else(|| BackendError::NotFound(request.key_id.clone()))?;

            if key.spec.signing_algorithm() != request.signing_algorithm {
                return Err(BackendError::Unavailable(format!(
                    "ValidationException: {} cannot sign with {}",
                    key.spec, request.signing_algorithm
                )));
            }

            match &key.material {
                KeyMaterial::Ed25519(signing_key) => {
                    use ed25519_dalek::Signer;
                    signing_key.sign(&request.message).to_bytes().to_vec()
                }
                KeyMaterial::Secp256k1(secret) => {
                    let digest: [u8; 32] = match request.message_type {
                        MessageType::Raw => Sha256::digest(&request.message).into(),
                        MessageType::Digest => {
                            request.message.as_slice().try_into().map_err(|_| {
                                BackendError::Unavailable(format!(
                                    "ValidationException: digest must be 32 bytes, got {}",
                                    request.message.len()
                                ))
                            })?
                        }
                    };
                    let message = Message::from_digest(digest);
                    self.secp
                        .sign_ecdsa(&message, secret)
                        .serialize_der()
                        .to_vec()
                }
            }
        };

        self.sign_calls.fetch_add(1, Ordering::SeqCst);

        Ok(SignResponse {
            signature,
            signing_algorithm: request.signing_algorithm,
        })
    }
}
