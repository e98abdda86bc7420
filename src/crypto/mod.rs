//! Cryptography Module - Key specs and public key encodings
//!
//! The core never holds private key material. This module only describes
//! the key families a backend can hold and converts the public halves it
//! returns into the raw and ledger-native forms callers need.

pub(crate) mod der;

pub use der::{extract_raw_public_key, native_public_key};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("Unsupported key spec: {0}")]
    UnsupportedKeySpec(String),

    #[error("Invalid public key encoding: {0}")]
    InvalidEncoding(String),
}

/// Key families a backend can hold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeySpec {
    /// EdDSA over Edwards25519
    #[serde(rename = "ECC_NIST_EDWARDS25519")]
    Ed25519,

    /// ECDSA over secp256k1
    #[serde(rename = "ECC_SECG_P256K1")]
    EcdsaSecp256k1,
}

impl KeySpec {
    /// Wire name used by KMS-style backends
    pub fn as_str(&self) -> &'static str {
        match self {
            KeySpec::Ed25519 => "ECC_NIST_EDWARDS25519",
            KeySpec::EcdsaSecp256k1 => "ECC_SECG_P256K1",
        }
    }

    /// Signing algorithm a backend must use for this key family
    pub fn signing_algorithm(&self) -> SigningAlgorithm {
        match self {
            KeySpec::Ed25519 => SigningAlgorithm::Ed25519Sha512,
            KeySpec::EcdsaSecp256k1 => SigningAlgorithm::EcdsaSha256,
        }
    }
}

impl fmt::Display for KeySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeySpec {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ECC_NIST_EDWARDS25519" => Ok(KeySpec::Ed25519),
            "ECC_SECG_P256K1" => Ok(KeySpec::EcdsaSecp256k1),
            other => Err(CryptoError::UnsupportedKeySpec(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SigningAlgorithm {
    #[serde(rename = "ED25519_SHA_512")]
    Ed25519Sha512,

    #[serde(rename = "ECDSA_SHA_256")]
    EcdsaSha256,
}

impl SigningAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            SigningAlgorithm::Ed25519Sha512 => "ED25519_SHA_512",
            SigningAlgorithm::EcdsaSha256 => "ECDSA_SHA_256",
        }
    }
}

impl fmt::Display for SigningAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether the backend receives the message itself or a precomputed digest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    Raw,
    Digest,
}
