//! SubjectPublicKeyInfo (SPKI) DER handling
//!
//! Backends hand out public keys as SPKI DER. Both supported key families
//! place the key bytes at the tail of the structure, so extraction works
//! from the end of the buffer.

use super::{CryptoError, KeySpec};

/// SEQUENCE { SEQUENCE { OID id-EdDSA 1.3.101.112 }, BIT STRING (33 bytes) }
pub(crate) const ED25519_SPKI_HEADER: [u8; 12] = [
    0x30, 0x2a, 0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x70, 0x03, 0x21, 0x00,
];

/// SEQUENCE { SEQUENCE { OID ecPublicKey, OID secp256k1 }, BIT STRING (66 bytes) }
pub(crate) const SECP256K1_SPKI_HEADER: [u8; 23] = [
    0x30, 0x56, 0x30, 0x10, 0x06, 0x07, 0x2a, 0x86, 0x48, 0xce, 0x3d, 0x02, 0x01, 0x06, 0x05,
    0x2b, 0x81, 0x04, 0x00, 0x0a, 0x03, 0x42, 0x00,
];

/// Prefix ledgers expect in front of a raw Ed25519 key
const ED25519_NATIVE_PREFIX: &str = "302a300506032b6570032100";

/// Prefix ledgers expect in front of a compressed secp256k1 point
const SECP256K1_NATIVE_PREFIX: &str = "302d300706052b8104000a032200";

const ED25519_SPKI_LEN: usize = 44;
const ED25519_KEY_LEN: usize = 32;
const SECP256K1_COMPRESSED_LEN: usize = 33;
const SECP256K1_UNCOMPRESSED_LEN: usize = 65;

/// Extract raw public key bytes from a backend-returned SPKI DER buffer
pub fn extract_raw_public_key(der: &[u8], spec: KeySpec) -> Result<Vec<u8>, CryptoError> {
    match spec {
        KeySpec::Ed25519 => extract_ed25519(der),
        KeySpec::EcdsaSecp256k1 => extract_secp256k1(der),
    }
}

fn extract_ed25519(der: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if der.len() == ED25519_SPKI_LEN {
        if der[..ED25519_SPKI_HEADER.len()] != ED25519_SPKI_HEADER {
            return Err(CryptoError::InvalidEncoding("bad SEQUENCE headers".into()));
        }
        return Ok(der[ED25519_SPKI_HEADER.len()..].to_vec());
    }

    if der.len() < ED25519_KEY_LEN {
        return Err(CryptoError::InvalidEncoding("too short".into()));
    }

    // Non-standard wrapping: the key is fixed-size and always trails.
    Ok(der[der.len() - ED25519_KEY_LEN..].to_vec())
}

fn extract_secp256k1(der: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if der.len() < SECP256K1_COMPRESSED_LEN {
        return Err(CryptoError::InvalidEncoding(format!(
            "too short for a secp256k1 point: {} bytes",
            der.len()
        )));
    }

    // Chosen by length alone; the point itself is validated later by
    // `native_public_key`.
    let key_len = if der.len() >= SECP256K1_UNCOMPRESSED_LEN {
        SECP256K1_UNCOMPRESSED_LEN
    } else {
        SECP256K1_COMPRESSED_LEN
    };

    Ok(der[der.len() - key_len..].to_vec())
}

/// DER-prefixed hex form of a raw public key, as ledgers consume it
///
/// secp256k1 keys are always rendered compressed; an input that is not a
/// valid curve point is rejected.
pub fn native_public_key(raw: &[u8], spec: KeySpec) -> Result<String, CryptoError> {
    match spec {
        KeySpec::Ed25519 => {
            if raw.len() != ED25519_KEY_LEN {
                return Err(CryptoError::InvalidEncoding(format!(
                    "Ed25519 key must be {} bytes, got {}",
                    ED25519_KEY_LEN,
                    raw.len()
                )));
            }
            Ok(format!("{}{}", ED25519_NATIVE_PREFIX, hex::encode(raw)))
        }
        KeySpec::EcdsaSecp256k1 => {
            let point = secp256k1::PublicKey::from_slice(raw)
                .map_err(|e| CryptoError::InvalidEncoding(format!("secp256k1 point: {}", e)))?;
            Ok(format!(
                "{}{}",
                SECP256K1_NATIVE_PREFIX,
                hex::encode(point.serialize())
            ))
        }
    }
}
