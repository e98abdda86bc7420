//! Keys Module - Backend key records, signing and audit trail
//!
//! A key moves `active` → `rotating` → `retired` and is never deleted here.
//! Scheduled deletion in the backend is handled elsewhere.

mod audit;
mod record;
mod store;

pub use audit::{AuditEntry, AuditLog, AuditOperation};
pub use record::{CostEstimate, KeyMetadata, KeyRecord, KeyStats, KeyStatus, SignResult};
pub use store::{KeySigner, KeyStore};
