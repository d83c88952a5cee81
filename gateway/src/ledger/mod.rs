//! # Transaction Ledger
//!
//! Every transaction the gateway forwards gets a [`LedgerRecord`], keyed by
//! the hash the caller was handed back. The record is how a later retry
//! finds out what the stuck transaction actually was.
//!
//! A nonce holds at most one record and a hash belongs to at most one
//! nonce. A retry does not add a record: it rewrites the existing one with
//! the new hash and gas price, and the old hash stops resolving. A nonce
//! reissued after the node dropped its transaction replaces the stale
//! record the same way.
//!
//! | Implementation   | Backing                           |
//! |------------------|-----------------------------------|
//! | [`SledLedger`]   | sled, `records` + `hashes` trees  |
//! | [`MemoryLedger`] | mutex-guarded maps, for tests     |

pub mod memory;
pub mod store;

use alloy::primitives::{Address, Bytes, U256};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::transaction::SignedTransaction;

pub use memory::MemoryLedger;
pub use store::SledLedger;

// ---------------------------------------------------------------------------
// Error Type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("duplicate record: {0}")]
    Duplicate(String),

    #[error("no transaction with hash {0}")]
    NotFound(String),
}

pub type LedgerResult<T> = Result<T, LedgerError>;

// ---------------------------------------------------------------------------
// Record
// ---------------------------------------------------------------------------

/// One forwarded transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerRecord {
    pub nonce: u64,
    pub to: Option<Address>,
    pub value: U256,
    /// Gas limit the transaction was signed with.
    pub gas: u64,
    pub gas_price: u128,
    pub data: Bytes,
    /// `0x`-prefixed lowercase hex. Unique among live records.
    pub hash: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LedgerRecord {
    /// Record for a transaction the node just accepted.
    pub fn from_signed(signed: &SignedTransaction) -> Self {
        let tx = signed.tx();
        let now = Utc::now();
        Self {
            nonce: tx.nonce,
            to: tx.to,
            value: tx.value,
            gas: tx.gas_limit,
            gas_price: tx.gas_price,
            data: tx.data.clone(),
            hash: signed.hash_hex(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Same record after a fee replacement: new hash and gas price, same
    /// everything else.
    pub fn replaced_by(&self, signed: &SignedTransaction) -> Self {
        Self {
            hash: signed.hash_hex(),
            gas_price: signed.tx().gas_price,
            updated_at: Utc::now(),
            ..self.clone()
        }
    }
}

/// Canonical form used as the lookup key: lowercase, `0x`-prefixed.
pub fn normalize_hash(hash: &str) -> String {
    let hash = hash.trim();
    let digits = hash
        .strip_prefix("0x")
        .or_else(|| hash.strip_prefix("0X"))
        .unwrap_or(hash);
    format!("0x{}", digits.to_ascii_lowercase())
}

// ---------------------------------------------------------------------------
// Ledger Trait
// ---------------------------------------------------------------------------

#[async_trait]
pub trait Ledger: Send + Sync {
    /// Stores a new record. A record already held for the same nonce is
    /// replaced and its hash stops resolving. Storing the same hash for the
    /// same nonce again is a no-op; the same hash under another nonce fails
    /// with [`LedgerError::Duplicate`].
    async fn create(&self, record: &LedgerRecord) -> LedgerResult<()>;

    /// Finds the live record for `hash`.
    async fn lookup(&self, hash: &str) -> LedgerResult<LedgerRecord>;

    /// Overwrites the record with the same nonce, re-keying it under the
    /// new hash. The previous hash no longer resolves.
    async fn update(&self, record: &LedgerRecord) -> LedgerResult<()>;

    /// Finds the record for `nonce`, if any.
    async fn by_nonce(&self, nonce: u64) -> LedgerResult<Option<LedgerRecord>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashes_normalize_to_lowercase_with_prefix() {
        assert_eq!(normalize_hash("0xABcd"), "0xabcd");
        assert_eq!(normalize_hash("ABcd"), "0xabcd");
        assert_eq!(normalize_hash(" 0XAB "), "0xab");
    }
}
