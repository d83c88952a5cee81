//! # SledLedger
//!
//! The production ledger, an embedded sled database.
//!
//! ## Tree Layout
//!
//! | Tree      | Key                | Value                  |
//! |-----------|--------------------|------------------------|
//! | `records` | `nonce` (8B BE)    | `bincode(LedgerRecord)`|
//! | `hashes`  | `hash` (UTF-8)     | `nonce` (8B BE)        |
//!
//! Nonces are big-endian so iteration order matches numeric order.
//!
//! The hash is the only unique key. Creating a record for a nonce that
//! already has one replaces it and drops the old hash from the index;
//! creating the same hash for the same nonce again is a no-op.
//!
//! ## Atomicity
//!
//! A create or update touches both trees inside one sled transaction, so
//! the hash index never points at a record that does not exist and a
//! replaced hash disappears in the same step the new one appears.

use std::path::Path;

use async_trait::async_trait;
use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::{Db, Transactional, Tree};
use tracing::warn;

use super::{normalize_hash, Ledger, LedgerError, LedgerRecord, LedgerResult};

#[derive(Debug, Clone)]
pub struct SledLedger {
    db: Db,
    /// Records by nonce.
    records: Tree,
    /// Hash -> nonce index.
    hashes: Tree,
}

impl SledLedger {
    /// Opens or creates a ledger at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> LedgerResult<Self> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// A ledger that lives in a temp directory and vanishes on drop.
    pub fn open_temporary() -> LedgerResult<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> LedgerResult<Self> {
        let records = db.open_tree("records")?;
        let hashes = db.open_tree("hashes")?;
        Ok(Self {
            db,
            records,
            hashes,
        })
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// All records in nonce order.
    pub fn records(&self) -> LedgerResult<Vec<LedgerRecord>> {
        self.records
            .iter()
            .values()
            .map(|bytes| decode(&bytes?))
            .collect()
    }

    fn get_by_nonce_key(&self, key: &[u8]) -> LedgerResult<Option<LedgerRecord>> {
        self.records
            .get(key)?
            .map(|bytes| decode(&bytes))
            .transpose()
    }
}

fn encode(record: &LedgerRecord) -> LedgerResult<Vec<u8>> {
    bincode::serialize(record).map_err(|e| LedgerError::Serialization(e.to_string()))
}

fn decode(bytes: &[u8]) -> LedgerResult<LedgerRecord> {
    bincode::deserialize(bytes).map_err(|e| LedgerError::Serialization(e.to_string()))
}

/// What a create did to the trees.
enum Created {
    New,
    /// The hash was already recorded under the same nonce.
    Rebroadcast,
    /// The nonce held a record under another hash, now dropped.
    Superseded(String),
}

fn flatten(err: TransactionError<LedgerError>) -> LedgerError {
    match err {
        TransactionError::Abort(err) => err,
        TransactionError::Storage(err) => LedgerError::Sled(err),
    }
}

#[async_trait]
impl Ledger for SledLedger {
    async fn create(&self, record: &LedgerRecord) -> LedgerResult<()> {
        let mut record = record.clone();
        record.hash = normalize_hash(&record.hash);
        let nonce_key = record.nonce.to_be_bytes();
        let bytes = encode(&record)?;

        let outcome = (&self.records, &self.hashes)
            .transaction(|(records, hashes)| {
                if let Some(owner) = hashes.get(record.hash.as_bytes())? {
                    if owner.as_ref() == nonce_key.as_slice() {
                        return Ok(Created::Rebroadcast);
                    }
                    return Err(ConflictableTransactionError::Abort(LedgerError::Duplicate(
                        format!("hash {}", record.hash),
                    )));
                }
                let superseded = match records.get(nonce_key)? {
                    Some(previous) => {
                        let previous =
                            decode(&previous).map_err(ConflictableTransactionError::Abort)?;
                        hashes.remove(previous.hash.as_bytes())?;
                        Some(previous.hash)
                    }
                    None => None,
                };
                records.insert(&nonce_key, bytes.as_slice())?;
                hashes.insert(record.hash.as_bytes(), &nonce_key)?;
                Ok(match superseded {
                    Some(hash) => Created::Superseded(hash),
                    None => Created::New,
                })
            })
            .map_err(flatten)?;

        match outcome {
            Created::Rebroadcast => return Ok(()),
            Created::Superseded(stale) => warn!(
                nonce = record.nonce,
                hash = %record.hash,
                stale = %stale,
                "nonce reissued, superseding stale record"
            ),
            Created::New => {}
        }

        self.db.flush_async().await?;
        Ok(())
    }

    async fn lookup(&self, hash: &str) -> LedgerResult<LedgerRecord> {
        let hash = normalize_hash(hash);
        let nonce_key = self
            .hashes
            .get(hash.as_bytes())?
            .ok_or_else(|| LedgerError::NotFound(hash.clone()))?;
        self.get_by_nonce_key(&nonce_key)?
            .ok_or(LedgerError::NotFound(hash))
    }

    async fn update(&self, record: &LedgerRecord) -> LedgerResult<()> {
        let mut record = record.clone();
        record.hash = normalize_hash(&record.hash);
        let nonce_key = record.nonce.to_be_bytes();
        let bytes = encode(&record)?;

        (&self.records, &self.hashes)
            .transaction(|(records, hashes)| {
                let Some(previous) = records.get(nonce_key)? else {
                    return Err(ConflictableTransactionError::Abort(LedgerError::NotFound(
                        format!("nonce {}", record.nonce),
                    )));
                };
                let previous = decode(&previous).map_err(ConflictableTransactionError::Abort)?;
                if previous.hash != record.hash {
                    if hashes.get(record.hash.as_bytes())?.is_some() {
                        return Err(ConflictableTransactionError::Abort(LedgerError::Duplicate(
                            format!("hash {}", record.hash),
                        )));
                    }
                    hashes.remove(previous.hash.as_bytes())?;
                }
                records.insert(&nonce_key, bytes.as_slice())?;
                hashes.insert(record.hash.as_bytes(), &nonce_key)?;
                Ok(())
            })
            .map_err(flatten)?;

        self.db.flush_async().await?;
        Ok(())
    }

    async fn by_nonce(&self, nonce: u64) -> LedgerResult<Option<LedgerRecord>> {
        self.get_by_nonce_key(&nonce.to_be_bytes())
    }
}
