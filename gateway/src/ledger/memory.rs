//! In-memory ledger for tests.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{normalize_hash, Ledger, LedgerError, LedgerRecord, LedgerResult};

#[derive(Debug, Default)]
struct Tables {
    records: BTreeMap<u64, LedgerRecord>,
    hashes: HashMap<String, u64>,
}

/// [`Ledger`] over two maps behind one mutex.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    tables: Mutex<Tables>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tables.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All records in nonce order.
    pub fn records(&self) -> Vec<LedgerRecord> {
        self.tables.lock().records.values().cloned().collect()
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn create(&self, record: &LedgerRecord) -> LedgerResult<()> {
        let mut record = record.clone();
        record.hash = normalize_hash(&record.hash);

        let mut tables = self.tables.lock();
        match tables.hashes.get(&record.hash) {
            Some(&owner) if owner == record.nonce => return Ok(()),
            Some(_) => return Err(LedgerError::Duplicate(format!("hash {}", record.hash))),
            None => {}
        }
        if let Some(stale) = tables.records.get(&record.nonce).map(|r| r.hash.clone()) {
            tables.hashes.remove(&stale);
        }
        tables.hashes.insert(record.hash.clone(), record.nonce);
        tables.records.insert(record.nonce, record);
        Ok(())
    }

    async fn lookup(&self, hash: &str) -> LedgerResult<LedgerRecord> {
        let hash = normalize_hash(hash);
        let tables = self.tables.lock();
        tables
            .hashes
            .get(&hash)
            .and_then(|nonce| tables.records.get(nonce))
            .cloned()
            .ok_or(LedgerError::NotFound(hash))
    }

    async fn update(&self, record: &LedgerRecord) -> LedgerResult<()> {
        let mut record = record.clone();
        record.hash = normalize_hash(&record.hash);

        let mut tables = self.tables.lock();
        let previous_hash = match tables.records.get(&record.nonce) {
            Some(previous) => previous.hash.clone(),
            None => return Err(LedgerError::NotFound(format!("nonce {}", record.nonce))),
        };
        if previous_hash != record.hash {
            if tables.hashes.contains_key(&record.hash) {
                return Err(LedgerError::Duplicate(format!("hash {}", record.hash)));
            }
            tables.hashes.remove(&previous_hash);
        }
        tables.hashes.insert(record.hash.clone(), record.nonce);
        tables.records.insert(record.nonce, record);
        Ok(())
    }

    async fn by_nonce(&self, nonce: u64) -> LedgerResult<Option<LedgerRecord>> {
        Ok(self.tables.lock().records.get(&nonce).cloned())
    }
}
