//! Process-local nonce counter.
//!
//! Seeded once per account from the node's pending nonce, then counted in
//! memory. The lock covers a couple of integer operations and nothing else.

use std::collections::BTreeSet;
use std::sync::Arc;

use alloy::primitives::Address;
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;

use super::{NonceError, NonceLease, NonceSequencer, Settlement};
use crate::chain::ChainClient;

#[derive(Debug, Default)]
struct CounterState {
    /// Next never-issued nonce.
    next: u64,
    /// Issued, then released without being spent. Reissued lowest first.
    released: BTreeSet<u64>,
}

#[derive(Debug, Default)]
pub struct LocalNonceCounter {
    accounts: DashMap<Address, Arc<Mutex<CounterState>>>,
}

impl LocalNonceCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts (or restarts) `account` at `next`, forgetting released nonces.
    pub fn seed(&self, account: Address, next: u64) {
        self.accounts.insert(
            account,
            Arc::new(Mutex::new(CounterState {
                next,
                released: BTreeSet::new(),
            })),
        );
    }

    /// Seeds `account` from the node's pending nonce.
    pub async fn seed_from_chain(
        &self,
        chain: &dyn ChainClient,
        account: Address,
    ) -> Result<u64, NonceError> {
        let next = chain.pending_nonce_at(account).await?;
        self.seed(account, next);
        Ok(next)
    }

    /// The nonce the next lease for `account` would get.
    pub fn peek(&self, account: Address) -> Option<u64> {
        let state = self.accounts.get(&account)?;
        let state = state.lock();
        Some(state.released.first().copied().unwrap_or(state.next))
    }

    fn lease(&self, account: Address) -> Result<NonceLease, NonceError> {
        let state = self
            .accounts
            .get(&account)
            .map(|entry| entry.value().clone())
            .ok_or(NonceError::Unseeded(account))?;

        let nonce = {
            let mut counter = state.lock();
            match counter.released.pop_first() {
                Some(nonce) => nonce,
                None => {
                    let nonce = counter.next;
                    counter.next = nonce
                        .checked_add(1)
                        .ok_or(NonceError::Exhausted(account))?;
                    nonce
                }
            }
        };

        Ok(NonceLease::new(account, nonce, move |outcome| {
            if outcome == Settlement::Released {
                state.lock().released.insert(nonce);
            }
        }))
    }
}

#[async_trait]
impl NonceSequencer for LocalNonceCounter {
    async fn next(&self, account: Address) -> Result<NonceLease, NonceError> {
        self.lease(account)
    }
}
