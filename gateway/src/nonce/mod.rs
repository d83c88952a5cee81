//! # Nonce Sequencing
//!
//! The one place concurrent requests for the custody account have to agree
//! on something. Two requests that walk away with the same nonce means one
//! of them silently replaces the other in the pool, so this module is
//! deliberately small and boring.
//!
//! A nonce is handed out as a [`NonceLease`]. The lease is *committed* once
//! the node has accepted the signed transaction. If it is dropped instead
//! (policy said no, signing failed, the node refused, the caller hung up)
//! the sequencer gets the nonce back and hands it to the next request.
//!
//! Two strategies:
//!
//! - [`ChainNonceSequencer`] asks the node for the pending nonce on every
//!   call and skips past nonces still in flight locally.
//! - [`LocalNonceCounter`] is seeded once from the node and counts in
//!   memory afterwards.
//!
//! Neither holds a lock across an `.await`.

pub mod chain;
pub mod local;

use std::fmt;

use alloy::primitives::Address;
use async_trait::async_trait;

use crate::chain::ChainError;

pub use chain::ChainNonceSequencer;
pub use local::LocalNonceCounter;

// ---------------------------------------------------------------------------
// Error Type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum NonceError {
    /// The node could not be asked. Never answered with a guess.
    #[error("nonce query failed: {0}")]
    Chain(#[from] ChainError),

    /// The local counter has no starting point for this account.
    #[error("nonce counter not seeded for {0}")]
    Unseeded(Address),

    #[error("nonce space exhausted for {0}")]
    Exhausted(Address),
}

// ---------------------------------------------------------------------------
// Lease
// ---------------------------------------------------------------------------

/// How a lease ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    /// The transaction reached the node; the nonce is spent.
    Committed,
    /// Nothing was sent; the nonce may be reissued.
    Released,
}

type SettleFn = Box<dyn FnOnce(Settlement) + Send + Sync>;

/// A nonce reserved for one transaction. Released on drop unless committed.
pub struct NonceLease {
    account: Address,
    nonce: u64,
    settle: Option<SettleFn>,
}

impl NonceLease {
    pub(crate) fn new(
        account: Address,
        nonce: u64,
        settle: impl FnOnce(Settlement) + Send + Sync + 'static,
    ) -> Self {
        Self {
            account,
            nonce,
            settle: Some(Box::new(settle)),
        }
    }

    pub fn account(&self) -> Address {
        self.account
    }

    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    /// Marks the nonce as spent.
    pub fn commit(mut self) {
        if let Some(settle) = self.settle.take() {
            settle(Settlement::Committed);
        }
    }
}

impl Drop for NonceLease {
    fn drop(&mut self) {
        if let Some(settle) = self.settle.take() {
            settle(Settlement::Released);
        }
    }
}

impl fmt::Debug for NonceLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NonceLease")
            .field("account", &self.account)
            .field("nonce", &self.nonce)
            .field("settled", &self.settle.is_none())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Sequencer Trait
// ---------------------------------------------------------------------------

/// Issues per-account nonces. Concurrent calls for the same account never
/// hold the same unsettled nonce.
#[async_trait]
pub trait NonceSequencer: Send + Sync {
    async fn next(&self, account: Address) -> Result<NonceLease, NonceError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use parking_lot::Mutex;

    fn recording_lease(log: &Arc<Mutex<Vec<Settlement>>>) -> NonceLease {
        let log = log.clone();
        NonceLease::new(Address::ZERO, 7, move |s| log.lock().push(s))
    }

    #[test]
    fn drop_releases() {
        let log = Arc::new(Mutex::new(Vec::new()));
        drop(recording_lease(&log));
        assert_eq!(*log.lock(), vec![Settlement::Released]);
    }

    #[test]
    fn commit_settles_exactly_once() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let lease = recording_lease(&log);
        assert_eq!(lease.nonce(), 7);
        lease.commit();
        assert_eq!(*log.lock(), vec![Settlement::Committed]);
    }
}
