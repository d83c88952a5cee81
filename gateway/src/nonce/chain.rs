//! Chain-queried nonces.
//!
//! The node's pending count is the source of truth, but it lags: a query
//! that started before another request's transaction reached the node comes
//! back with a nonce that is already taken. Every nonce handed out is
//! therefore remembered here and skipped over, until either the lease is
//! released or the node's pending count has moved past it.
//!
//! A committed nonce the node never counts (its transaction was dropped
//! from the pool) is held for a settle grace only, then handed out again so
//! later transactions are not stuck behind the gap.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use alloy::primitives::Address;
use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::warn;

use super::{NonceError, NonceLease, NonceSequencer, Settlement};
use crate::chain::ChainClient;
use crate::config::DEFAULT_NONCE_SETTLE_GRACE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reservation {
    /// Handed out, transaction not yet accepted by the node.
    Leased,
    /// Accepted by the node at the given instant, not yet reflected in its
    /// pending count.
    Committed(Instant),
}

type Reservations = Arc<Mutex<HashMap<Address, BTreeMap<u64, Reservation>>>>;

pub struct ChainNonceSequencer {
    chain: Arc<dyn ChainClient>,
    reserved: Reservations,
    settle_grace: Duration,
}

impl ChainNonceSequencer {
    pub fn new(chain: Arc<dyn ChainClient>) -> Self {
        Self {
            chain,
            reserved: Arc::default(),
            settle_grace: DEFAULT_NONCE_SETTLE_GRACE,
        }
    }

    /// Overrides how long a committed nonce waits for the node to count it.
    pub fn with_settle_grace(mut self, grace: Duration) -> Self {
        self.settle_grace = grace;
        self
    }

    /// Nonces currently held back for `account`, leased or committed.
    pub fn reserved(&self, account: Address) -> Vec<u64> {
        self.reserved
            .lock()
            .get(&account)
            .map(|slots| slots.keys().copied().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl NonceSequencer for ChainNonceSequencer {
    async fn next(&self, account: Address) -> Result<NonceLease, NonceError> {
        let asked_at = Instant::now();
        let pending = self.chain.pending_nonce_at(account).await?;

        let nonce = {
            let mut reserved = self.reserved.lock();
            let slots = reserved.entry(account).or_default();
            let grace = self.settle_grace;
            slots.retain(|&nonce, slot| match *slot {
                Reservation::Leased => true,
                Reservation::Committed(_) if nonce < pending => false,
                // Only the nonce the node is waiting on can be a gap, and only
                // a query issued after the grace ran out proves it was lost.
                Reservation::Committed(at) => {
                    let expired = nonce == pending
                        && asked_at
                            .checked_duration_since(at)
                            .is_some_and(|waited| waited >= grace);
                    if expired {
                        warn!(
                            %account,
                            nonce,
                            pending,
                            "committed nonce never reached the node, reissuing"
                        );
                    }
                    !expired
                }
            });

            let mut nonce = pending;
            while slots.contains_key(&nonce) {
                nonce = nonce.checked_add(1).ok_or(NonceError::Exhausted(account))?;
            }
            slots.insert(nonce, Reservation::Leased);
            nonce
        };

        let reserved = self.reserved.clone();
        Ok(NonceLease::new(account, nonce, move |outcome| {
            let mut reserved = reserved.lock();
            let Some(slots) = reserved.get_mut(&account) else {
                return;
            };
            match outcome {
                Settlement::Committed => {
                    slots.insert(nonce, Reservation::Committed(Instant::now()));
                }
                Settlement::Released => {
                    slots.remove(&nonce);
                    if slots.is_empty() {
                        reserved.remove(&account);
                    }
                }
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    use alloy::primitives::{Bytes, U256};

    use crate::chain::SimulatedChain;
    use crate::transaction::{TransactionSigner, UnsignedTransaction};

    const DEV_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    fn setup() -> (Arc<SimulatedChain>, ChainNonceSequencer, TransactionSigner) {
        let signer = TransactionSigner::from_hex(DEV_KEY, 1337).unwrap();
        let chain = Arc::new(SimulatedChain::new(
            1337,
            signer.address(),
            U256::from(1_000_000_000_000u64),
        ));
        let seq = ChainNonceSequencer::new(chain.clone());
        (chain, seq, signer)
    }

    async fn send(chain: &SimulatedChain, signer: &TransactionSigner, nonce: u64) {
        let tx = UnsignedTransaction {
            nonce,
            to: Some(Address::ZERO),
            value: U256::from(1u64),
            gas_limit: 21_000,
            gas_price: 1,
            data: Bytes::new(),
        };
        let signed = signer.sign(&tx).unwrap();
        chain.send_raw_transaction(signed.raw()).await.unwrap();
    }

    #[tokio::test]
    async fn unsettled_nonces_are_skipped() {
        let (_chain, seq, signer) = setup();
        let a = seq.next(signer.address()).await.unwrap();
        let b = seq.next(signer.address()).await.unwrap();
        assert_eq!((a.nonce(), b.nonce()), (0, 1));
        assert_eq!(seq.reserved(signer.address()), vec![0, 1]);
    }

    #[tokio::test]
    async fn released_nonce_is_reused() {
        let (_chain, seq, signer) = setup();
        let a = seq.next(signer.address()).await.unwrap();
        assert_eq!(a.nonce(), 0);
        drop(a);
        assert!(seq.reserved(signer.address()).is_empty());
        assert_eq!(seq.next(signer.address()).await.unwrap().nonce(), 0);
    }

    #[tokio::test]
    async fn committed_nonce_is_held_until_the_node_counts_it() {
        let (chain, seq, signer) = setup();
        let account = signer.address();

        let a = seq.next(account).await.unwrap();
        a.commit();
        // The node has not seen nonce 0 yet; it must not be reissued.
        let b = seq.next(account).await.unwrap();
        assert_eq!(b.nonce(), 1);
        drop(b);

        send(&chain, &signer, 0).await;
        let c = seq.next(account).await.unwrap();
        assert_eq!(c.nonce(), 1);
        assert_eq!(seq.reserved(account), vec![1]);
    }

    #[tokio::test]
    async fn dropped_commit_is_reissued_after_grace() {
        let (chain, seq, signer) = setup();
        let seq = seq.with_settle_grace(Duration::ZERO);
        let account = signer.address();

        let a = seq.next(account).await.unwrap();
        assert_eq!(a.nonce(), 0);
        send(&chain, &signer, 0).await;
        a.commit();

        // The node forgets the transaction: the gap at 0 must not stick.
        chain.rollback();
        assert_eq!(chain.pending_nonce_at(account).await.unwrap(), 0);
        let b = seq.next(account).await.unwrap();
        assert_eq!(b.nonce(), 0);
        assert_eq!(seq.reserved(account), vec![0]);
    }

    #[tokio::test]
    async fn commit_within_grace_is_still_held() {
        let (chain, seq, signer) = setup();
        let seq = seq.with_settle_grace(Duration::from_secs(3600));
        let account = signer.address();

        let a = seq.next(account).await.unwrap();
        send(&chain, &signer, 0).await;
        a.commit();
        chain.rollback();

        assert_eq!(seq.next(account).await.unwrap().nonce(), 1);
    }

    #[tokio::test]
    async fn only_the_missing_nonce_is_reissued() {
        let (chain, seq, signer) = setup();
        let seq = seq.with_settle_grace(Duration::ZERO);
        let account = signer.address();

        for expected in 0..3 {
            let lease = seq.next(account).await.unwrap();
            assert_eq!(lease.nonce(), expected);
            send(&chain, &signer, expected).await;
            lease.commit();
        }
        chain.rollback();

        // Only 0 is reissued; 1 and 2 stay held until the gap below them is
        // filled or they expire in turn.
        let gap = seq.next(account).await.unwrap();
        assert_eq!(gap.nonce(), 0);
        assert_eq!(seq.reserved(account), vec![0, 1, 2]);
        assert_eq!(seq.next(account).await.unwrap().nonce(), 3);
    }

    #[tokio::test]
    async fn node_failure_is_not_papered_over() {
        let (chain, seq, signer) = setup();
        chain.fail_nonce(true);
        assert!(matches!(
            seq.next(signer.address()).await,
            Err(NonceError::Chain(_))
        ));
        assert!(seq.reserved(signer.address()).is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_leases_are_distinct() {
        let (_chain, seq, signer) = setup();
        let seq = Arc::new(seq);
        let account = signer.address();

        let tasks: Vec<_> = (0..100)
            .map(|i| {
                let seq = seq.clone();
                tokio::spawn(async move {
                    let lease = seq.next(account).await.unwrap();
                    let nonce = lease.nonce();
                    if i % 2 == 0 {
                        lease.commit();
                    } else {
                        std::mem::forget(lease);
                    }
                    nonce
                })
            })
            .collect();

        let nonces: Vec<u64> = futures::future::join_all(tasks)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();
        let unique: HashSet<u64> = nonces.iter().copied().collect();
        assert_eq!(unique.len(), 100);
    }
}
