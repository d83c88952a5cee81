//! # SimulatedChain
//!
//! A tiny in-process EVM-ish node: balances, per-account nonces, and a
//! pending pool that follows the same replacement rules as a real one.
//! There is no EVM here. Calldata is carried around, not executed.
//!
//! What it does model faithfully, because the gateway depends on it:
//!
//! - Transactions are decoded from their raw EIP-2718 bytes and the sender
//!   is recovered from the signature, so a bad signature or the wrong chain
//!   id is rejected exactly like upstream would.
//! - One pending slot per `(sender, nonce)`. A second transaction for the
//!   same slot replaces the first only with a strictly higher gas price.
//! - `pending_nonce_at` counts pooled transactions, like `"pending"` does.
//!
//! [`mine`](SimulatedChain::mine) settles everything executable, charging
//! the full gas limit as gas used.
//!
//! Failure injection (`fail_*`) makes the next calls of that kind return an
//! RPC error until switched off again.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use alloy::consensus::{SignableTransaction, TxEnvelope};
use alloy::eips::eip2718::Decodable2718;
use alloy::primitives::{Address, Bytes, TxKind, B256, U256};
use async_trait::async_trait;
use parking_lot::Mutex;

use super::{CallRequest, ChainClient, ChainError};

/// Base cost of any transaction.
const TX_GAS: u64 = 21_000;
/// Base cost of a contract deployment.
const TX_CREATE_GAS: u64 = 53_000;
const ZERO_BYTE_GAS: u64 = 4;
const NONZERO_BYTE_GAS: u64 = 16;

/// A decoded transaction as the simulated node sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PooledTransaction {
    pub hash: B256,
    pub from: Address,
    pub nonce: u64,
    pub to: Option<Address>,
    pub value: U256,
    pub gas_limit: u64,
    pub gas_price: u128,
    pub data: Bytes,
}

impl PooledTransaction {
    fn max_cost(&self) -> U256 {
        self.value + U256::from(self.gas_limit) * U256::from(self.gas_price)
    }
}

#[derive(Debug, Default)]
struct ChainState {
    balances: HashMap<Address, U256>,
    /// Confirmed (mined) nonce per account.
    nonces: HashMap<Address, u64>,
    pool: BTreeMap<(Address, u64), PooledTransaction>,
    mined: HashMap<B256, PooledTransaction>,
}

impl ChainState {
    fn confirmed_nonce(&self, account: &Address) -> u64 {
        self.nonces.get(account).copied().unwrap_or(0)
    }

    fn balance(&self, account: &Address) -> U256 {
        self.balances.get(account).copied().unwrap_or(U256::ZERO)
    }

    fn pending_nonce(&self, account: &Address) -> u64 {
        let mut nonce = self.confirmed_nonce(account);
        while self.pool.contains_key(&(*account, nonce)) {
            nonce += 1;
        }
        nonce
    }
}

/// In-process [`ChainClient`].
#[derive(Debug)]
pub struct SimulatedChain {
    chain_id: u64,
    state: Mutex<ChainState>,
    fail_estimate: AtomicBool,
    fail_send: AtomicBool,
    fail_nonce: AtomicBool,
    accepted: AtomicUsize,
}

impl SimulatedChain {
    /// A chain where `account` starts with `balance` wei.
    pub fn new(chain_id: u64, account: Address, balance: U256) -> Self {
        let chain = Self {
            chain_id,
            state: Mutex::new(ChainState::default()),
            fail_estimate: AtomicBool::new(false),
            fail_send: AtomicBool::new(false),
            fail_nonce: AtomicBool::new(false),
            accepted: AtomicUsize::new(0),
        };
        chain.fund(account, balance);
        chain
    }

    /// Adds `amount` to `account`'s balance.
    pub fn fund(&self, account: Address, amount: U256) {
        let mut state = self.state.lock();
        let balance = state.balances.entry(account).or_default();
        *balance = balance.saturating_add(amount);
    }

    pub fn balance_of(&self, account: Address) -> U256 {
        self.state.lock().balance(&account)
    }

    /// Mined nonce of `account`, ignoring the pool.
    pub fn nonce_of(&self, account: Address) -> u64 {
        self.state.lock().confirmed_nonce(&account)
    }

    /// Looks a transaction up in the pool, then among mined ones.
    pub fn transaction_by_hash(&self, hash: B256) -> Option<PooledTransaction> {
        let state = self.state.lock();
        state
            .pool
            .values()
            .find(|tx| tx.hash == hash)
            .or_else(|| state.mined.get(&hash))
            .cloned()
    }

    /// Snapshot of the pending pool, ordered by sender then nonce.
    pub fn pending(&self) -> Vec<PooledTransaction> {
        self.state.lock().pool.values().cloned().collect()
    }

    pub fn is_mined(&self, hash: B256) -> bool {
        self.state.lock().mined.contains_key(&hash)
    }

    /// Number of transactions the pool has accepted, replacements included.
    pub fn accepted_count(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    pub fn fail_estimate(&self, fail: bool) {
        self.fail_estimate.store(fail, Ordering::SeqCst);
    }

    pub fn fail_send(&self, fail: bool) {
        self.fail_send.store(fail, Ordering::SeqCst);
    }

    pub fn fail_nonce(&self, fail: bool) {
        self.fail_nonce.store(fail, Ordering::SeqCst);
    }

    /// Executes every pooled transaction whose nonce is next in line for its
    /// sender. Returns the mined hashes in execution order.
    pub fn mine(&self) -> Vec<B256> {
        let mut state = self.state.lock();
        let mut mined = Vec::new();
        loop {
            let ready: Vec<(Address, u64)> = state
                .pool
                .keys()
                .filter(|(from, nonce)| *nonce == state.confirmed_nonce(from))
                .copied()
                .collect();
            if ready.is_empty() {
                break;
            }
            for key in ready {
                let Some(tx) = state.pool.remove(&key) else {
                    continue;
                };
                let cost = tx.max_cost();
                let from_balance = state.balance(&tx.from);
                if from_balance < cost {
                    // Dropped, as a real node would once funds ran out.
                    continue;
                }
                state.balances.insert(tx.from, from_balance - cost);
                let recipient = tx.to.unwrap_or_else(|| tx.from.create(tx.nonce));
                let credited = state.balance(&recipient).saturating_add(tx.value);
                state.balances.insert(recipient, credited);
                state.nonces.insert(tx.from, tx.nonce + 1);
                mined.push(tx.hash);
                state.mined.insert(tx.hash, tx);
            }
        }
        mined
    }

    /// Drops everything pending.
    pub fn rollback(&self) {
        self.state.lock().pool.clear();
    }

    fn decode(&self, mut raw: &[u8]) -> Result<PooledTransaction, ChainError> {
        let envelope = TxEnvelope::decode_2718(&mut raw)
            .map_err(|e| ChainError::Rejected(format!("invalid transaction encoding: {e}")))?;
        let TxEnvelope::Legacy(signed) = envelope else {
            return Err(ChainError::Rejected("only legacy transactions are supported".into()));
        };
        if signed.tx().chain_id != Some(self.chain_id) {
            return Err(ChainError::Rejected(format!(
                "invalid chain id {:?}, expected {}",
                signed.tx().chain_id,
                self.chain_id
            )));
        }
        let from = signed
            .signature()
            .recover_address_from_prehash(&signed.tx().signature_hash())
            .map_err(|e| ChainError::Rejected(format!("invalid signature: {e}")))?;

        let tx = signed.tx();
        Ok(PooledTransaction {
            hash: *signed.hash(),
            from,
            nonce: tx.nonce,
            to: match tx.to {
                TxKind::Call(to) => Some(to),
                TxKind::Create => None,
            },
            value: tx.value,
            gas_limit: tx.gas_limit,
            gas_price: tx.gas_price,
            data: tx.input.clone(),
        })
    }
}

/// Intrinsic gas: base cost plus calldata.
fn intrinsic_gas(call: &CallRequest) -> u64 {
    let base = if call.to.is_none() { TX_CREATE_GAS } else { TX_GAS };
    call.data.iter().fold(base, |gas, byte| {
        gas + if *byte == 0 { ZERO_BYTE_GAS } else { NONZERO_BYTE_GAS }
    })
}

#[async_trait]
impl ChainClient for SimulatedChain {
    async fn chain_id(&self) -> Result<u64, ChainError> {
        Ok(self.chain_id)
    }

    async fn pending_nonce_at(&self, account: Address) -> Result<u64, ChainError> {
        if self.fail_nonce.load(Ordering::SeqCst) {
            return Err(ChainError::Rpc("connection refused".into()));
        }
        Ok(self.state.lock().pending_nonce(&account))
    }

    async fn estimate_gas(&self, call: &CallRequest) -> Result<u64, ChainError> {
        if self.fail_estimate.load(Ordering::SeqCst) {
            return Err(ChainError::Rpc("connection refused".into()));
        }
        if self.state.lock().balance(&call.from) < call.value {
            return Err(ChainError::Rpc("insufficient funds for transfer".into()));
        }
        Ok(intrinsic_gas(call))
    }

    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<B256, ChainError> {
        if self.fail_send.load(Ordering::SeqCst) {
            return Err(ChainError::Rpc("connection refused".into()));
        }
        let tx = self.decode(raw)?;

        let mut state = self.state.lock();
        if state.mined.contains_key(&tx.hash) || state.pool.values().any(|p| p.hash == tx.hash) {
            return Err(ChainError::Rejected("already known".into()));
        }
        if tx.nonce < state.confirmed_nonce(&tx.from) {
            return Err(ChainError::Rejected("nonce too low".into()));
        }
        if state.balance(&tx.from) < tx.max_cost() {
            return Err(ChainError::Rejected("insufficient funds for gas * price + value".into()));
        }
        if let Some(existing) = state.pool.get(&(tx.from, tx.nonce)) {
            if tx.gas_price <= existing.gas_price {
                return Err(ChainError::Rejected("replacement transaction underpriced".into()));
            }
        }

        let hash = tx.hash;
        state.pool.insert((tx.from, tx.nonce), tx);
        self.accepted.fetch_add(1, Ordering::SeqCst);
        Ok(hash)
    }
}
