//! # Chain Access
//!
//! Everything the gateway asks of the upstream node, and nothing more:
//!
//! | Call                    | JSON-RPC                                   |
//! |-------------------------|--------------------------------------------|
//! | `chain_id`              | `eth_chainId`                              |
//! | `pending_nonce_at`      | `eth_getTransactionCount(addr, "pending")` |
//! | `estimate_gas`          | `eth_estimateGas`                          |
//! | `send_raw_transaction`  | `eth_sendRawTransaction`                   |
//!
//! [`RpcChainClient`] talks to a real node over HTTP. [`SimulatedChain`] is
//! an in-process stand-in with balances and a pending pool, good enough to
//! exercise the whole pipeline without a network.

pub mod rpc;
pub mod simulated;

use alloy::primitives::{Address, Bytes, B256, U256};
use async_trait::async_trait;

pub use rpc::RpcChainClient;
pub use simulated::{PooledTransaction, SimulatedChain};

/// Errors from the upstream node. All of them surface as upstream failures.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ChainError {
    /// Transport failure or a JSON-RPC error response.
    #[error("rpc error: {0}")]
    Rpc(String),

    /// The node understood the transaction and refused it.
    #[error("transaction rejected: {0}")]
    Rejected(String),
}

/// Call description for gas estimation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallRequest {
    pub from: Address,
    /// `None` estimates a contract deployment.
    pub to: Option<Address>,
    pub value: U256,
    pub data: Bytes,
}

/// The upstream node.
#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn chain_id(&self) -> Result<u64, ChainError>;

    /// Next nonce for `account`, counting transactions still in the pool.
    async fn pending_nonce_at(&self, account: Address) -> Result<u64, ChainError>;

    async fn estimate_gas(&self, call: &CallRequest) -> Result<u64, ChainError>;

    /// Broadcasts an EIP-2718 encoded signed transaction, returning its hash.
    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<B256, ChainError>;
}
