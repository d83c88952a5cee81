//! JSON-RPC client over HTTP.

use alloy::primitives::{Address, TxKind, B256};
use alloy::providers::{Provider, RootProvider};
use alloy::rpc::types::{TransactionInput, TransactionRequest};
use async_trait::async_trait;

use super::{CallRequest, ChainClient, ChainError};

/// [`ChainClient`] backed by an alloy HTTP provider.
#[derive(Debug, Clone)]
pub struct RpcChainClient {
    provider: RootProvider,
    url: String,
}

impl RpcChainClient {
    /// Builds a client for `url`. No request is made until the first call.
    pub fn new(url: &str) -> Result<Self, ChainError> {
        let parsed = url
            .parse()
            .map_err(|e| ChainError::Rpc(format!("invalid rpc url {url:?}: {e}")))?;
        Ok(Self {
            provider: RootProvider::new_http(parsed),
            url: url.to_string(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

fn rpc_error(err: impl std::fmt::Display) -> ChainError {
    ChainError::Rpc(err.to_string())
}

#[async_trait]
impl ChainClient for RpcChainClient {
    async fn chain_id(&self) -> Result<u64, ChainError> {
        self.provider.get_chain_id().await.map_err(rpc_error)
    }

    async fn pending_nonce_at(&self, account: Address) -> Result<u64, ChainError> {
        self.provider
            .get_transaction_count(account)
            .pending()
            .await
            .map_err(rpc_error)
    }

    async fn estimate_gas(&self, call: &CallRequest) -> Result<u64, ChainError> {
        let request = TransactionRequest {
            from: Some(call.from),
            to: Some(call.to.map_or(TxKind::Create, TxKind::Call)),
            value: Some(call.value),
            input: TransactionInput::new(call.data.clone()),
            ..Default::default()
        };
        self.provider.estimate_gas(request).await.map_err(rpc_error)
    }

    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<B256, ChainError> {
        let pending = self
            .provider
            .send_raw_transaction(raw)
            .await
            .map_err(|e| ChainError::Rejected(e.to_string()))?;
        Ok(*pending.tx_hash())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_malformed_url() {
        assert!(matches!(RpcChainClient::new("not a url"), Err(ChainError::Rpc(_))));
    }

    #[test]
    fn keeps_configured_url() {
        let client = RpcChainClient::new("http://127.0.0.1:8545").unwrap();
        assert_eq!(client.url(), "http://127.0.0.1:8545");
    }

    #[tokio::test]
    async fn unreachable_node_is_an_rpc_error() {
        // Port 9 (discard) is closed on any sane test host.
        let client = RpcChainClient::new("http://127.0.0.1:9").unwrap();
        let err = client.chain_id().await.unwrap_err();
        assert!(matches!(err, ChainError::Rpc(_)));
    }
}
