//! # Gateway: Submit Pipeline
//!
//! ```text
//! parse ─► estimate gas ─► lease nonce ─► build ─► policy ─► sign ─► send ─► commit ─► record
//!   │            │              │                     │         │       │
//!  400          502            502                403/500    500     502
//! ```
//!
//! Each arrow is a hard gate: nothing downstream of a failure runs. The
//! nonce lease is committed only after the node has accepted the signed
//! transaction; any earlier exit drops the lease and the nonce goes back.
//!
//! Policy evaluation is CPU work in a fresh interpreter, so it runs on the
//! blocking pool against a snapshot of the current script.

use std::sync::Arc;

use alloy::primitives::Address;
use tracing::{error, info, warn};

use crate::chain::{CallRequest, ChainClient};
use crate::error::{GatewayError, GatewayResult};
use crate::ledger::{Ledger, LedgerRecord};
use crate::nonce::NonceSequencer;
use crate::policy::{PolicyEvaluator, PolicySource};
use crate::transaction::{SignedTransaction, TransactionRequest, TransactionSigner, UnsignedTransaction};

/// Placeholder for the `to` log field of a contract deployment.
pub(crate) const CREATE_LABEL: &str = "<create>";

/// The signing gateway. One instance serves every request; share it behind
/// an `Arc`.
pub struct Gateway {
    chain: Arc<dyn ChainClient>,
    nonces: Arc<dyn NonceSequencer>,
    policy: Arc<dyn PolicyEvaluator>,
    rules: PolicySource,
    pub(crate) ledger: Arc<dyn Ledger>,
    signer: TransactionSigner,
}

impl Gateway {
    pub fn new(
        chain: Arc<dyn ChainClient>,
        nonces: Arc<dyn NonceSequencer>,
        policy: Arc<dyn PolicyEvaluator>,
        rules: PolicySource,
        ledger: Arc<dyn Ledger>,
        signer: TransactionSigner,
    ) -> Self {
        Self {
            chain,
            nonces,
            policy,
            rules,
            ledger,
            signer,
        }
    }

    /// The custody account every transaction is sent from.
    pub fn address(&self) -> Address {
        self.signer.address()
    }

    pub fn chain_id(&self) -> u64 {
        self.signer.chain_id()
    }

    /// The live policy script.
    pub fn rules(&self) -> &PolicySource {
        &self.rules
    }

    pub fn policy(&self) -> &dyn PolicyEvaluator {
        self.policy.as_ref()
    }

    /// Runs a new transaction through the pipeline and returns its hash.
    pub async fn submit(&self, request: &TransactionRequest) -> GatewayResult<String> {
        let parsed = request.parse()?;

        let call = CallRequest {
            from: self.address(),
            to: parsed.to,
            value: parsed.value,
            data: parsed.data.clone(),
        };
        let gas_limit = self
            .chain
            .estimate_gas(&call)
            .await
            .inspect_err(|e| error!(error = %e, "gas estimation failed"))?;

        let lease = self
            .nonces
            .next(self.address())
            .await
            .inspect_err(|e| error!(error = %e, "nonce unavailable"))?;

        let tx = UnsignedTransaction {
            nonce: lease.nonce(),
            to: parsed.to,
            value: parsed.value,
            gas_limit,
            gas_price: parsed.gas_price,
            data: parsed.data,
        };

        self.authorize(&tx).await?;
        let signed = self.sign_and_send(&tx).await?;
        lease.commit();

        let record = LedgerRecord::from_signed(&signed);
        self.ledger.create(&record).await.map_err(|e| {
            error!(
                nonce = tx.nonce,
                hash = %record.hash,
                error = %e,
                "transaction forwarded but not recorded"
            );
            GatewayError::Internal(format!("ledger write failed: {e}"))
        })?;

        info!(
            nonce = tx.nonce,
            to = tx.to_checksummed().as_deref().unwrap_or(CREATE_LABEL),
            value = %tx.value,
            gas = tx.gas_limit,
            gas_price = tx.gas_price,
            hash = %record.hash,
            "transaction forwarded"
        );
        Ok(record.hash)
    }

    /// Evaluates the current policy against `tx`. Only `true` gets through.
    pub(crate) async fn authorize(&self, tx: &UnsignedTransaction) -> GatewayResult<()> {
        let policy = self.policy.clone();
        let script = self.rules.current();
        let candidate = tx.candidate();

        let verdict = tokio::task::spawn_blocking(move || policy.evaluate(&script, &candidate))
            .await
            .map_err(|e| GatewayError::Internal(format!("policy task failed: {e}")))?;

        let to = tx.to_checksummed();
        let to = to.as_deref().unwrap_or(CREATE_LABEL);
        match verdict {
            Ok(true) => Ok(()),
            Ok(false) => {
                warn!(
                    nonce = tx.nonce,
                    to,
                    value = %tx.value,
                    gas = tx.gas_limit,
                    gas_price = tx.gas_price,
                    "forbidden transaction"
                );
                Err(GatewayError::PolicyDenied)
            }
            Err(e) => {
                error!(nonce = tx.nonce, to, error = %e, "policy evaluation failed");
                Err(e.into())
            }
        }
    }

    /// Signs `tx` and hands it to the node.
    pub(crate) async fn sign_and_send(
        &self,
        tx: &UnsignedTransaction,
    ) -> GatewayResult<SignedTransaction> {
        let signed = self
            .signer
            .sign(tx)
            .inspect_err(|e| error!(nonce = tx.nonce, error = %e, "signing failed"))?;

        let accepted = self
            .chain
            .send_raw_transaction(signed.raw())
            .await
            .inspect_err(|e| {
                error!(
                    nonce = tx.nonce,
                    hash = %signed.hash(),
                    error = %e,
                    "node refused transaction"
                )
            })?;
        if accepted != signed.hash() {
            warn!(
                expected = %signed.hash(),
                reported = %accepted,
                "node reported a different transaction hash"
            );
        }
        Ok(signed)
    }
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("signer", &self.signer)
            .field("rules", &self.rules)
            .finish_non_exhaustive()
    }
}
