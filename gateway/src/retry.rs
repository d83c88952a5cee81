//! # Retry: Fee Replacement
//!
//! A transaction stuck in the pending pool is replaced by sending another
//! one with the same nonce and a higher gas price. The caller only supplies
//! the new price; everything else comes from the ledger record, so the
//! replacement cannot drift from what was originally authorized and sent.
//!
//! The replacement is still a brand-new signature, so it goes through the
//! policy like any other transaction.
//!
//! ## Accepted payloads
//!
//! ```text
//! [{"op": "replace", "path": "/gasPrice", "value": "2"}]     JSON Patch, one operation
//! {"hash": "0x…", "gasPrice": "2"}                            plain object
//! ```
//!
//! The hash comes from the URL, the body, or both (they must agree). Any
//! other operation or path is rejected before anything is looked up.

use serde::Deserialize;
use serde_json::Value;
use tracing::{error, info};

use crate::error::{GatewayError, GatewayResult};
use crate::gateway::{Gateway, CREATE_LABEL};
use crate::ledger::normalize_hash;
use crate::transaction::{parse_gas_price, UnsignedTransaction};

const SUPPORTED_OP: &str = "replace";
const SUPPORTED_PATH: &str = "/gasPrice";

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// A validated fee replacement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryRequest {
    /// Current hash of the record, normalized.
    pub hash: String,
    pub gas_price: u128,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RetryPayload {
    Patch(Vec<PatchOperation>),
    Replace(RetryObject),
}

#[derive(Deserialize)]
struct PatchOperation {
    op: String,
    path: String,
    #[serde(default)]
    value: Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RetryObject {
    #[serde(default)]
    hash: Option<String>,
    gas_price: Value,
}

fn unsupported() -> GatewayError {
    GatewayError::Validation("only replacing gasPrice is supported".into())
}

/// Gas prices arrive as decimal strings or plain JSON integers. A JSON
/// integer only carries up to `u64::MAX`; larger prices must be strings,
/// which reach the full `u128` range.
fn gas_price_from(value: &Value) -> GatewayResult<u128> {
    match value {
        Value::String(s) => parse_gas_price(s),
        Value::Number(n) => match n.as_u64() {
            Some(price) => Ok(u128::from(price)),
            None if n.as_f64().is_some_and(|f| f >= u64::MAX as f64) => {
                Err(GatewayError::Validation(format!(
                    "gasPrice {n} is above {} and must be sent as a decimal string",
                    u64::MAX
                )))
            }
            None => Err(GatewayError::Validation(format!("invalid gasPrice: {n}"))),
        },
        _ => Err(GatewayError::Validation(
            "couldn't convert gasPrice to a non-negative integer".into(),
        )),
    }
}

fn validate_hash(raw: &str) -> GatewayResult<String> {
    let hash = normalize_hash(raw);
    let digits = &hash[2..];
    if digits.len() != 64 || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(GatewayError::Validation(format!("invalid transaction hash: {raw:?}")));
    }
    Ok(hash)
}

impl RetryRequest {
    pub fn new(hash: &str, gas_price: u128) -> GatewayResult<Self> {
        Ok(Self {
            hash: validate_hash(hash)?,
            gas_price,
        })
    }

    /// Parses a retry body. `path_hash` is the hash named by the URL, if any.
    pub fn from_json(path_hash: Option<&str>, body: &[u8]) -> GatewayResult<Self> {
        let payload: RetryPayload = serde_json::from_slice(body).map_err(|_| unsupported())?;

        let (body_hash, gas_price) = match payload {
            RetryPayload::Patch(ops) => match ops.as_slice() {
                [op] if op.op == SUPPORTED_OP && op.path == SUPPORTED_PATH => {
                    (None, gas_price_from(&op.value)?)
                }
                _ => return Err(unsupported()),
            },
            RetryPayload::Replace(object) => (object.hash, gas_price_from(&object.gas_price)?),
        };

        let hash = match (path_hash, body_hash.as_deref()) {
            (Some(path), Some(body)) if normalize_hash(path) != normalize_hash(body) => {
                return Err(GatewayError::Validation(
                    "hash in URL and body disagree".into(),
                ))
            }
            (Some(hash), _) | (None, Some(hash)) => hash,
            (None, None) => {
                return Err(GatewayError::Validation("missing transaction hash".into()))
            }
        };

        Self::new(hash, gas_price)
    }
}

// ---------------------------------------------------------------------------
// Coordinator
// ---------------------------------------------------------------------------

impl Gateway {
    /// Replaces the recorded transaction's gas price and resends it under the
    /// same nonce. Returns the new hash.
    pub async fn retry(&self, request: &RetryRequest) -> GatewayResult<String> {
        let record = self.ledger.lookup(&request.hash).await?;

        let tx = UnsignedTransaction {
            nonce: record.nonce,
            to: record.to,
            value: record.value,
            gas_limit: record.gas,
            gas_price: request.gas_price,
            data: record.data.clone(),
        };

        self.authorize(&tx).await?;
        let signed = self.sign_and_send(&tx).await?;

        let updated = record.replaced_by(&signed);
        self.ledger.update(&updated).await.map_err(|e| {
            error!(
                nonce = tx.nonce,
                hash = %updated.hash,
                replaced = %record.hash,
                error = %e,
                "replacement sent but not recorded"
            );
            GatewayError::Internal(format!("ledger update failed: {e}"))
        })?;

        info!(
            nonce = tx.nonce,
            to = tx.to_checksummed().as_deref().unwrap_or(CREATE_LABEL),
            value = %tx.value,
            gas = tx.gas_limit,
            gas_price = tx.gas_price,
            hash = %updated.hash,
            replaced = %record.hash,
            "transaction replaced"
        );
        Ok(updated.hash)
    }
}
