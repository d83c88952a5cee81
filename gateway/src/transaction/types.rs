//! Request parsing and the canonical transaction shape.
//!
//! Callers speak strings: decimal integers for amounts, hex for calldata.
//! Everything is parsed into fixed-width chain integers here, once, so the
//! rest of the pipeline never sees floating point or unvalidated input.

use alloy::consensus::TxLegacy;
use alloy::primitives::{Address, Bytes, TxKind, U256};
use serde::{Deserialize, Serialize};

use crate::error::{GatewayError, GatewayResult};

// ---------------------------------------------------------------------------
// Inbound request
// ---------------------------------------------------------------------------

/// JSON body of `POST /v1/proxy/transactions`.
///
/// `to` absent (or empty) means contract creation. `value` defaults to zero.
/// `gasPrice` is mandatory. `data` is hex, with or without a `0x` prefix.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    pub gas_price: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

/// A [`TransactionRequest`] whose fields all parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedRequest {
    pub to: Option<Address>,
    pub value: U256,
    pub gas_price: u128,
    pub data: Bytes,
}

impl TransactionRequest {
    /// Parses every field, failing on the first malformed one.
    pub fn parse(&self) -> GatewayResult<ParsedRequest> {
        let to = match self.to.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(raw) => Some(parse_address(raw)?),
        };
        let value = match self.value.as_deref().map(str::trim) {
            None | Some("") => U256::ZERO,
            Some(raw) => parse_value(raw)?,
        };
        let gas_price = parse_gas_price(&self.gas_price)?;
        let data = decode_data(self.data.as_deref().unwrap_or_default())?;

        Ok(ParsedRequest {
            to,
            value,
            gas_price,
            data,
        })
    }
}

// ---------------------------------------------------------------------------
// Field parsers
// ---------------------------------------------------------------------------

fn require_digits(field: &str, raw: &str) -> GatewayResult<()> {
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(GatewayError::Validation(format!(
            "couldn't convert {field} to a non-negative integer: {raw:?}"
        )));
    }
    Ok(())
}

/// Parses a decimal amount into a 256-bit unsigned integer.
pub fn parse_value(raw: &str) -> GatewayResult<U256> {
    require_digits("value", raw)?;
    U256::from_str_radix(raw, 10)
        .map_err(|_| GatewayError::Validation(format!("value out of range: {raw}")))
}

/// Parses a decimal gas price. Legacy transactions carry it as a u128.
pub fn parse_gas_price(raw: &str) -> GatewayResult<u128> {
    let raw = raw.trim();
    require_digits("gasPrice", raw)?;
    raw.parse::<u128>()
        .map_err(|_| GatewayError::Validation(format!("gasPrice out of range: {raw}")))
}

/// Parses a 20-byte hex address. Checksums are not enforced on input.
pub fn parse_address(raw: &str) -> GatewayResult<Address> {
    raw.parse::<Address>()
        .map_err(|e| GatewayError::Validation(format!("invalid address {raw:?}: {e}")))
}

/// Decodes hex calldata; an empty string is empty calldata.
pub fn decode_data(raw: &str) -> GatewayResult<Bytes> {
    let raw = raw.trim();
    let digits = raw
        .strip_prefix("0x")
        .or_else(|| raw.strip_prefix("0X"))
        .unwrap_or(raw);
    hex::decode(digits)
        .map(Bytes::from)
        .map_err(|e| GatewayError::Validation(format!("invalid hex data: {e}")))
}

// ---------------------------------------------------------------------------
// Canonical transaction
// ---------------------------------------------------------------------------

/// A fully specified, not yet signed transaction.
///
/// Every field is final: gas has been estimated and the nonce leased. This
/// is what the policy sees (through [`CandidateTransaction`]) and exactly
/// what gets signed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedTransaction {
    pub nonce: u64,
    /// `None` deploys a contract.
    pub to: Option<Address>,
    pub value: U256,
    pub gas_limit: u64,
    pub gas_price: u128,
    pub data: Bytes,
}

impl UnsignedTransaction {
    pub fn is_contract_creation(&self) -> bool {
        self.to.is_none()
    }

    /// The checksummed destination, as the policy and ledger see it.
    pub fn to_checksummed(&self) -> Option<String> {
        self.to.map(|to| to.to_checksum(None))
    }

    /// Read-only view handed to the policy script.
    pub fn candidate(&self) -> CandidateTransaction {
        CandidateTransaction {
            to: self.to_checksummed(),
            value: self.value.to_string(),
            data: self.data.to_vec(),
        }
    }

    /// Legacy (type 0) encoding bound to `chain_id` per EIP-155.
    pub(crate) fn to_legacy(&self, chain_id: u64) -> TxLegacy {
        TxLegacy {
            chain_id: Some(chain_id),
            nonce: self.nonce,
            gas_price: self.gas_price,
            gas_limit: self.gas_limit,
            to: self.to.map_or(TxKind::Create, TxKind::Call),
            value: self.value,
            input: self.data.clone(),
        }
    }
}

/// What a policy script gets to look at: `tx.to`, `tx.value`, `tx.data`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CandidateTransaction {
    /// EIP-55 checksummed address; `None` for contract creation.
    pub to: Option<String>,
    /// Decimal string of the transferred amount.
    pub value: String,
    /// Raw calldata bytes (exposed to Lua as a byte string).
    pub data: Vec<u8>,
}
