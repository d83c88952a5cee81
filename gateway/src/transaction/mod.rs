//! # Transactions
//!
//! From caller JSON to signed wire bytes:
//!
//! ```text
//! TransactionRequest ─parse─► ParsedRequest ─(+ gas, nonce)─► UnsignedTransaction ─sign─► SignedTransaction
//!                                                                     │
//!                                                                     └─► CandidateTransaction (policy view)
//! ```
//!
//! Only legacy (type 0) transactions are produced. Callers pay with a
//! single `gasPrice`, and a retry is just "same nonce, higher gasPrice",
//! which maps directly onto the pending pool's replacement rule.

pub mod signing;
pub mod types;

pub use signing::{SignError, SignedTransaction, TransactionSigner};
pub use types::{
    decode_data, parse_address, parse_gas_price, parse_value, CandidateTransaction, ParsedRequest,
    TransactionRequest, UnsignedTransaction,
};
