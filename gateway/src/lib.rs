// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Keyward Gateway: Core Library
//!
//! Keyward holds one custody key and signs transactions on behalf of many
//! callers, so none of them ever touches the key. Whether a request gets
//! signed is decided per request by an operator-supplied Lua policy, not by
//! rules baked into the binary.
//!
//! ## Architecture
//!
//! - **policy**: Sandboxed Lua evaluation of a candidate transaction.
//! - **nonce**: Per-account nonce leasing, chain-queried or process-local.
//! - **ledger**: Hash-keyed record of every forwarded transaction.
//! - **transaction**: Request parsing, canonical transaction shape, EIP-155 signing.
//! - **chain**: The upstream node: JSON-RPC client and an in-process simulator.
//! - **gateway**: The submit pipeline tying all of the above together.
//! - **retry**: Fee replacement for transactions stuck in the pending pool.
//! - **config**: Defaults and tunables.
//!
//! ## Pipeline
//!
//! ```text
//! request ─► estimate gas ─► lease nonce ─► build ─► policy ─► sign ─► send ─► ledger
//! retry   ─► ledger lookup ─► rebuild (same nonce) ─► policy ─► sign ─► send ─► ledger update
//! ```
//!
//! Two rules hold everywhere: nothing is signed unless the policy returned
//! exactly `true`, and a nonce is consumed only once its transaction has
//! actually been accepted by the node.

pub mod chain;
pub mod config;
pub mod error;
pub mod gateway;
pub mod ledger;
pub mod nonce;
pub mod policy;
pub mod retry;
pub mod transaction;

pub use error::GatewayError;
pub use gateway::Gateway;
pub use retry::RetryRequest;
pub use transaction::{CandidateTransaction, TransactionRequest};
