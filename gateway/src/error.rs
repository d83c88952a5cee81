//! Error taxonomy surfaced to callers.
//!
//! Component errors ([`PolicyError`], [`NonceError`], [`LedgerError`],
//! [`ChainError`], [`SignError`]) carry the detail; the pipeline folds them
//! into one of the five kinds below, which the HTTP layer maps 1:1 onto
//! status codes.
//!
//! [`PolicyError`]: crate::policy::PolicyError
//! [`NonceError`]: crate::nonce::NonceError
//! [`LedgerError`]: crate::ledger::LedgerError
//! [`ChainError`]: crate::chain::ChainError
//! [`SignError`]: crate::transaction::SignError

use thiserror::Error;

use crate::chain::ChainError;
use crate::ledger::LedgerError;
use crate::nonce::NonceError;
use crate::policy::PolicyError;
use crate::transaction::SignError;

/// Every way a submit or retry request can end other than success.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The request itself is malformed: bad numbers, bad hex, bad address,
    /// or an unsupported retry operation.
    #[error("{0}")]
    Validation(String),

    /// The policy script did not return `true`.
    #[error("forbidden transaction")]
    PolicyDenied,

    /// A retry named a hash the ledger has never recorded.
    #[error("{0}")]
    NotFound(String),

    /// The chain node failed or refused a call.
    #[error("{0}")]
    Upstream(String),

    /// Signing, ledger, or policy evaluation failed on our side.
    #[error("{0}")]
    Internal(String),
}

impl GatewayError {
    /// Short stable label, used for metrics and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::Validation(_) => "validation",
            GatewayError::PolicyDenied => "denied",
            GatewayError::NotFound(_) => "not_found",
            GatewayError::Upstream(_) => "upstream",
            GatewayError::Internal(_) => "internal",
        }
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;

// ---------------------------------------------------------------------------
// Component error folding
// ---------------------------------------------------------------------------

impl From<ChainError> for GatewayError {
    fn from(err: ChainError) -> Self {
        GatewayError::Upstream(err.to_string())
    }
}

impl From<NonceError> for GatewayError {
    fn from(err: NonceError) -> Self {
        match err {
            NonceError::Chain(err) => err.into(),
            other => GatewayError::Internal(other.to_string()),
        }
    }
}

impl From<PolicyError> for GatewayError {
    fn from(err: PolicyError) -> Self {
        GatewayError::Internal(err.to_string())
    }
}

impl From<SignError> for GatewayError {
    fn from(err: SignError) -> Self {
        GatewayError::Internal(err.to_string())
    }
}

impl From<LedgerError> for GatewayError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::NotFound(hash) => {
                GatewayError::NotFound(format!("no transaction with hash {hash}"))
            }
            other => GatewayError::Internal(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn denial_message_is_fixed() {
        assert_eq!(GatewayError::PolicyDenied.to_string(), "forbidden transaction");
    }

    #[test]
    fn kinds_are_distinct() {
        let kinds = [
            GatewayError::Validation(String::new()).kind(),
            GatewayError::PolicyDenied.kind(),
            GatewayError::NotFound(String::new()).kind(),
            GatewayError::Upstream(String::new()).kind(),
            GatewayError::Internal(String::new()).kind(),
        ];
        for (i, a) in kinds.iter().enumerate() {
            for b in &kinds[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn component_errors_fold_into_the_right_kind() {
        let upstream: GatewayError = ChainError::Rpc("down".into()).into();
        assert_eq!(upstream.kind(), "upstream");

        let nonce_upstream: GatewayError = NonceError::Chain(ChainError::Rpc("down".into())).into();
        assert_eq!(nonce_upstream.kind(), "upstream");

        let unseeded: GatewayError = NonceError::Unseeded(Default::default()).into();
        assert_eq!(unseeded.kind(), "internal");

        let policy: GatewayError = PolicyError::Runtime("boom".into()).into();
        assert_eq!(policy.kind(), "internal");

        let missing: GatewayError = LedgerError::NotFound("0xaa".into()).into();
        assert_eq!(missing.kind(), "not_found");

        let dup: GatewayError = LedgerError::Duplicate("hash 0xaa".into()).into();
        assert_eq!(dup.kind(), "internal");
    }
}
