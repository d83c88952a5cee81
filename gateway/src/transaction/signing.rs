//! EIP-155 signing with the custody key.
//!
//! The key never leaves [`TransactionSigner`]: no accessor returns it, and
//! its `Debug` output is redacted. Same for the signature and raw bytes of a
//! [`SignedTransaction`], which only ever go to the node.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use alloy::consensus::{SignableTransaction, TxEnvelope};
use alloy::eips::eip2718::Encodable2718;
use alloy::primitives::{Address, Bytes, Signature, B256};
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::SignerSync;

use super::types::UnsignedTransaction;

// ---------------------------------------------------------------------------
// Error Type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum SignError {
    #[error("invalid private key: {0}")]
    InvalidKey(String),

    #[error("keystore error: {0}")]
    Keystore(String),

    #[error("signing failed: {0}")]
    Signing(String),
}

// ---------------------------------------------------------------------------
// SignedTransaction
// ---------------------------------------------------------------------------

/// A transaction carrying a valid signature. Immutable once built.
#[derive(Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    tx: UnsignedTransaction,
    chain_id: u64,
    signature: Signature,
    hash: B256,
    raw: Bytes,
}

impl SignedTransaction {
    /// The fields that were signed.
    pub fn tx(&self) -> &UnsignedTransaction {
        &self.tx
    }

    pub fn nonce(&self) -> u64 {
        self.tx.nonce
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Keccak-256 of the EIP-2718 encoding, the chain's transaction id.
    pub fn hash(&self) -> B256 {
        self.hash
    }

    /// `0x`-prefixed lowercase hex of [`hash`](Self::hash).
    pub fn hash_hex(&self) -> String {
        format!("0x{}", hex::encode(self.hash))
    }

    /// Wire encoding for `eth_sendRawTransaction`.
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }
}

impl fmt::Debug for SignedTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignedTransaction")
            .field("tx", &self.tx)
            .field("chain_id", &self.chain_id)
            .field("hash", &self.hash)
            .field("signature", &"<redacted>")
            .field("raw", &"<redacted>")
            .finish()
    }
}

// ---------------------------------------------------------------------------
// TransactionSigner
// ---------------------------------------------------------------------------

/// Holds the custody key and the chain id every signature is bound to.
#[derive(Clone)]
pub struct TransactionSigner {
    key: PrivateKeySigner,
    chain_id: u64,
}

impl TransactionSigner {
    pub fn new(key: PrivateKeySigner, chain_id: u64) -> Self {
        Self { key, chain_id }
    }

    /// Parses a 32-byte hex private key, `0x` prefix optional.
    pub fn from_hex(key: &str, chain_id: u64) -> Result<Self, SignError> {
        let key = key.trim();
        let digits = key.strip_prefix("0x").unwrap_or(key);
        let key = PrivateKeySigner::from_str(digits)
            .map_err(|e| SignError::InvalidKey(e.to_string()))?;
        Ok(Self::new(key, chain_id))
    }

    /// Decrypts a Web3 Secret Storage (JSON keystore) file.
    pub fn from_keystore(
        path: impl AsRef<Path>,
        passphrase: &str,
        chain_id: u64,
    ) -> Result<Self, SignError> {
        let key = PrivateKeySigner::decrypt_keystore(path, passphrase)
            .map_err(|e| SignError::Keystore(e.to_string()))?;
        Ok(Self::new(key, chain_id))
    }

    /// The custody account.
    pub fn address(&self) -> Address {
        self.key.address()
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    /// Signs `tx` as a legacy transaction with EIP-155 replay protection.
    pub fn sign(&self, tx: &UnsignedTransaction) -> Result<SignedTransaction, SignError> {
        let legacy = tx.to_legacy(self.chain_id);
        let signature = self
            .key
            .sign_hash_sync(&legacy.signature_hash())
            .map_err(|e| SignError::Signing(e.to_string()))?;

        let signed = legacy.into_signed(signature);
        let hash = *signed.hash();
        let raw = Bytes::from(TxEnvelope::Legacy(signed).encoded_2718());

        Ok(SignedTransaction {
            tx: tx.clone(),
            chain_id: self.chain_id,
            signature,
            hash,
            raw,
        })
    }
}

impl fmt::Debug for TransactionSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionSigner")
            .field("address", &self.address())
            .field("chain_id", &self.chain_id)
            .field("key", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::eips::eip2718::Decodable2718;
    use alloy::primitives::U256;

    // Well-known dev key (anvil account #0); never holds real funds.
    const DEV_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
    const DEV_ADDRESS: &str = "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266";

    fn transfer(nonce: u64, gas_price: u128) -> UnsignedTransaction {
        UnsignedTransaction {
            nonce,
            to: Some("0x000000000000000000000000000000000000beef".parse().unwrap()),
            value: U256::from(10_000_000_000u64),
            gas_limit: 21_000,
            gas_price,
            data: Bytes::new(),
        }
    }

    #[test]
    fn from_hex_accepts_prefixed_and_bare_keys() {
        let a = TransactionSigner::from_hex(DEV_KEY, 1).unwrap();
        let b = TransactionSigner::from_hex(DEV_KEY.trim_start_matches("0x"), 1).unwrap();
        assert_eq!(a.address(), b.address());
        assert_eq!(a.address(), DEV_ADDRESS.parse::<Address>().unwrap());
    }

    #[test]
    fn from_hex_rejects_garbage() {
        assert!(matches!(
            TransactionSigner::from_hex("not a key", 1),
            Err(SignError::InvalidKey(_))
        ));
    }

    #[test]
    fn signature_recovers_custody_address() {
        let signer = TransactionSigner::from_hex(DEV_KEY, 1337).unwrap();
        let signed = signer.sign(&transfer(5, 1)).unwrap();

        let envelope = TxEnvelope::decode_2718(&mut signed.raw()).unwrap();
        let TxEnvelope::Legacy(decoded) = envelope else {
            panic!("expected a legacy envelope");
        };
        assert_eq!(decoded.tx().chain_id, Some(1337));
        assert_eq!(decoded.tx().nonce, 5);
        assert_eq!(*decoded.hash(), signed.hash());

        let sighash = decoded.tx().signature_hash();
        let recovered = decoded
            .signature()
            .recover_address_from_prehash(&sighash)
            .unwrap();
        assert_eq!(recovered, signer.address());
    }

    #[test]
    fn chain_id_changes_the_hash() {
        let a = TransactionSigner::from_hex(DEV_KEY, 1).unwrap();
        let b = TransactionSigner::from_hex(DEV_KEY, 5).unwrap();
        let tx = transfer(0, 1);
        assert_ne!(a.sign(&tx).unwrap().hash(), b.sign(&tx).unwrap().hash());
    }

    #[test]
    fn gas_price_changes_the_hash() {
        let signer = TransactionSigner::from_hex(DEV_KEY, 1).unwrap();
        let first = signer.sign(&transfer(5, 1)).unwrap();
        let second = signer.sign(&transfer(5, 2)).unwrap();
        assert_eq!(first.nonce(), second.nonce());
        assert_ne!(first.hash(), second.hash());
    }

    #[test]
    fn hash_hex_is_prefixed_lowercase() {
        let signer = TransactionSigner::from_hex(DEV_KEY, 1).unwrap();
        let hash = signer.sign(&transfer(0, 1)).unwrap().hash_hex();
        assert!(hash.starts_with("0x"));
        assert_eq!(hash.len(), 66);
        assert_eq!(hash, hash.to_lowercase());
    }

    #[test]
    fn debug_output_is_redacted() {
        let signer = TransactionSigner::from_hex(DEV_KEY, 1).unwrap();
        let signed = signer.sign(&transfer(0, 1)).unwrap();

        let signer_dbg = format!("{signer:?}");
        assert!(!signer_dbg.contains(DEV_KEY.trim_start_matches("0x")));
        assert!(signer_dbg.contains("<redacted>"));

        let signed_dbg = format!("{signed:?}");
        assert!(!signed_dbg.contains(&hex::encode(signed.raw())));
        assert!(signed_dbg.contains("<redacted>"));
    }
}
