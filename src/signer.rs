//! Signing capability
//!
//! Transaction building only ever sees [`TxSigner`]. Key material stays inside
//! the implementation, so a hardware or remote signer can replace
//! [`LocalKeySigner`] without touching the submitter.

use crate::error::{SubmitError, SubmitResult};

use async_trait::async_trait;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Signature};
use std::fmt;

/// Produces signatures for typed transactions on behalf of one account
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TxSigner: Send + Sync {
    /// Sender address, derived from the key
    fn address(&self) -> Address;

    /// Sign `tx`; the transaction's own chain id selects the signing domain
    async fn sign_transaction(&self, tx: &TypedTransaction) -> SubmitResult<Signature>;
}

/// Signer backed by a raw secp256k1 private key held in memory
pub struct LocalKeySigner {
    wallet: LocalWallet,
}

impl LocalKeySigner {
    /// Parse a hex private key, with or without `0x`
    pub fn from_private_key(private_key: &str, chain_id: u64) -> SubmitResult<Self> {
        let wallet = private_key
            .trim()
            .parse::<LocalWallet>()
            .map_err(|e| SubmitError::Wallet(format!("Invalid private key: {}", e)))?
            .with_chain_id(chain_id);
        Ok(Self { wallet })
    }

    pub fn chain_id(&self) -> u64 {
        self.wallet.chain_id()
    }
}

impl fmt::Debug for LocalKeySigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalKeySigner")
            .field("address", &self.wallet.address())
            .field("chain_id", &self.wallet.chain_id())
            .finish()
    }
}

#[async_trait]
impl TxSigner for LocalKeySigner {
    fn address(&self) -> Address {
        self.wallet.address()
    }

    async fn sign_transaction(&self, tx: &TypedTransaction) -> SubmitResult<Signature> {
        self.wallet
            .sign_transaction(tx)
            .await
            .map_err(|e| SubmitError::Signing(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::types::{Eip1559TransactionRequest, TransactionRequest, U256};

    // Well-known development key (first hardhat/anvil account)
    const DEV_KEY: &str = "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
    const DEV_ADDRESS: &str = "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266";

    #[test]
    fn derives_address_with_and_without_prefix() {
        let bare = LocalKeySigner::from_private_key(DEV_KEY, 97).unwrap();
        let prefixed = LocalKeySigner::from_private_key(&format!("0x{}", DEV_KEY), 97).unwrap();
        let expected: Address = DEV_ADDRESS.parse().unwrap();

        assert_eq!(bare.address(), expected);
        assert_eq!(prefixed.address(), expected);
        assert_eq!(bare.chain_id(), 97);
    }

    #[test]
    fn rejects_malformed_key() {
        let err = LocalKeySigner::from_private_key("0xnot-a-key", 1).unwrap_err();
        assert!(matches!(err, SubmitError::Wallet(_)));
        assert!(LocalKeySigner::from_private_key("", 1).is_err());
    }

    #[test]
    fn debug_output_hides_key() {
        let signer = LocalKeySigner::from_private_key(DEV_KEY, 1).unwrap();
        let rendered = format!("{:?}", signer);
        assert!(!rendered.contains(DEV_KEY));
        assert!(rendered.contains("address"));
    }

    #[tokio::test]
    async fn legacy_signature_recovers_sender_with_eip155() {
        let signer = LocalKeySigner::from_private_key(DEV_KEY, 97).unwrap();
        let tx: TypedTransaction = TransactionRequest::new()
            .to(Address::repeat_byte(0x11))
            .nonce(5u64)
            .gas(300_000u64)
            .gas_price(5_000_000_000u64)
            .value(U256::zero())
            .chain_id(97u64)
            .into();

        let sig = signer.sign_transaction(&tx).await.unwrap();
        assert_eq!(sig.recover(tx.sighash()).unwrap(), signer.address());
        // v = recovery_id + chain_id * 2 + 35
        assert!(sig.v == 97 * 2 + 35 || sig.v == 97 * 2 + 36);
    }

    #[tokio::test]
    async fn fee_market_signing_is_deterministic() {
        let signer = LocalKeySigner::from_private_key(DEV_KEY, 1).unwrap();
        let tx: TypedTransaction = Eip1559TransactionRequest::new()
            .to(Address::repeat_byte(0x22))
            .nonce(0u64)
            .gas(21_000u64)
            .max_fee_per_gas(U256::from(3_000_000_000u64))
            .max_priority_fee_per_gas(U256::from(2_000_000_000u64))
            .chain_id(1u64)
            .into();

        let first = signer.sign_transaction(&tx).await.unwrap();
        let second = signer.sign_transaction(&tx).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(tx.rlp_signed(&first)[0], 0x02);
    }
}
