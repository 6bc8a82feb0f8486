//! Nonce resolution
//!
//! The submitter never keeps nonce state between calls: a missing nonce is
//! fetched from the chain right before signing. Callers that fire several
//! transactions before the first is mined allocate overrides themselves,
//! usually through [`NonceSequence`].

use crate::chain::RpcClient;
use crate::error::{SubmitError, SubmitResult};

use ethers::types::{Address, U256};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Use `nonce_override` as-is, or ask the chain for `address`'s transaction count
pub async fn resolve_nonce(
    client: &dyn RpcClient,
    address: Address,
    nonce_override: Option<U256>,
) -> SubmitResult<U256> {
    match nonce_override {
        Some(nonce) => {
            debug!("Using caller-supplied nonce {}", nonce);
            Ok(nonce)
        }
        None => {
            let nonce = client.get_transaction_count(address).await?;
            debug!("Fetched nonce {} for {:?}", nonce, address);
            Ok(nonce)
        }
    }
}

/// Hands out consecutive nonces for back-to-back submissions from one sender
#[derive(Debug)]
pub struct NonceSequence {
    next: AtomicU64,
}

impl NonceSequence {
    /// Start at a known nonce
    pub fn starting_at(nonce: u64) -> Self {
        Self {
            next: AtomicU64::new(nonce),
        }
    }

    /// Start at the sender's current on-chain transaction count
    pub async fn from_chain(client: &dyn RpcClient, address: Address) -> SubmitResult<Self> {
        let nonce = client.get_transaction_count(address).await?;
        let nonce = u64::try_from(nonce).map_err(|_| {
            SubmitError::InvalidInput(format!(
                "nonce {} for {:?} does not fit in u64",
                nonce, address
            ))
        })?;
        Ok(Self::starting_at(nonce))
    }

    /// Allocate the next nonce
    pub fn next(&self) -> U256 {
        U256::from(self.next.fetch_add(1, Ordering::SeqCst))
    }

    /// The nonce the next call to [`NonceSequence::next`] returns
    pub fn peek(&self) -> U256 {
        U256::from(self.next.load(Ordering::SeqCst))
    }
}
