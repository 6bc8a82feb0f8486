//! Chain module - the RPC capability the submitter consumes
//!
//! This module provides:
//! - The [`RpcClient`] seam between transaction building and the network
//! - An HTTP implementation with failover across several endpoints
//! - Receipt polling and confirmation counting

pub mod confirmation;
pub mod provider;

pub use confirmation::ConfirmationTracker;
pub use provider::EthRpcClient;

use crate::error::SubmitResult;

use async_trait::async_trait;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, TransactionReceipt, H256, U256};

/// JSON-RPC calls needed to submit and track a transaction
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RpcClient: Send + Sync {
    /// `eth_estimateGas` for an unsigned call
    async fn estimate_gas(&self, tx: &TypedTransaction) -> SubmitResult<U256>;

    /// `eth_getTransactionCount` at the latest block
    async fn get_transaction_count(&self, address: Address) -> SubmitResult<U256>;

    /// `eth_sendRawTransaction`; must be attempted exactly once per call
    async fn send_raw_transaction(&self, raw: Bytes) -> SubmitResult<H256>;

    /// `eth_getTransactionReceipt`
    async fn get_transaction_receipt(
        &self,
        tx_hash: H256,
    ) -> SubmitResult<Option<TransactionReceipt>>;

    /// `eth_blockNumber`
    async fn get_block_number(&self) -> SubmitResult<u64>;
}
