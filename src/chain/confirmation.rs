//! Receipt polling and confirmation counting
//!
//! A transaction's confirmation count is the number of blocks mined on top
//! of the block that included it: `head - receipt.block_number`. The receipt
//! block itself is confirmation 0.

use super::RpcClient;
use crate::error::{SubmitError, SubmitResult};

use ethers::types::{TransactionReceipt, H256};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

/// Polls one chain for receipts and block height
pub struct ConfirmationTracker {
    client: Arc<dyn RpcClient>,
    /// Delay between polls
    poll_interval: Duration,
    /// Upper bound on waiting for a receipt
    receipt_timeout: Duration,
}

impl ConfirmationTracker {
    pub fn new(
        client: Arc<dyn RpcClient>,
        poll_interval: Duration,
        receipt_timeout: Duration,
    ) -> Self {
        Self {
            client,
            poll_interval,
            receipt_timeout,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Poll until the transaction has a receipt with a block number
    pub async fn wait_for_receipt(&self, tx_hash: H256) -> SubmitResult<TransactionReceipt> {
        let poll = async {
            loop {
                if let Some(receipt) = self.client.get_transaction_receipt(tx_hash).await? {
                    if receipt.block_number.is_some() {
                        return Ok(receipt);
                    }
                }
                sleep(self.poll_interval).await;
            }
        };

        match timeout(self.receipt_timeout, poll).await {
            Ok(result) => result,
            Err(_) => Err(SubmitError::Timeout {
                operation: format!(
                    "receipt of {:?} (not mined within {} seconds)",
                    tx_hash,
                    self.receipt_timeout.as_secs()
                ),
            }),
        }
    }

    /// Current confirmation count for a mined receipt
    pub async fn confirmations(&self, receipt: &TransactionReceipt) -> SubmitResult<u64> {
        let mined_at = receipt
            .block_number
            .ok_or_else(|| SubmitError::InvalidInput("receipt has no block number".to_string()))?
            .as_u64();
        let head = self.client.get_block_number().await?;
        let confirmations = head.saturating_sub(mined_at);

        debug!(
            "Transaction {:?} has {} confirmations (head {}, mined {})",
            receipt.transaction_hash, confirmations, head, mined_at
        );
        Ok(confirmations)
    }

    /// Check the transaction is still included in the block the receipt named.
    ///
    /// `Ok(false)` means the endpoint has no receipt for it right now, which
    /// lagging or load-balanced nodes report for freshly mined transactions;
    /// poll again. Only a receipt that moved to another block is a reorg.
    pub async fn verify_inclusion(&self, receipt: &TransactionReceipt) -> SubmitResult<bool> {
        let tx_hash = receipt.transaction_hash;
        match self.client.get_transaction_receipt(tx_hash).await? {
            Some(current) if current.block_hash == receipt.block_hash => Ok(true),
            Some(current) if current.block_hash.is_some() => {
                let block_number = receipt.block_number.map(|b| b.as_u64()).unwrap_or_default();
                warn!(
                    "Reorg detected: tx {:?} no longer included at block {}",
                    tx_hash, block_number
                );
                Err(SubmitError::Reorg {
                    tx_hash: format!("{:?}", tx_hash),
                    block_number,
                })
            }
            _ => {
                debug!("Receipt for {:?} not visible on re-read yet", tx_hash);
                Ok(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::MockRpcClient;

    fn mined_receipt(block: u64) -> TransactionReceipt {
        TransactionReceipt {
            transaction_hash: H256::repeat_byte(0xab),
            block_number: Some(block.into()),
            block_hash: Some(H256::repeat_byte(0x01)),
            status: Some(1u64.into()),
            ..Default::default()
        }
    }

    fn tracker(client: MockRpcClient, receipt_timeout: Duration) -> ConfirmationTracker {
        ConfirmationTracker::new(Arc::new(client), Duration::from_millis(1), receipt_timeout)
    }

    #[tokio::test]
    async fn waits_through_pending_polls() {
        let mut client = MockRpcClient::new();
        let mut polls = 0;
        client
            .expect_get_transaction_receipt()
            .times(3)
            .returning(move |_| {
                polls += 1;
                Ok((polls == 3).then(|| mined_receipt(42)))
            });

        let receipt = tracker(client, Duration::from_secs(5))
            .wait_for_receipt(H256::repeat_byte(0xab))
            .await
            .unwrap();
        assert_eq!(receipt.block_number, Some(42u64.into()));
    }

    #[tokio::test]
    async fn receipt_wait_times_out() {
        let mut client = MockRpcClient::new();
        client
            .expect_get_transaction_receipt()
            .returning(|_| Ok(None));

        let result = tracker(client, Duration::from_millis(20))
            .wait_for_receipt(H256::repeat_byte(0xab))
            .await;
        assert!(matches!(result, Err(SubmitError::Timeout { .. })));
    }

    #[tokio::test]
    async fn counts_blocks_on_top_of_receipt() {
        let mut client = MockRpcClient::new();
        client.expect_get_block_number().returning(|| Ok(103));

        let confirmations = tracker(client, Duration::from_secs(1))
            .confirmations(&mined_receipt(100))
            .await
            .unwrap();
        assert_eq!(confirmations, 3);
    }

    #[tokio::test]
    async fn lagging_head_counts_as_zero() {
        let mut client = MockRpcClient::new();
        client.expect_get_block_number().returning(|| Ok(99));

        let confirmations = tracker(client, Duration::from_secs(1))
            .confirmations(&mined_receipt(100))
            .await
            .unwrap();
        assert_eq!(confirmations, 0);
    }

    #[tokio::test]
    async fn detects_receipt_moved_to_other_block() {
        let mut client = MockRpcClient::new();
        client.expect_get_transaction_receipt().returning(|_| {
            let mut moved = mined_receipt(101);
            moved.block_hash = Some(H256::repeat_byte(0x02));
            Ok(Some(moved))
        });

        let result = tracker(client, Duration::from_secs(1))
            .verify_inclusion(&mined_receipt(100))
            .await;
        assert!(matches!(
            result,
            Err(SubmitError::Reorg {
                block_number: 100,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn missing_receipt_on_reread_is_not_a_reorg() {
        let mut client = MockRpcClient::new();
        client
            .expect_get_transaction_receipt()
            .times(1)
            .returning(|_| Ok(None));

        let included = tracker(client, Duration::from_secs(1))
            .verify_inclusion(&mined_receipt(100))
            .await
            .unwrap();
        assert!(!included);
    }

    #[tokio::test]
    async fn unchanged_block_hash_is_included() {
        let mut client = MockRpcClient::new();
        client
            .expect_get_transaction_receipt()
            .returning(|_| Ok(Some(mined_receipt(100))));

        let included = tracker(client, Duration::from_secs(1))
            .verify_inclusion(&mined_receipt(100))
            .await
            .unwrap();
        assert!(included);
    }
}
