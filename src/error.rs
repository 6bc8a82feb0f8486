//! Error types for transaction submission

use thiserror::Error;

/// Main error type for the submitter
#[derive(Error, Debug)]
pub enum SubmitError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Wallet error: {0}")]
    Wallet(String),

    #[error("Signing error: {0}")]
    Signing(String),

    #[error("Nonce error for chain {chain_id}: {message}")]
    Nonce { chain_id: u64, message: String },

    #[error("Gas estimation error: {0}")]
    GasEstimation(String),

    #[error("Broadcast rejected on chain {chain_id}: {message}")]
    Broadcast { chain_id: u64, message: String },

    #[error("RPC error for chain {chain_id}: {message}")]
    Rpc { chain_id: u64, message: String },

    #[error("Timeout waiting for {operation}")]
    Timeout { operation: String },

    #[error("Reorg detected: tx {tx_hash} no longer included at block {block_number}")]
    Reorg { tx_hash: String, block_number: u64 },

    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SubmitError {
    /// Whether the failure happened before a signed transaction left the process
    pub fn is_pre_broadcast(&self) -> bool {
        matches!(
            self,
            SubmitError::Config(_)
                | SubmitError::Wallet(_)
                | SubmitError::Signing(_)
                | SubmitError::Nonce { .. }
                | SubmitError::GasEstimation(_)
                | SubmitError::InvalidInput(_)
        )
    }

    /// Check if error is retryable by the caller with a fresh submission
    pub fn is_retryable(&self) -> bool {
        match self {
            SubmitError::Rpc { .. } | SubmitError::Timeout { .. } => true,
            SubmitError::Nonce { .. } => true,
            SubmitError::GasEstimation(message) => {
                // A reverting call reverts again on the next estimate.
                let message = message.to_lowercase();
                !message.contains("revert") && !message.contains("insufficient funds")
            }
            SubmitError::Broadcast { message, .. } => {
                let message = message.to_lowercase();
                message.contains("nonce too low")
                    || message.contains("underpriced")
                    || message.contains("already known")
            }
            _ => false,
        }
    }
}

/// Result type for submitter operations
pub type SubmitResult<T> = Result<T, SubmitError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pre_broadcast_classification() {
        assert!(SubmitError::GasEstimation("execution reverted".into()).is_pre_broadcast());
        assert!(SubmitError::Nonce {
            chain_id: 97,
            message: "connection refused".into()
        }
        .is_pre_broadcast());
        assert!(!SubmitError::Broadcast {
            chain_id: 97,
            message: "insufficient funds for gas * price + value".into()
        }
        .is_pre_broadcast());
        assert!(!SubmitError::Timeout {
            operation: "receipt".into()
        }
        .is_pre_broadcast());
    }

    #[test]
    fn broadcast_rejections_that_a_fresh_attempt_can_fix() {
        let low = SubmitError::Broadcast {
            chain_id: 56,
            message: "nonce too low".into(),
        };
        let underpriced = SubmitError::Broadcast {
            chain_id: 56,
            message: "replacement transaction underpriced".into(),
        };
        let funds = SubmitError::Broadcast {
            chain_id: 56,
            message: "insufficient funds for gas * price + value".into(),
        };
        assert!(low.is_retryable());
        assert!(underpriced.is_retryable());
        assert!(!funds.is_retryable());
        assert!(!SubmitError::Signing("bad key".into()).is_retryable());
    }

    #[test]
    fn only_transport_estimation_failures_are_retryable() {
        let reverted = SubmitError::GasEstimation(
            "(code: 3, message: execution reverted: Ownable: caller is not the owner)".into(),
        );
        let broke = SubmitError::GasEstimation("insufficient funds for transfer".into());
        let transport = SubmitError::GasEstimation(
            "RPC error for chain 97: eth_estimateGas: timed out after 30s".into(),
        );
        assert!(!reverted.is_retryable());
        assert!(!broke.is_retryable());
        assert!(transport.is_retryable());
    }
}
