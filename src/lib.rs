//! contract-exec - sign and submit contract calls to EVM chains
//!
//! Builds legacy (type 0) and EIP-1559 (type 2) transactions, signs them
//! through a [`signer::TxSigner`], broadcasts the raw bytes and reports the
//! lifecycle (hash, receipt, first confirmation or error) through a
//! [`tx::SubmissionHandle`].

pub mod chain;
pub mod config;
pub mod error;
pub mod metrics;
pub mod signer;
pub mod tx;

pub use chain::{ConfirmationTracker, EthRpcClient, RpcClient};
pub use config::{Settings, SubmitterConfig};
pub use error::{SubmitError, SubmitResult};
pub use signer::{LocalKeySigner, TxSigner};
pub use tx::{
    FeeMarketCall, LegacyCall, SignedTransaction, SubmissionCallbacks, SubmissionEvent,
    SubmissionHandle, SubmissionState, TransactionSubmitter,
};
