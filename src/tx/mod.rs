//! Transaction submission module with nonce resolution and gas defaults

mod gas;
mod lifecycle;
mod nonce;
mod submitter;

pub use gas::{
    GasDefaults, GasPrice, DEFAULT_GAS_LIMIT, DEFAULT_GAS_PRICE, DEFAULT_MAX_FEE_PER_GAS,
    DEFAULT_MAX_PRIORITY_FEE_PER_GAS,
};
pub use lifecycle::{
    ConfirmationGate, SubmissionCallbacks, SubmissionEvent, SubmissionHandle, SubmissionState,
    CONFIRMATION_WINDOW,
};
pub use nonce::{resolve_nonce, NonceSequence};
pub use submitter::{FeeMarketCall, LegacyCall, SignedTransaction, TransactionSubmitter};
