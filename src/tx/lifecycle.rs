//! Submission lifecycle: states, typed events and the caller-facing handle
//!
//! ```text
//! Pending -> HashEmitted -> Mined -> ConfirmedOnce
//!    \___________\____________\_____-> Errored
//! ```

use super::submitter::SignedTransaction;
use crate::error::{SubmitError, SubmitResult};

use ethers::types::{TransactionReceipt, H256, U256};
use futures::stream::{self, Stream};
use std::fmt;
use std::ops::Range;
use tokio::sync::{mpsc, watch};
use tracing::warn;
use uuid::Uuid;

/// Confirmation counts that open the gate: exactly the first block on top.
pub const CONFIRMATION_WINDOW: Range<u64> = 1..2;

/// Where a submission is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionState {
    /// Signed and handed to the broadcaster
    Pending,
    /// Node accepted the transaction and returned its hash
    HashEmitted,
    /// Receipt available, success or revert
    Mined,
    /// First confirmation observed
    ConfirmedOnce,
    /// Failed after signing
    Errored,
}

impl SubmissionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SubmissionState::ConfirmedOnce | SubmissionState::Errored)
    }

    pub fn can_transition_to(self, next: SubmissionState) -> bool {
        use SubmissionState::*;
        matches!(
            (self, next),
            (Pending, HashEmitted)
                | (HashEmitted, Mined)
                | (Mined, ConfirmedOnce)
                | (Pending | HashEmitted | Mined, Errored)
        )
    }
}

impl fmt::Display for SubmissionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SubmissionState::Pending => "pending",
            SubmissionState::HashEmitted => "hash_emitted",
            SubmissionState::Mined => "mined",
            SubmissionState::ConfirmedOnce => "confirmed_once",
            SubmissionState::Errored => "errored",
        };
        f.write_str(name)
    }
}

/// Lets exactly one confirmation through, the one whose count is in
/// [`CONFIRMATION_WINDOW`].
#[derive(Debug, Default)]
pub struct ConfirmationGate {
    fired: bool,
}

impl ConfirmationGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true the first time a count inside the window is observed
    pub fn observe(&mut self, confirmations: u64) -> bool {
        if self.fired || !CONFIRMATION_WINDOW.contains(&confirmations) {
            return false;
        }
        self.fired = true;
        true
    }

    pub fn has_fired(&self) -> bool {
        self.fired
    }
}

/// Lifecycle notifications, in the order they occur
#[derive(Debug)]
pub enum SubmissionEvent {
    TransactionHash { tx_hash: H256, nonce: U256 },
    Receipt(TransactionReceipt),
    Confirmation {
        confirmations: u64,
        receipt: TransactionReceipt,
    },
    Error(SubmitError),
}

/// Producer side of a submission's event channel. Every notification goes
/// through a checked state transition.
pub(crate) struct LifecycleEmitter {
    current: SubmissionState,
    state: watch::Sender<SubmissionState>,
    events: mpsc::UnboundedSender<SubmissionEvent>,
    gate: ConfirmationGate,
}

pub(crate) fn lifecycle_channel() -> (
    LifecycleEmitter,
    mpsc::UnboundedReceiver<SubmissionEvent>,
    watch::Receiver<SubmissionState>,
) {
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (state_tx, state_rx) = watch::channel(SubmissionState::Pending);
    let emitter = LifecycleEmitter {
        current: SubmissionState::Pending,
        state: state_tx,
        events: events_tx,
        gate: ConfirmationGate::new(),
    };
    (emitter, events_rx, state_rx)
}

impl LifecycleEmitter {
    pub(crate) fn state(&self) -> SubmissionState {
        self.current
    }

    /// False once the handle (and its event receiver) has been dropped
    pub(crate) fn has_observers(&self) -> bool {
        !self.events.is_closed()
    }

    fn advance(&mut self, next: SubmissionState) -> SubmitResult<()> {
        if !self.current.can_transition_to(next) {
            return Err(SubmitError::InvalidStateTransition {
                from: self.current.to_string(),
                to: next.to_string(),
            });
        }
        self.current = next;
        self.state.send_replace(next);
        Ok(())
    }

    fn send(&self, event: SubmissionEvent) {
        // A dropped handle only means nobody is listening any more.
        let _ = self.events.send(event);
    }

    pub(crate) fn transaction_hash(&mut self, tx_hash: H256, nonce: U256) -> SubmitResult<()> {
        self.advance(SubmissionState::HashEmitted)?;
        self.send(SubmissionEvent::TransactionHash { tx_hash, nonce });
        Ok(())
    }

    pub(crate) fn receipt(&mut self, receipt: TransactionReceipt) -> SubmitResult<()> {
        self.advance(SubmissionState::Mined)?;
        self.send(SubmissionEvent::Receipt(receipt));
        Ok(())
    }

    /// Feed one confirmation count; returns true if it passed the gate
    pub(crate) fn confirmation(
        &mut self,
        confirmations: u64,
        receipt: &TransactionReceipt,
    ) -> SubmitResult<bool> {
        if self.current != SubmissionState::Mined || !self.gate.observe(confirmations) {
            return Ok(false);
        }
        self.advance(SubmissionState::ConfirmedOnce)?;
        self.send(SubmissionEvent::Confirmation {
            confirmations,
            receipt: receipt.clone(),
        });
        Ok(true)
    }

    /// Move to `Errored` and report `error`, unless already terminal
    pub(crate) fn error(&mut self, error: SubmitError) {
        if self.current.is_terminal() {
            warn!("Dropping error after terminal state {}: {}", self.current, error);
            return;
        }
        self.current = SubmissionState::Errored;
        self.state.send_replace(SubmissionState::Errored);
        self.send(SubmissionEvent::Error(error));
    }
}

type HashCallback = Box<dyn FnMut(H256, U256) + Send>;
type ReceiptCallback = Box<dyn FnMut(&TransactionReceipt) + Send>;
type ConfirmationCallback = Box<dyn FnMut(u64, &TransactionReceipt) + Send>;
type ErrorCallback = Box<dyn FnMut(&SubmitError) + Send>;

/// Optional per-event callbacks for [`SubmissionHandle::dispatch`]
#[derive(Default)]
pub struct SubmissionCallbacks {
    on_transaction_hash: Option<HashCallback>,
    on_receipt: Option<ReceiptCallback>,
    on_confirmation: Option<ConfirmationCallback>,
    on_error: Option<ErrorCallback>,
}

impl SubmissionCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called with the hash and the nonce the transaction was signed with
    pub fn on_transaction_hash(mut self, f: impl FnMut(H256, U256) + Send + 'static) -> Self {
        self.on_transaction_hash = Some(Box::new(f));
        self
    }

    pub fn on_receipt(mut self, f: impl FnMut(&TransactionReceipt) + Send + 'static) -> Self {
        self.on_receipt = Some(Box::new(f));
        self
    }

    pub fn on_confirmation(
        mut self,
        f: impl FnMut(u64, &TransactionReceipt) + Send + 'static,
    ) -> Self {
        self.on_confirmation = Some(Box::new(f));
        self
    }

    pub fn on_error(mut self, f: impl FnMut(&SubmitError) + Send + 'static) -> Self {
        self.on_error = Some(Box::new(f));
        self
    }
}

/// Observer for one broadcast transaction
pub struct SubmissionHandle {
    id: Uuid,
    transaction: SignedTransaction,
    events: mpsc::UnboundedReceiver<SubmissionEvent>,
    state: watch::Receiver<SubmissionState>,
}

impl SubmissionHandle {
    pub(crate) fn new(
        id: Uuid,
        transaction: SignedTransaction,
        events: mpsc::UnboundedReceiver<SubmissionEvent>,
        state: watch::Receiver<SubmissionState>,
    ) -> Self {
        Self {
            id,
            transaction,
            events,
            state,
        }
    }

    /// Submission id used in log spans
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Hash of the signed transaction, known before the node answers
    pub fn tx_hash(&self) -> H256 {
        self.transaction.hash()
    }

    pub fn transaction(&self) -> &SignedTransaction {
        &self.transaction
    }

    pub fn state(&self) -> SubmissionState {
        *self.state.borrow()
    }

    /// A receiver that observes every state change
    pub fn watch_state(&self) -> watch::Receiver<SubmissionState> {
        self.state.clone()
    }

    /// Next lifecycle event, or `None` once the submission has finished
    pub async fn next_event(&mut self) -> Option<SubmissionEvent> {
        self.events.recv().await
    }

    /// All remaining events as a stream
    pub fn into_events(self) -> impl Stream<Item = SubmissionEvent> {
        stream::unfold(self.events, |mut events| async move {
            events.recv().await.map(|event| (event, events))
        })
    }

    /// Wait for the first confirmation and return the receipt.
    ///
    /// A reverted transaction still resolves to `Ok`; check `receipt.status`.
    pub async fn wait(mut self) -> SubmitResult<TransactionReceipt> {
        while let Some(event) = self.events.recv().await {
            match event {
                SubmissionEvent::Confirmation { receipt, .. } => return Ok(receipt),
                SubmissionEvent::Error(error) => return Err(error),
                SubmissionEvent::TransactionHash { .. } | SubmissionEvent::Receipt(_) => {}
            }
        }
        Err(SubmitError::Internal(format!(
            "submission {} ended in state {}",
            self.id,
            self.state()
        )))
    }

    /// Drive `callbacks` until the submission finishes; returns the final state
    pub async fn dispatch(mut self, mut callbacks: SubmissionCallbacks) -> SubmissionState {
        while let Some(event) = self.events.recv().await {
            match event {
                SubmissionEvent::TransactionHash { tx_hash, nonce } => {
                    if let Some(f) = callbacks.on_transaction_hash.as_mut() {
                        f(tx_hash, nonce);
                    }
                }
                SubmissionEvent::Receipt(receipt) => {
                    if let Some(f) = callbacks.on_receipt.as_mut() {
                        f(&receipt);
                    }
                }
                SubmissionEvent::Confirmation {
                    confirmations,
                    receipt,
                } => {
                    if let Some(f) = callbacks.on_confirmation.as_mut() {
                        f(confirmations, &receipt);
                    }
                }
                SubmissionEvent::Error(error) => {
                    if let Some(f) = callbacks.on_error.as_mut() {
                        f(&error);
                    }
                }
            }
        }
        self.state()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use SubmissionState::*;

    fn receipt_at(block: u64) -> TransactionReceipt {
        TransactionReceipt {
            transaction_hash: H256::repeat_byte(0xcd),
            block_number: Some(block.into()),
            status: Some(1u64.into()),
            ..Default::default()
        }
    }

    #[test]
    fn allowed_transitions() {
        assert!(Pending.can_transition_to(HashEmitted));
        assert!(HashEmitted.can_transition_to(Mined));
        assert!(Mined.can_transition_to(ConfirmedOnce));
        for from in [Pending, HashEmitted, Mined] {
            assert!(from.can_transition_to(Errored));
        }
    }

    #[test]
    fn rejected_transitions() {
        assert!(!Pending.can_transition_to(Mined));
        assert!(!Pending.can_transition_to(ConfirmedOnce));
        assert!(!HashEmitted.can_transition_to(ConfirmedOnce));
        assert!(!ConfirmedOnce.can_transition_to(Errored));
        assert!(!Errored.can_transition_to(HashEmitted));
        assert!(!Mined.can_transition_to(HashEmitted));
    }

    #[test]
    fn gate_fires_once_at_first_confirmation() {
        let mut gate = ConfirmationGate::new();
        let fired: Vec<bool> = [1, 2, 3].into_iter().map(|c| gate.observe(c)).collect();
        assert_eq!(fired, vec![true, false, false]);
        assert!(gate.has_fired());
    }

    #[test]
    fn gate_ignores_counts_outside_window() {
        let mut gate = ConfirmationGate::new();
        assert!(!gate.observe(0));
        assert!(!gate.observe(2));
        assert!(!gate.observe(24));
        assert!(!gate.has_fired());
        assert!(gate.observe(1));
        assert!(!gate.observe(1));
    }

    #[test]
    fn emitter_rejects_receipt_before_hash() {
        let (mut emitter, _events, _state) = lifecycle_channel();
        let err = emitter.receipt(receipt_at(10)).unwrap_err();
        assert!(matches!(err, SubmitError::InvalidStateTransition { .. }));
        assert_eq!(emitter.state(), Pending);
    }

    #[test]
    fn emitter_only_confirms_once_mined() {
        let (mut emitter, _events, _state) = lifecycle_channel();
        emitter.transaction_hash(H256::zero(), U256::zero()).unwrap();
        assert!(!emitter.confirmation(1, &receipt_at(10)).unwrap());

        emitter.receipt(receipt_at(10)).unwrap();
        assert!(emitter.confirmation(1, &receipt_at(10)).unwrap());
        assert!(!emitter.confirmation(1, &receipt_at(10)).unwrap());
        assert_eq!(emitter.state(), ConfirmedOnce);
    }

    #[test]
    fn error_reported_once_and_never_after_terminal() {
        let (mut emitter, mut events, state) = lifecycle_channel();
        emitter.error(SubmitError::Timeout {
            operation: "receipt".to_string(),
        });
        emitter.error(SubmitError::Internal("late".to_string()));
        drop(emitter);

        assert_eq!(*state.borrow(), Errored);
        assert!(matches!(
            events.try_recv(),
            Ok(SubmissionEvent::Error(SubmitError::Timeout { .. }))
        ));
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn observers_tracked_through_receiver() {
        let (emitter, events, _state) = lifecycle_channel();
        assert!(emitter.has_observers());
        drop(events);
        assert!(!emitter.has_observers());
    }
}
