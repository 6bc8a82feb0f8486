//! Transaction submitter: resolve nonce and gas, sign, broadcast, track
//!
//! Preparation (gas estimation, nonce lookup, signing) runs in the caller's
//! task and fails with an `Err` before anything is sent. Broadcast and
//! tracking run in a spawned task that reports through the returned
//! [`SubmissionHandle`].

use super::gas::{GasDefaults, GasPrice};
use super::lifecycle::{lifecycle_channel, LifecycleEmitter, SubmissionHandle};
use super::nonce::resolve_nonce;
use crate::chain::{ConfirmationTracker, RpcClient};
use crate::config::SubmitterConfig;
use crate::error::{SubmitError, SubmitResult};
use crate::metrics;
use crate::signer::TxSigner;

use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::transaction::eip2930::AccessList;
use ethers::types::{
    Address, Bytes, Eip1559TransactionRequest, Signature, TransactionReceipt, TransactionRequest,
    H256, U256, U64,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// A legacy (type 0) contract call
#[derive(Debug, Clone, Default)]
pub struct LegacyCall {
    pub to: Address,
    /// ABI-encoded call data; empty for plain transfers
    pub data: Bytes,
    pub value: U256,
    /// Skip the nonce lookup and sign with this nonce
    pub nonce: Option<U256>,
    pub gas_limit: Option<U256>,
    pub gas_price: Option<U256>,
}

impl LegacyCall {
    pub fn new(to: Address) -> Self {
        Self {
            to,
            ..Default::default()
        }
    }

    pub fn data(mut self, data: impl Into<Bytes>) -> Self {
        self.data = data.into();
        self
    }

    pub fn value(mut self, value: impl Into<U256>) -> Self {
        self.value = value.into();
        self
    }

    pub fn nonce(mut self, nonce: impl Into<U256>) -> Self {
        self.nonce = Some(nonce.into());
        self
    }

    pub fn gas_limit(mut self, gas_limit: impl Into<U256>) -> Self {
        self.gas_limit = Some(gas_limit.into());
        self
    }

    pub fn gas_price(mut self, gas_price: impl Into<U256>) -> Self {
        self.gas_price = Some(gas_price.into());
        self
    }
}

/// An EIP-1559 (type 2) contract call. The nonce is always looked up and the
/// gas limit always estimated.
#[derive(Debug, Clone, Default)]
pub struct FeeMarketCall {
    pub to: Address,
    pub data: Bytes,
    pub value: U256,
    pub max_fee_per_gas: Option<U256>,
    pub max_priority_fee_per_gas: Option<U256>,
}

impl FeeMarketCall {
    pub fn new(to: Address) -> Self {
        Self {
            to,
            ..Default::default()
        }
    }

    pub fn data(mut self, data: impl Into<Bytes>) -> Self {
        self.data = data.into();
        self
    }

    pub fn value(mut self, value: impl Into<U256>) -> Self {
        self.value = value.into();
        self
    }

    pub fn max_fee_per_gas(mut self, fee: impl Into<U256>) -> Self {
        self.max_fee_per_gas = Some(fee.into());
        self
    }

    pub fn max_priority_fee_per_gas(mut self, fee: impl Into<U256>) -> Self {
        self.max_priority_fee_per_gas = Some(fee.into());
        self
    }
}

/// A transaction after signing: the request it was built from, its signature,
/// and the RLP bytes that go on the wire
#[derive(Debug, Clone)]
pub struct SignedTransaction {
    tx: TypedTransaction,
    signature: Signature,
    raw: Bytes,
    hash: H256,
}

impl SignedTransaction {
    pub fn tx(&self) -> &TypedTransaction {
        &self.tx
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Serialized signed transaction, as sent with `eth_sendRawTransaction`
    pub fn raw(&self) -> &Bytes {
        &self.raw
    }

    pub fn hash(&self) -> H256 {
        self.hash
    }

    pub fn nonce(&self) -> U256 {
        self.tx.nonce().copied().unwrap_or_default()
    }

    pub fn gas_limit(&self) -> U256 {
        self.tx.gas().copied().unwrap_or_default()
    }

    pub fn gas_price(&self) -> GasPrice {
        match &self.tx {
            TypedTransaction::Eip1559(req) => GasPrice::Eip1559 {
                max_fee_per_gas: req.max_fee_per_gas.unwrap_or_default(),
                max_priority_fee_per_gas: req.max_priority_fee_per_gas.unwrap_or_default(),
            },
            other => GasPrice::Legacy(other.gas_price().unwrap_or_default()),
        }
    }

    /// EIP-2718 type byte: 0x00 legacy, 0x02 fee market
    pub fn tx_type(&self) -> u8 {
        match self.tx {
            TypedTransaction::Legacy(_) => 0x00,
            TypedTransaction::Eip2930(_) => 0x01,
            TypedTransaction::Eip1559(_) => 0x02,
            #[allow(unreachable_patterns)]
            _ => 0xff,
        }
    }

    fn type_label(&self) -> &'static str {
        match self.tx_type() {
            0x02 => "eip1559",
            _ => "legacy",
        }
    }
}

/// Fields shared by both call types
struct Payload<'a> {
    to: Address,
    data: &'a Bytes,
    value: U256,
}

/// Signs and submits contract calls for one sender on one chain
pub struct TransactionSubmitter {
    client: Arc<dyn RpcClient>,
    signer: Arc<dyn TxSigner>,
    gas: GasDefaults,
    config: SubmitterConfig,
}

impl TransactionSubmitter {
    /// Create a new transaction submitter
    pub fn new(
        client: Arc<dyn RpcClient>,
        signer: Arc<dyn TxSigner>,
        config: SubmitterConfig,
    ) -> SubmitResult<Self> {
        config.validate()?;

        info!(
            "Transaction submitter initialized for chain {} with sender {:?}",
            config.chain_id,
            signer.address()
        );

        Ok(Self {
            client,
            signer,
            gas: GasDefaults::from_config(&config),
            config,
        })
    }

    /// Sender address, derived from the signer
    pub fn sender(&self) -> Address {
        self.signer.address()
    }

    pub fn chain_id(&self) -> u64 {
        self.config.chain_id
    }

    pub fn client(&self) -> &Arc<dyn RpcClient> {
        &self.client
    }

    /// Sign and broadcast a legacy transaction
    pub async fn submit_legacy(&self, call: LegacyCall) -> SubmitResult<SubmissionHandle> {
        let signed = self
            .prepare_legacy(&call)
            .await
            .map_err(|e| self.record_abort(e))?;
        Ok(self.broadcast(signed))
    }

    /// Estimate gas, then sign and broadcast an EIP-1559 transaction
    pub async fn submit_fee_market(&self, call: FeeMarketCall) -> SubmitResult<SubmissionHandle> {
        let signed = self
            .prepare_fee_market(&call)
            .await
            .map_err(|e| self.record_abort(e))?;
        Ok(self.broadcast(signed))
    }

    /// Resolve nonce and gas and sign a legacy transaction without sending it
    pub async fn prepare_legacy(&self, call: &LegacyCall) -> SubmitResult<SignedTransaction> {
        let from = self.signer.address();
        let nonce = resolve_nonce(self.client.as_ref(), from, call.nonce).await?;
        let gas_limit = self.gas.legacy_gas_limit(call.gas_limit);
        let gas_price = self.gas.legacy_price(call.gas_price);

        let payload = Payload {
            to: call.to,
            data: &call.data,
            value: call.value,
        };
        let tx = self.build_tx(from, &payload, nonce, gas_limit, &gas_price);
        self.sign(tx).await
    }

    /// Estimate gas, resolve nonce and sign an EIP-1559 transaction without sending it
    pub async fn prepare_fee_market(
        &self,
        call: &FeeMarketCall,
    ) -> SubmitResult<SignedTransaction> {
        let from = self.signer.address();
        debug!("Sender address: {:?}", from);

        let estimate_request = Eip1559TransactionRequest::new()
            .from(from)
            .to(call.to)
            .data(call.data.clone())
            .value(call.value);
        let gas_limit = self
            .client
            .estimate_gas(&TypedTransaction::Eip1559(estimate_request))
            .await?;
        info!("estimateGas: {}", gas_limit);

        let nonce = resolve_nonce(self.client.as_ref(), from, None).await?;
        let gas_price = self
            .gas
            .fee_market_price(call.max_fee_per_gas, call.max_priority_fee_per_gas);

        let payload = Payload {
            to: call.to,
            data: &call.data,
            value: call.value,
        };
        let tx = self.build_tx(from, &payload, nonce, gas_limit, &gas_price);
        self.sign(tx).await
    }

    /// Build a typed transaction; the fee variant selects the format
    fn build_tx(
        &self,
        from: Address,
        payload: &Payload<'_>,
        nonce: U256,
        gas_limit: U256,
        gas_price: &GasPrice,
    ) -> TypedTransaction {
        match gas_price {
            GasPrice::Legacy(price) => TypedTransaction::Legacy(
                TransactionRequest::new()
                    .from(from)
                    .to(payload.to)
                    .data(payload.data.clone())
                    .value(payload.value)
                    .nonce(nonce)
                    .gas(gas_limit)
                    .gas_price(*price)
                    .chain_id(self.config.chain_id),
            ),
            GasPrice::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            } => TypedTransaction::Eip1559(
                Eip1559TransactionRequest::new()
                    .from(from)
                    .to(payload.to)
                    .data(payload.data.clone())
                    .value(payload.value)
                    .nonce(nonce)
                    .gas(gas_limit)
                    .max_fee_per_gas(*max_fee_per_gas)
                    .max_priority_fee_per_gas(*max_priority_fee_per_gas)
                    .access_list(AccessList::default())
                    .chain_id(self.config.chain_id),
            ),
        }
    }

    async fn sign(&self, tx: TypedTransaction) -> SubmitResult<SignedTransaction> {
        let signature = self.signer.sign_transaction(&tx).await?;
        let raw = tx.rlp_signed(&signature);
        let hash = tx.hash(&signature);

        Ok(SignedTransaction {
            tx,
            signature,
            raw,
            hash,
        })
    }

    /// Hand a signed transaction to a background task and return its handle
    fn broadcast(&self, signed: SignedTransaction) -> SubmissionHandle {
        let id = Uuid::new_v4();
        let (emitter, events, state) = lifecycle_channel();
        let tracker = ConfirmationTracker::new(
            self.client.clone(),
            self.config.receipt_poll_interval,
            self.config.receipt_timeout,
        );

        let max_cost = signed.gas_price().max_cost(signed.gas_limit());
        debug!(
            "Broadcasting {} transaction {:?}: nonce {}, gas {}, max cost {} wei",
            signed.type_label(),
            signed.hash(),
            signed.nonce(),
            signed.gas_limit(),
            max_cost
        );

        let span = info_span!(
            "submission",
            id = %id,
            chain_id = self.config.chain_id,
            nonce = %signed.nonce(),
            kind = signed.type_label(),
        );
        let driver = Driver {
            client: self.client.clone(),
            tracker,
            emitter,
            chain_id: self.config.chain_id,
            confirmation_timeout: self.config.receipt_timeout,
        };
        tokio::spawn(driver.run(signed.clone()).instrument(span));

        SubmissionHandle::new(id, signed, events, state)
    }

    fn record_abort(&self, error: SubmitError) -> SubmitError {
        let stage = match &error {
            SubmitError::Nonce { .. } => "nonce",
            SubmitError::GasEstimation(_) => "gas_estimation",
            SubmitError::Signing(_) | SubmitError::Wallet(_) => "signing",
            _ => "prepare",
        };
        error!("Submission aborted before broadcast ({}): {}", stage, error);
        metrics::record_tx_failed(self.config.chain_id, stage);
        error
    }
}

/// Background half of a submission
struct Driver {
    client: Arc<dyn RpcClient>,
    tracker: ConfirmationTracker,
    emitter: LifecycleEmitter,
    chain_id: u64,
    confirmation_timeout: Duration,
}

impl Driver {
    async fn run(mut self, signed: SignedTransaction) {
        let started = Instant::now();

        let tx_hash = match self.client.send_raw_transaction(signed.raw().clone()).await {
            Ok(tx_hash) => tx_hash,
            Err(e) => {
                error!("Broadcast failed: {}", e);
                self.fail("broadcast", e);
                return;
            }
        };
        if tx_hash != signed.hash() {
            warn!(
                "Node returned hash {:?}, locally computed {:?}",
                tx_hash,
                signed.hash()
            );
        }
        info!("transactionHash: {:?}", tx_hash);
        metrics::record_tx_submitted(self.chain_id, signed.type_label());

        if let Err(e) = self.emitter.transaction_hash(tx_hash, signed.nonce()) {
            self.fail("lifecycle", e);
            return;
        }

        if !self.emitter.has_observers() {
            debug!("Submission handle dropped, not tracking {:?}", tx_hash);
            return;
        }

        let receipt = match self.tracker.wait_for_receipt(tx_hash).await {
            Ok(receipt) => receipt,
            Err(e) => {
                error!("Receipt tracking failed: {}", e);
                self.fail("receipt", e);
                return;
            }
        };

        let succeeded = receipt.status == Some(U64::from(1u64));
        if succeeded {
            info!(
                "receipt: block {:?}, gas used {:?}",
                receipt.block_number, receipt.gas_used
            );
        } else {
            warn!(
                "Transaction {:?} reverted in block {:?}",
                tx_hash, receipt.block_number
            );
        }
        metrics::record_receipt(self.chain_id, succeeded);
        metrics::record_tx_latency(self.chain_id, started.elapsed().as_secs_f64());

        if let Err(e) = self.emitter.receipt(receipt.clone()) {
            self.fail("lifecycle", e);
            return;
        }

        let outcome = timeout(self.confirmation_timeout, self.track_confirmations(&receipt)).await;
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!("Confirmation tracking failed: {}", e);
                self.fail("confirmation", e);
            }
            Err(_) => self.fail(
                "confirmation",
                SubmitError::Timeout {
                    operation: format!("first confirmation of {:?}", tx_hash),
                },
            ),
        }
    }

    async fn track_confirmations(&mut self, receipt: &TransactionReceipt) -> SubmitResult<()> {
        let mut seen = 0u64;

        loop {
            if !self.emitter.has_observers() {
                debug!("Submission handle dropped, stopping confirmation tracking");
                return Ok(());
            }

            let confirmations = self.tracker.confirmations(receipt).await?;
            if confirmations > seen && self.tracker.verify_inclusion(receipt).await? {
                // Feed every count so a head that jumps several blocks still
                // passes through 1.
                for count in seen + 1..=confirmations {
                    if self.emitter.confirmation(count, receipt)? {
                        info!("confirmations: {}", count);
                        metrics::record_tx_confirmed(self.chain_id);
                        return Ok(());
                    }
                }
                seen = confirmations;
            }

            sleep(self.tracker.poll_interval()).await;
        }
    }

    fn fail(&mut self, stage: &str, error: SubmitError) {
        metrics::record_tx_failed(self.chain_id, stage);
        self.emitter.error(error);
    }
}
