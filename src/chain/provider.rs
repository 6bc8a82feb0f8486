//! HTTP RPC client with multi-endpoint failover

use super::RpcClient;
use crate::config::SubmitterConfig;
use crate::error::{SubmitError, SubmitResult};
use crate::metrics;

use async_trait::async_trait;
use ethers::providers::{Http, Middleware, Provider, ProviderError};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, TransactionReceipt, H256, U256};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

/// [`RpcClient`] over one primary and any number of fallback HTTP endpoints
pub struct EthRpcClient {
    chain_id: u64,
    /// HTTP providers, primary first
    http_providers: Vec<Provider<Http>>,
    /// Current active provider index
    current_provider: AtomicUsize,
    request_timeout: Duration,
}

impl EthRpcClient {
    /// Create a client for the endpoints in `config`
    pub fn new(config: &SubmitterConfig) -> SubmitResult<Self> {
        let mut http_providers = Vec::new();

        let urls = std::iter::once(&config.rpc_url).chain(config.fallback_rpc_urls.iter());
        for url in urls {
            match Provider::<Http>::try_from(url.as_str()) {
                Ok(provider) => {
                    let provider = provider.interval(config.receipt_poll_interval);
                    http_providers.push(provider);
                    debug!("Added HTTP provider for chain {}: {}", config.chain_id, url);
                }
                Err(e) => {
                    warn!("Failed to create provider for {}: {}", url, e);
                }
            }
        }

        if http_providers.is_empty() {
            return Err(SubmitError::Rpc {
                chain_id: config.chain_id,
                message: "No valid RPC providers".to_string(),
            });
        }

        Ok(Self {
            chain_id: config.chain_id,
            http_providers,
            current_provider: AtomicUsize::new(0),
            request_timeout: config.request_timeout,
        })
    }

    /// Get the active HTTP provider
    pub fn http(&self) -> &Provider<Http> {
        let idx = self.current_provider.load(Ordering::Relaxed);
        &self.http_providers[idx % self.http_providers.len()]
    }

    /// Number of configured endpoints
    pub fn endpoint_count(&self) -> usize {
        self.http_providers.len()
    }

    /// Switch to next available provider
    pub fn failover(&self) {
        if self.http_providers.len() < 2 {
            return;
        }
        let current = self.current_provider.load(Ordering::Relaxed);
        let next = (current + 1) % self.http_providers.len();
        self.current_provider.store(next, Ordering::Relaxed);
        warn!("Chain {} failover to provider {}", self.chain_id, next);
        metrics::record_rpc_failover(self.chain_id);
    }

    /// Query `eth_chainId` on the active endpoint
    pub async fn remote_chain_id(&self) -> SubmitResult<u64> {
        let id = self
            .with_failover("eth_chainId", |p| async move { p.get_chainid().await })
            .await?;
        u64::try_from(id)
            .map_err(|_| SubmitError::InvalidInput(format!("chain id {} does not fit in u64", id)))
    }

    /// Run a read-only call, rotating through endpoints until one answers
    async fn with_failover<T, F, Fut>(&self, operation: &str, call: F) -> SubmitResult<T>
    where
        F: Fn(Provider<Http>) -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let mut last_error = String::from("no endpoint attempted");

        for _ in 0..self.http_providers.len() {
            match timeout(self.request_timeout, call(self.http().clone())).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) => {
                    warn!("{} failed on chain {}: {}", operation, self.chain_id, e);
                    last_error = e.to_string();
                }
                Err(_) => {
                    warn!("{} timed out on chain {}", operation, self.chain_id);
                    last_error = format!("timed out after {:?}", self.request_timeout);
                }
            }
            self.failover();
        }

        Err(SubmitError::Rpc {
            chain_id: self.chain_id,
            message: format!("{}: {}", operation, last_error),
        })
    }
}

#[async_trait]
impl RpcClient for EthRpcClient {
    async fn estimate_gas(&self, tx: &TypedTransaction) -> SubmitResult<U256> {
        let tx = tx.clone();
        self.with_failover("eth_estimateGas", |p| {
            let tx = tx.clone();
            async move { p.estimate_gas(&tx, None).await }
        })
        .await
        .map_err(|e| SubmitError::GasEstimation(e.to_string()))
    }

    async fn get_transaction_count(&self, address: Address) -> SubmitResult<U256> {
        self.with_failover("eth_getTransactionCount", |p| async move {
            p.get_transaction_count(address, None).await
        })
        .await
        .map_err(|e| SubmitError::Nonce {
            chain_id: self.chain_id,
            message: e.to_string(),
        })
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> SubmitResult<H256> {
        // A rejected broadcast is reported, never replayed on another endpoint.
        let provider = self.http();
        let result = timeout(self.request_timeout, async {
            provider
                .send_raw_transaction(raw)
                .await
                .map(|pending| pending.tx_hash())
        })
        .await;

        match result {
            Ok(Ok(tx_hash)) => Ok(tx_hash),
            Ok(Err(e)) => Err(SubmitError::Broadcast {
                chain_id: self.chain_id,
                message: e.to_string(),
            }),
            Err(_) => Err(SubmitError::Timeout {
                operation: "eth_sendRawTransaction".to_string(),
            }),
        }
    }

    async fn get_transaction_receipt(
        &self,
        tx_hash: H256,
    ) -> SubmitResult<Option<TransactionReceipt>> {
        self.with_failover("eth_getTransactionReceipt", |p| async move {
            p.get_transaction_receipt(tx_hash).await
        })
        .await
    }

    async fn get_block_number(&self) -> SubmitResult<u64> {
        self.with_failover("eth_blockNumber", |p| async move { p.get_block_number().await })
            .await
            .map(|block| block.as_u64())
    }
}
