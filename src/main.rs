//! contract-exec - sign and submit contract calls to EVM chains
//!
//! Reads the endpoint, chain id and key from flags, the environment (`.env`
//! included) or a network profile in the config file, then submits and waits
//! for the first confirmation.

use anyhow::{bail, Context, Result};
use clap::Parser;
use ethers::types::{TransactionReceipt, U64};
use std::sync::{Arc, Mutex};
use tracing::{error, info, warn};

mod cli;

use cli::{Cli, Command, Send1559Args, SendArgs};
use contract_exec::metrics;
use contract_exec::tx::NonceSequence;
use contract_exec::{
    EthRpcClient, FeeMarketCall, LegacyCall, LocalKeySigner, RpcClient, Settings,
    SubmissionCallbacks, SubmissionEvent, SubmissionHandle, SubmissionState, SubmitterConfig,
    TransactionSubmitter, TxSigner,
};

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    // Initialize logging
    init_logging(cli.json);

    info!("Starting contract-exec v{}", env!("CARGO_PKG_VERSION"));

    let result = run(&cli).await;
    if let Err(e) = &result {
        error!("{:#}", e);
    }

    if cli.metrics {
        print!("{}", metrics::render()?);
    }

    result
}

/// Endpoint configuration and signing key for one run
struct Target {
    config: SubmitterConfig,
    private_key: String,
}

fn resolve_target(cli: &Cli) -> Result<Target> {
    if let Some(network) = &cli.network {
        let settings = match &cli.config {
            Some(path) => Settings::load_from(path)?,
            None => Settings::load()?,
        };
        let config = settings.submitter_config(network)?;
        let private_key = match &cli.private_key {
            Some(key) => key.clone(),
            None => settings.private_key()?,
        };
        info!("Using network profile {} (chain {})", network, config.chain_id);
        return Ok(Target {
            config,
            private_key,
        });
    }

    let rpc_url = cli
        .rpc_url
        .clone()
        .context("RPC_URL is not set; pass --rpc-url or --network")?;
    let chain_id = cli
        .chain_id
        .context("CHAIN_ID is not set; pass --chain-id or --network")?;
    let private_key = cli
        .private_key
        .clone()
        .context("PRI_KEY is not set; pass --private-key")?;

    Ok(Target {
        config: SubmitterConfig::new(rpc_url, chain_id),
        private_key,
    })
}

async fn run(cli: &Cli) -> Result<()> {
    if let Command::Address = cli.command {
        let private_key = cli
            .private_key
            .as_deref()
            .context("PRI_KEY is not set; pass --private-key")?;
        let signer = LocalKeySigner::from_private_key(private_key, cli.chain_id.unwrap_or(1))?;
        println!("{:?}", signer.address());
        return Ok(());
    }

    let target = resolve_target(cli)?;
    let signer = Arc::new(LocalKeySigner::from_private_key(
        &target.private_key,
        target.config.chain_id,
    )?);
    let client = Arc::new(EthRpcClient::new(&target.config)?);
    info!("Sender address: {:?}", signer.address());

    match client.remote_chain_id().await {
        Ok(remote) if remote != target.config.chain_id => warn!(
            "Endpoint reports chain {} but transactions are signed for chain {}",
            remote, target.config.chain_id
        ),
        Ok(_) => {}
        Err(e) => warn!("Could not query endpoint chain id: {}", e),
    }

    match &cli.command {
        Command::Address => Ok(()),
        Command::Nonce => {
            let nonce = client.get_transaction_count(signer.address()).await?;
            println!("{}", nonce);
            Ok(())
        }
        Command::Send(args) => {
            let submitter = TransactionSubmitter::new(client.clone(), signer, target.config)?;
            send_legacy(&submitter, &*client, args, cli.json).await
        }
        Command::Send1559(args) => {
            let submitter = TransactionSubmitter::new(client, signer, target.config)?;
            send_fee_market(&submitter, args, cli.json).await
        }
    }
}

/// Submit `args.repeat` legacy transactions, each one as soon as the
/// previous has a hash, then wait for all of them
async fn send_legacy(
    submitter: &TransactionSubmitter,
    client: &dyn RpcClient,
    args: &SendArgs,
    json: bool,
) -> Result<()> {
    let nonces = match args.nonce {
        Some(nonce) => NonceSequence::starting_at(nonce),
        None => NonceSequence::from_chain(client, submitter.sender()).await?,
    };

    let mut pending = Vec::new();
    for _ in 0..args.repeat.max(1) {
        let call = LegacyCall {
            to: args.to,
            data: args.data.clone(),
            value: args.value,
            nonce: Some(nonces.next()),
            gas_limit: args.gas_limit,
            gas_price: args.gas_price,
        };
        let mut handle = submitter.submit_legacy(call).await?;
        await_hash(&mut handle).await?;
        pending.push(tokio::spawn(handle.wait()));
    }

    let mut reverted = 0usize;
    for task in pending {
        let receipt = task.await.context("Submission task failed")??;
        if !report_receipt(&receipt, json)? {
            reverted += 1;
        }
    }
    if reverted > 0 {
        bail!("{} transaction(s) reverted", reverted);
    }
    Ok(())
}

async fn await_hash(handle: &mut SubmissionHandle) -> Result<()> {
    match handle.next_event().await {
        Some(SubmissionEvent::TransactionHash { tx_hash, nonce }) => {
            println!("{:?} nonce={}", tx_hash, nonce);
            Ok(())
        }
        Some(SubmissionEvent::Error(e)) => Err(e.into()),
        _ => bail!("Submission {} ended before a transaction hash", handle.id()),
    }
}

async fn send_fee_market(
    submitter: &TransactionSubmitter,
    args: &Send1559Args,
    json: bool,
) -> Result<()> {
    let call = FeeMarketCall {
        to: args.to,
        data: args.data.clone(),
        value: args.value,
        max_fee_per_gas: args.max_fee,
        max_priority_fee_per_gas: args.max_priority_fee,
    };
    let handle = submitter.submit_fee_market(call).await?;

    let confirmed = Arc::new(Mutex::new(None));
    let callbacks = SubmissionCallbacks::new()
        .on_transaction_hash(|tx_hash, nonce| println!("{:?} nonce={}", tx_hash, nonce))
        .on_confirmation({
            let confirmed = confirmed.clone();
            move |_, receipt| {
                if let Ok(mut slot) = confirmed.lock() {
                    *slot = Some(receipt.clone());
                }
            }
        })
        .on_error(|e| error!("Submission failed: {}", e));

    let final_state = handle.dispatch(callbacks).await;
    if final_state != SubmissionState::ConfirmedOnce {
        bail!("Submission finished in state {}", final_state);
    }

    let receipt = confirmed
        .lock()
        .ok()
        .and_then(|mut slot| slot.take())
        .context("Confirmed submission without a receipt")?;
    if !report_receipt(&receipt, json)? {
        bail!("Transaction {:?} reverted", receipt.transaction_hash);
    }
    Ok(())
}

/// Print a receipt; returns whether the transaction succeeded
fn report_receipt(receipt: &TransactionReceipt, json: bool) -> Result<bool> {
    if json {
        println!("{}", serde_json::to_string_pretty(receipt)?);
    } else {
        println!(
            "{:?} block={} gas_used={} status={}",
            receipt.transaction_hash,
            receipt.block_number.unwrap_or_default(),
            receipt.gas_used.unwrap_or_default(),
            receipt.status.unwrap_or_default()
        );
    }
    Ok(receipt.status == Some(U64::from(1u64)))
}

fn init_logging(json: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,contract_exec=debug,hyper=warn"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}
