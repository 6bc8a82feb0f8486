//! CLI argument parsing

use clap::{Args, Parser, Subcommand};
use ethers::types::{Address, Bytes, U256};
use ethers::utils::parse_units;
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Parser, Debug)]
#[command(name = "contract-exec")]
#[command(about = "Sign and submit contract calls to EVM chains", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Network profile from the config file (overrides --rpc-url/--chain-id)
    #[arg(short, long)]
    pub network: Option<String>,

    /// Path to the TOML config file
    #[arg(short, long, env = "CONTRACT_EXEC_CONFIG")]
    pub config: Option<PathBuf>,

    /// RPC endpoint URL
    #[arg(short, long, env = "RPC_URL")]
    pub rpc_url: Option<String>,

    /// Chain ID
    #[arg(long, env = "CHAIN_ID")]
    pub chain_id: Option<u64>,

    /// Private key for signing transactions
    #[arg(short = 'k', long, env = "PRI_KEY", hide_env_values = true)]
    pub private_key: Option<String>,

    /// Log as JSON
    #[arg(long)]
    pub json: bool,

    /// Print Prometheus metrics before exiting
    #[arg(long)]
    pub metrics: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Print the sender address derived from the private key
    Address,

    /// Print the sender's current transaction count
    Nonce,

    /// Submit a legacy (type 0) transaction
    Send(SendArgs),

    /// Submit an EIP-1559 (type 2) transaction with an estimated gas limit
    Send1559(Send1559Args),
}

#[derive(Debug, Args)]
pub struct SendArgs {
    /// Contract address
    #[arg(long, value_parser = parse_address)]
    pub to: Address,

    /// ABI-encoded call data (hex)
    #[arg(short, long, value_parser = parse_bytes, default_value = "0x")]
    pub data: Bytes,

    /// Value in wei (decimal, 0x-hex or "<n>gwei")
    #[arg(long, value_parser = parse_amount, default_value = "0")]
    pub value: U256,

    /// Nonce to use instead of the on-chain transaction count
    #[arg(long)]
    pub nonce: Option<u64>,

    /// Gas limit (default 300000 or the network profile's)
    #[arg(long, value_parser = parse_amount)]
    pub gas_limit: Option<U256>,

    /// Gas price (default 5 gwei or the network profile's)
    #[arg(long, value_parser = parse_amount)]
    pub gas_price: Option<U256>,

    /// Submit this many copies, each with the next nonce once the previous
    /// one has a hash
    #[arg(long, default_value_t = 1)]
    pub repeat: u32,
}

#[derive(Debug, Args)]
pub struct Send1559Args {
    /// Contract address
    #[arg(long, value_parser = parse_address)]
    pub to: Address,

    /// ABI-encoded call data (hex)
    #[arg(short, long, value_parser = parse_bytes, default_value = "0x")]
    pub data: Bytes,

    /// Value in wei
    #[arg(long, value_parser = parse_amount, default_value = "0")]
    pub value: U256,

    /// Max fee per gas (default 3 gwei)
    #[arg(long, value_parser = parse_amount)]
    pub max_fee: Option<U256>,

    /// Max priority fee per gas (default 2 gwei)
    #[arg(long, value_parser = parse_amount)]
    pub max_priority_fee: Option<U256>,
}

fn parse_address(s: &str) -> Result<Address, String> {
    Address::from_str(s.trim()).map_err(|e| format!("invalid address {}: {}", s, e))
}

fn parse_bytes(s: &str) -> Result<Bytes, String> {
    let s = s.trim();
    let digits = s.strip_prefix("0x").unwrap_or(s);
    hex::decode(digits)
        .map(Bytes::from)
        .map_err(|e| format!("invalid hex data: {}", e))
}

fn parse_amount(s: &str) -> Result<U256, String> {
    let s = s.trim();
    if let Some(gwei) = s.strip_suffix("gwei") {
        return parse_units(gwei.trim(), "gwei")
            .map(U256::from)
            .map_err(|e| format!("invalid gwei amount {}: {}", s, e));
    }
    match s.strip_prefix("0x") {
        Some(digits) => U256::from_str_radix(digits, 16)
            .map_err(|e| format!("invalid hex amount {}: {}", s, e)),
        None => U256::from_dec_str(s).map_err(|e| format!("invalid amount {}: {}", s, e)),
    }
}
