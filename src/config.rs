//! Configuration management for contract-exec
//!
//! Loads network profiles and submitter defaults from TOML files with
//! environment variable substitution. The submitter itself never reads the
//! environment; it receives a [`SubmitterConfig`] at construction.

use crate::error::{SubmitError, SubmitResult};
use crate::tx::{
    DEFAULT_GAS_LIMIT, DEFAULT_GAS_PRICE, DEFAULT_MAX_FEE_PER_GAS,
    DEFAULT_MAX_PRIORITY_FEE_PER_GAS,
};

use anyhow::{Context, Result};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming the config file
pub const CONFIG_ENV: &str = "CONTRACT_EXEC_CONFIG";

lazy_static! {
    static ref ENV_VAR_PATTERN: Regex =
        Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").expect("valid env var pattern");
}

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub submitter: SubmitterDefaults,
    #[serde(default)]
    pub networks: HashMap<String, NetworkConfig>,
    #[serde(default)]
    pub wallet: WalletConfig,
}

/// Defaults applied to every network unless the network overrides them
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SubmitterDefaults {
    pub default_gas_limit: u64,
    pub default_gas_price: u64,
    pub default_max_fee_per_gas: u64,
    pub default_max_priority_fee_per_gas: u64,
    pub receipt_poll_interval_ms: u64,
    pub receipt_timeout_secs: u64,
    pub request_timeout_secs: u64,
}

impl Default for SubmitterDefaults {
    fn default() -> Self {
        Self {
            default_gas_limit: DEFAULT_GAS_LIMIT,
            default_gas_price: DEFAULT_GAS_PRICE,
            default_max_fee_per_gas: DEFAULT_MAX_FEE_PER_GAS,
            default_max_priority_fee_per_gas: DEFAULT_MAX_PRIORITY_FEE_PER_GAS,
            receipt_poll_interval_ms: 1_000,
            receipt_timeout_secs: 750,
            request_timeout_secs: 30,
        }
    }
}

/// A named network profile
#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
    pub chain_id: u64,
    pub rpc_url: String,
    #[serde(default)]
    pub fallback_rpc_urls: Vec<String>,
    /// Overrides `submitter.default_gas_limit`
    pub gas_limit: Option<u64>,
    /// Overrides `submitter.default_gas_price` (wei)
    pub gas_price: Option<u64>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct WalletConfig {
    /// Name of the environment variable holding the hex private key
    #[serde(default = "default_private_key_env")]
    pub private_key_env: String,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            private_key_env: default_private_key_env(),
        }
    }
}

fn default_private_key_env() -> String {
    "PRI_KEY".to_string()
}

/// Explicit configuration handed to the submitter at construction
#[derive(Debug, Clone)]
pub struct SubmitterConfig {
    pub rpc_url: String,
    pub fallback_rpc_urls: Vec<String>,
    pub chain_id: u64,
    pub default_gas_limit: u64,
    pub default_gas_price: u64,
    pub default_max_fee_per_gas: u64,
    pub default_max_priority_fee_per_gas: u64,
    pub receipt_poll_interval: Duration,
    pub receipt_timeout: Duration,
    pub request_timeout: Duration,
}

impl SubmitterConfig {
    /// Config for an endpoint using the built-in defaults
    pub fn new(rpc_url: impl Into<String>, chain_id: u64) -> Self {
        Self::from_defaults(rpc_url.into(), chain_id, &SubmitterDefaults::default())
    }

    fn from_defaults(rpc_url: String, chain_id: u64, defaults: &SubmitterDefaults) -> Self {
        Self {
            rpc_url,
            fallback_rpc_urls: Vec::new(),
            chain_id,
            default_gas_limit: defaults.default_gas_limit,
            default_gas_price: defaults.default_gas_price,
            default_max_fee_per_gas: defaults.default_max_fee_per_gas,
            default_max_priority_fee_per_gas: defaults.default_max_priority_fee_per_gas,
            receipt_poll_interval: Duration::from_millis(defaults.receipt_poll_interval_ms),
            receipt_timeout: Duration::from_secs(defaults.receipt_timeout_secs),
            request_timeout: Duration::from_secs(defaults.request_timeout_secs),
        }
    }

    /// Check the values the submitter relies on
    pub fn validate(&self) -> SubmitResult<()> {
        if self.rpc_url.is_empty() {
            return Err(SubmitError::Config("RPC URL is empty".to_string()));
        }
        if self.chain_id == 0 {
            return Err(SubmitError::Config("chain id must be non-zero".to_string()));
        }
        if self.receipt_poll_interval.is_zero() {
            return Err(SubmitError::Config(
                "receipt poll interval must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

impl Settings {
    /// Load settings from the path in `CONTRACT_EXEC_CONFIG` or `config/default.toml`
    pub fn load() -> Result<Self> {
        let config_path = env::var(CONFIG_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));
        Self::load_from(&config_path)
    }

    /// Load settings from a specific file
    pub fn load_from(config_path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;
        Self::parse(&config_str)
    }

    /// Parse settings from TOML text, substituting `${VAR}` references first
    pub fn parse(input: &str) -> Result<Self> {
        let config_str = substitute_env_vars(input);

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        if self.enabled_networks().is_empty() {
            anyhow::bail!("At least one network must be enabled");
        }

        for (name, network) in &self.networks {
            if !network.enabled {
                continue;
            }
            if network.rpc_url.is_empty() {
                anyhow::bail!("Network {} has no RPC URL configured", name);
            }
            if network.chain_id == 0 {
                anyhow::bail!("Network {} has chain_id 0", name);
            }
        }

        if self.submitter.receipt_poll_interval_ms == 0 {
            anyhow::bail!("receipt_poll_interval_ms must be non-zero");
        }

        Ok(())
    }

    /// Get list of enabled networks
    pub fn enabled_networks(&self) -> Vec<(&String, &NetworkConfig)> {
        let mut networks: Vec<_> = self.networks.iter().filter(|(_, n)| n.enabled).collect();
        networks.sort_by(|a, b| a.0.cmp(b.0));
        networks
    }

    /// Get network config by chain ID
    pub fn get_network_by_id(&self, chain_id: u64) -> Option<&NetworkConfig> {
        self.networks.values().find(|n| n.chain_id == chain_id)
    }

    /// Build the submitter configuration for a named network
    pub fn submitter_config(&self, network: &str) -> Result<SubmitterConfig> {
        let net = self
            .networks
            .get(network)
            .with_context(|| format!("Unknown network: {}", network))?;
        if !net.enabled {
            anyhow::bail!("Network {} is disabled", network);
        }

        let mut config =
            SubmitterConfig::from_defaults(net.rpc_url.clone(), net.chain_id, &self.submitter);
        config.fallback_rpc_urls = net.fallback_rpc_urls.clone();
        if let Some(gas_limit) = net.gas_limit {
            config.default_gas_limit = gas_limit;
        }
        if let Some(gas_price) = net.gas_price {
            config.default_gas_price = gas_price;
        }

        Ok(config)
    }

    /// Read the private key from the configured environment variable
    pub fn private_key(&self) -> Result<String> {
        env::var(&self.wallet.private_key_env)
            .with_context(|| format!("{} is not set", self.wallet.private_key_env))
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    ENV_VAR_PATTERN
        .replace_all(input, |cap: &regex::Captures| {
            env::var(&cap[1]).unwrap_or_default()
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
[submitter]
receipt_timeout_secs = 120

[networks.bsc_testnet]
chain_id = 97
rpc_url = "https://data-seed-prebsc-1-s1.binance.org:8545"
gas_limit = 11500000
gas_price = 10000000000

[networks.bsc_mainnet]
chain_id = 56
rpc_url = "https://bsc-dataseed.binance.org"
fallback_rpc_urls = ["https://bsc-dataseed1.defibit.io"]

[networks.kovan]
chain_id = 42
rpc_url = "https://kovan.example"
enabled = false
"#;

    #[test]
    fn test_env_var_substitution() {
        env::set_var("CONTRACT_EXEC_TEST_VAR", "test_value");
        let input = "url = \"https://api.example.com/${CONTRACT_EXEC_TEST_VAR}/endpoint\"";
        let result = substitute_env_vars(input);
        assert_eq!(result, "url = \"https://api.example.com/test_value/endpoint\"");
    }

    #[test]
    fn test_missing_env_var_becomes_empty() {
        let result = substitute_env_vars("key = \"${CONTRACT_EXEC_SURELY_UNSET_VAR}\"");
        assert_eq!(result, "key = \"\"");
    }

    #[test]
    fn test_network_overrides_merge_onto_defaults() {
        let settings = Settings::parse(SAMPLE).unwrap();

        let testnet = settings.submitter_config("bsc_testnet").unwrap();
        assert_eq!(testnet.chain_id, 97);
        assert_eq!(testnet.default_gas_limit, 11_500_000);
        assert_eq!(testnet.default_gas_price, 10_000_000_000);
        assert_eq!(testnet.default_max_fee_per_gas, DEFAULT_MAX_FEE_PER_GAS);
        assert_eq!(testnet.receipt_timeout, Duration::from_secs(120));

        let mainnet = settings.submitter_config("bsc_mainnet").unwrap();
        assert_eq!(mainnet.default_gas_limit, DEFAULT_GAS_LIMIT);
        assert_eq!(mainnet.default_gas_price, DEFAULT_GAS_PRICE);
        assert_eq!(mainnet.fallback_rpc_urls.len(), 1);
    }

    #[test]
    fn test_disabled_and_unknown_networks() {
        let settings = Settings::parse(SAMPLE).unwrap();
        assert_eq!(settings.enabled_networks().len(), 2);
        assert!(settings.submitter_config("kovan").is_err());
        assert!(settings.submitter_config("ropsten").is_err());
        assert_eq!(settings.get_network_by_id(56).map(|n| n.chain_id), Some(56));
    }

    #[test]
    fn test_rejects_config_without_enabled_network() {
        let input = r#"
[networks.kovan]
chain_id = 42
rpc_url = "https://kovan.example"
enabled = false
"#;
        assert!(Settings::parse(input).is_err());
    }

    #[test]
    fn test_rejects_zero_chain_id() {
        let input = r#"
[networks.local]
chain_id = 0
rpc_url = "http://localhost:8545"
"#;
        assert!(Settings::parse(input).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let settings = Settings::load_from(file.path()).unwrap();
        assert_eq!(settings.wallet.private_key_env, "PRI_KEY");
        assert!(settings.networks.contains_key("bsc_mainnet"));
    }

    #[test]
    fn test_shipped_default_config_parses() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/default.toml");
        let settings = Settings::load_from(&path).unwrap();

        let testnet = settings.submitter_config("bsc_testnet").unwrap();
        assert_eq!(testnet.chain_id, 97);
        assert_eq!(testnet.default_gas_price, DEFAULT_GAS_PRICE);
        assert_eq!(testnet.receipt_timeout, Duration::from_secs(750));
        assert!(settings.submitter_config("kovan").is_err());

        let polygon = settings.submitter_config("polygon").unwrap();
        assert_eq!(polygon.chain_id, 137);
        assert_eq!(polygon.default_gas_limit, DEFAULT_GAS_LIMIT);
        assert!(settings.submitter_config("rinkeby").is_err());
        assert!(settings.submitter_config("mumbai").is_err());
        assert_eq!(settings.get_network_by_id(80001).map(|n| n.enabled), Some(false));
    }

    #[test]
    fn test_submitter_config_validation() {
        assert!(SubmitterConfig::new("http://localhost:8545", 1337).validate().is_ok());
        assert!(SubmitterConfig::new("", 1337).validate().is_err());
        assert!(SubmitterConfig::new("http://localhost:8545", 0).validate().is_err());
    }
}
