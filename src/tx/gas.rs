//! Gas limit and fee defaults for both transaction formats

use crate::config::SubmitterConfig;

use ethers::types::U256;

/// Legacy gas limit used when the caller gives none (or zero)
pub const DEFAULT_GAS_LIMIT: u64 = 300_000;
/// Legacy gas price in wei (5 gwei)
pub const DEFAULT_GAS_PRICE: u64 = 5_000_000_000;
/// EIP-1559 fee cap in wei (3 gwei)
pub const DEFAULT_MAX_FEE_PER_GAS: u64 = 3_000_000_000;
/// EIP-1559 tip in wei (2 gwei)
pub const DEFAULT_MAX_PRIORITY_FEE_PER_GAS: u64 = 2_000_000_000;

/// Gas price types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GasPrice {
    Legacy(U256),
    Eip1559 {
        max_fee_per_gas: U256,
        max_priority_fee_per_gas: U256,
    },
}

impl GasPrice {
    /// Upper bound on the fee paid for `gas_limit` units, in wei
    pub fn max_cost(&self, gas_limit: U256) -> U256 {
        match self {
            GasPrice::Legacy(price) => gas_limit.saturating_mul(*price),
            GasPrice::Eip1559 {
                max_fee_per_gas, ..
            } => gas_limit.saturating_mul(*max_fee_per_gas),
        }
    }
}

/// Resolves caller-supplied gas parameters against configured defaults.
///
/// A value of zero is treated exactly like an absent value.
#[derive(Debug, Clone)]
pub struct GasDefaults {
    gas_limit: U256,
    gas_price: U256,
    max_fee_per_gas: U256,
    max_priority_fee_per_gas: U256,
}

impl GasDefaults {
    pub fn from_config(config: &SubmitterConfig) -> Self {
        Self {
            gas_limit: config.default_gas_limit.into(),
            gas_price: config.default_gas_price.into(),
            max_fee_per_gas: config.default_max_fee_per_gas.into(),
            max_priority_fee_per_gas: config.default_max_priority_fee_per_gas.into(),
        }
    }

    /// Gas limit for a legacy transaction
    pub fn legacy_gas_limit(&self, requested: Option<U256>) -> U256 {
        or_default(requested, self.gas_limit)
    }

    /// Gas price for a legacy transaction
    pub fn legacy_price(&self, requested: Option<U256>) -> GasPrice {
        GasPrice::Legacy(or_default(requested, self.gas_price))
    }

    /// Fee caps for an EIP-1559 transaction, each defaulted independently
    pub fn fee_market_price(
        &self,
        max_fee_per_gas: Option<U256>,
        max_priority_fee_per_gas: Option<U256>,
    ) -> GasPrice {
        GasPrice::Eip1559 {
            max_fee_per_gas: or_default(max_fee_per_gas, self.max_fee_per_gas),
            max_priority_fee_per_gas: or_default(
                max_priority_fee_per_gas,
                self.max_priority_fee_per_gas,
            ),
        }
    }
}

impl Default for GasDefaults {
    fn default() -> Self {
        Self {
            gas_limit: DEFAULT_GAS_LIMIT.into(),
            gas_price: DEFAULT_GAS_PRICE.into(),
            max_fee_per_gas: DEFAULT_MAX_FEE_PER_GAS.into(),
            max_priority_fee_per_gas: DEFAULT_MAX_PRIORITY_FEE_PER_GAS.into(),
        }
    }
}

fn or_default(requested: Option<U256>, default: U256) -> U256 {
    match requested {
        Some(value) if !value.is_zero() => value,
        _ => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_defaults_apply_to_unset_and_zero() {
        let defaults = GasDefaults::default();

        assert_eq!(defaults.legacy_gas_limit(None), U256::from(300_000u64));
        assert_eq!(defaults.legacy_gas_limit(Some(U256::zero())), U256::from(300_000u64));
        assert_eq!(
            defaults.legacy_price(Some(U256::zero())),
            GasPrice::Legacy(U256::from(5_000_000_000u64))
        );
    }

    #[test]
    fn legacy_explicit_values_win() {
        let defaults = GasDefaults::default();

        assert_eq!(defaults.legacy_gas_limit(Some(U256::from(1u64))), U256::from(1u64));
        assert_eq!(
            defaults.legacy_price(Some(U256::from(10_000_000_000u64))),
            GasPrice::Legacy(U256::from(10_000_000_000u64))
        );
    }

    #[test]
    fn fee_market_fields_default_independently() {
        let defaults = GasDefaults::default();

        assert_eq!(
            defaults.fee_market_price(None, None),
            GasPrice::Eip1559 {
                max_fee_per_gas: U256::from(3_000_000_000u64),
                max_priority_fee_per_gas: U256::from(2_000_000_000u64),
            }
        );
        assert_eq!(
            defaults.fee_market_price(Some(U256::from(50_000_000_000u64)), Some(U256::zero())),
            GasPrice::Eip1559 {
                max_fee_per_gas: U256::from(50_000_000_000u64),
                max_priority_fee_per_gas: U256::from(2_000_000_000u64),
            }
        );
    }

    #[test]
    fn defaults_follow_config() {
        let mut config = SubmitterConfig::new("http://localhost:8545", 97);
        config.default_gas_price = 10_000_000_000;
        config.default_gas_limit = 11_500_000;

        let defaults = GasDefaults::from_config(&config);
        assert_eq!(defaults.legacy_gas_limit(None), U256::from(11_500_000u64));
        assert_eq!(
            defaults.legacy_price(None),
            GasPrice::Legacy(U256::from(10_000_000_000u64))
        );
    }

    #[test]
    fn max_cost_uses_fee_cap() {
        let legacy = GasPrice::Legacy(U256::from(5_000_000_000u64));
        assert_eq!(
            legacy.max_cost(U256::from(300_000u64)),
            U256::from(1_500_000_000_000_000u64)
        );

        let eip1559 = GasDefaults::default().fee_market_price(None, None);
        assert_eq!(
            eip1559.max_cost(U256::from(21_000u64)),
            U256::from(63_000_000_000_000u64)
        );
    }
}
