// src/gas.rs
use ethers::types::U256;
use serde::{Deserialize, Serialize};

const MIN_MULTIPLIER: f64 = 0.5;
const MAX_MULTIPLIER: f64 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GasParameters {
    pub call_gas_limit: U256,
    pub verification_gas_limit: U256,
    pub pre_verification_gas: U256,
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: U256,
}

impl Default for GasParameters {
    fn default() -> Self {
        Self {
            call_gas_limit: U256::from(0x88b8u64),
            verification_gas_limit: U256::from(0x33450u64),
            pre_verification_gas: U256::from(0xc350u64),
            max_fee_per_gas: U256::from(0x2162553062u64),
            max_priority_fee_per_gas: U256::from(0x40dbcf36u64),
        }
    }
}

impl GasParameters {
    /// Scale the fee fields by `multiplier`. Gas limits are left alone.
    pub fn with_multiplier(&self, multiplier: GasMultiplier) -> Self {
        let percent = U256::from(multiplier.percent());
        let hundred = U256::from(100u64);
        Self {
            max_fee_per_gas: self.max_fee_per_gas.saturating_mul(percent) / hundred,
            max_priority_fee_per_gas: self.max_priority_fee_per_gas.saturating_mul(percent)
                / hundred,
            ..*self
        }
    }
}

/// Fee multiplier, always within [0.5, 5.0].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GasMultiplier(f64);

impl GasMultiplier {
    pub fn new(requested: f64) -> Self {
        if requested.is_nan() {
            return Self::default();
        }
        Self(requested.clamp(MIN_MULTIPLIER, MAX_MULTIPLIER))
    }

    pub fn value(&self) -> f64 {
        self.0
    }

    pub fn percent(&self) -> u64 {
        (self.0 * 100.0).round() as u64
    }
}

impl Default for GasMultiplier {
    fn default() -> Self {
        Self(1.0)
    }
}
