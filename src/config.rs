// src/config.rs
use std::time::Duration;

use clap::{ArgAction, Args};
use ethers::types::{Address, U256};
use serde::{Deserialize, Serialize};

use crate::error::AaError;
use crate::gas::GasParameters;
use crate::retry::{Backoff, RetryPolicy};

pub const DEFAULT_CHAIN_ID: u64 = 689;
pub const DEFAULT_RPC_URL: &str = "https://rpc-testnet.nerochain.io";
pub const DEFAULT_BUNDLER_RPC: &str = "https://bundler-testnet.nerochain.io/";
pub const DEFAULT_PAYMASTER_RPC: &str = "https://paymaster-testnet.nerochain.io";
pub const ENTRY_POINT_V06: &str = "0x5FF137D4b0FDCD49DcA30c7CF57E578a026d2789";
pub const SIMPLE_ACCOUNT_FACTORY: &str = "0x9406Cc6185a346906296840746125a0E44976454";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractAddresses {
    pub nft: Address,
    pub token: Address,
    pub game_hub: Address,
    pub tournament_hub: Address,
}

/// Description of the target network. Loaded once, then shared read-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainConfig {
    pub chain_id: u64,
    pub rpc_url: String,
    pub bundler_rpc: String,
    pub paymaster_rpc: String,
    pub paymaster_api_key: String,
    pub entry_point: Address,
    pub account_factory: Address,
    /// Spender that must hold an allowance for token-paid gas.
    pub paymaster_address: Address,
    pub contracts: ContractAddresses,
    pub gas: GasParameters,
}

impl ChainConfig {
    pub fn validate(&self) -> Result<(), AaError> {
        if self.chain_id == 0 {
            return Err(AaError::InvalidConfig("chain id cannot be zero".to_string()));
        }
        for (name, url) in [
            ("rpc_url", &self.rpc_url),
            ("bundler_rpc", &self.bundler_rpc),
            ("paymaster_rpc", &self.paymaster_rpc),
        ] {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(AaError::InvalidConfig(format!("{name} must be an http(s) url, got {url:?}")));
            }
        }
        if self.entry_point.is_zero() {
            return Err(AaError::InvalidConfig("entry point address cannot be zero".to_string()));
        }
        Ok(())
    }
}

/// Runtime knobs for caching, retries and receipt polling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    pub use_cache: bool,
    pub token_cache_time: Duration,
    pub max_token_refreshes: u32,
    pub gas_price_cache_time: Duration,
    pub balance_cache_time: Duration,
    pub retry: RetryPolicy,
    pub receipt_poll_interval: Duration,
    pub receipt_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            use_cache: true,
            token_cache_time: Duration::from_secs(60),
            max_token_refreshes: 5,
            gas_price_cache_time: Duration::from_secs(15),
            balance_cache_time: Duration::from_secs(10),
            retry: RetryPolicy::default(),
            receipt_poll_interval: Duration::from_secs(2),
            receipt_timeout: Duration::from_secs(60),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Network options. Every flag can also come from its `ARCADE_*` variable.
#[derive(Args, Debug, Clone)]
#[clap(next_help_heading = "NETWORK")]
pub struct ChainArgs {
    #[clap(long, env = "ARCADE_CHAIN_ID", default_value_t = DEFAULT_CHAIN_ID)]
    pub chain_id: u64,

    #[clap(long, env = "ARCADE_RPC_URL", default_value = DEFAULT_RPC_URL)]
    pub rpc_url: String,

    #[clap(long, env = "ARCADE_BUNDLER_RPC", default_value = DEFAULT_BUNDLER_RPC)]
    pub bundler_rpc: String,

    #[clap(long, env = "ARCADE_PAYMASTER_RPC", default_value = DEFAULT_PAYMASTER_RPC)]
    pub paymaster_rpc: String,

    #[clap(long, env = "ARCADE_PAYMASTER_API_KEY", default_value = "", hide_env_values = true)]
    pub paymaster_api_key: String,

    #[clap(long, env = "ARCADE_ENTRY_POINT", default_value = ENTRY_POINT_V06, value_parser = parse_address)]
    pub entry_point: Address,

    #[clap(long, env = "ARCADE_ACCOUNT_FACTORY", default_value = SIMPLE_ACCOUNT_FACTORY, value_parser = parse_address)]
    pub account_factory: Address,

    /// Spender that must hold an allowance for token-paid gas.
    #[clap(long, env = "ARCADE_PAYMASTER_ADDRESS", value_parser = parse_address)]
    pub paymaster_address: Address,

    #[clap(long, env = "ARCADE_NFT_CONTRACT", value_parser = parse_address)]
    pub nft_contract: Address,

    #[clap(long, env = "ARCADE_TOKEN_CONTRACT", value_parser = parse_address)]
    pub token_contract: Address,

    #[clap(long, env = "ARCADE_GAME_HUB_CONTRACT", value_parser = parse_address)]
    pub game_hub_contract: Address,

    #[clap(long, env = "ARCADE_TOURNAMENT_HUB_CONTRACT", value_parser = parse_address)]
    pub tournament_hub_contract: Address,

    #[clap(long, env = "ARCADE_CALL_GAS_LIMIT", default_value = "0x88b8", value_parser = parse_quantity)]
    pub call_gas_limit: U256,

    #[clap(long, env = "ARCADE_VERIFICATION_GAS_LIMIT", default_value = "0x33450", value_parser = parse_quantity)]
    pub verification_gas_limit: U256,

    #[clap(long, env = "ARCADE_PRE_VERIFICATION_GAS", default_value = "0xc350", value_parser = parse_quantity)]
    pub pre_verification_gas: U256,

    #[clap(long, env = "ARCADE_MAX_FEE_PER_GAS", default_value = "0x2162553062", value_parser = parse_quantity)]
    pub max_fee_per_gas: U256,

    #[clap(long, env = "ARCADE_MAX_PRIORITY_FEE_PER_GAS", default_value = "0x40dbcf36", value_parser = parse_quantity)]
    pub max_priority_fee_per_gas: U256,
}

impl TryFrom<ChainArgs> for ChainConfig {
    type Error = AaError;

    fn try_from(args: ChainArgs) -> Result<Self, Self::Error> {
        let config = Self {
            chain_id: args.chain_id,
            rpc_url: args.rpc_url,
            bundler_rpc: args.bundler_rpc,
            paymaster_rpc: args.paymaster_rpc,
            paymaster_api_key: args.paymaster_api_key,
            entry_point: args.entry_point,
            account_factory: args.account_factory,
            paymaster_address: args.paymaster_address,
            contracts: ContractAddresses {
                nft: args.nft_contract,
                token: args.token_contract,
                game_hub: args.game_hub_contract,
                tournament_hub: args.tournament_hub_contract,
            },
            gas: GasParameters {
                call_gas_limit: args.call_gas_limit,
                verification_gas_limit: args.verification_gas_limit,
                pre_verification_gas: args.pre_verification_gas,
                max_fee_per_gas: args.max_fee_per_gas,
                max_priority_fee_per_gas: args.max_priority_fee_per_gas,
            },
        };
        config.validate()?;
        Ok(config)
    }
}

/// Caching, retry and polling options.
#[derive(Args, Debug, Clone)]
#[clap(next_help_heading = "CLIENT")]
pub struct SettingsArgs {
    #[clap(long, env = "ARCADE_USE_CACHE", default_value_t = true, action = ArgAction::Set)]
    pub use_cache: bool,

    #[clap(long, env = "ARCADE_TOKEN_CACHE_SECS", default_value_t = 60)]
    pub token_cache_secs: u64,

    #[clap(long, env = "ARCADE_MAX_TOKEN_REFRESHES", default_value_t = 5)]
    pub max_token_refreshes: u32,

    #[clap(long, env = "ARCADE_GAS_PRICE_CACHE_SECS", default_value_t = 15)]
    pub gas_price_cache_secs: u64,

    #[clap(long, env = "ARCADE_BALANCE_CACHE_SECS", default_value_t = 10)]
    pub balance_cache_secs: u64,

    #[clap(long, env = "ARCADE_RETRY_ATTEMPTS", default_value_t = 3)]
    pub retry_attempts: u32,

    #[clap(long, env = "ARCADE_RETRY_BACKOFF_MS", default_value_t = 1_000)]
    pub retry_backoff_ms: u64,

    /// Double the back-off after every failed attempt.
    #[clap(long, env = "ARCADE_RETRY_EXPONENTIAL", default_value_t = false, action = ArgAction::Set)]
    pub retry_exponential: bool,

    #[clap(long, env = "ARCADE_RETRY_MAX_BACKOFF_MS", default_value_t = 10_000)]
    pub retry_max_backoff_ms: u64,

    #[clap(long, env = "ARCADE_RETRY_JITTER_MS", default_value_t = 0)]
    pub retry_jitter_ms: u64,

    #[clap(long, env = "ARCADE_RECEIPT_POLL_SECS", default_value_t = 2)]
    pub receipt_poll_secs: u64,

    #[clap(long, env = "ARCADE_RECEIPT_TIMEOUT_SECS", default_value_t = 60)]
    pub receipt_timeout_secs: u64,

    #[clap(long, env = "ARCADE_REQUEST_TIMEOUT_SECS", default_value_t = 30)]
    pub request_timeout_secs: u64,
}

impl From<SettingsArgs> for ClientSettings {
    fn from(args: SettingsArgs) -> Self {
        let backoff = if args.retry_exponential {
            Backoff::Exponential {
                initial: Duration::from_millis(args.retry_backoff_ms),
                max: Duration::from_millis(args.retry_max_backoff_ms),
            }
        } else {
            Backoff::Fixed(Duration::from_millis(args.retry_backoff_ms))
        };
        Self {
            use_cache: args.use_cache,
            token_cache_time: Duration::from_secs(args.token_cache_secs),
            max_token_refreshes: args.max_token_refreshes,
            gas_price_cache_time: Duration::from_secs(args.gas_price_cache_secs),
            balance_cache_time: Duration::from_secs(args.balance_cache_secs),
            retry: RetryPolicy {
                max_attempts: args.retry_attempts,
                backoff,
                max_jitter: Duration::from_millis(args.retry_jitter_ms),
            },
            receipt_poll_interval: Duration::from_secs(args.receipt_poll_secs),
            receipt_timeout: Duration::from_secs(args.receipt_timeout_secs),
            request_timeout: Duration::from_secs(args.request_timeout_secs),
        }
    }
}

pub fn parse_address(value: &str) -> Result<Address, String> {
    value
        .trim()
        .parse()
        .map_err(|e| format!("invalid address {value}: {e}"))
}

/// Accepts decimal or 0x-prefixed hex.
pub fn parse_quantity(value: &str) -> Result<U256, String> {
    let value = value.trim();
    match value.strip_prefix("0x") {
        Some(hex) => U256::from_str_radix(hex, 16).map_err(|e| format!("{e:?}")),
        None => U256::from_dec_str(value).map_err(|e| format!("{e:?}")),
    }
}

#[cfg(test)]
pub(crate) fn test_config() -> ChainConfig {
    ChainConfig {
        chain_id: DEFAULT_CHAIN_ID,
        rpc_url: "http://localhost:8545".to_string(),
        bundler_rpc: "http://localhost:4337".to_string(),
        paymaster_rpc: "http://localhost:4338".to_string(),
        paymaster_api_key: "test-key".to_string(),
        entry_point: Address::repeat_byte(0xe0),
        account_factory: Address::repeat_byte(0xfa),
        paymaster_address: Address::repeat_byte(0x9a),
        contracts: ContractAddresses {
            nft: Address::repeat_byte(0x01),
            token: Address::repeat_byte(0x02),
            game_hub: Address::repeat_byte(0x03),
            tournament_hub: Address::repeat_byte(0x04),
        },
        gas: GasParameters {
            max_fee_per_gas: U256::from(1_000u64),
            max_priority_fee_per_gas: U256::from(100u64),
            ..Default::default()
        },
    }
}
