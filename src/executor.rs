// src/executor.rs
use std::sync::Arc;

use ethers::types::Address;
use tracing::{debug, info, warn};

use crate::account::{BuilderSettings, WalletSigner};
use crate::cache::SingleFlight;
use crate::config::ChainConfig;
use crate::connection::ConnectionManager;
use crate::error::AaResult;
use crate::gas::GasMultiplier;
use crate::paymaster::{PaymasterOptions, PaymentType};
use crate::retry::{with_retries, RetryPolicy};
use crate::types::{ContractCall, OperationKey, UserOperationResult};

/// Per-call overrides.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OperationOptions {
    /// Paymaster API key; the configured key is used when absent.
    pub api_key: Option<String>,
    pub gas_multiplier: Option<GasMultiplier>,
}

impl OperationOptions {
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_gas_multiplier(mut self, multiplier: f64) -> Self {
        self.gas_multiplier = Some(GasMultiplier::new(multiplier));
        self
    }
}

/// Runs a contract call through the smart account: build, submit (with
/// retries), wait for inclusion, resolve the transaction hash.
pub struct OperationExecutor {
    config: Arc<ChainConfig>,
    connections: Arc<ConnectionManager>,
    flights: SingleFlight<OperationKey, UserOperationResult>,
    retry: RetryPolicy,
    use_cache: bool,
}

impl OperationExecutor {
    pub fn new(
        config: Arc<ChainConfig>,
        connections: Arc<ConnectionManager>,
        retry: RetryPolicy,
        use_cache: bool,
    ) -> Self {
        Self {
            config,
            connections,
            flights: SingleFlight::new(),
            retry,
            use_cache,
        }
    }

    /// Gas and paymaster settings for one call.
    pub fn builder_settings(
        &self,
        payment: PaymentType,
        token: Option<Address>,
        options: &OperationOptions,
    ) -> AaResult<BuilderSettings> {
        let api_key = options
            .api_key
            .clone()
            .unwrap_or_else(|| self.config.paymaster_api_key.clone());
        let paymaster = PaymasterOptions::new(payment, api_key, self.config.paymaster_rpc.clone(), token)?;
        let gas = self
            .config
            .gas
            .with_multiplier(options.gas_multiplier.unwrap_or_default());
        Ok(BuilderSettings { gas, paymaster })
    }

    /// Execute `call` for `signer`. Concurrent calls with the same `key` share
    /// one submission and all receive its result.
    pub async fn execute(
        &self,
        key: OperationKey,
        signer: &WalletSigner,
        call: ContractCall,
        payment: PaymentType,
        token: Option<Address>,
        options: &OperationOptions,
    ) -> AaResult<UserOperationResult> {
        // Reject before touching the network
        signer.provider()?;
        let settings = self.builder_settings(payment, token, options)?;
        let flow = run_operation(
            Arc::clone(&self.connections),
            self.retry,
            signer.clone(),
            call,
            settings,
            key.clone(),
        );
        if self.use_cache {
            self.flights.run(key, flow).await
        } else {
            flow.await
        }
    }

    pub fn is_pending(&self, key: &OperationKey) -> bool {
        self.flights.is_in_flight(key)
    }
}

async fn run_operation(
    connections: Arc<ConnectionManager>,
    retry: RetryPolicy,
    signer: WalletSigner,
    call: ContractCall,
    settings: BuilderSettings,
    key: OperationKey,
) -> AaResult<UserOperationResult> {
    // Build
    let client = connections.client(&signer).await?;
    let builder = connections.builder(&signer).await?;
    debug!("Building {} with {:?} gas payment", key, settings.paymaster.payment());
    let user_op = builder.build_user_operation(&call, &settings).await?;

    // Submit; only the send itself is retried
    let user_op_hash = with_retries(
        "submit user operation",
        || client.send_user_operation(&user_op),
        retry,
    )
    .await?;
    info!("Submitted {} as user operation {:?}", key, user_op_hash);

    // Wait for inclusion, then find the bundle transaction
    let receipt = client.wait_for_receipt(user_op_hash).await?;
    let transaction_hash = match receipt.transaction_hash() {
        Some(hash) => Some(hash),
        None => match client.lookup_transaction_hash(user_op_hash).await {
            Ok(hash) => hash,
            Err(e) => {
                warn!("Could not resolve transaction hash for {:?}: {}", user_op_hash, e);
                None
            }
        },
    };
    match transaction_hash {
        Some(hash) => info!("User operation {:?} included in {:?}", user_op_hash, hash),
        None => warn!("User operation {:?} included, transaction hash unknown", user_op_hash),
    }

    Ok(UserOperationResult {
        user_op_hash,
        transaction_hash,
        receipt: Some(receipt),
    })
}
