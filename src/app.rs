// src/app.rs
use std::sync::Arc;

use ethers::prelude::*;
use tracing::info;

use crate::account::{RpcAccountFactory, WalletSigner};
use crate::chain::{ArcadeQueries, ChainClient};
use crate::config::{ChainConfig, ClientSettings};
use crate::connection::ConnectionManager;
use crate::error::{AaError, AaResult};
use crate::executor::OperationExecutor;
use crate::operations::ArcadeOperations;
use crate::paymaster::{PaymasterRpcClient, PaymasterService};
use crate::tokens::TokenStore;

/// Everything needed to drive arcade operations against one network.
pub struct Arcade {
    pub config: Arc<ChainConfig>,
    pub settings: ClientSettings,
    pub provider: Arc<Provider<Http>>,
    pub connections: Arc<ConnectionManager>,
    pub operations: Arc<ArcadeOperations>,
    pub tokens: TokenStore,
    pub queries: ArcadeQueries<Provider<Http>>,
}

impl Arcade {
    pub fn new(config: ChainConfig, settings: ClientSettings) -> AaResult<Self> {
        config.validate()?;

        let config = Arc::new(config);

        // Chain provider shared by signers, stores and queries
        let provider = Provider::<Http>::try_from(config.rpc_url.as_str())
            .map_err(|e| AaError::InvalidConfig(format!("rpc url {}: {e}", config.rpc_url)))?;
        let provider = Arc::new(provider);

        // Remote services, then the per-signer session layer on top
        let paymaster: Arc<dyn PaymasterService> = Arc::new(PaymasterRpcClient::new(
            &config.paymaster_rpc,
            config.entry_point,
            settings.request_timeout,
        )?);
        let factory = RpcAccountFactory::new(Arc::clone(&config), settings.clone(), Arc::clone(&paymaster));
        let connections = Arc::new(ConnectionManager::new(Arc::new(factory), settings.use_cache));
        let executor = Arc::new(OperationExecutor::new(
            Arc::clone(&config),
            Arc::clone(&connections),
            settings.retry,
            settings.use_cache,
        ));
        let operations = Arc::new(ArcadeOperations::new(executor, config.contracts.clone()));
        let tokens = TokenStore::new(
            paymaster,
            Arc::new(ChainClient::new(Arc::clone(&provider))),
            Arc::clone(&connections),
            Arc::clone(&operations),
            config.paymaster_address,
            config.paymaster_api_key.clone(),
            settings.clone(),
        );
        let queries = ArcadeQueries::new(Arc::clone(&provider), config.contracts.clone());

        info!(
            "Arcade client ready on chain {} (bundler {}, paymaster {})",
            config.chain_id, config.bundler_rpc, config.paymaster_rpc
        );
        Ok(Self {
            config,
            settings,
            provider,
            connections,
            operations,
            tokens,
            queries,
        })
    }

    /// A signer for `private_key`, connected to this network.
    pub fn signer(&self, private_key: &str) -> AaResult<WalletSigner> {
        let bytes = hex::decode(private_key.trim().trim_start_matches("0x"))
            .map_err(|e| AaError::InvalidParameters(format!("private key: {e}")))?;
        let wallet = LocalWallet::from_bytes(&bytes)
            .map_err(|e| AaError::InvalidParameters(format!("private key: {e}")))?
            .with_chain_id(self.config.chain_id);
        Ok(WalletSigner::new(wallet, Arc::clone(&self.provider)))
    }

    /// Drop every cached session and all wallet-scoped store state, so the
    /// next signer starts from scratch.
    pub async fn disconnect(&self) {
        info!("Disconnecting wallet session");
        self.connections.invalidate_all().await;
        self.tokens.reset().await;
    }
}
