// src/account.rs
use std::sync::Arc;

use async_trait::async_trait;
use ethers::abi::AbiEncode;
use ethers::prelude::*;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::bundler::{BundlerClient, RpcBundlerClient};
use crate::config::{ChainConfig, ClientSettings};
use crate::contracts::account::{CreateAccountCall, EntryPoint, ExecuteCall, SimpleAccountFactory};
use crate::error::{AaError, AaResult};
use crate::gas::GasParameters;
use crate::paymaster::{PaymasterOptions, PaymasterRpcClient, PaymasterService};
use crate::types::{ContractCall, UserOperation};

/// Same length as a real ECDSA signature so the paymaster can estimate
/// verification gas before the owner signs.
pub const DUMMY_SIGNATURE: &str = "0xfffffffffffffffffffffffffffffff0000000000000000000000000000000007aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa1c";

/// The owner key handed over by the wallet layer, plus the chain connection
/// it was created with. A signer without a provider is not connected.
#[derive(Clone, Debug)]
pub struct WalletSigner {
    wallet: LocalWallet,
    provider: Option<Arc<Provider<Http>>>,
}

impl WalletSigner {
    pub fn new(wallet: LocalWallet, provider: Arc<Provider<Http>>) -> Self {
        Self {
            wallet,
            provider: Some(provider),
        }
    }

    pub fn disconnected(wallet: LocalWallet) -> Self {
        Self { wallet, provider: None }
    }

    pub fn address(&self) -> Address {
        self.wallet.address()
    }

    pub fn wallet(&self) -> &LocalWallet {
        &self.wallet
    }

    pub fn is_connected(&self) -> bool {
        self.provider.is_some()
    }

    pub fn provider(&self) -> AaResult<Arc<Provider<Http>>> {
        self.provider.clone().ok_or(AaError::SignerNotConnected)
    }
}

/// Per-call gas and paymaster configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuilderSettings {
    pub gas: GasParameters,
    pub paymaster: PaymasterOptions,
}

/// Assembles and signs user operations for one smart account.
#[async_trait]
pub trait AccountBuilder: Send + Sync {
    /// The smart account address.
    async fn sender(&self) -> AaResult<Address>;

    async fn build_user_operation(&self, call: &ContractCall, settings: &BuilderSettings) -> AaResult<UserOperation>;
}

/// Creates bundler clients and account builders for a signer.
#[async_trait]
pub trait AccountFactory: Send + Sync {
    async fn create_client(&self, signer: &WalletSigner) -> AaResult<Arc<dyn BundlerClient>>;

    async fn create_builder(&self, signer: &WalletSigner) -> AaResult<Arc<dyn AccountBuilder>>;
}

/// Builder for eth-infinitism `SimpleAccount`s deployed through
/// `SimpleAccountFactory`.
pub struct SimpleAccountBuilder {
    owner: LocalWallet,
    provider: Arc<Provider<Http>>,
    entry_point: Address,
    factory: Address,
    chain_id: u64,
    salt: U256,
    paymaster: Arc<dyn PaymasterService>,
    paymaster_rpc: String,
    request_timeout: std::time::Duration,
    sender: OnceCell<Address>,
}

impl SimpleAccountBuilder {
    pub fn new(
        signer: &WalletSigner,
        config: &ChainConfig,
        settings: &ClientSettings,
        paymaster: Arc<dyn PaymasterService>,
    ) -> AaResult<Self> {
        Ok(Self {
            owner: signer.wallet().clone(),
            provider: signer.provider()?,
            entry_point: config.entry_point,
            factory: config.account_factory,
            chain_id: config.chain_id,
            salt: U256::zero(),
            paymaster,
            paymaster_rpc: config.paymaster_rpc.clone(),
            request_timeout: settings.request_timeout,
            sender: OnceCell::new(),
        })
    }

    async fn init_code(&self, sender: Address) -> AaResult<Bytes> {
        let code = self
            .provider
            .get_code(sender, None)
            .await
            .map_err(AaError::provider)?;
        if !code.is_empty() {
            return Ok(Bytes::default());
        }
        debug!("Smart account {:?} not deployed yet, attaching initCode", sender);
        let mut init_code = self.factory.as_bytes().to_vec();
        init_code.extend(
            CreateAccountCall {
                owner: self.owner.address(),
                salt: self.salt,
            }
            .encode(),
        );
        Ok(init_code.into())
    }

    async fn nonce(&self, sender: Address) -> AaResult<U256> {
        EntryPoint::new(self.entry_point, Arc::clone(&self.provider))
            .get_nonce(sender, U256::zero())
            .call()
            .await
            .map_err(AaError::provider)
    }

    fn paymaster_for(&self, rpc: &str) -> AaResult<Arc<dyn PaymasterService>> {
        if rpc.is_empty() || rpc == self.paymaster_rpc {
            return Ok(Arc::clone(&self.paymaster));
        }
        Ok(Arc::new(PaymasterRpcClient::new(
            rpc,
            self.entry_point,
            self.request_timeout,
        )?))
    }
}

/// Encode `SimpleAccount.execute(dest, value, func)`.
pub fn execute_call_data(call: &ContractCall) -> Bytes {
    ExecuteCall {
        dest: call.to,
        value: call.value,
        func: call.data.clone(),
    }
    .encode()
    .into()
}

/// Sign the ERC-4337 hash of `user_op` the way `SimpleAccount` verifies it
/// (EIP-191 personal message over the 32-byte hash).
pub async fn sign_user_operation(
    owner: &LocalWallet,
    user_op: &mut UserOperation,
    entry_point: Address,
    chain_id: u64,
) -> AaResult<()> {
    let hash = user_op.hash(entry_point, chain_id);
    let signature = owner
        .sign_message(hash.as_bytes())
        .await
        .map_err(|e| AaError::Signing(e.to_string()))?;
    user_op.signature = signature.to_vec().into();
    Ok(())
}

#[async_trait]
impl AccountBuilder for SimpleAccountBuilder {
    async fn sender(&self) -> AaResult<Address> {
        self.sender
            .get_or_try_init(|| async {
                let sender = SimpleAccountFactory::new(self.factory, Arc::clone(&self.provider))
                    .get_address(self.owner.address(), self.salt)
                    .call()
                    .await
                    .map_err(AaError::provider)?;
                info!("Smart account for {:?} is {:?}", self.owner.address(), sender);
                Ok::<_, AaError>(sender)
            })
            .await
            .copied()
    }

    async fn build_user_operation(&self, call: &ContractCall, settings: &BuilderSettings) -> AaResult<UserOperation> {
        // Resolve account state
        let sender = self.sender().await?;
        let (init_code, nonce) = tokio::try_join!(self.init_code(sender), self.nonce(sender))?;

        let mut user_op = UserOperation {
            sender,
            nonce,
            init_code,
            call_data: execute_call_data(call),
            signature: DUMMY_SIGNATURE
                .parse::<Bytes>()
                .map_err(|e| AaError::Internal(format!("dummy signature: {e}")))?,
            ..Default::default()
        }
        .with_gas(&settings.gas);

        // Sponsorship may rewrite gas fields, so it has to land before signing
        let sponsored = self
            .paymaster_for(settings.paymaster.rpc())?
            .sponsor(user_op.clone(), settings.paymaster.clone())
            .await?;
        user_op.apply_sponsorship(&sponsored);

        sign_user_operation(&self.owner, &mut user_op, self.entry_point, self.chain_id).await?;
        debug!("Built user operation for {:?} with nonce {}", sender, nonce);
        Ok(user_op)
    }
}

/// Builds JSON-RPC backed clients and `SimpleAccount` builders from the chain
/// configuration.
pub struct RpcAccountFactory {
    config: Arc<ChainConfig>,
    settings: ClientSettings,
    paymaster: Arc<dyn PaymasterService>,
}

impl RpcAccountFactory {
    pub fn new(config: Arc<ChainConfig>, settings: ClientSettings, paymaster: Arc<dyn PaymasterService>) -> Self {
        Self {
            config,
            settings,
            paymaster,
        }
    }
}

#[async_trait]
impl AccountFactory for RpcAccountFactory {
    async fn create_client(&self, signer: &WalletSigner) -> AaResult<Arc<dyn BundlerClient>> {
        signer.provider()?;
        info!("Connecting bundler client to {}", self.config.bundler_rpc);
        let client = RpcBundlerClient::new(
            &self.config.bundler_rpc,
            self.config.entry_point,
            self.settings.request_timeout,
            self.settings.receipt_poll_interval,
            self.settings.receipt_timeout,
        )?;
        Ok(Arc::new(client))
    }

    async fn create_builder(&self, signer: &WalletSigner) -> AaResult<Arc<dyn AccountBuilder>> {
        info!("Initializing smart account builder for {:?}", signer.address());
        let builder = SimpleAccountBuilder::new(
            signer,
            &self.config,
            &self.settings,
            Arc::clone(&self.paymaster),
        )?;
        Ok(Arc::new(builder))
    }
}
