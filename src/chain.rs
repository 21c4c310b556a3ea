// src/chain.rs
//! Read-only chain access: balances, allowances, gas price and arcade
//! contract views.

use std::sync::Arc;

use async_trait::async_trait;
use ethers::contract::ContractError;
use ethers::providers::Middleware;
use ethers::types::{Address, U256};
#[cfg(test)]
use mockall::automock;
use tracing::debug;

use crate::config::ContractAddresses;
use crate::contracts::erc20::Erc20;
use crate::contracts::nft::ArcadeNft;
use crate::contracts::tournament_hub::TournamentHub;
use crate::error::{AaError, AaResult};

#[cfg_attr(test, automock)]
#[async_trait]
pub trait ChainReader: Send + Sync {
    async fn native_balance(&self, account: Address) -> AaResult<U256>;

    async fn token_balance(&self, token: Address, account: Address) -> AaResult<U256>;

    async fn token_allowance(&self, token: Address, owner: Address, spender: Address) -> AaResult<U256>;

    async fn gas_price(&self) -> AaResult<U256>;
}

pub struct ChainClient<M> {
    provider: Arc<M>,
}

impl<M: Middleware + 'static> ChainClient<M> {
    pub fn new(provider: Arc<M>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl<M: Middleware + 'static> ChainReader for ChainClient<M> {
    async fn native_balance(&self, account: Address) -> AaResult<U256> {
        self.provider
            .get_balance(account, None)
            .await
            .map_err(AaError::provider)
    }

    async fn token_balance(&self, token: Address, account: Address) -> AaResult<U256> {
        Erc20::new(token, Arc::clone(&self.provider))
            .balance_of(account)
            .call()
            .await
            .map_err(contract_error)
    }

    async fn token_allowance(&self, token: Address, owner: Address, spender: Address) -> AaResult<U256> {
        let allowance = Erc20::new(token, Arc::clone(&self.provider))
            .allowance(owner, spender)
            .call()
            .await
            .map_err(contract_error)?;
        debug!("Allowance of {:?} on {:?} for {:?}: {}", spender, token, owner, allowance);
        Ok(allowance)
    }

    async fn gas_price(&self) -> AaResult<U256> {
        self.provider.get_gas_price().await.map_err(AaError::provider)
    }
}

/// Undecodable return data is an ABI error; everything else is the
/// provider's.
fn contract_error<M: Middleware>(err: ContractError<M>) -> AaError {
    match err {
        ContractError::DecodingError(e) => AaError::Abi(e.to_string()),
        ContractError::AbiError(e) => AaError::Abi(e.to_string()),
        ContractError::DetokenizationError(e) => AaError::Abi(e.to_string()),
        other => AaError::provider(other),
    }
}

/// View calls against the arcade contracts.
pub struct ArcadeQueries<M> {
    provider: Arc<M>,
    contracts: ContractAddresses,
}

impl<M: Middleware + 'static> ArcadeQueries<M> {
    pub fn new(provider: Arc<M>, contracts: ContractAddresses) -> Self {
        Self { provider, contracts }
    }

    fn nft(&self) -> ArcadeNft<M> {
        ArcadeNft::new(self.contracts.nft, Arc::clone(&self.provider))
    }

    fn tournaments(&self) -> TournamentHub<M> {
        TournamentHub::new(self.contracts.tournament_hub, Arc::clone(&self.provider))
    }

    pub async fn nft_total_supply(&self) -> AaResult<U256> {
        self.nft().total_supply().call().await.map_err(contract_error)
    }

    pub async fn nft_owner_of(&self, token_id: U256) -> AaResult<Address> {
        self.nft().owner_of(token_id).call().await.map_err(contract_error)
    }

    pub async fn nft_token_uri(&self, token_id: U256) -> AaResult<String> {
        self.nft().token_uri(token_id).call().await.map_err(contract_error)
    }

    /// Decimals of `token`, or of the arcade token when `None`.
    pub async fn token_decimals(&self, token: Option<Address>) -> AaResult<u8> {
        Erc20::new(token.unwrap_or(self.contracts.token), Arc::clone(&self.provider))
            .decimals()
            .call()
            .await
            .map_err(contract_error)
    }

    pub async fn tournament_participants(&self, tournament_id: U256) -> AaResult<Vec<Address>> {
        self.tournaments()
            .get_participants(tournament_id)
            .call()
            .await
            .map_err(contract_error)
    }

    pub async fn tournament_prize_pool(&self, tournament_id: U256) -> AaResult<U256> {
        self.tournaments()
            .get_prize_pool(tournament_id)
            .call()
            .await
            .map_err(contract_error)
    }
}
