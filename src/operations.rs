// src/operations.rs
use std::sync::Arc;

use ethers::abi::AbiEncode;
use ethers::contract::{parse_log, EthLogDecode};
use ethers::types::{Address, U256};
use serde::Serialize;
use tracing::{info, warn};

use crate::account::WalletSigner;
use crate::config::ContractAddresses;
use crate::contracts::{erc20, game_hub, nft, tournament_hub};
use crate::error::AaResult;
use crate::executor::{OperationExecutor, OperationOptions};
use crate::paymaster::PaymentType;
use crate::types::{ContractCall, OperationKey, UserOperationResult};

/// How gas for a write is paid, plus per-call overrides.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GasPayment {
    pub payment: PaymentType,
    /// Fee token, required for prepay and postpay.
    pub token: Option<Address>,
    pub options: OperationOptions,
}

impl GasPayment {
    pub fn sponsored() -> Self {
        Self::default()
    }

    pub fn with_token(payment: PaymentType, token: Address) -> Self {
        Self {
            payment,
            token: Some(token),
            options: OperationOptions::default(),
        }
    }

    pub fn with_options(mut self, options: OperationOptions) -> Self {
        self.options = options;
        self
    }
}

/// Result of a write that creates an on-chain record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Created {
    /// Id decoded from the creation event, if the receipt carried it.
    pub id: Option<U256>,
    pub result: UserOperationResult,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTournament {
    pub name: String,
    pub entry_fee: U256,
    pub max_participants: U256,
    pub start_time: U256,
    pub end_time: U256,
    pub game_id: U256,
}

/// Arcade contract writes, each executed as a user operation from the
/// signer's smart account.
pub struct ArcadeOperations {
    executor: Arc<OperationExecutor>,
    contracts: ContractAddresses,
}

impl ArcadeOperations {
    pub fn new(executor: Arc<OperationExecutor>, contracts: ContractAddresses) -> Self {
        Self { executor, contracts }
    }

    async fn submit(
        &self,
        key: OperationKey,
        signer: &WalletSigner,
        call: ContractCall,
        gas: &GasPayment,
    ) -> AaResult<UserOperationResult> {
        self.executor
            .execute(key, signer, call, gas.payment, gas.token, &gas.options)
            .await
    }

    pub async fn mint_nft(
        &self,
        signer: &WalletSigner,
        to: Address,
        uri: &str,
        gas: &GasPayment,
    ) -> AaResult<UserOperationResult> {
        let key = OperationKey::new("mintNFT", signer.address()).with(to).with(uri).with(gas);
        let data = nft::MintCall {
            to,
            uri: uri.to_string(),
        }
        .encode();
        self.submit(key, signer, ContractCall::new(self.contracts.nft, data), gas).await
    }

    pub async fn mint_erc20_token(
        &self,
        signer: &WalletSigner,
        to: Address,
        amount: U256,
        gas: &GasPayment,
    ) -> AaResult<UserOperationResult> {
        let key = OperationKey::new("mintERC20Token", signer.address())
            .with(to)
            .with(amount)
            .with(gas);
        let data = erc20::MintCall { to, amount }.encode();
        self.submit(key, signer, ContractCall::new(self.contracts.token, data), gas).await
    }

    pub async fn transfer_erc20_token(
        &self,
        signer: &WalletSigner,
        token: Address,
        to: Address,
        amount: U256,
        gas: &GasPayment,
    ) -> AaResult<UserOperationResult> {
        let key = OperationKey::new("transferERC20Token", signer.address())
            .with(token)
            .with(to)
            .with(amount)
            .with(gas);
        let data = erc20::TransferCall { to, amount }.encode();
        self.submit(key, signer, ContractCall::new(token, data), gas).await
    }

    /// Approve `spender` to pull `token` from the smart account. Always paid
    /// by sponsorship: the token cannot pay for its own approval.
    pub async fn approve_aa_wallet_token(
        &self,
        signer: &WalletSigner,
        token: Address,
        spender: Address,
        amount: U256,
        options: &OperationOptions,
    ) -> AaResult<UserOperationResult> {
        let gas = GasPayment::sponsored().with_options(options.clone());
        let key = OperationKey::new("approveAAWalletToken", signer.address())
            .with(token)
            .with(spender)
            .with(amount)
            .with(&gas);
        let data = erc20::ApproveCall { spender, amount }.encode();
        self.submit(key, signer, ContractCall::new(token, data), &gas).await
    }

    pub async fn submit_game(
        &self,
        signer: &WalletSigner,
        title: &str,
        description: &str,
        game_url: &str,
        thumbnail_url: &str,
        gas: &GasPayment,
    ) -> AaResult<Created> {
        let key = OperationKey::new("submitGame", signer.address())
            .with(title)
            .with(description)
            .with(game_url)
            .with(thumbnail_url)
            .with(gas);
        let data = game_hub::SubmitGameCall {
            title: title.to_string(),
            description: description.to_string(),
            game_url: game_url.to_string(),
            thumbnail_url: thumbnail_url.to_string(),
        }
        .encode();
        let result = self
            .submit(key, signer, ContractCall::new(self.contracts.game_hub, data), gas)
            .await?;
        // New game id from the receipt logs
        let id = find_event::<game_hub::GameSubmittedFilter>(&result, self.contracts.game_hub)
            .map(|event| event.game_id);
        log_created("Game", id, &result);
        Ok(Created { id, result })
    }

    pub async fn claim_tokens(
        &self,
        signer: &WalletSigner,
        amount: U256,
        gas: &GasPayment,
    ) -> AaResult<UserOperationResult> {
        let key = OperationKey::new("claimTokens", signer.address()).with(amount).with(gas);
        let data = game_hub::ClaimTokensCall { amount }.encode();
        self.submit(key, signer, ContractCall::new(self.contracts.game_hub, data), gas)
            .await
    }

    pub async fn submit_points_claim(
        &self,
        signer: &WalletSigner,
        points: U256,
        gas: &GasPayment,
    ) -> AaResult<Created> {
        let key = OperationKey::new("submitPointsClaim", signer.address())
            .with(points)
            .with(gas);
        let data = game_hub::SubmitPointsClaimCall { points }.encode();
        let result = self
            .submit(key, signer, ContractCall::new(self.contracts.game_hub, data), gas)
            .await?;
        let id = find_event::<game_hub::PointsClaimSubmittedFilter>(&result, self.contracts.game_hub)
            .map(|event| event.claim_id);
        log_created("Points claim", id, &result);
        Ok(Created { id, result })
    }

    pub async fn approve_points_claim(
        &self,
        signer: &WalletSigner,
        claim_id: U256,
        gas: &GasPayment,
    ) -> AaResult<UserOperationResult> {
        let key = OperationKey::new("approvePointsClaim", signer.address())
            .with(claim_id)
            .with(gas);
        let data = game_hub::ApprovePointsClaimCall { claim_id }.encode();
        self.submit(key, signer, ContractCall::new(self.contracts.game_hub, data), gas)
            .await
    }

    pub async fn reject_points_claim(
        &self,
        signer: &WalletSigner,
        claim_id: U256,
        reason: &str,
        gas: &GasPayment,
    ) -> AaResult<UserOperationResult> {
        let key = OperationKey::new("rejectPointsClaim", signer.address())
            .with(claim_id)
            .with(reason)
            .with(gas);
        let data = game_hub::RejectPointsClaimCall {
            claim_id,
            reason: reason.to_string(),
        }
        .encode();
        self.submit(key, signer, ContractCall::new(self.contracts.game_hub, data), gas)
            .await
    }

    pub async fn apply_for_admin(
        &self,
        signer: &WalletSigner,
        reason: &str,
        gas: &GasPayment,
    ) -> AaResult<UserOperationResult> {
        let key = OperationKey::new("applyForAdmin", signer.address()).with(reason).with(gas);
        let data = game_hub::ApplyForAdminCall {
            reason: reason.to_string(),
        }
        .encode();
        self.submit(key, signer, ContractCall::new(self.contracts.game_hub, data), gas)
            .await
    }

    pub async fn stake_tokens(
        &self,
        signer: &WalletSigner,
        amount: U256,
        gas: &GasPayment,
    ) -> AaResult<UserOperationResult> {
        let key = OperationKey::new("stakeTokens", signer.address()).with(amount).with(gas);
        let data = game_hub::StakeTokensCall { amount }.encode();
        self.submit(key, signer, ContractCall::new(self.contracts.game_hub, data), gas)
            .await
    }

    pub async fn unstake_tokens(
        &self,
        signer: &WalletSigner,
        amount: U256,
        gas: &GasPayment,
    ) -> AaResult<UserOperationResult> {
        let key = OperationKey::new("unstakeTokens", signer.address()).with(amount).with(gas);
        let data = game_hub::UnstakeTokensCall { amount }.encode();
        self.submit(key, signer, ContractCall::new(self.contracts.game_hub, data), gas)
            .await
    }

    pub async fn create_tournament(
        &self,
        signer: &WalletSigner,
        tournament: &NewTournament,
        gas: &GasPayment,
    ) -> AaResult<Created> {
        let key = OperationKey::new("createTournament", signer.address())
            .with(tournament)
            .with(gas);
        let data = tournament_hub::CreateTournamentCall {
            name: tournament.name.clone(),
            entry_fee: tournament.entry_fee,
            max_participants: tournament.max_participants,
            start_time: tournament.start_time,
            end_time: tournament.end_time,
            game_id: tournament.game_id,
        }
        .encode();
        let hub = self.contracts.tournament_hub;
        let result = self.submit(key, signer, ContractCall::new(hub, data), gas).await?;
        let id = find_event::<tournament_hub::TournamentCreatedFilter>(&result, hub)
            .map(|event| event.tournament_id);
        log_created("Tournament", id, &result);
        Ok(Created { id, result })
    }

    /// Join a tournament, sending `entry_fee` in native currency with the call.
    pub async fn join_tournament(
        &self,
        signer: &WalletSigner,
        tournament_id: U256,
        entry_fee: U256,
        gas: &GasPayment,
    ) -> AaResult<UserOperationResult> {
        let key = OperationKey::new("joinTournament", signer.address())
            .with(tournament_id)
            .with(entry_fee)
            .with(gas);
        let data = tournament_hub::JoinTournamentCall { tournament_id }.encode();
        let call = ContractCall::new(self.contracts.tournament_hub, data).with_value(entry_fee);
        self.submit(key, signer, call, gas).await
    }

    pub async fn end_tournament(
        &self,
        signer: &WalletSigner,
        tournament_id: U256,
        winners: Vec<Address>,
        gas: &GasPayment,
    ) -> AaResult<UserOperationResult> {
        let key = OperationKey::new("endTournament", signer.address())
            .with(tournament_id)
            .with(&winners)
            .with(gas);
        let data = tournament_hub::EndTournamentCall { tournament_id, winners }.encode();
        self.submit(key, signer, ContractCall::new(self.contracts.tournament_hub, data), gas)
            .await
    }

    pub async fn finalize_tournament(
        &self,
        signer: &WalletSigner,
        tournament_id: U256,
        gas: &GasPayment,
    ) -> AaResult<UserOperationResult> {
        let key = OperationKey::new("finalizeTournament", signer.address())
            .with(tournament_id)
            .with(gas);
        let data = tournament_hub::FinalizeTournamentCall { tournament_id }.encode();
        self.submit(key, signer, ContractCall::new(self.contracts.tournament_hub, data), gas)
            .await
    }
}

/// First log emitted by `contract` that decodes as `E`.
fn find_event<E: EthLogDecode>(result: &UserOperationResult, contract: Address) -> Option<E> {
    result
        .logs()
        .iter()
        .filter(|log| log.address == contract)
        .find_map(|log| parse_log::<E>(log.clone()).ok())
}

fn log_created(what: &str, id: Option<U256>, result: &UserOperationResult) {
    match id {
        Some(id) => info!("{} {} created by user operation {:?}", what, id, result.user_op_hash),
        None => warn!(
            "{} created by user operation {:?} but no creation event was found",
            what, result.user_op_hash
        ),
    }
}

#[cfg(test)]
mod tests {
    use ethers::abi::{encode, AbiDecode, Token};
    use ethers::contract::EthEvent;
    use ethers::types::{Log, H256};

    use super::*;
    use crate::config::{test_config, ChainConfig};
    use crate::connection::ConnectionManager;
    use crate::contracts::account::ExecuteCall;
    use crate::retry::RetryPolicy;
    use crate::test_utils::{signer, FakeFactory};

    fn operations(factory: &Arc<FakeFactory>) -> (ArcadeOperations, ChainConfig) {
        let config = test_config();
        let connections = Arc::new(ConnectionManager::new(factory.clone(), true));
        let executor = Arc::new(OperationExecutor::new(
            Arc::new(config.clone()),
            connections,
            RetryPolicy::default(),
            true,
        ));
        (ArcadeOperations::new(executor, config.contracts.clone()), config)
    }

    fn sent_execute(factory: &FakeFactory, index: usize) -> ExecuteCall {
        ExecuteCall::decode(&factory.bundler.sent()[index].call_data).unwrap()
    }

    fn topic(id: u64) -> H256 {
        H256::from_low_u64_be(id)
    }

    fn address_topic(address: Address) -> H256 {
        H256::from(address)
    }

    #[tokio::test(start_paused = true)]
    async fn double_mint_submits_once() {
        let factory = Arc::new(FakeFactory::default());
        let (ops, _) = operations(&factory);
        let alice = signer(1);
        let recipient = Address::repeat_byte(0x55);
        let gas = GasPayment::sponsored();

        let (first, second) = tokio::join!(
            ops.mint_nft(&alice, recipient, "ipfs://token/1", &gas),
            ops.mint_nft(&alice, recipient, "ipfs://token/1", &gas)
        );
        let (first, second) = (first.unwrap(), second.unwrap());

        assert_eq!(factory.bundler.sends(), 1);
        assert_eq!(first.user_op_hash, second.user_op_hash);
        assert_eq!(first.transaction_hash, second.transaction_hash);
    }

    #[tokio::test(start_paused = true)]
    async fn mint_targets_the_nft_contract() {
        let factory = Arc::new(FakeFactory::default());
        let (ops, config) = operations(&factory);
        let alice = signer(1);
        let recipient = Address::repeat_byte(0x55);

        ops.mint_nft(&alice, recipient, "ipfs://x", &GasPayment::sponsored())
            .await
            .unwrap();

        let execute = sent_execute(&factory, 0);
        assert_eq!(execute.dest, config.contracts.nft);
        assert_eq!(execute.value, U256::zero());
        let inner = nft::MintCall::decode(&execute.func).unwrap();
        assert_eq!(inner.to, recipient);
        assert_eq!(inner.uri, "ipfs://x");
    }

    #[tokio::test(start_paused = true)]
    async fn different_payment_modes_are_different_operations() {
        let factory = Arc::new(FakeFactory::default());
        let (ops, _) = operations(&factory);
        let alice = signer(1);
        let token = Address::repeat_byte(0x77);

        let sponsored = GasPayment::sponsored();
        let prepay = GasPayment::with_token(PaymentType::Prepay, token);
        let (a, b) = tokio::join!(
            ops.claim_tokens(&alice, U256::from(10), &sponsored),
            ops.claim_tokens(&alice, U256::from(10), &prepay)
        );

        assert_ne!(a.unwrap().user_op_hash, b.unwrap().user_op_hash);
        assert_eq!(factory.bundler.sends(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn approval_is_always_sponsored() {
        let factory = Arc::new(FakeFactory::default());
        let (ops, config) = operations(&factory);
        let alice = signer(1);
        let token = Address::repeat_byte(0x77);

        ops.approve_aa_wallet_token(
            &alice,
            token,
            config.paymaster_address,
            U256::MAX,
            &OperationOptions::default().with_api_key("key"),
        )
        .await
        .unwrap();

        let seen = factory.settings_seen();
        assert_eq!(seen[0].paymaster.payment(), PaymentType::Sponsored);
        assert_eq!(seen[0].paymaster.token(), None);
        let execute = sent_execute(&factory, 0);
        assert_eq!(execute.dest, token);
        let approve = erc20::ApproveCall::decode(&execute.func).unwrap();
        assert_eq!(approve.spender, config.paymaster_address);
        assert_eq!(approve.amount, U256::MAX);
    }

    #[tokio::test(start_paused = true)]
    async fn submit_game_returns_the_new_game_id() {
        let factory = Arc::new(FakeFactory::default());
        let (ops, config) = operations(&factory);
        let alice = signer(1);
        factory.bundler.set_logs(vec![
            Log {
                address: config.contracts.nft,
                topics: vec![H256::repeat_byte(0x01)],
                ..Default::default()
            },
            Log {
                address: config.contracts.game_hub,
                topics: vec![
                    game_hub::GameSubmittedFilter::signature(),
                    topic(42),
                    address_topic(Address::repeat_byte(0x33)),
                ],
                data: encode(&[Token::String("Snake".to_string())]).into(),
                ..Default::default()
            },
        ]);

        let created = ops
            .submit_game(&alice, "Snake", "Eat apples", "https://snake", "https://snake/t.png", &GasPayment::sponsored())
            .await
            .unwrap();

        assert_eq!(created.id, Some(U256::from(42)));
        let inner = game_hub::SubmitGameCall::decode(&sent_execute(&factory, 0).func).unwrap();
        assert_eq!(inner.game_url, "https://snake");
    }

    #[tokio::test(start_paused = true)]
    async fn missing_creation_event_is_not_an_error() {
        let factory = Arc::new(FakeFactory::default());
        let (ops, _) = operations(&factory);
        let alice = signer(1);

        let created = ops
            .submit_points_claim(&alice, U256::from(500), &GasPayment::sponsored())
            .await
            .unwrap();

        assert_eq!(created.id, None);
        assert_eq!(factory.bundler.sends(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn create_tournament_decodes_the_id() {
        let factory = Arc::new(FakeFactory::default());
        let (ops, config) = operations(&factory);
        let alice = signer(1);
        factory.bundler.set_logs(vec![Log {
            address: config.contracts.tournament_hub,
            topics: vec![
                tournament_hub::TournamentCreatedFilter::signature(),
                topic(7),
                address_topic(alice.address()),
            ],
            data: encode(&[Token::String("Weekly".to_string())]).into(),
            ..Default::default()
        }]);
        let tournament = NewTournament {
            name: "Weekly".to_string(),
            entry_fee: U256::from(100),
            max_participants: U256::from(16),
            start_time: U256::from(1_700_000_000u64),
            end_time: U256::from(1_700_086_400u64),
            game_id: U256::from(42),
        };

        let created = ops
            .create_tournament(&alice, &tournament, &GasPayment::sponsored())
            .await
            .unwrap();

        assert_eq!(created.id, Some(U256::from(7)));
    }

    #[tokio::test(start_paused = true)]
    async fn join_sends_the_entry_fee() {
        let factory = Arc::new(FakeFactory::default());
        let (ops, config) = operations(&factory);
        let alice = signer(1);

        ops.join_tournament(&alice, U256::from(7), U256::from(100), &GasPayment::sponsored())
            .await
            .unwrap();

        let execute = sent_execute(&factory, 0);
        assert_eq!(execute.dest, config.contracts.tournament_hub);
        assert_eq!(execute.value, U256::from(100));
        let inner = tournament_hub::JoinTournamentCall::decode(&execute.func).unwrap();
        assert_eq!(inner.tournament_id, U256::from(7));
    }

    #[tokio::test(start_paused = true)]
    async fn end_tournament_encodes_winners() {
        let factory = Arc::new(FakeFactory::default());
        let (ops, _) = operations(&factory);
        let alice = signer(1);
        let winners = vec![Address::repeat_byte(0x0a), Address::repeat_byte(0x0b)];

        ops.end_tournament(&alice, U256::from(7), winners.clone(), &GasPayment::sponsored())
            .await
            .unwrap();

        let inner = tournament_hub::EndTournamentCall::decode(&sent_execute(&factory, 0).func).unwrap();
        assert_eq!(inner.winners, winners);
    }

    #[tokio::test(start_paused = true)]
    async fn transfer_targets_the_given_token() {
        let factory = Arc::new(FakeFactory::default());
        let (ops, _) = operations(&factory);
        let alice = signer(1);
        let token = Address::repeat_byte(0x77);
        let to = Address::repeat_byte(0x66);

        ops.transfer_erc20_token(&alice, token, to, U256::from(9), &GasPayment::sponsored())
            .await
            .unwrap();

        let execute = sent_execute(&factory, 0);
        assert_eq!(execute.dest, token);
        let inner = erc20::TransferCall::decode(&execute.func).unwrap();
        assert_eq!(inner.to, to);
        assert_eq!(inner.amount, U256::from(9));
    }
}
