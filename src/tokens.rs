// src/tokens.rs
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use ethers::types::{Address, U256};
use futures::future::join_all;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::account::WalletSigner;
use crate::cache::ThrottledRequests;
use crate::chain::ChainReader;
use crate::config::ClientSettings;
use crate::connection::ConnectionManager;
use crate::error::{AaError, AaResult};
use crate::executor::OperationOptions;
use crate::operations::ArcadeOperations;
use crate::paymaster::PaymasterService;
use crate::types::{SupportedToken, TokenType, UserOperationResult};

const GAS_PRICE_KEY: &str = "gasPrice";

/// Allowance and approval entries are keyed by `(smart account, token)`.
pub type WalletToken = (Address, Address);

#[derive(Default)]
struct TokenCache {
    /// Smart account the list and refresh count belong to.
    account: Option<Address>,
    tokens: Vec<SupportedToken>,
    fetched_at: Option<Instant>,
    refreshes: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WalletBalances {
    pub account: Address,
    pub native: U256,
    /// Balances for every token whose read succeeded.
    pub tokens: HashMap<Address, U256>,
}

/// Point-in-time copy of everything the store knows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreSnapshot {
    pub tokens: Vec<SupportedToken>,
    pub token_refreshes: u32,
    pub balances: Option<WalletBalances>,
    pub allowances: HashMap<WalletToken, U256>,
    pub approved: HashSet<WalletToken>,
    pub gas_price: Option<U256>,
}

#[derive(Default)]
struct StoreState {
    balances: Option<WalletBalances>,
    allowances: HashMap<WalletToken, U256>,
    approved: HashSet<WalletToken>,
    gas_price: Option<U256>,
}

/// Supported gas tokens, balances, paymaster allowances and gas price for the
/// connected wallet.
pub struct TokenStore {
    paymaster: Arc<dyn PaymasterService>,
    chain: Arc<dyn ChainReader>,
    connections: Arc<ConnectionManager>,
    operations: Arc<ArcadeOperations>,
    spender: Address,
    api_key: String,
    settings: ClientSettings,
    // Held across the paymaster call so concurrent refreshes collapse.
    tokens: tokio::sync::Mutex<TokenCache>,
    state: Mutex<StoreState>,
    balance_reads: ThrottledRequests<Address, WalletBalances>,
    gas_price_reads: ThrottledRequests<&'static str, U256>,
}

impl TokenStore {
    pub fn new(
        paymaster: Arc<dyn PaymasterService>,
        chain: Arc<dyn ChainReader>,
        connections: Arc<ConnectionManager>,
        operations: Arc<ArcadeOperations>,
        spender: Address,
        api_key: String,
        settings: ClientSettings,
    ) -> Self {
        Self {
            paymaster,
            chain,
            connections,
            operations,
            spender,
            api_key,
            settings,
            tokens: tokio::sync::Mutex::new(TokenCache::default()),
            state: Mutex::new(StoreState::default()),
            balance_reads: ThrottledRequests::new(),
            gas_price_reads: ThrottledRequests::new(),
        }
    }

    /// Tokens the paymaster accepts for gas. Served from cache within
    /// `token_cache_time`; once `max_token_refreshes` fetches have been made
    /// only the cached list is returned. A different wallet starts a fresh
    /// list and refresh count.
    pub async fn supported_tokens(&self, signer: &WalletSigner) -> AaResult<Vec<SupportedToken>> {
        let sender = self.connections.wallet_address(signer).await?;
        let mut cache = self.tokens.lock().await;
        if cache.account != Some(sender) {
            if let Some(previous) = cache.account {
                info!("Wallet changed from {:?} to {:?}, dropping token list", previous, sender);
            }
            *cache = TokenCache {
                account: Some(sender),
                ..Default::default()
            };
        }
        if self.settings.use_cache {
            if let Some(fetched_at) = cache.fetched_at {
                if fetched_at.elapsed() < self.settings.token_cache_time {
                    debug!("Serving {} cached tokens", cache.tokens.len());
                    return Ok(cache.tokens.clone());
                }
            }
        }
        if cache.refreshes >= self.settings.max_token_refreshes {
            debug!(
                "Token refresh limit of {} reached, serving cached list",
                self.settings.max_token_refreshes
            );
            return Ok(cache.tokens.clone());
        }

        cache.refreshes += 1;
        match self.paymaster.supported_tokens(sender, self.api_key.clone()).await {
            Ok(tokens) => {
                info!("Loaded {} supported tokens (refresh {})", tokens.len(), cache.refreshes);
                cache.tokens = tokens;
                cache.fetched_at = Some(Instant::now());
                Ok(cache.tokens.clone())
            }
            Err(e) if cache.fetched_at.is_some() => {
                warn!("Token refresh failed, keeping cached list: {}", e);
                Ok(cache.tokens.clone())
            }
            Err(e) => Err(e),
        }
    }

    /// Native and token balances of the signer's smart account. Token reads
    /// run concurrently; a failed token read is logged and left out.
    pub async fn load_balances(&self, signer: &WalletSigner) -> AaResult<WalletBalances> {
        let account = self.connections.wallet_address(signer).await?;
        let tokens: Vec<Address> = self
            .supported_tokens(signer)
            .await?
            .into_iter()
            .filter(|token| token.token_type != TokenType::Native)
            .map(|token| token.address)
            .collect();

        // Native and token balances in parallel
        let chain = Arc::clone(&self.chain);
        let read = move || async move {
            let token_reads = tokens.iter().map(|&token| {
                let chain = Arc::clone(&chain);
                async move { (token, chain.token_balance(token, account).await) }
            });
            let (native, token_results) = tokio::join!(chain.native_balance(account), join_all(token_reads));
            let mut balances = WalletBalances {
                account,
                native: native?,
                tokens: HashMap::new(),
            };
            for (token, result) in token_results {
                match result {
                    Ok(balance) => {
                        balances.tokens.insert(token, balance);
                    }
                    Err(e) => warn!("Balance of {:?} for {:?} unavailable: {}", token, account, e),
                }
            }
            Ok::<_, AaError>(balances)
        };

        let balances = if self.settings.use_cache {
            self.balance_reads
                .request(account, read, self.settings.balance_cache_time)
                .await?
        } else {
            read().await?
        };
        self.state.lock().balances = Some(balances.clone());
        Ok(balances)
    }

    /// Current allowance the paymaster holds over the smart account's `token`.
    pub async fn allowance(&self, signer: &WalletSigner, token: Address) -> AaResult<U256> {
        let account = self.connections.wallet_address(signer).await?;
        let allowance = self.chain.token_allowance(token, account, self.spender).await?;
        self.state.lock().allowances.insert((account, token), allowance);
        Ok(allowance)
    }

    /// Make sure the paymaster may pull at least `required` of `token`. Sends a
    /// sponsored unlimited approval when it may not, and returns its result.
    pub async fn ensure_approved(
        &self,
        signer: &WalletSigner,
        token: Address,
        required: U256,
        options: &OperationOptions,
    ) -> AaResult<Option<UserOperationResult>> {
        let account = self.connections.wallet_address(signer).await?;
        let current = self.allowance(signer, token).await?;
        if current >= required {
            self.state.lock().approved.insert((account, token));
            return Ok(None);
        }

        // Short: sponsored unlimited approval
        info!("Approving paymaster {:?} to spend {:?}", self.spender, token);
        let result = self
            .operations
            .approve_aa_wallet_token(signer, token, self.spender, U256::MAX, options)
            .await?;
        {
            let mut state = self.state.lock();
            state.approved.insert((account, token));
            state.allowances.insert((account, token), U256::MAX);
        }
        Ok(Some(result))
    }

    /// Whether `token` was approved for the smart account `account`.
    pub fn is_approved(&self, account: Address, token: Address) -> bool {
        self.state.lock().approved.contains(&(account, token))
    }

    /// Network gas price, shared between callers within `gas_price_cache_time`.
    pub async fn gas_price(&self) -> AaResult<U256> {
        let chain = Arc::clone(&self.chain);
        let read = move || async move { chain.gas_price().await };
        let price = if self.settings.use_cache {
            self.gas_price_reads
                .request(GAS_PRICE_KEY, read, self.settings.gas_price_cache_time)
                .await?
        } else {
            read().await?
        };
        self.state.lock().gas_price = Some(price);
        Ok(price)
    }

    /// Forget everything, including the refresh count.
    pub async fn reset(&self) {
        *self.tokens.lock().await = TokenCache::default();
        *self.state.lock() = StoreState::default();
    }

    pub async fn snapshot(&self) -> StoreSnapshot {
        let (tokens, token_refreshes) = {
            let cache = self.tokens.lock().await;
            (cache.tokens.clone(), cache.refreshes)
        };
        let state = self.state.lock();
        StoreSnapshot {
            tokens,
            token_refreshes,
            balances: state.balances.clone(),
            allowances: state.allowances.clone(),
            approved: state.approved.clone(),
            gas_price: state.gas_price,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::chain::MockChainReader;
    use crate::config::test_config;
    use crate::executor::OperationExecutor;
    use crate::paymaster::{MockPaymasterService, PaymentType};
    use crate::retry::RetryPolicy;
    use crate::test_utils::{signer, smart_account_of, FakeFactory};

    fn token(byte: u8, symbol: &str) -> SupportedToken {
        SupportedToken {
            address: Address::repeat_byte(byte),
            symbol: symbol.to_string(),
            decimals: 18,
            token_type: TokenType::System,
            price: 1.0,
        }
    }

    fn native() -> SupportedToken {
        SupportedToken {
            address: Address::zero(),
            symbol: "NERO".to_string(),
            decimals: 18,
            token_type: TokenType::Native,
            price: 1.0,
        }
    }

    struct Harness {
        factory: Arc<FakeFactory>,
        store: TokenStore,
    }

    fn harness(paymaster: MockPaymasterService, chain: MockChainReader, settings: ClientSettings) -> Harness {
        let config = test_config();
        let factory = Arc::new(FakeFactory::default());
        let connections = Arc::new(ConnectionManager::new(factory.clone(), true));
        let executor = Arc::new(OperationExecutor::new(
            Arc::new(config.clone()),
            Arc::clone(&connections),
            RetryPolicy::default(),
            true,
        ));
        let operations = Arc::new(ArcadeOperations::new(executor, config.contracts.clone()));
        let store = TokenStore::new(
            Arc::new(paymaster),
            Arc::new(chain),
            connections,
            operations,
            config.paymaster_address,
            "api-key".to_string(),
            settings,
        );
        Harness { factory, store }
    }

    fn settings(max_token_refreshes: u32) -> ClientSettings {
        ClientSettings {
            token_cache_time: Duration::from_secs(60),
            max_token_refreshes,
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn tokens_are_cached_for_the_ttl() {
        let alice = signer(1);
        let sender = smart_account_of(alice.address());
        let mut paymaster = MockPaymasterService::new();
        paymaster
            .expect_supported_tokens()
            .withf(move |s, key| *s == sender && key == "api-key")
            .times(2)
            .returning(|_, _| Ok(vec![token(0x77, "DAI")]));
        let h = harness(paymaster, MockChainReader::new(), settings(5));

        let first = h.store.supported_tokens(&alice).await.unwrap();
        let second = h.store.supported_tokens(&alice).await.unwrap();
        assert_eq!(first, second);

        tokio::time::advance(Duration::from_secs(61)).await;
        h.store.supported_tokens(&alice).await.unwrap();

        assert_eq!(h.store.snapshot().await.token_refreshes, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_cap_serves_the_cached_list() {
        let alice = signer(1);
        let mut paymaster = MockPaymasterService::new();
        paymaster
            .expect_supported_tokens()
            .times(1)
            .returning(|_, _| Ok(vec![token(0x77, "DAI")]));
        let h = harness(paymaster, MockChainReader::new(), settings(1));

        let (a, b, c) = tokio::join!(
            h.store.supported_tokens(&alice),
            h.store.supported_tokens(&alice),
            h.store.supported_tokens(&alice)
        );
        assert_eq!(a.unwrap(), vec![token(0x77, "DAI")]);
        assert_eq!(b.unwrap(), vec![token(0x77, "DAI")]);
        assert_eq!(c.unwrap(), vec![token(0x77, "DAI")]);

        // Stale, but the cap forbids another fetch.
        tokio::time::advance(Duration::from_secs(120)).await;
        assert_eq!(h.store.supported_tokens(&alice).await.unwrap(), vec![token(0x77, "DAI")]);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_refresh_falls_back_to_the_cached_list() {
        let alice = signer(1);
        let mut paymaster = MockPaymasterService::new();
        let mut seq = mockall::Sequence::new();
        paymaster
            .expect_supported_tokens()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(vec![token(0x77, "DAI")]));
        paymaster
            .expect_supported_tokens()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Err(AaError::Paymaster("down".to_string())));
        let h = harness(paymaster, MockChainReader::new(), settings(5));

        h.store.supported_tokens(&alice).await.unwrap();
        tokio::time::advance(Duration::from_secs(61)).await;

        assert_eq!(h.store.supported_tokens(&alice).await.unwrap(), vec![token(0x77, "DAI")]);
    }

    #[tokio::test(start_paused = true)]
    async fn first_fetch_failure_propagates() {
        let alice = signer(1);
        let mut paymaster = MockPaymasterService::new();
        paymaster
            .expect_supported_tokens()
            .returning(|_, _| Err(AaError::Paymaster("down".to_string())));
        let h = harness(paymaster, MockChainReader::new(), settings(5));

        assert_eq!(
            h.store.supported_tokens(&alice).await,
            Err(AaError::Paymaster("down".to_string()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn balances_cover_every_token() {
        let alice = signer(1);
        let account = smart_account_of(alice.address());
        let mut paymaster = MockPaymasterService::new();
        paymaster
            .expect_supported_tokens()
            .returning(|_, _| Ok(vec![native(), token(0x77, "DAI"), token(0x78, "USDT")]));
        let mut chain = MockChainReader::new();
        chain
            .expect_native_balance()
            .withf(move |a| *a == account)
            .times(1)
            .returning(|_| Ok(U256::from(5)));
        chain
            .expect_token_balance()
            .times(2)
            .returning(|token, _| {
                if token == Address::repeat_byte(0x77) {
                    Ok(U256::from(100))
                } else {
                    Err(AaError::Provider("reverted".to_string()))
                }
            });
        let h = harness(paymaster, chain, settings(5));

        let balances = h.store.load_balances(&alice).await.unwrap();
        // Served from the throttled read.
        let again = h.store.load_balances(&alice).await.unwrap();

        assert_eq!(balances.native, U256::from(5));
        assert_eq!(balances.tokens.get(&Address::repeat_byte(0x77)), Some(&U256::from(100)));
        assert!(!balances.tokens.contains_key(&Address::repeat_byte(0x78)));
        assert_eq!(balances, again);
        assert_eq!(h.store.snapshot().await.balances, Some(balances));
    }

    #[tokio::test(start_paused = true)]
    async fn insufficient_allowance_sends_a_sponsored_approval() {
        let alice = signer(1);
        let dai = Address::repeat_byte(0x77);
        let mut chain = MockChainReader::new();
        chain.expect_token_allowance().returning(|_, _, _| Ok(U256::zero()));
        let h = harness(MockPaymasterService::new(), chain, settings(5));

        let result = h
            .store
            .ensure_approved(&alice, dai, U256::from(10), &OperationOptions::default())
            .await
            .unwrap();

        let account = smart_account_of(alice.address());
        assert!(result.is_some());
        assert!(h.store.is_approved(account, dai));
        assert_eq!(h.factory.bundler.sends(), 1);
        assert_eq!(h.factory.settings_seen()[0].paymaster.payment(), PaymentType::Sponsored);
        assert_eq!(h.store.snapshot().await.allowances.get(&(account, dai)), Some(&U256::MAX));
    }

    #[tokio::test(start_paused = true)]
    async fn sufficient_allowance_sends_nothing() {
        let alice = signer(1);
        let dai = Address::repeat_byte(0x77);
        let spender = test_config().paymaster_address;
        let mut chain = MockChainReader::new();
        chain
            .expect_token_allowance()
            .withf(move |token, _, s| *token == dai && *s == spender)
            .returning(|_, _, _| Ok(U256::from(1_000)));
        let h = harness(MockPaymasterService::new(), chain, settings(5));

        let result = h
            .store
            .ensure_approved(&alice, dai, U256::from(10), &OperationOptions::default())
            .await
            .unwrap();

        assert!(result.is_none());
        assert!(h.store.is_approved(smart_account_of(alice.address()), dai));
        assert_eq!(h.factory.bundler.sends(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn gas_price_reads_are_throttled() {
        let mut chain = MockChainReader::new();
        chain.expect_gas_price().times(2).returning(|| Ok(U256::from(7)));
        let h = harness(MockPaymasterService::new(), chain, settings(5));

        assert_eq!(h.store.gas_price().await.unwrap(), U256::from(7));
        assert_eq!(h.store.gas_price().await.unwrap(), U256::from(7));
        tokio::time::advance(Duration::from_secs(16)).await;
        h.store.gas_price().await.unwrap();

        assert_eq!(h.store.snapshot().await.gas_price, Some(U256::from(7)));
    }

    #[tokio::test(start_paused = true)]
    async fn reset_clears_the_refresh_count() {
        let alice = signer(1);
        let mut paymaster = MockPaymasterService::new();
        paymaster
            .expect_supported_tokens()
            .times(2)
            .returning(|_, _| Ok(vec![token(0x77, "DAI")]));
        let h = harness(paymaster, MockChainReader::new(), settings(1));

        h.store.supported_tokens(&alice).await.unwrap();
        h.store.reset().await;
        h.store.supported_tokens(&alice).await.unwrap();

        assert_eq!(h.store.snapshot().await.token_refreshes, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn approval_does_not_carry_over_to_another_wallet() {
        let (alice, bob) = (signer(1), signer(2));
        let (alice_account, bob_account) = (smart_account_of(alice.address()), smart_account_of(bob.address()));
        let dai = Address::repeat_byte(0x77);
        let mut chain = MockChainReader::new();
        chain
            .expect_token_allowance()
            .returning(|_, _, _| Ok(U256::zero()));
        let h = harness(MockPaymasterService::new(), chain, settings(5));

        h.store
            .ensure_approved(&alice, dai, U256::one(), &OperationOptions::default())
            .await
            .unwrap();
        let bob_allowance = h.store.allowance(&bob, dai).await.unwrap();

        assert!(h.store.is_approved(alice_account, dai));
        assert!(!h.store.is_approved(bob_account, dai));
        assert_eq!(bob_allowance, U256::zero());
        let snapshot = h.store.snapshot().await;
        assert_eq!(snapshot.allowances.get(&(alice_account, dai)), Some(&U256::MAX));
        assert_eq!(snapshot.allowances.get(&(bob_account, dai)), Some(&U256::zero()));
    }

    #[tokio::test(start_paused = true)]
    async fn new_wallet_gets_its_own_token_list() {
        let (alice, bob) = (signer(1), signer(2));
        let bob_account = smart_account_of(bob.address());
        let mut paymaster = MockPaymasterService::new();
        let mut seq = mockall::Sequence::new();
        paymaster
            .expect_supported_tokens()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(vec![token(0x77, "DAI")]));
        paymaster
            .expect_supported_tokens()
            .withf(move |sender, _| *sender == bob_account)
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(vec![token(0x78, "USDT")]));
        let h = harness(paymaster, MockChainReader::new(), settings(1));

        h.store.supported_tokens(&alice).await.unwrap();
        // Alice used up the refresh cap; Bob still gets a fetch.
        let bob_tokens = h.store.supported_tokens(&bob).await.unwrap();

        assert_eq!(bob_tokens, vec![token(0x78, "USDT")]);
        assert_eq!(h.store.snapshot().await.token_refreshes, 1);
    }
}
