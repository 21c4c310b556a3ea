// src/test_utils.rs
//! Fakes for the bundler, builder and factory seams, plus a local JSON-RPC
//! server for exercising the real HTTP clients.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ethers::prelude::*;
use jsonrpsee::server::{ServerBuilder, ServerHandle};
use jsonrpsee::RpcModule;
use parking_lot::Mutex;

use crate::account::{execute_call_data, AccountBuilder, AccountFactory, BuilderSettings, WalletSigner};
use crate::bundler::BundlerClient;
use crate::error::{AaError, AaResult};
use crate::types::{ContractCall, IncludedTransaction, UserOperation, UserOperationReceipt};

pub fn signer(seed: u8) -> WalletSigner {
    let wallet = LocalWallet::from_bytes(&[seed; 32]).unwrap();
    let provider = Provider::<Http>::try_from("http://localhost:8545").unwrap();
    WalletSigner::new(wallet, Arc::new(provider))
}

pub fn disconnected_signer(seed: u8) -> WalletSigner {
    WalletSigner::disconnected(LocalWallet::from_bytes(&[seed; 32]).unwrap())
}

/// Deterministic smart-account address for an owner.
pub fn smart_account_of(owner: Address) -> Address {
    let mut bytes = owner.to_fixed_bytes();
    bytes[0] ^= 0xaa;
    Address::from(bytes)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptMode {
    /// Receipt carries the bundle transaction hash.
    WithHash,
    /// Receipt lacks a hash; the secondary lookup finds it.
    HashFromLookup,
    /// Neither the receipt nor the lookup knows the hash.
    NoHash,
    /// Inclusion never observed.
    Unavailable,
}

pub struct FakeBundler {
    sends: AtomicUsize,
    failing_sends: AtomicUsize,
    receipt_waits: AtomicUsize,
    send_delay: Duration,
    mode: Mutex<ReceiptMode>,
    logs: Mutex<Vec<Log>>,
    sent: Mutex<Vec<UserOperation>>,
}

impl Default for FakeBundler {
    fn default() -> Self {
        Self {
            sends: AtomicUsize::new(0),
            failing_sends: AtomicUsize::new(0),
            receipt_waits: AtomicUsize::new(0),
            send_delay: Duration::from_millis(50),
            mode: Mutex::new(ReceiptMode::WithHash),
            logs: Mutex::new(vec![]),
            sent: Mutex::new(vec![]),
        }
    }
}

impl FakeBundler {
    /// The next `count` sends fail before reaching the bundler.
    pub fn fail_next_sends(&self, count: usize) {
        self.failing_sends.store(count, Ordering::SeqCst);
    }

    pub fn set_mode(&self, mode: ReceiptMode) {
        *self.mode.lock() = mode;
    }

    pub fn set_logs(&self, logs: Vec<Log>) {
        *self.logs.lock() = logs;
    }

    pub fn sends(&self) -> usize {
        self.sends.load(Ordering::SeqCst)
    }

    pub fn receipt_waits(&self) -> usize {
        self.receipt_waits.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<UserOperation> {
        self.sent.lock().clone()
    }

    pub fn user_op_hash(n: usize) -> H256 {
        H256::from_low_u64_be(n as u64)
    }

    pub fn transaction_hash(user_op_hash: H256) -> H256 {
        let mut bytes = user_op_hash.to_fixed_bytes();
        bytes[0] = 0x7a;
        H256::from(bytes)
    }
}

#[async_trait]
impl BundlerClient for FakeBundler {
    async fn send_user_operation(&self, user_op: &UserOperation) -> AaResult<H256> {
        tokio::time::sleep(self.send_delay).await;
        let attempt = self.sends.fetch_add(1, Ordering::SeqCst) + 1;
        let failing = self.failing_sends.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_sends.store(failing - 1, Ordering::SeqCst);
            return Err(AaError::Bundler("bundler unreachable".to_string()));
        }
        self.sent.lock().push(user_op.clone());
        Ok(Self::user_op_hash(attempt))
    }

    async fn wait_for_receipt(&self, user_op_hash: H256) -> AaResult<UserOperationReceipt> {
        self.receipt_waits.fetch_add(1, Ordering::SeqCst);
        let mode = *self.mode.lock();
        if mode == ReceiptMode::Unavailable {
            return Err(AaError::ReceiptUnavailable(user_op_hash));
        }
        let receipt = (mode == ReceiptMode::WithHash).then(|| IncludedTransaction {
            transaction_hash: Some(Self::transaction_hash(user_op_hash)),
            ..Default::default()
        });
        Ok(UserOperationReceipt {
            user_op_hash,
            success: true,
            logs: self.logs.lock().clone(),
            receipt,
            ..Default::default()
        })
    }

    async fn lookup_transaction_hash(&self, user_op_hash: H256) -> AaResult<Option<H256>> {
        match *self.mode.lock() {
            ReceiptMode::HashFromLookup => Ok(Some(Self::transaction_hash(user_op_hash))),
            _ => Err(AaError::Bundler("not found".to_string())),
        }
    }
}

pub struct FakeBuilder {
    owner: Address,
    sender_delay: Duration,
    sender_lookups: Arc<AtomicUsize>,
    settings_seen: Arc<Mutex<Vec<BuilderSettings>>>,
}

#[async_trait]
impl AccountBuilder for FakeBuilder {
    async fn sender(&self) -> AaResult<Address> {
        if !self.sender_delay.is_zero() {
            tokio::time::sleep(self.sender_delay).await;
        }
        self.sender_lookups.fetch_add(1, Ordering::SeqCst);
        Ok(smart_account_of(self.owner))
    }

    async fn build_user_operation(&self, call: &ContractCall, settings: &BuilderSettings) -> AaResult<UserOperation> {
        self.settings_seen.lock().push(settings.clone());
        Ok(UserOperation {
            sender: smart_account_of(self.owner),
            call_data: execute_call_data(call),
            ..Default::default()
        }
        .with_gas(&settings.gas))
    }
}

#[derive(Default)]
pub struct FakeFactory {
    pub bundler: Arc<FakeBundler>,
    builders: AtomicUsize,
    clients: AtomicUsize,
    sender_delay: Duration,
    sender_lookups: Arc<AtomicUsize>,
    settings_seen: Arc<Mutex<Vec<BuilderSettings>>>,
}

impl FakeFactory {
    /// Builders whose sender lookup takes `delay`.
    pub fn with_sender_delay(delay: Duration) -> Self {
        Self {
            sender_delay: delay,
            ..Default::default()
        }
    }

    pub fn builders_created(&self) -> usize {
        self.builders.load(Ordering::SeqCst)
    }

    pub fn clients_created(&self) -> usize {
        self.clients.load(Ordering::SeqCst)
    }

    pub fn sender_lookups(&self) -> usize {
        self.sender_lookups.load(Ordering::SeqCst)
    }

    pub fn settings_seen(&self) -> Vec<BuilderSettings> {
        self.settings_seen.lock().clone()
    }
}

#[async_trait]
impl AccountFactory for FakeFactory {
    async fn create_client(&self, _signer: &WalletSigner) -> AaResult<Arc<dyn BundlerClient>> {
        self.clients.fetch_add(1, Ordering::SeqCst);
        Ok(self.bundler.clone())
    }

    async fn create_builder(&self, signer: &WalletSigner) -> AaResult<Arc<dyn AccountBuilder>> {
        self.builders.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(FakeBuilder {
            owner: signer.address(),
            sender_delay: self.sender_delay,
            sender_lookups: Arc::clone(&self.sender_lookups),
            settings_seen: Arc::clone(&self.settings_seen),
        }))
    }
}

/// Serve `module` over HTTP on an ephemeral local port. Keep the handle alive
/// for as long as the server is needed.
pub async fn serve(module: RpcModule<()>) -> (String, ServerHandle) {
    let server = ServerBuilder::default().build("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", server.local_addr().unwrap());
    (url, server.start(module))
}
