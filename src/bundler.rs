// src/bundler.rs
use std::time::Duration;

use async_trait::async_trait;
use ethers::types::{Address, H256};
use jsonrpsee::http_client::HttpClient;
use tokio::time::{self, Instant};
use tracing::{debug, info, warn};

use crate::error::{AaError, AaResult};
use crate::rpc::{self, BundlerApiClient};
use crate::types::{UserOperation, UserOperationReceipt};

#[async_trait]
pub trait BundlerClient: Send + Sync {
    /// Submit a signed operation; returns its userOpHash.
    async fn send_user_operation(&self, user_op: &UserOperation) -> AaResult<H256>;

    /// Block until the operation is included. A receipt reporting a failed
    /// execution is an error.
    async fn wait_for_receipt(&self, user_op_hash: H256) -> AaResult<UserOperationReceipt>;

    /// Secondary lookup for the bundle transaction hash.
    async fn lookup_transaction_hash(&self, user_op_hash: H256) -> AaResult<Option<H256>>;
}

pub struct RpcBundlerClient {
    client: HttpClient,
    entry_point: Address,
    poll_interval: Duration,
    receipt_timeout: Duration,
}

impl RpcBundlerClient {
    pub fn new(
        bundler_rpc: &str,
        entry_point: Address,
        request_timeout: Duration,
        poll_interval: Duration,
        receipt_timeout: Duration,
    ) -> AaResult<Self> {
        Ok(Self {
            client: rpc::http_client(bundler_rpc, request_timeout)?,
            entry_point,
            poll_interval,
            receipt_timeout,
        })
    }
}

#[async_trait]
impl BundlerClient for RpcBundlerClient {
    async fn send_user_operation(&self, user_op: &UserOperation) -> AaResult<H256> {
        let hash = self
            .client
            .send_user_operation(user_op.clone(), self.entry_point)
            .await
            .map_err(AaError::bundler)?;
        info!("Bundler accepted user operation {:?} from {:?}", hash, user_op.sender);
        Ok(hash)
    }

    async fn wait_for_receipt(&self, user_op_hash: H256) -> AaResult<UserOperationReceipt> {
        let deadline = Instant::now() + self.receipt_timeout;
        // Transient lookup errors count as "not yet included" until the deadline
        loop {
            match self.client.get_user_operation_receipt(user_op_hash).await {
                Ok(Some(receipt)) if receipt.success => return Ok(receipt),
                Ok(Some(receipt)) => {
                    warn!(
                        "User operation {:?} reverted: {}",
                        user_op_hash,
                        receipt.reason.as_deref().unwrap_or("no reason")
                    );
                    return Err(AaError::ExecutionReverted(user_op_hash));
                }
                Ok(None) => debug!("User operation {:?} not yet included", user_op_hash),
                Err(e) => debug!("Receipt lookup for {:?} failed: {}", user_op_hash, e),
            }
            if Instant::now() + self.poll_interval > deadline {
                return Err(AaError::ReceiptUnavailable(user_op_hash));
            }
            time::sleep(self.poll_interval).await;
        }
    }

    async fn lookup_transaction_hash(&self, user_op_hash: H256) -> AaResult<Option<H256>> {
        let found = self
            .client
            .get_user_operation_by_hash(user_op_hash)
            .await
            .map_err(AaError::bundler)?;
        Ok(found.and_then(|op| op.transaction_hash))
    }
}
