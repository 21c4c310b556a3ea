// src/rpc.rs
use std::time::Duration;

use ethers::types::{Address, H256};
use jsonrpsee::core::RpcResult;
use jsonrpsee::http_client::{HttpClient, HttpClientBuilder};
use jsonrpsee::proc_macros::rpc;

use crate::error::AaError;
use crate::paymaster::{PaymasterContext, SupportedTokensResponse};
use crate::types::{SponsoredFields, UserOperation, UserOperationByHash, UserOperationReceipt};

/// ERC-4337 bundler methods.
#[rpc(client, namespace = "eth")]
pub trait BundlerApi {
    #[method(name = "sendUserOperation")]
    async fn send_user_operation(&self, user_op: UserOperation, entry_point: Address) -> RpcResult<H256>;

    #[method(name = "getUserOperationReceipt")]
    async fn get_user_operation_receipt(&self, user_op_hash: H256) -> RpcResult<Option<UserOperationReceipt>>;

    #[method(name = "getUserOperationByHash")]
    async fn get_user_operation_by_hash(&self, user_op_hash: H256) -> RpcResult<Option<UserOperationByHash>>;
}

/// Paymaster methods. Parameters are positional: the user operation, the
/// project API key, the entry point and (for sponsorship) the payment context.
#[rpc(client, namespace = "pm")]
pub trait PaymasterApi {
    #[method(name = "sponsor_userop")]
    async fn sponsor_userop(
        &self,
        user_op: UserOperation,
        api_key: String,
        entry_point: Address,
        context: PaymasterContext,
    ) -> RpcResult<SponsoredFields>;

    #[method(name = "supported_tokens")]
    async fn supported_tokens(
        &self,
        user_op: UserOperation,
        api_key: String,
        entry_point: Address,
    ) -> RpcResult<SupportedTokensResponse>;
}

pub fn http_client(url: &str, request_timeout: Duration) -> Result<HttpClient, AaError> {
    HttpClientBuilder::default()
        .request_timeout(request_timeout)
        .build(url)
        .map_err(|e| AaError::InvalidConfig(format!("cannot build rpc client for {url}: {e}")))
}
