// src/paymaster.rs
use async_trait::async_trait;
use ethers::types::Address;
use jsonrpsee::http_client::HttpClient;
#[cfg(test)]
use mockall::automock;
use serde::{Deserialize, Serialize, Serializer};
use tracing::{debug, info};

use crate::error::{AaError, AaResult};
use crate::rpc::{self, PaymasterApiClient};
use crate::types::{SponsoredFields, SupportedToken, TokenType, UserOperation};

/// How gas for a user operation is paid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PaymentType {
    /// The paymaster covers gas.
    #[default]
    Sponsored = 0,
    /// The account pays in an ERC-20 token before execution.
    Prepay = 1,
    /// The account pays in an ERC-20 token after execution.
    Postpay = 2,
}

impl PaymentType {
    pub fn is_sponsored(&self) -> bool {
        matches!(self, Self::Sponsored)
    }
}

impl TryFrom<u8> for PaymentType {
    type Error = AaError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Sponsored),
            1 => Ok(Self::Prepay),
            2 => Ok(Self::Postpay),
            other => Err(AaError::InvalidParameters(format!("unknown payment type {other}"))),
        }
    }
}

impl Serialize for PaymentType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(*self as u8)
    }
}

impl<'de> Deserialize<'de> for PaymentType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = u8::deserialize(deserializer)?;
        PaymentType::try_from(value).map_err(serde::de::Error::custom)
    }
}

/// Paymaster settings attached to every user operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymasterOptions {
    payment: PaymentType,
    api_key: String,
    rpc: String,
    token: Option<Address>,
}

impl PaymasterOptions {
    /// Token-paid modes require a fee token; sponsored mode never carries one.
    pub fn new(
        payment: PaymentType,
        api_key: impl Into<String>,
        rpc: impl Into<String>,
        token: Option<Address>,
    ) -> AaResult<Self> {
        let token = match (payment, token) {
            (PaymentType::Sponsored, _) => None,
            (_, Some(token)) if !token.is_zero() => Some(token),
            (payment, _) => {
                return Err(AaError::InvalidParameters(format!(
                    "payment type {payment:?} requires a fee token"
                )))
            }
        };
        Ok(Self {
            payment,
            api_key: api_key.into(),
            rpc: rpc.into(),
            token,
        })
    }

    pub fn payment(&self) -> PaymentType {
        self.payment
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub fn rpc(&self) -> &str {
        &self.rpc
    }

    pub fn token(&self) -> Option<Address> {
        self.token
    }

    pub fn context(&self) -> PaymasterContext {
        PaymasterContext {
            payment: self.payment,
            token: self.token,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymasterContext {
    #[serde(rename = "type")]
    pub payment: PaymentType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<Address>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NativeTokenInfo {
    pub symbol: String,
    #[serde(alias = "decimal")]
    pub decimals: u8,
    #[serde(default)]
    pub price: f64,
}

/// Body of a `pm_supported_tokens` response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupportedTokensResponse {
    #[serde(default)]
    pub free_gas: bool,
    #[serde(default)]
    pub native: Option<NativeTokenInfo>,
    #[serde(default)]
    pub tokens: Vec<SupportedToken>,
}

impl SupportedTokensResponse {
    /// Flatten into one list with the native currency (if any) first.
    pub fn into_tokens(self) -> Vec<SupportedToken> {
        let native = self.native.map(|native| SupportedToken {
            address: Address::zero(),
            symbol: native.symbol,
            decimals: native.decimals,
            token_type: TokenType::Native,
            price: native.price,
        });
        native.into_iter().chain(self.tokens).collect()
    }
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait PaymasterService: Send + Sync {
    /// Ask the paymaster to fill in `paymasterAndData` (and possibly gas) for `user_op`.
    async fn sponsor(&self, user_op: UserOperation, options: PaymasterOptions) -> AaResult<SponsoredFields>;

    /// Tokens the paymaster accepts for gas, for the given smart account.
    async fn supported_tokens(&self, sender: Address, api_key: String) -> AaResult<Vec<SupportedToken>>;
}

pub struct PaymasterRpcClient {
    client: HttpClient,
    entry_point: Address,
}

impl PaymasterRpcClient {
    pub fn new(rpc_url: &str, entry_point: Address, request_timeout: std::time::Duration) -> AaResult<Self> {
        let client = rpc::http_client(rpc_url, request_timeout)?;
        Ok(Self { client, entry_point })
    }
}

#[async_trait]
impl PaymasterService for PaymasterRpcClient {
    async fn sponsor(&self, user_op: UserOperation, options: PaymasterOptions) -> AaResult<SponsoredFields> {
        debug!(
            "Requesting {:?} sponsorship for sender {:?}",
            options.payment(),
            user_op.sender
        );
        let sponsored = self
            .client
            .sponsor_userop(
                user_op,
                options.api_key().to_string(),
                self.entry_point,
                options.context(),
            )
            .await
            .map_err(AaError::paymaster)?;
        if sponsored.paymaster_and_data.is_empty() {
            return Err(AaError::Paymaster("paymaster returned empty paymasterAndData".to_string()));
        }
        Ok(sponsored)
    }

    async fn supported_tokens(&self, sender: Address, api_key: String) -> AaResult<Vec<SupportedToken>> {
        let response = self
            .client
            .supported_tokens(UserOperation::minimal(sender), api_key, self.entry_point)
            .await
            .map_err(AaError::paymaster)?;
        let tokens = response.into_tokens();
        info!("Paymaster accepts {} tokens for {:?}", tokens.len(), sender);
        Ok(tokens)
    }
}
