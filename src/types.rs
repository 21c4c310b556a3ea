// src/types.rs
use std::fmt;

use ethers::abi::{encode, Token};
use ethers::types::{Address, Bytes, Log, H256, U256, U64};
use ethers::utils::keccak256;
use serde::{Deserialize, Serialize};

use crate::gas::GasParameters;

/// ERC-4337 (v0.6) UserOperation as sent to the bundler and paymaster.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserOperation {
    pub sender: Address,
    pub nonce: U256,
    pub init_code: Bytes,
    pub call_data: Bytes,
    pub call_gas_limit: U256,
    pub verification_gas_limit: U256,
    pub pre_verification_gas: U256,
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: U256,
    pub paymaster_and_data: Bytes,
    pub signature: Bytes,
}

impl UserOperation {
    /// An operation carrying only the sender, as the paymaster expects for
    /// token-list queries.
    pub fn minimal(sender: Address) -> Self {
        Self {
            sender,
            ..Default::default()
        }
    }

    pub fn with_gas(mut self, gas: &GasParameters) -> Self {
        self.call_gas_limit = gas.call_gas_limit;
        self.verification_gas_limit = gas.verification_gas_limit;
        self.pre_verification_gas = gas.pre_verification_gas;
        self.max_fee_per_gas = gas.max_fee_per_gas;
        self.max_priority_fee_per_gas = gas.max_priority_fee_per_gas;
        self
    }

    /// Merge the fields returned by the paymaster into this operation.
    pub fn apply_sponsorship(&mut self, sponsorship: &SponsoredFields) {
        self.paymaster_and_data = sponsorship.paymaster_and_data.clone();
        if let Some(gas) = sponsorship.call_gas_limit {
            self.call_gas_limit = gas;
        }
        if let Some(gas) = sponsorship.verification_gas_limit {
            self.verification_gas_limit = gas;
        }
        if let Some(gas) = sponsorship.pre_verification_gas {
            self.pre_verification_gas = gas;
        }
        if let Some(fee) = sponsorship.max_fee_per_gas {
            self.max_fee_per_gas = fee;
        }
        if let Some(fee) = sponsorship.max_priority_fee_per_gas {
            self.max_priority_fee_per_gas = fee;
        }
    }

    fn pack_without_signature(&self) -> Vec<u8> {
        encode(&[
            Token::Address(self.sender),
            Token::Uint(self.nonce),
            Token::FixedBytes(keccak256(&self.init_code).to_vec()),
            Token::FixedBytes(keccak256(&self.call_data).to_vec()),
            Token::Uint(self.call_gas_limit),
            Token::Uint(self.verification_gas_limit),
            Token::Uint(self.pre_verification_gas),
            Token::Uint(self.max_fee_per_gas),
            Token::Uint(self.max_priority_fee_per_gas),
            Token::FixedBytes(keccak256(&self.paymaster_and_data).to_vec()),
        ])
    }

    /// The hash the smart account owner signs: keccak(keccak(op), entryPoint, chainId).
    pub fn hash(&self, entry_point: Address, chain_id: u64) -> H256 {
        let op_hash = keccak256(self.pack_without_signature());
        H256::from(keccak256(encode(&[
            Token::FixedBytes(op_hash.to_vec()),
            Token::Address(entry_point),
            Token::Uint(U256::from(chain_id)),
        ])))
    }
}

/// Paymaster response to a sponsorship request. Gas fields are optional; when
/// present they override what the builder set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SponsoredFields {
    pub paymaster_and_data: Bytes,
    #[serde(default)]
    pub call_gas_limit: Option<U256>,
    #[serde(default)]
    pub verification_gas_limit: Option<U256>,
    #[serde(default)]
    pub pre_verification_gas: Option<U256>,
    #[serde(default)]
    pub max_fee_per_gas: Option<U256>,
    #[serde(default)]
    pub max_priority_fee_per_gas: Option<U256>,
}

/// The on-chain transaction a bundle landed in. Bundlers differ in how much of
/// the receipt they echo back, so every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncludedTransaction {
    #[serde(default)]
    pub transaction_hash: Option<H256>,
    #[serde(default)]
    pub block_hash: Option<H256>,
    #[serde(default)]
    pub block_number: Option<U64>,
    #[serde(default)]
    pub status: Option<U64>,
    #[serde(default)]
    pub gas_used: Option<U256>,
}

/// Result of `eth_getUserOperationReceipt`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserOperationReceipt {
    pub user_op_hash: H256,
    pub sender: Address,
    pub nonce: U256,
    #[serde(default)]
    pub paymaster: Option<Address>,
    pub actual_gas_cost: U256,
    pub actual_gas_used: U256,
    pub success: bool,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub logs: Vec<Log>,
    #[serde(default)]
    pub receipt: Option<IncludedTransaction>,
}

impl UserOperationReceipt {
    pub fn transaction_hash(&self) -> Option<H256> {
        self.receipt.as_ref().and_then(|r| r.transaction_hash)
    }
}

/// Result of `eth_getUserOperationByHash`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserOperationByHash {
    pub user_operation: UserOperation,
    pub entry_point: Address,
    #[serde(default)]
    pub block_hash: Option<H256>,
    #[serde(default)]
    pub block_number: Option<U64>,
    #[serde(default)]
    pub transaction_hash: Option<H256>,
}

/// An encoded call the smart account executes: `execute(to, value, data)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractCall {
    pub to: Address,
    pub value: U256,
    pub data: Bytes,
}

impl ContractCall {
    pub fn new(to: Address, data: impl Into<Bytes>) -> Self {
        Self {
            to,
            value: U256::zero(),
            data: data.into(),
        }
    }

    pub fn with_value(mut self, value: U256) -> Self {
        self.value = value;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum OperationStatus {
    Included,
    /// The operation landed but neither the receipt nor the follow-up lookup
    /// produced a transaction hash.
    IncludedWithUnknownHash,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserOperationResult {
    pub user_op_hash: H256,
    pub transaction_hash: Option<H256>,
    pub receipt: Option<UserOperationReceipt>,
}

impl UserOperationResult {
    pub fn status(&self) -> OperationStatus {
        match self.transaction_hash {
            Some(_) => OperationStatus::Included,
            None => OperationStatus::IncludedWithUnknownHash,
        }
    }

    pub fn logs(&self) -> &[Log] {
        self.receipt
            .as_ref()
            .map(|r| r.logs.as_slice())
            .unwrap_or_default()
    }
}

/// Deterministic identity of a write operation: name, signer and every call
/// parameter. Identical keys collapse onto one submission.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OperationKey(String);

impl OperationKey {
    pub fn new(operation: &str, signer: Address) -> Self {
        Self(format!("{operation}:{signer:?}"))
    }

    pub fn with(mut self, part: impl fmt::Debug) -> Self {
        self.0.push(':');
        self.0.push_str(&format!("{part:?}"));
        self
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OperationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Native,
    System,
    External,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupportedToken {
    #[serde(alias = "token")]
    pub address: Address,
    pub symbol: String,
    #[serde(alias = "decimal")]
    pub decimals: u8,
    #[serde(rename = "type")]
    pub token_type: TokenType,
    #[serde(default)]
    pub price: f64,
}
