// src/error.rs
use ethers::types::H256;
use thiserror::Error;

/// Errors surfaced by the AA orchestration layer.
///
/// Payloads are plain strings so the error is `Clone` and can be handed to every
/// caller that shares a coalesced operation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AaError {
    #[error("Signer is not connected to a provider")]
    SignerNotConnected,

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Bundler error: {0}")]
    Bundler(String),

    #[error("Paymaster error: {0}")]
    Paymaster(String),

    #[error("Ethereum provider error: {0}")]
    Provider(String),

    #[error("Receipt unavailable for user operation {0:?}")]
    ReceiptUnavailable(H256),

    #[error("User operation {0:?} reverted during execution")]
    ExecutionReverted(H256),

    #[error("Signing failed: {0}")]
    Signing(String),

    #[error("ABI error: {0}")]
    Abi(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AaError {
    pub fn provider(err: impl std::fmt::Display) -> Self {
        Self::Provider(err.to_string())
    }

    pub fn bundler(err: impl std::fmt::Display) -> Self {
        Self::Bundler(err.to_string())
    }

    pub fn paymaster(err: impl std::fmt::Display) -> Self {
        Self::Paymaster(err.to_string())
    }
}

pub type AaResult<T> = Result<T, AaError>;
