// src/lib.rs
//! ERC-4337 user-operation orchestration for the arcade contracts: smart
//! account building, paymaster sponsorship, deduplicated submission through
//! a bundler, and gas-token bookkeeping.

pub mod account;
pub mod app;
pub mod bundler;
pub mod cache;
pub mod chain;
pub mod config;
pub mod connection;
pub mod contracts;
pub mod error;
pub mod executor;
pub mod gas;
pub mod operations;
pub mod paymaster;
pub mod retry;
pub mod rpc;
pub mod tokens;
pub mod types;

#[cfg(test)]
pub(crate) mod test_utils;

pub use app::Arcade;
pub use error::{AaError, AaResult};
pub use executor::OperationOptions;
pub use operations::GasPayment;
pub use paymaster::PaymentType;
