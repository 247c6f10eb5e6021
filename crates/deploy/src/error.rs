//! Error types for deterministic deployments.
//!
//! Configuration errors are raised before any network I/O and are returned as
//! `Err`. Transport and chain errors never surface here: they are captured as a
//! [`FailureReason`](crate::FailureReason) on a `Failed` record instead.

use thiserror::Error;

/// Result type alias for executor operations.
pub type DeployResult<T> = Result<T, DeployError>;

/// Errors raised by the address calculator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    #[error("invalid salt length: expected {expected} bytes, got {actual}")]
    InvalidSaltLength { expected: usize, actual: usize },

    #[error("invalid salt hex: {0}")]
    InvalidSaltHex(String),
}

/// Errors raised while building or querying the network registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("unknown network: {0}")]
    UnknownNetwork(String),

    #[error("duplicate network name: {0}")]
    DuplicateNetwork(String),

    #[error("network {0} has an empty endpoint")]
    EmptyEndpoint(String),

    #[error("network {network} has an invalid endpoint: {reason}")]
    InvalidEndpoint { network: String, reason: String },

    #[error("network {0} has no accounts")]
    NoAccounts(String),

    #[error("network {network}: invalid account {index}: {reason}")]
    InvalidAccount {
        network: String,
        index: usize,
        reason: String,
    },

    #[error("network {0} has no CREATE2 factory")]
    MissingFactory(String),

    #[error("invalid local network pattern {pattern}: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("unknown named account role: {0}")]
    UnknownRole(String),
}

/// Errors raised by ledger backends.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("ledger serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("ledger invariant violated: {0}")]
    Invariant(String),
}

/// Errors returned by [`Executor::deploy`](crate::Executor::deploy).
#[derive(Debug, Error)]
pub enum DeployError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Address(#[from] AddressError),

    #[error("unknown account index {index} on network {network} ({available} accounts configured)")]
    UnknownAccount {
        network: String,
        index: usize,
        available: usize,
    },

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl DeployError {
    /// Whether this error was raised by configuration validation (no I/O was attempted).
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            DeployError::Config(_) | DeployError::Address(_) | DeployError::UnknownAccount { .. }
        )
    }
}
