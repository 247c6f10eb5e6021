//! saltbox-deploy - Deterministic contract deployments.
//!
//! Contracts are deployed with CREATE2 so their address only depends on the
//! creator, a 32-byte salt and the init code. The [`Executor`] probes the
//! chain before sending anything, which makes repeated runs idempotent, and
//! keeps a [`Ledger`] of every attempt.

mod address;
pub use address::{SALT_LENGTH, Salt, compute_address, create2_address, parse_salt};

mod artifact;
pub use artifact::{ArtifactLoader, ContractArtifact, DirArtifactLoader};

mod config;
pub use config::{CONFIG_FILENAME, Config, DEPLOYER_ROLE, ENV_PREFIX, NetworkConfig, TimeoutConfig};

mod error;
pub use error::{AddressError, ConfigError, DeployError, DeployResult, LedgerError};

mod executor;
pub use executor::{
    DEFAULT_PROBE_TIMEOUT, DEFAULT_RECEIPT_POLL_INTERVAL, DEFAULT_SUBMISSION_TIMEOUT,
    DeployOptions, DeploymentRequest, Executor, ExecutorOptions, LedgerPolicy,
};

mod ledger;
pub use ledger::{FileLedger, KeyGuard, KeyLocks, Ledger, LedgerEntry, MemoryLedger};

mod network;
pub use network::{
    Account, AccountSource, DEFAULT_CREATE2_FACTORY, DEFAULT_LOCAL_PATTERNS,
    DEFAULT_MAX_CODE_SIZE, DEFAULT_MAX_GAS, DEFAULT_MNEMONIC_COUNT, NetworkProfile,
    NetworkRegistry, ResourceLimits,
};

mod probe;
pub use probe::{ChainProbe, DeploymentTx, RawTransaction, Receipt, TxParams};

mod record;
pub use record::{DeploymentKey, DeploymentRecord, DeploymentStatus, FailureReason};

pub mod rpc;
pub use rpc::JsonRpcProbe;

mod signer;
pub use signer::{AccountSigner, Signer, signing_hash};
