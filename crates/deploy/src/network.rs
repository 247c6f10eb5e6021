//! Network profiles and the registry that validates them.

use alloy_core::primitives::{Address, address};
use alloy_signer_local::{MnemonicBuilder, PrivateKeySigner, coins_bip39::English};
use glob::Pattern;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::ConfigError;

/// The deterministic deployment proxy present on most EVM chains and dev nodes.
pub const DEFAULT_CREATE2_FACTORY: Address = address!("4e59b44847b379578588920ca78fbf26c0b4956c");

/// Default block gas limit used by local dev networks.
pub const DEFAULT_MAX_GAS: u64 = 12_000_000;

/// EIP-170 runtime code size limit.
pub const DEFAULT_MAX_CODE_SIZE: usize = 24_576;

/// Number of accounts derived from a mnemonic when no count is given.
pub const DEFAULT_MNEMONIC_COUNT: usize = 10;

/// Network name patterns treated as local/test networks.
pub const DEFAULT_LOCAL_PATTERNS: &[&str] = &[
    "local",
    "localhost",
    "hardhat",
    "anvil",
    "buidlerevm",
    "dev*",
    "test*",
];

/// Resource limits applied to deployments on a network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceLimits {
    /// Gas limit attached to deployment transactions.
    pub max_gas: u64,
    /// Maximum runtime code size. Init code may be up to twice this (EIP-3860).
    pub max_code_size: usize,
    /// Disable code size checks. Only meant for local/test networks.
    pub unlimited: bool,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_gas: DEFAULT_MAX_GAS,
            max_code_size: DEFAULT_MAX_CODE_SIZE,
            unlimited: false,
        }
    }
}

impl ResourceLimits {
    /// Largest init code accepted under these limits, or `None` when unlimited.
    pub fn max_init_code_size(&self) -> Option<usize> {
        (!self.unlimited).then_some(self.max_code_size * 2)
    }
}

/// A signer identity on a network.
///
/// Accounts without a key are managed by the node (e.g. unlocked dev accounts)
/// and have their transactions signed remotely.
#[derive(Debug, Clone)]
pub struct Account {
    pub address: Address,
    pub key: Option<PrivateKeySigner>,
}

impl Account {
    /// An account whose key is held by the node.
    pub fn remote(address: Address) -> Self {
        Self { address, key: None }
    }

    /// An account signed locally with `key`.
    pub fn local(key: PrivateKeySigner) -> Self {
        Self {
            address: key.address(),
            key: Some(key),
        }
    }
}

/// Where a network's ordered account list comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AccountSource {
    /// Node-managed accounts, identified by address only.
    Addresses { addresses: Vec<Address> },
    /// Hex-encoded secp256k1 private keys.
    PrivateKeys { private_keys: Vec<String> },
    /// BIP-39 mnemonic, derived along the default Ethereum path.
    Mnemonic {
        mnemonic: String,
        #[serde(default = "default_mnemonic_count")]
        count: usize,
    },
}

fn default_mnemonic_count() -> usize {
    DEFAULT_MNEMONIC_COUNT
}

impl AccountSource {
    /// Resolve the source into an ordered account list.
    pub fn resolve(&self, network: &str) -> Result<Vec<Account>, ConfigError> {
        let invalid = |index: usize, reason: String| ConfigError::InvalidAccount {
            network: network.to_string(),
            index,
            reason,
        };

        match self {
            AccountSource::Addresses { addresses } => {
                Ok(addresses.iter().copied().map(Account::remote).collect())
            }
            AccountSource::PrivateKeys { private_keys } => private_keys
                .iter()
                .enumerate()
                .map(|(index, key)| {
                    key.trim()
                        .parse::<PrivateKeySigner>()
                        .map(Account::local)
                        .map_err(|e| invalid(index, e.to_string()))
                })
                .collect(),
            AccountSource::Mnemonic { mnemonic, count } => (0..*count)
                .map(|index| {
                    MnemonicBuilder::<English>::default()
                        .phrase(mnemonic.as_str())
                        .index(index as u32)
                        .and_then(|builder| builder.build())
                        .map(Account::local)
                        .map_err(|e| invalid(index, e.to_string()))
                })
                .collect(),
        }
    }
}

/// Per-network configuration. Pure data.
#[derive(Debug, Clone)]
pub struct NetworkProfile {
    pub name: String,
    pub endpoint: Url,
    pub resource_limits: ResourceLimits,
    /// Ordered signer identities. Index 0 is the deployer by convention.
    pub accounts: Vec<Account>,
    /// CREATE2 factory used as the creator address. Every deployment is a
    /// call to this contract.
    pub create2_factory: Address,
}

impl NetworkProfile {
    /// Look up an account by index.
    pub fn account(&self, index: usize) -> Option<&Account> {
        self.accounts.get(index)
    }
}

/// Immutable set of validated network profiles.
#[derive(Debug, Clone)]
pub struct NetworkRegistry {
    profiles: Vec<NetworkProfile>,
    local_patterns: Vec<Pattern>,
}

impl NetworkRegistry {
    /// Validate and build a registry.
    ///
    /// Every profile needs a unique name, an endpoint with a host, at least
    /// one account and a non-zero factory. Local patterns must be valid globs.
    pub fn new(
        profiles: Vec<NetworkProfile>,
        local_patterns: Vec<String>,
    ) -> Result<Self, ConfigError> {
        for (i, profile) in profiles.iter().enumerate() {
            if profiles[..i].iter().any(|p| p.name == profile.name) {
                return Err(ConfigError::DuplicateNetwork(profile.name.clone()));
            }
            if profile.endpoint.host_str().is_none_or(str::is_empty) {
                return Err(ConfigError::EmptyEndpoint(profile.name.clone()));
            }
            if profile.accounts.is_empty() {
                return Err(ConfigError::NoAccounts(profile.name.clone()));
            }
            if profile.create2_factory.is_zero() {
                return Err(ConfigError::MissingFactory(profile.name.clone()));
            }
        }

        let local_patterns = local_patterns
            .iter()
            .map(|p| {
                Pattern::new(p).map_err(|e| ConfigError::InvalidPattern {
                    pattern: p.clone(),
                    reason: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        tracing::debug!(
            networks = ?profiles.iter().map(|p| p.name.as_str()).collect::<Vec<_>>(),
            "Network registry built"
        );

        Ok(Self {
            profiles,
            local_patterns,
        })
    }

    /// Build a registry using [`DEFAULT_LOCAL_PATTERNS`].
    pub fn with_default_patterns(profiles: Vec<NetworkProfile>) -> Result<Self, ConfigError> {
        let patterns = DEFAULT_LOCAL_PATTERNS.iter().map(|p| p.to_string()).collect();
        Self::new(profiles, patterns)
    }

    /// Get a profile by name.
    pub fn get(&self, name: &str) -> Result<&NetworkProfile, ConfigError> {
        self.profiles
            .iter()
            .find(|p| p.name == name)
            .ok_or_else(|| ConfigError::UnknownNetwork(name.to_string()))
    }

    /// Get a profile for a deployment.
    ///
    /// Emits a warning when an unlimited profile is used on a network that does
    /// not look local.
    pub fn select(&self, name: &str) -> Result<&NetworkProfile, ConfigError> {
        let profile = self.get(name)?;
        if profile.resource_limits.unlimited && !self.is_local(name) {
            tracing::warn!(
                network = %name,
                "Network allows unlimited contract size but is not a local/test network"
            );
        }
        Ok(profile)
    }

    /// Whether `name` matches one of the configured local/test patterns.
    pub fn is_local(&self, name: &str) -> bool {
        self.local_patterns.iter().any(|p| p.matches(name))
    }

    /// All profiles in configuration order.
    pub fn profiles(&self) -> &[NetworkProfile] {
        &self.profiles
    }
}
