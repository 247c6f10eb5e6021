//! Configuration surface, loaded once at process start.
//!
//! Values come from a TOML file merged with `SALTBOX_`-prefixed environment
//! variables (nested keys separated by `__`, e.g. `SALTBOX_DEFAULT_NETWORK`).

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    time::Duration,
};

use alloy_core::primitives::Address;
use anyhow::{Context, Result};
use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{
    error::ConfigError,
    executor::{ExecutorOptions, LedgerPolicy},
    network::{
        AccountSource, DEFAULT_CREATE2_FACTORY, DEFAULT_LOCAL_PATTERNS, NetworkProfile,
        NetworkRegistry, ResourceLimits,
    },
};

/// The default name for the configuration file.
pub const CONFIG_FILENAME: &str = "Saltbox.toml";

/// Prefix of environment variables overriding the configuration file.
pub const ENV_PREFIX: &str = "SALTBOX_";

/// The role resolved to the deploying account.
pub const DEPLOYER_ROLE: &str = "deployer";

/// Mnemonic used by local dev nodes.
const DEV_MNEMONIC: &str = "test test test test test test test test test test test junk";

/// Configuration of one network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub name: String,
    /// JSON-RPC endpoint.
    pub url: String,
    #[serde(default)]
    pub resource_limits: ResourceLimits,
    pub accounts: AccountSource,
    /// CREATE2 factory used as creator.
    #[serde(default = "default_create2_factory")]
    pub create2_factory: Address,
}

fn default_create2_factory() -> Address {
    DEFAULT_CREATE2_FACTORY
}

impl NetworkConfig {
    /// Validate the endpoint and resolve accounts into a profile.
    pub fn to_profile(&self) -> Result<NetworkProfile, ConfigError> {
        if self.url.trim().is_empty() {
            return Err(ConfigError::EmptyEndpoint(self.name.clone()));
        }
        let endpoint = Url::parse(self.url.trim()).map_err(|e| ConfigError::InvalidEndpoint {
            network: self.name.clone(),
            reason: e.to_string(),
        })?;

        Ok(NetworkProfile {
            name: self.name.clone(),
            endpoint,
            resource_limits: self.resource_limits,
            accounts: self.accounts.resolve(&self.name)?,
            create2_factory: self.create2_factory,
        })
    }
}

/// Timeouts applied by the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub probe_secs: u64,
    pub submission_secs: u64,
    pub receipt_poll_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            probe_secs: 10,
            submission_secs: 120,
            receipt_poll_ms: 1_000,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Network used when none is given.
    pub default_network: String,
    /// Networks, in order.
    pub networks: Vec<NetworkConfig>,
    /// Role name to account index.
    #[serde(default = "default_named_accounts")]
    pub named_accounts: BTreeMap<String, usize>,
    /// Name patterns (`*` wildcard) of local/test networks.
    #[serde(default = "default_local_networks")]
    pub local_networks: Vec<String>,
    #[serde(default = "default_ledger_path")]
    pub ledger_path: PathBuf,
    #[serde(default = "default_artifacts_dir")]
    pub artifacts_dir: PathBuf,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    /// Let successful ledger entries skip the on-chain existence check.
    #[serde(default)]
    pub trust_ledger: bool,
}

fn default_named_accounts() -> BTreeMap<String, usize> {
    BTreeMap::from([(DEPLOYER_ROLE.to_string(), 0)])
}

fn default_local_networks() -> Vec<String> {
    DEFAULT_LOCAL_PATTERNS.iter().map(|p| p.to_string()).collect()
}

fn default_ledger_path() -> PathBuf {
    PathBuf::from("deployments/ledger.json")
}

fn default_artifacts_dir() -> PathBuf {
    PathBuf::from("artifacts")
}

impl Default for Config {
    /// A single local dev network on `127.0.0.1:8545`.
    fn default() -> Self {
        Self {
            default_network: "local".to_string(),
            networks: vec![NetworkConfig {
                name: "local".to_string(),
                url: "http://127.0.0.1:8545".to_string(),
                resource_limits: ResourceLimits {
                    unlimited: true,
                    ..Default::default()
                },
                accounts: AccountSource::Mnemonic {
                    mnemonic: DEV_MNEMONIC.to_string(),
                    count: 10,
                },
                create2_factory: DEFAULT_CREATE2_FACTORY,
            }],
            named_accounts: default_named_accounts(),
            local_networks: default_local_networks(),
            ledger_path: default_ledger_path(),
            artifacts_dir: default_artifacts_dir(),
            timeouts: TimeoutConfig::default(),
            trust_ledger: false,
        }
    }
}

impl Config {
    /// The figment used by [`Config::load`]: the TOML file, then the environment.
    pub fn figment(path: &Path) -> Figment {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Load the configuration from a TOML file (or a directory containing
    /// [`CONFIG_FILENAME`]) and the environment.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            anyhow::bail!("Configuration file or directory not found: {}", path.display());
        }

        let config_path = if path.is_dir() {
            path.join(CONFIG_FILENAME)
        } else {
            path.to_path_buf()
        };

        let config = Self::from_figment(Self::figment(&config_path))
            .with_context(|| format!("Failed to load config from {}", config_path.display()))?;
        tracing::info!(path = %config_path.display(), "Configuration loaded");
        Ok(config)
    }

    pub fn from_figment(figment: Figment) -> Result<Self> {
        figment
            .extract()
            .context("Failed to parse configuration")
    }

    /// Save the configuration to a TOML file.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;
        std::fs::write(path, content)
            .context(format!("Failed to write config to {}", path.display()))?;
        tracing::info!(path = %path.display(), "Configuration saved");
        Ok(())
    }

    /// Build the immutable network registry.
    pub fn registry(&self) -> Result<NetworkRegistry, ConfigError> {
        let profiles = self
            .networks
            .iter()
            .map(NetworkConfig::to_profile)
            .collect::<Result<Vec<_>, _>>()?;
        NetworkRegistry::new(profiles, self.local_networks.clone())
    }

    /// Account index assigned to `role`.
    pub fn role_index(&self, role: &str) -> Result<usize, ConfigError> {
        self.named_accounts
            .get(role)
            .copied()
            .ok_or_else(|| ConfigError::UnknownRole(role.to_string()))
    }

    /// Account index of the deployer.
    pub fn deployer_index(&self) -> Result<usize, ConfigError> {
        self.role_index(DEPLOYER_ROLE)
    }

    pub fn executor_options(&self) -> ExecutorOptions {
        ExecutorOptions {
            probe_timeout: Duration::from_secs(self.timeouts.probe_secs),
            submission_timeout: Duration::from_secs(self.timeouts.submission_secs),
            receipt_poll_interval: Duration::from_millis(self.timeouts.receipt_poll_ms),
            ledger_policy: if self.trust_ledger {
                LedgerPolicy::Trust
            } else {
                LedgerPolicy::Verify
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::providers::Serialized;
    use tempdir::TempDir;

    const SAMPLE: &str = r#"
default_network = "buidlerevm"

[[networks]]
name = "buidlerevm"
url = "http://127.0.0.1:8545"
accounts = { mnemonic = "test test test test test test test test test test test junk", count = 3 }
resource_limits = { max_gas = 12000000, unlimited = true }

[[networks]]
name = "kovan"
url = "https://kovan.example.org/v2/key"
accounts = { private_keys = ["0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80"] }
create2_factory = "0x914d7fec6aac8cd542e72bca78b30650d45643d7"

[named_accounts]
deployer = 0
"#;

    fn write_sample() -> (TempDir, PathBuf) {
        let temp_dir = TempDir::new("saltbox-test").expect("Failed to create temp dir");
        let path = temp_dir.path().join(CONFIG_FILENAME);
        std::fs::write(&path, SAMPLE).unwrap();
        (temp_dir, path)
    }

    #[test]
    fn test_load_from_file_and_directory() {
        let (temp_dir, path) = write_sample();

        let from_file = Config::load(&path).unwrap();
        let from_dir = Config::load(temp_dir.path()).unwrap();
        assert_eq!(from_file, from_dir);

        assert_eq!(from_file.default_network, "buidlerevm");
        assert_eq!(from_file.networks.len(), 2);
        assert_eq!(from_file.deployer_index().unwrap(), 0);
        assert_eq!(from_file.ledger_path, PathBuf::from("deployments/ledger.json"));
        assert_eq!(from_file.networks[0].resource_limits.max_code_size, 24_576);
    }

    #[test]
    fn test_load_missing_file() {
        let temp_dir = TempDir::new("saltbox-test").expect("Failed to create temp dir");
        assert!(Config::load(&temp_dir.path().join("nope.toml")).is_err());
    }

    #[test]
    fn test_registry_from_config() {
        let (_temp_dir, path) = write_sample();
        let config = Config::load(&path).unwrap();
        let registry = config.registry().unwrap();

        let local = registry.get("buidlerevm").unwrap();
        assert_eq!(local.accounts.len(), 3);
        assert_eq!(local.create2_factory, DEFAULT_CREATE2_FACTORY);
        assert!(local.resource_limits.unlimited);

        let kovan = registry.get("kovan").unwrap();
        assert_eq!(
            kovan.create2_factory,
            "0x914d7fec6aac8cd542e72bca78b30650d45643d7".parse::<Address>().unwrap()
        );
        assert_eq!(kovan.endpoint.host_str(), Some("kovan.example.org"));
    }

    #[test]
    fn test_overrides_merge_over_file() {
        let (_temp_dir, path) = write_sample();
        let figment = Config::figment(&path)
            .merge(Serialized::default("default_network", "kovan"))
            .merge(Serialized::default("trust_ledger", true));

        let config = Config::from_figment(figment).unwrap();
        assert_eq!(config.default_network, "kovan");
        assert_eq!(config.executor_options().ledger_policy, LedgerPolicy::Trust);
    }

    #[test]
    fn test_empty_endpoint_rejected() {
        let mut config = Config::default();
        config.networks[0].url = " ".to_string();
        assert_eq!(
            config.registry().unwrap_err(),
            ConfigError::EmptyEndpoint("local".to_string())
        );
    }

    #[test]
    fn test_zero_factory_rejected() {
        let mut config = Config::default();
        config.networks[0].create2_factory = Address::ZERO;
        assert_eq!(
            config.registry().unwrap_err(),
            ConfigError::MissingFactory("local".to_string())
        );
    }

    #[test]
    fn test_unknown_role() {
        let config = Config::default();
        assert_eq!(
            config.role_index("admin").unwrap_err(),
            ConfigError::UnknownRole("admin".to_string())
        );
    }

    #[test]
    fn test_default_roundtrips_through_toml() {
        let temp_dir = TempDir::new("saltbox-test").expect("Failed to create temp dir");
        let path = temp_dir.path().join(CONFIG_FILENAME);

        let config = Config::default();
        config.save_to_file(&path).unwrap();
        assert_eq!(Config::load(&path).unwrap(), config);
    }
}
