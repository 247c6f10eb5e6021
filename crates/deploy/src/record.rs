//! Deployment records: the unit persisted in the ledger.

use std::fmt;

use alloy_core::primitives::{Address, B256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::address::Salt;

/// Status of a deployment attempt.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DeploymentStatus {
    /// A transaction may be in flight; resolved by re-probing on next access.
    Pending,
    Deployed,
    AlreadyPresent,
    Failed,
}

impl DeploymentStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, DeploymentStatus::Pending)
    }

    /// Code is known to exist at the computed address.
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            DeploymentStatus::Deployed | DeploymentStatus::AlreadyPresent
        )
    }
}

/// Why a deployment ended in [`DeploymentStatus::Failed`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum FailureReason {
    /// The existence check did not answer in time.
    ProbeTimeout,
    /// The transaction was not mined in time.
    SubmissionTimeout,
    /// The chain could not be reached or returned an error.
    ProbeUnavailable(String),
    /// The transaction could not be signed.
    SigningFailed(String),
    /// The transaction was mined but reverted.
    Reverted,
    /// The receipt reports a contract at a different address.
    AddressMismatch { expected: Address, actual: Address },
    /// The init code exceeds the network's limits.
    ResourceLimit { init_code_size: usize, max: usize },
    /// The caller cancelled before the transaction was submitted.
    Cancelled,
    /// The network has no code at its CREATE2 factory address.
    FactoryMissing { factory: Address },
    /// The transaction succeeded but left no code at the computed address.
    NoCodeAtAddress { address: Address },
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::ProbeTimeout => write!(f, "probe timed out"),
            FailureReason::SubmissionTimeout => write!(f, "submission timed out"),
            FailureReason::ProbeUnavailable(e) => write!(f, "probe unavailable: {e}"),
            FailureReason::SigningFailed(e) => write!(f, "signing failed: {e}"),
            FailureReason::Reverted => write!(f, "transaction reverted"),
            FailureReason::AddressMismatch { expected, actual } => {
                write!(f, "deployed at {actual}, expected {expected}")
            }
            FailureReason::ResourceLimit {
                init_code_size,
                max,
            } => write!(f, "init code is {init_code_size} bytes, limit is {max}"),
            FailureReason::Cancelled => write!(f, "cancelled"),
            FailureReason::FactoryMissing { factory } => {
                write!(f, "no CREATE2 factory deployed at {factory}")
            }
            FailureReason::NoCodeAtAddress { address } => {
                write!(f, "transaction succeeded but {address} has no code")
            }
        }
    }
}

/// Dedup key of a deployment: one record history per (contract, network, salt).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeploymentKey {
    pub contract_name: String,
    pub network_name: String,
    pub salt: Salt,
}

impl DeploymentKey {
    pub fn new(contract_name: impl Into<String>, network_name: impl Into<String>, salt: Salt) -> Self {
        Self {
            contract_name: contract_name.into(),
            network_name: network_name.into(),
            salt,
        }
    }
}

impl fmt::Display for DeploymentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.contract_name,
            self.network_name,
            self.salt.to_hex()
        )
    }
}

/// Outcome of a single deployment attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub contract_name: String,
    pub network_name: String,
    pub salt: Salt,
    pub computed_address: Address,
    pub tx_hash: Option<B256>,
    pub status: DeploymentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureReason>,
    /// Random id shared by every record written during one attempt.
    pub attempt: u64,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl DeploymentRecord {
    /// Start a new attempt in [`DeploymentStatus::Pending`].
    pub fn pending(key: &DeploymentKey, computed_address: Address) -> Self {
        Self {
            contract_name: key.contract_name.clone(),
            network_name: key.network_name.clone(),
            salt: key.salt,
            computed_address,
            tx_hash: None,
            status: DeploymentStatus::Pending,
            failure: None,
            attempt: rand::random(),
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn key(&self) -> DeploymentKey {
        DeploymentKey::new(&self.contract_name, &self.network_name, self.salt)
    }

    /// Code was found at the computed address; no transaction involved.
    pub fn already_present(mut self) -> Self {
        self.status = DeploymentStatus::AlreadyPresent;
        self.tx_hash = None;
        self.failure = None;
        self.completed_at = Some(Utc::now());
        self
    }

    /// A successful receipt was observed for `tx_hash`.
    pub fn deployed(mut self, tx_hash: B256) -> Self {
        self.status = DeploymentStatus::Deployed;
        self.tx_hash = Some(tx_hash);
        self.failure = None;
        self.completed_at = Some(Utc::now());
        self
    }

    pub fn failed(mut self, reason: FailureReason) -> Self {
        self.status = DeploymentStatus::Failed;
        self.failure = Some(reason);
        self.completed_at = Some(Utc::now());
        self
    }

    pub fn with_tx_hash(mut self, tx_hash: B256) -> Self {
        self.tx_hash = Some(tx_hash);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> DeploymentKey {
        DeploymentKey::new("Blog", "local", Salt::ZERO)
    }

    #[test]
    fn test_key_display() {
        assert_eq!(
            key().to_string(),
            format!("Blog/local/0x{}", "0".repeat(64))
        );
    }

    #[test]
    fn test_transitions() {
        let pending = DeploymentRecord::pending(&key(), Address::ZERO);
        assert_eq!(pending.status, DeploymentStatus::Pending);
        assert!(!pending.status.is_terminal());
        assert_eq!(pending.key(), key());

        let deployed = pending.clone().deployed(B256::repeat_byte(1));
        assert_eq!(deployed.status, DeploymentStatus::Deployed);
        assert_eq!(deployed.tx_hash, Some(B256::repeat_byte(1)));
        assert_eq!(deployed.attempt, pending.attempt);

        let present = pending.clone().with_tx_hash(B256::repeat_byte(2)).already_present();
        assert_eq!(present.tx_hash, None);
        assert!(present.status.is_success());

        let failed = pending.failed(FailureReason::Reverted);
        assert_eq!(failed.failure, Some(FailureReason::Reverted));
        assert!(failed.completed_at.is_some());
    }

    #[test]
    fn test_serialized_shape() {
        let record = DeploymentRecord::pending(&key(), Address::ZERO)
            .failed(FailureReason::ProbeUnavailable("connection refused".to_string()));
        let json = serde_json::to_value(&record).unwrap();

        assert_eq!(json["status"], "failed");
        assert_eq!(json["tx_hash"], serde_json::Value::Null);
        assert_eq!(json["failure"]["kind"], "probe_unavailable");
        assert_eq!(json["failure"]["detail"], "connection refused");

        let back: DeploymentRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_no_code_reason_shape() {
        let address = Address::repeat_byte(0x11);
        let reason = FailureReason::NoCodeAtAddress { address };
        let json = serde_json::to_value(&reason).unwrap();
        assert_eq!(json["kind"], "no_code_at_address");
        assert!(json["detail"]["address"].is_string());
        assert_eq!(serde_json::from_value::<FailureReason>(json).unwrap(), reason);
    }

    #[test]
    fn test_status_from_str() {
        assert_eq!(
            "already_present".parse::<DeploymentStatus>().unwrap(),
            DeploymentStatus::AlreadyPresent
        );
        assert_eq!(DeploymentStatus::Deployed.to_string(), "deployed");
    }
}
