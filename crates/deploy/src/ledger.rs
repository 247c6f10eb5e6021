//! Deployment ledger: durable history of deployment attempts.
//!
//! Every record is appended under its [`DeploymentKey`]; the last entry is the
//! current state and earlier entries are kept for audit. Writes for one key are
//! serialized with [`Ledger::lock`]. When an entry from a different attempt was
//! written after the incoming attempt started, the incoming entry still wins
//! but is flagged as a conflict.

use std::{
    collections::{BTreeMap, HashMap},
    fs::{File, OpenOptions},
    future::Future,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, PoisonError},
};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tokio::sync::OwnedMutexGuard;

use crate::{
    error::LedgerError,
    record::{DeploymentKey, DeploymentRecord, DeploymentStatus},
};

/// A record as stored in the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    #[serde(flatten)]
    pub record: DeploymentRecord,
    pub recorded_at: DateTime<Utc>,
    /// Another attempt wrote this key while this one was in flight.
    #[serde(default)]
    pub conflict: bool,
}

type Entries = BTreeMap<String, Vec<LedgerEntry>>;

/// Guard holding the per-key write lock.
pub type KeyGuard = OwnedMutexGuard<()>;

/// In-process async locks, one per deployment key.
#[derive(Debug, Default)]
pub struct KeyLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl KeyLocks {
    pub async fn acquire(&self, key: &DeploymentKey) -> KeyGuard {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks.entry(key.to_string()).or_default().clone()
        };
        lock.lock_owned().await
    }
}

/// Durable store of deployment records.
pub trait Ledger: Send + Sync {
    /// Append `record` as the latest entry for its key.
    fn record(&self, record: &DeploymentRecord) -> Result<LedgerEntry, LedgerError>;

    /// Latest record for `key`.
    fn lookup(&self, key: &DeploymentKey) -> Result<Option<DeploymentRecord>, LedgerError>;

    /// Every entry for `key`, oldest first.
    fn history(&self, key: &DeploymentKey) -> Result<Vec<LedgerEntry>, LedgerError>;

    fn key_locks(&self) -> &KeyLocks;

    /// Serialize check-then-act sequences on `key` within this process.
    fn lock(&self, key: &DeploymentKey) -> impl Future<Output = KeyGuard> + Send {
        self.key_locks().acquire(key)
    }
}

/// Append `record` to `entries`, enforcing ledger invariants.
fn append(entries: &mut Entries, record: &DeploymentRecord) -> Result<LedgerEntry, LedgerError> {
    if record.status == DeploymentStatus::Deployed && record.tx_hash.is_none() {
        return Err(LedgerError::Invariant(format!(
            "{} marked deployed without a transaction hash",
            record.key()
        )));
    }

    let key = record.key().to_string();
    let history = entries.entry(key.clone()).or_default();
    let conflict = history.last().is_some_and(|latest| {
        latest.record.attempt != record.attempt && latest.recorded_at > record.started_at
    });

    if conflict {
        tracing::warn!(
            key = %key,
            status = %record.status,
            "Concurrent attempt wrote this key, keeping the latest write"
        );
    }

    let entry = LedgerEntry {
        record: record.clone(),
        recorded_at: Utc::now(),
        conflict,
    };
    history.push(entry.clone());

    tracing::debug!(key = %key, status = %record.status, "Ledger entry recorded");
    Ok(entry)
}

fn latest(entries: &Entries, key: &DeploymentKey) -> Option<DeploymentRecord> {
    entries
        .get(&key.to_string())
        .and_then(|h| h.last())
        .map(|e| e.record.clone())
}

/// Ledger kept in memory; lost when the process exits.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    entries: Mutex<Entries>,
    locks: KeyLocks,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of entries across all keys.
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(Vec::len)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Ledger for MemoryLedger {
    fn record(&self, record: &DeploymentRecord) -> Result<LedgerEntry, LedgerError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        append(&mut entries, record)
    }

    fn lookup(&self, key: &DeploymentKey) -> Result<Option<DeploymentRecord>, LedgerError> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(latest(&entries, key))
    }

    fn history(&self, key: &DeploymentKey) -> Result<Vec<LedgerEntry>, LedgerError> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(&key.to_string()).cloned().unwrap_or_default())
    }

    fn key_locks(&self) -> &KeyLocks {
        &self.locks
    }
}

/// Ledger persisted as a single JSON file.
///
/// Writers from different processes are serialized with an advisory lock on
/// a sibling `.lock` file; each write re-reads the file before appending and
/// replaces it atomically.
#[derive(Debug)]
pub struct FileLedger {
    path: PathBuf,
    locks: KeyLocks,
}

impl FileLedger {
    /// Open a ledger at `path`, creating the parent directory if needed.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        tracing::debug!(path = %path.display(), "Ledger opened");
        Ok(Self {
            path,
            locks: KeyLocks::default(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_file(&self) -> Result<File, LedgerError> {
        Ok(OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(self.path.with_extension("lock"))?)
    }

    fn read(&self) -> Result<Entries, LedgerError> {
        if !self.path.exists() {
            return Ok(Entries::new());
        }
        let content = std::fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(Entries::new());
        }
        Ok(serde_json::from_str(&content)?)
    }

    fn write(&self, entries: &Entries) -> Result<(), LedgerError> {
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(entries)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn with_shared<T>(&self, f: impl FnOnce(&Entries) -> T) -> Result<T, LedgerError> {
        let lock = self.lock_file()?;
        FileExt::lock_shared(&lock)?;
        let result = self.read().map(|entries| f(&entries));
        FileExt::unlock(&lock)?;
        result
    }
}

impl Ledger for FileLedger {
    fn record(&self, record: &DeploymentRecord) -> Result<LedgerEntry, LedgerError> {
        let lock = self.lock_file()?;
        FileExt::lock_exclusive(&lock)?;

        let result = self.read().and_then(|mut entries| {
            let entry = append(&mut entries, record)?;
            self.write(&entries)?;
            Ok(entry)
        });

        FileExt::unlock(&lock)?;
        result
    }

    fn lookup(&self, key: &DeploymentKey) -> Result<Option<DeploymentRecord>, LedgerError> {
        self.with_shared(|entries| latest(entries, key))
    }

    fn history(&self, key: &DeploymentKey) -> Result<Vec<LedgerEntry>, LedgerError> {
        self.with_shared(|entries| entries.get(&key.to_string()).cloned().unwrap_or_default())
    }

    fn key_locks(&self) -> &KeyLocks {
        &self.locks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Salt, record::FailureReason};
    use alloy_core::primitives::{Address, B256};
    use tempdir::TempDir;

    fn key() -> DeploymentKey {
        DeploymentKey::new("Blog", "local", Salt::ZERO)
    }

    #[test]
    fn test_memory_lookup_returns_latest() {
        let ledger = MemoryLedger::new();
        assert!(ledger.lookup(&key()).unwrap().is_none());

        let pending = DeploymentRecord::pending(&key(), Address::ZERO);
        ledger.record(&pending).unwrap();
        ledger
            .record(&pending.clone().deployed(B256::repeat_byte(1)))
            .unwrap();

        let latest = ledger.lookup(&key()).unwrap().unwrap();
        assert_eq!(latest.status, DeploymentStatus::Deployed);
        assert_eq!(ledger.history(&key()).unwrap().len(), 2);
        assert!(ledger.history(&key()).unwrap().iter().all(|e| !e.conflict));
    }

    #[test]
    fn test_rejects_deployed_without_tx_hash() {
        let ledger = MemoryLedger::new();
        let mut record = DeploymentRecord::pending(&key(), Address::ZERO);
        record.status = DeploymentStatus::Deployed;

        assert!(matches!(
            ledger.record(&record),
            Err(LedgerError::Invariant(_))
        ));
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_concurrent_attempt_is_flagged() {
        let ledger = MemoryLedger::new();
        let first = DeploymentRecord::pending(&key(), Address::ZERO);
        let second = DeploymentRecord::pending(&key(), Address::ZERO);

        // `second` started before `first` was written.
        ledger.record(&first.deployed(B256::repeat_byte(1))).unwrap();
        let entry = ledger
            .record(&second.failed(FailureReason::Reverted))
            .unwrap();

        assert!(entry.conflict);
        assert_eq!(
            ledger.lookup(&key()).unwrap().unwrap().status,
            DeploymentStatus::Failed
        );
    }

    #[test]
    fn test_file_ledger_persists_across_instances() {
        let temp_dir = TempDir::new("saltbox-test").expect("Failed to create temp dir");
        let path = temp_dir.path().join("ledger").join("deployments.json");

        let record = DeploymentRecord::pending(&key(), Address::repeat_byte(0xab))
            .deployed(B256::repeat_byte(7));
        FileLedger::open(&path).unwrap().record(&record).unwrap();

        let reopened = FileLedger::open(&path).unwrap();
        assert_eq!(reopened.lookup(&key()).unwrap(), Some(record));

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        let entry = &raw[key().to_string()][0];
        assert_eq!(entry["status"], "deployed");
        assert!(entry["computed_address"].is_string());
        assert!(entry["recorded_at"].is_string());
    }

    #[test]
    fn test_file_ledger_missing_file_is_empty() {
        let temp_dir = TempDir::new("saltbox-test").expect("Failed to create temp dir");
        let ledger = FileLedger::open(temp_dir.path().join("deployments.json")).unwrap();
        assert!(ledger.lookup(&key()).unwrap().is_none());
        assert!(ledger.history(&key()).unwrap().is_empty());
    }

    #[test]
    fn test_file_ledger_corrupted_file() {
        let temp_dir = TempDir::new("saltbox-test").expect("Failed to create temp dir");
        let path = temp_dir.path().join("deployments.json");
        std::fs::write(&path, "{ invalid json }").unwrap();

        let ledger = FileLedger::open(&path).unwrap();
        assert!(matches!(
            ledger.lookup(&key()),
            Err(LedgerError::Serialize(_))
        ));
    }

    #[tokio::test]
    async fn test_key_lock_serializes_same_key() {
        let ledger = Arc::new(MemoryLedger::new());
        let guard = ledger.lock(&key()).await;

        let other = Arc::clone(&ledger);
        let waiter = tokio::spawn(async move {
            let _guard = other.lock(&key()).await;
        });

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(!waiter.is_finished(), "Second lock should wait for the first");

        // A different key is not blocked.
        let other_key = DeploymentKey::new("Token", "local", Salt::ZERO);
        let _other_guard = ledger.lock(&other_key).await;

        drop(guard);
        waiter.await.unwrap();
    }
}
