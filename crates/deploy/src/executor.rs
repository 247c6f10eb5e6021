//! The deployment state machine.
//!
//! `resolve account -> compute address -> probe -> deploy if absent -> persist`.
//!
//! The executor keeps no state between calls. Idempotency comes from
//! re-probing the chain and consulting the ledger, so independent processes
//! can target the same chain. Same-key calls inside one process are
//! serialized through the ledger's key lock.

use std::{
    future::Future,
    pin::{Pin, pin},
    sync::Arc,
    time::Duration,
};

use alloy_core::primitives::{Address, Bytes};
use futures::future::join_all;
use tokio::time::Instant;

use crate::{
    address::{SALT_LENGTH, Salt, create2_address},
    artifact::ContractArtifact,
    error::{DeployError, DeployResult},
    ledger::Ledger,
    network::{Account, NetworkProfile, NetworkRegistry},
    probe::{ChainProbe, DeploymentTx},
    record::{DeploymentKey, DeploymentRecord, DeploymentStatus, FailureReason},
    signer::Signer,
};

/// Default timeout for each chain read.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(10);
/// Default timeout for broadcasting a transaction and receiving its receipt.
pub const DEFAULT_SUBMISSION_TIMEOUT: Duration = Duration::from_secs(120);
/// Default interval between receipt polls.
pub const DEFAULT_RECEIPT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// A single deployment to perform.
#[derive(Debug, Clone)]
pub struct DeploymentRequest {
    pub artifact: Arc<ContractArtifact>,
    pub network: NetworkProfile,
    /// Must be exactly 32 bytes.
    pub salt: Bytes,
    pub deployer_account_index: usize,
}

impl DeploymentRequest {
    /// Build a request using account index 0 as deployer.
    pub fn new(artifact: Arc<ContractArtifact>, network: NetworkProfile, salt: impl Into<Bytes>) -> Self {
        Self {
            artifact,
            network,
            salt: salt.into(),
            deployer_account_index: 0,
        }
    }

    /// Build a request for a network looked up by name.
    ///
    /// Fails with `UnknownNetwork` before anything touches the chain.
    pub fn resolve(
        registry: &NetworkRegistry,
        artifact: Arc<ContractArtifact>,
        network_name: &str,
        salt: impl Into<Bytes>,
    ) -> DeployResult<Self> {
        let network = registry.select(network_name)?.clone();
        Ok(Self::new(artifact, network, salt))
    }

    pub fn with_deployer_index(mut self, index: usize) -> Self {
        self.deployer_account_index = index;
        self
    }

    /// Address this request deploys to. No I/O.
    pub fn address(&self) -> DeployResult<Address> {
        Ok(Target::plan(self)?.address)
    }
}

/// How much the executor relies on the ledger.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LedgerPolicy {
    /// Always re-probe the chain; the ledger is corrected when it disagrees.
    #[default]
    Verify,
    /// A successful ledger entry for the same address skips the probe.
    Trust,
}

/// Executor-wide settings.
#[derive(Debug, Clone, Copy)]
pub struct ExecutorOptions {
    pub probe_timeout: Duration,
    pub submission_timeout: Duration,
    pub receipt_poll_interval: Duration,
    pub ledger_policy: LedgerPolicy,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            submission_timeout: DEFAULT_SUBMISSION_TIMEOUT,
            receipt_poll_interval: DEFAULT_RECEIPT_POLL_INTERVAL,
            ledger_policy: LedgerPolicy::default(),
        }
    }
}

/// Per-call settings.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeployOptions {
    /// Ignore the ledger and start a new attempt.
    pub force: bool,
}

/// Everything derived from a request before any I/O.
#[derive(Debug)]
struct Target {
    key: DeploymentKey,
    account: Account,
    address: Address,
    factory: Address,
    data: Bytes,
    init_code_size: usize,
}

impl Target {
    fn plan(request: &DeploymentRequest) -> DeployResult<Self> {
        let network = &request.network;
        let account = network
            .account(request.deployer_account_index)
            .ok_or_else(|| DeployError::UnknownAccount {
                network: network.name.clone(),
                index: request.deployer_account_index,
                available: network.accounts.len(),
            })?
            .clone();

        let salt = Salt::from_slice(&request.salt)?;
        let init_code = &request.artifact.init_code;

        let factory = network.create2_factory;

        // The factory expects `salt ++ init_code` as calldata.
        let mut data = Vec::with_capacity(SALT_LENGTH + init_code.len());
        data.extend_from_slice(salt.as_slice());
        data.extend_from_slice(init_code);

        Ok(Self {
            key: DeploymentKey::new(&request.artifact.name, &network.name, salt),
            address: create2_address(factory, &salt, init_code),
            account,
            factory,
            data: Bytes::from(data),
            init_code_size: init_code.len(),
        })
    }
}

/// Orchestrates deterministic deployments.
#[derive(Debug)]
pub struct Executor<P, S, L> {
    probe: P,
    signer: S,
    ledger: L,
    options: ExecutorOptions,
}

impl<P, S, L> Executor<P, S, L>
where
    P: ChainProbe,
    S: Signer,
    L: Ledger,
{
    pub fn new(probe: P, signer: S, ledger: L) -> Self {
        Self {
            probe,
            signer,
            ledger,
            options: ExecutorOptions::default(),
        }
    }

    pub fn with_options(mut self, options: ExecutorOptions) -> Self {
        self.options = options;
        self
    }

    pub fn probe(&self) -> &P {
        &self.probe
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    /// Address the request would deploy to. No I/O.
    pub fn compute_address(&self, request: &DeploymentRequest) -> DeployResult<Address> {
        request.address()
    }

    /// Deploy the request unless its contract already exists.
    ///
    /// Configuration problems are returned as errors before any I/O. Chain and
    /// transport problems produce a `Failed` record.
    pub async fn deploy(&self, request: &DeploymentRequest) -> DeployResult<DeploymentRecord> {
        self.deploy_until(request, DeployOptions::default(), std::future::pending())
            .await
    }

    /// Deploy while ignoring previous ledger entries for the key.
    pub async fn redeploy(&self, request: &DeploymentRequest) -> DeployResult<DeploymentRecord> {
        self.deploy_until(request, DeployOptions { force: true }, std::future::pending())
            .await
    }

    /// Deploy several units concurrently. Each result is independent.
    pub async fn deploy_all(
        &self,
        requests: &[DeploymentRequest],
    ) -> Vec<DeployResult<DeploymentRecord>> {
        join_all(requests.iter().map(|request| self.deploy(request))).await
    }

    /// Deploy, stopping early when `cancel` completes.
    ///
    /// Cancelling before submission returns a `Failed(Cancelled)` record and
    /// leaves the ledger untouched. Cancelling after submission stops waiting
    /// for the receipt and returns the persisted `Pending` record, which the
    /// next call reconciles against the chain. Timeouts after submission are
    /// reported as failures but also leave the `Pending` record in place.
    pub async fn deploy_until<C>(
        &self,
        request: &DeploymentRequest,
        options: DeployOptions,
        cancel: C,
    ) -> DeployResult<DeploymentRecord>
    where
        C: Future<Output = ()>,
    {
        let target = Target::plan(request)?;
        let network = &request.network;
        let mut cancel = pin!(cancel);

        tracing::info!(
            contract = %target.key.contract_name,
            network = %network.name,
            deployer = %target.account.address,
            address = %target.address,
            "Deploying contract..."
        );

        let _guard = self.ledger.lock(&target.key).await;

        let prior = if options.force {
            None
        } else {
            self.ledger
                .lookup(&target.key)?
                .filter(|prior| prior.computed_address == target.address)
        };

        if let Some(prior) = &prior {
            match prior.status {
                DeploymentStatus::Pending => {
                    if let Some(resolved) = self
                        .reconcile(prior, &target, network, &mut cancel)
                        .await?
                    {
                        return Ok(resolved);
                    }
                }
                status if status.is_success() && self.options.ledger_policy == LedgerPolicy::Trust => {
                    tracing::info!(address = %target.address, "Ledger reports contract present, skipping probe");
                    let record = DeploymentRecord::pending(&target.key, target.address).already_present();
                    self.ledger.record(&record)?;
                    return Ok(record);
                }
                _ => {}
            }
        }

        let attempt = DeploymentRecord::pending(&target.key, target.address);

        let code = match self
            .probe_step(&mut cancel, self.probe.code_at(target.address, network))
            .await
        {
            Ok(code) => code,
            Err(reason) => return Ok(abort(attempt, reason)),
        };

        if !code.is_empty() {
            tracing::info!(address = %target.address, "Contract already present, skipping deployment");
            let record = attempt.already_present();
            self.ledger.record(&record)?;
            return Ok(record);
        }

        if let Some(prior) = prior.filter(|p| p.status.is_success()) {
            tracing::warn!(
                address = %target.address,
                status = %prior.status,
                "Ledger disagrees with chain: no code at address, deploying again"
            );
        }

        self.submit(attempt, &target, network, &mut cancel).await
    }

    /// Resolve a `Pending` entry left by a crashed or cancelled attempt.
    ///
    /// Returns `None` when a fresh attempt should follow.
    async fn reconcile<C>(
        &self,
        prior: &DeploymentRecord,
        target: &Target,
        network: &NetworkProfile,
        cancel: &mut Pin<&mut C>,
    ) -> DeployResult<Option<DeploymentRecord>>
    where
        C: Future<Output = ()>,
    {
        tracing::info!(key = %target.key, tx_hash = ?prior.tx_hash, "Reconciling pending deployment");

        let code = match self
            .probe_step(cancel, self.probe.code_at(target.address, network))
            .await
        {
            Ok(code) => code,
            Err(reason) => return Ok(Some(unresolved(prior.clone(), reason))),
        };

        let receipt = match prior.tx_hash {
            Some(tx_hash) => match self
                .probe_step(cancel, self.probe.receipt(tx_hash, network))
                .await
            {
                Ok(receipt) => receipt,
                Err(reason) => return Ok(Some(unresolved(prior.clone(), reason))),
            },
            None => None,
        };

        let resolved = match (receipt, code.is_empty()) {
            (Some(receipt), false) if receipt.success => prior.clone().deployed(receipt.tx_hash),
            (_, false) => prior.clone().already_present(),
            (Some(receipt), true) if receipt.success => {
                prior.clone().failed(FailureReason::NoCodeAtAddress {
                    address: target.address,
                })
            }
            (Some(receipt), true) => {
                tracing::warn!(tx_hash = %receipt.tx_hash, "Pending deployment reverted");
                self.ledger
                    .record(&prior.clone().failed(FailureReason::Reverted))?;
                return Ok(None);
            }
            (None, true) if prior.tx_hash.is_some() => {
                tracing::warn!(
                    tx_hash = ?prior.tx_hash,
                    "Pending transaction has no receipt yet, not sending another"
                );
                return Ok(Some(prior.clone()));
            }
            (None, true) => return Ok(None),
        };

        Ok(Some(self.finish(resolved)?))
    }

    /// Build, sign, broadcast and await the deployment transaction.
    async fn submit<C>(
        &self,
        attempt: DeploymentRecord,
        target: &Target,
        network: &NetworkProfile,
        cancel: &mut Pin<&mut C>,
    ) -> DeployResult<DeploymentRecord>
    where
        C: Future<Output = ()>,
    {
        if let Some(max) = network
            .resource_limits
            .max_init_code_size()
            .filter(|max| target.init_code_size > *max)
        {
            let record = attempt.failed(FailureReason::ResourceLimit {
                init_code_size: target.init_code_size,
                max,
            });
            self.ledger.record(&record)?;
            return Ok(record);
        }

        let factory_code = match self
            .probe_step(cancel, self.probe.code_at(target.factory, network))
            .await
        {
            Ok(code) => code,
            Err(reason) => return Ok(abort(attempt, reason)),
        };
        if factory_code.is_empty() {
            return self.finish(attempt.failed(FailureReason::FactoryMissing {
                factory: target.factory,
            }));
        }

        let params = match self
            .probe_step(cancel, self.probe.tx_params(target.account.address, network))
            .await
        {
            Ok(params) => params,
            Err(reason) => return Ok(abort(attempt, reason)),
        };

        let tx = DeploymentTx {
            from: target.account.address,
            to: target.factory,
            value: 0,
            data: target.data.clone(),
            gas_limit: network.resource_limits.max_gas,
            nonce: params.nonce,
            gas_price: params.gas_price,
            chain_id: params.chain_id,
        };

        let raw = match self.signer.sign(&tx, &target.account) {
            Ok(raw) => raw,
            Err(e) => return Ok(abort(attempt, FailureReason::SigningFailed(format!("{e:#}")))),
        };

        // Last point at which cancellation leaves no trace.
        if futures::FutureExt::now_or_never(cancel.as_mut()).is_some() {
            return Ok(abort(attempt, FailureReason::Cancelled));
        }

        // A locally signed transaction is reconcilable even if the send times out.
        let attempt = match raw.tx_hash() {
            Some(tx_hash) => attempt.with_tx_hash(tx_hash),
            None => attempt,
        };
        self.ledger.record(&attempt)?;
        let deadline = Instant::now() + self.options.submission_timeout;

        let tx_hash = match tokio::time::timeout_at(deadline, self.probe.send(&raw, network)).await {
            Ok(Ok(tx_hash)) => tx_hash,
            Ok(Err(e)) => {
                return self.finish(attempt.failed(FailureReason::ProbeUnavailable(format!("{e:#}"))));
            }
            Err(_) => return Ok(unresolved(attempt, FailureReason::SubmissionTimeout)),
        };

        let pending = if attempt.tx_hash == Some(tx_hash) {
            attempt
        } else {
            let pending = attempt.with_tx_hash(tx_hash);
            self.ledger.record(&pending)?;
            pending
        };

        let wait = tokio::time::timeout_at(
            deadline,
            self.probe
                .wait_receipt(tx_hash, network, self.options.receipt_poll_interval),
        );

        let receipt = tokio::select! {
            biased;
            _ = cancel.as_mut() => return Ok(left_pending(pending)),
            result = wait => match result {
                Ok(Ok(receipt)) => receipt,
                Ok(Err(e)) => {
                    return Ok(unresolved(pending, FailureReason::ProbeUnavailable(format!("{e:#}"))));
                }
                Err(_) => return Ok(unresolved(pending, FailureReason::SubmissionTimeout)),
            },
        };

        if !receipt.success {
            return self.finish(pending.failed(FailureReason::Reverted));
        }
        if let Some(actual) = receipt.deployed_address.filter(|a| *a != target.address) {
            return self.finish(pending.failed(FailureReason::AddressMismatch {
                expected: target.address,
                actual,
            }));
        }

        // A successful call into the factory does not prove the contract exists.
        let code = match self
            .probe_step(cancel, self.probe.code_at(target.address, network))
            .await
        {
            Ok(code) => code,
            Err(FailureReason::Cancelled) => return Ok(left_pending(pending)),
            Err(reason) => return Ok(unresolved(pending, reason)),
        };

        let record = if code.is_empty() {
            pending.failed(FailureReason::NoCodeAtAddress {
                address: target.address,
            })
        } else {
            tracing::info!(
                address = %target.address,
                tx_hash = %receipt.tx_hash,
                "Contract deployed"
            );
            pending.deployed(receipt.tx_hash)
        };

        self.finish(record)
    }

    fn finish(&self, record: DeploymentRecord) -> DeployResult<DeploymentRecord> {
        if let Some(reason) = &record.failure {
            tracing::error!(key = %record.key(), reason = %reason, "Deployment failed");
        }
        self.ledger.record(&record)?;
        Ok(record)
    }

    /// Run a chain read under the probe timeout, giving up if `cancel` fires.
    async fn probe_step<T, C>(
        &self,
        cancel: &mut Pin<&mut C>,
        fut: impl Future<Output = anyhow::Result<T>>,
    ) -> Result<T, FailureReason>
    where
        C: Future<Output = ()>,
    {
        tokio::select! {
            biased;
            _ = cancel.as_mut() => Err(FailureReason::Cancelled),
            result = tokio::time::timeout(self.options.probe_timeout, fut) => match result {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(e)) => Err(FailureReason::ProbeUnavailable(format!("{e:#}"))),
                Err(_) => Err(FailureReason::ProbeTimeout),
            },
        }
    }
}

/// A failure before anything was sent: reported, never persisted.
fn abort(record: DeploymentRecord, reason: FailureReason) -> DeploymentRecord {
    tracing::warn!(key = %record.key(), reason = %reason, "Deployment aborted before submission");
    record.failed(reason)
}

/// The transaction may be in flight: reported as failed, but the ledger keeps
/// the `Pending` entry so the next call reconciles it.
fn unresolved(record: DeploymentRecord, reason: FailureReason) -> DeploymentRecord {
    tracing::warn!(
        key = %record.key(),
        tx_hash = ?record.tx_hash,
        reason = %reason,
        "Deployment outcome unknown, left pending"
    );
    record.failed(reason)
}

fn left_pending(record: DeploymentRecord) -> DeploymentRecord {
    tracing::warn!(
        key = %record.key(),
        tx_hash = ?record.tx_hash,
        "Cancelled while waiting for receipt, deployment left pending"
    );
    record
}
