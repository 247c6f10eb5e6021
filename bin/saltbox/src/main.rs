//! saltbox is a CLI tool to deploy contracts at deterministic addresses.

mod cli;

use std::{io::Write, path::Path, process::ExitCode, sync::Arc};

use anyhow::Result;
use clap::Parser;
use comfy_table::Table;
use futures::future::join_all;

use cli::{Cli, Command, Target};
use saltbox_deploy::{
    AccountSigner, ArtifactLoader, Config, DeployOptions, DeployResult, DeploymentKey,
    DeploymentRecord, DeploymentRequest, DeploymentStatus, DirArtifactLoader, Executor, FileLedger, JsonRpcProbe,
    Ledger, NetworkProfile, parse_salt,
};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Logs go to stderr so records printed on stdout stay machine readable.
    tracing_subscriber::fmt()
        .with_max_level(cli.verbosity)
        .with_writer(std::io::stderr)
        .init();

    let load_config = || Config::load(&cli.config);

    match cli.command {
        Command::Init { force } => {
            init(&cli.config, force)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Deploy {
            contracts,
            target,
            force,
        } => deploy(&load_config()?, &contracts, &target, force).await,
        Command::Address { contract, target } => {
            let request = request(&load_config()?, &contract, &target)?;
            println!("{}", request.address()?);
            Ok(ExitCode::SUCCESS)
        }
        Command::Accounts { network } => {
            accounts(&load_config()?, network.as_deref())?;
            Ok(ExitCode::SUCCESS)
        }
        Command::History { contract, target } => {
            history(&load_config()?, &contract, &target)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn init(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        anyhow::bail!(
            "{} already exists, use --force to overwrite it",
            path.display()
        );
    }
    Config::default().save_to_file(path)
}

fn network_name<'a>(config: &'a Config, network: Option<&'a str>) -> &'a str {
    network.unwrap_or(&config.default_network)
}

/// Build the request for one contract, without touching the chain.
fn request(config: &Config, contract: &str, target: &Target) -> Result<DeploymentRequest> {
    let registry = config.registry()?;
    let salt = parse_salt(&target.salt)?;
    let artifact = DirArtifactLoader::new(&config.artifacts_dir).load(contract)?;

    let request = DeploymentRequest::resolve(
        &registry,
        Arc::new(artifact),
        network_name(config, target.network.as_deref()),
        salt.as_slice().to_vec(),
    )?
    .with_deployer_index(config.role_index(&target.account)?);

    Ok(request)
}

async fn deploy(
    config: &Config,
    contracts: &[String],
    target: &Target,
    force: bool,
) -> Result<ExitCode> {
    let requests = contracts
        .iter()
        .map(|contract| request(config, contract, target))
        .collect::<Result<Vec<_>>>()?;

    let executor = Executor::new(
        JsonRpcProbe::new()?,
        AccountSigner,
        FileLedger::open(&config.ledger_path)?,
    )
    .with_options(config.executor_options());

    let results = join_all(requests.iter().map(|request| {
        executor.deploy_until(request, DeployOptions { force }, async {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupted, stopping deployment...");
            }
        })
    }))
    .await;

    let code = report(contracts, results, &mut std::io::stdout().lock())?;
    Ok(ExitCode::from(code))
}

/// Print every record and log every error, then pick the exit code.
fn report(
    contracts: &[String],
    results: Vec<DeployResult<DeploymentRecord>>,
    out: &mut impl Write,
) -> Result<u8> {
    let mut records = Vec::with_capacity(results.len());
    let mut errors = 0;

    for (contract, result) in contracts.iter().zip(results) {
        match result {
            Ok(record) => {
                writeln!(out, "{}", serde_json::to_string_pretty(&record)?)?;
                records.push(record);
            }
            Err(e) => {
                tracing::error!(contract = %contract, error = %e, "Deployment error");
                errors += 1;
            }
        }
    }

    Ok(if errors > 0 { 1 } else { exit_code(&records) })
}

/// 1 if anything failed, 2 if anything is still pending, 0 otherwise.
fn exit_code(records: &[DeploymentRecord]) -> u8 {
    if records.iter().any(|r| r.status == DeploymentStatus::Failed) {
        1
    } else if records.iter().any(|r| r.status == DeploymentStatus::Pending) {
        2
    } else {
        0
    }
}

fn accounts(config: &Config, network: Option<&str>) -> Result<()> {
    let registry = config.registry()?;
    let profile: &NetworkProfile = registry.select(network_name(config, network))?;

    let roles = |index: usize| {
        config
            .named_accounts
            .iter()
            .filter(|(_, i)| **i == index)
            .map(|(role, _)| role.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    };

    let mut table = Table::new();
    table.set_header(vec!["#", "Address", "Roles", "Signing"]);
    for (index, account) in profile.accounts.iter().enumerate() {
        table.add_row(vec![
            index.to_string(),
            account.address.to_string(),
            roles(index),
            if account.key.is_some() { "local" } else { "node" }.to_string(),
        ]);
    }

    println!("{}: {}", profile.name, profile.endpoint);
    println!("{table}");
    Ok(())
}

fn history(config: &Config, contract: &str, target: &Target) -> Result<()> {
    let salt = parse_salt(&target.salt)?;
    let key = DeploymentKey::new(
        contract,
        network_name(config, target.network.as_deref()),
        salt,
    );
    let ledger = FileLedger::open(&config.ledger_path)?;
    let entries = ledger.history(&key)?;

    if entries.is_empty() {
        println!("No ledger entries for {key}");
        return Ok(());
    }

    let mut table = Table::new();
    table.set_header(vec![
        "Recorded at",
        "Status",
        "Address",
        "Tx hash",
        "Failure",
        "Conflict",
    ]);
    for entry in entries {
        let record = entry.record;
        table.add_row(vec![
            entry.recorded_at.to_rfc3339(),
            record.status.to_string(),
            record.computed_address.to_string(),
            record.tx_hash.map(|h| h.to_string()).unwrap_or_default(),
            record.failure.map(|f| f.to_string()).unwrap_or_default(),
            if entry.conflict { "yes" } else { "" }.to_string(),
        ]);
    }

    println!("{key}");
    println!("{table}");
    Ok(())
}
