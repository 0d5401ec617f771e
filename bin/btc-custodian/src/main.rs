//! Command-line front end of the bitcoin custodian.

use std::{fs, path::Path, sync::Arc};

use anyhow::Context;
use args::{Cli, Commands};
use btc_custodian::{Custodian, Lease};
use btc_custodian_common::{logging, logging::LoggerConfig};
use btc_custodian_db::{SqliteStorage, Storage};
use clap::Parser;
use config::Config;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::json;
use tokio::runtime;
use tracing::{debug, info, trace};

mod args;
mod config;

fn main() -> anyhow::Result<()> {
    logging::init(LoggerConfig::with_base_name("btc-custodian"));

    let cli = Cli::parse();
    let config = parse_toml::<Config>(&cli.config)?;

    let runtime = runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to create runtime")?;

    runtime.block_on(run(cli.command, config))
}

async fn run(command: Commands, config: Config) -> anyhow::Result<()> {
    if let Some(parent) = config.database_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    let storage = SqliteStorage::connect(&config.database_url(), config.db.clone())
        .await
        .context("failed to open database")?;
    let custodian = Custodian::new(Arc::new(storage), config.custodian.clone()).await?;

    let swept = custodian.sweep_expired_credentials().await?;
    debug!(%swept, "swept expired credentials on startup");

    execute(&custodian, command).await
}

async fn execute<S: Storage>(custodian: &Custodian<S>, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::CreateWallet {
            network,
            name,
            segwit,
        } => print_json(&custodian.create_wallet(&network, &name, segwit).await?),
        Commands::ReadWallet { name } => print_found(&name, custodian.read_wallet(&name).await?),
        Commands::CreateMultisigWallet {
            network,
            name,
            pubkeys,
            m,
            n,
        } => {
            custodian
                .create_multisig_wallet(&network, &name, &pubkeys, m, n)
                .await?;
            print_json(&json!({ "name": name }))
        }
        Commands::ReadMultisigWallet { name } => {
            print_found(&name, custodian.read_multisig_wallet(&name).await?)
        }
        Commands::CreateSegwitWallet { network, name } => {
            print_json(&custodian.create_segwit_wallet(&network, &name).await?)
        }
        Commands::ReadSegwitWallet { name } => {
            print_found(&name, custodian.read_segwit_wallet(&name).await?)
        }
        Commands::IssueCredential { kind, name } => {
            let issued = custodian.issue_credential(kind.into(), &name).await?;
            print_json(&json!({
                "token": issued.token,
                "lease": issued.lease,
                "ttl_secs": issued.ttl.as_secs(),
            }))
        }
        Commands::RevokeCredential { kind, lease_id } => {
            custodian
                .revoke_credential(&Lease {
                    kind: kind.into(),
                    lease_id,
                })
                .await?;
            info!("credential revoked");
            Ok(())
        }
        Commands::SweepCredentials => {
            let removed = custodian.sweep_expired_credentials().await?;
            print_json(&json!({ "removed": removed }))
        }
        Commands::DeriveAddress { kind, name, token } => {
            let address = custodian.derive_address(kind.into(), &name, &token).await?;
            print_json(&json!({ "address": address }))
        }
        Commands::SignTransaction {
            name,
            raw_tx,
            mode,
            token,
        } => {
            let signature = custodian
                .sign_transaction(&name, &raw_tx, mode.as_deref(), &token)
                .await?;
            print_json(&json!({ "signature": signature }))
        }
    }
}

/// Prints `null` for a missing wallet, which is not an error.
fn print_found<T: Serialize>(name: &str, value: Option<T>) -> anyhow::Result<()> {
    if value.is_none() {
        info!(%name, "wallet not found");
    }
    print_json(&value)
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", to_json(value)?);
    Ok(())
}

fn to_json<T: Serialize>(value: &T) -> anyhow::Result<String> {
    Ok(serde_json::to_string_pretty(value)?)
}

/// Reads and parses a TOML file from the given path into the given type `T`.
fn parse_toml<T>(path: impl AsRef<Path>) -> anyhow::Result<T>
where
    T: std::fmt::Debug + DeserializeOwned,
{
    let path = path.as_ref();
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read TOML file {}", path.display()))?;
    trace!(?path, "read file");

    let parsed = toml::from_str::<T>(&contents)
        .with_context(|| format!("failed to parse TOML file {}", path.display()))?;
    debug!(?parsed, "parsed TOML file");

    Ok(parsed)
}
