//! Parses command-line arguments for the custodian CLI.

use std::path::PathBuf;

use btc_custodian::WalletKind;
use clap::{crate_version, Parser, Subcommand, ValueEnum};

#[derive(Debug, Parser)]
#[clap(
    name = "btc-custodian",
    about = "Custodial HD wallet service for bitcoin",
    version = crate_version!()
)]
pub(crate) struct Cli {
    #[clap(
        long,
        short = 'c',
        help = "The file containing the configuration for the custodian",
        default_value = "config.toml"
    )]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Subcommand)]
pub(crate) enum Commands {
    /// Create a standard (BIP44, or BIP49 with --segwit) wallet and print its mnemonic.
    CreateWallet {
        #[arg(long, help = "mainnet, testnet or regtest")]
        network: String,

        #[arg(long)]
        name: String,

        #[arg(long, help = "hand out P2SH-wrapped segwit addresses")]
        segwit: bool,
    },

    /// Print the network and xpub of a standard wallet.
    ReadWallet {
        #[arg(long)]
        name: String,
    },

    /// Create an m-of-n multisig wallet from n-1 co-signer keys.
    CreateMultisigWallet {
        #[arg(long, help = "mainnet, testnet or regtest")]
        network: String,

        #[arg(long)]
        name: String,

        #[arg(
            long,
            value_delimiter = ',',
            help = "comma separated hex public keys of the other co-signers"
        )]
        pubkeys: Vec<String>,

        #[arg(short, help = "signatures required")]
        m: u32,

        #[arg(short, help = "total keys, including the custodian's own")]
        n: u32,
    },

    /// Print the threshold, keys and redeem script of a multisig wallet.
    ReadMultisigWallet {
        #[arg(long)]
        name: String,
    },

    /// Create a native segwit (BIP84) wallet and print its mnemonic.
    CreateSegwitWallet {
        #[arg(long, help = "mainnet, testnet or regtest")]
        network: String,

        #[arg(long)]
        name: String,
    },

    /// Print the network and xpub of a native segwit wallet.
    ReadSegwitWallet {
        #[arg(long)]
        name: String,
    },

    /// Issue a single-use credential for a wallet.
    IssueCredential {
        #[arg(long, value_enum, default_value_t = KindArg::Standard)]
        kind: KindArg,

        #[arg(long)]
        name: String,
    },

    /// Revoke an unused credential by its lease id.
    RevokeCredential {
        #[arg(long, value_enum, default_value_t = KindArg::Standard)]
        kind: KindArg,

        #[arg(long)]
        lease_id: String,
    },

    /// Delete every expired credential.
    SweepCredentials,

    /// Hand out the next receiving address of a wallet.
    DeriveAddress {
        #[arg(long, value_enum, default_value_t = KindArg::Standard)]
        kind: KindArg,

        #[arg(long)]
        name: String,

        #[arg(long, env = "BTC_CUSTODIAN_TOKEN", hide_env_values = true)]
        token: String,
    },

    /// Sign the double-SHA256 digest of a raw transaction.
    SignTransaction {
        #[arg(long)]
        name: String,

        #[arg(long, help = "hex-encoded raw transaction")]
        raw_tx: String,

        #[arg(long, help = "standard (default), multisig or segwit")]
        mode: Option<String>,

        #[arg(long, env = "BTC_CUSTODIAN_TOKEN", hide_env_values = true)]
        token: String,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub(crate) enum KindArg {
    Standard,
    Multisig,
    Segwit,
}

impl From<KindArg> for WalletKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Standard => WalletKind::Standard,
            KindArg::Multisig => WalletKind::Multisig,
            KindArg::Segwit => WalletKind::Segwit,
        }
    }
}
