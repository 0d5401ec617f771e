//! Custodial HD wallet service.
//!
//! The [`Custodian`] creates standard (BIP44/BIP49), native segwit (BIP84) and m-of-n multisig
//! wallets, hands out receiving addresses and signs transaction digests without ever exposing
//! key material. Every address or signature costs one single-use credential, issued against a
//! wallet with [`Custodian::issue_credential`].
//!
//! State lives in a [`Storage`](btc_custodian_db::Storage) backend under the following keys:
//!
//! ```text
//! wallet/<name>            wallet/multisig/<name>    wallet/segwit/<name>
//! address/<name>                                     address/segwit/<name>
//! creds/<lease id>         creds/multisig/<lease id> creds/segwit/<lease id>
//! salt
//! ```

pub mod address;
pub mod config;
pub mod credentials;
pub mod errors;
pub mod keys;
pub mod records;
pub mod service;
pub mod signer;
pub mod wallet;

pub use config::CustodianConfig;
pub use credentials::{IssuedCredential, Lease};
pub use errors::{CustodianError, CustodianResult, ErrorKind};
pub use keys::WalletKind;
pub use service::Custodian;
pub use wallet::{CreatedWallet, MultisigWalletInfo, Wallet, WalletInfo};
