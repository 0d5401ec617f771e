//! Key derivation primitives for custodied bitcoin wallets.
//!
//! This crate turns a wallet's mnemonic into addresses and signing keys, and builds the
//! multisig redeem scripts those wallets commit to.
//!
//! # Usage
//!
//! ```rust,ignore
//! use btc_custodian_key_deriv::{
//!     account_path, generate_mnemonic, AddressEncoding, Keychain, Network, Purpose,
//! };
//!
//! let mnemonic = generate_mnemonic()?;
//! let keychain = Keychain::from_mnemonic(&mnemonic.to_string(), Network::Testnet)?;
//! let path = account_path(Network::Testnet, Purpose::Bip44);
//!
//! let xpub = keychain.derive_xpub(&path)?;
//! let first = keychain.address_at(&path, 1, AddressEncoding::P2pkh)?;
//! ```

pub mod derive;
pub mod mnemonic;
pub mod network;
pub mod paths;
pub mod script;

pub use derive::{
    child_path, encode_address, script_hash_address, AddressEncoding, DerivationError, Keychain,
    SigningKey,
};
pub use mnemonic::generate_mnemonic;
pub use network::{Network, UnknownNetwork};
pub use paths::{account_path, Purpose, HARDENED_KEY_START, MULTISIG_DEFAULT_ADDRESS_INDEX};
pub use script::{redeem_script, redeem_script_hex, validate_threshold, ScriptError};
