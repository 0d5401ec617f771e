//! Core derivation functions for custodied wallets.
//!
//! A [`Keychain`] is the master extended private key recovered from a wallet's mnemonic. It is
//! the only way to reach child keys, and the secret material it derives is handed out as opaque
//! wrappers ([`SigningKey`]) that can sign but never reveal the key.
//!
//! # Usage
//!
//! ```rust,ignore
//! use btc_custodian_key_deriv::{AddressEncoding, Keychain, Network, Purpose, account_path};
//!
//! let keychain = Keychain::from_mnemonic(&phrase, Network::Testnet)?;
//! let path = account_path(Network::Testnet, Purpose::Bip84);
//!
//! let xpub = keychain.derive_xpub(&path)?;
//! let address = keychain.address_at(&path, 1, AddressEncoding::P2wpkh)?;
//! let signature = keychain.signing_key_at(&path, 1)?.sign_double_sha256(&raw_tx);
//! ```

use std::fmt;

use bip39::Mnemonic;
use bitcoin::{
    address::P2shError,
    bip32::{self, ChildNumber, Xpriv, Xpub},
    hashes::{sha256d, Hash},
    secp256k1::{ecdsa::Signature, Message, SecretKey},
    Address, CompressedPublicKey, Script,
};
use secp256k1::SECP256K1;
use zeroize::{Zeroize, Zeroizing};

use crate::{network::Network, paths::is_hardened};

/// Error type for key derivation operations.
#[derive(Debug, thiserror::Error)]
pub enum DerivationError {
    /// The stored phrase is not a valid BIP39 mnemonic.
    #[error("invalid mnemonic: {0}")]
    Mnemonic(#[from] bip39::Error),

    /// BIP32 derivation failed.
    #[error("BIP32 derivation error: {0}")]
    Bip32(#[from] bip32::Error),

    /// Receiving addresses only use non-hardened child indices.
    #[error("child index {0} is out of the non-hardened range")]
    ChildIndexOutOfRange(u32),

    /// A script could not be wrapped into a P2SH address.
    #[error("invalid redeem script: {0}")]
    ScriptHash(#[from] P2shError),
}

/// How a derived public key is turned into an address string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressEncoding {
    /// Legacy pay-to-pubkey-hash.
    P2pkh,
    /// Pay-to-witness-pubkey-hash nested in pay-to-script-hash (BIP49).
    P2shP2wpkh,
    /// Native pay-to-witness-pubkey-hash (BIP84).
    P2wpkh,
}

/// Encodes `pubkey` as an address of the given `encoding`.
pub fn encode_address(
    pubkey: &CompressedPublicKey,
    encoding: AddressEncoding,
    network: Network,
) -> Address {
    let network = network.to_bitcoin();
    match encoding {
        AddressEncoding::P2pkh => Address::p2pkh(pubkey.pubkey_hash(), network),
        AddressEncoding::P2shP2wpkh => Address::p2shwpkh(pubkey, network),
        AddressEncoding::P2wpkh => Address::p2wpkh(pubkey, network),
    }
}

/// Pay-to-script-hash address committing to `redeem_script`.
pub fn script_hash_address(
    redeem_script: &Script,
    network: Network,
) -> Result<Address, DerivationError> {
    Ok(Address::p2sh(redeem_script, network.to_bitcoin())?)
}

/// Appends a receiving `child_index` to an account-level `path`.
pub fn child_path(path: &[u32], child_index: u32) -> Result<Vec<ChildNumber>, DerivationError> {
    if is_hardened(child_index) {
        return Err(DerivationError::ChildIndexOutOfRange(child_index));
    }

    Ok(path
        .iter()
        .copied()
        .chain(std::iter::once(child_index))
        .map(ChildNumber::from)
        .collect())
}

/// Master extended private key of a single wallet.
///
/// This type can only be constructed from a seed or a mnemonic. Its secret fields are erased
/// on drop.
pub struct Keychain {
    master: Xpriv,
    network: Network,
}

impl fmt::Debug for Keychain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keychain")
            .field("network", &self.network)
            .field("fingerprint", &self.master.fingerprint(SECP256K1))
            .finish_non_exhaustive()
    }
}

impl Keychain {
    /// Recovers the keychain of a BIP39 `phrase` with an empty passphrase.
    pub fn from_mnemonic(phrase: &str, network: Network) -> Result<Self, DerivationError> {
        let mnemonic = Mnemonic::parse(phrase)?;
        let seed = Zeroizing::new(mnemonic.to_seed(""));
        Self::from_seed(&seed[..], network)
    }

    /// Creates the master key for `seed` on `network`.
    pub fn from_seed(seed: &[u8], network: Network) -> Result<Self, DerivationError> {
        let master = Xpriv::new_master(network.to_bitcoin(), seed)?;
        Ok(Self { master, network })
    }

    /// Network the keychain serializes its keys for.
    pub const fn network(&self) -> Network {
        self.network
    }

    /// Derives the extended private key at `path`, one child at a time from the master key.
    ///
    /// Indices at or above `2^31` use hardened derivation.
    fn derive_xpriv(&self, path: &[u32]) -> Result<Xpriv, DerivationError> {
        let path: Vec<ChildNumber> = path.iter().copied().map(ChildNumber::from).collect();
        Ok(self.master.derive_priv(SECP256K1, &path)?)
    }

    /// Neutered counterpart of the extended private key at `path`, safe to disclose.
    pub fn derive_xpub(&self, path: &[u32]) -> Result<Xpub, DerivationError> {
        let mut xpriv = self.derive_xpriv(path)?;
        let xpub = Xpub::from_priv(SECP256K1, &xpriv);
        xpriv.private_key.non_secure_erase();
        Ok(xpub)
    }

    /// Compressed public key of receiving child `child_index` under `path`.
    pub fn public_key_at(
        &self,
        path: &[u32],
        child_index: u32,
    ) -> Result<CompressedPublicKey, DerivationError> {
        Ok(self.signing_key_at(path, child_index)?.public_key())
    }

    /// Address of receiving child `child_index` under `path`.
    pub fn address_at(
        &self,
        path: &[u32],
        child_index: u32,
        encoding: AddressEncoding,
    ) -> Result<Address, DerivationError> {
        let pubkey = self.public_key_at(path, child_index)?;
        Ok(encode_address(&pubkey, encoding, self.network))
    }

    /// Signing key of receiving child `child_index` under `path`.
    pub fn signing_key_at(
        &self,
        path: &[u32],
        child_index: u32,
    ) -> Result<SigningKey, DerivationError> {
        let path = child_path(path, child_index)?;
        let child = self.master.derive_priv(SECP256K1, &path)?;
        Ok(SigningKey(child.private_key))
    }
}

// Manual Drop implementation to zeroize keys on drop.
impl Drop for Keychain {
    fn drop(&mut self) {
        self.zeroize();
    }
}

impl Zeroize for Keychain {
    fn zeroize(&mut self) {
        let Self { master, .. } = self;

        // NOTE: `SecretKey::non_secure_erase` writes `1`s to the memory.
        master.private_key.non_secure_erase();
        master.depth.zeroize();
        {
            let fingerprint: &mut [u8; 4] = master.parent_fingerprint.as_mut();
            fingerprint.zeroize();
        }
        {
            let chaincode: &mut [u8; 32] = master.chain_code.as_mut();
            chaincode.zeroize();
        }
    }
}

/// A derived private key that can sign digests but never exposes its secret.
pub struct SigningKey(SecretKey);

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SigningKey").field(&self.public_key()).finish()
    }
}

impl SigningKey {
    /// Compressed public key matching this signing key.
    pub fn public_key(&self) -> CompressedPublicKey {
        CompressedPublicKey(self.0.public_key(SECP256K1))
    }

    /// Signs a 32-byte digest with deterministic (RFC6979), low-S ECDSA.
    pub fn sign_digest(&self, digest: [u8; 32]) -> Signature {
        SECP256K1.sign_ecdsa(&Message::from_digest(digest), &self.0)
    }

    /// Signs `SHA256(SHA256(data))`.
    pub fn sign_double_sha256(&self, data: &[u8]) -> Signature {
        self.sign_digest(sha256d::Hash::hash(data).to_byte_array())
    }
}

impl Drop for SigningKey {
    fn drop(&mut self) {
        self.0.non_secure_erase();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paths::{account_path, Purpose, HARDENED_KEY_START};

    const ABANDON: &str =
        "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    #[test]
    fn bip44_vector() {
        let keychain = Keychain::from_mnemonic(ABANDON, Network::Mainnet).unwrap();
        let path = account_path(Network::Mainnet, Purpose::Bip44);
        let address = keychain.address_at(&path, 0, AddressEncoding::P2pkh).unwrap();
        assert_eq!(address.to_string(), "1LqBGSKuX5yYUonjxT5qGfpUsXKYYWeabA");
    }

    #[test]
    fn bip49_vector() {
        let keychain = Keychain::from_mnemonic(ABANDON, Network::Testnet).unwrap();
        let path = account_path(Network::Testnet, Purpose::Bip49);
        let address = keychain
            .address_at(&path, 0, AddressEncoding::P2shP2wpkh)
            .unwrap();
        assert_eq!(address.to_string(), "2Mww8dCYPUpKHofjgcXcBCEGmniw9CoaiD2");
    }

    #[test]
    fn bip84_vector() {
        let keychain = Keychain::from_mnemonic(ABANDON, Network::Mainnet).unwrap();
        let path = account_path(Network::Mainnet, Purpose::Bip84);
        let address = keychain.address_at(&path, 0, AddressEncoding::P2wpkh).unwrap();
        assert_eq!(
            address.to_string(),
            "bc1qcr8te4kr609gcawutmrza0j4xv80jy8z306fyu"
        );
    }

    #[test]
    fn xpub_is_deterministic_and_network_tagged() {
        let path = account_path(Network::Testnet, Purpose::Bip44);
        let first = Keychain::from_mnemonic(ABANDON, Network::Testnet)
            .unwrap()
            .derive_xpub(&path)
            .unwrap()
            .to_string();
        let second = Keychain::from_mnemonic(ABANDON, Network::Testnet)
            .unwrap()
            .derive_xpub(&path)
            .unwrap()
            .to_string();

        assert_eq!(first, second);
        assert!(first.starts_with("tpub"), "testnet xpub must be a tpub: {first}");

        let mainnet = Keychain::from_mnemonic(ABANDON, Network::Mainnet)
            .unwrap()
            .derive_xpub(&account_path(Network::Mainnet, Purpose::Bip44))
            .unwrap()
            .to_string();
        assert!(mainnet.starts_with("xpub"));
    }

    #[test]
    fn derived_xpub_matches_child_public_keys() {
        let keychain = Keychain::from_mnemonic(ABANDON, Network::Regtest).unwrap();
        let path = account_path(Network::Regtest, Purpose::Bip44);
        let xpub = keychain.derive_xpub(&path).unwrap();

        let from_xpub = xpub
            .derive_pub(SECP256K1, &[ChildNumber::from(7)])
            .unwrap()
            .to_pub();
        assert_eq!(from_xpub, keychain.public_key_at(&path, 7).unwrap());
    }

    #[test]
    fn xpub_is_the_neutered_account_key() {
        let keychain = Keychain::from_mnemonic(ABANDON, Network::Testnet).unwrap();
        let path = account_path(Network::Testnet, Purpose::Bip84);

        let xpriv = keychain.derive_xpriv(&path).unwrap();
        let xpub = keychain.derive_xpub(&path).unwrap();

        assert_eq!(xpub, Xpub::from_priv(SECP256K1, &xpriv));
        assert!(!xpub.to_string().contains(&xpriv.to_string()[4..]));
    }

    #[test]
    fn hardened_child_index_is_rejected() {
        let keychain = Keychain::from_mnemonic(ABANDON, Network::Testnet).unwrap();
        let path = account_path(Network::Testnet, Purpose::Bip44);
        assert!(matches!(
            keychain.address_at(&path, HARDENED_KEY_START, AddressEncoding::P2pkh),
            Err(DerivationError::ChildIndexOutOfRange(HARDENED_KEY_START))
        ));
    }

    #[test]
    fn malformed_mnemonic_is_rejected() {
        assert!(matches!(
            Keychain::from_mnemonic("not a mnemonic", Network::Testnet),
            Err(DerivationError::Mnemonic(_))
        ));
    }

    #[test]
    fn signatures_verify_against_derived_key() {
        let keychain = Keychain::from_mnemonic(ABANDON, Network::Testnet).unwrap();
        let path = account_path(Network::Testnet, Purpose::Bip44);
        let key = keychain.signing_key_at(&path, 3).unwrap();

        let data = b"raw transaction bytes";
        let signature = key.sign_double_sha256(data);
        let digest = sha256d::Hash::hash(data).to_byte_array();

        SECP256K1
            .verify_ecdsa(&Message::from_digest(digest), &signature, &key.public_key().0)
            .expect("signature must verify");
        assert_eq!(signature, key.sign_double_sha256(data), "signing is deterministic");
    }

    #[test]
    fn test_zeroize() {
        let mut keychain = Keychain::from_seed(&[2u8; 32], Network::Regtest).unwrap();
        assert_ne!(*keychain.master.chain_code.as_bytes(), [0u8; 32]);

        keychain.zeroize();

        // NOTE: SecretKey::non_secure_erase writes `1`s to the memory.
        assert_eq!(keychain.master.private_key.secret_bytes(), [1u8; 32]);
        assert_eq!(*keychain.master.chain_code.as_bytes(), [0u8; 32]);
        assert_eq!(*keychain.master.parent_fingerprint.as_bytes(), [0u8; 4]);
        assert_eq!(keychain.master.depth, 0);
    }
}
