//! Wallet variants and the store that creates and loads them.

use std::sync::Arc;

use btc_custodian_db::Storage;
use btc_custodian_key_deriv::{
    account_path, generate_mnemonic,
    script::{parse_pubkey, MAX_MULTISIG_N},
    script_hash_address, AddressEncoding, DerivationError, Keychain, Network, Purpose,
    ScriptError, MULTISIG_DEFAULT_ADDRESS_INDEX,
};
use bitcoin::ScriptBuf;
use serde::Serialize;
use tracing::{debug, info};

use crate::{
    errors::{CustodianError, CustodianResult},
    keys::WalletKind,
    records::{MultisigWalletRecord, VersionedRecord, WalletRecord},
};

/// A stored wallet of any kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Wallet {
    /// BIP44 (or BIP49 when its `segwit` flag is set) single-key wallet.
    Standard(WalletRecord),
    /// BIP84 single-key wallet.
    Segwit(WalletRecord),
    /// m-of-n wallet holding one of the keys.
    Multisig(MultisigWalletRecord),
}

impl Wallet {
    /// Kind of the wallet.
    pub const fn kind(&self) -> WalletKind {
        match self {
            Self::Standard(_) => WalletKind::Standard,
            Self::Segwit(_) => WalletKind::Segwit,
            Self::Multisig(_) => WalletKind::Multisig,
        }
    }

    /// The mnemonic, network and path the wallet's keys derive from.
    pub(crate) const fn signing_material(&self) -> &WalletRecord {
        match self {
            Self::Standard(record) | Self::Segwit(record) => record,
            Self::Multisig(multisig) => &multisig.wallet,
        }
    }

    /// Network of the wallet.
    pub const fn network(&self) -> Network {
        self.signing_material().network
    }

    /// Master keychain recovered from the wallet's mnemonic.
    pub(crate) fn keychain(&self) -> Result<Keychain, DerivationError> {
        let material = self.signing_material();
        Keychain::from_mnemonic(&material.mnemonic, material.network)
    }

    /// Child index whose key signs for this wallet, given the last address index handed out.
    pub const fn signing_index(&self, last_child_index: u32) -> u32 {
        match self {
            Self::Multisig(_) => MULTISIG_DEFAULT_ADDRESS_INDEX,
            Self::Standard(_) | Self::Segwit(_) => last_child_index,
        }
    }

    /// Address of the wallet at `child_index`. Multisig wallets have a single address and ignore
    /// the index.
    pub fn compute_address(&self, child_index: u32) -> CustodianResult<String> {
        match self {
            Self::Multisig(multisig) => multisig_address(multisig),
            Self::Standard(_) | Self::Segwit(_) => {
                self.address_with(&self.keychain()?, child_index)
            }
        }
    }

    /// Same as [`Self::compute_address`] with an already recovered keychain.
    pub(crate) fn address_with(
        &self,
        keychain: &Keychain,
        child_index: u32,
    ) -> CustodianResult<String> {
        let (record, encoding) = match self {
            Self::Multisig(multisig) => return multisig_address(multisig),
            Self::Standard(record) if record.segwit => (record, AddressEncoding::P2shP2wpkh),
            Self::Standard(record) => (record, AddressEncoding::P2pkh),
            Self::Segwit(record) => (record, AddressEncoding::P2wpkh),
        };

        Ok(keychain
            .address_at(&record.derivation_path, child_index, encoding)?
            .to_string())
    }

    fn decode(kind: WalletKind, bytes: &[u8]) -> CustodianResult<Self> {
        Ok(match kind {
            WalletKind::Standard => Self::Standard(WalletRecord::from_bytes(bytes)?),
            WalletKind::Segwit => Self::Segwit(WalletRecord::from_bytes(bytes)?),
            WalletKind::Multisig => Self::Multisig(MultisigWalletRecord::from_bytes(bytes)?),
        })
    }

    fn encode(&self) -> CustodianResult<Vec<u8>> {
        Ok(match self {
            Self::Standard(record) | Self::Segwit(record) => record.to_bytes()?,
            Self::Multisig(multisig) => multisig.to_bytes()?,
        })
    }
}

fn multisig_address(multisig: &MultisigWalletRecord) -> CustodianResult<String> {
    let script = ScriptBuf::from_bytes(
        hex::decode(&multisig.redeem_script).map_err(ScriptError::from)?,
    );
    Ok(script_hash_address(&script, multisig.wallet.network)?.to_string())
}

/// Mnemonic of a freshly created wallet. Returned once, never again.
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct CreatedWallet {
    /// BIP39 phrase of the new wallet.
    pub mnemonic: String,
}

impl std::fmt::Debug for CreatedWallet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CreatedWallet").finish_non_exhaustive()
    }
}

/// Public view of a single-key wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WalletInfo {
    /// Network of the wallet.
    pub network: Network,
    /// Extended public key at the wallet's account-level path.
    pub xpub: String,
}

/// Public view of a multisig wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MultisigWalletInfo {
    /// Signatures required.
    pub m: u32,
    /// Total keys.
    pub n: u32,
    /// Keys in script order, the custodian's own key last.
    pub pubkeys: Vec<String>,
    /// Hex-encoded redeem script.
    pub redeem_script: String,
}

/// Checks a wallet name: word characters at both ends, word characters, `.` or `-` inside.
pub fn validate_wallet_name(name: &str) -> CustodianResult<()> {
    let is_word = |c: char| c.is_ascii_alphanumeric() || c == '_';

    let (Some(first), Some(last)) = (name.chars().next(), name.chars().last()) else {
        return Err(CustodianError::MissingWalletName);
    };
    let inner_ok = name
        .chars()
        .all(|c| is_word(c) || c == '.' || c == '-');

    if !(is_word(first) && is_word(last) && inner_ok) {
        return Err(CustodianError::InvalidWalletName(name.to_string()));
    }

    Ok(())
}

/// Parses a required network identifier.
pub fn parse_network(network: &str) -> CustodianResult<Network> {
    if network.is_empty() {
        return Err(CustodianError::MissingNetwork);
    }

    Ok(network.parse()?)
}

/// Validates multisig parameters for `supplied` co-signer keys, the custodian's key excluded.
pub fn validate_multisig_params(supplied: &[String], m: u32, n: u32) -> CustodianResult<()> {
    if supplied.is_empty() {
        return Err(CustodianError::MissingPubKeys);
    }
    if m == 0 {
        return Err(CustodianError::InvalidM);
    }
    if n == 0 {
        return Err(CustodianError::InvalidN);
    }

    let n = n as usize;
    if supplied.len() != n - 1 {
        return Err(ScriptError::PubkeyCountMismatch {
            provided: supplied.len(),
            expected: n - 1,
        }
        .into());
    }
    if m as usize > n {
        return Err(CustodianError::MBiggerThanN);
    }
    if n > MAX_MULTISIG_N {
        return Err(ScriptError::NOutOfRange(n).into());
    }

    for pubkey in supplied {
        parse_pubkey(pubkey)?;
    }

    Ok(())
}

/// Creates, persists and loads wallets.
#[derive(Debug)]
pub(crate) struct WalletStore<S> {
    storage: Arc<S>,
}

impl<S> Clone for WalletStore<S> {
    fn clone(&self) -> Self {
        Self {
            storage: self.storage.clone(),
        }
    }
}

impl<S: Storage> WalletStore<S> {
    /// Creates a store over `storage`.
    pub(crate) const fn new(storage: Arc<S>) -> Self {
        Self { storage }
    }

    /// Creates a standard wallet. `segwit` selects BIP49 over BIP44 addresses.
    pub(crate) async fn create_standard(
        &self,
        network: &str,
        name: &str,
        segwit: bool,
    ) -> CustodianResult<CreatedWallet> {
        let network = parse_network(network)?;
        validate_wallet_name(name)?;

        let purpose = if segwit { Purpose::Bip49 } else { Purpose::Bip44 };
        let record = new_wallet_record(network, purpose, segwit)?;
        let created = CreatedWallet {
            mnemonic: record.mnemonic.clone(),
        };

        self.insert(name, Wallet::Standard(record)).await?;

        Ok(created)
    }

    /// Creates a native segwit wallet.
    pub(crate) async fn create_segwit(
        &self,
        network: &str,
        name: &str,
    ) -> CustodianResult<CreatedWallet> {
        let network = parse_network(network)?;
        validate_wallet_name(name)?;

        let record = new_wallet_record(network, Purpose::Bip84, false)?;
        let created = CreatedWallet {
            mnemonic: record.mnemonic.clone(),
        };

        self.insert(name, Wallet::Segwit(record)).await?;

        Ok(created)
    }

    /// Creates an `m`-of-`n` wallet from `n - 1` co-signer keys plus a key of its own.
    pub(crate) async fn create_multisig(
        &self,
        network: &str,
        name: &str,
        pubkeys: &[String],
        m: u32,
        n: u32,
    ) -> CustodianResult<()> {
        let network = parse_network(network)?;
        validate_wallet_name(name)?;
        validate_multisig_params(pubkeys, m, n)?;

        let wallet = new_wallet_record(network, Purpose::Bip44, false)?;
        let own_key = Keychain::from_mnemonic(&wallet.mnemonic, network)?
            .public_key_at(&wallet.derivation_path, MULTISIG_DEFAULT_ADDRESS_INDEX)?;

        let mut public_keys = pubkeys.to_vec();
        public_keys.push(hex::encode(own_key.to_bytes()));

        let redeem_script =
            btc_custodian_key_deriv::redeem_script_hex(m as usize, n as usize, &public_keys)?;

        self.insert(
            name,
            Wallet::Multisig(MultisigWalletRecord {
                wallet,
                m,
                n,
                redeem_script,
                public_keys,
            }),
        )
        .await
    }

    /// Loads the wallet of `kind` named `name`.
    pub(crate) async fn load(
        &self,
        kind: WalletKind,
        name: &str,
    ) -> CustodianResult<Option<Wallet>> {
        self.storage
            .get(&kind.wallet_key(name))
            .await?
            .map(|bytes| Wallet::decode(kind, &bytes))
            .transpose()
    }

    /// Loads the wallet of `kind` named `name`, failing if it does not exist.
    pub(crate) async fn require(&self, kind: WalletKind, name: &str) -> CustodianResult<Wallet> {
        self.load(kind, name)
            .await?
            .ok_or_else(|| CustodianError::WalletNotFound {
                kind,
                name: name.to_string(),
            })
    }

    /// Whether a wallet of `kind` named `name` exists.
    pub(crate) async fn exists(&self, kind: WalletKind, name: &str) -> CustodianResult<bool> {
        Ok(self.storage.get(&kind.wallet_key(name)).await?.is_some())
    }

    /// Public view of a standard or segwit wallet.
    pub(crate) async fn read_info(
        &self,
        kind: WalletKind,
        name: &str,
    ) -> CustodianResult<Option<WalletInfo>> {
        validate_wallet_name(name)?;

        let Some(wallet) = self.load(kind, name).await? else {
            return Ok(None);
        };
        let material = wallet.signing_material();
        let xpub = wallet.keychain()?.derive_xpub(&material.derivation_path)?;

        Ok(Some(WalletInfo {
            network: material.network,
            xpub: xpub.to_string(),
        }))
    }

    /// Public view of a multisig wallet.
    pub(crate) async fn read_multisig_info(
        &self,
        name: &str,
    ) -> CustodianResult<Option<MultisigWalletInfo>> {
        validate_wallet_name(name)?;

        Ok(match self.load(WalletKind::Multisig, name).await? {
            Some(Wallet::Multisig(multisig)) => Some(MultisigWalletInfo {
                m: multisig.m,
                n: multisig.n,
                pubkeys: multisig.public_keys.clone(),
                redeem_script: multisig.redeem_script.clone(),
            }),
            _ => None,
        })
    }

    async fn insert(&self, name: &str, wallet: Wallet) -> CustodianResult<()> {
        let kind = wallet.kind();
        let inserted = self
            .storage
            .compare_and_swap(&kind.wallet_key(name), None, Some(wallet.encode()?))
            .await?;

        if !inserted {
            debug!(%name, %kind, "wallet already exists");
            return Err(CustodianError::WalletAlreadyExists {
                kind,
                name: name.to_string(),
            });
        }

        info!(%name, %kind, network = %wallet.network(), "created wallet");

        Ok(())
    }
}

fn new_wallet_record(
    network: Network,
    purpose: Purpose,
    segwit: bool,
) -> CustodianResult<WalletRecord> {
    let mnemonic = generate_mnemonic().map_err(DerivationError::from)?;

    Ok(WalletRecord {
        network,
        mnemonic: mnemonic.to_string(),
        derivation_path: account_path(network, purpose),
        segwit,
    })
}
