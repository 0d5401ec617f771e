//! The custodian facade tying wallets, addresses, credentials and signing together.

use std::sync::Arc;

use btc_custodian_db::Storage;
use tracing::{debug, info};

use crate::{
    address::AddressIndex,
    config::CustodianConfig,
    credentials::{Credentials, IssuedCredential, Lease, TokenSalt},
    errors::{CustodianError, CustodianResult},
    keys::WalletKind,
    signer::{self, SignRequest},
    wallet::{validate_wallet_name, CreatedWallet, MultisigWalletInfo, WalletInfo, WalletStore},
};

/// Custodial wallet service over a [`Storage`] backend.
///
/// Private keys never leave the custodian. Address derivation and signing each require a
/// credential issued for the wallet, which is consumed by the operation.
#[derive(Debug)]
pub struct Custodian<S> {
    wallets: WalletStore<S>,
    index: AddressIndex<S>,
    credentials: Credentials<S>,
}

impl<S: Storage> Custodian<S> {
    /// Opens a custodian over `storage`, initializing the token salt on first use.
    pub async fn new(storage: Arc<S>, config: CustodianConfig) -> CustodianResult<Self> {
        let salt = TokenSalt::load_or_init(storage.as_ref()).await?;
        debug!(?config, "custodian ready");

        Ok(Self {
            wallets: WalletStore::new(storage.clone()),
            index: AddressIndex::new(storage.clone(), config.max_index_retries()),
            credentials: Credentials::new(storage, salt, config.credential_ttl()),
        })
    }

    /// Creates a standard wallet and returns its mnemonic.
    ///
    /// With `segwit` set the wallet follows BIP49 and hands out P2SH-wrapped segwit addresses.
    pub async fn create_wallet(
        &self,
        network: &str,
        name: &str,
        segwit: bool,
    ) -> CustodianResult<CreatedWallet> {
        self.wallets.create_standard(network, name, segwit).await
    }

    /// Network and account xpub of a standard wallet.
    pub async fn read_wallet(&self, name: &str) -> CustodianResult<Option<WalletInfo>> {
        self.wallets.read_info(WalletKind::Standard, name).await
    }

    /// Creates an `m`-of-`n` wallet from `n - 1` co-signer keys.
    pub async fn create_multisig_wallet(
        &self,
        network: &str,
        name: &str,
        pubkeys: &[String],
        m: u32,
        n: u32,
    ) -> CustodianResult<()> {
        self.wallets
            .create_multisig(network, name, pubkeys, m, n)
            .await
    }

    /// Threshold, keys and redeem script of a multisig wallet.
    pub async fn read_multisig_wallet(
        &self,
        name: &str,
    ) -> CustodianResult<Option<MultisigWalletInfo>> {
        self.wallets.read_multisig_info(name).await
    }

    /// Creates a BIP84 native segwit wallet and returns its mnemonic.
    pub async fn create_segwit_wallet(
        &self,
        network: &str,
        name: &str,
    ) -> CustodianResult<CreatedWallet> {
        self.wallets.create_segwit(network, name).await
    }

    /// Network and account xpub of a native segwit wallet.
    pub async fn read_segwit_wallet(&self, name: &str) -> CustodianResult<Option<WalletInfo>> {
        self.wallets.read_info(WalletKind::Segwit, name).await
    }

    /// Issues a single-use credential for an existing wallet.
    pub async fn issue_credential(
        &self,
        kind: WalletKind,
        name: &str,
    ) -> CustodianResult<IssuedCredential> {
        validate_wallet_name(name)?;
        if !self.wallets.exists(kind, name).await? {
            return Err(CustodianError::WalletNotFound {
                kind,
                name: name.to_string(),
            });
        }

        self.credentials.issue(kind, name).await
    }

    /// Revokes a credential before it is used.
    pub async fn revoke_credential(&self, lease: &Lease) -> CustodianResult<()> {
        self.credentials.revoke(lease).await
    }

    /// Deletes expired credentials, returning how many were removed.
    pub async fn sweep_expired_credentials(&self) -> CustodianResult<usize> {
        self.credentials.sweep_expired().await
    }

    /// Hands out the next receiving address of a wallet, consuming `token`.
    ///
    /// Multisig wallets always return the same script-hash address.
    pub async fn derive_address(
        &self,
        kind: WalletKind,
        name: &str,
        token: &str,
    ) -> CustodianResult<String> {
        validate_wallet_name(name)?;

        let credential = self.credentials.validate(kind, token, name).await?;
        let wallet = self.wallets.require(kind, name).await?;

        let claimed = self.credentials.claim(credential).await?;
        let address = match self.index.next_address(name, &wallet).await {
            Ok(address) => address,
            Err(err) => {
                self.credentials.release(claimed).await;
                return Err(err);
            }
        };
        self.credentials.consume(claimed).await?;

        info!(%name, %kind, "derived address");

        Ok(address)
    }

    /// Signs `SHA256d(raw_tx)` with a wallet key, consuming `token`. Returns the hex DER
    /// signature.
    ///
    /// `mode` selects the wallet kind and defaults to `standard`. Standard and segwit wallets
    /// sign with the key of their last handed-out address, multisig wallets with the key in
    /// their redeem script.
    pub async fn sign_transaction(
        &self,
        name: &str,
        raw_tx: &str,
        mode: Option<&str>,
        token: &str,
    ) -> CustodianResult<String> {
        let SignRequest { kind, raw_tx } = SignRequest::parse(name, raw_tx, mode, token)?;

        let credential = self.credentials.validate(kind, token, name).await?;
        let wallet = self.wallets.require(kind, name).await?;
        let last_child_index = self.index.current_index(kind, name).await?;

        let claimed = self.credentials.claim(credential).await?;
        let signature = match signer::sign(&wallet, last_child_index, &raw_tx) {
            Ok(signature) => signature,
            Err(err) => {
                self.credentials.release(claimed).await;
                return Err(err);
            }
        };
        self.credentials.consume(claimed).await?;

        info!(%name, %kind, "signed transaction");

        Ok(signature)
    }
}
