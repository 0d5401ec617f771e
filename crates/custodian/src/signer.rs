//! Transaction digest signing.

use crate::{
    errors::{CustodianError, CustodianResult},
    keys::WalletKind,
    wallet::{validate_wallet_name, Wallet},
};

/// A signing request that passed input validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignRequest {
    /// Kind of wallet selected by the signing mode.
    pub kind: WalletKind,
    /// Bytes to sign.
    pub raw_tx: Vec<u8>,
}

impl SignRequest {
    /// Validates the inputs of a signing request in order: wallet name, mode, token presence,
    /// then raw transaction presence and encoding.
    pub fn parse(
        name: &str,
        raw_tx: &str,
        mode: Option<&str>,
        token: &str,
    ) -> CustodianResult<Self> {
        validate_wallet_name(name)?;
        let kind = WalletKind::from_mode(mode)?;
        if token.is_empty() {
            return Err(CustodianError::MissingToken);
        }
        if raw_tx.is_empty() {
            return Err(CustodianError::MissingRawTx);
        }
        let raw_tx = hex::decode(raw_tx)?;

        Ok(Self { kind, raw_tx })
    }
}

/// Signs `SHA256d(raw_tx)` with the key of `wallet` at the signing index derived from
/// `last_child_index`. Returns the hex-encoded DER signature.
pub fn sign(wallet: &Wallet, last_child_index: u32, raw_tx: &[u8]) -> CustodianResult<String> {
    let material = wallet.signing_material();
    let signature = wallet
        .keychain()?
        .signing_key_at(
            &material.derivation_path,
            wallet.signing_index(last_child_index),
        )?
        .sign_double_sha256(raw_tx);

    Ok(hex::encode(&*signature.serialize_der()))
}
