//! m-of-n multisig redeem scripts.

use bitcoin::{opcodes::all::OP_CHECKMULTISIG, script::Builder, PublicKey, ScriptBuf};
use thiserror::Error;

/// Smallest number of keys a multisig wallet may have.
pub const MIN_MULTISIG_N: usize = 1;

/// Largest number of keys a multisig wallet may have.
pub const MAX_MULTISIG_N: usize = 7;

/// Errors raised while building a redeem script.
#[derive(Debug, Error)]
pub enum ScriptError {
    /// `n` is outside `[1, 7]`.
    #[error("invalid n param: it must be a value between 1 and 7 (inclusive), got {0}")]
    NOutOfRange(usize),

    /// `m` is outside `[1, n]`.
    #[error("invalid m param: it must be between 1 and n = {n} (inclusive), got {m}")]
    MOutOfRange {
        /// Required signatures.
        m: usize,
        /// Total keys.
        n: usize,
    },

    /// The number of keys does not match `n`.
    #[error("invalid number of public keys: provided {provided}, expected {expected}")]
    PubkeyCountMismatch {
        /// Keys supplied.
        provided: usize,
        /// Keys required.
        expected: usize,
    },

    /// A key is not valid hex.
    #[error("public key is not valid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    /// A key does not encode a point on secp256k1.
    #[error("invalid public key: {0}")]
    InvalidPubkey(#[from] bitcoin::key::FromSliceError),
}

/// Checks `1 <= m <= n <= 7`.
pub fn validate_threshold(m: usize, n: usize) -> Result<(), ScriptError> {
    if !(MIN_MULTISIG_N..=MAX_MULTISIG_N).contains(&n) {
        return Err(ScriptError::NOutOfRange(n));
    }
    if !(MIN_MULTISIG_N..=n).contains(&m) {
        return Err(ScriptError::MOutOfRange { m, n });
    }

    Ok(())
}

/// Parses a hex-encoded compressed or uncompressed public key.
pub fn parse_pubkey(pubkey: &str) -> Result<PublicKey, ScriptError> {
    let bytes = hex::decode(pubkey)?;
    Ok(PublicKey::from_slice(&bytes)?)
}

/// Builds the redeem script
/// `OP_m <len><pubkey_1> ... <len><pubkey_n> OP_n OP_CHECKMULTISIG`.
///
/// Keys are pushed in the given order and with the serialization they were supplied in.
pub fn redeem_script(m: usize, n: usize, pubkeys: &[String]) -> Result<ScriptBuf, ScriptError> {
    validate_threshold(m, n)?;
    if pubkeys.len() != n {
        return Err(ScriptError::PubkeyCountMismatch {
            provided: pubkeys.len(),
            expected: n,
        });
    }

    let builder = pubkeys
        .iter()
        .try_fold(Builder::new().push_int(m as i64), |builder, pubkey| {
            parse_pubkey(pubkey).map(|key| builder.push_key(&key))
        })?;

    Ok(builder
        .push_int(n as i64)
        .push_opcode(OP_CHECKMULTISIG)
        .into_script())
}

/// Hex encoding of [`redeem_script`].
pub fn redeem_script_hex(m: usize, n: usize, pubkeys: &[String]) -> Result<String, ScriptError> {
    redeem_script(m, n, pubkeys).map(|script| hex::encode(script.as_bytes()))
}
