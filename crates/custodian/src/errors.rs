//! Errors returned by custodian operations.

use btc_custodian_db::DbError;
use btc_custodian_key_deriv::{DerivationError, ScriptError, UnknownNetwork};
use thiserror::Error;

use crate::{keys::WalletKind, records::RecordError};

/// Coarse classification of a [`CustodianError`], used by hosts to pick a response status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The request was malformed.
    Validation,
    /// The named wallet does not exist.
    NotFound,
    /// The request collides with existing state.
    Conflict,
    /// The presented token does not authorize the request.
    Unauthorized,
    /// Key material could not be derived.
    Crypto,
    /// The storage backend failed or holds unreadable data.
    Storage,
}

/// Errors surfaced by the [`Custodian`](crate::Custodian).
#[derive(Debug, Error)]
pub enum CustodianError {
    /// No auth token was presented.
    #[error("missing auth token")]
    MissingToken,

    /// The wallet name is empty.
    #[error("missing wallet name")]
    MissingWalletName,

    /// The wallet name contains disallowed characters.
    #[error("invalid wallet name: {0}")]
    InvalidWalletName(String),

    /// The network is empty.
    #[error("missing network")]
    MissingNetwork,

    /// The network is not one of the supported identifiers.
    #[error(transparent)]
    InvalidNetwork(#[from] UnknownNetwork),

    /// No co-signer keys were supplied.
    #[error("missing public keys")]
    MissingPubKeys,

    /// `m` is zero.
    #[error("invalid m: it must be greater than 0")]
    InvalidM,

    /// `n` is zero.
    #[error("invalid n: it must be greater than 0")]
    InvalidN,

    /// `m` exceeds `n`.
    #[error("m bigger than n")]
    MBiggerThanN,

    /// The multisig parameters or keys are invalid.
    #[error(transparent)]
    Script(#[from] ScriptError),

    /// Unknown signing mode.
    #[error("invalid mode: {0}")]
    InvalidMode(String),

    /// No raw transaction was supplied.
    #[error("missing raw transaction to sign")]
    MissingRawTx,

    /// The raw transaction is not hex.
    #[error("raw transaction is not valid hex: {0}")]
    InvalidRawTx(#[from] hex::FromHexError),

    /// The token is unknown, already used, expired or bound to another wallet.
    #[error("invalid auth token")]
    InvalidToken,

    /// A lease handle lacks its lease id.
    #[error("secret is missing internal data")]
    MissingInternalData,

    /// No wallet of that kind and name exists.
    #[error("{kind} wallet {name} not found")]
    WalletNotFound {
        /// Kind that was looked up.
        kind: WalletKind,
        /// Name that was looked up.
        name: String,
    },

    /// A wallet of that kind and name already exists.
    #[error("{kind} wallet {name} already exists")]
    WalletAlreadyExists {
        /// Kind of the existing wallet.
        kind: WalletKind,
        /// Name of the existing wallet.
        name: String,
    },

    /// Key derivation failed.
    #[error(transparent)]
    Derivation(#[from] DerivationError),

    /// A stored record could not be read or written.
    #[error(transparent)]
    Record(#[from] RecordError),

    /// The storage backend failed.
    #[error("storage: {0}")]
    Storage(#[from] DbError),

    /// The operation succeeded but its credential could not be deleted.
    #[error("failed to revoke credential {lease_id}: {source}")]
    RevocationFailed {
        /// Lease that is still alive.
        lease_id: String,
        /// Underlying storage failure.
        #[source]
        source: DbError,
    },

    /// Concurrent requests kept advancing the address index.
    #[error("address index of {name} still contended after {attempts} attempts")]
    IndexContention {
        /// Wallet whose index is contended.
        name: String,
        /// Attempts made.
        attempts: usize,
    },
}

impl CustodianError {
    /// Classifies the error.
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::MissingWalletName
            | Self::InvalidWalletName(_)
            | Self::MissingNetwork
            | Self::InvalidNetwork(_)
            | Self::MissingPubKeys
            | Self::InvalidM
            | Self::InvalidN
            | Self::MBiggerThanN
            | Self::Script(_)
            | Self::InvalidMode(_)
            | Self::MissingRawTx
            | Self::InvalidRawTx(_)
            | Self::MissingInternalData => ErrorKind::Validation,
            Self::MissingToken | Self::InvalidToken => ErrorKind::Unauthorized,
            Self::WalletNotFound { .. } => ErrorKind::NotFound,
            Self::WalletAlreadyExists { .. } | Self::IndexContention { .. } => ErrorKind::Conflict,
            Self::Derivation(_) => ErrorKind::Crypto,
            Self::Record(_) | Self::Storage(_) | Self::RevocationFailed { .. } => {
                ErrorKind::Storage
            }
        }
    }
}

/// Result type of custodian operations.
pub type CustodianResult<T> = Result<T, CustodianError>;
