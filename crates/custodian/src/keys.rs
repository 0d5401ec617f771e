//! Wallet kinds and the storage keys derived from them.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::errors::CustodianError;

/// Key under which the token salt is stored.
pub const SALT_KEY: &str = "salt";

const WALLET_PREFIX: &str = "wallet/";
const ADDRESS_PREFIX: &str = "address/";
const CREDENTIAL_PREFIX: &str = "creds/";

/// The three wallet variants a custodian manages.
///
/// Each kind lives in its own storage namespace, so the same name may exist once per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WalletKind {
    /// Single-key HD wallet, legacy or BIP49 addresses.
    Standard,
    /// m-of-n P2SH wallet.
    Multisig,
    /// Single-key HD wallet with native segwit addresses.
    Segwit,
}

impl WalletKind {
    /// Every kind, in storage order.
    pub const ALL: [Self; 3] = [Self::Standard, Self::Multisig, Self::Segwit];

    /// The mode string identifying this kind.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Multisig => "multisig",
            Self::Segwit => "segwit",
        }
    }

    /// Namespace segment inserted after the top-level prefix. Standard wallets have none.
    const fn segment(self) -> &'static str {
        match self {
            Self::Standard => "",
            Self::Multisig => "multisig/",
            Self::Segwit => "segwit/",
        }
    }

    /// Parses an optional signing mode. An absent mode means [`WalletKind::Standard`].
    pub fn from_mode(mode: Option<&str>) -> Result<Self, CustodianError> {
        mode.map_or(Ok(Self::Standard), str::parse)
    }

    /// Storage key of the wallet record named `name`.
    pub fn wallet_key(self, name: &str) -> String {
        format!("{WALLET_PREFIX}{}{name}", self.segment())
    }

    /// Storage key of the address record of wallet `name`.
    pub fn address_key(self, name: &str) -> String {
        format!("{ADDRESS_PREFIX}{}{name}", self.segment())
    }

    /// Prefix shared by every credential issued for this kind.
    ///
    /// Listing the standard prefix also yields the other kinds' credentials.
    pub fn credential_prefix(self) -> String {
        format!("{CREDENTIAL_PREFIX}{}", self.segment())
    }

    /// Storage key of the credential with `lease_id`.
    pub fn credential_key(self, lease_id: &str) -> String {
        format!("{}{lease_id}", self.credential_prefix())
    }
}

impl FromStr for WalletKind {
    type Err = CustodianError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "standard" => Ok(Self::Standard),
            "multisig" => Ok(Self::Multisig),
            "segwit" => Ok(Self::Segwit),
            other => Err(CustodianError::InvalidMode(other.to_string())),
        }
    }
}

impl fmt::Display for WalletKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
