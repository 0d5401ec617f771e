//! Typed, versioned records persisted by the custodian.
//!
//! Every record is stored as JSON inside an envelope carrying the schema version:
//!
//! ```json
//! { "version": 1, "record": { "child_index": 3, "last_address": "tb1q..." } }
//! ```
//!
//! Decoding an envelope with any other version fails instead of guessing at the layout.

use std::fmt;

use btc_custodian_key_deriv::Network;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::value::RawValue;
use thiserror::Error;
use zeroize::Zeroize;

/// Schema version written by this build.
pub const RECORD_VERSION: u32 = 1;

/// Errors raised while encoding or decoding a record.
#[derive(Debug, Error)]
pub enum RecordError {
    /// The envelope was written by an unsupported schema version.
    #[error("unsupported record version {found}, expected {expected}")]
    UnsupportedVersion {
        /// Version found in storage.
        found: u32,
        /// Version this build understands.
        expected: u32,
    },

    /// The bytes are not a well-formed record.
    #[error("malformed record: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The stored salt has the wrong length.
    #[error("stored salt has {0} bytes")]
    InvalidSaltLength(usize),
}

#[derive(Serialize)]
struct EnvelopeRef<'a, T> {
    version: u32,
    record: &'a T,
}

#[derive(Deserialize)]
struct Envelope<'a> {
    version: u32,
    #[serde(borrow)]
    record: &'a RawValue,
}

/// A record that can be persisted inside a versioned envelope.
pub trait VersionedRecord: Serialize + DeserializeOwned {
    /// Serializes the record inside a [`RECORD_VERSION`] envelope.
    fn to_bytes(&self) -> Result<Vec<u8>, RecordError> {
        Ok(serde_json::to_vec(&EnvelopeRef {
            version: RECORD_VERSION,
            record: self,
        })?)
    }

    /// Deserializes a record, rejecting any version but [`RECORD_VERSION`].
    fn from_bytes(bytes: &[u8]) -> Result<Self, RecordError> {
        let envelope: Envelope<'_> = serde_json::from_slice(bytes)?;
        if envelope.version != RECORD_VERSION {
            return Err(RecordError::UnsupportedVersion {
                found: envelope.version,
                expected: RECORD_VERSION,
            });
        }

        Ok(serde_json::from_str(envelope.record.get())?)
    }
}

/// Root secret and derivation parameters of a single-key wallet.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletRecord {
    /// Network the wallet's keys and addresses are serialized for.
    pub network: Network,

    /// BIP39 phrase the whole wallet derives from.
    pub mnemonic: String,

    /// Account-level path. Receiving indices are appended when deriving, never stored here.
    pub derivation_path: Vec<u32>,

    /// Whether a standard wallet hands out BIP49 addresses.
    pub segwit: bool,
}

impl fmt::Debug for WalletRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WalletRecord")
            .field("network", &self.network)
            .field("mnemonic", &"[redacted]")
            .field("derivation_path", &self.derivation_path)
            .field("segwit", &self.segwit)
            .finish()
    }
}

impl Drop for WalletRecord {
    fn drop(&mut self) {
        self.mnemonic.zeroize();
    }
}

impl VersionedRecord for WalletRecord {}

/// An m-of-n wallet whose last key belongs to this custodian.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultisigWalletRecord {
    /// The custodian's own key.
    pub wallet: WalletRecord,

    /// Signatures required to spend.
    pub m: u32,

    /// Total keys in the script.
    pub n: u32,

    /// Hex-encoded redeem script, computed once at creation.
    pub redeem_script: String,

    /// Hex-encoded keys in script order.
    pub public_keys: Vec<String>,
}

impl VersionedRecord for MultisigWalletRecord {}

/// Last receiving address handed out by a wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressRecord {
    /// Child index of `last_address`. Only ever increases.
    pub child_index: u32,

    /// Encoded address at `child_index`.
    pub last_address: String,
}

impl VersionedRecord for AddressRecord {}

/// A live single-use credential. The token itself is never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRecord {
    /// Wallet the credential is bound to.
    pub wallet_name: String,

    /// Salted digest of the token.
    pub lease_id: String,

    /// Unix time of issuance, in milliseconds.
    pub issued_at_ms: u64,

    /// Unix time from which the credential is rejected, in milliseconds.
    pub expires_at_ms: u64,

    /// Set while an operation holding the credential is in flight.
    #[serde(default)]
    pub claimed: bool,
}

impl CredentialRecord {
    /// Whether the credential is no longer valid at `now_ms`.
    pub const fn is_expired(&self, now_ms: u64) -> bool {
        now_ms >= self.expires_at_ms
    }
}

impl VersionedRecord for CredentialRecord {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_layout() {
        let record = AddressRecord {
            child_index: 3,
            last_address: "mzBc4XEFSdzCDcTxAgf6EZXgsZWpztRhef".to_string(),
        };

        let json: serde_json::Value = serde_json::from_slice(&record.to_bytes().unwrap()).unwrap();
        assert_eq!(json["version"], 1);
        assert_eq!(json["record"]["child_index"], 3);

        assert_eq!(
            AddressRecord::from_bytes(&record.to_bytes().unwrap()).unwrap(),
            record
        );
    }

    #[test]
    fn unknown_version_is_rejected() {
        let bytes = br#"{"version":2,"record":{"child_index":1,"last_address":"x"}}"#;
        assert!(matches!(
            AddressRecord::from_bytes(bytes),
            Err(RecordError::UnsupportedVersion {
                found: 2,
                expected: 1
            })
        ));
    }

    #[test]
    fn mismatched_record_is_malformed() {
        let bytes = br#"{"version":1,"record":{"wallet_name":"alice"}}"#;
        assert!(matches!(
            CredentialRecord::from_bytes(bytes),
            Err(RecordError::Malformed(_))
        ));

        assert!(matches!(
            CredentialRecord::from_bytes(b"not json"),
            Err(RecordError::Malformed(_))
        ));
    }

    #[test]
    fn wallet_debug_hides_mnemonic() {
        let record = WalletRecord {
            network: Network::Testnet,
            mnemonic: "abandon ability able".to_string(),
            derivation_path: vec![0],
            segwit: false,
        };

        let debug = format!("{record:?}");
        assert!(!debug.contains("abandon"));
        assert!(debug.contains("redacted"));
    }

    #[test]
    fn expiry_is_inclusive() {
        let record = CredentialRecord {
            wallet_name: "alice".to_string(),
            lease_id: "00".repeat(32),
            issued_at_ms: 100_000,
            expires_at_ms: 100_900,
            claimed: false,
        };

        assert!(!record.is_expired(100_899));
        assert!(record.is_expired(100_900));
    }
}
