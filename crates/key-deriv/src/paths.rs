//! BIP32 derivation paths for custodied wallets.
//!
//! # Key Hierarchy Overview
//!
//! Every wallet owns its own mnemonic. The account-level path stored with the wallet selects
//! the external chain of the first account; receiving addresses append a non-hardened child
//! index to it:
//!
//! ```text
//! Master Seed (64 bytes, BIP39)
//! ├── m/44'/coin'/0'/0/i ─── standard wallet, legacy P2PKH
//! ├── m/49'/coin'/0'/0/i ─── standard wallet with segwit flag, P2SH-P2WPKH
//! └── m/84'/coin'/0'/0/i ─── native segwit wallet, P2WPKH
//! ```
//!
//! `coin` is `0` on mainnet and `1` on testnet and regtest. Multisig wallets reuse the standard
//! path and always sign with child `0`.

use serde::{Deserialize, Serialize};

use crate::network::Network;

/// First hardened child index.
pub const HARDENED_KEY_START: u32 = 0x8000_0000;

/// Account used for every wallet.
pub const DEFAULT_ACCOUNT: u32 = 0;

/// External (receiving) chain.
pub const EXTERNAL_CHAIN: u32 = 0;

/// Child index of the key a multisig wallet contributes to its redeem script.
pub const MULTISIG_DEFAULT_ADDRESS_INDEX: u32 = 0;

/// BIP43 purpose of a wallet's path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Purpose {
    /// BIP44 legacy pay-to-pubkey-hash.
    Bip44,
    /// BIP49 pay-to-witness-pubkey-hash nested in pay-to-script-hash.
    Bip49,
    /// BIP84 native pay-to-witness-pubkey-hash.
    Bip84,
}

impl Purpose {
    /// Unhardened purpose index.
    pub const fn index(self) -> u32 {
        match self {
            Self::Bip44 => 44,
            Self::Bip49 => 49,
            Self::Bip84 => 84,
        }
    }
}

/// Hardens `index`.
pub const fn hardened(index: u32) -> u32 {
    index | HARDENED_KEY_START
}

/// Whether `index` requires hardened derivation.
pub const fn is_hardened(index: u32) -> bool {
    index >= HARDENED_KEY_START
}

/// Account-level path `m/purpose'/coin'/0'/0` for a `(network, purpose)` pair.
pub fn account_path(network: Network, purpose: Purpose) -> Vec<u32> {
    vec![
        hardened(purpose.index()),
        hardened(network.coin_type()),
        hardened(DEFAULT_ACCOUNT),
        EXTERNAL_CHAIN,
    ]
}

/// Renders a raw path in the usual `m/44'/1'/0'/0` notation.
pub fn format_path(path: &[u32]) -> String {
    let mut out = String::from("m");
    for index in path {
        if is_hardened(*index) {
            out.push_str(&format!("/{}'", index - HARDENED_KEY_START));
        } else {
            out.push_str(&format!("/{index}"));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_paths_follow_bip43_purposes() {
        assert_eq!(
            format_path(&account_path(Network::Mainnet, Purpose::Bip44)),
            "m/44'/0'/0'/0"
        );
        assert_eq!(
            format_path(&account_path(Network::Testnet, Purpose::Bip49)),
            "m/49'/1'/0'/0"
        );
        assert_eq!(
            format_path(&account_path(Network::Regtest, Purpose::Bip84)),
            "m/84'/1'/0'/0"
        );
    }

    #[test]
    fn hardening_boundary() {
        assert!(!is_hardened(HARDENED_KEY_START - 1));
        assert!(is_hardened(HARDENED_KEY_START));
        assert_eq!(hardened(44), HARDENED_KEY_START + 44);
        assert_eq!(hardened(hardened(44)), hardened(44));
    }
}
