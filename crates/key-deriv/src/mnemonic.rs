//! Fresh BIP39 mnemonics.

use bip39::Mnemonic;
use rand::RngCore;
use zeroize::Zeroizing;

/// Bits of entropy behind every generated mnemonic (24 words).
pub const ENTROPY_BITS: usize = 256;

/// Generates a 24-word English mnemonic from operating-system randomness.
pub fn generate_mnemonic() -> Result<Mnemonic, bip39::Error> {
    let mut entropy = Zeroizing::new([0u8; ENTROPY_BITS / 8]);
    rand::thread_rng().fill_bytes(entropy.as_mut_slice());
    Mnemonic::from_entropy(entropy.as_slice())
}
