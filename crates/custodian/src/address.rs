//! Per-wallet receiving address index.

use std::sync::Arc;

use btc_custodian_db::Storage;
use btc_custodian_key_deriv::{DerivationError, MULTISIG_DEFAULT_ADDRESS_INDEX};
use tracing::{debug, trace};

use crate::{
    errors::{CustodianError, CustodianResult},
    keys::WalletKind,
    records::{AddressRecord, VersionedRecord},
    wallet::Wallet,
};

/// Hands out strictly increasing child indices and their addresses.
#[derive(Debug)]
pub struct AddressIndex<S> {
    storage: Arc<S>,
    max_attempts: usize,
}

impl<S> Clone for AddressIndex<S> {
    fn clone(&self) -> Self {
        Self {
            storage: self.storage.clone(),
            max_attempts: self.max_attempts,
        }
    }
}

impl<S: Storage> AddressIndex<S> {
    /// Creates an index over `storage` that gives up after `max_attempts` lost races.
    pub fn new(storage: Arc<S>, max_attempts: usize) -> Self {
        Self {
            storage,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Last child index handed out for `name`, `0` if none was.
    pub async fn current_index(&self, kind: WalletKind, name: &str) -> CustodianResult<u32> {
        Ok(self
            .load(&kind.address_key(name))
            .await?
            .map_or(0, |record| record.child_index))
    }

    /// Advances the index of `wallet` and returns the address at the new index.
    ///
    /// Multisig wallets have a single address and no index.
    pub async fn next_address(&self, name: &str, wallet: &Wallet) -> CustodianResult<String> {
        if let Wallet::Multisig(_) = wallet {
            return wallet.compute_address(MULTISIG_DEFAULT_ADDRESS_INDEX);
        }

        let kind = wallet.kind();
        let key = kind.address_key(name);
        let keychain = wallet.keychain()?;

        for attempt in 1..=self.max_attempts {
            let current = self.storage.get(&key).await?;
            let last_index = match &current {
                Some(bytes) => AddressRecord::from_bytes(bytes)?.child_index,
                None => 0,
            };
            let child_index = last_index
                .checked_add(1)
                .ok_or(DerivationError::ChildIndexOutOfRange(last_index))?;

            let address = wallet.address_with(&keychain, child_index)?;
            let record = AddressRecord {
                child_index,
                last_address: address.clone(),
            };

            if self
                .storage
                .compare_and_swap(&key, current.as_deref(), Some(record.to_bytes()?))
                .await?
            {
                debug!(%name, %kind, %child_index, "advanced address index");
                return Ok(address);
            }

            trace!(%name, %kind, %attempt, "address index moved concurrently, retrying");
        }

        Err(CustodianError::IndexContention {
            name: name.to_string(),
            attempts: self.max_attempts,
        })
    }

    async fn load(&self, key: &str) -> CustodianResult<Option<AddressRecord>> {
        Ok(self
            .storage
            .get(key)
            .await?
            .map(|bytes| AddressRecord::from_bytes(&bytes))
            .transpose()?)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use btc_custodian_db::InMemoryStorage;
    use btc_custodian_key_deriv::HARDENED_KEY_START;

    use super::*;
    use crate::{test_utils::cosigner_pubkeys, wallet::WalletStore};

    async fn setup() -> (Arc<InMemoryStorage>, WalletStore<InMemoryStorage>) {
        let storage = Arc::new(InMemoryStorage::new());
        let store = WalletStore::new(storage.clone());
        store.create_standard("testnet", "alice", false).await.unwrap();
        store
            .create_multisig("testnet", "vault", &cosigner_pubkeys(1), 1, 2)
            .await
            .unwrap();
        (storage, store)
    }

    #[tokio::test]
    async fn indices_start_at_one_and_increase() {
        let (storage, store) = setup().await;
        let index = AddressIndex::new(storage, 8);
        let wallet = store.require(WalletKind::Standard, "alice").await.unwrap();

        assert_eq!(index.current_index(WalletKind::Standard, "alice").await.unwrap(), 0);

        let first = index.next_address("alice", &wallet).await.unwrap();
        assert_eq!(first, wallet.compute_address(1).unwrap());
        assert_eq!(index.current_index(WalletKind::Standard, "alice").await.unwrap(), 1);

        let second = index.next_address("alice", &wallet).await.unwrap();
        assert_eq!(second, wallet.compute_address(2).unwrap());
        assert_ne!(first, second);
        assert_eq!(index.current_index(WalletKind::Standard, "alice").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn multisig_address_is_fixed() {
        let (storage, store) = setup().await;
        let index = AddressIndex::new(storage.clone(), 8);
        let wallet = store.require(WalletKind::Multisig, "vault").await.unwrap();

        let first = index.next_address("vault", &wallet).await.unwrap();
        let second = index.next_address("vault", &wallet).await.unwrap();
        assert_eq!(first, second);

        assert!(
            storage
                .get(&WalletKind::Multisig.address_key("vault"))
                .await
                .is_ok_and(|v| v.is_none()),
            "multisig wallets must not store an address record"
        );
    }

    #[tokio::test]
    async fn concurrent_derivations_get_distinct_indices() {
        let (storage, store) = setup().await;
        let index = AddressIndex::new(storage, 64);
        let wallet = store.require(WalletKind::Standard, "alice").await.unwrap();

        let handles = (0..8)
            .map(|_| {
                let index = index.clone();
                let wallet = wallet.clone();
                tokio::spawn(async move { index.next_address("alice", &wallet).await })
            })
            .collect::<Vec<_>>();

        let mut addresses = HashSet::new();
        for handle in handles {
            addresses.insert(handle.await.unwrap().unwrap());
        }

        assert_eq!(addresses.len(), 8, "no address may be handed out twice");
        assert_eq!(index.current_index(WalletKind::Standard, "alice").await.unwrap(), 8);
    }

    #[tokio::test]
    async fn hardened_boundary_is_not_crossed() {
        let (storage, store) = setup().await;
        let wallet = store.require(WalletKind::Standard, "alice").await.unwrap();
        let record = AddressRecord {
            child_index: HARDENED_KEY_START - 1,
            last_address: String::new(),
        };
        storage
            .put(
                &WalletKind::Standard.address_key("alice"),
                record.to_bytes().unwrap(),
            )
            .await
            .unwrap();

        let index = AddressIndex::new(storage, 8);
        assert!(matches!(
            index.next_address("alice", &wallet).await,
            Err(CustodianError::Derivation(
                DerivationError::ChildIndexOutOfRange(_)
            ))
        ));
    }
}
