//! The storage interface every backend implements.

use async_trait::async_trait;

use crate::errors::DbResult;

/// Flat key-value storage with per-key atomicity and no multi-key transactions.
///
/// Keys are `/`-separated namespaces such as `wallet/segwit/alice`.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Gets, if present, the value stored under `key`.
    async fn get(&self, key: &str) -> DbResult<Option<Vec<u8>>>;

    /// Stores `value` under `key`, overwriting any previous value.
    async fn put(&self, key: &str, value: Vec<u8>) -> DbResult<()>;

    /// Removes `key`. Removing an absent key is not an error.
    async fn delete(&self, key: &str) -> DbResult<()>;

    /// Atomically replaces the value under `key` with `new` if the current value equals
    /// `expected`.
    ///
    /// `None` stands for "absent" on both sides, so `(None, Some(v))` is an insert-if-absent and
    /// `(Some(v), None)` a delete-if-unchanged. Returns whether the swap happened.
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        new: Option<Vec<u8>>,
    ) -> DbResult<bool>;

    /// Lists, in lexicographic order, every key starting with `prefix`.
    async fn list(&self, prefix: &str) -> DbResult<Vec<String>>;
}

/// Behavior every backend must share.
#[cfg(test)]
pub(crate) async fn check_storage_semantics<S: Storage>(storage: &S) {
    assert!(
        storage.get("wallet/alice").await.unwrap().is_none(),
        "key must not exist initially"
    );

    storage
        .put("wallet/alice", b"first".to_vec())
        .await
        .expect("must be able to put");
    assert_eq!(
        storage.get("wallet/alice").await.unwrap().as_deref(),
        Some(&b"first"[..])
    );

    storage
        .put("wallet/alice", b"second".to_vec())
        .await
        .expect("must be able to overwrite");
    assert_eq!(
        storage.get("wallet/alice").await.unwrap().as_deref(),
        Some(&b"second"[..])
    );

    // insert-if-absent
    assert!(!storage
        .compare_and_swap("wallet/alice", None, Some(b"third".to_vec()))
        .await
        .unwrap());
    assert!(storage
        .compare_and_swap("wallet/bob", None, Some(b"bob".to_vec()))
        .await
        .unwrap());

    // swap-if-unchanged
    assert!(!storage
        .compare_and_swap("wallet/alice", Some(b"first"), Some(b"third".to_vec()))
        .await
        .unwrap());
    assert!(storage
        .compare_and_swap("wallet/alice", Some(b"second"), Some(b"third".to_vec()))
        .await
        .unwrap());
    assert_eq!(
        storage.get("wallet/alice").await.unwrap().as_deref(),
        Some(&b"third"[..])
    );

    // delete-if-unchanged
    assert!(!storage
        .compare_and_swap("wallet/bob", Some(b"not bob"), None)
        .await
        .unwrap());
    assert!(storage
        .compare_and_swap("wallet/bob", Some(b"bob"), None)
        .await
        .unwrap());
    assert!(storage.get("wallet/bob").await.unwrap().is_none());
    assert!(storage
        .compare_and_swap("wallet/bob", None, None)
        .await
        .unwrap());

    storage
        .put("wallet/segwit/carol", b"carol".to_vec())
        .await
        .unwrap();
    storage.put("walletx", b"other".to_vec()).await.unwrap();
    assert_eq!(
        storage.list("wallet/").await.unwrap(),
        vec!["wallet/alice".to_string(), "wallet/segwit/carol".to_string()]
    );

    storage
        .delete("wallet/alice")
        .await
        .expect("must be able to delete");
    storage
        .delete("wallet/alice")
        .await
        .expect("deleting an absent key is not an error");
    assert!(storage.get("wallet/alice").await.unwrap().is_none());
}
