//! In-memory storage backend.

use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::trace;

use crate::{errors::DbResult, storage::Storage};

/// In-memory [`Storage`]. Clones share the same underlying map.
#[derive(Debug, Default, Clone)]
pub struct InMemoryStorage {
    /// key -> value
    entries: Arc<RwLock<BTreeMap<String, Vec<u8>>>>,
}

impl InMemoryStorage {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn get(&self, key: &str) -> DbResult<Option<Vec<u8>>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> DbResult<()> {
        trace!(action = "trying to acquire wlock on entries", %key);
        let mut entries = self.entries.write().await;
        trace!(event = "acquired wlock on entries", %key);

        entries.insert(key.to_string(), value);

        Ok(())
    }

    async fn delete(&self, key: &str) -> DbResult<()> {
        trace!(action = "trying to acquire wlock on entries", %key);
        let mut entries = self.entries.write().await;
        trace!(event = "acquired wlock on entries", %key);

        entries.remove(key);

        Ok(())
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        new: Option<Vec<u8>>,
    ) -> DbResult<bool> {
        trace!(action = "trying to acquire wlock on entries", %key);
        let mut entries = self.entries.write().await;
        trace!(event = "acquired wlock on entries", %key);

        if entries.get(key).map(Vec::as_slice) != expected {
            return Ok(false);
        }

        match new {
            Some(value) => entries.insert(key.to_string(), value),
            None => entries.remove(key),
        };

        Ok(true)
    }

    async fn list(&self, prefix: &str) -> DbResult<Vec<String>> {
        Ok(self
            .entries
            .read()
            .await
            .range(prefix.to_string()..)
            .map(|(key, _)| key)
            .take_while(|key| key.starts_with(prefix))
            .cloned()
            .collect())
    }
}
