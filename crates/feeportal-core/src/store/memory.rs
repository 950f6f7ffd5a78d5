// # Memory Store
//
// In-memory implementation of PersistentStore.
//
// Clones share the same map, so every context holding a clone sees the
// same "durable" state for as long as the process lives. Nothing survives
// a restart.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::Error;
use crate::traits::PersistentStore;

/// In-memory store backed by a HashMap protected by a RwLock
///
/// # Example
///
/// ```rust,no_run
/// use feeportal_core::store::MemoryStore;
/// use feeportal_core::traits::PersistentStore;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = MemoryStore::new();
///     store.save("students", b"[]".to_vec()).await?;
///
///     assert_eq!(store.load("students").await?, Some(b"[]".to_vec()));
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl MemoryStore {
    /// Create a new empty memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the number of slots in the store
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    /// Check if the store is empty
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}

#[async_trait]
impl PersistentStore for MemoryStore {
    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>, Error> {
        let guard = self.inner.read().await;
        Ok(guard.get(key).cloned())
    }

    async fn save(&self, key: &str, value: Vec<u8>) -> Result<(), Error> {
        let mut guard = self.inner.write().await;
        guard.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), Error> {
        let mut guard = self.inner.write().await;
        guard.remove(key);
        Ok(())
    }
}
