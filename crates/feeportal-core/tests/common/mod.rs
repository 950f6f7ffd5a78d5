//! Test doubles and common utilities for contract tests

#![allow(dead_code)]

use feeportal_core::error::{Error, Result};
use feeportal_core::traits::PersistentStore;
use feeportal_core::{AuthService, MemoryStore, PortalConfig, StorageNamespace};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A store that counts writes per slot
#[derive(Clone, Default)]
pub struct CountingStore {
    inner: MemoryStore,
    saves: Arc<Mutex<HashMap<String, usize>>>,
    removes: Arc<Mutex<HashMap<String, usize>>>,
}

impl CountingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `save` calls for `key`
    pub fn save_count(&self, key: &str) -> usize {
        self.saves.lock().unwrap().get(key).copied().unwrap_or(0)
    }

    /// Number of `remove` calls for `key`
    pub fn remove_count(&self, key: &str) -> usize {
        self.removes.lock().unwrap().get(key).copied().unwrap_or(0)
    }
}

#[async_trait::async_trait]
impl PersistentStore for CountingStore {
    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.inner.load(key).await
    }

    async fn save(&self, key: &str, value: Vec<u8>) -> Result<()> {
        *self.saves.lock().unwrap().entry(key.to_string()).or_default() += 1;
        self.inner.save(key, value).await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        *self.removes.lock().unwrap().entry(key.to_string()).or_default() += 1;
        self.inner.remove(key).await
    }
}

/// A store whose writes fail once `fail_writes` is switched on
#[derive(Clone, Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    fail_writes: Arc<AtomicBool>,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::Io(std::io::Error::other("disk full")));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl PersistentStore for FlakyStore {
    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.inner.load(key).await
    }

    async fn save(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.check()?;
        self.inner.save(key, value).await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.check()?;
        self.inner.remove(key).await
    }
}

/// Config with the given payment delay and seeding switch
pub fn config(payment_delay: Duration, seed: bool) -> PortalConfig {
    PortalConfig::new()
        .with_payment_delay(payment_delay)
        .with_seed(seed)
}

/// Namespace over `store` with a roomy change feed
pub fn namespace<S: PersistentStore + 'static>(store: S) -> StorageNamespace {
    StorageNamespace::new(Arc::new(store), 64)
}

/// A fresh seeded context with no payment delay
pub async fn seeded_context() -> (AuthService, StorageNamespace) {
    let ns = namespace(MemoryStore::new());
    let auth = AuthService::attach(&ns, &config(Duration::ZERO, true))
        .await
        .expect("attach succeeds");
    (auth, ns)
}
