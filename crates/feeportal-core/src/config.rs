//! Configuration types for the fee portal
//!
//! This module defines all configuration structures used throughout the crate.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::store::{FileStore, MemoryStore};
use crate::traits::PersistentStore;

/// Main portal configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortalConfig {
    /// Durable storage backing the namespace
    #[serde(default)]
    pub storage: StorageConfig,

    /// Simulated payment processing
    #[serde(default)]
    pub payment: PaymentConfig,

    /// Cross-context change feed
    #[serde(default)]
    pub sync: SyncConfig,

    /// Write the sample students when the namespace has no collection yet
    #[serde(default = "default_seed_on_first_run")]
    pub seed_on_first_run: bool,
}

impl PortalConfig {
    /// Create a new configuration with defaults
    pub fn new() -> Self {
        Self {
            storage: StorageConfig::default(),
            payment: PaymentConfig::default(),
            sync: SyncConfig::default(),
            seed_on_first_run: default_seed_on_first_run(),
        }
    }

    /// Set the payment processing delay
    pub fn with_payment_delay(mut self, delay: Duration) -> Self {
        self.payment.processing_delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Enable or disable first-run seeding
    pub fn with_seed(mut self, seed: bool) -> Self {
        self.seed_on_first_run = seed;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        self.storage.validate()?;

        if self.sync.channel_capacity == 0 {
            return Err(crate::Error::config("Sync channel capacity must be > 0"));
        }

        Ok(())
    }
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Storage backend configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StorageConfig {
    /// In-memory store (not persistent)
    #[default]
    Memory,

    /// File-based store
    File {
        /// Directory holding one file per slot
        dir: String,
    },
}

impl StorageConfig {
    /// Validate the storage configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        match self {
            StorageConfig::File { dir } if dir.trim().is_empty() => {
                Err(crate::Error::config("File store directory cannot be empty"))
            }
            _ => Ok(()),
        }
    }

    /// Get the storage type name
    pub fn type_name(&self) -> &str {
        match self {
            StorageConfig::Memory => "memory",
            StorageConfig::File { .. } => "file",
        }
    }

    /// Build the configured store
    pub async fn open(&self) -> Result<Arc<dyn PersistentStore>, crate::Error> {
        self.validate()?;
        match self {
            StorageConfig::Memory => Ok(Arc::new(MemoryStore::new())),
            StorageConfig::File { dir } => Ok(Arc::new(FileStore::new(dir).await?)),
        }
    }
}

/// Payment simulation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentConfig {
    /// Fixed processing delay before fees are marked paid (in milliseconds)
    #[serde(default = "default_processing_delay_ms")]
    pub processing_delay_ms: u64,
}

impl PaymentConfig {
    pub fn processing_delay(&self) -> Duration {
        Duration::from_millis(self.processing_delay_ms)
    }
}

impl Default for PaymentConfig {
    fn default() -> Self {
        Self {
            processing_delay_ms: default_processing_delay_ms(),
        }
    }
}

/// Change feed settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Capacity of the broadcast channels
    ///
    /// A context that falls further behind than this reloads its
    /// collection from storage instead of replaying every change.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
        }
    }
}

fn default_seed_on_first_run() -> bool {
    true
}

fn default_processing_delay_ms() -> u64 {
    2000
}

fn default_channel_capacity() -> usize {
    64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_deserialize_from_empty_object() {
        let config: PortalConfig = serde_json::from_str("{}").unwrap();

        assert_eq!(config.storage, StorageConfig::Memory);
        assert_eq!(config.payment.processing_delay(), Duration::from_secs(2));
        assert_eq!(config.sync.channel_capacity, 64);
        assert!(config.seed_on_first_run);
    }

    #[test]
    fn file_storage_is_tagged() {
        let config: PortalConfig =
            serde_json::from_str(r#"{"storage":{"type":"file","dir":"/tmp/portal"}}"#).unwrap();
        assert_eq!(config.storage.type_name(), "file");
    }

    #[test]
    fn payment_delay_saturates() {
        let config = PortalConfig::new().with_payment_delay(Duration::MAX);
        assert_eq!(config.payment.processing_delay_ms, u64::MAX);

        let config = PortalConfig::new().with_payment_delay(Duration::from_micros(1500));
        assert_eq!(config.payment.processing_delay_ms, 1);
    }

    #[test]
    fn validate_rejects_bad_values() {
        let mut config = PortalConfig::new();
        config.storage = StorageConfig::File { dir: "  ".into() };
        assert!(config.validate().is_err());

        let mut config = PortalConfig::new();
        config.sync.channel_capacity = 0;
        assert!(config.validate().is_err());

        assert!(PortalConfig::new().validate().is_ok());
    }
}
