// # Persistent Store Trait
//
// Defines the interface for durable key/value storage.
//
// ## Purpose
//
// The portal keeps two named slots:
// - `students`: the serialized collection
// - `currentUser`: the serialized session record (absent when logged out)
//
// Values are opaque bytes to the store. A `save` is atomic: readers see
// either the previous value or the new one, never a mix.
//
// ## Implementations
//
// - Memory: shared in-process map (tests, demos, single process)
// - File: one JSON document per slot with backup and recovery
//
// ## Usage
//
// ```rust,ignore
// use feeportal_core::PersistentStore;
//
// let store = /* PersistentStore implementation */;
// store.save("students", b"[]".to_vec()).await?;
// let bytes = store.load("students").await?;
// store.remove("currentUser").await?;
// ```

use async_trait::async_trait;

/// Slot holding the serialized student collection
pub const STUDENTS_KEY: &str = "students";

/// Slot holding the serialized session record
pub const CURRENT_USER_KEY: &str = "currentUser";

/// Trait for durable storage implementations
///
/// Implementations must be thread-safe and usable across async tasks.
/// Several execution contexts may share one store through a
/// [`StorageNamespace`](crate::sync::StorageNamespace).
///
/// The store knows nothing about students or sessions. Deciding what to
/// write and when is owned by `RecordRepository` and `SessionService`.
#[async_trait]
pub trait PersistentStore: Send + Sync {
    /// Read a slot
    ///
    /// # Returns
    ///
    /// - `Ok(Some(bytes))`: The stored value
    /// - `Ok(None)`: The slot has never been written, or was removed
    /// - `Err(Error)`: Storage error
    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>, crate::Error>;

    /// Replace a slot's value atomically
    async fn save(&self, key: &str, value: Vec<u8>) -> Result<(), crate::Error>;

    /// Remove a slot. Removing an absent slot succeeds.
    async fn remove(&self, key: &str) -> Result<(), crate::Error>;

    /// Persist any pending changes
    ///
    /// Both bundled stores write through, so this is a no-op for them.
    async fn flush(&self) -> Result<(), crate::Error> {
        Ok(())
    }
}
