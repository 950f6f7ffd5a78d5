// # feeportal-core
//
// Core library for the student fee portal.
//
// ## Architecture Overview
//
// The portal's only logic beyond rendering is a small data layer:
// - **PersistentStore**: Trait for durable key/value storage (`students`, `currentUser`)
// - **SyncBroadcaster**: Publishes collection changes to other contexts and
//   payment notifications within the current one
// - **RecordRepository**: In-memory collection with the unique-email invariant
// - **SessionService**: The authenticated student, kept in step with the collection
// - **AuthService**: login, logout, signup, update_profile, pay_fees, list_all
//
// ## Design Notes
//
// 1. **Explicit lifecycle**: No process-wide state. The host opens a
//    `StorageNamespace` and attaches one `AuthService` per context.
// 2. **Transport-neutral sync**: Contexts exchange `{key, snapshot}` messages
//    over a channel, not a browser storage event.
// 3. **Demo credentials**: Passwords are stored and compared as plain values.
// 4. **Demo payments**: Payment is a fixed delay followed by success.

pub mod auth;
pub mod config;
pub mod error;
pub mod repository;
pub mod session;
pub mod store;
pub mod student;
pub mod sync;
pub mod traits;

// Re-export core types for convenience
pub use auth::AuthService;
pub use config::{PaymentConfig, PortalConfig, StorageConfig, SyncConfig};
pub use error::{Error, Result};
pub use repository::RecordRepository;
pub use session::SessionService;
pub use store::{FileStore, MemoryStore};
pub use student::{ProfileUpdate, Student, seed_students};
pub use sync::{
    ContextId, ObserverGuard, PaymentCompleted, Received, StorageChange, StorageNamespace,
    Subscription, SyncBroadcaster,
};
pub use traits::PersistentStore;
