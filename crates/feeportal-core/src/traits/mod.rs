//! Core traits for the fee portal
//!
//! - [`PersistentStore`]: Durable key/value storage of the collection and session

pub mod persistent_store;

pub use persistent_store::{CURRENT_USER_KEY, PersistentStore, STUDENTS_KEY};
