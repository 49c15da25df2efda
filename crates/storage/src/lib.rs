//! Storage abstraction and implementations for jobworker.
//!
//! The [`Storage`] trait covers job and task persistence, the raw statement
//! primitive used by query tasks, and the worker service registry.

#![warn(missing_docs)]

pub mod trait_;
pub mod memory_storage;
pub mod json_storage;
#[cfg(feature = "sqlite")]
pub mod sqlite_storage;

pub use trait_::{Storage, StorageError, Result, ServiceRecord};
pub use memory_storage::MemoryStorage;
pub use json_storage::JsonStorage;
#[cfg(feature = "sqlite")]
pub use sqlite_storage::SqliteStorage;
