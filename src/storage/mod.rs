//! Durable key-value persistence
//!
//! The pool persists its endpoint list and statistics through the
//! [`KvStore`] trait so the storage backend stays swappable:
//! - [`FileStore`] keeps everything in one JSON document on disk
//! - [`MemoryStore`] backs tests and ephemeral runs

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use async_trait::async_trait;

use crate::error::Result;

/// String key-value store used for pool persistence
///
/// Implementations must tolerate concurrent access from multiple tasks.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Read a value, `None` when the key is absent
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write a value, creating or replacing the key
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Delete a key; deleting an absent key is a no-op
    async fn remove(&self, key: &str) -> Result<()>;

    /// All keys currently present, in no particular order
    async fn keys(&self) -> Result<Vec<String>>;
}
