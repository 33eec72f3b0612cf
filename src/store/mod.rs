//! Canonical auth-state storage
//!
//! The broker never caches auth state; it reads through an [`AuthStore`]
//! every time it needs to report it.

mod file;
mod memory;

use crate::types::AuthState;
use async_trait::async_trait;
use tokio::sync::broadcast;

pub use file::FileStore;
pub use memory::MemoryStore;

/// Capacity of the change-notification channel
pub(crate) const CHANGE_CHANNEL_CAPACITY: usize = 16;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("File watch error: {0}")]
    Watch(#[from] notify::Error),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Emitted whenever the stored record changes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStateChange {
    /// Written through this store
    Set,
    /// Cleared through this store
    Cleared,
    /// Modified by a writer outside this process
    External,
}

#[async_trait]
pub trait AuthStore: Send + Sync {
    /// Current state, or the unauthenticated default if nothing is stored
    async fn get_auth_state(&self) -> StoreResult<AuthState>;

    async fn set_auth_state(&self, state: AuthState) -> StoreResult<()>;

    async fn clear_auth_state(&self) -> StoreResult<()>;

    /// Subscribe to change notifications, covering writes by any writer the
    /// store can observe
    fn subscribe(&self) -> broadcast::Receiver<AuthStateChange>;
}
