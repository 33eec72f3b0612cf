use super::{AuthStateChange, AuthStore, StoreResult, CHANGE_CHANNEL_CAPACITY};
use crate::types::AuthState;
use async_trait::async_trait;
use tokio::sync::{broadcast, RwLock};

/// Process-local store, used when no state file is configured
pub struct MemoryStore {
    state: RwLock<Option<AuthState>>,
    changes: broadcast::Sender<AuthStateChange>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::seeded(None)
    }

    /// Store pre-seeded with `state`; no change notification is emitted
    pub fn with_state(state: AuthState) -> Self {
        Self::seeded(Some(state))
    }

    fn seeded(state: Option<AuthState>) -> Self {
        let (changes, _rx) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            state: RwLock::new(state),
            changes,
        }
    }

    fn notify(&self, change: AuthStateChange) {
        // No subscribers is fine
        let _ = self.changes.send(change);
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuthStore for MemoryStore {
    async fn get_auth_state(&self) -> StoreResult<AuthState> {
        Ok(self.state.read().await.clone().unwrap_or_default())
    }

    async fn set_auth_state(&self, state: AuthState) -> StoreResult<()> {
        *self.state.write().await = Some(state);
        self.notify(AuthStateChange::Set);
        Ok(())
    }

    async fn clear_auth_state(&self) -> StoreResult<()> {
        *self.state.write().await = None;
        self.notify(AuthStateChange::Cleared);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthStateChange> {
        self.changes.subscribe()
    }
}
